//! Translates an [`crate::ast::Expr`] tree into IR (`spec.md` §4.4).
//!
//! Grounded on `cranelift-frontend`'s `FunctionBuilder`: rather than a
//! global "current function"/"current block" pair (the `spec.md` §9
//! REDESIGN FLAG on "Global mutable state"), a [`Builder`] is an explicit
//! cursor threaded through every `emit_*` call, the same shape as
//! `cranelift_frontend::FunctionBuilder` wrapping a `Function` plus its own
//! insertion-block state.
//!
//! The three entry points the original design calls `EmitToBuffer`,
//! `EmitRef`, and `EmitMove` are [`Emitter::emit_value`] (produce a value),
//! [`Emitter::emit_ref`] (produce the address of an lvalue), and the
//! two-phase sequence inside [`Emitter::emit_assign`] (evaluate both sides
//! before writing, so `a, b = b, a`-style aliasing is never corrupted).

use hashbrown::HashMap;

use crate::ast::{BinaryOp, Expr, Literal, Param, Stmt, TypeCtorOp, TypeExpr, UnaryOp};
use crate::cast;
use crate::error::{Error, Result};
use crate::interp::FunctionTable;
use crate::ir::entities::{BlockId, FunctionRef, Register};
use crate::ir::instructions::{ArithOp, Callee, CmpOp, Immediate, Instruction, LogicalOp, Operand};
use crate::ir::{CompiledFunction, Jump};
use crate::types::{Evaluation, Kind, Parameter, Primitive, Type, TypeRegistry};

/// A local name binding: either a register holding the value directly
/// (function parameters and small `let`s), or a register holding the
/// *address* of the value (stack-allocated `let`s whose type is "big", or
/// anything the emitter took a reference to).
#[derive(Clone, Copy)]
enum Binding {
    Value(Register, Type),
    Address(Register, Type),
}

/// The emitter's cursor into one [`CompiledFunction`] under construction:
/// which block new instructions append to, plus the stack of lexical
/// scopes currently in view. Analogous to `FunctionBuilder`'s
/// `position` + SSA variable map.
pub struct Builder<'f> {
    func: &'f mut CompiledFunction,
    current: BlockId,
    scopes: Vec<HashMap<String, Binding>>,
}

impl<'f> Builder<'f> {
    pub fn new(func: &'f mut CompiledFunction) -> Self {
        Self { func, current: func.entry(), scopes: vec![HashMap::new()] }
    }

    fn push(&mut self, inst: Instruction) {
        self.func.push_instruction(self.current, inst);
    }

    fn push_scope(&mut self) {
        self.scopes.push(HashMap::new());
    }

    fn pop_scope(&mut self) {
        self.scopes.pop();
    }

    fn bind(&mut self, name: impl Into<String>, binding: Binding) {
        self.scopes.last_mut().expect("at least one scope").insert(name.into(), binding);
    }

    fn lookup(&self, name: &str) -> Option<Binding> {
        self.scopes.iter().rev().find_map(|scope| scope.get(name).copied())
    }

    /// Terminates the current block with `jump` and releases the mutable
    /// borrow of the underlying function, mirroring
    /// `FunctionBuilder::finalize` consuming `self` in `cranelift-frontend`
    /// so the caller can go back to touching the `CompiledFunction`
    /// directly.
    fn finish(self, jump: Jump) {
        self.func.set_jump(self.current, jump);
    }
}

/// A function known to the emitter by name, for resolving [`Expr::Call`]
/// targets. The core does not itself define name resolution across
/// modules/scopes (external collaborator, `spec.md` §1) — this is the
/// reduced, single-namespace stand-in the Emitter needs to translate a
/// call expression into a `Callee::Static`.
#[derive(Clone, Copy)]
pub struct FunctionBinding {
    pub function_ref: FunctionRef,
    pub function_type: Type,
}

/// Builds `CompiledFunction`s from [`Expr`] trees against one
/// [`TypeRegistry`] and [`FunctionTable`] (`spec.md` §4.4).
pub struct Emitter<'a> {
    registry: &'a mut TypeRegistry,
    functions: &'a mut FunctionTable,
    module: crate::types::nominal::ModuleId,
    function_names: HashMap<String, FunctionBinding>,
    generic_function_names: HashMap<String, Type>,
    /// Type-parameter substitutions in scope while emitting a specialized
    /// `CompiledFunction` for a `GenericFunction` instantiation (`spec.md`
    /// §4.6). Empty outside of `EvalBridge::instantiate_generic_function`.
    type_param_bindings: HashMap<String, Type>,
}

impl<'a> Emitter<'a> {
    pub fn new(
        registry: &'a mut TypeRegistry,
        functions: &'a mut FunctionTable,
        module: crate::types::nominal::ModuleId,
    ) -> Self {
        Self {
            registry,
            functions,
            module,
            function_names: HashMap::new(),
            generic_function_names: HashMap::new(),
            type_param_bindings: HashMap::new(),
        }
    }

    /// Registers a dependent-term type parameter under `name`, shadowing any
    /// prior binding of the same name. Cleared with
    /// [`Emitter::clear_type_params`] once the specialized function has been
    /// emitted.
    pub fn bind_type_params(&mut self, bindings: HashMap<String, Type>) {
        self.type_param_bindings = bindings;
    }

    pub fn clear_type_params(&mut self) {
        self.type_param_bindings.clear();
    }

    pub fn functions_mut(&mut self) -> &mut FunctionTable {
        self.functions
    }

    /// Registers `name` as a call target for subsequent [`Expr::Call`]
    /// emissions, once its `CompiledFunction` has already been emitted
    /// (or is a foreign/host symbol the caller wired up another way).
    pub fn declare_function(&mut self, name: impl Into<String>, binding: FunctionBinding) {
        self.function_names.insert(name.into(), binding);
    }

    /// The module new nominal types (`create_struct` and friends) are
    /// scoped under when this emitter resolves a type expression that
    /// names one.
    pub fn module(&self) -> crate::types::nominal::ModuleId {
        self.module
    }

    pub fn registry(&self) -> &TypeRegistry {
        self.registry
    }

    pub fn registry_mut(&mut self) -> &mut TypeRegistry {
        self.registry
    }

    /// Resolves a [`TypeExpr`] against this emitter's registry, interning
    /// compound types as needed.
    pub fn resolve_type(&mut self, ty: &TypeExpr) -> Type {
        match ty {
            TypeExpr::Primitive(p) => Type::from_primitive(*p),
            TypeExpr::Pointer(inner) => {
                let pointee = self.resolve_type(inner);
                self.registry.intern_pointer(pointee)
            }
            TypeExpr::BufferPointer(inner) => {
                let pointee = self.resolve_type(inner);
                self.registry.intern_buffer_pointer(pointee)
            }
            TypeExpr::Slice(inner) => {
                let element = self.resolve_type(inner);
                self.registry.intern_slice(element)
            }
            TypeExpr::Array(len, inner) => {
                let element = self.resolve_type(inner);
                self.registry.intern_array(*len, element)
            }
            TypeExpr::Concrete(t) => *t,
            TypeExpr::Param(name) => match self.type_param_bindings.get(name) {
                Some(ty) => *ty,
                None => unreachable!("generic type parameter `{name}` referenced outside instantiation"),
            },
        }
    }

    /// Emits `params => body` as a brand-new [`CompiledFunction`], finalizes
    /// it, and registers it in the function table. Returns the function's
    /// reference and its `Function` type (`spec.md` §4.6's "zero-arg
    /// function construction" step, generalized to arbitrary arity since the
    /// emitter needs it for every function literal, not only compile-time
    /// thunks).
    pub fn emit_function(
        &mut self,
        name: impl Into<String>,
        params: &[Param],
        return_ty: Option<&TypeExpr>,
        evaluation: Evaluation,
        body: &Expr,
    ) -> Result<FunctionBinding> {
        let name = name.into();
        let param_types: Vec<Type> = params.iter().map(|p| self.resolve_type(&p.ty)).collect();
        let params_key: Vec<Parameter> = params
            .iter()
            .zip(&param_types)
            .map(|(p, &ty)| Parameter { name: Some(p.name.clone()), ty })
            .collect();

        let placeholder_fn_ty = Type::from_primitive(Primitive::Unit);
        let mut func = CompiledFunction::new(name.clone(), placeholder_fn_ty);
        let mut param_regs = Vec::with_capacity(params.len());
        for &ty in &param_types {
            param_regs.push(func.new_register(ty));
        }

        let mut builder = Builder::new(&mut func);
        for ((param, reg), &ty) in params.iter().zip(&param_regs).zip(&param_types) {
            builder.bind(param.name.clone(), Binding::Value(*reg, ty));
        }

        let (body_operand, body_ty) = self.emit_value(&mut builder, body, None)?;
        let declared_return = return_ty.map(|t| self.resolve_type(t));
        let final_ty = match declared_return {
            Some(expected) => {
                let coerced = self.coerce(&mut builder, body_operand, body_ty, expected)?;
                let dst = self.materialize(&mut builder, coerced, expected);
                (dst, expected)
            }
            None => (self.materialize(&mut builder, body_operand, body_ty), body_ty),
        };
        builder.finish(Jump::Return);
        func.set_return_registers(vec![final_ty.0]);

        let returns = vec![final_ty.1];
        let params_id = self.registry.intern_parameters(params_key);
        let function_type = self.registry.intern_function(params_id, returns, evaluation);
        func.set_function_type(function_type);

        func.finalize(self.registry);
        let function_ref = self.functions.push(func);
        let binding = FunctionBinding { function_ref, function_type };
        self.function_names.insert(name, binding);
        Ok(binding)
    }

    /// Declares a generic function: stores its dependent term in `bodies`
    /// and interns the resulting `GenericFunction` type. Does not emit any
    /// `CompiledFunction` — specialization happens lazily per argument-type
    /// tuple via `EvalBridge::instantiate_generic_function`.
    pub fn declare_generic_function(
        &mut self,
        name: impl Into<String>,
        type_params: Vec<String>,
        params: Vec<Param>,
        return_ty: Option<TypeExpr>,
        evaluation: Evaluation,
        body: Expr,
        bodies: &mut crate::ir::DependentBodyArena,
    ) -> Type {
        let body_id = bodies.declare(crate::ir::DependentBody { type_params, params, return_ty, body });
        let ty = self.registry.intern_generic_function(evaluation, body_id);
        self.generic_function_names.insert(name.into(), ty);
        ty
    }

    pub fn lookup_generic_function(&self, name: &str) -> Option<Type> {
        self.generic_function_names.get(name).copied()
    }

    /// Ensures `operand` lives in a register (an `Immediate` is pushed
    /// through a fresh register) — needed anywhere the IR shape requires a
    /// `Register` rather than any `Operand` (jump conditions, Phi
    /// destinations, return registers).
    fn materialize(&mut self, b: &mut Builder, operand: Operand, ty: Type) -> Register {
        match operand {
            Operand::Register(r) => r,
            Operand::Immediate(imm) => {
                let dst = b.func.new_register(ty);
                b.push(Instruction::PushValue { value: imm, dst });
                dst
            }
        }
    }

    /// Inserts an explicit `Cast` if `from != to`, failing if the
    /// conversion is not even an implicit one (`spec.md` §4.2). Used
    /// everywhere a value needs to flow into a context of known type: `let`
    /// with a declared type, call argument binding, function return.
    fn coerce(&mut self, b: &mut Builder, operand: Operand, from: Type, to: Type) -> Result<Operand> {
        if from == to {
            return Ok(operand);
        }
        if !cast::can_cast_implicitly(self.registry, from, to) {
            return Err(Error::InvalidCast { from, to });
        }
        let dst = b.func.new_register(to);
        b.push(Instruction::Cast { from, to, src: operand, dst });
        Ok(Operand::Register(dst))
    }

    fn literal_natural_type(lit: Literal) -> Type {
        match lit {
            Literal::Bool(_) => Type::from_primitive(Primitive::Bool),
            Literal::Integer(_) => Type::from_primitive(Primitive::Integer),
            Literal::FloatBits(_) => Type::from_primitive(Primitive::F64),
            Literal::Char(_) => Type::from_primitive(Primitive::Char),
            Literal::Unit => Type::from_primitive(Primitive::Unit),
        }
    }

    fn literal_immediate(lit: Literal) -> Immediate {
        match lit {
            Literal::Bool(v) => Immediate::Bool(v),
            Literal::Integer(v) => Immediate::I64(v),
            Literal::FloatBits(bits) => Immediate::F64(f64::from_bits(bits)),
            Literal::Char(v) => Immediate::Char(v),
            Literal::Unit => Immediate::Unit,
        }
    }

    /// `EmitToBuffer`: emits `expr`'s value, optionally coercing it toward
    /// `expected` (used to default untyped integer/float literals and to
    /// unify operand types across a binary operator).
    pub fn emit_value(&mut self, b: &mut Builder, expr: &Expr, expected: Option<Type>) -> Result<(Operand, Type)> {
        match expr {
            Expr::Literal(lit) => {
                let natural = Self::literal_natural_type(*lit);
                let imm = Self::literal_immediate(*lit);
                let target = match expected {
                    Some(t) => t,
                    None => cast::infer(self.registry, natural).unwrap_or(natural),
                };
                let coerced = self.coerce(b, Operand::Immediate(imm), natural, target)?;
                Ok((coerced, target))
            }
            Expr::Identifier(name) => match b.lookup(name) {
                Some(Binding::Value(reg, ty)) => Ok((Operand::Register(reg), ty)),
                Some(Binding::Address(reg, ty)) => {
                    let dst = b.func.new_register(ty);
                    b.push(Instruction::Load { addr: Operand::Register(reg), ty, dst });
                    Ok((Operand::Register(dst), ty))
                }
                None => Err(Error::UndeclaredIdentifierInModule(name.clone())),
            },
            Expr::Unary { op, operand } => self.emit_unary(b, *op, operand, expected),
            Expr::Binary { op, lhs, rhs } => self.emit_binary(b, *op, lhs, rhs),
            Expr::Cast { expr, ty } => self.emit_cast(b, expr, ty),
            Expr::Member { .. } => {
                let (addr_reg, pointee_ty) = self.emit_ref(b, expr)?;
                let dst = b.func.new_register(pointee_ty);
                b.push(Instruction::Load { addr: Operand::Register(addr_reg), ty: pointee_ty, dst });
                Ok((Operand::Register(dst), pointee_ty))
            }
            Expr::TypeValue(ty) => {
                let dst = b.func.new_register(Type::from_primitive(Primitive::Type_));
                b.push(Instruction::PushType { value: *ty, dst });
                Ok((Operand::Register(dst), Type::from_primitive(Primitive::Type_)))
            }
            Expr::TypeCtor(op, args) => self.emit_type_ctor(b, *op, args),
            Expr::Call { callee, args } => self.emit_call(b, callee, args),
            Expr::If { cond, then_branch, else_branch } => {
                self.emit_if(b, cond, then_branch, else_branch, expected)
            }
            Expr::Switch { scrutinee, arms, default } => {
                self.emit_switch(b, scrutinee, arms, default, expected)
            }
            Expr::Block(stmts, tail) => self.emit_block(b, stmts, tail, expected),
            Expr::FunctionLiteral { params, return_ty, evaluation, body } => {
                let binding = self.emit_function("<lambda>", params, return_ty.as_ref(), *evaluation, body)?;
                let dst = b.func.new_register(binding.function_type);
                b.push(Instruction::PushFunction { value: binding.function_ref, dst });
                Ok((Operand::Register(dst), binding.function_type))
            }
        }
    }

    /// `EmitRef`: emits the *address* of an lvalue expression. Only
    /// identifiers bound to a stack allocation and member-access chains
    /// rooted in one are addressable; anything else is a value-category
    /// error the emitter refuses statically.
    pub fn emit_ref(&mut self, b: &mut Builder, expr: &Expr) -> Result<(Register, Type)> {
        match expr {
            Expr::Identifier(name) => match b.lookup(name) {
                Some(Binding::Address(reg, ty)) => Ok((reg, ty)),
                Some(Binding::Value(..)) => Err(Error::AssigningToConstant),
                None => Err(Error::UndeclaredIdentifierInModule(name.clone())),
            },
            Expr::Member { base, field } => {
                let (base_reg, base_ty) = self.emit_ref(b, base)?;
                if base_ty.kind() != Kind::Struct {
                    return Err(Error::MissingMember(base_ty, field.clone()));
                }
                if self.registry.struct_data(base_ty).completeness() != crate::types::Completeness::Complete {
                    return Err(Error::EvaluationFailure(crate::error::EvaluationFailure::IncompleteStructUse));
                }
                let field_index = self
                    .registry
                    .struct_data(base_ty)
                    .field_index(field)
                    .ok_or_else(|| Error::MissingMember(base_ty, field.clone()))?;
                let field_ty = self.registry.struct_data(base_ty).fields[field_index].ty;
                let addr_ty = self.registry.intern_pointer(field_ty);
                let dst = b.func.new_register(addr_ty);
                b.push(Instruction::StructIndex {
                    base: Operand::Register(base_reg),
                    field_index,
                    struct_ty: base_ty,
                    dst,
                });
                Ok((dst, field_ty))
            }
            _ => Err(Error::AssigningToConstant),
        }
    }

    /// Emits one of the `*Of` type-constructor instructions over operands
    /// that must themselves evaluate to `Type` values. The result is itself
    /// a `Type`-typed value, so these compose (`PtrOf(SliceOf(I64))`).
    fn emit_type_ctor(&mut self, b: &mut Builder, op: TypeCtorOp, args: &[Expr]) -> Result<(Operand, Type)> {
        let type_ty = Type::from_primitive(Primitive::Type_);
        let dst = b.func.new_register(type_ty);
        match op {
            TypeCtorOp::PtrOf => {
                let (pointee, _) = self.emit_value(b, &args[0], Some(type_ty))?;
                b.push(Instruction::PtrOf { pointee, dst });
            }
            TypeCtorOp::BufPtrOf => {
                let (pointee, _) = self.emit_value(b, &args[0], Some(type_ty))?;
                b.push(Instruction::BufPtrOf { pointee, dst });
            }
            TypeCtorOp::SliceOf => {
                let (element, _) = self.emit_value(b, &args[0], Some(type_ty))?;
                b.push(Instruction::SliceOf { element, dst });
            }
            TypeCtorOp::ArrayOf => {
                let i64_ty = Type::from_primitive(Primitive::I64);
                let (length, _) = self.emit_value(b, &args[0], Some(i64_ty))?;
                let (element, _) = self.emit_value(b, &args[1], Some(type_ty))?;
                b.push(Instruction::ArrayOf { length, element, dst });
            }
        }
        Ok((Operand::Register(dst), type_ty))
    }

    fn emit_unary(&mut self, b: &mut Builder, op: UnaryOp, operand: &Expr, expected: Option<Type>) -> Result<(Operand, Type)> {
        match op {
            UnaryOp::Neg => {
                let (value, ty) = self.emit_value(b, operand, expected)?;
                let prim = ty.as_primitive().filter(|p| p.is_numeric()).ok_or(Error::NotAType)?;
                let zero = zero_immediate(prim);
                let dst = b.func.new_register(ty);
                b.push(Instruction::Arith { op: ArithOp::Sub, kind: prim, lhs: zero, rhs: value, dst });
                Ok((Operand::Register(dst), ty))
            }
            UnaryOp::Not => {
                let bool_ty = Type::from_primitive(Primitive::Bool);
                let (value, _) = self.emit_value(b, operand, Some(bool_ty))?;
                let dst = b.func.new_register(bool_ty);
                b.push(Instruction::Logical { op: LogicalOp::Not, lhs: value, rhs: None, dst });
                Ok((Operand::Register(dst), bool_ty))
            }
        }
    }

    fn emit_binary(&mut self, b: &mut Builder, op: BinaryOp, lhs: &Expr, rhs: &Expr) -> Result<(Operand, Type)> {
        match op {
            BinaryOp::And | BinaryOp::Or => {
                let bool_ty = Type::from_primitive(Primitive::Bool);
                let (l, _) = self.emit_value(b, lhs, Some(bool_ty))?;
                let (r, _) = self.emit_value(b, rhs, Some(bool_ty))?;
                let dst = b.func.new_register(bool_ty);
                let op = if op == BinaryOp::And { LogicalOp::And } else { LogicalOp::Or };
                b.push(Instruction::Logical { op, lhs: l, rhs: Some(r), dst });
                Ok((Operand::Register(dst), bool_ty))
            }
            BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
                self.emit_comparison(b, op, lhs, rhs)
            }
            BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => {
                let (l, lty) = self.emit_value_natural(b, lhs)?;
                let (r, rty) = self.emit_value_natural(b, rhs)?;
                let meet_ty = cast::meet(self.registry, lty, rty).ok_or(Error::ComparingIncomparables(lty, rty))?;
                // `meet` can itself still be the untyped `Integer` literal
                // type (both sides were bare integer literals); default it
                // the same way a lone literal would be.
                let result_ty = cast::infer(self.registry, meet_ty).unwrap_or(meet_ty);
                let l = self.coerce(b, l, lty, result_ty)?;
                let r = self.coerce(b, r, rty, result_ty)?;
                let prim = result_ty.as_primitive().ok_or(Error::NotAType)?;
                let arith_op = match op {
                    BinaryOp::Add => ArithOp::Add,
                    BinaryOp::Sub => ArithOp::Sub,
                    BinaryOp::Mul => ArithOp::Mul,
                    BinaryOp::Div => ArithOp::Div,
                    BinaryOp::Mod => ArithOp::Mod,
                    _ => unreachable!(),
                };
                let dst = b.func.new_register(result_ty);
                b.push(Instruction::Arith { op: arith_op, kind: prim, lhs: l, rhs: r, dst });
                Ok((Operand::Register(dst), result_ty))
            }
        }
    }

    /// Emits `expr`'s value without defaulting a bare literal's type, so a
    /// caller that still needs to `meet` it against a sibling operand (an
    /// arithmetic operand, a comparison operand) sees the literal's true
    /// `Integer`/`F64` nature rather than an already-widened concrete type —
    /// `cast::meet`'s special case for `Primitive::Integer` only fires on
    /// the undefaulted type.
    fn emit_value_natural(&mut self, b: &mut Builder, expr: &Expr) -> Result<(Operand, Type)> {
        if let Expr::Literal(lit) = expr {
            let natural = Self::literal_natural_type(*lit);
            return Ok((Operand::Immediate(Self::literal_immediate(*lit)), natural));
        }
        self.emit_value(b, expr, None)
    }

    fn emit_comparison(&mut self, b: &mut Builder, op: BinaryOp, lhs: &Expr, rhs: &Expr) -> Result<(Operand, Type)> {
        let (l, lty) = self.emit_value_natural(b, lhs)?;
        let (r, rty) = self.emit_value_natural(b, rhs)?;
        let meet_ty = cast::meet(self.registry, lty, rty).ok_or(Error::ComparingIncomparables(lty, rty))?;
        let meet_ty = cast::infer(self.registry, meet_ty).unwrap_or(meet_ty);
        let l = self.coerce(b, l, lty, meet_ty)?;
        let r = self.coerce(b, r, rty, meet_ty)?;
        let bool_ty = Type::from_primitive(Primitive::Bool);
        let dst = b.func.new_register(bool_ty);

        if matches!(meet_ty.kind(), Kind::Pointer | Kind::BufferPointer) {
            let ne = match op {
                BinaryOp::Eq => false,
                BinaryOp::Ne => true,
                _ => return Err(Error::ComparingIncomparables(lty, rty)),
            };
            b.push(Instruction::PtrEq { ne, lhs: l, rhs: r, dst });
            return Ok((Operand::Register(dst), bool_ty));
        }

        let prim = meet_ty.as_primitive().ok_or(Error::ComparingIncomparables(lty, rty))?;
        // `Gt`/`Ge` are not represented directly; swap operands against
        // `Lt`/`Le` (`spec.md` §4.3).
        let (op, l, r) = match op {
            BinaryOp::Gt => (CmpOp::Lt, r, l),
            BinaryOp::Ge => (CmpOp::Le, r, l),
            BinaryOp::Eq => (CmpOp::Eq, l, r),
            BinaryOp::Ne => (CmpOp::Ne, l, r),
            BinaryOp::Lt => (CmpOp::Lt, l, r),
            BinaryOp::Le => (CmpOp::Le, l, r),
            _ => unreachable!(),
        };
        b.push(Instruction::Cmp { op, kind: prim, lhs: l, rhs: r, dst });
        Ok((Operand::Register(dst), bool_ty))
    }

    fn emit_cast(&mut self, b: &mut Builder, expr: &Expr, ty: &TypeExpr) -> Result<(Operand, Type)> {
        let to = self.resolve_type(ty);
        let (value, from) = self.emit_value(b, expr, None)?;
        if from == to {
            return Ok((value, to));
        }
        if !cast::can_cast_explicitly(self.registry, from, to) {
            return Err(Error::InvalidCast { from, to });
        }
        let dst = b.func.new_register(to);
        b.push(Instruction::Cast { from, to, src: value, dst });
        Ok((Operand::Register(dst), to))
    }

    fn emit_call(&mut self, b: &mut Builder, callee: &str, args: &[Expr]) -> Result<(Operand, Type)> {
        let binding = *self
            .function_names
            .get(callee)
            .ok_or_else(|| Error::UndeclaredIdentifierInModule(callee.to_string()))?;
        let key = self.registry.decompose_function(binding.function_type).clone();
        let params = self.registry.decompose_parameters(key.params).to_vec();

        let mut arg_operands = Vec::with_capacity(args.len());
        let mut arg_types = Vec::with_capacity(args.len());
        for (i, arg) in args.iter().enumerate() {
            let expected = params.get(i).map(|p| p.ty);
            let (operand, ty) = self.emit_value(b, arg, expected)?;
            arg_operands.push(operand);
            arg_types.push(ty);
        }

        let out: Vec<Register> = key.returns.iter().map(|&ty| b.func.new_register(ty)).collect();
        b.push(Instruction::Call {
            callee: Callee::Static(binding.function_ref),
            args: arg_operands,
            arg_types,
            out: out.clone(),
        });

        match (out.first(), key.returns.first()) {
            (Some(&reg), Some(&ty)) => Ok((Operand::Register(reg), ty)),
            _ => Ok((Operand::Immediate(Immediate::Unit), Type::from_primitive(Primitive::Unit))),
        }
    }

    fn emit_if(
        &mut self,
        b: &mut Builder,
        cond: &Expr,
        then_branch: &Expr,
        else_branch: &Expr,
        expected: Option<Type>,
    ) -> Result<(Operand, Type)> {
        self.emit_switch(
            b,
            cond,
            std::slice::from_ref(&(Literal::Bool(true), then_branch.clone())),
            else_branch,
            expected,
        )
    }

    /// Emits `scrutinee`'s value, then for each arm in order compares it for
    /// equality against the arm's pattern, taking the first match's body;
    /// falls through to `default` if nothing matches. Every arm (and the
    /// default) gets its own block; a `Phi` in the landing block merges
    /// whichever arm actually ran (`spec.md` §4.4's "Switch / conditional
    /// expressions").
    fn emit_switch(
        &mut self,
        b: &mut Builder,
        scrutinee: &Expr,
        arms: &[(Literal, Expr)],
        default: &Expr,
        expected: Option<Type>,
    ) -> Result<(Operand, Type)> {
        let (scrutinee_operand, scrutinee_ty) = self.emit_value(b, scrutinee, None)?;
        let scrutinee_prim = scrutinee_ty.as_primitive();

        let merge_block = b.func.push_block();
        let mut incoming: Vec<(BlockId, Operand, Type)> = Vec::with_capacity(arms.len() + 1);

        let mut check_block = b.current;
        for (pattern, body) in arms {
            let test_operand = Operand::Immediate(Self::literal_immediate(*pattern));
            let dst = b.func.new_register(Type::from_primitive(Primitive::Bool));
            let prim = scrutinee_prim.ok_or(Error::NotAType)?;
            b.func.push_instruction(
                check_block,
                Instruction::Cmp { op: CmpOp::Eq, kind: prim, lhs: scrutinee_operand, rhs: test_operand, dst },
            );

            let body_block = b.func.push_block();
            let next_check = b.func.push_block();
            b.func.set_jump(check_block, Jump::Cond { reg: dst, if_true: body_block, if_false: next_check });

            b.current = body_block;
            let (value, ty) = self.emit_value(b, body, expected)?;
            incoming.push((b.current, value, ty));
            b.func.set_jump(b.current, Jump::Uncond(merge_block));

            check_block = next_check;
        }

        b.current = check_block;
        let (default_value, default_ty) = self.emit_value(b, default, expected)?;
        incoming.push((b.current, default_value, default_ty));
        b.func.set_jump(b.current, Jump::Uncond(merge_block));

        b.current = merge_block;
        let result_ty = incoming
            .iter()
            .try_fold(incoming[0].2, |acc, (_, _, ty)| cast::meet(self.registry, acc, *ty))
            .ok_or(Error::UninferrableType)?;
        let result_ty = expected.unwrap_or(result_ty);

        // Each arm's producing block may still need a widening `Cast` before
        // the value reaches the merge block's `Phi` — `meet` only promises
        // the cast is legal, not that it has been emitted, so insert it
        // directly into that arm's block (not `b.current`, which has
        // already moved on to `merge_block`).
        let phi_incoming: Vec<(BlockId, Operand)> = incoming
            .into_iter()
            .map(|(block, value, ty)| {
                if ty == result_ty {
                    (block, value)
                } else {
                    let dst = b.func.new_register(result_ty);
                    b.func.push_instruction(
                        block,
                        Instruction::Cast { from: ty, to: result_ty, src: value, dst },
                    );
                    (block, Operand::Register(dst))
                }
            })
            .collect();
        let dst = b.func.new_register(result_ty);
        b.func.push_instruction(merge_block, Instruction::Phi { ty: result_ty, incoming: phi_incoming, dst });
        Ok((Operand::Register(dst), result_ty))
    }

    fn emit_block(&mut self, b: &mut Builder, stmts: &[Stmt], tail: &Expr, expected: Option<Type>) -> Result<(Operand, Type)> {
        b.push_scope();
        let result = (|| {
            for stmt in stmts {
                self.emit_stmt(b, stmt)?;
            }
            self.emit_value(b, tail, expected)
        })();
        b.pop_scope();
        result
    }

    fn emit_stmt(&mut self, b: &mut Builder, stmt: &Stmt) -> Result<()> {
        match stmt {
            Stmt::Let { name, ty, init } => {
                let declared = ty.as_ref().map(|t| self.resolve_type(t));
                let (init_operand, init_ty) = self.emit_value(b, init, declared)?;
                let alloc_ty = declared.unwrap_or(init_ty);
                let init_operand = self.coerce(b, init_operand, init_ty, alloc_ty)?;
                let addr_ty = self.registry.intern_pointer(alloc_ty);
                let addr_reg = b.func.new_register(addr_ty);
                b.func.record_allocation(addr_reg, alloc_ty);
                b.push(Instruction::StackAllocate { ty: alloc_ty, dst: addr_reg });

                if self.registry.is_big(alloc_ty) {
                    let (src_reg, _) = self.emit_ref(b, init)?;
                    b.push(Instruction::CopyInit {
                        ty: alloc_ty,
                        dst_addr: Operand::Register(addr_reg),
                        src_addr: Operand::Register(src_reg),
                    });
                } else {
                    b.push(Instruction::Store { ty: alloc_ty, value: init_operand, addr: Operand::Register(addr_reg) });
                }
                b.bind(name.clone(), Binding::Address(addr_reg, alloc_ty));
                Ok(())
            }
            Stmt::Assign { target, value } => self.emit_assign(b, target, value),
            Stmt::Expr(expr) => {
                self.emit_value(b, expr, None)?;
                Ok(())
            }
        }
    }

    /// Two-phase assignment: both the target's address and the new value
    /// are fully evaluated before anything is written, so `p.x = p.y` (or
    /// swap-style multi-assignment built on top of single assignments)
    /// never reads a partially-overwritten operand.
    fn emit_assign(&mut self, b: &mut Builder, target: &Expr, value: &Expr) -> Result<()> {
        let (addr_reg, target_ty) = self.emit_ref(b, target)?;
        let (value_operand, value_ty) = self.emit_value(b, value, Some(target_ty))?;
        let value_operand = self.coerce(b, value_operand, value_ty, target_ty)?;

        if self.registry.is_big(target_ty) {
            let (src_reg, _) = self.emit_ref(b, value)?;
            b.push(Instruction::CopyAssign {
                ty: target_ty,
                dst_addr: Operand::Register(addr_reg),
                src_addr: Operand::Register(src_reg),
            });
        } else {
            b.push(Instruction::Store { ty: target_ty, value: value_operand, addr: Operand::Register(addr_reg) });
        }
        Ok(())
    }
}

fn zero_immediate(prim: Primitive) -> Operand {
    let imm = match prim {
        Primitive::I8 => Immediate::I8(0),
        Primitive::I16 => Immediate::I16(0),
        Primitive::I32 => Immediate::I32(0),
        Primitive::I64 | Primitive::Integer => Immediate::I64(0),
        Primitive::U8 => Immediate::U8(0),
        Primitive::Byte => Immediate::Byte(0),
        Primitive::U16 => Immediate::U16(0),
        Primitive::U32 => Immediate::U32(0),
        Primitive::U64 => Immediate::U64(0),
        Primitive::F32 => Immediate::F32(0.0),
        Primitive::F64 => Immediate::F64(0.0),
        _ => Immediate::I64(0),
    };
    Operand::Immediate(imm)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Expr, Literal, Param, UnaryOp};
    use crate::interp::value::RuntimeValue;
    use crate::interp::Interpreter;
    use crate::types::nominal::ModuleId;

    fn new_tables() -> (TypeRegistry, FunctionTable) {
        (TypeRegistry::new(), FunctionTable::new())
    }

    #[test]
    fn negated_parameter() {
        let (mut registry, mut functions) = new_tables();
        let module = ModuleId::from_u32(0);
        let binding = {
            let mut emitter = Emitter::new(&mut registry, &mut functions, module);
            emitter
                .emit_function(
                    "negate",
                    &[Param { name: "n".into(), ty: TypeExpr::Primitive(Primitive::I64) }],
                    Some(&TypeExpr::Primitive(Primitive::I64)),
                    Evaluation::PreferRuntime,
                    &Expr::Unary {
                        op: UnaryOp::Neg,
                        operand: Box::new(Expr::Identifier("n".into())),
                    },
                )
                .unwrap()
        };

        let mut interp = Interpreter::new();
        let result = interp
            .run(&mut functions, &mut registry, binding.function_ref, vec![RuntimeValue::I64(3)])
            .unwrap();
        assert_eq!(result, vec![RuntimeValue::I64(-3)]);

        let result =
            interp.run(&mut functions, &mut registry, binding.function_ref, vec![RuntimeValue::I64(0)]).unwrap();
        assert_eq!(result, vec![RuntimeValue::I64(0)]);

        let result = interp
            .run(&mut functions, &mut registry, binding.function_ref, vec![RuntimeValue::I64(-5)])
            .unwrap();
        assert_eq!(result, vec![RuntimeValue::I64(5)]);
    }

    #[test]
    fn no_parameter_boolean_literal() {
        let (mut registry, mut functions) = new_tables();
        let module = ModuleId::from_u32(0);
        let binding = {
            let mut emitter = Emitter::new(&mut registry, &mut functions, module);
            emitter
                .emit_function(
                    "always_true",
                    &[],
                    Some(&TypeExpr::Primitive(Primitive::Bool)),
                    Evaluation::PreferRuntime,
                    &Expr::Literal(Literal::Bool(true)),
                )
                .unwrap()
        };
        let mut interp = Interpreter::new();
        let result = interp.run(&mut functions, &mut registry, binding.function_ref, vec![]).unwrap();
        assert_eq!(result, vec![RuntimeValue::Bool(true)]);
    }

    #[test]
    fn if_else_merges_through_phi() {
        let (mut registry, mut functions) = new_tables();
        let module = ModuleId::from_u32(0);
        let binding = {
            let mut emitter = Emitter::new(&mut registry, &mut functions, module);
            emitter
                .emit_function(
                    "abs",
                    &[Param { name: "n".into(), ty: TypeExpr::Primitive(Primitive::I64) }],
                    Some(&TypeExpr::Primitive(Primitive::I64)),
                    Evaluation::PreferRuntime,
                    &Expr::If {
                        cond: Box::new(Expr::Binary {
                            op: BinaryOp::Lt,
                            lhs: Box::new(Expr::Identifier("n".into())),
                            rhs: Box::new(Expr::Literal(Literal::Integer(0))),
                        }),
                        then_branch: Box::new(Expr::Unary {
                            op: UnaryOp::Neg,
                            operand: Box::new(Expr::Identifier("n".into())),
                        }),
                        else_branch: Box::new(Expr::Identifier("n".into())),
                    },
                )
                .unwrap()
        };
        let mut interp = Interpreter::new();
        let result = interp
            .run(&mut functions, &mut registry, binding.function_ref, vec![RuntimeValue::I64(-5)])
            .unwrap();
        assert_eq!(result, vec![RuntimeValue::I64(5)]);
        let result =
            interp.run(&mut functions, &mut registry, binding.function_ref, vec![RuntimeValue::I64(5)]).unwrap();
        assert_eq!(result, vec![RuntimeValue::I64(5)]);
    }

    #[test]
    fn let_binding_and_call() {
        let (mut registry, mut functions) = new_tables();
        let module = ModuleId::from_u32(0);
        let mut emitter = Emitter::new(&mut registry, &mut functions, module);
        let double = emitter
            .emit_function(
                "double",
                &[Param { name: "n".into(), ty: TypeExpr::Primitive(Primitive::I64) }],
                Some(&TypeExpr::Primitive(Primitive::I64)),
                Evaluation::PreferRuntime,
                &Expr::Binary {
                    op: BinaryOp::Mul,
                    lhs: Box::new(Expr::Identifier("n".into())),
                    rhs: Box::new(Expr::Literal(Literal::Integer(2))),
                },
            )
            .unwrap();
        let _ = double;

        let quadruple = emitter
            .emit_function(
                "quadruple",
                &[Param { name: "n".into(), ty: TypeExpr::Primitive(Primitive::I64) }],
                Some(&TypeExpr::Primitive(Primitive::I64)),
                Evaluation::PreferRuntime,
                &Expr::Block(
                    vec![Stmt::Let {
                        name: "twice".into(),
                        ty: None,
                        init: Expr::Call { callee: "double".into(), args: vec![Expr::Identifier("n".into())] },
                    }],
                    Box::new(Expr::Call {
                        callee: "double".into(),
                        args: vec![Expr::Identifier("twice".into())],
                    }),
                ),
            )
            .unwrap();

        let mut interp = Interpreter::new();
        let result = interp
            .run(&mut functions, &mut registry, quadruple.function_ref, vec![RuntimeValue::I64(5)])
            .unwrap();
        assert_eq!(result, vec![RuntimeValue::I64(20)]);
    }
}
