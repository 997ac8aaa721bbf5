//! The stack-based, single-threaded bytecode interpreter (`spec.md` §4.5).
//!
//! Grounded on `examples/original_source/backend/exec.cc` for the overall
//! block-by-block execution loop and Phi-resolution discipline, and on
//! `cranelift-codegen::data_value` for the register-slot value
//! representation (see [`value::RuntimeValue`]).

pub mod foreign;
pub mod value;

use hashbrown::HashMap;

use crate::entity::{EntityRef, PrimaryMap};
use crate::error::EvaluationFailure;
use crate::ir::instructions::{ArithOp, Callee, CmpOp, Immediate, Instruction, LogicalOp, Operand};
use crate::ir::{Address, BlockId, CompiledFunction, FunctionRef, Jump, Region, Register};
use crate::layout::{struct_field_offset, type_byte_size};
use crate::types::{Kind, Primitive, Type, TypeRegistry};
use foreign::ForeignCache;
use value::RuntimeValue;

/// The table of compiled functions an interpreter run calls into. Owned by
/// whatever holds the functions being executed (`crate::module::Module` in
/// the normal case, or a bare `PrimaryMap` in tests) — the interpreter only
/// ever borrows it.
pub type FunctionTable = PrimaryMap<FunctionRef, CompiledFunction>;

/// One activation record. Carries its own copy of the owning function's
/// register-offset table and return-register types (computed once by
/// `CompiledFunction::finalize`/emission) so instruction execution never
/// needs to hold a live borrow of the `FunctionTable` across a nested call.
struct Frame {
    registers: Vec<u8>,
    register_offsets: Vec<u32>,
    stack_slot_offsets: HashMap<Register, u32>,
    return_registers: Vec<Register>,
    return_types: Vec<Type>,
    stack_base: u64,
    current: BlockId,
    prev: BlockId,
}

impl Frame {
    fn reg_offset(&self, reg: Register) -> usize {
        self.register_offsets[reg.index()] as usize
    }

    fn slot(&self, reg: Register) -> &[u8] {
        let offset = self.reg_offset(reg);
        let end = (offset + 16).min(self.registers.len());
        &self.registers[offset..end]
    }
}

/// A single-threaded, stack-based executor over one or more
/// `CompiledFunction`s (`spec.md` §4.5). Carries its own append-only stack
/// buffer, foreign-symbol cache, and (optionally) a remaining-instruction
/// budget for host-imposed cancellation (`spec.md` §5's "Cancellation and
/// timeouts", expanded via `EvalBridge::with_instruction_budget`).
pub struct Interpreter {
    stack: Vec<u8>,
    read_only: Vec<u8>,
    foreign: ForeignCache,
    call_stack: Vec<Frame>,
    /// Parallel to `call_stack`: which function each active frame is
    /// executing, so `step` can look up the current block's instructions
    /// without `Frame` itself borrowing `FunctionTable`.
    call_function_refs: Vec<FunctionRef>,
    /// Return values of the most recently popped frame, drained by whoever
    /// is waiting on that call (`run`'s top level, or a nested `invoke`).
    pending_return: Option<Vec<RuntimeValue>>,
    instruction_budget: Option<u64>,
}

impl Interpreter {
    pub fn new() -> Self {
        Self {
            stack: Vec::new(),
            read_only: Vec::new(),
            foreign: ForeignCache::new(),
            call_stack: Vec::new(),
            call_function_refs: Vec::new(),
            pending_return: None,
            instruction_budget: None,
        }
    }

    pub fn with_instruction_budget(budget: u64) -> Self {
        let mut interp = Self::new();
        interp.instruction_budget = Some(budget);
        interp
    }

    /// Appends `bytes` to the read-only data region and returns the
    /// address of its start, for host drivers to stage string literals and
    /// other module-level constants before running a function
    /// (`spec.md` §5's "Read-only data region").
    pub fn intern_read_only(&mut self, bytes: &[u8]) -> Address {
        let offset = self.read_only.len() as u64;
        self.read_only.extend_from_slice(bytes);
        Address::read_only(offset)
    }

    /// Runs `entry` to completion with `args` bound to its parameter
    /// registers (registers `0..args.len()`), returning its return values
    /// in `entry`'s declared `return_registers` order.
    pub fn run(
        &mut self,
        functions: &mut FunctionTable,
        registry: &mut TypeRegistry,
        entry: FunctionRef,
        args: Vec<RuntimeValue>,
    ) -> Result<Vec<RuntimeValue>, EvaluationFailure> {
        let depth = self.call_stack.len();
        self.push_frame(functions, registry, entry, args);
        while self.call_stack.len() > depth {
            self.step(functions, registry)?;
        }
        Ok(self.pending_return.take().unwrap_or_default())
    }

    fn push_frame(
        &mut self,
        functions: &mut FunctionTable,
        registry: &mut TypeRegistry,
        function: FunctionRef,
        args: Vec<RuntimeValue>,
    ) {
        if functions[function].has_work_item() {
            let item = functions[function].take_work_item().expect("checked above");
            item(&mut functions[function]);
        }
        if !functions[function].is_finalized() {
            functions[function].finalize(registry);
        }
        let func = &functions[function];
        let stack_base = self.stack.len() as u64;
        self.stack.resize(self.stack.len() + func.frame_stack_bytes() as usize, 0);
        let mut registers = vec![0u8; func.frame_register_bytes() as usize];
        let offsets = func.register_offsets().to_vec();
        let slot_offsets = func.stack_slot_offsets().clone();
        let return_registers = func.return_registers().to_vec();
        let return_types = return_registers.iter().map(|r| func.register_type(*r)).collect();
        for (i, value) in args.into_iter().enumerate() {
            let reg = Register::from_u32(i as u32);
            let offset = offsets[reg.index()] as usize;
            let end = (offset + 16).min(registers.len());
            value.encode_into(&mut registers[offset..end]);
        }
        self.call_function_refs.push(function);
        self.call_stack.push(Frame {
            registers,
            register_offsets: offsets,
            stack_slot_offsets: slot_offsets,
            return_registers,
            return_types,
            stack_base,
            current: func.entry(),
            prev: func.entry(),
        });
    }

    /// Executes instructions in the current frame's current block; on a
    /// terminator, either advances to the next block or pops the frame (and
    /// stashes its return values in `pending_return`). Looks the current
    /// function up fresh through `call_function_refs` rather than holding a
    /// borrow of it, since nested calls need `&mut functions` too.
    fn step(
        &mut self,
        functions: &mut FunctionTable,
        registry: &mut TypeRegistry,
    ) -> Result<(), EvaluationFailure> {
        if let Some(0) = self.instruction_budget {
            return Err(EvaluationFailure::InstructionBudgetExceeded);
        }
        let frame_idx = self.call_stack.len() - 1;
        let current = *self.call_function_refs.last().expect("active frame");
        let (instructions, jump) = {
            let frame = &self.call_stack[frame_idx];
            let block = functions[current].block(frame.current);
            (block.instructions().to_vec(), block.jump().clone())
        };

        let start = if instructions.first().map(Instruction::is_phi).unwrap_or(false) {
            self.resolve_phi(&instructions[0])?;
            1
        } else {
            0
        };

        for inst in &instructions[start..] {
            if let Some(budget) = self.instruction_budget.as_mut() {
                if *budget == 0 {
                    return Err(EvaluationFailure::InstructionBudgetExceeded);
                }
                *budget -= 1;
            }
            self.exec(inst, functions, registry)?;
        }

        match jump {
            Jump::Return => {
                self.pop_frame();
                Ok(())
            }
            Jump::Uncond(target) => {
                let frame = &mut self.call_stack[frame_idx];
                frame.prev = frame.current;
                frame.current = target;
                Ok(())
            }
            Jump::Cond { reg, if_true, if_false } => {
                let frame = &mut self.call_stack[frame_idx];
                let cond = frame.slot(reg)[0] != 0;
                frame.prev = frame.current;
                frame.current = if cond { if_true } else { if_false };
                Ok(())
            }
            Jump::Choose(_) => Err(EvaluationFailure::NotYetImplemented(
                "Jump::Choose reached at runtime (unresolved control flow)",
            )),
        }
    }

    fn resolve_phi(&mut self, inst: &Instruction) -> Result<(), EvaluationFailure> {
        let Instruction::Phi { ty, incoming, dst } = inst else {
            unreachable!("resolve_phi called on a non-Phi instruction")
        };
        let frame = self.call_stack.last().expect("active frame");
        let matching = incoming
            .iter()
            .find(|(pred, _)| *pred == frame.prev)
            .ok_or(EvaluationFailure::PhiMismatch)?;
        let value = match matching.1 {
            Operand::Immediate(imm) => immediate_to_runtime_value(imm),
            Operand::Register(reg) => RuntimeValue::decode(*ty, frame.slot(reg)),
        };
        self.write_register(*dst, value);
        Ok(())
    }

    /// Pops the current frame, records its return values (per
    /// `return_registers`/`return_types`) into `pending_return`, and
    /// discards the frame's stack-allocated storage.
    fn pop_frame(&mut self) {
        let frame = self.call_stack.pop().expect("pop_frame called with empty call stack");
        self.call_function_refs.pop();
        self.stack.truncate(frame.stack_base as usize);
        let values: Vec<RuntimeValue> = frame
            .return_registers
            .iter()
            .zip(&frame.return_types)
            .map(|(r, ty)| RuntimeValue::decode(*ty, frame.slot(*r)))
            .collect();
        self.pending_return = Some(values);
    }

    fn resolve_operand(&self, operand: Operand, ty: Type) -> RuntimeValue {
        match operand {
            Operand::Immediate(imm) => immediate_to_runtime_value(imm),
            Operand::Register(reg) => {
                let frame = self.call_stack.last().expect("active frame");
                RuntimeValue::decode(ty, frame.slot(reg))
            }
        }
    }

    /// Reads an operand known to hold a pointer-shaped value (`Pointer`,
    /// `BufferPointer`, or a foreign-call address register). Addresses are
    /// always encoded the same way regardless of the pointee's declared
    /// `Type` (`RuntimeValue::encode_into`'s `Address` arm), so this reads
    /// the tag/offset directly rather than going through
    /// `RuntimeValue::decode` with a guessed `Type`.
    fn resolve_address(&self, operand: Operand) -> Option<Address> {
        match operand {
            Operand::Immediate(_) => None,
            Operand::Register(reg) => {
                let frame = self.call_stack.last().expect("active frame");
                Some(decode_address(frame.slot(reg)))
            }
        }
    }

    /// Resolves an operand expected to hold a non-null address, failing
    /// with `NullLoad` if it is the null-pointer sentinel
    /// (`Region::Heap` offset `0`, the encoding `RuntimeValue::decode`
    /// produces for `NullPtr` and `Instruction::Immediate::NullPtr`).
    /// Used everywhere a load/store would otherwise silently dereference a
    /// null pointer (`spec.md` §4.5's `EvaluationFailure::NullLoad`);
    /// `PtrEq` deliberately uses `resolve_address` directly since comparing
    /// two null pointers for equality is not a dereference.
    fn deref_address(&self, operand: Operand) -> Result<Address, EvaluationFailure> {
        let addr = self.resolve_address(operand).ok_or(EvaluationFailure::NullLoad)?;
        if addr.region == Region::Heap && addr.offset == 0 {
            return Err(EvaluationFailure::NullLoad);
        }
        Ok(addr)
    }

    /// Reads an operand known to hold a `FunctionRef` (a `Call`'s `Dynamic`
    /// callee register). `FunctionRef`s are encoded as a raw `u32`
    /// (`RuntimeValue::encode_into`'s `FunctionRef` arm).
    fn resolve_function_ref(&self, reg: Register) -> FunctionRef {
        let frame = self.call_stack.last().expect("active frame");
        let bytes = frame.slot(reg);
        FunctionRef::from_u32(u32::from_le_bytes(bytes[..4].try_into().unwrap()))
    }

    /// Translates a pointer-shaped `RuntimeValue` from a region-relative
    /// offset to the real address of that byte in the owning buffer, so a
    /// foreign call receives a dereferenceable host pointer rather than an
    /// index (`spec.md` §4.5's "marshals them into the host ABI"). Non-
    /// pointer values pass through unchanged.
    fn to_raw_pointer_arg(&self, value: RuntimeValue) -> RuntimeValue {
        match value {
            RuntimeValue::Address(addr) => {
                let (base, offset) = self.region_slice(addr);
                let ptr = unsafe { base.as_ptr().add(offset) };
                RuntimeValue::Address(Address::heap(ptr as u64))
            }
            other => other,
        }
    }

    fn region_slice(&self, addr: Address) -> (&[u8], usize) {
        let frame = self.call_stack.last().expect("active frame");
        match addr.region {
            Region::Stack => (&self.stack, (frame.stack_base + addr.offset) as usize),
            Region::Heap => (&self.stack, addr.offset as usize),
            Region::ReadOnly => (&self.read_only, addr.offset as usize),
        }
    }

    fn write_region(&mut self, addr: Address, bytes_in: &[u8]) {
        let frame_stack_base = self.call_stack.last().expect("active frame").stack_base;
        let (base, offset) = match addr.region {
            Region::Stack => (&mut self.stack, (frame_stack_base + addr.offset) as usize),
            Region::Heap => (&mut self.stack, addr.offset as usize),
            Region::ReadOnly => panic!("cannot write into the read-only region"),
        };
        base[offset..offset + bytes_in.len()].copy_from_slice(bytes_in);
    }

    fn write_register(&mut self, reg: Register, value: RuntimeValue) {
        let frame = self.call_stack.last_mut().expect("active frame");
        let offset = frame.reg_offset(reg);
        // Register slots are a flat minimum of 16 bytes so both 8-byte
        // scalars and tagged `Address`es (region tag + offset) fit; "big"
        // (`is_big`) values live in memory and are only ever carried
        // between registers as an `Address`, so this is always enough.
        let end = (offset + 16).min(frame.registers.len());
        value.encode_into(&mut frame.registers[offset..end]);
    }

    fn exec(
        &mut self,
        inst: &Instruction,
        functions: &mut FunctionTable,
        registry: &mut TypeRegistry,
    ) -> Result<(), EvaluationFailure> {
        match inst {
            Instruction::Arith { op, kind, lhs, rhs, dst } => {
                let ty = Type::from_primitive(*kind);
                let lhs = self.resolve_operand(*lhs, ty);
                let rhs = self.resolve_operand(*rhs, ty);
                let result = match op {
                    ArithOp::Add => lhs.add(rhs),
                    ArithOp::Sub => lhs.sub(rhs),
                    ArithOp::Mul => lhs.mul(rhs),
                    ArithOp::Div => lhs.div(rhs),
                    ArithOp::Mod => lhs.rem(rhs),
                }
                .ok_or(EvaluationFailure::DivideByZero)?;
                self.write_register(*dst, result);
            }
            Instruction::Cmp { op, kind, lhs, rhs, dst } => {
                let ty = Type::from_primitive(*kind);
                let lhs = self.resolve_operand(*lhs, ty);
                let rhs = self.resolve_operand(*rhs, ty);
                let ordering = lhs.partial_cmp(rhs);
                let result = match op {
                    CmpOp::Eq => ordering == Some(std::cmp::Ordering::Equal),
                    CmpOp::Ne => ordering != Some(std::cmp::Ordering::Equal),
                    CmpOp::Lt => ordering == Some(std::cmp::Ordering::Less),
                    CmpOp::Le => matches!(
                        ordering,
                        Some(std::cmp::Ordering::Less) | Some(std::cmp::Ordering::Equal)
                    ),
                };
                self.write_register(*dst, RuntimeValue::Bool(result));
            }
            Instruction::PtrEq { ne, lhs, rhs, dst } => {
                let lhs = self.resolve_address(*lhs);
                let rhs = self.resolve_address(*rhs);
                self.write_register(*dst, RuntimeValue::Bool((lhs == rhs) != *ne));
            }
            Instruction::Logical { op, lhs, rhs, dst } => {
                let bool_ty = Type::from_primitive(Primitive::Bool);
                let a = self.resolve_operand(*lhs, bool_ty).as_bool().unwrap_or(false);
                let b = rhs
                    .map(|r| self.resolve_operand(r, bool_ty).as_bool().unwrap_or(false))
                    .unwrap_or(false);
                let result = match op {
                    LogicalOp::Not => !a,
                    LogicalOp::And => a && b,
                    LogicalOp::Or => a || b,
                    LogicalOp::Xor => a ^ b,
                };
                self.write_register(*dst, RuntimeValue::Bool(result));
            }
            Instruction::Cast { from, to, src, dst } => {
                let value = self.resolve_operand(*src, *from);
                self.write_register(*dst, cast_runtime_value(value, *to));
            }
            Instruction::StackAllocate { dst, .. } => {
                let frame = self.call_stack.last().expect("active frame");
                let offset = *frame
                    .stack_slot_offsets
                    .get(dst)
                    .expect("StackAllocate destination must be a recorded allocation");
                self.write_register(*dst, RuntimeValue::Address(Address::stack(offset as u64)));
            }
            Instruction::Load { addr, ty, dst } => {
                let addr = self.deref_address(*addr)?;
                let size = type_byte_size(registry, *ty) as usize;
                let (base, offset) = self.region_slice(addr);
                if offset + size > base.len() {
                    return Err(EvaluationFailure::OutOfBounds { offset, size });
                }
                let value = RuntimeValue::decode(*ty, &base[offset..offset + size]);
                self.write_register(*dst, value);
            }
            Instruction::Store { ty, value, addr } => {
                let value = self.resolve_operand(*value, *ty);
                let addr = self.deref_address(*addr)?;
                let size = type_byte_size(registry, *ty) as usize;
                let mut bytes = vec![0u8; size.max(1)];
                value.encode_into(&mut bytes);
                self.write_region(addr, &bytes[..size]);
            }
            Instruction::PtrIncr { base, index, pointee_ty, dst } => {
                let base_addr = self.deref_address(*base)?;
                let index_val =
                    self.resolve_operand(*index, Type::from_primitive(Primitive::I64)).as_i64_like();
                let stride = type_byte_size(registry, *pointee_ty) as i64;
                self.write_register(*dst, RuntimeValue::Address(base_addr.offset_by(index_val * stride)));
            }
            Instruction::StructIndex { base, field_index, struct_ty, dst } => {
                let base_addr = self.deref_address(*base)?;
                let field_offset = struct_field_offset(registry, *struct_ty, *field_index);
                self.write_register(*dst, RuntimeValue::Address(base_addr.offset_by(field_offset as i64)));
            }
            Instruction::Call { callee, args, arg_types, out } => {
                self.exec_call(callee, args, arg_types, out, functions, registry)?
            }
            Instruction::Phi { .. } => unreachable!("Phi is consumed at block entry"),
            Instruction::PtrOf { pointee, dst } => {
                let ty = self
                    .resolve_operand(*pointee, Type::from_primitive(Primitive::Type_))
                    .as_type()
                    .expect("PtrOf operand must be a Type");
                self.write_register(*dst, RuntimeValue::Type(registry.intern_pointer(ty)));
            }
            Instruction::BufPtrOf { pointee, dst } => {
                let ty = self
                    .resolve_operand(*pointee, Type::from_primitive(Primitive::Type_))
                    .as_type()
                    .expect("BufPtrOf operand must be a Type");
                self.write_register(*dst, RuntimeValue::Type(registry.intern_buffer_pointer(ty)));
            }
            Instruction::SliceOf { element, dst } => {
                let ty = self
                    .resolve_operand(*element, Type::from_primitive(Primitive::Type_))
                    .as_type()
                    .expect("SliceOf operand must be a Type");
                self.write_register(*dst, RuntimeValue::Type(registry.intern_slice(ty)));
            }
            Instruction::ArrayOf { length, element, dst } => {
                let length =
                    self.resolve_operand(*length, Type::from_primitive(Primitive::I64)).as_i64_like() as u64;
                let ty = self
                    .resolve_operand(*element, Type::from_primitive(Primitive::Type_))
                    .as_type()
                    .expect("ArrayOf operand must be a Type");
                self.write_register(*dst, RuntimeValue::Type(registry.intern_array(length, ty)));
            }
            Instruction::FunctionOf { params_packed, returns_packed, evaluation, dst } => {
                let param_ty = self
                    .resolve_operand(*params_packed, Type::from_primitive(Primitive::Type_))
                    .as_type()
                    .expect("FunctionOf params_packed must be a Type");
                let returns: Vec<Type> = returns_packed
                    .iter()
                    .map(|op| {
                        self.resolve_operand(*op, Type::from_primitive(Primitive::Type_))
                            .as_type()
                            .expect("FunctionOf returns_packed entry must be a Type")
                    })
                    .collect();
                let params = registry.intern_parameters(vec![crate::types::Parameter { name: None, ty: param_ty }]);
                let result = registry.intern_function(params, returns, *evaluation);
                self.write_register(*dst, RuntimeValue::Type(result));
            }
            Instruction::EnumCreate { module, dst } => {
                self.write_register(*dst, RuntimeValue::Type(registry.create_enum(*module)));
            }
            Instruction::FlagsCreate { module, dst } => {
                self.write_register(*dst, RuntimeValue::Type(registry.create_flags(*module)));
            }
            Instruction::StructCreate { module, dst } => {
                self.write_register(*dst, RuntimeValue::Type(registry.create_struct(*module)));
            }
            Instruction::OpaqueCreate { module, dst } => {
                self.write_register(*dst, RuntimeValue::Type(registry.create_opaque(*module)));
            }
            Instruction::PushType { value, dst } => self.write_register(*dst, RuntimeValue::Type(*value)),
            Instruction::PushFunction { value, dst } => {
                self.write_register(*dst, RuntimeValue::FunctionRef(*value))
            }
            Instruction::PushValue { value, dst } => self.write_register(*dst, immediate_to_runtime_value(*value)),
            Instruction::Rotate { registers } => self.exec_rotate(registers),
            Instruction::ConstructFunctionType { param_or_params, return_ty, dst } => {
                let param_ty = self
                    .resolve_operand(*param_or_params, Type::from_primitive(Primitive::Type_))
                    .as_type()
                    .expect("ConstructFunctionType param_or_params must be a Type");
                let return_ty = self
                    .resolve_operand(*return_ty, Type::from_primitive(Primitive::Type_))
                    .as_type()
                    .expect("ConstructFunctionType return_ty must be a Type");
                let params = registry.intern_parameters(vec![crate::types::Parameter { name: None, ty: param_ty }]);
                let result =
                    registry.intern_function(params, vec![return_ty], crate::types::Evaluation::PreferRuntime);
                self.write_register(*dst, RuntimeValue::Type(result));
            }
            Instruction::ConstructParametersType { entries, dst } => {
                let params: Vec<crate::types::Parameter> = entries
                    .iter()
                    .map(|op| crate::types::Parameter {
                        name: None,
                        ty: self
                            .resolve_operand(*op, Type::from_primitive(Primitive::Type_))
                            .as_type()
                            .expect("ConstructParametersType operand must be a Type"),
                    })
                    .collect();
                let params_id = registry.intern_parameters(params);
                self.write_register(*dst, RuntimeValue::U32(params_id.as_u32()));
            }
            Instruction::TypeKind { ty, dst } => {
                let ty = self
                    .resolve_operand(*ty, Type::from_primitive(Primitive::Type_))
                    .as_type()
                    .expect("TypeKind operand must be a Type");
                self.write_register(*dst, RuntimeValue::U8(ty.kind() as u8));
            }
            Instruction::ConstructOpaqueType { dst } => {
                let module = crate::types::nominal::ModuleId::from_u32(0);
                self.write_register(*dst, RuntimeValue::Type(registry.create_opaque(module)));
            }
            Instruction::Init { ty, addr } => {
                self.run_special_member(*ty, &[*addr], registry, functions, SpecialMember::Init)?
            }
            Instruction::Destroy { ty, addr } => {
                self.run_special_member(*ty, &[*addr], registry, functions, SpecialMember::Destroy)?
            }
            Instruction::CopyAssign { ty, dst_addr, src_addr } => self.run_special_member(
                *ty,
                &[*dst_addr, *src_addr],
                registry,
                functions,
                SpecialMember::CopyAssign,
            )?,
            Instruction::MoveAssign { ty, dst_addr, src_addr } => self.run_special_member(
                *ty,
                &[*dst_addr, *src_addr],
                registry,
                functions,
                SpecialMember::MoveAssign,
            )?,
            Instruction::CopyInit { ty, dst_addr, src_addr } => self.run_special_member(
                *ty,
                &[*dst_addr, *src_addr],
                registry,
                functions,
                SpecialMember::CopyInit,
            )?,
            Instruction::MoveInit { ty, dst_addr, src_addr } => self.run_special_member(
                *ty,
                &[*dst_addr, *src_addr],
                registry,
                functions,
                SpecialMember::MoveInit,
            )?,
            Instruction::DebugIr => log::debug!("DebugIr reached"),
            Instruction::LoadDataSymbol { name, dst } => {
                let addr = self.intern_read_only(name.as_bytes());
                self.write_register(*dst, RuntimeValue::Address(addr));
            }
        }
        Ok(())
    }

    fn exec_rotate(&mut self, registers: &[Register]) {
        if registers.len() < 2 {
            return;
        }
        let frame = self.call_stack.last().expect("active frame");
        let mut slots: Vec<[u8; 16]> = registers
            .iter()
            .map(|r| {
                let mut buf = [0u8; 16];
                let src = frame.slot(*r);
                buf[..src.len()].copy_from_slice(src);
                buf
            })
            .collect();
        let head = slots.remove(0);
        slots.push(head);
        let frame = self.call_stack.last_mut().expect("active frame");
        for (reg, bytes) in registers.iter().zip(slots) {
            let offset = frame.reg_offset(*reg);
            let end = (offset + 16).min(frame.registers.len());
            frame.registers[offset..end].copy_from_slice(&bytes[..end - offset]);
        }
    }

    fn run_special_member(
        &mut self,
        ty: Type,
        addrs: &[Operand],
        registry: &mut TypeRegistry,
        functions: &mut FunctionTable,
        which: SpecialMember,
    ) -> Result<(), EvaluationFailure> {
        let registered = match ty.kind() {
            Kind::Struct => which.select(&registry.struct_data(ty).special_members),
            _ => None,
        };
        let resolved: Vec<Address> =
            addrs.iter().map(|op| self.deref_address(*op)).collect::<Result<Vec<_>, _>>()?;
        if let Some(function_ref) = registered {
            let args = resolved.into_iter().map(RuntimeValue::Address).collect();
            let depth = self.call_stack.len();
            self.push_frame(functions, registry, function_ref, args);
            while self.call_stack.len() > depth {
                self.step(functions, registry)?;
            }
            self.pending_return.take();
            return Ok(());
        }
        self.run_trivial_special_member(registry, ty, &resolved, which);
        Ok(())
    }

    fn run_trivial_special_member(&mut self, registry: &TypeRegistry, ty: Type, addrs: &[Address], which: SpecialMember) {
        match which {
            SpecialMember::Init => {
                let size = type_byte_size(registry, ty) as usize;
                self.write_region(addrs[0], &vec![0u8; size]);
            }
            SpecialMember::Destroy => {}
            SpecialMember::CopyAssign | SpecialMember::MoveAssign | SpecialMember::CopyInit | SpecialMember::MoveInit => {
                let size = type_byte_size(registry, ty) as usize;
                let (src_base, src_off) = self.region_slice(addrs[1]);
                let bytes = src_base[src_off..src_off + size].to_vec();
                self.write_region(addrs[0], &bytes);
            }
        }
    }

    fn exec_call(
        &mut self,
        callee: &Callee,
        args: &[Operand],
        arg_types: &[Type],
        out: &[Register],
        functions: &mut FunctionTable,
        registry: &mut TypeRegistry,
    ) -> Result<(), EvaluationFailure> {
        let arg_values: Vec<RuntimeValue> = args
            .iter()
            .zip(arg_types.iter())
            .map(|(op, ty)| self.resolve_operand(*op, *ty))
            .collect();
        match callee {
            Callee::Static(target) => self.invoke(*target, arg_values, out, functions, registry),
            Callee::Dynamic(reg) => {
                let target = self.resolve_function_ref(*reg);
                self.invoke(target, arg_values, out, functions, registry)
            }
            Callee::Foreign { name_symbol } => {
                let addr = self
                    .resolve_address(Operand::Register(*name_symbol))
                    .expect("Foreign name_symbol register must hold an address");
                let start = addr.offset as usize;
                let end = self
                    .read_only
                    .iter()
                    .skip(start)
                    .position(|&b| b == 0)
                    .map(|p| start + p)
                    .unwrap_or(self.read_only.len());
                let name = String::from_utf8_lossy(&self.read_only[start..end]).into_owned();
                // The output register's declared type disambiguates
                // signatures that share an argument shape but differ in
                // return type, e.g. `(I64) -> I64` vs. `(I64) -> Ptr`
                // (`spec.md` §6); `out.is_empty()` alone cannot.
                let return_ty = match out.first() {
                    Some(&reg) => {
                        let current = *self.call_function_refs.last().expect("active frame");
                        functions[current].register_type(reg)
                    }
                    None => Type::from_primitive(Primitive::Unit),
                };
                let signature = foreign::Signature::classify(&arg_values, return_ty)
                    .ok_or(EvaluationFailure::ForeignSignatureUnsupported)?;
                // Pointer-shaped arguments carry a region-relative offset
                // (`Region::Stack`/`ReadOnly`), not a real host address; a
                // foreign callee needs the actual backing-buffer byte
                // address, so translate before marshaling (spec.md §6
                // "Foreign call signatures").
                let raw_args: Vec<RuntimeValue> =
                    arg_values.iter().map(|v| self.to_raw_pointer_arg(*v)).collect();
                let result = self.foreign.call(&name, signature, &raw_args)?;
                if let Some(&reg) = out.first() {
                    self.write_register(reg, result);
                }
                Ok(())
            }
        }
    }

    fn invoke(
        &mut self,
        target: FunctionRef,
        args: Vec<RuntimeValue>,
        out: &[Register],
        functions: &mut FunctionTable,
        registry: &mut TypeRegistry,
    ) -> Result<(), EvaluationFailure> {
        let depth = self.call_stack.len();
        self.push_frame(functions, registry, target, args);
        while self.call_stack.len() > depth {
            self.step(functions, registry)?;
        }
        let returns = self.pending_return.take().unwrap_or_default();
        for (reg, value) in out.iter().zip(returns) {
            self.write_register(*reg, value);
        }
        Ok(())
    }
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new()
    }
}

/// Which special-member function slot a `SpecialMembers` lookup wants.
#[derive(Clone, Copy)]
enum SpecialMember {
    Init,
    Destroy,
    CopyAssign,
    MoveAssign,
    CopyInit,
    MoveInit,
}

impl SpecialMember {
    fn select(self, members: &crate::types::SpecialMembers) -> Option<FunctionRef> {
        match self {
            SpecialMember::Init => members.init,
            SpecialMember::Destroy => members.destroy,
            SpecialMember::CopyAssign => members.copy_assign,
            SpecialMember::MoveAssign => members.move_assign,
            SpecialMember::CopyInit => members.copy_init,
            SpecialMember::MoveInit => members.move_init,
        }
    }
}

fn immediate_to_runtime_value(imm: Immediate) -> RuntimeValue {
    match imm {
        Immediate::Bool(v) => RuntimeValue::Bool(v),
        Immediate::Char(v) => RuntimeValue::Char(v),
        Immediate::Byte(v) => RuntimeValue::Byte(v),
        Immediate::I8(v) => RuntimeValue::I8(v),
        Immediate::I16(v) => RuntimeValue::I16(v),
        Immediate::I32(v) => RuntimeValue::I32(v),
        Immediate::I64(v) => RuntimeValue::I64(v),
        Immediate::U8(v) => RuntimeValue::U8(v),
        Immediate::U16(v) => RuntimeValue::U16(v),
        Immediate::U32(v) => RuntimeValue::U32(v),
        Immediate::U64(v) => RuntimeValue::U64(v),
        Immediate::F32(v) => RuntimeValue::F32(v),
        Immediate::F64(v) => RuntimeValue::F64(v),
        Immediate::Type(v) => RuntimeValue::Type(v),
        Immediate::FunctionRef(v) => RuntimeValue::FunctionRef(v),
        Immediate::NullPtr => RuntimeValue::Address(Address::heap(0)),
        Immediate::Unit => RuntimeValue::Unit,
    }
}

/// Applies a `Cast<From, To>` whose legality was already decided by
/// `crate::cast` at emission time; this just performs the host-level
/// numeric conversion.
fn cast_runtime_value(value: RuntimeValue, to: Type) -> RuntimeValue {
    let Some(to_prim) = to.as_primitive() else {
        return value;
    };
    let as_f64 = match value {
        RuntimeValue::I8(v) => v as f64,
        RuntimeValue::I16(v) => v as f64,
        RuntimeValue::I32(v) => v as f64,
        RuntimeValue::I64(v) => v as f64,
        RuntimeValue::U8(v) | RuntimeValue::Byte(v) => v as f64,
        RuntimeValue::U16(v) => v as f64,
        RuntimeValue::U32(v) => v as f64,
        RuntimeValue::U64(v) => v as f64,
        RuntimeValue::F32(v) => v as f64,
        RuntimeValue::F64(v) => v,
        RuntimeValue::Bool(v) => v as u8 as f64,
        RuntimeValue::Char(v) => v as u32 as f64,
        other => return other,
    };
    match to_prim {
        Primitive::I8 => RuntimeValue::I8(as_f64 as i8),
        Primitive::I16 => RuntimeValue::I16(as_f64 as i16),
        Primitive::I32 => RuntimeValue::I32(as_f64 as i32),
        Primitive::I64 | Primitive::Integer => RuntimeValue::I64(as_f64 as i64),
        Primitive::U8 => RuntimeValue::U8(as_f64 as u8),
        Primitive::Byte => RuntimeValue::Byte(as_f64 as u8),
        Primitive::U16 => RuntimeValue::U16(as_f64 as u16),
        Primitive::U32 => RuntimeValue::U32(as_f64 as u32),
        Primitive::U64 => RuntimeValue::U64(as_f64 as u64),
        Primitive::F32 => RuntimeValue::F32(as_f64 as f32),
        Primitive::F64 => RuntimeValue::F64(as_f64),
        Primitive::Char => RuntimeValue::Char(char::from_u32(as_f64 as u32).unwrap_or('\u{fffd}')),
        Primitive::Bool => RuntimeValue::Bool(as_f64 != 0.0),
        _ => value,
    }
}

/// Reads the tag/offset pair `RuntimeValue::encode_into`'s `Address` arm
/// writes, independent of any particular `Type`.
fn decode_address(bytes: &[u8]) -> Address {
    let region = match bytes[0] {
        0 => Region::Stack,
        1 => Region::Heap,
        _ => Region::ReadOnly,
    };
    let offset = u64::from_le_bytes(bytes[8..16].try_into().unwrap());
    Address::new(region, offset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Primitive;

    fn i64_ty() -> Type {
        Type::from_primitive(Primitive::I64)
    }

    #[test]
    fn adds_two_constants_and_returns() {
        let mut registry = TypeRegistry::new();
        let fn_ty = Type::from_primitive(Primitive::Unit);
        let mut f = CompiledFunction::new("add_const", fn_ty);
        let dst = f.new_register(i64_ty());
        f.push_instruction(
            f.entry(),
            Instruction::Arith {
                op: ArithOp::Add,
                kind: Primitive::I64,
                lhs: Operand::Immediate(Immediate::I64(2)),
                rhs: Operand::Immediate(Immediate::I64(40)),
                dst,
            },
        );
        f.set_return_registers(vec![dst]);
        f.set_jump(f.entry(), Jump::Return);

        let mut functions = FunctionTable::new();
        let fn_ref = functions.push(f);

        let mut interp = Interpreter::new();
        let result = interp.run(&mut functions, &mut registry, fn_ref, vec![]).unwrap();
        assert_eq!(result, vec![RuntimeValue::I64(42)]);
    }

    #[test]
    fn division_by_zero_fails_evaluation() {
        let mut registry = TypeRegistry::new();
        let fn_ty = Type::from_primitive(Primitive::Unit);
        let mut f = CompiledFunction::new("div_zero", fn_ty);
        let dst = f.new_register(i64_ty());
        f.push_instruction(
            f.entry(),
            Instruction::Arith {
                op: ArithOp::Div,
                kind: Primitive::I64,
                lhs: Operand::Immediate(Immediate::I64(1)),
                rhs: Operand::Immediate(Immediate::I64(0)),
                dst,
            },
        );
        f.set_jump(f.entry(), Jump::Return);
        let mut functions = FunctionTable::new();
        let fn_ref = functions.push(f);

        let mut interp = Interpreter::new();
        let err = interp.run(&mut functions, &mut registry, fn_ref, vec![]).unwrap_err();
        assert_eq!(err, EvaluationFailure::DivideByZero);
    }

    #[test]
    fn instruction_budget_exhausts() {
        let mut registry = TypeRegistry::new();
        let fn_ty = Type::from_primitive(Primitive::Unit);
        let mut f = CompiledFunction::new("spin", fn_ty);
        let dst = f.new_register(i64_ty());
        f.push_instruction(
            f.entry(),
            Instruction::Arith {
                op: ArithOp::Add,
                kind: Primitive::I64,
                lhs: Operand::Immediate(Immediate::I64(1)),
                rhs: Operand::Immediate(Immediate::I64(1)),
                dst,
            },
        );
        f.set_jump(f.entry(), Jump::Return);
        let mut functions = FunctionTable::new();
        let fn_ref = functions.push(f);

        let mut interp = Interpreter::with_instruction_budget(0);
        let err = interp.run(&mut functions, &mut registry, fn_ref, vec![]).unwrap_err();
        assert_eq!(err, EvaluationFailure::InstructionBudgetExceeded);
    }

    #[test]
    fn conditional_jump_picks_correct_branch() {
        let mut registry = TypeRegistry::new();
        let fn_ty = Type::from_primitive(Primitive::Unit);
        let mut f = CompiledFunction::new("branch", fn_ty);
        let cond = f.new_register(Type::from_primitive(Primitive::Bool));
        f.push_instruction(f.entry(), Instruction::PushValue { value: Immediate::Bool(true), dst: cond });
        let if_true = f.push_block();
        let if_false = f.push_block();
        let result = f.new_register(i64_ty());
        f.push_instruction(if_true, Instruction::PushValue { value: Immediate::I64(1), dst: result });
        f.push_instruction(if_false, Instruction::PushValue { value: Immediate::I64(0), dst: result });
        f.set_jump(f.entry(), Jump::Cond { reg: cond, if_true, if_false });
        f.set_jump(if_true, Jump::Return);
        f.set_jump(if_false, Jump::Return);
        f.set_return_registers(vec![result]);

        let mut functions = FunctionTable::new();
        let fn_ref = functions.push(f);
        let mut interp = Interpreter::new();
        let result = interp.run(&mut functions, &mut registry, fn_ref, vec![]).unwrap();
        assert_eq!(result, vec![RuntimeValue::I64(1)]);
    }

    #[test]
    fn nested_call_returns_value_to_caller() {
        let mut registry = TypeRegistry::new();
        let fn_ty = Type::from_primitive(Primitive::Unit);

        let mut callee = CompiledFunction::new("callee", fn_ty);
        let callee_dst = callee.new_register(i64_ty());
        callee.push_instruction(
            callee.entry(),
            Instruction::Arith {
                op: ArithOp::Mul,
                kind: Primitive::I64,
                lhs: Operand::Immediate(Immediate::I64(6)),
                rhs: Operand::Immediate(Immediate::I64(7)),
                dst: callee_dst,
            },
        );
        callee.set_return_registers(vec![callee_dst]);
        callee.set_jump(callee.entry(), Jump::Return);

        let mut functions = FunctionTable::new();
        let callee_ref = functions.push(callee);

        let mut caller = CompiledFunction::new("caller", fn_ty);
        let caller_dst = caller.new_register(i64_ty());
        caller.push_instruction(
            caller.entry(),
            Instruction::Call {
                callee: Callee::Static(callee_ref),
                args: vec![],
                arg_types: vec![],
                out: vec![caller_dst],
            },
        );
        caller.set_return_registers(vec![caller_dst]);
        caller.set_jump(caller.entry(), Jump::Return);
        let caller_ref = functions.push(caller);

        let mut interp = Interpreter::new();
        let result = interp.run(&mut functions, &mut registry, caller_ref, vec![]).unwrap();
        assert_eq!(result, vec![RuntimeValue::I64(42)]);
    }

    /// `spec.md` §8 property 6: two runs of the interpreter on the same
    /// function and arguments, with no foreign calls, produce identical
    /// return values.
    #[test]
    fn two_runs_of_the_same_function_agree() {
        let mut registry = TypeRegistry::new();
        let fn_ty = Type::from_primitive(Primitive::Unit);
        let mut f = CompiledFunction::new("mix", fn_ty);
        let a = f.new_register(i64_ty());
        let b = f.new_register(i64_ty());
        f.push_instruction(
            f.entry(),
            Instruction::Arith {
                op: ArithOp::Mul,
                kind: Primitive::I64,
                lhs: Operand::Immediate(Immediate::I64(17)),
                rhs: Operand::Immediate(Immediate::I64(3)),
                dst: a,
            },
        );
        f.push_instruction(
            f.entry(),
            Instruction::Arith {
                op: ArithOp::Sub,
                kind: Primitive::I64,
                lhs: Operand::Register(a),
                rhs: Operand::Immediate(Immediate::I64(1)),
                dst: b,
            },
        );
        f.set_return_registers(vec![b]);
        f.set_jump(f.entry(), Jump::Return);

        let mut functions = FunctionTable::new();
        let fn_ref = functions.push(f);

        let first = Interpreter::new().run(&mut functions, &mut registry, fn_ref, vec![]).unwrap();
        let second = Interpreter::new().run(&mut functions, &mut registry, fn_ref, vec![]).unwrap();
        assert_eq!(first, second);
        assert_eq!(first, vec![RuntimeValue::I64(50)]);
    }

    /// `spec.md` §8's "Foreign call" scenario: register `strlen` as
    /// `(Ptr) -> I64`, call it on a read-only `"hello\0"` buffer, expect 5.
    /// Exercises the real host dynamic linker (`libloading::Library::this`
    /// resolves libc's own `strlen`, already linked into the test binary),
    /// not a stub.
    #[test]
    fn foreign_call_runs_libc_strlen() {
        let mut registry = TypeRegistry::new();
        let byte_ptr_ty = registry.intern_pointer(Type::from_primitive(Primitive::Byte));
        let fn_ty = Type::from_primitive(Primitive::Unit);
        let mut f = CompiledFunction::new("call_strlen", fn_ty);

        let name_reg = f.new_register(byte_ptr_ty);
        let arg_reg = f.new_register(byte_ptr_ty);
        let out_reg = f.new_register(i64_ty());

        f.push_instruction(f.entry(), Instruction::LoadDataSymbol { name: "strlen\0".to_string(), dst: name_reg });
        f.push_instruction(f.entry(), Instruction::LoadDataSymbol { name: "hello\0".to_string(), dst: arg_reg });
        f.push_instruction(
            f.entry(),
            Instruction::Call {
                callee: Callee::Foreign { name_symbol: name_reg },
                args: vec![Operand::Register(arg_reg)],
                arg_types: vec![byte_ptr_ty],
                out: vec![out_reg],
            },
        );
        f.set_return_registers(vec![out_reg]);
        f.set_jump(f.entry(), Jump::Return);

        let mut functions = FunctionTable::new();
        let fn_ref = functions.push(f);

        let mut interp = Interpreter::new();
        let result = interp.run(&mut functions, &mut registry, fn_ref, vec![]).unwrap();
        assert_eq!(result, vec![RuntimeValue::I64(5)]);
    }
}
