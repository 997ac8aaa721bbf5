//! A minimal typed expression tree standing in for the parse-tree
//! external collaborator (`spec.md` §6's "parse tree contract": an ordered
//! sequence of nodes carrying a discriminator, a source range, and a
//! subtree size). A real lexer/parser is explicitly out of scope (`spec.md`
//! §1's Non-goals); this module satisfies the stated *interface* the
//! Emitter consumes — a traversable tree of typed nodes — without
//! implementing `ShiftState`-style precedence climbing or token streams.
//!
//! Grounded on `cranelift-frontend`'s separation between "the thing being
//! built" (`Function`) and "the thing driving the build" (whatever calls
//! `FunctionBuilder`): here, `Expr` is that driver-side input, analogous to
//! a `wasmparser` operator stream feeding `cranelift_wasm`'s translator.

use crate::types::{Evaluation, Primitive, Type};

/// A type expression as it would appear in source, before the emitter
/// resolves it against a [`crate::types::TypeRegistry`]. `Concrete` lets a
/// caller (tests, or a future real parser) hand in an already-interned
/// `Type` directly — useful for nominal types that only exist at runtime
/// (a `Struct` created by an earlier compile-time evaluation).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeExpr {
    Primitive(Primitive),
    Pointer(Box<TypeExpr>),
    BufferPointer(Box<TypeExpr>),
    Slice(Box<TypeExpr>),
    Array(u64, Box<TypeExpr>),
    Concrete(Type),
    /// A reference to a generic function's own type parameter, resolved by
    /// substitution during `EvalBridge` instantiation rather than against a
    /// `TypeRegistry` directly.
    Param(String),
}

/// A literal value. Float literals store their bit pattern rather than an
/// `f64` so `Expr` can derive `Eq`/`Hash` (needed for the emitter's
/// constant cache), the same trick cranelift's `Ieee32`/`Ieee64` immediate
/// wrappers use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Literal {
    Bool(bool),
    Integer(i64),
    FloatBits(u64),
    Char(char),
    Unit,
}

impl Literal {
    pub fn float(value: f64) -> Literal {
        Literal::FloatBits(value.to_bits())
    }

    pub fn as_f64(self) -> Option<f64> {
        match self {
            Literal::FloatBits(bits) => Some(f64::from_bits(bits)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

/// One parameter of a [`Expr::FunctionLiteral`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Param {
    pub name: String,
    pub ty: TypeExpr,
}

/// A type-constructor applied to operands that themselves evaluate to
/// `Type` values (`spec.md` §4.6's compile-time evaluation pipeline running
/// over `PtrOf`/`BufPtrOf`/`SliceOf`/`ArrayOf`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeCtorOp {
    PtrOf,
    BufPtrOf,
    SliceOf,
    /// `ArrayOf`'s first operand is the length (an `I64`-typed `Expr`), the
    /// second the element type.
    ArrayOf,
}

/// An expression node. Every variant is something the Emitter's
/// `EmitToBuffer`/`EmitRef`/`EmitMove` triad (`spec.md` §4.4) knows how to
/// translate into IR.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Expr {
    Literal(Literal),
    /// An already-interned `Type` used as a first-class compile-time value,
    /// pushed as a `Type`-typed immediate rather than resolved against a
    /// `TypeExpr`.
    TypeValue(Type),
    /// A type constructor run as ordinary IR (`PtrOf`/`BufPtrOf`/`SliceOf`/
    /// `ArrayOf`) over `Type`-valued operands, the mechanism `EvalBridge`
    /// drives to turn a dependent term into a concrete `Function` type.
    TypeCtor(TypeCtorOp, Vec<Expr>),
    /// A name: either a function parameter/`let` binding, or (if no local
    /// binding matches) a call target resolved against the enclosing
    /// `Module`'s function table.
    Identifier(String),
    Unary { op: UnaryOp, operand: Box<Expr> },
    Binary { op: BinaryOp, lhs: Box<Expr>, rhs: Box<Expr> },
    Cast { expr: Box<Expr>, ty: TypeExpr },
    /// `base.field` — `spec.md` §4.4's "Member access": `StructIndex` for
    /// structs, pair-projection for slices (`.data`/`.length`).
    Member { base: Box<Expr>, field: String },
    Call { callee: String, args: Vec<Expr> },
    If { cond: Box<Expr>, then_branch: Box<Expr>, else_branch: Box<Expr> },
    /// A multi-arm conditional: `scrutinee` is compared for equality
    /// against each arm's pattern value in order; the first match's body
    /// is taken, else `default`. Generalizes `If` (`spec.md` §4.4's
    /// "Switch / conditional expressions": "each arm emits into its own
    /// block; a Phi in the landing block merges values").
    Switch { scrutinee: Box<Expr>, arms: Vec<(Literal, Expr)>, default: Box<Expr> },
    Block(Vec<Stmt>, Box<Expr>),
    FunctionLiteral { params: Vec<Param>, return_ty: Option<TypeExpr>, evaluation: Evaluation, body: Box<Expr> },
}

/// A statement inside a [`Expr::Block`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Stmt {
    /// `let name[: ty] = init`. Per `spec.md` §4.4, a `let` allocates a
    /// stack slot and emits `Init`/`CopyInit` into it.
    Let { name: String, ty: Option<TypeExpr>, init: Expr },
    /// `target = value`. Per `spec.md` §4.4's "Assignment": length-one
    /// assignment emits directly; the two-phase temp/move-assign path for
    /// multi-target assignment is `Emitter::emit_assign_many`.
    Assign { target: Expr, value: Expr },
    Expr(Expr),
}
