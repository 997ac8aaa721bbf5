//! Per-function entity references, grounded on `cranelift-codegen`'s
//! `src/ir/entities.rs` (its `Block`/`Value`/`Inst` newtype-over-`u32`
//! pattern applied to Icarus's register/block/function spaces instead of
//! cranelift's SSA values/instructions).

use crate::entity::{entity_impl, EntityRef};

/// A per-function virtual register. Denotes a function argument slot, an
/// output slot, or a value produced by an instruction in some block
/// (`spec.md` §3). SSA within a block only — a register defined in block A
/// and used in block B requires a `Phi` at B's entry unless A is B's unique
/// predecessor.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Register(u32);
entity_impl!(Register, "r");

/// A basic block within one [`crate::ir::function::CompiledFunction`].
/// Index 0 is always the entry block.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(u32);
entity_impl!(BlockId, "block");

impl BlockId {
    pub const ENTRY: BlockId = BlockId(0);
}

/// A reference to a compiled function, global across a [`crate::module::Module`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FunctionRef(u32);
entity_impl!(FunctionRef, "fn");

/// Identifies a generic function's dependent-term body, owned by the
/// emitter (`spec.md` §3's `GenericFunction(evaluation, body-id)`).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DependentBodyId(u32);
entity_impl!(DependentBodyId, "body");
