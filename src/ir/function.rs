//! Basic blocks and [`CompiledFunction`]s (`spec.md` §3, §4.3).

use std::collections::BTreeSet;

use crate::ir::entities::{BlockId, Register};
pub use crate::ir::entities::{DependentBodyId, FunctionRef};
use crate::ir::instructions::{Instruction, Jump};
use crate::layout::{align_up, type_alignment, type_byte_size};
use crate::types::{Type, TypeRegistry};

/// One basic block: a straight-line run of instructions ending in exactly
/// one jump (CFG invariant 1, `spec.md` §4.3), plus the set of blocks known
/// to jump into it (CFG invariant 2).
#[derive(Debug, Clone)]
pub struct BasicBlock {
    instructions: Vec<Instruction>,
    jump: Jump,
    incoming: BTreeSet<BlockId>,
}

impl BasicBlock {
    fn new() -> Self {
        Self { instructions: Vec::new(), jump: Jump::Return, incoming: BTreeSet::new() }
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    pub fn jump(&self) -> &Jump {
        &self.jump
    }

    pub fn incoming(&self) -> impl Iterator<Item = BlockId> + '_ {
        self.incoming.iter().copied()
    }

    /// Appends `inst`, refusing anything after a terminator has already
    /// been set to something other than the default placeholder `Return`
    /// would be wrong to enforce here (the default exists only until the
    /// caller calls `set_jump`), so push is unconditional; `set_jump` is
    /// the single place that finalizes a block's terminator.
    pub fn push(&mut self, inst: Instruction) {
        self.instructions.push(inst);
    }
}

/// A deferred completion closure attached to a `CompiledFunction`, used for
/// generic-function specialization (`spec.md` §3's "work item", §5's
/// "Suspension / blocking points"). The interpreter runs this the first
/// time the function is called, then clears it
/// (`EvaluationFailure::WorkItemUnresolved` if it is still present when a
/// finalized function's blocks are needed but the work item was never
/// invoked).
pub type WorkItem = Box<dyn FnOnce(&mut CompiledFunction) + Send>;

/// A per-function control-flow graph of basic blocks, typed instructions
/// over virtual registers, and stack-allocated slots (`spec.md` §3).
pub struct CompiledFunction {
    name: String,
    function_type: Type,
    blocks: Vec<BasicBlock>,
    register_types: Vec<Type>,
    /// Alloca-register -> allocated `Type`, per `spec.md` §3's
    /// `CompiledFunction` field list.
    allocations: hashbrown::HashMap<Register, Type>,
    register_offsets: Option<Vec<u32>>,
    stack_slot_offsets: Option<hashbrown::HashMap<Register, u32>>,
    frame_register_bytes: u32,
    frame_stack_bytes: u32,
    work_item: Option<WorkItem>,
    /// Registers the interpreter reads once this function's entry block
    /// reaches `Return`, in the order `EvalBridge`/a caller's `Call::out`
    /// expects its return values. Set once by the emitter right after the
    /// function's body is built (`spec.md` §4.6's "collecting its return
    /// values" step).
    return_registers: Vec<Register>,
}

impl CompiledFunction {
    /// Creates a function with a single entry block (index 0) and no
    /// instructions yet.
    pub fn new(name: impl Into<String>, function_type: Type) -> Self {
        Self {
            name: name.into(),
            function_type,
            blocks: vec![BasicBlock::new()],
            register_types: Vec::new(),
            allocations: hashbrown::HashMap::new(),
            register_offsets: None,
            stack_slot_offsets: None,
            frame_register_bytes: 0,
            frame_stack_bytes: 0,
            work_item: None,
            return_registers: Vec::new(),
        }
    }

    pub fn set_return_registers(&mut self, registers: Vec<Register>) {
        self.return_registers = registers;
    }

    pub fn return_registers(&self) -> &[Register] {
        &self.return_registers
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn function_type(&self) -> Type {
        self.function_type
    }

    /// Overwrites the function's declared type, set once the emitter has
    /// finished resolving parameter/return types (the type is not known
    /// until the body has been emitted, since an omitted return type is
    /// inferred from it).
    pub fn set_function_type(&mut self, ty: Type) {
        self.function_type = ty;
    }

    pub fn entry(&self) -> BlockId {
        BlockId::ENTRY
    }

    /// Allocates a fresh virtual register of type `ty`. Registers are
    /// allocated monotonically, so `Register` can double as a dense index
    /// into `register_types`.
    pub fn new_register(&mut self, ty: Type) -> Register {
        let reg = Register::new(self.register_types.len());
        self.register_types.push(ty);
        reg
    }

    pub fn register_type(&self, reg: Register) -> Type {
        self.register_types[reg.index()]
    }

    /// Allocates a fresh basic block, not yet reachable from anything.
    pub fn push_block(&mut self) -> BlockId {
        let id = BlockId::new(self.blocks.len());
        self.blocks.push(BasicBlock::new());
        id
    }

    pub fn block(&self, id: BlockId) -> &BasicBlock {
        &self.blocks[id.index()]
    }

    pub fn block_mut(&mut self, id: BlockId) -> &mut BasicBlock {
        &mut self.blocks[id.index()]
    }

    pub fn blocks(&self) -> impl Iterator<Item = (BlockId, &BasicBlock)> {
        self.blocks.iter().enumerate().map(|(i, b)| (BlockId::new(i), b))
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    pub fn push_instruction(&mut self, block: BlockId, inst: Instruction) {
        self.blocks[block.index()].push(inst);
    }

    /// Records that `reg` names a stack-allocated slot of type `ty`
    /// (emitted by a `StackAllocate` instruction).
    pub fn record_allocation(&mut self, reg: Register, ty: Type) {
        self.allocations.insert(reg, ty);
    }

    pub fn allocation_type(&self, reg: Register) -> Option<Type> {
        self.allocations.get(&reg).copied()
    }

    /// Every stack-allocated register and its type, for `crate::module`'s
    /// image serializer (which otherwise has no way to reach the private
    /// `allocations` table).
    pub fn allocations(&self) -> impl Iterator<Item = (Register, Type)> + '_ {
        self.allocations.iter().map(|(&r, &t)| (r, t))
    }

    /// Sets `block`'s terminating jump, atomically repairing every
    /// affected block's `incoming` set (CFG invariant 2, `spec.md` §4.3).
    /// The old targets lose `block` from their `incoming`; the new targets
    /// gain it.
    pub fn set_jump(&mut self, block: BlockId, jump: Jump) {
        let old_targets = self.blocks[block.index()].jump.targets();
        for target in old_targets {
            self.blocks[target.index()].incoming.remove(&block);
        }
        let new_targets = jump.targets();
        self.blocks[block.index()].jump = jump;
        for target in new_targets {
            self.blocks[target.index()].incoming.insert(block);
        }
    }

    pub fn set_work_item(&mut self, item: WorkItem) {
        self.work_item = Some(item);
    }

    pub fn take_work_item(&mut self) -> Option<WorkItem> {
        self.work_item.take()
    }

    pub fn has_work_item(&self) -> bool {
        self.work_item.is_some()
    }

    /// Computes `register_offsets` (byte offset in the per-frame register
    /// buffer for every register, based on its type's size/alignment) and
    /// walks the allocations table to place stack-allocated slots at
    /// aligned offsets, per `spec.md` §4.3's "Function finalization".
    ///
    /// Idempotent: calling this again recomputes from scratch, which is
    /// useful after a work item has populated the function's body.
    pub fn finalize(&mut self, registry: &TypeRegistry) {
        let mut offsets = Vec::with_capacity(self.register_types.len());
        let mut cursor: u32 = 0;
        for &ty in &self.register_types {
            let (size, align) = slot_layout(registry, ty);
            cursor = align_up(cursor, align);
            offsets.push(cursor);
            cursor += size;
        }
        self.frame_register_bytes = cursor;
        self.register_offsets = Some(offsets);

        let mut stack_cursor: u32 = 0;
        let mut stack_offsets = hashbrown::HashMap::new();
        // Deterministic order: by register index, matching allocation
        // order, so finalize is reproducible across runs (testable
        // property 6, `spec.md` §8).
        let mut allocas: Vec<(Register, Type)> =
            self.allocations.iter().map(|(&r, &t)| (r, t)).collect();
        allocas.sort_by_key(|(r, _)| r.as_u32());
        for (reg, ty) in allocas {
            let align = type_alignment(registry, ty);
            stack_cursor = align_up(stack_cursor, align);
            stack_offsets.insert(reg, stack_cursor);
            stack_cursor += type_byte_size(registry, ty);
        }
        self.frame_stack_bytes = stack_cursor;
        self.stack_slot_offsets = Some(stack_offsets);
    }

    pub fn register_offset(&self, reg: Register) -> u32 {
        self.register_offsets
            .as_ref()
            .expect("function not finalized")[reg.index()]
    }

    pub fn register_offsets(&self) -> &[u32] {
        self.register_offsets.as_ref().expect("function not finalized")
    }

    pub fn stack_slot_offset(&self, reg: Register) -> u32 {
        *self
            .stack_slot_offsets
            .as_ref()
            .expect("function not finalized")
            .get(&reg)
            .expect("register is not a stack allocation")
    }

    pub fn stack_slot_offsets(&self) -> &hashbrown::HashMap<Register, u32> {
        self.stack_slot_offsets.as_ref().expect("function not finalized")
    }

    pub fn frame_register_bytes(&self) -> u32 {
        self.frame_register_bytes
    }

    pub fn frame_stack_bytes(&self) -> u32 {
        self.frame_stack_bytes
    }

    pub fn is_finalized(&self) -> bool {
        self.register_offsets.is_some()
    }
}

/// Register-slot footprint for `ty`: big types (per
/// `TypeRegistry::is_big`) occupy `jasmin_size` register-slots' worth of
/// bytes back to back; everything else occupies exactly one 16-byte slot,
/// matching the interpreter's fixed register-slot width (`spec.md` §3
/// invariant 2). 16 bytes, not 8: a tagged `Address` (`Interpreter::slot`,
/// `RuntimeValue::encode_into`/`decode`) writes a 1-byte region tag at
/// offset 0 and an 8-byte offset at bytes `8..16`, so any non-big type —
/// not just "big" ones — needs the full 16 bytes to avoid a pointer-typed
/// register spilling into its neighbor.
fn slot_layout(registry: &TypeRegistry, ty: Type) -> (u32, u32) {
    const SLOT_BYTES: u32 = 16;
    if registry.is_big(ty) {
        (registry.jasmin_size(ty) * SLOT_BYTES, SLOT_BYTES)
    } else {
        (SLOT_BYTES, SLOT_BYTES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Primitive;

    #[test]
    fn set_jump_keeps_incoming_consistent() {
        let i64_ty = Type::from_primitive(Primitive::I64);
        let fn_ty = Type::from_primitive(Primitive::Unit); // placeholder function type for the test
        let mut f = CompiledFunction::new("test", fn_ty);
        let b1 = f.push_block();
        let b2 = f.push_block();
        let cond = f.new_register(Type::from_primitive(Primitive::Bool));
        let _ = i64_ty;

        f.set_jump(f.entry(), Jump::Cond { reg: cond, if_true: b1, if_false: b2 });
        assert!(f.block(b1).incoming().eq([f.entry()]));
        assert!(f.block(b2).incoming().eq([f.entry()]));

        // Redirect the entry block to jump only to b1; b2 must lose its
        // incoming edge.
        f.set_jump(f.entry(), Jump::Uncond(b1));
        assert!(f.block(b1).incoming().eq([f.entry()]));
        assert_eq!(f.block(b2).incoming().count(), 0);
    }
}
