//! CFG consistency checking, grounded on
//! `cranelift-codegen::flowgraph::ControlFlowGraph` — there, a
//! `SecondaryMap<Block, CFGNode>` recomputed from a finished function;
//! here, a pure validator over [`CompiledFunction`]'s own `incoming` sets
//! (`spec.md` §4.3's CFG invariants, §8's testable property 4).

use crate::ir::function::CompiledFunction;

/// Walks every block in `func` and confirms CFG invariant 2: for every
/// outgoing edge `A -> B`, `A` is in `B.incoming`, and vice versa. Returns
/// the first inconsistency found, if any.
pub fn check_consistency(func: &CompiledFunction) -> Result<(), CfgInconsistency> {
    for (block_id, block) in func.blocks() {
        for target in block.jump().targets() {
            let target_block = func.block(target);
            if !target_block.incoming().any(|p| p == block_id) {
                return Err(CfgInconsistency::MissingIncoming { from: block_id, to: target });
            }
        }
        for predecessor in block.incoming() {
            let predecessor_block = func.block(predecessor);
            if !predecessor_block.jump().targets().contains(&block_id) {
                return Err(CfgInconsistency::StalePredecessor { block: block_id, claimed_predecessor: predecessor });
            }
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CfgInconsistency {
    MissingIncoming { from: crate::ir::entities::BlockId, to: crate::ir::entities::BlockId },
    StalePredecessor { block: crate::ir::entities::BlockId, claimed_predecessor: crate::ir::entities::BlockId },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::instructions::Jump;
    use crate::types::{Primitive, Type};

    #[test]
    fn diamond_cfg_is_consistent() {
        let fn_ty = Type::from_primitive(Primitive::Unit);
        let mut f = CompiledFunction::new("diamond", fn_ty);
        let cond = f.new_register(Type::from_primitive(Primitive::Bool));
        let b1 = f.push_block();
        let b2 = f.push_block();
        let landing = f.push_block();
        f.set_jump(f.entry(), Jump::Cond { reg: cond, if_true: b1, if_false: b2 });
        f.set_jump(b1, Jump::Uncond(landing));
        f.set_jump(b2, Jump::Uncond(landing));
        f.set_jump(landing, Jump::Return);
        assert_eq!(check_consistency(&f), Ok(()));
    }
}
