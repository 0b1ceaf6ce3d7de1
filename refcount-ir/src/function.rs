use crate::block::{BasicBlock, BlockId};
use crate::error::IrError;
use crate::instruction::Instruction;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Where a function was defined, for the human-readable dump's
/// `<initial-name>@<location>` form (spec §6 "Outputs").
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLocation {
    pub file: String,
    pub line: u32,
}

/// A read-only CFG with typed SSA instructions, as spec §6 describes the
/// analyzer's required input. Constructing one is the front-end's job
/// (out of scope); this type exists so `refcount-core` has a concrete input
/// to run against and so tests can build small fixtures by hand.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Function {
    pub name: String,
    pub param_count: u32,
    pub entry: BlockId,
    pub blocks: Vec<BasicBlock>,
    pub location: Option<SourceLocation>,
}

impl Function {
    pub fn block(&self, id: BlockId) -> Option<&BasicBlock> {
        self.blocks.iter().find(|b| b.id == id)
    }

    /// Predecessor blocks of `id`, derived from every other block's
    /// terminator successors.
    pub fn predecessors(&self, id: BlockId) -> Vec<BlockId> {
        self.blocks
            .iter()
            .filter(|b| b.successors().contains(&id))
            .map(|b| b.id)
            .collect()
    }

    /// The unique block containing a `Return` terminator.
    ///
    /// `well_formed` guarantees this is unique; a front-end that lowers
    /// multiple returns must funnel them through one exit block first.
    pub fn exit_block(&self) -> Option<BlockId> {
        self.blocks
            .iter()
            .find(|b| matches!(b.terminator(), Some(Instruction::Return { .. })))
            .map(|b| b.id)
    }

    pub fn well_formed(&self) -> Result<(), IrError> {
        if self.blocks.is_empty() {
            return Err(IrError::EmptyFunction);
        }
        let ids: HashMap<BlockId, &BasicBlock> =
            self.blocks.iter().map(|b| (b.id, b)).collect();
        for block in &self.blocks {
            if block.terminator().is_none() {
                return Err(IrError::MissingTerminator(block.id));
            }
            for succ in block.successors() {
                if !ids.contains_key(&succ) {
                    return Err(IrError::UnknownBlock(succ));
                }
            }
            for phi in block.phis() {
                if let Instruction::Phi { incoming, .. } = phi {
                    let preds = self.predecessors(block.id);
                    for (_, pred) in incoming {
                        if !preds.contains(pred) {
                            return Err(IrError::UnknownPhiPredecessor(*pred));
                        }
                    }
                }
            }
        }
        Ok(())
    }
}
