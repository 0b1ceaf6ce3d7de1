use crate::instruction::Instruction;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlockId(pub u32);

impl Display for BlockId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "bb{}", self.0)
    }
}

/// A basic block: a maximal straight-line instruction sequence ending in
/// exactly one terminator (`Return`/`Branch`/`Jump`/`Switch`).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BasicBlock {
    pub id: BlockId,
    pub instructions: Vec<Instruction>,
}

impl BasicBlock {
    pub fn new(id: BlockId) -> Self {
        Self {
            id,
            instructions: Vec::new(),
        }
    }

    pub fn terminator(&self) -> Option<&Instruction> {
        self.instructions.last().filter(|i| i.is_terminator())
    }

    /// Successor block ids of this block's terminator, in a stable order
    /// (true-then-false for `Branch`, declaration order then default for
    /// `Switch`).
    pub fn successors(&self) -> Vec<BlockId> {
        match self.terminator() {
            Some(Instruction::Branch {
                if_true, if_false, ..
            }) => vec![*if_true, *if_false],
            Some(Instruction::Jump { target }) => vec![*target],
            Some(Instruction::Switch {
                cases, default, ..
            }) => {
                let mut succs: Vec<BlockId> = cases.iter().map(|(_, b)| *b).collect();
                succs.push(*default);
                succs
            }
            Some(Instruction::Return { .. }) | None => Vec::new(),
            Some(_) => unreachable!("terminator() only returns terminator instructions"),
        }
    }

    pub fn phis(&self) -> impl Iterator<Item = &Instruction> {
        self.instructions
            .iter()
            .take_while(|i| matches!(i, Instruction::Phi { .. }))
    }
}
