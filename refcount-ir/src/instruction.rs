use crate::value::{Type, Value, ValueId};
use crate::BlockId;
use serde::{Deserialize, Serialize};

/// Binary relational operators an `ICmp` may carry, matching the Atom
/// grammar's `op ∈ {=, ≠, <, ≤, >, ≥}`. Signed and unsigned comparisons are
/// not distinguished here — the sign-based abstract domain treats them
/// identically, per spec §4.5.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Predicate {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

/// One instruction within a [`crate::BasicBlock`], tagged with the
/// [`ValueId`] it defines (where it defines one).
///
/// This is the "typed SSA instruction" surface spec §6 requires: load,
/// store, get-element-ptr, call, cast, phi, return, icmp, branch, switch.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Instruction {
    Load {
        result: ValueId,
        pointer: Value,
    },
    Store {
        pointer: Value,
        value: Value,
    },
    /// `result = base[indices...]`. A constant index into a `Struct` type
    /// looks up its field name via `ty`; everything else is either a literal
    /// array/pointer step or, for a non-constant index, an opaque step that
    /// clears a subsequent signature composition (spec §4.4).
    GetElementPtr {
        result: ValueId,
        base: Value,
        base_type: Type,
        indices: Vec<GepIndex>,
    },
    /// `callee = None` models an indirect call (spec §6: "callee identity or
    /// null for indirect"). `result = None` when the call's return value is
    /// discarded.
    Call {
        result: Option<ValueId>,
        callee: Option<String>,
        args: Vec<Value>,
    },
    Cast {
        result: ValueId,
        operand: Value,
    },
    Phi {
        result: ValueId,
        /// `(incoming value, predecessor block)` pairs, in the order the
        /// predecessor edges are declared on the owning block.
        incoming: Vec<(Value, BlockId)>,
    },
    Return {
        value: Option<Value>,
    },
    ICmp {
        result: ValueId,
        predicate: Predicate,
        lhs: Value,
        rhs: Value,
    },
    Branch {
        condition: Value,
        if_true: BlockId,
        if_false: BlockId,
    },
    Jump {
        target: BlockId,
    },
    Switch {
        value: Value,
        cases: Vec<(i64, BlockId)>,
        default: BlockId,
    },
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GepIndex {
    Constant(i64),
    Dynamic(Value),
}

impl Instruction {
    /// The [`ValueId`] this instruction defines, if any.
    pub fn result(&self) -> Option<ValueId> {
        match self {
            Instruction::Load { result, .. }
            | Instruction::GetElementPtr { result, .. }
            | Instruction::Cast { result, .. }
            | Instruction::Phi { result, .. }
            | Instruction::ICmp { result, .. } => Some(*result),
            Instruction::Call { result, .. } => *result,
            Instruction::Store { .. }
            | Instruction::Return { .. }
            | Instruction::Branch { .. }
            | Instruction::Jump { .. }
            | Instruction::Switch { .. } => None,
        }
    }

    /// True for the instructions that end a basic block.
    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            Instruction::Return { .. }
                | Instruction::Branch { .. }
                | Instruction::Jump { .. }
                | Instruction::Switch { .. }
        )
    }

    /// True for instructions the slicing pass (spec §4.3 "Mark inclusion
    /// safety") considers pure: no write to memory, no visible effect beyond
    /// producing a value.
    pub fn is_pure(&self) -> bool {
        matches!(
            self,
            Instruction::Load { .. }
                | Instruction::GetElementPtr { .. }
                | Instruction::Cast { .. }
                | Instruction::Phi { .. }
                | Instruction::ICmp { .. }
        )
    }
}
