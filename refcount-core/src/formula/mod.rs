//! Formula algebra & context (C1): interned operands and atoms, smart
//! constructors enforcing spec §3's invariants I1-I4, and a `Context` that
//! owns one function's operand/atom universe.

mod context;
mod operand;

pub use context::Context;
pub use operand::{AtomKind, Formula, FormulaNode, Operand, OperandNode, RelOp};
