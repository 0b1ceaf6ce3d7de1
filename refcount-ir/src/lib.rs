mod block;
mod error;
mod function;
mod instruction;
mod value;

pub use block::{BasicBlock, BlockId};
pub use error::IrError;
pub use function::{Function, SourceLocation};
pub use instruction::{GepIndex, Instruction, Predicate};
pub use value::{Type, StructField, Value, ValueId, PSEUDO_RETURN};
