use crate::BlockId;
use thiserror::Error;

/// Errors surfaced while building or walking an [`crate::Function`].
///
/// These are shape errors in the IR itself (a malformed fixture, a dangling
/// reference) — not the "unknown instruction" / "missing debug info" class of
/// degradation the analyzer absorbs on its own (see `refcount-core`'s
/// `AnalysisError`, which never wraps this type).
#[derive(Debug, Error)]
pub enum IrError {
    #[error("basic block {0} has no terminator")]
    MissingTerminator(BlockId),
    #[error("phi node references predecessor block {0} that is not a predecessor of its block")]
    UnknownPhiPredecessor(BlockId),
    #[error("function has no basic blocks")]
    EmptyFunction,
    #[error("basic block id {0} is not present in the function")]
    UnknownBlock(BlockId),
}
