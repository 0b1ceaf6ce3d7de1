use thiserror::Error;

/// Fatal, programmer-facing errors (spec §7 kind 4: "contract violation").
/// Everything else the pipeline does — unknown instruction shapes, SMT
/// timeouts, cache IO failures, recursive SCCs — degrades in place and is
/// never represented as an `Err` of this type; see §7 of `SPEC_FULL.md`.
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("attempted to compose formula nodes from two different contexts")]
    CrossContextComposition,
    #[error("attempted to serialize a Variable operand; variables are context-local")]
    SerializedVariable,
    #[error("cache record used an unknown tag {0}")]
    UnknownTag(u32),
    #[error("cache record was truncated or malformed: {0}")]
    Malformed(&'static str),
    #[error("cache IO error")]
    CacheIo(#[from] std::io::Error),
}
