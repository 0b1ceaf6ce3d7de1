//! Path-sensitive, intra-procedural reference-counting analysis: formula
//! algebra, path enumeration, pointer-signature and sign inference, and
//! summary merging over a [`refcount_ir::Function`].

pub mod analyze;
pub mod cache;
pub mod cfg;
pub mod config;
pub mod error;
pub mod formula;
pub mod pointer_sig;
pub mod predefined;
pub mod sign;
pub mod smt;
pub mod summary;
pub mod visitor;

pub use analyze::analyze_function;
pub use config::{Config, PredefinedFamilies};
pub use error::AnalysisError;
pub use formula::Context;
pub use sign::Range;
pub use smt::{SmtBackend, Z3Backend};
pub use summary::{Operation, PathSummaryEntry, RefcountOps, ReturnValue, Summary};
