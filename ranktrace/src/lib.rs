//! Offline side of ranktrace: load every per-process artifact of a run,
//! align all timestamps onto the earliest process's reference clock, and
//! infer causal edges between send-side events and their counterparts.
//!
//! Loading is all-or-nothing: a missing, empty, or malformed artifact fails
//! the whole run with a typed error. The loaded [`RunTrace`] is read-only;
//! renderers consume it through pure queries.

use std::path::PathBuf;
use thiserror::Error;

mod correlate;
mod run;

pub use correlate::{causal_edges, CausalEdge};
pub use run::RunTrace;

pub use trace_format::FormatError;

#[derive(Error, Debug)]
pub enum LoadError {
    #[error(transparent)]
    Format(#[from] FormatError),

    #[error("run manifest in {} declares zero ranks", dir.display())]
    EmptyRun { dir: PathBuf },
}

pub type Result<T> = std::result::Result<T, LoadError>;
