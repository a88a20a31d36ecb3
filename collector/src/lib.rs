//! Recording side of ranktrace: the per-process clock model, the trace
//! buffer, and the interception layer that brackets every communication
//! primitive with a start/end timestamp pair.
//!
//! The whole recording state lives in one explicitly constructed context:
//! [`TraceSession::begin`] performs directory agreement and clock sync and
//! returns a [`TracedComm`] that wraps the real communicator; dropping it or
//! calling [`TracedComm::finish`] flushes the process's artifact exactly
//! once. There is no implicit global state.

use thiserror::Error;

pub mod clock;
pub mod config;

mod collector;
mod intercept;
mod peers;
mod session;

pub use clock::{ClockStrategy, ReferenceClock};
pub use collector::TraceCollector;
pub use config::TraceConfig;
pub use intercept::TracedComm;
pub use session::TraceSession;

#[derive(Error, Debug)]
pub enum CollectorError {
    #[error("initialization failed: {reason}")]
    Init { reason: String },

    #[error("communication runtime error: {0}")]
    Comm(#[from] comm::CommError),

    #[error("failed to write trace artifact: {0}")]
    Write(#[from] trace_format::FormatError),

    #[error("failed to load config {path}: {reason}")]
    Config { path: String, reason: String },
}

pub type Result<T> = std::result::Result<T, CollectorError>;

pub(crate) fn monotonic_micros() -> i64 {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    unsafe {
        libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts);
    }
    ts.tv_sec as i64 * 1_000_000 + ts.tv_nsec as i64 / 1_000
}
