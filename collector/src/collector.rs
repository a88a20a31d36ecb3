use std::path::PathBuf;

use crate::clock::ReferenceClock;
use crate::Result;
use comm::Communicator;
use trace_format::{ProcessTrace, Rank, TraceEvent};

/// Owns one process's growing trace for the run's lifetime and flushes it
/// exactly once at teardown.
pub struct TraceCollector {
    trace: ProcessTrace,
    clock: ReferenceClock,
    dir: PathBuf,
}

impl TraceCollector {
    pub(crate) fn new(rank: Rank, clock: ReferenceClock, dir: PathBuf) -> Self {
        TraceCollector {
            trace: ProcessTrace::new(rank, clock.reference_micros()),
            clock,
            dir,
        }
    }

    pub fn rank(&self) -> Rank {
        self.trace.rank
    }

    pub fn elapsed_micros<C: Communicator>(&self, comm: &C) -> i64 {
        self.clock.elapsed_micros(comm)
    }

    /// Infallible O(1) append; growth is bounded by the number of
    /// communication calls, not wall time.
    pub fn append(&mut self, event: TraceEvent) {
        self.trace.push(event);
    }

    pub fn events(&self) -> &[TraceEvent] {
        &self.trace.events
    }

    /// Write the artifact. Errors are surfaced to the caller, never
    /// swallowed into a diagnostic print.
    pub fn flush(&mut self) -> Result<PathBuf> {
        let path = self.trace.write_to(&self.dir)?;
        tracing::info!(
            rank = self.trace.rank,
            path = %path.display(),
            events = self.trace.events.len(),
            "trace artifact written"
        );
        Ok(path)
    }
}
