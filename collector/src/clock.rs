use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use crate::{monotonic_micros, Result};
use comm::Communicator;

/// How a process anchors its zero point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClockStrategy {
    /// Collective barrier, then each process samples its own monotonic
    /// clock. Reference values agree within one barrier round-trip.
    Monotonic,
    /// Back-compute a virtual start from the runtime's own global wall
    /// clock. Stronger guarantee; preferred when the runtime exposes one.
    #[default]
    RuntimeWall,
}

/// A process's zero point and microsecond offsets measured from it.
///
/// `elapsed_micros` reads 0 at the instant the reference was established
/// (for the wall strategy, that instant is the back-computed virtual start)
/// and never decreases; a high-water mark absorbs any backward step of the
/// underlying clock.
#[derive(Debug)]
pub struct ReferenceClock {
    strategy: ClockStrategy,
    reference_micros: i64,
    high_water: AtomicI64,
}

impl ReferenceClock {
    /// Rendezvous with every other process, then sample the local monotonic
    /// clock. Blocks until all processes reach the barrier.
    pub fn barrier_anchored<C: Communicator>(comm: &C) -> Result<Self> {
        comm.barrier()?;
        Ok(ReferenceClock {
            strategy: ClockStrategy::Monotonic,
            reference_micros: monotonic_micros(),
            high_water: AtomicI64::new(0),
        })
    }

    /// Anchor to the runtime's global wall clock: the reference is the
    /// current runtime time minus the measured duration of initialization.
    pub fn wall_anchored<C: Communicator>(comm: &C, init_duration: Duration) -> Self {
        let after_init = wtime_micros(comm);
        ReferenceClock {
            strategy: ClockStrategy::RuntimeWall,
            reference_micros: after_init - init_duration.as_micros() as i64,
            high_water: AtomicI64::new(0),
        }
    }

    /// The zero point in microseconds, written as the artifact's first line.
    pub fn reference_micros(&self) -> i64 {
        self.reference_micros
    }

    pub fn strategy(&self) -> ClockStrategy {
        self.strategy
    }

    /// Microseconds elapsed since the reference, monotonically
    /// non-decreasing for this process.
    pub fn elapsed_micros<C: Communicator>(&self, comm: &C) -> i64 {
        let raw = match self.strategy {
            ClockStrategy::Monotonic => monotonic_micros() - self.reference_micros,
            ClockStrategy::RuntimeWall => wtime_micros(comm) - self.reference_micros,
        };
        self.high_water.fetch_max(raw, Ordering::Relaxed).max(raw)
    }
}

fn wtime_micros<C: Communicator>(comm: &C) -> i64 {
    (comm.wtime() * 1_000_000.0) as i64
}
