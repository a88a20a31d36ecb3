use std::path::{Path, PathBuf};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use crate::clock::{ClockStrategy, ReferenceClock};
use crate::collector::TraceCollector;
use crate::config::TraceConfig;
use crate::intercept::TracedComm;
use crate::{CollectorError, Result};
use comm::Communicator;
use trace_format::{RunManifest, TimeUnit, TraceEvent};

/// Entry point of the recording lifecycle: created once at process-tracing
/// start, torn down once via [`TracedComm::finish`] or drop.
pub struct TraceSession;

impl TraceSession {
    /// Agree on a run directory, establish the reference clock, and wrap
    /// `comm` with instrumentation.
    ///
    /// Rank 0 creates the directory and broadcasts its name, so every
    /// process observes the same directory before any of them writes into
    /// it. The clock sync is a blocking collective rendezvous: every
    /// process must reach it, and no timeout is applied here.
    pub fn begin<C: Communicator>(comm: C, config: &TraceConfig) -> Result<TracedComm<C>> {
        let begin_at = Instant::now();
        let rank = comm.rank();

        let dir = agree_run_directory(&comm, &config.output_base)?;

        let clock = match config.clock {
            ClockStrategy::Monotonic => ReferenceClock::barrier_anchored(&comm)?,
            ClockStrategy::RuntimeWall => ReferenceClock::wall_anchored(&comm, begin_at.elapsed()),
        };

        if rank == 0 {
            let manifest = RunManifest {
                ranks: comm.size(),
                unit: TimeUnit::Microseconds,
            };
            manifest.write_to(&dir)?;
        }

        let mut collector = TraceCollector::new(rank, clock, dir.clone());
        let end = collector.elapsed_micros(&comm);
        collector.append(TraceEvent {
            name: "Init".to_string(),
            start: 0,
            end,
            peers: Vec::new(),
        });

        tracing::info!(rank, dir = %dir.display(), clock = ?config.clock, "trace session started");
        Ok(TracedComm::new(comm, collector))
    }
}

fn agree_run_directory<C: Communicator>(comm: &C, base: &Path) -> Result<PathBuf> {
    let mut name = if comm.rank() == 0 {
        let dir = create_run_directory(base)?;
        dir.into_os_string()
            .into_string()
            .map_err(|_| CollectorError::Init {
                reason: "run directory path is not valid UTF-8".to_string(),
            })?
            .into_bytes()
    } else {
        Vec::new()
    };

    comm.bcast(&mut name, 0)?;

    let path = String::from_utf8(name).map_err(|e| CollectorError::Init {
        reason: format!("broadcast directory name is not valid UTF-8: {e}"),
    })?;
    Ok(PathBuf::from(path))
}

fn create_run_directory(base: &Path) -> Result<PathBuf> {
    let stamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_micros();
    let dir = base.join(format!("run-{stamp}"));
    std::fs::create_dir_all(&dir).map_err(|e| CollectorError::Init {
        reason: format!("cannot create run directory {}: {e}", dir.display()),
    })?;
    Ok(dir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use comm::LocalCluster;
    use std::fs;
    use std::sync::Once;
    use tempfile::TempDir;
    use trace_format::{artifact_name, ProcessTrace};

    static INIT: Once = Once::new();

    fn init_tracing() {
        INIT.call_once(|| {
            tracing_subscriber::fmt()
                .with_env_filter(
                    tracing_subscriber::EnvFilter::try_from_default_env()
                        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debug")),
                )
                .init();
        });
    }

    fn run_dirs(base: &Path) -> Vec<PathBuf> {
        fs::read_dir(base)
            .unwrap()
            .map(|entry| entry.unwrap().path())
            .filter(|path| path.is_dir())
            .collect()
    }

    #[test]
    fn all_ranks_agree_on_one_directory() {
        init_tracing();
        let base = TempDir::new().unwrap();
        let config = TraceConfig {
            output_base: base.path().to_path_buf(),
            clock: ClockStrategy::RuntimeWall,
        };

        LocalCluster::run(3, |comm| {
            let traced = TraceSession::begin(comm, &config).unwrap();
            traced.finish().unwrap();
        });

        let dirs = run_dirs(base.path());
        assert_eq!(dirs.len(), 1, "expected exactly one run directory");
        let dir = &dirs[0];

        let manifest = RunManifest::load(dir).unwrap();
        assert_eq!(manifest.ranks, 3);
        assert_eq!(manifest.unit, TimeUnit::Microseconds);
        for rank in 0..3 {
            assert!(dir.join(artifact_name(rank)).exists());
        }
    }

    #[test]
    fn init_event_starts_at_zero() {
        init_tracing();
        let base = TempDir::new().unwrap();
        let config = TraceConfig {
            output_base: base.path().to_path_buf(),
            clock: ClockStrategy::Monotonic,
        };

        let comm = LocalCluster::comms(1).remove(0);
        let traced = TraceSession::begin(comm, &config).unwrap();

        let events = traced.recorded_events().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].name, "Init");
        assert_eq!(events[0].start, 0);
        assert!(events[0].end >= 0);
        assert!(events[0].peers.is_empty());
    }

    #[test]
    fn finish_returns_the_artifact_path() {
        init_tracing();
        let base = TempDir::new().unwrap();
        let config = TraceConfig {
            output_base: base.path().to_path_buf(),
            clock: ClockStrategy::RuntimeWall,
        };

        let comm = LocalCluster::comms(1).remove(0);
        let traced = TraceSession::begin(comm, &config).unwrap();
        let path = traced.finish().unwrap().unwrap();

        assert!(path.exists());
        let loaded = ProcessTrace::read_from(
            path.parent().unwrap(),
            0,
            TimeUnit::Microseconds,
        )
        .unwrap();
        assert_eq!(loaded.events[0].name, "Init");
    }

    #[test]
    fn finish_surfaces_write_failures_as_typed_errors() {
        init_tracing();
        let base = TempDir::new().unwrap();
        let config = TraceConfig {
            output_base: base.path().to_path_buf(),
            clock: ClockStrategy::RuntimeWall,
        };

        let comm = LocalCluster::comms(1).remove(0);
        let traced = TraceSession::begin(comm, &config).unwrap();

        // Pull the agreed directory out from under the session.
        for dir in run_dirs(base.path()) {
            fs::remove_dir_all(dir).unwrap();
        }

        match traced.finish() {
            Err(CollectorError::Write(_)) => {}
            other => panic!("expected Write error, got {other:?}"),
        }
    }

    #[test]
    fn drop_without_finish_still_writes_the_artifact() {
        init_tracing();
        let base = TempDir::new().unwrap();
        let config = TraceConfig {
            output_base: base.path().to_path_buf(),
            clock: ClockStrategy::RuntimeWall,
        };

        let comm = LocalCluster::comms(1).remove(0);
        let traced = TraceSession::begin(comm, &config).unwrap();
        drop(traced);

        let dirs = run_dirs(base.path());
        assert!(dirs[0].join(artifact_name(0)).exists());
    }

    #[test]
    fn disabled_wrapper_passes_primitives_through() {
        init_tracing();
        LocalCluster::run(2, |comm| {
            let traced = TracedComm::disabled(comm);
            assert!(!traced.enabled());
            if traced.rank() == 0 {
                traced.send(b"untraced", 1).unwrap();
            } else {
                assert_eq!(traced.recv(0).unwrap(), b"untraced");
            }
            assert!(traced.recorded_events().is_none());
            assert_eq!(traced.finish().unwrap(), None);
        });
    }
}
