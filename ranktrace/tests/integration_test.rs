use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Once;

use collector::{ClockStrategy, TraceConfig, TraceSession};
use comm::{Communicator, LocalCluster};
use ranktrace::{FormatError, LoadError, RunTrace};
use rstest::rstest;
use tempfile::TempDir;
use trace_format::artifact_name;

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

fn sum_bytes(acc: &mut [u8], part: &[u8]) {
    for (a, b) in acc.iter_mut().zip(part) {
        *a = a.wrapping_add(*b);
    }
}

/// Three ranks exercising point-to-point, non-blocking, and collective
/// primitives, each flushing its artifact at the end.
fn run_workload(base: &Path, clock: ClockStrategy) -> PathBuf {
    let config = TraceConfig {
        output_base: base.to_path_buf(),
        clock,
    };

    LocalCluster::run(3, |comm| {
        let traced = TraceSession::begin(comm, &config).unwrap();

        match traced.rank() {
            0 => traced.send(b"ping", 1).unwrap(),
            1 => assert_eq!(traced.recv(0).unwrap(), b"ping"),
            _ => {}
        }

        if traced.rank() == 2 {
            let request = traced.irecv(0).unwrap();
            assert_eq!(traced.wait(request).unwrap(), Some(b"pong".to_vec()));
        } else if traced.rank() == 0 {
            let request = traced.isend(b"pong", 2).unwrap();
            traced.wait(request).unwrap();
        }

        let mut payload = if traced.rank() == 0 {
            b"broadcast".to_vec()
        } else {
            Vec::new()
        };
        traced.bcast(&mut payload, 0).unwrap();
        assert_eq!(payload, b"broadcast");

        traced
            .reduce(&[traced.rank() as u8 + 1], sum_bytes, 0)
            .unwrap();

        let gathered = traced.gather(&[traced.rank() as u8], 2).unwrap();
        if traced.rank() == 2 {
            assert_eq!(gathered, Some(vec![0, 1, 2]));
        }

        traced.barrier().unwrap();
        traced.finish().unwrap();
    });

    let mut dirs: Vec<_> = fs::read_dir(base)
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .filter(|path| path.is_dir())
        .collect();
    assert_eq!(dirs.len(), 1, "expected exactly one run directory");
    dirs.remove(0)
}

fn event_name(run: &RunTrace, rank: i32, index: usize) -> String {
    run.process(rank).unwrap().events[index].name.clone()
}

#[test]
fn full_pipeline_aligns_and_correlates() {
    init_tracing();
    let base = TempDir::new().unwrap();
    let dir = run_workload(base.path(), ClockStrategy::RuntimeWall);

    let run = RunTrace::load(&dir).unwrap();
    assert_eq!(run.ranks(), 3);

    // Timestamps never go backward within one event, and alignment keeps
    // every offset non-negative relative to the anchor.
    let mut max_end = 0;
    for trace in run.processes() {
        assert_eq!(trace.events[0].name, "Init");
        for event in &trace.events {
            assert!(event.end >= event.start, "{event:?}");
            max_end = max_end.max(event.end);
        }
    }
    assert_eq!(run.global_max_end(), max_end);

    // The blocking send on rank 0 pairs with the receive on rank 1.
    let edges = run.causal_edges();
    let send_edge = edges
        .iter()
        .find(|edge| edge.from_rank == 0 && event_name(&run, 0, edge.from_event) == "Send")
        .expect("missing Send edge");
    assert_eq!(send_edge.to_rank, 1);
    assert_eq!(event_name(&run, 1, send_edge.to_event), "Recv");

    // The non-blocking pair correlates through its counterpart name.
    let isend_edge = edges
        .iter()
        .find(|edge| edge.from_rank == 0 && event_name(&run, 0, edge.from_event) == "Isend")
        .expect("missing Isend edge");
    assert_eq!(isend_edge.to_rank, 2);
    assert_eq!(event_name(&run, 2, isend_edge.to_event), "Irecv");

    // A blocking receive cannot complete before its send started. Each
    // timestamp truncates to whole microseconds, hence the slack.
    let send = &run.process(0).unwrap().events[send_edge.from_event];
    let recv = &run.process(1).unwrap().events[send_edge.to_event];
    assert!(recv.end + 2 >= send.start, "send {send:?} after recv {recv:?}");
}

#[test]
fn broadcast_peers_follow_the_root_rule() {
    init_tracing();
    let base = TempDir::new().unwrap();
    let dir = run_workload(base.path(), ClockStrategy::RuntimeWall);
    let run = RunTrace::load(&dir).unwrap();

    for trace in run.processes() {
        let bcast = trace
            .events
            .iter()
            .find(|event| event.name == "Bcast")
            .unwrap();
        if trace.rank == 0 {
            assert_eq!(bcast.peers, vec![1, 2]);
        } else {
            assert!(bcast.peers.is_empty());
        }
    }
}

#[test]
fn no_receive_event_is_matched_twice() {
    init_tracing();
    let base = TempDir::new().unwrap();
    let dir = run_workload(base.path(), ClockStrategy::RuntimeWall);
    let run = RunTrace::load(&dir).unwrap();

    let mut seen = std::collections::HashSet::new();
    for edge in run.causal_edges() {
        assert!(
            seen.insert((edge.to_rank, edge.to_event)),
            "receive side matched twice: {edge:?}"
        );
    }
}

#[rstest]
#[case::runtime_wall(ClockStrategy::RuntimeWall)]
#[case::barrier_monotonic(ClockStrategy::Monotonic)]
fn every_clock_strategy_produces_a_loadable_run(#[case] clock: ClockStrategy) {
    init_tracing();
    let base = TempDir::new().unwrap();
    let dir = run_workload(base.path(), clock);

    let run = RunTrace::load(&dir).unwrap();
    assert_eq!(run.ranks(), 3);
    for trace in run.processes() {
        for event in &trace.events {
            assert!(event.end >= event.start);
        }
    }
}

#[test]
fn loading_twice_is_stable() {
    init_tracing();
    let base = TempDir::new().unwrap();
    let dir = run_workload(base.path(), ClockStrategy::RuntimeWall);

    let first = RunTrace::load(&dir).unwrap();
    let second = RunTrace::load(&dir).unwrap();

    let a: Vec<_> = first.processes().cloned().collect();
    let b: Vec<_> = second.processes().cloned().collect();
    assert_eq!(a, b);
}

#[test]
fn missing_artifact_fails_the_whole_load() {
    init_tracing();
    let base = TempDir::new().unwrap();
    let dir = run_workload(base.path(), ClockStrategy::RuntimeWall);

    fs::remove_file(dir.join(artifact_name(2))).unwrap();

    match RunTrace::load(&dir).unwrap_err() {
        LoadError::Format(FormatError::MissingTrace { rank, .. }) => assert_eq!(rank, 2),
        other => panic!("expected MissingTrace, got {other:?}"),
    }
}

#[test]
fn truncated_artifact_fails_the_whole_load() {
    init_tracing();
    let base = TempDir::new().unwrap();
    let dir = run_workload(base.path(), ClockStrategy::RuntimeWall);

    fs::write(dir.join(artifact_name(1)), "").unwrap();

    assert!(matches!(
        RunTrace::load(&dir).unwrap_err(),
        LoadError::Format(FormatError::EmptyTrace { .. })
    ));
}

#[test]
fn corrupt_line_reports_artifact_and_line() {
    init_tracing();
    let base = TempDir::new().unwrap();
    let dir = run_workload(base.path(), ClockStrategy::RuntimeWall);

    fs::write(dir.join(artifact_name(0)), "1000\nSend abc def\n").unwrap();

    match RunTrace::load(&dir).unwrap_err() {
        LoadError::Format(FormatError::Parse { line, .. }) => assert_eq!(line, 2),
        other => panic!("expected Parse, got {other:?}"),
    }
}

#[test]
fn zero_rank_manifest_is_rejected() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    fs::write(
        dir.path().join(trace_format::MANIFEST_FILE),
        "ranks = 0\nunit = \"microseconds\"\n",
    )
    .unwrap();

    assert!(matches!(
        RunTrace::load(dir.path()).unwrap_err(),
        LoadError::EmptyRun { .. }
    ));
}
