use collector::{TraceConfig, TraceSession};
use comm::{Communicator, LocalCluster};
use ranktrace::RunTrace;
use std::fs;
use tracing::info;

fn sum_bytes(acc: &mut [u8], part: &[u8]) {
    for (a, b) in acc.iter_mut().zip(part) {
        *a = a.wrapping_add(*b);
    }
}

fn main() -> eyre::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let base = tempfile::tempdir()?;
    let config = TraceConfig {
        output_base: base.path().to_path_buf(),
        ..TraceConfig::default()
    };

    LocalCluster::run(3, |comm| {
        let traced = TraceSession::begin(comm, &config).expect("trace session");

        match traced.rank() {
            0 => traced.send(b"hello", 1).expect("send"),
            1 => {
                traced.recv(0).expect("recv");
            }
            _ => {}
        }

        let mut payload = if traced.rank() == 0 {
            b"fanout".to_vec()
        } else {
            Vec::new()
        };
        traced.bcast(&mut payload, 0).expect("bcast");
        traced
            .reduce(&[traced.rank() as u8], sum_bytes, 0)
            .expect("reduce");
        traced.barrier().expect("barrier");

        traced.finish().expect("flush trace artifact");
    });

    let run_dir = fs::read_dir(base.path())?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<Result<Vec<_>, _>>()?
        .into_iter()
        .find(|path| path.is_dir())
        .expect("run directory");

    let run = RunTrace::load(&run_dir)?;
    info!(
        ranks = run.ranks(),
        span_micros = run.global_max_end(),
        "run loaded"
    );

    for trace in run.processes() {
        info!(rank = trace.rank, events = trace.events.len(), "process trace");
        for event in &trace.events {
            println!(
                "rank {} {:>8} [{} .. {}] peers {:?}",
                trace.rank, event.name, event.start, event.end, event.peers
            );
        }
    }

    for edge in run.causal_edges() {
        println!(
            "edge: rank {} event {} -> rank {} event {}",
            edge.from_rank, edge.from_event, edge.to_rank, edge.to_event
        );
    }

    Ok(())
}
