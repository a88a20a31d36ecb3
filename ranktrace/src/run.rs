// Copyright (C) 2025 Category Labs, Inc.
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

use std::collections::BTreeMap;
use std::path::Path;

use crate::{causal_edges, CausalEdge, LoadError, Result};
use trace_format::{ProcessTrace, Rank, RunManifest};

/// The aligned, cross-process view of one run.
///
/// All timestamps are rewritten onto the reference clock of the process
/// with the earliest reference time; that process's own timestamps are
/// unchanged. Alignment assumes negligible clock drift over the run's
/// duration; that is an approximation, not a guaranteed bound.
#[derive(Debug)]
pub struct RunTrace {
    processes: BTreeMap<Rank, ProcessTrace>,
    global_max_end: i64,
}

impl RunTrace {
    /// Load every artifact the run's manifest declares and align them.
    ///
    /// All-or-nothing: a missing rank artifact, an empty artifact, or an
    /// unparsable line fails the whole load.
    pub fn load(dir: &Path) -> Result<Self> {
        let manifest = RunManifest::load(dir)?;
        if manifest.ranks == 0 {
            return Err(LoadError::EmptyRun {
                dir: dir.to_path_buf(),
            });
        }

        let mut traces = Vec::with_capacity(manifest.ranks);
        for rank in 0..manifest.ranks as Rank {
            traces.push(ProcessTrace::read_from(dir, rank, manifest.unit)?);
        }

        let run = Self::from_processes(traces);
        tracing::debug!(
            ranks = manifest.ranks,
            span_micros = run.global_max_end,
            "run loaded and aligned"
        );
        Ok(run)
    }

    /// Align already-loaded traces onto one timeline. Idempotent: aligning
    /// an aligned run again changes nothing, because every process's
    /// reference is rewritten to the anchor's.
    pub fn from_processes(traces: Vec<ProcessTrace>) -> Self {
        let mut processes: BTreeMap<Rank, ProcessTrace> =
            traces.into_iter().map(|t| (t.rank, t)).collect();

        let anchor = processes
            .values()
            .map(|t| t.reference_micros)
            .min()
            .unwrap_or(0);

        let mut global_max_end = 0;
        for trace in processes.values_mut() {
            let offset = trace.reference_micros - anchor;
            for event in &mut trace.events {
                event.start += offset;
                event.end += offset;
                global_max_end = global_max_end.max(event.end);
            }
            trace.reference_micros = anchor;
        }

        RunTrace {
            processes,
            global_max_end,
        }
    }

    /// Per-process event sequences, in rank order. Read-only.
    pub fn processes(&self) -> impl Iterator<Item = &ProcessTrace> {
        self.processes.values()
    }

    pub fn process(&self, rank: Rank) -> Option<&ProcessTrace> {
        self.processes.get(&rank)
    }

    pub fn ranks(&self) -> usize {
        self.processes.len()
    }

    /// Maximum `end` across all events of all processes; the run's total
    /// span for layout and scale decisions.
    pub fn global_max_end(&self) -> i64 {
        self.global_max_end
    }

    /// Recompute causal edges on demand; nothing is persisted.
    pub fn causal_edges(&self) -> Vec<CausalEdge> {
        causal_edges(self)
    }
}
