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

use std::collections::HashSet;

use crate::RunTrace;
use trace_format::{ProcessTrace, Rank};

/// Inferred pairing between an event that recorded peers and its
/// counterpart on the named peer process. Derived, never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CausalEdge {
    pub from_rank: Rank,
    pub from_event: usize,
    pub to_rank: Rank,
    pub to_event: usize,
}

/// Match every send-side event to a counterpart on its named peers.
///
/// Best-effort heuristic: the first unmatched event on the peer, in that
/// peer's chronological order, whose name equals the sender's (or is the
/// canonical counterpart of a directed send) and whose own recorded peers,
/// if any, include the sender's rank. A matched event is never reused.
///
/// When a process issues multiple undiscriminated receives from the same
/// sender, FIFO order resolves the ambiguity; that is a policy choice, not
/// a correctness guarantee. Unmatched send-side events yield no edge and
/// no error.
pub fn causal_edges(run: &RunTrace) -> Vec<CausalEdge> {
    let mut matched: HashSet<(Rank, usize)> = HashSet::new();
    let mut edges = Vec::new();

    for trace in run.processes() {
        for (index, event) in trace.events.iter().enumerate() {
            for &peer in &event.peers {
                let Some(peer_trace) = run.process(peer) else {
                    continue;
                };
                if let Some(target) = find_match(peer_trace, trace.rank, &event.name, &matched) {
                    matched.insert((peer, target));
                    edges.push(CausalEdge {
                        from_rank: trace.rank,
                        from_event: index,
                        to_rank: peer,
                        to_event: target,
                    });
                }
            }
        }
    }

    tracing::debug!(edges = edges.len(), "causal edges inferred");
    edges
}

fn find_match(
    peer_trace: &ProcessTrace,
    sender: Rank,
    name: &str,
    matched: &HashSet<(Rank, usize)>,
) -> Option<usize> {
    peer_trace.events.iter().enumerate().find_map(|(index, candidate)| {
        if matched.contains(&(peer_trace.rank, index)) {
            return None;
        }
        if !name_matches(name, &candidate.name) {
            return None;
        }
        if !candidate.peers.is_empty() && !candidate.peers.contains(&sender) {
            return None;
        }
        Some(index)
    })
}

fn name_matches(sender: &str, candidate: &str) -> bool {
    sender == candidate || counterparts(sender).contains(&candidate)
}

/// Receive-side names a directed send may pair with.
fn counterparts(name: &str) -> &'static [&'static str] {
    match name {
        "Send" | "Isend" => &["Recv", "Irecv"],
        _ => &[],
    }
}
