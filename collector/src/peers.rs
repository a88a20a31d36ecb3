//! Peer-determination rules, one per primitive class.
//!
//! Only the caller's own intercepted call is visible, so peers are inferred
//! from the call's arguments alone. Peers are recorded on the initiating
//! side only; the receiving side is reconstructed offline by the
//! correlator.

use trace_format::Rank;

/// Directed point-to-point send: the destination rank.
pub(crate) fn directed(dest: Rank) -> Vec<Rank> {
    vec![dest]
}

/// Receives, waits, and barriers record no peer.
pub(crate) fn silent() -> Vec<Rank> {
    Vec::new()
}

/// Root-initiated data movement (broadcast, scatter): the root records
/// every other participant; receivers record nothing.
pub(crate) fn fan_out(rank: Rank, root: Rank, size: usize) -> Vec<Rank> {
    if rank == root {
        all_others(root, size)
    } else {
        Vec::new()
    }
}

/// Root-collected data movement (gather, reduce): the root records every
/// other participant, and each sender records the root.
pub(crate) fn fan_in(rank: Rank, root: Rank, size: usize) -> Vec<Rank> {
    if rank == root {
        all_others(root, size)
    } else {
        vec![root]
    }
}

/// All-to-all: every other participant.
pub(crate) fn exchange(rank: Rank, size: usize) -> Vec<Rank> {
    all_others(rank, size)
}

fn all_others(except: Rank, size: usize) -> Vec<Rank> {
    (0..size as Rank).filter(|rank| *rank != except).collect()
}
