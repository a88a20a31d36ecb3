//! # Message-Passing Runtime Abstraction
//!
//! The narrow interface ranktrace consumes from a message-passing runtime:
//! a per-process rank/size query, the runtime's own global wall clock,
//! point-to-point and collective primitives, and a blocking barrier.
//!
//! The [`Communicator`] trait exists so the interception layer can wrap any
//! implementation and still invoke the real primitive under a distinct name.
//! [`LocalCluster`] provides an in-process, N-rank loopback implementation
//! over channels, used by tests and examples to exercise the full recording
//! pipeline without an external runtime.

use thiserror::Error;
use trace_format::Rank;

mod local;

pub use local::{LocalCluster, LocalComm};

#[derive(Error, Debug)]
pub enum CommError {
    #[error("rank {0} is not part of this communicator")]
    InvalidRank(Rank),

    #[error("peer rank {0} disconnected")]
    Disconnected(Rank),

    #[error("unknown or already completed request")]
    UnknownRequest,

    #[error("payload of {len} bytes does not divide evenly across {size} ranks")]
    UnevenPayload { len: usize, size: usize },
}

pub type Result<T> = std::result::Result<T, CommError>;

/// Token for a non-blocking operation, completed by [`Communicator::wait`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Request(pub(crate) u64);

/// Accumulate `part` into `acc`; both buffers have equal length.
pub type ReduceFn = fn(&mut [u8], &[u8]);

/// A process's view of the message-passing runtime.
///
/// Payloads are opaque byte buffers; their interpretation is the caller's
/// business. Collectives must be called by every rank of the communicator,
/// and `barrier` is a blocking rendezvous with no timeout.
pub trait Communicator {
    fn rank(&self) -> Rank;

    fn size(&self) -> usize;

    /// The runtime's own notion of global wall time, in seconds. All ranks
    /// read the same logical clock.
    fn wtime(&self) -> f64;

    fn send(&self, buf: &[u8], dest: Rank) -> Result<()>;

    fn recv(&self, source: Rank) -> Result<Vec<u8>>;

    fn isend(&self, buf: &[u8], dest: Rank) -> Result<Request>;

    fn irecv(&self, source: Rank) -> Result<Request>;

    /// Complete a non-blocking operation. Returns the received payload for a
    /// receive request, `None` for a send request.
    fn wait(&self, request: Request) -> Result<Option<Vec<u8>>>;

    /// Root's `buf` is replicated into every other rank's `buf`.
    fn bcast(&self, buf: &mut Vec<u8>, root: Rank) -> Result<()>;

    /// Fold every rank's `sendbuf` into one buffer delivered at `root`.
    /// Contributions are accumulated in ascending rank order.
    fn reduce(&self, sendbuf: &[u8], op: ReduceFn, root: Rank) -> Result<Option<Vec<u8>>>;

    /// Root's `sendbuf` is split into `size` equal chunks; every rank
    /// receives its own chunk. Non-roots pass an empty `sendbuf`.
    fn scatter(&self, sendbuf: &[u8], root: Rank) -> Result<Vec<u8>>;

    /// Every rank's `sendbuf` is concatenated in rank order at `root`.
    fn gather(&self, sendbuf: &[u8], root: Rank) -> Result<Option<Vec<u8>>>;

    /// `sendbuf` is split into `size` equal chunks, chunk `r` delivered to
    /// rank `r`; the result holds one chunk from every rank, in rank order.
    fn alltoall(&self, sendbuf: &[u8]) -> Result<Vec<u8>>;

    fn barrier(&self) -> Result<()>;
}
