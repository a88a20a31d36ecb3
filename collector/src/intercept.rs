use parking_lot::Mutex;
use std::path::PathBuf;

use crate::collector::TraceCollector;
use crate::{peers, Result};
use comm::{Communicator, ReduceFn, Request};
use trace_format::{Rank, TraceEvent};

/// Wraps a communicator so every primitive is bracketed by a start/end
/// timestamp pair without altering its observable behavior.
///
/// Each wrapper samples the clock, delegates to the real primitive with
/// unmodified arguments, samples again, and appends one [`TraceEvent`].
/// The delegate's result is returned unchanged whether or not it succeeded;
/// instrumentation never fails the wrapped call. With no collector
/// installed the primitives execute untraced.
pub struct TracedComm<C: Communicator> {
    inner: C,
    collector: Mutex<Option<TraceCollector>>,
}

impl<C: Communicator> TracedComm<C> {
    pub(crate) fn new(inner: C, collector: TraceCollector) -> Self {
        TracedComm {
            inner,
            collector: Mutex::new(Some(collector)),
        }
    }

    /// A pass-through wrapper with instrumentation skipped; every primitive
    /// still executes correctly.
    pub fn disabled(inner: C) -> Self {
        TracedComm {
            inner,
            collector: Mutex::new(None),
        }
    }

    pub fn enabled(&self) -> bool {
        self.collector.lock().is_some()
    }

    /// The wrapped communicator, for calls that must stay uninstrumented.
    pub fn inner(&self) -> &C {
        &self.inner
    }

    /// Flush the process's artifact and tear the session down. Write
    /// failures surface here as typed errors. Returns `None` if tracing
    /// was never started.
    pub fn finish(self) -> Result<Option<PathBuf>> {
        match self.collector.lock().take() {
            Some(mut collector) => collector.flush().map(Some),
            None => Ok(None),
        }
    }

    fn instrument<T>(
        &self,
        name: &'static str,
        peers: Vec<Rank>,
        delegate: impl FnOnce(&C) -> comm::Result<T>,
    ) -> comm::Result<T> {
        let start = {
            let guard = self.collector.lock();
            match guard.as_ref() {
                Some(collector) => collector.elapsed_micros(&self.inner),
                None => return delegate(&self.inner),
            }
        };

        let result = delegate(&self.inner);

        let mut guard = self.collector.lock();
        if let Some(collector) = guard.as_mut() {
            let end = collector.elapsed_micros(&self.inner);
            collector.append(TraceEvent {
                name: name.to_string(),
                start,
                end,
                peers,
            });
        }
        result
    }

    /// Snapshot of the events recorded so far, `None` when disabled.
    pub fn recorded_events(&self) -> Option<Vec<TraceEvent>> {
        self.collector
            .lock()
            .as_ref()
            .map(|collector| collector.events().to_vec())
    }
}

impl<C: Communicator> Drop for TracedComm<C> {
    fn drop(&mut self) {
        // Best-effort flush for sessions dropped without finish(): the
        // traced program must not crash at teardown, but the failure stays
        // visible here and as a missing artifact at load time.
        if let Some(mut collector) = self.collector.lock().take() {
            if let Err(error) = collector.flush() {
                tracing::error!(
                    rank = collector.rank(),
                    error = %error,
                    "failed to write trace artifact at teardown"
                );
            }
        }
    }
}

impl<C: Communicator> Communicator for TracedComm<C> {
    fn rank(&self) -> Rank {
        self.inner.rank()
    }

    fn size(&self) -> usize {
        self.inner.size()
    }

    fn wtime(&self) -> f64 {
        self.inner.wtime()
    }

    fn send(&self, buf: &[u8], dest: Rank) -> comm::Result<()> {
        self.instrument("Send", peers::directed(dest), |c| c.send(buf, dest))
    }

    fn recv(&self, source: Rank) -> comm::Result<Vec<u8>> {
        self.instrument("Recv", peers::silent(), |c| c.recv(source))
    }

    fn isend(&self, buf: &[u8], dest: Rank) -> comm::Result<Request> {
        self.instrument("Isend", peers::directed(dest), |c| c.isend(buf, dest))
    }

    fn irecv(&self, source: Rank) -> comm::Result<Request> {
        self.instrument("Irecv", peers::silent(), |c| c.irecv(source))
    }

    fn wait(&self, request: Request) -> comm::Result<Option<Vec<u8>>> {
        self.instrument("Wait", peers::silent(), |c| c.wait(request))
    }

    fn bcast(&self, buf: &mut Vec<u8>, root: Rank) -> comm::Result<()> {
        let peers = peers::fan_out(self.inner.rank(), root, self.inner.size());
        self.instrument("Bcast", peers, |c| c.bcast(buf, root))
    }

    fn reduce(&self, sendbuf: &[u8], op: ReduceFn, root: Rank) -> comm::Result<Option<Vec<u8>>> {
        let peers = peers::fan_in(self.inner.rank(), root, self.inner.size());
        self.instrument("Reduce", peers, |c| c.reduce(sendbuf, op, root))
    }

    fn scatter(&self, sendbuf: &[u8], root: Rank) -> comm::Result<Vec<u8>> {
        let peers = peers::fan_out(self.inner.rank(), root, self.inner.size());
        self.instrument("Scatter", peers, |c| c.scatter(sendbuf, root))
    }

    fn gather(&self, sendbuf: &[u8], root: Rank) -> comm::Result<Option<Vec<u8>>> {
        let peers = peers::fan_in(self.inner.rank(), root, self.inner.size());
        self.instrument("Gather", peers, |c| c.gather(sendbuf, root))
    }

    fn alltoall(&self, sendbuf: &[u8]) -> comm::Result<Vec<u8>> {
        let peers = peers::exchange(self.inner.rank(), self.inner.size());
        self.instrument("Alltoall", peers, |c| c.alltoall(sendbuf))
    }

    fn barrier(&self) -> comm::Result<()> {
        self.instrument("Barrier", peers::silent(), |c| c.barrier())
    }
}
