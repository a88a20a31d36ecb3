use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Instant;

use crate::{CommError, Communicator, ReduceFn, Request, Result};
use trace_format::Rank;

/// In-process loopback runtime: N ranks as threads, per-pair FIFO channels.
///
/// Point-to-point traffic and collective traffic travel on separate channel
/// sets so a rank running ahead into the next collective cannot interleave
/// with another rank's pending receive. `wtime` reads a single epoch captured
/// at cluster construction, so all ranks share one logical clock.
pub struct LocalCluster;

impl LocalCluster {
    pub fn comms(size: usize) -> Vec<LocalComm> {
        assert!(size > 0, "cluster needs at least one rank");

        let epoch = Instant::now();
        let barrier = Arc::new(Barrier::new(size));

        let (p2p_tx, p2p_rx) = channel_matrix(size);
        let (coll_tx, coll_rx) = channel_matrix(size);

        p2p_tx
            .into_iter()
            .zip(p2p_rx)
            .zip(coll_tx.into_iter().zip(coll_rx))
            .enumerate()
            .map(|(rank, ((p2p_tx, p2p_rx), (coll_tx, coll_rx)))| LocalComm {
                rank: rank as Rank,
                size,
                epoch,
                barrier: barrier.clone(),
                p2p_tx,
                p2p_rx,
                coll_tx,
                coll_rx,
                pending: RefCell::new(HashMap::new()),
                next_request: Cell::new(0),
            })
            .collect()
    }

    /// Run `f` once per rank, each on its own named thread. Panics from any
    /// rank propagate when the scope joins.
    pub fn run<F>(size: usize, f: F)
    where
        F: Fn(LocalComm) + Send + Sync,
    {
        thread::scope(|scope| {
            for comm in Self::comms(size) {
                let f = &f;
                thread::Builder::new()
                    .name(format!("rank-{}", comm.rank()))
                    .spawn_scoped(scope, move || f(comm))
                    .expect("failed to spawn rank thread");
            }
        });
    }
}

/// `txs[src][dst]` sends into `rxs[dst][src]`.
type Matrix<T> = Vec<Vec<T>>;

fn channel_matrix(size: usize) -> (Matrix<Sender<Vec<u8>>>, Matrix<Receiver<Vec<u8>>>) {
    let mut txs: Matrix<Sender<Vec<u8>>> = (0..size).map(|_| Vec::with_capacity(size)).collect();
    let mut rxs: Matrix<Receiver<Vec<u8>>> = (0..size).map(|_| Vec::with_capacity(size)).collect();
    for src in 0..size {
        for dst in 0..size {
            let (tx, rx) = channel();
            txs[src].push(tx);
            rxs[dst].push(rx);
        }
    }
    (txs, rxs)
}

enum Pending {
    Send,
    Recv { source: Rank },
}

pub struct LocalComm {
    rank: Rank,
    size: usize,
    epoch: Instant,
    barrier: Arc<Barrier>,
    p2p_tx: Vec<Sender<Vec<u8>>>,
    p2p_rx: Vec<Receiver<Vec<u8>>>,
    coll_tx: Vec<Sender<Vec<u8>>>,
    coll_rx: Vec<Receiver<Vec<u8>>>,
    pending: RefCell<HashMap<u64, Pending>>,
    next_request: Cell<u64>,
}

impl LocalComm {
    fn index(&self, rank: Rank) -> Result<usize> {
        if rank < 0 || rank as usize >= self.size {
            return Err(CommError::InvalidRank(rank));
        }
        Ok(rank as usize)
    }

    fn issue(&self, pending: Pending) -> Request {
        let id = self.next_request.get();
        self.next_request.set(id + 1);
        self.pending.borrow_mut().insert(id, pending);
        Request(id)
    }

    fn chunk_len(&self, buf: &[u8]) -> Result<usize> {
        if buf.len() % self.size != 0 {
            return Err(CommError::UnevenPayload {
                len: buf.len(),
                size: self.size,
            });
        }
        Ok(buf.len() / self.size)
    }
}

impl Communicator for LocalComm {
    fn rank(&self) -> Rank {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn wtime(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64()
    }

    fn send(&self, buf: &[u8], dest: Rank) -> Result<()> {
        let dst = self.index(dest)?;
        self.p2p_tx[dst]
            .send(buf.to_vec())
            .map_err(|_| CommError::Disconnected(dest))
    }

    fn recv(&self, source: Rank) -> Result<Vec<u8>> {
        let src = self.index(source)?;
        self.p2p_rx[src]
            .recv()
            .map_err(|_| CommError::Disconnected(source))
    }

    fn isend(&self, buf: &[u8], dest: Rank) -> Result<Request> {
        // Channels are unbounded, so the transfer can complete at issue
        // time; the request token only defers the completion point.
        self.send(buf, dest)?;
        Ok(self.issue(Pending::Send))
    }

    fn irecv(&self, source: Rank) -> Result<Request> {
        self.index(source)?;
        Ok(self.issue(Pending::Recv { source }))
    }

    fn wait(&self, request: Request) -> Result<Option<Vec<u8>>> {
        let pending = self
            .pending
            .borrow_mut()
            .remove(&request.0)
            .ok_or(CommError::UnknownRequest)?;
        match pending {
            Pending::Send => Ok(None),
            Pending::Recv { source } => self.recv(source).map(Some),
        }
    }

    fn bcast(&self, buf: &mut Vec<u8>, root: Rank) -> Result<()> {
        let root_idx = self.index(root)?;
        if self.rank == root {
            for dst in 0..self.size {
                if dst == root_idx {
                    continue;
                }
                self.coll_tx[dst]
                    .send(buf.clone())
                    .map_err(|_| CommError::Disconnected(dst as Rank))?;
            }
        } else {
            *buf = self.coll_rx[root_idx]
                .recv()
                .map_err(|_| CommError::Disconnected(root))?;
        }
        Ok(())
    }

    fn reduce(&self, sendbuf: &[u8], op: ReduceFn, root: Rank) -> Result<Option<Vec<u8>>> {
        let root_idx = self.index(root)?;
        if self.rank == root {
            let mut acc = sendbuf.to_vec();
            for src in 0..self.size {
                if src == root_idx {
                    continue;
                }
                let part = self.coll_rx[src]
                    .recv()
                    .map_err(|_| CommError::Disconnected(src as Rank))?;
                op(&mut acc, &part);
            }
            Ok(Some(acc))
        } else {
            self.coll_tx[root_idx]
                .send(sendbuf.to_vec())
                .map_err(|_| CommError::Disconnected(root))?;
            Ok(None)
        }
    }

    fn scatter(&self, sendbuf: &[u8], root: Rank) -> Result<Vec<u8>> {
        let root_idx = self.index(root)?;
        if self.rank == root {
            let chunk = self.chunk_len(sendbuf)?;
            for dst in 0..self.size {
                if dst == root_idx {
                    continue;
                }
                self.coll_tx[dst]
                    .send(sendbuf[dst * chunk..(dst + 1) * chunk].to_vec())
                    .map_err(|_| CommError::Disconnected(dst as Rank))?;
            }
            Ok(sendbuf[root_idx * chunk..(root_idx + 1) * chunk].to_vec())
        } else {
            self.coll_rx[root_idx]
                .recv()
                .map_err(|_| CommError::Disconnected(root))
        }
    }

    fn gather(&self, sendbuf: &[u8], root: Rank) -> Result<Option<Vec<u8>>> {
        let root_idx = self.index(root)?;
        if self.rank == root {
            let mut result = Vec::new();
            for src in 0..self.size {
                if src == root_idx {
                    result.extend_from_slice(sendbuf);
                } else {
                    let part = self.coll_rx[src]
                        .recv()
                        .map_err(|_| CommError::Disconnected(src as Rank))?;
                    result.extend(part);
                }
            }
            Ok(Some(result))
        } else {
            self.coll_tx[root_idx]
                .send(sendbuf.to_vec())
                .map_err(|_| CommError::Disconnected(root))?;
            Ok(None)
        }
    }

    fn alltoall(&self, sendbuf: &[u8]) -> Result<Vec<u8>> {
        let chunk = self.chunk_len(sendbuf)?;
        let me = self.rank as usize;
        for dst in 0..self.size {
            if dst == me {
                continue;
            }
            self.coll_tx[dst]
                .send(sendbuf[dst * chunk..(dst + 1) * chunk].to_vec())
                .map_err(|_| CommError::Disconnected(dst as Rank))?;
        }
        let mut result = Vec::with_capacity(sendbuf.len());
        for src in 0..self.size {
            if src == me {
                result.extend_from_slice(&sendbuf[me * chunk..(me + 1) * chunk]);
            } else {
                let part = self.coll_rx[src]
                    .recv()
                    .map_err(|_| CommError::Disconnected(src as Rank))?;
                result.extend(part);
            }
        }
        Ok(result)
    }

    fn barrier(&self) -> Result<()> {
        self.barrier.wait();
        Ok(())
    }
}
