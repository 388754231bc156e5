//! A communicator abstraction modeled directly on an MPI communicator:
//! rank/size, point-to-point send/recv, and collective broadcast/reduce/
//! all-reduce built from them. Every constructor in this crate that needs
//! to talk across ranks takes a `&dyn Communicator` explicitly rather than
//! reaching for a hidden global, so a solve is reproducible regardless of
//! how many ranks it runs under.
//!
//! No real MPI binding is available in this crate's dependency stack, so
//! [`ThreadCommunicator`] plays the role of `MPI_COMM_WORLD` by running each
//! rank on its own OS thread and routing messages over `crossbeam_channel`.

use std::sync::Arc;

use crossbeam_channel::{unbounded, Receiver, Sender};

fn ceil_log2(x: usize) -> usize {
    let mut n = 0;
    while 1 << n < x {
        n += 1;
    }
    n
}

/// A group of ranks that can exchange byte messages. Collectives are
/// provided as default methods over `send`/`recv`, exactly as a from-scratch
/// MPI-like layer would build them up.
pub trait Communicator: Send + Sync {
    /// This process's rank within the communicator, `0..size()`.
    fn rank(&self) -> usize;

    /// The number of ranks in the communicator.
    fn size(&self) -> usize;

    /// Send a message to a peer. Must not block waiting for a matching recv.
    fn send(&self, rank: usize, message: Vec<u8>);

    /// Block until a message from any peer is available.
    fn recv(&self) -> Vec<u8>;

    /// Put a received-but-not-yet-needed message back at the front of the
    /// inbox.
    fn requeue_recv(&self, bytes: Vec<u8>);

    /// Binomial-tree broadcast from rank 0. `value` must be `Some` on rank 0
    /// and `None` everywhere else.
    fn broadcast(&self, value: Option<Vec<u8>>) -> Vec<u8> {
        let r = self.rank();
        let p = self.size();
        let value = match value {
            Some(value) => value,
            None => self.recv(),
        };
        for level in (0..ceil_log2(p)).rev() {
            let one = 1 << level;
            let two = 1 << (level + 1);
            if r % two == 0 && r + one <= p {
                self.send(r + one, value.clone())
            }
        }
        value
    }

    /// Binomial-tree reduce with fold function `f`. Only rank 0 returns
    /// `Some`; every other rank returns `None`. Gaps grow from `1` upward
    /// (the opposite order from `broadcast`, which shrinks from the top): a
    /// rank sends exactly once, at the first level its bit pattern makes it
    /// a sender, then drops out.
    fn reduce<F>(&self, f: F, mut value: Vec<u8>) -> Option<Vec<u8>>
    where
        F: Fn(Vec<u8>, Vec<u8>) -> Vec<u8>,
    {
        let r = self.rank();
        let p = self.size();
        for level in 0..ceil_log2(p) {
            let one = 1 << level;
            let two = 1 << (level + 1);
            if r % two == 0 {
                if r + one < p {
                    value = f(value, self.recv());
                }
            } else {
                self.send(r - one, value);
                return None;
            }
        }
        Some(value)
    }

    /// `reduce` followed by `broadcast`: every rank ends up with the folded
    /// value.
    fn all_reduce<F>(&self, f: F, value: Vec<u8>) -> Vec<u8>
    where
        F: Fn(Vec<u8>, Vec<u8>) -> Vec<u8>,
    {
        self.broadcast(self.reduce(f, value))
    }
}

/// All-reduce a single `f64` by summation.
pub fn all_reduce_sum(comm: &dyn Communicator, value: f64) -> f64 {
    let bytes = comm.all_reduce(add_f64_bytes, value.to_le_bytes().to_vec());
    decode_f64(&bytes)
}

/// All-reduce a single `f64` by taking the maximum.
pub fn all_reduce_max(comm: &dyn Communicator, value: f64) -> f64 {
    let bytes = comm.all_reduce(max_f64_bytes, value.to_le_bytes().to_vec());
    decode_f64(&bytes)
}

fn decode_f64(bytes: &[u8]) -> f64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(bytes);
    f64::from_le_bytes(buf)
}

fn add_f64_bytes(a: Vec<u8>, b: Vec<u8>) -> Vec<u8> {
    (decode_f64(&a) + decode_f64(&b)).to_le_bytes().to_vec()
}

fn max_f64_bytes(a: Vec<u8>, b: Vec<u8>) -> Vec<u8> {
    decode_f64(&a).max(decode_f64(&b)).to_le_bytes().to_vec()
}

/// An in-process stand-in for `MPI_COMM_WORLD`: each rank is handed its own
/// `ThreadCommunicator`, and messages travel over per-rank
/// `crossbeam_channel` inboxes rather than a network transport.
pub struct ThreadCommunicator {
    rank: usize,
    size: usize,
    senders: Vec<Sender<Vec<u8>>>,
    receiver: Receiver<Vec<u8>>,
}

impl ThreadCommunicator {
    /// Build `size` communicators, one per rank, sharing a common set of
    /// inboxes so any rank can send to any other.
    pub fn world(size: usize) -> Vec<Arc<ThreadCommunicator>> {
        assert!(size >= 1, "a communicator needs at least one rank");
        let (senders, receivers): (Vec<_>, Vec<_>) = (0..size).map(|_| unbounded()).unzip();
        receivers
            .into_iter()
            .enumerate()
            .map(|(rank, receiver)| {
                Arc::new(ThreadCommunicator { rank, size, senders: senders.clone(), receiver })
            })
            .collect()
    }
}

impl Communicator for ThreadCommunicator {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn send(&self, rank: usize, message: Vec<u8>) {
        self.senders[rank].send(message).expect("peer inbox closed");
    }

    fn recv(&self) -> Vec<u8> {
        self.receiver.recv().expect("own inbox closed")
    }

    fn requeue_recv(&self, bytes: Vec<u8>) {
        self.senders[self.rank].send(bytes).expect("own inbox closed");
    }
}
