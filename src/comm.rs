//! Bulk-synchronous communication between ranks.
//!
//! All ranks run the same program and call the collective operations in the same order.
//! Point-to-point traffic goes through [`Communicator::exchange_bytes`], which sends one buffer
//! per destination and then receives exactly one buffer from each listed source. Messages between
//! a pair of ranks are delivered in the order they were sent.
use bytemuck::Pod;
use std::mem::size_of;
use std::sync::mpsc::{channel, Receiver, Sender};
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReduceOp {
    Sum,
    Min,
    Max,
}

impl ReduceOp {
    pub fn combine(self, a: f64, b: f64) -> f64 {
        match self {
            ReduceOp::Sum => a + b,
            ReduceOp::Min => a.min(b),
            ReduceOp::Max => a.max(b),
        }
    }
}

pub trait Communicator: Sized {
    fn rank(&self) -> usize;

    fn size(&self) -> usize;

    /// Sends each `(destination, buffer)` pair, then receives one buffer from each of `sources`.
    ///
    /// The received buffers are returned in the order of `sources`.
    fn exchange_bytes(&self, sends: &[(usize, Vec<u8>)], sources: &[usize]) -> Vec<Vec<u8>>;

    /// Wall-clock time in seconds since an arbitrary, rank-local origin.
    fn wtime(&self) -> f64;

    /// Terminates all ranks with the given exit code.
    fn abort(&self, code: i32) -> ! {
        std::process::exit(code)
    }

    fn is_root(&self) -> bool {
        self.rank() == 0
    }

    fn exchange<T: Pod>(&self, sends: &[(usize, Vec<T>)], sources: &[usize]) -> Vec<Vec<T>> {
        let sends: Vec<(usize, Vec<u8>)> = sends
            .iter()
            .map(|(dest, data)| (*dest, bytemuck::cast_slice(data).to_vec()))
            .collect();
        self.exchange_bytes(&sends, sources)
            .into_iter()
            .map(|bytes| {
                let mut values = vec![T::zeroed(); bytes.len() / size_of::<T>()];
                bytemuck::cast_slice_mut(&mut values).copy_from_slice(&bytes);
                values
            })
            .collect()
    }

    /// Element-wise reduction of `values` over all ranks. Every rank receives the result.
    fn all_reduce(&self, values: &mut [f64], op: ReduceOp) {
        let size = self.size();
        if size == 1 {
            return;
        }
        let others: Vec<usize> = (1..size).collect();
        if self.is_root() {
            for contribution in self.exchange::<f64>(&[], &others) {
                for (v, c) in values.iter_mut().zip(contribution) {
                    *v = op.combine(*v, c);
                }
            }
            let sends: Vec<_> = others.iter().map(|&r| (r, values.to_vec())).collect();
            self.exchange(&sends, &[]);
        } else {
            self.exchange(&[(0, values.to_vec())], &[]);
            let result = self.exchange::<f64>(&[], &[0]);
            values.copy_from_slice(&result[0]);
        }
    }

    fn all_reduce_scalar(&self, value: f64, op: ReduceOp) -> f64 {
        let mut values = [value];
        self.all_reduce(&mut values, op);
        values[0]
    }

    /// Reduction to rank 0. Only rank 0 obtains the result.
    fn reduce(&self, value: f64, op: ReduceOp) -> Option<f64> {
        let size = self.size();
        if self.is_root() {
            let others: Vec<usize> = (1..size).collect();
            let reduced = self
                .exchange::<f64>(&[], &others)
                .into_iter()
                .flatten()
                .fold(value, |acc, v| op.combine(acc, v));
            Some(reduced)
        } else {
            self.exchange(&[(0, vec![value])], &[]);
            None
        }
    }

    /// Gathers one value from every rank on every rank.
    fn all_gather(&self, value: u64) -> Vec<u64> {
        let size = self.size();
        let sends: Vec<_> = (0..size).map(|r| (r, vec![value])).collect();
        let sources: Vec<usize> = (0..size).collect();
        self.exchange(&sends, &sources)
            .into_iter()
            .flatten()
            .collect()
    }

    fn barrier(&self) {
        self.all_reduce(&mut [], ReduceOp::Sum);
    }
}

/// A communicator with a single rank.
#[derive(Debug)]
pub struct SerialComm {
    origin: Instant,
}

impl SerialComm {
    pub fn new() -> Self {
        Self { origin: Instant::now() }
    }
}

impl Default for SerialComm {
    fn default() -> Self {
        Self::new()
    }
}

impl Communicator for SerialComm {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn exchange_bytes(&self, sends: &[(usize, Vec<u8>)], sources: &[usize]) -> Vec<Vec<u8>> {
        assert!(sends.iter().all(|(dest, _)| *dest == 0), "serial communicator has only rank 0");
        assert!(sources.iter().all(|&src| src == 0), "serial communicator has only rank 0");
        assert!(sources.len() <= sends.len(), "receive without matching send");
        sends
            .iter()
            .take(sources.len())
            .map(|(_, buf)| buf.clone())
            .collect()
    }

    fn wtime(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }
}

/// In-process ranks running on separate threads, connected by channels.
///
/// Every ordered pair of ranks has its own channel, so messages between two ranks keep their
/// order. A rank waiting for a peer that has terminated panics instead of blocking forever.
#[derive(Debug)]
pub struct ThreadComm {
    rank: usize,
    /// Indexed by destination rank.
    outboxes: Vec<Sender<Vec<u8>>>,
    /// Indexed by source rank.
    inboxes: Vec<Receiver<Vec<u8>>>,
    origin: Instant,
}

impl ThreadComm {
    /// Creates the communicators for `size` ranks, to be moved into one thread each.
    pub fn create(size: usize) -> Vec<ThreadComm> {
        assert!(size > 0, "number of ranks must be positive");
        let origin = Instant::now();
        let mut outboxes: Vec<Vec<Sender<Vec<u8>>>> = (0..size).map(|_| Vec::with_capacity(size)).collect();
        let mut inboxes: Vec<Vec<Receiver<Vec<u8>>>> = (0..size).map(|_| Vec::with_capacity(size)).collect();
        for src in 0..size {
            for dst in 0..size {
                let (tx, rx) = channel();
                outboxes[src].push(tx);
                inboxes[dst].push(rx);
            }
        }
        outboxes
            .into_iter()
            .zip(inboxes)
            .enumerate()
            .map(|(rank, (outboxes, inboxes))| ThreadComm {
                rank,
                outboxes,
                inboxes,
                origin,
            })
            .collect()
    }
}

impl Communicator for ThreadComm {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.outboxes.len()
    }

    fn exchange_bytes(&self, sends: &[(usize, Vec<u8>)], sources: &[usize]) -> Vec<Vec<u8>> {
        for (dest, buf) in sends {
            if self.outboxes[*dest].send(buf.clone()).is_err() {
                panic!("rank {}: rank {} terminated before receiving", self.rank, dest);
            }
        }
        sources
            .iter()
            .map(|&src| match self.inboxes[src].recv() {
                Ok(buf) => buf,
                Err(_) => panic!("rank {}: rank {} terminated before sending", self.rank, src),
            })
            .collect()
    }

    fn wtime(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }
}

/// Runs `f` on `size` in-process ranks and returns the results in rank order.
///
/// A panic on any rank is propagated to the caller.
pub fn spawn_ranks<R, F>(size: usize, f: F) -> Vec<R>
where
    R: Send,
    F: Fn(ThreadComm) -> R + Sync,
{
    let comms = ThreadComm::create(size);
    std::thread::scope(|scope| {
        let f = &f;
        let handles: Vec<_> = comms
            .into_iter()
            .map(|comm| scope.spawn(move || f(comm)))
            .collect();
        handles
            .into_iter()
            .map(|handle| match handle.join() {
                Ok(result) => result,
                Err(payload) => std::panic::resume_unwind(payload),
            })
            .collect()
    })
}

#[cfg(feature = "mpi")]
mod mpi_backend {
    use super::{Communicator, ReduceOp};
    use mpi::collective::SystemOperation;
    use mpi::environment::Universe;
    use mpi::topology::SimpleCommunicator;
    use mpi::traits::*;

    pub struct MpiComm {
        world: SimpleCommunicator,
        _universe: Universe,
    }

    impl MpiComm {
        /// Initializes MPI. Returns `None` if MPI has already been initialized.
        pub fn initialize() -> Option<Self> {
            let universe = mpi::initialize()?;
            let world = universe.world();
            Some(Self {
                world,
                _universe: universe,
            })
        }
    }

    fn system_op(op: ReduceOp) -> SystemOperation {
        match op {
            ReduceOp::Sum => SystemOperation::sum(),
            ReduceOp::Min => SystemOperation::min(),
            ReduceOp::Max => SystemOperation::max(),
        }
    }

    impl Communicator for MpiComm {
        fn rank(&self) -> usize {
            self.world.rank() as usize
        }

        fn size(&self) -> usize {
            self.world.size() as usize
        }

        fn exchange_bytes(&self, sends: &[(usize, Vec<u8>)], sources: &[usize]) -> Vec<Vec<u8>> {
            let mut received = Vec::with_capacity(sources.len());
            mpi::request::scope(|scope| {
                let requests: Vec<_> = sends
                    .iter()
                    .map(|(dest, buf)| {
                        self.world
                            .process_at_rank(*dest as i32)
                            .immediate_send(scope, &buf[..])
                    })
                    .collect();
                for &src in sources {
                    let (buf, _status) = self.world.process_at_rank(src as i32).receive_vec::<u8>();
                    received.push(buf);
                }
                for request in requests {
                    request.wait();
                }
            });
            received
        }

        fn wtime(&self) -> f64 {
            mpi::time()
        }

        fn abort(&self, code: i32) -> ! {
            self.world.abort(code)
        }

        fn all_reduce(&self, values: &mut [f64], op: ReduceOp) {
            let input = values.to_vec();
            self.world.all_reduce_into(&input[..], values, system_op(op));
        }

        fn reduce(&self, value: f64, op: ReduceOp) -> Option<f64> {
            let root = self.world.process_at_rank(0);
            if self.is_root() {
                let mut result = 0.0;
                root.reduce_into_root(&value, &mut result, system_op(op));
                Some(result)
            } else {
                root.reduce_into(&value, system_op(op));
                None
            }
        }

        fn barrier(&self) {
            self.world.barrier();
        }
    }
}

#[cfg(feature = "mpi")]
pub use mpi_backend::MpiComm;
