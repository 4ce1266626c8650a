//! Timing of benchmark stages.
//!
//! Each stage is timed on every rank. The fastest and slowest rank times are reduced to rank 0.
use crate::comm::{Communicator, ReduceOp};
use crate::report::{StageReport, G};
use std::time::{Duration, Instant};

/// Accumulating wall-clock stopwatch.
#[derive(Debug, Clone, Default)]
pub struct Stopwatch {
    started: Option<Instant>,
    elapsed: Duration,
}

impl Stopwatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.started = None;
        self.elapsed = Duration::ZERO;
    }

    pub fn start(&mut self) {
        self.started = Some(Instant::now());
    }

    pub fn stop(&mut self) {
        if let Some(started) = self.started.take() {
            self.elapsed += started.elapsed();
        }
    }

    /// Accumulated time in seconds, including a running interval.
    pub fn real_time(&self) -> f64 {
        let running = self.started.map(|s| s.elapsed()).unwrap_or_default();
        (self.elapsed + running).as_secs_f64()
    }
}

/// Timing of a stage over all ranks, in seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StageTime {
    pub min: f64,
    pub max: f64,
}

impl StageTime {
    /// Millions of dofs per second for the slowest and the fastest rank, when `dofs` are processed
    /// `repetitions` times.
    pub fn mdofs_per_second(&self, dofs: usize, repetitions: usize) -> [f64; 2] {
        let work = 1e-6 * dofs as f64 * repetitions as f64;
        [work / self.max, work / self.min]
    }

    /// Console line closing a stage: `" done, max (min) s."`
    pub fn done_line(&self) -> String {
        format!(" done, {} ({}) s.", G(self.max), G(self.min))
    }

    pub fn report(&self, name: &str, dofs: Option<(usize, usize)>) -> StageReport {
        StageReport {
            name: name.to_string(),
            min_seconds: self.min,
            max_seconds: self.max,
            mdofs_per_second: dofs.map(|(dofs, repetitions)| self.mdofs_per_second(dofs, repetitions)),
        }
    }
}

/// Runs `stage` and reduces its duration over all ranks. Collective.
///
/// Only rank 0 receives the timing. With the `wtime` feature the communicator clock is used,
/// otherwise a process-local [`Stopwatch`].
pub fn time_stage<C: Communicator, R>(comm: &C, stage: impl FnOnce() -> R) -> (R, Option<StageTime>) {
    #[cfg(feature = "wtime")]
    let (result, elapsed) = {
        let start = comm.wtime();
        let result = stage();
        (result, comm.wtime() - start)
    };
    #[cfg(not(feature = "wtime"))]
    let (result, elapsed) = {
        let mut stopwatch = Stopwatch::new();
        stopwatch.start();
        let result = stage();
        stopwatch.stop();
        (result, stopwatch.real_time())
    };

    let min = comm.reduce(elapsed, ReduceOp::Min);
    let max = comm.reduce(elapsed, ReduceOp::Max);
    (result, min.zip(max).map(|(min, max)| StageTime { min, max }))
}
