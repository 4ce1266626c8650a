//! Reference solution and right-hand side of a benchmark run.
use crate::comm::{Communicator, ReduceOp};
use crate::space::H1Space;
use nalgebra::DVector;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Local vectors of a run.
#[derive(Debug, Clone)]
pub struct ReferenceState {
    /// Random reference solution.
    pub x0: DVector<f64>,
    /// Solution vector, initialized to `x0`.
    pub x: DVector<f64>,
    /// Right-hand side, initialized to -1.
    pub b: DVector<f64>,
    pub ones: DVector<f64>,
}

impl ReferenceState {
    /// Draws the reference solution on the true dofs, uniformly from `[0, 1)` with seed
    /// `seed + rank`, and distributes it to the local vectors.
    ///
    /// For `mean_free`, the mean of every component is subtracted.
    pub fn new<C: Communicator>(comm: &C, space: &H1Space, seed: u64, mean_free: bool) -> Self {
        let mut x0_true = random_true_vector(space.true_vsize(), seed.wrapping_add(comm.rank() as u64));
        if mean_free {
            subtract_component_means(comm, &mut x0_true, space.vdim(), space.global_true_vsize());
        }
        let mut x0 = DVector::zeros(space.vsize());
        space.prolongate(comm, x0_true.as_slice(), x0.as_mut_slice());
        Self {
            x: x0.clone(),
            x0,
            b: DVector::repeat(space.vsize(), -1.0),
            ones: DVector::repeat(space.vsize(), 1.0),
        }
    }
}

pub fn random_true_vector(n: usize, seed: u64) -> DVector<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    DVector::from_fn(n, |_, _| rng.gen::<f64>())
}

/// Subtracts from every component of an interleaved true-dof vector its global mean.
pub fn subtract_component_means<C: Communicator>(comm: &C, x: &mut DVector<f64>, vdim: usize, global_size: usize) {
    let mut sums = vec![0.0; vdim];
    for (i, value) in x.iter().enumerate() {
        sums[i % vdim] += value;
    }
    comm.all_reduce(&mut sums, ReduceOp::Sum);
    let count = (global_size / vdim) as f64;
    for (i, value) in x.iter_mut().enumerate() {
        *value -= sums[i % vdim] / count;
    }
}

/// Global sum of the squares of a true-dof vector.
pub fn global_norm_squared<C: Communicator>(comm: &C, x: &DVector<f64>) -> f64 {
    comm.all_reduce_scalar(x.norm_squared(), ReduceOp::Sum)
}
