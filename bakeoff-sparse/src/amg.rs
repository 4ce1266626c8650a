//! Smoothed-aggregation algebraic multigrid.
//!
//! The hierarchy is built from a symmetric positive definite matrix by greedy aggregation of
//! strongly connected nodes, a tentative piecewise-constant prolongator and one step of damped
//! Jacobi prolongator smoothing. Coarse operators are Galerkin products `P^T A P`. One
//! application of the preconditioner is a single V-cycle with symmetric Gauss-Seidel smoothing,
//! which keeps the preconditioner symmetric so that it can be used with CG.
use crate::cg::LinearOperator;
use log::debug;
use nalgebra::{Cholesky, DMatrix, DVector, DVectorView, DVectorViewMut, Dyn};
use nalgebra_sparse::{CooMatrix, CsrMatrix};
use std::error::Error;
use std::fmt;

#[derive(Debug, Clone)]
pub struct AmgOptions {
    /// Connections with `|a_ij| >= theta * sqrt(|a_ii a_jj|)` are considered strong.
    pub strength_threshold: f64,
    pub max_levels: usize,
    /// Levels with at most this many unknowns are solved directly.
    pub coarse_size: usize,
    /// Number of Gauss-Seidel sweeps before and after coarse-grid correction.
    pub smoothing_sweeps: usize,
}

impl Default for AmgOptions {
    fn default() -> Self {
        Self {
            strength_threshold: 0.08,
            max_levels: 10,
            coarse_size: 100,
            smoothing_sweeps: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum AmgError {
    NotSquare { nrows: usize, ncols: usize },
    /// The coarsest operator could not be factorized.
    SingularCoarseOperator { size: usize },
}

impl fmt::Display for AmgError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotSquare { nrows, ncols } => {
                write!(f, "AMG requires a square matrix, got {nrows} x {ncols}")
            }
            Self::SingularCoarseOperator { size } => {
                write!(f, "coarse operator of size {size} is not positive definite")
            }
        }
    }
}

impl Error for AmgError {}

#[derive(Debug, Clone)]
struct Level {
    a: CsrMatrix<f64>,
    /// Prolongation from the next coarser level.
    p: CsrMatrix<f64>,
    /// Restriction to the next coarser level, `P^T`.
    r: CsrMatrix<f64>,
}

#[derive(Debug, Clone)]
pub struct SmoothedAggregation {
    levels: Vec<Level>,
    coarse: Option<Cholesky<f64, Dyn>>,
    coarse_size: usize,
    sweeps: usize,
}

impl SmoothedAggregation {
    pub fn new(matrix: &CsrMatrix<f64>) -> Result<Self, AmgError> {
        Self::with_options(matrix, &AmgOptions::default())
    }

    pub fn with_options(matrix: &CsrMatrix<f64>, options: &AmgOptions) -> Result<Self, AmgError> {
        if matrix.nrows() != matrix.ncols() {
            return Err(AmgError::NotSquare {
                nrows: matrix.nrows(),
                ncols: matrix.ncols(),
            });
        }

        let mut levels = Vec::new();
        let mut a = matrix.clone();
        while levels.len() + 1 < options.max_levels && a.nrows() > options.coarse_size {
            let (aggregates, num_aggregates) = aggregate(&a, options.strength_threshold);
            if num_aggregates == 0 || num_aggregates >= a.nrows() {
                break;
            }
            let tentative = tentative_prolongator(&aggregates, num_aggregates);
            let p = smooth_prolongator(&a, &tentative);
            let r = p.transpose();
            let coarse = &r * &(&a * &p);
            debug!(
                "AMG level {}: {} unknowns, {} nonzeros, {} aggregates",
                levels.len(),
                a.nrows(),
                a.nnz(),
                num_aggregates
            );
            levels.push(Level { a, p, r });
            a = coarse;
        }

        let coarse_size = a.nrows();
        let coarse = if coarse_size > 0 {
            let mut dense = DMatrix::zeros(coarse_size, coarse_size);
            for (i, j, v) in a.triplet_iter() {
                dense[(i, j)] += *v;
            }
            let cholesky = Cholesky::new(dense).ok_or(AmgError::SingularCoarseOperator { size: coarse_size })?;
            Some(cholesky)
        } else {
            None
        };
        debug!("AMG coarsest level: {} unknowns", coarse_size);

        Ok(Self {
            levels,
            coarse,
            coarse_size,
            sweeps: options.smoothing_sweeps,
        })
    }

    /// Number of levels, including the coarsest.
    pub fn num_levels(&self) -> usize {
        self.levels.len() + 1
    }

    /// The number of unknowns on the finest level.
    pub fn size(&self) -> usize {
        self.levels
            .first()
            .map(|level| level.a.nrows())
            .unwrap_or(self.coarse_size)
    }

    /// Ratio of the total number of nonzeros in all level operators to that of the finest.
    pub fn operator_complexity(&self) -> f64 {
        let fine_nnz = self.levels.first().map(|level| level.a.nnz()).unwrap_or(0);
        if fine_nnz == 0 {
            return 1.0;
        }
        let total: usize = self.levels.iter().map(|level| level.a.nnz()).sum::<usize>() + self.coarse_size.pow(2);
        total as f64 / fine_nnz as f64
    }

    fn cycle(&self, level: usize, b: &[f64], x: &mut [f64]) {
        x.iter_mut().for_each(|x_i| *x_i = 0.0);
        if level == self.levels.len() {
            if let Some(cholesky) = &self.coarse {
                let solution = cholesky.solve(&DVector::from_column_slice(b));
                x.copy_from_slice(solution.as_slice());
            }
            return;
        }

        let Level { a, p, r } = &self.levels[level];
        for _ in 0..self.sweeps {
            gauss_seidel(a, b, x, false);
        }

        let mut residual = b.to_vec();
        for (i, row) in a.row_iter().enumerate() {
            let ax_i: f64 = row
                .col_indices()
                .iter()
                .zip(row.values())
                .map(|(&j, &v)| v * x[j])
                .sum();
            residual[i] -= ax_i;
        }

        let coarse_rhs = csr_mul(r, &residual);
        let mut coarse_x = vec![0.0; coarse_rhs.len()];
        self.cycle(level + 1, &coarse_rhs, &mut coarse_x);
        let correction = csr_mul(p, &coarse_x);
        x.iter_mut()
            .zip(&correction)
            .for_each(|(x_i, c_i)| *x_i += c_i);

        for _ in 0..self.sweeps {
            gauss_seidel(a, b, x, true);
        }
    }
}

impl LinearOperator<f64> for SmoothedAggregation {
    fn apply(&self, mut y: DVectorViewMut<f64>, x: DVectorView<f64>) -> Result<(), Box<dyn Error>> {
        assert_eq!(x.len(), self.size());
        let b: Vec<f64> = x.iter().copied().collect();
        let mut z = vec![0.0; b.len()];
        self.cycle(0, &b, &mut z);
        y.copy_from_slice(&z);
        Ok(())
    }
}

fn csr_mul(a: &CsrMatrix<f64>, x: &[f64]) -> Vec<f64> {
    a.row_iter()
        .map(|row| {
            row.col_indices()
                .iter()
                .zip(row.values())
                .map(|(&j, &v)| v * x[j])
                .sum()
        })
        .collect()
}

fn gauss_seidel(a: &CsrMatrix<f64>, b: &[f64], x: &mut [f64], backward: bool) {
    let n = a.nrows();
    let mut sweep_row = |i: usize| {
        let row = a.row(i);
        let mut sigma = b[i];
        let mut diagonal = 0.0;
        for (&j, &v) in row.col_indices().iter().zip(row.values()) {
            if j == i {
                diagonal += v;
            } else {
                sigma -= v * x[j];
            }
        }
        if diagonal != 0.0 {
            x[i] = sigma / diagonal;
        }
    };
    if backward {
        (0..n).rev().for_each(&mut sweep_row);
    } else {
        (0..n).for_each(&mut sweep_row);
    }
}

fn diagonal_of(a: &CsrMatrix<f64>) -> Vec<f64> {
    a.row_iter()
        .enumerate()
        .map(|(i, row)| {
            row.col_indices()
                .iter()
                .zip(row.values())
                .filter(|&(&j, _)| j == i)
                .map(|(_, &v)| v)
                .sum()
        })
        .collect()
}

/// Greedy aggregation of strongly connected nodes.
///
/// Returns the aggregate of every node (`None` for isolated nodes) and the number of aggregates.
fn aggregate(a: &CsrMatrix<f64>, theta: f64) -> (Vec<Option<usize>>, usize) {
    let n = a.nrows();
    let diagonal = diagonal_of(a);
    let strong: Vec<Vec<usize>> = a
        .row_iter()
        .enumerate()
        .map(|(i, row)| {
            row.col_indices()
                .iter()
                .zip(row.values())
                .filter(|&(&j, &v)| j != i && v.abs() >= theta * (diagonal[i] * diagonal[j]).abs().sqrt())
                .map(|(&j, _)| j)
                .collect()
        })
        .collect();

    let mut aggregates: Vec<Option<usize>> = vec![None; n];
    let mut num_aggregates = 0;

    // Root nodes whose entire strong neighborhood is still free
    for i in 0..n {
        if aggregates[i].is_some() || strong[i].is_empty() {
            continue;
        }
        if strong[i].iter().all(|&j| aggregates[j].is_none()) {
            aggregates[i] = Some(num_aggregates);
            for &j in &strong[i] {
                aggregates[j] = Some(num_aggregates);
            }
            num_aggregates += 1;
        }
    }

    // Attach remaining nodes to a neighboring aggregate
    let snapshot = aggregates.clone();
    for i in 0..n {
        if aggregates[i].is_none() && !strong[i].is_empty() {
            aggregates[i] = strong[i].iter().find_map(|&j| snapshot[j]);
        }
    }

    // Whatever is left forms new aggregates with its free neighbors
    for i in 0..n {
        if aggregates[i].is_some() || strong[i].is_empty() {
            continue;
        }
        aggregates[i] = Some(num_aggregates);
        for &j in &strong[i] {
            if aggregates[j].is_none() {
                aggregates[j] = Some(num_aggregates);
            }
        }
        num_aggregates += 1;
    }

    (aggregates, num_aggregates)
}

fn tentative_prolongator(aggregates: &[Option<usize>], num_aggregates: usize) -> CsrMatrix<f64> {
    let mut sizes = vec![0usize; num_aggregates];
    for agg in aggregates.iter().flatten() {
        sizes[*agg] += 1;
    }
    let mut coo = CooMatrix::new(aggregates.len(), num_aggregates);
    for (i, agg) in aggregates.iter().enumerate() {
        if let Some(agg) = agg {
            coo.push(i, *agg, 1.0 / (sizes[*agg] as f64).sqrt());
        }
    }
    CsrMatrix::from(&coo)
}

/// `P = (I - omega D^{-1} A) T` with `omega = 4 / (3 rho)`, where `rho` is a Gershgorin bound
/// on the spectral radius of `D^{-1} A`.
fn smooth_prolongator(a: &CsrMatrix<f64>, tentative: &CsrMatrix<f64>) -> CsrMatrix<f64> {
    let diagonal = diagonal_of(a);
    let mut scaled = a.clone();
    let mut rho: f64 = 0.0;
    for (i, mut row) in scaled.row_iter_mut().enumerate() {
        let inv = if diagonal[i] != 0.0 { 1.0 / diagonal[i] } else { 0.0 };
        let values = row.values_mut();
        values.iter_mut().for_each(|v| *v *= inv);
        rho = rho.max(values.iter().map(|v| v.abs()).sum());
    }
    if rho == 0.0 {
        return tentative.clone();
    }
    let omega = 4.0 / (3.0 * rho);
    let mut smoothed = &scaled * tentative;
    smoothed.values_mut().iter_mut().for_each(|v| *v *= omega);
    tentative - &smoothed
}
