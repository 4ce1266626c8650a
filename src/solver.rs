//! Distributed preconditioned CG for the constrained system.
use crate::comm::{Communicator, ReduceOp};
use crate::error::Error;
use crate::report::{SolveReport, G};
use bakeoff_sparse::cg::{
    CgIteration, ConjugateGradient, InnerProduct, LinearOperator, RelativeResidualCriterion, SolveError,
    SolveErrorKind,
};
use eyre::eyre;
use log::warn;
use nalgebra::{DVector, DVectorView};

/// Inner product of vectors distributed over ranks: the sum of the local dot products.
#[derive(Debug)]
pub struct DistributedInnerProduct<'c, C> {
    comm: &'c C,
}

impl<'c, C> DistributedInnerProduct<'c, C> {
    pub fn new(comm: &'c C) -> Self {
        Self { comm }
    }
}

impl<C: Communicator> InnerProduct<f64> for DistributedInnerProduct<'_, C> {
    fn dot(&self, x: DVectorView<f64>, y: DVectorView<f64>) -> f64 {
        self.comm.all_reduce_scalar(x.dot(&y), ReduceOp::Sum)
    }
}

#[derive(Debug, Clone)]
pub struct CgSettings {
    pub rel_tol: f64,
    pub abs_tol: f64,
    pub max_iter: usize,
    /// 1 prints `(B r, r)` for every iteration, 3 only the first and the last, 0 only the final
    /// statistics. Negative values print nothing.
    pub print_level: i32,
}

impl Default for CgSettings {
    fn default() -> Self {
        Self {
            rel_tol: 1e-6,
            abs_tol: 0.0,
            max_iter: 1000,
            print_level: 1,
        }
    }
}

/// Solves `A x = b` with `x` as the initial guess. Collective.
///
/// Exhausting the iteration budget is not an error: the report is returned with `converged`
/// unset and `x` holding the last iterate.
pub fn solve<C, A, P>(
    comm: &C,
    operator: &A,
    preconditioner: &P,
    b: &DVector<f64>,
    x: &mut DVector<f64>,
    settings: &CgSettings,
) -> Result<SolveReport, Error>
where
    C: Communicator,
    A: LinearOperator<f64>,
    P: LinearOperator<f64>,
{
    let is_root = comm.is_root();
    let print_level = if is_root { settings.print_level } else { -1 };
    let monitor = move |progress: CgIteration<f64>| match print_level {
        1 => println!("   Iteration : {:>3}  (B r, r) = {}", progress.iteration, G(progress.residual)),
        3 if progress.iteration == 0 => {
            println!("   Iteration : {:>3}  (B r, r) = {} ...", progress.iteration, G(progress.residual))
        }
        _ => {}
    };

    let result = ConjugateGradient::new()
        .with_operator(operator)
        .with_preconditioner(preconditioner)
        .with_inner_product(DistributedInnerProduct::new(comm))
        .with_stopping_criterion(RelativeResidualCriterion::new(settings.rel_tol).with_absolute_tolerance(settings.abs_tol))
        .with_max_iter(settings.max_iter)
        .with_monitor(monitor)
        .solve_with_guess(b, x);

    let (output, converged) = match result {
        Ok(output) => (output, true),
        Err(SolveError {
            output,
            kind: SolveErrorKind::MaxIterationsReached { .. },
            ..
        }) => (output, false),
        Err(err) => return Err(eyre!("CG solve failed: {err}").into()),
    };

    let report = SolveReport {
        iterations: output.num_iterations,
        converged,
        initial_residual: output.initial_residual,
        final_residual: output.final_residual,
    };
    if !converged && settings.print_level >= 0 {
        warn!("CG did not converge within {} iterations", settings.max_iter);
    }
    if is_root && settings.print_level >= 0 {
        if !converged {
            println!("PCG: No convergence!");
        }
        if settings.print_level >= 1 && report.iterations > 0 && report.initial_residual > 0.0 {
            let factor = (report.final_residual / report.initial_residual).powf(0.5 / report.iterations as f64);
            println!("Average reduction factor = {}", G(factor));
        }
        if settings.print_level == 3 {
            println!("   Iteration : {:>3}  (B r, r) = {}", report.iterations, G(report.final_residual));
        }
    }
    Ok(report)
}
