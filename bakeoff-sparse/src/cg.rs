use core::fmt;
use nalgebra::base::constraint::AreMultipliable;
use nalgebra::constraint::{DimEq, ShapeConstraint};
use nalgebra::storage::Storage;
use nalgebra::{ClosedAdd, ClosedMul, DVector, DVectorView, DVectorViewMut, Dim, Dyn, Matrix, RealField, Scalar, U1};
use nalgebra_sparse::ops::serial::spmm_csr_dense;
use nalgebra_sparse::ops::Op;
use nalgebra_sparse::CsrMatrix;
use num::{One, Zero};
use std::error::Error;
use std::marker::PhantomData;
use std::ops::{Deref, DerefMut};

pub trait LinearOperator<T: Scalar> {
    fn apply(&self, y: DVectorViewMut<T>, x: DVectorView<T>) -> Result<(), Box<dyn Error>>;
}

impl<'a, T, A> LinearOperator<T> for &'a A
where
    T: Scalar,
    A: ?Sized + LinearOperator<T>,
{
    fn apply(&self, y: DVectorViewMut<T>, x: DVectorView<T>) -> Result<(), Box<dyn Error>> {
        <A as LinearOperator<T>>::apply(self, y, x)
    }
}

impl<T, A> LinearOperator<T> for Box<A>
where
    T: Scalar,
    A: ?Sized + LinearOperator<T>,
{
    fn apply(&self, y: DVectorViewMut<T>, x: DVectorView<T>) -> Result<(), Box<dyn Error>> {
        <A as LinearOperator<T>>::apply(self, y, x)
    }
}

impl<T, R, C, S> LinearOperator<T> for Matrix<T, R, C, S>
where
    T: Scalar + One + Zero + ClosedMul + ClosedAdd,
    R: Dim,
    C: Dim,
    S: Storage<T, R, C>,
    ShapeConstraint: DimEq<Dyn, R> + DimEq<C, Dyn> + AreMultipliable<R, C, Dyn, U1>,
{
    fn apply(&self, mut y: DVectorViewMut<T>, x: DVectorView<T>) -> Result<(), Box<dyn Error>> {
        y.gemv(T::one(), self, &x, T::zero());
        Ok(())
    }
}

impl<T> LinearOperator<T> for CsrMatrix<T>
where
    T: Scalar + Zero + One + ClosedMul + ClosedAdd,
{
    fn apply(&self, mut y: DVectorViewMut<T>, x: DVectorView<T>) -> Result<(), Box<dyn Error>> {
        spmm_csr_dense(T::zero(), &mut y, T::one(), Op::NoOp(self), Op::NoOp(&x));
        Ok(())
    }
}

pub struct IdentityOperator;

impl<T: Scalar> LinearOperator<T> for IdentityOperator {
    fn apply(&self, mut y: DVectorViewMut<T>, x: DVectorView<T>) -> Result<(), Box<dyn Error>> {
        y.copy_from(&x);
        Ok(())
    }
}

/// Inner product used by CG for all reductions.
///
/// Distributed solvers store only a part of each vector locally and must combine the local
/// contributions from all participants.
pub trait InnerProduct<T: Scalar> {
    fn dot(&self, x: DVectorView<T>, y: DVectorView<T>) -> T;
}

impl<'a, T: Scalar, I: ?Sized + InnerProduct<T>> InnerProduct<T> for &'a I {
    fn dot(&self, x: DVectorView<T>, y: DVectorView<T>) -> T {
        <I as InnerProduct<T>>::dot(self, x, y)
    }
}

/// The standard Euclidean inner product of locally stored vectors.
#[derive(Debug, Clone, Copy, Default)]
pub struct EuclideanInnerProduct;

impl<T: RealField> InnerProduct<T> for EuclideanInnerProduct {
    fn dot(&self, x: DVectorView<T>, y: DVectorView<T>) -> T {
        x.dot(&y)
    }
}

pub trait CgStoppingCriterion<T: Scalar> {
    /// Decides convergence from the preconditioned residual norms `(B r, r)`.
    ///
    /// `initial` is the value for the initial residual, `current` the value after `iteration`
    /// updates of the solution.
    fn has_converged(&self, initial: T, current: T, iteration: usize) -> Result<bool, SolveErrorKind>;
}

/// Converged once `(B r, r) <= max(rel_tol^2 (B r_0, r_0), abs_tol^2)`.
#[derive(Debug, Clone)]
pub struct RelativeResidualCriterion<T: Scalar> {
    rel_tol: T,
    abs_tol: T,
}

impl<T: Scalar + Zero> RelativeResidualCriterion<T> {
    pub fn new(rel_tol: T) -> Self {
        Self {
            rel_tol,
            abs_tol: T::zero(),
        }
    }

    pub fn with_absolute_tolerance(self, abs_tol: T) -> Self {
        Self { abs_tol, ..self }
    }
}

impl Default for RelativeResidualCriterion<f64> {
    fn default() -> Self {
        Self::new(1e-8)
    }
}

impl<T> CgStoppingCriterion<T> for RelativeResidualCriterion<T>
where
    T: RealField,
{
    fn has_converged(&self, initial: T, current: T, _iteration: usize) -> Result<bool, SolveErrorKind> {
        let rel = self.rel_tol.clone() * self.rel_tol.clone() * initial;
        let abs = self.abs_tol.clone() * self.abs_tol.clone();
        let threshold = if rel > abs { rel } else { abs };
        Ok(current <= threshold)
    }
}

/// Progress information passed to a CG monitor.
#[derive(Debug, Clone, Copy)]
pub struct CgIteration<T> {
    /// Number of updates made to the solution so far.
    pub iteration: usize,
    /// The preconditioned residual norm `(B r, r)`.
    pub residual: T,
}

#[derive(Debug, Clone)]
#[allow(non_snake_case)]
pub struct CgWorkspace<T: Scalar> {
    r: DVector<T>,
    z: DVector<T>,
    p: DVector<T>,
    Ap: DVector<T>,
}

#[allow(non_snake_case)]
struct Buffers<'a, T: Scalar> {
    r: &'a mut DVector<T>,
    z: &'a mut DVector<T>,
    p: &'a mut DVector<T>,
    Ap: &'a mut DVector<T>,
}

impl<T: Scalar + Zero> Default for CgWorkspace<T> {
    fn default() -> Self {
        Self {
            r: DVector::zeros(0),
            z: DVector::zeros(0),
            p: DVector::zeros(0),
            Ap: DVector::zeros(0),
        }
    }
}

impl<T: Scalar + Zero> CgWorkspace<T> {
    fn prepare_buffers(&mut self, dim: usize) -> Buffers<T> {
        self.r.resize_vertically_mut(dim, T::zero());
        self.z.resize_vertically_mut(dim, T::zero());
        self.p.resize_vertically_mut(dim, T::zero());
        self.Ap.resize_vertically_mut(dim, T::zero());
        Buffers {
            r: &mut self.r,
            z: &mut self.z,
            p: &mut self.p,
            Ap: &mut self.Ap,
        }
    }
}

#[derive(Debug)]
enum OwnedOrMutRef<'a, T> {
    Owned(T),
    MutRef(&'a mut T),
}

impl<'a, T> Deref for OwnedOrMutRef<'a, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        match self {
            Self::Owned(owned) => owned,
            Self::MutRef(mutref) => mutref,
        }
    }
}

impl<'a, T> DerefMut for OwnedOrMutRef<'a, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        match self {
            Self::Owned(owned) => owned,
            Self::MutRef(mutref) => mutref,
        }
    }
}

type Monitor<'a, T> = Box<dyn FnMut(CgIteration<T>) + 'a>;

/// Preconditioned Conjugate-Gradient, configured with a builder.
///
/// ```ignore
/// let mut cg = ConjugateGradient::new()
///     .with_operator(&a)
///     .with_preconditioner(&jacobi)
///     .with_stopping_criterion(RelativeResidualCriterion::new(1e-6))
///     .with_max_iter(1000);
/// cg.solve_with_guess(&b, &mut x)?;
/// ```
pub struct ConjugateGradient<'a, T, A, P, Criterion, I = EuclideanInnerProduct>
where
    T: Scalar,
{
    workspace: OwnedOrMutRef<'a, CgWorkspace<T>>,
    operator: A,
    preconditioner: P,
    stopping_criterion: Criterion,
    inner_product: I,
    max_iter: Option<usize>,
    monitor: Option<Monitor<'a, T>>,
}

impl<'a, T: Scalar + Zero> ConjugateGradient<'a, T, (), IdentityOperator, ()> {
    pub fn new() -> Self {
        Self {
            workspace: OwnedOrMutRef::Owned(CgWorkspace::default()),
            operator: (),
            preconditioner: IdentityOperator,
            stopping_criterion: (),
            inner_product: EuclideanInnerProduct,
            max_iter: None,
            monitor: None,
        }
    }
}

impl<'a, T: Scalar + Zero> Default for ConjugateGradient<'a, T, (), IdentityOperator, ()> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a, T: Scalar> ConjugateGradient<'a, T, (), IdentityOperator, ()> {
    pub fn with_workspace(workspace: &'a mut CgWorkspace<T>) -> Self {
        Self {
            workspace: OwnedOrMutRef::MutRef(workspace),
            operator: (),
            preconditioner: IdentityOperator,
            stopping_criterion: (),
            inner_product: EuclideanInnerProduct,
            max_iter: None,
            monitor: None,
        }
    }
}

impl<'a, T: Scalar, P, Criterion, I> ConjugateGradient<'a, T, (), P, Criterion, I> {
    pub fn with_operator<A>(self, operator: A) -> ConjugateGradient<'a, T, A, P, Criterion, I> {
        ConjugateGradient {
            workspace: self.workspace,
            operator,
            preconditioner: self.preconditioner,
            stopping_criterion: self.stopping_criterion,
            inner_product: self.inner_product,
            max_iter: self.max_iter,
            monitor: self.monitor,
        }
    }
}

impl<'a, T: Scalar, A, P, Criterion, I> ConjugateGradient<'a, T, A, P, Criterion, I> {
    pub fn with_preconditioner<P2>(self, preconditioner: P2) -> ConjugateGradient<'a, T, A, P2, Criterion, I> {
        ConjugateGradient {
            workspace: self.workspace,
            operator: self.operator,
            preconditioner,
            stopping_criterion: self.stopping_criterion,
            inner_product: self.inner_product,
            max_iter: self.max_iter,
            monitor: self.monitor,
        }
    }

    pub fn with_inner_product<I2>(self, inner_product: I2) -> ConjugateGradient<'a, T, A, P, Criterion, I2> {
        ConjugateGradient {
            workspace: self.workspace,
            operator: self.operator,
            preconditioner: self.preconditioner,
            stopping_criterion: self.stopping_criterion,
            inner_product,
            max_iter: self.max_iter,
            monitor: self.monitor,
        }
    }

    pub fn with_max_iter(self, max_iter: usize) -> Self {
        Self {
            max_iter: Some(max_iter),
            ..self
        }
    }

    /// Registers a callback invoked with the initial residual and after every iteration.
    pub fn with_monitor(self, monitor: impl FnMut(CgIteration<T>) + 'a) -> Self {
        Self {
            monitor: Some(Box::new(monitor)),
            ..self
        }
    }
}

impl<'a, T: Scalar, A, P, I> ConjugateGradient<'a, T, A, P, (), I> {
    pub fn with_stopping_criterion<Criterion>(
        self,
        stopping_criterion: Criterion,
    ) -> ConjugateGradient<'a, T, A, P, Criterion, I> {
        ConjugateGradient {
            workspace: self.workspace,
            operator: self.operator,
            preconditioner: self.preconditioner,
            stopping_criterion,
            inner_product: self.inner_product,
            max_iter: self.max_iter,
            monitor: self.monitor,
        }
    }
}

#[derive(Debug)]
#[non_exhaustive]
pub enum SolveErrorKind {
    OperatorError(Box<dyn Error>),
    PreconditionerError(Box<dyn Error>),
    StoppingCriterionError(Box<dyn Error>),
    IndefiniteOperator,
    IndefinitePreconditioner,
    MaxIterationsReached { max_iter: usize },
}

impl fmt::Display for SolveErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OperatorError(err) => {
                write!(f, "Error applying operator: ")?;
                err.fmt(f)
            }
            Self::PreconditionerError(err) => {
                write!(f, "Error applying preconditioner: ")?;
                err.fmt(f)
            }
            Self::StoppingCriterionError(err) => {
                write!(f, "Error evaluating stopping criterion: ")?;
                err.fmt(f)
            }
            Self::IndefiniteOperator => write!(f, "Operator appears to be indefinite"),
            Self::IndefinitePreconditioner => write!(f, "Indefinite preconditioner"),
            Self::MaxIterationsReached { max_iter } => {
                write!(f, "Max iterations ({}) reached.", max_iter)
            }
        }
    }
}

#[non_exhaustive]
#[derive(Debug)]
pub struct SolveError<T> {
    pub output: CgOutput<T>,
    pub kind: SolveErrorKind,
}

impl<T> SolveError<T> {
    fn new(output: CgOutput<T>, kind: SolveErrorKind) -> Self {
        Self { output, kind }
    }
}

impl<T> fmt::Display for SolveError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CG solve failed after {} iterations. ", self.output.num_iterations)?;
        write!(f, "Error: {}", self.kind)
    }
}

impl<T: fmt::Debug> std::error::Error for SolveError<T> {}

/// y = Ax
fn apply_operator<'a, T, A>(
    y: impl Into<DVectorViewMut<'a, T>>,
    a: &'a A,
    x: impl Into<DVectorView<'a, T>>,
) -> Result<(), Box<dyn Error>>
where
    T: Scalar,
    A: LinearOperator<T>,
{
    a.apply(y.into(), x.into())
}

#[non_exhaustive]
#[derive(Debug, Clone)]
pub struct CgOutput<T> {
    /// Number of iterations of the solver.
    ///
    /// Corresponds to the number of updates made to the (initial) solution vector,
    pub num_iterations: usize,
    /// The preconditioned residual norm `(B r, r)` of the initial guess.
    pub initial_residual: T,
    /// The preconditioned residual norm `(B r, r)` after the last iteration.
    pub final_residual: T,
    marker: PhantomData<T>,
}

impl<'a, T, A, P, Criterion, I> ConjugateGradient<'a, T, A, P, Criterion, I>
where
    T: RealField,
    A: LinearOperator<T>,
    P: LinearOperator<T>,
    Criterion: CgStoppingCriterion<T>,
    I: InnerProduct<T>,
{
    /// Solves `Ax = b`, starting from the current contents of `x`.
    ///
    /// Reaching the maximum number of iterations is reported as
    /// [`SolveErrorKind::MaxIterationsReached`], with `x` holding the last iterate.
    pub fn solve_with_guess<'b>(
        &mut self,
        b: impl Into<DVectorView<'b, T>>,
        x: impl Into<DVectorViewMut<'b, T>>,
    ) -> Result<CgOutput<T>, SolveError<T>> {
        self.solve_with_guess_(b.into(), x.into())
    }

    #[allow(non_snake_case)]
    fn solve_with_guess_(&mut self, b: DVectorView<T>, mut x: DVectorViewMut<T>) -> Result<CgOutput<T>, SolveError<T>> {
        use SolveErrorKind::*;
        assert_eq!(b.len(), x.len());

        let mut output = CgOutput {
            num_iterations: 0,
            initial_residual: T::zero(),
            final_residual: T::zero(),
            marker: PhantomData,
        };

        let Buffers { r, z, p, Ap } = self.workspace.prepare_buffers(x.len());

        // r = b - Ax
        if let Err(err) = apply_operator(&mut *r, &self.operator, &x) {
            return Err(SolveError::new(output, OperatorError(err)));
        }
        r.axpy(T::one(), &b, -T::one());

        // z = Pr
        if let Err(err) = apply_operator(&mut *z, &self.preconditioner, &*r) {
            return Err(SolveError::new(output, PreconditionerError(err)));
        }

        // p = z
        p.copy_from(&*z);

        let mut zTr = self.inner_product.dot((&*z).into(), (&*r).into());
        if zTr < T::zero() {
            return Err(SolveError::new(output, IndefinitePreconditioner));
        }
        output.initial_residual = zTr.clone();
        output.final_residual = zTr.clone();
        let initial = zTr.clone();

        if let Some(monitor) = &mut self.monitor {
            monitor(CgIteration {
                iteration: 0,
                residual: zTr.clone(),
            });
        }

        loop {
            let convergence =
                self.stopping_criterion
                    .has_converged(initial.clone(), zTr.clone(), output.num_iterations);
            let has_converged = match convergence {
                Ok(converged) => converged,
                Err(error_kind) => return Err(SolveError::new(output, error_kind)),
            };

            if has_converged {
                break;
            } else if let Some(max_iter) = self.max_iter {
                if output.num_iterations >= max_iter {
                    return Err(SolveError::new(output, MaxIterationsReached { max_iter }));
                }
            }

            // Ap = A * p
            if let Err(err) = apply_operator(&mut *Ap, &self.operator, &*p) {
                return Err(SolveError::new(output, OperatorError(err)));
            }
            let pAp = self.inner_product.dot((&*p).into(), (&*Ap).into());

            if pAp <= T::zero() {
                return Err(SolveError::new(output, IndefiniteOperator));
            }

            let alpha = zTr.clone() / pAp;
            // x <- x + alpha * p
            x.axpy(alpha.clone(), &*p, T::one());
            // r <- r - alpha * Ap
            r.axpy(-alpha, &*Ap, T::one());

            // Number of iterations corresponds to number of updates to the x vector
            output.num_iterations += 1;

            // z <- P r
            if let Err(err) = apply_operator(&mut *z, &self.preconditioner, &*r) {
                return Err(SolveError::new(output, PreconditionerError(err)));
            }
            let zTr_next = self.inner_product.dot((&*z).into(), (&*r).into());
            if zTr_next < T::zero() {
                return Err(SolveError::new(output, IndefinitePreconditioner));
            }
            output.final_residual = zTr_next.clone();

            if let Some(monitor) = &mut self.monitor {
                monitor(CgIteration {
                    iteration: output.num_iterations,
                    residual: zTr_next.clone(),
                });
            }

            let beta = zTr_next.clone() / zTr;

            // p <- z + beta * p
            p.axpy(T::one(), &*z, beta);

            zTr = zTr_next;
        }

        Ok(output)
    }
}
