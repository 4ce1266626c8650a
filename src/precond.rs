//! Preconditioners for the CG solve.
//!
//! Preconditioners are computed from an assembled parallel matrix: the low-order-refined (LOR)
//! or high-order (HO) operator for algebraic multigrid, the diagonal of the HO operator for Jacobi
//! scaling, or a lumped mass matrix.
use crate::assembly::{DomainIntegrator, SparseBilinearForm};
use crate::comm::Communicator;
use crate::error::Error;
use crate::form::PaBilinearForm;
use crate::kernels::Integrator;
use crate::mesh::ParMesh;
use crate::options::BakeoffProblem;
use crate::parmatrix::ParCsrMatrix;
use bakeoff_sparse::amg::SmoothedAggregation;
use bakeoff_sparse::cg::LinearOperator;
use bakeoff_sparse::diagonal::DiagonalScaling;
use eyre::{eyre, WrapErr};
use log::info;
use nalgebra::{DVectorView, DVectorViewMut};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PreconditionerKind {
    None,
    /// AMG on the operator discretized with linear elements on the refined mesh.
    Lor,
    /// AMG on the assembled high-order operator.
    Ho,
    Jacobi,
    LumpedMass,
}

impl PreconditionerKind {
    pub fn name(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Lor => "lor",
            Self::Ho => "ho",
            Self::Jacobi => "jacobi",
            Self::LumpedMass => "lumpedmass",
        }
    }

    /// Whether an assembled bilinear form is needed before the preconditioner matrix is built.
    pub fn needs_assembled_form(self) -> bool {
        matches!(self, Self::Lor | Self::Ho | Self::Jacobi)
    }
}

impl fmt::Display for PreconditionerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for PreconditionerKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(Self::None),
            "lor" => Ok(Self::Lor),
            "ho" => Ok(Self::Ho),
            "jacobi" => Ok(Self::Jacobi),
            "lumpedmass" => Ok(Self::LumpedMass),
            _ => Err(Error::UnknownPreconditioner(s.to_string())),
        }
    }
}

/// Rejects preconditioners the mesh cannot support.
pub fn check_mesh_support(mesh: &ParMesh, kind: PreconditionerKind) -> Result<(), Error> {
    if mesh.is_simplex() && kind == PreconditionerKind::Lor {
        return Err(Error::LorOnSimplex);
    }
    Ok(())
}

/// Assembles the parallel matrix a preconditioner of the given kind is computed from.
///
/// `assembled` must be an empty form on the LOR space for [`PreconditionerKind::Lor`] and on the
/// high-order space for [`PreconditionerKind::Ho`] and [`PreconditionerKind::Jacobi`]. Returns
/// `None` for [`PreconditionerKind::None`]. Collective.
pub fn build_matrix<C: Communicator>(
    comm: &C,
    kind: PreconditionerKind,
    problem: BakeoffProblem,
    operator: &PaBilinearForm,
    assembled: Option<&mut SparseBilinearForm>,
    ess_tdofs: &[usize],
    quadrature_order: usize,
) -> Result<Option<ParCsrMatrix>, Error> {
    match kind {
        PreconditionerKind::None => Ok(None),
        PreconditionerKind::Lor => {
            let form = assembled.ok_or_else(|| eyre!("LOR preconditioner requires a form on the LOR space"))?;
            form.add_domain_integrator(DomainIntegrator::for_problem(problem), 1.0);
            form.use_precomputed_sparsity();
            form.assemble()?;
            form.form_system_matrix(comm, ess_tdofs).map(Some)
        }
        PreconditionerKind::Ho | PreconditionerKind::Jacobi => {
            let form = assembled.ok_or_else(|| eyre!("{kind} preconditioner requires a high-order form"))?;
            form.use_precomputed_sparsity();
            operator.assemble_bilinear_form(form)?;
            form.form_system_matrix(comm, ess_tdofs).map(Some)
        }
        PreconditionerKind::LumpedMass => lumped_mass_matrix(comm, operator, quadrature_order).map(Some),
    }
}

/// Diagonal matrix of the row sums `M 1` of the mass matrix over true dofs.
///
/// For the mass problems the operator itself is lumped. The row sums of the diffusion operator
/// vanish, so the diffusion problems lump a separate unit-coefficient mass form.
pub fn lumped_mass_matrix<C: Communicator>(
    comm: &C,
    operator: &PaBilinearForm,
    quadrature_order: usize,
) -> Result<ParCsrMatrix, Error> {
    let space = operator.space();
    let auxiliary;
    let mass = match operator.integrator() {
        Integrator::Mass => operator,
        Integrator::Diffusion => {
            let mut form = PaBilinearForm::new(space, Integrator::Mass, 1.0, quadrature_order)?;
            form.assemble()?;
            auxiliary = form;
            &auxiliary
        }
    };

    let ones = vec![1.0; space.vsize()];
    let mut row_sums = vec![0.0; space.vsize()];
    mass.mult(&ones, &mut row_sums);
    let mut lumped = vec![0.0; space.true_vsize()];
    space.assemble(comm, &row_sums, &mut lumped);

    let starts = space.true_offsets().to_vec();
    let first = starts[comm.rank()];
    let n = lumped.len();
    ParCsrMatrix::from_csr(
        comm,
        starts.clone(),
        starts,
        (0..=n).collect(),
        (first..first + n).collect(),
        lumped,
    )
}

/// A preconditioner applied to true-dof vectors.
///
/// Multigrid acts on the diagonal block of the rank's rows, i.e. it is combined across ranks as
/// a block-Jacobi method.
#[derive(Debug)]
pub enum Preconditioner {
    Identity,
    Amg(SmoothedAggregation),
    Diagonal(DiagonalScaling),
}

impl Preconditioner {
    pub fn new(kind: PreconditionerKind, matrix: Option<&ParCsrMatrix>) -> Result<Self, Error> {
        let require_matrix = || matrix.ok_or_else(|| eyre!("{kind} preconditioner requires an assembled matrix"));
        match kind {
            PreconditionerKind::None => Ok(Self::Identity),
            PreconditionerKind::Lor | PreconditionerKind::Ho => {
                let block = require_matrix()?.diagonal_block();
                let amg = SmoothedAggregation::new(&block).wrap_err("failed to build algebraic multigrid")?;
                info!(
                    "AMG hierarchy: {} levels, operator complexity {:.3}",
                    amg.num_levels(),
                    amg.operator_complexity()
                );
                Ok(Self::Amg(amg))
            }
            PreconditionerKind::Jacobi | PreconditionerKind::LumpedMass => {
                let diagonal = require_matrix()?.diagonal();
                let scaling = DiagonalScaling::from_diagonal(&diagonal).wrap_err("failed to build diagonal scaling")?;
                Ok(Self::Diagonal(scaling))
            }
        }
    }
}

impl LinearOperator<f64> for Preconditioner {
    fn apply(&self, y: DVectorViewMut<f64>, x: DVectorView<f64>) -> Result<(), Box<dyn std::error::Error>> {
        match self {
            Self::Identity => {
                let mut y = y;
                y.copy_from(&x);
                Ok(())
            }
            Self::Amg(amg) => amg.apply(y, x),
            Self::Diagonal(scaling) => scaling.apply(y, x),
        }
    }
}
