//! Partially assembled bilinear forms and domain load vectors.
//!
//! Only quadrature data is stored. The operator is applied element by element with
//! sum-factorized kernels, and the element results are summed into the local vector.
use crate::assembly::SparseBilinearForm;
use crate::basis::ElementBasis;
use crate::comm::Communicator;
use crate::error::Error;
use crate::kernels::{apply_element, element_load, element_matrix, setup_element_qdata, Integrator, KernelScratch};
use crate::space::H1Space;
use bakeoff_sparse::cg::LinearOperator;
use eyre::{eyre, WrapErr};
use log::debug;
use nalgebra::{DVector, DVectorView, DVectorViewMut};
use rayon::prelude::*;
use std::cell::RefCell;

#[derive(Debug)]
pub struct PaBilinearForm<'a> {
    space: &'a H1Space<'a>,
    integrator: Integrator,
    coefficient: f64,
    basis: ElementBasis,
    qdata: Vec<f64>,
}

impl<'a> PaBilinearForm<'a> {
    /// A form with a constant coefficient, integrated exactly for polynomials of degree
    /// `quadrature_order`.
    pub fn new(
        space: &'a H1Space<'a>,
        integrator: Integrator,
        coefficient: f64,
        quadrature_order: usize,
    ) -> Result<Self, Error> {
        Ok(Self {
            space,
            integrator,
            coefficient,
            basis: ElementBasis::new(space.mesh().element_type(), space.order(), quadrature_order)?,
            qdata: Vec::new(),
        })
    }

    pub fn space(&self) -> &'a H1Space<'a> {
        self.space
    }

    pub fn integrator(&self) -> Integrator {
        self.integrator
    }

    pub fn basis(&self) -> &ElementBasis {
        &self.basis
    }

    /// Quadrature points per element.
    pub fn num_quadrature_points(&self) -> usize {
        self.basis.qpoints_per_element()
    }

    pub fn is_assembled(&self) -> bool {
        !self.qdata.is_empty() || self.space.mesh().num_elements() == 0
    }

    fn qdata_per_element(&self) -> usize {
        self.basis.qpoints_per_element() * self.integrator.qdata_size()
    }

    /// Computes the quadrature data of all elements.
    pub fn assemble(&mut self) -> Result<(), Error> {
        let mesh = self.space.mesh();
        let size = self.qdata_per_element();
        let mut qdata = vec![0.0; mesh.num_elements() * size];
        let basis = &self.basis;
        let integrator = self.integrator;
        let coefficient = self.coefficient;
        qdata
            .par_chunks_mut(size)
            .enumerate()
            .try_for_each(|(e, chunk)| {
                setup_element_qdata(basis, mesh, e, integrator, coefficient, chunk)
                    .wrap_err_with(|| format!("failed to set up quadrature data of element {e}"))
            })?;
        debug!(
            "{:?} quadrature data: {} elements, {} points per element",
            integrator,
            mesh.num_elements(),
            basis.qpoints_per_element()
        );
        self.qdata = qdata;
        Ok(())
    }

    /// Computes `y = A x` for local vectors `x` and `y`.
    pub fn mult(&self, x: &[f64], y: &mut [f64]) {
        assert!(self.is_assembled(), "form must be assembled before it is applied");
        let space = self.space;
        let vdim = space.vdim();
        assert_eq!(x.len(), space.vsize());
        assert_eq!(y.len(), space.vsize());

        let nd = self.basis.dofs_per_element();
        let size = self.qdata_per_element();
        let num_elements = space.mesh().num_elements();
        let mut element_values = vec![0.0; num_elements * vdim * nd];
        element_values.par_chunks_mut(vdim * nd).enumerate().for_each_init(
            || (KernelScratch::default(), vec![0; nd], vec![0.0; nd]),
            |(scratch, nodes, u), (e, out)| {
                space.element_nodes(e, nodes);
                let qdata = &self.qdata[e * size..(e + 1) * size];
                for c in 0..vdim {
                    for (ua, &node) in u.iter_mut().zip(nodes.iter()) {
                        *ua = x[node * vdim + c];
                    }
                    apply_element(&self.basis, self.integrator, qdata, u, &mut out[c * nd..(c + 1) * nd], scratch);
                }
            },
        );

        y.fill(0.0);
        let mut nodes = vec![0; nd];
        for (e, values) in element_values.chunks_exact(vdim * nd).enumerate() {
            space.element_nodes(e, &mut nodes);
            for c in 0..vdim {
                for (&node, value) in nodes.iter().zip(&values[c * nd..(c + 1) * nd]) {
                    y[node * vdim + c] += value;
                }
            }
        }
    }

    /// Sets up the constrained system `A X = B` over true dofs.
    ///
    /// `x` and `b` are local vectors. The essential entries of `X` are taken from `x`, and their
    /// contribution is eliminated from `B`.
    pub fn form_linear_system<'f, C: Communicator>(
        &'f self,
        comm: &'f C,
        ess_tdofs: &'f [usize],
        x: &[f64],
        b: &[f64],
    ) -> LinearSystem<'f, C> {
        let space = self.space;
        let n = space.true_vsize();
        let operator = ConstrainedOperator::new(self, comm, ess_tdofs);

        let mut x_true = DVector::zeros(n);
        space.restrict(x, x_true.as_mut_slice());
        let mut b_true = DVector::zeros(n);
        space.assemble(comm, b, b_true.as_mut_slice());

        let mut essential_values = DVector::zeros(n);
        for &i in ess_tdofs {
            essential_values[i] = x_true[i];
        }
        let mut eliminated = DVector::zeros(n);
        operator.apply_unconstrained(essential_values.as_slice(), eliminated.as_mut_slice());
        b_true -= eliminated;
        for &i in ess_tdofs {
            b_true[i] = x_true[i];
        }

        LinearSystem {
            operator,
            x: x_true,
            b: b_true,
        }
    }

    /// Computes the local solution vector `x = P X`.
    pub fn recover_fem_solution<C: Communicator>(&self, comm: &C, x_true: &DVector<f64>, x: &mut [f64]) {
        self.space.prolongate(comm, x_true.as_slice(), x);
    }

    /// Adds the element matrices of this form to an assembled form on the same space.
    pub fn assemble_bilinear_form(&self, target: &mut SparseBilinearForm) -> Result<(), Error> {
        assert!(self.is_assembled(), "form must be assembled before its element matrices are formed");
        if !std::ptr::eq(target.space(), self.space) {
            return Err(eyre!("target form is defined on a different space").into());
        }
        let tables = self.basis.tabulate();
        let size = self.qdata_per_element();
        for e in 0..self.space.mesh().num_elements() {
            let matrix = element_matrix(&tables, self.integrator, &self.qdata[e * size..(e + 1) * size]);
            target.add_element_matrix(e, &matrix)?;
        }
        target.finalize();
        Ok(())
    }
}

/// Assembles the local load vector `b_i = (c, phi_i)` of a constant coefficient `c`.
///
/// Every component of a vector-valued space receives the same load. The result is a local vector,
/// so shared nodes hold partial sums until it is assembled with `P^T`.
pub fn assemble_domain_load(space: &H1Space, coefficient: f64, quadrature_order: usize) -> Result<DVector<f64>, Error> {
    let mesh = space.mesh();
    let basis = ElementBasis::new(mesh.element_type(), space.order(), quadrature_order)?;
    let tables = basis.tabulate();
    let nd = basis.dofs_per_element();
    let vdim = space.vdim();
    let mut qdata = vec![0.0; basis.qpoints_per_element()];
    let mut load = vec![0.0; nd];
    let mut nodes = vec![0; nd];
    let mut b = DVector::zeros(space.vsize());
    for e in 0..mesh.num_elements() {
        setup_element_qdata(&basis, mesh, e, Integrator::Mass, coefficient, &mut qdata)
            .wrap_err_with(|| format!("failed to integrate the load of element {e}"))?;
        element_load(&tables, &qdata, &mut load);
        space.element_nodes(e, &mut nodes);
        for (&node, value) in nodes.iter().zip(&load) {
            for c in 0..vdim {
                b[node * vdim + c] += value;
            }
        }
    }
    Ok(b)
}

/// The constrained linear system produced by [`PaBilinearForm::form_linear_system`].
pub struct LinearSystem<'f, C> {
    pub operator: ConstrainedOperator<'f, C>,
    /// Initial guess over true dofs.
    pub x: DVector<f64>,
    /// Right-hand side over true dofs.
    pub b: DVector<f64>,
}

#[derive(Debug)]
struct OperatorWork {
    masked: Vec<f64>,
    x_local: Vec<f64>,
    y_local: Vec<f64>,
}

/// The true-dof operator `P^T A P` with essential rows and columns replaced by the identity.
pub struct ConstrainedOperator<'f, C> {
    form: &'f PaBilinearForm<'f>,
    comm: &'f C,
    ess_tdofs: &'f [usize],
    work: RefCell<OperatorWork>,
}

impl<'f, C: Communicator> ConstrainedOperator<'f, C> {
    pub fn new(form: &'f PaBilinearForm<'f>, comm: &'f C, ess_tdofs: &'f [usize]) -> Self {
        let space = form.space();
        Self {
            form,
            comm,
            ess_tdofs,
            work: RefCell::new(OperatorWork {
                masked: vec![0.0; space.true_vsize()],
                x_local: vec![0.0; space.vsize()],
                y_local: vec![0.0; space.vsize()],
            }),
        }
    }

    pub fn num_rows(&self) -> usize {
        self.form.space().true_vsize()
    }

    pub fn essential_true_dofs(&self) -> &[usize] {
        self.ess_tdofs
    }

    pub fn comm(&self) -> &'f C {
        self.comm
    }

    /// `y = P^T A P x` without constraints.
    fn apply_unconstrained(&self, x: &[f64], y: &mut [f64]) {
        let space = self.form.space();
        let mut work = self.work.borrow_mut();
        let OperatorWork { x_local, y_local, .. } = &mut *work;
        space.prolongate(self.comm, x, x_local);
        self.form.mult(x_local, y_local);
        space.assemble(self.comm, y_local, y);
    }
}

impl<C: Communicator> LinearOperator<f64> for ConstrainedOperator<'_, C> {
    fn apply(&self, mut y: DVectorViewMut<f64>, x: DVectorView<f64>) -> Result<(), Box<dyn std::error::Error>> {
        let mut masked = std::mem::take(&mut self.work.borrow_mut().masked);
        masked.copy_from_slice(x.as_slice());
        for &i in self.ess_tdofs {
            masked[i] = 0.0;
        }
        self.apply_unconstrained(&masked, y.as_mut_slice());
        self.work.borrow_mut().masked = masked;
        for &i in self.ess_tdofs {
            y[i] = x[i];
        }
        Ok(())
    }
}
