//! Assembled sparse bilinear forms and their parallel system matrices.
use crate::basis::ElementBasis;
use crate::comm::Communicator;
use crate::error::Error;
use crate::kernels::{element_matrix, setup_element_qdata, Integrator};
use crate::options::BakeoffProblem;
use crate::parmatrix::ParCsrMatrix;
use crate::space::H1Space;
use bytemuck::{Pod, Zeroable};
use eyre::eyre;
use itertools::Itertools;
use nalgebra::DMatrix;
use nalgebra_sparse::pattern::SparsityPattern;
use nalgebra_sparse::{CooMatrix, CsrMatrix};
use std::collections::BTreeSet;

/// Standard domain integrators for assembled forms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DomainIntegrator {
    Mass,
    VectorMass,
    Diffusion,
    VectorDiffusion,
}

impl DomainIntegrator {
    /// The integrator of the operator of a bake-off problem.
    pub fn for_problem(problem: BakeoffProblem) -> Self {
        match problem {
            BakeoffProblem::Bp1 => Self::Mass,
            BakeoffProblem::Bp2 => Self::VectorMass,
            BakeoffProblem::Bp3 => Self::Diffusion,
            BakeoffProblem::Bp4 => Self::VectorDiffusion,
        }
    }

    pub fn kernel(self) -> Integrator {
        match self {
            Self::Mass | Self::VectorMass => Integrator::Mass,
            Self::Diffusion | Self::VectorDiffusion => Integrator::Diffusion,
        }
    }

    /// Number of field components the integrator acts on.
    pub fn vdim(self) -> usize {
        match self {
            Self::Mass | Self::Diffusion => 1,
            Self::VectorMass | Self::VectorDiffusion => 3,
        }
    }
}

#[derive(Debug)]
enum Storage {
    Empty,
    Coo(CooMatrix<f64>),
    Csr(CsrMatrix<f64>),
}

/// A bilinear form assembled into a sparse matrix over the local dofs of a space.
///
/// Element matrices are per component: vector-valued spaces receive the same element matrix in
/// every component block.
#[derive(Debug)]
pub struct SparseBilinearForm<'a> {
    space: &'a H1Space<'a>,
    integrators: Vec<(DomainIntegrator, f64)>,
    precomputed_sparsity: bool,
    storage: Storage,
}

impl<'a> SparseBilinearForm<'a> {
    pub fn new(space: &'a H1Space<'a>) -> Self {
        Self {
            space,
            integrators: Vec::new(),
            precomputed_sparsity: false,
            storage: Storage::Empty,
        }
    }

    pub fn space(&self) -> &'a H1Space<'a> {
        self.space
    }

    pub fn add_domain_integrator(&mut self, integrator: DomainIntegrator, coefficient: f64) {
        self.integrators.push((integrator, coefficient));
    }

    /// Computes the sparsity pattern from the element connectivity before any values are added.
    pub fn use_precomputed_sparsity(&mut self) {
        self.precomputed_sparsity = true;
    }

    fn element_pattern(&self) -> SparsityPattern {
        // Each entry is stored exactly once, independently of the number of elements sharing it
        let space = self.space;
        let vdim = space.vdim();
        let mut entries = BTreeSet::new();
        let mut nodes = vec![0; space.dofs_per_element()];
        for e in 0..space.mesh().num_elements() {
            space.element_nodes(e, &mut nodes);
            for &node_i in &nodes {
                for &node_j in &nodes {
                    for c in 0..vdim {
                        entries.insert((vdim * node_i + c, vdim * node_j + c));
                    }
                }
            }
        }

        let num_rows = space.vsize();
        let mut offsets = Vec::with_capacity(num_rows + 1);
        let mut column_indices = Vec::with_capacity(entries.len());
        offsets.push(0);
        for (i, j) in entries {
            while i + 1 > offsets.len() {
                offsets.push(column_indices.len());
            }
            column_indices.push(j);
        }
        while offsets.len() < num_rows + 1 {
            offsets.push(column_indices.len());
        }
        SparsityPattern::try_from_offsets_and_indices(num_rows, num_rows, offsets, column_indices)
            .unwrap_or_else(|_| SparsityPattern::zeros(num_rows, num_rows))
    }

    fn prepare_storage(&mut self) {
        if !matches!(self.storage, Storage::Empty) {
            return;
        }
        let n = self.space.vsize();
        self.storage = if self.precomputed_sparsity {
            let pattern = self.element_pattern();
            let nnz = pattern.nnz();
            match CsrMatrix::try_from_pattern_and_values(pattern, vec![0.0; nnz]) {
                Ok(matrix) => Storage::Csr(matrix),
                Err(_) => Storage::Coo(CooMatrix::new(n, n)),
            }
        } else {
            Storage::Coo(CooMatrix::new(n, n))
        };
    }

    /// Adds the scalar element matrix of element `e` to every component block.
    pub fn add_element_matrix(&mut self, e: usize, element_matrix: &DMatrix<f64>) -> Result<(), Error> {
        self.prepare_storage();
        let space = self.space;
        let vdim = space.vdim();
        let mut nodes = vec![0; space.dofs_per_element()];
        if element_matrix.nrows() != nodes.len() || element_matrix.ncols() != nodes.len() {
            return Err(eyre!(
                "element matrix has dimensions {}x{}, expected {}x{}",
                element_matrix.nrows(),
                element_matrix.ncols(),
                nodes.len(),
                nodes.len()
            )
            .into());
        }
        space.element_nodes(e, &mut nodes);

        match &mut self.storage {
            Storage::Coo(coo) => {
                for (a, &node_a) in nodes.iter().enumerate() {
                    for (b, &node_b) in nodes.iter().enumerate() {
                        for c in 0..vdim {
                            coo.push(vdim * node_a + c, vdim * node_b + c, element_matrix[(a, b)]);
                        }
                    }
                }
            }
            Storage::Csr(csr) => {
                let mut permutation: Vec<usize> = (0..nodes.len()).collect();
                permutation.sort_unstable_by_key(|&a| nodes[a]);
                for (a, &node_a) in nodes.iter().enumerate() {
                    for c in 0..vdim {
                        let mut row = csr.row_mut(vdim * node_a + c);
                        let (columns, values) = row.cols_and_values_mut();
                        let mut column_iter = columns.iter().copied().enumerate();
                        for &b in &permutation {
                            let column = vdim * nodes[b] + c;
                            let (k, _) = column_iter
                                .find(|&(_, col)| col == column)
                                .ok_or_else(|| eyre!("entry ({}, {column}) missing from sparsity pattern", vdim * node_a + c))?;
                            values[k] += element_matrix[(a, b)];
                        }
                    }
                }
            }
            Storage::Empty => unreachable!("storage is prepared above"),
        }
        Ok(())
    }

    /// Converts staged entries into the final matrix.
    pub fn finalize(&mut self) {
        if let Storage::Coo(coo) = &self.storage {
            self.storage = Storage::Csr(CsrMatrix::from(coo));
        }
    }

    /// Assembles all domain integrators.
    ///
    /// Uses a rule integrating polynomials of degree `2 order + 1` exactly.
    pub fn assemble(&mut self) -> Result<(), Error> {
        let space = self.space;
        let mesh = space.mesh();
        if let Some((integrator, _)) = self
            .integrators
            .iter()
            .find(|(integrator, _)| integrator.vdim() != space.vdim())
        {
            return Err(eyre!(
                "{integrator:?} integrator acts on {} components, but the space has {}",
                integrator.vdim(),
                space.vdim()
            )
            .into());
        }

        let basis = ElementBasis::new(mesh.element_type(), space.order(), 2 * space.order() + 1)?;
        let tables = basis.tabulate();
        let nd = basis.dofs_per_element();
        let mut qdata = Vec::new();
        let integrators = self.integrators.clone();
        self.prepare_storage();
        for e in 0..mesh.num_elements() {
            let mut matrix = DMatrix::zeros(nd, nd);
            for &(integrator, coefficient) in &integrators {
                let kernel = integrator.kernel();
                qdata.resize(basis.qpoints_per_element() * kernel.qdata_size(), 0.0);
                setup_element_qdata(&basis, mesh, e, kernel, coefficient, &mut qdata)?;
                matrix += element_matrix(&tables, kernel, &qdata);
            }
            self.add_element_matrix(e, &matrix)?;
        }
        self.finalize();
        Ok(())
    }

    /// The assembled matrix over local dofs, if available.
    pub fn local_matrix(&self) -> Option<&CsrMatrix<f64>> {
        match &self.storage {
            Storage::Csr(matrix) => Some(matrix),
            _ => None,
        }
    }

    /// Forms the parallel matrix `P^T A P` over true dofs with essential rows and columns
    /// eliminated and a unit diagonal at essential dofs. Collective.
    pub fn form_system_matrix<C: Communicator>(&self, comm: &C, ess_tdofs: &[usize]) -> Result<ParCsrMatrix, Error> {
        let matrix = self
            .local_matrix()
            .ok_or_else(|| eyre!("bilinear form must be assembled before forming the system matrix"))?;
        let space = self.space;
        let rank = comm.rank();
        let essential = space.essential_local_mask(comm, ess_tdofs);
        let starts = space.true_offsets().to_vec();
        let first = starts[rank];
        let num_owned = starts[rank + 1] - first;

        let mut rows: Vec<Vec<(usize, f64)>> = vec![Vec::new(); num_owned];
        let mut outgoing: Vec<Vec<Triplet>> = vec![Vec::new(); comm.size()];
        for (i, row) in matrix.row_iter().enumerate() {
            if essential[i] {
                continue;
            }
            let gi = space.global_true_dof(i);
            let owner = space.true_dof_owner(gi);
            for (&j, &value) in row.col_indices().iter().zip(row.values()) {
                if essential[j] {
                    continue;
                }
                let gj = space.global_true_dof(j);
                if owner == rank {
                    rows[gi - first].push((gj, value));
                } else {
                    outgoing[owner].push(Triplet {
                        row: gi as u64,
                        col: gj as u64,
                        value,
                    });
                }
            }
        }

        // Ghost rows go to the owners of the ghost nodes; owned rows shared by neighbors arrive from
        // the ranks holding them as ghosts.
        let (destinations, sources) = space.exchange_partners();
        let sends: Vec<(usize, Vec<Triplet>)> = destinations
            .iter()
            .map(|&q| (q, std::mem::take(&mut outgoing[q])))
            .collect();
        if outgoing.iter().any(|triplets| !triplets.is_empty()) {
            return Err(eyre!("rank {rank} holds matrix rows of a rank that is not a neighbor").into());
        }
        for triplets in comm.exchange(&sends, &sources) {
            for Triplet { row, col, value } in triplets {
                let row = row as usize;
                if !(first..first + num_owned).contains(&row) {
                    return Err(eyre!("rank {rank} received row {row} outside its range").into());
                }
                rows[row - first].push((col as usize, value));
            }
        }

        for &i in ess_tdofs {
            rows[i].push((first + i, 1.0));
        }

        let mut offsets = Vec::with_capacity(num_owned + 1);
        let mut col_indices = Vec::new();
        let mut values = Vec::new();
        offsets.push(0);
        for mut row in rows {
            row.sort_unstable_by_key(|&(col, _)| col);
            let merged = row.into_iter().coalesce(|(c1, v1), (c2, v2)| {
                if c1 == c2 {
                    Ok((c1, v1 + v2))
                } else {
                    Err(((c1, v1), (c2, v2)))
                }
            });
            for (col, value) in merged {
                col_indices.push(col);
                values.push(value);
            }
            offsets.push(col_indices.len());
        }

        ParCsrMatrix::from_csr(comm, starts.clone(), starts, offsets, col_indices, values)
    }
}

/// A matrix entry sent to the owner of its row.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct Triplet {
    row: u64,
    col: u64,
    value: f64,
}
