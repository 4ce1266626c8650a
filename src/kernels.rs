//! Element kernels for the mass and diffusion operators.
//!
//! On hexahedra the operators are applied matrix-free with sum factorization: the action of a
//! three-dimensional tensor-product table is computed as three successive one-dimensional
//! contractions. Tetrahedra are affine, and their kernels use dense tables. Geometric factors and
//! coefficients are precomputed per quadrature point ("quadrature data").
use crate::basis::{BasisTables, ElementBasis, SimplexBasis, TensorBasis};
use crate::mesh::{ParMesh, HEX_CORNERS};
use eyre::eyre;
use nalgebra::{DMatrix, DVectorView, DVectorViewMut, Matrix3, Point3};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Integrator {
    /// `(c u, v)`
    Mass,
    /// `(c grad u, grad v)`
    Diffusion,
}

impl Integrator {
    /// Number of quadrature data entries per quadrature point.
    pub fn qdata_size(self) -> usize {
        match self {
            Integrator::Mass => 1,
            // Upper triangle of a symmetric 3x3 matrix
            Integrator::Diffusion => 6,
        }
    }
}

/// Jacobian of the trilinear map from `[0, 1]^3` onto the hexahedron with the given vertices.
pub fn hex_jacobian(vertices: &[Point3<f64>; 8], xi: [f64; 3]) -> Matrix3<f64> {
    let mut jacobian = Matrix3::zeros();
    for (corner, vertex) in HEX_CORNERS.iter().zip(vertices) {
        let factors = [0, 1, 2].map(|d| if corner[d] == 1 { xi[d] } else { 1.0 - xi[d] });
        let signs = corner.map(|c| if c == 1 { 1.0 } else { -1.0 });
        for d in 0..3 {
            let mut derivative = signs[d];
            for e in (0..3).filter(|&e| e != d) {
                derivative *= factors[e];
            }
            for r in 0..3 {
                jacobian[(r, d)] += vertex[r] * derivative;
            }
        }
    }
    jacobian
}

/// Jacobian of the affine map from the reference tetrahedron onto the given one.
pub fn tet_jacobian(vertices: &[Point3<f64>; 4]) -> Matrix3<f64> {
    let [v0, v1, v2, v3] = vertices;
    Matrix3::from_columns(&[v1 - v0, v2 - v0, v3 - v0])
}

/// Quadrature data of quadrature point `q` with weight `scale` (coefficient times rule weight).
fn qdata_at(
    integrator: Integrator,
    scale: f64,
    jacobian: &Matrix3<f64>,
    q: usize,
    out: &mut [f64],
) -> eyre::Result<()> {
    let det = jacobian.determinant();
    if det <= 0.0 {
        return Err(eyre!("non-positive Jacobian determinant {det} at quadrature point {q}"));
    }
    let scale = scale * det;
    match integrator {
        Integrator::Mass => out[0] = scale,
        Integrator::Diffusion => {
            let inverse = jacobian
                .try_inverse()
                .ok_or_else(|| eyre!("singular Jacobian at quadrature point {q}"))?;
            let d = (inverse * inverse.transpose()) * scale;
            out.copy_from_slice(&[d[(0, 0)], d[(0, 1)], d[(0, 2)], d[(1, 1)], d[(1, 2)], d[(2, 2)]]);
        }
    }
    Ok(())
}

/// Computes the quadrature data of one hexahedron.
///
/// For the mass integrator this is `c w det(J)`, for diffusion the upper triangle of
/// `c w det(J) J^{-1} J^{-T}` in the order `(00, 01, 02, 11, 12, 22)`.
pub fn setup_qdata(
    basis: &TensorBasis,
    integrator: Integrator,
    coefficient: f64,
    vertices: &[Point3<f64>; 8],
    qdata: &mut [f64],
) -> eyre::Result<()> {
    let nq = basis.num_qpoints_1d();
    let size = integrator.qdata_size();
    assert_eq!(qdata.len(), nq * nq * nq * size);
    let points = basis.qpoints();
    let weights = basis.qweights();

    for qz in 0..nq {
        for qy in 0..nq {
            for qx in 0..nq {
                let q = qx + nq * (qy + nq * qz);
                let jacobian = hex_jacobian(vertices, [points[qx], points[qy], points[qz]]);
                let scale = coefficient * weights[qx] * weights[qy] * weights[qz];
                qdata_at(integrator, scale, &jacobian, q, &mut qdata[q * size..(q + 1) * size])?;
            }
        }
    }
    Ok(())
}

/// Computes the quadrature data of one tetrahedron, in the layout of [`setup_qdata`].
pub fn setup_simplex_qdata(
    basis: &SimplexBasis,
    integrator: Integrator,
    coefficient: f64,
    vertices: &[Point3<f64>; 4],
    qdata: &mut [f64],
) -> eyre::Result<()> {
    let size = integrator.qdata_size();
    assert_eq!(qdata.len(), basis.qpoints_per_element() * size);
    let jacobian = tet_jacobian(vertices);
    for (q, (weight, out)) in basis.qweights().iter().zip(qdata.chunks_exact_mut(size)).enumerate() {
        qdata_at(integrator, coefficient * weight, &jacobian, q, out)?;
    }
    Ok(())
}

/// Computes the quadrature data of element `e` of `mesh`.
pub fn setup_element_qdata(
    basis: &ElementBasis,
    mesh: &ParMesh,
    e: usize,
    integrator: Integrator,
    coefficient: f64,
    qdata: &mut [f64],
) -> eyre::Result<()> {
    match basis {
        ElementBasis::Tensor(basis) => setup_qdata(basis, integrator, coefficient, &mesh.element_vertices(e), qdata),
        ElementBasis::Simplex(basis) => {
            setup_simplex_qdata(basis, integrator, coefficient, &mesh.tet_vertices(e), qdata)
        }
    }
}

/// Applies a one-dimensional table along `axis` of a tensor with dimensions `dims`.
///
/// `table` has `rows x cols` entries, row-major. Without `transpose` the table maps `cols` values
/// to `rows` values, with `transpose` the other way around. Returns the dimensions of `output`.
#[allow(clippy::too_many_arguments)]
fn contract(
    table: &[f64],
    rows: usize,
    cols: usize,
    transpose: bool,
    input: &[f64],
    dims: [usize; 3],
    axis: usize,
    output: &mut Vec<f64>,
) -> [usize; 3] {
    let (n_in, n_out) = if transpose { (rows, cols) } else { (cols, rows) };
    debug_assert_eq!(dims[axis], n_in);
    let mut out_dims = dims;
    out_dims[axis] = n_out;
    let stride = [1, dims[0], dims[0] * dims[1]][axis];

    output.clear();
    output.resize(out_dims.iter().product(), 0.0);
    for k in 0..out_dims[2] {
        for j in 0..out_dims[1] {
            for i in 0..out_dims[0] {
                let mut base = [i, j, k];
                let o = base[axis];
                base[axis] = 0;
                let offset = base[0] + dims[0] * (base[1] + dims[1] * base[2]);
                let mut sum = 0.0;
                for a in 0..n_in {
                    let entry = if transpose {
                        table[a * cols + o]
                    } else {
                        table[o * cols + a]
                    };
                    sum += entry * input[offset + a * stride];
                }
                output[i + out_dims[0] * (j + out_dims[1] * k)] = sum;
            }
        }
    }
    out_dims
}

/// Scratch buffers for the element kernels, reused between elements.
#[derive(Debug, Default, Clone)]
pub struct KernelScratch {
    a: Vec<f64>,
    b: Vec<f64>,
    gradient: [Vec<f64>; 3],
}

/// Interpolates `u` (dof values) or one of its partial derivatives to the quadrature points.
fn to_qpoints(basis: &TensorBasis, u: &[f64], derivative: Option<usize>, tmp: &mut Vec<f64>, out: &mut Vec<f64>) {
    let n = basis.num_dofs_1d();
    let nq = basis.num_qpoints_1d();
    let table = |d: usize| {
        if derivative == Some(d) {
            basis.grad()
        } else {
            basis.interp()
        }
    };
    let dims = contract(table(0), nq, n, false, u, [n, n, n], 0, out);
    let dims = contract(table(1), nq, n, false, out, dims, 1, tmp);
    contract(table(2), nq, n, false, tmp, dims, 2, out);
}

/// Adds the transposed interpolation of quadrature point values `w` to `v`.
fn add_from_qpoints(
    basis: &TensorBasis,
    w: &[f64],
    derivative: Option<usize>,
    tmp: &mut Vec<f64>,
    tmp2: &mut Vec<f64>,
    v: &mut [f64],
) {
    let n = basis.num_dofs_1d();
    let nq = basis.num_qpoints_1d();
    let table = |d: usize| {
        if derivative == Some(d) {
            basis.grad()
        } else {
            basis.interp()
        }
    };
    let dims = contract(table(0), nq, n, true, w, [nq, nq, nq], 0, tmp);
    let dims = contract(table(1), nq, n, true, tmp, dims, 1, tmp2);
    contract(table(2), nq, n, true, tmp2, dims, 2, tmp);
    for (vi, ti) in v.iter_mut().zip(tmp.iter()) {
        *vi += ti;
    }
}

/// Multiplies the reference gradients at every quadrature point by the diffusion quadrature data.
fn scale_gradients(qdata: &[f64], gradient: &mut [Vec<f64>; 3]) {
    let nq = gradient[0].len();
    for q in 0..nq {
        let [d00, d01, d02, d11, d12, d22] = [0, 1, 2, 3, 4, 5].map(|c| qdata[6 * q + c]);
        let g = [gradient[0][q], gradient[1][q], gradient[2][q]];
        gradient[0][q] = d00 * g[0] + d01 * g[1] + d02 * g[2];
        gradient[1][q] = d01 * g[0] + d11 * g[1] + d12 * g[2];
        gradient[2][q] = d02 * g[0] + d12 * g[1] + d22 * g[2];
    }
}

/// Computes `v += A_e u` for one hexahedron and one field component.
pub fn apply_tensor_element(
    basis: &TensorBasis,
    integrator: Integrator,
    qdata: &[f64],
    u: &[f64],
    v: &mut [f64],
    scratch: &mut KernelScratch,
) {
    let KernelScratch { a, b, gradient } = scratch;
    match integrator {
        Integrator::Mass => {
            let mut values = std::mem::take(&mut gradient[0]);
            to_qpoints(basis, u, None, a, &mut values);
            for (value, d) in values.iter_mut().zip(qdata) {
                *value *= d;
            }
            add_from_qpoints(basis, &values, None, a, b, v);
            gradient[0] = values;
        }
        Integrator::Diffusion => {
            for d in 0..3 {
                to_qpoints(basis, u, Some(d), a, &mut gradient[d]);
            }
            scale_gradients(qdata, gradient);
            for d in 0..3 {
                add_from_qpoints(basis, &gradient[d], Some(d), a, b, v);
            }
        }
    }
}

/// Computes `v += A_e u` for one tetrahedron and one field component.
pub fn apply_simplex_element(
    basis: &SimplexBasis,
    integrator: Integrator,
    qdata: &[f64],
    u: &[f64],
    v: &mut [f64],
    scratch: &mut KernelScratch,
) {
    let tables = basis.tables();
    let nq = basis.qpoints_per_element();
    let u = DVectorView::from_slice(u, basis.dofs_per_element());
    let mut v = DVectorViewMut::from_slice(v, basis.dofs_per_element());
    let gradient = &mut scratch.gradient;
    for g in gradient.iter_mut() {
        g.clear();
        g.resize(nq, 0.0);
    }
    match integrator {
        Integrator::Mass => {
            let mut values = DVectorViewMut::from_slice(&mut gradient[0], nq);
            values.gemv(1.0, &tables.values, &u, 0.0);
            values.component_mul_assign(&DVectorView::from_slice(qdata, nq));
            v.gemv_tr(1.0, &tables.values, &values, 1.0);
        }
        Integrator::Diffusion => {
            for d in 0..3 {
                DVectorViewMut::from_slice(&mut gradient[d], nq).gemv(1.0, &tables.derivatives[d], &u, 0.0);
            }
            scale_gradients(qdata, gradient);
            for d in 0..3 {
                v.gemv_tr(1.0, &tables.derivatives[d], &DVectorView::from_slice(&gradient[d], nq), 1.0);
            }
        }
    }
}

/// Computes `v += A_e u` for one element and one field component.
pub fn apply_element(
    basis: &ElementBasis,
    integrator: Integrator,
    qdata: &[f64],
    u: &[f64],
    v: &mut [f64],
    scratch: &mut KernelScratch,
) {
    match basis {
        ElementBasis::Tensor(basis) => apply_tensor_element(basis, integrator, qdata, u, v, scratch),
        ElementBasis::Simplex(basis) => apply_simplex_element(basis, integrator, qdata, u, v, scratch),
    }
}

/// Element load vector `(c, phi_i)` from mass quadrature data with coefficient `c`.
pub fn element_load(tables: &BasisTables, qdata: &[f64], load: &mut [f64]) {
    let n = tables.values.ncols();
    let mut load = DVectorViewMut::from_slice(load, n);
    load.gemv_tr(1.0, &tables.values, &DVectorView::from_slice(qdata, qdata.len()), 0.0);
}

/// Dense element matrix of one field component.
pub fn element_matrix(tables: &BasisTables, integrator: Integrator, qdata: &[f64]) -> DMatrix<f64> {
    match integrator {
        Integrator::Mass => {
            let mut weighted = tables.values.clone();
            for (q, mut row) in weighted.row_iter_mut().enumerate() {
                row *= qdata[q];
            }
            tables.values.tr_mul(&weighted)
        }
        Integrator::Diffusion => {
            let n = tables.values.ncols();
            let mut matrix = DMatrix::zeros(n, n);
            let index = |d: usize, e: usize| match (d.min(e), d.max(e)) {
                (0, 0) => 0,
                (0, 1) => 1,
                (0, 2) => 2,
                (1, 1) => 3,
                (1, 2) => 4,
                _ => 5,
            };
            for d in 0..3 {
                let mut weighted = DMatrix::zeros(tables.values.nrows(), n);
                for e in 0..3 {
                    let c = index(d, e);
                    let derivative = &tables.derivatives[e];
                    for q in 0..weighted.nrows() {
                        let w = qdata[6 * q + c];
                        for a in 0..n {
                            weighted[(q, a)] += w * derivative[(q, a)];
                        }
                    }
                }
                matrix += tables.derivatives[d].tr_mul(&weighted);
            }
            matrix
        }
    }
}
