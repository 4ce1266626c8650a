//! Lagrange bases on the reference elements.
//!
//! Hexahedra use tensor products of Gauss-Lobatto Lagrange polynomials on `[0, 1]^3`, tabulated
//! per direction for sum factorization. Tetrahedra use a nodal basis through the equispaced
//! points of the reference tetrahedron, tabulated as dense tables.
use crate::error::Error;
use crate::mesh::ElementType;
use bakeoff_quadrature::simplex::{collapsed_points_per_dim, tetrahedron_collapsed_gauss};
use bakeoff_quadrature::univariate::{gauss, try_gauss_lobatto};
use bakeoff_quadrature::{gauss_points_for_degree, to_unit_interval};
use eyre::eyre;
use nalgebra::DMatrix;

/// Largest supported polynomial order.
pub const MAX_ORDER: usize = 10;

/// Gauss-Lobatto nodes on `[0, 1]` for a Lagrange basis of the given order.
pub fn gauss_lobatto_nodes(order: usize) -> Result<Vec<f64>, Error> {
    let (_, points) = try_gauss_lobatto(order + 1)
        .map(|rule| to_unit_interval(&rule))
        .ok_or_else(|| eyre!("no Gauss-Lobatto rule with {} points", order + 1))?;
    Ok(points.into_iter().map(|[x]| x).collect())
}

/// Equispaced nodes `i / order` on `[0, 1]`.
pub fn equispaced_nodes(order: usize) -> Vec<f64> {
    (0..=order).map(|i| i as f64 / order as f64).collect()
}

fn check_order(order: usize) -> Result<(), Error> {
    if order == 0 || order > MAX_ORDER {
        return Err(Error::OrderMismatch(order));
    }
    Ok(())
}

/// One-dimensional Lagrange polynomials through a set of distinct nodes.
#[derive(Debug, Clone)]
pub struct LagrangeBasis1d {
    nodes: Vec<f64>,
}

impl LagrangeBasis1d {
    pub fn new(nodes: Vec<f64>) -> Self {
        assert!(!nodes.is_empty());
        Self { nodes }
    }

    pub fn nodes(&self) -> &[f64] {
        &self.nodes
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    /// Value of the `i`-th polynomial at `x`.
    pub fn value(&self, i: usize, x: f64) -> f64 {
        let xi = self.nodes[i];
        self.nodes
            .iter()
            .enumerate()
            .filter(|&(m, _)| m != i)
            .map(|(_, &xm)| (x - xm) / (xi - xm))
            .product()
    }

    /// Derivative of the `i`-th polynomial at `x`.
    pub fn derivative(&self, i: usize, x: f64) -> f64 {
        let xi = self.nodes[i];
        let mut sum = 0.0;
        for (m, &xm) in self.nodes.iter().enumerate().filter(|&(m, _)| m != i) {
            let product: f64 = self
                .nodes
                .iter()
                .enumerate()
                .filter(|&(j, _)| j != i && j != m)
                .map(|(_, &xj)| (x - xj) / (xi - xj))
                .product();
            sum += product / (xi - xm);
        }
        sum
    }
}

/// Gauss-Lobatto Lagrange basis of a hexahedron, tabulated at a tensor Gauss rule.
///
/// The one-dimensional tables are stored row-major with one row per quadrature point, so
/// `interp[q * n + i]` is the value of basis function `i` at point `q`. Degrees of freedom and
/// quadrature points are numbered lexicographically with x fastest.
#[derive(Debug, Clone)]
pub struct TensorBasis {
    order: usize,
    lagrange: LagrangeBasis1d,
    qpoints: Vec<f64>,
    qweights: Vec<f64>,
    interp: Vec<f64>,
    grad: Vec<f64>,
}

impl TensorBasis {
    /// Basis of the given order with a Gauss rule integrating the given degree exactly.
    pub fn new(order: usize, quadrature_order: usize) -> Result<Self, Error> {
        Self::with_quadrature_points(order, gauss_points_for_degree(quadrature_order))
    }

    pub fn with_quadrature_points(order: usize, num_qpoints_1d: usize) -> Result<Self, Error> {
        check_order(order)?;
        let lagrange = LagrangeBasis1d::new(gauss_lobatto_nodes(order)?);
        let (qweights, qpoints) = to_unit_interval(&gauss(num_qpoints_1d));
        let qpoints: Vec<f64> = qpoints.into_iter().map(|[x]| x).collect();

        let n = order + 1;
        let mut interp = Vec::with_capacity(qpoints.len() * n);
        let mut grad = Vec::with_capacity(qpoints.len() * n);
        for &x in &qpoints {
            interp.extend((0..n).map(|i| lagrange.value(i, x)));
            grad.extend((0..n).map(|i| lagrange.derivative(i, x)));
        }

        Ok(Self {
            order,
            lagrange,
            qpoints,
            qweights,
            interp,
            grad,
        })
    }

    pub fn order(&self) -> usize {
        self.order
    }

    pub fn nodes(&self) -> &[f64] {
        self.lagrange.nodes()
    }

    pub fn num_dofs_1d(&self) -> usize {
        self.order + 1
    }

    pub fn num_qpoints_1d(&self) -> usize {
        self.qpoints.len()
    }

    pub fn dofs_per_element(&self) -> usize {
        self.num_dofs_1d().pow(3)
    }

    pub fn qpoints_per_element(&self) -> usize {
        self.num_qpoints_1d().pow(3)
    }

    pub fn qpoints(&self) -> &[f64] {
        &self.qpoints
    }

    pub fn qweights(&self) -> &[f64] {
        &self.qweights
    }

    pub fn interp(&self) -> &[f64] {
        &self.interp
    }

    pub fn grad(&self) -> &[f64] {
        &self.grad
    }

    /// Full tables of the three-dimensional basis: values and the three partial derivatives, each
    /// with one row per quadrature point and one column per degree of freedom.
    pub fn tabulate(&self) -> BasisTables {
        let n = self.num_dofs_1d();
        let nq = self.num_qpoints_1d();
        let mut values = DMatrix::zeros(nq.pow(3), n.pow(3));
        let mut derivatives = [0, 1, 2].map(|_| DMatrix::zeros(nq.pow(3), n.pow(3)));
        for (q, qxyz) in lexicographic(nq).enumerate() {
            for (a, ijk) in lexicographic(n).enumerate() {
                let b = [0, 1, 2].map(|d| self.interp[qxyz[d] * n + ijk[d]]);
                let g = [0, 1, 2].map(|d| self.grad[qxyz[d] * n + ijk[d]]);
                values[(q, a)] = b[0] * b[1] * b[2];
                derivatives[0][(q, a)] = g[0] * b[1] * b[2];
                derivatives[1][(q, a)] = b[0] * g[1] * b[2];
                derivatives[2][(q, a)] = b[0] * b[1] * g[2];
            }
        }
        BasisTables { values, derivatives }
    }
}

#[derive(Debug, Clone)]
pub struct BasisTables {
    pub values: DMatrix<f64>,
    pub derivatives: [DMatrix<f64>; 3],
}

/// Multi-indices of an `n x n x n` tensor in lexicographic order, x fastest.
pub fn lexicographic(n: usize) -> impl Iterator<Item = [usize; 3]> {
    (0..n * n * n).map(move |i| [i % n, (i / n) % n, i / (n * n)])
}

/// Multi-indices `[i, j, k]` with `i + j + k <= order`, i fastest.
pub fn simplex_indices(order: usize) -> impl Iterator<Item = [usize; 3]> {
    (0..=order).flat_map(move |k| (0..=order - k).flat_map(move |j| (0..=order - k - j).map(move |i| [i, j, k])))
}

/// Value and derivative of the Legendre polynomial of degree `n` shifted to `[0, 1]`.
fn shifted_legendre(n: usize, x: f64) -> (f64, f64) {
    let t = 2.0 * x - 1.0;
    if n == 0 {
        return (1.0, 0.0);
    }
    let (mut p0, mut p1) = (1.0, t);
    let (mut d0, mut d1) = (0.0, 1.0);
    for m in 2..=n {
        let m = m as f64;
        let p2 = ((2.0 * m - 1.0) * t * p1 - (m - 1.0) * p0) / m;
        // P'_m = P'_{m - 2} + (2m - 1) P_{m - 1}
        let d2 = d0 + (2.0 * m - 1.0) * p1;
        (p0, p1) = (p1, p2);
        (d0, d1) = (d1, d2);
    }
    (p1, 2.0 * d1)
}

/// Products of shifted Legendre polynomials of total degree at most `order`. They span the same
/// space as the monomials, with much better conditioned Vandermonde matrices.
fn modal_value(index: [usize; 3], x: [f64; 3], derivative: Option<usize>) -> f64 {
    (0..3)
        .map(|d| {
            let (value, slope) = shifted_legendre(index[d], x[d]);
            if derivative == Some(d) {
                slope
            } else {
                value
            }
        })
        .product()
}

/// Lagrange basis of the reference tetrahedron through its equispaced points, tabulated at a
/// collapsed Gauss rule.
///
/// The node with multi-index `[i, j, k]` (see [`simplex_indices`]) sits at `[i, j, k] / order`.
#[derive(Debug, Clone)]
pub struct SimplexBasis {
    order: usize,
    nodes: Vec<[f64; 3]>,
    qpoints: Vec<[f64; 3]>,
    qweights: Vec<f64>,
    tables: BasisTables,
}

impl SimplexBasis {
    /// Basis of the given order with a rule integrating the given total degree exactly.
    pub fn new(order: usize, quadrature_order: usize) -> Result<Self, Error> {
        check_order(order)?;
        let indices: Vec<[usize; 3]> = simplex_indices(order).collect();
        let nodes: Vec<[f64; 3]> = indices
            .iter()
            .map(|index| index.map(|i| i as f64 / order as f64))
            .collect();
        let n = nodes.len();
        let vandermonde = DMatrix::from_fn(n, n, |a, m| modal_value(indices[m], nodes[a], None));
        let coefficients = vandermonde
            .try_inverse()
            .ok_or_else(|| eyre!("singular Vandermonde matrix for the order {order} tetrahedron"))?;

        let (qweights, qpoints) = tetrahedron_collapsed_gauss(quadrature_order);
        let nq = qpoints.len();
        let modal = |derivative: Option<usize>| {
            DMatrix::from_fn(nq, n, |q, m| modal_value(indices[m], qpoints[q], derivative)) * &coefficients
        };
        let tables = BasisTables {
            values: modal(None),
            derivatives: [0, 1, 2].map(|d| modal(Some(d))),
        };

        Ok(Self {
            order,
            nodes,
            qpoints,
            qweights,
            tables,
        })
    }

    pub fn order(&self) -> usize {
        self.order
    }

    pub fn nodes(&self) -> &[[f64; 3]] {
        &self.nodes
    }

    pub fn dofs_per_element(&self) -> usize {
        self.nodes.len()
    }

    pub fn qpoints_per_element(&self) -> usize {
        self.qpoints.len()
    }

    pub fn qpoints(&self) -> &[[f64; 3]] {
        &self.qpoints
    }

    pub fn qweights(&self) -> &[f64] {
        &self.qweights
    }

    /// Values and reference gradients at the quadrature points.
    pub fn tables(&self) -> &BasisTables {
        &self.tables
    }
}

/// The basis of one element type.
#[derive(Debug, Clone)]
pub enum ElementBasis {
    Tensor(TensorBasis),
    Simplex(SimplexBasis),
}

impl ElementBasis {
    pub fn new(element_type: ElementType, order: usize, quadrature_order: usize) -> Result<Self, Error> {
        match element_type {
            ElementType::Hexahedron => TensorBasis::new(order, quadrature_order).map(Self::Tensor),
            ElementType::Tetrahedron => SimplexBasis::new(order, quadrature_order).map(Self::Simplex),
        }
    }

    pub fn order(&self) -> usize {
        match self {
            Self::Tensor(basis) => basis.order(),
            Self::Simplex(basis) => basis.order(),
        }
    }

    pub fn dofs_per_element(&self) -> usize {
        match self {
            Self::Tensor(basis) => basis.dofs_per_element(),
            Self::Simplex(basis) => basis.dofs_per_element(),
        }
    }

    pub fn qpoints_per_element(&self) -> usize {
        match self {
            Self::Tensor(basis) => basis.qpoints_per_element(),
            Self::Simplex(basis) => basis.qpoints_per_element(),
        }
    }

    /// Dense tables of values and reference gradients.
    pub fn tabulate(&self) -> BasisTables {
        match self {
            Self::Tensor(basis) => basis.tabulate(),
            Self::Simplex(basis) => basis.tables().clone(),
        }
    }
}

/// Number of nodes of an element of the given type and order.
pub fn dofs_per_element(element_type: ElementType, order: usize) -> usize {
    match element_type {
        ElementType::Hexahedron => (order + 1).pow(3),
        ElementType::Tetrahedron => (order + 1) * (order + 2) * (order + 3) / 6,
    }
}

/// Number of quadrature points per element of the rule integrating the given degree exactly.
pub fn qpoints_per_element(element_type: ElementType, quadrature_order: usize) -> usize {
    match element_type {
        ElementType::Hexahedron => gauss_points_for_degree(quadrature_order).pow(3),
        ElementType::Tetrahedron => collapsed_points_per_dim(quadrature_order).pow(3),
    }
}
