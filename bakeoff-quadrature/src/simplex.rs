//! Quadrature rules for the reference tetrahedron.
//!
//! The reference tetrahedron has the vertices `(0, 0, 0)`, `(1, 0, 0)`, `(0, 1, 0)` and
//! `(0, 0, 1)`. Rules are obtained from tensor-product Gauss rules on the unit cube by collapsing
//! the cube onto the tetrahedron (a conical product rule), so all weights are positive and all
//! points lie in the interior.

use crate::univariate::gauss;
use crate::{gauss_points_for_degree, to_unit_interval, Rule};

/// Number of Gauss points per direction of [`tetrahedron_collapsed_gauss`] for the given strength.
///
/// The collapsing map contributes up to two additional polynomial degrees in the collapsed
/// directions.
pub fn collapsed_points_per_dim(strength: usize) -> usize {
    gauss_points_for_degree(strength + 2)
}

/// A rule for the reference tetrahedron integrating polynomials of total degree `strength`
/// exactly.
///
/// The rule has `n^3` points with `n = collapsed_points_per_dim(strength)`.
pub fn tetrahedron_collapsed_gauss(strength: usize) -> Rule<3> {
    let n = collapsed_points_per_dim(strength);
    let (weights1d, points1d) = to_unit_interval(&gauss(n));
    let mut weights3d = Vec::with_capacity(n * n * n);
    let mut points3d = Vec::with_capacity(n * n * n);

    let rule1d_iter = || weights1d.iter().zip(&points1d);

    for (&ww, &[w]) in rule1d_iter() {
        for (&wv, &[v]) in rule1d_iter() {
            for (&wu, &[u]) in rule1d_iter() {
                // (u, v, w) -> (u (1 - v) (1 - w), v (1 - w), w)
                let jacobian = (1.0 - v) * (1.0 - w) * (1.0 - w);
                weights3d.push(wu * wv * ww * jacobian);
                points3d.push([u * (1.0 - v) * (1.0 - w), v * (1.0 - w), w]);
            }
        }
    }

    (weights3d, points3d)
}
