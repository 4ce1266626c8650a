//! Quadrature rules for the one-dimensional domain `[-1, 1]`.

use crate::Rule;
use std::f64::consts::PI;

/// Recurrence relation for Legendre polynomials.
///
/// Note: we use a formula for which derivatives are *not* defined at |x| == 1, so
/// [`derivative`](Self::derivative) is only suitable for evaluation in the open interval (-1, 1).
/// The values themselves are valid on the closed interval.
#[derive(Debug, Default)]
struct LegendreRecurrence {
    n: usize,
    x: f64,
    // The current value, i.e. p_n(x)
    p1: f64,
    // The previous value in the recurrence, i.e. p_{n - 1}(x)
    p2: f64,
    // p_{n - 2}(x)
    p3: f64,
}

impl LegendreRecurrence {
    pub fn evaluate(n: usize, x: f64) -> Self {
        // Use recurrence relation
        //  m P_m(x) = (2m - 1) * x P_{m - 1}(x) - (m - 1) P_{m - 2}(x)
        let mut p1 = 1.0;
        let mut p2 = 0.0;
        let mut p3 = 0.0;
        for m in 1..=n {
            let m = m as f64;
            p3 = p2;
            p2 = p1;
            p1 = ((2.0 * m - 1.0) * x * p2 - (m - 1.0) * p3) / m;
        }

        Self { n, x, p1, p2, p3 }
    }

    fn value(&self) -> f64 {
        self.p1
    }

    fn previous(&self) -> f64 {
        self.p2
    }

    fn second_previous(&self) -> f64 {
        self.p3
    }

    fn derivative(&self) -> f64 {
        let Self { n, x, p1, p2, .. } = &self;
        let n = *n as f64;
        // Use the standard recurrence relation
        // dp_n/dx (x) = n * (x * p_n(x) - p_{n - 1}(x)) / (x^2 - 1)
        n * (x * p1 - p2) / (x * x - 1.0)
    }

    fn value_and_derivative(&self) -> (f64, f64) {
        (self.value(), self.derivative())
    }
}

const NEWTON_MAX_ITER: usize = 100;

/// Gauss quadrature for the reference interval [-1, 1].
///
/// Returns the [Gauss quadrature rule] with the given number of points. Given `n` points,
/// the rule integrates polynomials of order up to `2 n - 1` exactly.
///
/// # Panics
///
/// Panics if zero points are requested.
///
/// [Gauss quadrature rule]: https://en.wikipedia.org/wiki/Gaussian_quadrature
pub fn gauss(num_points: usize) -> Rule<1> {
    let n = num_points;
    assert!(n > 0, "number of points must be positive");

    // Loosely based on the procedure used in
    // Numerical Recipes, The art of Scientific Computing, Third Edition (2007)
    let m = (n + 1) / 2;

    let mut points = Vec::with_capacity(n);
    let mut weights = Vec::with_capacity(n);

    // Only find the first m roots. The remaining roots can be found by symmetry
    for i in 0..m {
        let mut x = (PI * (i as f64 + 0.75) / (n as f64 + 0.5)).cos();
        let (mut p, mut dp) = LegendreRecurrence::evaluate(n, x).value_and_derivative();

        for _ in 0..NEWTON_MAX_ITER {
            let dx = -p / dp;
            x += dx;
            let (p_new, dp_new) = LegendreRecurrence::evaluate(n, x).value_and_derivative();
            p = p_new;
            dp = dp_new;
            if dx.abs() <= 1e-15 {
                break;
            }
        }

        let w = 2.0 / ((1.0 - x * x) * dp * dp);

        points.push([x]);
        weights.push(w);
    }

    // Recover the remaining points and weights by symmetry
    for i in m..n {
        let mirror_idx = n - i - 1;
        points.push([-points[mirror_idx][0]]);
        weights.push(weights[mirror_idx]);
    }

    assert_eq!(points.len(), n, "Internal error: incorrect number of points produced");

    // The roots above are produced in descending order
    points.reverse();
    weights.reverse();
    (weights, points)
}

/// Gauss-Lobatto quadrature for the reference interval [-1, 1].
///
/// The points are sorted in ascending order and include both endpoints. Given `n` points,
/// the rule integrates polynomials of order up to `2 n - 3` exactly.
///
/// Returns `None` if fewer than two points are requested.
pub fn try_gauss_lobatto(num_points: usize) -> Option<Rule<1>> {
    if num_points < 2 {
        return None;
    }

    // With N = n - 1, the interior points are the roots of P'_N, which coincide with the
    // interior roots of q(x) = P_{N + 1}(x) - P_{N - 1}(x). The latter has the derivative
    // q'(x) = (2N + 1) P_N(x), which is well-defined everywhere.
    let n = num_points;
    let big_n = n - 1;
    let big_n_f = big_n as f64;

    let mut points = Vec::with_capacity(n);
    let mut weights = Vec::with_capacity(n);

    for i in 0..n {
        let x = if i == 0 {
            -1.0
        } else if i == big_n {
            1.0
        } else {
            let mut x = -(PI * i as f64 / big_n_f).cos();
            for _ in 0..NEWTON_MAX_ITER {
                let rec = LegendreRecurrence::evaluate(big_n + 1, x);
                let q = rec.value() - rec.second_previous();
                let dq = (2.0 * big_n_f + 1.0) * rec.previous();
                let dx = -q / dq;
                x += dx;
                if dx.abs() <= 1e-15 {
                    break;
                }
            }
            x
        };

        let p_n = LegendreRecurrence::evaluate(big_n, x).value();
        points.push([x]);
        weights.push(2.0 / (big_n_f * (big_n_f + 1.0) * p_n * p_n));
    }

    // Enforce exact symmetry of the points
    for i in 0..n / 2 {
        let mirror_idx = n - i - 1;
        let x = 0.5 * (points[mirror_idx][0] - points[i][0]);
        points[i] = [-x];
        points[mirror_idx] = [x];
    }
    if n % 2 == 1 {
        points[n / 2] = [0.0];
    }

    Some((weights, points))
}
