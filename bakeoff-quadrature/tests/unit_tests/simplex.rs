use bakeoff_quadrature::integrate;
use bakeoff_quadrature::simplex::{collapsed_points_per_dim, tetrahedron_collapsed_gauss};

use matrixcompare::assert_scalar_eq;

fn factorial(n: u32) -> f64 {
    (1..=n).map(f64::from).product()
}

/// Integral of `x^a y^b z^c` over the reference tetrahedron.
fn monomial_integral([a, b, c]: [u32; 3]) -> f64 {
    factorial(a) * factorial(b) * factorial(c) / factorial(a + b + c + 3)
}

#[test]
fn collapsed_rules_satisfy_expected_accuracy() {
    for strength in 0..=12 {
        let rule = tetrahedron_collapsed_gauss(strength);
        let n = collapsed_points_per_dim(strength);
        assert_eq!(rule.0.len(), n * n * n);
        assert!(rule.0.iter().all(|&w| w > 0.0));

        for a in 0..=strength as u32 {
            for b in 0..=strength as u32 - a {
                for c in 0..=strength as u32 - a - b {
                    let estimated = integrate(&rule, |x| x[0].powi(a as i32) * x[1].powi(b as i32) * x[2].powi(c as i32));
                    assert_scalar_eq!(estimated, monomial_integral([a, b, c]), comp = abs, tol = 1e-14);
                }
            }
        }
    }
}

#[test]
fn collapsed_rule_points_are_interior() {
    let (_, points) = tetrahedron_collapsed_gauss(7);
    for [x, y, z] in points {
        assert!(x > 0.0 && y > 0.0 && z > 0.0);
        assert!(x + y + z < 1.0);
    }
}
