use bakeoff_quadrature::univariate::{gauss, try_gauss_lobatto};
use bakeoff_quadrature::{gauss_points_for_degree, integrate, to_unit_interval};

use matrixcompare::assert_scalar_eq;

fn monomial_integral(alpha: i32) -> f64 {
    (1.0 - (-1.0f64).powi(alpha + 1)) / (alpha as f64 + 1.0)
}

#[test]
fn gauss_rules_satisfy_expected_accuracy() {
    for n in 1..=40 {
        let expected_polynomial_degree = 2 * n - 1;
        let rule = gauss(n);

        assert!(rule.0.iter().all(|&w| w > 0.0));
        assert!(rule.1.windows(2).all(|pair| pair[0][0] < pair[1][0]));

        for alpha in 0..=expected_polynomial_degree as i32 {
            let estimated_integral = integrate(&rule, |x| x[0].powi(alpha));
            assert_scalar_eq!(estimated_integral, monomial_integral(alpha), comp = abs, tol = 1e-13);
        }
    }
}

#[test]
fn gauss_lobatto_rules_satisfy_expected_accuracy() {
    assert!(try_gauss_lobatto(0).is_none());
    assert!(try_gauss_lobatto(1).is_none());

    for n in 2..=24 {
        let expected_polynomial_degree = 2 * n - 3;
        let rule = try_gauss_lobatto(n).unwrap();

        assert_eq!(rule.1.first().unwrap(), &[-1.0]);
        assert_eq!(rule.1.last().unwrap(), &[1.0]);
        assert!(rule.0.iter().all(|&w| w > 0.0));
        assert!(rule.1.windows(2).all(|pair| pair[0][0] < pair[1][0]));

        for alpha in 0..=expected_polynomial_degree as i32 {
            let estimated_integral = integrate(&rule, |x| x[0].powi(alpha));
            assert_scalar_eq!(estimated_integral, monomial_integral(alpha), comp = abs, tol = 1e-13);
        }
    }
}

#[test]
fn gauss_lobatto_three_points_match_closed_form() {
    let (weights, points) = try_gauss_lobatto(3).unwrap();
    assert_eq!(points, vec![[-1.0], [0.0], [1.0]]);
    assert_scalar_eq!(weights[0], 1.0 / 3.0, comp = abs, tol = 1e-15);
    assert_scalar_eq!(weights[1], 4.0 / 3.0, comp = abs, tol = 1e-15);
    assert_scalar_eq!(weights[2], 1.0 / 3.0, comp = abs, tol = 1e-15);
}

#[test]
fn unit_interval_rule_integrates_on_zero_one() {
    let rule = to_unit_interval(&gauss(4));
    assert!(rule.1.iter().all(|&[x]| x > 0.0 && x < 1.0));
    for alpha in 0..=7 {
        let estimated_integral = integrate(&rule, |x| x[0].powi(alpha));
        assert_scalar_eq!(estimated_integral, 1.0 / (alpha as f64 + 1.0), comp = abs, tol = 1e-14);
    }
}

#[test]
fn gauss_points_for_degree_is_minimal() {
    assert_eq!(gauss_points_for_degree(0), 1);
    assert_eq!(gauss_points_for_degree(1), 1);
    assert_eq!(gauss_points_for_degree(2), 2);
    // Default bake-off order 2 (p + 2) - 1 with p = 3
    assert_eq!(gauss_points_for_degree(9), 5);
}
