//! Quadrature rules for hexahedral and tetrahedral finite elements.
//!
//! One-dimensional rules are defined on the reference interval `[-1, 1]`. Use
//! [`to_unit_interval`] to map a rule onto `[0, 1]`, which is the reference interval used by the
//! hexahedral kernels in `bakeoff`. Rules for the reference tetrahedron are in [`simplex`].

use std::fmt;
use std::fmt::{Display, Formatter};

pub mod simplex;
pub mod univariate;

/// Library-wide error type.
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum Error {
    /// Indicates that a rule satisfying the given requirements is not available.
    NoRuleAvailable,
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoRuleAvailable => {
                write!(f, "There is no quadrature rule satisfying the requirements available")
            }
        }
    }
}

impl std::error::Error for Error {}

/// A D-dimensional point.
pub type Point<const D: usize> = [f64; D];

/// A D-dimensional rule, stored as `(weights, points)`.
pub type Rule<const D: usize> = (Vec<f64>, Vec<Point<D>>);

/// Integrate the given function with the given quadrature rule.
pub fn integrate<const D: usize>(rule: &Rule<D>, f: impl Fn(&Point<D>) -> f64) -> f64 {
    let (weights, points) = rule;
    weights
        .iter()
        .zip(points)
        .map(|(w, x)| w * f(x))
        .sum()
}

/// Maps a rule on `[-1, 1]` to the unit interval `[0, 1]`.
pub fn to_unit_interval(rule: &Rule<1>) -> Rule<1> {
    let (weights, points) = rule;
    let weights = weights.iter().map(|w| 0.5 * w).collect();
    let points = points.iter().map(|[x]| [0.5 * (x + 1.0)]).collect();
    (weights, points)
}

/// Number of Gauss points needed to integrate polynomials of the given degree exactly.
pub fn gauss_points_for_degree(degree: usize) -> usize {
    degree / 2 + 1
}
