use crate::cg::LinearOperator;
use nalgebra::{DVector, DVectorView, DVectorViewMut};
use std::error::Error;
use std::fmt;

/// Preconditioner `z = D^{-1} r` for a diagonal matrix `D`.
#[derive(Debug, Clone)]
pub struct DiagonalScaling {
    inverse_diagonal: DVector<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ZeroDiagonalEntry {
    pub index: usize,
}

impl fmt::Display for ZeroDiagonalEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "diagonal entry {} is zero, cannot build diagonal scaling", self.index)
    }
}

impl Error for ZeroDiagonalEntry {}

impl DiagonalScaling {
    pub fn from_diagonal(diagonal: &DVector<f64>) -> Result<Self, ZeroDiagonalEntry> {
        if let Some(index) = diagonal.iter().position(|&d| d == 0.0) {
            return Err(ZeroDiagonalEntry { index });
        }
        Ok(Self {
            inverse_diagonal: diagonal.map(|d| 1.0 / d),
        })
    }

    pub fn inverse_diagonal(&self) -> &DVector<f64> {
        &self.inverse_diagonal
    }
}

impl LinearOperator<f64> for DiagonalScaling {
    fn apply(&self, mut y: DVectorViewMut<f64>, x: DVectorView<f64>) -> Result<(), Box<dyn Error>> {
        assert_eq!(y.len(), self.inverse_diagonal.len());
        y.copy_from(&x);
        y.component_mul_assign(&self.inverse_diagonal);
        Ok(())
    }
}
