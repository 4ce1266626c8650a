//! Krylov solvers and preconditioners on top of `nalgebra-sparse`.

pub mod amg;
pub mod cg;
pub mod diagonal;

pub use nalgebra_sparse::pattern::SparsityPattern;
pub use nalgebra_sparse::CsrMatrix;
