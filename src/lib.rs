//! CEED bake-off problems BP1-BP4.
//!
//! Mass (BP1, BP2) and diffusion (BP3, BP4) operators of high-order H1 spaces on structured
//! hexahedral or tetrahedral meshes, applied matrix-free by partial assembly, and solved by
//! preconditioned conjugate gradients over a rank-distributed mesh. The [`ex1`] driver solves a
//! single mass or Poisson problem with a constant load.
pub mod assembly;
pub mod basis;
pub mod bench;
pub mod comm;
pub mod error;
pub mod ex1;
pub mod form;
pub mod kernels;
pub mod mesh;
pub mod options;
pub mod parmatrix;
pub mod precond;
pub mod report;
pub mod solver;
pub mod space;
pub mod state;
pub mod timing;
pub mod vis;

pub use error::Error;

pub extern crate nalgebra;
