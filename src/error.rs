use crate::mesh::ElementType;
use std::fmt;
use std::fmt::{Display, Formatter};

/// Errors terminating a bake-off run.
///
/// Every variant maps to a process exit code, see [`Error::exit_code`].
#[derive(Debug)]
#[non_exhaustive]
pub enum Error {
    /// Help or version output was requested. Not a failure.
    Help(String),
    /// Malformed command-line flags. Contains the rendered usage message.
    Usage(String),
    /// The rank grid does not match the number of ranks.
    InvalidDimensions { num_ranks: usize, grid: [usize; 3] },
    UnknownPreconditioner(String),
    /// The mesh elements differ from the geometry the operator kernels were configured for.
    GeometryMismatch { mesh: ElementType, geom: ElementType },
    /// The polynomial order is outside the supported range.
    OrderMismatch(usize),
    /// The LOR preconditioner was requested on a simplex mesh.
    LorOnSimplex,
    /// Failure in assembly, communication or the solver layers.
    Library(eyre::Report),
}

impl Error {
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Help(_) => 0,
            Error::Usage(_) => 1,
            Error::InvalidDimensions { .. } => 2,
            Error::UnknownPreconditioner(_) => 3,
            Error::GeometryMismatch { .. } => 4,
            Error::OrderMismatch(_) => 5,
            Error::LorOnSimplex => 6,
            Error::Library(_) => 9,
        }
    }

    /// Whether the error brings down all ranks through the communicator's abort path rather than a
    /// regular exit.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::InvalidDimensions { .. } | Error::LorOnSimplex | Error::Library(_)
        )
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Error::Help(text) | Error::Usage(text) => write!(f, "{text}"),
            Error::InvalidDimensions { num_ranks, grid } => write!(
                f,
                "Invalid dimensions for MPI ranks: {} x {} x {} != {}",
                grid[0], grid[1], grid[2], num_ranks
            ),
            Error::UnknownPreconditioner(name) => write!(f, "Invalid preconditioner specified: {name}"),
            Error::GeometryMismatch { mesh, geom } => write!(
                f,
                "The given mesh does not match the optimized 'geom' parameter ({mesh} mesh, geom {geom}).\n\
                 Rerun with a suitable --geom value."
            ),
            Error::OrderMismatch(order) => write!(
                f,
                "The given order does not match the optimized parameter (order {order} is not supported)."
            ),
            Error::LorOnSimplex => write!(f, "LOR not supported on simplices"),
            Error::Library(report) => write!(f, "{report:#}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<eyre::Report> for Error {
    fn from(report: eyre::Report) -> Self {
        Error::Library(report)
    }
}
