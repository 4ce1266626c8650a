//! Command-line options of the bake-off driver.
use crate::comm::Communicator;
use crate::error::Error;
use crate::kernels::Integrator;
use crate::mesh::{ElementType, RankGrid};
use crate::precond::PreconditionerKind;
use clap::error::ErrorKind;
use clap::Parser;
use serde::Serialize;
use std::ffi::OsString;
use std::io;
use std::io::Write;

/// The four bake-off problems.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BakeoffProblem {
    /// Scalar mass matrix.
    Bp1,
    /// Vector mass matrix.
    Bp2,
    /// Scalar Laplacian.
    Bp3,
    /// Vector Laplacian.
    Bp4,
}

impl BakeoffProblem {
    pub fn from_number(number: u8) -> Option<Self> {
        match number {
            1 => Some(Self::Bp1),
            2 => Some(Self::Bp2),
            3 => Some(Self::Bp3),
            4 => Some(Self::Bp4),
            _ => None,
        }
    }

    pub fn number(self) -> u8 {
        match self {
            Self::Bp1 => 1,
            Self::Bp2 => 2,
            Self::Bp3 => 3,
            Self::Bp4 => 4,
        }
    }

    pub fn is_vector(self) -> bool {
        matches!(self, Self::Bp2 | Self::Bp4)
    }

    /// Number of field components: 3 for the vector problems, 1 otherwise.
    pub fn vdim(self) -> usize {
        if self.is_vector() {
            3
        } else {
            1
        }
    }

    pub fn integrator(self) -> Integrator {
        match self {
            Self::Bp1 | Self::Bp2 => Integrator::Mass,
            Self::Bp3 | Self::Bp4 => Integrator::Diffusion,
        }
    }

    /// The diffusion problems have a solution that is only determined up to constants on the
    /// nullspace of the continuous operator, so their reference solution is made mean-free.
    pub fn is_diffusion(self) -> bool {
        self.integrator() == Integrator::Diffusion
    }
}

#[derive(Debug, Clone, Parser)]
#[command(
    name = "bp",
    version,
    about = "CEED bake-off problems BP1-BP4 with partially assembled high-order operators"
)]
pub struct Args {
    /// Bake-off problem: 1 and 2 are the scalar and vector mass, 3 and 4 the scalar and vector
    /// Laplacian.
    #[arg(short = 'p', long, default_value_t = 1, value_parser = clap::value_parser!(u8).range(1..=4))]
    pub problem: u8,

    /// Polynomial order of the finite element space.
    #[arg(short = 'o', long, default_value_t = 3)]
    pub order: usize,

    /// Polynomial degree integrated exactly by the quadrature rule. Defaults to 2 (order + 2) - 1.
    #[arg(long, visible_alias = "ir")]
    pub quadrature_order: Option<usize>,

    /// Element type of the generated mesh: hex or tet.
    #[arg(long, visible_alias = "el", default_value = "hex")]
    pub element_type: ElementType,

    /// Element geometry the operator kernels are set up for: hex or tet. The mesh must match.
    #[arg(long, default_value = "hex")]
    pub geom: ElementType,

    /// Preconditioner: none, lor, ho, jacobi or lumpedmass.
    #[arg(long, visible_alias = "pc", default_value = "none")]
    pub preconditioner: String,

    /// Send the solution to a GLVis server.
    #[arg(long, visible_alias = "vis", overrides_with = "no_visualization")]
    pub visualization: bool,

    /// Do not send the solution to a GLVis server.
    #[arg(long, visible_alias = "no-vis", overrides_with = "visualization")]
    pub no_visualization: bool,

    /// Ranks along x. Defaults to the total number of ranks.
    #[arg(long, visible_alias = "nx")]
    pub num_procs_x: Option<usize>,

    #[arg(long, visible_alias = "ny", default_value_t = 1)]
    pub num_procs_y: usize,

    #[arg(long, visible_alias = "nz", default_value_t = 1)]
    pub num_procs_z: usize,

    /// Elements per rank along x.
    #[arg(long, visible_alias = "ex", default_value_t = 4)]
    pub num_el_per_proc_x: usize,

    #[arg(long, visible_alias = "ey", default_value_t = 4)]
    pub num_el_per_proc_y: usize,

    #[arg(long, visible_alias = "ez", default_value_t = 4)]
    pub num_el_per_proc_z: usize,

    /// Number of in-process ranks, each running on its own thread. Ignored when running under MPI.
    #[arg(long, default_value_t = 1)]
    pub ranks: usize,

    /// Seed of the random reference solution. Rank r uses seed + r.
    #[arg(long, default_value_t = 0)]
    pub seed: u64,

    /// Report the relative error of the solution against the reference solution.
    #[arg(long)]
    pub check_residual: bool,

    /// Print a JSON summary of the run on rank 0.
    #[arg(long)]
    pub json: bool,
}

/// Parses command-line arguments, including the program name.
pub fn parse_args<I, T>(args: I) -> Result<Args, Error>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    parse_command(args)
}

/// Parses the arguments of any of the drivers, mapping help and usage errors to [`Error`].
pub fn parse_command<P, I, T>(args: I) -> Result<P, Error>
where
    P: Parser,
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    P::try_parse_from(args).map_err(|err| match err.kind() {
        ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => Error::Help(err.render().to_string()),
        _ => Error::Usage(err.render().to_string()),
    })
}

/// Reports a failed [`parse_args`] and returns the process exit code.
///
/// Only the root rank writes: help and version text go to `out`, usage errors to `err`.
pub fn report_parse_failure<C: Communicator>(
    comm: &C,
    error: &Error,
    out: &mut impl Write,
    err: &mut impl Write,
) -> i32 {
    if comm.is_root() {
        let written = match error {
            Error::Help(text) => write!(out, "{text}"),
            other => write!(err, "{other}"),
        };
        if let Err(io_error) = written {
            log::warn!("failed to report command-line error: {io_error}");
        }
    }
    error.exit_code()
}

/// Validated run parameters.
#[derive(Debug, Clone, Serialize)]
pub struct RunConfig {
    pub problem: BakeoffProblem,
    pub order: usize,
    pub quadrature_order: usize,
    pub element_type: ElementType,
    pub geom: ElementType,
    pub preconditioner: PreconditionerKind,
    pub visualization: bool,
    pub grid: RankGrid,
    pub seed: u64,
    pub check_residual: bool,
    pub json: bool,
}

impl Args {
    pub fn visualization(&self) -> bool {
        !self.no_visualization
    }

    /// Checks the options against the number of ranks.
    ///
    /// The rank grid is validated before the preconditioner name.
    pub fn into_config(self, num_ranks: usize) -> Result<RunConfig, Error> {
        let procs = [
            self.num_procs_x.unwrap_or(num_ranks),
            self.num_procs_y,
            self.num_procs_z,
        ];
        let cells_per_rank = [self.num_el_per_proc_x, self.num_el_per_proc_y, self.num_el_per_proc_z];
        if procs.iter().product::<usize>() != num_ranks || cells_per_rank.contains(&0) {
            return Err(Error::InvalidDimensions { num_ranks, grid: procs });
        }
        let preconditioner: PreconditionerKind = self.preconditioner.parse()?;
        let problem = BakeoffProblem::from_number(self.problem).ok_or_else(|| {
            Error::Usage(format!("invalid problem {}, expected 1, 2, 3 or 4", self.problem))
        })?;

        Ok(RunConfig {
            problem,
            order: self.order,
            quadrature_order: self
                .quadrature_order
                .unwrap_or(default_quadrature_order(self.order)),
            element_type: self.element_type,
            geom: self.geom,
            preconditioner,
            visualization: self.visualization(),
            grid: RankGrid::new(procs, cells_per_rank),
            seed: self.seed,
            check_residual: self.check_residual,
            json: self.json,
        })
    }
}

/// Degree of the default quadrature rule, which uses `order + 2` points per direction.
pub fn default_quadrature_order(order: usize) -> usize {
    2 * (order + 2) - 1
}

impl RunConfig {
    /// Echoes the effective options.
    pub fn print_options(&self, out: &mut impl Write) -> io::Result<()> {
        let [px, py, pz] = self.grid.procs;
        let [ex, ey, ez] = self.grid.cells_per_rank;
        writeln!(out, "Options:")?;
        writeln!(out, "   --problem {}", self.problem.number())?;
        writeln!(out, "   --order {}", self.order)?;
        writeln!(out, "   --quadrature-order {}", self.quadrature_order)?;
        writeln!(out, "   --element-type {}", self.element_type)?;
        writeln!(out, "   --geom {}", self.geom)?;
        writeln!(out, "   --preconditioner {}", self.preconditioner)?;
        if self.visualization {
            writeln!(out, "   --visualization")?;
        } else {
            writeln!(out, "   --no-visualization")?;
        }
        writeln!(out, "   --num-procs-x {px}")?;
        writeln!(out, "   --num-procs-y {py}")?;
        writeln!(out, "   --num-procs-z {pz}")?;
        writeln!(out, "   --num-el-per-proc-x {ex}")?;
        writeln!(out, "   --num-el-per-proc-y {ey}")?;
        writeln!(out, "   --num-el-per-proc-z {ez}")?;
        writeln!(out, "   --seed {}", self.seed)?;
        if self.check_residual {
            writeln!(out, "   --check-residual")?;
        }
        if self.json {
            writeln!(out, "   --json")?;
        }
        writeln!(out)
    }
}
