//! The bake-off version of Example 1: a single mass or Poisson solve with the load `(1, phi)`.
//!
//! The mesh of the unit cube is sized from a refinement level, and the system is solved with
//! unpreconditioned CG after an untimed warm-up solve.
use crate::comm::{Communicator, SerialComm};
use crate::error::Error;
use crate::form::{assemble_domain_load, LinearSystem, PaBilinearForm};
use crate::kernels::Integrator;
use crate::mesh::{CartesianMesh, ElementType, ParMesh, RankGrid};
use crate::report::{SolveReport, G};
use crate::solver::{self, CgSettings};
use crate::space::H1Space;
use crate::timing::time_stage;
use bakeoff_sparse::cg::IdentityOperator;
use clap::Parser;
use eyre::eyre;
use log::{info, warn};
use nalgebra::DVector;
use std::io;
use std::io::Write;

pub const MAX_CG_ITERATIONS: usize = 200;
pub const CG_PRINT_LEVEL: i32 = 3;
pub const CG_REL_TOL: f64 = 1e-12;
/// Iterations of the warm-up solve preceding the timed one.
pub const WARM_UP_ITERATIONS: usize = 2;

#[derive(Debug, Clone, Parser)]
#[command(
    name = "ex1",
    version,
    about = "CEED bake-off problem based on Example 1: mass or Poisson solve on the unit cube"
)]
pub struct Ex1Args {
    /// Solve 2D or 3D problem. Only 3D is implemented.
    #[arg(long = "mesh-dimension", visible_alias = "dim", default_value_t = 3)]
    pub dim: usize,

    /// Set the problem size: 2^level mesh elements per processor.
    #[arg(short = 'l', long = "refinement-level", default_value_t = 0)]
    pub level: u32,

    /// Finite element order (polynomial degree).
    #[arg(short = 'o', long, default_value_t = 1)]
    pub order: usize,

    /// Problem 0: mass, 1: diffusion.
    #[arg(short = 'p', long, default_value_t = 0, value_parser = clap::value_parser!(u8).range(0..=1))]
    pub problem: u8,

    /// Element type 0: hexahedron, 1: tetrahedron.
    #[arg(short = 'e', long = "element-type", default_value_t = 0, value_parser = clap::value_parser!(u8).range(0..=1))]
    pub element_type: u8,

    /// Device configuration string. Only "cpu" is available.
    #[arg(short = 'd', long, default_value = "cpu")]
    pub device: String,
}

/// Validated parameters of an Example 1 run.
#[derive(Debug, Clone)]
pub struct Ex1Config {
    pub dim: usize,
    pub level: u32,
    pub order: usize,
    pub integrator: Integrator,
    pub element_type: ElementType,
    pub device: String,
}

impl Ex1Args {
    pub fn into_config(self) -> Ex1Config {
        Ex1Config {
            dim: self.dim,
            level: self.level,
            order: self.order,
            integrator: if self.problem == 0 {
                Integrator::Mass
            } else {
                Integrator::Diffusion
            },
            element_type: if self.element_type == 0 {
                ElementType::Hexahedron
            } else {
                ElementType::Tetrahedron
            },
            device: self.device,
        }
    }
}

impl Ex1Config {
    pub fn problem_number(&self) -> u8 {
        match self.integrator {
            Integrator::Mass => 0,
            Integrator::Diffusion => 1,
        }
    }

    pub fn print_options(&self, out: &mut impl Write) -> io::Result<()> {
        let element_type = u8::from(self.element_type.is_simplex());
        writeln!(out, "Options:")?;
        writeln!(out, "   --mesh-dimension {}", self.dim)?;
        writeln!(out, "   --refinement-level {}", self.level)?;
        writeln!(out, "   --order {}", self.order)?;
        writeln!(out, "   --problem {}", self.problem_number())?;
        writeln!(out, "   --element-type {element_type}")?;
        writeln!(out, "   --device {}", self.device)?;
        writeln!(out)
    }

    /// Degree integrated exactly by the rule of the bilinear form.
    pub fn quadrature_order(&self) -> usize {
        match self.integrator {
            Integrator::Mass => 2 * self.order + 2,
            Integrator::Diffusion => 2 * self.order,
        }
    }
}

/// Processor decomposition and mesh size derived from the number of ranks and the level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MeshLayout {
    /// Ranks along each axis.
    pub procs: [usize; 3],
    /// Cells along each axis of the serial mesh.
    pub serial_cells: [usize; 3],
    /// Uniform refinements applied to the serial mesh.
    pub par_ref_levels: u32,
}

impl MeshLayout {
    /// Cells along each axis after the uniform refinements.
    pub fn cells(&self) -> [usize; 3] {
        self.serial_cells.map(|n| n << self.par_ref_levels)
    }
}

/// Splits `2^log` as evenly as possible over three axes, the larger factors first.
fn split_power_of_two(log: u32) -> [u32; 3] {
    [log / 3 + u32::from(log % 3 > 0), log / 3 + u32::from(log % 3 > 1), log / 3]
}

/// Determines the decomposition of the unit cube for `num_procs` ranks at refinement `level`.
///
/// Levels beyond a multiple of three refine the serial mesh, every third level adds one uniform
/// refinement.
pub fn make_mesh(num_procs: usize, dim: usize, level: u32) -> Result<MeshLayout, Error> {
    let log_p = (num_procs as f64).log2().round().max(0.0) as u32;
    if num_procs == 0 || 1usize.checked_shl(log_p) != Some(num_procs) {
        return Err(eyre!("number of processor is not a power of 2: {num_procs}").into());
    }
    if dim != 3 {
        return Err(eyre!("dim = {dim} is NOT implemented!").into());
    }

    let procs = split_power_of_two(log_p).map(|s| 1usize << s);
    let ser_level = level % 3;
    let par_ref_levels = level / 3;
    let serial_cells = split_power_of_two(log_p + ser_level).map(|t| 1usize << t);
    Ok(MeshLayout {
        procs,
        serial_cells,
        par_ref_levels,
    })
}

/// Result of an Example 1 run.
#[derive(Debug, Clone)]
pub struct Ex1Outcome {
    pub layout: MeshLayout,
    pub global_elements: usize,
    pub global_dofs: usize,
    pub solve: SolveReport,
    /// The local load vector `(1, phi_i)`.
    pub rhs: DVector<f64>,
    pub solution: DVector<f64>,
}

/// Runs Example 1 on a single process, printing progress to stdout.
pub fn run(config: &Ex1Config) -> Result<Ex1Outcome, Error> {
    let comm = SerialComm::new();
    let mut out = io::stdout().lock();
    if let Err(err) = config.print_options(&mut out) {
        warn!("failed to print options: {err}");
    }
    drop(out);

    if config.device != "cpu" {
        return Err(eyre!("unsupported device configuration: {}", config.device).into());
    }
    println!("Device configuration: cpu");
    println!("Memory configuration: host-std");

    let layout = make_mesh(comm.size(), config.dim, config.level)?;
    let [px, py, pz] = layout.procs;
    let [nx, ny, nz] = layout.cells();
    println!("Processor partitioning: {px} {py} {pz}");
    println!("Mesh dimensions: {nx} {ny} {nz}");

    // The refined mesh is generated directly, which gives the same elements as refining the
    // serial mesh
    let grid = RankGrid::new([1, 1, 1], layout.cells());
    let mesh = CartesianMesh::new(grid.global_cells(), config.element_type);
    let partitioning = grid.partitioning();
    let pmesh = ParMesh::new(comm.rank(), &grid, &mesh, &partitioning)?;
    drop(mesh);
    let global_elements = pmesh.num_elements();
    println!("Total number of elements: {global_elements}");

    let space = H1Space::new(&pmesh, config.order, 1)?;
    let size = space.global_true_vsize();
    println!("Number of finite element unknowns: {size}");

    let ess_tdofs = match pmesh.bdr_attributes().iter().max() {
        Some(&max_attribute) => space.essential_true_dofs(&vec![true; max_attribute as usize]),
        None => Vec::new(),
    };

    let b = assemble_domain_load(&space, 1.0, 2 * config.order)?;
    let mut x = DVector::zeros(space.vsize());

    let mut form = PaBilinearForm::new(&space, config.integrator, 1.0, config.quadrature_order())?;
    form.assemble()?;
    let LinearSystem {
        operator,
        x: mut x_true,
        b: b_true,
    } = form.form_linear_system(&comm, &ess_tdofs, x.as_slice(), b.as_slice());

    let settings = CgSettings {
        rel_tol: CG_REL_TOL,
        abs_tol: 0.0,
        max_iter: MAX_CG_ITERATIONS,
        print_level: CG_PRINT_LEVEL,
    };

    // Untimed warm-up on a copy of the initial guess
    let warm_up = CgSettings {
        max_iter: WARM_UP_ITERATIONS,
        print_level: -1,
        ..settings.clone()
    };
    let mut x_warm_up = x_true.clone();
    solver::solve(&comm, &operator, &IdentityOperator, &b_true, &mut x_warm_up, &warm_up)?;
    info!("warm-up solve done");

    let (solve, timing) = time_stage(&comm, || {
        solver::solve(&comm, &operator, &IdentityOperator, &b_true, &mut x_true, &settings)
    });
    let solve = solve?;
    if let Some(t) = timing {
        let iterations = solve.iterations as f64;
        let [slowest, fastest] = t.mdofs_per_second(size, solve.iterations);
        println!();
        println!("Total CG time:    {} ({}) sec.", G(t.max), G(t.min));
        println!("Time per CG step: {} ({}) sec.", G(t.max / iterations), G(t.min / iterations));
        println!("\n\"DOFs/sec\" in CG: {} ({}) million.\n", G(slowest), G(fastest));
    }

    drop(operator);
    form.recover_fem_solution(&comm, &x_true, x.as_mut_slice());

    Ok(Ex1Outcome {
        layout,
        global_elements,
        global_dofs: size,
        solve,
        rhs: b,
        solution: x,
    })
}
