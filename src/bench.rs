//! The benchmark driver: runs one bake-off problem on one rank of a communicator.
use crate::assembly::SparseBilinearForm;
use crate::basis::qpoints_per_element;
use crate::comm::{Communicator, ReduceOp};
use crate::error::Error;
use crate::form::{LinearSystem, PaBilinearForm};
use crate::mesh::{CartesianMesh, ParMesh};
use crate::options::RunConfig;
use crate::precond::{self, Preconditioner, PreconditionerKind};
use crate::report::{BenchmarkReport, SolveReport, G};
use crate::solver::{self, CgSettings};
use crate::space::H1Space;
use crate::state::{global_norm_squared, ReferenceState};
use crate::timing::time_stage;
use crate::vis;
use eyre::{eyre, WrapErr};
use log::{debug, info, warn};
use nalgebra::DVector;
use std::io::Write;

/// Polynomial order of the mesh geometry.
pub const MESH_ORDER: usize = 1;

macro_rules! root_print {
    ($comm:expr, $($arg:tt)*) => {
        if $comm.is_root() {
            print!($($arg)*);
            let _ = std::io::stdout().flush();
        }
    };
}

macro_rules! root_println {
    ($comm:expr, $($arg:tt)*) => {
        if $comm.is_root() {
            println!($($arg)*);
        }
    };
}

/// Result of a run on one rank.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    /// Full report, only on rank 0.
    pub report: Option<BenchmarkReport>,
    pub solve: SolveReport,
    pub global_dofs: usize,
    /// The solution over local dofs.
    pub solution: DVector<f64>,
    /// The reference solution over local dofs.
    pub reference: DVector<f64>,
    /// The local right-hand side `b = A x0`.
    pub rhs: DVector<f64>,
}

/// Runs the benchmark described by `config`. Collective.
///
/// Progress and timings are printed on rank 0.
pub fn run<C: Communicator>(comm: &C, config: &RunConfig) -> Result<RunOutcome, Error> {
    let problem = config.problem;
    let kind = config.preconditioner;
    if comm.is_root() {
        if let Err(err) = config.print_options(&mut std::io::stdout().lock()) {
            warn!("failed to print options: {err}");
        }
    }

    // Serial mesh
    let mut mesh = CartesianMesh::new(config.grid.global_cells(), config.element_type);
    let qpts = qpoints_per_element(config.geom, config.quadrature_order);
    root_println!(comm, "High-performance version using integration rule with {qpts} points ...");
    if !mesh.matches_geometry(config.geom) {
        return Err(Error::GeometryMismatch {
            mesh: mesh.element_type(),
            geom: config.geom,
        });
    } else if !mesh.matches_nodes(MESH_ORDER) {
        root_println!(
            comm,
            "Switching the mesh curvature to match the optimized value (order {MESH_ORDER}) ..."
        );
        mesh.set_curvature(MESH_ORDER);
    }

    // Parallel mesh
    root_println!(comm, "Initializing parallel mesh ...");
    let partitioning = config.grid.partitioning();
    let pmesh = ParMesh::new(comm.rank(), &config.grid, &mesh, &partitioning)?;
    drop(mesh);
    precond::check_mesh_support(&pmesh, kind)?;

    // High-order space
    let space = H1Space::new(&pmesh, config.order, problem.vdim())?;
    let size = space.global_true_vsize();
    root_println!(comm, "Number of finite element unknowns: {size}");
    info!(
        "rank {}: {} elements, {} local dofs, {} true dofs",
        comm.rank(),
        pmesh.num_elements(),
        space.vsize(),
        space.true_vsize()
    );

    let lor_mesh = (kind == PreconditionerKind::Lor).then(|| pmesh.refined_at(space.nodes_1d()));
    let lor_space = lor_mesh
        .as_ref()
        .map(|lor_mesh| H1Space::new(lor_mesh, 1, problem.vdim()))
        .transpose()?;

    // Essential dofs on the whole boundary
    let ess_tdofs = match pmesh.bdr_attributes().iter().max() {
        Some(&max_attribute) => space.essential_true_dofs(&vec![true; max_attribute as usize]),
        None => Vec::new(),
    };

    let mut state = ReferenceState::new(comm, &space, config.seed, problem.is_diffusion());

    let mut assembled_pc = if !kind.needs_assembled_form() {
        None
    } else if let Some(lor_space) = &lor_space {
        Some(SparseBilinearForm::new(lor_space))
    } else {
        Some(SparseBilinearForm::new(&space))
    };

    let mut stages = Vec::new();

    // Stage 1: high-performance operator setup
    root_print!(comm, "Assembling the local matrix ...");
    let (hpc, timing) = time_stage(comm, || {
        let mut form = PaBilinearForm::new(&space, problem.integrator(), 1.0, config.quadrature_order)?;
        form.assemble()?;
        Ok::<_, Error>(form)
    });
    if let Some(t) = timing {
        let [slowest, fastest] = t.mdofs_per_second(size, 1);
        println!("{}", t.done_line());
        println!("\n\"DOFs/sec\" in local assembly: {} ({}) million.\n", G(slowest), G(fastest));
        stages.push(t.report("assembly", Some((size, 1))));
    }
    let hpc = hpc?;

    // Stage 2: operator application b = A x
    root_print!(comm, "Applying the matrix ...");
    let ((), timing) = time_stage(comm, || hpc.mult(state.x.as_slice(), state.b.as_mut_slice()));
    if let Some(t) = timing {
        let [slowest, fastest] = t.mdofs_per_second(size, 1);
        println!("{}", t.done_line());
        println!("\n\"DOFs/sec\" in matrix multiplication: {} ({}) million.\n", G(slowest), G(fastest));
        stages.push(t.report("apply", Some((size, 1))));
    }
    state.x.fill(0.0);
    if config.check_residual {
        // Boundary values of the reference solution make x0 the exact solution of the system
        let essential = space.essential_local_mask(comm, &ess_tdofs);
        for (i, &marked) in essential.iter().enumerate() {
            if marked {
                state.x[i] = state.x0[i];
            }
        }
    }

    // Stage 3: constrained system over true dofs
    root_print!(comm, "FormLinearSystem() ...");
    let (system, timing) = time_stage(comm, || {
        hpc.form_linear_system(comm, &ess_tdofs, state.x.as_slice(), state.b.as_slice())
    });
    if let Some(t) = timing {
        let [slowest, fastest] = t.mdofs_per_second(size, 1);
        println!("{}", t.done_line());
        println!("\n\"DOFs/sec\" in FormLinearSystem(): {} ({}) million.\n", G(slowest), G(fastest));
        stages.push(t.report("form_linear_system", Some((size, 1))));
    }
    let LinearSystem {
        operator,
        x: mut x_true,
        b: b_true,
    } = system;

    // Stage 4: matrix for the preconditioner
    root_print!(comm, "Assembling the preconditioning matrix ...");
    let (pc_matrix, timing) = time_stage(comm, || {
        precond::build_matrix(
            comm,
            kind,
            problem,
            &hpc,
            assembled_pc.as_mut(),
            &ess_tdofs,
            config.quadrature_order,
        )
    });
    if let Some(t) = timing {
        println!(" done, {}s.", G(t.max));
        stages.push(t.report("preconditioner", None));
    }
    let pc_matrix = pc_matrix?;
    if let Some(matrix) = &pc_matrix {
        debug!(
            "rank {}: preconditioner matrix with {} rows, {} nonzeros in the local block",
            comm.rank(),
            matrix.local_rows(),
            matrix.local_nnz()
        );
    }

    // Stage 5: CG, including the preconditioner setup
    let settings = CgSettings::default();
    let (solve, timing) = time_stage(comm, || -> Result<SolveReport, Error> {
        let preconditioner = Preconditioner::new(kind, pc_matrix.as_ref());
        let failed = comm.all_reduce_scalar(if preconditioner.is_err() { 1.0 } else { 0.0 }, ReduceOp::Max);
        let preconditioner = preconditioner?;
        if failed > 0.0 {
            return Err(eyre!("preconditioner setup failed on another rank").into());
        }
        solver::solve(comm, &operator, &preconditioner, &b_true, &mut x_true, &settings)
    });
    let solve = solve?;
    if let Some(t) = timing {
        let iterations = solve.iterations as f64;
        let [slowest, fastest] = t.mdofs_per_second(size, solve.iterations);
        println!("Total CG time:    {} ({}) sec.", G(t.max), G(t.min));
        println!("Time per CG step: {} ({}) sec.", G(t.max / iterations), G(t.min / iterations));
        println!("\n\"DOFs/sec\" in CG: {} ({}) million.\n", G(slowest), G(fastest));
        stages.push(t.report("cg", Some((size, solve.iterations))));
    }

    // Recovery of the local solution
    hpc.recover_fem_solution(comm, &x_true, state.x.as_mut_slice());

    let relative_error = if config.check_residual {
        let mut x0_true = DVector::zeros(space.true_vsize());
        space.restrict(state.x0.as_slice(), x0_true.as_mut_slice());
        let norm_x0 = global_norm_squared(comm, &x0_true).sqrt();
        let norm_err = global_norm_squared(comm, &(&x_true - &x0_true)).sqrt();
        root_println!(
            comm,
            "|| x - x0 ||_2 / || x0 ||_2 = {}/{}={}",
            G(norm_err),
            G(norm_x0),
            G(norm_err / norm_x0)
        );
        Some(norm_err / norm_x0)
    } else {
        None
    };

    if config.visualization {
        if let Err(err) = vis::send_solution(comm, &space, state.x.as_slice(), vis::GLVIS_HOST, vis::GLVIS_PORT) {
            warn!("visualization skipped: {err:#}");
        }
    }

    let report = comm.is_root().then(|| BenchmarkReport {
        problem: problem.number(),
        order: config.order,
        quadrature_points: qpts,
        preconditioner: kind,
        ranks: comm.size(),
        global_dofs: size,
        stages,
        solve: solve.clone(),
        relative_error,
    });
    if config.json {
        if let Some(report) = &report {
            let json = serde_json::to_string_pretty(report).wrap_err("failed to serialize the report")?;
            println!("{json}");
        }
    }

    let outcome = RunOutcome {
        report,
        solve,
        global_dofs: size,
        solution: state.x.clone(),
        reference: state.x0.clone(),
        rhs: state.b.clone(),
    };

    // Teardown in reverse order of construction
    drop(operator);
    drop(hpc);
    drop(pc_matrix);
    drop(assembled_pc);
    drop(state);
    drop(lor_space);
    drop(lor_mesh);
    drop(space);
    drop(pmesh);
    drop(partitioning);

    Ok(outcome)
}
