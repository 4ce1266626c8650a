use crate::distributed_mesh;
use bakeoff::bench::run;
use bakeoff::comm::{spawn_ranks, Communicator, SerialComm};
use bakeoff::error::Error;
use bakeoff::form::PaBilinearForm;
use bakeoff::mesh::{CartesianMesh, ElementType, ParMesh, RankGrid};
use bakeoff::options::{parse_args, RunConfig};
use bakeoff::precond::{check_mesh_support, PreconditionerKind};
use bakeoff::space::H1Space;

fn config(args: &[&str], num_ranks: usize) -> RunConfig {
    let args = ["bp", "--no-vis"].iter().chain(args).copied();
    parse_args(args).unwrap().into_config(num_ranks).unwrap()
}

#[test]
fn default_mass_problem_with_lumped_mass_preconditioner() {
    let comm = SerialComm::new();
    let outcome = run(&comm, &config(&["--pc", "lumpedmass"], 1)).unwrap();
    assert_eq!(outcome.global_dofs, 2197);
    assert!(outcome.solve.converged);
    assert!(outcome.solve.iterations > 0);
    assert!(outcome.solve.final_residual <= 1e-6 * outcome.solve.initial_residual);

    let report = outcome.report.unwrap();
    assert_eq!(report.problem, 1);
    assert_eq!(report.quadrature_points, 125);
    assert_eq!(report.preconditioner, PreconditionerKind::LumpedMass);
    let names: Vec<_> = report.stages.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, ["assembly", "apply", "form_linear_system", "preconditioner", "cg"]);
    let cg = report.stage("cg").unwrap();
    assert!(cg.min_seconds <= cg.max_seconds);
    assert!(cg.mdofs_per_second.is_some());
    assert!(report.stage("preconditioner").unwrap().mdofs_per_second.is_none());
}

#[test]
fn diffusion_with_lor_preconditioner_on_two_ranks() {
    let outcomes = spawn_ranks(2, |comm| {
        let config = config(&["-p", "3", "-o", "2", "--pc", "lor", "--ex", "2", "--ey", "2", "--ez", "2"], comm.size());
        run(&comm, &config).unwrap()
    });
    // 9 x 5 x 5 nodes
    assert!(outcomes.iter().all(|o| o.global_dofs == 225));
    assert!(outcomes.iter().all(|o| o.solve.converged));
    assert_eq!(outcomes[0].solve.iterations, outcomes[1].solve.iterations);
    assert!(outcomes[0].report.is_some());
    assert!(outcomes[1].report.is_none());
}

#[test]
fn vector_problems_with_assembled_preconditioners() {
    let comm = SerialComm::new();
    for (problem, pc) in [("2", "jacobi"), ("4", "ho"), ("2", "ho"), ("4", "jacobi")] {
        let config = config(&["-p", problem, "-o", "2", "--pc", pc, "--ex", "2", "--ey", "2", "--ez", "2"], 1);
        let outcome = run(&comm, &config).unwrap();
        assert_eq!(outcome.global_dofs, 3 * 125);
        assert!(outcome.solve.converged, "problem {problem} with {pc}");
    }
}

#[test]
fn diffusion_with_lumped_mass_preconditioner() {
    let comm = SerialComm::new();
    let config = config(&["-p", "3", "-o", "2", "--pc", "lumpedmass", "--ex", "3", "--ey", "2", "--ez", "2"], 1);
    let outcome = run(&comm, &config).unwrap();
    assert!(outcome.solve.converged);
}

#[test]
fn vector_diffusion_with_lumped_mass_preconditioner() {
    let comm = SerialComm::new();
    let config = config(&["-p", "4", "-o", "2", "--pc", "lumpedmass", "--ex", "2", "--ey", "2", "--ez", "2"], 1);
    let outcome = run(&comm, &config).unwrap();
    assert_eq!(outcome.global_dofs, 3 * 125);
    assert!(outcome.solve.converged);
    assert!(outcome.solve.final_residual <= 1e-6 * outcome.solve.initial_residual);
}

#[test]
fn rhs_is_operator_applied_to_reference_and_initial_guess_is_zero() {
    let comm = SerialComm::new();
    let config = config(&["-p", "3", "-o", "2", "--ex", "2", "--ey", "1", "--ez", "2", "--seed", "3"], 1);
    let outcome = run(&comm, &config).unwrap();

    let grid = RankGrid::new([1, 1, 1], [2, 1, 2]);
    let pmesh = distributed_mesh(0, &grid);
    let space = H1Space::new(&pmesh, 2, 1).unwrap();
    let mut form = PaBilinearForm::new(&space, config.problem.integrator(), 1.0, config.quadrature_order).unwrap();
    form.assemble().unwrap();
    let mut expected = vec![0.0; space.vsize()];
    form.mult(outcome.reference.as_slice(), &mut expected);
    let scale = expected.iter().fold(1.0f64, |m, v| m.max(v.abs()));
    for (b, e) in outcome.rhs.iter().zip(&expected) {
        assert!((b - e).abs() <= 1e-12 * scale);
    }

    // The zeroed initial guess supplies homogeneous boundary values
    for dof in space.essential_true_dofs(&[true; 6]) {
        assert_eq!(outcome.solution[dof], 0.0);
    }
}

#[test]
fn preconditioning_reduces_iterations() {
    let comm = SerialComm::new();
    let iterations = |pc: &str| {
        let config = config(&["-p", "3", "-o", "3", "--pc", pc, "--ex", "3", "--ey", "3", "--ez", "3"], 1);
        run(&comm, &config).unwrap().solve.iterations
    };
    assert!(iterations("ho") < iterations("none"));
}

#[test]
fn relative_error_is_reported_on_request() {
    let comm = SerialComm::new();
    let config = config(&["-p", "1", "-o", "2", "--ex", "2", "--ey", "2", "--ez", "2", "--check-residual"], 1);
    let outcome = run(&comm, &config).unwrap();
    let error = outcome.report.unwrap().relative_error.unwrap();
    assert!(error < 1e-3, "relative error {error}");
    // Boundary values are taken from the reference solution
    let grid = RankGrid::new([1, 1, 1], [2, 2, 2]);
    let pmesh = distributed_mesh(0, &grid);
    let space = H1Space::new(&pmesh, 2, 1).unwrap();
    for dof in space.essential_true_dofs(&[true; 6]) {
        assert_eq!(outcome.solution[dof], outcome.reference[dof]);
    }

    let outcome = run(&comm, &RunConfig { check_residual: false, ..config }).unwrap();
    assert!(outcome.report.unwrap().relative_error.is_none());
}

#[test]
fn decomposition_does_not_change_problem_size() {
    let args = ["-p", "4", "-o", "1", "--pc", "jacobi", "--ez", "2"];
    let serial = run(&SerialComm::new(), &config(&[&args[..], &["--ey", "2"]].concat(), 1)).unwrap();
    let distributed = spawn_ranks(3, |comm| {
        let config = config(&[&args[..], &["--nx", "1", "--ny", "3", "--ey", "1"]].concat(), 3);
        run(&comm, &config).unwrap()
    });
    // 5 x 3 x 3 and 5 x 4 x 3 nodes
    assert_eq!(serial.global_dofs, 3 * 45);
    assert!(distributed.iter().all(|o| o.global_dofs == 3 * 60 && o.solve.converged));
}

#[test]
fn mesh_must_match_kernel_geometry() {
    let comm = SerialComm::new();
    let err = run(&comm, &config(&["--el", "tet"], 1)).unwrap_err();
    assert!(matches!(
        err,
        Error::GeometryMismatch {
            mesh: ElementType::Tetrahedron,
            geom: ElementType::Hexahedron
        }
    ));
    assert_eq!(err.exit_code(), 4);
    assert!(err.to_string().contains("Rerun with a suitable --geom value."));

    let err = run(&comm, &config(&["--geom", "tet"], 1)).unwrap_err();
    assert_eq!(err.exit_code(), 4);
}

#[test]
fn tetrahedral_problems_run_with_matching_geometry() {
    let comm = SerialComm::new();
    for (problem, pc) in [("1", "jacobi"), ("3", "ho"), ("4", "lumpedmass")] {
        let args = ["-p", problem, "-o", "2", "--el", "tet", "--geom", "tet", "--pc", pc, "--ex", "2", "--ey", "2", "--ez", "2"];
        let outcome = run(&comm, &config(&args, 1)).unwrap();
        // The tet space shares the 5 x 5 x 5 node lattice of the hexahedral one
        let vdim = if problem == "4" { 3 } else { 1 };
        assert_eq!(outcome.global_dofs, vdim * 125);
        assert!(outcome.solve.converged, "problem {problem} with {pc}");
        let report = outcome.report.unwrap();
        // Degree 7 needs 5 collapsed Gauss points per direction
        assert_eq!(report.quadrature_points, 125);
    }
}

#[test]
fn lor_preconditioner_is_rejected_on_tetrahedra() {
    let comm = SerialComm::new();
    let err = run(&comm, &config(&["--el", "tet", "--geom", "tet", "--pc", "lor"], 1)).unwrap_err();
    assert!(matches!(err, Error::LorOnSimplex));
    assert_eq!(err.exit_code(), 6);
    assert_eq!(err.to_string(), "LOR not supported on simplices");
}

#[test]
fn unsupported_order_is_rejected() {
    let comm = SerialComm::new();
    for order in ["0", "11"] {
        let err = run(&comm, &config(&["-o", order, "--ex", "1", "--ey", "1", "--ez", "1"], 1)).unwrap_err();
        assert_eq!(err.exit_code(), 5);
        assert!(!err.is_fatal());
    }
}

#[test]
fn lor_preconditioner_requires_hexahedra() {
    let grid = RankGrid::new([1, 1, 1], [1, 1, 1]);
    let mesh = CartesianMesh::new(grid.global_cells(), ElementType::Tetrahedron);
    let pmesh = ParMesh::new(0, &grid, &mesh, &grid.partitioning()).unwrap();
    let err = check_mesh_support(&pmesh, PreconditionerKind::Lor).unwrap_err();
    assert!(matches!(err, Error::LorOnSimplex));
    assert_eq!(err.exit_code(), 6);
    assert!(err.is_fatal());
    assert!(check_mesh_support(&pmesh, PreconditionerKind::Jacobi).is_ok());
}
