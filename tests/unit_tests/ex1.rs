use bakeoff::error::Error;
use bakeoff::ex1::{make_mesh, run, Ex1Args, Ex1Config, MeshLayout};
use bakeoff::kernels::Integrator;
use bakeoff::mesh::ElementType;
use bakeoff::options::parse_command;

fn config(args: &[&str]) -> Ex1Config {
    let args = ["ex1"].iter().chain(args).copied();
    parse_command::<Ex1Args, _, _>(args).unwrap().into_config()
}

#[test]
fn mesh_layout_follows_refinement_level() {
    let layout = make_mesh(1, 3, 0).unwrap();
    assert_eq!(
        layout,
        MeshLayout {
            procs: [1, 1, 1],
            serial_cells: [1, 1, 1],
            par_ref_levels: 0
        }
    );

    // One serial level, then one uniform refinement
    let layout = make_mesh(1, 3, 4).unwrap();
    assert_eq!(layout.serial_cells, [2, 1, 1]);
    assert_eq!(layout.par_ref_levels, 1);
    assert_eq!(layout.cells(), [4, 2, 2]);

    let layout = make_mesh(8, 3, 0).unwrap();
    assert_eq!(layout.procs, [2, 2, 2]);
    assert_eq!(layout.cells(), [2, 2, 2]);

    let layout = make_mesh(4, 3, 5).unwrap();
    assert_eq!(layout.procs, [2, 2, 1]);
    assert_eq!(layout.serial_cells, [4, 2, 2]);
    assert_eq!(layout.cells(), [8, 4, 4]);
}

#[test]
fn invalid_layouts_are_rejected() {
    for (num_procs, dim) in [(3, 3), (0, 3), (1, 2)] {
        let err = make_mesh(num_procs, dim, 0).unwrap_err();
        assert!(matches!(err, Error::Library(_)));
        assert_eq!(err.exit_code(), 9);
    }
    assert!(make_mesh(3, 3, 0).unwrap_err().to_string().contains("not a power of 2"));
}

#[test]
fn options_map_to_problem_and_element_type() {
    let defaults = config(&[]);
    assert_eq!(defaults.dim, 3);
    assert_eq!(defaults.level, 0);
    assert_eq!(defaults.order, 1);
    assert_eq!(defaults.integrator, Integrator::Mass);
    assert_eq!(defaults.element_type, ElementType::Hexahedron);
    assert_eq!(defaults.device, "cpu");

    let config = config(&["--dim", "3", "-l", "4", "-o", "2", "-p", "1", "-e", "1"]);
    assert_eq!(config.integrator, Integrator::Diffusion);
    assert_eq!(config.element_type, ElementType::Tetrahedron);
    let mut out = Vec::new();
    config.print_options(&mut out).unwrap();
    let text = String::from_utf8(out).unwrap();
    assert!(text.contains("   --refinement-level 4\n   --order 2\n   --problem 1\n   --element-type 1\n"));

    let err = parse_command::<Ex1Args, _, _>(["ex1", "-p", "2"]).unwrap_err();
    assert_eq!(err.exit_code(), 1);
}

#[test]
fn hex_mass_problem_converges() {
    let outcome = run(&config(&["-l", "3", "-o", "2"])).unwrap();
    assert_eq!(outcome.layout.cells(), [2, 2, 2]);
    assert_eq!(outcome.global_elements, 8);
    assert_eq!(outcome.global_dofs, 125);
    assert!(outcome.solve.converged);
    assert!(outcome.solve.final_residual <= 1e-24 * outcome.solve.initial_residual);
    // The load (1, phi) sums to the volume
    assert!((outcome.rhs.sum() - 1.0).abs() < 1e-12);
}

#[test]
fn tet_mass_problem_converges() {
    let outcome = run(&config(&["-l", "3", "-o", "2", "-e", "1"])).unwrap();
    assert_eq!(outcome.global_elements, 48);
    assert_eq!(outcome.global_dofs, 125);
    assert!(outcome.solve.converged);
    assert!((outcome.rhs.sum() - 1.0).abs() < 1e-12);
}

#[test]
fn poisson_solution_peaks_at_center() {
    // -lap u = 1 with u = 0 on the boundary has a maximum of about 0.056 at the center
    for element_type in ["0", "1"] {
        let outcome = run(&config(&["-l", "3", "-o", "2", "-p", "1", "-e", element_type])).unwrap();
        assert!(outcome.solve.converged);
        // Node (2, 2, 2) of the 5 x 5 x 5 lattice
        let center = outcome.solution[2 + 5 * 2 + 25 * 2];
        assert!(center > 0.04 && center < 0.07, "center value {center}");
    }
}

#[test]
fn boundary_only_problem_needs_no_iterations() {
    let outcome = run(&config(&[])).unwrap();
    assert_eq!(outcome.global_dofs, 8);
    assert!(outcome.solve.converged);
    assert_eq!(outcome.solve.iterations, 0);
    assert!(outcome.solution.iter().all(|&u| u == 0.0));
}

#[test]
fn unsupported_configurations_are_rejected() {
    let err = run(&config(&["-o", "0"])).unwrap_err();
    assert!(matches!(err, Error::OrderMismatch(0)));

    let err = run(&config(&["-d", "cuda"])).unwrap_err();
    assert_eq!(err.exit_code(), 9);
}
