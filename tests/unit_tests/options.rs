use bakeoff::comm::spawn_ranks;
use bakeoff::error::Error;
use bakeoff::mesh::ElementType;
use bakeoff::options::{default_quadrature_order, parse_args, report_parse_failure, BakeoffProblem};
use bakeoff::precond::PreconditionerKind;

#[test]
fn defaults() {
    let config = parse_args(["bp"]).unwrap().into_config(1).unwrap();
    assert_eq!(config.problem, BakeoffProblem::Bp1);
    assert_eq!(config.order, 3);
    assert_eq!(config.quadrature_order, 9);
    assert_eq!(config.element_type, ElementType::Hexahedron);
    assert_eq!(config.geom, ElementType::Hexahedron);
    assert_eq!(config.preconditioner, PreconditionerKind::None);
    assert!(config.visualization);
    assert_eq!(config.grid.procs, [1, 1, 1]);
    assert_eq!(config.grid.cells_per_rank, [4, 4, 4]);
    assert!(!config.check_residual);
}

#[test]
fn rank_grid_defaults_to_ranks_along_x() {
    let config = parse_args(["bp"]).unwrap().into_config(6).unwrap();
    assert_eq!(config.grid.procs, [6, 1, 1]);
    assert_eq!(config.grid.global_cells(), [24, 4, 4]);

    let config = parse_args(["bp", "--nx", "2", "--ny", "3", "--ex", "1"])
        .unwrap()
        .into_config(6)
        .unwrap();
    assert_eq!(config.grid.procs, [2, 3, 1]);
    assert_eq!(config.grid.global_cells(), [2, 12, 4]);
}

#[test]
fn explicit_options() {
    let args = [
        "bp", "-p", "4", "-o", "2", "--ir", "7", "--pc", "lor", "--no-vis", "--seed", "5", "--check-residual",
    ];
    let config = parse_args(args).unwrap().into_config(1).unwrap();
    assert_eq!(config.problem, BakeoffProblem::Bp4);
    assert!(config.problem.is_vector() && config.problem.is_diffusion());
    assert_eq!(config.order, 2);
    assert_eq!(config.quadrature_order, 7);
    assert_eq!(config.preconditioner, PreconditionerKind::Lor);
    assert!(!config.visualization);
    assert_eq!(config.seed, 5);
    assert!(config.check_residual);
    assert_eq!(default_quadrature_order(2), 7);
}

#[test]
fn visualization_flags_override_each_other() {
    let config = parse_args(["bp", "--no-vis", "--vis"]).unwrap().into_config(1).unwrap();
    assert!(config.visualization);
    let config = parse_args(["bp", "--vis", "--no-vis"]).unwrap().into_config(1).unwrap();
    assert!(!config.visualization);
}

#[test]
fn invalid_options_map_to_exit_codes() {
    let err = parse_args(["bp", "-p", "5"]).unwrap_err();
    assert!(matches!(err, Error::Usage(_)));
    assert_eq!(err.exit_code(), 1);

    let err = parse_args(["bp", "--bogus"]).unwrap_err();
    assert_eq!(err.exit_code(), 1);

    let err = parse_args(["bp", "--help"]).unwrap_err();
    assert!(matches!(err, Error::Help(_)));
    assert_eq!(err.exit_code(), 0);

    let err = parse_args(["bp", "--nx", "2"]).unwrap().into_config(3).unwrap_err();
    assert!(matches!(err, Error::InvalidDimensions { num_ranks: 3, grid: [2, 1, 1] }));
    assert_eq!(err.exit_code(), 2);
    assert!(err.is_fatal());

    let err = parse_args(["bp", "--pc", "ilu"]).unwrap().into_config(1).unwrap_err();
    assert!(matches!(err, Error::UnknownPreconditioner(ref name) if name == "ilu"));
    assert_eq!(err.exit_code(), 3);
    assert!(!err.is_fatal());

    // The rank grid is checked first
    let err = parse_args(["bp", "--pc", "ilu", "--ny", "2"])
        .unwrap()
        .into_config(1)
        .unwrap_err();
    assert_eq!(err.exit_code(), 2);
}

#[test]
fn options_echo() {
    let config = parse_args(["bp", "--pc", "jacobi", "--no-vis"])
        .unwrap()
        .into_config(1)
        .unwrap();
    let mut out = Vec::new();
    config.print_options(&mut out).unwrap();
    let text = String::from_utf8(out).unwrap();
    assert!(text.starts_with("Options:\n   --problem 1\n   --order 3\n"));
    assert!(text.contains("   --preconditioner jacobi\n"));
    assert!(text.contains("   --no-visualization\n"));
    assert!(text.contains("   --geom hex\n"));
    assert!(!text.contains("--json"));
}

#[test]
fn options_echo_includes_json_flag() {
    let config = parse_args(["bp", "--json", "--el", "tet", "--geom", "tet"])
        .unwrap()
        .into_config(1)
        .unwrap();
    assert!(config.json);
    assert_eq!(config.geom, ElementType::Tetrahedron);
    let mut out = Vec::new();
    config.print_options(&mut out).unwrap();
    let text = String::from_utf8(out).unwrap();
    assert!(text.contains("   --element-type tet\n   --geom tet\n"));
    assert!(text.ends_with("   --json\n\n"));
}

#[test]
fn parse_failures_are_reported_on_root_only() {
    let outputs = spawn_ranks(4, |comm| {
        let mut out = Vec::new();
        let mut err = Vec::new();
        let usage = parse_args(["bp", "--bogus"]).unwrap_err();
        let usage_code = report_parse_failure(&comm, &usage, &mut out, &mut err);
        let help = parse_args(["bp", "--help"]).unwrap_err();
        let help_code = report_parse_failure(&comm, &help, &mut out, &mut err);
        (usage_code, help_code, out, err)
    });
    for (rank, (usage_code, help_code, out, err)) in outputs.into_iter().enumerate() {
        assert_eq!(usage_code, 1);
        assert_eq!(help_code, 0);
        if rank == 0 {
            assert!(String::from_utf8(out).unwrap().contains("Usage:"));
            assert!(String::from_utf8(err).unwrap().contains("--bogus"));
        } else {
            assert!(out.is_empty() && err.is_empty());
        }
    }
}
