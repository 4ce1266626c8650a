use crate::distributed_mesh;
use bakeoff::assembly::{DomainIntegrator, SparseBilinearForm};
use bakeoff::comm::SerialComm;
use bakeoff::form::PaBilinearForm;
use bakeoff::kernels::Integrator;
use bakeoff::mesh::RankGrid;
use bakeoff::options::{default_quadrature_order, BakeoffProblem};
use bakeoff::precond::{build_matrix, lumped_mass_matrix, Preconditioner, PreconditionerKind};
use bakeoff::space::H1Space;
use matrixcompare::assert_matrix_eq;
use nalgebra::DMatrix;

const ORDER: usize = 2;

fn assembled_form<'a>(space: &'a H1Space<'a>, integrator: Integrator) -> PaBilinearForm<'a> {
    let mut form = PaBilinearForm::new(space, integrator, 1.0, default_quadrature_order(space.order())).unwrap();
    form.assemble().unwrap();
    form
}

fn all_boundary_dofs(space: &H1Space) -> Vec<usize> {
    space.essential_true_dofs(&[true; 6])
}

#[test]
fn lumped_mass_is_row_sum_of_mass_matrix() {
    let comm = SerialComm::new();
    let grid = RankGrid::new([1, 1, 1], [2, 1, 2]);
    let pmesh = distributed_mesh(0, &grid);
    let space = H1Space::new(&pmesh, ORDER, 1).unwrap();
    let qorder = default_quadrature_order(ORDER);

    let mass = assembled_form(&space, Integrator::Mass);
    let ones = vec![1.0; space.vsize()];
    let mut expected = vec![0.0; space.vsize()];
    mass.mult(&ones, &mut expected);

    // The diffusion operator is lumped through an auxiliary unit mass form
    let diffusion = assembled_form(&space, Integrator::Diffusion);
    for operator in [&mass, &diffusion] {
        let lumped = lumped_mass_matrix(&comm, operator, qorder).unwrap();
        let diagonal = lumped.diagonal();
        assert_eq!(lumped.local_nnz(), space.true_vsize());
        assert!(diagonal.iter().all(|&d| d > 0.0));
        for (d, m) in diagonal.iter().zip(&expected) {
            assert!((d - m).abs() <= 1e-13);
        }
        assert!((diagonal.sum() - 1.0).abs() < 1e-12);
    }
}

#[test]
fn lumped_mass_of_vector_diffusion_is_positive() {
    let comm = SerialComm::new();
    let grid = RankGrid::new([1, 1, 1], [2, 2, 1]);
    let pmesh = distributed_mesh(0, &grid);
    let space = H1Space::new(&pmesh, ORDER, 3).unwrap();
    let diffusion = assembled_form(&space, Integrator::Diffusion);
    let matrix = build_matrix(
        &comm,
        PreconditionerKind::LumpedMass,
        BakeoffProblem::Bp4,
        &diffusion,
        None,
        &all_boundary_dofs(&space),
        default_quadrature_order(ORDER),
    )
    .unwrap()
    .unwrap();
    let diagonal = matrix.diagonal();
    assert!(diagonal.iter().all(|&d| d > 0.0));
    // Every component carries the full volume
    assert!((diagonal.sum() - 3.0).abs() < 1e-12);
    assert!(Preconditioner::new(PreconditionerKind::LumpedMass, Some(&matrix)).is_ok());
}

#[test]
fn lor_matrix_discretizes_problem_integrator_on_refined_mesh() {
    let comm = SerialComm::new();
    let grid = RankGrid::new([1, 1, 1], [2, 2, 2]);
    let pmesh = distributed_mesh(0, &grid);
    let space = H1Space::new(&pmesh, ORDER, 1).unwrap();
    let lor_mesh = pmesh.refined_at(space.nodes_1d());
    let lor_space = H1Space::new(&lor_mesh, 1, 1).unwrap();
    assert_eq!(lor_space.vsize(), space.vsize());
    let ess_tdofs = all_boundary_dofs(&space);

    for (problem, integrator, other) in [
        (BakeoffProblem::Bp1, DomainIntegrator::Mass, DomainIntegrator::Diffusion),
        (BakeoffProblem::Bp3, DomainIntegrator::Diffusion, DomainIntegrator::Mass),
    ] {
        let hpc = assembled_form(&space, problem.integrator());
        let mut target = SparseBilinearForm::new(&lor_space);
        let lor = build_matrix(
            &comm,
            PreconditionerKind::Lor,
            problem,
            &hpc,
            Some(&mut target),
            &ess_tdofs,
            default_quadrature_order(ORDER),
        )
        .unwrap()
        .unwrap();

        let expected_matrix = |integrator| {
            let mut form = SparseBilinearForm::new(&lor_space);
            form.add_domain_integrator(integrator, 1.0);
            form.assemble().unwrap();
            DMatrix::from(form.form_system_matrix(&comm, &ess_tdofs).unwrap().local())
        };
        let lor = DMatrix::from(lor.local());
        assert_matrix_eq!(lor, expected_matrix(integrator), comp = abs, tol = 1e-13);
        assert!((&lor - expected_matrix(other)).amax() > 1e-3);
    }
}

#[test]
fn jacobi_uses_diagonal_of_high_order_operator() {
    let comm = SerialComm::new();
    let grid = RankGrid::new([1, 1, 1], [2, 1, 1]);
    let pmesh = distributed_mesh(0, &grid);
    let space = H1Space::new(&pmesh, ORDER, 1).unwrap();
    let ess_tdofs = all_boundary_dofs(&space);
    let hpc = assembled_form(&space, Integrator::Diffusion);

    let mut target = SparseBilinearForm::new(&space);
    let matrix = build_matrix(
        &comm,
        PreconditionerKind::Jacobi,
        BakeoffProblem::Bp3,
        &hpc,
        Some(&mut target),
        &ess_tdofs,
        default_quadrature_order(ORDER),
    )
    .unwrap()
    .unwrap();
    let diagonal = matrix.diagonal();

    // Diagonal of the matrix-free operator, column by column
    let n = space.vsize();
    let mut unit = vec![0.0; n];
    let mut column = vec![0.0; n];
    for i in 0..n {
        unit[i] = 1.0;
        hpc.mult(&unit, &mut column);
        unit[i] = 0.0;
        let expected = if ess_tdofs.contains(&i) { 1.0 } else { column[i] };
        assert!((diagonal[i] - expected).abs() < 1e-12, "dof {i}");
    }
    assert!(Preconditioner::new(PreconditionerKind::Jacobi, Some(&matrix)).is_ok());
}

#[test]
fn assembled_forms_are_needed_by_matrix_based_preconditioners() {
    assert!(PreconditionerKind::Lor.needs_assembled_form());
    assert!(PreconditionerKind::Ho.needs_assembled_form());
    assert!(PreconditionerKind::Jacobi.needs_assembled_form());
    assert!(!PreconditionerKind::None.needs_assembled_form());
    assert!(!PreconditionerKind::LumpedMass.needs_assembled_form());
}
