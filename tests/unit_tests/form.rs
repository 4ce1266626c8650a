use crate::distributed_mesh;
use bakeoff::assembly::SparseBilinearForm;
use bakeoff::comm::{spawn_ranks, Communicator, ReduceOp, SerialComm};
use bakeoff::form::PaBilinearForm;
use bakeoff::kernels::Integrator;
use bakeoff::mesh::RankGrid;
use bakeoff::options::default_quadrature_order;
use bakeoff::space::H1Space;
use bakeoff_sparse::cg::LinearOperator;
use nalgebra::{DMatrix, DVector, DVectorView, DVectorViewMut};
use util::assert_approx_matrix_eq;

fn assembled_form<'a>(space: &'a H1Space<'a>, integrator: Integrator) -> PaBilinearForm<'a> {
    let mut form = PaBilinearForm::new(space, integrator, 1.0, default_quadrature_order(space.order())).unwrap();
    form.assemble().unwrap();
    form
}

fn smooth_values(space: &H1Space) -> Vec<f64> {
    (0..space.num_nodes())
        .flat_map(|n| {
            let p = space.node_coordinates(n);
            (0..space.vdim()).map(move |c| (p.x - 0.3 * c as f64).sin() + p.y * p.z + 0.5 * p.z * p.z)
        })
        .collect()
}

#[test]
fn mass_of_unit_cube_is_one() {
    let grid = RankGrid::new([1, 1, 1], [2, 3, 2]);
    let pmesh = distributed_mesh(0, &grid);
    let space = H1Space::new(&pmesh, 3, 1).unwrap();
    let form = assembled_form(&space, Integrator::Mass);
    let ones = vec![1.0; space.vsize()];
    let mut m_ones = vec![0.0; space.vsize()];
    form.mult(&ones, &mut m_ones);
    let volume: f64 = m_ones.iter().sum();
    assert!((volume - 1.0).abs() < 1e-12);
}

#[test]
fn diffusion_annihilates_constants() {
    let grid = RankGrid::new([1, 1, 1], [2, 2, 2]);
    let pmesh = distributed_mesh(0, &grid);
    let space = H1Space::new(&pmesh, 4, 3).unwrap();
    let form = assembled_form(&space, Integrator::Diffusion);
    let x = vec![2.5; space.vsize()];
    let mut y = vec![1.0; space.vsize()];
    form.mult(&x, &mut y);
    assert!(y.iter().all(|v| v.abs() < 1e-11));
}

#[test]
fn diffusion_energy_of_linear_function() {
    // u = x + 2y has |grad u|^2 = 5 on the unit cube
    let grid = RankGrid::new([1, 1, 1], [2, 1, 3]);
    let pmesh = distributed_mesh(0, &grid);
    let space = H1Space::new(&pmesh, 2, 1).unwrap();
    let form = assembled_form(&space, Integrator::Diffusion);
    let u: Vec<f64> = (0..space.num_nodes())
        .map(|n| {
            let p = space.node_coordinates(n);
            p.x + 2.0 * p.y
        })
        .collect();
    let mut au = vec![0.0; space.vsize()];
    form.mult(&u, &mut au);
    let energy: f64 = u.iter().zip(&au).map(|(a, b)| a * b).sum();
    assert!((energy - 5.0).abs() < 1e-11);
}

#[test]
fn partial_assembly_agrees_with_assembled_matrix() {
    let grid = RankGrid::new([1, 1, 1], [2, 1, 2]);
    let pmesh = distributed_mesh(0, &grid);
    for (integrator, vdim) in [
        (Integrator::Mass, 1),
        (Integrator::Mass, 3),
        (Integrator::Diffusion, 1),
        (Integrator::Diffusion, 3),
    ] {
        let space = H1Space::new(&pmesh, 2, vdim).unwrap();
        let form = assembled_form(&space, integrator);
        let mut sparse = SparseBilinearForm::new(&space);
        form.assemble_bilinear_form(&mut sparse).unwrap();
        let matrix = DMatrix::from(sparse.local_matrix().unwrap());

        let x = DVector::from_vec(smooth_values(&space));
        let mut y = DVector::zeros(space.vsize());
        form.mult(x.as_slice(), y.as_mut_slice());
        let expected = &matrix * &x;
        let abstol = 1e-12 * expected.amax().max(1.0);
        assert_approx_matrix_eq!(&y, &expected, abstol = abstol);

        assert_approx_matrix_eq!(&matrix, &matrix.transpose(), abstol = 1e-13);
    }
}

#[test]
fn essential_rows_act_as_identity() {
    let comm = SerialComm::new();
    let grid = RankGrid::new([1, 1, 1], [2, 2, 2]);
    let pmesh = distributed_mesh(0, &grid);
    let space = H1Space::new(&pmesh, 2, 1).unwrap();
    let form = assembled_form(&space, Integrator::Diffusion);
    let ess = space.essential_true_dofs(&[true; 6]);

    let x = vec![0.75; space.vsize()];
    let b = vec![-1.0; space.vsize()];
    let system = form.form_linear_system(&comm, &ess, &x, &b);
    for &i in &ess {
        assert_eq!(system.b[i], 0.75);
        assert_eq!(system.x[i], 0.75);
    }

    let v = DVector::from_fn(space.true_vsize(), |i, _| (i % 5) as f64);
    let mut w = DVector::zeros(space.true_vsize());
    system
        .operator
        .apply(DVectorViewMut::from(&mut w), DVectorView::from(&v))
        .unwrap();
    for &i in &ess {
        assert_eq!(w[i], v[i]);
    }
}

#[test]
fn constrained_system_is_consistent_across_decompositions() {
    // The same global problem solved on 1 and on 4 ranks gives the same right-hand side norm
    let norm_of_rhs = |grid: RankGrid| {
        spawn_ranks(grid.num_ranks(), |comm| {
            let pmesh = distributed_mesh(comm.rank(), &grid);
            let space = H1Space::new(&pmesh, 2, 1).unwrap();
            let form = assembled_form(&space, Integrator::Diffusion);
            let ess = space.essential_true_dofs(&[true; 6]);
            let x = smooth_values(&space);
            let mut b = vec![0.0; space.vsize()];
            form.mult(&x, &mut b);
            let system = form.form_linear_system(&comm, &ess, &x, &b);
            comm.all_reduce_scalar(system.b.norm_squared(), ReduceOp::Sum)
        })[0]
    };
    let serial = norm_of_rhs(RankGrid::new([1, 1, 1], [4, 4, 2]));
    let distributed = norm_of_rhs(RankGrid::new([2, 2, 1], [2, 2, 2]));
    assert!((serial - distributed).abs() <= 1e-10 * serial);
}

#[test]
fn operator_matches_assembled_system_matrix() {
    let grid = RankGrid::new([2, 1, 2], [1, 2, 1]);
    spawn_ranks(grid.num_ranks(), |comm| {
        let pmesh = distributed_mesh(comm.rank(), &grid);
        for vdim in [1, 3] {
            let space = H1Space::new(&pmesh, 2, vdim).unwrap();
            let form = assembled_form(&space, Integrator::Mass);
            let ess = space.essential_true_dofs(&[true; 6]);
            let mut sparse = SparseBilinearForm::new(&space);
            sparse.use_precomputed_sparsity();
            form.assemble_bilinear_form(&mut sparse).unwrap();
            let matrix = sparse.form_system_matrix(&comm, &ess).unwrap();
            assert_eq!(matrix.local_rows(), space.true_vsize());
            assert_eq!(matrix.global_rows(), space.global_true_vsize());

            let x0 = vec![0.0; space.vsize()];
            let system = form.form_linear_system(&comm, &ess, &x0, &x0);
            let x = DVector::from_fn(space.true_vsize(), |i, _| ((space.first_true_dof() + i) % 13) as f64 / 13.0);
            let mut expected = DVector::zeros(space.true_vsize());
            system
                .operator
                .apply(DVectorViewMut::from(&mut expected), DVectorView::from(&x))
                .unwrap();
            let mut y = DVector::zeros(space.true_vsize());
            matrix.mult(&comm, x.as_slice(), y.as_mut_slice());
            assert_approx_matrix_eq!(&y, &expected, abstol = 1e-13);
        }
    });
}
