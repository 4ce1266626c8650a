use crate::distributed_mesh;
use bakeoff::comm::{spawn_ranks, Communicator, ReduceOp, SerialComm};
use bakeoff::mesh::RankGrid;
use bakeoff::space::H1Space;
use bakeoff::state::{global_norm_squared, ReferenceState};
use nalgebra::DVector;

#[test]
fn initial_vectors() {
    let comm = SerialComm::new();
    let grid = RankGrid::new([1, 1, 1], [2, 2, 2]);
    let pmesh = distributed_mesh(0, &grid);
    let space = H1Space::new(&pmesh, 2, 1).unwrap();
    let state = ReferenceState::new(&comm, &space, 7, false);
    assert_eq!(state.x, state.x0);
    assert!(state.b.iter().all(|&v| v == -1.0));
    assert!(state.ones.iter().all(|&v| v == 1.0));
    assert!(state.x0.iter().all(|&v| (0.0..1.0).contains(&v)));

    let again = ReferenceState::new(&comm, &space, 7, false);
    assert_eq!(again.x0, state.x0);
    let other = ReferenceState::new(&comm, &space, 8, false);
    assert_ne!(other.x0, state.x0);
}

#[test]
fn mean_free_reference_has_zero_component_means() {
    let grid = RankGrid::new([2, 1, 1], [2, 2, 1]);
    let sums = spawn_ranks(grid.num_ranks(), |comm| {
        let pmesh = distributed_mesh(comm.rank(), &grid);
        let space = H1Space::new(&pmesh, 2, 3).unwrap();
        let state = ReferenceState::new(&comm, &space, 0, true);
        let mut x0_true = DVector::zeros(space.true_vsize());
        space.restrict(state.x0.as_slice(), x0_true.as_mut_slice());

        let mut sums = vec![0.0; 3];
        for (i, value) in x0_true.iter().enumerate() {
            sums[i % 3] += value;
        }
        comm.all_reduce(&mut sums, ReduceOp::Sum);
        let norm = global_norm_squared(&comm, &x0_true);
        (sums, norm)
    });
    for (sums, norm) in sums {
        assert!(norm > 0.0);
        assert!(sums.iter().all(|s| s.abs() < 1e-10), "{sums:?}");
    }
}

#[test]
fn reference_is_continuous_across_ranks() {
    let grid = RankGrid::new([2, 2, 1], [1, 1, 1]);
    spawn_ranks(grid.num_ranks(), |comm| {
        let pmesh = distributed_mesh(comm.rank(), &grid);
        let space = H1Space::new(&pmesh, 3, 1).unwrap();
        let state = ReferenceState::new(&comm, &space, 3, false);
        // Copies of a node hold the value drawn by its owner
        let mut copies = DVector::zeros(space.true_vsize());
        let multiplicity = {
            let mut counts = vec![0.0; space.true_vsize()];
            space.assemble(&comm, &vec![1.0; space.vsize()], &mut counts);
            DVector::from_vec(counts)
        };
        space.assemble(&comm, state.x0.as_slice(), copies.as_mut_slice());
        let mut owned = DVector::zeros(space.true_vsize());
        space.restrict(state.x0.as_slice(), owned.as_mut_slice());
        let expected = owned.component_mul(&multiplicity);
        assert!((copies - expected).amax() < 1e-14);
    });
}
