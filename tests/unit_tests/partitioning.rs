use bakeoff::mesh::{CartesianMesh, ElementType, ParMesh, RankGrid};
use proptest::prelude::*;

fn rank_grid_strategy() -> impl Strategy<Value = RankGrid> {
    ([1..=3usize, 1..=3usize, 1..=3usize], [1..=3usize, 1..=3usize, 1..=3usize])
        .prop_map(|(procs, cells_per_rank)| RankGrid::new(procs, cells_per_rank))
}

#[test]
fn partitioning_of_two_by_two_grid() {
    let grid = RankGrid::new([2, 2, 1], [1, 1, 1]);
    assert_eq!(grid.global_cells(), [2, 2, 1]);
    assert_eq!(grid.partitioning(), vec![0, 1, 2, 3]);

    let grid = RankGrid::new([2, 1, 1], [2, 1, 1]);
    assert_eq!(grid.partitioning(), vec![0, 0, 1, 1]);
}

#[test]
fn cell_counts_of_default_grid() {
    let grid = RankGrid::new([1, 1, 1], [4, 4, 4]);
    let mesh = CartesianMesh::new(grid.global_cells(), ElementType::Hexahedron);
    assert_eq!(mesh.num_elements(), 64);
    let tets = CartesianMesh::new(grid.global_cells(), ElementType::Tetrahedron);
    assert_eq!(tets.num_elements(), 6 * 64);
    assert!(!tets.matches_geometry(ElementType::Hexahedron));
}

proptest! {
    #[test]
    fn rank_coordinates_round_trip(grid in rank_grid_strategy()) {
        for rank in 0..grid.num_ranks() {
            prop_assert_eq!(grid.rank_at(grid.rank_coords(rank)), rank);
        }
    }

    #[test]
    fn every_rank_owns_a_full_brick(grid in rank_grid_strategy()) {
        let partitioning = grid.partitioning();
        let [cx, cy, cz] = grid.cells_per_rank;
        prop_assert_eq!(partitioning.len(), grid.global_cells().iter().product::<usize>());

        let mesh = CartesianMesh::new(grid.global_cells(), ElementType::Hexahedron);
        for rank in 0..grid.num_ranks() {
            let owned = partitioning.iter().filter(|&&r| r == rank).count();
            prop_assert_eq!(owned, cx * cy * cz);

            let pmesh = ParMesh::new(rank, &grid, &mesh, &partitioning).unwrap();
            prop_assert_eq!(pmesh.local_cells(), [cx, cy, cz]);
            prop_assert_eq!(pmesh.num_elements(), cx * cy * cz);
            let [px, py, pz] = pmesh.rank_coords();
            prop_assert_eq!(pmesh.cell_offset(), [px * cx, py * cy, pz * cz]);
        }
    }
}
