//! Structured unit-cube meshes and their block partitioning over a grid of ranks.
use crate::error::Error;
use eyre::eyre;
use nalgebra::Point3;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

/// Local vertex numbering of a hexahedron in reference coordinates.
///
/// The bottom face (z = 0) is traversed counter-clockwise, followed by the top face.
pub const HEX_CORNERS: [[usize; 3]; 8] = [
    [0, 0, 0],
    [1, 0, 0],
    [1, 1, 0],
    [0, 1, 0],
    [0, 0, 1],
    [1, 0, 1],
    [1, 1, 1],
    [0, 1, 1],
];

/// The six tetrahedra of a cell, as corners of the cell in reference coordinates.
///
/// All tetrahedra share the diagonal from `(0, 0, 0)` to `(1, 1, 1)`, and every cell is split the
/// same way, so the faces of neighboring cells are split along matching diagonals. Vertices are
/// ordered to give a positive orientation.
pub const KUHN_TETS: [[[usize; 3]; 4]; 6] = [
    [[0, 0, 0], [1, 0, 0], [1, 1, 0], [1, 1, 1]],
    [[0, 0, 0], [0, 1, 0], [0, 1, 1], [1, 1, 1]],
    [[0, 0, 0], [0, 0, 1], [1, 0, 1], [1, 1, 1]],
    [[0, 0, 0], [1, 0, 0], [1, 1, 1], [1, 0, 1]],
    [[0, 0, 0], [0, 1, 0], [1, 1, 1], [1, 1, 0]],
    [[0, 0, 0], [0, 0, 1], [1, 1, 1], [0, 1, 1]],
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementType {
    Hexahedron,
    /// Every cell of the Cartesian grid split into six tetrahedra.
    Tetrahedron,
}

impl ElementType {
    pub fn is_simplex(self) -> bool {
        self == ElementType::Tetrahedron
    }

    pub fn elements_per_cell(self) -> usize {
        match self {
            ElementType::Hexahedron => 1,
            ElementType::Tetrahedron => 6,
        }
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ElementType::Hexahedron => write!(f, "hex"),
            ElementType::Tetrahedron => write!(f, "tet"),
        }
    }
}

impl FromStr for ElementType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hex" | "hexahedron" => Ok(ElementType::Hexahedron),
            "tet" | "tetrahedron" => Ok(ElementType::Tetrahedron),
            _ => Err(format!("unknown element type '{s}', expected 'hex' or 'tet'")),
        }
    }
}

/// A Cartesian grid of ranks, each owning the same number of cells per axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RankGrid {
    pub procs: [usize; 3],
    pub cells_per_rank: [usize; 3],
}

impl RankGrid {
    pub fn new(procs: [usize; 3], cells_per_rank: [usize; 3]) -> Self {
        Self { procs, cells_per_rank }
    }

    pub fn num_ranks(&self) -> usize {
        self.procs.iter().product()
    }

    /// Global number of cells per axis.
    pub fn global_cells(&self) -> [usize; 3] {
        [0, 1, 2].map(|d| self.procs[d] * self.cells_per_rank[d])
    }

    /// Position of `rank` in the grid, x fastest.
    pub fn rank_coords(&self, rank: usize) -> [usize; 3] {
        let [px, py, _] = self.procs;
        [rank % px, (rank / px) % py, rank / (px * py)]
    }

    pub fn rank_at(&self, coords: [usize; 3]) -> usize {
        let [px, py, _] = self.procs;
        coords[0] + coords[1] * px + coords[2] * px * py
    }

    /// Rank owning each cell, with cells numbered `i + j nx + k nx ny`.
    pub fn partitioning(&self) -> Vec<usize> {
        let [nx, ny, nz] = self.global_cells();
        let [ex, ey, ez] = self.cells_per_rank;
        let mut partitioning = Vec::with_capacity(nx * ny * nz);
        for k in 0..nz {
            let pz = k / ez;
            for j in 0..ny {
                let py = j / ey;
                for i in 0..nx {
                    let px = i / ex;
                    partitioning.push(self.rank_at([px, py, pz]));
                }
            }
        }
        partitioning
    }

    /// The same rank grid with every cell split `factor` times along each axis.
    pub fn refined(&self, factor: usize) -> Self {
        Self {
            procs: self.procs,
            cells_per_rank: self.cells_per_rank.map(|e| e * factor),
        }
    }
}

/// The unit cube `[0, 1]^3` divided into `nx x ny x nz` cells.
#[derive(Debug, Clone)]
pub struct CartesianMesh {
    cells: [usize; 3],
    element_type: ElementType,
    curvature: Option<usize>,
}

impl CartesianMesh {
    pub fn new(cells: [usize; 3], element_type: ElementType) -> Self {
        assert!(cells.iter().all(|&n| n > 0), "mesh must have at least one cell per axis");
        Self {
            cells,
            element_type,
            curvature: None,
        }
    }

    pub fn cells(&self) -> [usize; 3] {
        self.cells
    }

    pub fn num_cells(&self) -> usize {
        self.cells.iter().product()
    }

    pub fn num_elements(&self) -> usize {
        self.num_cells() * self.element_type.elements_per_cell()
    }

    pub fn element_type(&self) -> ElementType {
        self.element_type
    }

    /// Whether the mesh consists of elements of the given type only.
    pub fn matches_geometry(&self, element_type: ElementType) -> bool {
        self.element_type == element_type
    }

    /// Whether the mesh carries an explicit nodal representation of the given order.
    pub fn matches_nodes(&self, order: usize) -> bool {
        self.curvature == Some(order)
    }

    /// Gives the mesh a nodal representation of the given order.
    ///
    /// The cube is straight-sided, so the geometry is unchanged.
    pub fn set_curvature(&mut self, order: usize) {
        self.curvature = Some(order);
    }

    pub fn curvature(&self) -> Option<usize> {
        self.curvature
    }

    /// Boundary attributes: 1 bottom (z = 0), 2 front (y = 0), 3 right (x = 1), 4 back (y = 1),
    /// 5 left (x = 0), 6 top (z = 1).
    pub fn bdr_attributes(&self) -> Vec<i32> {
        (1..=6).collect()
    }
}

/// The boundary attribute of the face of the unit cube normal to `axis`, at the lower (`upper ==
/// false`) or upper end.
pub fn boundary_attribute(axis: usize, upper: bool) -> i32 {
    match (axis, upper) {
        (2, false) => 1,
        (1, false) => 2,
        (0, true) => 3,
        (1, true) => 4,
        (0, false) => 5,
        (2, true) => 6,
        _ => panic!("axis must be 0, 1 or 2"),
    }
}

/// The part of a [`CartesianMesh`] owned by one rank: a brick of cells.
///
/// The cell faces along each axis are stored as coordinate arrays, which also covers the
/// non-uniform spacing of low-order-refined meshes.
#[derive(Debug, Clone)]
pub struct ParMesh {
    grid: RankGrid,
    rank: usize,
    rank_coords: [usize; 3],
    global_cells: [usize; 3],
    /// Global index of the first local cell along each axis.
    cell_offset: [usize; 3],
    /// Local vertex coordinates per axis.
    axes: [Vec<f64>; 3],
    element_type: ElementType,
    bdr_attributes: Vec<i32>,
    curvature: Option<usize>,
    /// Refinement factor relative to the mesh this one was refined from.
    refinement: usize,
}

impl ParMesh {
    /// Extracts the cells assigned to `rank` by `partitioning`.
    ///
    /// The assigned cells must form the brick of `rank` in `grid`.
    pub fn new(rank: usize, grid: &RankGrid, mesh: &CartesianMesh, partitioning: &[usize]) -> Result<Self, Error> {
        let cells = mesh.cells();
        if grid.global_cells() != cells {
            return Err(eyre!(
                "rank grid covers {:?} cells, but the mesh has {:?}",
                grid.global_cells(),
                cells
            )
            .into());
        }
        if partitioning.len() != mesh.num_cells() {
            return Err(eyre!(
                "partitioning has {} entries, but the mesh has {} cells",
                partitioning.len(),
                mesh.num_cells()
            )
            .into());
        }

        let mut lo = cells;
        let mut hi = [0; 3];
        let mut count = 0;
        for (index, _) in partitioning.iter().enumerate().filter(|&(_, &r)| r == rank) {
            let ijk = [index % cells[0], (index / cells[0]) % cells[1], index / (cells[0] * cells[1])];
            for d in 0..3 {
                lo[d] = lo[d].min(ijk[d]);
                hi[d] = hi[d].max(ijk[d] + 1);
            }
            count += 1;
        }
        let rank_coords = grid.rank_coords(rank);
        let expected_lo = [0, 1, 2].map(|d| rank_coords[d] * grid.cells_per_rank[d]);
        let expected_hi = [0, 1, 2].map(|d| expected_lo[d] + grid.cells_per_rank[d]);
        if count != grid.cells_per_rank.iter().product::<usize>() || lo != expected_lo || hi != expected_hi {
            return Err(eyre!(
                "cells assigned to rank {rank} do not form the brick {expected_lo:?}..{expected_hi:?}"
            )
            .into());
        }

        let axes = [0, 1, 2].map(|d| {
            (lo[d]..=hi[d])
                .map(|i| i as f64 / cells[d] as f64)
                .collect::<Vec<_>>()
        });

        Ok(Self {
            grid: *grid,
            rank,
            rank_coords,
            global_cells: cells,
            cell_offset: lo,
            axes,
            element_type: mesh.element_type(),
            bdr_attributes: mesh.bdr_attributes(),
            curvature: mesh.curvature(),
            refinement: 1,
        })
    }

    /// Splits every cell at the given one-dimensional points of the unit interval.
    ///
    /// `points` must start at 0 and end at 1. Each cell is divided into `points.len() - 1`
    /// sub-cells per axis.
    pub fn refined_at(&self, points: &[f64]) -> Self {
        assert!(points.len() >= 2, "need at least two points to refine");
        let factor = points.len() - 1;
        let axes = self.axes.clone().map(|axis| {
            let mut refined = Vec::with_capacity((axis.len() - 1) * factor + 1);
            for cell in axis.windows(2) {
                let h = cell[1] - cell[0];
                refined.extend(points[..factor].iter().map(|t| cell[0] + h * t));
            }
            if let Some(last) = axis.last() {
                refined.push(*last);
            }
            refined
        });
        Self {
            grid: self.grid.refined(factor),
            global_cells: self.global_cells.map(|n| n * factor),
            cell_offset: self.cell_offset.map(|o| o * factor),
            axes,
            refinement: self.refinement * factor,
            curvature: Some(1),
            bdr_attributes: self.bdr_attributes.clone(),
            ..*self
        }
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn rank_coords(&self) -> [usize; 3] {
        self.rank_coords
    }

    pub fn rank_grid(&self) -> &RankGrid {
        &self.grid
    }

    pub fn global_cells(&self) -> [usize; 3] {
        self.global_cells
    }

    pub fn cell_offset(&self) -> [usize; 3] {
        self.cell_offset
    }

    pub fn local_cells(&self) -> [usize; 3] {
        [0, 1, 2].map(|d| self.axes[d].len() - 1)
    }

    pub fn num_elements(&self) -> usize {
        self.local_cells().iter().product::<usize>() * self.element_type.elements_per_cell()
    }

    pub fn element_type(&self) -> ElementType {
        self.element_type
    }

    pub fn is_simplex(&self) -> bool {
        self.element_type.is_simplex()
    }

    pub fn bdr_attributes(&self) -> &[i32] {
        &self.bdr_attributes
    }

    pub fn curvature(&self) -> Option<usize> {
        self.curvature
    }

    pub fn refinement(&self) -> usize {
        self.refinement
    }

    pub fn axis(&self, d: usize) -> &[f64] {
        &self.axes[d]
    }

    /// Local coordinates of the cell containing element `e`, x fastest.
    ///
    /// The elements of a cell are numbered consecutively.
    pub fn element_coords(&self, e: usize) -> [usize; 3] {
        let cell = e / self.element_type.elements_per_cell();
        let [nx, ny, _] = self.local_cells();
        [cell % nx, (cell / nx) % ny, cell / (nx * ny)]
    }

    pub fn vertex(&self, ijk: [usize; 3]) -> Point3<f64> {
        Point3::new(self.axes[0][ijk[0]], self.axes[1][ijk[1]], self.axes[2][ijk[2]])
    }

    /// Vertices of the hexahedral element `e` in [`HEX_CORNERS`] order.
    pub fn element_vertices(&self, e: usize) -> [Point3<f64>; 8] {
        debug_assert_eq!(self.element_type, ElementType::Hexahedron);
        let base = self.element_coords(e);
        HEX_CORNERS.map(|c| self.vertex([base[0] + c[0], base[1] + c[1], base[2] + c[2]]))
    }

    /// Corners of the tetrahedral element `e` relative to its cell, see [`KUHN_TETS`].
    pub fn tet_corners(&self, e: usize) -> &'static [[usize; 3]; 4] {
        debug_assert_eq!(self.element_type, ElementType::Tetrahedron);
        &KUHN_TETS[e % 6]
    }

    /// Vertices of the tetrahedral element `e`.
    pub fn tet_vertices(&self, e: usize) -> [Point3<f64>; 4] {
        let base = self.element_coords(e);
        let corners = *self.tet_corners(e);
        corners.map(|c| self.vertex([base[0] + c[0], base[1] + c[1], base[2] + c[2]]))
    }
}
