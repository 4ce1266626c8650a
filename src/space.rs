//! Continuous Lagrange finite element spaces on a rank's brick of cells.
//!
//! The nodes of the space form a structured lattice with `order` intervals per cell and axis. On
//! hexahedra the lattice follows the Gauss-Lobatto points of every cell. For tetrahedra the lattice
//! is equispaced: the equispaced nodes of every tetrahedron of a split cell (see
//! [`KUHN_TETS`](crate::mesh::KUHN_TETS)) are exactly the lattice points it contains. A rank stores all nodes of its own brick
//! (the local or "L" vector), while every node is owned by exactly one rank (the true-dof vector).
//! A node on the interface between bricks belongs to the rank with the smallest coordinates along
//! every axis in which it is shared, so a rank with a lower neighbor does not own its lowest node
//! layer along that axis.
//!
//! Vector-valued spaces interleave the components of each node (`dof = node * vdim + component`),
//! both in the local and in the true-dof vectors.
use crate::basis::{dofs_per_element, equispaced_nodes, gauss_lobatto_nodes, simplex_indices, MAX_ORDER};
use crate::comm::Communicator;
use crate::error::Error;
use crate::mesh::{boundary_attribute, ElementType, ParMesh, RankGrid};
use nalgebra::Point3;
use std::collections::BTreeMap;

/// Node lattice of one rank.
#[derive(Debug, Clone, Copy)]
struct NodeBrick {
    /// Global lattice coordinates of the first local node.
    first: [usize; 3],
    dims: [usize; 3],
    /// Local coordinate of the first owned node along each axis, 0 or 1.
    owned_lo: [usize; 3],
}

impl NodeBrick {
    fn of_rank(grid: &RankGrid, order: usize, coords: [usize; 3]) -> Self {
        let span = [0, 1, 2].map(|d| grid.cells_per_rank[d] * order);
        Self {
            first: [0, 1, 2].map(|d| coords[d] * span[d]),
            dims: span.map(|s| s + 1),
            owned_lo: coords.map(|c| usize::from(c > 0)),
        }
    }

    fn owned_dims(&self) -> [usize; 3] {
        [0, 1, 2].map(|d| self.dims[d] - self.owned_lo[d])
    }

    fn num_nodes(&self) -> usize {
        self.dims.iter().product()
    }

    fn num_owned(&self) -> usize {
        self.owned_dims().iter().product()
    }

    fn local_coords(&self, node: usize) -> [usize; 3] {
        let [nx, ny, _] = self.dims;
        [node % nx, (node / nx) % ny, node / (nx * ny)]
    }

    fn global(&self, local: [usize; 3]) -> [usize; 3] {
        [0, 1, 2].map(|d| self.first[d] + local[d])
    }

    fn local_index(&self, global: [usize; 3]) -> usize {
        let l = [0, 1, 2].map(|d| global[d] - self.first[d]);
        l[0] + self.dims[0] * (l[1] + self.dims[1] * l[2])
    }

    fn is_owned(&self, local: [usize; 3]) -> bool {
        (0..3).all(|d| local[d] >= self.owned_lo[d])
    }

    /// Position among the owned nodes, lexicographic with x fastest.
    fn owned_position(&self, global: [usize; 3]) -> usize {
        let od = self.owned_dims();
        let l = [0, 1, 2].map(|d| global[d] - self.first[d] - self.owned_lo[d]);
        l[0] + od[0] * (l[1] + od[1] * l[2])
    }
}

/// Rank coordinates of the owner of a global lattice node.
fn owner_coords(global: [usize; 3], grid: &RankGrid, order: usize) -> [usize; 3] {
    [0, 1, 2].map(|d| {
        let span = grid.cells_per_rank[d] * order;
        if global[d] == 0 {
            0
        } else {
            (global[d] - 1) / span
        }
    })
}

/// An H1-conforming space of Lagrange elements on a [`ParMesh`].
#[derive(Debug)]
pub struct H1Space<'m> {
    mesh: &'m ParMesh,
    order: usize,
    vdim: usize,
    nodes_1d: Vec<f64>,
    brick: NodeBrick,
    global_dims: [usize; 3],
    /// Start of each rank's true dofs, with a final entry holding the global size.
    true_offsets: Vec<usize>,
    /// Owned position of every local node, `None` for ghost nodes.
    owned: Vec<Option<usize>>,
    /// Global true dof of the first component of every local node.
    global_true: Vec<usize>,
    /// Ghost nodes grouped by owner, in local order.
    ghosts: Vec<(usize, Vec<usize>)>,
    /// Owned nodes that are ghosts of a neighbor, in the neighbor's local order.
    shared: Vec<(usize, Vec<usize>)>,
}

impl<'m> H1Space<'m> {
    pub fn new(mesh: &'m ParMesh, order: usize, vdim: usize) -> Result<Self, Error> {
        if order == 0 || order > MAX_ORDER {
            return Err(Error::OrderMismatch(order));
        }
        assert!(vdim > 0, "vector dimension must be positive");

        let grid = mesh.rank_grid();
        let rank = mesh.rank();
        let my_coords = mesh.rank_coords();
        let brick = NodeBrick::of_rank(grid, order, my_coords);
        let bricks: Vec<NodeBrick> = (0..grid.num_ranks())
            .map(|r| NodeBrick::of_rank(grid, order, grid.rank_coords(r)))
            .collect();

        let mut true_offsets = Vec::with_capacity(bricks.len() + 1);
        true_offsets.push(0);
        for b in &bricks {
            let last = true_offsets[true_offsets.len() - 1];
            true_offsets.push(last + b.num_owned() * vdim);
        }

        let mut owned = Vec::with_capacity(brick.num_nodes());
        let mut global_true = Vec::with_capacity(brick.num_nodes());
        let mut ghosts: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for node in 0..brick.num_nodes() {
            let global = brick.global(brick.local_coords(node));
            let owner = grid.rank_at(owner_coords(global, grid, order));
            let position = bricks[owner].owned_position(global);
            global_true.push(true_offsets[owner] + vdim * position);
            if owner == rank {
                owned.push(Some(position));
            } else {
                owned.push(None);
                ghosts.entry(owner).or_default().push(node);
            }
        }

        let mut shared = Vec::new();
        for offset in 1..8 {
            let step = [offset & 1, (offset >> 1) & 1, (offset >> 2) & 1];
            let neighbor = [0, 1, 2].map(|d| my_coords[d] + step[d]);
            if (0..3).any(|d| neighbor[d] >= grid.procs[d]) {
                continue;
            }
            let q = grid.rank_at(neighbor);
            let q_brick = &bricks[q];
            let nodes: Vec<usize> = (0..q_brick.num_nodes())
                .map(|n| q_brick.local_coords(n))
                .filter(|&local| !q_brick.is_owned(local))
                .map(|local| q_brick.global(local))
                .filter(|&global| owner_coords(global, grid, order) == my_coords)
                .map(|global| brick.local_index(global))
                .collect();
            if !nodes.is_empty() {
                shared.push((q, nodes));
            }
        }
        shared.sort_by_key(|(q, _)| *q);

        let global_cells = mesh.global_cells();
        Ok(Self {
            mesh,
            order,
            vdim,
            nodes_1d: match mesh.element_type() {
                ElementType::Hexahedron => gauss_lobatto_nodes(order)?,
                ElementType::Tetrahedron => equispaced_nodes(order),
            },
            brick,
            global_dims: global_cells.map(|n| n * order + 1),
            true_offsets,
            owned,
            global_true,
            ghosts: ghosts.into_iter().collect(),
            shared,
        })
    }

    pub fn mesh(&self) -> &'m ParMesh {
        self.mesh
    }

    pub fn order(&self) -> usize {
        self.order
    }

    pub fn vdim(&self) -> usize {
        self.vdim
    }

    /// Positions of the lattice nodes within a cell along each axis, on `[0, 1]`.
    pub fn nodes_1d(&self) -> &[f64] {
        &self.nodes_1d
    }

    pub fn num_nodes(&self) -> usize {
        self.owned.len()
    }

    /// Nodes per axis of the local lattice.
    pub fn local_dims(&self) -> [usize; 3] {
        self.brick.dims
    }

    pub fn global_dims(&self) -> [usize; 3] {
        self.global_dims
    }

    /// Size of local vectors.
    pub fn vsize(&self) -> usize {
        self.num_nodes() * self.vdim
    }

    /// Number of true dofs owned by this rank.
    pub fn true_vsize(&self) -> usize {
        self.brick.num_owned() * self.vdim
    }

    pub fn global_true_vsize(&self) -> usize {
        self.true_offsets[self.true_offsets.len() - 1]
    }

    /// Start of every rank's true dofs, followed by the global number of true dofs.
    pub fn true_offsets(&self) -> &[usize] {
        &self.true_offsets
    }

    pub fn first_true_dof(&self) -> usize {
        self.true_offsets[self.mesh.rank()]
    }

    /// Global true dof of a local dof.
    pub fn global_true_dof(&self, dof: usize) -> usize {
        self.global_true[dof / self.vdim] + dof % self.vdim
    }

    /// Rank owning a global true dof.
    pub fn true_dof_owner(&self, global: usize) -> usize {
        self.true_offsets.partition_point(|&start| start <= global) - 1
    }

    /// Ranks owning ghost nodes of this rank, and ranks holding nodes of this rank as ghosts.
    pub fn exchange_partners(&self) -> (Vec<usize>, Vec<usize>) {
        (
            self.ghosts.iter().map(|(q, _)| *q).collect(),
            self.shared.iter().map(|(q, _)| *q).collect(),
        )
    }

    pub fn is_owned(&self, node: usize) -> bool {
        self.owned[node].is_some()
    }

    /// Number of nodes of every element.
    pub fn dofs_per_element(&self) -> usize {
        dofs_per_element(self.mesh.element_type(), self.order)
    }

    /// Local nodes of element `e`.
    ///
    /// Hexahedra list their nodes lexicographically with x fastest. A tetrahedron with vertices
    /// `v0, .., v3` lists the node at `v0 + (i (v1 - v0) + j (v2 - v0) + k (v3 - v0)) / order` in
    /// the order of [`simplex_indices`].
    pub fn element_nodes(&self, e: usize, nodes: &mut [usize]) {
        let p = self.order;
        debug_assert_eq!(nodes.len(), self.dofs_per_element());
        let cell = self.mesh.element_coords(e);
        let [dx, dy, _] = self.brick.dims;
        let base = [0, 1, 2].map(|d| cell[d] * p);
        let index = |offset: [usize; 3]| (base[0] + offset[0]) + dx * ((base[1] + offset[1]) + dy * (base[2] + offset[2]));
        match self.mesh.element_type() {
            ElementType::Hexahedron => {
                let n = p + 1;
                let mut a = 0;
                for k in 0..n {
                    for j in 0..n {
                        for i in 0..n {
                            nodes[a] = index([i, j, k]);
                            a += 1;
                        }
                    }
                }
            }
            ElementType::Tetrahedron => {
                let corners = self.mesh.tet_corners(e);
                debug_assert_eq!(corners[0], [0, 0, 0]);
                for (node, [i, j, k]) in nodes.iter_mut().zip(simplex_indices(p)) {
                    *node = index([0, 1, 2].map(|d| i * corners[1][d] + j * corners[2][d] + k * corners[3][d]));
                }
            }
        }
    }

    /// Physical coordinates of a local node.
    pub fn node_coordinates(&self, node: usize) -> Point3<f64> {
        let local = self.brick.local_coords(node);
        let p = self.order;
        let coords = [0, 1, 2].map(|d| {
            let axis = self.mesh.axis(d);
            let cell = (local[d] / p).min(axis.len() - 2);
            let t = self.nodes_1d[local[d] - cell * p];
            axis[cell] + (axis[cell + 1] - axis[cell]) * t
        });
        Point3::from(coords)
    }

    fn pack(&self, values: &[f64], nodes: &[usize]) -> Vec<f64> {
        let vdim = self.vdim;
        nodes
            .iter()
            .flat_map(|&n| values[n * vdim..(n + 1) * vdim].iter().copied())
            .collect()
    }

    /// Computes the local vector `y = P x` of the true-dof vector `x`.
    pub fn prolongate<C: Communicator>(&self, comm: &C, x: &[f64], y: &mut [f64]) {
        assert_eq!(x.len(), self.true_vsize());
        assert_eq!(y.len(), self.vsize());
        let vdim = self.vdim;
        for (node, owned) in self.owned.iter().enumerate() {
            if let Some(t) = owned {
                y[node * vdim..(node + 1) * vdim].copy_from_slice(&x[t * vdim..(t + 1) * vdim]);
            }
        }

        let sends: Vec<_> = self
            .shared
            .iter()
            .map(|(q, nodes)| (*q, self.pack(y, nodes)))
            .collect();
        let sources: Vec<usize> = self.ghosts.iter().map(|(q, _)| *q).collect();
        let received = comm.exchange(&sends, &sources);
        for ((_, nodes), values) in self.ghosts.iter().zip(received) {
            for (&n, chunk) in nodes.iter().zip(values.chunks_exact(vdim)) {
                y[n * vdim..(n + 1) * vdim].copy_from_slice(chunk);
            }
        }
    }

    /// Computes the true-dof vector `x = P^T y`, summing the contributions of all copies of a node.
    pub fn assemble<C: Communicator>(&self, comm: &C, y: &[f64], x: &mut [f64]) {
        assert_eq!(x.len(), self.true_vsize());
        assert_eq!(y.len(), self.vsize());
        let vdim = self.vdim;
        x.fill(0.0);
        for (node, owned) in self.owned.iter().enumerate() {
            if let Some(t) = owned {
                for c in 0..vdim {
                    x[t * vdim + c] += y[node * vdim + c];
                }
            }
        }

        let sends: Vec<_> = self
            .ghosts
            .iter()
            .map(|(q, nodes)| (*q, self.pack(y, nodes)))
            .collect();
        let sources: Vec<usize> = self.shared.iter().map(|(q, _)| *q).collect();
        let received = comm.exchange(&sends, &sources);
        for ((_, nodes), values) in self.shared.iter().zip(received) {
            for (&n, chunk) in nodes.iter().zip(values.chunks_exact(vdim)) {
                if let Some(t) = self.owned[n] {
                    for (c, value) in chunk.iter().enumerate() {
                        x[t * vdim + c] += value;
                    }
                }
            }
        }
    }

    /// Extracts the owned entries `x = R y` of a local vector.
    pub fn restrict(&self, y: &[f64], x: &mut [f64]) {
        assert_eq!(x.len(), self.true_vsize());
        assert_eq!(y.len(), self.vsize());
        let vdim = self.vdim;
        for (node, owned) in self.owned.iter().enumerate() {
            if let Some(t) = owned {
                x[t * vdim..(t + 1) * vdim].copy_from_slice(&y[node * vdim..(node + 1) * vdim]);
            }
        }
    }

    /// Local true dofs on the boundary faces with the marked attributes.
    ///
    /// `ess_bdr[a - 1]` marks attribute `a`. All components of a boundary node are essential.
    pub fn essential_true_dofs(&self, ess_bdr: &[bool]) -> Vec<usize> {
        let vdim = self.vdim;
        let is_marked = |attribute: i32| {
            usize::try_from(attribute - 1)
                .ok()
                .and_then(|a| ess_bdr.get(a))
                .copied()
                .unwrap_or(false)
        };
        let mut dofs = Vec::new();
        for (node, owned) in self.owned.iter().enumerate() {
            let Some(t) = owned else { continue };
            let global = self.brick.global(self.brick.local_coords(node));
            let on_marked_face = (0..3).any(|d| {
                (global[d] == 0 && is_marked(boundary_attribute(d, false)))
                    || (global[d] + 1 == self.global_dims[d] && is_marked(boundary_attribute(d, true)))
            });
            if on_marked_face {
                dofs.extend((0..vdim).map(|c| t * vdim + c));
            }
        }
        dofs.sort_unstable();
        dofs
    }

    /// Marks the local dofs whose true dof is in `ess_tdofs`, including ghost copies.
    pub fn essential_local_mask<C: Communicator>(&self, comm: &C, ess_tdofs: &[usize]) -> Vec<bool> {
        let mut marker = vec![0.0; self.true_vsize()];
        for &i in ess_tdofs {
            marker[i] = 1.0;
        }
        let mut local = vec![0.0; self.vsize()];
        self.prolongate(comm, &marker, &mut local);
        local.into_iter().map(|m| m > 0.5).collect()
    }
}
