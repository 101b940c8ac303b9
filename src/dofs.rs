//! Degree-of-freedom numbering.
//!
//! Degrees of freedom are identified by the topological entity they live on, which makes DoFs on
//! shared vertices and edges coincide between neighbouring cells without any explicit
//! connectivity. Numbering walks the active cells in Morton order and assigns indices in order
//! of first touch. Since cell ownership is contiguous in Morton order, so is DoF ownership.
use crate::fe::FeQ;
use crate::index_set::IndexSet;
use crate::mesh::{CellId, Triangulation};
use log::debug;
use rustc_hash::FxHashMap;
use std::ops::Range;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum DofKey {
    /// A vertex, by its position on the finest lattice.
    Vertex { x: u32, y: u32 },
    /// The `k`-th interior node of an edge of a cell on `level`. `vertical` edges run along the
    /// y-axis and start at cell-lattice position `(x, y)`.
    Edge {
        level: u8,
        vertical: bool,
        x: u32,
        y: u32,
        k: usize,
    },
    /// Interior node `k` of a cell.
    Interior { cell: CellId, k: usize },
}

fn dof_key(fe: &FeQ, cell: &CellId, local: usize) -> DofKey {
    let p = fe.degree();
    let (a, b) = fe.tensor_index(local);
    let on_x_face = a == 0 || a == p;
    let on_y_face = b == 0 || b == p;
    match (on_x_face, on_y_face) {
        (true, true) => {
            let [x0, y0] = cell.lattice_origin();
            let size = cell.lattice_size();
            DofKey::Vertex {
                x: x0 + if a == p { size } else { 0 },
                y: y0 + if b == p { size } else { 0 },
            }
        }
        (true, false) => DofKey::Edge {
            level: cell.level,
            vertical: true,
            x: cell.x + (a / p) as u32,
            y: cell.y,
            k: b,
        },
        (false, true) => DofKey::Edge {
            level: cell.level,
            vertical: false,
            x: cell.x,
            y: cell.y + (b / p) as u32,
            k: a,
        },
        (false, false) => DofKey::Interior { cell: *cell, k: local },
    }
}

/// Global DoF numbering for a `FeQ` element on a [`Triangulation`].
///
/// The handler is rebuilt from scratch whenever the mesh changes; it remembers the mesh
/// generation it was built for.
#[derive(Debug, Clone)]
pub struct DofHandler {
    fe: FeQ,
    n_dofs: usize,
    cell_dofs: Vec<usize>,
    owned_ranges: Vec<Range<usize>>,
    support_points: Vec<[f64; 2]>,
    boundary_dofs: IndexSet,
    generation: u64,
}

impl DofHandler {
    pub fn distribute_dofs(tria: &Triangulation, fe: &FeQ) -> Self {
        let dofs_per_cell = fe.dofs_per_cell();
        let mut numbering: FxHashMap<DofKey, usize> = FxHashMap::default();
        let mut cell_dofs = Vec::with_capacity(dofs_per_cell * tria.n_active_cells());
        let mut support_points = Vec::new();
        let mut owned_ranges = Vec::with_capacity(tria.n_subdomains());

        for rank in 0..tria.n_subdomains() {
            let first = support_points.len();
            for cell_index in tria.locally_owned_cells(rank) {
                let cell = tria.cell(cell_index);
                let [x0, y0] = cell.origin();
                let h = cell.h();
                for local in 0..dofs_per_cell {
                    let next = support_points.len();
                    let global = *numbering.entry(dof_key(fe, &cell, local)).or_insert(next);
                    if global == next {
                        let [xi, eta] = fe.support_point(local);
                        support_points.push([x0 + h * xi, y0 + h * eta]);
                    }
                    cell_dofs.push(global);
                }
            }
            owned_ranges.push(first..support_points.len());
        }

        let n_dofs = support_points.len();
        let mut boundary = Vec::new();
        for (cell_index, cell) in tria.active_cells().iter().enumerate() {
            let dofs = &cell_dofs[cell_index * dofs_per_cell..(cell_index + 1) * dofs_per_cell];
            for face in 0..4 {
                if cell.face_adjacent(face).is_none() {
                    boundary.extend(fe.face_dofs(face).into_iter().map(|local| dofs[local]));
                }
            }
        }

        debug!(
            "Distributed {} DoFs over {} cells (generation {})",
            n_dofs,
            tria.n_active_cells(),
            tria.generation()
        );

        Self {
            fe: fe.clone(),
            n_dofs,
            cell_dofs,
            owned_ranges,
            support_points,
            boundary_dofs: IndexSet::from_indices(n_dofs, boundary),
            generation: tria.generation(),
        }
    }

    pub fn fe(&self) -> &FeQ {
        &self.fe
    }

    pub fn n_dofs(&self) -> usize {
        self.n_dofs
    }

    pub fn dofs_per_cell(&self) -> usize {
        self.fe.dofs_per_cell()
    }

    /// Mesh generation this numbering was built for.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Global indices of the DoFs of an active cell, in local (lexicographic) order.
    pub fn cell_dofs(&self, cell_index: usize) -> &[usize] {
        let n = self.dofs_per_cell();
        &self.cell_dofs[cell_index * n..(cell_index + 1) * n]
    }

    pub fn n_cells(&self) -> usize {
        self.cell_dofs.len() / self.dofs_per_cell()
    }

    pub fn owned_range(&self, rank: usize) -> Range<usize> {
        self.owned_ranges[rank].clone()
    }

    pub fn locally_owned_dofs(&self, rank: usize) -> IndexSet {
        IndexSet::from_range(self.n_dofs, self.owned_range(rank))
    }

    pub fn n_locally_owned_dofs_per_processor(&self) -> Vec<usize> {
        self.owned_ranges.iter().map(|r| r.len()).collect()
    }

    /// The rank owning the given DoF.
    pub fn dof_owner(&self, dof: usize) -> usize {
        self.owned_ranges
            .iter()
            .position(|r| r.contains(&dof))
            .expect("DoF index out of bounds")
    }

    /// DoFs of the locally owned cells and of their face-neighbouring ghost cells.
    pub fn locally_relevant_dofs(&self, tria: &Triangulation, rank: usize) -> IndexSet {
        assert_eq!(tria.generation(), self.generation, "DoF numbering is out of date");
        let mut relevant = Vec::new();
        for cell_index in tria.locally_owned_cells(rank) {
            relevant.extend_from_slice(self.cell_dofs(cell_index));
            for neighbor in tria.face_neighbor_indices(cell_index) {
                relevant.extend_from_slice(self.cell_dofs(neighbor));
            }
        }
        IndexSet::from_indices(self.n_dofs, relevant)
    }

    pub fn support_point(&self, dof: usize) -> [f64; 2] {
        self.support_points[dof]
    }

    pub fn support_points(&self) -> &[[f64; 2]] {
        &self.support_points
    }

    /// DoFs on the boundary of the unit square.
    pub fn boundary_dofs(&self) -> &IndexSet {
        &self.boundary_dofs
    }
}
