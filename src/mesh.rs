//! Adaptive quadtree meshes of the unit square.
//!
//! The mesh is replicated on every rank: each rank stores all active cells, and ownership is a
//! deterministic partition of the Morton-ordered active cells. Refinement and coarsening are
//! therefore collective only in the sense that every rank must apply the same flags, which
//! yields the same mesh everywhere.
use rustc_hash::{FxHashMap, FxHashSet};
use std::ops::Range;

pub mod refinement;

/// Deepest supported refinement level.
pub const MAX_LEVEL: u8 = 24;

/// A cell of the quadtree, covering `[x h, (x + 1) h] × [y h, (y + 1) h]` with `h = 2^-level`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellId {
    pub level: u8,
    pub x: u32,
    pub y: u32,
}

impl CellId {
    pub const fn root() -> Self {
        Self { level: 0, x: 0, y: 0 }
    }

    pub fn new(level: u8, x: u32, y: u32) -> Self {
        assert!(level <= MAX_LEVEL, "Refinement level exceeds MAX_LEVEL");
        assert!(x < (1 << level) && y < (1 << level), "Cell outside of the unit square");
        Self { level, x, y }
    }

    /// Side length of the cell.
    pub fn h(&self) -> f64 {
        1.0 / (1u64 << self.level) as f64
    }

    /// The lower-left corner of the cell.
    pub fn origin(&self) -> [f64; 2] {
        let h = self.h();
        [self.x as f64 * h, self.y as f64 * h]
    }

    pub fn center(&self) -> [f64; 2] {
        let h = self.h();
        let [x0, y0] = self.origin();
        [x0 + 0.5 * h, y0 + 0.5 * h]
    }

    pub fn diameter(&self) -> f64 {
        std::f64::consts::SQRT_2 * self.h()
    }

    /// Children in Morton order: lower-left, lower-right, upper-left, upper-right.
    pub fn children(&self) -> [CellId; 4] {
        let level = self.level + 1;
        let (x, y) = (2 * self.x, 2 * self.y);
        [
            CellId { level, x, y },
            CellId { level, x: x + 1, y },
            CellId { level, x, y: y + 1 },
            CellId { level, x: x + 1, y: y + 1 },
        ]
    }

    pub fn parent(&self) -> Option<CellId> {
        (self.level > 0).then(|| CellId {
            level: self.level - 1,
            x: self.x / 2,
            y: self.y / 2,
        })
    }

    /// The ancestor at the given (coarser or equal) level.
    pub fn ancestor(&self, level: u8) -> CellId {
        assert!(level <= self.level);
        let shift = self.level - level;
        CellId {
            level,
            x: self.x >> shift,
            y: self.y >> shift,
        }
    }

    /// Position of the lower-left corner on the lattice of the finest level.
    pub fn lattice_origin(&self) -> [u32; 2] {
        let shift = MAX_LEVEL - self.level;
        [self.x << shift, self.y << shift]
    }

    /// Lattice spacing of the cell on the finest level.
    pub fn lattice_size(&self) -> u32 {
        1 << (MAX_LEVEL - self.level)
    }

    /// Z-order key of the cell. Keys of disjoint cells order them along the Morton curve.
    pub fn morton_key(&self) -> u64 {
        let [x, y] = self.lattice_origin();
        interleave(x) | (interleave(y) << 1)
    }

    /// The same-level cell across the given face, if it lies inside the domain.
    pub fn face_adjacent(&self, face: usize) -> Option<CellId> {
        let n = 1u32 << self.level;
        let (x, y) = (self.x, self.y);
        let (nx, ny) = match face {
            0 if x > 0 => (x - 1, y),
            1 if x + 1 < n => (x + 1, y),
            2 if y > 0 => (x, y - 1),
            3 if y + 1 < n => (x, y + 1),
            0..=3 => return None,
            _ => panic!("Invalid face index {}", face),
        };
        Some(CellId {
            level: self.level,
            x: nx,
            y: ny,
        })
    }

    /// The two children touching the given face, ordered by increasing coordinate along it.
    pub fn children_on_face(&self, face: usize) -> [CellId; 2] {
        let [c00, c10, c01, c11] = self.children();
        match face {
            0 => [c00, c01],
            1 => [c10, c11],
            2 => [c00, c10],
            3 => [c01, c11],
            _ => panic!("Invalid face index {}", face),
        }
    }
}

fn interleave(v: u32) -> u64 {
    let mut v = v as u64;
    v = (v | (v << 16)) & 0x0000_FFFF_0000_FFFF;
    v = (v | (v << 8)) & 0x00FF_00FF_00FF_00FF;
    v = (v | (v << 4)) & 0x0F0F_0F0F_0F0F_0F0F;
    v = (v | (v << 2)) & 0x3333_3333_3333_3333;
    v = (v | (v << 1)) & 0x5555_5555_5555_5555;
    v
}

/// The face opposite to `face` as seen from the neighbouring cell.
pub fn opposite_face(face: usize) -> usize {
    face ^ 1
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefinementFlag {
    None,
    Refine,
    Coarsen,
}

/// What a cell sees across one of its faces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaceNeighbor {
    Boundary,
    /// An active cell on the same level.
    Same(usize),
    /// An active cell one level coarser.
    Coarser(usize),
    /// Two active cells one level finer, ordered along the face.
    Finer([usize; 2]),
}

#[derive(Debug, Clone)]
pub struct Triangulation {
    cells: Vec<CellId>,
    index: FxHashMap<CellId, usize>,
    flags: Vec<RefinementFlag>,
    n_subdomains: usize,
    generation: u64,
}

impl Triangulation {
    /// The unit square as a single cell, partitioned into `n_subdomains` subdomains.
    pub fn hyper_cube(n_subdomains: usize) -> Self {
        assert!(n_subdomains > 0);
        let mut tria = Self {
            cells: Vec::new(),
            index: FxHashMap::default(),
            flags: Vec::new(),
            n_subdomains,
            generation: 0,
        };
        tria.rebuild(vec![CellId::root()]);
        tria
    }

    pub fn refine_global(&mut self, times: usize) {
        for _ in 0..times {
            self.flags.fill(RefinementFlag::Refine);
            self.execute_coarsening_and_refinement();
        }
    }

    /// Active cells in Morton order.
    pub fn active_cells(&self) -> &[CellId] {
        &self.cells
    }

    pub fn cell(&self, cell_index: usize) -> CellId {
        self.cells[cell_index]
    }

    pub fn n_active_cells(&self) -> usize {
        self.cells.len()
    }

    /// Global number of active cells. Identical to `n_active_cells` for a replicated mesh.
    pub fn n_global_active_cells(&self) -> usize {
        self.cells.len()
    }

    pub fn n_subdomains(&self) -> usize {
        self.n_subdomains
    }

    /// Incremented on every topology change.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn subdomain_id(&self, cell_index: usize) -> usize {
        cell_index * self.n_subdomains / self.cells.len()
    }

    pub fn is_locally_owned(&self, cell_index: usize, rank: usize) -> bool {
        self.subdomain_id(cell_index) == rank
    }

    /// The contiguous range of active cells owned by `rank`.
    pub fn locally_owned_cells(&self, rank: usize) -> Range<usize> {
        let n = self.cells.len();
        let p = self.n_subdomains;
        let start = (rank * n + p - 1) / p;
        let end = ((rank + 1) * n + p - 1) / p;
        start.min(n)..end.min(n)
    }

    pub fn n_locally_owned_active_cells(&self, rank: usize) -> usize {
        self.locally_owned_cells(rank).len()
    }

    pub fn find_active(&self, cell: &CellId) -> Option<usize> {
        self.index.get(cell).copied()
    }

    /// The active cell that contains (or equals) `cell`, if any.
    pub fn active_ancestor(&self, cell: &CellId) -> Option<usize> {
        (0..=cell.level)
            .rev()
            .find_map(|level| self.find_active(&cell.ancestor(level)))
    }

    pub fn face_neighbors(&self, cell_index: usize, face: usize) -> FaceNeighbor {
        let cell = self.cells[cell_index];
        let Some(adjacent) = cell.face_adjacent(face) else {
            return FaceNeighbor::Boundary;
        };
        if let Some(idx) = self.find_active(&adjacent) {
            return FaceNeighbor::Same(idx);
        }
        if let Some(idx) = adjacent.parent().and_then(|p| self.active_ancestor(&p)) {
            return FaceNeighbor::Coarser(idx);
        }
        let [a, b] = adjacent.children_on_face(opposite_face(face));
        let a = self.find_active(&a).expect("Mesh must be 2:1 balanced");
        let b = self.find_active(&b).expect("Mesh must be 2:1 balanced");
        FaceNeighbor::Finer([a, b])
    }

    /// Indices of all active cells sharing a face with the given cell.
    pub fn face_neighbor_indices(&self, cell_index: usize) -> impl Iterator<Item = usize> + '_ {
        (0..4).flat_map(move |face| match self.face_neighbors(cell_index, face) {
            FaceNeighbor::Boundary => vec![],
            FaceNeighbor::Same(idx) | FaceNeighbor::Coarser(idx) => vec![idx],
            FaceNeighbor::Finer(pair) => pair.to_vec(),
        })
    }

    pub fn refine_flag(&self, cell_index: usize) -> RefinementFlag {
        self.flags[cell_index]
    }

    pub fn set_refine_flag(&mut self, cell_index: usize) {
        if self.cells[cell_index].level < MAX_LEVEL {
            self.flags[cell_index] = RefinementFlag::Refine;
        }
    }

    pub fn set_coarsen_flag(&mut self, cell_index: usize) {
        self.flags[cell_index] = RefinementFlag::Coarsen;
    }

    pub fn clear_flags(&mut self) {
        self.flags.fill(RefinementFlag::None);
    }

    /// Applies the current flags, then restores 2:1 face balance.
    ///
    /// Four sibling cells are replaced by their parent only if all of them are flagged for
    /// coarsening and the parent does not violate balance. Flags are cleared afterwards.
    pub fn execute_coarsening_and_refinement(&mut self) {
        let mut leaves: FxHashSet<CellId> = self.cells.iter().copied().collect();
        let mut coarsen_candidates = Vec::new();
        for (cell, flag) in self.cells.iter().zip(&self.flags) {
            match flag {
                RefinementFlag::Refine => {
                    leaves.remove(cell);
                    leaves.extend(cell.children());
                }
                RefinementFlag::Coarsen => coarsen_candidates.push(*cell),
                RefinementFlag::None => {}
            }
        }
        balance(&mut leaves);

        let flagged: FxHashSet<CellId> = coarsen_candidates.iter().copied().collect();
        let mut parents: Vec<CellId> = coarsen_candidates.iter().filter_map(|c| c.parent()).collect();
        parents.sort_unstable_by_key(|p| (p.morton_key(), p.level));
        parents.dedup();
        for parent in parents {
            let children = parent.children();
            let all_flagged = children
                .iter()
                .all(|child| flagged.contains(child) && leaves.contains(child));
            if all_flagged && can_coarsen(&leaves, &parent) {
                for child in &children {
                    leaves.remove(child);
                }
                leaves.insert(parent);
            }
        }
        balance(&mut leaves);

        self.rebuild(leaves.into_iter().collect());
    }

    fn rebuild(&mut self, mut cells: Vec<CellId>) {
        cells.sort_unstable_by_key(|c| (c.morton_key(), c.level));
        self.index = cells.iter().enumerate().map(|(i, c)| (*c, i)).collect();
        self.flags = vec![RefinementFlag::None; cells.len()];
        self.cells = cells;
        self.generation += 1;
    }

    /// Checks that face neighbours differ by at most one level.
    pub fn is_balanced(&self) -> bool {
        let leaves: FxHashSet<CellId> = self.cells.iter().copied().collect();
        self.cells
            .iter()
            .all(|cell| coarse_face_violations(&leaves, cell).is_empty())
    }
}

fn active_ancestor_in(leaves: &FxHashSet<CellId>, cell: &CellId) -> Option<CellId> {
    (0..=cell.level)
        .rev()
        .map(|level| cell.ancestor(level))
        .find(|c| leaves.contains(c))
}

/// Leaves adjacent to `cell` that are more than one level coarser.
fn coarse_face_violations(leaves: &FxHashSet<CellId>, cell: &CellId) -> Vec<CellId> {
    (0..4)
        .filter_map(|face| cell.face_adjacent(face))
        .filter_map(|adjacent| active_ancestor_in(leaves, &adjacent))
        .filter(|neighbor| neighbor.level + 1 < cell.level)
        .collect()
}

fn balance(leaves: &mut FxHashSet<CellId>) {
    loop {
        let mut to_refine: Vec<CellId> = leaves
            .iter()
            .flat_map(|cell| coarse_face_violations(leaves, cell))
            .collect();
        if to_refine.is_empty() {
            break;
        }
        to_refine.sort_unstable();
        to_refine.dedup();
        for cell in to_refine {
            if leaves.remove(&cell) {
                leaves.extend(cell.children());
            }
        }
    }
}

/// Whether replacing the children of `parent` by `parent` keeps the leaves balanced.
fn can_coarsen(leaves: &FxHashSet<CellId>, parent: &CellId) -> bool {
    (0..4).all(|face| match parent.face_adjacent(face) {
        None => true,
        Some(adjacent) => {
            if active_ancestor_in(leaves, &adjacent).is_some() {
                return true;
            }
            // The neighbour is refined; its children along the face must be leaves
            adjacent
                .children_on_face(opposite_face(face))
                .iter()
                .all(|child| leaves.contains(child))
        }
    })
}
