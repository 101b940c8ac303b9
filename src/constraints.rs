//! Affine constraints `x_i = Σ_j c_ij x_j + g_i`.
//!
//! Constraints are eliminated while element contributions are accumulated into the global
//! system (see [`AffineConstraints::distribute_local_to_global`]), and restored on a solved
//! vector with [`AffineConstraints::distribute`].
use crate::comm::Communicator;
use crate::dofs::DofHandler;
use crate::la::{DistributedMatrix, DistributedVector};
use crate::mesh::{opposite_face, FaceNeighbor, Triangulation};
use log::debug;
use nalgebra::{DMatrix, DVector};
use rustc_hash::FxHashMap;

#[derive(Debug, Clone, PartialEq)]
pub struct ConstraintLine {
    pub index: usize,
    pub entries: Vec<(usize, f64)>,
    pub inhomogeneity: f64,
}

#[derive(Debug, Clone, Default)]
pub struct AffineConstraints {
    lines: Vec<ConstraintLine>,
    lookup: FxHashMap<usize, usize>,
    closed: bool,
}

impl AffineConstraints {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds the constraint `x_index = Σ entries + inhomogeneity`.
    ///
    /// # Panics
    ///
    /// Panics if `index` is already constrained or the constraints have been closed.
    pub fn add_constraint(&mut self, index: usize, entries: Vec<(usize, f64)>, inhomogeneity: f64) {
        assert!(!self.closed, "Cannot add constraints after close()");
        assert!(!self.is_constrained(index), "DoF {} is already constrained", index);
        self.lookup.insert(index, self.lines.len());
        self.lines.push(ConstraintLine {
            index,
            entries,
            inhomogeneity,
        });
    }

    pub fn is_constrained(&self, index: usize) -> bool {
        self.lookup.contains_key(&index)
    }

    pub fn constraint(&self, index: usize) -> Option<&ConstraintLine> {
        self.lookup.get(&index).map(|&line| &self.lines[line])
    }

    pub fn lines(&self) -> &[ConstraintLine] {
        &self.lines
    }

    pub fn n_constraints(&self) -> usize {
        self.lines.len()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Whether any constraint couples a DoF to other DoFs (as opposed to prescribing a value).
    pub fn has_hanging_constraints(&self) -> bool {
        self.lines.iter().any(|line| !line.entries.is_empty())
    }

    /// Resolves chains of constraints.
    ///
    /// Afterwards no constraint refers to a constrained DoF, and the lines are sorted by index.
    ///
    /// # Panics
    ///
    /// Panics if the constraints are cyclic.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }

        for _ in 0..=self.lines.len() {
            let mut changed = false;
            for line_idx in 0..self.lines.len() {
                let line = &self.lines[line_idx];
                if !line.entries.iter().any(|(j, _)| self.is_constrained(*j)) {
                    continue;
                }

                let mut entries: Vec<(usize, f64)> = Vec::with_capacity(line.entries.len());
                let mut inhomogeneity = line.inhomogeneity;
                for &(j, w) in &line.entries {
                    match self.constraint(j) {
                        Some(master) => {
                            inhomogeneity += w * master.inhomogeneity;
                            entries.extend(master.entries.iter().map(|&(k, v)| (k, w * v)));
                        }
                        None => entries.push((j, w)),
                    }
                }
                self.lines[line_idx].entries = merge_entries(entries);
                self.lines[line_idx].inhomogeneity = inhomogeneity;
                changed = true;
            }
            if !changed {
                self.lines.sort_unstable_by_key(|line| line.index);
                self.lookup = self
                    .lines
                    .iter()
                    .enumerate()
                    .map(|(i, line)| (line.index, i))
                    .collect();
                self.closed = true;
                return;
            }
        }
        panic!("Constraints contain a cycle");
    }

    /// Sets every constrained entry of `vector` from its masters.
    ///
    /// Requires closed constraints, which makes the operation idempotent.
    pub fn distribute(&self, vector: &mut [f64]) {
        assert!(self.closed, "Constraints must be closed before distribute()");
        for line in &self.lines {
            let value = line.inhomogeneity + line.entries.iter().map(|&(j, w)| w * vector[j]).sum::<f64>();
            vector[line.index] = value;
        }
    }

    /// Collective version of [`Self::distribute`] for a distributed vector.
    ///
    /// Masters of an owned constrained DoF may be owned by other ranks, so the vector is
    /// gathered first. Only the owned entries are written back.
    pub fn distribute_parallel(&self, vector: &mut DistributedVector, comm: &dyn Communicator) {
        let mut full = vector.gather(comm);
        self.distribute(&mut full);
        vector.set_owned_from(&full);
    }

    /// The unconstrained DoFs (with weights) a DoF expands to.
    pub fn expand(&self, index: usize) -> Vec<(usize, f64)> {
        match self.constraint(index) {
            Some(line) => line.entries.clone(),
            None => vec![(index, 1.0)],
        }
    }

    /// Adds a cell matrix and vector to the global system while eliminating constraints.
    ///
    /// With `C` mapping the cell's DoFs to unconstrained DoFs and `g` the inhomogeneities, this
    /// adds `Cᵀ K C` to the matrix and `Cᵀ (f - K g)` to the right-hand side. Each constrained
    /// row additionally receives the mean absolute diagonal entry of `K` on its diagonal, with
    /// matching right-hand side `diag * g`, so that the global matrix stays positive definite.
    pub fn distribute_local_to_global(
        &self,
        cell_matrix: &DMatrix<f64>,
        cell_rhs: &DVector<f64>,
        local_dofs: &[usize],
        matrix: &mut DistributedMatrix,
        rhs: &mut DistributedVector,
    ) {
        assert!(self.closed, "Constraints must be closed before assembly");
        let n = local_dofs.len();
        assert_eq!(cell_matrix.nrows(), n);
        assert_eq!(cell_matrix.ncols(), n);
        assert_eq!(cell_rhs.len(), n);

        let expansions: Vec<Vec<(usize, f64)>> = local_dofs.iter().map(|&i| self.expand(i)).collect();
        let g: Vec<f64> = local_dofs
            .iter()
            .map(|&i| self.constraint(i).map_or(0.0, |line| line.inhomogeneity))
            .collect();

        for i in 0..n {
            let mut f_i = cell_rhs[i];
            for j in 0..n {
                let k_ij = cell_matrix[(i, j)];
                f_i -= k_ij * g[j];
                if k_ij == 0.0 {
                    continue;
                }
                for &(row, w_i) in &expansions[i] {
                    for &(col, w_j) in &expansions[j] {
                        matrix.add(row, col, w_i * w_j * k_ij);
                    }
                }
            }
            for &(row, w_i) in &expansions[i] {
                rhs.add(row, w_i * f_i);
            }
        }

        let mean_diagonal = {
            let sum: f64 = (0..n).map(|i| cell_matrix[(i, i)].abs()).sum();
            if sum > 0.0 {
                sum / n as f64
            } else {
                1.0
            }
        };
        for (i, &dof) in local_dofs.iter().enumerate() {
            if self.is_constrained(dof) {
                matrix.add(dof, dof, mean_diagonal);
                rhs.add(dof, mean_diagonal * g[i]);
            }
        }
    }
}

fn merge_entries(mut entries: Vec<(usize, f64)>) -> Vec<(usize, f64)> {
    entries.sort_unstable_by_key(|(j, _)| *j);
    let mut merged: Vec<(usize, f64)> = Vec::with_capacity(entries.len());
    for (j, w) in entries {
        match merged.last_mut() {
            Some((last, acc)) if *last == j => *acc += w,
            _ => merged.push((j, w)),
        }
    }
    merged
}

/// Constrains DoFs on the fine side of faces with a coarser neighbour.
///
/// Every fine face DoF that is not shared with the coarse cell is set to the coarse face
/// interpolant at its position.
pub fn make_hanging_node_constraints(tria: &Triangulation, dofs: &DofHandler, constraints: &mut AffineConstraints) {
    assert_eq!(tria.generation(), dofs.generation(), "DoF numbering is out of date");
    let fe = dofs.fe();
    let p = fe.degree();
    let mut count = 0;

    for cell_index in 0..tria.n_active_cells() {
        let fine = tria.cell(cell_index);
        for face in 0..4 {
            let FaceNeighbor::Coarser(coarse_index) = tria.face_neighbors(cell_index, face) else {
                continue;
            };
            let coarse = tria.cell(coarse_index);
            let coarse_face_dofs: Vec<usize> = fe
                .face_dofs(opposite_face(face))
                .into_iter()
                .map(|local| dofs.cell_dofs(coarse_index)[local])
                .collect();

            // Which half of the coarse face the fine face covers
            let offset = if face < 2 {
                (fine.y - 2 * coarse.y) as f64
            } else {
                (fine.x - 2 * coarse.x) as f64
            };

            for (m, local) in fe.face_dofs(face).into_iter().enumerate() {
                let dof = dofs.cell_dofs(cell_index)[local];
                if coarse_face_dofs.contains(&dof) || constraints.is_constrained(dof) {
                    continue;
                }
                let tau = 0.5 * (offset + fe.nodes_1d()[m]);
                let entries = (0..=p)
                    .map(|k| (coarse_face_dofs[k], fe.basis_1d(k, tau)))
                    .filter(|(_, w)| w.abs() > 1e-14)
                    .collect();
                constraints.add_constraint(dof, entries, 0.0);
                count += 1;
            }
        }
    }
    debug!("Added {} hanging node constraints", count);
}

/// Prescribes `value` on every boundary DoF that is not constrained yet.
pub fn interpolate_boundary_values(dofs: &DofHandler, value: f64, constraints: &mut AffineConstraints) {
    let mut count = 0;
    for dof in dofs.boundary_dofs().iter() {
        if !constraints.is_constrained(dof) {
            constraints.add_constraint(dof, Vec::new(), value);
            count += 1;
        }
    }
    debug!("Added {} boundary value constraints", count);
}
