//! Matrix-free cell loops.
//!
//! [`MatrixFree`] caches everything a cell-local kernel needs on the locally owned cells of one
//! mesh generation: cell geometry, DoF indices, tabulated shape functions on the Gauss–Lobatto
//! points and a coloring of the cells. [`MatrixFree::cell_loop`] runs a kernel on every cell and
//! sums the local contributions into a global vector without ever forming a matrix.
//!
//! The quadrature points coincide with the support points of the element, so the mass matrix is
//! diagonal. Layouts with hanging node constraints are rejected, since eliminating them would
//! couple DoFs and destroy that property.
use crate::coloring::sequential_greedy_coloring;
use crate::constraints::AffineConstraints;
use crate::dofs::DofHandler;
use crate::fe::FeQ;
use crate::index_set::IndexSet;
use crate::la::GhostedVector;
use crate::mesh::{CellId, Triangulation};
use crate::quadrature::{gauss_lobatto_2d, Quadrature2d};
use itertools::iproduct;
use log::debug;
use nalgebra::DMatrix;
use rayon::prelude::*;
use std::cell::RefCell;
use std::error::Error;
use std::fmt;
use std::ops::Range;
use thread_local::ThreadLocal;

/// Identifies the mesh and DoF numbering a cached quantity was computed for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DofLayout {
    pub generation: u64,
    pub n_dofs: usize,
}

impl fmt::Display for DofLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "generation {} with {} DoFs", self.generation, self.n_dofs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum MatrixFreeError {
    /// The DoF numbering was built for a different mesh generation.
    OutdatedDofs { mesh_generation: u64, dof_generation: u64 },
    /// The constraints couple DoFs, which the diagonal mass matrix cannot represent.
    HangingNodeConstraints,
}

impl fmt::Display for MatrixFreeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutdatedDofs {
                mesh_generation,
                dof_generation,
            } => write!(
                f,
                "DoF numbering of generation {} does not match mesh generation {}",
                dof_generation, mesh_generation
            ),
            Self::HangingNodeConstraints => {
                write!(f, "Matrix-free operators do not support hanging node constraints")
            }
        }
    }
}

impl Error for MatrixFreeError {}

/// Per-thread buffers used by kernels.
#[derive(Debug, Default)]
pub struct CellScratch {
    /// Local contributions, one per cell DoF. Zeroed before the kernel runs.
    pub local: Vec<f64>,
    /// Cell values of input fields, filled by [`CellScratch::gather`].
    pub fields: Vec<Vec<f64>>,
}

impl CellScratch {
    /// Reads the cell values of `vector` into `fields[slot]`.
    pub fn gather(&mut self, slot: usize, cell: &CellEvaluator, vector: &GhostedVector) {
        if self.fields.len() <= slot {
            self.fields.resize_with(slot + 1, Vec::new);
        }
        let values = &mut self.fields[slot];
        values.clear();
        values.extend(cell.dof_indices().iter().map(|&dof| vector.get(dof)));
    }
}

/// Evaluation of shape functions and geometry on one cell of a [`MatrixFree`] loop.
pub struct CellEvaluator<'a> {
    data: &'a MatrixFree,
    cell_index: usize,
    h: f64,
    origin: [f64; 2],
}

impl<'a> CellEvaluator<'a> {
    pub fn cell(&self) -> CellId {
        self.data.cells[self.cell_index]
    }

    pub fn dof_indices(&self) -> &'a [usize] {
        self.data.cell_dofs(self.cell_index)
    }

    pub fn dofs_per_cell(&self) -> usize {
        self.data.fe.dofs_per_cell()
    }

    pub fn n_q_points(&self) -> usize {
        self.data.quadrature.len()
    }

    pub fn jxw(&self, q: usize) -> f64 {
        self.data.quadrature.weights()[q] * self.h * self.h
    }

    pub fn quadrature_point(&self, q: usize) -> [f64; 2] {
        let [xi, eta] = self.data.quadrature.points()[q];
        [self.origin[0] + self.h * xi, self.origin[1] + self.h * eta]
    }

    pub fn shape_value(&self, i: usize, q: usize) -> f64 {
        self.data.values[(q, i)]
    }

    pub fn shape_grad(&self, i: usize, q: usize) -> [f64; 2] {
        let [gx, gy] = self.data.reference_gradients[q * self.dofs_per_cell() + i];
        [gx / self.h, gy / self.h]
    }

    /// Value at quadrature point `q` of the field with the given cell values.
    pub fn value(&self, cell_values: &[f64], q: usize) -> f64 {
        cell_values
            .iter()
            .enumerate()
            .map(|(i, u_i)| u_i * self.shape_value(i, q))
            .sum()
    }

    /// Physical gradient at quadrature point `q` of the field with the given cell values.
    pub fn gradient(&self, cell_values: &[f64], q: usize) -> [f64; 2] {
        let mut grad = [0.0, 0.0];
        for (i, u_i) in cell_values.iter().enumerate() {
            let [gx, gy] = self.shape_grad(i, q);
            grad[0] += u_i * gx;
            grad[1] += u_i * gy;
        }
        grad
    }
}

/// Write access to disjoint entries of a slice from several threads.
#[derive(Clone, Copy)]
struct DisjointAccess {
    ptr: *mut f64,
    len: usize,
}

unsafe impl Send for DisjointAccess {}
unsafe impl Sync for DisjointAccess {}

impl DisjointAccess {
    fn new(values: &mut [f64]) -> Self {
        Self {
            ptr: values.as_mut_ptr(),
            len: values.len(),
        }
    }

    /// # Safety
    ///
    /// No other thread may access entry `index` concurrently.
    unsafe fn add(&self, index: usize, value: f64) {
        assert!(index < self.len, "Index out of bounds");
        *self.ptr.add(index) += value;
    }
}

/// Cached data for matrix-free cell loops over the locally owned cells of one rank.
#[derive(Debug)]
pub struct MatrixFree {
    fe: FeQ,
    layout: DofLayout,
    owned_dofs: Range<usize>,
    relevant_dofs: IndexSet,
    cells: Vec<CellId>,
    cell_dofs: Vec<usize>,
    colors: Vec<Vec<usize>>,
    quadrature: Quadrature2d,
    values: DMatrix<f64>,
    reference_gradients: Vec<[f64; 2]>,
    scratch: ThreadLocal<RefCell<CellScratch>>,
}

impl MatrixFree {
    pub fn reinit(
        tria: &Triangulation,
        dofs: &DofHandler,
        constraints: &AffineConstraints,
        rank: usize,
    ) -> Result<Self, MatrixFreeError> {
        if tria.generation() != dofs.generation() {
            return Err(MatrixFreeError::OutdatedDofs {
                mesh_generation: tria.generation(),
                dof_generation: dofs.generation(),
            });
        }
        if constraints.has_hanging_constraints() {
            return Err(MatrixFreeError::HangingNodeConstraints);
        }

        let fe = dofs.fe().clone();
        let n = fe.dofs_per_cell();
        let quadrature = gauss_lobatto_2d(fe.degree() + 1);
        let n_q = quadrature.len();
        let values = DMatrix::from_fn(n_q, n, |q, i| fe.shape_value(i, &quadrature.points()[q]));
        let reference_gradients = iproduct!(0..n_q, 0..n)
            .map(|(q, i)| fe.shape_grad(i, &quadrature.points()[q]))
            .collect();

        let owned_cells = tria.locally_owned_cells(rank);
        let cells: Vec<CellId> = owned_cells.clone().map(|i| tria.cell(i)).collect();
        let cell_dofs_nested: Vec<&[usize]> = owned_cells.map(|i| dofs.cell_dofs(i)).collect();
        let colors = sequential_greedy_coloring(&cell_dofs_nested);
        let cell_dofs = cell_dofs_nested.concat();

        debug!(
            "Matrix-free data on rank {}: {} cells in {} colors",
            rank,
            cells.len(),
            colors.len()
        );

        Ok(Self {
            fe,
            layout: DofLayout {
                generation: dofs.generation(),
                n_dofs: dofs.n_dofs(),
            },
            owned_dofs: dofs.owned_range(rank),
            relevant_dofs: dofs.locally_relevant_dofs(tria, rank),
            cells,
            cell_dofs,
            colors,
            quadrature,
            values,
            reference_gradients,
            scratch: ThreadLocal::new(),
        })
    }

    pub fn fe(&self) -> &FeQ {
        &self.fe
    }

    pub fn layout(&self) -> DofLayout {
        self.layout
    }

    pub fn n_dofs(&self) -> usize {
        self.layout.n_dofs
    }

    pub fn owned_dofs(&self) -> Range<usize> {
        self.owned_dofs.clone()
    }

    pub fn relevant_dofs(&self) -> &IndexSet {
        &self.relevant_dofs
    }

    pub fn n_cells(&self) -> usize {
        self.cells.len()
    }

    pub fn n_colors(&self) -> usize {
        self.colors.len()
    }

    pub fn cell_dofs(&self, cell_index: usize) -> &[usize] {
        let n = self.fe.dofs_per_cell();
        &self.cell_dofs[cell_index * n..(cell_index + 1) * n]
    }

    pub fn quadrature(&self) -> &Quadrature2d {
        &self.quadrature
    }

    /// Runs `local_apply` on every owned cell and adds the local contributions to `dst`.
    ///
    /// Colors are processed in sequence and the cells of one color in parallel. Since the cells
    /// of a color share no DoF, every entry of `dst` receives its contributions in a fixed
    /// order, so the result does not depend on thread scheduling.
    pub fn cell_loop<F>(&self, dst: &mut [f64], local_apply: F)
    where
        F: Fn(&CellEvaluator, &mut CellScratch) + Sync,
    {
        assert_eq!(dst.len(), self.n_dofs(), "Destination has wrong length");
        let n = self.fe.dofs_per_cell();
        let access = DisjointAccess::new(dst);

        for color in &self.colors {
            color.par_iter().for_each(|&cell_index| {
                let cell = self.cells[cell_index];
                let evaluator = CellEvaluator {
                    data: self,
                    cell_index,
                    h: cell.h(),
                    origin: cell.origin(),
                };
                let mut scratch = self.scratch.get_or_default().borrow_mut();
                scratch.local.clear();
                scratch.local.resize(n, 0.0);
                local_apply(&evaluator, &mut *scratch);

                for (&dof, &contribution) in evaluator.dof_indices().iter().zip(&scratch.local) {
                    // Cells of the same color share no DoF
                    unsafe { access.add(dof, contribution) };
                }
            });
        }
    }

    /// Diagonal entries `M_ii = Σ_q φ_i(x_q)² JxW_q` of the mass matrix, summed over the owned
    /// cells of this rank only.
    pub fn local_mass_diagonal(&self) -> Vec<f64> {
        let mut diagonal = vec![0.0; self.n_dofs()];
        self.cell_loop(&mut diagonal, |cell, scratch| {
            for q in 0..cell.n_q_points() {
                let jxw = cell.jxw(q);
                for (i, m_i) in scratch.local.iter_mut().enumerate() {
                    let phi = cell.shape_value(i, q);
                    *m_i += phi * phi * jxw;
                }
            }
        });
        diagonal
    }
}
