//! Cell-level evaluation of shape functions and the Poisson weak form.
use crate::config::SourceTerm;
use crate::fe::FeQ;
use crate::mesh::CellId;
use crate::quadrature::Quadrature2d;
use itertools::iproduct;
use nalgebra::{DMatrix, DVector};

/// Shape function values and gradients at the quadrature points of a cell.
///
/// Reference values are tabulated once; [`FeValues::reinit`] only updates the affine mapping,
/// which for axis-aligned square cells is a scaling by the cell size.
#[derive(Debug, Clone)]
pub struct FeValues {
    fe: FeQ,
    quadrature: Quadrature2d,
    values: DMatrix<f64>,
    reference_gradients: Vec<[f64; 2]>,
    h: f64,
    origin: [f64; 2],
}

impl FeValues {
    pub fn new(fe: &FeQ, quadrature: Quadrature2d) -> Self {
        let n = fe.dofs_per_cell();
        let n_q = quadrature.len();
        let values = DMatrix::from_fn(n_q, n, |q, i| fe.shape_value(i, &quadrature.points()[q]));
        let reference_gradients = iproduct!(0..n_q, 0..n)
            .map(|(q, i)| fe.shape_grad(i, &quadrature.points()[q]))
            .collect();
        Self {
            fe: fe.clone(),
            quadrature,
            values,
            reference_gradients,
            h: 1.0,
            origin: [0.0, 0.0],
        }
    }

    pub fn reinit(&mut self, cell: &CellId) {
        self.h = cell.h();
        self.origin = cell.origin();
    }

    pub fn fe(&self) -> &FeQ {
        &self.fe
    }

    pub fn dofs_per_cell(&self) -> usize {
        self.fe.dofs_per_cell()
    }

    pub fn n_quadrature_points(&self) -> usize {
        self.quadrature.len()
    }

    pub fn shape_value(&self, i: usize, q: usize) -> f64 {
        self.values[(q, i)]
    }

    pub fn shape_grad(&self, i: usize, q: usize) -> [f64; 2] {
        let [gx, gy] = self.reference_gradients[q * self.dofs_per_cell() + i];
        [gx / self.h, gy / self.h]
    }

    pub fn jxw(&self, q: usize) -> f64 {
        self.quadrature.weights()[q] * self.h * self.h
    }

    pub fn quadrature_point(&self, q: usize) -> [f64; 2] {
        let [xi, eta] = self.quadrature.points()[q];
        [self.origin[0] + self.h * xi, self.origin[1] + self.h * eta]
    }
}

/// Assembles `∫ ∇φ_i · ∇φ_j` and `∫ f φ_i` on the cell `fe_values` was last reinitialised for.
pub fn assemble_poisson_cell(
    fe_values: &FeValues,
    source: &SourceTerm,
    cell_matrix: &mut DMatrix<f64>,
    cell_rhs: &mut DVector<f64>,
) {
    let n = fe_values.dofs_per_cell();
    cell_matrix.resize_mut(n, n, 0.0);
    cell_matrix.fill(0.0);
    cell_rhs.resize_vertically_mut(n, 0.0);
    cell_rhs.fill(0.0);

    for q in 0..fe_values.n_quadrature_points() {
        let jxw = fe_values.jxw(q);
        let f = source.value(&fe_values.quadrature_point(q));
        for i in 0..n {
            let [gi_x, gi_y] = fe_values.shape_grad(i, q);
            for j in 0..n {
                let [gj_x, gj_y] = fe_values.shape_grad(j, q);
                cell_matrix[(i, j)] += (gi_x * gj_x + gi_y * gj_y) * jxw;
            }
            cell_rhs[i] += f * fe_values.shape_value(i, q) * jxw;
        }
    }
}
