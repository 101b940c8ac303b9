//! Functionality for error estimation.
use crate::comm::Communicator;
use crate::dofs::DofHandler;
use crate::fe::FeQ;
use crate::la::GhostedVector;
use crate::mesh::{opposite_face, CellId, FaceNeighbor, Triangulation};
use crate::quadrature::{gauss_1d, Quadrature1d};

const FACE_NORMALS: [[f64; 2]; 4] = [[-1.0, 0.0], [1.0, 0.0], [0.0, -1.0], [0.0, 1.0]];

/// Physical coordinates of the point at parameter `t ∈ [0, 1]` along a face of `cell`.
fn face_point(cell: &CellId, face: usize, t: f64) -> [f64; 2] {
    let [x0, y0] = cell.origin();
    let h = cell.h();
    match face {
        0 => [x0, y0 + h * t],
        1 => [x0 + h, y0 + h * t],
        2 => [x0 + h * t, y0],
        3 => [x0 + h * t, y0 + h],
        _ => panic!("Invalid face index {}", face),
    }
}

/// Gradient of the finite element function with the given cell coefficients at a physical
/// point of the (closed) cell.
pub fn cell_gradient(fe: &FeQ, cell: &CellId, coefficients: &[f64], x: &[f64; 2]) -> [f64; 2] {
    let [x0, y0] = cell.origin();
    let h = cell.h();
    let xi = [(x[0] - x0) / h, (x[1] - y0) / h];
    let mut grad = [0.0, 0.0];
    for (i, u_i) in coefficients.iter().enumerate() {
        let [gx, gy] = fe.shape_grad(i, &xi);
        grad[0] += u_i * gx / h;
        grad[1] += u_i * gy / h;
    }
    grad
}

struct CellSolution<'a> {
    fe: &'a FeQ,
    tria: &'a Triangulation,
    dofs: &'a DofHandler,
    solution: &'a GhostedVector,
}

impl<'a> CellSolution<'a> {
    fn gradient(&self, cell_index: usize, x: &[f64; 2]) -> [f64; 2] {
        let coefficients: Vec<f64> = self
            .dofs
            .cell_dofs(cell_index)
            .iter()
            .map(|&dof| self.solution.get(dof))
            .collect();
        cell_gradient(self.fe, &self.tria.cell(cell_index), &coefficients, x)
    }

    /// `∫_F [∂u/∂n]²` over face `face` of cell `face_cell`, where the jump is taken between the
    /// gradients of cells `a` and `b` in the direction `normal`.
    fn jump_integral(
        &self,
        quadrature: &Quadrature1d,
        face_cell: usize,
        face: usize,
        (a, b): (usize, usize),
        normal: &[f64; 2],
    ) -> f64 {
        let cell = self.tria.cell(face_cell);
        let face_length = cell.h();
        quadrature
            .weights()
            .iter()
            .zip(quadrature.points())
            .map(|(w, &[t])| {
                let x = face_point(&cell, face, t);
                let g_a = self.gradient(a, &x);
                let g_b = self.gradient(b, &x);
                let jump = (g_a[0] - g_b[0]) * normal[0] + (g_a[1] - g_b[1]) * normal[1];
                w * face_length * jump * jump
            })
            .sum()
    }
}

/// Kelly error indicator for every active cell. Collective.
///
/// For a cell `K` the indicator is `η_K² = h_K / 24 Σ_F ∫_F [∂u/∂n]²`, summed over the interior
/// faces of `K`, with `h_K` the cell diameter. Faces on the (Dirichlet) boundary contribute
/// nothing. Each rank evaluates its owned cells; the indicators are then combined so that every
/// rank returns the full vector.
pub fn kelly_error_estimate(
    tria: &Triangulation,
    dofs: &DofHandler,
    solution: &GhostedVector,
    rank: usize,
    comm: &dyn Communicator,
) -> Vec<f64> {
    assert_eq!(tria.generation(), dofs.generation(), "DoF numbering is out of date");
    let fe = dofs.fe();
    let quadrature = gauss_1d(fe.degree() + 1);
    let evaluator = CellSolution {
        fe,
        tria,
        dofs,
        solution,
    };

    let mut indicators = vec![0.0; tria.n_active_cells()];
    for cell_index in tria.locally_owned_cells(rank) {
        let mut sum = 0.0;
        for (face, normal) in FACE_NORMALS.iter().enumerate() {
            sum += match tria.face_neighbors(cell_index, face) {
                FaceNeighbor::Boundary => 0.0,
                FaceNeighbor::Same(neighbor) | FaceNeighbor::Coarser(neighbor) => {
                    evaluator.jump_integral(&quadrature, cell_index, face, (cell_index, neighbor), normal)
                }
                // Integrate over each subface separately, the solution is not smooth across them
                FaceNeighbor::Finer(children) => children
                    .iter()
                    .map(|&child| {
                        evaluator.jump_integral(&quadrature, child, opposite_face(face), (cell_index, child), normal)
                    })
                    .sum(),
            };
        }
        indicators[cell_index] = tria.cell(cell_index).diameter() / 24.0 * sum;
    }

    comm.sum_in_place(&mut indicators);
    indicators.iter_mut().for_each(|eta| *eta = eta.sqrt());
    indicators
}
