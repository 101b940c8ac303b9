//! Aggregation-based algebraic multigrid.
//!
//! The hierarchy is built from the strength-of-connection graph of the matrix. Nodes are grouped
//! into aggregates with the classic three-pass scheme, and the tentative (piecewise constant)
//! prolongation is optionally smoothed by one damped Jacobi step. Coarse operators are Galerkin
//! products `Pᵀ A P`, and the coarsest level is solved with a dense Cholesky factorization.
//!
//! A single application of the preconditioner is a V-cycle with forward Gauss-Seidel
//! pre-smoothing and backward Gauss-Seidel post-smoothing, which makes it symmetric and
//! therefore suitable for use with conjugate gradient.
use crate::cg::{LinearOperator, OperatorError};
use log::debug;
use nalgebra::{Cholesky, DMatrix, DVector, DVectorView, DVectorViewMut, Dyn};
use nalgebra_sparse::{CooMatrix, CsrMatrix};
use std::error::Error;
use std::fmt;

/// How the prolongation operator is obtained from the aggregates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregation {
    /// Piecewise constant prolongation.
    Plain,
    /// Piecewise constant prolongation smoothed by a damped Jacobi step.
    Smoothed,
}

#[derive(Debug, Clone)]
pub struct AmgParameters {
    pub aggregation: Aggregation,
    /// Off-diagonal entry `a_ij` is strong if `|a_ij| >= threshold * sqrt(|a_ii a_jj|)`.
    pub strength_threshold: f64,
    /// Coarsening stops once a level has at most this many rows.
    pub coarse_size: usize,
    pub max_levels: usize,
    pub pre_smoothing_steps: usize,
    pub post_smoothing_steps: usize,
}

impl Default for AmgParameters {
    fn default() -> Self {
        Self {
            aggregation: Aggregation::Smoothed,
            strength_threshold: 0.08,
            coarse_size: 200,
            max_levels: 10,
            pre_smoothing_steps: 1,
            post_smoothing_steps: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum AmgError {
    NotSquare { nrows: usize, ncols: usize },
    ZeroDiagonal { level: usize, row: usize },
    SingularCoarseMatrix { dim: usize },
}

impl fmt::Display for AmgError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotSquare { nrows, ncols } => {
                write!(f, "AMG requires a square matrix, got {} x {}", nrows, ncols)
            }
            Self::ZeroDiagonal { level, row } => {
                write!(f, "Zero diagonal entry in row {} on AMG level {}", row, level)
            }
            Self::SingularCoarseMatrix { dim } => {
                write!(f, "Coarse matrix of dimension {} is not positive definite", dim)
            }
        }
    }
}

impl Error for AmgError {}

#[derive(Debug, Clone)]
struct Level {
    matrix: CsrMatrix<f64>,
    diagonal: Vec<f64>,
    prolongation: CsrMatrix<f64>,
    restriction: CsrMatrix<f64>,
}

#[derive(Debug, Clone)]
pub struct AlgebraicMultigrid {
    levels: Vec<Level>,
    coarse: Cholesky<f64, Dyn>,
    coarse_dim: usize,
    pre_smoothing_steps: usize,
    post_smoothing_steps: usize,
}

impl AlgebraicMultigrid {
    pub fn new(matrix: &CsrMatrix<f64>, params: &AmgParameters) -> Result<Self, AmgError> {
        if matrix.nrows() != matrix.ncols() {
            return Err(AmgError::NotSquare {
                nrows: matrix.nrows(),
                ncols: matrix.ncols(),
            });
        }

        let mut levels = Vec::new();
        let mut current = matrix.clone();
        while current.nrows() > params.coarse_size && levels.len() + 1 < params.max_levels {
            let diagonal = extract_diagonal(&current, levels.len())?;
            let strong = strong_connections(&current, &diagonal, params.strength_threshold);
            let (aggregates, num_aggregates) = aggregate(&strong);
            if num_aggregates == 0 || num_aggregates >= current.nrows() {
                break;
            }

            let tentative = tentative_prolongation(&aggregates, num_aggregates);
            let prolongation = match params.aggregation {
                Aggregation::Plain => tentative,
                Aggregation::Smoothed => smooth_prolongation(&current, &diagonal, &tentative),
            };
            let restriction = prolongation.transpose();
            let coarse = &restriction * &(&current * &prolongation);

            debug!(
                "AMG level {}: {} rows, {} nnz, {} aggregates",
                levels.len(),
                current.nrows(),
                current.nnz(),
                num_aggregates
            );

            let fine = std::mem::replace(&mut current, coarse);
            levels.push(Level {
                matrix: fine,
                diagonal,
                prolongation,
                restriction,
            });
        }

        let coarse_dim = current.nrows();
        let mut dense = DMatrix::zeros(coarse_dim, coarse_dim);
        for (i, j, v) in current.triplet_iter() {
            dense[(i, j)] += *v;
        }
        let coarse = Cholesky::new(dense).ok_or(AmgError::SingularCoarseMatrix { dim: coarse_dim })?;
        debug!(
            "AMG hierarchy: {} smoothing levels, coarse dimension {}",
            levels.len(),
            coarse_dim
        );

        Ok(Self {
            levels,
            coarse,
            coarse_dim,
            pre_smoothing_steps: params.pre_smoothing_steps,
            post_smoothing_steps: params.post_smoothing_steps,
        })
    }

    /// Number of levels in the hierarchy, including the coarse level.
    pub fn num_levels(&self) -> usize {
        self.levels.len() + 1
    }

    pub fn coarse_dim(&self) -> usize {
        self.coarse_dim
    }

    fn v_cycle(&self, level_idx: usize, b: &[f64]) -> Vec<f64> {
        let Some(level) = self.levels.get(level_idx) else {
            let rhs = DVector::from_column_slice(b);
            return self.coarse.solve(&rhs).as_slice().to_vec();
        };

        let a = &level.matrix;
        let mut x = vec![0.0; b.len()];
        for _ in 0..self.pre_smoothing_steps {
            gauss_seidel_forward(a, &level.diagonal, b, &mut x);
        }

        let mut residual = vec![0.0; b.len()];
        spmv(a, &x, &mut residual);
        for (r_i, b_i) in residual.iter_mut().zip(b) {
            *r_i = *b_i - *r_i;
        }

        let mut coarse_rhs = vec![0.0; level.restriction.nrows()];
        spmv(&level.restriction, &residual, &mut coarse_rhs);
        let coarse_correction = self.v_cycle(level_idx + 1, &coarse_rhs);

        let mut correction = vec![0.0; b.len()];
        spmv(&level.prolongation, &coarse_correction, &mut correction);
        for (x_i, c_i) in x.iter_mut().zip(&correction) {
            *x_i += *c_i;
        }

        for _ in 0..self.post_smoothing_steps {
            gauss_seidel_backward(a, &level.diagonal, b, &mut x);
        }
        x
    }
}

impl LinearOperator<f64> for AlgebraicMultigrid {
    fn apply(&self, mut y: DVectorViewMut<f64>, x: DVectorView<f64>) -> Result<(), OperatorError> {
        let b: Vec<f64> = x.iter().copied().collect();
        let z = self.v_cycle(0, &b);
        for (y_i, z_i) in y.iter_mut().zip(z) {
            *y_i = z_i;
        }
        Ok(())
    }
}

fn extract_diagonal(matrix: &CsrMatrix<f64>, level: usize) -> Result<Vec<f64>, AmgError> {
    matrix
        .row_iter()
        .enumerate()
        .map(|(i, row)| {
            let d = row
                .col_indices()
                .iter()
                .zip(row.values())
                .filter(|(j, _)| **j == i)
                .map(|(_, v)| *v)
                .sum::<f64>();
            if d == 0.0 {
                Err(AmgError::ZeroDiagonal { level, row: i })
            } else {
                Ok(d)
            }
        })
        .collect()
}

/// Strong off-diagonal neighbours of every row.
fn strong_connections(matrix: &CsrMatrix<f64>, diagonal: &[f64], threshold: f64) -> Vec<Vec<usize>> {
    matrix
        .row_iter()
        .enumerate()
        .map(|(i, row)| {
            row.col_indices()
                .iter()
                .zip(row.values())
                .filter(|(&j, &a_ij)| j != i && a_ij.abs() >= threshold * (diagonal[i] * diagonal[j]).abs().sqrt())
                .map(|(&j, _)| j)
                .collect()
        })
        .collect()
}

/// Groups nodes into aggregates.
///
/// Returns the aggregate index of every node, or `None` for isolated nodes (no strong
/// neighbours), together with the number of aggregates.
fn aggregate(strong: &[Vec<usize>]) -> (Vec<Option<usize>>, usize) {
    let n = strong.len();
    let mut aggregates: Vec<Option<usize>> = vec![None; n];
    let mut count = 0;

    // Root aggregates: a node and its whole strong neighbourhood, if still untouched
    for i in 0..n {
        if strong[i].is_empty() || aggregates[i].is_some() {
            continue;
        }
        if strong[i].iter().all(|&j| aggregates[j].is_none()) {
            aggregates[i] = Some(count);
            for &j in &strong[i] {
                aggregates[j] = Some(count);
            }
            count += 1;
        }
    }

    // Attach leftovers to a neighbouring root aggregate
    let roots = aggregates.clone();
    for i in 0..n {
        if strong[i].is_empty() || aggregates[i].is_some() {
            continue;
        }
        if let Some(agg) = strong[i].iter().find_map(|&j| roots[j]) {
            aggregates[i] = Some(agg);
        }
    }

    // Whatever remains forms new aggregates with its unassigned neighbours
    for i in 0..n {
        if strong[i].is_empty() || aggregates[i].is_some() {
            continue;
        }
        aggregates[i] = Some(count);
        for &j in &strong[i] {
            if aggregates[j].is_none() {
                aggregates[j] = Some(count);
            }
        }
        count += 1;
    }

    (aggregates, count)
}

fn tentative_prolongation(aggregates: &[Option<usize>], num_aggregates: usize) -> CsrMatrix<f64> {
    let mut sizes = vec![0usize; num_aggregates];
    for agg in aggregates.iter().flatten() {
        sizes[*agg] += 1;
    }

    let mut coo = CooMatrix::new(aggregates.len(), num_aggregates);
    for (i, agg) in aggregates.iter().enumerate() {
        if let Some(agg) = *agg {
            coo.push(i, agg, 1.0 / (sizes[agg] as f64).sqrt());
        }
    }
    CsrMatrix::from(&coo)
}

/// Computes `(I - ω D⁻¹ A) P` with `ω = 4 / (3 ρ)`, where `ρ` bounds the spectral radius of
/// `D⁻¹ A` by Gershgorin's theorem.
fn smooth_prolongation(matrix: &CsrMatrix<f64>, diagonal: &[f64], tentative: &CsrMatrix<f64>) -> CsrMatrix<f64> {
    let rho = matrix
        .row_iter()
        .zip(diagonal)
        .map(|(row, d)| row.values().iter().map(|v| v.abs()).sum::<f64>() / d.abs())
        .fold(0.0, f64::max);
    let omega = if rho > 0.0 { 4.0 / (3.0 * rho) } else { 0.0 };

    let ap = matrix * tentative;
    let mut coo = CooMatrix::new(tentative.nrows(), tentative.ncols());
    for (i, j, v) in tentative.triplet_iter() {
        coo.push(i, j, *v);
    }
    for (i, j, v) in ap.triplet_iter() {
        coo.push(i, j, -omega * *v / diagonal[i]);
    }
    CsrMatrix::from(&coo)
}

fn spmv(matrix: &CsrMatrix<f64>, x: &[f64], y: &mut [f64]) {
    for (y_i, row) in y.iter_mut().zip(matrix.row_iter()) {
        *y_i = row
            .col_indices()
            .iter()
            .zip(row.values())
            .map(|(&j, &a_ij)| a_ij * x[j])
            .sum();
    }
}

fn gauss_seidel_update(matrix: &CsrMatrix<f64>, diagonal: &[f64], b: &[f64], x: &mut [f64], i: usize) {
    let row = matrix.row(i);
    let mut sum = b[i];
    for (&j, &a_ij) in row.col_indices().iter().zip(row.values()) {
        if j != i {
            sum -= a_ij * x[j];
        }
    }
    x[i] = sum / diagonal[i];
}

fn gauss_seidel_forward(matrix: &CsrMatrix<f64>, diagonal: &[f64], b: &[f64], x: &mut [f64]) {
    for i in 0..x.len() {
        gauss_seidel_update(matrix, diagonal, b, x, i);
    }
}

fn gauss_seidel_backward(matrix: &CsrMatrix<f64>, diagonal: &[f64], b: &[f64], x: &mut [f64]) {
    for i in (0..x.len()).rev() {
        gauss_seidel_update(matrix, diagonal, b, x, i);
    }
}
