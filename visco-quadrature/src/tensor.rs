//! 2D quadrature rules formed by tensor product formulations.
//!
//! Points are ordered lexicographically with the first coordinate running fastest, which
//! matches the local node numbering of tensor-product Lagrange elements.

use crate::univariate::{gauss, gauss_lobatto};
use crate::Rule;

fn tensorize(rule1d: Rule<1>) -> Rule<2> {
    let (weights1d, points1d) = rule1d;
    let n = weights1d.len();
    let mut weights2d = Vec::with_capacity(n * n);
    let mut points2d = Vec::with_capacity(n * n);

    for (&wy, &[y]) in weights1d.iter().zip(&points1d) {
        for (&wx, &[x]) in weights1d.iter().zip(&points1d) {
            weights2d.push(wx * wy);
            points2d.push([x, y]);
        }
    }

    (weights2d, points2d)
}

/// A Gauss quadrature rule for the reference quadrilateral `[-1, 1]^2`.
///
/// The rule is constructed as a tensor product from 1D rules, with the provided number of
/// points per dimension.
pub fn quadrilateral_gauss(num_points_per_dim: usize) -> Rule<2> {
    tensorize(gauss(num_points_per_dim))
}

/// A Gauss-Lobatto quadrature rule for the reference quadrilateral `[-1, 1]^2`.
///
/// # Panics
///
/// Panics if fewer than two points per dimension are requested.
pub fn quadrilateral_gauss_lobatto(num_points_per_dim: usize) -> Rule<2> {
    tensorize(gauss_lobatto(num_points_per_dim))
}
