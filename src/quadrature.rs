//! Quadrature rules on the unit reference cell.
//!
//! The rules in `visco_quadrature` live on `[-1, 1]^D`. Elements in this crate use the unit
//! cell `[0, 1]^D` as reference domain, so the rules are mapped once on construction.
use visco_quadrature::tensor::{quadrilateral_gauss, quadrilateral_gauss_lobatto};
use visco_quadrature::univariate::{gauss, gauss_lobatto};
use visco_quadrature::Rule;

#[derive(Debug, Clone, PartialEq)]
pub struct Quadrature<const D: usize> {
    weights: Vec<f64>,
    points: Vec<[f64; D]>,
}

pub type Quadrature1d = Quadrature<1>;
pub type Quadrature2d = Quadrature<2>;

impl<const D: usize> Quadrature<D> {
    /// Maps a rule on `[-1, 1]^D` to `[0, 1]^D`.
    pub fn from_reference_rule(rule: Rule<D>) -> Self {
        let (weights, points) = rule;
        let scale = 0.5f64.powi(D as i32);
        Self {
            weights: weights.into_iter().map(|w| w * scale).collect(),
            points: points
                .into_iter()
                .map(|p| p.map(|xi| 0.5 * (xi + 1.0)))
                .collect(),
        }
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    pub fn points(&self) -> &[[f64; D]] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.weights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }

    pub fn integrate(&self, f: impl Fn(&[f64; D]) -> f64) -> f64 {
        self.weights.iter().zip(&self.points).map(|(w, p)| w * f(p)).sum()
    }
}

pub fn gauss_1d(num_points: usize) -> Quadrature1d {
    Quadrature::from_reference_rule(gauss(num_points))
}

pub fn gauss_lobatto_1d(num_points: usize) -> Quadrature1d {
    Quadrature::from_reference_rule(gauss_lobatto(num_points))
}

pub fn gauss_2d(num_points_per_dim: usize) -> Quadrature2d {
    Quadrature::from_reference_rule(quadrilateral_gauss(num_points_per_dim))
}

pub fn gauss_lobatto_2d(num_points_per_dim: usize) -> Quadrature2d {
    Quadrature::from_reference_rule(quadrilateral_gauss_lobatto(num_points_per_dim))
}
