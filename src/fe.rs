//! Tensor-product Lagrange elements on the unit square.
use crate::quadrature::gauss_lobatto_1d;

/// The `Q_p` Lagrange element with support points at the Gauss-Lobatto points.
///
/// Shape functions are numbered lexicographically: shape function `i = a + (p + 1) b` is the
/// product of the 1D Lagrange polynomials `L_a(ξ_0) L_b(ξ_1)` on the reference cell `[0, 1]^2`.
#[derive(Debug, Clone, PartialEq)]
pub struct FeQ {
    degree: usize,
    nodes: Vec<f64>,
}

impl FeQ {
    pub fn new(degree: usize) -> Self {
        assert!(degree >= 1, "FeQ requires degree >= 1");
        let nodes = gauss_lobatto_1d(degree + 1)
            .points()
            .iter()
            .map(|&[t]| t)
            .collect();
        Self { degree, nodes }
    }

    pub fn degree(&self) -> usize {
        self.degree
    }

    pub fn dofs_per_cell(&self) -> usize {
        (self.degree + 1) * (self.degree + 1)
    }

    /// Support points of the 1D basis on `[0, 1]`.
    pub fn nodes_1d(&self) -> &[f64] {
        &self.nodes
    }

    pub fn local_index(&self, a: usize, b: usize) -> usize {
        a + (self.degree + 1) * b
    }

    /// The 1D multi-index `(a, b)` of local shape function `i`.
    pub fn tensor_index(&self, i: usize) -> (usize, usize) {
        (i % (self.degree + 1), i / (self.degree + 1))
    }

    /// Value of the 1D Lagrange polynomial `L_a` at `t`.
    pub fn basis_1d(&self, a: usize, t: f64) -> f64 {
        let t_a = self.nodes[a];
        self.nodes
            .iter()
            .enumerate()
            .filter(|(m, _)| *m != a)
            .map(|(_, &t_m)| (t - t_m) / (t_a - t_m))
            .product()
    }

    /// Derivative of the 1D Lagrange polynomial `L_a` at `t`.
    pub fn basis_1d_derivative(&self, a: usize, t: f64) -> f64 {
        let t_a = self.nodes[a];
        let mut sum = 0.0;
        for (k, &t_k) in self.nodes.iter().enumerate() {
            if k == a {
                continue;
            }
            let mut term = 1.0 / (t_a - t_k);
            for (m, &t_m) in self.nodes.iter().enumerate() {
                if m != a && m != k {
                    term *= (t - t_m) / (t_a - t_m);
                }
            }
            sum += term;
        }
        sum
    }

    pub fn shape_value(&self, i: usize, xi: &[f64; 2]) -> f64 {
        let (a, b) = self.tensor_index(i);
        self.basis_1d(a, xi[0]) * self.basis_1d(b, xi[1])
    }

    /// Gradient of shape function `i` with respect to the reference coordinates.
    pub fn shape_grad(&self, i: usize, xi: &[f64; 2]) -> [f64; 2] {
        let (a, b) = self.tensor_index(i);
        [
            self.basis_1d_derivative(a, xi[0]) * self.basis_1d(b, xi[1]),
            self.basis_1d(a, xi[0]) * self.basis_1d_derivative(b, xi[1]),
        ]
    }

    /// Reference coordinates of the support point of shape function `i`.
    pub fn support_point(&self, i: usize) -> [f64; 2] {
        let (a, b) = self.tensor_index(i);
        [self.nodes[a], self.nodes[b]]
    }

    /// Local indices of the shape functions on the given face, ordered by increasing coordinate
    /// along the face.
    pub fn face_dofs(&self, face: usize) -> Vec<usize> {
        let p = self.degree;
        (0..=p)
            .map(|k| match face {
                0 => self.local_index(0, k),
                1 => self.local_index(p, k),
                2 => self.local_index(k, 0),
                3 => self.local_index(k, p),
                _ => panic!("Invalid face index {}", face),
            })
            .collect()
    }
}
