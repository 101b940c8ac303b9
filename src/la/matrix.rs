use crate::comm::Communicator;
use nalgebra::{DVectorView, DVectorViewMut};
use nalgebra_sparse::pattern::SparsityPattern;
use nalgebra_sparse::CsrMatrix;
use std::ops::Range;
use visco_sparse::cg::{InnerProduct, LinearOperator, OperatorError};

/// A sparse matrix whose rows are partitioned among ranks.
///
/// Every rank stores the same sparsity pattern. After [`DistributedMatrix::compress_add`] every
/// rank holds the complete assembled values.
#[derive(Debug, Clone)]
pub struct DistributedMatrix {
    matrix: CsrMatrix<f64>,
    owned: Range<usize>,
}

impl DistributedMatrix {
    pub fn new(pattern: SparsityPattern, owned: Range<usize>) -> Self {
        let nnz = pattern.nnz();
        let matrix = CsrMatrix::try_from_pattern_and_values(pattern, vec![0.0; nnz])
            .expect("Values have the same length as the pattern");
        Self { matrix, owned }
    }

    pub fn nrows(&self) -> usize {
        self.matrix.nrows()
    }

    pub fn owned_range(&self) -> Range<usize> {
        self.owned.clone()
    }

    pub fn csr(&self) -> &CsrMatrix<f64> {
        &self.matrix
    }

    /// Adds `value` to entry `(i, j)`.
    ///
    /// # Panics
    ///
    /// Panics if the entry is not part of the sparsity pattern.
    pub fn add(&mut self, i: usize, j: usize, value: f64) {
        let mut row = self.matrix.row_mut(i);
        let (cols, values) = row.cols_and_values_mut();
        let idx = cols
            .binary_search(&j)
            .unwrap_or_else(|_| panic!("Entry ({}, {}) is not in the sparsity pattern", i, j));
        values[idx] += value;
    }

    pub fn get(&self, i: usize, j: usize) -> f64 {
        let row = self.matrix.row(i);
        row.col_indices()
            .binary_search(&j)
            .map(|idx| row.values()[idx])
            .unwrap_or(0.0)
    }

    pub fn diagonal(&self, i: usize) -> f64 {
        self.get(i, i)
    }

    /// Sums the contributions of all ranks. Collective.
    pub fn compress_add(&mut self, comm: &dyn Communicator) {
        comm.sum_in_place(self.matrix.values_mut());
    }

    /// Largest absolute difference between `a_ij` and `a_ji`.
    pub fn symmetry_defect(&self) -> f64 {
        self.matrix
            .triplet_iter()
            .map(|(i, j, v)| (v - self.get(j, i)).abs())
            .fold(0.0, f64::max)
    }

    /// `y = A x` for replicated `x` and `y`. Each rank computes its owned rows. Collective.
    pub fn vmult(&self, y: &mut [f64], x: &[f64], comm: &dyn Communicator) {
        assert_eq!(y.len(), self.nrows());
        assert_eq!(x.len(), self.matrix.ncols());
        y.fill(0.0);
        for i in self.owned.clone() {
            let row = self.matrix.row(i);
            y[i] = row
                .col_indices()
                .iter()
                .zip(row.values())
                .map(|(&j, &a_ij)| a_ij * x[j])
                .sum();
        }
        comm.sum_in_place(y);
    }
}

/// Matrix-vector product with a [`DistributedMatrix`] on replicated vectors.
pub struct DistributedOperator<'a> {
    pub matrix: &'a DistributedMatrix,
    pub comm: &'a dyn Communicator,
}

impl<'a> LinearOperator<f64> for DistributedOperator<'a> {
    fn apply(&self, mut y: DVectorViewMut<f64>, x: DVectorView<f64>) -> Result<(), OperatorError> {
        let x: Vec<f64> = x.iter().copied().collect();
        let mut result = vec![0.0; y.len()];
        self.matrix.vmult(&mut result, &x, self.comm);
        for (y_i, r_i) in y.iter_mut().zip(result) {
            *y_i = r_i;
        }
        Ok(())
    }
}

/// Inner product over the owned range, summed over all ranks.
pub struct OwnedInnerProduct<'a> {
    pub owned: Range<usize>,
    pub comm: &'a dyn Communicator,
}

impl<'a> InnerProduct<f64> for OwnedInnerProduct<'a> {
    fn dot(&self, x: DVectorView<f64>, y: DVectorView<f64>) -> f64 {
        let local: f64 = self.owned.clone().map(|i| x[i] * y[i]).sum();
        self.comm.sum_f64(local)
    }
}
