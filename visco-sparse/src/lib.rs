//! Sparse iterative solvers used by `visco-fem`.
//!
//! The conjugate gradient solver is generic over the operator, the preconditioner and the inner
//! product, which lets distributed callers plug in collective reductions. The algebraic
//! multigrid preconditioner works on a single `CsrMatrix` and is typically replicated on every
//! process.

pub mod amg;
pub mod cg;

pub use nalgebra_sparse::CsrMatrix;
