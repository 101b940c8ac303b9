//! Distributed linear algebra over replicated index spaces.
//!
//! Vectors and matrices store the full global index space on every rank. Each rank only writes
//! its own contributions, and the collective `compress_add` combines the contributions of all
//! ranks. This mirrors the usual "local writes, then compress" protocol of distributed
//! linear algebra packages.
mod backend;
mod matrix;
mod sparsity;
mod vector;

pub use backend::*;
pub use matrix::*;
pub use sparsity::*;
pub use vector::*;
