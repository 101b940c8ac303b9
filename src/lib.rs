//! Adaptive finite element solvers on distributed quadtree meshes.
//!
//! The crate provides an adaptive Poisson driver ([`poisson::AdaptivePoisson`]) and a matrix-free
//! viscoelastic stress update ([`stress::StressOperator`]), together with the mesh, DoF,
//! constraint and linear algebra infrastructure they are built on.
pub mod assembly;
pub mod coloring;
pub mod comm;
pub mod config;
pub mod constraints;
pub mod dofs;
pub mod error;
pub mod fe;
pub mod index_set;
pub mod io;
pub mod la;
pub mod matrix_free;
pub mod mesh;
pub mod poisson;
pub mod quadrature;
pub mod stress;
pub mod timer;

pub extern crate nalgebra;
pub extern crate vtkio;
