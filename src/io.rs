//! Output of solutions for visualization.
pub mod vtk;
