mod constraints;
mod io;
mod mesh;
mod poisson;
mod stress;
