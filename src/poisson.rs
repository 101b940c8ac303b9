//! Adaptive solution of `-Δu = f` on the unit square with `u = 0` on the boundary.
//!
//! Every cycle distributes DoFs on the current mesh, assembles and solves the constrained
//! system, estimates the error and adapts the mesh for the next cycle. All ranks of the
//! communicator must run the driver together.
use crate::assembly::{assemble_poisson_cell, FeValues};
use crate::comm::Communicator;
use crate::config::PoissonConfig;
use crate::constraints::{interpolate_boundary_values, make_hanging_node_constraints, AffineConstraints};
use crate::dofs::DofHandler;
use crate::error::kelly_error_estimate;
use crate::fe::FeQ;
use crate::index_set::IndexSet;
use crate::io::vtk::{piece_file_name, write_pvtu_record, SolutionDataSetBuilder};
use crate::la::{
    make_sparsity_pattern, DistributedMatrix, DistributedVector, GhostedVector, LinearAlgebraBackend, SolverControl,
    SolverOutput,
};
use crate::mesh::refinement::refine_and_coarsen_fixed_number;
use crate::mesh::Triangulation;
use crate::quadrature::gauss_2d;
use crate::timer::ComputingTimer;
use eyre::{ensure, eyre, WrapErr};
use log::{debug, info, warn};
use nalgebra::{DMatrix, DVector};
use std::fs;

const NOT_SET_UP: &str = "The linear system has not been set up for the current mesh";

/// Statistics of one adaptive cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleSummary {
    pub cycle: usize,
    pub n_active_cells: usize,
    pub n_dofs: usize,
    pub solver_iterations: usize,
    /// `(Σ_K η_K²)^(1/2)` over all cells.
    pub estimated_error: f64,
}

/// The linear system and solution of one cycle.
///
/// Everything in here refers to the DoF numbering of a single mesh generation and is discarded
/// when the mesh changes.
#[derive(Debug)]
pub struct LinearSystem {
    pub dofs: DofHandler,
    pub locally_owned_dofs: IndexSet,
    pub locally_relevant_dofs: IndexSet,
    pub constraints: AffineConstraints,
    pub system_matrix: DistributedMatrix,
    pub system_rhs: DistributedVector,
    pub locally_relevant_solution: GhostedVector,
}

pub struct AdaptivePoisson<C: Communicator> {
    config: PoissonConfig,
    comm: C,
    backend: Box<dyn LinearAlgebraBackend>,
    fe: FeQ,
    triangulation: Triangulation,
    system: Option<LinearSystem>,
    error_indicators: Option<Vec<f64>>,
    timer: ComputingTimer,
}

impl<C: Communicator> AdaptivePoisson<C> {
    pub fn new(config: PoissonConfig, comm: C) -> Self {
        let backend = config.backend.create();
        let fe = FeQ::new(config.degree);
        let triangulation = Triangulation::hyper_cube(comm.size());
        Self {
            config,
            comm,
            backend,
            fe,
            triangulation,
            system: None,
            error_indicators: None,
            timer: ComputingTimer::new(),
        }
    }

    pub fn config(&self) -> &PoissonConfig {
        &self.config
    }

    pub fn comm(&self) -> &C {
        &self.comm
    }

    pub fn triangulation(&self) -> &Triangulation {
        &self.triangulation
    }

    /// The system of the current mesh, if it has been set up.
    pub fn system(&self) -> Option<&LinearSystem> {
        self.system.as_ref()
    }

    fn system_ref(&self) -> eyre::Result<&LinearSystem> {
        self.system.as_ref().ok_or_else(|| eyre!(NOT_SET_UP))
    }

    fn root_info(&self, message: impl AsRef<str>) {
        if self.comm.is_root() {
            info!("{}", message.as_ref());
        }
    }

    /// Runs all cycles. Collective.
    pub fn run(&mut self) -> eyre::Result<Vec<CycleSummary>> {
        self.root_info(format!(
            "Running with {} on {} rank(s)",
            self.backend.name(),
            self.comm.size()
        ));

        let mut summaries = Vec::with_capacity(self.config.n_cycles);
        for cycle in 0..self.config.n_cycles {
            self.root_info(format!("Cycle {}:", cycle));

            if cycle == 0 {
                self.initialize_mesh();
            } else {
                self.refine_grid()?;
            }

            self.setup_system()?;
            self.root_info(format!(
                "   Number of active cells:       {}",
                self.triangulation.n_global_active_cells()
            ));
            self.root_info(format!(
                "   Number of degrees of freedom: {}",
                self.system_ref()?.dofs.n_dofs()
            ));

            self.assemble_system()?;
            let solver_output = self.solve()?;
            self.root_info(format!("   Solved in {} iterations.", solver_output.iterations));

            let estimated_error = self
                .estimate_error()?
                .iter()
                .map(|eta| eta * eta)
                .sum::<f64>()
                .sqrt();

            self.output_results(cycle)?;

            summaries.push(CycleSummary {
                cycle,
                n_active_cells: self.triangulation.n_global_active_cells(),
                n_dofs: self.system_ref()?.dofs.n_dofs(),
                solver_iterations: solver_output.iterations,
                estimated_error,
            });

            if self.comm.is_root() {
                self.timer.log_summary();
            }
            self.timer.reset();
        }

        Ok(summaries)
    }

    /// Replaces the mesh by the unit square, uniformly refined `initial_refinement` times.
    pub fn initialize_mesh(&mut self) {
        let _scope = self.timer.scope("refine");
        self.triangulation = Triangulation::hyper_cube(self.comm.size());
        self.triangulation.refine_global(self.config.initial_refinement);
        self.system = None;
        self.error_indicators = None;
    }

    /// Distributes DoFs and creates constraints, sparsity pattern and vectors for the current
    /// mesh. Previous state is discarded. Collective.
    pub fn setup_system(&mut self) -> eyre::Result<()> {
        let _scope = self.timer.scope("setup");
        self.system = None;
        self.error_indicators = None;

        let rank = self.comm.rank();
        let tria = &self.triangulation;
        let dofs = DofHandler::distribute_dofs(tria, &self.fe);
        let locally_owned_dofs = dofs.locally_owned_dofs(rank);
        let locally_relevant_dofs = dofs.locally_relevant_dofs(tria, rank);

        let n_owned_total = self.comm.sum_usize(locally_owned_dofs.n_elements());
        ensure!(
            n_owned_total == dofs.n_dofs(),
            "Ranks own {} DoFs in total, but there are {}",
            n_owned_total,
            dofs.n_dofs()
        );

        let mut constraints = AffineConstraints::new();
        make_hanging_node_constraints(tria, &dofs, &mut constraints);
        interpolate_boundary_values(&dofs, 0.0, &mut constraints);
        constraints.close();

        let pattern = make_sparsity_pattern(&dofs, &constraints);
        debug!("Sparsity pattern with {} non-zeros", pattern.nnz());
        let system_matrix = DistributedMatrix::new(pattern, dofs.owned_range(rank));
        let system_rhs = DistributedVector::from_owned_set(&locally_owned_dofs);
        let locally_relevant_solution = GhostedVector::zeros(&locally_relevant_dofs);

        self.system = Some(LinearSystem {
            dofs,
            locally_owned_dofs,
            locally_relevant_dofs,
            constraints,
            system_matrix,
            system_rhs,
            locally_relevant_solution,
        });
        Ok(())
    }

    /// Assembles the stiffness matrix and load vector on the owned cells. Collective.
    pub fn assemble_system(&mut self) -> eyre::Result<()> {
        let _scope = self.timer.scope("assembly");
        let rank = self.comm.rank();
        let source = self.config.source;
        let mut fe_values = FeValues::new(&self.fe, gauss_2d(self.fe.degree() + 1));
        let mut cell_matrix = DMatrix::zeros(0, 0);
        let mut cell_rhs = DVector::zeros(0);

        let tria = &self.triangulation;
        let system = self.system.as_mut().ok_or_else(|| eyre!(NOT_SET_UP))?;
        for cell_index in tria.locally_owned_cells(rank) {
            fe_values.reinit(&tria.cell(cell_index));
            assemble_poisson_cell(&fe_values, &source, &mut cell_matrix, &mut cell_rhs);
            system.constraints.distribute_local_to_global(
                &cell_matrix,
                &cell_rhs,
                system.dofs.cell_dofs(cell_index),
                &mut system.system_matrix,
                &mut system.system_rhs,
            );
        }

        system.system_matrix.compress_add(&self.comm);
        system.system_rhs.compress_add(&self.comm);
        Ok(())
    }

    /// Solves the assembled system and updates the ghosted solution. Collective.
    ///
    /// Failure to converge is an error.
    pub fn solve(&mut self) -> eyre::Result<SolverOutput> {
        let _scope = self.timer.scope("solve");
        let comm: &dyn Communicator = &self.comm;
        let system = self.system.as_mut().ok_or_else(|| eyre!(NOT_SET_UP))?;

        let control = SolverControl {
            max_iterations: self.config.max_iterations.unwrap_or(system.dofs.n_dofs()),
            tolerance: self.config.solver_tolerance,
        };
        let mut completely_distributed_solution = DistributedVector::from_owned_set(&system.locally_owned_dofs);
        let output = self
            .backend
            .solve(
                &system.system_matrix,
                &mut completely_distributed_solution,
                &system.system_rhs,
                &control,
                comm,
            )
            .wrap_err_with(|| format!("Failed to solve system with {} DoFs", system.dofs.n_dofs()))?;

        system
            .constraints
            .distribute_parallel(&mut completely_distributed_solution, comm);
        system.locally_relevant_solution =
            completely_distributed_solution.to_ghosted(&system.locally_relevant_dofs, comm);
        Ok(output)
    }

    /// Kelly error indicators of the current solution, one per active cell. Collective.
    pub fn estimate_error(&mut self) -> eyre::Result<&[f64]> {
        let indicators = match self.error_indicators.take() {
            Some(indicators) => indicators,
            None => {
                let _scope = self.timer.scope("estimate");
                let system = self.system_ref()?;
                kelly_error_estimate(
                    &self.triangulation,
                    &system.dofs,
                    &system.locally_relevant_solution,
                    self.comm.rank(),
                    &self.comm,
                )
            }
        };
        Ok(self.error_indicators.insert(indicators).as_slice())
    }

    /// Marks cells by the fixed-number strategy and adapts the mesh. Collective.
    pub fn refine_grid(&mut self) -> eyre::Result<()> {
        let indicators = self.estimate_error()?.to_vec();
        let _scope = self.timer.scope("refine");
        let marked = refine_and_coarsen_fixed_number(
            &mut self.triangulation,
            &indicators,
            self.config.refine_fraction,
            self.config.coarsen_fraction,
        );
        debug!(
            "Marked {} cells for refinement and {} for coarsening",
            marked.refine.len(),
            marked.coarsen.len()
        );
        self.triangulation.execute_coarsening_and_refinement();

        // Everything built on the old mesh is stale now
        self.system = None;
        self.error_indicators = None;
        Ok(())
    }

    /// Writes the solution of the given cycle, if output is enabled. Collective.
    pub fn output_results(&self, cycle: usize) -> eyre::Result<()> {
        let output = &self.config.output;
        if !output.enabled {
            return Ok(());
        }
        if self.comm.size() > output.max_processes {
            if self.comm.is_root() {
                warn!(
                    "Skipping output on {} ranks (at most {} supported)",
                    self.comm.size(),
                    output.max_processes
                );
            }
            return Ok(());
        }

        let _scope = self.timer.scope("output");
        let system = self.system_ref()?;
        let rank = self.comm.rank();
        fs::create_dir_all(&output.directory)
            .wrap_err_with(|| format!("Failed to create output directory {}", output.directory.display()))?;
        SolutionDataSetBuilder::from_solution(
            &self.triangulation,
            &system.dofs,
            &system.locally_relevant_solution,
            rank,
        )
        .with_title(format!("Solution of cycle {}", cycle))
        .try_export(output.directory.join(piece_file_name(cycle, rank)))?;

        if self.comm.is_root() {
            let record = write_pvtu_record(&output.directory, cycle, self.comm.size())?;
            debug!("Wrote {}", record.display());
        }
        Ok(())
    }
}
