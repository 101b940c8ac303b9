use crate::comm::Communicator;
use crate::la::{DistributedMatrix, DistributedOperator, DistributedVector, OwnedInnerProduct};
use log::debug;
use nalgebra::DVector;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt;
use visco_sparse::amg::{Aggregation, AlgebraicMultigrid, AmgError, AmgParameters};
use visco_sparse::cg::{ConjugateGradient, LinearOperator, RelativeResidualCriterion, SolveError};

/// Iteration budget and relative tolerance of an iterative solve.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolverControl {
    pub max_iterations: usize,
    pub tolerance: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SolverOutput {
    pub iterations: usize,
    pub residual_norm: f64,
}

#[derive(Debug)]
#[non_exhaustive]
pub enum SolverError {
    Preconditioner(AmgError),
    NotConverged(SolveError<f64>),
}

impl fmt::Display for SolverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Preconditioner(err) => write!(f, "Failed to build preconditioner: {}", err),
            Self::NotConverged(err) => write!(f, "Linear solve did not converge: {}", err),
        }
    }
}

impl Error for SolverError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Preconditioner(err) => Some(err),
            Self::NotConverged(err) => Some(err),
        }
    }
}

impl From<AmgError> for SolverError {
    fn from(err: AmgError) -> Self {
        Self::Preconditioner(err)
    }
}

impl From<SolveError<f64>> for SolverError {
    fn from(err: SolveError<f64>) -> Self {
        Self::NotConverged(err)
    }
}

/// A linear algebra backend: an AMG-preconditioned CG solver for distributed systems.
pub trait LinearAlgebraBackend {
    fn name(&self) -> &'static str;

    /// Builds a preconditioner from a compressed matrix.
    fn build_preconditioner(&self, matrix: &DistributedMatrix) -> Result<Box<dyn LinearOperator<f64>>, SolverError>;

    /// Solves `A x = b` with preconditioned CG, using `solution` as initial guess. Collective.
    fn solve(
        &self,
        matrix: &DistributedMatrix,
        solution: &mut DistributedVector,
        rhs: &DistributedVector,
        control: &SolverControl,
        comm: &dyn Communicator,
    ) -> Result<SolverOutput, SolverError> {
        let b = DVector::from_vec(rhs.gather(comm));
        let mut x = DVector::from_vec(solution.gather(comm));
        let preconditioner = self.build_preconditioner(matrix)?;

        let operator = DistributedOperator { matrix, comm };
        let inner_product = OwnedInnerProduct {
            owned: solution.owned_range(),
            comm,
        };
        let output = ConjugateGradient::new()
            .with_operator(&operator)
            .with_preconditioner(&*preconditioner)
            .with_inner_product(&inner_product)
            .with_stopping_criterion(RelativeResidualCriterion::new(control.tolerance))
            .with_max_iter(control.max_iterations)
            .solve_with_guess(&b, &mut x)?;

        solution.set_owned_from(x.as_slice());
        let residual_norm = output.residual_norm.unwrap_or(0.0);
        debug!(
            "{}: CG converged in {} iterations (residual {:.3e})",
            self.name(),
            output.num_iterations,
            residual_norm
        );
        Ok(SolverOutput {
            iterations: output.num_iterations,
            residual_norm,
        })
    }
}

/// Smoothed aggregation AMG.
#[derive(Debug, Clone, Default)]
pub struct SmoothedAggregationBackend {
    pub params: AmgParameters,
}

impl LinearAlgebraBackend for SmoothedAggregationBackend {
    fn name(&self) -> &'static str {
        "smoothed-aggregation"
    }

    fn build_preconditioner(&self, matrix: &DistributedMatrix) -> Result<Box<dyn LinearOperator<f64>>, SolverError> {
        let params = AmgParameters {
            aggregation: Aggregation::Smoothed,
            ..self.params.clone()
        };
        Ok(Box::new(AlgebraicMultigrid::new(matrix.csr(), &params)?))
    }
}

/// Plain (unsmoothed) aggregation AMG.
#[derive(Debug, Clone, Default)]
pub struct PlainAggregationBackend {
    pub params: AmgParameters,
}

impl LinearAlgebraBackend for PlainAggregationBackend {
    fn name(&self) -> &'static str {
        "plain-aggregation"
    }

    fn build_preconditioner(&self, matrix: &DistributedMatrix) -> Result<Box<dyn LinearOperator<f64>>, SolverError> {
        let params = AmgParameters {
            aggregation: Aggregation::Plain,
            ..self.params.clone()
        };
        Ok(Box::new(AlgebraicMultigrid::new(matrix.csr(), &params)?))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackendKind {
    #[default]
    SmoothedAggregation,
    PlainAggregation,
}

impl BackendKind {
    pub fn create(&self) -> Box<dyn LinearAlgebraBackend> {
        match self {
            Self::SmoothedAggregation => Box::new(SmoothedAggregationBackend::default()),
            Self::PlainAggregation => Box::new(PlainAggregationBackend::default()),
        }
    }
}
