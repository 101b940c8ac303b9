//! Matrix-free operator-split update of a viscoelastic (Maxwell) stress field.
//!
//! The velocity `v` is an out-of-plane (antiplane) field and the stress has the two shear
//! components `σ_c = σ_{c,z}`, `c ∈ {0, 1}`. One time step is split into a tentative update
//! that relaxes the stress towards the current strain rate, and a correction that accounts for
//! the change of the velocity over the step. Operators compute nodal increments; the caller
//! adds them to the stress.
use crate::comm::Communicator;
use crate::config::ProblemData;
use crate::la::{DistributedVector, GhostedVector};
use crate::matrix_free::{CellEvaluator, CellScratch, DofLayout, MatrixFree};
use log::debug;
use std::error::Error;
use std::fmt;

/// Number of stress components an operator can update.
pub const N_COMPONENTS: usize = 2;

/// Reciprocal viscosity `η⁻¹` as a function of position.
pub trait InvViscosity: Sync {
    fn value(&self, point: &[f64; 2]) -> f64;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConstantInvViscosity {
    pub value: f64,
}

impl InvViscosity for ConstantInvViscosity {
    fn value(&self, _point: &[f64; 2]) -> f64 {
        self.value
    }
}

/// An elastic upper layer (`η⁻¹ = 0`) above a viscous half-space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LayeredInvViscosity {
    /// `y`-coordinate of the interface between the layers.
    pub interface: f64,
    /// Inverse viscosity below the interface.
    pub lower: f64,
    /// Inverse viscosity above the interface.
    pub upper: f64,
}

impl InvViscosity for LayeredInvViscosity {
    fn value(&self, point: &[f64; 2]) -> f64 {
        if point[1] >= self.interface {
            self.upper
        } else {
            self.lower
        }
    }
}

/// The fields a stress update reads, owned by the time-stepping driver.
#[derive(Debug, Clone)]
pub struct Solution {
    pub velocity: GhostedVector,
    pub old_velocity: GhostedVector,
    pub stress: [GhostedVector; N_COMPONENTS],
}

impl Solution {
    /// A solution with all fields zero.
    pub fn zeros(data: &MatrixFree) -> Self {
        let zero = || GhostedVector::zeros(data.relevant_dofs());
        Self {
            velocity: zero(),
            old_velocity: zero(),
            stress: [zero(), zero()],
        }
    }
}

/// Everything an operator borrows for the duration of a call.
#[derive(Clone, Copy)]
pub struct StressContext<'a> {
    pub data: &'a MatrixFree,
    pub problem: &'a ProblemData,
    pub inv_visc: &'a dyn InvViscosity,
    pub comm: &'a dyn Communicator,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StressKernel {
    /// `Δt μ (∂_c v − η⁻¹ σ)`.
    Tentative,
    /// `Δt μ ∂_c (v − v_old)`.
    Correction,
}

#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum StressError {
    NotInitialized,
    LayoutMismatch { expected: DofLayout, actual: DofLayout },
    InvalidComponent { comp: usize },
    VectorSizeMismatch { expected: usize, actual: usize },
}

impl fmt::Display for StressError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotInitialized => write!(f, "Stress operator applied before init()"),
            Self::LayoutMismatch { expected, actual } => write!(
                f,
                "Stress operator was initialized for {}, but the current layout is {}",
                expected, actual
            ),
            Self::InvalidComponent { comp } => write!(
                f,
                "Invalid stress component {} (expected less than {})",
                comp, N_COMPONENTS
            ),
            Self::VectorSizeMismatch { expected, actual } => {
                write!(f, "Vector of length {} does not match {} DoFs", actual, expected)
            }
        }
    }
}

impl Error for StressError {}

#[derive(Debug, Clone)]
enum OperatorState {
    Uninitialized,
    Ready {
        inv_mass_matrix: DistributedVector,
        layout: DofLayout,
    },
}

/// Explicit stress increment `dst = M⁻¹ ∫ φ_i κ(σ)` for a [`StressKernel`] `κ`.
#[derive(Debug, Clone)]
pub struct StressOperator {
    kernel: StressKernel,
    time_step: f64,
    state: OperatorState,
}

impl StressOperator {
    pub fn new(kernel: StressKernel, time_step: f64) -> Self {
        Self {
            kernel,
            time_step,
            state: OperatorState::Uninitialized,
        }
    }

    /// Creates an operator and immediately initializes it for the layout of `ctx`. Collective.
    pub fn initialized(kernel: StressKernel, time_step: f64, ctx: &StressContext) -> Self {
        let mut op = Self::new(kernel, time_step);
        op.init(ctx);
        op
    }

    pub fn kernel(&self) -> StressKernel {
        self.kernel
    }

    pub fn time_step(&self) -> f64 {
        self.time_step
    }

    pub fn set_time_step(&mut self, time_step: f64) {
        self.time_step = time_step;
    }

    /// Whether the operator can be applied on the given data.
    pub fn is_ready_for(&self, data: &MatrixFree) -> bool {
        matches!(&self.state, OperatorState::Ready { layout, .. } if *layout == data.layout())
    }

    /// The cached inverse of the diagonal mass matrix, if initialized.
    pub fn inv_mass_matrix(&self) -> Option<&DistributedVector> {
        match &self.state {
            OperatorState::Ready { inv_mass_matrix, .. } => Some(inv_mass_matrix),
            OperatorState::Uninitialized => None,
        }
    }

    /// Computes and caches the inverse diagonal mass matrix. Collective.
    pub fn init(&mut self, ctx: &StressContext) {
        let data = ctx.data;
        let mut inv_mass_matrix = DistributedVector::zeros(data.n_dofs(), data.owned_dofs());
        inv_mass_matrix
            .as_mut_slice()
            .copy_from_slice(&data.local_mass_diagonal());
        inv_mass_matrix.compress_add(ctx.comm);
        for i in data.owned_dofs() {
            let m_ii = inv_mass_matrix.as_slice()[i];
            inv_mass_matrix.as_mut_slice()[i] = if m_ii > 0.0 { 1.0 / m_ii } else { 0.0 };
        }

        debug!("Initialized {:?} stress operator for {}", self.kernel, data.layout());
        self.state = OperatorState::Ready {
            inv_mass_matrix,
            layout: data.layout(),
        };
    }

    /// Forgets the cached mass matrix, e.g. after the mesh has changed.
    pub fn invalidate(&mut self) {
        self.state = OperatorState::Uninitialized;
    }

    /// Computes the increment of stress component `comp` over one time step into `dst`.
    /// Collective.
    ///
    /// `src` holds the current values of the component; it and the fields of `soln` must be
    /// valid on the locally relevant DoFs. `dst` is overwritten; only its owned entries are
    /// meaningful afterwards.
    pub fn apply(
        &self,
        ctx: &StressContext,
        dst: &mut DistributedVector,
        src: &GhostedVector,
        soln: &Solution,
        comp: usize,
    ) -> Result<(), StressError> {
        let data = ctx.data;
        let inv_mass_matrix = match &self.state {
            OperatorState::Uninitialized => return Err(StressError::NotInitialized),
            OperatorState::Ready { layout, .. } if *layout != data.layout() => {
                return Err(StressError::LayoutMismatch {
                    expected: *layout,
                    actual: data.layout(),
                })
            }
            OperatorState::Ready { inv_mass_matrix, .. } => inv_mass_matrix,
        };
        if comp >= N_COMPONENTS {
            return Err(StressError::InvalidComponent { comp });
        }
        let n_dofs = data.n_dofs();
        for len in [dst.len(), src.len(), soln.velocity.len(), soln.old_velocity.len()] {
            if len != n_dofs {
                return Err(StressError::VectorSizeMismatch {
                    expected: n_dofs,
                    actual: len,
                });
            }
        }

        dst.fill(0.0);
        let kernel = CellKernel {
            kernel: self.kernel,
            scale: self.time_step * ctx.problem.shear_modulus,
            inv_visc: ctx.inv_visc,
            src,
            soln,
            comp,
        };
        data.cell_loop(dst.as_mut_slice(), |cell, scratch| kernel.local_apply(cell, scratch));
        dst.compress_add(ctx.comm);

        let inv_mass = inv_mass_matrix.as_slice();
        let values = dst.as_mut_slice();
        for i in data.owned_dofs() {
            values[i] *= inv_mass[i];
        }
        Ok(())
    }
}

struct CellKernel<'a> {
    kernel: StressKernel,
    /// `Δt μ`
    scale: f64,
    inv_visc: &'a dyn InvViscosity,
    src: &'a GhostedVector,
    soln: &'a Solution,
    comp: usize,
}

impl<'a> CellKernel<'a> {
    const SIGMA: usize = 0;
    const VELOCITY: usize = 1;
    const OLD_VELOCITY: usize = 2;

    fn local_apply(&self, cell: &CellEvaluator, scratch: &mut CellScratch) {
        scratch.gather(Self::VELOCITY, cell, &self.soln.velocity);
        match self.kernel {
            StressKernel::Tentative => scratch.gather(Self::SIGMA, cell, self.src),
            StressKernel::Correction => scratch.gather(Self::OLD_VELOCITY, cell, &self.soln.old_velocity),
        }

        let CellScratch { local, fields } = scratch;
        for q in 0..cell.n_q_points() {
            let dv = cell.gradient(&fields[Self::VELOCITY], q)[self.comp];
            let update = match self.kernel {
                StressKernel::Tentative => {
                    let sigma = cell.value(&fields[Self::SIGMA], q);
                    let inv_visc = self.inv_visc.value(&cell.quadrature_point(q));
                    self.scale * (dv - inv_visc * sigma)
                }
                StressKernel::Correction => {
                    let dv_old = cell.gradient(&fields[Self::OLD_VELOCITY], q)[self.comp];
                    self.scale * (dv - dv_old)
                }
            };

            let jxw = cell.jxw(q);
            for (i, local_i) in local.iter_mut().enumerate() {
                *local_i += update * cell.shape_value(i, q) * jxw;
            }
        }
    }
}
