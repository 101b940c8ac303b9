//! Run configuration, deserialised from TOML.
//!
//! Every field has a default, so an empty document yields the reference setup: ten cycles of
//! `Q2` elements starting from a uniformly refined mesh of depth 5.
use crate::la::BackendKind;
use eyre::WrapErr;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub poisson: PoissonConfig,
    pub problem: ProblemData,
}

impl Config {
    pub fn from_toml_str(toml_str: &str) -> eyre::Result<Self> {
        toml::from_str(toml_str).wrap_err("Failed to parse configuration")
    }

    pub fn from_file(path: impl AsRef<Path>) -> eyre::Result<Self> {
        let path = path.as_ref();
        let contents =
            fs::read_to_string(path).wrap_err_with(|| format!("Failed to read configuration file {}", path.display()))?;
        Self::from_toml_str(&contents).wrap_err_with(|| format!("Invalid configuration in {}", path.display()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PoissonConfig {
    pub n_cycles: usize,
    pub degree: usize,
    pub initial_refinement: usize,
    /// Relative residual tolerance of the CG solve.
    pub solver_tolerance: f64,
    /// Iteration cap of the CG solve. Defaults to the number of DoFs.
    pub max_iterations: Option<usize>,
    pub refine_fraction: f64,
    pub coarsen_fraction: f64,
    pub backend: BackendKind,
    pub source: SourceTerm,
    pub output: OutputConfig,
}

impl Default for PoissonConfig {
    fn default() -> Self {
        Self {
            n_cycles: 10,
            degree: 2,
            initial_refinement: 5,
            solver_tolerance: 1e-12,
            max_iterations: None,
            refine_fraction: 0.3,
            coarsen_fraction: 0.03,
            backend: BackendKind::default(),
            source: SourceTerm::default(),
            output: OutputConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OutputConfig {
    pub enabled: bool,
    pub directory: PathBuf,
    /// Output is skipped when running on more ranks than this.
    pub max_processes: usize,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            directory: PathBuf::from("output"),
            max_processes: 32,
        }
    }
}

/// Right-hand side `f` of `-Δu = f`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum SourceTerm {
    /// `+1` above the curve `y = offset + amplitude sin(frequency x)`, `-1` below.
    SinusoidalInterface { offset: f64, amplitude: f64, frequency: f64 },
    Constant { value: f64 },
}

impl Default for SourceTerm {
    fn default() -> Self {
        Self::SinusoidalInterface {
            offset: 0.5,
            amplitude: 0.25,
            frequency: 4.0 * PI,
        }
    }
}

impl SourceTerm {
    pub fn value(&self, point: &[f64; 2]) -> f64 {
        match *self {
            Self::SinusoidalInterface {
                offset,
                amplitude,
                frequency,
            } => {
                let [x, y] = *point;
                if y > offset + amplitude * (frequency * x).sin() {
                    1.0
                } else {
                    -1.0
                }
            }
            Self::Constant { value } => value,
        }
    }
}

/// Scalar physical parameters of the viscoelastic problem.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProblemData {
    pub shear_modulus: f64,
}

impl Default for ProblemData {
    fn default() -> Self {
        Self { shear_modulus: 3.0e10 }
    }
}
