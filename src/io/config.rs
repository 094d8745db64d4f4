// Read the RGN driver settings from a yaml file, e.g.
/*
    domain: real
    diff_mode: auto
    chunk_size: 256
    solver_restart: true
    solver:
      tol: 1.0e-6
      max_iter: 200
    eps:
      type: exponential
      init: 0.1
      decay_rate: 0.9
      transition_steps: 10
      end_value: 0.001
    diag_shift:
      type: constant
      value: 0.01
    learning_rate: 0.05
 */

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, RgnError};
use crate::optimizer::{ConjugateGradient, DiffMode, Domain, ScheduleConfig};

/// Settings of a [`crate::driver::VmcRgn`] run.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct RgnConfig {
    /// Differentiation domain
    pub domain: Domain,
    /// Forward, reverse or automatic differentiation
    pub diff_mode: DiffMode,
    /// Samples per chunk; unset means the whole batch at once
    pub chunk_size: Option<usize>,
    /// Warm start each solve from the previous solution
    pub solver_restart: bool,
    /// Conjugate gradient settings
    pub solver: ConjugateGradient,
    /// Weight of the Hessian correction per step
    pub eps: ScheduleConfig,
    /// Diagonal shift per step
    pub diag_shift: ScheduleConfig,
    /// Step size of the outer update θ ← θ − lr·dp
    pub learning_rate: f64,
}

impl Default for RgnConfig {
    fn default() -> Self {
        Self {
            domain: Domain::Real,
            diff_mode: DiffMode::Auto,
            chunk_size: None,
            solver_restart: false,
            solver: ConjugateGradient::default(),
            eps: ScheduleConfig::Constant { value: 0.01 },
            diag_shift: ScheduleConfig::Constant { value: 0.01 },
            learning_rate: 0.05,
        }
    }
}

impl RgnConfig {
    pub fn from_yaml_str(s: &str) -> Result<Self> {
        let config: RgnConfig = serde_yaml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        let reader = std::io::BufReader::new(file);
        let config: RgnConfig = serde_yaml::from_reader(reader)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_yaml_string(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == Some(0) {
            return Err(RgnError::InvalidConfig("chunk_size must be positive".into()));
        }
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(RgnError::InvalidConfig(format!(
                "learning_rate must be positive, got {}",
                self.learning_rate
            )));
        }
        self.solver.validate()?;
        self.eps.validate("eps")?;
        self.diag_shift.validate("diag_shift")
    }
}
