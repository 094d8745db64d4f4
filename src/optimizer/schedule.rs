//! Step-dependent scalar schedules for `eps` and `diag_shift`.

use serde::{Deserialize, Serialize};

use crate::error::{Result, RgnError};

/// A value as a function of the optimisation step.
pub trait Schedule {
    fn value(&self, step: usize) -> f64;
}

impl<F> Schedule for F
where
    F: Fn(usize) -> f64,
{
    fn value(&self, step: usize) -> f64 {
        self(step)
    }
}

#[derive(Serialize, Deserialize, Copy, Clone, Debug, PartialEq)]
pub struct ConstantSchedule(pub f64);

impl Schedule for ConstantSchedule {
    fn value(&self, _step: usize) -> f64 {
        self.0
    }
}

/// Linear ramp from `init` to `end` over `steps`, then constant.
#[derive(Serialize, Deserialize, Copy, Clone, Debug, PartialEq)]
pub struct LinearSchedule {
    pub init: f64,
    pub end: f64,
    pub steps: usize,
}

impl Schedule for LinearSchedule {
    fn value(&self, step: usize) -> f64 {
        if self.steps == 0 || step >= self.steps {
            return self.end;
        }
        let frac = step as f64 / self.steps as f64;
        self.init + (self.end - self.init) * frac
    }
}

/// `init · decay_rate^(step / transition_steps)`, optionally bounded by `end_value`.
#[derive(Serialize, Deserialize, Copy, Clone, Debug, PartialEq)]
pub struct ExponentialSchedule {
    pub init: f64,
    pub decay_rate: f64,
    pub transition_steps: usize,
    pub end_value: Option<f64>,
}

impl Schedule for ExponentialSchedule {
    fn value(&self, step: usize) -> f64 {
        let exponent = step as f64 / self.transition_steps.max(1) as f64;
        let v = self.init * self.decay_rate.powf(exponent);
        match self.end_value {
            // the bound is a floor for decay and a ceiling for growth
            Some(end) if self.decay_rate < 1.0 => v.max(end),
            Some(end) => v.min(end),
            None => v,
        }
    }
}

/// Serialisable description of a schedule.
#[derive(Serialize, Deserialize, Copy, Clone, Debug, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ScheduleConfig {
    Constant { value: f64 },
    Linear { init: f64, end: f64, steps: usize },
    Exponential { init: f64, decay_rate: f64, transition_steps: usize, end_value: Option<f64> },
}

impl ScheduleConfig {
    pub fn validate(&self, name: &str) -> Result<()> {
        let ok = match *self {
            ScheduleConfig::Constant { value } => value.is_finite() && value >= 0.0,
            ScheduleConfig::Linear { init, end, .. } => {
                init.is_finite() && end.is_finite() && init >= 0.0 && end >= 0.0
            }
            ScheduleConfig::Exponential { init, decay_rate, end_value, .. } => {
                init.is_finite()
                    && init >= 0.0
                    && decay_rate.is_finite()
                    && decay_rate > 0.0
                    && end_value.map_or(true, |e| e.is_finite() && e >= 0.0)
            }
        };
        if ok {
            Ok(())
        } else {
            Err(RgnError::InvalidConfig(format!("schedule `{}` must be finite and non-negative: {:?}", name, self)))
        }
    }

    pub fn build(&self) -> Box<dyn Schedule + Send + Sync> {
        match *self {
            ScheduleConfig::Constant { value } => Box::new(ConstantSchedule(value)),
            ScheduleConfig::Linear { init, end, steps } => Box::new(LinearSchedule { init, end, steps }),
            ScheduleConfig::Exponential { init, decay_rate, transition_steps, end_value } => {
                Box::new(ExponentialSchedule { init, decay_rate, transition_steps, end_value })
            }
        }
    }
}
