//! Driver module - the VMC optimisation loop with RGN preconditioning.

mod vmc_rgn;

pub use vmc_rgn::{DriverPhase, RgnResult, StepReport, VmcRgn};
