//! Traits for Monte Carlo sampling.

use crate::error::Result;
use crate::wavefunction::{Ansatz, ParamTree};
use super::batch::ConfigBatch;

/// Source of configurations distributed according to |ψ(θ, σ)|².
pub trait Sampler {
    /// Drop cached samples so the next call to [`Sampler::samples`] draws a
    /// fresh batch. Chain positions may be kept.
    fn reset(&mut self);

    /// The current batch, drawn on first access after a reset.
    fn samples<A: Ansatz>(&mut self, ansatz: &A, params: &ParamTree) -> Result<&ConfigBatch>;
}
