//! Sampling module - configuration batches and Markov chain samplers.

mod traits;
mod batch;
mod metropolis;

pub use traits::Sampler;
pub use batch::{ConfigBatch, Configuration, ConnectedTable};
pub use metropolis::{MetropolisLocal, MetropolisParams};
