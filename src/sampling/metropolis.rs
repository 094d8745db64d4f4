//! Single-spin-flip Metropolis sampler for lattice VMC.
//!
//! Each proposal flips one random site and is accepted with probability
//! min(1, |ψ(σ')/ψ(σ)|²) = min(1, exp(2 Re[log ψ(σ') − log ψ(σ)])).

use nalgebra::DVector;
use num_complex::Complex64;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, RgnError};
use crate::wavefunction::{Ansatz, ParamTree};
use super::batch::{ConfigBatch, Configuration};
use super::traits::Sampler;

/// Parameters for the Metropolis sampler.
#[derive(Serialize, Deserialize, Copy, Clone, Debug)]
pub struct MetropolisParams {
    /// Number of independent Markov chains
    pub n_chains: usize,
    /// Total samples per batch (rounded up to a multiple of `n_chains`)
    pub n_samples: usize,
    /// Proposals between two recorded samples; 0 means one per site
    pub sweep_size: usize,
    /// Sweeps discarded before recording each batch
    pub n_discard: usize,
    /// RNG seed
    pub seed: u64,
}

impl Default for MetropolisParams {
    fn default() -> Self {
        Self {
            n_chains: 16,
            n_samples: 1024,
            sweep_size: 0,
            n_discard: 10,
            seed: 0,
        }
    }
}

/// State of a single chain.
struct ChainState {
    config: Configuration,
    log_psi: Complex64,
}

/// Metropolis sampler over ±1 spin configurations.
pub struct MetropolisLocal {
    n_sites: usize,
    params: MetropolisParams,
    rng: StdRng,
    chains: Vec<ChainState>,
    cached: Option<ConfigBatch>,
    acceptance: f64,
}

impl MetropolisLocal {
    pub fn new(n_sites: usize, params: MetropolisParams) -> Result<Self> {
        if n_sites == 0 || params.n_chains == 0 || params.n_samples == 0 {
            return Err(RgnError::InvalidConfig(
                "sampler needs at least one site, one chain and one sample".into(),
            ));
        }
        Ok(Self {
            n_sites,
            params,
            rng: StdRng::seed_from_u64(params.seed),
            chains: Vec::new(),
            cached: None,
            acceptance: 0.0,
        })
    }

    /// Acceptance rate of the last drawn batch.
    pub fn acceptance(&self) -> f64 {
        self.acceptance
    }

    fn sweep_size(&self) -> usize {
        if self.params.sweep_size == 0 {
            self.n_sites
        } else {
            self.params.sweep_size
        }
    }

    fn random_config(&mut self) -> Configuration {
        DVector::from_fn(self.n_sites, |_, _| if self.rng.gen::<bool>() { 1.0 } else { -1.0 })
    }

    /// (Re)initialise chains with random configurations, refreshing the
    /// cached log-amplitudes for the current parameters.
    fn prepare_chains<A: Ansatz>(&mut self, ansatz: &A, params: &ParamTree) -> Result<()> {
        if self.chains.len() != self.params.n_chains {
            self.chains = (0..self.params.n_chains)
                .map(|_| ChainState { config: self.random_config(), log_psi: Complex64::new(0.0, 0.0) })
                .collect();
        }
        for chain in self.chains.iter_mut() {
            chain.log_psi = ansatz.log_psi(params, &chain.config)?;
            if !chain.log_psi.is_finite() {
                return Err(RgnError::NumericalInstability("log-amplitude of a chain state".into()));
            }
        }
        Ok(())
    }

    /// Perform `n` single-flip proposals on one chain. Returns accepted moves.
    fn metropolis_steps<A: Ansatz>(
        rng: &mut StdRng,
        chain: &mut ChainState,
        ansatz: &A,
        params: &ParamTree,
        n: usize,
    ) -> Result<usize> {
        let mut accepted = 0;
        for _ in 0..n {
            let site = rng.gen_range(0..chain.config.len());
            let mut proposal = chain.config.clone();
            proposal[site] = -proposal[site];
            let new_log_psi = ansatz.log_psi(params, &proposal)?;
            let ratio = (2.0 * (new_log_psi - chain.log_psi).re).exp();
            if rng.gen::<f64>() < ratio {
                chain.config = proposal;
                chain.log_psi = new_log_psi;
                accepted += 1;
            }
        }
        Ok(accepted)
    }

    fn draw<A: Ansatz>(&mut self, ansatz: &A, params: &ParamTree) -> Result<ConfigBatch> {
        self.prepare_chains(ansatz, params)?;
        let sweep = self.sweep_size();
        let per_chain = self.params.n_samples.div_ceil(self.params.n_chains);
        let mut configs = Vec::with_capacity(per_chain * self.params.n_chains);
        let mut accepted = 0;

        for chain in self.chains.iter_mut() {
            Self::metropolis_steps(&mut self.rng, chain, ansatz, params, self.params.n_discard * sweep)?;
        }
        for _ in 0..per_chain {
            for chain in self.chains.iter_mut() {
                accepted += Self::metropolis_steps(&mut self.rng, chain, ansatz, params, sweep)?;
                configs.push(chain.config.clone());
            }
        }

        let proposals = (per_chain * self.params.n_chains * sweep).max(1);
        self.acceptance = accepted as f64 / proposals as f64;
        debug!(samples = configs.len(), acceptance = self.acceptance, "metropolis batch drawn");
        Ok(ConfigBatch::new(configs))
    }
}

impl Sampler for MetropolisLocal {
    fn reset(&mut self) {
        self.cached = None;
    }

    fn samples<A: Ansatz>(&mut self, ansatz: &A, params: &ParamTree) -> Result<&ConfigBatch> {
        if self.cached.is_none() {
            let batch = self.draw(ansatz, params)?;
            self.cached = Some(batch);
        }
        self.cached
            .as_ref()
            .ok_or_else(|| RgnError::InvalidConfig("sampler produced no batch".into()))
    }
}
