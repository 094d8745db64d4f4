//! Restricted Boltzmann machine ansatz.
//!
//! log ψ(σ) = Σᵢ aᵢ σᵢ + Σₕ ln cosh(θₕ),   θₕ = bₕ + Σᵢ Wₕᵢ σᵢ

use nalgebra::DVector;
use num_complex::Complex64;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{check_len, Result};
use crate::sampling::Configuration;
use super::params::{ParamLeaf, ParamTree};
use super::traits::Ansatz;

/// RBM with `n_hidden = alpha * n_sites` hidden units.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Rbm {
    pub n_sites: usize,
    pub n_hidden: usize,
    pub complex: bool,
}

impl Rbm {
    pub fn new(n_sites: usize, alpha: usize) -> Self {
        Self { n_sites, n_hidden: alpha * n_sites, complex: false }
    }

    pub fn with_complex(mut self, complex: bool) -> Self {
        self.complex = complex;
        self
    }

    fn leaf(&self, shape: Vec<usize>) -> ParamTree {
        if self.complex {
            ParamTree::Leaf(ParamLeaf::zeros_complex(shape))
        } else {
            ParamTree::Leaf(ParamLeaf::zeros_real(shape))
        }
    }

    pub fn zero_params(&self) -> ParamTree {
        ParamTree::node([
            ("hidden_bias", self.leaf(vec![self.n_hidden])),
            ("kernel", self.leaf(vec![self.n_hidden, self.n_sites])),
            ("visible_bias", self.leaf(vec![self.n_sites])),
        ])
    }

    pub fn init_params<R: Rng>(&self, rng: &mut R, std: f64) -> Result<ParamTree> {
        self.zero_params().random_normal_like(rng, std)
    }

    /// Hidden pre-activations θₕ.
    fn theta(&self, params: &ParamTree, config: &Configuration) -> Result<Vec<Complex64>> {
        check_len("rbm configuration", self.n_sites, config.len())?;
        let b = params.leaf("hidden_bias")?;
        let w = params.leaf("kernel")?;
        check_len("rbm kernel", self.n_hidden * self.n_sites, w.len())?;
        Ok((0..self.n_hidden)
            .map(|h| {
                (0..self.n_sites).fold(b.get(h), |acc, i| acc + w.get(h * self.n_sites + i) * config[i])
            })
            .collect())
    }
}

impl Ansatz for Rbm {
    fn log_psi(&self, params: &ParamTree, config: &Configuration) -> Result<Complex64> {
        let theta = self.theta(params, config)?;
        let a = params.leaf("visible_bias")?;
        let visible: Complex64 = (0..self.n_sites).map(|i| a.get(i) * config[i]).sum();
        let hidden: Complex64 = theta.iter().map(|t| t.cosh().ln()).sum();
        Ok(visible + hidden)
    }

    fn log_derivatives(&self, params: &ParamTree, config: &Configuration) -> Result<DVector<Complex64>> {
        let tanh: Vec<Complex64> = self.theta(params, config)?.iter().map(|t| t.tanh()).collect();
        let kernel = (0..self.n_hidden)
            .flat_map(|h| (0..self.n_sites).map(move |i| (h, i)))
            .map(|(h, i)| tanh[h] * config[i])
            .collect::<Vec<_>>();
        let coeffs = ParamTree::node([
            ("hidden_bias", ParamTree::Leaf(ParamLeaf::complex(vec![self.n_hidden], tanh.clone())?)),
            ("kernel", ParamTree::Leaf(ParamLeaf::complex(vec![self.n_hidden, self.n_sites], kernel)?)),
            (
                "visible_bias",
                ParamTree::Leaf(ParamLeaf::vector_complex(
                    config.iter().map(|&s| Complex64::new(s, 0.0)).collect(),
                )),
            ),
        ]);
        params.check_isomorphic(&coeffs)?;
        params.expand_holomorphic(&coeffs.ravel())
    }

    fn log_jvp(
        &self,
        params: &ParamTree,
        config: &Configuration,
        tangent: &DVector<f64>,
    ) -> Result<Complex64> {
        let theta = self.theta(params, config)?;
        let dparams = params.with_real_vec(tangent)?;
        let dtheta = self.theta(&dparams, config)?;
        let da = dparams.leaf("visible_bias")?;
        let visible: Complex64 = (0..self.n_sites).map(|i| da.get(i) * config[i]).sum();
        let hidden: Complex64 = theta.iter().zip(dtheta.iter()).map(|(t, dt)| t.tanh() * dt).sum();
        Ok(visible + hidden)
    }
}
