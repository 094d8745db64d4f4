//! Spin Jastrow ansatz.
//!
//! log ψ(σ) = Σᵢ aᵢ σᵢ + Σᵢ<ⱼ Wᵢⱼ σᵢ σⱼ + i φ Σᵢ σᵢ
//!
//! The phase term is optional. The log-amplitude is linear in the
//! parameters, so the directional derivative is one evaluation at the
//! tangent.

use nalgebra::DVector;
use num_complex::Complex64;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{check_len, Result};
use crate::sampling::Configuration;
use super::params::{ParamLeaf, ParamTree};
use super::traits::Ansatz;

/// One- and two-body spin Jastrow factor.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Jastrow {
    pub n_sites: usize,
    /// Adds a global phase leaf `phase`.
    pub with_phase: bool,
    /// Use complex leaves instead of real ones.
    pub complex: bool,
}

impl Jastrow {
    pub fn new(n_sites: usize) -> Self {
        Self { n_sites, with_phase: false, complex: false }
    }

    pub fn with_phase(mut self, with_phase: bool) -> Self {
        self.with_phase = with_phase;
        self
    }

    pub fn with_complex(mut self, complex: bool) -> Self {
        self.complex = complex;
        self
    }

    /// Unique site pairs (i, j) with i < j, in storage order.
    fn unique_pairs(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        (0..self.n_sites).flat_map(move |i| ((i + 1)..self.n_sites).map(move |j| (i, j)))
    }

    fn n_pairs(&self) -> usize {
        self.n_sites * self.n_sites.saturating_sub(1) / 2
    }

    fn leaf(&self, n: usize) -> ParamTree {
        if self.complex {
            ParamTree::Leaf(ParamLeaf::zeros_complex(vec![n]))
        } else {
            ParamTree::Leaf(ParamLeaf::zeros_real(vec![n]))
        }
    }

    /// Zero-initialised parameter tree.
    pub fn zero_params(&self) -> ParamTree {
        let mut entries = vec![("local", self.leaf(self.n_sites)), ("pair", self.leaf(self.n_pairs()))];
        if self.with_phase {
            entries.push(("phase", self.leaf(1)));
        }
        ParamTree::node(entries)
    }

    /// Parameters drawn from `N(0, std)`.
    pub fn init_params<R: Rng>(&self, rng: &mut R, std: f64) -> Result<ParamTree> {
        self.zero_params().random_normal_like(rng, std)
    }

    /// ∂ log ψ / ∂θ for each complex-layout entry.
    fn coefficients(&self, config: &Configuration) -> ParamTree {
        let local = config.iter().map(|&s| Complex64::new(s, 0.0)).collect::<Vec<_>>();
        let pair = self
            .unique_pairs()
            .map(|(i, j)| Complex64::new(config[i] * config[j], 0.0))
            .collect::<Vec<_>>();
        let mut entries = vec![
            ("local", ParamTree::Leaf(ParamLeaf::vector_complex(local))),
            ("pair", ParamTree::Leaf(ParamLeaf::vector_complex(pair))),
        ];
        if self.with_phase {
            let total: f64 = config.iter().sum();
            entries.push(("phase", ParamTree::Leaf(ParamLeaf::vector_complex(vec![Complex64::new(0.0, total)]))));
        }
        ParamTree::node(entries)
    }
}

impl Ansatz for Jastrow {
    fn log_psi(&self, params: &ParamTree, config: &Configuration) -> Result<Complex64> {
        check_len("jastrow configuration", self.n_sites, config.len())?;
        let coeffs = self.coefficients(config);
        params.dot(&coeffs)
    }

    fn log_derivatives(&self, params: &ParamTree, config: &Configuration) -> Result<DVector<Complex64>> {
        check_len("jastrow configuration", self.n_sites, config.len())?;
        let coeffs = self.coefficients(config);
        params.check_isomorphic(&coeffs)?;
        params.expand_holomorphic(&coeffs.ravel())
    }

    fn log_jvp(
        &self,
        params: &ParamTree,
        config: &Configuration,
        tangent: &DVector<f64>,
    ) -> Result<Complex64> {
        let tangent_tree = params.with_real_vec(tangent)?;
        self.log_psi(&tangent_tree, config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_jastrow_two_site_values() {
        let model = Jastrow::new(2).with_phase(true);
        let params = ParamTree::node([
            ("local", ParamTree::Leaf(ParamLeaf::real(vec![2], vec![0.1, -0.2]).unwrap())),
            ("pair", ParamTree::Leaf(ParamLeaf::real(vec![1], vec![0.5]).unwrap())),
            ("phase", ParamTree::Leaf(ParamLeaf::real(vec![1], vec![0.25]).unwrap())),
        ]);
        assert_eq!(params.size(), 4);
        let up_down = DVector::from_vec(vec![1.0, -1.0]);
        let lp = model.log_psi(&params, &up_down).unwrap();
        assert_relative_eq!(lp.re, 0.1 + 0.2 - 0.5, epsilon = 1e-12);
        assert_relative_eq!(lp.im, 0.0, epsilon = 1e-12);

        let up_up = DVector::from_vec(vec![1.0, 1.0]);
        let lp = model.log_psi(&params, &up_up).unwrap();
        assert_relative_eq!(lp.re, 0.1 - 0.2 + 0.5, epsilon = 1e-12);
        assert_relative_eq!(lp.im, 0.5, epsilon = 1e-12);
    }

    #[test]
    fn test_jastrow_numerical_derivatives() {
        let mut rng = StdRng::seed_from_u64(3);
        for complex in [false, true] {
            let model = Jastrow::new(3).with_phase(true).with_complex(complex);
            let params = model.init_params(&mut rng, 0.3).unwrap();
            let config = DVector::from_vec(vec![1.0, -1.0, -1.0]);

            let analytical = model.log_derivatives(&params, &config).unwrap();
            let numerical = model.numerical_log_derivatives(&params, &config, 1e-5).unwrap();
            assert_eq!(analytical.len(), params.real_dim());
            for (a, n) in analytical.iter().zip(numerical.iter()) {
                assert_relative_eq!(a.re, n.re, epsilon = 1e-6);
                assert_relative_eq!(a.im, n.im, epsilon = 1e-6);
            }
        }
    }

    #[test]
    fn test_jastrow_jvp_matches_gradient() {
        let mut rng = StdRng::seed_from_u64(5);
        let model = Jastrow::new(4).with_complex(true);
        let params = model.init_params(&mut rng, 0.2).unwrap();
        let config = DVector::from_vec(vec![1.0, 1.0, -1.0, 1.0]);
        let tangent = DVector::from_fn(params.real_dim(), |i, _| 0.1 * i as f64 - 0.3);

        let grad = model.log_derivatives(&params, &config).unwrap();
        let expected: Complex64 = grad.iter().zip(tangent.iter()).map(|(g, t)| *g * *t).sum();
        let jvp = model.log_jvp(&params, &config, &tangent).unwrap();
        assert_relative_eq!(jvp.re, expected.re, epsilon = 1e-12);
        assert_relative_eq!(jvp.im, expected.im, epsilon = 1e-12);
    }

    #[test]
    fn test_jastrow_rejects_wrong_configuration_length() {
        let model = Jastrow::new(2);
        let params = model.zero_params();
        assert!(model.log_psi(&params, &DVector::from_vec(vec![1.0])).is_err());
    }
}
