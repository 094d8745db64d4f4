//! Wave function traits for lattice VMC.
//!
//! An [`Ansatz`] maps a parameter tree and a configuration to the complex
//! log-amplitude `log ψ(θ, σ)`. Derivatives are always taken with respect to
//! the *real view* of the parameter tree (see [`ParamTree::to_real_vec`]),
//! so real and complex parameters are handled uniformly.

use nalgebra::DVector;
use num_complex::Complex64;

use crate::error::{check_len, Result};
use crate::sampling::Configuration;
use super::params::ParamTree;

/// Parameterised log-amplitude with first derivatives.
pub trait Ansatz: Sync {
    /// Evaluate `log ψ(θ, σ)`.
    fn log_psi(&self, params: &ParamTree, config: &Configuration) -> Result<Complex64>;

    /// Compute `O_d = ∂ log ψ / ∂p_d` for every real degree of freedom `p_d`
    /// in one pass (reverse-mode style).
    fn log_derivatives(&self, params: &ParamTree, config: &Configuration)
        -> Result<DVector<Complex64>>;

    /// Directional derivative `Σ_d O_d t_d` along a real tangent
    /// (forward-mode style). Central difference unless overridden.
    fn log_jvp(
        &self,
        params: &ParamTree,
        config: &Configuration,
        tangent: &DVector<f64>,
    ) -> Result<Complex64> {
        check_len("tangent", params.real_dim(), tangent.len())?;
        let scale = tangent.norm();
        if scale == 0.0 {
            return Ok(Complex64::new(0.0, 0.0));
        }
        let h = 1e-5;
        let p = params.to_real_vec();
        let step = tangent * (h / scale);
        let fwd = params.with_real_vec(&(&p + &step))?;
        let bwd = params.with_real_vec(&(&p - &step))?;
        let diff = self.log_psi(&fwd, config)? - self.log_psi(&bwd, config)?;
        Ok(diff * (scale / (2.0 * h)))
    }

    /// Numerical log-derivatives using central differences.
    fn numerical_log_derivatives(
        &self,
        params: &ParamTree,
        config: &Configuration,
        h: f64,
    ) -> Result<DVector<Complex64>> {
        let p = params.to_real_vec();
        let mut grad = DVector::zeros(p.len());
        for d in 0..p.len() {
            let mut p_fwd = p.clone();
            let mut p_bwd = p.clone();
            p_fwd[d] += h;
            p_bwd[d] -= h;
            let fwd = self.log_psi(&params.with_real_vec(&p_fwd)?, config)?;
            let bwd = self.log_psi(&params.with_real_vec(&p_bwd)?, config)?;
            grad[d] = (fwd - bwd) / (2.0 * h);
        }
        Ok(grad)
    }
}
