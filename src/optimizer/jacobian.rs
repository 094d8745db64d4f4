//! Centered Jacobian of the log-amplitude.
//!
//! `J_c[k, d] = O_d(x_k) − Ō_d` with `Ō = (1/N) Σ_k O(x_k)`. The matrix is
//! never stored: products with it re-evaluate per-sample derivatives chunk
//! by chunk.

use nalgebra::DVector;
use num_complex::Complex64;
use rayon::prelude::*;
use tracing::debug;

use crate::error::{check_len, Result, RgnError};
use crate::sampling::{ConfigBatch, Configuration};
use crate::wavefunction::{Ansatz, ParamTree};
use super::diff::{DiffMode, Differentiator, Domain};

/// Evaluate `eval(k)` for `k in 0..n` in slices of at most `chunk_size`,
/// data-parallel inside a slice, and hand results to `consume` in order.
pub(crate) fn for_each_chunked<T, F, G>(
    n: usize,
    chunk_size: Option<usize>,
    eval: F,
    mut consume: G,
) -> Result<()>
where
    T: Send,
    F: Fn(usize) -> Result<T> + Sync + Send,
    G: FnMut(usize, T) -> Result<()>,
{
    let size = chunk_size.unwrap_or(n).max(1);
    let mut start = 0;
    while start < n {
        let end = (start + size).min(n);
        let values = (start..end).into_par_iter().map(&eval).collect::<Result<Vec<T>>>()?;
        for (k, value) in (start..end).zip(values) {
            consume(k, value)?;
        }
        start = end;
    }
    Ok(())
}

pub(crate) fn check_chunk_size(chunk_size: Option<usize>) -> Result<()> {
    match chunk_size {
        Some(0) => Err(RgnError::InvalidConfig("chunk_size must be positive".into())),
        _ => Ok(()),
    }
}

/// Implicit centered Jacobian over one batch of samples.
pub struct CenteredJacobian<'a, A: Ansatz> {
    diff: Differentiator<'a, A>,
    samples: &'a [Configuration],
    mean: DVector<Complex64>,
    chunk_size: Option<usize>,
}

impl<'a, A: Ansatz> CenteredJacobian<'a, A> {
    pub fn n_samples(&self) -> usize {
        self.samples.len()
    }

    /// Number of columns (operator-space dimension).
    pub fn dim(&self) -> usize {
        self.diff.dim()
    }

    pub fn domain(&self) -> Domain {
        self.diff.domain()
    }

    /// Differentiation mode after resolving `Auto`.
    pub fn mode(&self) -> DiffMode {
        self.diff.mode()
    }

    /// Mean log-derivative row `Ō` in operator space.
    pub fn mean_row(&self) -> &DVector<Complex64> {
        &self.mean
    }

    pub fn chunk_size(&self) -> Option<usize> {
        self.chunk_size
    }

    /// `J_c v`, one entry per sample.
    pub fn jvp(&self, v: &DVector<Complex64>) -> Result<DVector<Complex64>> {
        check_len("jacobian jvp", self.dim(), v.len())?;
        let shift = self.mean.dot(v);
        let mut out = DVector::zeros(self.n_samples());
        for_each_chunked(
            self.n_samples(),
            self.chunk_size,
            |k| self.diff.jvp_row(&self.samples[k], v),
            |k, value| {
                out[k] = value - shift;
                Ok(())
            },
        )?;
        Ok(out)
    }

    /// `J_cᴴ w`, one entry per column.
    pub fn vjp(&self, w: &DVector<Complex64>) -> Result<DVector<Complex64>> {
        check_len("jacobian vjp", self.n_samples(), w.len())?;
        let mut acc = DVector::zeros(self.dim());
        for_each_chunked(
            self.n_samples(),
            self.chunk_size,
            |k| self.diff.gradient_row(&self.samples[k]),
            |k, row| {
                acc += (row - &self.mean).conjugate() * w[k];
                Ok(())
            },
        )?;
        Ok(acc)
    }

    /// Map a tree into operator space.
    pub fn to_operator_space(&self, tree: &ParamTree) -> Result<DVector<Complex64>> {
        self.diff.to_operator_space(tree)
    }

    /// Map an operator-space vector back to a tree shaped like the parameters.
    pub fn from_operator_space(&self, v: &DVector<Complex64>) -> Result<ParamTree> {
        self.diff.from_operator_space(v)
    }
}

/// Build the centered Jacobian for `samples` together with the batch-mean
/// gradient of `log ψ` as a complex tree.
///
/// In the real and complex domains the mean is returned as Wirtinger
/// derivatives `∂ log ψ / ∂θ`; in the holomorphic domain as the complex
/// derivative itself.
///
/// Only derivatives are evaluated here, so a non-finite derivative row fails
/// with `NumericalInstability`. Log-amplitudes themselves are checked by
/// [`super::hessian::loss_grad_and_rhessian`].
pub fn centered_jacobian_and_mean<'a, A: Ansatz>(
    ansatz: &'a A,
    params: &'a ParamTree,
    samples: &'a ConfigBatch,
    domain: Domain,
    diff_mode: DiffMode,
    chunk_size: Option<usize>,
) -> Result<(CenteredJacobian<'a, A>, ParamTree)> {
    check_chunk_size(chunk_size)?;
    if samples.is_empty() {
        return Err(RgnError::InvalidConfig("empty sample batch".into()));
    }
    let diff = Differentiator::new(ansatz, params, domain, diff_mode, samples.len())?;
    let configs = samples.as_slice();

    let mut sum = DVector::zeros(diff.dim());
    for_each_chunked(
        configs.len(),
        chunk_size,
        |k| diff.gradient_row(&configs[k]),
        |_, row| {
            sum += row;
            Ok(())
        },
    )?;
    let mean = sum / Complex64::new(configs.len() as f64, 0.0);
    if mean.iter().any(|c| !c.is_finite()) {
        return Err(RgnError::NumericalInstability("mean log-derivative".into()));
    }
    let mean_tree = diff.row_to_tree(&mean)?;
    debug!(n_samples = configs.len(), dim = diff.dim(), mode = ?diff.mode(), "centered jacobian ready");

    Ok((CenteredJacobian { diff, samples: configs, mean, chunk_size }, mean_tree))
}
