//! Differentiation domains and modes.
//!
//! Every derivative is taken along the real view of the parameter tree. The
//! real and complex domains keep all `D = size + complex_size` real
//! directions; the holomorphic domain keeps only the `P = size` directions
//! along the real parts, which for a holomorphic log-amplitude carry the
//! complex derivative ∂ log ψ / ∂θ.

use nalgebra::DVector;
use num_complex::Complex64;
use serde::{Deserialize, Serialize};

use crate::error::{check_len, Result, RgnError};
use crate::sampling::Configuration;
use crate::wavefunction::{Ansatz, ParamTree};

/// How parameters and the log-amplitude relate.
#[derive(Serialize, Deserialize, Copy, Clone, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Domain {
    /// Real parameters
    #[default]
    Real,
    /// Complex parameters, non-holomorphic log-amplitude (real view)
    Complex,
    /// Complex parameters, log-amplitude holomorphic in them
    Holomorphic,
}

impl Domain {
    /// Whether the operator works on the real view with the real-symmetric
    /// projection.
    pub fn uses_real_view(self) -> bool {
        !matches!(self, Domain::Holomorphic)
    }

    /// Check that `params` can be differentiated in this domain.
    pub fn check(self, params: &ParamTree) -> Result<()> {
        match self {
            Domain::Real if params.has_complex_leaves() => Err(RgnError::InvalidConfig(
                "real domain with complex parameters; use the complex domain".into(),
            )),
            Domain::Holomorphic if params.has_real_leaves() => Err(RgnError::InvalidConfig(
                "holomorphic domain requires every parameter leaf to be complex".into(),
            )),
            _ => Ok(()),
        }
    }

    /// Operator-space dimension for `params`.
    pub fn dim(self, params: &ParamTree) -> usize {
        match self {
            Domain::Holomorphic => params.size(),
            _ => params.real_dim(),
        }
    }
}

/// Differentiation strategy for per-sample gradients.
#[derive(Serialize, Deserialize, Copy, Clone, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum DiffMode {
    /// One directional derivative per parameter
    Forward,
    /// One full gradient per sample
    Reverse,
    /// Pick from problem size
    #[default]
    Auto,
}

impl DiffMode {
    /// Resolve `Auto` with [`select_diff_mode`]; explicit modes are kept.
    pub fn resolve(self, n_params: usize, n_samples: usize, domain: Domain) -> DiffMode {
        match self {
            DiffMode::Auto => select_diff_mode(n_params, n_samples, domain),
            mode => mode,
        }
    }
}

/// Mode chosen by `Auto`: forward when there are strictly fewer parameters
/// than samples, reverse otherwise and always for the holomorphic domain.
pub fn select_diff_mode(n_params: usize, n_samples: usize, domain: Domain) -> DiffMode {
    if domain == Domain::Holomorphic {
        DiffMode::Reverse
    } else if n_params < n_samples {
        DiffMode::Forward
    } else {
        DiffMode::Reverse
    }
}

/// Per-sample derivative evaluator bound to one model and parameter set.
pub(crate) struct Differentiator<'a, A: Ansatz> {
    ansatz: &'a A,
    params: &'a ParamTree,
    domain: Domain,
    mode: DiffMode,
    dim: usize,
}

impl<'a, A: Ansatz> Differentiator<'a, A> {
    pub(crate) fn new(
        ansatz: &'a A,
        params: &'a ParamTree,
        domain: Domain,
        mode: DiffMode,
        n_samples: usize,
    ) -> Result<Self> {
        domain.check(params)?;
        let dim = domain.dim(params);
        Ok(Self { ansatz, params, domain, mode: mode.resolve(dim, n_samples, domain), dim })
    }

    pub(crate) fn dim(&self) -> usize {
        self.dim
    }

    pub(crate) fn domain(&self) -> Domain {
        self.domain
    }

    pub(crate) fn mode(&self) -> DiffMode {
        self.mode
    }

    pub(crate) fn log_psi(&self, config: &Configuration) -> Result<Complex64> {
        self.ansatz.log_psi(self.params, config)
    }

    /// Pad an operator-space real vector to a full real-view tangent.
    fn embed(&self, v: DVector<f64>) -> DVector<f64> {
        let real_dim = self.params.real_dim();
        if v.len() == real_dim {
            v
        } else {
            DVector::from_fn(real_dim, |i, _| if i < v.len() { v[i] } else { 0.0 })
        }
    }

    /// `O(x)` in operator space.
    pub(crate) fn gradient_row(&self, config: &Configuration) -> Result<DVector<Complex64>> {
        match self.mode {
            DiffMode::Forward => {
                let real_dim = self.params.real_dim();
                let values = (0..self.dim)
                    .map(|d| {
                        let mut tangent = DVector::zeros(real_dim);
                        tangent[d] = 1.0;
                        self.ansatz.log_jvp(self.params, config, &tangent)
                    })
                    .collect::<Result<Vec<_>>>()?;
                Ok(DVector::from_vec(values))
            }
            _ => {
                let grad = self.ansatz.log_derivatives(self.params, config)?;
                check_len("log derivatives", self.params.real_dim(), grad.len())?;
                if grad.len() == self.dim {
                    Ok(grad)
                } else {
                    Ok(grad.rows(0, self.dim).into_owned())
                }
            }
        }
    }

    /// `O(x)·v` (unconjugated).
    pub(crate) fn jvp_row(&self, config: &Configuration, v: &DVector<Complex64>) -> Result<Complex64> {
        check_len("tangent", self.dim, v.len())?;
        match self.mode {
            DiffMode::Forward => {
                let re = self.embed(v.map(|c| c.re));
                let mut out = self.ansatz.log_jvp(self.params, config, &re)?;
                if v.iter().any(|c| c.im != 0.0) {
                    let im = self.embed(v.map(|c| c.im));
                    out += Complex64::i() * self.ansatz.log_jvp(self.params, config, &im)?;
                }
                Ok(out)
            }
            _ => Ok(self.gradient_row(config)?.dot(v)),
        }
    }

    /// Map a tree into operator space.
    pub(crate) fn to_operator_space(&self, tree: &ParamTree) -> Result<DVector<Complex64>> {
        if self.domain.uses_real_view() {
            Ok(self.params.real_view_of(tree)?.map(|x| Complex64::new(x, 0.0)))
        } else {
            self.params.check_isomorphic(tree)?;
            Ok(tree.ravel())
        }
    }

    /// Map an operator-space vector back to a tree with the dtypes of the
    /// parameters. Real-view coordinates keep their real part.
    pub(crate) fn from_operator_space(&self, v: &DVector<Complex64>) -> Result<ParamTree> {
        if self.domain.uses_real_view() {
            self.params.with_real_vec(&v.map(|c| c.re))
        } else {
            self.params.unravel_like(v)
        }
    }

    /// Map an operator-space row (such as a mean gradient) to a complex tree.
    pub(crate) fn row_to_tree(&self, row: &DVector<Complex64>) -> Result<ParamTree> {
        if self.domain.uses_real_view() {
            self.params.wirtinger_like(row)
        } else {
            self.params.unravel_complex_like(row)
        }
    }
}
