//! Iterative linear solvers for `A x = b`.

use nalgebra::DVector;
use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{check_len, Result, RgnError};
use super::operator::LinearOperator;

/// Diagnostics of one solve.
#[derive(Serialize, Deserialize, Copy, Clone, Debug, PartialEq)]
pub struct SolverInfo {
    pub iterations: usize,
    /// Final residual norm `‖b − A x‖`
    pub residual_norm: f64,
    pub converged: bool,
}

/// Solver for a linear operator equation, optionally warm-started from `x0`.
///
/// Failing to converge is reported through [`SolverInfo::converged`], not as
/// an error.
pub trait LinearSolver {
    fn solve(
        &self,
        op: &dyn LinearOperator,
        rhs: &DVector<Complex64>,
        x0: Option<&DVector<Complex64>>,
    ) -> Result<(DVector<Complex64>, SolverInfo)>;
}

impl<F> LinearSolver for F
where
    F: Fn(&dyn LinearOperator, &DVector<Complex64>, Option<&DVector<Complex64>>)
        -> Result<(DVector<Complex64>, SolverInfo)>,
{
    fn solve(
        &self,
        op: &dyn LinearOperator,
        rhs: &DVector<Complex64>,
        x0: Option<&DVector<Complex64>>,
    ) -> Result<(DVector<Complex64>, SolverInfo)> {
        self(op, rhs, x0)
    }
}

/// Conjugate gradient for Hermitian positive-definite operators.
///
/// Stops once `‖r‖ ≤ max(tol·‖b‖, atol)` or after `max_iter` iterations
/// (`10·dim` when unset).
#[derive(Serialize, Deserialize, Copy, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct ConjugateGradient {
    /// Relative tolerance
    pub tol: f64,
    /// Absolute tolerance
    pub atol: f64,
    pub max_iter: Option<usize>,
}

impl Default for ConjugateGradient {
    fn default() -> Self {
        Self { tol: 1e-5, atol: 0.0, max_iter: None }
    }
}

impl ConjugateGradient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tol(mut self, tol: f64) -> Self {
        self.tol = tol;
        self
    }

    pub fn with_atol(mut self, atol: f64) -> Self {
        self.atol = atol;
        self
    }

    pub fn with_max_iter(mut self, max_iter: usize) -> Self {
        self.max_iter = Some(max_iter);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.tol.is_finite() && self.tol >= 0.0 && self.atol.is_finite() && self.atol >= 0.0) {
            return Err(RgnError::InvalidConfig(format!(
                "solver tolerances must be finite and non-negative (tol = {}, atol = {})",
                self.tol, self.atol
            )));
        }
        Ok(())
    }
}

fn unstable(what: &str) -> RgnError {
    RgnError::NumericalInstability(format!("conjugate gradient {}", what))
}

impl LinearSolver for ConjugateGradient {
    fn solve(
        &self,
        op: &dyn LinearOperator,
        rhs: &DVector<Complex64>,
        x0: Option<&DVector<Complex64>>,
    ) -> Result<(DVector<Complex64>, SolverInfo)> {
        self.validate()?;
        let dim = op.dim();
        check_len("solver rhs", dim, rhs.len())?;
        let max_iter = self.max_iter.unwrap_or(10 * dim);

        let (mut x, mut r) = match x0 {
            Some(x0) => {
                check_len("solver initial guess", dim, x0.len())?;
                (x0.clone(), rhs - op.apply(x0)?)
            }
            None => (DVector::zeros(dim), rhs.clone()),
        };
        let threshold = (self.tol * rhs.norm()).max(self.atol);
        let mut rs_old = r.norm_squared();
        if !rs_old.is_finite() {
            return Err(unstable("initial residual"));
        }
        let mut info = SolverInfo { iterations: 0, residual_norm: rs_old.sqrt(), converged: rs_old.sqrt() <= threshold };
        let mut p = r.clone();

        while !info.converged && info.iterations < max_iter {
            let ap = op.apply(&p)?;
            let pap = p.dotc(&ap);
            if !pap.is_finite() {
                return Err(unstable("curvature along search direction"));
            }
            if pap.re <= 0.0 {
                debug!(iteration = info.iterations, curvature = pap.re, "cg breakdown: operator not positive definite");
                break;
            }
            let alpha = Complex64::new(rs_old, 0.0) / pap;
            x += &p * alpha;
            r -= &ap * alpha;
            let rs_new = r.norm_squared();
            if !rs_new.is_finite() {
                return Err(unstable("residual"));
            }
            info.iterations += 1;
            info.residual_norm = rs_new.sqrt();
            info.converged = info.residual_norm <= threshold;
            p = &r + &p * Complex64::new(rs_new / rs_old, 0.0);
            rs_old = rs_new;
        }

        debug!(
            iterations = info.iterations,
            residual = info.residual_norm,
            converged = info.converged,
            "cg finished"
        );
        Ok((x, info))
    }
}
