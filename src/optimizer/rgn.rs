//! Regularized Gauss-Newton preconditioner.
//!
//! Solves `(QGT + eps·H_sym + diag_shift·I) x = g` for the loss gradient `g`
//! and returns `x` as a parameter update.

use nalgebra::DVector;
use num_complex::Complex64;
use tracing::debug;

use crate::error::{Result, RgnError};
use crate::wavefunction::{Ansatz, ParamTree};
use super::hessian::RHessian;
use super::jacobian::CenteredJacobian;
use super::operator::CompositeOperator;
use super::solver::{LinearSolver, SolverInfo};

/// Solver state carried between iterations when warm starting.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SolverState {
    /// Previous solution in operator space
    pub x0: Option<DVector<Complex64>>,
    pub info: Option<SolverInfo>,
}

/// Turns a loss gradient into an update direction.
pub trait Preconditioner {
    fn precondition(
        &self,
        gradient: &ParamTree,
        state: SolverState,
    ) -> Result<(ParamTree, SolverState, SolverInfo)>;
}

/// RGN preconditioner for one iteration.
pub struct Rgn<'a, A: Ansatz, S: LinearSolver + ?Sized> {
    jacobian: &'a CenteredJacobian<'a, A>,
    operator: CompositeOperator<'a, A>,
    solver: &'a S,
    solver_restart: bool,
    eps: f64,
    diag_shift: f64,
}

impl<'a, A: Ansatz, S: LinearSolver + ?Sized> Rgn<'a, A, S> {
    /// # Arguments
    /// * `jacobian` - Centered Jacobian of the current batch
    /// * `rhessian` - Rayleigh Hessian data of the same batch
    /// * `eps` - Weight of the Hessian correction
    /// * `diag_shift` - Diagonal regularisation
    /// * `solver` - Linear solver
    /// * `solver_restart` - Warm start from the previous solution
    pub fn new(
        jacobian: &'a CenteredJacobian<'a, A>,
        rhessian: &'a RHessian<'a, A>,
        eps: f64,
        diag_shift: f64,
        solver: &'a S,
        solver_restart: bool,
    ) -> Result<Self> {
        let operator = CompositeOperator::new(jacobian, rhessian, eps, diag_shift)?;
        Ok(Self { jacobian, operator, solver, solver_restart, eps, diag_shift })
    }

    pub fn operator(&self) -> &CompositeOperator<'a, A> {
        &self.operator
    }

    pub fn eps(&self) -> f64 {
        self.eps
    }

    pub fn diag_shift(&self) -> f64 {
        self.diag_shift
    }
}

impl<'a, A: Ansatz, S: LinearSolver + ?Sized> Preconditioner for Rgn<'a, A, S> {
    fn precondition(
        &self,
        gradient: &ParamTree,
        state: SolverState,
    ) -> Result<(ParamTree, SolverState, SolverInfo)> {
        let rhs = self.jacobian.to_operator_space(gradient)?;
        let x0 = if self.solver_restart { state.x0 } else { None };
        let (x, info) = self.solver.solve(&self.operator, &rhs, x0.as_ref())?;
        if x.iter().any(|c| !c.is_finite()) {
            return Err(RgnError::NumericalInstability("preconditioned update".into()));
        }
        debug!(
            eps = self.eps,
            diag_shift = self.diag_shift,
            iterations = info.iterations,
            residual = info.residual_norm,
            "rgn solve done"
        );

        let update = self.jacobian.from_operator_space(&x)?;
        let state = if self.solver_restart {
            SolverState { x0: Some(x), info: Some(info) }
        } else {
            SolverState::default()
        };
        Ok((update, state, info))
    }
}
