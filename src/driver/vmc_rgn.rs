//! Variational Monte Carlo driver with the RGN preconditioner.
//!
//! One iteration goes through
//!
//!   Idle → SamplesReady → OperatorBuilt → Solved → Applied
//!
//! drawing a fresh batch, building the Jacobian and Rayleigh Hessian,
//! solving `(QGT + eps·H + diag_shift·I) dp = ∇E` and casting `dp` to the
//! dtypes of the parameters. The outer update is `θ ← θ − lr·dp`.

use tracing::{debug, info, warn};

use crate::error::Result;
use crate::io::RgnConfig;
use crate::optimizer::{
    centered_jacobian_and_mean, loss_grad_and_rhessian, ConjugateGradient, LinearSolver, LossStats,
    Preconditioner, Rgn, Schedule, SolverInfo, SolverState,
};
use crate::sampling::Sampler;
use crate::systems::Hamiltonian;
use crate::wavefunction::{Ansatz, ParamTree};

/// Where the driver is within the current iteration.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DriverPhase {
    Idle,
    SamplesReady,
    OperatorBuilt,
    Solved,
    Applied,
}

/// Summary of one preconditioned step.
#[derive(Clone, Debug)]
pub struct StepReport {
    pub step: usize,
    /// Statistics of the local energy at the sampled parameters
    pub loss: LossStats,
    pub eps: f64,
    pub diag_shift: f64,
    pub solver_info: SolverInfo,
    /// 2-norm of the preconditioned update
    pub update_norm: f64,
}

/// Results from an RGN optimisation run.
#[derive(Clone, Debug)]
pub struct RgnResult {
    /// Parameters after the last update
    pub final_params: ParamTree,
    /// Energy at each iteration
    pub energy_history: Vec<f64>,
    /// Standard error of the energy at each iteration
    pub error_history: Vec<f64>,
    /// Variance at each iteration
    pub variance_history: Vec<f64>,
    /// Per-iteration reports
    pub reports: Vec<StepReport>,
}

/// VMC driver owning the model, the Hamiltonian, the sampler and the
/// current parameters.
pub struct VmcRgn<A, H, S, L = ConjugateGradient>
where
    A: Ansatz,
    H: Hamiltonian,
    S: Sampler,
    L: LinearSolver,
{
    ansatz: A,
    hamiltonian: H,
    sampler: S,
    params: ParamTree,
    config: RgnConfig,
    eps_schedule: Box<dyn Schedule + Send + Sync>,
    diag_shift_schedule: Box<dyn Schedule + Send + Sync>,
    solver: L,
    solver_state: SolverState,
    step_count: usize,
    phase: DriverPhase,
}

impl<A, H, S> VmcRgn<A, H, S, ConjugateGradient>
where
    A: Ansatz,
    H: Hamiltonian,
    S: Sampler,
{
    /// Create a driver with the conjugate gradient solver and the schedules
    /// described by `config`.
    ///
    /// # Arguments
    /// * `ansatz` - Variational model
    /// * `hamiltonian` - Hamiltonian whose energy is minimised
    /// * `sampler` - Source of configurations
    /// * `params` - Initial parameters
    /// * `config` - Driver settings
    pub fn new(ansatz: A, hamiltonian: H, sampler: S, params: ParamTree, config: RgnConfig) -> Result<Self> {
        config.validate()?;
        config.domain.check(&params)?;
        Ok(Self {
            ansatz,
            hamiltonian,
            sampler,
            params,
            eps_schedule: config.eps.build(),
            diag_shift_schedule: config.diag_shift.build(),
            solver: config.solver,
            config,
            solver_state: SolverState::default(),
            step_count: 0,
            phase: DriverPhase::Idle,
        })
    }
}

impl<A, H, S, L> VmcRgn<A, H, S, L>
where
    A: Ansatz,
    H: Hamiltonian,
    S: Sampler,
    L: LinearSolver,
{
    /// Replace the linear solver.
    pub fn with_solver<M: LinearSolver>(self, solver: M) -> VmcRgn<A, H, S, M> {
        VmcRgn {
            ansatz: self.ansatz,
            hamiltonian: self.hamiltonian,
            sampler: self.sampler,
            params: self.params,
            config: self.config,
            eps_schedule: self.eps_schedule,
            diag_shift_schedule: self.diag_shift_schedule,
            solver,
            solver_state: SolverState::default(),
            step_count: self.step_count,
            phase: self.phase,
        }
    }

    pub fn with_eps_schedule(mut self, schedule: impl Schedule + Send + Sync + 'static) -> Self {
        self.eps_schedule = Box::new(schedule);
        self
    }

    pub fn with_diag_shift_schedule(mut self, schedule: impl Schedule + Send + Sync + 'static) -> Self {
        self.diag_shift_schedule = Box::new(schedule);
        self
    }

    pub fn params(&self) -> &ParamTree {
        &self.params
    }

    /// Replace the parameters; the new tree must match the current structure.
    pub fn set_params(&mut self, params: ParamTree) -> Result<()> {
        self.params.check_isomorphic(&params)?;
        self.config.domain.check(&params)?;
        self.params = params.cast_like(&self.params)?;
        Ok(())
    }

    pub fn config(&self) -> &RgnConfig {
        &self.config
    }

    pub fn phase(&self) -> DriverPhase {
        self.phase
    }

    pub fn step_count(&self) -> usize {
        self.step_count
    }

    pub fn solver_state(&self) -> &SolverState {
        &self.solver_state
    }

    /// Compute the preconditioned update for the current parameters without
    /// applying it. On error the driver returns to [`DriverPhase::Idle`].
    pub fn forward_and_backward(&mut self) -> Result<(ParamTree, StepReport)> {
        match self.try_forward_and_backward() {
            Ok(out) => Ok(out),
            Err(e) => {
                self.phase = DriverPhase::Idle;
                Err(e)
            }
        }
    }

    fn try_forward_and_backward(&mut self) -> Result<(ParamTree, StepReport)> {
        let step = self.step_count;
        self.phase = DriverPhase::Idle;

        self.sampler.reset();
        let samples = self.sampler.samples(&self.ansatz, &self.params)?;
        let connected = self.hamiltonian.get_conn_padded(samples)?;
        self.phase = DriverPhase::SamplesReady;
        debug!(step, n_samples = samples.len(), width = connected.width(), "samples ready");

        let cfg = &self.config;
        let (jacobian, _mean) = centered_jacobian_and_mean(
            &self.ansatz,
            &self.params,
            samples,
            cfg.domain,
            cfg.diff_mode,
            cfg.chunk_size,
        )?;
        let (loss, gradient, rhessian) = loss_grad_and_rhessian(
            &self.ansatz,
            &self.params,
            samples,
            &connected,
            cfg.domain,
            cfg.diff_mode,
            cfg.chunk_size,
        )?;
        let eps = self.eps_schedule.value(step);
        let diag_shift = self.diag_shift_schedule.value(step);
        let rgn = Rgn::new(&jacobian, &rhessian, eps, diag_shift, &self.solver, cfg.solver_restart)?;
        self.phase = DriverPhase::OperatorBuilt;
        debug!(step, eps, diag_shift, mode = ?jacobian.mode(), "operator built");

        let (update, state, solver_info) = rgn.precondition(&gradient, self.solver_state.clone())?;
        self.solver_state = state;
        self.phase = DriverPhase::Solved;
        if !solver_info.converged {
            warn!(
                step,
                iterations = solver_info.iterations,
                residual = solver_info.residual_norm,
                "linear solver did not converge"
            );
        }

        let update = update.cast_like(&self.params)?;
        self.params.check_same_dtypes(&update)?;
        let update_norm = update.norm(2)?;
        self.phase = DriverPhase::Applied;
        let report = StepReport {
            step,
            loss,
            eps,
            diag_shift,
            solver_info,
            update_norm,
        };
        Ok((update, report))
    }

    /// One full iteration: compute the update and apply `θ ← θ − lr·dp`.
    pub fn step(&mut self) -> Result<StepReport> {
        let (update, report) = self.forward_and_backward()?;
        self.params = update.axpy(-self.config.learning_rate, &self.params)?.cast_like(&self.params)?;
        self.step_count += 1;
        Ok(report)
    }

    /// Run `n_iter` iterations.
    pub fn run(&mut self, n_iter: usize) -> Result<RgnResult> {
        info!(
            n_params = self.params.size(),
            domain = ?self.config.domain,
            learning_rate = self.config.learning_rate,
            n_iter,
            "starting RGN optimisation"
        );

        let mut energy_history = Vec::with_capacity(n_iter);
        let mut error_history = Vec::with_capacity(n_iter);
        let mut variance_history = Vec::with_capacity(n_iter);
        let mut reports = Vec::with_capacity(n_iter);

        for _ in 0..n_iter {
            let report = self.step()?;
            info!(
                step = report.step,
                energy = report.loss.mean.re,
                error = report.loss.error_of_mean,
                variance = report.loss.variance,
                cg_iterations = report.solver_info.iterations,
                update_norm = report.update_norm,
                "rgn step"
            );
            energy_history.push(report.loss.mean.re);
            error_history.push(report.loss.error_of_mean);
            variance_history.push(report.loss.variance);
            reports.push(report);
        }

        Ok(RgnResult {
            final_params: self.params.clone(),
            energy_history,
            error_history,
            variance_history,
            reports,
        })
    }
}
