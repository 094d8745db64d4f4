//! Optimizer module - Jacobian and Hessian estimators, the composite
//! operator, linear solvers and the RGN preconditioner.

mod diff;
mod jacobian;
mod hessian;
mod operator;
mod solver;
mod rgn;
mod schedule;

pub use diff::{select_diff_mode, DiffMode, Domain};
pub use jacobian::{centered_jacobian_and_mean, CenteredJacobian};
pub use hessian::{loss_grad_and_rhessian, HessianCorrection, LossStats, RHessian};
pub use operator::{CompositeOperator, LinearOperator, OperatorTerm};
pub use solver::{ConjugateGradient, LinearSolver, SolverInfo};
pub use rgn::{Preconditioner, Rgn, SolverState};
pub use schedule::{ConstantSchedule, ExponentialSchedule, LinearSchedule, Schedule, ScheduleConfig};
