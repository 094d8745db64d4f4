//! Rust RGN - Variational Monte Carlo with a regularized Gauss-Newton preconditioner
//!
//! This crate provides the stochastic estimators (centered Jacobian, loss
//! gradient, Rayleigh Hessian), a lazily composed curvature operator, an
//! iterative solver and a VMC driver for lattice spin models.

pub mod error;
pub mod wavefunction;
pub mod sampling;
pub mod systems;
pub mod optimizer;
pub mod driver;
pub mod io;

// Re-export commonly used types at crate root
pub use error::{Result, RgnError};
pub use wavefunction::{Ansatz, Jastrow, LeafData, ParamLeaf, ParamTree, Rbm};
pub use sampling::{ConfigBatch, Configuration, ConnectedTable, MetropolisLocal, MetropolisParams, Sampler};
pub use systems::{Hamiltonian, Ising};
pub use optimizer::{
    centered_jacobian_and_mean, loss_grad_and_rhessian, select_diff_mode, CenteredJacobian, CompositeOperator,
    ConjugateGradient, ConstantSchedule, DiffMode, Domain, ExponentialSchedule, HessianCorrection, LinearOperator,
    LinearSchedule, LinearSolver, LossStats, OperatorTerm, Preconditioner, RHessian, Rgn, Schedule, ScheduleConfig,
    SolverInfo, SolverState,
};
pub use driver::{DriverPhase, RgnResult, StepReport, VmcRgn};
pub use io::RgnConfig;
