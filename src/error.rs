//! Error types shared by the estimators, the operator and the driver.

use thiserror::Error;

/// Errors raised while building or solving the RGN system.
///
/// Solver non-convergence is not an error: it is reported through
/// [`crate::optimizer::SolverInfo`].
#[derive(Error, Debug)]
pub enum RgnError {
    #[error("shape mismatch in {context}: expected {expected}, got {found}")]
    ShapeMismatch {
        context: &'static str,
        expected: usize,
        found: usize,
    },
    #[error("parameter trees are not isomorphic: {0}")]
    StructureMismatch(String),
    #[error("non-finite value in {0}")]
    NumericalInstability(String),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

pub type Result<T> = std::result::Result<T, RgnError>;

pub(crate) fn check_len(context: &'static str, expected: usize, found: usize) -> Result<()> {
    if expected == found {
        Ok(())
    } else {
        Err(RgnError::ShapeMismatch { context, expected, found })
    }
}
