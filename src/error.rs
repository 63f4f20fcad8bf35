//! Error type shared across the registration pipeline.

use thiserror::Error;

/// Errors produced by the driver and its stages.
///
/// Two categories exist: precondition violations, surfaced before any heavy
/// work starts, and convergence failures raised by transformation checkers
/// from inside the iteration loop. Stages that merely run out of useful work
/// do not error; they clear the shared `iterate` flag instead.
#[derive(Debug, Error)]
pub enum AlignError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("convergence error: {0}")]
    Convergence(String),
}

pub type Result<T> = std::result::Result<T, AlignError>;
