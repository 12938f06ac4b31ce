//! Error types for gridcalc-core.

use gridcalc_dag::CycleError;
use gridcalc_sheet::SheetError;
use thiserror::Error;

/// Result type for calculation operations.
pub type CalcResult<T> = Result<T, CalcError>;

/// Errors that can occur while setting up or running a calculation.
#[derive(Debug, Error)]
pub enum CalcError {
    /// Circular reference found while building the dependency graph.
    #[error("circular reference: {0}")]
    Cycle(#[from] CycleError),

    /// Usercode that could not be parsed.
    #[error("Syntax error at character {position}")]
    Syntax { line: usize, position: usize },

    /// A worker thread could not be started.
    #[error("Worker error: {0}")]
    Worker(String),

    /// Cross-sheet fetch failure.
    #[error("{0}")]
    Remote(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Sheet(#[from] SheetError),
}

impl CalcError {
    /// Create a remote fetch error.
    pub fn remote(message: impl Into<String>) -> Self {
        Self::Remote(message.into())
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }
}
