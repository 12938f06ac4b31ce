use gridcalc_primitives::AddressError;
use thiserror::Error;

/// Errors that can occur during worksheet operations
#[derive(Error, Debug)]
pub enum SheetError {
    #[error("Invalid cell location: column {col}, row {row} (both must be at least 1)")]
    InvalidLocation { col: i64, row: i64 },

    #[error(transparent)]
    Address(#[from] AddressError),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Serialize error: {0}")]
    Serialize(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SheetError>;
