//! # gridcalc-primitives
//!
//! Core primitives shared by every gridcalc crate: 1-based cell locations,
//! A1-style labels, and the runtime [`Value`] type with its `Undefined`
//! sentinel.

use serde::{Deserialize, Serialize};
use std::fmt;

pub mod address;
mod value;

pub use address::{
    cell_name_to_coordinates, cell_range_as_string_to_coordinates, column_index_to_name,
    column_name_to_index, coordinates_to_cell_name, MAX_COLUMN_COUNT, MAX_ROW_COUNT,
};
pub use value::Value;

/// A cell location in a worksheet. Both axes are 1-based, so `A1` is
/// `CellLocation { col: 1, row: 1 }`.
///
/// Ordering is column-major (column first, then row), which is also the
/// order cells are stored and visited in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CellLocation {
    pub col: u32,
    pub row: u32,
}

impl CellLocation {
    /// Create a location without validation. Callers that accept user input
    /// should go through [`CellLocation::try_new`] or [`CellLocation::from_label`].
    pub const fn new(col: u32, row: u32) -> Self {
        Self { col, row }
    }

    /// Create a location, rejecting zero or negative coordinates.
    pub fn try_new(col: i64, row: i64) -> Result<Self, AddressError> {
        let col = u32::try_from(col)
            .ok()
            .filter(|c| (1..=MAX_COLUMN_COUNT).contains(c));
        let row = u32::try_from(row)
            .ok()
            .filter(|r| (1..=MAX_ROW_COUNT).contains(r));
        match (col, row) {
            (Some(col), Some(row)) => Ok(Self { col, row }),
            _ => Err(AddressError::OutOfBounds { col, row }),
        }
    }

    /// Parse an A1 label such as `B3` or `$AA$10`.
    pub fn from_label(label: &str) -> Result<Self, AddressError> {
        cell_name_to_coordinates(label)
            .map(|(col, row)| Self { col, row })
            .ok_or_else(|| AddressError::InvalidLabel(label.to_string()))
    }

    /// Human-readable A1 label (`B3`).
    pub fn label(&self) -> String {
        format!("{}{}", column_index_to_name(self.col), self.row)
    }
}

impl fmt::Display for CellLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

impl From<(u32, u32)> for CellLocation {
    fn from((col, row): (u32, u32)) -> Self {
        Self { col, row }
    }
}

/// Errors that can occur when parsing or validating addresses
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AddressError {
    #[error("'{0}' is not a valid cell location")]
    InvalidLabel(String),
    #[error("Invalid cell range '{0}'")]
    InvalidRange(String),
    #[error("Cell location out of bounds (column {col:?}, row {row:?})")]
    OutOfBounds { col: Option<u32>, row: Option<u32> },
}
