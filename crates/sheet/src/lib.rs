//! Worksheet model for gridcalc
//!
//! A [`Worksheet`] is a sparse map of [`Cell`]s keyed by location, together
//! with a console log and the result of the sheet's usercode program.
//!
//! # Examples
//!
//! ```
//! use gridcalc_sheet::Worksheet;
//!
//! let mut sheet = Worksheet::new();
//! sheet.set_formula("A1", "10").unwrap();
//! sheet.set_formula("B1", "=A1*2").unwrap();
//!
//! let b1 = sheet.get_a1("B1").unwrap();
//! assert_eq!(b1.dependencies().len(), 1);
//! ```

pub mod cell;
pub mod console;
pub mod error;
pub mod json;
pub mod worksheet;

pub use cell::Cell;
pub use console::{escape_html, Console, ConsoleTextType};
pub use error::{Result, SheetError};
pub use json::{
    api_json_to_worksheet, worksheet_from_json, worksheet_from_json_value, worksheet_to_api_json,
    worksheet_to_json, worksheet_to_json_value,
};
pub use worksheet::{Bounds, CellRange, UsercodeError, Worksheet};
