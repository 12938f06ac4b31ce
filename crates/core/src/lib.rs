//! # gridcalc-core
//!
//! Recalculation engine for gridcalc worksheets.
//!
//! A pass clears previous results, then runs the sheet's usercode. The
//! `evaluate_formulae()` statement builds the dependency graph of every cell
//! and evaluates it on a pool of worker threads, each cell after all of the
//! cells it reads.
//!
//! ```
//! use gridcalc_core::{Calculator, DEFAULT_USERCODE};
//! use gridcalc_primitives::{CellLocation, Value};
//! use gridcalc_sheet::Worksheet;
//!
//! let mut sheet = Worksheet::new();
//! sheet.set_formula("A1", "4").unwrap();
//! sheet.set_formula("A2", "=A1*A1").unwrap();
//!
//! Calculator::default().calculate(&mut sheet, DEFAULT_USERCODE);
//! assert_eq!(sheet.cell(CellLocation::new(1, 2)).value, Value::Int(16));
//! ```

pub mod cancel;
pub mod config;
pub mod context;
pub mod error;
pub mod graph;
pub mod recalc;
pub mod remote;
pub mod scheduler;
pub mod usercode;

pub use cancel::CancellationToken;
pub use config::RecalcConfig;
pub use context::{format_cell_error, CellResult, EvalServices, EvaluationContext};
pub use error::{CalcError, CalcResult};
pub use graph::build_dependency_graph;
pub use recalc::{load_constants, CalculationStatus, Calculator};
pub use remote::{RemoteSheets, API_VERSION};
pub use scheduler::{Scheduler, SchedulerOutcome};
pub use usercode::{parse_program, Program, Statement, DEFAULT_USERCODE};
