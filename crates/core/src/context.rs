//! Evaluation context for one recalculation pass.
//!
//! Workers read an immutable snapshot of the worksheet plus one write-once
//! result slot per graph node. A slot is written only by the worker that
//! evaluates its node, and read only by that node's children, which are not
//! scheduled until the write is done. Results are copied back onto the
//! worksheet when the pass ends.
//!
//! Once a pass is abandoned no straggling worker may write a slot or the
//! console. Writers hold a read lock on the abandoned flag for the whole
//! check-and-write; `abandon` takes the write lock, so it returns only after
//! in-flight writes finish and every later write sees the flag.

use crate::cancel::CancellationToken;
use crate::remote::{fetch_remote_values, RemoteSheets};
use gridcalc_dag::DependencyGraph;
use gridcalc_formulas::{EvalError, FormulaEngine, RemoteValues, ValueResolver};
use gridcalc_primitives::{CellLocation, Value};
use gridcalc_sheet::{Console, ConsoleTextType, Worksheet};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

/// Outcome of evaluating one cell.
#[derive(Debug, Clone)]
pub enum CellResult {
    Value(Value),
    /// `"<Kind>: <message>"`
    Error(String),
}

/// Services shared by every evaluation in a pass.
#[derive(Clone)]
pub struct EvalServices {
    pub engine: Arc<FormulaEngine>,
    pub remote: Option<Arc<dyn RemoteSheets>>,
    pub api_key: Option<String>,
    pub token: CancellationToken,
}

pub struct EvaluationContext {
    snapshot: Arc<Worksheet>,
    slots: HashMap<CellLocation, OnceLock<CellResult>>,
    console: Console,
    services: EvalServices,
    abandoned: RwLock<bool>,
}

impl EvaluationContext {
    /// `worksheet` is snapshotted; console output goes to its live log.
    pub fn new(worksheet: &Worksheet, graph: &DependencyGraph, services: EvalServices) -> Self {
        let slots = graph
            .iter()
            .map(|(location, _)| (*location, OnceLock::new()))
            .collect();
        Self {
            snapshot: Arc::new(worksheet.clone()),
            slots,
            console: worksheet.console().clone(),
            services,
            abandoned: RwLock::new(false),
        }
    }

    /// Evaluate the cell at `location` and store its result. Cells without
    /// a compiled formula are left alone. Never fails: errors are stored on
    /// the cell and reported to the console.
    pub fn evaluate_cell(&self, location: CellLocation) {
        let cell = self.snapshot.cell(location);
        let Some(compiled) = cell.compiled() else {
            return;
        };

        let result = match self.services.engine.evaluate(compiled, self) {
            Ok(value) => CellResult::Value(value),
            Err(err) => {
                let description = err.describe();
                tracing::debug!("{} failed: {}", location, description);
                CellResult::Error(description)
            }
        };

        let abandoned = self.abandoned.read();
        if *abandoned {
            return;
        }
        if let CellResult::Error(description) = &result {
            self.console.append(
                &format_cell_error(description, &compiled.source, location),
                ConsoleTextType::Error,
            );
        }
        if let Some(slot) = self.slots.get(&location) {
            let _ = slot.set(result);
        }
    }

    /// Stop accepting results from workers that are still running. Blocks
    /// until any write already past the check has landed.
    pub fn abandon(&self) {
        *self.abandoned.write() = true;
    }

    pub fn is_abandoned(&self) -> bool {
        *self.abandoned.read()
    }

    /// Copy every stored result onto `worksheet`. Returns how many cells
    /// were written.
    pub fn apply(&self, worksheet: &mut Worksheet) -> usize {
        let mut written = 0;
        for (location, slot) in &self.slots {
            let Some(result) = slot.get() else {
                continue;
            };
            let cell = worksheet.cell_mut(*location);
            match result {
                CellResult::Value(value) => cell.set_value(value.clone()),
                CellResult::Error(error) => cell.set_error(error.clone()),
            }
            written += 1;
        }
        written
    }

    pub fn result(&self, location: CellLocation) -> Option<&CellResult> {
        self.slots.get(&location).and_then(OnceLock::get)
    }
}

impl ValueResolver for EvaluationContext {
    fn get_cell(&self, location: CellLocation) -> Value {
        match self.result(location) {
            Some(CellResult::Value(value)) => value.clone(),
            Some(CellResult::Error(_)) => Value::Undefined,
            None => self.snapshot.cell(location).value.clone(),
        }
    }

    fn run_worksheet(
        &self,
        url: &str,
        overrides: &[(CellLocation, Value)],
    ) -> Result<RemoteValues, EvalError> {
        fetch_remote_values(
            self.services.remote.as_ref(),
            self.services.api_key.as_deref(),
            &self.services.token,
            url,
            overrides,
        )
    }
}

/// Resolver over a live worksheet, used by usercode statements.
pub struct WorksheetResolver<'a> {
    pub worksheet: &'a Worksheet,
    pub services: &'a EvalServices,
}

impl ValueResolver for WorksheetResolver<'_> {
    fn get_cell(&self, location: CellLocation) -> Value {
        self.worksheet.cell(location).value.clone()
    }

    fn run_worksheet(
        &self,
        url: &str,
        overrides: &[(CellLocation, Value)],
    ) -> Result<RemoteValues, EvalError> {
        fetch_remote_values(
            self.services.remote.as_ref(),
            self.services.api_key.as_deref(),
            &self.services.token,
            url,
            overrides,
        )
    }
}

/// Console entry for a failed cell.
pub fn format_cell_error(description: &str, formula: &str, location: CellLocation) -> String {
    format!("{description}\n    Formula '{formula}' in {location}\n")
}
