//! A single worksheet cell.

use gridcalc_formulas::{compile, is_formula, CompiledFormula};
use gridcalc_primitives::{CellLocation, Value};
use std::collections::BTreeSet;
use std::sync::Arc;

/// One cell: the text the user typed plus the results of the last pass.
///
/// Text starting with `=` is compiled on assignment; anything else is a
/// constant, interpreted when constants are loaded.
#[derive(Debug, Clone, Default)]
pub struct Cell {
    formula: Option<String>,
    compiled: Option<Arc<CompiledFormula>>,
    dependencies: BTreeSet<CellLocation>,
    pub value: Value,
    pub formatted_value: String,
    /// `"<Kind>: <message>"` when the last evaluation failed
    pub error: Option<String>,
}

impl Cell {
    pub const EMPTY: Cell = Cell {
        formula: None,
        compiled: None,
        dependencies: BTreeSet::new(),
        value: Value::Undefined,
        formatted_value: String::new(),
        error: None,
    };

    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_formula(formula: impl Into<String>) -> Self {
        let mut cell = Self::new();
        cell.set_formula(formula);
        cell
    }

    pub fn formula(&self) -> Option<&str> {
        self.formula.as_deref()
    }

    /// Replace the cell text, recompiling and replacing the dependency set.
    pub fn set_formula(&mut self, formula: impl Into<String>) {
        let formula = formula.into();
        if is_formula(&formula) {
            let compiled = compile(&formula);
            self.dependencies = compiled.dependencies.clone();
            self.compiled = Some(Arc::new(compiled));
        } else {
            self.dependencies.clear();
            self.compiled = None;
        }
        self.formula = Some(formula);
    }

    pub fn clear_formula(&mut self) {
        self.formula = None;
        self.compiled = None;
        self.dependencies.clear();
    }

    pub fn compiled(&self) -> Option<&Arc<CompiledFormula>> {
        self.compiled.as_ref()
    }

    /// Canonical source of the compiled form, if the cell holds a formula.
    pub fn compiled_source(&self) -> Option<String> {
        self.compiled.as_ref().map(|c| c.canonical_source())
    }

    /// Cells this cell's formula reads.
    pub fn dependencies(&self) -> &BTreeSet<CellLocation> {
        &self.dependencies
    }

    /// Constant text (non-formula), if any.
    pub fn constant(&self) -> Option<&str> {
        match &self.formula {
            Some(text) if !is_formula(text) => Some(text),
            _ => None,
        }
    }

    /// Store a successful result.
    pub fn set_value(&mut self, value: Value) {
        self.formatted_value = value.formatted();
        self.value = value;
        self.error = None;
    }

    /// Store a failure: the value becomes `Undefined`.
    pub fn set_error(&mut self, error: impl Into<String>) {
        self.value = Value::Undefined;
        self.formatted_value.clear();
        self.error = Some(error.into());
    }

    pub fn clear_value(&mut self) {
        self.value = Value::Undefined;
        self.formatted_value.clear();
        self.error = None;
    }

    /// Nothing worth storing.
    pub fn is_empty(&self) -> bool {
        self.formula.is_none() && self.value.is_undefined() && self.error.is_none()
    }
}
