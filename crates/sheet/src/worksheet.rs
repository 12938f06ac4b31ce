use crate::cell::Cell;
use crate::console::{Console, ConsoleTextType};
use crate::error::{Result, SheetError};
use gridcalc_primitives::address::normalize_corners;
use gridcalc_primitives::{cell_range_as_string_to_coordinates, AddressError, CellLocation, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

static EMPTY_CELL: Cell = Cell::EMPTY;

/// Failure of the sheet's usercode program.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsercodeError {
    pub message: String,
    pub line: usize,
}

/// Smallest rectangle containing every stored cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bounds {
    pub left: u32,
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
}

/// A sparse grid of cells keyed by location.
#[derive(Debug, Default)]
pub struct Worksheet {
    pub name: Option<String>,
    cells: BTreeMap<CellLocation, Cell>,
    console: Console,
    pub usercode_error: Option<UsercodeError>,
}

impl Clone for Worksheet {
    /// The clone gets its own console log.
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            cells: self.cells.clone(),
            console: self.console.detached(),
            usercode_error: self.usercode_error.clone(),
        }
    }
}

impl Worksheet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_name(name: &str) -> Self {
        Self {
            name: Some(name.to_string()),
            ..Self::default()
        }
    }

    // =========================================================================
    // Cell access
    // =========================================================================

    /// The cell at `location`; an empty cell if nothing is stored there.
    pub fn cell(&self, location: CellLocation) -> &Cell {
        self.cells.get(&location).unwrap_or(&EMPTY_CELL)
    }

    /// Stored cell, if any.
    pub fn get(&self, location: CellLocation) -> Option<&Cell> {
        self.cells.get(&location)
    }

    /// Mutable access, creating the cell if needed.
    pub fn cell_mut(&mut self, location: CellLocation) -> &mut Cell {
        self.cells.entry(location).or_default()
    }

    pub fn set_cell(&mut self, location: CellLocation, cell: Cell) {
        self.cells.insert(location, cell);
    }

    pub fn remove(&mut self, location: CellLocation) -> Option<Cell> {
        self.cells.remove(&location)
    }

    /// Get a cell using A1 notation (e.g., "B3")
    pub fn get_a1(&self, notation: &str) -> Result<&Cell> {
        let location = CellLocation::from_label(notation)?;
        Ok(self.cell(location))
    }

    /// Value at `location` (`Undefined` when empty).
    pub fn value(&self, location: CellLocation) -> Value {
        self.cell(location).value.clone()
    }

    /// Set the text of the cell at (col, row). An empty string removes the cell.
    pub fn set_cell_formula(&mut self, col: i64, row: i64, formula: &str) -> Result<()> {
        let location = CellLocation::try_new(col, row).map_err(|err| match err {
            AddressError::OutOfBounds { .. } => SheetError::InvalidLocation { col, row },
            other => SheetError::Address(other),
        })?;
        self.set_formula_at(location, formula);
        Ok(())
    }

    /// Set the text of a cell by label, e.g. `set_formula("C1", "=A1+B1")`.
    pub fn set_formula(&mut self, notation: &str, formula: &str) -> Result<()> {
        let location = CellLocation::from_label(notation)?;
        self.set_formula_at(location, formula);
        Ok(())
    }

    pub fn set_formula_at(&mut self, location: CellLocation, formula: &str) {
        if formula.is_empty() {
            self.cells.remove(&location);
        } else {
            self.cell_mut(location).set_formula(formula);
        }
    }

    pub fn contains(&self, location: CellLocation) -> bool {
        self.cells.contains_key(&location)
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Stored cells in location order.
    pub fn iter(&self) -> impl Iterator<Item = (&CellLocation, &Cell)> {
        self.cells.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&CellLocation, &mut Cell)> {
        self.cells.iter_mut()
    }

    pub fn locations(&self) -> impl Iterator<Item = CellLocation> + '_ {
        self.cells.keys().copied()
    }

    pub fn bounds(&self) -> Option<Bounds> {
        let mut locations = self.cells.keys();
        let first = locations.next()?;
        let mut bounds = Bounds {
            left: first.col,
            top: first.row,
            right: first.col,
            bottom: first.row,
        };
        for location in locations {
            bounds.left = bounds.left.min(location.col);
            bounds.top = bounds.top.min(location.row);
            bounds.right = bounds.right.max(location.col);
            bounds.bottom = bounds.bottom.max(location.row);
        }
        Some(bounds)
    }

    /// Reset results before a pass: formula cells keep their text and lose
    /// value and error; cells without text are dropped.
    pub fn clear_values(&mut self) {
        self.cells.retain(|_, cell| cell.formula().is_some());
        for cell in self.cells.values_mut() {
            cell.clear_value();
        }
    }

    // =========================================================================
    // Ranges
    // =========================================================================

    /// Range from a string such as `"A1:B3"`.
    pub fn cell_range(&self, range: &str) -> Result<CellRange<'_>> {
        let (start, end) = cell_range_as_string_to_coordinates(range)
            .ok_or_else(|| AddressError::InvalidRange(range.to_string()))?;
        Ok(CellRange {
            worksheet: self,
            start,
            end,
        })
    }

    pub fn cell_range_between(&self, a: CellLocation, b: CellLocation) -> CellRange<'_> {
        let (start, end) = normalize_corners(a, b);
        CellRange {
            worksheet: self,
            start,
            end,
        }
    }

    // =========================================================================
    // Console
    // =========================================================================

    /// Shared handle to this sheet's console log.
    pub fn console(&self) -> &Console {
        &self.console
    }

    pub fn add_console_text(&self, text: &str, kind: ConsoleTextType) {
        self.console.append(text, kind);
    }

    pub fn console_text(&self) -> String {
        self.console.text()
    }

    pub fn set_console_text(&self, text: impl Into<String>) {
        self.console.set_text(text);
    }

    pub fn clear_console(&self) {
        self.console.clear();
    }
}

/// A rectangular view over a worksheet.
#[derive(Debug, Clone, Copy)]
pub struct CellRange<'a> {
    worksheet: &'a Worksheet,
    start: CellLocation,
    end: CellLocation,
}

impl<'a> CellRange<'a> {
    pub fn start(&self) -> CellLocation {
        self.start
    }

    pub fn end(&self) -> CellLocation {
        self.end
    }

    pub fn len(&self) -> usize {
        ((self.end.col - self.start.col + 1) as usize) * ((self.end.row - self.start.row + 1) as usize)
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn contains(&self, location: CellLocation) -> bool {
        (self.start.col..=self.end.col).contains(&location.col)
            && (self.start.row..=self.end.row).contains(&location.row)
    }

    /// Locations, row by row.
    pub fn locations(&self) -> impl Iterator<Item = CellLocation> {
        let (start, end) = (self.start, self.end);
        (start.row..=end.row)
            .flat_map(move |row| (start.col..=end.col).map(move |col| CellLocation::new(col, row)))
    }

    pub fn cells(&self) -> impl Iterator<Item = &'a Cell> + '_ {
        let worksheet = self.worksheet;
        self.locations().map(move |location| worksheet.cell(location))
    }

    pub fn values(&self) -> impl Iterator<Item = Value> + '_ {
        self.cells().map(|cell| cell.value.clone())
    }
}
