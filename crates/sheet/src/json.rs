//! JSON support for Worksheet
//!
//! Two formats:
//! - Full: every cell keyed by `"col,row"` with its text, results and
//!   dependencies, plus `_console_text` and `_usercode_error`.
//! - API: values only, `{"<col>": {"<row>": value}}`, plus `name` and
//!   `usercode_error`. This is the cross-sheet fetch payload.

use crate::cell::Cell;
use crate::error::{Result, SheetError};
use crate::worksheet::{UsercodeError, Worksheet};
use gridcalc_primitives::{CellLocation, Value};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

const CONSOLE_TEXT_KEY: &str = "_console_text";
const USERCODE_ERROR_KEY: &str = "_usercode_error";
const NAME_KEY: &str = "_name";

#[derive(Debug, Default, Serialize, Deserialize)]
struct CellJson {
    formula: Option<String>,
    #[serde(default)]
    formatted_value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    python_formula: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    dependencies: Vec<[u32; 2]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

// =========================================================================
// Full format
// =========================================================================

/// Serialize the whole worksheet. Values with no JSON form are omitted.
pub fn worksheet_to_json(worksheet: &Worksheet) -> Result<String> {
    let object = worksheet_to_json_value(worksheet)?;
    serde_json::to_string(&object).map_err(|e| SheetError::Serialize(e.to_string()))
}

pub fn worksheet_to_json_value(worksheet: &Worksheet) -> Result<JsonValue> {
    let mut object = Map::new();
    object.insert(
        CONSOLE_TEXT_KEY.to_string(),
        JsonValue::String(worksheet.console_text()),
    );
    object.insert(
        USERCODE_ERROR_KEY.to_string(),
        serde_json::to_value(&worksheet.usercode_error)
            .map_err(|e| SheetError::Serialize(e.to_string()))?,
    );
    if let Some(name) = &worksheet.name {
        object.insert(NAME_KEY.to_string(), JsonValue::String(name.clone()));
    }

    for (location, cell) in worksheet.iter() {
        let entry = CellJson {
            formula: cell.formula().map(str::to_string),
            formatted_value: cell.formatted_value.clone(),
            python_formula: cell.compiled_source(),
            dependencies: cell
                .dependencies()
                .iter()
                .map(|dep| [dep.col, dep.row])
                .collect(),
            error: cell.error.clone(),
        };
        let mut entry =
            serde_json::to_value(entry).map_err(|e| SheetError::Serialize(e.to_string()))?;
        if let (JsonValue::Object(fields), Some(value)) = (&mut entry, cell.value.to_json()) {
            fields.insert("value".to_string(), value);
        }
        object.insert(format!("{},{}", location.col, location.row), entry);
    }

    Ok(JsonValue::Object(object))
}

/// Load a worksheet from the full format. Other keys starting with `_` are
/// ignored.
pub fn worksheet_from_json(json: &str) -> Result<Worksheet> {
    let value: JsonValue =
        serde_json::from_str(json).map_err(|e| SheetError::Parse(format!("Invalid JSON: {e}")))?;
    worksheet_from_json_value(&value)
}

pub fn worksheet_from_json_value(value: &JsonValue) -> Result<Worksheet> {
    let object = value
        .as_object()
        .ok_or_else(|| SheetError::Parse("worksheet JSON must be an object".to_string()))?;

    let mut worksheet = Worksheet::new();
    for (key, raw) in object {
        match key.as_str() {
            CONSOLE_TEXT_KEY => {
                worksheet.set_console_text(raw.as_str().unwrap_or_default());
            }
            USERCODE_ERROR_KEY => {
                worksheet.usercode_error = parse_usercode_error(raw)?;
            }
            NAME_KEY => worksheet.name = raw.as_str().map(str::to_string),
            other if other.starts_with('_') => {}
            other => {
                let location = parse_cell_key(other)?;
                let entry: CellJson = serde_json::from_value(raw.clone())
                    .map_err(|e| SheetError::Parse(format!("cell {other}: {e}")))?;

                let mut cell = Cell::new();
                if let Some(formula) = entry.formula {
                    cell.set_formula(formula);
                }
                if let Some(value) = raw.get("value").and_then(Value::from_json) {
                    cell.value = value;
                }
                cell.formatted_value = entry.formatted_value;
                cell.error = entry.error;
                worksheet.set_cell(location, cell);
            }
        }
    }
    Ok(worksheet)
}

fn parse_cell_key(key: &str) -> Result<CellLocation> {
    let invalid = || SheetError::Parse(format!("invalid cell key '{key}'"));
    let (col, row) = key.split_once(',').ok_or_else(invalid)?;
    let col: i64 = col.trim().parse().map_err(|_| invalid())?;
    let row: i64 = row.trim().parse().map_err(|_| invalid())?;
    CellLocation::try_new(col, row).map_err(|_| SheetError::InvalidLocation { col, row })
}

fn parse_usercode_error(raw: &JsonValue) -> Result<Option<UsercodeError>> {
    serde_json::from_value(raw.clone())
        .map_err(|e| SheetError::Parse(format!("invalid usercode error: {e}")))
}

// =========================================================================
// API format
// =========================================================================

/// Values-only payload served to other sheets.
pub fn worksheet_to_api_json(worksheet: &Worksheet) -> Result<JsonValue> {
    let mut object = Map::new();
    object.insert(
        "name".to_string(),
        JsonValue::String(
            worksheet
                .name
                .clone()
                .unwrap_or_else(|| "Untitled".to_string()),
        ),
    );

    for (location, cell) in worksheet.iter() {
        let Some(value) = cell.value.to_json() else {
            continue;
        };
        let column = object
            .entry(location.col.to_string())
            .or_insert_with(|| JsonValue::Object(Map::new()));
        if let JsonValue::Object(rows) = column {
            rows.insert(location.row.to_string(), value);
        }
    }

    object.insert(
        "usercode_error".to_string(),
        serde_json::to_value(&worksheet.usercode_error)
            .map_err(|e| SheetError::Serialize(e.to_string()))?,
    );
    Ok(JsonValue::Object(object))
}

/// Parse a values-only payload. Only values and the usercode error survive.
pub fn api_json_to_worksheet(json: &str) -> Result<Worksheet> {
    let value: JsonValue =
        serde_json::from_str(json).map_err(|e| SheetError::Parse(format!("Invalid JSON: {e}")))?;
    let object = value
        .as_object()
        .ok_or_else(|| SheetError::Parse("API JSON must be an object".to_string()))?;

    let mut worksheet = Worksheet::new();
    worksheet.name = Some(
        object
            .get("name")
            .and_then(JsonValue::as_str)
            .unwrap_or("Untitled")
            .to_string(),
    );

    for (key, raw) in object {
        if key == "usercode_error" {
            worksheet.usercode_error = parse_usercode_error(raw)?;
            continue;
        }
        let JsonValue::Object(rows) = raw else {
            continue;
        };
        let col: i64 = key
            .parse()
            .map_err(|_| SheetError::Parse(format!("invalid column key '{key}'")))?;
        for (row_key, cell_value) in rows {
            let row: i64 = row_key
                .parse()
                .map_err(|_| SheetError::Parse(format!("invalid row key '{row_key}'")))?;
            let location = CellLocation::try_new(col, row)
                .map_err(|_| SheetError::InvalidLocation { col, row })?;
            if let Some(value) = Value::from_json(cell_value) {
                worksheet.cell_mut(location).set_value(value);
            }
        }
    }
    Ok(worksheet)
}
