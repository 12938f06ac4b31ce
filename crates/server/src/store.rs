//! Published sheets, loaded from a directory of JSON files.
//!
//! Each `<id>.json` file holds a worksheet in the full serialization format,
//! plus two optional keys:
//!
//! - `_usercode`: the sheet's program (defaults to load + evaluate)
//! - `_api_key`: credentials callers must present

use gridcalc_core::DEFAULT_USERCODE;
use gridcalc_sheet::{worksheet_from_json_value, SheetError, Worksheet};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid sheet {path}: {message}")]
    Invalid { path: PathBuf, message: String },
    #[error(transparent)]
    Sheet(#[from] SheetError),
}

#[derive(Debug, Clone)]
pub struct PublishedSheet {
    pub worksheet: Worksheet,
    pub usercode: String,
    pub api_key: Option<String>,
}

impl PublishedSheet {
    /// Build from a JSON document in the on-disk format.
    pub fn from_json_value(value: &JsonValue) -> Result<Self, StoreError> {
        let worksheet = worksheet_from_json_value(value)?;
        let field = |key: &str| value.get(key).and_then(JsonValue::as_str).map(str::to_string);
        Ok(Self {
            worksheet,
            usercode: field("_usercode").unwrap_or_else(|| DEFAULT_USERCODE.to_string()),
            api_key: field("_api_key"),
        })
    }

    /// No key configured means anyone may run the sheet.
    pub fn accepts(&self, api_key: Option<&str>) -> bool {
        match &self.api_key {
            Some(expected) => api_key == Some(expected.as_str()),
            None => true,
        }
    }
}

#[derive(Debug, Default)]
pub struct SheetStore {
    sheets: HashMap<String, PublishedSheet>,
}

impl SheetStore {
    /// Load every `*.json` file in `dir`, keyed by file stem.
    pub fn load_dir(dir: &Path) -> Result<Self, StoreError> {
        let io_error = |source| StoreError::Io {
            path: dir.to_path_buf(),
            source,
        };
        let mut store = Self::default();
        for entry in std::fs::read_dir(dir).map_err(io_error)? {
            let path = entry.map_err(io_error)?.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            let Some(id) = path.file_stem().and_then(|stem| stem.to_str()) else {
                continue;
            };
            let id = id.to_string();
            let sheet = load_file(&path)?;
            tracing::info!("loaded sheet '{}' ({} cells)", id, sheet.worksheet.len());
            store.insert(id, sheet);
        }
        Ok(store)
    }

    pub fn insert(&mut self, id: impl Into<String>, sheet: PublishedSheet) {
        self.sheets.insert(id.into(), sheet);
    }

    pub fn get(&self, id: &str) -> Option<&PublishedSheet> {
        self.sheets.get(id)
    }

    pub fn len(&self) -> usize {
        self.sheets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sheets.is_empty()
    }
}

fn load_file(path: &Path) -> Result<PublishedSheet, StoreError> {
    let text = std::fs::read_to_string(path).map_err(|source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let value: JsonValue = serde_json::from_str(&text).map_err(|e| StoreError::Invalid {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    PublishedSheet::from_json_value(&value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridcalc_primitives::CellLocation;

    #[test]
    fn test_load_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("pricing.json"),
            r#"{"1,1": {"formula": "2"}, "_usercode": "load_constants()\n", "_api_key": "k"}"#,
        )
        .unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let store = SheetStore::load_dir(dir.path()).unwrap();
        assert_eq!(store.len(), 1);

        let sheet = store.get("pricing").unwrap();
        assert_eq!(sheet.usercode, "load_constants()\n");
        assert_eq!(
            sheet.worksheet.cell(CellLocation::new(1, 1)).formula(),
            Some("2")
        );
        assert!(sheet.accepts(Some("k")));
        assert!(!sheet.accepts(Some("wrong")));
        assert!(!sheet.accepts(None));
    }

    #[test]
    fn test_defaults() {
        let sheet = PublishedSheet::from_json_value(&serde_json::json!({})).unwrap();
        assert_eq!(sheet.usercode, DEFAULT_USERCODE);
        assert!(sheet.accepts(None));
    }

    #[test]
    fn test_invalid_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("bad.json"), "{").unwrap();
        assert!(matches!(
            SheetStore::load_dir(dir.path()),
            Err(StoreError::Invalid { .. })
        ));
    }
}
