//! Runtime values produced by cell evaluation.

use chrono::NaiveDateTime;
use serde_json::Value as JsonValue;
use std::fmt;

/// Value held by a cell after evaluation.
///
/// `Undefined` is the "no valid value" sentinel: the state of cells that
/// errored or were never evaluated. It is never equal to anything (itself
/// included), has no JSON form, and formats as an empty string.
#[derive(Debug, Clone, Default)]
pub enum Value {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    DateTime(NaiveDateTime),
    Array(Vec<Value>),
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Undefined, _) | (_, Self::Undefined) => false,
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a == b,
            (Self::Int(a), Self::Float(b)) | (Self::Float(b), Self::Int(a)) => (*a as f64) == *b,
            (Self::String(a), Self::String(b)) => a == b,
            (Self::DateTime(a), Self::DateTime(b)) => a == b,
            (Self::Array(a), Self::Array(b)) => a == b,
            _ => false,
        }
    }
}

impl Value {
    #[must_use]
    pub fn is_undefined(&self) -> bool {
        matches!(self, Self::Undefined)
    }

    /// Get the type name of this value.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Undefined => "Undefined",
            Self::Null => "Null",
            Self::Bool(_) => "Bool",
            Self::Int(_) => "Int",
            Self::Float(_) => "Float",
            Self::String(_) => "String",
            Self::DateTime(_) => "DateTime",
            Self::Array(_) => "Array",
        }
    }

    /// Numeric view used by arithmetic. Bools count as 0/1.
    #[must_use]
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Self::Int(n) => Some(*n as f64),
            Self::Float(f) => Some(*f),
            Self::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Check if value is truthy.
    #[must_use]
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Undefined | Self::Null => false,
            Self::Bool(b) => *b,
            Self::Int(n) => *n != 0,
            Self::Float(f) => *f != 0.0,
            Self::String(s) => !s.is_empty(),
            Self::DateTime(_) => true,
            Self::Array(a) => !a.is_empty(),
        }
    }

    /// Interpret constant cell text (anything not starting with `=`).
    ///
    /// Tries: bool -> int -> float -> string, so it never fails.
    #[must_use]
    pub fn parse_literal(text: &str) -> Value {
        let trimmed = text.trim();
        match trimmed.to_ascii_lowercase().as_str() {
            "true" => return Value::Bool(true),
            "false" => return Value::Bool(false),
            _ => {}
        }
        if let Ok(i) = trimmed.parse::<i64>() {
            return Value::Int(i);
        }
        // "inf"/"nan" parse as floats but are meant as text in a cell
        if let Ok(f) = trimmed.parse::<f64>() {
            if f.is_finite() {
                return Value::Float(f);
            }
        }
        Value::String(text.to_string())
    }

    /// Presentation form of the value.
    #[must_use]
    pub fn formatted(&self) -> String {
        match self {
            Self::Undefined | Self::Null => String::new(),
            Self::Bool(b) => if *b { "TRUE" } else { "FALSE" }.to_string(),
            Self::Int(n) => n.to_string(),
            Self::Float(f) => f.to_string(),
            Self::String(s) => s.clone(),
            Self::DateTime(dt) => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
            Self::Array(items) => {
                let parts: Vec<String> = items.iter().map(Value::formatted).collect();
                format!("[{}]", parts.join(", "))
            }
        }
    }

    /// JSON form, or `None` when the value has no JSON representation.
    #[must_use]
    pub fn to_json(&self) -> Option<JsonValue> {
        match self {
            Self::Undefined | Self::DateTime(_) => None,
            Self::Null => Some(JsonValue::Null),
            Self::Bool(b) => Some(JsonValue::Bool(*b)),
            Self::Int(n) => Some(JsonValue::from(*n)),
            Self::Float(f) => serde_json::Number::from_f64(*f).map(JsonValue::Number),
            Self::String(s) => Some(JsonValue::String(s.clone())),
            Self::Array(items) => items
                .iter()
                .map(Value::to_json)
                .collect::<Option<Vec<_>>>()
                .map(JsonValue::Array),
        }
    }

    /// Build a value from JSON. Objects have no cell representation.
    #[must_use]
    pub fn from_json(json: &JsonValue) -> Option<Value> {
        match json {
            JsonValue::Null => Some(Value::Null),
            JsonValue::Bool(b) => Some(Value::Bool(*b)),
            JsonValue::Number(n) => n
                .as_i64()
                .map(Value::Int)
                .or_else(|| n.as_f64().map(Value::Float)),
            JsonValue::String(s) => Some(Value::String(s.clone())),
            JsonValue::Array(items) => items
                .iter()
                .map(Value::from_json)
                .collect::<Option<Vec<_>>>()
                .map(Value::Array),
            JsonValue::Object(_) => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.formatted())
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}
