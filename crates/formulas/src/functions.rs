//! Standard spreadsheet functions implementation

use crate::EvalError;
use chrono::NaiveDate;
use gridcalc_primitives::Value;

/// Visit scalar values, descending into ranges/arrays.
fn walk_values(values: &[Value], f: &mut dyn FnMut(&Value) -> Result<(), EvalError>) -> Result<(), EvalError> {
    for value in values {
        match value {
            Value::Array(items) => walk_values(items, f)?,
            _ => f(value)?,
        }
    }
    Ok(())
}

/// Numbers taken by aggregates. Empty, null and text cells are skipped;
/// bools and datetimes are rejected.
fn collect_numbers(name: &str, values: &[Value]) -> Result<Vec<Value>, EvalError> {
    let mut numbers = Vec::new();
    walk_values(values, &mut |value| match value {
        Value::Int(_) | Value::Float(_) => {
            numbers.push(value.clone());
            Ok(())
        }
        Value::Undefined | Value::Null | Value::String(_) => Ok(()),
        other => Err(EvalError::type_error(format!(
            "{name}() cannot aggregate '{}'",
            other.type_name()
        ))),
    })?;
    Ok(numbers)
}

fn to_number(value: &Value) -> f64 {
    value.as_float().unwrap_or_default()
}

fn require_number(name: &str, value: &Value) -> Result<f64, EvalError> {
    match value {
        Value::Int(n) => Ok(*n as f64),
        Value::Float(f) => Ok(*f),
        other => Err(EvalError::type_error(format!(
            "{name}() expects a number, got '{}'",
            other.type_name()
        ))),
    }
}

fn require_int(name: &str, value: &Value) -> Result<i64, EvalError> {
    match value {
        Value::Int(n) => Ok(*n),
        Value::Float(f) if f.fract() == 0.0 && f.is_finite() => Ok(*f as i64),
        other => Err(EvalError::type_error(format!(
            "{name}() expects an integer, got '{}'",
            other.type_name()
        ))),
    }
}

fn require_bool(name: &str, value: &Value) -> Result<bool, EvalError> {
    match value {
        Value::Undefined => Err(EvalError::type_error(format!(
            "{name}() got an undefined value"
        ))),
        other => Ok(other.is_truthy()),
    }
}

fn require_text<'a>(name: &str, value: &'a Value) -> Result<&'a str, EvalError> {
    value.as_str().ok_or_else(|| {
        EvalError::type_error(format!(
            "{name}() expects a string, got '{}'",
            value.type_name()
        ))
    })
}

pub fn sum(args: &[Value]) -> Result<Value, EvalError> {
    let numbers = collect_numbers("SUM", args)?;
    if numbers.iter().all(|v| matches!(v, Value::Int(_))) {
        let mut total: i64 = 0;
        let mut overflowed = false;
        for value in &numbers {
            if let Value::Int(n) = value {
                match total.checked_add(*n) {
                    Some(next) => total = next,
                    None => {
                        overflowed = true;
                        break;
                    }
                }
            }
        }
        if !overflowed {
            return Ok(Value::Int(total));
        }
    }
    Ok(Value::Float(numbers.iter().map(to_number).sum()))
}

pub fn min(args: &[Value]) -> Result<Value, EvalError> {
    extreme("MIN", args, |candidate, best| candidate < best)
}

pub fn max(args: &[Value]) -> Result<Value, EvalError> {
    extreme("MAX", args, |candidate, best| candidate > best)
}

fn extreme(name: &str, args: &[Value], better: fn(f64, f64) -> bool) -> Result<Value, EvalError> {
    let numbers = collect_numbers(name, args)?;
    let mut best: Option<&Value> = None;
    for value in &numbers {
        best = match best {
            Some(current) if !better(to_number(value), to_number(current)) => Some(current),
            _ => Some(value),
        };
    }
    best.cloned()
        .ok_or_else(|| EvalError::value_error(format!("{name}() arg is an empty sequence")))
}

pub fn average(args: &[Value]) -> Result<Value, EvalError> {
    let numbers = collect_numbers("AVERAGE", args)?;
    if numbers.is_empty() {
        return Err(EvalError::ZeroDivision);
    }
    let total: f64 = numbers.iter().map(to_number).sum();
    Ok(Value::Float(total / numbers.len() as f64))
}

pub fn count(args: &[Value]) -> Result<Value, EvalError> {
    let mut count: i64 = 0;
    walk_values(args, &mut |value| {
        if matches!(value, Value::Int(_) | Value::Float(_)) {
            count += 1;
        }
        Ok(())
    })?;
    Ok(Value::Int(count))
}

pub fn abs(args: &[Value]) -> Result<Value, EvalError> {
    match &args[0] {
        Value::Int(n) => Ok(n.checked_abs().map_or(Value::Float((*n as f64).abs()), Value::Int)),
        other => Ok(Value::Float(require_number("ABS", other)?.abs())),
    }
}

pub fn round(args: &[Value]) -> Result<Value, EvalError> {
    let value = require_number("ROUND", &args[0])?;
    let digits = match args.get(1) {
        Some(d) => require_int("ROUND", d)?,
        None => 0,
    };
    let digits = i32::try_from(digits.clamp(-15, 15)).unwrap_or_default();
    let factor = 10f64.powi(digits);
    let rounded = (value * factor).round() / factor;
    if digits <= 0 && rounded.abs() < i64::MAX as f64 {
        Ok(Value::Int(rounded as i64))
    } else {
        Ok(Value::Float(rounded))
    }
}

pub fn and(args: &[Value]) -> Result<Value, EvalError> {
    let mut result = true;
    walk_values(args, &mut |value| {
        result &= require_bool("AND", value)?;
        Ok(())
    })?;
    Ok(Value::Bool(result))
}

pub fn or(args: &[Value]) -> Result<Value, EvalError> {
    let mut result = false;
    walk_values(args, &mut |value| {
        result |= require_bool("OR", value)?;
        Ok(())
    })?;
    Ok(Value::Bool(result))
}

pub fn not(args: &[Value]) -> Result<Value, EvalError> {
    Ok(Value::Bool(!require_bool("NOT", &args[0])?))
}

pub fn len(args: &[Value]) -> Result<Value, EvalError> {
    match &args[0] {
        Value::String(s) => Ok(Value::Int(s.chars().count() as i64)),
        Value::Array(items) => Ok(Value::Int(items.len() as i64)),
        other => Err(EvalError::type_error(format!(
            "object of type '{}' has no len()",
            other.type_name()
        ))),
    }
}

pub fn concat(args: &[Value]) -> Result<Value, EvalError> {
    let mut out = String::new();
    walk_values(args, &mut |value| {
        if value.is_undefined() {
            return Err(EvalError::type_error("CONCAT() got an undefined value"));
        }
        out.push_str(&value.formatted());
        Ok(())
    })?;
    Ok(Value::String(out))
}

pub fn upper(args: &[Value]) -> Result<Value, EvalError> {
    Ok(Value::String(require_text("UPPER", &args[0])?.to_uppercase()))
}

pub fn lower(args: &[Value]) -> Result<Value, EvalError> {
    Ok(Value::String(require_text("LOWER", &args[0])?.to_lowercase()))
}

/// `DATETIME(year, month, day[, hour[, minute[, second]]])`
pub fn datetime(args: &[Value]) -> Result<Value, EvalError> {
    let mut parts = [0i64; 6];
    for (slot, value) in parts.iter_mut().zip(args) {
        *slot = require_int("DATETIME", value)?;
    }
    let [year, month, day, hour, minute, second] = parts;

    let field = |v: i64| u32::try_from(v).ok();
    let date = i32::try_from(year)
        .ok()
        .zip(field(month))
        .zip(field(day))
        .and_then(|((y, m), d)| NaiveDate::from_ymd_opt(y, m, d))
        .ok_or_else(|| EvalError::value_error("day is out of range for month"))?;
    let datetime = match (field(hour), field(minute), field(second)) {
        (Some(h), Some(mi), Some(s)) => date.and_hms_opt(h, mi, s),
        _ => None,
    }
    .ok_or_else(|| EvalError::value_error("time is out of range"))?;

    Ok(Value::DateTime(datetime))
}

/// `RAISE(message)` always fails with a `FormulaError`.
pub fn raise(args: &[Value]) -> Result<Value, EvalError> {
    Err(EvalError::Formula(args[0].formatted()))
}

pub fn undefined(_args: &[Value]) -> Result<Value, EvalError> {
    Ok(Value::Undefined)
}

pub fn isundefined(args: &[Value]) -> Result<Value, EvalError> {
    Ok(Value::Bool(args[0].is_undefined()))
}
