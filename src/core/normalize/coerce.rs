//! Field lookup and value coercion
//!
//! Sources deliver everything from typed JSON to bare strings scraped out
//! of a PDF, so every coercion accepts both the native JSON type and a
//! string form of it.

use crate::config::FieldType;
use crate::domain::{FieldMap, FieldValue};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::Value;

/// Finds `path` in `fields`
///
/// An exact key wins (adapters that flatten nested data already produce
/// dotted keys); otherwise the path is walked through nested objects and
/// arrays (numeric segments index arrays).
pub fn lookup<'a>(fields: &'a FieldMap, path: &str) -> Option<&'a Value> {
    if let Some(value) = fields.get(path) {
        return Some(value);
    }

    let mut parts = path.split('.');
    let mut current = fields.get(parts.next()?)?;
    for part in parts {
        current = match current {
            Value::Object(map) => map.get(part)?,
            Value::Array(items) => items.get(part.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Null and blank strings count as missing
pub fn is_missing(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.trim().is_empty(),
        _ => false,
    }
}

/// Converts `value` to `field_type`
pub fn coerce(value: &Value, field_type: FieldType, decimal_comma: bool) -> Result<FieldValue, String> {
    match field_type {
        FieldType::String => coerce_string(value),
        FieldType::Integer => coerce_integer(value, decimal_comma),
        FieldType::Float => coerce_float(value, decimal_comma).map(FieldValue::Float),
        FieldType::Boolean => coerce_boolean(value),
        FieldType::Timestamp => coerce_timestamp(value),
        FieldType::Date => coerce_date(value),
    }
}

fn describe(value: &Value) -> String {
    let text = value.to_string();
    if text.chars().count() > 40 {
        format!("{}...", text.chars().take(40).collect::<String>())
    } else {
        text
    }
}

fn coerce_string(value: &Value) -> Result<FieldValue, String> {
    match value {
        Value::String(s) => Ok(FieldValue::String(s.trim().to_string())),
        Value::Number(n) => Ok(FieldValue::String(n.to_string())),
        Value::Bool(b) => Ok(FieldValue::String(b.to_string())),
        other => Err(format!("expected a string, got {}", describe(other))),
    }
}

fn parse_number_text(text: &str, decimal_comma: bool) -> Option<f64> {
    let trimmed = text.trim();
    let normalized = if decimal_comma {
        trimmed.replace('.', "").replace(',', ".")
    } else {
        trimmed.to_string()
    };
    normalized.parse::<f64>().ok().filter(|f| f.is_finite())
}

/// Numeric coercion shared with geometry x/y fields
pub fn coerce_float(value: &Value, decimal_comma: bool) -> Result<f64, String> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => parse_number_text(s, decimal_comma),
        _ => None,
    };
    parsed.ok_or_else(|| format!("expected a number, got {}", describe(value)))
}

fn coerce_integer(value: &Value, decimal_comma: bool) -> Result<FieldValue, String> {
    if let Some(i) = value.as_i64() {
        return Ok(FieldValue::Integer(i));
    }
    let f = coerce_float(value, decimal_comma)
        .map_err(|_| format!("expected an integer, got {}", describe(value)))?;
    if f.fract() != 0.0 || f < i64::MIN as f64 || f > i64::MAX as f64 {
        return Err(format!("expected an integer, got {}", describe(value)));
    }
    Ok(FieldValue::Integer(f as i64))
}

fn coerce_boolean(value: &Value) -> Result<FieldValue, String> {
    let parsed = match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => match n.as_i64() {
            Some(1) => Some(true),
            Some(0) => Some(false),
            _ => None,
        },
        Value::String(s) => match s.trim().to_lowercase().as_str() {
            "true" | "yes" | "1" | "ja" => Some(true),
            "false" | "no" | "0" | "nej" => Some(false),
            _ => None,
        },
        _ => None,
    };
    parsed
        .map(FieldValue::Boolean)
        .ok_or_else(|| format!("expected a boolean, got {}", describe(value)))
}

fn coerce_timestamp(value: &Value) -> Result<FieldValue, String> {
    let text = value
        .as_str()
        .map(str::trim)
        .ok_or_else(|| format!("expected a timestamp string, got {}", describe(value)))?;

    if let Ok(ts) = DateTime::parse_from_rfc3339(text) {
        return Ok(FieldValue::Timestamp(ts.with_timezone(&Utc)));
    }
    NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S")
        .map(|naive| FieldValue::Timestamp(naive.and_utc()))
        .map_err(|_| format!("'{}' is not an RFC 3339 or 'YYYY-MM-DD HH:MM:SS' timestamp", text))
}

fn coerce_date(value: &Value) -> Result<FieldValue, String> {
    let text = value
        .as_str()
        .map(str::trim)
        .ok_or_else(|| format!("expected a date string, got {}", describe(value)))?;

    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(text, "%d-%m-%Y"))
        .map(FieldValue::Date)
        .map_err(|_| format!("'{}' is not a YYYY-MM-DD or DD-MM-YYYY date", text))
}
