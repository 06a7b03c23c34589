//! Per-value coercion from raw extracted values into destination-typed values
//!
//! These rules are the core business logic of cross-warehouse
//! compatibility. A conversion failure for a single value never aborts the
//! batch; the caller skips the row and records a warning.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use ferry_core::{
    CanonicalKind, FerryError, Result, Value, WarehouseKind, canonical_kind, is_known_tag,
    unwrap_wrappers,
};

/// Convert one raw value given its source type tag and the destination kind.
///
/// Wrapper tags (`Nullable(X)`, `LowCardinality(X)`) convert using the
/// rules for `X`. Null input is null output regardless of declared type.
pub fn convert(tag: &str, raw: &serde_json::Value, dest: WarehouseKind) -> Result<Value> {
    if raw.is_null() {
        return Ok(Value::Null);
    }

    let base = unwrap_wrappers(tag);
    if !is_known_tag(base) {
        tracing::warn!(tag = %base, "unknown source type tag, coercing to string");
        return Ok(Value::String(coerce_to_string(raw)));
    }

    match canonical_kind(base) {
        CanonicalKind::Integer => convert_integer(base, raw),
        CanonicalKind::Float => convert_float(base, raw).map(Value::Float64),
        CanonicalKind::Decimal => convert_decimal(base, raw),
        CanonicalKind::Boolean => convert_boolean(base, raw),
        CanonicalKind::Text => Ok(Value::String(coerce_to_string(raw))),
        CanonicalKind::Date => convert_date(base, raw),
        CanonicalKind::DateTime => convert_datetime(base, raw),
        CanonicalKind::Array => Ok(convert_array(raw)),
        CanonicalKind::Json => Ok(convert_structured(raw, dest)),
    }
}

fn conversion_error(tag: &str, raw: &serde_json::Value, expected: &str) -> FerryError {
    FerryError::RowConversion(format!(
        "cannot convert {} value to {} (tag {})",
        json_kind(raw),
        expected,
        tag
    ))
}

fn json_kind(raw: &serde_json::Value) -> &'static str {
    match raw {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

/// Integer family: numeric value, truncated toward an integer when the raw
/// value is not already integral.
fn convert_integer(tag: &str, raw: &serde_json::Value) -> Result<Value> {
    match raw {
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(Value::Int64(i))
            } else if let Some(f) = n.as_f64() {
                Ok(Value::Int64(f.trunc() as i64))
            } else {
                Err(conversion_error(tag, raw, "integer"))
            }
        }
        serde_json::Value::String(s) => {
            let trimmed = s.trim();
            if let Ok(i) = trimmed.parse::<i64>() {
                Ok(Value::Int64(i))
            } else if let Ok(f) = trimmed.parse::<f64>() {
                Ok(Value::Int64(f.trunc() as i64))
            } else {
                Err(conversion_error(tag, raw, "integer"))
            }
        }
        serde_json::Value::Bool(b) => Ok(Value::Int64(*b as i64)),
        _ => Err(conversion_error(tag, raw, "integer")),
    }
}

/// Float family: standard float parse.
fn convert_float(tag: &str, raw: &serde_json::Value) -> Result<f64> {
    match raw {
        serde_json::Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| conversion_error(tag, raw, "float")),
        serde_json::Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| conversion_error(tag, raw, "float")),
        _ => Err(conversion_error(tag, raw, "float")),
    }
}

/// Decimal family: validated by float parse, carried as a string so
/// precision survives transport.
fn convert_decimal(tag: &str, raw: &serde_json::Value) -> Result<Value> {
    match raw {
        serde_json::Value::Number(n) => Ok(Value::Decimal(n.to_string())),
        serde_json::Value::String(s) => {
            let trimmed = s.trim();
            trimmed
                .parse::<f64>()
                .map_err(|_| conversion_error(tag, raw, "decimal"))?;
            Ok(Value::Decimal(trimmed.to_string()))
        }
        _ => Err(conversion_error(tag, raw, "decimal")),
    }
}

/// Boolean family: coercion of the raw value.
fn convert_boolean(tag: &str, raw: &serde_json::Value) -> Result<Value> {
    match raw {
        serde_json::Value::Bool(b) => Ok(Value::Bool(*b)),
        serde_json::Value::Number(n) => Ok(Value::Bool(n.as_f64().unwrap_or(0.0) != 0.0)),
        serde_json::Value::String(s) => match s.trim().to_lowercase().as_str() {
            "true" | "1" | "t" | "yes" => Ok(Value::Bool(true)),
            "false" | "0" | "f" | "no" | "" => Ok(Value::Bool(false)),
            _ => Err(conversion_error(tag, raw, "boolean")),
        },
        _ => Err(conversion_error(tag, raw, "boolean")),
    }
}

/// Date-only family: calendar date derived from parsing the raw value as a
/// timestamp.
fn convert_date(tag: &str, raw: &serde_json::Value) -> Result<Value> {
    match raw {
        serde_json::Value::String(s) => parse_datetime_str(s.trim())
            .map(|dt| Value::Date(dt.date()))
            .ok_or_else(|| conversion_error(tag, raw, "date")),
        serde_json::Value::Number(n) => epoch_to_datetime(n)
            .map(|dt| Value::Date(dt.date()))
            .ok_or_else(|| conversion_error(tag, raw, "date")),
        _ => Err(conversion_error(tag, raw, "date")),
    }
}

/// Date-time family: full timestamp derived from parsing the raw value.
fn convert_datetime(tag: &str, raw: &serde_json::Value) -> Result<Value> {
    match raw {
        serde_json::Value::String(s) => parse_datetime_str(s.trim())
            .map(Value::DateTime)
            .ok_or_else(|| conversion_error(tag, raw, "timestamp")),
        serde_json::Value::Number(n) => epoch_to_datetime(n)
            .map(Value::DateTime)
            .ok_or_else(|| conversion_error(tag, raw, "timestamp")),
        _ => Err(conversion_error(tag, raw, "timestamp")),
    }
}

fn parse_datetime_str(s: &str) -> Option<NaiveDateTime> {
    const FORMATS: &[&str] = &[
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S%.fZ",
    ];
    for format in FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, format) {
            return Some(dt);
        }
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_utc());
    }
    if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return d.and_hms_opt(0, 0, 0);
    }
    None
}

fn epoch_to_datetime(n: &serde_json::Number) -> Option<NaiveDateTime> {
    let secs = n.as_i64().or_else(|| n.as_f64().map(|f| f.trunc() as i64))?;
    DateTime::from_timestamp(secs, 0).map(|dt| dt.naive_utc())
}

/// Array family: pass through when already a sequence, parse a serialized
/// sequence otherwise, defaulting to an empty sequence on failure.
fn convert_array(raw: &serde_json::Value) -> Value {
    match raw {
        serde_json::Value::Array(items) => Value::Array(items.iter().map(json_to_value).collect()),
        serde_json::Value::String(s) => match serde_json::from_str::<serde_json::Value>(s) {
            Ok(serde_json::Value::Array(items)) => {
                Value::Array(items.iter().map(json_to_value).collect())
            }
            _ => {
                tracing::warn!("array value not parseable as a sequence, using empty array");
                Value::Array(Vec::new())
            }
        },
        _ => {
            tracing::warn!(kind = json_kind(raw), "array value not a sequence, using empty array");
            Value::Array(Vec::new())
        }
    }
}

/// Structured family (maps, tuples, variants): pass through when already
/// structured, parse serialized data otherwise, defaulting to null on
/// failure.
fn convert_structured(raw: &serde_json::Value, _dest: WarehouseKind) -> Value {
    match raw {
        serde_json::Value::Object(_) | serde_json::Value::Array(_) => Value::Json(raw.clone()),
        serde_json::Value::String(s) => match serde_json::from_str::<serde_json::Value>(s) {
            Ok(parsed @ (serde_json::Value::Object(_) | serde_json::Value::Array(_))) => {
                Value::Json(parsed)
            }
            _ => {
                tracing::warn!("structured value not parseable, using null");
                Value::Null
            }
        },
        _ => Value::Json(raw.clone()),
    }
}

fn coerce_to_string(raw: &serde_json::Value) -> String {
    match raw {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Array(_) | serde_json::Value::Object(_) => {
            serde_json::to_string(raw).unwrap_or_default()
        }
        other => other.to_string(),
    }
}

/// Generic raw-to-value mapping used for array elements, which carry no
/// per-element type tag.
fn json_to_value(json: &serde_json::Value) -> Value {
    match json {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(*b),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::Int64(i)
            } else if let Some(f) = n.as_f64() {
                Value::Float64(f)
            } else {
                Value::String(n.to_string())
            }
        }
        serde_json::Value::String(s) => Value::String(s.clone()),
        serde_json::Value::Array(items) => Value::Array(items.iter().map(json_to_value).collect()),
        serde_json::Value::Object(_) => Value::Json(json.clone()),
    }
}
