//! Bind parameter shaping for the postgres wire protocol

use bytes::BytesMut;
use chrono::{NaiveDate, NaiveDateTime};
use ferry_core::{CanonicalKind, FerryError, Result, Value};
use postgres_types::{IsNull, ToSql, Type, to_sql_checked};

/// One bind parameter, shaped to the destination column's wire type.
///
/// Decimals and Redshift SUPER values travel as text behind a cast in the
/// SQL, so they bind as `Text` here.
#[derive(Debug)]
pub enum PgParam {
    I64(Option<i64>),
    F64(Option<f64>),
    Bool(Option<bool>),
    Text(Option<String>),
    Date(Option<NaiveDate>),
    DateTime(Option<NaiveDateTime>),
    Json(Option<serde_json::Value>),
}

impl ToSql for PgParam {
    fn to_sql(
        &self,
        ty: &Type,
        out: &mut BytesMut,
    ) -> std::result::Result<IsNull, Box<dyn std::error::Error + Sync + Send>> {
        match self {
            PgParam::I64(v) => v.to_sql(ty, out),
            PgParam::F64(v) => v.to_sql(ty, out),
            PgParam::Bool(v) => v.to_sql(ty, out),
            PgParam::Text(v) => v.to_sql(ty, out),
            PgParam::Date(v) => v.to_sql(ty, out),
            PgParam::DateTime(v) => v.to_sql(ty, out),
            PgParam::Json(v) => v.to_sql(ty, out),
        }
    }

    fn accepts(_ty: &Type) -> bool {
        // Per-variant checking happens in the delegated to_sql
        true
    }

    to_sql_checked!();
}

/// Shape a converted value for one destination column.
///
/// The converter has already normalized the value, so mismatches here are
/// conversion bugs surfaced as `RowConversion` (the row is skipped).
pub fn pg_param(canonical: CanonicalKind, value: &Value, json_as_text: bool) -> Result<PgParam> {
    if matches!(value, Value::Null) {
        return Ok(null_param(canonical, json_as_text));
    }

    let param = match canonical {
        CanonicalKind::Integer => PgParam::I64(Some(
            value
                .as_i64()
                .ok_or_else(|| mismatch("integer", value))?,
        )),
        CanonicalKind::Float => PgParam::F64(Some(
            value.as_f64().ok_or_else(|| mismatch("float", value))?,
        )),
        CanonicalKind::Boolean => PgParam::Bool(Some(
            value.as_bool().ok_or_else(|| mismatch("boolean", value))?,
        )),
        CanonicalKind::Decimal => match value {
            Value::Decimal(s) => PgParam::Text(Some(s.clone())),
            Value::Int64(i) => PgParam::Text(Some(i.to_string())),
            Value::Float64(f) => PgParam::Text(Some(f.to_string())),
            _ => return Err(mismatch("decimal", value)),
        },
        CanonicalKind::Text => match value {
            Value::String(s) => PgParam::Text(Some(s.clone())),
            _ => PgParam::Text(Some(value.to_string())),
        },
        CanonicalKind::Date => match value {
            Value::Date(d) => PgParam::Date(Some(*d)),
            _ => return Err(mismatch("date", value)),
        },
        CanonicalKind::DateTime => match value {
            Value::DateTime(ts) => PgParam::DateTime(Some(*ts)),
            _ => return Err(mismatch("datetime", value)),
        },
        CanonicalKind::Array | CanonicalKind::Json => {
            let json = serde_json::to_value(value)
                .map_err(|e| FerryError::RowConversion(format!("value not serializable: {}", e)))?;
            if json_as_text {
                PgParam::Text(Some(json.to_string()))
            } else {
                PgParam::Json(Some(json))
            }
        }
    };
    Ok(param)
}

fn null_param(canonical: CanonicalKind, json_as_text: bool) -> PgParam {
    match canonical {
        CanonicalKind::Integer => PgParam::I64(None),
        CanonicalKind::Float => PgParam::F64(None),
        CanonicalKind::Boolean => PgParam::Bool(None),
        CanonicalKind::Decimal | CanonicalKind::Text => PgParam::Text(None),
        CanonicalKind::Date => PgParam::Date(None),
        CanonicalKind::DateTime => PgParam::DateTime(None),
        CanonicalKind::Array | CanonicalKind::Json if json_as_text => PgParam::Text(None),
        CanonicalKind::Array | CanonicalKind::Json => PgParam::Json(None),
    }
}

fn mismatch(expected: &str, value: &Value) -> FerryError {
    FerryError::RowConversion(format!("expected {} value, got {}", expected, value))
}
