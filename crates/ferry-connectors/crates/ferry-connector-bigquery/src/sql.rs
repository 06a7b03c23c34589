//! SQL text and value shaping for the BigQuery REST API

use ferry_core::{
    CanonicalKind, ColumnDescriptor, TenancyFilter, Value, WarehouseKind, quote_identifier,
};

/// Map an `INFORMATION_SCHEMA.COLUMNS.data_type` value onto the canonical
/// source vocabulary.
pub fn canonical_tag(bq_type: &str) -> String {
    let upper = bq_type.to_uppercase();
    if upper.starts_with("ARRAY<") {
        return "Array(String)".to_string();
    }
    if upper.starts_with("STRUCT<") {
        return "JSON".to_string();
    }
    let base = upper.split('(').next().unwrap_or(&upper).trim().to_string();
    let tag = match base.as_str() {
        "INT64" | "INT" | "INTEGER" | "BIGINT" | "SMALLINT" | "TINYINT" | "BYTEINT" => "Int64",
        "FLOAT64" | "FLOAT" => "Float64",
        "NUMERIC" | "BIGNUMERIC" | "DECIMAL" | "BIGDECIMAL" => "Decimal(38, 10)",
        "BOOL" | "BOOLEAN" => "Bool",
        "STRING" => "String",
        "DATE" => "Date",
        "DATETIME" | "TIMESTAMP" => "DateTime",
        "JSON" => "JSON",
        _ => return bq_type.to_string(),
    };
    tag.to_string()
}

/// Fully qualified, backtick-quoted table path
pub fn qualified_table(project: &str, dataset: &str, table: &str) -> String {
    // A dotted table name already carries its dataset
    let (dataset, table) = match table.split_once('.') {
        Some((ds, tbl)) => (ds, tbl),
        None => (dataset, table),
    };
    format!("`{}.{}.{}`", project, dataset, table)
}

/// Column list introspection query against the dataset's
/// INFORMATION_SCHEMA view; the table name binds as `@table`.
pub fn introspect_sql(project: &str, dataset: &str, table: &str) -> (String, String) {
    let (dataset, table_name) = match table.split_once('.') {
        Some((ds, tbl)) => (ds, tbl),
        None => (dataset, table),
    };
    let sql = format!(
        "SELECT column_name, data_type FROM `{}.{}`.INFORMATION_SCHEMA.COLUMNS \
         WHERE table_name = @table ORDER BY ordinal_position",
        project, dataset
    );
    (sql, table_name.to_string())
}

/// Build the streaming SELECT; the tenancy value binds as `@tenant`.
pub fn select_sql(
    project: &str,
    dataset: &str,
    table: &str,
    columns: &[ColumnDescriptor],
    filter: Option<&TenancyFilter>,
) -> String {
    let column_list = columns
        .iter()
        .map(|c| quote_identifier(WarehouseKind::BigQuery, &c.name))
        .collect::<Vec<_>>()
        .join(", ");
    let mut sql = format!(
        "SELECT {} FROM {}",
        column_list,
        qualified_table(project, dataset, table)
    );
    if let Some(f) = filter {
        sql.push_str(&format!(
            " WHERE {} = @tenant",
            quote_identifier(WarehouseKind::BigQuery, &f.column)
        ));
    }
    sql
}

/// One named query parameter for `jobs.query`
pub fn named_parameter(name: &str, value: &str) -> serde_json::Value {
    serde_json::json!({
        "name": name,
        "parameterType": {"type": "STRING"},
        "parameterValue": {"value": value},
    })
}

/// Render a converted value for a `tabledata.insertAll` row
pub fn insert_value(value: &Value) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Bool(b) => serde_json::json!(b),
        Value::Int64(i) => serde_json::json!(i),
        Value::Float64(f) => serde_json::json!(f),
        // NUMERIC accepts string literals without losing digits
        Value::Decimal(s) => serde_json::json!(s),
        Value::String(s) => serde_json::json!(s),
        Value::Date(d) => serde_json::json!(d.format("%Y-%m-%d").to_string()),
        Value::DateTime(ts) => serde_json::json!(ts.format("%Y-%m-%d %H:%M:%S%.f").to_string()),
        // JSON columns take the serialized text
        Value::Json(_) | Value::Array(_) => serde_json::json!(
            serde_json::to_value(value)
                .map(|v| v.to_string())
                .unwrap_or_default()
        ),
    }
}

/// Normalize one `jobs.query` result cell. Values arrive as strings, with
/// timestamps rendered as epoch seconds.
pub fn normalize_cell(canonical: CanonicalKind, cell: &serde_json::Value) -> serde_json::Value {
    let serde_json::Value::String(text) = cell else {
        return cell.clone();
    };
    if canonical == CanonicalKind::DateTime {
        if let Ok(epoch) = text.parse::<f64>() {
            let secs = epoch.trunc() as i64;
            let nanos = (epoch.fract() * 1e9) as u32;
            if let Some(ts) = chrono::DateTime::from_timestamp(secs, nanos) {
                return serde_json::Value::String(ts.format("%Y-%m-%dT%H:%M:%S%.f").to_string());
            }
        }
    }
    cell.clone()
}
