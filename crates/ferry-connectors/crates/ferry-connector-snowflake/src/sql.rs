//! SQL text and value shaping for the Snowflake SQL API

use ferry_core::{
    CanonicalKind, ColumnDescriptor, TenancyFilter, Value, WarehouseKind, canonical_kind,
    primary_key_columns, quote_identifier,
};

/// Map a `DESCRIBE TABLE` type onto the canonical source vocabulary.
pub fn canonical_tag(sf_type: &str) -> String {
    let upper = sf_type.to_uppercase();
    let base = upper.split('(').next().unwrap_or(&upper).trim().to_string();
    let tag = match base.as_str() {
        "NUMBER" | "DECIMAL" | "NUMERIC" => {
            // NUMBER(p, 0) is integral; anything scaled is a decimal
            if upper.contains(",") && !upper.contains(", 0)") && !upper.contains(",0)") {
                "Decimal(38, 10)"
            } else {
                "Int64"
            }
        }
        "INT" | "INTEGER" | "BIGINT" | "SMALLINT" | "TINYINT" | "BYTEINT" => "Int64",
        "FLOAT" | "FLOAT4" | "FLOAT8" | "DOUBLE" | "REAL" => "Float64",
        "BOOLEAN" => "Bool",
        "DATE" => "Date",
        "DATETIME" | "TIMESTAMP" | "TIMESTAMP_NTZ" | "TIMESTAMP_LTZ" | "TIMESTAMP_TZ" => {
            "DateTime"
        }
        "ARRAY" => "Array(String)",
        "VARIANT" | "OBJECT" => "JSON",
        "VARCHAR" | "CHAR" | "CHARACTER" | "STRING" | "TEXT" => "String",
        _ => return sf_type.to_string(),
    };
    tag.to_string()
}

/// Quote a possibly schema-qualified table name part by part
pub fn quote_table(table: &str) -> String {
    table
        .split('.')
        .map(|part| quote_identifier(WarehouseKind::Snowflake, part))
        .collect::<Vec<_>>()
        .join(".")
}

/// Build the streaming SELECT. The tenancy value binds as `?`.
pub fn select_sql(
    table: &str,
    columns: &[ColumnDescriptor],
    filter: Option<&TenancyFilter>,
) -> String {
    let column_list = columns
        .iter()
        .map(|c| quote_identifier(WarehouseKind::Snowflake, &c.name))
        .collect::<Vec<_>>()
        .join(", ");
    let mut sql = format!("SELECT {} FROM {}", column_list, quote_table(table));
    if let Some(f) = filter {
        sql.push_str(&format!(
            " WHERE {} = ?",
            quote_identifier(WarehouseKind::Snowflake, &f.column)
        ));
    }
    sql
}

/// Source expression for one column of the staged VALUES alias,
/// reparsing structured values that travelled as text.
fn staged_expr(alias: &str, column: &ColumnDescriptor) -> String {
    let quoted = quote_identifier(WarehouseKind::Snowflake, &column.name);
    match canonical_kind(&column.data_type) {
        CanonicalKind::Array | CanonicalKind::Json => {
            format!("PARSE_JSON({}.{})", alias, quoted)
        }
        _ => format!("{}.{}", alias, quoted),
    }
}

/// Build the batch write statement.
///
/// With a primary key this is a `MERGE INTO ... USING (VALUES ...)`
/// upsert; without one it is a plain multi-row INSERT. All values bind as
/// `?` placeholders.
pub fn write_sql(table: &str, columns: &[ColumnDescriptor], row_count: usize) -> String {
    let quoted: Vec<String> = columns
        .iter()
        .map(|c| quote_identifier(WarehouseKind::Snowflake, &c.name))
        .collect();
    let placeholder_row = format!("({})", vec!["?"; columns.len()].join(", "));
    let values = vec![placeholder_row; row_count].join(", ");

    let staged = columns
        .iter()
        .map(|c| staged_expr("s", c))
        .collect::<Vec<_>>()
        .join(", ");

    let pk = primary_key_columns(columns);
    if pk.is_empty() {
        return format!(
            "INSERT INTO {} ({}) SELECT {} FROM (SELECT * FROM VALUES {}) AS s ({})",
            quote_table(table),
            quoted.join(", "),
            staged,
            values,
            quoted.join(", ")
        );
    }

    let on = pk
        .iter()
        .map(|name| {
            let q = quote_identifier(WarehouseKind::Snowflake, name);
            format!("t.{} = s.{}", q, q)
        })
        .collect::<Vec<_>>()
        .join(" AND ");
    let updates = columns
        .iter()
        .filter(|c| !c.is_primary_key)
        .map(|c| {
            let q = quote_identifier(WarehouseKind::Snowflake, &c.name);
            format!("t.{} = {}", q, staged_expr("s", c))
        })
        .collect::<Vec<_>>()
        .join(", ");
    let mut sql = format!(
        "MERGE INTO {} AS t USING (SELECT * FROM VALUES {}) AS s ({}) ON {}",
        quote_table(table),
        values,
        quoted.join(", "),
        on
    );
    if !updates.is_empty() {
        sql.push_str(&format!(" WHEN MATCHED THEN UPDATE SET {}", updates));
    }
    sql.push_str(&format!(
        " WHEN NOT MATCHED THEN INSERT ({}) VALUES ({})",
        quoted.join(", "),
        staged
    ));
    sql
}

/// SQL API binding type for a converted value
pub fn binding_type(value: &Value) -> &'static str {
    match value {
        Value::Bool(_) => "BOOLEAN",
        Value::Int64(_) => "FIXED",
        Value::Float64(_) => "REAL",
        _ => "TEXT",
    }
}

/// SQL API binding value: everything is a string on the wire, nulls bind
/// as JSON null.
pub fn binding_value(value: &Value) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Bool(b) => serde_json::Value::String(b.to_string()),
        Value::Int64(i) => serde_json::Value::String(i.to_string()),
        Value::Float64(f) => serde_json::Value::String(f.to_string()),
        Value::Decimal(s) => serde_json::Value::String(s.clone()),
        Value::String(s) => serde_json::Value::String(s.clone()),
        Value::Date(d) => serde_json::Value::String(d.format("%Y-%m-%d").to_string()),
        Value::DateTime(ts) => {
            serde_json::Value::String(ts.format("%Y-%m-%dT%H:%M:%S%.f").to_string())
        }
        Value::Json(_) | Value::Array(_) => serde_json::Value::String(
            serde_json::to_value(value)
                .map(|v| v.to_string())
                .unwrap_or_default(),
        ),
    }
}

/// Normalize one result-set cell. The SQL API renders everything as text,
/// with dates as epoch days and timestamps as epoch seconds.
pub fn normalize_cell(canonical: CanonicalKind, cell: &serde_json::Value) -> serde_json::Value {
    let serde_json::Value::String(text) = cell else {
        return cell.clone();
    };
    match canonical {
        CanonicalKind::Date => {
            if let Ok(days) = text.parse::<i64>() {
                if let Some(ts) = chrono::DateTime::from_timestamp(days * 86_400, 0) {
                    return serde_json::Value::String(ts.format("%Y-%m-%d").to_string());
                }
            }
            cell.clone()
        }
        CanonicalKind::DateTime => {
            if let Ok(epoch) = text.parse::<f64>() {
                let secs = epoch.trunc() as i64;
                let nanos = (epoch.fract() * 1e9) as u32;
                if let Some(ts) = chrono::DateTime::from_timestamp(secs, nanos) {
                    return serde_json::Value::String(
                        ts.format("%Y-%m-%dT%H:%M:%S%.f").to_string(),
                    );
                }
            }
            cell.clone()
        }
        _ => cell.clone(),
    }
}
