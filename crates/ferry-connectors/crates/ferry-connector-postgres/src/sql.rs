//! SQL text builders for the postgres wire backends
//!
//! Identifier text is quoted; values always travel as bind parameters.

use ferry_core::{
    CanonicalKind, ColumnDescriptor, TenancyFilter, WarehouseKind, canonical_kind,
    primary_key_columns, quote_identifier,
};

/// Map an `information_schema.columns.data_type` value onto the canonical
/// source vocabulary.
pub fn canonical_tag(pg_type: &str) -> String {
    let tag = match pg_type.to_lowercase().as_str() {
        "smallint" | "int2" => "Int16",
        "integer" | "int4" => "Int32",
        "bigint" | "int8" => "Int64",
        "real" | "float4" => "Float32",
        "double precision" | "float8" => "Float64",
        "numeric" | "decimal" => "Decimal(38, 10)",
        "boolean" | "bool" => "Bool",
        "uuid" => "UUID",
        "date" => "Date",
        "timestamp without time zone" | "timestamp with time zone" | "timestamp" => "DateTime",
        "json" | "jsonb" => "JSON",
        "array" => "Array(String)",
        "text" | "character varying" | "character" | "varchar" | "char" | "name" => "String",
        // Everything else flows through the text fallback downstream
        other => return other.to_string(),
    };
    tag.to_string()
}

/// Split a possibly schema-qualified table name into (schema, table)
pub fn split_table<'a>(table: &'a str, default_schema: &'a str) -> (&'a str, &'a str) {
    match table.split_once('.') {
        Some((schema, tbl)) => (schema, tbl),
        None => (default_schema, table),
    }
}

/// Quote a possibly schema-qualified table name part by part
pub fn quote_table(kind: WarehouseKind, table: &str) -> String {
    table
        .split('.')
        .map(|part| quote_identifier(kind, part))
        .collect::<Vec<_>>()
        .join(".")
}

/// Column list + primary-key introspection query.
///
/// `$1` = schema, `$2` = table.
pub const INTROSPECT_SQL: &str = "SELECT c.column_name, c.data_type, \
    (pk.column_name IS NOT NULL) AS is_primary_key \
    FROM information_schema.columns c \
    LEFT JOIN ( \
        SELECT kcu.column_name \
        FROM information_schema.table_constraints tc \
        JOIN information_schema.key_column_usage kcu \
            ON tc.constraint_name = kcu.constraint_name \
            AND tc.table_schema = kcu.table_schema \
        WHERE tc.constraint_type = 'PRIMARY KEY' \
            AND tc.table_schema = $1 AND tc.table_name = $2 \
    ) pk ON pk.column_name = c.column_name \
    WHERE c.table_schema = $1 AND c.table_name = $2 \
    ORDER BY c.ordinal_position";

/// Build the streaming SELECT.
///
/// Every column is read back as text: Postgres renders through
/// `to_jsonb(..)::text` so values parse straight into JSON, except
/// decimals which stay `::text` to keep their digits. Redshift has no
/// `to_jsonb`, so everything casts to VARCHAR and the converter parses.
pub fn select_sql(
    kind: WarehouseKind,
    table: &str,
    columns: &[ColumnDescriptor],
    filter: Option<&TenancyFilter>,
) -> String {
    let select_list = columns
        .iter()
        .map(|c| {
            let quoted = quote_identifier(kind, &c.name);
            match (kind, canonical_kind(&c.data_type)) {
                (WarehouseKind::Redshift, _) => {
                    format!("CAST({} AS VARCHAR(65535)) AS {}", quoted, quoted)
                }
                (_, CanonicalKind::Decimal) => format!("{}::text AS {}", quoted, quoted),
                _ => format!("to_jsonb({})::text AS {}", quoted, quoted),
            }
        })
        .collect::<Vec<_>>()
        .join(", ");

    let mut sql = format!("SELECT {} FROM {}", select_list, quote_table(kind, table));
    if let Some(f) = filter {
        sql.push_str(&format!(" WHERE {} = $1", quote_identifier(kind, &f.column)));
    }
    sql
}

/// Placeholder expression for one bind position, decorated where the
/// destination type needs a cast from the wire representation.
fn placeholder(kind: WarehouseKind, canonical: CanonicalKind, position: usize) -> String {
    match (kind, canonical) {
        (WarehouseKind::Redshift, CanonicalKind::Decimal) => {
            format!("CAST(CAST(${} AS VARCHAR(65535)) AS DECIMAL(38, 10))", position)
        }
        (WarehouseKind::Redshift, CanonicalKind::Array | CanonicalKind::Json) => {
            format!("JSON_PARSE(CAST(${} AS VARCHAR(65535)))", position)
        }
        (_, CanonicalKind::Decimal) => format!("${}::text::numeric", position),
        _ => format!("${}", position),
    }
}

/// Build the multi-row INSERT, with an `ON CONFLICT` merge clause on
/// Postgres when the table has a primary key. Placeholders are numbered
/// globally across rows.
pub fn insert_sql(
    kind: WarehouseKind,
    table: &str,
    columns: &[ColumnDescriptor],
    row_count: usize,
) -> String {
    let column_list = columns
        .iter()
        .map(|c| quote_identifier(kind, &c.name))
        .collect::<Vec<_>>()
        .join(", ");

    let mut position = 0usize;
    let rows_sql = (0..row_count)
        .map(|_| {
            let row = columns
                .iter()
                .map(|c| {
                    position += 1;
                    placeholder(kind, canonical_kind(&c.data_type), position)
                })
                .collect::<Vec<_>>()
                .join(", ");
            format!("({})", row)
        })
        .collect::<Vec<_>>()
        .join(", ");

    let mut sql = format!(
        "INSERT INTO {} ({}) VALUES {}",
        quote_table(kind, table),
        column_list,
        rows_sql
    );

    if kind == WarehouseKind::Postgres {
        let pk: Vec<String> = primary_key_columns(columns)
            .into_iter()
            .map(|name| quote_identifier(kind, name))
            .collect();
        if !pk.is_empty() {
            let updates = columns
                .iter()
                .filter(|c| !c.is_primary_key)
                .map(|c| {
                    let quoted = quote_identifier(kind, &c.name);
                    format!("{} = EXCLUDED.{}", quoted, quoted)
                })
                .collect::<Vec<_>>()
                .join(", ");
            if updates.is_empty() {
                sql.push_str(&format!(" ON CONFLICT ({}) DO NOTHING", pk.join(", ")));
            } else {
                sql.push_str(&format!(
                    " ON CONFLICT ({}) DO UPDATE SET {}",
                    pk.join(", "),
                    updates
                ));
            }
        }
    }

    sql
}

/// Turn one text-rendered column value back into a raw JSON value for the
/// converter.
pub fn raw_from_text(
    kind: WarehouseKind,
    canonical: CanonicalKind,
    text: Option<String>,
) -> serde_json::Value {
    let Some(text) = text else {
        return serde_json::Value::Null;
    };
    match kind {
        // VARCHAR-rendered; the converter parses by column tag
        WarehouseKind::Redshift => serde_json::Value::String(text),
        _ => match canonical {
            CanonicalKind::Decimal => serde_json::Value::String(text),
            _ => serde_json::from_str(&text).unwrap_or(serde_json::Value::String(text)),
        },
    }
}
