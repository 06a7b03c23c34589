//! Static type mapping between the canonical source vocabulary and each
//! destination dialect
//!
//! The canonical vocabulary is ClickHouse-flavored because the internal
//! warehouses this pipeline reads from report ClickHouse type tags. The
//! matrices are immutable after process start and shared read-only by all
//! jobs.

use crate::{ColumnDescriptor, WarehouseKind};

/// Canonical type family a source tag resolves to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CanonicalKind {
    Integer,
    Float,
    Decimal,
    Boolean,
    Text,
    Date,
    DateTime,
    Array,
    Json,
}

/// Strip one layer of a wrapper tag like `Nullable(String)`, returning the
/// inner tag if `tag` is wrapped in `wrapper`.
fn unwrap_one<'a>(tag: &'a str, wrapper: &str) -> Option<&'a str> {
    tag.strip_prefix(wrapper)?
        .strip_prefix('(')?
        .strip_suffix(')')
}

/// Recursively unwrap `Nullable(...)` and `LowCardinality(...)` wrappers.
pub fn unwrap_wrappers(tag: &str) -> &str {
    let mut current = tag.trim();
    loop {
        if let Some(inner) = unwrap_one(current, "Nullable") {
            current = inner.trim();
        } else if let Some(inner) = unwrap_one(current, "LowCardinality") {
            current = inner.trim();
        } else {
            return current;
        }
    }
}

/// Resolve a source type tag to its canonical family.
///
/// Unknown tags resolve to `Text`: the destination's closest generic
/// string type is the documented fallback.
pub fn canonical_kind(tag: &str) -> CanonicalKind {
    let base = unwrap_wrappers(tag);
    // Parameterized tags like `Decimal(38, 10)` match on the base name.
    let name = base.split('(').next().unwrap_or(base).trim();

    match name {
        "Int8" | "Int16" | "Int32" | "Int64" | "Int128" | "Int256" | "UInt8" | "UInt16"
        | "UInt32" | "UInt64" | "UInt128" | "UInt256" => CanonicalKind::Integer,
        "Float32" | "Float64" => CanonicalKind::Float,
        "Decimal" | "Decimal32" | "Decimal64" | "Decimal128" | "Decimal256" => {
            CanonicalKind::Decimal
        }
        "Bool" | "Boolean" => CanonicalKind::Boolean,
        "String" | "FixedString" | "UUID" | "IPv4" | "IPv6" | "Enum8" | "Enum16" => {
            CanonicalKind::Text
        }
        "Date" | "Date32" => CanonicalKind::Date,
        "DateTime" | "DateTime64" => CanonicalKind::DateTime,
        "Array" => CanonicalKind::Array,
        "Map" | "Tuple" | "Nested" | "JSON" | "Object" | "Variant" => CanonicalKind::Json,
        _ => CanonicalKind::Text,
    }
}

/// Whether a tag (after wrapper unwrapping) belongs to the recognized
/// source vocabulary. Unrecognized tags still map (to the text fallback)
/// but callers record a warning when coercing their values.
pub fn is_known_tag(tag: &str) -> bool {
    let base = unwrap_wrappers(tag);
    let name = base.split('(').next().unwrap_or(base).trim();
    matches!(
        name,
        "Int8"
            | "Int16"
            | "Int32"
            | "Int64"
            | "Int128"
            | "Int256"
            | "UInt8"
            | "UInt16"
            | "UInt32"
            | "UInt64"
            | "UInt128"
            | "UInt256"
            | "Float32"
            | "Float64"
            | "Decimal"
            | "Decimal32"
            | "Decimal64"
            | "Decimal128"
            | "Decimal256"
            | "Bool"
            | "Boolean"
            | "String"
            | "FixedString"
            | "UUID"
            | "IPv4"
            | "IPv6"
            | "Enum8"
            | "Enum16"
            | "Date"
            | "Date32"
            | "DateTime"
            | "DateTime64"
            | "Array"
            | "Map"
            | "Tuple"
            | "Nested"
            | "JSON"
            | "Object"
            | "Variant"
    )
}

/// Destination type name for a canonical family.
pub fn destination_type(kind: WarehouseKind, canonical: CanonicalKind) -> &'static str {
    match kind {
        WarehouseKind::Snowflake => match canonical {
            CanonicalKind::Integer => "NUMBER",
            CanonicalKind::Float => "FLOAT",
            CanonicalKind::Decimal => "NUMBER(38, 10)",
            CanonicalKind::Boolean => "BOOLEAN",
            CanonicalKind::Text => "VARCHAR",
            CanonicalKind::Date => "DATE",
            CanonicalKind::DateTime => "TIMESTAMP_NTZ",
            CanonicalKind::Array => "ARRAY",
            CanonicalKind::Json => "VARIANT",
        },
        WarehouseKind::BigQuery => match canonical {
            CanonicalKind::Integer => "INT64",
            CanonicalKind::Float => "FLOAT64",
            CanonicalKind::Decimal => "NUMERIC",
            CanonicalKind::Boolean => "BOOL",
            CanonicalKind::Text => "STRING",
            CanonicalKind::Date => "DATE",
            CanonicalKind::DateTime => "TIMESTAMP",
            CanonicalKind::Array => "JSON",
            CanonicalKind::Json => "JSON",
        },
        WarehouseKind::Redshift => match canonical {
            CanonicalKind::Integer => "BIGINT",
            CanonicalKind::Float => "DOUBLE PRECISION",
            CanonicalKind::Decimal => "DECIMAL(38, 10)",
            CanonicalKind::Boolean => "BOOLEAN",
            CanonicalKind::Text => "VARCHAR(65535)",
            CanonicalKind::Date => "DATE",
            CanonicalKind::DateTime => "TIMESTAMP",
            CanonicalKind::Array => "SUPER",
            CanonicalKind::Json => "SUPER",
        },
        WarehouseKind::ClickHouse => match canonical {
            CanonicalKind::Integer => "Int64",
            CanonicalKind::Float => "Float64",
            CanonicalKind::Decimal => "Decimal(38, 10)",
            CanonicalKind::Boolean => "Bool",
            CanonicalKind::Text => "String",
            CanonicalKind::Date => "Date",
            CanonicalKind::DateTime => "DateTime",
            CanonicalKind::Array => "String",
            CanonicalKind::Json => "String",
        },
        WarehouseKind::Postgres => match canonical {
            CanonicalKind::Integer => "BIGINT",
            CanonicalKind::Float => "DOUBLE PRECISION",
            CanonicalKind::Decimal => "NUMERIC",
            CanonicalKind::Boolean => "BOOLEAN",
            CanonicalKind::Text => "TEXT",
            CanonicalKind::Date => "DATE",
            CanonicalKind::DateTime => "TIMESTAMP",
            CanonicalKind::Array => "JSONB",
            CanonicalKind::Json => "JSONB",
        },
    }
}

/// Destination type name for a raw source tag.
pub fn mapped_type(kind: WarehouseKind, source_tag: &str) -> &'static str {
    destination_type(kind, canonical_kind(source_tag))
}

/// Generate the create-if-absent DDL for a destination table.
///
/// The format is fixed: destination tables created by this system must be
/// structurally interchangeable across deployments. Backends that require
/// trailing clauses (e.g. a ClickHouse ENGINE) append them after this text.
pub fn create_table_sql(kind: WarehouseKind, table: &str, columns: &[ColumnDescriptor]) -> String {
    let column_list = columns
        .iter()
        .map(|c| format!("{} {}", c.name, mapped_type(kind, &c.data_type)))
        .collect::<Vec<_>>()
        .join(", ");
    format!("CREATE TABLE IF NOT EXISTS {} ({})", table, column_list)
}

/// Quote an identifier for a destination dialect.
pub fn quote_identifier(kind: WarehouseKind, name: &str) -> String {
    match kind {
        WarehouseKind::ClickHouse | WarehouseKind::BigQuery => {
            format!("`{}`", name.replace('`', "``"))
        }
        _ => format!("\"{}\"", name.replace('"', "\"\"")),
    }
}
