//! Unit tests for the Snowflake connector

use super::*;
use crate::connector::account_base_url;
use ferry_core::{CanonicalKind, ColumnDescriptor, TenancyFilter, Value, WarehouseConnector, WarehouseKind};

fn orders() -> Vec<ColumnDescriptor> {
    vec![
        ColumnDescriptor::new("id", "Int64").primary_key(),
        ColumnDescriptor::new("name", "Nullable(String)"),
        ColumnDescriptor::new("payload", "JSON"),
    ]
}

mod connector_metadata_tests {
    use super::*;

    #[test]
    fn test_kind() {
        assert_eq!(SnowflakeConnector::new().kind(), WarehouseKind::Snowflake);
    }
}

mod url_tests {
    use super::*;

    #[test]
    fn test_bare_account_expands() {
        assert_eq!(
            account_base_url("xy12345"),
            "https://xy12345.snowflakecomputing.com"
        );
    }

    #[test]
    fn test_full_host_kept() {
        assert_eq!(
            account_base_url("xy12345.eu-central-1.snowflakecomputing.com"),
            "https://xy12345.eu-central-1.snowflakecomputing.com"
        );
        assert_eq!(
            account_base_url("https://xy12345.snowflakecomputing.com/"),
            "https://xy12345.snowflakecomputing.com"
        );
    }
}

mod type_tag_tests {
    use super::*;

    #[test]
    fn test_describe_types_map_to_canonical_tags() {
        assert_eq!(canonical_tag("NUMBER(38,0)"), "Int64");
        assert_eq!(canonical_tag("NUMBER(10,2)"), "Decimal(38, 10)");
        assert_eq!(canonical_tag("FLOAT"), "Float64");
        assert_eq!(canonical_tag("VARCHAR(16777216)"), "String");
        assert_eq!(canonical_tag("BOOLEAN"), "Bool");
        assert_eq!(canonical_tag("DATE"), "Date");
        assert_eq!(canonical_tag("TIMESTAMP_NTZ(9)"), "DateTime");
        assert_eq!(canonical_tag("VARIANT"), "JSON");
        assert_eq!(canonical_tag("ARRAY"), "Array(String)");
    }

    #[test]
    fn test_unknown_type_passes_through() {
        assert_eq!(canonical_tag("GEOGRAPHY"), "GEOGRAPHY");
    }
}

mod select_sql_tests {
    use super::*;

    #[test]
    fn test_plain_select() {
        assert_eq!(
            select_sql("orders", &orders(), None),
            "SELECT \"id\", \"name\", \"payload\" FROM \"orders\""
        );
    }

    #[test]
    fn test_filter_binds_as_placeholder() {
        let filter = TenancyFilter {
            column: "tenant_id".into(),
            value: "t-42".into(),
        };
        let sql = select_sql("orders", &orders(), Some(&filter));
        assert!(sql.ends_with(" WHERE \"tenant_id\" = ?"));
        assert!(!sql.contains("t-42"));
    }
}

mod write_sql_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_merge_on_primary_key() {
        let sql = write_sql("orders", &orders(), 2);
        assert!(sql.starts_with("MERGE INTO \"orders\" AS t USING (SELECT * FROM VALUES (?, ?, ?), (?, ?, ?)) AS s (\"id\", \"name\", \"payload\")"));
        assert!(sql.contains("ON t.\"id\" = s.\"id\""));
        assert!(sql.contains(
            "WHEN MATCHED THEN UPDATE SET t.\"name\" = s.\"name\", \
             t.\"payload\" = PARSE_JSON(s.\"payload\")"
        ));
        assert!(sql.contains("WHEN NOT MATCHED THEN INSERT (\"id\", \"name\", \"payload\")"));
    }

    #[test]
    fn test_append_without_primary_key() {
        let columns = vec![
            ColumnDescriptor::new("value", "Int64"),
            ColumnDescriptor::new("payload", "JSON"),
        ];
        let sql = write_sql("events", &columns, 1);
        assert!(sql.starts_with("INSERT INTO \"events\""));
        assert!(!sql.contains("MERGE"));
        assert!(sql.contains("PARSE_JSON(s.\"payload\")"));
    }
}

mod binding_tests {
    use super::*;

    #[test]
    fn test_binding_types() {
        assert_eq!(binding_type(&Value::Int64(1)), "FIXED");
        assert_eq!(binding_type(&Value::Float64(1.5)), "REAL");
        assert_eq!(binding_type(&Value::Bool(true)), "BOOLEAN");
        assert_eq!(binding_type(&Value::String("x".into())), "TEXT");
        assert_eq!(binding_type(&Value::Decimal("1.5".into())), "TEXT");
        assert_eq!(binding_type(&Value::Null), "TEXT");
    }

    #[test]
    fn test_binding_values_are_strings_or_null() {
        assert_eq!(binding_value(&Value::Null), serde_json::Value::Null);
        assert_eq!(binding_value(&Value::Int64(7)), serde_json::json!("7"));
        assert_eq!(
            binding_value(&Value::Decimal("19.9900".into())),
            serde_json::json!("19.9900")
        );
        let date = chrono::NaiveDate::from_ymd_opt(2024, 3, 9).unwrap();
        assert_eq!(binding_value(&Value::Date(date)), serde_json::json!("2024-03-09"));
        assert_eq!(
            binding_value(&Value::Json(serde_json::json!({"a": 1}))),
            serde_json::json!("{\"a\":1}")
        );
    }
}

mod normalize_tests {
    use super::*;

    #[test]
    fn test_epoch_days_become_dates() {
        let cell = serde_json::json!("19791");
        assert_eq!(
            normalize_cell(CanonicalKind::Date, &cell),
            serde_json::json!("2024-03-09")
        );
    }

    #[test]
    fn test_epoch_seconds_become_timestamps() {
        let cell = serde_json::json!("1709992205");
        let normalized = normalize_cell(CanonicalKind::DateTime, &cell);
        let text = normalized.as_str().unwrap();
        assert!(text.starts_with("2024-03-09T"));
    }

    #[test]
    fn test_other_kinds_untouched() {
        let cell = serde_json::json!("42");
        assert_eq!(normalize_cell(CanonicalKind::Integer, &cell), cell);
        let non_string = serde_json::json!(42);
        assert_eq!(normalize_cell(CanonicalKind::Date, &non_string), non_string);
    }
}
