//! Unit tests for the ClickHouse connector

use super::*;
use crate::connector::{bind_param, build_connection_url, parse_json_lines, quote_table, split_table};
use ferry_core::{Value, WarehouseConnector, WarehouseKind};

mod connector_metadata_tests {
    use super::*;

    #[test]
    fn test_kind() {
        let connector = ClickHouseConnector::new();
        assert_eq!(connector.kind(), WarehouseKind::ClickHouse);
    }

    #[test]
    fn test_default() {
        let connector = ClickHouseConnector::default();
        assert_eq!(connector.kind(), WarehouseKind::ClickHouse);
    }
}

mod url_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_plain_http() {
        assert_eq!(
            build_connection_url("localhost", 8123, false),
            "http://localhost:8123"
        );
    }

    #[test]
    fn test_ssl() {
        assert_eq!(
            build_connection_url("ch.internal", 8443, true),
            "https://ch.internal:8443"
        );
    }

    #[test]
    fn test_url_carries_no_credentials() {
        let url = build_connection_url("host", 8123, false);
        assert!(!url.contains('@'));
    }
}

mod table_name_tests {
    use super::*;

    #[test]
    fn test_split_unqualified_uses_default_db() {
        assert_eq!(split_table("events", "analytics"), ("analytics", "events"));
    }

    #[test]
    fn test_split_qualified() {
        assert_eq!(split_table("raw.events", "analytics"), ("raw", "events"));
    }

    #[test]
    fn test_quote_table() {
        assert_eq!(quote_table("events"), "`events`");
        assert_eq!(quote_table("raw.events"), "`raw`.`events`");
    }
}

mod json_lines_tests {
    use super::*;

    fn names() -> Vec<String> {
        vec!["id".to_string(), "name".to_string()]
    }

    #[test]
    fn test_rows_are_positional() {
        let content = "{\"name\":\"a\",\"id\":1}\n{\"id\":2,\"name\":\"b\"}";
        let rows = parse_json_lines(content, &names());
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0], vec![serde_json::json!(1), serde_json::json!("a")]);
        assert_eq!(rows[1], vec![serde_json::json!(2), serde_json::json!("b")]);
    }

    #[test]
    fn test_missing_column_becomes_null() {
        let rows = parse_json_lines("{\"id\":1}", &names());
        assert_eq!(rows[0][1], serde_json::Value::Null);
    }

    #[test]
    fn test_blank_and_broken_lines_skipped() {
        let content = "\n{\"id\":1,\"name\":\"a\"}\nnot json\n   \n";
        let rows = parse_json_lines(content, &names());
        assert_eq!(rows.len(), 1);
    }
}

mod bind_tests {
    use super::*;

    #[test]
    fn test_scalars_bind_as_themselves() {
        assert_eq!(bind_param(&Value::Int64(5)), serde_json::json!(5));
        assert_eq!(bind_param(&Value::Bool(true)), serde_json::json!(true));
        assert_eq!(bind_param(&Value::Null), serde_json::Value::Null);
        assert_eq!(
            bind_param(&Value::String("x".into())),
            serde_json::json!("x")
        );
    }

    #[test]
    fn test_structured_values_bind_as_json_text() {
        let json = Value::Json(serde_json::json!({"a": 1}));
        assert_eq!(bind_param(&json), serde_json::json!("{\"a\":1}"));

        let array = Value::Array(vec![Value::Int64(1), Value::Int64(2)]);
        assert_eq!(bind_param(&array), serde_json::json!("[1,2]"));
    }
}
