//! Introspected schema metadata

use serde::{Deserialize, Serialize};

/// Schema metadata for one source column.
///
/// Produced once per job by introspection, read-only afterward. The order
/// in which descriptors are returned is the catalog order and defines the
/// positional mapping used for every row in the job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    /// Column name, unique within a table
    pub name: String,
    /// Canonical source type tag as reported by the catalog
    /// (e.g. `Int32`, `Nullable(String)`)
    pub data_type: String,
    /// Whether the column is part of the primary key
    pub is_primary_key: bool,
}

impl ColumnDescriptor {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            is_primary_key: false,
        }
    }

    pub fn primary_key(mut self) -> Self {
        self.is_primary_key = true;
        self
    }
}

/// Names of the primary-key columns, in catalog order.
pub fn primary_key_columns(columns: &[ColumnDescriptor]) -> Vec<&str> {
    columns
        .iter()
        .filter(|c| c.is_primary_key)
        .map(|c| c.name.as_str())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primary_key_columns_preserve_order() {
        let columns = vec![
            ColumnDescriptor::new("tenant", "String").primary_key(),
            ColumnDescriptor::new("name", "String"),
            ColumnDescriptor::new("id", "Int32").primary_key(),
        ];
        assert_eq!(primary_key_columns(&columns), vec!["tenant", "id"]);
    }

    #[test]
    fn test_no_primary_key() {
        let columns = vec![ColumnDescriptor::new("a", "String")];
        assert!(primary_key_columns(&columns).is_empty());
    }
}
