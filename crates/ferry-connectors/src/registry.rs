//! Backend connector registry

use ferry_core::{WarehouseConnector, WarehouseKind};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Registry of available warehouse connectors, keyed by backend kind.
///
/// Built once at startup and shared read-only across all jobs.
#[derive(Default)]
pub struct ConnectorRegistry {
    connectors: HashMap<WarehouseKind, Arc<dyn WarehouseConnector>>,
}

impl ConnectorRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry with all compiled-in backends registered
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();

        #[cfg(feature = "clickhouse")]
        registry.register(Arc::new(
            ferry_connector_clickhouse::ClickHouseConnector::new(),
        ));

        #[cfg(feature = "postgres")]
        {
            registry.register(Arc::new(ferry_connector_postgres::PostgresConnector::new()));
            registry.register(Arc::new(ferry_connector_postgres::RedshiftConnector::new()));
        }

        #[cfg(feature = "snowflake")]
        registry.register(Arc::new(ferry_connector_snowflake::SnowflakeConnector::new()));

        #[cfg(feature = "bigquery")]
        registry.register(Arc::new(ferry_connector_bigquery::BigQueryConnector::new()));

        registry
    }

    /// Register a connector, replacing any existing one for the same kind
    pub fn register(&mut self, connector: Arc<dyn WarehouseConnector>) {
        let kind = connector.kind();
        debug!(backend = %kind, "registering connector");
        self.connectors.insert(kind, connector);
    }

    /// Get a connector by backend kind
    pub fn get(&self, kind: WarehouseKind) -> Option<Arc<dyn WarehouseConnector>> {
        self.connectors.get(&kind).cloned()
    }

    /// Check if a backend is registered
    pub fn has(&self, kind: WarehouseKind) -> bool {
        self.connectors.contains_key(&kind)
    }

    /// List registered backend kinds
    pub fn list(&self) -> Vec<WarehouseKind> {
        let mut kinds: Vec<_> = self.connectors.keys().copied().collect();
        kinds.sort_by_key(|k| k.as_str());
        kinds
    }
}

impl std::fmt::Debug for ConnectorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectorRegistry")
            .field("backends", &self.list())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_registry() {
        let registry = ConnectorRegistry::new();
        assert!(!registry.has(WarehouseKind::Postgres));
        assert!(registry.get(WarehouseKind::ClickHouse).is_none());
        assert!(registry.list().is_empty());
    }

    #[cfg(feature = "all-backends")]
    #[test]
    fn test_defaults_cover_every_kind() {
        let registry = ConnectorRegistry::with_defaults();
        for kind in [
            WarehouseKind::Snowflake,
            WarehouseKind::BigQuery,
            WarehouseKind::Redshift,
            WarehouseKind::ClickHouse,
            WarehouseKind::Postgres,
        ] {
            assert!(registry.has(kind), "missing connector for {}", kind);
        }
    }
}
