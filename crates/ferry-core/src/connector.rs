//! Warehouse connector traits
//!
//! The uniform open/introspect/stream/ensure-table/write-batch/close
//! contract every backend implements. Backends differ in wire protocol and
//! SQL dialect; everything above this seam is backend-agnostic.

use crate::{ColumnDescriptor, CredentialRecord, Result, Row};
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// The enumerated warehouse backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarehouseKind {
    Snowflake,
    BigQuery,
    Redshift,
    ClickHouse,
    Postgres,
}

impl WarehouseKind {
    /// Stable identifier used in job payloads and registry lookups
    pub fn as_str(&self) -> &'static str {
        match self {
            WarehouseKind::Snowflake => "snowflake",
            WarehouseKind::BigQuery => "bigquery",
            WarehouseKind::Redshift => "redshift",
            WarehouseKind::ClickHouse => "clickhouse",
            WarehouseKind::Postgres => "postgres",
        }
    }

    /// Parse a payload identifier
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "snowflake" => Some(WarehouseKind::Snowflake),
            "bigquery" => Some(WarehouseKind::BigQuery),
            "redshift" => Some(WarehouseKind::Redshift),
            "clickhouse" => Some(WarehouseKind::ClickHouse),
            "postgres" | "postgresql" => Some(WarehouseKind::Postgres),
            _ => None,
        }
    }

    /// Whether the backend can merge by primary key.
    ///
    /// Append-only backends are not idempotent under retry; that is an
    /// accepted limitation of those destinations, not worked around here.
    pub fn supports_upsert(&self) -> bool {
        matches!(
            self,
            WarehouseKind::Snowflake | WarehouseKind::ClickHouse | WarehouseKind::Postgres
        )
    }
}

impl std::fmt::Display for WarehouseKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Optional column+value restriction scoping a sync to one tenant's rows.
///
/// Always applied with parameterized binding, never inlined into SQL text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenancyFilter {
    pub column: String,
    pub value: String,
}

/// One raw extracted row: positional against the introspected column order
pub type RawRow = Vec<serde_json::Value>;

/// Lazy sequence of raw row chunks from a source read.
///
/// Not restartable mid-stream; re-querying is the only way to restart.
pub type RowStream = BoxStream<'static, Result<Vec<RawRow>>>;

/// Factory for connections to one warehouse backend
#[async_trait]
pub trait WarehouseConnector: Send + Sync {
    /// The backend this connector serves
    fn kind(&self) -> WarehouseKind;

    /// Open a connection. Fails with `FerryError::Connection` on auth or
    /// network failure (retryable).
    async fn connect(&self, credentials: &CredentialRecord)
    -> Result<Arc<dyn WarehouseConnection>>;

    /// Open and probe a connection, then discard it
    async fn test_connection(&self, credentials: &CredentialRecord) -> Result<()> {
        let conn = self.connect(credentials).await?;
        conn.close().await
    }
}

/// An open handle to a warehouse backend.
///
/// Owned exclusively by the job that opened it; must be closed on every
/// exit path. `close` is idempotent and safe even if the connection never
/// fully opened.
#[async_trait]
pub trait WarehouseConnection: Send + Sync {
    /// The backend this connection talks to
    fn kind(&self) -> WarehouseKind;

    /// List the table's columns in catalog order with primary-key flags.
    ///
    /// Zero columns is `FerryError::SchemaIntrospection` (fatal, not
    /// retryable: it indicates a configuration error).
    async fn introspect(&self, table: &str) -> Result<Vec<ColumnDescriptor>>;

    /// Open a streaming read of the table, restricted by the tenancy
    /// filter when present. Values arrive positionally in `columns` order.
    async fn stream_table(
        &self,
        table: &str,
        columns: &[ColumnDescriptor],
        filter: Option<&TenancyFilter>,
    ) -> Result<RowStream>;

    /// Create the destination table if absent, deriving column types from
    /// the type mapping table. No-op when the table already exists; exact
    /// DDL diffing is out of scope.
    async fn ensure_table(&self, table: &str, columns: &[ColumnDescriptor]) -> Result<()>;

    /// Write a batch of converted rows: merge-by-primary-key where the
    /// backend supports it, append-only otherwise. All-or-nothing per
    /// batch; a partial failure surfaces as `FerryError::BatchWrite` for
    /// the whole batch.
    async fn write_batch(
        &self,
        table: &str,
        columns: &[ColumnDescriptor],
        rows: &[Row],
    ) -> Result<()>;

    /// Release backend resources. Idempotent.
    async fn close(&self) -> Result<()>;

    /// Check if the connection is closed
    fn is_closed(&self) -> bool;
}
