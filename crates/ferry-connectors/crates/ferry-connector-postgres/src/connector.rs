//! Postgres wire connector implementation

use crate::{
    INTROSPECT_SQL, PgParam, canonical_tag, pg_param, raw_from_text, select_sql, split_table,
};
use async_trait::async_trait;
use ferry_core::{
    CanonicalKind, ColumnDescriptor, CredentialRecord, FerryError, Result, Row, RowStream,
    TenancyFilter, Value, WarehouseConnection, WarehouseConnector, WarehouseKind, canonical_kind,
    create_table_sql,
};
use futures::TryStreamExt;
use postgres_native_tls::MakeTlsConnector;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio_postgres::NoTls;
use tokio_postgres::types::ToSql;

/// Rows per chunk handed to the engine from a streaming read
const STREAM_CHUNK_SIZE: usize = 500;

/// PostgreSQL warehouse connector
pub struct PostgresConnector;

impl PostgresConnector {
    pub fn new() -> Self {
        tracing::debug!("Postgres connector initialized");
        Self
    }
}

impl Default for PostgresConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WarehouseConnector for PostgresConnector {
    fn kind(&self) -> WarehouseKind {
        WarehouseKind::Postgres
    }

    #[tracing::instrument(skip(self, credentials), fields(host = %credentials.host))]
    async fn connect(
        &self,
        credentials: &CredentialRecord,
    ) -> Result<Arc<dyn WarehouseConnection>> {
        open_connection(WarehouseKind::Postgres, credentials, 5432).await
    }
}

/// Amazon Redshift warehouse connector.
///
/// Redshift speaks the postgres protocol but has no `ON CONFLICT`, so it
/// is an append-only destination: retried batches can duplicate rows.
pub struct RedshiftConnector;

impl RedshiftConnector {
    pub fn new() -> Self {
        tracing::debug!("Redshift connector initialized");
        Self
    }
}

impl Default for RedshiftConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WarehouseConnector for RedshiftConnector {
    fn kind(&self) -> WarehouseKind {
        WarehouseKind::Redshift
    }

    #[tracing::instrument(skip(self, credentials), fields(host = %credentials.host))]
    async fn connect(
        &self,
        credentials: &CredentialRecord,
    ) -> Result<Arc<dyn WarehouseConnection>> {
        open_connection(WarehouseKind::Redshift, credentials, 5439).await
    }
}

async fn open_connection(
    kind: WarehouseKind,
    credentials: &CredentialRecord,
    default_port: u16,
) -> Result<Arc<dyn WarehouseConnection>> {
    tracing::debug!(backend = %kind, "connecting");

    let mut config = tokio_postgres::Config::new();
    config.host(if credentials.host.is_empty() {
        "localhost"
    } else {
        &credentials.host
    });
    config.port(if credentials.port > 0 {
        credentials.port
    } else {
        default_port
    });
    if let Some(user) = credentials.username.as_deref().filter(|s| !s.is_empty()) {
        config.user(user);
    }
    if let Some(password) = credentials.password.as_deref() {
        config.password(password);
    }
    if let Some(database) = credentials.database.as_deref().filter(|s| !s.is_empty()) {
        config.dbname(database);
    }

    let use_ssl = credentials
        .params
        .get("ssl")
        .map(|s| s == "true" || s == "1" || s == "require")
        .unwrap_or(kind == WarehouseKind::Redshift);

    let (client, driver) = if use_ssl {
        let tls = native_tls::TlsConnector::builder()
            .build()
            .map_err(|e| FerryError::Connection(format!("TLS setup failed: {}", e)))?;
        let (client, connection) = config
            .connect(MakeTlsConnector::new(tls))
            .await
            .map_err(|e| FerryError::Connection(format!("failed to connect: {}", e)))?;
        let driver = tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::warn!(error = %e, "connection driver exited");
            }
        });
        (client, driver)
    } else {
        let (client, connection) = config
            .connect(NoTls)
            .await
            .map_err(|e| FerryError::Connection(format!("failed to connect: {}", e)))?;
        let driver = tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::warn!(error = %e, "connection driver exited");
            }
        });
        (client, driver)
    };

    // Probe before handing the connection out
    client
        .simple_query("SELECT 1")
        .await
        .map_err(|e| FerryError::Connection(format!("connection probe failed: {}", e)))?;

    tracing::debug!(backend = %kind, "connection established");
    Ok(Arc::new(PostgresConnection {
        client,
        kind,
        driver,
        closed: AtomicBool::new(false),
    }))
}

pub struct PostgresConnection {
    client: tokio_postgres::Client,
    kind: WarehouseKind,
    driver: tokio::task::JoinHandle<()>,
    closed: AtomicBool,
}

impl PostgresConnection {
    fn ensure_not_closed(&self) -> Result<()> {
        if self.is_closed() {
            return Err(FerryError::Connection("connection is closed".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl WarehouseConnection for PostgresConnection {
    fn kind(&self) -> WarehouseKind {
        self.kind
    }

    async fn introspect(&self, table: &str) -> Result<Vec<ColumnDescriptor>> {
        self.ensure_not_closed()?;
        let (schema, table_name) = split_table(table, "public");

        let rows = self
            .client
            .query(INTROSPECT_SQL, &[&schema, &table_name])
            .await
            .map_err(|e| {
                FerryError::SchemaIntrospection(format!("failed to introspect '{}': {}", table, e))
            })?;

        let columns = rows
            .iter()
            .map(|row| {
                let name: String = row.get(0);
                let pg_type: String = row.get(1);
                let is_pk: bool = row.get(2);
                let descriptor = ColumnDescriptor::new(name, canonical_tag(&pg_type));
                if is_pk { descriptor.primary_key() } else { descriptor }
            })
            .collect::<Vec<_>>();

        tracing::debug!(table, column_count = columns.len(), "introspected table");
        Ok(columns)
    }

    async fn stream_table(
        &self,
        table: &str,
        columns: &[ColumnDescriptor],
        filter: Option<&TenancyFilter>,
    ) -> Result<RowStream> {
        self.ensure_not_closed()?;

        let sql = select_sql(self.kind, table, columns, filter);
        let params: Vec<String> = filter.map(|f| vec![f.value.clone()]).unwrap_or_default();

        let rows = self
            .client
            .query_raw(&sql, params.iter().map(|p| p as &(dyn ToSql + Sync)))
            .await
            .map_err(|e| FerryError::Connection(format!("failed to start read: {}", e)))?;

        let kind = self.kind;
        let kinds: Vec<CanonicalKind> = columns
            .iter()
            .map(|c| canonical_kind(&c.data_type))
            .collect();

        let stream = rows
            .map_err(|e| FerryError::Connection(format!("failed to read query result: {}", e)))
            .try_chunks(STREAM_CHUNK_SIZE)
            .map_err(|e| e.1)
            .and_then(move |chunk| {
                let kinds = kinds.clone();
                async move {
                    chunk
                        .iter()
                        .map(|row| {
                            kinds
                                .iter()
                                .enumerate()
                                .map(|(index, canonical)| {
                                    let text: Option<String> =
                                        row.try_get(index).map_err(|e| {
                                            FerryError::Connection(format!(
                                                "failed to decode column {}: {}",
                                                index, e
                                            ))
                                        })?;
                                    Ok(raw_from_text(kind, *canonical, text))
                                })
                                .collect::<Result<Vec<_>>>()
                        })
                        .collect::<Result<Vec<_>>>()
                }
            });

        Ok(Box::pin(stream))
    }

    async fn ensure_table(&self, table: &str, columns: &[ColumnDescriptor]) -> Result<()> {
        self.ensure_not_closed()?;
        let ddl = create_table_sql(self.kind, table, columns);
        self.client
            .execute(&ddl, &[])
            .await
            .map_err(|e| FerryError::BatchWrite(format!("failed to create table: {}", e)))?;
        tracing::debug!(table, "destination table ensured");
        Ok(())
    }

    async fn write_batch(
        &self,
        table: &str,
        columns: &[ColumnDescriptor],
        rows: &[Row],
    ) -> Result<()> {
        self.ensure_not_closed()?;
        if rows.is_empty() {
            return Ok(());
        }
        let start = std::time::Instant::now();

        let json_as_text = self.kind == WarehouseKind::Redshift;
        let sql = crate::insert_sql(self.kind, table, columns, rows.len());

        let mut params: Vec<PgParam> = Vec::with_capacity(rows.len() * columns.len());
        for row in rows {
            for (index, column) in columns.iter().enumerate() {
                let value = row.get(index).unwrap_or(&Value::Null);
                params.push(pg_param(
                    canonical_kind(&column.data_type),
                    value,
                    json_as_text,
                )?);
            }
        }

        self.client
            .execute_raw(&sql, params.iter().map(|p| p as &(dyn ToSql + Sync)))
            .await
            .map_err(|e| FerryError::BatchWrite(format!("insert failed: {}", e)))?;

        tracing::debug!(
            table,
            row_count = rows.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "batch written"
        );
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.driver.abort();
            tracing::debug!(backend = %self.kind, "connection closed");
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst) || self.client.is_closed()
    }
}

impl std::fmt::Debug for PostgresConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresConnection")
            .field("kind", &self.kind)
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish()
    }
}
