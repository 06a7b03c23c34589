//! ClickHouse connector implementation

use async_trait::async_trait;
use ferry_core::{
    ColumnDescriptor, CredentialRecord, FerryError, RawRow, Result, Row, RowStream, TenancyFilter,
    Value, WarehouseConnection, WarehouseConnector, WarehouseKind, create_table_sql,
    primary_key_columns, quote_identifier,
};
use serde::Deserialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// ClickHouse warehouse connector
///
/// ClickHouse is a column-oriented OLAP database. This connector uses the
/// HTTP interface: reads stream as JSONEachRow and writes land in
/// ReplacingMergeTree tables keyed on the source primary key, so retried
/// batches collapse at merge time.
pub struct ClickHouseConnector;

impl ClickHouseConnector {
    pub fn new() -> Self {
        tracing::debug!("ClickHouse connector initialized");
        Self
    }
}

impl Default for ClickHouseConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WarehouseConnector for ClickHouseConnector {
    fn kind(&self) -> WarehouseKind {
        WarehouseKind::ClickHouse
    }

    #[tracing::instrument(skip(self, credentials), fields(host = %credentials.host))]
    async fn connect(
        &self,
        credentials: &CredentialRecord,
    ) -> Result<Arc<dyn WarehouseConnection>> {
        tracing::debug!("connecting to ClickHouse");

        let host = if credentials.host.is_empty() {
            "localhost"
        } else {
            credentials.host.as_str()
        };
        let port = if credentials.port > 0 {
            credentials.port
        } else {
            8123
        };
        let database = credentials
            .database
            .clone()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "default".to_string());
        let username = credentials
            .username
            .clone()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "default".to_string());
        let password = credentials.password.clone().unwrap_or_default();
        let use_ssl = credentials
            .params
            .get("ssl")
            .map(|s| s == "true" || s == "1")
            .unwrap_or(false);

        let url = build_connection_url(host, port, use_ssl);

        let client = clickhouse::Client::default()
            .with_url(&url)
            .with_user(&username)
            .with_password(&password)
            .with_database(&database);

        // Probe before handing the connection out
        let probe: std::result::Result<u8, clickhouse::error::Error> =
            client.query("SELECT 1").fetch_one().await;
        if let Err(e) = probe {
            return Err(FerryError::Connection(format!(
                "failed to connect to ClickHouse: {}",
                e
            )));
        }

        tracing::debug!("ClickHouse connection established");
        Ok(Arc::new(ClickHouseConnection::new(client, database)))
    }
}

/// Build the ClickHouse HTTP endpoint URL. Credentials go in headers via
/// the client, never in the URL.
pub(crate) fn build_connection_url(host: &str, port: u16, use_ssl: bool) -> String {
    let protocol = if use_ssl { "https" } else { "http" };
    format!("{}://{}:{}", protocol, host, port)
}

/// Split a possibly schema-qualified table name into (database, table)
pub(crate) fn split_table<'a>(table: &'a str, default_db: &'a str) -> (&'a str, &'a str) {
    match table.split_once('.') {
        Some((db, tbl)) => (db, tbl),
        None => (default_db, table),
    }
}

/// Quote a possibly schema-qualified table name part by part
pub(crate) fn quote_table(table: &str) -> String {
    table
        .split('.')
        .map(|part| quote_identifier(WarehouseKind::ClickHouse, part))
        .collect::<Vec<_>>()
        .join(".")
}

pub struct ClickHouseConnection {
    client: clickhouse::Client,
    database: String,
    closed: AtomicBool,
}

impl ClickHouseConnection {
    pub fn new(client: clickhouse::Client, database: String) -> Self {
        Self {
            client,
            database,
            closed: AtomicBool::new(false),
        }
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    fn ensure_not_closed(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(FerryError::Connection("connection is closed".into()));
        }
        Ok(())
    }
}

#[derive(clickhouse::Row, Deserialize)]
struct SystemColumnRow {
    name: String,
    column_type: String,
    is_in_primary_key: u8,
}

#[async_trait]
impl WarehouseConnection for ClickHouseConnection {
    fn kind(&self) -> WarehouseKind {
        WarehouseKind::ClickHouse
    }

    async fn introspect(&self, table: &str) -> Result<Vec<ColumnDescriptor>> {
        self.ensure_not_closed()?;
        let (database, table_name) = split_table(table, &self.database);

        let rows: Vec<SystemColumnRow> = self
            .client
            .query(
                "SELECT name, type AS column_type, is_in_primary_key \
                 FROM system.columns WHERE database = ? AND table = ? ORDER BY position",
            )
            .bind(database)
            .bind(table_name)
            .fetch_all()
            .await
            .map_err(|e| {
                FerryError::SchemaIntrospection(format!(
                    "failed to introspect '{}': {}",
                    table, e
                ))
            })?;

        let columns = rows
            .into_iter()
            .map(|r| {
                let descriptor = ColumnDescriptor::new(r.name, r.column_type);
                if r.is_in_primary_key != 0 {
                    descriptor.primary_key()
                } else {
                    descriptor
                }
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

        let column_list = columns
            .iter()
            .map(|c| quote_identifier(WarehouseKind::ClickHouse, &c.name))
            .collect::<Vec<_>>()
            .join(", ");
        let mut sql = format!("SELECT {} FROM {}", column_list, quote_table(table));
        if let Some(f) = filter {
            sql.push_str(&format!(
                " WHERE {} = ?",
                quote_identifier(WarehouseKind::ClickHouse, &f.column)
            ));
        }

        let mut query = self.client.query(&sql);
        if let Some(f) = filter {
            query = query.bind(f.value.as_str());
        }

        let cursor = query
            .fetch_bytes("JSONEachRow")
            .map_err(|e| FerryError::Connection(format!("failed to start read: {}", e)))?;

        let names: Vec<String> = columns.iter().map(|c| c.name.clone()).collect();

        // Each HTTP chunk becomes one row chunk; a partial trailing line
        // carries over to the next chunk.
        let stream = futures::stream::try_unfold(
            (cursor, String::new(), names, false),
            |(mut cursor, mut buffer, names, mut done)| async move {
                loop {
                    if done {
                        return Ok(None);
                    }
                    match cursor.next().await {
                        Ok(Some(bytes)) => {
                            buffer.push_str(&String::from_utf8_lossy(&bytes));
                            let Some(split_at) = buffer.rfind('\n') else {
                                continue;
                            };
                            let complete = buffer[..split_at].to_string();
                            buffer.drain(..=split_at);
                            let rows = parse_json_lines(&complete, &names);
                            if rows.is_empty() {
                                continue;
                            }
                            return Ok(Some((rows, (cursor, buffer, names, done))));
                        }
                        Ok(None) => {
                            done = true;
                            let rows = parse_json_lines(&buffer, &names);
                            buffer.clear();
                            if rows.is_empty() {
                                return Ok(None);
                            }
                            return Ok(Some((rows, (cursor, buffer, names, done))));
                        }
                        Err(e) => {
                            return Err(FerryError::Connection(format!(
                                "failed to read query result: {}",
                                e
                            )));
                        }
                    }
                }
            },
        );

        Ok(Box::pin(stream))
    }

    async fn ensure_table(&self, table: &str, columns: &[ColumnDescriptor]) -> Result<()> {
        self.ensure_not_closed()?;

        let mut ddl = create_table_sql(WarehouseKind::ClickHouse, table, columns);
        let pk: Vec<String> = primary_key_columns(columns)
            .into_iter()
            .map(|name| quote_identifier(WarehouseKind::ClickHouse, name))
            .collect();
        if pk.is_empty() {
            // No key to merge on: plain MergeTree, append semantics
            ddl.push_str(" ENGINE = MergeTree ORDER BY tuple()");
        } else {
            ddl.push_str(&format!(
                " ENGINE = ReplacingMergeTree ORDER BY ({})",
                pk.join(", ")
            ));
        }

        self.client
            .query(&ddl)
            .execute()
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

        let column_list = columns
            .iter()
            .map(|c| quote_identifier(WarehouseKind::ClickHouse, &c.name))
            .collect::<Vec<_>>()
            .join(", ");
        let placeholder_row = format!("({})", vec!["?"; columns.len()].join(", "));
        let placeholders = vec![placeholder_row; rows.len()].join(", ");
        let sql = format!(
            "INSERT INTO {} ({}) VALUES {}",
            quote_table(table),
            column_list,
            placeholders
        );

        let mut query = self.client.query(&sql);
        for row in rows {
            for index in 0..columns.len() {
                let value = row.get(index).unwrap_or(&Value::Null);
                query = query.bind(bind_param(value));
            }
        }

        query
            .execute()
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
        self.closed.store(true, Ordering::SeqCst);
        tracing::debug!("ClickHouse connection closed");
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Parse newline-delimited JSON objects into positional rows
pub(crate) fn parse_json_lines(content: &str, names: &[String]) -> Vec<RawRow> {
    let mut rows = Vec::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Ok(serde_json::Value::Object(obj)) = serde_json::from_str(line) {
            let row: RawRow = names
                .iter()
                .map(|name| obj.get(name).cloned().unwrap_or(serde_json::Value::Null))
                .collect();
            rows.push(row);
        }
    }
    rows
}

/// Shape a converted value for binding. Arrays and structured values land
/// in String columns, so they bind as JSON text.
pub(crate) fn bind_param(value: &Value) -> serde_json::Value {
    match serde_json::to_value(value) {
        Ok(v @ serde_json::Value::Array(_)) | Ok(v @ serde_json::Value::Object(_)) => {
            serde_json::Value::String(v.to_string())
        }
        Ok(v) => v,
        Err(_) => serde_json::Value::Null,
    }
}

impl std::fmt::Debug for ClickHouseConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClickHouseConnection")
            .field("database", &self.database)
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish()
    }
}
