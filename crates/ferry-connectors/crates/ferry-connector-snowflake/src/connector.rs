//! Snowflake SQL API connector implementation

use crate::{
    binding_type, binding_value, canonical_tag, normalize_cell, quote_table, select_sql, write_sql,
};
use async_trait::async_trait;
use ferry_core::{
    CanonicalKind, ColumnDescriptor, CredentialRecord, FerryError, RawRow, Result, Row, RowStream,
    TenancyFilter, Value, WarehouseConnection, WarehouseConnector, WarehouseKind, canonical_kind,
    create_table_sql,
};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Upper bound on polls for an asynchronously executing statement
const MAX_STATUS_POLLS: u32 = 240;
const STATUS_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Snowflake warehouse connector
pub struct SnowflakeConnector;

impl SnowflakeConnector {
    pub fn new() -> Self {
        tracing::debug!("Snowflake connector initialized");
        Self
    }
}

impl Default for SnowflakeConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WarehouseConnector for SnowflakeConnector {
    fn kind(&self) -> WarehouseKind {
        WarehouseKind::Snowflake
    }

    #[tracing::instrument(skip(self, credentials), fields(host = %credentials.host))]
    async fn connect(
        &self,
        credentials: &CredentialRecord,
    ) -> Result<Arc<dyn WarehouseConnection>> {
        tracing::debug!("connecting to Snowflake");

        let token = credentials
            .password
            .clone()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| FerryError::Connection("missing Snowflake access token".into()))?;

        let base_url = account_base_url(&credentials.host);
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| FerryError::Connection(format!("HTTP client setup failed: {}", e)))?;

        let connection = SnowflakeConnection {
            http,
            base_url,
            token,
            database: credentials.database.clone(),
            schema: credentials.params.get("schema").cloned(),
            warehouse: credentials.params.get("warehouse").cloned(),
            role: credentials.params.get("role").cloned(),
            closed: AtomicBool::new(false),
        };

        // Probe before handing the connection out
        connection
            .execute("SELECT 1", HashMap::new())
            .await
            .map_err(|e| FerryError::Connection(format!("connection probe failed: {}", e)))?;

        tracing::debug!("Snowflake connection established");
        Ok(Arc::new(connection))
    }
}

/// Resolve an account identifier or full host into the API base URL
pub(crate) fn account_base_url(host: &str) -> String {
    let host = host.trim_end_matches('/');
    let host = host
        .strip_prefix("https://")
        .or_else(|| host.strip_prefix("http://"))
        .unwrap_or(host);
    if host.contains('.') {
        format!("https://{}", host)
    } else {
        format!("https://{}.snowflakecomputing.com", host)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatementResponse {
    #[serde(default)]
    statement_handle: Option<String>,
    #[serde(default)]
    data: Option<Vec<Vec<serde_json::Value>>>,
    #[serde(default)]
    result_set_meta_data: Option<ResultSetMetaData>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResultSetMetaData {
    #[serde(default)]
    partition_info: Vec<PartitionInfo>,
    #[serde(default)]
    row_type: Vec<RowType>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PartitionInfo {
    #[serde(default)]
    #[allow(dead_code)]
    row_count: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RowType {
    name: String,
    #[serde(rename = "type", default)]
    column_type: String,
}

pub struct SnowflakeConnection {
    http: reqwest::Client,
    base_url: String,
    token: String,
    database: Option<String>,
    schema: Option<String>,
    warehouse: Option<String>,
    role: Option<String>,
    closed: AtomicBool,
}

impl SnowflakeConnection {
    fn ensure_not_closed(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(FerryError::Connection("connection is closed".into()));
        }
        Ok(())
    }

    fn statements_url(&self) -> String {
        format!("{}/api/v2/statements", self.base_url)
    }

    /// Execute a statement, polling to completion if it goes asynchronous.
    async fn execute(
        &self,
        statement: &str,
        bindings: HashMap<String, serde_json::Value>,
    ) -> Result<StatementResponse> {
        let mut body = serde_json::json!({
            "statement": statement,
            "timeout": 3600,
        });
        if let Some(database) = &self.database {
            body["database"] = serde_json::json!(database);
        }
        if let Some(schema) = &self.schema {
            body["schema"] = serde_json::json!(schema);
        }
        if let Some(warehouse) = &self.warehouse {
            body["warehouse"] = serde_json::json!(warehouse);
        }
        if let Some(role) = &self.role {
            body["role"] = serde_json::json!(role);
        }
        if !bindings.is_empty() {
            body["bindings"] = serde_json::json!(bindings);
        }

        let response = self
            .http
            .post(self.statements_url())
            .bearer_auth(&self.token)
            .header("X-Snowflake-Authorization-Token-Type", "OAUTH")
            .json(&body)
            .send()
            .await
            .map_err(|e| FerryError::Connection(format!("request failed: {}", e)))?;

        let status = response.status();
        if status == reqwest::StatusCode::ACCEPTED {
            let parsed: StatementResponse = response
                .json()
                .await
                .map_err(|e| FerryError::Connection(format!("malformed response: {}", e)))?;
            let handle = parsed.statement_handle.ok_or_else(|| {
                FerryError::Connection("async statement without a handle".into())
            })?;
            return self.poll_statement(&handle).await;
        }
        parse_response(status, response).await
    }

    async fn poll_statement(&self, handle: &str) -> Result<StatementResponse> {
        let url = format!("{}/{}", self.statements_url(), handle);
        for _ in 0..MAX_STATUS_POLLS {
            tokio::time::sleep(STATUS_POLL_INTERVAL).await;
            let response = self
                .http
                .get(&url)
                .bearer_auth(&self.token)
                .header("X-Snowflake-Authorization-Token-Type", "OAUTH")
                .send()
                .await
                .map_err(|e| FerryError::Connection(format!("status poll failed: {}", e)))?;
            let status = response.status();
            if status == reqwest::StatusCode::ACCEPTED {
                continue;
            }
            return parse_response(status, response).await;
        }
        Err(FerryError::Timeout(format!(
            "statement {} still executing after {} polls",
            handle, MAX_STATUS_POLLS
        )))
    }

    async fn fetch_partition(&self, handle: &str, partition: usize) -> Result<StatementResponse> {
        let url = format!(
            "{}/{}?partition={}",
            self.statements_url(),
            handle,
            partition
        );
        let response = self
            .http
            .get(&url)
            .bearer_auth(&self.token)
            .header("X-Snowflake-Authorization-Token-Type", "OAUTH")
            .send()
            .await
            .map_err(|e| FerryError::Connection(format!("partition fetch failed: {}", e)))?;
        parse_response(response.status(), response).await
    }
}

async fn parse_response(
    status: reqwest::StatusCode,
    response: reqwest::Response,
) -> Result<StatementResponse> {
    if !status.is_success() {
        let parsed: StatementResponse = response.json().await.unwrap_or(StatementResponse {
            statement_handle: None,
            data: None,
            result_set_meta_data: None,
            message: None,
        });
        return Err(FerryError::Connection(format!(
            "statement failed with status {}: {}",
            status,
            parsed.message.unwrap_or_else(|| "no detail".into())
        )));
    }
    response
        .json()
        .await
        .map_err(|e| FerryError::Connection(format!("malformed response: {}", e)))
}

/// Normalize a partition of result data into raw rows
fn normalize_rows(data: Vec<Vec<serde_json::Value>>, kinds: &[CanonicalKind]) -> Vec<RawRow> {
    data.into_iter()
        .map(|row| {
            row.iter()
                .zip(kinds)
                .map(|(cell, canonical)| normalize_cell(*canonical, cell))
                .collect()
        })
        .collect()
}

#[async_trait]
impl WarehouseConnection for SnowflakeConnection {
    fn kind(&self) -> WarehouseKind {
        WarehouseKind::Snowflake
    }

    async fn introspect(&self, table: &str) -> Result<Vec<ColumnDescriptor>> {
        self.ensure_not_closed()?;

        let response = self
            .execute(&format!("DESCRIBE TABLE {}", quote_table(table)), HashMap::new())
            .await
            .map_err(|e| {
                FerryError::SchemaIntrospection(format!("failed to introspect '{}': {}", table, e))
            })?;

        let meta = response.result_set_meta_data.ok_or_else(|| {
            FerryError::SchemaIntrospection(format!("no metadata describing '{}'", table))
        })?;
        let index_of = |field: &str| {
            meta.row_type
                .iter()
                .position(|rt| rt.name.eq_ignore_ascii_case(field))
        };
        let (Some(name_idx), Some(type_idx)) = (index_of("name"), index_of("type")) else {
            return Err(FerryError::SchemaIntrospection(format!(
                "unexpected DESCRIBE shape for '{}'",
                table
            )));
        };
        let kind_idx = index_of("kind");
        let pk_idx = index_of("primary key");

        let cell_str = |row: &[serde_json::Value], idx: usize| -> String {
            row.get(idx)
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string()
        };

        let columns = response
            .data
            .unwrap_or_default()
            .iter()
            .filter(|row| {
                kind_idx
                    .map(|idx| cell_str(row, idx).eq_ignore_ascii_case("COLUMN"))
                    .unwrap_or(true)
            })
            .map(|row| {
                let descriptor = ColumnDescriptor::new(
                    cell_str(row, name_idx),
                    canonical_tag(&cell_str(row, type_idx)),
                );
                let is_pk = pk_idx
                    .map(|idx| cell_str(row, idx).eq_ignore_ascii_case("Y"))
                    .unwrap_or(false);
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

        let sql = select_sql(table, columns, filter);
        let mut bindings = HashMap::new();
        if let Some(f) = filter {
            bindings.insert(
                "1".to_string(),
                serde_json::json!({"type": "TEXT", "value": f.value}),
            );
        }

        let response = self.execute(&sql, bindings).await?;
        let kinds: Vec<CanonicalKind> = columns
            .iter()
            .map(|c| canonical_kind(&c.data_type))
            .collect();

        let partition_count = response
            .result_set_meta_data
            .as_ref()
            .map(|m| m.partition_info.len())
            .unwrap_or(1)
            .max(1);
        let handle = response.statement_handle.clone().unwrap_or_default();
        let first = normalize_rows(response.data.unwrap_or_default(), &kinds);

        let http = self.http.clone();
        let base_url = self.base_url.clone();
        let token = self.token.clone();
        let connection = SnowflakeConnection {
            http,
            base_url,
            token,
            database: None,
            schema: None,
            warehouse: None,
            role: None,
            closed: AtomicBool::new(false),
        };

        // Partition 0 came with the execute response; the rest page lazily.
        let stream = futures::stream::try_unfold(
            (connection, handle, 1usize, partition_count, kinds, Some(first)),
            |(connection, handle, next, total, kinds, mut first)| async move {
                if let Some(rows) = first.take() {
                    return Ok(Some((
                        rows,
                        (connection, handle, next, total, kinds, None),
                    )));
                }
                if next >= total || handle.is_empty() {
                    return Ok(None);
                }
                let response = connection.fetch_partition(&handle, next).await?;
                let rows = normalize_rows(response.data.unwrap_or_default(), &kinds);
                Ok(Some((
                    rows,
                    (connection, handle, next + 1, total, kinds, None),
                )))
            },
        );

        Ok(Box::pin(stream))
    }

    async fn ensure_table(&self, table: &str, columns: &[ColumnDescriptor]) -> Result<()> {
        self.ensure_not_closed()?;
        let ddl = create_table_sql(WarehouseKind::Snowflake, table, columns);
        self.execute(&ddl, HashMap::new())
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

        let sql = write_sql(table, columns, rows.len());
        let mut bindings = HashMap::new();
        let mut position = 0usize;
        for row in rows {
            for index in 0..columns.len() {
                position += 1;
                let value = row.get(index).unwrap_or(&Value::Null);
                bindings.insert(
                    position.to_string(),
                    serde_json::json!({
                        "type": binding_type(value),
                        "value": binding_value(value),
                    }),
                );
            }
        }

        self.execute(&sql, bindings)
            .await
            .map_err(|e| FerryError::BatchWrite(format!("batch write failed: {}", e)))?;

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
        tracing::debug!("Snowflake connection closed");
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for SnowflakeConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnowflakeConnection")
            .field("base_url", &self.base_url)
            .field("database", &self.database)
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}
