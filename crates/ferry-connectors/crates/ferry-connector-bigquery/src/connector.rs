//! BigQuery REST connector implementation

use crate::{
    canonical_tag, insert_value, introspect_sql, named_parameter, normalize_cell, qualified_table,
    select_sql,
};
use async_trait::async_trait;
use ferry_core::{
    CanonicalKind, ColumnDescriptor, CredentialRecord, FerryError, RawRow, Result, Row, RowStream,
    TenancyFilter, Value, WarehouseConnection, WarehouseConnector, WarehouseKind, canonical_kind,
    create_table_sql,
};
use serde::Deserialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use uuid::Uuid;

const API_BASE: &str = "https://bigquery.googleapis.com/bigquery/v2";
const QUERY_TIMEOUT_MS: u64 = 60_000;

/// BigQuery warehouse connector
pub struct BigQueryConnector;

impl BigQueryConnector {
    pub fn new() -> Self {
        tracing::debug!("BigQuery connector initialized");
        Self
    }
}

impl Default for BigQueryConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WarehouseConnector for BigQueryConnector {
    fn kind(&self) -> WarehouseKind {
        WarehouseKind::BigQuery
    }

    #[tracing::instrument(skip(self, credentials), fields(host = %credentials.host))]
    async fn connect(
        &self,
        credentials: &CredentialRecord,
    ) -> Result<Arc<dyn WarehouseConnection>> {
        tracing::debug!("connecting to BigQuery");

        let token = credentials
            .password
            .clone()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| FerryError::Connection("missing BigQuery access token".into()))?;
        let project = credentials
            .params
            .get("project")
            .cloned()
            .or_else(|| {
                Some(credentials.host.clone()).filter(|s| !s.is_empty())
            })
            .ok_or_else(|| FerryError::Connection("missing BigQuery project id".into()))?;
        let dataset = credentials
            .database
            .clone()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| FerryError::Connection("missing BigQuery dataset".into()))?;

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| FerryError::Connection(format!("HTTP client setup failed: {}", e)))?;

        let connection = BigQueryConnection {
            http,
            base_url: API_BASE.to_string(),
            token,
            project,
            dataset,
            closed: AtomicBool::new(false),
        };

        // Probe before handing the connection out
        connection
            .run_query("SELECT 1", vec![], None)
            .await
            .map_err(|e| FerryError::Connection(format!("connection probe failed: {}", e)))?;

        tracing::debug!("BigQuery connection established");
        Ok(Arc::new(connection))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryResponse {
    #[serde(default)]
    job_complete: Option<bool>,
    #[serde(default)]
    job_reference: Option<JobReference>,
    #[serde(default)]
    rows: Option<Vec<TableRow>>,
    #[serde(default)]
    page_token: Option<String>,
    #[serde(default)]
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobReference {
    #[serde(default)]
    job_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TableRow {
    #[serde(default)]
    f: Vec<TableCell>,
}

#[derive(Debug, Deserialize)]
struct TableCell {
    #[serde(default)]
    v: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InsertAllResponse {
    #[serde(default)]
    insert_errors: Option<Vec<serde_json::Value>>,
}

pub struct BigQueryConnection {
    http: reqwest::Client,
    base_url: String,
    token: String,
    project: String,
    dataset: String,
    closed: AtomicBool,
}

impl BigQueryConnection {
    fn ensure_not_closed(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(FerryError::Connection("connection is closed".into()));
        }
        Ok(())
    }

    async fn run_query(
        &self,
        sql: &str,
        parameters: Vec<serde_json::Value>,
        page_of: Option<(&str, &str)>,
    ) -> Result<QueryResponse> {
        let response = match page_of {
            None => {
                let mut body = serde_json::json!({
                    "query": sql,
                    "useLegacySql": false,
                    "timeoutMs": QUERY_TIMEOUT_MS,
                });
                if !parameters.is_empty() {
                    body["parameterMode"] = serde_json::json!("NAMED");
                    body["queryParameters"] = serde_json::json!(parameters);
                }
                self.http
                    .post(format!(
                        "{}/projects/{}/queries",
                        self.base_url, self.project
                    ))
                    .bearer_auth(&self.token)
                    .json(&body)
                    .send()
                    .await
            }
            Some((job_id, page_token)) => {
                self.http
                    .get(format!(
                        "{}/projects/{}/queries/{}",
                        self.base_url, self.project, job_id
                    ))
                    .query(&[("pageToken", page_token), ("timeoutMs", "60000")])
                    .bearer_auth(&self.token)
                    .send()
                    .await
            }
        }
        .map_err(|e| FerryError::Connection(format!("request failed: {}", e)))?;

        let status = response.status();
        let parsed: QueryResponse = response
            .json()
            .await
            .map_err(|e| FerryError::Connection(format!("malformed response: {}", e)))?;

        if !status.is_success() {
            let detail = parsed
                .error
                .map(|e| e.message)
                .unwrap_or_else(|| "no detail".into());
            return Err(FerryError::Connection(format!(
                "query failed with status {}: {}",
                status, detail
            )));
        }
        if parsed.job_complete == Some(false) {
            return Err(FerryError::Timeout(format!(
                "query did not complete within {}ms",
                QUERY_TIMEOUT_MS
            )));
        }
        Ok(parsed)
    }
}

/// Flatten a page of `rows` into raw rows
fn normalize_rows(rows: Option<Vec<TableRow>>, kinds: &[CanonicalKind]) -> Vec<RawRow> {
    rows.unwrap_or_default()
        .into_iter()
        .map(|row| {
            row.f
                .iter()
                .zip(kinds)
                .map(|(cell, canonical)| normalize_cell(*canonical, &cell.v))
                .collect()
        })
        .collect()
}

#[async_trait]
impl WarehouseConnection for BigQueryConnection {
    fn kind(&self) -> WarehouseKind {
        WarehouseKind::BigQuery
    }

    async fn introspect(&self, table: &str) -> Result<Vec<ColumnDescriptor>> {
        self.ensure_not_closed()?;

        let (sql, table_name) = introspect_sql(&self.project, &self.dataset, table);
        let response = self
            .run_query(&sql, vec![named_parameter("table", &table_name)], None)
            .await
            .map_err(|e| {
                FerryError::SchemaIntrospection(format!("failed to introspect '{}': {}", table, e))
            })?;

        // BigQuery has no enforced primary keys, so none are reported
        let columns = response
            .rows
            .unwrap_or_default()
            .iter()
            .filter_map(|row| {
                let name = row.f.first()?.v.as_str()?.to_string();
                let data_type = row.f.get(1)?.v.as_str()?.to_string();
                Some(ColumnDescriptor::new(name, canonical_tag(&data_type)))
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

        let sql = select_sql(&self.project, &self.dataset, table, columns, filter);
        let parameters = filter
            .map(|f| vec![named_parameter("tenant", &f.value)])
            .unwrap_or_default();

        let response = self.run_query(&sql, parameters, None).await?;
        let kinds: Vec<CanonicalKind> = columns
            .iter()
            .map(|c| canonical_kind(&c.data_type))
            .collect();

        let job_id = response
            .job_reference
            .as_ref()
            .and_then(|j| j.job_id.clone())
            .unwrap_or_default();
        let first = normalize_rows(response.rows, &kinds);
        let next_page = response.page_token.clone();

        let pager = BigQueryConnection {
            http: self.http.clone(),
            base_url: self.base_url.clone(),
            token: self.token.clone(),
            project: self.project.clone(),
            dataset: self.dataset.clone(),
            closed: AtomicBool::new(false),
        };

        // First page came with the query; the rest follow the page token.
        let stream = futures::stream::try_unfold(
            (pager, job_id, kinds, Some(first), next_page),
            |(pager, job_id, kinds, mut first, next_page)| async move {
                if let Some(rows) = first.take() {
                    return Ok(Some((rows, (pager, job_id, kinds, None, next_page))));
                }
                let Some(token) = next_page else {
                    return Ok(None);
                };
                if job_id.is_empty() {
                    return Ok(None);
                }
                let response = pager.run_query("", vec![], Some((&job_id, &token))).await?;
                let rows = normalize_rows(response.rows, &kinds);
                let next = response.page_token.clone();
                Ok(Some((rows, (pager, job_id, kinds, None, next))))
            },
        );

        Ok(Box::pin(stream))
    }

    async fn ensure_table(&self, table: &str, columns: &[ColumnDescriptor]) -> Result<()> {
        self.ensure_not_closed()?;

        // BigQuery DDL needs the fully qualified table path
        let qualified = qualified_table(&self.project, &self.dataset, table);
        let ddl = create_table_sql(WarehouseKind::BigQuery, &qualified, columns);

        self.run_query(&ddl, vec![], None)
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

        let (dataset, table_name) = match table.split_once('.') {
            Some((ds, tbl)) => (ds, tbl),
            None => (self.dataset.as_str(), table),
        };

        let payload_rows: Vec<serde_json::Value> = rows
            .iter()
            .map(|row| {
                let mut object = serde_json::Map::new();
                for (index, column) in columns.iter().enumerate() {
                    let value = row.get(index).unwrap_or(&Value::Null);
                    object.insert(column.name.clone(), insert_value(value));
                }
                serde_json::json!({
                    "insertId": Uuid::new_v4().to_string(),
                    "json": object,
                })
            })
            .collect();

        let body = serde_json::json!({
            "kind": "bigquery#tableDataInsertAllRequest",
            "rows": payload_rows,
        });

        let response = self
            .http
            .post(format!(
                "{}/projects/{}/datasets/{}/tables/{}/insertAll",
                self.base_url, self.project, dataset, table_name
            ))
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await
            .map_err(|e| FerryError::BatchWrite(format!("insert request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FerryError::BatchWrite(format!(
                "insert failed with status {}",
                status
            )));
        }
        let parsed: InsertAllResponse = response
            .json()
            .await
            .map_err(|e| FerryError::BatchWrite(format!("malformed insert response: {}", e)))?;
        if let Some(errors) = parsed.insert_errors.filter(|e| !e.is_empty()) {
            return Err(FerryError::BatchWrite(format!(
                "destination rejected {} row(s) in the batch",
                errors.len()
            )));
        }

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
        tracing::debug!("BigQuery connection closed");
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for BigQueryConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BigQueryConnection")
            .field("project", &self.project)
            .field("dataset", &self.dataset)
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}
