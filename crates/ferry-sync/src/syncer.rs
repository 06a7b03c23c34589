//! The sync engine: one job end to end
//!
//! Validate, record, connect, introspect, stream, convert, batch, write,
//! clean up. Connections are closed on every exit path and cleanup
//! failures are logged, never rethrown.

use crate::{JobRecord, JobStatus, JobStore, RetryPolicy, RowBatch, SyncJob, convert, retry};
use ferry_connectors::ConnectorRegistry;
use ferry_core::{
    ColumnDescriptor, CredentialCodec, FerryError, RawRow, Result, Row, WarehouseConnection,
};
use futures::StreamExt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default per-call limit on any single backend operation
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(60);

/// Tunables for one engine instance
#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub batch_size: usize,
    pub max_batch_dwell: Duration,
    /// Upper bound on each individual backend call; elapse is a retryable
    /// timeout, not a hang
    pub call_timeout: Duration,
    pub retry: RetryPolicy,
}

impl SyncOptions {
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_max_batch_dwell(mut self, dwell: Duration) -> Self {
        self.max_batch_dwell = dwell;
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            batch_size: crate::DEFAULT_BATCH_SIZE,
            max_batch_dwell: crate::DEFAULT_MAX_DWELL,
            call_timeout: DEFAULT_CALL_TIMEOUT,
            retry: RetryPolicy::default(),
        }
    }
}

/// Outcome of a completed sync
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub job_id: uuid::Uuid,
    pub rows_synced: u64,
    /// Rows dropped for shape mismatch or unconvertible values
    pub rows_skipped: u64,
    pub batches_written: u64,
}

/// Executes sync jobs against registered warehouse backends.
///
/// Stateless between jobs; shared via `Arc` by the dispatcher.
pub struct SyncEngine {
    registry: Arc<ConnectorRegistry>,
    codec: Arc<CredentialCodec>,
    store: Arc<dyn JobStore>,
    options: SyncOptions,
}

impl SyncEngine {
    pub fn new(
        registry: Arc<ConnectorRegistry>,
        codec: Arc<CredentialCodec>,
        store: Arc<dyn JobStore>,
    ) -> Self {
        Self {
            registry,
            codec,
            store,
            options: SyncOptions::default(),
        }
    }

    pub fn with_options(mut self, options: SyncOptions) -> Self {
        self.options = options;
        self
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    /// Run a job to completion.
    #[tracing::instrument(skip(self, job), fields(job_id = %job.id, table = %job.table))]
    pub async fn run(&self, job: SyncJob) -> Result<SyncReport> {
        self.run_with_cancel(job, Arc::new(AtomicBool::new(false)))
            .await
    }

    /// Run a job, stopping cooperatively between batches when `cancel`
    /// flips. A batch already handed to the destination is never aborted.
    pub async fn run_with_cancel(
        &self,
        job: SyncJob,
        cancel: Arc<AtomicBool>,
    ) -> Result<SyncReport> {
        job.validate()?;

        // Record before any backend I/O; a transient store fault gets the
        // same bounded retry as the backend calls.
        let record = JobRecord::from_job(&job);
        self.options
            .retry
            .run("record_job", || {
                let record = record.clone();
                async move { self.store.insert(record).await }
            })
            .await?;
        self.options
            .retry
            .run("record_job", || {
                self.store.update_status(job.id, JobStatus::Running, None, 0)
            })
            .await?;

        let result = self.execute(&job, &cancel).await;
        match &result {
            Ok(report) => {
                info!(
                    job_id = %job.id,
                    rows_synced = report.rows_synced,
                    rows_skipped = report.rows_skipped,
                    batches_written = report.batches_written,
                    "sync succeeded"
                );
                self.record_terminal(job.id, JobStatus::Succeeded, None, report.rows_synced)
                    .await;
            }
            Err(err) => {
                warn!(job_id = %job.id, error = %err, "sync failed");
                self.record_terminal(job.id, JobStatus::Failed, Some(err.to_string()), 0)
                    .await;
            }
        }
        result
    }

    /// Write the terminal status. Like connection cleanup, a bookkeeping
    /// failure here is logged and swallowed so it never masks the run's
    /// true outcome.
    async fn record_terminal(
        &self,
        job_id: uuid::Uuid,
        status: JobStatus,
        error: Option<String>,
        rows_synced: u64,
    ) {
        let outcome = self
            .options
            .retry
            .run("record_status", || {
                self.store
                    .update_status(job_id, status, error.clone(), rows_synced)
            })
            .await;
        if let Err(err) = outcome {
            warn!(job_id = %job_id, error = %err, "terminal status update failed");
        }
    }

    async fn execute(&self, job: &SyncJob, cancel: &AtomicBool) -> Result<SyncReport> {
        let source = self.open_connection(&job.source).await?;

        let destination = match self.open_connection(&job.destination).await {
            Ok(conn) => conn,
            Err(err) => {
                close_quietly(&source, "source").await;
                return Err(err);
            }
        };

        let result = self
            .transfer(job, source.as_ref(), destination.as_ref(), cancel)
            .await;

        // Destination first, then source; each failure is logged and
        // swallowed so one bad close never masks the run's outcome.
        close_quietly(&destination, "destination").await;
        close_quietly(&source, "source").await;

        result
    }

    /// Decrypt credentials and open a connection with bounded retry.
    ///
    /// The plaintext record lives only within this call.
    async fn open_connection(
        &self,
        target: &crate::SyncTarget,
    ) -> Result<Arc<dyn WarehouseConnection>> {
        let connector = self.registry.get(target.kind).ok_or_else(|| {
            FerryError::Validation(format!("no connector registered for '{}'", target.kind))
        })?;

        let credentials = self.codec.decrypt(&target.credentials)?;

        self.options
            .retry
            .run("connect", || {
                self.with_timeout("connect", connector.connect(&credentials))
            })
            .await
    }

    async fn transfer(
        &self,
        job: &SyncJob,
        source: &dyn WarehouseConnection,
        destination: &dyn WarehouseConnection,
        cancel: &AtomicBool,
    ) -> Result<SyncReport> {
        let columns = self
            .with_timeout("introspect", source.introspect(&job.table))
            .await?;
        if columns.is_empty() {
            return Err(FerryError::SchemaIntrospection(format!(
                "table '{}' has no columns",
                job.table
            )));
        }
        debug!(
            table = %job.table,
            column_count = columns.len(),
            "source schema introspected"
        );

        self.options
            .retry
            .run("ensure_table", || {
                self.with_timeout("ensure_table", destination.ensure_table(&job.table, &columns))
            })
            .await?;

        let mut stream = self
            .with_timeout(
                "stream_table",
                source.stream_table(&job.table, &columns, job.tenancy.as_ref()),
            )
            .await?;

        let dest_kind = destination.kind();
        let mut batch = RowBatch::new(self.options.batch_size, self.options.max_batch_dwell);
        let mut report = SyncReport {
            job_id: job.id,
            rows_synced: 0,
            rows_skipped: 0,
            batches_written: 0,
        };

        while let Some(chunk) = stream.next().await {
            if cancel.load(Ordering::SeqCst) {
                return Err(FerryError::Cancelled);
            }
            let chunk = chunk?;
            for raw in chunk {
                match convert_row(&columns, &raw, dest_kind) {
                    Ok(row) => batch.push(row),
                    Err(err) => {
                        warn!(table = %job.table, error = %err, "skipping row");
                        report.rows_skipped += 1;
                    }
                }
                if batch.should_flush() {
                    self.flush(&job.table, &columns, &mut batch, destination, &mut report)
                        .await?;
                }
            }
            if batch.should_flush() {
                self.flush(&job.table, &columns, &mut batch, destination, &mut report)
                    .await?;
            }
        }

        if cancel.load(Ordering::SeqCst) {
            return Err(FerryError::Cancelled);
        }
        if !batch.is_empty() {
            self.flush(&job.table, &columns, &mut batch, destination, &mut report)
                .await?;
        }

        Ok(report)
    }

    async fn flush(
        &self,
        table: &str,
        columns: &[ColumnDescriptor],
        batch: &mut RowBatch,
        destination: &dyn WarehouseConnection,
        report: &mut SyncReport,
    ) -> Result<()> {
        let rows = batch.take();
        if rows.is_empty() {
            return Ok(());
        }
        let row_count = rows.len() as u64;
        self.options
            .retry
            .run("write_batch", || {
                self.with_timeout("write_batch", destination.write_batch(table, columns, &rows))
            })
            .await?;
        report.rows_synced += row_count;
        report.batches_written += 1;
        debug!(table, row_count, "batch written");
        Ok(())
    }

    async fn with_timeout<T, F>(&self, label: &str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let limit = self.options.call_timeout;
        match tokio::time::timeout(limit, fut).await {
            Ok(result) => result,
            Err(_) => Err(retry::timeout_error(label, limit)),
        }
    }
}

/// Convert one raw row positionally against the introspected columns.
///
/// A shape mismatch or any single unconvertible value rejects the row.
fn convert_row(
    columns: &[ColumnDescriptor],
    raw: &RawRow,
    dest: ferry_core::WarehouseKind,
) -> Result<Row> {
    if raw.len() != columns.len() {
        return Err(FerryError::RowConversion(format!(
            "row has {} values but table has {} columns",
            raw.len(),
            columns.len()
        )));
    }
    let mut values = Vec::with_capacity(raw.len());
    for (column, value) in columns.iter().zip(raw) {
        values.push(convert(&column.data_type, value, dest)?);
    }
    Ok(Row::new(
        columns.iter().map(|c| c.name.clone()).collect(),
        values,
    ))
}

async fn close_quietly(conn: &Arc<dyn WarehouseConnection>, side: &str) {
    if let Err(err) = conn.close().await {
        warn!(side, error = %err, "connection close failed");
    }
}
