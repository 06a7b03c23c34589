//! End-to-end engine tests over in-memory mock warehouses

use async_trait::async_trait;
use ferry_core::{
    ColumnDescriptor, CredentialCodec, CredentialRecord, FerryError, RawRow, Result, Row,
    RowStream, TenancyFilter, Value, WarehouseConnection, WarehouseConnector, WarehouseKind,
};
use ferry_connectors::ConnectorRegistry;
use ferry_sync::{
    BackoffStrategy, JobDispatcher, JobRecord, JobStatus, JobStore, MemoryJobStore, RetryPolicy,
    SubmitOutcome, SyncEngine, SyncJob, SyncOptions, SyncTarget,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;
use uuid::Uuid;

struct MockConnection {
    kind: WarehouseKind,
    columns: Vec<ColumnDescriptor>,
    chunks: Vec<Vec<RawRow>>,
    written: Mutex<Vec<Row>>,
    ensured_tables: Mutex<Vec<String>>,
    write_failures: AtomicU32,
    write_attempts: AtomicU32,
    /// Upsert keyed on the first column instead of appending
    merge_by_pk: bool,
    closed: AtomicBool,
}

impl MockConnection {
    fn new(kind: WarehouseKind, columns: Vec<ColumnDescriptor>, chunks: Vec<Vec<RawRow>>) -> Self {
        Self {
            kind,
            columns,
            chunks,
            written: Mutex::new(Vec::new()),
            ensured_tables: Mutex::new(Vec::new()),
            write_failures: AtomicU32::new(0),
            write_attempts: AtomicU32::new(0),
            merge_by_pk: false,
            closed: AtomicBool::new(false),
        }
    }

    fn merging(mut self) -> Self {
        self.merge_by_pk = true;
        self
    }

    fn written_rows(&self) -> Vec<Row> {
        self.written.lock().clone()
    }
}

#[async_trait]
impl WarehouseConnection for MockConnection {
    fn kind(&self) -> WarehouseKind {
        self.kind
    }

    async fn introspect(&self, _table: &str) -> Result<Vec<ColumnDescriptor>> {
        Ok(self.columns.clone())
    }

    async fn stream_table(
        &self,
        _table: &str,
        _columns: &[ColumnDescriptor],
        _filter: Option<&TenancyFilter>,
    ) -> Result<RowStream> {
        let chunks: Vec<Result<Vec<RawRow>>> = self.chunks.iter().cloned().map(Ok).collect();
        Ok(Box::pin(futures::stream::iter(chunks)))
    }

    async fn ensure_table(&self, table: &str, _columns: &[ColumnDescriptor]) -> Result<()> {
        self.ensured_tables.lock().push(table.to_string());
        Ok(())
    }

    async fn write_batch(
        &self,
        _table: &str,
        _columns: &[ColumnDescriptor],
        rows: &[Row],
    ) -> Result<()> {
        self.write_attempts.fetch_add(1, Ordering::SeqCst);
        let remaining = self.write_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.write_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(FerryError::BatchWrite("destination unavailable".into()));
        }
        let mut written = self.written.lock();
        for row in rows {
            if self.merge_by_pk {
                if let Some(existing) = written.iter_mut().find(|r| r.get(0) == row.get(0)) {
                    *existing = row.clone();
                    continue;
                }
            }
            written.push(row.clone());
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

struct MockConnector {
    kind: WarehouseKind,
    connection: Arc<MockConnection>,
    connect_failures: AtomicU32,
    connect_attempts: AtomicU32,
}

impl MockConnector {
    fn new(connection: Arc<MockConnection>) -> Self {
        Self {
            kind: connection.kind,
            connection,
            connect_failures: AtomicU32::new(0),
            connect_attempts: AtomicU32::new(0),
        }
    }

    fn failing_connects(self, count: u32) -> Self {
        self.connect_failures.store(count, Ordering::SeqCst);
        self
    }
}

#[async_trait]
impl WarehouseConnector for MockConnector {
    fn kind(&self) -> WarehouseKind {
        self.kind
    }

    async fn connect(
        &self,
        _credentials: &CredentialRecord,
    ) -> Result<Arc<dyn WarehouseConnection>> {
        self.connect_attempts.fetch_add(1, Ordering::SeqCst);
        let remaining = self.connect_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.connect_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(FerryError::Connection("connection refused".into()));
        }
        Ok(Arc::clone(&self.connection) as Arc<dyn WarehouseConnection>)
    }
}

/// Wraps the in-memory store with injectable transient faults.
struct FlakyStore {
    inner: MemoryJobStore,
    insert_failures: AtomicU32,
    insert_attempts: AtomicU32,
    fail_terminal_updates: AtomicBool,
}

impl FlakyStore {
    fn new() -> Self {
        Self {
            inner: MemoryJobStore::new(),
            insert_failures: AtomicU32::new(0),
            insert_attempts: AtomicU32::new(0),
            fail_terminal_updates: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl JobStore for FlakyStore {
    async fn insert(&self, record: JobRecord) -> Result<()> {
        self.insert_attempts.fetch_add(1, Ordering::SeqCst);
        let remaining = self.insert_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.insert_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(FerryError::Connection("store briefly unavailable".into()));
        }
        self.inner.insert(record).await
    }

    async fn get(&self, id: Uuid) -> Result<Option<JobRecord>> {
        self.inner.get(id).await
    }

    async fn update_status(
        &self,
        id: Uuid,
        status: JobStatus,
        error: Option<String>,
        rows_synced: u64,
    ) -> Result<()> {
        if status.is_terminal() && self.fail_terminal_updates.load(Ordering::SeqCst) {
            return Err(FerryError::Connection("store briefly unavailable".into()));
        }
        self.inner.update_status(id, status, error, rows_synced).await
    }

    async fn list_for_org(&self, org: &str) -> Result<Vec<JobRecord>> {
        self.inner.list_for_org(org).await
    }
}

fn orders_columns() -> Vec<ColumnDescriptor> {
    vec![
        ColumnDescriptor::new("id", "Int32").primary_key(),
        ColumnDescriptor::new("name", "Nullable(String)"),
        ColumnDescriptor::new("amount", "Float64"),
    ]
}

fn orders_rows() -> Vec<Vec<RawRow>> {
    vec![vec![
        vec![
            serde_json::json!(1),
            serde_json::json!("alpha"),
            serde_json::json!(9.5),
        ],
        vec![
            serde_json::json!(2),
            serde_json::Value::Null,
            serde_json::json!(12.0),
        ],
        vec![
            serde_json::json!(3),
            serde_json::json!("gamma"),
            serde_json::json!(0.25),
        ],
    ]]
}

struct Harness {
    engine: SyncEngine,
    source_connector: Arc<MockConnector>,
    source: Arc<MockConnection>,
    destination: Arc<MockConnection>,
    job: SyncJob,
}

fn harness(
    columns: Vec<ColumnDescriptor>,
    chunks: Vec<Vec<RawRow>>,
    source_connect_failures: u32,
) -> Harness {
    harness_with_store(
        columns,
        chunks,
        source_connect_failures,
        Arc::new(MemoryJobStore::new()),
    )
}

fn harness_with_store(
    columns: Vec<ColumnDescriptor>,
    chunks: Vec<Vec<RawRow>>,
    source_connect_failures: u32,
    store: Arc<dyn JobStore>,
) -> Harness {
    let codec = Arc::new(CredentialCodec::new(&[3u8; 32]));
    let source_token = codec
        .encrypt(&CredentialRecord::new("src.internal", 8123).with_password("src-secret"))
        .unwrap();
    let dest_token = codec
        .encrypt(&CredentialRecord::new("dst.internal", 5432).with_password("dst-secret"))
        .unwrap();

    let source = Arc::new(MockConnection::new(
        WarehouseKind::ClickHouse,
        columns.clone(),
        chunks,
    ));
    let destination = Arc::new(MockConnection::new(
        WarehouseKind::Postgres,
        columns,
        Vec::new(),
    ));
    let source_connector = Arc::new(
        MockConnector::new(Arc::clone(&source)).failing_connects(source_connect_failures),
    );

    let mut registry = ConnectorRegistry::new();
    registry.register(Arc::clone(&source_connector) as Arc<dyn WarehouseConnector>);
    registry.register(Arc::new(MockConnector::new(Arc::clone(&destination))));

    let engine = SyncEngine::new(Arc::new(registry), codec, store).with_options(
        SyncOptions::default()
            .with_batch_size(2)
            .with_retry(RetryPolicy::new(
                3,
                BackoffStrategy::new(1, 10).with_jitter(false),
            )),
    );

    let job = SyncJob::new(
        "acme",
        SyncTarget::new(WarehouseKind::ClickHouse, source_token),
        SyncTarget::new(WarehouseKind::Postgres, dest_token),
        "orders",
    );

    Harness {
        engine,
        source_connector,
        source,
        destination,
        job,
    }
}

#[tokio::test(start_paused = true)]
async fn test_happy_path_moves_all_rows_in_order() {
    let h = harness(orders_columns(), orders_rows(), 0);
    let job_id = h.job.id;

    let report = h.engine.run(h.job).await.unwrap();
    assert_eq!(report.rows_synced, 3);
    assert_eq!(report.rows_skipped, 0);
    assert_eq!(report.batches_written, 2);

    let written = h.destination.written_rows();
    let ids: Vec<i64> = written
        .iter()
        .map(|r| r.get(0).and_then(|v| v.as_i64()).unwrap())
        .collect();
    assert_eq!(ids, vec![1, 2, 3]);

    assert_eq!(h.destination.ensured_tables.lock().as_slice(), ["orders"]);
    assert!(h.source.is_closed());
    assert!(h.destination.is_closed());

    let record = h.engine.store().get(job_id).await.unwrap().unwrap();
    assert_eq!(record.status, JobStatus::Succeeded);
    assert_eq!(record.rows_synced, 3);
    assert!(record.error.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_null_in_nullable_column_stays_null() {
    let h = harness(orders_columns(), orders_rows(), 0);

    h.engine.run(h.job).await.unwrap();

    let written = h.destination.written_rows();
    assert_eq!(written[1].get(1), Some(&Value::Null));
    // Not the string "null"
    assert_ne!(written[1].get(1), Some(&Value::String("null".into())));
}

#[tokio::test(start_paused = true)]
async fn test_transient_connect_failures_recover() {
    let h = harness(orders_columns(), orders_rows(), 2);

    let report = h.engine.run(h.job).await.unwrap();
    assert_eq!(report.rows_synced, 3);
    assert_eq!(h.source_connector.connect_attempts.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn test_connect_failures_exhaust_budget() {
    let h = harness(orders_columns(), orders_rows(), 3);
    let job_id = h.job.id;

    let err = h.engine.run(h.job).await.unwrap_err();
    assert!(matches!(err, FerryError::Connection(_)));
    assert_eq!(h.source_connector.connect_attempts.load(Ordering::SeqCst), 3);

    let record = h.engine.store().get(job_id).await.unwrap().unwrap();
    assert_eq!(record.status, JobStatus::Failed);
    assert!(record.error.is_some());
}

#[tokio::test(start_paused = true)]
async fn test_zero_columns_fails_before_any_write() {
    let h = harness(Vec::new(), orders_rows(), 0);
    let job_id = h.job.id;

    let err = h.engine.run(h.job).await.unwrap_err();
    assert!(matches!(err, FerryError::SchemaIntrospection(_)));

    assert_eq!(h.destination.write_attempts.load(Ordering::SeqCst), 0);
    assert!(h.destination.ensured_tables.lock().is_empty());
    // Cleanup still ran on both sides
    assert!(h.source.is_closed());
    assert!(h.destination.is_closed());

    let record = h.engine.store().get(job_id).await.unwrap().unwrap();
    assert_eq!(record.status, JobStatus::Failed);
}

#[tokio::test(start_paused = true)]
async fn test_malformed_row_is_skipped_not_fatal() {
    let mut chunks = orders_rows();
    // Wrong arity: two values for a three-column table
    chunks[0].insert(1, vec![serde_json::json!(99), serde_json::json!("short")]);

    let h = harness(orders_columns(), chunks, 0);
    let report = h.engine.run(h.job).await.unwrap();

    assert_eq!(report.rows_synced, 3);
    assert_eq!(report.rows_skipped, 1);
    let ids: Vec<i64> = h
        .destination
        .written_rows()
        .iter()
        .map(|r| r.get(0).and_then(|v| v.as_i64()).unwrap())
        .collect();
    assert_eq!(ids, vec![1, 2, 3]);
}

#[tokio::test(start_paused = true)]
async fn test_batch_write_retries_then_succeeds() {
    let h = harness(orders_columns(), orders_rows(), 0);
    h.destination.write_failures.store(2, Ordering::SeqCst);

    let report = h.engine.run(h.job).await.unwrap();
    assert_eq!(report.rows_synced, 3);
    // First batch took three attempts, second took one
    assert_eq!(h.destination.write_attempts.load(Ordering::SeqCst), 4);
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_stops_between_batches() {
    let h = harness(orders_columns(), orders_rows(), 0);
    let job_id = h.job.id;

    let cancel = Arc::new(AtomicBool::new(true));
    let err = h.engine.run_with_cancel(h.job, cancel).await.unwrap_err();
    assert!(matches!(err, FerryError::Cancelled));

    assert!(h.source.is_closed());
    assert!(h.destination.is_closed());
    let record = h.engine.store().get(job_id).await.unwrap().unwrap();
    assert_eq!(record.status, JobStatus::Failed);
}

#[tokio::test(start_paused = true)]
async fn test_failure_record_carries_no_credentials() {
    let h = harness(orders_columns(), orders_rows(), 3);
    let job_id = h.job.id;

    let _ = h.engine.run(h.job).await;
    let record = h.engine.store().get(job_id).await.unwrap().unwrap();
    let error = record.error.unwrap();
    assert!(!error.contains("src-secret"));
    assert!(!error.contains("dst-secret"));
    assert!(!error.contains("fy1."));
}

#[tokio::test(start_paused = true)]
async fn test_dispatcher_deduplicates_by_idempotency_key() {
    let h = harness(orders_columns(), orders_rows(), 0);
    let dispatcher = JobDispatcher::new(Arc::new(h.engine));

    let first = dispatcher.submit(h.job.clone()).unwrap();
    let handle = first.handle().cloned().expect("first submission accepted");

    let mut duplicate = h.job.clone();
    duplicate.id = uuid::Uuid::new_v4();
    duplicate.submitted_at = h.job.submitted_at;
    let second = dispatcher.submit(duplicate).unwrap();
    assert!(matches!(second, SubmitOutcome::Duplicate { job_id } if job_id == h.job.id));

    let report = handle.wait().await.unwrap();
    assert_eq!(report.rows_synced, 3);
    assert!(dispatcher.is_finished(h.job.id).await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn test_validation_failure_is_synchronous() {
    let h = harness(orders_columns(), orders_rows(), 0);
    let dispatcher = JobDispatcher::new(Arc::new(h.engine));

    let mut bad = h.job.clone();
    bad.table = "orders; DROP TABLE orders".into();
    let err = dispatcher.submit(bad).unwrap_err();
    assert!(matches!(err, FerryError::Validation(_)));
}

#[tokio::test(start_paused = true)]
async fn test_job_recording_retries_transient_store_failures() {
    let store = Arc::new(FlakyStore::new());
    store.insert_failures.store(1, Ordering::SeqCst);
    let h = harness_with_store(
        orders_columns(),
        orders_rows(),
        0,
        Arc::clone(&store) as Arc<dyn JobStore>,
    );
    let job_id = h.job.id;

    let report = h.engine.run(h.job).await.unwrap();
    assert_eq!(report.rows_synced, 3);
    assert_eq!(store.insert_attempts.load(Ordering::SeqCst), 2);

    let record = store.get(job_id).await.unwrap().unwrap();
    assert_eq!(record.status, JobStatus::Succeeded);
}

#[tokio::test(start_paused = true)]
async fn test_recording_failures_exhaust_budget_before_any_backend_io() {
    let store = Arc::new(FlakyStore::new());
    store.insert_failures.store(3, Ordering::SeqCst);
    let h = harness_with_store(
        orders_columns(),
        orders_rows(),
        0,
        Arc::clone(&store) as Arc<dyn JobStore>,
    );

    let err = h.engine.run(h.job).await.unwrap_err();
    assert!(matches!(err, FerryError::Connection(_)));
    assert_eq!(store.insert_attempts.load(Ordering::SeqCst), 3);
    assert_eq!(h.source_connector.connect_attempts.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_store_hiccup_on_terminal_update_never_masks_success() {
    let store = Arc::new(FlakyStore::new());
    store.fail_terminal_updates.store(true, Ordering::SeqCst);
    let h = harness_with_store(
        orders_columns(),
        orders_rows(),
        0,
        Arc::clone(&store) as Arc<dyn JobStore>,
    );
    let job_id = h.job.id;

    let report = h.engine.run(h.job).await.unwrap();
    assert_eq!(report.rows_synced, 3);

    // The record stays at its last successful transition
    let record = store.get(job_id).await.unwrap().unwrap();
    assert_eq!(record.status, JobStatus::Running);
}

#[tokio::test(start_paused = true)]
async fn test_rerun_against_merge_destination_leaves_one_copy_per_key() {
    let codec = Arc::new(CredentialCodec::new(&[3u8; 32]));
    let source_token = codec
        .encrypt(&CredentialRecord::new("src.internal", 8123).with_password("src-secret"))
        .unwrap();
    let dest_token = codec
        .encrypt(&CredentialRecord::new("dst.internal", 5432).with_password("dst-secret"))
        .unwrap();

    let source = Arc::new(MockConnection::new(
        WarehouseKind::ClickHouse,
        orders_columns(),
        orders_rows(),
    ));
    let destination = Arc::new(
        MockConnection::new(WarehouseKind::Postgres, orders_columns(), Vec::new()).merging(),
    );

    let mut registry = ConnectorRegistry::new();
    registry.register(Arc::new(MockConnector::new(Arc::clone(&source))));
    registry.register(Arc::new(MockConnector::new(Arc::clone(&destination))));

    let engine = SyncEngine::new(
        Arc::new(registry),
        codec,
        Arc::new(MemoryJobStore::new()),
    )
    .with_options(
        SyncOptions::default()
            .with_batch_size(2)
            .with_retry(RetryPolicy::new(
                3,
                BackoffStrategy::new(1, 10).with_jitter(false),
            )),
    );

    let first = SyncJob::new(
        "acme",
        SyncTarget::new(WarehouseKind::ClickHouse, source_token.clone()),
        SyncTarget::new(WarehouseKind::Postgres, dest_token.clone()),
        "orders",
    );
    engine.run(first).await.unwrap();
    let after_first = destination.written_rows();
    assert_eq!(after_first.len(), 3);

    let second = SyncJob::new(
        "acme",
        SyncTarget::new(WarehouseKind::ClickHouse, source_token),
        SyncTarget::new(WarehouseKind::Postgres, dest_token),
        "orders",
    );
    engine.run(second).await.unwrap();
    let after_second = destination.written_rows();
    assert_eq!(after_second, after_first);
}

#[tokio::test(start_paused = true)]
async fn test_idempotency_key_evicted_after_terminal_state() {
    let h = harness(orders_columns(), orders_rows(), 0);
    let dispatcher = JobDispatcher::new(Arc::new(h.engine));

    let first = dispatcher.submit(h.job.clone()).unwrap();
    first.handle().cloned().unwrap().wait().await.unwrap();

    // A finished job no longer blocks a fresh run with the same key
    let mut again = h.job.clone();
    again.id = Uuid::new_v4();
    let second = dispatcher.submit(again).unwrap();
    let handle = second
        .handle()
        .cloned()
        .expect("resubmission accepted after completion");
    handle.wait().await.unwrap();
}

#[tokio::test]
async fn test_per_call_timeout_is_classified_retryable() {
    struct HangingConnection {
        inner: MockConnection,
    }

    #[async_trait]
    impl WarehouseConnection for HangingConnection {
        fn kind(&self) -> WarehouseKind {
            self.inner.kind
        }
        async fn introspect(&self, _table: &str) -> Result<Vec<ColumnDescriptor>> {
            futures::future::pending().await
        }
        async fn stream_table(
            &self,
            table: &str,
            columns: &[ColumnDescriptor],
            filter: Option<&TenancyFilter>,
        ) -> Result<RowStream> {
            self.inner.stream_table(table, columns, filter).await
        }
        async fn ensure_table(&self, table: &str, columns: &[ColumnDescriptor]) -> Result<()> {
            self.inner.ensure_table(table, columns).await
        }
        async fn write_batch(
            &self,
            table: &str,
            columns: &[ColumnDescriptor],
            rows: &[Row],
        ) -> Result<()> {
            self.inner.write_batch(table, columns, rows).await
        }
        async fn close(&self) -> Result<()> {
            self.inner.close().await
        }
        fn is_closed(&self) -> bool {
            self.inner.is_closed()
        }
    }

    let codec = Arc::new(CredentialCodec::new(&[3u8; 32]));
    let token = codec
        .encrypt(&CredentialRecord::new("h.internal", 8123))
        .unwrap();

    let hanging = Arc::new(HangingConnection {
        inner: MockConnection::new(WarehouseKind::ClickHouse, orders_columns(), Vec::new()),
    });
    let destination = Arc::new(MockConnection::new(
        WarehouseKind::Postgres,
        orders_columns(),
        Vec::new(),
    ));

    struct HangingConnector {
        connection: Arc<HangingConnection>,
    }

    #[async_trait]
    impl WarehouseConnector for HangingConnector {
        fn kind(&self) -> WarehouseKind {
            WarehouseKind::ClickHouse
        }
        async fn connect(
            &self,
            _credentials: &CredentialRecord,
        ) -> Result<Arc<dyn WarehouseConnection>> {
            Ok(Arc::clone(&self.connection) as Arc<dyn WarehouseConnection>)
        }
    }

    let mut registry = ConnectorRegistry::new();
    registry.register(Arc::new(HangingConnector {
        connection: Arc::clone(&hanging),
    }));
    registry.register(Arc::new(MockConnector::new(Arc::clone(&destination))));

    let engine = SyncEngine::new(
        Arc::new(registry),
        codec,
        Arc::new(MemoryJobStore::new()),
    )
    .with_options(
        SyncOptions::default()
            .with_call_timeout(Duration::from_millis(20))
            .with_retry(RetryPolicy::new(
                1,
                BackoffStrategy::new(1, 10).with_jitter(false),
            )),
    );

    let job = SyncJob::new(
        "acme",
        SyncTarget::new(WarehouseKind::ClickHouse, token.clone()),
        SyncTarget::new(WarehouseKind::Postgres, token),
        "orders",
    );

    let err = engine.run(job).await.unwrap_err();
    assert!(matches!(err, FerryError::Timeout(_)));
    assert!(err.is_retryable());
}
