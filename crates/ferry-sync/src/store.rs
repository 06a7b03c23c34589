//! Job status persistence

use crate::{JobStatus, SyncJob};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ferry_core::{FerryError, Result, WarehouseKind};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// The persisted view of a job.
///
/// Carries no credential material in any field, including `error`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: Uuid,
    pub org: String,
    pub source_kind: WarehouseKind,
    pub destination_kind: WarehouseKind,
    pub table: String,
    pub status: JobStatus,
    /// Failure summary when status is `Failed`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub rows_synced: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobRecord {
    pub fn from_job(job: &SyncJob) -> Self {
        let now = Utc::now();
        Self {
            id: job.id,
            org: job.org.clone(),
            source_kind: job.source.kind,
            destination_kind: job.destination.kind,
            table: job.table.clone(),
            status: JobStatus::Pending,
            error: None,
            rows_synced: 0,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Persistence seam for job records.
///
/// The engine records a job before connecting and updates it on every
/// terminal transition, so an observer always sees a consistent status.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a new record. Fails on duplicate id.
    async fn insert(&self, record: JobRecord) -> Result<()>;

    /// Fetch a record by job id
    async fn get(&self, id: Uuid) -> Result<Option<JobRecord>>;

    /// Transition a job's status, optionally attaching a failure summary
    /// and the final row count.
    async fn update_status(
        &self,
        id: Uuid,
        status: JobStatus,
        error: Option<String>,
        rows_synced: u64,
    ) -> Result<()>;

    /// List records for one org, newest first
    async fn list_for_org(&self, org: &str) -> Result<Vec<JobRecord>>;
}

/// In-process store backed by a `RwLock`ed map. The default for embedded
/// use and tests; deployments wanting durability implement [`JobStore`]
/// over their own database.
#[derive(Debug, Default)]
pub struct MemoryJobStore {
    records: RwLock<HashMap<Uuid, JobRecord>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn insert(&self, record: JobRecord) -> Result<()> {
        let mut records = self.records.write();
        if records.contains_key(&record.id) {
            return Err(FerryError::Validation(format!(
                "job {} already recorded",
                record.id
            )));
        }
        records.insert(record.id, record);
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<JobRecord>> {
        Ok(self.records.read().get(&id).cloned())
    }

    async fn update_status(
        &self,
        id: Uuid,
        status: JobStatus,
        error: Option<String>,
        rows_synced: u64,
    ) -> Result<()> {
        let mut records = self.records.write();
        let record = records
            .get_mut(&id)
            .ok_or_else(|| FerryError::Validation(format!("unknown job {}", id)))?;
        record.status = status;
        record.error = error;
        record.rows_synced = rows_synced;
        record.updated_at = Utc::now();
        Ok(())
    }

    async fn list_for_org(&self, org: &str) -> Result<Vec<JobRecord>> {
        let mut out: Vec<JobRecord> = self
            .records
            .read()
            .values()
            .filter(|r| r.org == org)
            .cloned()
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(out)
    }
}
