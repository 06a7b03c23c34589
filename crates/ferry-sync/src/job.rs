//! Sync job payload and lifecycle states

use chrono::{DateTime, Utc};
use ferry_core::{FerryError, Result, TenancyFilter, WarehouseKind};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One side of a sync: which backend and the encrypted credentials for it.
///
/// The token stays encrypted here; it is decrypted only inside job
/// execution and the plaintext never outlives the connection open.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncTarget {
    pub kind: WarehouseKind,
    /// Encrypted credential token (or a plaintext JSON record from legacy
    /// callers, resolved by the codec)
    pub credentials: String,
}

impl SyncTarget {
    pub fn new(kind: WarehouseKind, credentials: impl Into<String>) -> Self {
        Self {
            kind,
            credentials: credentials.into(),
        }
    }
}

/// A validated request to copy one table from a source warehouse into a
/// destination warehouse.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncJob {
    pub id: Uuid,
    /// Organization the job belongs to; namespaces idempotency keys
    pub org: String,
    pub source: SyncTarget,
    pub destination: SyncTarget,
    /// Table name, identical on both sides
    pub table: String,
    /// Optional single-tenant restriction on the source read
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenancy: Option<TenancyFilter>,
    /// Earliest time the job may start; `None` runs immediately
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled_at: Option<DateTime<Utc>>,
    /// When the job was submitted
    pub submitted_at: DateTime<Utc>,
}

impl SyncJob {
    pub fn new(
        org: impl Into<String>,
        source: SyncTarget,
        destination: SyncTarget,
        table: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            org: org.into(),
            source,
            destination,
            table: table.into(),
            tenancy: None,
            scheduled_at: None,
            submitted_at: Utc::now(),
        }
    }

    pub fn with_tenancy(mut self, filter: TenancyFilter) -> Self {
        self.tenancy = Some(filter);
        self
    }

    pub fn with_schedule(mut self, at: DateTime<Utc>) -> Self {
        self.scheduled_at = Some(at);
        self
    }

    /// Deduplication key: same org, table and submission second collapse
    /// to one execution.
    pub fn idempotency_key(&self) -> String {
        format!(
            "{}:{}:{}",
            self.org,
            self.table,
            self.submitted_at.timestamp()
        )
    }

    /// Check the payload before any connection is opened.
    ///
    /// Fails with `FerryError::Validation`; validation never touches
    /// credentials beyond presence.
    pub fn validate(&self) -> Result<()> {
        if self.org.trim().is_empty() {
            return Err(FerryError::Validation("org must not be empty".into()));
        }
        if self.table.trim().is_empty() {
            return Err(FerryError::Validation("table must not be empty".into()));
        }
        if !is_safe_identifier(&self.table) {
            return Err(FerryError::Validation(format!(
                "table name '{}' contains unsupported characters",
                self.table
            )));
        }
        if self.source.credentials.trim().is_empty() {
            return Err(FerryError::Validation(
                "source credentials must not be empty".into(),
            ));
        }
        if self.destination.credentials.trim().is_empty() {
            return Err(FerryError::Validation(
                "destination credentials must not be empty".into(),
            ));
        }
        if let Some(filter) = &self.tenancy {
            if filter.column.trim().is_empty() {
                return Err(FerryError::Validation(
                    "tenancy filter column must not be empty".into(),
                ));
            }
            if !is_safe_identifier(&filter.column) {
                return Err(FerryError::Validation(format!(
                    "tenancy filter column '{}' contains unsupported characters",
                    filter.column
                )));
            }
        }
        Ok(())
    }
}

/// Identifier whitelist: table and column names reach SQL text (values
/// never do), so they are restricted to word characters and dots.
fn is_safe_identifier(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
}

/// Externally visible lifecycle of a submitted job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job() -> SyncJob {
        SyncJob::new(
            "acme",
            SyncTarget::new(WarehouseKind::ClickHouse, "fy1.c291cmNl"),
            SyncTarget::new(WarehouseKind::Postgres, "fy1.ZGVzdA"),
            "orders",
        )
    }

    #[test]
    fn test_valid_job_passes() {
        assert!(job().validate().is_ok());
    }

    #[test]
    fn test_empty_fields_rejected() {
        let mut j = job();
        j.org = "  ".into();
        assert!(matches!(j.validate(), Err(FerryError::Validation(_))));

        let mut j = job();
        j.table = String::new();
        assert!(matches!(j.validate(), Err(FerryError::Validation(_))));

        let mut j = job();
        j.source.credentials = String::new();
        assert!(matches!(j.validate(), Err(FerryError::Validation(_))));

        let mut j = job();
        j.destination.credentials = "".into();
        assert!(matches!(j.validate(), Err(FerryError::Validation(_))));
    }

    #[test]
    fn test_hostile_identifiers_rejected() {
        let mut j = job();
        j.table = "orders; DROP TABLE users".into();
        assert!(matches!(j.validate(), Err(FerryError::Validation(_))));

        let mut j = job().with_tenancy(TenancyFilter {
            column: "tenant' OR '1'='1".into(),
            value: "t-42".into(),
        });
        j.table = "orders".into();
        assert!(matches!(j.validate(), Err(FerryError::Validation(_))));
    }

    #[test]
    fn test_schema_qualified_table_allowed() {
        let mut j = job();
        j.table = "analytics.orders_v2".into();
        assert!(j.validate().is_ok());
    }

    #[test]
    fn test_idempotency_key_shape() {
        let j = job();
        let key = j.idempotency_key();
        assert!(key.starts_with("acme:orders:"));
        assert_eq!(key, j.idempotency_key());

        let mut other = job();
        other.submitted_at = j.submitted_at;
        assert_eq!(key, other.idempotency_key());
    }

    #[test]
    fn test_status_terminal() {
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
        assert!(JobStatus::Succeeded.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
    }
}
