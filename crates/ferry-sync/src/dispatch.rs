//! Job submission and background execution
//!
//! At-least-once execution: a submitted job runs to a terminal state, and
//! re-submission with the same idempotency key returns the original job
//! instead of starting a second run.

use crate::{JobRecord, SyncEngine, SyncJob, SyncReport};
use ferry_core::{FerryError, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::task::JoinHandle;
use tracing::{debug, info};
use uuid::Uuid;

/// A running job's control surface
#[derive(Debug)]
pub struct JobHandle {
    id: Uuid,
    cancel: Arc<AtomicBool>,
    task: Mutex<Option<JoinHandle<Result<SyncReport>>>>,
}

impl JobHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Request cooperative cancellation. The job stops between batches;
    /// a batch already handed to the destination completes.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    /// Wait for the job to reach a terminal state.
    pub async fn wait(&self) -> Result<SyncReport> {
        let task = self
            .task
            .lock()
            .take()
            .ok_or_else(|| FerryError::Other("job already awaited".into()))?;
        task.await
            .map_err(|e| FerryError::Other(format!("job task aborted: {}", e)))?
    }
}

/// Submits jobs to background tasks and deduplicates by idempotency key.
pub struct JobDispatcher {
    engine: Arc<SyncEngine>,
    /// idempotency key -> job id of the in-flight execution. Entries are
    /// evicted once the job reaches a terminal state; the map only holds
    /// running jobs, so it cannot grow with dispatcher lifetime.
    seen: Arc<Mutex<HashMap<String, Uuid>>>,
}

impl JobDispatcher {
    pub fn new(engine: Arc<SyncEngine>) -> Self {
        Self {
            engine,
            seen: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Submit a job for background execution.
    ///
    /// Validation failures surface here, synchronously. A duplicate
    /// submission returns the already-accepted job id with no new handle.
    pub fn submit(&self, job: SyncJob) -> Result<SubmitOutcome> {
        job.validate()?;

        let key = job.idempotency_key();
        {
            let mut seen = self.seen.lock();
            if let Some(existing) = seen.get(&key) {
                debug!(job_id = %existing, "duplicate submission collapsed");
                return Ok(SubmitOutcome::Duplicate { job_id: *existing });
            }
            seen.insert(key, job.id);
        }

        let cancel = Arc::new(AtomicBool::new(false));
        let handle = JobHandle {
            id: job.id,
            cancel: Arc::clone(&cancel),
            task: Mutex::new(None),
        };

        let engine = Arc::clone(&self.engine);
        let seen = Arc::clone(&self.seen);
        let job_id = job.id;
        let task = tokio::spawn(async move {
            if let Some(delay) = start_delay(&job) {
                debug!(job_id = %job.id, delay_secs = delay.as_secs(), "job start deferred");
                tokio::time::sleep(delay).await;
            }
            let key = job.idempotency_key();
            let result = engine.run_with_cancel(job, cancel).await;
            seen.lock().remove(&key);
            result
        });
        *handle.task.lock() = Some(task);

        info!(job_id = %job_id, "job accepted");
        Ok(SubmitOutcome::Accepted {
            handle: Arc::new(handle),
        })
    }

    /// Look up a job's persisted record
    pub async fn status(&self, job_id: Uuid) -> Result<Option<JobRecord>> {
        self.engine.store().get(job_id).await
    }

    /// Whether a job has reached a terminal state
    pub async fn is_finished(&self, job_id: Uuid) -> Result<bool> {
        Ok(self
            .status(job_id)
            .await?
            .map(|r| r.status.is_terminal())
            .unwrap_or(false))
    }
}

/// Time remaining until a scheduled job may start
fn start_delay(job: &SyncJob) -> Option<std::time::Duration> {
    let at = job.scheduled_at?;
    (at - chrono::Utc::now()).to_std().ok()
}

/// Result of a submission
#[derive(Debug)]
pub enum SubmitOutcome {
    /// A new execution was started
    Accepted { handle: Arc<JobHandle> },
    /// The same logical job was already accepted
    Duplicate { job_id: Uuid },
}

impl SubmitOutcome {
    pub fn job_id(&self) -> Uuid {
        match self {
            SubmitOutcome::Accepted { handle } => handle.id(),
            SubmitOutcome::Duplicate { job_id } => *job_id,
        }
    }

    pub fn handle(&self) -> Option<&Arc<JobHandle>> {
        match self {
            SubmitOutcome::Accepted { handle } => Some(handle),
            SubmitOutcome::Duplicate { .. } => None,
        }
    }
}
