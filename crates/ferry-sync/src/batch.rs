//! Row batching with size and dwell bounds

use ferry_core::Row;
use std::time::{Duration, Instant};

/// Default number of rows per destination write
pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Default maximum time a non-empty batch may wait before flushing
pub const DEFAULT_MAX_DWELL: Duration = Duration::from_secs(30);

/// An ordered accumulation of converted rows awaiting a destination write.
///
/// Flushed when either bound is reached, or at stream end. Rows leave in
/// the order they arrived.
#[derive(Debug)]
pub struct RowBatch {
    rows: Vec<Row>,
    capacity: usize,
    max_dwell: Duration,
    opened_at: Option<Instant>,
}

impl RowBatch {
    pub fn new(capacity: usize, max_dwell: Duration) -> Self {
        Self {
            rows: Vec::with_capacity(capacity.min(DEFAULT_BATCH_SIZE)),
            capacity: capacity.max(1),
            max_dwell,
            opened_at: None,
        }
    }

    /// Append a row, starting the dwell clock on the first row.
    pub fn push(&mut self, row: Row) {
        if self.rows.is_empty() {
            self.opened_at = Some(Instant::now());
        }
        self.rows.push(row);
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Whether a bound has been hit and the batch should be written.
    pub fn should_flush(&self) -> bool {
        if self.rows.is_empty() {
            return false;
        }
        if self.rows.len() >= self.capacity {
            return true;
        }
        self.opened_at
            .map(|t| t.elapsed() >= self.max_dwell)
            .unwrap_or(false)
    }

    /// Take the accumulated rows, resetting the batch.
    pub fn take(&mut self) -> Vec<Row> {
        self.opened_at = None;
        std::mem::take(&mut self.rows)
    }
}

impl Default for RowBatch {
    fn default() -> Self {
        Self::new(DEFAULT_BATCH_SIZE, DEFAULT_MAX_DWELL)
    }
}
