//! # Batch Models
//!
//! Batches are the smallest unit of dispatched work. The coordinator creates their
//! descriptors; workers own the completion rows; the paginator tracks how much of the
//! batch space has been emitted with a resumption cursor.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::job::JobId;
use super::range::IndexRange;

/// One contiguous sub-range of the dataset, addressed by a deterministic id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BatchDescriptor {
    pub job_id: JobId,
    pub batch_id: u64,
    pub range: IndexRange,
}

/// Row a worker appends to the completion ledger when its batch finishes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionRow {
    pub job_id: JobId,
    pub batch_id: u64,
    pub timestamp: DateTime<Utc>,
}

impl CompletionRow {
    pub fn new(job_id: JobId, batch_id: u64) -> Self {
        Self {
            job_id,
            batch_id,
            timestamp: Utc::now(),
        }
    }
}

/// Marks how much of the batch space has been emitted.
///
/// `first_batch_id` is the first id the next page emits; `last_batch_id` is the
/// exclusive end of the batch space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResumptionCursor {
    pub job_id: JobId,
    pub first_batch_id: u64,
    pub last_batch_id: u64,
}

impl ResumptionCursor {
    /// Cursor for a job that has emitted nothing yet
    pub fn start(job_id: JobId, num_batches: u64) -> Self {
        Self {
            job_id,
            first_batch_id: 0,
            last_batch_id: num_batches,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.first_batch_id >= self.last_batch_id
    }

    pub fn remaining(&self) -> u64 {
        self.last_batch_id.saturating_sub(self.first_batch_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cursor_progress() {
        let job_id = JobId::new();
        let cursor = ResumptionCursor::start(job_id, 12);
        assert_eq!(cursor.remaining(), 12);
        assert!(!cursor.is_exhausted());

        let done = ResumptionCursor {
            first_batch_id: 12,
            ..cursor
        };
        assert!(done.is_exhausted());
        assert_eq!(done.remaining(), 0);
    }

    #[test]
    fn test_empty_job_cursor_is_exhausted() {
        assert!(ResumptionCursor::start(JobId::new(), 0).is_exhausted());
    }
}
