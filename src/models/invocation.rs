//! # Invocation Payloads
//!
//! Messages the coordinator sends through the invoker: one shape for child
//! dispatchers, one for worker units. Both are plain serde structs so any invocation
//! substrate that moves JSON can carry them.

use serde::{Deserialize, Serialize};

use super::batch::BatchDescriptor;
use super::job::{Job, JobId};
use super::range::IndexRange;
use crate::error::{FanoutError, Result};

/// Payload of a child dispatcher covering `range` at `level`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchInvocation {
    pub level: u32,
    pub range: IndexRange,
    pub job: Job,
}

impl DispatchInvocation {
    /// Root invocation spanning the whole dataset
    pub fn root(job: Job) -> Self {
        Self {
            level: 0,
            range: job.dataset_range,
            job,
        }
    }

    /// Child invocation one level deeper, inheriting the job unchanged
    pub fn child(&self, range: IndexRange) -> Self {
        Self {
            level: self.level + 1,
            range,
            job: self.job.clone(),
        }
    }

    /// Reject invocations deeper than configured, outside the dataset, or not on the
    /// span grid their parent level splits along.
    ///
    /// A level-`L` range must start at `dataset_start + k * next_span(L - 1)` and cover
    /// at most one such span; the root covers the whole dataset.
    pub fn validate(&self) -> Result<()> {
        self.job.validate()?;
        if self.level >= self.job.num_levels {
            return Err(FanoutError::invalid_config(format!(
                "dispatch level {} exceeds configured depth {}",
                self.level, self.job.num_levels
            )));
        }
        if !self.job.dataset_range.contains_range(&self.range) {
            return Err(FanoutError::invalid_config(format!(
                "sub-range {} is outside dataset range {}",
                self.range, self.job.dataset_range
            )));
        }
        if self.level == 0 {
            if self.range != self.job.dataset_range {
                return Err(FanoutError::invalid_config(format!(
                    "root range {} must cover dataset range {}",
                    self.range, self.job.dataset_range
                )));
            }
            return Ok(());
        }
        if self.range.is_empty() {
            return Ok(());
        }
        let span = self.job.next_span(self.level - 1)?;
        let offset = self.range.start - self.job.dataset_range.start;
        if span == 0 || offset % span != 0 || self.range.len() > span {
            return Err(FanoutError::invalid_config(format!(
                "sub-range {} at level {} is not aligned to spans of {span} from {}",
                self.range, self.level, self.job.dataset_range.start
            )));
        }
        Ok(())
    }
}

/// Payload handed to a worker unit for one batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerInvocation {
    pub job_id: JobId,
    pub batch_id: u64,
    pub start_index: u64,
    pub end_index: u64,
    #[serde(default)]
    pub job_parameters: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub monitor_name: Option<String>,
}

impl WorkerInvocation {
    pub fn for_batch(job: &Job, batch: &BatchDescriptor) -> Self {
        Self {
            job_id: batch.job_id,
            batch_id: batch.batch_id,
            start_index: batch.range.start,
            end_index: batch.range.end,
            job_parameters: job.job_parameters.clone(),
            monitor_name: job.monitor_name.clone(),
        }
    }

    pub fn range(&self) -> IndexRange {
        IndexRange {
            start: self.start_index,
            end: self.end_index,
        }
    }
}
