//! # Job Model
//!
//! A job is one logical batch-processing run. Its partitioning (batch size, batch
//! count, branching factor) is frozen by the root dispatcher and copied verbatim into
//! every descendant invocation, so any dispatcher can derive spans and batch ids
//! without consulting shared state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::batch::BatchDescriptor;
use super::monitor::MonitorParams;
use super::range::IndexRange;
use crate::error::{FanoutError, Result};
use crate::orchestration::partition_planner::PartitionPlan;

/// Opaque unique job token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    /// Generate a fresh id; ids are never reused across runs
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for JobId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for JobId {
    type Err = FanoutError;

    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| FanoutError::invalid_config(format!("invalid job id '{s}': {e}")))
    }
}

/// Reference to a remotely invocable function (ARN, URL, queue name...)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FunctionRef(String);

impl FunctionRef {
    pub fn new(reference: impl Into<String>) -> Self {
        Self(reference.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for FunctionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Job fields inherited unchanged by every dispatch invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub job_id: JobId,
    pub dataset_range: IndexRange,
    pub batch_size: u64,
    pub num_batches: u64,
    pub branching_factor: u64,
    pub num_levels: u32,
    pub start_time: DateTime<Utc>,
    pub timeout_secs: u64,
    #[serde(default)]
    pub job_parameters: serde_json::Value,
    pub worker_function: FunctionRef,
    /// Runs intermediate levels and handed-off pages; unused by single-level tree jobs
    #[serde(default)]
    pub dispatch_function: Option<FunctionRef>,
    #[serde(default)]
    pub combiner_function: Option<FunctionRef>,
    #[serde(default)]
    pub monitor_name: Option<String>,
    /// Page size of throttled dispatch, frozen so resumed rounds match the first one
    #[serde(default)]
    pub max_concurrent_jobs: Option<u64>,
}

impl Job {
    /// Freeze a partition plan into a new job
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        job_id: JobId,
        dataset_range: IndexRange,
        plan: PartitionPlan,
        num_levels: u32,
        timeout_secs: u64,
        job_parameters: serde_json::Value,
        worker_function: FunctionRef,
        dispatch_function: Option<FunctionRef>,
    ) -> Self {
        Self {
            job_id,
            dataset_range,
            batch_size: plan.batch_size,
            num_batches: plan.num_batches,
            branching_factor: plan.branching_factor,
            num_levels,
            start_time: Utc::now(),
            timeout_secs,
            job_parameters,
            worker_function,
            dispatch_function,
            combiner_function: None,
            monitor_name: None,
            max_concurrent_jobs: None,
        }
    }

    pub fn with_combiner(mut self, combiner: Option<FunctionRef>) -> Self {
        self.combiner_function = combiner;
        self
    }

    pub fn with_max_concurrent_jobs(mut self, max_concurrent_jobs: Option<u64>) -> Self {
        self.max_concurrent_jobs = max_concurrent_jobs;
        self
    }

    pub fn with_start_time(mut self, start_time: DateTime<Utc>) -> Self {
        self.start_time = start_time;
        self
    }

    pub fn plan(&self) -> PartitionPlan {
        PartitionPlan {
            batch_size: self.batch_size,
            num_batches: self.num_batches,
            branching_factor: self.branching_factor,
        }
    }

    /// Whether batches go out in cursor-driven pages instead of a tree walk
    pub fn is_throttled(&self) -> bool {
        self.max_concurrent_jobs
            .is_some_and(|max| max < self.num_batches)
    }

    /// Function that runs child dispatch steps and handed-off pages
    pub fn dispatcher(&self) -> Result<&FunctionRef> {
        self.dispatch_function
            .as_ref()
            .filter(|function| !function.is_blank())
            .ok_or_else(|| {
                FanoutError::invalid_config(format!(
                    "job {} has no dispatch function",
                    self.job_id
                ))
            })
    }

    /// Whether dispatchers at `level` emit batches rather than sub-dispatchers
    pub fn is_leaf_level(&self, level: u32) -> bool {
        level.saturating_add(1) >= self.num_levels
    }

    /// Index span covered by each child of a dispatcher at `level`:
    /// `branching_factor^(num_levels - level - 1) * batch_size`
    pub fn next_span(&self, level: u32) -> Result<u64> {
        if level >= self.num_levels {
            return Err(FanoutError::invalid_config(format!(
                "level {level} is deeper than the configured {} levels",
                self.num_levels
            )));
        }
        let exponent = self.num_levels - level - 1;
        self.branching_factor
            .checked_pow(exponent)
            .and_then(|fan| fan.checked_mul(self.batch_size))
            .ok_or_else(|| {
                FanoutError::invalid_config(format!(
                    "span at level {level} overflows (branching factor {}, batch size {})",
                    self.branching_factor, self.batch_size
                ))
            })
    }

    /// Deterministic batch id of the batch starting at `range_start`
    pub fn batch_id_for(&self, range_start: u64) -> u64 {
        if self.batch_size == 0 {
            return 0;
        }
        range_start.saturating_sub(self.dataset_range.start) / self.batch_size
    }

    /// Index range of batch `batch_id`, or `None` past the last batch
    pub fn batch_range(&self, batch_id: u64) -> Option<IndexRange> {
        if batch_id >= self.num_batches {
            return None;
        }
        let start = batch_id
            .checked_mul(self.batch_size)
            .and_then(|offset| offset.checked_add(self.dataset_range.start))?;
        let end = start.saturating_add(self.batch_size).min(self.dataset_range.end);
        Some(IndexRange { start, end })
    }

    pub fn batch_descriptor(&self, batch_id: u64) -> Option<BatchDescriptor> {
        self.batch_range(batch_id).map(|range| BatchDescriptor {
            job_id: self.job_id,
            batch_id,
            range,
        })
    }

    /// Parameters the workflow engine hands to every monitor poll
    pub fn monitor_params(&self) -> MonitorParams {
        MonitorParams {
            job_id: self.job_id,
            num_batches: self.num_batches,
            start_time: self.start_time,
            timeout_secs: self.timeout_secs,
            combiner_function: self.combiner_function.clone(),
        }
    }

    /// Check the frozen partitioning before trusting an inherited job
    pub fn validate(&self) -> Result<()> {
        if self.num_levels == 0 {
            return Err(FanoutError::invalid_config("num_levels must be at least 1"));
        }
        if self.worker_function.is_blank() {
            return Err(FanoutError::invalid_config("worker function reference is required"));
        }
        if self.max_concurrent_jobs == Some(0) {
            return Err(FanoutError::invalid_config("max_concurrent_jobs must be positive"));
        }
        if self.num_levels > 1 || self.max_concurrent_jobs.is_some() {
            self.dispatcher()?;
        }
        let range_size = self.dataset_range.len();
        if range_size == 0 {
            return if self.num_batches == 0 {
                Ok(())
            } else {
                Err(FanoutError::invalid_config(
                    "empty dataset range cannot carry batches",
                ))
            };
        }
        if self.batch_size == 0 {
            return Err(FanoutError::invalid_config("batch_size must be positive"));
        }
        let expected = range_size.div_ceil(self.batch_size);
        if expected != self.num_batches {
            return Err(FanoutError::invalid_config(format!(
                "num_batches {} does not match ceil({range_size}/{}) = {expected}",
                self.num_batches, self.batch_size
            )));
        }
        if self.branching_factor == 0 {
            return Err(FanoutError::invalid_config("branching_factor must be positive"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn job(start: u64, end: u64, batch_size: u64, branching_factor: u64, levels: u32) -> Job {
        let range = IndexRange::new(start, end).unwrap();
        Job::new(
            JobId::new(),
            range,
            PartitionPlan {
                batch_size,
                num_batches: range.len().div_ceil(batch_size),
                branching_factor,
            },
            levels,
            300,
            json!({"source": "catalog-a"}),
            FunctionRef::new("worker"),
            Some(FunctionRef::new("dispatcher")),
        )
    }

    #[test]
    fn test_next_span_per_level() {
        let job = job(0, 1000, 50, 5, 2);
        assert_eq!(job.next_span(0).unwrap(), 250);
        assert_eq!(job.next_span(1).unwrap(), 50);
        assert!(job.next_span(2).is_err());
    }

    #[test]
    fn test_next_span_overflow_is_rejected() {
        let job = job(0, u64::MAX, u64::MAX / 4, u64::MAX, 3);
        assert!(matches!(job.next_span(0), Err(FanoutError::InvalidConfig(_))));
    }

    #[test]
    fn test_batch_ids_are_relative_to_dataset_start() {
        let job = job(1_000, 1_230, 50, 5, 1);
        assert_eq!(job.num_batches, 5);
        assert_eq!(job.batch_id_for(1_000), 0);
        assert_eq!(job.batch_id_for(1_150), 3);
        assert_eq!(
            job.batch_range(4),
            Some(IndexRange { start: 1_200, end: 1_230 })
        );
        assert_eq!(job.batch_range(5), None);
    }

    #[test]
    fn test_leaf_level_detection() {
        let job = job(0, 100, 10, 4, 3);
        assert!(!job.is_leaf_level(0));
        assert!(!job.is_leaf_level(1));
        assert!(job.is_leaf_level(2));
    }

    #[test]
    fn test_validate_catches_inconsistent_batch_count() {
        let mut job = job(0, 100, 10, 4, 2);
        assert!(job.validate().is_ok());
        job.num_batches = 9;
        assert!(job.validate().is_err());
    }

    #[test]
    fn test_dispatcher_required_by_deep_or_throttled_jobs() {
        let mut single = job(0, 100, 10, 10, 1);
        single.dispatch_function = None;
        assert!(single.validate().is_ok());
        assert!(single.dispatcher().is_err());

        let throttled = single.clone().with_max_concurrent_jobs(Some(4));
        assert!(throttled.is_throttled());
        assert!(throttled.validate().unwrap_err().is_config_error());

        let mut deep = job(0, 100, 10, 4, 2);
        deep.dispatch_function = Some(FunctionRef::new("  "));
        assert!(deep.validate().is_err());
    }

    #[test]
    fn test_throttle_ceiling_at_batch_count_walks_the_tree() {
        let job = job(0, 100, 10, 4, 2);
        assert!(!job.clone().with_max_concurrent_jobs(Some(10)).is_throttled());
        assert!(job.clone().with_max_concurrent_jobs(Some(9)).is_throttled());
        assert!(job
            .with_max_concurrent_jobs(Some(0))
            .validate()
            .is_err());
    }

    #[test]
    fn test_frozen_ceiling_survives_serialization() {
        let job = job(0, 100, 10, 4, 2).with_max_concurrent_jobs(Some(3));
        let decoded: Job = serde_json::from_value(serde_json::to_value(&job).unwrap()).unwrap();
        assert_eq!(decoded.max_concurrent_jobs, Some(3));
    }

    #[test]
    fn test_job_id_round_trips_through_display() {
        let id = JobId::new();
        let parsed: JobId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
        assert!("not-a-uuid".parse::<JobId>().is_err());
    }
}
