//! # Monitor Models
//!
//! Input and output of a single monitor poll. The workflow engine feeds the previous
//! report back in as the next input, so the report flattens the parameters it was
//! computed from.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::job::{FunctionRef, JobId};
use crate::utils::serde::deserialize_integer;

/// Parameters carried by the workflow execution for every monitor poll
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorParams {
    pub job_id: JobId,
    #[serde(deserialize_with = "deserialize_integer")]
    pub num_batches: u64,
    pub start_time: DateTime<Utc>,
    #[serde(deserialize_with = "deserialize_integer")]
    pub timeout_secs: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub combiner_function: Option<FunctionRef>,
}

/// Decision returned to the workflow engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorReport {
    #[serde(flatten)]
    pub params: MonitorParams,
    pub elapsed_secs: i64,
    /// Unknown when the ledger could not be read
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_remaining: Option<u64>,
    pub completed: bool,
    pub timed_out: bool,
    #[serde(default)]
    pub with_errors: bool,
}

impl MonitorReport {
    /// Whether the engine should leave the poll loop
    pub fn is_terminal(&self) -> bool {
        self.completed || self.timed_out
    }
}

/// User-visible result of a job once the engine reaches the reduce step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobOutcome {
    /// Every batch wrote its completion row
    Completed,
    /// The deadline passed first; the reducer sees partial results
    CompletedAfterTimeout,
    /// The monitor could not verify completion and failed open
    CompletedUnverified,
    /// Configuration was rejected or a dispatch subtree could not be issued
    Failed,
}

impl JobOutcome {
    /// Map a terminal monitor report onto an outcome; `None` while still running
    pub fn from_report(report: &MonitorReport) -> Option<Self> {
        if report.timed_out {
            Some(Self::CompletedAfterTimeout)
        } else if report.completed && report.with_errors {
            Some(Self::CompletedUnverified)
        } else if report.completed {
            Some(Self::Completed)
        } else {
            None
        }
    }
}
