//! # Job Monitor
//!
//! Completion decision for a single poll of the external wait loop. The monitor counts
//! a job's completion rows across every ledger page, then hands the count to the pure
//! [`evaluate`] decision:
//!
//! | condition                    | completed | timed_out |
//! |------------------------------|-----------|-----------|
//! | no batches remaining         | true      | false     |
//! | elapsed > timeout            | false     | true      |
//! | otherwise                    | false     | false     |
//!
//! A ledger failure must not break the loop, so [`JobMonitor::poll`] never errors: it
//! fails open with `completed = true, with_errors = true`. The same path covers a count
//! larger than the batch total, which means the ledger can no longer be trusted.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, error, instrument, warn};

use crate::clients::CompletionLedger;
use crate::config::FanoutConfig;
use crate::constants::DEFAULT_MAX_LEDGER_PAGES;
use crate::error::{FanoutError, Result};
use crate::logging::log_monitor_decision;
use crate::models::{JobId, MonitorParams, MonitorReport};

/// Source of "now" for deadline checks
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock pinned to one instant
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

/// Whole seconds between `start` and `now`, truncated
pub fn elapsed_secs(start: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    now.signed_duration_since(start).num_seconds()
}

/// Decide completion from an aggregated count
pub fn evaluate(params: &MonitorParams, num_complete: u64, now: DateTime<Utc>) -> MonitorReport {
    let elapsed = elapsed_secs(params.start_time, now);

    if num_complete > params.num_batches {
        error!(
            job_id = %params.job_id,
            num_complete,
            num_batches = params.num_batches,
            "Completion count exceeds batch total, ledger count is not trustworthy"
        );
        return fail_open(params, now);
    }

    let num_remaining = params.num_batches - num_complete;
    let timeout = i64::try_from(params.timeout_secs).unwrap_or(i64::MAX);

    let (completed, timed_out) = if num_remaining == 0 {
        (true, false)
    } else if elapsed > timeout {
        (false, true)
    } else {
        (false, false)
    };

    MonitorReport {
        params: params.clone(),
        elapsed_secs: elapsed,
        num_remaining: Some(num_remaining),
        completed,
        timed_out,
        with_errors: false,
    }
}

/// Report that ends the wait loop when completion cannot be verified
pub fn fail_open(params: &MonitorParams, now: DateTime<Utc>) -> MonitorReport {
    MonitorReport {
        params: params.clone(),
        elapsed_secs: elapsed_secs(params.start_time, now),
        num_remaining: None,
        completed: true,
        timed_out: false,
        with_errors: true,
    }
}

/// Something that can answer a monitor poll
#[async_trait]
pub trait CompletionMonitor: Send + Sync {
    async fn poll(&self, params: &MonitorParams) -> MonitorReport;
}

/// Ledger-backed monitor
#[derive(Clone)]
pub struct JobMonitor {
    ledger: Arc<dyn CompletionLedger>,
    clock: Arc<dyn Clock>,
    max_ledger_pages: usize,
}

impl std::fmt::Debug for JobMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobMonitor")
            .field("max_ledger_pages", &self.max_ledger_pages)
            .finish_non_exhaustive()
    }
}

impl JobMonitor {
    pub fn new(ledger: Arc<dyn CompletionLedger>) -> Self {
        Self {
            ledger,
            clock: Arc::new(SystemClock),
            max_ledger_pages: DEFAULT_MAX_LEDGER_PAGES,
        }
    }

    /// Monitor for a deployment; the pagination cut-off comes from `config`
    pub fn from_config(ledger: Arc<dyn CompletionLedger>, config: &FanoutConfig) -> Self {
        Self::new(ledger).with_max_ledger_pages(config.max_ledger_pages())
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_max_ledger_pages(mut self, pages: usize) -> Self {
        self.max_ledger_pages = pages.max(1);
        self
    }

    /// Total completion rows for `job_id`, summed over every page
    pub async fn count_completed(&self, job_id: &JobId) -> Result<u64> {
        let mut total: u64 = 0;
        let mut token: Option<String> = None;

        for page_number in 1..=self.max_ledger_pages {
            let page = self.ledger.query_page(job_id, token.as_deref()).await?;
            total = total.saturating_add(page.count);
            debug!(job_id = %job_id, page_number, count = page.count, total, "Ledger page counted");

            match page.next_token {
                Some(next) => token = Some(next),
                None => return Ok(total),
            }
        }

        Err(FanoutError::ledger_query_failure(
            job_id.to_string(),
            format!(
                "still paginating after {} pages",
                self.max_ledger_pages
            ),
        ))
    }
}

#[async_trait]
impl CompletionMonitor for JobMonitor {
    #[instrument(skip(self, params), fields(job_id = %params.job_id))]
    async fn poll(&self, params: &MonitorParams) -> MonitorReport {
        let report = match self.count_completed(&params.job_id).await {
            Ok(num_complete) => evaluate(params, num_complete, self.clock.now()),
            Err(e) => {
                warn!(
                    error = %e,
                    "Completion ledger query failed, reporting completion with errors"
                );
                fail_open(params, self.clock.now())
            }
        };
        log_monitor_decision(&report);
        report
    }
}
