//! # Completion Ledger
//!
//! Read side of the per-job completion record. Workers append one row per finished
//! batch; the coordinator only ever asks how many rows a job has.
//!
//! Implementations must serve `query_page` from a strongly consistent read. An
//! eventually consistent count may lag (harmless, the monitor polls again) but a count
//! that includes rows from anything other than this job is never acceptable.

use async_trait::async_trait;
use thiserror::Error;

use crate::models::JobId;

/// One page of a paginated count
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerPage {
    pub count: u64,
    pub next_token: Option<String>,
}

impl LedgerPage {
    pub fn last(count: u64) -> Self {
        Self {
            count,
            next_token: None,
        }
    }

    pub fn continued(count: u64, next_token: impl Into<String>) -> Self {
        Self {
            count,
            next_token: Some(next_token.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum LedgerError {
    #[error("Ledger unavailable: {reason}")]
    Unavailable { job_id: String, reason: String },

    #[error("Ledger query throttled: {reason}")]
    Throttled { job_id: String, reason: String },

    #[error("Invalid continuation token '{token}'")]
    InvalidToken { job_id: String, token: String },
}

impl LedgerError {
    pub fn job_id(&self) -> &str {
        match self {
            Self::Unavailable { job_id, .. }
            | Self::Throttled { job_id, .. }
            | Self::InvalidToken { job_id, .. } => job_id,
        }
    }
}

#[async_trait]
pub trait CompletionLedger: Send + Sync {
    /// Count completion rows for `job_id`, continuing from `page_token`
    async fn query_page(
        &self,
        job_id: &JobId,
        page_token: Option<&str>,
    ) -> Result<LedgerPage, LedgerError>;
}
