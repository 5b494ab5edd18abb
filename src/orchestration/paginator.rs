//! # Batch Paginator
//!
//! Flat, throttled dispatch. Instead of walking a tree, batches are emitted in pages of
//! at most `max_concurrent_jobs` descriptors, and each page returns a
//! [`ResumptionCursor`] for the follow-up call.
//!
//! Pages are idempotent by range: re-applying an unchanged cursor produces the same
//! page and, if the page is too large to inline, writes the same object store key.
//!
//! ## Page hand-off
//!
//! A page that fits in `max_inline_payload_bytes` is emitted in place. A larger one is
//! parked in the object store under `jobs/{job_id}/batches/{first}-{last}.json` and a
//! [`PageInvocation`] carrying only the reference is sent to the dispatch function,
//! which resolves the page, emits its batches and releases the stored entry.

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

use super::dispatch_walker::{DispatchTreeWalker, FailedInvocation};
use crate::clients::{ObjectRef, ObjectStore};
use crate::config::FanoutConfig;
use crate::error::{FanoutError, Result};
use crate::logging::log_dispatch_operation;
use crate::models::{BatchDescriptor, Job, JobId, ResumptionCursor, WorkerInvocation};
use crate::resilience::{retry_with_backoff, RetryPolicy};

/// Deterministic object store key of a page covering `[first, last)`
pub fn page_key(job_id: &JobId, first_batch_id: u64, last_batch_id: u64) -> String {
    format!("jobs/{job_id}/batches/{first_batch_id}-{last_batch_id}.json")
}

/// One page of batch descriptors, inline or parked in the object store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DescriptorPage {
    Inline {
        first_batch_id: u64,
        last_batch_id: u64,
        batches: Vec<BatchDescriptor>,
    },
    Stored {
        first_batch_id: u64,
        last_batch_id: u64,
        reference: ObjectRef,
    },
}

impl DescriptorPage {
    /// `[first, last)` batch ids covered by the page
    pub fn bounds(&self) -> (u64, u64) {
        match self {
            Self::Inline {
                first_batch_id,
                last_batch_id,
                ..
            }
            | Self::Stored {
                first_batch_id,
                last_batch_id,
                ..
            } => (*first_batch_id, *last_batch_id),
        }
    }

    pub fn len(&self) -> u64 {
        let (first, last) = self.bounds();
        last.saturating_sub(first)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_stored(&self) -> bool {
        matches!(self, Self::Stored { .. })
    }
}

/// A page plus the cursor for the next call; `next` is `None` once exhausted
#[derive(Debug, Clone, PartialEq)]
pub struct PageEmission {
    pub page: DescriptorPage,
    pub next: Option<ResumptionCursor>,
}

/// Payload sent to the dispatch function for a stored page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageInvocation {
    pub job: Job,
    pub page: DescriptorPage,
}

/// Splits a job's batch space into bounded pages
#[derive(Clone)]
pub struct BatchPaginator {
    object_store: Arc<dyn ObjectStore>,
    max_concurrent_jobs: u64,
    max_inline_payload_bytes: usize,
    descriptor_ttl: Duration,
    retry: RetryPolicy,
}

impl std::fmt::Debug for BatchPaginator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchPaginator")
            .field("max_concurrent_jobs", &self.max_concurrent_jobs)
            .field("max_inline_payload_bytes", &self.max_inline_payload_bytes)
            .field("descriptor_ttl", &self.descriptor_ttl)
            .finish_non_exhaustive()
    }
}

impl BatchPaginator {
    pub fn new(object_store: Arc<dyn ObjectStore>, max_concurrent_jobs: u64) -> Self {
        let defaults = FanoutConfig::default();
        Self {
            object_store,
            max_concurrent_jobs: max_concurrent_jobs.max(1),
            max_inline_payload_bytes: defaults.max_inline_payload_bytes(),
            descriptor_ttl: defaults.descriptor_ttl(),
            retry: defaults.retry,
        }
    }

    /// Build from configuration; `max_concurrent_jobs` must be set
    pub fn from_config(object_store: Arc<dyn ObjectStore>, config: &FanoutConfig) -> Result<Self> {
        let max_concurrent_jobs = config.max_concurrent_jobs.ok_or_else(|| {
            FanoutError::invalid_config("max_concurrent_jobs is required for throttled dispatch")
        })?;
        Ok(Self::new(object_store, max_concurrent_jobs)
            .with_inline_limit(config.max_inline_payload_bytes())
            .with_descriptor_ttl(config.descriptor_ttl())
            .with_retry(config.retry.clone()))
    }

    pub fn with_inline_limit(mut self, bytes: usize) -> Self {
        self.max_inline_payload_bytes = bytes;
        self
    }

    pub fn with_descriptor_ttl(mut self, ttl: Duration) -> Self {
        self.descriptor_ttl = ttl;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn max_concurrent_jobs(&self) -> u64 {
        self.max_concurrent_jobs
    }

    /// Emit the page starting at `cursor.first_batch_id`.
    ///
    /// `next = min(first + max_concurrent_jobs, num_batches)`; the returned cursor starts
    /// there, or is `None` when the batch space is exhausted.
    pub async fn next_page(&self, job: &Job, cursor: &ResumptionCursor) -> Result<PageEmission> {
        if cursor.job_id != job.job_id {
            return Err(FanoutError::invalid_config(format!(
                "cursor for job {} applied to job {}",
                cursor.job_id, job.job_id
            )));
        }
        if cursor.last_batch_id != job.num_batches {
            return Err(FanoutError::invalid_config(format!(
                "cursor ends at batch {} but job has {} batches",
                cursor.last_batch_id, job.num_batches
            )));
        }

        let first = cursor.first_batch_id.min(job.num_batches);
        let next = first
            .saturating_add(self.max_concurrent_jobs)
            .min(job.num_batches);

        let batches: Vec<BatchDescriptor> = (first..next)
            .filter_map(|batch_id| job.batch_descriptor(batch_id))
            .collect();

        let bytes = serde_json::to_vec(&batches)?;
        let page = if bytes.len() > self.max_inline_payload_bytes {
            let key = page_key(&job.job_id, first, next);
            let reference = self.store(&key, bytes).await?;
            debug!(
                job_id = %job.job_id,
                reference = %reference,
                batches = batches.len(),
                "Descriptor page parked in object store"
            );
            DescriptorPage::Stored {
                first_batch_id: first,
                last_batch_id: next,
                reference,
            }
        } else {
            DescriptorPage::Inline {
                first_batch_id: first,
                last_batch_id: next,
                batches,
            }
        };

        let next_cursor = (next < job.num_batches).then(|| ResumptionCursor {
            first_batch_id: next,
            ..*cursor
        });

        Ok(PageEmission {
            page,
            next: next_cursor,
        })
    }

    /// Descriptors of a page, loading stored pages back from the object store
    pub async fn resolve_page(&self, page: &DescriptorPage) -> Result<Vec<BatchDescriptor>> {
        match page {
            DescriptorPage::Inline { batches, .. } => Ok(batches.clone()),
            DescriptorPage::Stored { reference, .. } => {
                let bytes = retry_with_backoff(&self.retry, "resolve_page", |_| {
                    let store = Arc::clone(&self.object_store);
                    let reference = reference.clone();
                    async move { store.get(&reference).await }
                })
                .await?;
                Ok(serde_json::from_slice(&bytes)?)
            }
        }
    }

    /// Delete a consumed stored page; failures are logged since the entry expires anyway
    pub async fn release_page(&self, page: &DescriptorPage) {
        let DescriptorPage::Stored { reference, .. } = page else {
            return;
        };
        if let Err(e) = self.object_store.delete(reference).await {
            warn!(
                reference = %reference,
                error = %e,
                "Failed to release descriptor page, leaving it to expire"
            );
        }
    }

    async fn store(&self, key: &str, bytes: Vec<u8>) -> Result<ObjectRef> {
        let ttl = self.descriptor_ttl;
        let reference = retry_with_backoff(&self.retry, "store_page", |_| {
            let store = Arc::clone(&self.object_store);
            let bytes = bytes.clone();
            let key = key.to_string();
            async move { store.put(&key, bytes, ttl).await }
        })
        .await?;
        Ok(reference)
    }
}

/// Result of one throttled dispatch round
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThrottledReport {
    pub job_id: JobId,
    pub first_batch_id: u64,
    pub last_batch_id: u64,
    /// Worker invocations accepted in this round
    pub batches_emitted: u64,
    /// Whether the page went to the dispatch function by reference
    pub handed_off: bool,
    pub next: Option<ResumptionCursor>,
}

/// Flat dispatch mode bounded by `max_concurrent_jobs`
#[derive(Debug, Clone)]
pub struct ThrottledDispatcher {
    paginator: BatchPaginator,
    walker: DispatchTreeWalker,
}

impl ThrottledDispatcher {
    pub fn new(paginator: BatchPaginator, walker: DispatchTreeWalker) -> Self {
        Self { paginator, walker }
    }

    pub fn paginator(&self) -> &BatchPaginator {
        &self.paginator
    }

    /// Emit one page of batches and return the cursor for the next round
    #[instrument(skip(self, job, cursor), fields(job_id = %job.job_id, first = cursor.first_batch_id))]
    pub async fn dispatch_page(
        &self,
        job: &Job,
        cursor: &ResumptionCursor,
    ) -> Result<ThrottledReport> {
        let emission = self.paginator.next_page(job, cursor).await?;
        let (first, last) = emission.page.bounds();

        let (batches_emitted, handed_off) = match &emission.page {
            DescriptorPage::Inline { batches, .. } => (self.emit_batches(job, batches).await?, false),
            DescriptorPage::Stored { .. } => {
                let hand_off = PageInvocation {
                    job: job.clone(),
                    page: emission.page.clone(),
                };
                let dispatcher = job.dispatcher()?;
                let payload = serde_json::to_value(&hand_off)?;
                self.walker
                    .invoke_with_retry(dispatcher, payload)
                    .await
                    .map_err(|e| FanoutError::invocation_failure(dispatcher.to_string(), e.to_string()))?;
                (0, true)
            }
        };

        log_dispatch_operation(
            "throttled_page",
            &job.job_id,
            0,
            first,
            last,
            if handed_off { "handed_off" } else { "dispatched" },
            emission
                .next
                .map(|next| format!("next_batch_id={}", next.first_batch_id))
                .as_deref(),
        );

        Ok(ThrottledReport {
            job_id: job.job_id,
            first_batch_id: first,
            last_batch_id: last,
            batches_emitted,
            handed_off,
            next: emission.next,
        })
    }

    /// Resolve a handed-off page, emit its batches and release the stored entry.
    ///
    /// The entry is released only once every batch was accepted; after a failure it
    /// stays in place so a replay of the same invocation can emit it again.
    pub async fn emit_page(&self, invocation: &PageInvocation) -> Result<u64> {
        invocation.job.validate()?;
        let batches = self.paginator.resolve_page(&invocation.page).await?;
        let emitted = self.emit_batches(&invocation.job, &batches).await?;
        self.paginator.release_page(&invocation.page).await;
        Ok(emitted)
    }

    async fn emit_batches(&self, job: &Job, batches: &[BatchDescriptor]) -> Result<u64> {
        let outcomes = join_all(batches.iter().map(|batch| async move {
            let payload = serde_json::to_value(WorkerInvocation::for_batch(job, batch))?;
            let outcome = self
                .walker
                .invoke_with_retry(&job.worker_function, payload)
                .await;
            Ok::<_, FanoutError>((batch.range, outcome))
        }))
        .await;

        let mut emitted = 0;
        let mut failures = Vec::new();
        for outcome in outcomes {
            let (range, outcome) = outcome?;
            match outcome {
                Ok(_) => emitted += 1,
                Err(e) => {
                    error!(job_id = %job.job_id, range = %range, error = %e, "Batch invocation failed after retries");
                    failures.push(FailedInvocation {
                        function: job.worker_function.clone(),
                        range,
                        reason: e.to_string(),
                    });
                }
            }
        }

        if let Some(first) = failures.first() {
            return Err(FanoutError::invocation_failure(
                first.function.to_string(),
                format!(
                    "{} of {} batches could not be dispatched (last error: {})",
                    failures.len(),
                    batches.len(),
                    first.reason
                ),
            ));
        }

        info!(job_id = %job.job_id, batches = emitted, "✅ Page emitted");
        Ok(emitted)
    }
}
