//! # Dispatch Tree Walker
//!
//! One step of the fan-out tree. A dispatcher at level `L` covering `[s, e)` splits
//! its range into spans of `branching_factor^(num_levels - L - 1) * batch_size`
//! indices. Above the leaf level every span becomes a child dispatch invocation at
//! `L + 1`; at the leaf level every `batch_size` span becomes one worker invocation.
//!
//! The walker never recurses in-process. Each child is a message to a fresh unit of
//! execution, so recursion depth is bounded by `num_levels` and no state survives
//! between steps.
//!
//! Siblings are invoked concurrently, each with bounded retry. A step waits until every
//! sibling has been accepted or has exhausted its retries; failures are reported, never
//! swallowed, and accepted siblings are not rolled back.

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error, info, instrument};

use crate::clients::{InvocationReceipt, Invoker, InvokerError};
use crate::error::{FanoutError, Result};
use crate::logging::log_dispatch_operation;
use crate::models::{DispatchInvocation, FunctionRef, IndexRange, JobId, WorkerInvocation};
use crate::resilience::{retry_with_backoff, RetryPolicy};

/// A sibling invocation that could not be issued
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedInvocation {
    pub function: FunctionRef,
    pub range: IndexRange,
    pub reason: String,
}

/// What one walker step issued
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalkReport {
    pub job_id: JobId,
    pub level: u32,
    pub range: IndexRange,
    /// Child dispatch invocations accepted
    pub dispatchers_spawned: u64,
    /// Worker invocations accepted
    pub batches_emitted: u64,
    pub failures: Vec<FailedInvocation>,
}

impl WalkReport {
    fn new(invocation: &DispatchInvocation) -> Self {
        Self {
            job_id: invocation.job.job_id,
            level: invocation.level,
            range: invocation.range,
            dispatchers_spawned: 0,
            batches_emitted: 0,
            failures: Vec::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    /// Turn recorded failures into [`FanoutError::InvocationFailure`]
    pub fn into_result(self) -> Result<Self> {
        let Some(first) = self.failures.first() else {
            return Ok(self);
        };
        let ranges = self
            .failures
            .iter()
            .map(|failure| failure.range.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        Err(FanoutError::invocation_failure(
            first.function.to_string(),
            format!(
                "{} sub-range(s) of {} at level {} could not be dispatched: {ranges} (last error: {})",
                self.failures.len(),
                self.range,
                self.level,
                first.reason
            ),
        ))
    }
}

#[derive(Clone, Copy)]
enum Emission {
    Dispatcher,
    Batch,
}

/// Executes dispatch steps against an [`Invoker`]
#[derive(Clone)]
pub struct DispatchTreeWalker {
    invoker: Arc<dyn Invoker>,
    retry: RetryPolicy,
}

impl std::fmt::Debug for DispatchTreeWalker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchTreeWalker")
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl DispatchTreeWalker {
    pub fn new(invoker: Arc<dyn Invoker>) -> Self {
        Self::with_retry(invoker, RetryPolicy::default())
    }

    pub fn with_retry(invoker: Arc<dyn Invoker>, retry: RetryPolicy) -> Self {
        Self { invoker, retry }
    }

    /// Run one step and fail if any sibling could not be dispatched
    pub async fn step(&self, invocation: &DispatchInvocation) -> Result<WalkReport> {
        self.dispatch(invocation).await?.into_result()
    }

    /// Run one step, recording sibling failures in the report.
    ///
    /// Returns an error only when the invocation itself is malformed, in which case
    /// nothing has been issued.
    #[instrument(
        skip(self, invocation),
        fields(job_id = %invocation.job.job_id, level = invocation.level, range = %invocation.range)
    )]
    pub async fn dispatch(&self, invocation: &DispatchInvocation) -> Result<WalkReport> {
        invocation.validate()?;
        let job = &invocation.job;
        let mut report = WalkReport::new(invocation);

        if invocation.range.is_empty() || job.num_batches == 0 {
            debug!("Empty sub-range, nothing to dispatch");
            return Ok(report);
        }

        let (function, emission, payloads) = if job.is_leaf_level(invocation.level) {
            let payloads = self.batch_payloads(invocation)?;
            (&job.worker_function, Emission::Batch, payloads)
        } else {
            let payloads = self.child_payloads(invocation)?;
            (job.dispatcher()?, Emission::Dispatcher, payloads)
        };

        debug!(
            function = %function,
            siblings = payloads.len(),
            "Issuing sibling invocations"
        );

        let outcomes = join_all(
            payloads
                .into_iter()
                .map(|(range, payload)| async move {
                    (range, self.invoke_with_retry(function, payload).await)
                }),
        )
        .await;

        for (range, outcome) in outcomes {
            match outcome {
                Ok(_) => match emission {
                    Emission::Dispatcher => report.dispatchers_spawned += 1,
                    Emission::Batch => report.batches_emitted += 1,
                },
                Err(e) => {
                    error!(
                        function = %function,
                        range = %range,
                        error = %e,
                        "Sibling invocation failed after retries"
                    );
                    report.failures.push(FailedInvocation {
                        function: function.clone(),
                        range,
                        reason: e.to_string(),
                    });
                }
            }
        }

        let status = if report.is_success() { "dispatched" } else { "partial" };
        let details = format!(
            "dispatchers={} batches={} failures={}",
            report.dispatchers_spawned,
            report.batches_emitted,
            report.failures.len()
        );
        log_dispatch_operation(
            "walk_step",
            &job.job_id,
            invocation.level,
            invocation.range.start,
            invocation.range.end,
            status,
            Some(&details),
        );
        if report.is_success() {
            info!(
                dispatchers = report.dispatchers_spawned,
                batches = report.batches_emitted,
                "✅ Dispatch step complete"
            );
        }

        Ok(report)
    }

    fn child_payloads(&self, invocation: &DispatchInvocation) -> Result<Vec<(IndexRange, Value)>> {
        let span = invocation.job.next_span(invocation.level)?;
        invocation
            .range
            .chunks(span)
            .map(|range| Ok((range, serde_json::to_value(invocation.child(range))?)))
            .collect()
    }

    fn batch_payloads(&self, invocation: &DispatchInvocation) -> Result<Vec<(IndexRange, Value)>> {
        let job = &invocation.job;
        invocation
            .range
            .chunks(job.batch_size)
            .map(|range| {
                let payload = WorkerInvocation {
                    job_id: job.job_id,
                    batch_id: job.batch_id_for(range.start),
                    start_index: range.start,
                    end_index: range.end,
                    job_parameters: job.job_parameters.clone(),
                    monitor_name: job.monitor_name.clone(),
                };
                Ok((range, serde_json::to_value(payload)?))
            })
            .collect()
    }

    pub(crate) async fn invoke_with_retry(
        &self,
        function: &FunctionRef,
        payload: Value,
    ) -> std::result::Result<InvocationReceipt, InvokerError> {
        let operation = format!("invoke:{function}");
        retry_with_backoff(&self.retry, &operation, |_| {
            let invoker = Arc::clone(&self.invoker);
            let function = function.clone();
            let payload = payload.clone();
            async move { invoker.invoke_async(&function, payload).await }
        })
        .await
    }
}
