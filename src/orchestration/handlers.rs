//! # Invocation Handlers
//!
//! Entry points the deployed functions wrap. Both take the raw JSON event the
//! invocation substrate delivers and return JSON.
//!
//! [`DispatchHandler`] routes an event by shape:
//!
//! | event carries                | action                              |
//! |------------------------------|-------------------------------------|
//! | `job` + `page`               | emit a handed-off descriptor page   |
//! | `job` + `cursor`             | next throttled round                |
//! | `job` + `range` + `level`    | one walker step below the root      |
//! | none of the above, level 0   | root dispatch of a new job          |
//!
//! [`MonitorHandler`] runs one poll and returns the input merged with the decision, so
//! the workflow engine can feed its output straight into the next poll.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, info, instrument};

use super::dispatch_walker::DispatchTreeWalker;
use super::job_monitor::CompletionMonitor;
use super::paginator::{BatchPaginator, DescriptorPage, PageInvocation, ThrottledDispatcher};
use super::root_coordinator::RootCoordinator;
use crate::clients::{Invoker, ObjectStore, WorkflowEngine};
use crate::config::{ConfigOverrides, FanoutConfig};
use crate::error::{FanoutError, Result};
use crate::logging::{init_structured_logging, log_error};
use crate::models::{
    DispatchInvocation, IndexRange, Job, JobId, JobOutcome, MonitorParams, ResumptionCursor,
};
use crate::utils::serde::deserialize_level;

/// Loosely typed dispatch event
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct DispatchRequest {
    #[serde(default, deserialize_with = "deserialize_level")]
    pub level: u32,
    #[serde(default)]
    pub range: Option<IndexRange>,
    #[serde(default)]
    pub job: Option<Job>,
    #[serde(default)]
    pub page: Option<DescriptorPage>,
    #[serde(default)]
    pub cursor: Option<ResumptionCursor>,
    #[serde(default, alias = "jobParameters")]
    pub job_parameters: Value,
    /// Configuration fields at the top level of the event
    #[serde(skip)]
    pub overrides: ConfigOverrides,
}

impl DispatchRequest {
    pub fn from_event(event: Value) -> Result<Self> {
        let malformed =
            |e: serde_json::Error| FanoutError::invalid_config(format!("malformed dispatch event: {e}"));
        let overrides: ConfigOverrides = serde_json::from_value(event.clone()).map_err(malformed)?;
        let mut request: Self = serde_json::from_value(event).map_err(malformed)?;
        request.overrides = overrides;
        Ok(request)
    }
}

/// Reply to a dispatch event.
///
/// A throttled round that left batches behind carries the frozen `job` next to
/// `next_cursor`; sending `{"job": .., "cursor": ..}` back resumes the job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchResponse {
    pub job_id: JobId,
    pub monitor_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<ResumptionCursor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job: Option<Job>,
}

/// Handler behind the dispatch function
#[derive(Clone)]
pub struct DispatchHandler {
    config: FanoutConfig,
    root: RootCoordinator,
    invoker: Arc<dyn Invoker>,
    object_store: Arc<dyn ObjectStore>,
}

impl std::fmt::Debug for DispatchHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchHandler")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl DispatchHandler {
    pub fn new(
        config: FanoutConfig,
        invoker: Arc<dyn Invoker>,
        workflow_engine: Arc<dyn WorkflowEngine>,
        object_store: Arc<dyn ObjectStore>,
    ) -> Self {
        init_structured_logging();
        let root = RootCoordinator::new(
            Arc::clone(&invoker),
            workflow_engine,
            Arc::clone(&object_store),
        );
        Self {
            config,
            root,
            invoker,
            object_store,
        }
    }

    pub fn config(&self) -> &FanoutConfig {
        &self.config
    }

    /// Handle a raw event and return the JSON reply
    pub async fn handle(&self, event: Value) -> Result<Value> {
        let request = DispatchRequest::from_event(event)?;
        let response = self.dispatch(request).await.inspect_err(|e| {
            log_error(
                "dispatch_handler",
                "dispatch",
                &e.to_string(),
                Some(&format!("outcome={:?}", JobOutcome::Failed)),
            );
        })?;
        Ok(serde_json::to_value(response)?)
    }

    #[instrument(skip(self, request), fields(level = request.level))]
    pub async fn dispatch(&self, request: DispatchRequest) -> Result<DispatchResponse> {
        let config = self.config.with_overrides(&request.overrides);
        let walker = DispatchTreeWalker::with_retry(Arc::clone(&self.invoker), config.retry.clone());

        match request {
            DispatchRequest {
                job: Some(job),
                page: Some(page),
                ..
            } => {
                let paginator = self.paginator(&config, u64::MAX);
                let throttled = ThrottledDispatcher::new(paginator, walker);
                let invocation = PageInvocation { job, page };
                let emitted = throttled.emit_page(&invocation).await?;
                debug!(job_id = %invocation.job.job_id, emitted, "Handed-off page emitted");
                Ok(response_for(&invocation.job, None))
            }
            DispatchRequest {
                job: Some(job),
                cursor: Some(cursor),
                ..
            } => {
                job.validate()?;
                // The page size is the one frozen at the root, not this deployment's
                let max_concurrent_jobs = job.max_concurrent_jobs.ok_or_else(|| {
                    FanoutError::invalid_config(format!(
                        "job {} was not started in throttled mode",
                        job.job_id
                    ))
                })?;
                let paginator = self.paginator(&config, max_concurrent_jobs);
                let throttled = ThrottledDispatcher::new(paginator, walker);
                let report = throttled.dispatch_page(&job, &cursor).await?;
                Ok(response_for(&job, report.next))
            }
            DispatchRequest {
                job: Some(job),
                range,
                level,
                ..
            } => {
                let invocation = DispatchInvocation {
                    level,
                    range: range.unwrap_or(job.dataset_range),
                    job,
                };
                walker.step(&invocation).await?;
                Ok(response_for(&invocation.job, None))
            }
            DispatchRequest { level: 0, job_parameters, .. } => {
                let outcome = self.root.start(&config, job_parameters).await?;
                info!(
                    job_id = %outcome.job_id(),
                    monitor_name = ?outcome.monitor_name,
                    "Root dispatch finished"
                );
                Ok(response_for(&outcome.job, outcome.next_cursor()))
            }
            DispatchRequest { level, .. } => Err(FanoutError::invalid_config(format!(
                "dispatch event at level {level} does not carry its job"
            ))),
        }
    }

    fn paginator(&self, config: &FanoutConfig, max_concurrent_jobs: u64) -> BatchPaginator {
        BatchPaginator::new(Arc::clone(&self.object_store), max_concurrent_jobs)
            .with_inline_limit(config.max_inline_payload_bytes())
            .with_descriptor_ttl(config.descriptor_ttl())
            .with_retry(config.retry.clone())
    }
}

fn response_for(job: &Job, next_cursor: Option<ResumptionCursor>) -> DispatchResponse {
    DispatchResponse {
        job_id: job.job_id,
        monitor_name: job.monitor_name.clone(),
        next_cursor,
        job: next_cursor.map(|_| job.clone()),
    }
}

/// Handler behind the monitor function
#[derive(Clone)]
pub struct MonitorHandler {
    monitor: Arc<dyn CompletionMonitor>,
}

impl std::fmt::Debug for MonitorHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MonitorHandler").finish_non_exhaustive()
    }
}

impl MonitorHandler {
    pub fn new(monitor: Arc<dyn CompletionMonitor>) -> Self {
        init_structured_logging();
        Self { monitor }
    }

    /// Run one poll; the reply is the input event overlaid with the decision fields
    pub async fn handle(&self, event: Value) -> Result<Value> {
        let params: MonitorParams = serde_json::from_value(event.clone())
            .map_err(|e| FanoutError::invalid_config(format!("malformed monitor event: {e}")))?;

        let report = self.monitor.poll(&params).await;
        let outcome = JobOutcome::from_report(&report);

        let mut reply = match event {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        if let Value::Object(fields) = serde_json::to_value(&report)? {
            reply.extend(fields);
        }
        // Stale count from the previous poll
        if report.num_remaining.is_none() {
            reply.remove("num_remaining");
        }
        if let Some(outcome) = outcome {
            reply.insert("outcome".to_string(), serde_json::to_value(outcome)?);
        }
        Ok(Value::Object(reply))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::{InMemoryInvoker, InMemoryLedger, InMemoryObjectStore, InMemoryWorkflowEngine};
    use crate::models::FunctionRef;
    use crate::orchestration::job_monitor::{FixedClock, JobMonitor};
    use crate::resilience::RetryPolicy;
    use chrono::{Duration, Utc};
    use serde_json::json;

    fn handler(invoker: &Arc<InMemoryInvoker>) -> DispatchHandler {
        let config = FanoutConfig {
            dispatch_function_ref: Some("dispatcher".to_string()),
            retry: RetryPolicy::no_retry(),
            ..FanoutConfig::default()
        };
        DispatchHandler::new(
            config,
            invoker.clone(),
            Arc::new(InMemoryWorkflowEngine::new()),
            Arc::new(InMemoryObjectStore::default()),
        )
    }

    #[test]
    fn test_request_parses_string_numbers() {
        let request = DispatchRequest::from_event(json!({
            "level": "0",
            "startIndex": "0",
            "endIndex": "1000",
            "batchSize": "50",
            "workerFunctionName": "worker",
            "jobParameters": {"source": "catalog-a"}
        }))
        .unwrap();
        assert_eq!(request.level, 0);
        assert_eq!(request.overrides.dataset_end_index, Some(1000));
        assert_eq!(request.overrides.batch_size, Some(50));
        assert_eq!(request.job_parameters, json!({"source": "catalog-a"}));
    }

    #[test]
    fn test_request_rejects_non_numeric_batch_size() {
        let err = DispatchRequest::from_event(json!({"batchSize": "many"})).unwrap_err();
        assert!(err.is_config_error());
    }

    #[tokio::test]
    async fn test_root_event_then_child_event() {
        let invoker = Arc::new(InMemoryInvoker::new());
        let handler = handler(&invoker);

        let reply = handler
            .handle(json!({
                "dataset_end_index": 1000,
                "batch_size": 50,
                "worker_function_ref": "worker",
            }))
            .await
            .unwrap();
        let response: DispatchResponse = serde_json::from_value(reply).unwrap();
        assert!(response.monitor_name.is_none());

        let children = invoker.drain_for(&FunctionRef::new("dispatcher"));
        assert_eq!(children.len(), 5);

        let child_reply = handler.handle(children[0].payload.clone()).await.unwrap();
        assert_eq!(child_reply["job_id"], json!(response.job_id));
        assert_eq!(invoker.invocations_for(&FunctionRef::new("worker")).len(), 4);
    }

    #[tokio::test]
    async fn test_missing_worker_fails_before_dispatch() {
        let invoker = Arc::new(InMemoryInvoker::new());
        let err = handler(&invoker)
            .handle(json!({"endIndex": 100, "batchSize": 10}))
            .await
            .unwrap_err();
        assert!(err.is_config_error());
        assert_eq!(invoker.attempt_count(), 0);
    }

    #[tokio::test]
    async fn test_child_level_without_job_is_rejected() {
        let invoker = Arc::new(InMemoryInvoker::new());
        let err = handler(&invoker).handle(json!({"level": 1})).await.unwrap_err();
        assert!(err.is_config_error());
    }

    #[tokio::test]
    async fn test_monitor_reply_echoes_input() {
        let ledger = Arc::new(InMemoryLedger::new(7));
        let job_id = JobId::new();
        for batch_id in 0..4 {
            ledger.append(job_id, batch_id);
        }
        let start = Utc::now();
        let monitor = JobMonitor::new(ledger)
            .with_clock(Arc::new(FixedClock(start + Duration::seconds(100))));
        let handler = MonitorHandler::new(Arc::new(monitor));

        let reply = handler
            .handle(json!({
                "job_id": job_id,
                "num_batches": "10",
                "start_time": start,
                "timeout_secs": 300,
                "combiner_function": "combine",
                "trace": "abc"
            }))
            .await
            .unwrap();

        assert_eq!(reply["trace"], "abc");
        assert_eq!(reply["completed"], false);
        assert_eq!(reply["timed_out"], false);
        assert_eq!(reply["num_remaining"], 6);
        assert!(reply.get("outcome").is_none());
    }

    #[tokio::test]
    async fn test_monitor_reply_for_ledger_outage() {
        let ledger = Arc::new(InMemoryLedger::new(7));
        ledger.fail_next_queries(1);
        let handler = MonitorHandler::new(Arc::new(JobMonitor::new(ledger)));

        let reply = handler
            .handle(json!({
                "job_id": JobId::new(),
                "num_batches": 10,
                "start_time": Utc::now(),
                "timeout_secs": 300,
                "num_remaining": 6
            }))
            .await
            .unwrap();

        assert_eq!(reply["completed"], true);
        assert_eq!(reply["with_errors"], true);
        assert_eq!(reply["outcome"], "completed_unverified");
        assert!(reply.get("num_remaining").is_none());
    }
}
