#![allow(dead_code)]

pub mod strategies;

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::Arc;
use tasker_fanout::clients::{
    InMemoryInvoker, InMemoryLedger, InMemoryObjectStore, InMemoryWorkflowEngine,
};
use tasker_fanout::config::FanoutConfig;
use tasker_fanout::models::{FunctionRef, JobId, WorkerInvocation};
use tasker_fanout::orchestration::{DispatchHandler, FixedClock, JobMonitor, MonitorHandler};
use tasker_fanout::resilience::RetryPolicy;

pub const WORKER: &str = "search-worker";
pub const DISPATCHER: &str = "search-dispatcher";
pub const COMBINER: &str = "search-combiner";
pub const STATE_MACHINE: &str = "fanout-monitor";

pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        base_delay_ms: 1,
        max_delay_ms: 2,
        backoff_multiplier: 2.0,
        jitter: false,
    }
}

/// Configuration for a job over `[0, end)`
pub fn job_config(end: u64, batch_size: u64, num_levels: u32) -> FanoutConfig {
    FanoutConfig {
        dataset_end_index: Some(end),
        batch_size: Some(batch_size),
        num_levels,
        worker_function_ref: Some(WORKER.to_string()),
        dispatch_function_ref: Some(DISPATCHER.to_string()),
        combiner_function_ref: Some(COMBINER.to_string()),
        retry: fast_retry(),
        ..FanoutConfig::default()
    }
}

/// In-memory deployment: collaborators plus the two entry points wired to them
pub struct Harness {
    pub invoker: Arc<InMemoryInvoker>,
    pub engine: Arc<InMemoryWorkflowEngine>,
    pub ledger: Arc<InMemoryLedger>,
    pub store: Arc<InMemoryObjectStore>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_ledger_page_size(1000)
    }

    pub fn with_ledger_page_size(page_size: usize) -> Self {
        Self {
            invoker: Arc::new(InMemoryInvoker::new()),
            engine: Arc::new(InMemoryWorkflowEngine::new()),
            ledger: Arc::new(InMemoryLedger::new(page_size)),
            store: Arc::new(InMemoryObjectStore::default()),
        }
    }

    pub fn dispatch_handler(&self, config: FanoutConfig) -> DispatchHandler {
        DispatchHandler::new(
            config,
            self.invoker.clone(),
            self.engine.clone(),
            self.store.clone(),
        )
    }

    pub fn monitor_handler(&self, now: DateTime<Utc>) -> MonitorHandler {
        let monitor = JobMonitor::new(self.ledger.clone()).with_clock(Arc::new(FixedClock(now)));
        MonitorHandler::new(Arc::new(monitor))
    }

    /// Feed every pending dispatcher invocation back through `handler` until none are
    /// left, the way the invocation substrate would run them. Returns the step count.
    pub async fn drain_dispatchers(&self, handler: &DispatchHandler) -> usize {
        let dispatcher = FunctionRef::new(DISPATCHER);
        let mut steps = 0;
        loop {
            let pending = self.invoker.drain_for(&dispatcher);
            if pending.is_empty() {
                return steps;
            }
            for invocation in pending {
                handler
                    .handle(invocation.payload)
                    .await
                    .expect("dispatcher step should succeed");
                steps += 1;
            }
        }
    }

    pub fn worker_invocations(&self) -> Vec<WorkerInvocation> {
        self.invoker
            .invocations_for(&FunctionRef::new(WORKER))
            .into_iter()
            .map(|recorded| {
                serde_json::from_value(recorded.payload).expect("worker payload should parse")
            })
            .collect()
    }

    /// Batch ids of every emitted worker invocation, sorted
    pub fn emitted_batch_ids(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self
            .worker_invocations()
            .iter()
            .map(|invocation| invocation.batch_id)
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Simulate workers finishing every emitted batch
    pub fn complete_emitted_batches(&self, job_id: JobId) {
        for invocation in self.worker_invocations() {
            self.ledger.append(job_id, invocation.batch_id);
        }
    }
}

pub fn job_id_of(reply: &Value) -> JobId {
    serde_json::from_value(reply["job_id"].clone()).expect("reply should carry a job id")
}
