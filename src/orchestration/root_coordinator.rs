//! # Root Coordinator
//!
//! First call of a job (level 0). Validates the merged configuration, freezes a
//! partition plan under a fresh job id, optionally starts the monitor execution, then
//! issues the first dispatch step: the level-0 tree walk, or the first throttled page
//! when `max_concurrent_jobs` is below the batch count.
//!
//! Every validation happens before the first side effect, so a rejected job has issued
//! nothing.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, instrument};

use super::dispatch_walker::{DispatchTreeWalker, WalkReport};
use super::paginator::{BatchPaginator, ThrottledDispatcher, ThrottledReport};
use super::partition_planner::{self, PartitionPlan};
use crate::clients::{ExecutionHandle, Invoker, ObjectStore, WorkflowEngine, WorkflowEngineError};
use crate::config::FanoutConfig;
use crate::error::{FanoutError, Result};
use crate::logging::log_dispatch_operation;
use crate::models::{DispatchInvocation, Job, JobId, MonitorParams, ResumptionCursor};

/// Execution id of a job's monitor; deterministic so a replayed start is deduplicated
pub fn monitor_name(job_id: &JobId) -> String {
    format!("Job_{job_id}")
}

/// First dispatch step taken by the root
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum RootDispatch {
    /// Empty dataset, nothing issued
    Empty,
    Tree(WalkReport),
    Throttled(ThrottledReport),
}

/// Everything the root learned and issued
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RootDispatchOutcome {
    pub job: Job,
    pub plan: PartitionPlan,
    pub monitor_name: Option<String>,
    pub dispatch: RootDispatch,
}

impl RootDispatchOutcome {
    pub fn job_id(&self) -> JobId {
        self.job.job_id
    }

    /// Cursor for the next throttled round, if any
    pub fn next_cursor(&self) -> Option<ResumptionCursor> {
        match &self.dispatch {
            RootDispatch::Throttled(report) => report.next,
            _ => None,
        }
    }
}

/// Level-0 entry point
#[derive(Clone)]
pub struct RootCoordinator {
    invoker: Arc<dyn Invoker>,
    workflow_engine: Arc<dyn WorkflowEngine>,
    object_store: Arc<dyn ObjectStore>,
}

impl std::fmt::Debug for RootCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RootCoordinator").finish_non_exhaustive()
    }
}

impl RootCoordinator {
    pub fn new(
        invoker: Arc<dyn Invoker>,
        workflow_engine: Arc<dyn WorkflowEngine>,
        object_store: Arc<dyn ObjectStore>,
    ) -> Self {
        Self {
            invoker,
            workflow_engine,
            object_store,
        }
    }

    /// Validate `config` and freeze a new job, without side effects
    pub fn prepare_job(&self, config: &FanoutConfig, job_parameters: Value) -> Result<Job> {
        config.validate()?;
        let range = config.dataset_range()?;
        let batch_size = config
            .batch_size
            .ok_or_else(|| FanoutError::invalid_config("batch_size is required"))?;
        let plan = partition_planner::plan(
            range.len(),
            batch_size,
            config.max_parallelism,
            config.num_levels,
        )?;

        let worker = config
            .worker_function()
            .ok_or_else(|| FanoutError::invalid_config("worker_function_ref is required"))?;

        let job = Job::new(
            JobId::new(),
            range,
            plan,
            config.num_levels,
            config.job_timeout_secs,
            job_parameters,
            worker,
            config.dispatch_function(),
        )
        .with_combiner(config.combiner_function())
        .with_max_concurrent_jobs(config.max_concurrent_jobs);
        job.validate()?;
        Ok(job)
    }

    /// Run the root step of a new job
    #[instrument(skip(self, config, job_parameters))]
    pub async fn start(
        &self,
        config: &FanoutConfig,
        job_parameters: Value,
    ) -> Result<RootDispatchOutcome> {
        let mut job = self.prepare_job(config, job_parameters)?;
        let plan = job.plan();

        info!(
            job_id = %job.job_id,
            num_batches = plan.num_batches,
            batch_size = plan.batch_size,
            branching_factor = plan.branching_factor,
            num_levels = job.num_levels,
            "🚀 Starting fan-out job"
        );

        // Throttled mode needs a usable paginator; check before anything is started
        let paginator = if job.is_throttled() {
            Some(BatchPaginator::from_config(Arc::clone(&self.object_store), config)?)
        } else {
            None
        };

        if let Some(definition) = config.state_machine_ref.as_deref().filter(|d| !d.trim().is_empty()) {
            let name = monitor_name(&job.job_id);
            self.start_monitor(definition, &name, &job.monitor_params())
                .await?;
            job.monitor_name = Some(name);
        }

        let walker = DispatchTreeWalker::with_retry(Arc::clone(&self.invoker), config.retry.clone());
        let dispatch = if plan.is_empty() {
            info!(job_id = %job.job_id, "Empty dataset range, nothing to dispatch");
            RootDispatch::Empty
        } else if let Some(paginator) = paginator {
            let throttled = ThrottledDispatcher::new(paginator, walker);
            let cursor = ResumptionCursor::start(job.job_id, job.num_batches);
            RootDispatch::Throttled(throttled.dispatch_page(&job, &cursor).await?)
        } else {
            RootDispatch::Tree(walker.step(&DispatchInvocation::root(job.clone())).await?)
        };

        log_dispatch_operation(
            "root_dispatch",
            &job.job_id,
            0,
            job.dataset_range.start,
            job.dataset_range.end,
            "started",
            job.monitor_name.as_deref(),
        );

        Ok(RootDispatchOutcome {
            monitor_name: job.monitor_name.clone(),
            job,
            plan,
            dispatch,
        })
    }

    /// Start the monitor execution; an existing execution with the same id counts as started
    pub async fn start_monitor(
        &self,
        definition: &str,
        execution_id: &str,
        params: &MonitorParams,
    ) -> Result<Option<ExecutionHandle>> {
        let input = serde_json::to_value(params)?;
        match self
            .workflow_engine
            .start_execution(definition, execution_id, input)
            .await
        {
            Ok(handle) => {
                info!(
                    execution_id = %handle.execution_id,
                    execution_ref = %handle.execution_ref,
                    "Monitor execution started"
                );
                Ok(Some(handle))
            }
            Err(WorkflowEngineError::AlreadyExists { execution_id }) => {
                info!(execution_id = %execution_id, "Monitor execution already running");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::{InMemoryInvoker, InMemoryObjectStore, InMemoryWorkflowEngine};
    use crate::models::FunctionRef;
    use crate::resilience::RetryPolicy;
    use chrono::Utc;
    use serde_json::json;

    struct Fixture {
        invoker: Arc<InMemoryInvoker>,
        engine: Arc<InMemoryWorkflowEngine>,
        store: Arc<InMemoryObjectStore>,
        root: RootCoordinator,
    }

    fn fixture() -> Fixture {
        let invoker = Arc::new(InMemoryInvoker::new());
        let engine = Arc::new(InMemoryWorkflowEngine::new());
        let store = Arc::new(InMemoryObjectStore::default());
        let root = RootCoordinator::new(invoker.clone(), engine.clone(), store.clone());
        Fixture {
            invoker,
            engine,
            store,
            root,
        }
    }

    fn config() -> FanoutConfig {
        FanoutConfig {
            dataset_end_index: Some(1000),
            batch_size: Some(50),
            worker_function_ref: Some("worker".to_string()),
            dispatch_function_ref: Some("dispatcher".to_string()),
            combiner_function_ref: Some("combine".to_string()),
            retry: RetryPolicy::no_retry(),
            ..FanoutConfig::default()
        }
    }

    #[tokio::test]
    async fn test_root_walks_level_zero() {
        let f = fixture();
        let outcome = f.root.start(&config(), json!({"source": "catalog-a"})).await.unwrap();

        assert_eq!(outcome.plan.num_batches, 20);
        assert_eq!(outcome.plan.branching_factor, 5);
        assert!(outcome.monitor_name.is_none());
        match &outcome.dispatch {
            RootDispatch::Tree(report) => assert_eq!(report.dispatchers_spawned, 5),
            other => panic!("unexpected dispatch {other:?}"),
        }
        assert_eq!(f.invoker.invocations_for(&FunctionRef::new("dispatcher")).len(), 5);
        assert_eq!(f.engine.execution_count(), 0);
    }

    #[tokio::test]
    async fn test_monitor_started_with_job_params() {
        let f = fixture();
        let config = FanoutConfig {
            state_machine_ref: Some("monitor-sm".to_string()),
            ..config()
        };

        let outcome = f.root.start(&config, json!({})).await.unwrap();
        let name = outcome.monitor_name.clone().unwrap();
        assert_eq!(name, monitor_name(&outcome.job_id()));

        let execution = f.engine.execution(&name).unwrap();
        assert_eq!(execution.definition, "monitor-sm");
        let params: MonitorParams = serde_json::from_value(execution.input).unwrap();
        assert_eq!(params.job_id, outcome.job_id());
        assert_eq!(params.num_batches, 20);
        assert_eq!(params.combiner_function, Some(FunctionRef::new("combine")));
    }

    #[tokio::test]
    async fn test_duplicate_monitor_start_is_not_fatal() {
        let f = fixture();
        let params = MonitorParams {
            job_id: JobId::new(),
            num_batches: 3,
            start_time: Utc::now(),
            timeout_secs: 60,
            combiner_function: None,
        };
        let name = monitor_name(&params.job_id);

        let first = f.root.start_monitor("sm", &name, &params).await.unwrap();
        let second = f.root.start_monitor("sm", &name, &params).await.unwrap();
        assert!(first.is_some());
        assert!(second.is_none());
        assert_eq!(f.engine.execution_count(), 1);
    }

    #[tokio::test]
    async fn test_invalid_config_issues_nothing() {
        let f = fixture();
        let config = FanoutConfig {
            batch_size: Some(0),
            state_machine_ref: Some("monitor-sm".to_string()),
            ..config()
        };

        let err = f.root.start(&config, json!({})).await.unwrap_err();
        assert!(err.is_config_error());
        assert_eq!(f.invoker.attempt_count(), 0);
        assert_eq!(f.engine.execution_count(), 0);
    }

    #[tokio::test]
    async fn test_engine_outage_aborts_before_dispatch() {
        let f = fixture();
        f.engine.set_unavailable(true);
        let config = FanoutConfig {
            state_machine_ref: Some("monitor-sm".to_string()),
            ..config()
        };

        assert!(f.root.start(&config, json!({})).await.is_err());
        assert_eq!(f.invoker.attempt_count(), 0);
    }

    #[tokio::test]
    async fn test_throttled_root_returns_cursor() {
        let f = fixture();
        let config = FanoutConfig {
            max_concurrent_jobs: Some(8),
            ..config()
        };

        let outcome = f.root.start(&config, json!({})).await.unwrap();
        let cursor = outcome.next_cursor().unwrap();
        assert_eq!(cursor.first_batch_id, 8);
        assert_eq!(cursor.last_batch_id, 20);
        assert_eq!(outcome.job.max_concurrent_jobs, Some(8));
        assert_eq!(f.invoker.invocations_for(&FunctionRef::new("worker")).len(), 8);
        assert!(f.store.is_empty());
    }

    #[tokio::test]
    async fn test_empty_dataset() {
        let f = fixture();
        let config = FanoutConfig {
            dataset_start_index: 1000,
            ..config()
        };

        let outcome = f.root.start(&config, json!({})).await.unwrap();
        assert_eq!(outcome.dispatch, RootDispatch::Empty);
        assert_eq!(f.invoker.attempt_count(), 0);
    }
}
