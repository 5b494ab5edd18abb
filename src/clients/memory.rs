//! # In-Memory Collaborators
//!
//! Process-local implementations of the four collaborator contracts. They back local
//! runs and the test suite: the invoker records every accepted payload and can be told
//! to fail, the ledger paginates its counts, the workflow engine deduplicates
//! execution ids and the object store honors expiry.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tracing::debug;

use super::invoker::{InvocationReceipt, Invoker, InvokerError};
use super::ledger::{CompletionLedger, LedgerError, LedgerPage};
use super::object_store::{ObjectRef, ObjectStore, ObjectStoreError};
use super::workflow_engine::{ExecutionHandle, WorkflowEngine, WorkflowEngineError};
use crate::constants::{DEFAULT_SCRATCH_BUCKET, INVOCATION_ACCEPTED_STATUS};
use crate::models::{CompletionRow, FunctionRef, JobId};

/// How an invocation reached the invoker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvocationMode {
    FireAndForget,
    RequestResponse,
}

/// One accepted invocation
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedInvocation {
    pub function: FunctionRef,
    pub payload: Value,
    pub mode: InvocationMode,
}

#[derive(Debug, Clone)]
enum FailurePlan {
    /// Fail the next `remaining` calls with a transient error
    Transient { remaining: usize },
    /// Reject every call
    Permanent,
}

/// Invoker that records payloads instead of running them
#[derive(Debug, Default)]
pub struct InMemoryInvoker {
    accepted: Mutex<VecDeque<RecordedInvocation>>,
    failures: DashMap<String, FailurePlan>,
    responses: DashMap<String, Value>,
    attempts: AtomicU64,
}

impl InMemoryInvoker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Throttle the next `times` calls to `function`
    pub fn fail_transiently(&self, function: &FunctionRef, times: usize) {
        self.failures.insert(
            function.to_string(),
            FailurePlan::Transient { remaining: times },
        );
    }

    /// Reject every call to `function`
    pub fn reject(&self, function: &FunctionRef) {
        self.failures
            .insert(function.to_string(), FailurePlan::Permanent);
    }

    pub fn clear_failures(&self) {
        self.failures.clear();
    }

    /// Result returned by request-response calls to `function`
    pub fn respond_with(&self, function: &FunctionRef, response: Value) {
        self.responses.insert(function.to_string(), response);
    }

    /// Every invocation accepted so far, oldest first
    pub fn invocations(&self) -> Vec<RecordedInvocation> {
        self.accepted.lock().iter().cloned().collect()
    }

    pub fn invocations_for(&self, function: &FunctionRef) -> Vec<RecordedInvocation> {
        self.accepted
            .lock()
            .iter()
            .filter(|invocation| &invocation.function == function)
            .cloned()
            .collect()
    }

    /// Remove and return the accepted invocations of `function`
    pub fn drain_for(&self, function: &FunctionRef) -> Vec<RecordedInvocation> {
        let mut accepted = self.accepted.lock();
        let (drained, kept): (VecDeque<_>, VecDeque<_>) = accepted
            .drain(..)
            .partition(|invocation| &invocation.function == function);
        *accepted = kept;
        drained.into_iter().collect()
    }

    pub fn accepted_count(&self) -> usize {
        self.accepted.lock().len()
    }

    /// Calls made, including failed ones
    pub fn attempt_count(&self) -> u64 {
        self.attempts.load(Ordering::Relaxed)
    }

    fn check_failure(&self, function: &FunctionRef) -> Result<(), InvokerError> {
        let Some(mut plan) = self.failures.get_mut(function.as_str()) else {
            return Ok(());
        };
        match &mut *plan {
            FailurePlan::Permanent => Err(InvokerError::rejected(function, "injected rejection")),
            FailurePlan::Transient { remaining } => {
                if *remaining == 0 {
                    return Ok(());
                }
                *remaining -= 1;
                Err(InvokerError::throttled(function, "injected throttle"))
            }
        }
    }

    fn record(&self, function: &FunctionRef, payload: Value, mode: InvocationMode) {
        self.accepted.lock().push_back(RecordedInvocation {
            function: function.clone(),
            payload,
            mode,
        });
    }
}

#[async_trait]
impl Invoker for InMemoryInvoker {
    async fn invoke_async(
        &self,
        function: &FunctionRef,
        payload: Value,
    ) -> Result<InvocationReceipt, InvokerError> {
        let attempt = self.attempts.fetch_add(1, Ordering::Relaxed) + 1;
        self.check_failure(function)?;
        self.record(function, payload, InvocationMode::FireAndForget);
        Ok(InvocationReceipt {
            status: INVOCATION_ACCEPTED_STATUS,
            request_id: Some(format!("local-{attempt}")),
        })
    }

    async fn invoke_sync(
        &self,
        function: &FunctionRef,
        payload: Value,
    ) -> Result<Value, InvokerError> {
        self.attempts.fetch_add(1, Ordering::Relaxed);
        self.check_failure(function)?;
        self.record(function, payload, InvocationMode::RequestResponse);
        Ok(self
            .responses
            .get(function.as_str())
            .map(|response| response.clone())
            .unwrap_or(Value::Null))
    }
}

/// Started execution held by [`InMemoryWorkflowEngine`]
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedExecution {
    pub definition: String,
    pub input: Value,
    pub handle: ExecutionHandle,
}

/// Workflow engine that only records executions
#[derive(Debug, Default)]
pub struct InMemoryWorkflowEngine {
    executions: DashMap<String, RecordedExecution>,
    unavailable: AtomicBool,
}

impl InMemoryWorkflowEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::Relaxed);
    }

    pub fn execution(&self, execution_id: &str) -> Option<RecordedExecution> {
        self.executions
            .get(execution_id)
            .map(|execution| execution.clone())
    }

    pub fn execution_count(&self) -> usize {
        self.executions.len()
    }
}

#[async_trait]
impl WorkflowEngine for InMemoryWorkflowEngine {
    async fn start_execution(
        &self,
        definition: &str,
        execution_id: &str,
        input: Value,
    ) -> Result<ExecutionHandle, WorkflowEngineError> {
        if self.unavailable.load(Ordering::Relaxed) {
            return Err(WorkflowEngineError::Unavailable {
                reason: "engine marked unavailable".to_string(),
            });
        }

        match self.executions.entry(execution_id.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(WorkflowEngineError::AlreadyExists {
                execution_id: execution_id.to_string(),
            }),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                let handle = ExecutionHandle {
                    execution_id: execution_id.to_string(),
                    execution_ref: format!("{definition}:{execution_id}"),
                    started_at: Utc::now(),
                };
                slot.insert(RecordedExecution {
                    definition: definition.to_string(),
                    input,
                    handle: handle.clone(),
                });
                Ok(handle)
            }
        }
    }
}

/// Ledger holding completion rows in memory, counted in fixed-size pages
#[derive(Debug)]
pub struct InMemoryLedger {
    rows: DashMap<JobId, BTreeMap<u64, CompletionRow>>,
    page_size: usize,
    failing_queries: AtomicUsize,
    queries: AtomicU64,
}

impl Default for InMemoryLedger {
    fn default() -> Self {
        Self::new(1000)
    }
}

impl InMemoryLedger {
    pub fn new(page_size: usize) -> Self {
        Self {
            rows: DashMap::new(),
            page_size: page_size.max(1),
            failing_queries: AtomicUsize::new(0),
            queries: AtomicU64::new(0),
        }
    }

    /// Append the row a worker writes when batch `batch_id` finishes.
    ///
    /// Rows are keyed by `(job_id, batch_id)`: a retried worker does not double count.
    pub fn append(&self, job_id: JobId, batch_id: u64) {
        self.rows
            .entry(job_id)
            .or_default()
            .insert(batch_id, CompletionRow::new(job_id, batch_id));
    }

    /// Fail the next `times` page queries
    pub fn fail_next_queries(&self, times: usize) {
        self.failing_queries.store(times, Ordering::Relaxed);
    }

    pub fn row_count(&self, job_id: &JobId) -> usize {
        self.rows.get(job_id).map(|rows| rows.len()).unwrap_or(0)
    }

    pub fn query_count(&self) -> u64 {
        self.queries.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl CompletionLedger for InMemoryLedger {
    async fn query_page(
        &self,
        job_id: &JobId,
        page_token: Option<&str>,
    ) -> Result<LedgerPage, LedgerError> {
        self.queries.fetch_add(1, Ordering::Relaxed);

        let should_fail = self
            .failing_queries
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            return Err(LedgerError::Unavailable {
                job_id: job_id.to_string(),
                reason: "injected ledger failure".to_string(),
            });
        }

        let offset = match page_token {
            None => 0,
            Some(token) => token.parse::<usize>().map_err(|_| LedgerError::InvalidToken {
                job_id: job_id.to_string(),
                token: token.to_string(),
            })?,
        };
        let total = self.row_count(job_id);
        let count = total.saturating_sub(offset).min(self.page_size);
        let next = offset + count;

        debug!(job_id = %job_id, offset, count, total, "Ledger page served");

        if next < total {
            Ok(LedgerPage::continued(count as u64, next.to_string()))
        } else {
            Ok(LedgerPage::last(count as u64))
        }
    }
}

#[derive(Debug, Clone)]
struct StoredObject {
    payload: Vec<u8>,
    expires_at: Instant,
}

/// Object store keeping payloads in memory until their expiry
#[derive(Debug)]
pub struct InMemoryObjectStore {
    bucket: String,
    objects: DashMap<String, StoredObject>,
    failing_reads: AtomicUsize,
}

impl Default for InMemoryObjectStore {
    fn default() -> Self {
        Self::new(DEFAULT_SCRATCH_BUCKET)
    }
}

impl InMemoryObjectStore {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            objects: DashMap::new(),
            failing_reads: AtomicUsize::new(0),
        }
    }

    /// Fail the next `times` reads with an I/O error
    pub fn fail_next_reads(&self, times: usize) {
        self.failing_reads.store(times, Ordering::Relaxed);
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.objects.contains_key(key)
    }

    fn check_bucket(&self, reference: &ObjectRef) -> Result<(), ObjectStoreError> {
        if reference.bucket == self.bucket {
            Ok(())
        } else {
            Err(ObjectStoreError::NotFound {
                key: reference.to_string(),
            })
        }
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn put(
        &self,
        key: &str,
        payload: Vec<u8>,
        ttl: Duration,
    ) -> Result<ObjectRef, ObjectStoreError> {
        self.objects.insert(
            key.to_string(),
            StoredObject {
                payload,
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(ObjectRef::new(self.bucket.clone(), key))
    }

    async fn get(&self, reference: &ObjectRef) -> Result<Vec<u8>, ObjectStoreError> {
        self.check_bucket(reference)?;

        let should_fail = self
            .failing_reads
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            return Err(ObjectStoreError::Io {
                key: reference.key.clone(),
                reason: "injected read failure".to_string(),
            });
        }

        let stored = self
            .objects
            .get(&reference.key)
            .map(|object| object.clone())
            .ok_or_else(|| ObjectStoreError::NotFound {
                key: reference.key.clone(),
            })?;

        if stored.expires_at <= Instant::now() {
            self.objects.remove(&reference.key);
            return Err(ObjectStoreError::Expired {
                key: reference.key.clone(),
            });
        }
        Ok(stored.payload)
    }

    async fn delete(&self, reference: &ObjectRef) -> Result<(), ObjectStoreError> {
        self.check_bucket(reference)?;
        self.objects.remove(&reference.key);
        Ok(())
    }
}
