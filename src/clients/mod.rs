//! # External Collaborators
//!
//! Contracts for the services the coordinator talks to: the invocation substrate, the
//! workflow engine that runs the monitor loop, the completion ledger workers write to,
//! and the scratch object store. Handles live for the whole process and are passed
//! into components as `Arc<dyn Trait>`.

pub mod invoker;
pub mod ledger;
pub mod memory;
pub mod object_store;
pub mod workflow_engine;

pub use invoker::{InvocationReceipt, Invoker, InvokerError};
pub use ledger::{CompletionLedger, LedgerError, LedgerPage};
pub use memory::{
    InMemoryInvoker, InMemoryLedger, InMemoryObjectStore, InMemoryWorkflowEngine,
    InvocationMode, RecordedExecution, RecordedInvocation,
};
pub use object_store::{ObjectRef, ObjectStore, ObjectStoreError};
pub use workflow_engine::{ExecutionHandle, WorkflowEngine, WorkflowEngineError};
