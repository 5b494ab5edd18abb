//! # Orchestration Core
//!
//! Fan-out/fan-in coordination for batch jobs over an integer index space.
//!
//! ## Architecture
//!
//! The core only decides and dispatches. Workers, the invocation substrate, the
//! completion ledger and the workflow engine that runs the wait loop are external
//! collaborators reached through the traits in [`crate::clients`].
//!
//! ```text
//! RootCoordinator -> PartitionPlanner -> DispatchTreeWalker (level 0..n) -> workers
//!        |                                                                   |
//!        +-> WorkflowEngine --polls--> JobMonitor <-- CompletionLedger <-----+
//! ```
//!
//! ## Core Components
//!
//! - **partition_planner**: batch size, batch count and branching factor of a job
//! - **dispatch_walker**: one level of the dispatch tree per invocation
//! - **paginator**: throttled flat dispatch with resumption cursors
//! - **job_monitor**: pure completion decision plus the ledger-backed poll
//! - **root_coordinator**: level-0 setup of a new job
//! - **handlers**: raw-event entry points for the dispatch and monitor functions
//! - **state_machine**: definition of the monitor wait loop

pub mod dispatch_walker;
pub mod handlers;
pub mod job_monitor;
pub mod paginator;
pub mod partition_planner;
pub mod root_coordinator;
pub mod state_machine;

pub use dispatch_walker::{DispatchTreeWalker, FailedInvocation, WalkReport};
pub use handlers::{DispatchHandler, DispatchRequest, DispatchResponse, MonitorHandler};
pub use job_monitor::{evaluate, Clock, CompletionMonitor, FixedClock, JobMonitor, SystemClock};
pub use paginator::{
    page_key, BatchPaginator, DescriptorPage, PageEmission, PageInvocation, ThrottledDispatcher,
    ThrottledReport,
};
pub use partition_planner::{plan, PartitionPlan};
pub use root_coordinator::{RootCoordinator, RootDispatch, RootDispatchOutcome};
pub use state_machine::MonitorStateMachineDefinition;
