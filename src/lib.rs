#![allow(clippy::doc_markdown)] // Allow technical terms in docs without backticks
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Tasker Fanout
//!
//! Hierarchical fan-out/fan-in dispatch of batch jobs over an integer index space.
//!
//! ## Overview
//!
//! A job covers a half-open dataset range `[start, end)`. The root dispatcher splits it
//! into batches, then fans the batches out through a tree of dispatch invocations at
//! most `num_levels` deep. Workers record each finished batch in a completion ledger,
//! and a monitor polled by an external workflow engine decides when the job is done or
//! has run out of time.
//!
//! ## Module Organization
//!
//! - [`orchestration`] - Planner, tree walker, paginator, monitor, root and handlers
//! - [`models`] - Jobs, ranges, batches, invocation payloads and monitor reports
//! - [`clients`] - Collaborator contracts and their in-memory implementations
//! - [`config`] - Layered configuration
//! - [`resilience`] - Bounded retry with backoff
//! - [`error`] - Structured error handling
//! - [`logging`] - Structured logging setup
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tasker_fanout::clients::{InMemoryInvoker, InMemoryObjectStore, InMemoryWorkflowEngine};
//! use tasker_fanout::config::FanoutConfig;
//! use tasker_fanout::orchestration::RootCoordinator;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = FanoutConfig {
//!     dataset_end_index: Some(1000),
//!     batch_size: Some(50),
//!     worker_function_ref: Some("worker".to_string()),
//!     dispatch_function_ref: Some("dispatcher".to_string()),
//!     ..FanoutConfig::default()
//! };
//!
//! let root = RootCoordinator::new(
//!     Arc::new(InMemoryInvoker::new()),
//!     Arc::new(InMemoryWorkflowEngine::new()),
//!     Arc::new(InMemoryObjectStore::default()),
//! );
//!
//! let outcome = root.start(&config, serde_json::json!({})).await?;
//! println!("job {} planned {} batches", outcome.job_id(), outcome.plan.num_batches);
//! # Ok(())
//! # }
//! ```
//!
//! ## Testing
//!
//! ```bash
//! cargo test --lib    # Unit tests
//! cargo test          # Unit and integration tests
//! ```

pub mod clients;
pub mod config;
pub mod constants;
pub mod error;
pub mod logging;
pub mod models;
pub mod orchestration;
pub mod resilience;
pub mod utils;

pub use config::{ConfigLoader, FanoutConfig};
pub use error::{FanoutError, Result};
pub use models::{
    BatchDescriptor, DispatchInvocation, FunctionRef, IndexRange, Job, JobId, JobOutcome,
    MonitorParams, MonitorReport, ResumptionCursor, WorkerInvocation,
};
pub use orchestration::{
    DispatchHandler, DispatchTreeWalker, JobMonitor, MonitorHandler, PartitionPlan,
    RootCoordinator,
};
