//! # Resilience Module
//!
//! Fault tolerance for outbound collaborator calls. Dispatch fan-out and descriptor
//! page reads retry transient failures a bounded number of times with exponential
//! backoff before surfacing the error.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use tasker_fanout::clients::{InMemoryInvoker, Invoker};
//! use tasker_fanout::models::FunctionRef;
//! use tasker_fanout::resilience::{retry_with_backoff, RetryPolicy};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let invoker = InMemoryInvoker::new();
//! let worker = FunctionRef::new("worker");
//! let policy = RetryPolicy::default();
//!
//! let receipt = retry_with_backoff(&policy, "invoke_worker", |_attempt| {
//!     invoker.invoke_async(&worker, serde_json::json!({"batch_id": 0}))
//! })
//! .await?;
//! # Ok(())
//! # }
//! ```

pub mod retry;

pub use retry::{retry_with_backoff, RetryPolicy, Retryable};
