//! # Data Model
//!
//! Jobs, index ranges, batches, invocation payloads and monitor reports. Everything
//! here is serializable because each dispatch level may run in an isolated execution
//! context and receives its whole world through the invocation payload.

pub mod batch;
pub mod invocation;
pub mod job;
pub mod monitor;
pub mod range;

pub use batch::{BatchDescriptor, CompletionRow, ResumptionCursor};
pub use invocation::{DispatchInvocation, WorkerInvocation};
pub use job::{FunctionRef, Job, JobId};
pub use monitor::{JobOutcome, MonitorParams, MonitorReport};
pub use range::{IndexRange, RangeChunks};
