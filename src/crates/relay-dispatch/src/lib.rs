//! Distributed runtime for relay: coordinator + workers over a durable queue
//!
//! The coordinator persists submissions and appends tasks to the queue; a
//! fleet of workers claims deliveries with at-least-once semantics,
//! executes them through a pluggable [`Processor`], retries with
//! exponential backoff and dead-letters on exhaustion. Attempt history,
//! heartbeats and the queue audit trail land in the attempt store.

pub mod coordinator;
pub mod error;
pub mod policy;
pub mod processor;
pub mod queue;
pub mod worker;

pub use coordinator::{Coordinator, SubmitReceipt, SubmitRequest};
pub use error::{DispatchError, Result};
pub use policy::RetryPolicy;
pub use processor::{AgentProcessor, GraphProcessor, ModeProcessor, ProcessOutcome, Processor};
pub use queue::{Delivery, DlqEntry, MemoryQueue, QueueStats, SqliteQueue, TaskQueue};
pub use worker::{Worker, WorkerConfig};
