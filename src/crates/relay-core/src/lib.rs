//! Domain model for the relay agent runtime
//!
//! This crate defines the types shared by every other relay crate: runs and
//! their message history, checkpoints, attempt records, worker heartbeats,
//! queue audit events and the in-flight queue task payload. It carries no
//! I/O; persistence and execution live in the sibling crates.

pub mod attempt;
pub mod checkpoint;
pub mod message;
pub mod run;
pub mod task;

pub use attempt::{Attempt, AttemptStatus, QueueEvent, WorkerHeartbeat, WorkerStatus};
pub use checkpoint::Checkpoint;
pub use message::{Message, Role, ToolCall, Usage};
pub use run::{Run, RunQuery, RunStatus};
pub use task::{Task, TaskMode};

/// Generate a new opaque identifier (UUID v4 string).
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
