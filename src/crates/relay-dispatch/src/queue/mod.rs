//! Durable stream queue with consumer groups
//!
//! At-least-once delivery: a claimed entry stays pending for its consumer
//! until acked, and a worker crash leaves it reclaimable. Requeue appends a
//! fresh delivery with a visibility delay (`not_before`); dead-lettering
//! moves a delivery to the DLQ stream with the failure reason.

mod memory;
mod sqlite;

pub use memory::MemoryQueue;
pub use sqlite::SqliteQueue;

use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use relay_core::Task;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A task handed to a consumer, identified by an opaque delivery id
#[derive(Debug, Clone)]
pub struct Delivery {
    pub id: String,
    pub task: Task,
}

/// Queue observability counters
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueStats {
    /// Entries waiting to be claimed
    pub stream_length: u64,
    /// Claimed but not yet acked
    pub pending: u64,
    pub dlq_length: u64,
}

/// A dead-lettered delivery with its recorded reason
#[derive(Debug, Clone, Serialize)]
pub struct DlqEntry {
    pub id: String,
    pub task: Task,
    pub reason: String,
    pub dead_lettered_at: DateTime<Utc>,
}

/// Durable task queue contract
#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Append a task; returns the new entry's delivery id
    async fn enqueue(&self, task: &Task) -> Result<String>;

    /// Reserve up to `count` pending entries for `consumer`, blocking up to
    /// `block` before returning empty
    ///
    /// Claiming does not filter on `not_before`; honoring the visibility
    /// delay is the consumer's obligation.
    async fn claim(&self, consumer: &str, block: Duration, count: usize) -> Result<Vec<Delivery>>;

    /// Remove a delivery from `consumer`'s pending set
    async fn ack(&self, consumer: &str, delivery_id: &str) -> Result<()>;

    /// Append a fresh delivery of `task` with `not_before = now + delay`
    async fn requeue(&self, task: &Task, reason: &str, delay: Duration) -> Result<String>;

    /// Move a delivery to the DLQ stream, recording the reason
    async fn dead_letter(&self, delivery: &Delivery, reason: &str) -> Result<String>;

    async fn stats(&self) -> Result<QueueStats>;

    async fn list_dlq(&self, limit: usize) -> Result<Vec<DlqEntry>>;
}
