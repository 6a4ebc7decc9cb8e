//! Storage traits for the relay runtime
//!
//! Three surfaces back the runtime: [`StateStore`] (runs and checkpoints),
//! [`AttemptStore`] (attempt history, worker heartbeats and the queue audit
//! trail) and [`EventStore`] (persisted bus events for backlog replay).
//!
//! Implementations must be thread-safe (`Send + Sync`) and durable on
//! return: a write that returns `Ok` is observable by every subsequent read.
//! `save_run` is an idempotent upsert keyed by run id; `save_checkpoint` is
//! insert-only and fails with [`StoreError::Conflict`] on a duplicate
//! `(run_id, seq)` pair, which resume paths rely on.

use crate::error::Result;
use async_trait::async_trait;
use relay_core::{Attempt, AttemptStatus, Checkpoint, QueueEvent, Run, RunQuery, WorkerHeartbeat};
use relay_events::RunEvent;

/// Authoritative store of runs and checkpoints
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Idempotent upsert keyed by `run.run_id`
    async fn save_run(&self, run: &Run) -> Result<()>;

    /// Load a run; unknown ids fail with [`StoreError::NotFound`]
    ///
    /// [`StoreError::NotFound`]: crate::error::StoreError::NotFound
    async fn load_run(&self, run_id: &str) -> Result<Run>;

    /// List runs matching the query, most-recent-first by `updated_at`
    async fn list_runs(&self, query: &RunQuery) -> Result<Vec<Run>>;

    /// Insert-only checkpoint write; duplicate seq fails with a conflict
    async fn save_checkpoint(&self, checkpoint: &Checkpoint) -> Result<()>;

    /// Latest checkpoint by seq, or `None` for a fresh run
    async fn load_latest_checkpoint(&self, run_id: &str) -> Result<Option<Checkpoint>>;

    /// Checkpoints for a run, newest-first, up to `limit`
    async fn list_checkpoints(&self, run_id: &str, limit: usize) -> Result<Vec<Checkpoint>>;
}

/// Attempt history, worker liveness and queue audit surfaces
#[async_trait]
pub trait AttemptStore: Send + Sync {
    /// Upsert by `(run_id, attempt)`: status becomes `running`, any prior
    /// `ended_at`/`error` are cleared
    async fn start_attempt(&self, attempt: &Attempt) -> Result<()>;

    /// Stamp `ended_at = now` and the terminal status
    async fn finish_attempt(
        &self,
        run_id: &str,
        attempt: u32,
        status: AttemptStatus,
        error: Option<String>,
    ) -> Result<()>;

    /// Highest-numbered attempt for a run, if any
    async fn latest_attempt(&self, run_id: &str) -> Result<Option<Attempt>>;

    /// Attempts for a run, newest-first, up to `limit`
    async fn list_attempts(&self, run_id: &str, limit: usize) -> Result<Vec<Attempt>>;

    /// Upsert a heartbeat by worker id
    async fn save_worker_heartbeat(&self, heartbeat: &WorkerHeartbeat) -> Result<()>;

    /// Heartbeats, most recently seen first, up to `limit`
    async fn list_worker_heartbeats(&self, limit: usize) -> Result<Vec<WorkerHeartbeat>>;

    /// Append a queue audit record
    async fn save_queue_event(&self, event: &QueueEvent) -> Result<()>;

    /// Audit records, newest-first, optionally filtered by run
    async fn list_queue_events(&self, run_id: Option<&str>, limit: usize) -> Result<Vec<QueueEvent>>;
}

/// Persisted bus events, served as SSE backlog
#[async_trait]
pub trait EventStore: Send + Sync {
    async fn save_event(&self, event: &RunEvent) -> Result<()>;

    /// Events for a run in timestamp order, up to `limit`
    async fn list_events(&self, run_id: &str, limit: usize) -> Result<Vec<RunEvent>>;
}

/// Adapter exposing an [`EventStore`] as the bus persistence sink
pub struct StoreSink(pub std::sync::Arc<dyn EventStore>);

#[async_trait]
impl relay_events::EventSink for StoreSink {
    async fn persist(
        &self,
        event: &RunEvent,
    ) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.0.save_event(event).await.map_err(|e| Box::new(e) as _)
    }
}
