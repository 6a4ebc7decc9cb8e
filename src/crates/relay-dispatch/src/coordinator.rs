//! Run submission, cancellation and requeue
//!
//! The coordinator owns the front half of the distributed lifecycle: it
//! persists the run in `queued`, appends the task to the queue, and keeps
//! the audit trail. Cancellation authority is the persisted run status;
//! the in-memory cancelled set is only a local fast path and is purged
//! opportunistically to stay bounded.

use crate::error::{DispatchError, Result};
use crate::policy::RetryPolicy;
use crate::queue::{DlqEntry, QueueStats, TaskQueue};
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use relay_core::{
    attempt::queue_events, new_id, Attempt, QueueEvent, Run, RunStatus, Task, TaskMode,
    WorkerHeartbeat, WorkerStatus,
};
use relay_events::{EventBus, EventKind, EventStatus, RunEvent};
use relay_store::{AttemptStore, StateStore};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::info;

const CANCELLED_TTL: Duration = Duration::from_secs(3600);

/// Run submission request
#[derive(Debug, Clone, Default)]
pub struct SubmitRequest {
    pub run_id: Option<String>,
    pub session_id: Option<String>,
    pub input: String,
    pub mode: TaskMode,
    pub workflow: Option<String>,
    pub tools: Vec<String>,
    pub system_prompt: Option<String>,
    pub metadata: HashMap<String, serde_json::Value>,
}

impl SubmitRequest {
    pub fn agent(input: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            ..Default::default()
        }
    }

    pub fn graph(input: impl Into<String>, workflow: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            mode: TaskMode::Graph,
            workflow: Some(workflow.into()),
            ..Default::default()
        }
    }
}

/// Receipt returned by [`Coordinator::submit_run`]
#[derive(Debug, Clone, serde::Serialize)]
pub struct SubmitReceipt {
    pub run_id: String,
    pub session_id: String,
    /// Queue delivery id of the enqueued task
    pub message_id: String,
    pub enqueued_at: chrono::DateTime<Utc>,
}

/// Coordinator over a state store, attempt store and queue
pub struct Coordinator {
    store: Arc<dyn StateStore>,
    attempts: Arc<dyn AttemptStore>,
    queue: Arc<dyn TaskQueue>,
    bus: Arc<EventBus>,
    policy: RetryPolicy,
    queue_name: String,
    /// Recently cancelled run ids; local fast path only
    cancelled: Mutex<HashMap<String, Instant>>,
    /// UI-driven worker status overrides (drain/disable)
    overrides: RwLock<HashMap<String, WorkerStatus>>,
}

impl Coordinator {
    pub fn new(
        store: Arc<dyn StateStore>,
        attempts: Arc<dyn AttemptStore>,
        queue: Arc<dyn TaskQueue>,
        bus: Arc<EventBus>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            store,
            attempts,
            queue,
            bus,
            policy: policy.normalized(),
            queue_name: "runs".to_string(),
            cancelled: Mutex::new(HashMap::new()),
            overrides: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_queue_name(mut self, name: impl Into<String>) -> Self {
        self.queue_name = name.into();
        self
    }

    /// Persist a queued run and enqueue its first task
    pub async fn submit_run(&self, request: SubmitRequest) -> Result<SubmitReceipt> {
        let run_id = request.run_id.unwrap_or_else(new_id);
        let session_id = request.session_id.unwrap_or_else(new_id);

        let mut run = Run::new(&run_id, &session_id, &request.input, RunStatus::Queued);
        run.metadata = request.metadata;
        run.metadata
            .insert("queue".to_string(), serde_json::json!(self.queue_name));
        run.metadata.insert("attempt".to_string(), serde_json::json!(0));
        run.metadata
            .insert("retry_count".to_string(), serde_json::json!(0));
        // task-reconstruction fields, read back by requeue_run
        run.metadata.insert(
            "mode".to_string(),
            serde_json::json!(match request.mode {
                TaskMode::Agent => "agent",
                TaskMode::Graph => "graph",
            }),
        );
        if let Some(workflow) = &request.workflow {
            run.metadata
                .insert("workflow".to_string(), serde_json::json!(workflow));
        }
        if !request.tools.is_empty() {
            run.metadata
                .insert("tools".to_string(), serde_json::json!(request.tools));
        }
        if let Some(prompt) = &request.system_prompt {
            run.metadata
                .insert("system_prompt".to_string(), serde_json::json!(prompt));
        }
        self.store.save_run(&run).await?;

        let mut task = Task::new(&run_id, &session_id, &request.input)
            .with_mode(request.mode)
            .with_attempt(1, self.policy.max_attempts);
        task.workflow = request.workflow;
        task.tools = request.tools;
        task.system_prompt = request.system_prompt;
        let enqueued_at = task.enqueued_at;

        let message_id = self.queue.enqueue(&task).await?;

        self.record(
            &run_id,
            queue_events::ENQUEUED,
            serde_json::json!({"message_id": message_id, "attempt": 1}),
        )
        .await;
        self.publish(
            RunEvent::new(&run_id, EventKind::Custom, EventStatus::Completed, queue_events::ENQUEUED)
                .with_session(&session_id),
        );

        info!(run_id = %run_id, message_id = %message_id, "run submitted");
        Ok(SubmitReceipt {
            run_id,
            session_id,
            message_id,
            enqueued_at,
        })
    }

    /// Cancel a run; authoritative via the persisted status
    ///
    /// Idempotent for already-cancelled runs. Workers observe the status on
    /// their next claim of any delivery for this run and ack without
    /// executing; an in-flight processor sees it when its result commits.
    pub async fn cancel_run(&self, run_id: &str) -> Result<Run> {
        let mut run = self.load_run(run_id).await?;

        if run.status == RunStatus::Canceled {
            return Ok(run);
        }
        if matches!(run.status, RunStatus::Completed | RunStatus::Failed) {
            return Err(DispatchError::Validation(format!(
                "run {} already {}",
                run_id, run.status
            )));
        }

        run.status = RunStatus::Canceled;
        run.error = Some("canceled".to_string());
        run.completed_at = Some(Utc::now());
        run.metadata
            .insert("canceled".to_string(), serde_json::json!(true));
        run.touch();
        self.store.save_run(&run).await?;

        self.mark_cancelled(run_id);

        self.record(run_id, queue_events::RUN_CANCELED, serde_json::json!({}))
            .await;
        self.publish(
            RunEvent::new(run_id, EventKind::Run, EventStatus::Completed, queue_events::RUN_CANCELED)
                .with_session(&run.session_id),
        );

        info!(run_id = %run_id, "run canceled");
        Ok(run)
    }

    /// Re-enqueue a run with the next attempt number
    ///
    /// The task is reconstructed from the run's submission metadata; the
    /// run returns to `queued` with its error cleared.
    pub async fn requeue_run(&self, run_id: &str) -> Result<SubmitReceipt> {
        let mut run = self.load_run(run_id).await?;

        let latest = self.attempts.latest_attempt(run_id).await?;
        let next_attempt = latest.map(|a| a.attempt).unwrap_or(0) + 1;

        let mut task = Task::new(run_id, &run.session_id, &run.input)
            .with_attempt(next_attempt, self.policy.max_attempts);
        if run.metadata.get("mode").and_then(|v| v.as_str()) == Some("graph") {
            task.mode = TaskMode::Graph;
        }
        task.workflow = run
            .metadata
            .get("workflow")
            .and_then(|v| v.as_str())
            .map(String::from);
        task.tools = run
            .metadata
            .get("tools")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default();
        task.system_prompt = run
            .metadata
            .get("system_prompt")
            .and_then(|v| v.as_str())
            .map(String::from);
        let enqueued_at = task.enqueued_at;

        let message_id = self.queue.enqueue(&task).await?;

        let retry_count = run
            .metadata
            .get("retry_count")
            .and_then(|v| v.as_u64())
            .unwrap_or(0);
        run.status = RunStatus::Queued;
        run.error = None;
        run.completed_at = None;
        run.metadata
            .insert("retry_count".to_string(), serde_json::json!(retry_count + 1));
        run.touch();
        self.store.save_run(&run).await?;

        // a requeued run is live again
        self.cancelled.lock().remove(run_id);

        self.record(
            run_id,
            queue_events::ENQUEUED,
            serde_json::json!({"message_id": message_id, "attempt": next_attempt}),
        )
        .await;

        info!(run_id = %run_id, attempt = next_attempt, "run requeued");
        Ok(SubmitReceipt {
            run_id: run_id.to_string(),
            session_id: run.session_id,
            message_id,
            enqueued_at,
        })
    }

    /// Local fast-path check; the persisted status remains authoritative
    pub fn recently_cancelled(&self, run_id: &str) -> bool {
        self.cancelled.lock().contains_key(run_id)
    }

    /// Override a worker's advertised status (drain/disable)
    pub fn set_worker_override(&self, worker_id: impl Into<String>, status: WorkerStatus) {
        self.overrides.write().insert(worker_id.into(), status);
    }

    pub fn clear_worker_override(&self, worker_id: &str) {
        self.overrides.write().remove(worker_id);
    }

    // Pass-through surfaces with uniform pagination semantics.

    pub async fn queue_stats(&self) -> Result<QueueStats> {
        self.queue.stats().await
    }

    /// Heartbeats with UI overrides applied
    pub async fn list_workers(&self, limit: usize) -> Result<Vec<WorkerHeartbeat>> {
        let mut heartbeats = self.attempts.list_worker_heartbeats(limit).await?;
        let overrides = self.overrides.read();
        for hb in &mut heartbeats {
            if let Some(status) = overrides.get(&hb.worker_id) {
                hb.status = *status;
            }
        }
        Ok(heartbeats)
    }

    pub async fn list_run_attempts(&self, run_id: &str, limit: usize) -> Result<Vec<Attempt>> {
        Ok(self.attempts.list_attempts(run_id, limit).await?)
    }

    pub async fn list_queue_events(
        &self,
        run_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<QueueEvent>> {
        Ok(self.attempts.list_queue_events(run_id, limit).await?)
    }

    pub async fn list_dlq(&self, limit: usize) -> Result<Vec<DlqEntry>> {
        self.queue.list_dlq(limit).await
    }

    async fn load_run(&self, run_id: &str) -> Result<Run> {
        self.store.load_run(run_id).await.map_err(|e| {
            if e.is_not_found() {
                DispatchError::NotFound(format!("run {}", run_id))
            } else {
                e.into()
            }
        })
    }

    fn mark_cancelled(&self, run_id: &str) {
        let mut cancelled = self.cancelled.lock();
        let now = Instant::now();
        cancelled.retain(|_, at| now.duration_since(*at) < CANCELLED_TTL);
        cancelled.insert(run_id.to_string(), now);
    }

    async fn record(&self, run_id: &str, event: &str, payload: serde_json::Value) {
        let _ = self
            .attempts
            .save_queue_event(&QueueEvent::new(run_id, event, payload))
            .await;
    }

    fn publish(&self, event: RunEvent) {
        self.bus.publish(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::MemoryQueue;
    use relay_store::MemoryStore;

    fn coordinator() -> (Coordinator, Arc<MemoryStore>, Arc<MemoryQueue>) {
        let store = Arc::new(MemoryStore::new());
        let queue = Arc::new(MemoryQueue::new());
        let coordinator = Coordinator::new(
            store.clone(),
            store.clone(),
            queue.clone(),
            Arc::new(EventBus::new()),
            RetryPolicy::default(),
        );
        (coordinator, store, queue)
    }

    #[tokio::test]
    async fn test_submit_creates_queued_run_and_task() {
        let (coordinator, store, queue) = coordinator();

        let receipt = coordinator
            .submit_run(SubmitRequest::agent("hello"))
            .await
            .unwrap();

        let run = store.load_run(&receipt.run_id).await.unwrap();
        assert_eq!(run.status, RunStatus::Queued);
        assert_eq!(run.metadata["queue"], "runs");
        assert_eq!(run.metadata["retry_count"], 0);

        assert_eq!(queue.stats().await.unwrap().stream_length, 1);

        let events = store
            .list_queue_events(Some(&receipt.run_id), 10)
            .await
            .unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event, queue_events::ENQUEUED);
    }

    #[tokio::test]
    async fn test_cancel_marks_run_and_records_event() {
        let (coordinator, store, _queue) = coordinator();
        let receipt = coordinator
            .submit_run(SubmitRequest::agent("hello"))
            .await
            .unwrap();

        let run = coordinator.cancel_run(&receipt.run_id).await.unwrap();
        assert_eq!(run.status, RunStatus::Canceled);
        assert_eq!(run.error.as_deref(), Some("canceled"));
        assert!(run.completed_at.is_some());
        assert_eq!(run.metadata["canceled"], true);
        assert!(coordinator.recently_cancelled(&receipt.run_id));

        // idempotent
        let again = coordinator.cancel_run(&receipt.run_id).await.unwrap();
        assert_eq!(again.status, RunStatus::Canceled);

        let events = store
            .list_queue_events(Some(&receipt.run_id), 10)
            .await
            .unwrap();
        assert!(events.iter().any(|e| e.event == queue_events::RUN_CANCELED));
    }

    #[tokio::test]
    async fn test_cancel_unknown_run_is_not_found() {
        let (coordinator, _store, _queue) = coordinator();
        let err = coordinator.cancel_run("ghost").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_requeue_bumps_attempt_and_clears_error() {
        let (coordinator, store, queue) = coordinator();
        let receipt = coordinator
            .submit_run(SubmitRequest::graph("in", "triage"))
            .await
            .unwrap();

        // simulate a failed first attempt
        relay_store::AttemptStore::start_attempt(
            store.as_ref(),
            &Attempt::started(&receipt.run_id, 1, "w1"),
        )
        .await
        .unwrap();
        let mut run = store.load_run(&receipt.run_id).await.unwrap();
        run.status = RunStatus::Failed;
        run.error = Some("boom".to_string());
        run.completed_at = Some(Utc::now());
        store.save_run(&run).await.unwrap();

        coordinator.requeue_run(&receipt.run_id).await.unwrap();

        let run = store.load_run(&receipt.run_id).await.unwrap();
        assert_eq!(run.status, RunStatus::Queued);
        assert!(run.error.is_none());
        assert!(run.completed_at.is_none());
        assert_eq!(run.metadata["retry_count"], 1);

        // the fresh task carries attempt 2 and the original workflow
        let deliveries = queue
            .claim("w1", Duration::from_millis(10), 10)
            .await
            .unwrap();
        let task = &deliveries.last().unwrap().task;
        assert_eq!(task.attempt, 2);
        assert_eq!(task.workflow.as_deref(), Some("triage"));
        assert_eq!(task.mode, TaskMode::Graph);
    }

    #[tokio::test]
    async fn test_worker_override_applies_to_listing() {
        let (coordinator, store, _queue) = coordinator();
        relay_store::AttemptStore::save_worker_heartbeat(
            store.as_ref(),
            &WorkerHeartbeat::new("w1", WorkerStatus::Online, 4),
        )
        .await
        .unwrap();

        coordinator.set_worker_override("w1", WorkerStatus::Draining);
        let workers = coordinator.list_workers(10).await.unwrap();
        assert_eq!(workers[0].status, WorkerStatus::Draining);

        coordinator.clear_worker_override("w1");
        let workers = coordinator.list_workers(10).await.unwrap();
        assert_eq!(workers[0].status, WorkerStatus::Online);
    }
}
