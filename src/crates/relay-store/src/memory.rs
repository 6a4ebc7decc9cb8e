//! In-memory store, the reference implementation
//!
//! Backs unit tests and single-process deployments. All three storage
//! traits are implemented on one struct so a test can wire a coordinator,
//! worker and executor against a single shared store.

use crate::error::{Result, StoreError};
use crate::traits::{AttemptStore, EventStore, StateStore};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use relay_core::{Attempt, AttemptStatus, Checkpoint, QueueEvent, Run, RunQuery, WorkerHeartbeat};
use relay_events::RunEvent;
use std::collections::HashMap;

/// Thread-safe in-memory store
#[derive(Default)]
pub struct MemoryStore {
    runs: RwLock<HashMap<String, Run>>,
    /// Checkpoints per run, kept in ascending seq order
    checkpoints: RwLock<HashMap<String, Vec<Checkpoint>>>,
    /// Attempts per run, kept in ascending attempt order
    attempts: RwLock<HashMap<String, Vec<Attempt>>>,
    heartbeats: RwLock<HashMap<String, WorkerHeartbeat>>,
    queue_events: RwLock<Vec<QueueEvent>>,
    run_events: RwLock<Vec<RunEvent>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn save_run(&self, run: &Run) -> Result<()> {
        self.runs.write().insert(run.run_id.clone(), run.clone());
        Ok(())
    }

    async fn load_run(&self, run_id: &str) -> Result<Run> {
        self.runs
            .read()
            .get(run_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("run {}", run_id)))
    }

    async fn list_runs(&self, query: &RunQuery) -> Result<Vec<Run>> {
        let mut runs: Vec<Run> = self
            .runs
            .read()
            .values()
            .filter(|r| {
                query
                    .session_id
                    .as_deref()
                    .map_or(true, |s| r.session_id == s)
                    && query.status.map_or(true, |s| r.status == s)
            })
            .cloned()
            .collect();
        runs.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(runs
            .into_iter()
            .skip(query.offset)
            .take(query.effective_limit())
            .collect())
    }

    async fn save_checkpoint(&self, checkpoint: &Checkpoint) -> Result<()> {
        let mut map = self.checkpoints.write();
        let entries = map.entry(checkpoint.run_id.clone()).or_default();
        if entries.iter().any(|c| c.seq == checkpoint.seq) {
            return Err(StoreError::Conflict(format!(
                "checkpoint {} seq {} already exists",
                checkpoint.run_id, checkpoint.seq
            )));
        }
        entries.push(checkpoint.clone());
        entries.sort_by_key(|c| c.seq);
        Ok(())
    }

    async fn load_latest_checkpoint(&self, run_id: &str) -> Result<Option<Checkpoint>> {
        Ok(self
            .checkpoints
            .read()
            .get(run_id)
            .and_then(|v| v.last().cloned()))
    }

    async fn list_checkpoints(&self, run_id: &str, limit: usize) -> Result<Vec<Checkpoint>> {
        let map = self.checkpoints.read();
        let mut out: Vec<Checkpoint> = map.get(run_id).cloned().unwrap_or_default();
        out.reverse(); // newest first
        out.truncate(limit.max(1));
        Ok(out)
    }
}

#[async_trait]
impl AttemptStore for MemoryStore {
    async fn start_attempt(&self, attempt: &Attempt) -> Result<()> {
        let mut map = self.attempts.write();
        let entries = map.entry(attempt.run_id.clone()).or_default();
        if let Some(existing) = entries.iter_mut().find(|a| a.attempt == attempt.attempt) {
            existing.worker_id = attempt.worker_id.clone();
            existing.status = AttemptStatus::Running;
            existing.started_at = attempt.started_at;
            existing.ended_at = None;
            existing.error = None;
            existing.metadata = attempt.metadata.clone();
        } else {
            entries.push(attempt.clone());
            entries.sort_by_key(|a| a.attempt);
        }
        Ok(())
    }

    async fn finish_attempt(
        &self,
        run_id: &str,
        attempt: u32,
        status: AttemptStatus,
        error: Option<String>,
    ) -> Result<()> {
        let mut map = self.attempts.write();
        let entries = map
            .get_mut(run_id)
            .ok_or_else(|| StoreError::NotFound(format!("attempts for run {}", run_id)))?;
        let record = entries
            .iter_mut()
            .find(|a| a.attempt == attempt)
            .ok_or_else(|| StoreError::NotFound(format!("attempt {} of run {}", attempt, run_id)))?;
        record.status = status;
        record.ended_at = Some(Utc::now());
        record.error = error;
        Ok(())
    }

    async fn latest_attempt(&self, run_id: &str) -> Result<Option<Attempt>> {
        Ok(self
            .attempts
            .read()
            .get(run_id)
            .and_then(|v| v.last().cloned()))
    }

    async fn list_attempts(&self, run_id: &str, limit: usize) -> Result<Vec<Attempt>> {
        let map = self.attempts.read();
        let mut out: Vec<Attempt> = map.get(run_id).cloned().unwrap_or_default();
        out.reverse();
        out.truncate(limit.max(1));
        Ok(out)
    }

    async fn save_worker_heartbeat(&self, heartbeat: &WorkerHeartbeat) -> Result<()> {
        self.heartbeats
            .write()
            .insert(heartbeat.worker_id.clone(), heartbeat.clone());
        Ok(())
    }

    async fn list_worker_heartbeats(&self, limit: usize) -> Result<Vec<WorkerHeartbeat>> {
        let mut out: Vec<WorkerHeartbeat> = self.heartbeats.read().values().cloned().collect();
        out.sort_by(|a, b| b.last_seen_at.cmp(&a.last_seen_at));
        out.truncate(limit.max(1));
        Ok(out)
    }

    async fn save_queue_event(&self, event: &QueueEvent) -> Result<()> {
        self.queue_events.write().push(event.clone());
        Ok(())
    }

    async fn list_queue_events(&self, run_id: Option<&str>, limit: usize) -> Result<Vec<QueueEvent>> {
        let events = self.queue_events.read();
        let mut out: Vec<QueueEvent> = events
            .iter()
            .filter(|e| run_id.map_or(true, |id| e.run_id == id))
            .cloned()
            .collect();
        out.reverse();
        out.truncate(limit.max(1));
        Ok(out)
    }
}

#[async_trait]
impl EventStore for MemoryStore {
    async fn save_event(&self, event: &RunEvent) -> Result<()> {
        self.run_events.write().push(event.clone());
        Ok(())
    }

    async fn list_events(&self, run_id: &str, limit: usize) -> Result<Vec<RunEvent>> {
        let events = self.run_events.read();
        let mut out: Vec<RunEvent> = events
            .iter()
            .filter(|e| e.run_id == run_id)
            .cloned()
            .collect();
        out.sort_by_key(|e| e.timestamp);
        out.truncate(limit.max(1));
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_core::RunStatus;

    #[tokio::test]
    async fn test_save_and_load_run() {
        let store = MemoryStore::new();
        let run = Run::new("r1", "s1", "hi", RunStatus::Queued);
        store.save_run(&run).await.unwrap();

        let loaded = store.load_run("r1").await.unwrap();
        assert_eq!(loaded.session_id, "s1");

        let err = store.load_run("missing").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_save_run_is_upsert() {
        let store = MemoryStore::new();
        let mut run = Run::new("r1", "s1", "hi", RunStatus::Queued);
        store.save_run(&run).await.unwrap();

        run.status = RunStatus::Running;
        store.save_run(&run).await.unwrap();
        assert_eq!(store.load_run("r1").await.unwrap().status, RunStatus::Running);
    }

    #[tokio::test]
    async fn test_duplicate_checkpoint_seq_conflicts() {
        let store = MemoryStore::new();
        let cp = Checkpoint::new("r1", 1, "n1", serde_json::json!({}));
        store.save_checkpoint(&cp).await.unwrap();

        let err = store.save_checkpoint(&cp).await.unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn test_latest_checkpoint() {
        let store = MemoryStore::new();
        for seq in 1..=3 {
            store
                .save_checkpoint(&Checkpoint::new("r1", seq, format!("n{}", seq), serde_json::json!({})))
                .await
                .unwrap();
        }
        let latest = store.load_latest_checkpoint("r1").await.unwrap().unwrap();
        assert_eq!(latest.seq, 3);
        assert!(store.load_latest_checkpoint("other").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_runs_filters_and_order() {
        let store = MemoryStore::new();
        let mut r1 = Run::new("r1", "s1", "a", RunStatus::Completed);
        r1.updated_at = Utc::now() - chrono::Duration::seconds(10);
        let r2 = Run::new("r2", "s1", "b", RunStatus::Queued);
        let r3 = Run::new("r3", "s2", "c", RunStatus::Queued);
        for r in [&r1, &r2, &r3] {
            store.save_run(r).await.unwrap();
        }

        let q = RunQuery {
            session_id: Some("s1".to_string()),
            ..Default::default()
        };
        let runs = store.list_runs(&q).await.unwrap();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].run_id, "r2"); // most recent first

        let q = RunQuery {
            status: Some(RunStatus::Queued),
            ..Default::default()
        };
        assert_eq!(store.list_runs(&q).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_start_attempt_upsert_clears_error() {
        let store = MemoryStore::new();
        let attempt = Attempt::started("r1", 1, "w1");
        store.start_attempt(&attempt).await.unwrap();
        store
            .finish_attempt("r1", 1, AttemptStatus::Failed, Some("boom".to_string()))
            .await
            .unwrap();

        // restart the same attempt number
        store.start_attempt(&Attempt::started("r1", 1, "w2")).await.unwrap();
        let latest = store.latest_attempt("r1").await.unwrap().unwrap();
        assert_eq!(latest.status, AttemptStatus::Running);
        assert_eq!(latest.worker_id, "w2");
        assert!(latest.ended_at.is_none());
        assert!(latest.error.is_none());
    }

    #[tokio::test]
    async fn test_queue_events_filter() {
        let store = MemoryStore::new();
        store
            .save_queue_event(&QueueEvent::new("r1", "queue.enqueued", serde_json::json!({})))
            .await
            .unwrap();
        store
            .save_queue_event(&QueueEvent::new("r2", "queue.claimed", serde_json::json!({})))
            .await
            .unwrap();

        assert_eq!(store.list_queue_events(Some("r1"), 10).await.unwrap().len(), 1);
        assert_eq!(store.list_queue_events(None, 10).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_heartbeat_upsert() {
        let store = MemoryStore::new();
        let hb = WorkerHeartbeat::new("w1", relay_core::WorkerStatus::Online, 4);
        store.save_worker_heartbeat(&hb).await.unwrap();
        let hb = WorkerHeartbeat::new("w1", relay_core::WorkerStatus::Offline, 4);
        store.save_worker_heartbeat(&hb).await.unwrap();

        let list = store.list_worker_heartbeats(10).await.unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].status, relay_core::WorkerStatus::Offline);
    }
}
