//! SQLite-backed durable store
//!
//! The authoritative tier of the hybrid layout. Uses a shared connection
//! pool; the embedded migrations create the full schema on connect.

mod rows;

use crate::error::{Result, StoreError};
use crate::traits::{AttemptStore, EventStore, StateStore};
use async_trait::async_trait;
use chrono::Utc;
use relay_core::{Attempt, AttemptStatus, Checkpoint, QueueEvent, Run, RunQuery, WorkerHeartbeat};
use relay_events::RunEvent;
use rows::{AttemptRow, CheckpointRow, HeartbeatRow, QueueEventRow, RunEventRow, RunRow};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use tracing::info;

/// Durable store over a SQLite database
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Connect and run migrations
    ///
    /// # Arguments
    /// * `database_url` - SQLite connection string, e.g. `sqlite:relay.db?mode=rwc`
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| StoreError::Storage(e.to_string()))?;

        info!(url = database_url, "sqlite store ready");
        Ok(Self { pool })
    }

    /// Wrap an existing pool (migrations must already have run)
    pub fn with_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Access the underlying pool, e.g. to share it with the queue
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl StateStore for SqliteStore {
    async fn save_run(&self, run: &Run) -> Result<()> {
        sqlx::query(
            "INSERT INTO runs (run_id, session_id, provider, status, input, output,
                               messages_json, usage_json, metadata_json, error,
                               created_at, updated_at, completed_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(run_id) DO UPDATE SET
               session_id = excluded.session_id,
               provider = excluded.provider,
               status = excluded.status,
               input = excluded.input,
               output = excluded.output,
               messages_json = excluded.messages_json,
               usage_json = excluded.usage_json,
               metadata_json = excluded.metadata_json,
               error = excluded.error,
               updated_at = excluded.updated_at,
               completed_at = excluded.completed_at",
        )
        .bind(&run.run_id)
        .bind(&run.session_id)
        .bind(&run.provider)
        .bind(run.status.to_string())
        .bind(&run.input)
        .bind(&run.output)
        .bind(serde_json::to_string(&run.messages)?)
        .bind(run.usage.map(|u| serde_json::to_string(&u)).transpose()?)
        .bind(serde_json::to_string(&run.metadata)?)
        .bind(&run.error)
        .bind(run.created_at.to_rfc3339())
        .bind(run.updated_at.to_rfc3339())
        .bind(run.completed_at.map(|t| t.to_rfc3339()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn load_run(&self, run_id: &str) -> Result<Run> {
        let row = sqlx::query_as::<_, RunRow>("SELECT * FROM runs WHERE run_id = ?")
            .bind(run_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("run {}", run_id)))?;
        row.try_into()
    }

    async fn list_runs(&self, query: &RunQuery) -> Result<Vec<Run>> {
        let mut sql = String::from("SELECT * FROM runs WHERE 1=1");
        if query.session_id.is_some() {
            sql.push_str(" AND session_id = ?");
        }
        if query.status.is_some() {
            sql.push_str(" AND status = ?");
        }
        sql.push_str(" ORDER BY updated_at DESC LIMIT ? OFFSET ?");

        let mut q = sqlx::query_as::<_, RunRow>(&sql);
        if let Some(session) = &query.session_id {
            q = q.bind(session);
        }
        if let Some(status) = query.status {
            q = q.bind(status.to_string());
        }
        let rows = q
            .bind(query.effective_limit() as i64)
            .bind(query.offset as i64)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn save_checkpoint(&self, checkpoint: &Checkpoint) -> Result<()> {
        // Insert-only: the (run_id, seq) primary key turns a duplicate seq
        // into StoreError::Conflict.
        sqlx::query(
            "INSERT INTO checkpoints (run_id, seq, node_id, state_json, created_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&checkpoint.run_id)
        .bind(checkpoint.seq as i64)
        .bind(&checkpoint.node_id)
        .bind(serde_json::to_string(&checkpoint.state)?)
        .bind(checkpoint.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn load_latest_checkpoint(&self, run_id: &str) -> Result<Option<Checkpoint>> {
        let row = sqlx::query_as::<_, CheckpointRow>(
            "SELECT * FROM checkpoints WHERE run_id = ? ORDER BY seq DESC LIMIT 1",
        )
        .bind(run_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn list_checkpoints(&self, run_id: &str, limit: usize) -> Result<Vec<Checkpoint>> {
        let rows = sqlx::query_as::<_, CheckpointRow>(
            "SELECT * FROM checkpoints WHERE run_id = ? ORDER BY seq DESC LIMIT ?",
        )
        .bind(run_id)
        .bind(limit.max(1) as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }
}

#[async_trait]
impl AttemptStore for SqliteStore {
    async fn start_attempt(&self, attempt: &Attempt) -> Result<()> {
        sqlx::query(
            "INSERT INTO run_attempts (run_id, attempt, worker_id, status, started_at,
                                       ended_at, error, metadata_json)
             VALUES (?, ?, ?, 'running', ?, NULL, NULL, ?)
             ON CONFLICT(run_id, attempt) DO UPDATE SET
               worker_id = excluded.worker_id,
               status = 'running',
               started_at = excluded.started_at,
               ended_at = NULL,
               error = NULL,
               metadata_json = excluded.metadata_json",
        )
        .bind(&attempt.run_id)
        .bind(attempt.attempt as i64)
        .bind(&attempt.worker_id)
        .bind(attempt.started_at.to_rfc3339())
        .bind(serde_json::to_string(&attempt.metadata)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn finish_attempt(
        &self,
        run_id: &str,
        attempt: u32,
        status: AttemptStatus,
        error: Option<String>,
    ) -> Result<()> {
        let result = sqlx::query(
            "UPDATE run_attempts SET status = ?, ended_at = ?, error = ?
             WHERE run_id = ? AND attempt = ?",
        )
        .bind(status.to_string())
        .bind(Utc::now().to_rfc3339())
        .bind(error)
        .bind(run_id)
        .bind(attempt as i64)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!(
                "attempt {} of run {}",
                attempt, run_id
            )));
        }
        Ok(())
    }

    async fn latest_attempt(&self, run_id: &str) -> Result<Option<Attempt>> {
        let row = sqlx::query_as::<_, AttemptRow>(
            "SELECT * FROM run_attempts WHERE run_id = ? ORDER BY attempt DESC LIMIT 1",
        )
        .bind(run_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn list_attempts(&self, run_id: &str, limit: usize) -> Result<Vec<Attempt>> {
        let rows = sqlx::query_as::<_, AttemptRow>(
            "SELECT * FROM run_attempts WHERE run_id = ? ORDER BY attempt DESC LIMIT ?",
        )
        .bind(run_id)
        .bind(limit.max(1) as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn save_worker_heartbeat(&self, heartbeat: &WorkerHeartbeat) -> Result<()> {
        sqlx::query(
            "INSERT INTO worker_heartbeats (worker_id, status, last_seen_at, capacity, metadata_json)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(worker_id) DO UPDATE SET
               status = excluded.status,
               last_seen_at = excluded.last_seen_at,
               capacity = excluded.capacity,
               metadata_json = excluded.metadata_json",
        )
        .bind(&heartbeat.worker_id)
        .bind(heartbeat.status.to_string())
        .bind(heartbeat.last_seen_at.to_rfc3339())
        .bind(heartbeat.capacity as i64)
        .bind(serde_json::to_string(&heartbeat.metadata)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_worker_heartbeats(&self, limit: usize) -> Result<Vec<WorkerHeartbeat>> {
        let rows = sqlx::query_as::<_, HeartbeatRow>(
            "SELECT * FROM worker_heartbeats ORDER BY last_seen_at DESC LIMIT ?",
        )
        .bind(limit.max(1) as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn save_queue_event(&self, event: &QueueEvent) -> Result<()> {
        sqlx::query(
            "INSERT INTO queue_events (run_id, event, at, payload_json) VALUES (?, ?, ?, ?)",
        )
        .bind(&event.run_id)
        .bind(&event.event)
        .bind(event.at.to_rfc3339())
        .bind(serde_json::to_string(&event.payload)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_queue_events(&self, run_id: Option<&str>, limit: usize) -> Result<Vec<QueueEvent>> {
        let rows = if let Some(run_id) = run_id {
            sqlx::query_as::<_, QueueEventRow>(
                "SELECT run_id, event, at, payload_json FROM queue_events
                 WHERE run_id = ? ORDER BY id DESC LIMIT ?",
            )
            .bind(run_id)
            .bind(limit.max(1) as i64)
            .fetch_all(&self.pool)
            .await?
        } else {
            sqlx::query_as::<_, QueueEventRow>(
                "SELECT run_id, event, at, payload_json FROM queue_events
                 ORDER BY id DESC LIMIT ?",
            )
            .bind(limit.max(1) as i64)
            .fetch_all(&self.pool)
            .await?
        };
        rows.into_iter().map(TryInto::try_into).collect()
    }
}

#[async_trait]
impl EventStore for SqliteStore {
    async fn save_event(&self, event: &RunEvent) -> Result<()> {
        let ts = event.timestamp.unwrap_or_else(Utc::now);
        sqlx::query(
            "INSERT INTO run_events (run_id, session_id, kind, status, name, message,
                                     tool_name, duration_ms, attributes_json, error, timestamp)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&event.run_id)
        .bind(&event.session_id)
        .bind(event.kind.to_string())
        .bind(event.status.to_string())
        .bind(&event.name)
        .bind(&event.message)
        .bind(&event.tool_name)
        .bind(event.duration_ms as i64)
        .bind(serde_json::to_string(&event.attributes)?)
        .bind(&event.error)
        .bind(ts.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_events(&self, run_id: &str, limit: usize) -> Result<Vec<RunEvent>> {
        let rows = sqlx::query_as::<_, RunEventRow>(
            "SELECT run_id, session_id, kind, status, name, message, tool_name,
                    duration_ms, attributes_json, error, timestamp
             FROM run_events WHERE run_id = ? ORDER BY timestamp ASC, id ASC LIMIT ?",
        )
        .bind(run_id)
        .bind(limit.max(1) as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }
}
