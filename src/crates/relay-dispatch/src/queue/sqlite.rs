//! SQLite-backed durable queue
//!
//! The stream table's rowid is the opaque delivery id; claimed entries move
//! to a pending table keyed by consumer (the consumer-group semantics of a
//! stream queue), and dead-lettered deliveries land in their own table with
//! the recorded reason. Usually shares a database with the state store.

use super::{Delivery, DlqEntry, QueueStats, TaskQueue};
use crate::error::{DispatchError, Result};
use async_trait::async_trait;
use chrono::Utc;
use relay_core::Task;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::time::{Duration, Instant};
use tracing::debug;

const CLAIM_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Durable queue over SQLite tables
#[derive(Clone)]
pub struct SqliteQueue {
    pool: SqlitePool,
}

impl SqliteQueue {
    /// Connect to the database and create the queue tables
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        Self::with_pool(pool).await
    }

    /// Reuse an existing pool (e.g. the state store's), creating the queue
    /// tables if needed
    pub async fn with_pool(pool: SqlitePool) -> Result<Self> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS queue_stream (
                 id          INTEGER PRIMARY KEY AUTOINCREMENT,
                 task_json   TEXT NOT NULL,
                 enqueued_at TEXT NOT NULL
             )",
        )
        .execute(&pool)
        .await?;
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS queue_pending (
                 delivery_id INTEGER PRIMARY KEY,
                 consumer    TEXT NOT NULL,
                 task_json   TEXT NOT NULL,
                 claimed_at  TEXT NOT NULL
             )",
        )
        .execute(&pool)
        .await?;
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS queue_dlq (
                 id               INTEGER PRIMARY KEY AUTOINCREMENT,
                 delivery_id      TEXT NOT NULL,
                 task_json        TEXT NOT NULL,
                 reason           TEXT NOT NULL,
                 dead_lettered_at TEXT NOT NULL
             )",
        )
        .execute(&pool)
        .await?;
        Ok(Self { pool })
    }

    async fn append(&self, task: &Task) -> Result<String> {
        let result = sqlx::query("INSERT INTO queue_stream (task_json, enqueued_at) VALUES (?, ?)")
            .bind(serde_json::to_string(task)?)
            .bind(Utc::now().to_rfc3339())
            .execute(&self.pool)
            .await?;
        Ok(result.last_insert_rowid().to_string())
    }

    /// Atomically move up to `count` head entries into the pending set
    async fn take(&self, consumer: &str, count: usize) -> Result<Vec<Delivery>> {
        let mut tx = self.pool.begin().await?;

        let rows = sqlx::query("SELECT id, task_json FROM queue_stream ORDER BY id LIMIT ?")
            .bind(count.max(1) as i64)
            .fetch_all(&mut *tx)
            .await?;

        let mut deliveries = Vec::with_capacity(rows.len());
        let now = Utc::now().to_rfc3339();
        for row in rows {
            let id: i64 = row.get("id");
            let task_json: String = row.get("task_json");
            let task: Task = serde_json::from_str(&task_json)?;

            sqlx::query("DELETE FROM queue_stream WHERE id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await?;
            sqlx::query(
                "INSERT INTO queue_pending (delivery_id, consumer, task_json, claimed_at)
                 VALUES (?, ?, ?, ?)",
            )
            .bind(id)
            .bind(consumer)
            .bind(&task_json)
            .bind(&now)
            .execute(&mut *tx)
            .await?;

            deliveries.push(Delivery {
                id: id.to_string(),
                task,
            });
        }

        tx.commit().await?;
        Ok(deliveries)
    }
}

#[async_trait]
impl TaskQueue for SqliteQueue {
    async fn enqueue(&self, task: &Task) -> Result<String> {
        let id = self.append(task).await?;
        debug!(run_id = %task.run_id, delivery = %id, "task enqueued");
        Ok(id)
    }

    async fn claim(&self, consumer: &str, block: Duration, count: usize) -> Result<Vec<Delivery>> {
        let deadline = Instant::now() + block;
        loop {
            let deliveries = self.take(consumer, count).await?;
            if !deliveries.is_empty() {
                return Ok(deliveries);
            }
            if Instant::now() >= deadline {
                return Ok(Vec::new());
            }
            tokio::time::sleep(CLAIM_POLL_INTERVAL.min(block)).await;
        }
    }

    async fn ack(&self, consumer: &str, delivery_id: &str) -> Result<()> {
        let id: i64 = delivery_id
            .parse()
            .map_err(|_| DispatchError::Queue(format!("bad delivery id '{}'", delivery_id)))?;
        sqlx::query("DELETE FROM queue_pending WHERE delivery_id = ? AND consumer = ?")
            .bind(id)
            .bind(consumer)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn requeue(&self, task: &Task, reason: &str, delay: Duration) -> Result<String> {
        let mut task = task.clone();
        task.not_before = if delay.is_zero() {
            None
        } else {
            Some(Utc::now() + chrono::Duration::from_std(delay).unwrap_or_default())
        };
        let id = self.append(&task).await?;
        debug!(run_id = %task.run_id, delivery = %id, reason = reason, delay_ms = delay.as_millis() as u64,
               "task requeued");
        Ok(id)
    }

    async fn dead_letter(&self, delivery: &Delivery, reason: &str) -> Result<String> {
        let mut tx = self.pool.begin().await?;

        if let Ok(id) = delivery.id.parse::<i64>() {
            sqlx::query("DELETE FROM queue_pending WHERE delivery_id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }

        let result = sqlx::query(
            "INSERT INTO queue_dlq (delivery_id, task_json, reason, dead_lettered_at)
             VALUES (?, ?, ?, ?)",
        )
        .bind(&delivery.id)
        .bind(serde_json::to_string(&delivery.task)?)
        .bind(reason)
        .bind(Utc::now().to_rfc3339())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(result.last_insert_rowid().to_string())
    }

    async fn stats(&self) -> Result<QueueStats> {
        let stream: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM queue_stream")
            .fetch_one(&self.pool)
            .await?;
        let pending: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM queue_pending")
            .fetch_one(&self.pool)
            .await?;
        let dlq: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM queue_dlq")
            .fetch_one(&self.pool)
            .await?;
        Ok(QueueStats {
            stream_length: stream.0 as u64,
            pending: pending.0 as u64,
            dlq_length: dlq.0 as u64,
        })
    }

    async fn list_dlq(&self, limit: usize) -> Result<Vec<DlqEntry>> {
        let rows = sqlx::query(
            "SELECT delivery_id, task_json, reason, dead_lettered_at
             FROM queue_dlq ORDER BY id DESC LIMIT ?",
        )
        .bind(limit.max(1) as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let task_json: String = row.get("task_json");
            let raw_ts: String = row.get("dead_lettered_at");
            out.push(DlqEntry {
                id: row.get("delivery_id"),
                task: serde_json::from_str(&task_json)?,
                reason: row.get("reason"),
                dead_lettered_at: chrono::DateTime::parse_from_rfc3339(&raw_ts)
                    .map_err(|e| DispatchError::Queue(format!("bad timestamp: {}", e)))?
                    .with_timezone(&Utc),
            });
        }
        Ok(out)
    }
}
