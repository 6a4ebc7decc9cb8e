//! In-memory queue for tests and single-process deployments

use super::{Delivery, DlqEntry, QueueStats, TaskQueue};
use crate::error::Result;
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use relay_core::Task;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

const CLAIM_POLL_INTERVAL: Duration = Duration::from_millis(25);

struct Pending {
    consumer: String,
    task: Task,
}

/// Mutex-guarded queue with the same contract as the durable backends
#[derive(Default)]
pub struct MemoryQueue {
    stream: Mutex<VecDeque<(u64, Task)>>,
    pending: Mutex<HashMap<u64, Pending>>,
    dlq: Mutex<Vec<DlqEntry>>,
    next_id: AtomicU64,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, task: Task) -> String {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        self.stream.lock().push_back((id, task));
        id.to_string()
    }

    fn take(&self, consumer: &str, count: usize) -> Vec<Delivery> {
        let mut stream = self.stream.lock();
        let mut pending = self.pending.lock();
        let mut out = Vec::new();
        while out.len() < count {
            let Some((id, task)) = stream.pop_front() else {
                break;
            };
            pending.insert(
                id,
                Pending {
                    consumer: consumer.to_string(),
                    task: task.clone(),
                },
            );
            out.push(Delivery {
                id: id.to_string(),
                task,
            });
        }
        out
    }
}

#[async_trait]
impl TaskQueue for MemoryQueue {
    async fn enqueue(&self, task: &Task) -> Result<String> {
        Ok(self.push(task.clone()))
    }

    async fn claim(&self, consumer: &str, block: Duration, count: usize) -> Result<Vec<Delivery>> {
        let deadline = Instant::now() + block;
        loop {
            let deliveries = self.take(consumer, count.max(1));
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
        if let Ok(id) = delivery_id.parse::<u64>() {
            let mut pending = self.pending.lock();
            if pending.get(&id).is_some_and(|p| p.consumer == consumer) {
                pending.remove(&id);
            }
        }
        Ok(())
    }

    async fn requeue(&self, task: &Task, _reason: &str, delay: Duration) -> Result<String> {
        let mut task = task.clone();
        task.not_before = if delay.is_zero() {
            None
        } else {
            Some(Utc::now() + chrono::Duration::from_std(delay).unwrap_or_default())
        };
        Ok(self.push(task))
    }

    async fn dead_letter(&self, delivery: &Delivery, reason: &str) -> Result<String> {
        if let Ok(id) = delivery.id.parse::<u64>() {
            self.pending.lock().remove(&id);
        }
        let entry = DlqEntry {
            id: delivery.id.clone(),
            task: delivery.task.clone(),
            reason: reason.to_string(),
            dead_lettered_at: Utc::now(),
        };
        self.dlq.lock().push(entry);
        Ok(delivery.id.clone())
    }

    async fn stats(&self) -> Result<QueueStats> {
        Ok(QueueStats {
            stream_length: self.stream.lock().len() as u64,
            pending: self.pending.lock().len() as u64,
            dlq_length: self.dlq.lock().len() as u64,
        })
    }

    async fn list_dlq(&self, limit: usize) -> Result<Vec<DlqEntry>> {
        let dlq = self.dlq.lock();
        let mut out: Vec<DlqEntry> = dlq.iter().rev().take(limit.max(1)).cloned().collect();
        out.reverse();
        Ok(out)
    }
}
