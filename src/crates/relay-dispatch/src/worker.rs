//! Worker: claim, execute, retry and heartbeat
//!
//! A worker claims deliveries up to its capacity, hands them to the
//! processor, and settles each one: ack on success, requeue with backoff
//! while retries remain, dead-letter on exhaustion. The persisted run
//! status is consulted on claim and again before committing a result, so a
//! cancellation always wins over a stale success (delivery is at-least-once
//! and a crash between process and ack redelivers).

use crate::error::{DispatchError, Result};
use crate::policy::RetryPolicy;
use crate::processor::Processor;
use crate::queue::{Delivery, TaskQueue};
use chrono::Utc;
use relay_core::{
    attempt::queue_events, Attempt, AttemptStatus, RunStatus, WorkerHeartbeat, WorkerStatus,
};
use relay_events::{EventBus, EventKind, EventStatus, RunEvent};
use relay_store::{AttemptStore, StateStore};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Worker identity and claim capacity
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub worker_id: String,
    pub capacity: usize,
}

impl WorkerConfig {
    pub fn new(worker_id: impl Into<String>, capacity: usize) -> Self {
        Self {
            worker_id: worker_id.into(),
            capacity: capacity.max(1),
        }
    }
}

/// A queue consumer executing tasks through a pluggable processor
pub struct Worker {
    config: WorkerConfig,
    queue: Arc<dyn TaskQueue>,
    store: Arc<dyn StateStore>,
    attempts: Arc<dyn AttemptStore>,
    bus: Arc<EventBus>,
    processor: Arc<dyn Processor>,
    policy: RetryPolicy,
}

impl Worker {
    pub fn new(
        config: WorkerConfig,
        queue: Arc<dyn TaskQueue>,
        store: Arc<dyn StateStore>,
        attempts: Arc<dyn AttemptStore>,
        bus: Arc<EventBus>,
        processor: Arc<dyn Processor>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            config,
            queue,
            store,
            attempts,
            bus,
            processor,
            policy: policy.normalized(),
        }
    }

    /// Run the claim loop until the context is canceled
    ///
    /// Comes online with an immediate heartbeat, keeps a background
    /// heartbeat ticker, and flips to `offline` on exit regardless of why
    /// the loop stopped.
    pub async fn start(&self, ctx: CancellationToken) -> Result<()> {
        self.heartbeat(WorkerStatus::Online).await;
        let heartbeat_task = self.spawn_heartbeat(ctx.child_token());

        info!(worker_id = %self.config.worker_id, capacity = self.config.capacity, "worker started");

        loop {
            let deliveries = tokio::select! {
                biased;
                _ = ctx.cancelled() => break,
                result = self.queue.claim(&self.config.worker_id, self.policy.claim_block, self.config.capacity) => {
                    match result {
                        Ok(deliveries) => deliveries,
                        Err(e) => {
                            error!(worker_id = %self.config.worker_id, error = %e, "claim failed");
                            tokio::time::sleep(self.policy.base_backoff).await;
                            continue;
                        }
                    }
                }
            };

            for delivery in deliveries {
                let run_id = delivery.task.run_id.clone();
                if let Err(e) = self.handle_delivery(&ctx, delivery).await {
                    error!(worker_id = %self.config.worker_id, run_id = %run_id, error = %e,
                           "delivery handling failed");
                }
            }
        }

        heartbeat_task.abort();
        // the exit heartbeat runs on a fresh context: the loop's token is
        // already canceled
        self.heartbeat(WorkerStatus::Offline).await;
        info!(worker_id = %self.config.worker_id, "worker stopped");
        Ok(())
    }

    fn spawn_heartbeat(&self, ctx: CancellationToken) -> tokio::task::JoinHandle<()> {
        let attempts = self.attempts.clone();
        let worker_id = self.config.worker_id.clone();
        let capacity = self.config.capacity as u32;
        let interval = self.policy.heartbeat_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ctx.cancelled() => break,
                    _ = ticker.tick() => {
                        let hb = WorkerHeartbeat::new(&worker_id, WorkerStatus::Online, capacity);
                        if let Err(e) = attempts.save_worker_heartbeat(&hb).await {
                            warn!(worker_id = %worker_id, error = %e, "heartbeat failed");
                        }
                    }
                }
            }
        })
    }

    async fn heartbeat(&self, status: WorkerStatus) {
        let hb = WorkerHeartbeat::new(&self.config.worker_id, status, self.config.capacity as u32);
        if let Err(e) = self.attempts.save_worker_heartbeat(&hb).await {
            warn!(worker_id = %self.config.worker_id, error = %e, "heartbeat failed");
        }
    }

    /// Settle one delivery end to end
    pub async fn handle_delivery(&self, ctx: &CancellationToken, delivery: Delivery) -> Result<()> {
        let task = &delivery.task;

        // Visibility delay: silently requeue with the remaining delay.
        if let Some(delay) = task.remaining_delay(Utc::now()) {
            debug!(run_id = %task.run_id, delay_ms = delay.as_millis() as u64, "task not yet visible");
            self.queue.requeue(task, "not_before", delay).await?;
            self.queue.ack(&self.config.worker_id, &delivery.id).await?;
            return Ok(());
        }

        let mut run = match self.store.load_run(&task.run_id).await {
            Ok(run) => run,
            Err(e) if e.is_not_found() => {
                warn!(run_id = %task.run_id, "claimed task for unknown run, dropping");
                self.queue.ack(&self.config.worker_id, &delivery.id).await?;
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        // Cancellation safety: a canceled or already-completed run is
        // acked without executing.
        if matches!(run.status, RunStatus::Canceled | RunStatus::Completed) {
            debug!(run_id = %task.run_id, status = %run.status, "skipping settled run");
            self.queue.ack(&self.config.worker_id, &delivery.id).await?;
            return Ok(());
        }

        let attempt = Attempt::started(&task.run_id, task.attempt, &self.config.worker_id)
            .with_metadata("message_id", serde_json::json!(delivery.id));
        self.attempts.start_attempt(&attempt).await?;
        self.record(
            &task.run_id,
            queue_events::CLAIMED,
            serde_json::json!({"attempt": task.attempt, "worker_id": self.config.worker_id}),
        )
        .await;

        run.status = RunStatus::Running;
        run.metadata
            .insert("worker_id".to_string(), serde_json::json!(self.config.worker_id));
        run.metadata
            .insert("attempt".to_string(), serde_json::json!(task.attempt));
        run.touch();
        self.store.save_run(&run).await?;

        let outcome = tokio::select! {
            biased;
            _ = ctx.cancelled() => Err(DispatchError::Cancelled),
            result = self.processor.process(ctx, task) => result,
        };

        match outcome {
            Ok(outcome) => self.settle_success(&delivery, outcome).await,
            Err(e) if e.is_cancelled() => {
                self.attempts
                    .finish_attempt(&task.run_id, task.attempt, AttemptStatus::Failed, Some("canceled".to_string()))
                    .await?;
                self.queue.ack(&self.config.worker_id, &delivery.id).await?;
                Ok(())
            }
            Err(e) => self.settle_failure(&delivery, e).await,
        }
    }

    async fn settle_success(
        &self,
        delivery: &Delivery,
        outcome: crate::processor::ProcessOutcome,
    ) -> Result<()> {
        let task = &delivery.task;
        self.attempts
            .finish_attempt(&task.run_id, task.attempt, AttemptStatus::Completed, None)
            .await?;

        // Reload: a cancel may have committed while the processor ran. The
        // canceled status must absorb this success.
        let mut run = self.store.load_run(&task.run_id).await?;
        if run.status == RunStatus::Canceled {
            info!(run_id = %task.run_id, "run canceled mid-flight, discarding result");
            self.queue.ack(&self.config.worker_id, &delivery.id).await?;
            return Ok(());
        }

        run.status = RunStatus::Completed;
        run.output = outcome.output;
        run.provider = outcome.provider;
        if !outcome.messages.is_empty() {
            run.messages = outcome.messages;
        }
        if outcome.usage.is_some() {
            run.usage = outcome.usage;
        }
        run.error = None;
        run.completed_at = Some(Utc::now());
        run.touch();
        self.store.save_run(&run).await?;

        self.record(
            &task.run_id,
            queue_events::RUN_COMPLETED,
            serde_json::json!({"attempt": task.attempt}),
        )
        .await;
        self.bus.publish(
            RunEvent::new(&task.run_id, EventKind::Run, EventStatus::Completed, queue_events::RUN_COMPLETED)
                .with_session(&task.session_id),
        );

        self.queue.ack(&self.config.worker_id, &delivery.id).await?;
        info!(run_id = %task.run_id, attempt = task.attempt, "run completed");
        Ok(())
    }

    async fn settle_failure(&self, delivery: &Delivery, error: DispatchError) -> Result<()> {
        let task = &delivery.task;
        let message = error.to_string();

        self.attempts
            .finish_attempt(&task.run_id, task.attempt, AttemptStatus::Failed, Some(message.clone()))
            .await?;

        let mut run = self.store.load_run(&task.run_id).await?;
        if run.status == RunStatus::Canceled {
            self.queue.ack(&self.config.worker_id, &delivery.id).await?;
            return Ok(());
        }

        if task.has_retries_left() {
            let mut next = task.clone();
            next.attempt += 1;
            let delay = self.policy.backoff(task.attempt);
            self.queue.requeue(&next, &message, delay).await?;

            run.status = RunStatus::Queued;
            run.error = None;
            run.metadata
                .insert("last_error".to_string(), serde_json::json!(message));
            run.touch();
            self.store.save_run(&run).await?;

            self.record(
                &task.run_id,
                queue_events::RETRIED,
                serde_json::json!({
                    "attempt": task.attempt,
                    "next_attempt": next.attempt,
                    "error": message,
                    "delay_ms": delay.as_millis() as u64,
                }),
            )
            .await;
            self.bus.publish(
                RunEvent::new(&task.run_id, EventKind::Custom, EventStatus::Failed, queue_events::RETRIED)
                    .with_session(&task.session_id)
                    .with_error(&message),
            );

            self.queue.ack(&self.config.worker_id, &delivery.id).await?;
            warn!(run_id = %task.run_id, attempt = task.attempt, delay_ms = delay.as_millis() as u64,
                  "attempt failed, requeued with backoff");
        } else {
            // Dead-lettering removes the delivery from the pending set.
            self.queue.dead_letter(delivery, &message).await?;

            run.status = RunStatus::Failed;
            run.error = Some(message.clone());
            run.completed_at = Some(Utc::now());
            run.touch();
            self.store.save_run(&run).await?;

            self.record(
                &task.run_id,
                queue_events::DEAD_LETTERED,
                serde_json::json!({"attempt": task.attempt, "error": message}),
            )
            .await;
            self.bus.publish(
                RunEvent::new(&task.run_id, EventKind::Run, EventStatus::Failed, queue_events::DEAD_LETTERED)
                    .with_session(&task.session_id)
                    .with_error(&message),
            );

            warn!(run_id = %task.run_id, attempt = task.attempt, "retries exhausted, dead-lettered");
        }
        Ok(())
    }

    async fn record(&self, run_id: &str, event: &str, payload: serde_json::Value) {
        let _ = self
            .attempts
            .save_queue_event(&relay_core::QueueEvent::new(run_id, event, payload))
            .await;
    }
}
