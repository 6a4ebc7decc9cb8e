//! End-to-end distributed lifecycle: retry, dead-letter and cancellation

use async_trait::async_trait;
use relay_core::{attempt::queue_events, AttemptStatus, RunStatus, Task};
use relay_dispatch::{
    Coordinator, DispatchError, MemoryQueue, ProcessOutcome, Processor, RetryPolicy,
    SubmitRequest, TaskQueue, Worker, WorkerConfig,
};
use relay_events::EventBus;
use relay_store::{AttemptStore, MemoryStore, StateStore};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

const WORKER_ID: &str = "w1";

fn fast_policy(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        base_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(2),
        heartbeat_interval: Duration::from_millis(50),
        claim_block: Duration::from_millis(10),
    }
    .normalized()
}

struct Harness {
    store: Arc<MemoryStore>,
    queue: Arc<MemoryQueue>,
    bus: Arc<EventBus>,
    coordinator: Coordinator,
    worker: Arc<Worker>,
}

fn harness(processor: Arc<dyn Processor>, max_attempts: u32) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let queue = Arc::new(MemoryQueue::new());
    let bus = Arc::new(EventBus::new());
    let policy = fast_policy(max_attempts);

    let coordinator = Coordinator::new(
        store.clone(),
        store.clone(),
        queue.clone(),
        bus.clone(),
        policy.clone(),
    );
    let worker = Arc::new(Worker::new(
        WorkerConfig::new(WORKER_ID, 4),
        queue.clone(),
        store.clone(),
        store.clone(),
        bus.clone(),
        processor,
        policy,
    ));

    Harness {
        store,
        queue,
        bus,
        coordinator,
        worker,
    }
}

/// Claim and settle deliveries until the queue is fully drained
async fn drain(h: &Harness, ctx: &CancellationToken) {
    for _ in 0..500 {
        let stats = h.queue.stats().await.unwrap();
        if stats.stream_length == 0 && stats.pending == 0 {
            return;
        }
        let deliveries = h
            .queue
            .claim(WORKER_ID, Duration::from_millis(5), 8)
            .await
            .unwrap();
        for delivery in deliveries {
            h.worker.handle_delivery(ctx, delivery).await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    panic!("queue did not drain");
}

/// Fails the first `fail_first` calls, succeeds afterwards
struct FlakyProcessor {
    calls: AtomicUsize,
    fail_first: usize,
}

impl FlakyProcessor {
    fn new(fail_first: usize) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            fail_first,
        }
    }
}

#[async_trait]
impl Processor for FlakyProcessor {
    async fn process(
        &self,
        _ctx: &CancellationToken,
        task: &Task,
    ) -> relay_dispatch::Result<ProcessOutcome> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call <= self.fail_first {
            return Err(DispatchError::Processor("transient failure".to_string()));
        }
        Ok(ProcessOutcome {
            output: format!("done:{}", task.input),
            provider: "test".to_string(),
            messages: Vec::new(),
            usage: None,
        })
    }
}

/// Signals when processing starts, then waits for the test to release it
struct GatedProcessor {
    started: Arc<Notify>,
    release: Arc<Notify>,
}

#[async_trait]
impl Processor for GatedProcessor {
    async fn process(
        &self,
        _ctx: &CancellationToken,
        _task: &Task,
    ) -> relay_dispatch::Result<ProcessOutcome> {
        self.started.notify_one();
        self.release.notified().await;
        Ok(ProcessOutcome {
            output: "late success".to_string(),
            provider: "test".to_string(),
            messages: Vec::new(),
            usage: None,
        })
    }
}

#[tokio::test]
async fn retry_twice_then_succeed() {
    // fails twice, succeeds on the third attempt with max_attempts = 3
    let h = harness(Arc::new(FlakyProcessor::new(2)), 3);
    let ctx = CancellationToken::new();

    let receipt = h
        .coordinator
        .submit_run(SubmitRequest::agent("payload"))
        .await
        .unwrap();
    drain(&h, &ctx).await;

    let run = h.store.load_run(&receipt.run_id).await.unwrap();
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.output, "done:payload");
    assert!(run.completed_at.is_some());

    // three attempts, none left running, terminal statuses in order
    let mut attempts = h.store.list_attempts(&receipt.run_id, 10).await.unwrap();
    attempts.reverse();
    assert_eq!(attempts.len(), 3);
    let numbers: Vec<u32> = attempts.iter().map(|a| a.attempt).collect();
    assert_eq!(numbers, vec![1, 2, 3]);
    assert!(attempts.iter().all(|a| a.status != AttemptStatus::Running));
    assert_eq!(attempts[0].status, AttemptStatus::Failed);
    assert_eq!(attempts[2].status, AttemptStatus::Completed);

    let events = h
        .store
        .list_queue_events(Some(&receipt.run_id), 50)
        .await
        .unwrap();
    let retried = events.iter().filter(|e| e.event == queue_events::RETRIED).count();
    let completed = events
        .iter()
        .filter(|e| e.event == queue_events::RUN_COMPLETED)
        .count();
    assert_eq!(retried, 2);
    assert_eq!(completed, 1);

    assert_eq!(h.queue.stats().await.unwrap().dlq_length, 0);
}

#[tokio::test]
async fn exhausted_retries_dead_letter() {
    // always fails with max_attempts = 2
    let h = harness(Arc::new(FlakyProcessor::new(usize::MAX)), 2);
    let ctx = CancellationToken::new();

    let receipt = h
        .coordinator
        .submit_run(SubmitRequest::agent("doomed"))
        .await
        .unwrap();
    drain(&h, &ctx).await;

    let run = h.store.load_run(&receipt.run_id).await.unwrap();
    assert_eq!(run.status, RunStatus::Failed);
    assert!(run.error.as_deref().unwrap().contains("transient failure"));

    let attempts = h.store.list_attempts(&receipt.run_id, 10).await.unwrap();
    assert_eq!(attempts.len(), 2);

    let events = h
        .store
        .list_queue_events(Some(&receipt.run_id), 50)
        .await
        .unwrap();
    let dead = events
        .iter()
        .filter(|e| e.event == queue_events::DEAD_LETTERED)
        .count();
    assert_eq!(dead, 1);

    // exactly one DLQ entry, carrying the recorded error
    let dlq = h.coordinator.list_dlq(10).await.unwrap();
    assert_eq!(dlq.len(), 1);
    assert_eq!(dlq[0].task.run_id, receipt.run_id);
    assert!(dlq[0].reason.contains("transient failure"));
}

#[tokio::test]
async fn cancel_absorbs_late_success() {
    // CancelRun lands while the processor is mid-call; once the processor
    // returns, the worker must not overwrite canceled with completed.
    let started = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let processor = Arc::new(GatedProcessor {
        started: started.clone(),
        release: release.clone(),
    });
    let h = harness(processor, 3);

    let worker_ctx = CancellationToken::new();
    let worker = h.worker.clone();
    let worker_task = {
        let ctx = worker_ctx.clone();
        tokio::spawn(async move { worker.start(ctx).await })
    };

    let receipt = h
        .coordinator
        .submit_run(SubmitRequest::agent("slow"))
        .await
        .unwrap();

    // processor is now mid-call
    started.notified().await;
    h.coordinator.cancel_run(&receipt.run_id).await.unwrap();
    release.notify_one();

    // wait for the worker to settle the delivery
    for _ in 0..200 {
        if h.queue.stats().await.unwrap().pending == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let run = h.store.load_run(&receipt.run_id).await.unwrap();
    assert_eq!(run.status, RunStatus::Canceled);
    assert_eq!(run.error.as_deref(), Some("canceled"));

    let events = h
        .store
        .list_queue_events(Some(&receipt.run_id), 50)
        .await
        .unwrap();
    assert!(events.iter().any(|e| e.event == queue_events::RUN_CANCELED));
    assert!(!events.iter().any(|e| e.event == queue_events::RUN_COMPLETED));

    worker_ctx.cancel();
    worker_task.await.unwrap().unwrap();
}

#[tokio::test]
async fn canceled_run_is_acked_without_execution() {
    // cancellation before any claim: the worker sees the persisted status
    // and never invokes the processor
    let processor = Arc::new(FlakyProcessor::new(0));
    let h = harness(processor.clone(), 3);
    let ctx = CancellationToken::new();

    let receipt = h
        .coordinator
        .submit_run(SubmitRequest::agent("never run"))
        .await
        .unwrap();
    h.coordinator.cancel_run(&receipt.run_id).await.unwrap();

    drain(&h, &ctx).await;

    assert_eq!(processor.calls.load(Ordering::SeqCst), 0);
    let run = h.store.load_run(&receipt.run_id).await.unwrap();
    assert_eq!(run.status, RunStatus::Canceled);
    // no attempt was ever started
    assert!(h
        .store
        .list_attempts(&receipt.run_id, 10)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn delayed_task_is_silently_requeued() {
    let h = harness(Arc::new(FlakyProcessor::new(0)), 3);
    let ctx = CancellationToken::new();

    let receipt = h
        .coordinator
        .submit_run(SubmitRequest::agent("later"))
        .await
        .unwrap();

    // claim the task and requeue it far into the future
    let deliveries = h
        .queue
        .claim(WORKER_ID, Duration::from_millis(10), 1)
        .await
        .unwrap();
    h.queue
        .requeue(&deliveries[0].task, "hold", Duration::from_secs(60))
        .await
        .unwrap();
    h.queue.ack(WORKER_ID, &deliveries[0].id).await.unwrap();

    // the worker claims the delayed delivery, requeues it and acks
    let deliveries = h
        .queue
        .claim(WORKER_ID, Duration::from_millis(10), 1)
        .await
        .unwrap();
    assert!(deliveries[0].task.not_before.is_some());
    h.worker.handle_delivery(&ctx, deliveries[0].clone()).await.unwrap();

    let stats = h.queue.stats().await.unwrap();
    assert_eq!(stats.pending, 0);
    assert_eq!(stats.stream_length, 1);

    // the run was never started
    let run = h.store.load_run(&receipt.run_id).await.unwrap();
    assert_eq!(run.status, RunStatus::Queued);
}

#[tokio::test]
async fn worker_start_heartbeats_online_then_offline() {
    let h = harness(Arc::new(FlakyProcessor::new(0)), 3);
    let ctx = CancellationToken::new();

    let worker = h.worker.clone();
    let task = {
        let ctx = ctx.clone();
        tokio::spawn(async move { worker.start(ctx).await })
    };

    // online heartbeat lands promptly
    let mut online = false;
    for _ in 0..100 {
        let workers = h.store.list_worker_heartbeats(10).await.unwrap();
        if workers
            .iter()
            .any(|w| w.worker_id == WORKER_ID && w.status == relay_core::WorkerStatus::Online)
        {
            online = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(online);

    ctx.cancel();
    task.await.unwrap().unwrap();

    let workers = h.store.list_worker_heartbeats(10).await.unwrap();
    assert_eq!(workers[0].status, relay_core::WorkerStatus::Offline);
    assert_eq!(workers[0].capacity, 4);
}

#[tokio::test]
async fn bus_receives_lifecycle_events() {
    let h = harness(Arc::new(FlakyProcessor::new(1)), 3);
    let ctx = CancellationToken::new();
    let (_id, mut rx) = h.bus.subscribe(64);

    h.coordinator
        .submit_run(SubmitRequest::agent("observed"))
        .await
        .unwrap();
    drain(&h, &ctx).await;

    let mut names = Vec::new();
    while let Ok(event) = rx.try_recv() {
        names.push(event.name);
    }
    assert!(names.contains(&queue_events::ENQUEUED.to_string()));
    assert!(names.contains(&queue_events::RETRIED.to_string()));
    assert!(names.contains(&queue_events::RUN_COMPLETED.to_string()));
}
