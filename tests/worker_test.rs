//! End-to-end worker behaviour over the in-memory backend.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use taskq::engine::{Phase, Worker, WorkerConfig, WorkerReport, WorkerState};
use taskq::model::{DeadLetterEntry, TaskId, TaskKind, TaskOutcome};
use taskq::processor::{Handler, ProcessingFault, Processor};
use taskq::store::memory::MemoryBackend;
use taskq::store::{Backend, Queue, ResultStore};
use taskq::submit::Submitter;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

struct Harness {
    backend: Arc<MemoryBackend>,
    queue: Queue,
    results: ResultStore,
    submitter: Submitter,
}

impl Harness {
    fn new() -> Self {
        let backend = Arc::new(MemoryBackend::new());
        let shared: Arc<dyn Backend> = backend.clone();
        let queue = Queue::new(Arc::clone(&shared), "tasks");
        let results = ResultStore::new(shared);
        let submitter = Submitter::new(queue.clone(), results.clone());
        Self {
            backend,
            queue,
            results,
            submitter,
        }
    }

    fn worker<H: Handler>(&self, handler: H, cancel: &CancellationToken) -> Worker<H> {
        Worker::new(
            self.queue.clone(),
            self.results.clone(),
            handler,
            fast_config(),
            cancel.clone(),
        )
    }

    fn spawn<H: Handler>(&self, handler: H, cancel: &CancellationToken) -> JoinHandle<WorkerReport> {
        let worker = self.worker(handler, cancel);
        tokio::spawn(async move { worker.run().await })
    }

    /// Poll until the task reaches a terminal outcome.
    async fn wait_for(&self, id: &TaskId) -> TaskOutcome {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            // Reads may fail while a test holds the store down.
            if let Ok(outcome) = self.submitter.outcome(id).await {
                if outcome.is_terminal() {
                    return outcome;
                }
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "task {id} still pending"
            );
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    async fn wait_until_popped(&self) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while !self.backend.items("tasks").await.is_empty() {
            assert!(tokio::time::Instant::now() < deadline, "queue never drained");
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    }
}

fn fast_config() -> WorkerConfig {
    WorkerConfig {
        poll_timeout: Duration::from_millis(50),
        heartbeat_interval: Duration::from_millis(100),
        task_timeout: Duration::from_secs(2),
        error_pause: Duration::from_millis(20),
    }
}

fn fast_processor() -> Processor {
    Processor::new().with_slow_delay(Duration::from_millis(20))
}

struct FailingHandler;

#[async_trait]
impl Handler for FailingHandler {
    async fn handle(&self, _kind: TaskKind, payload: &str) -> Result<String, ProcessingFault> {
        Err(ProcessingFault::new(format!("cannot handle {payload}")))
    }
}

struct PanickingHandler;

#[async_trait]
impl Handler for PanickingHandler {
    async fn handle(&self, _kind: TaskKind, _payload: &str) -> Result<String, ProcessingFault> {
        panic!("handler exploded");
    }
}

struct StuckHandler;

#[async_trait]
impl Handler for StuckHandler {
    async fn handle(&self, _kind: TaskKind, _payload: &str) -> Result<String, ProcessingFault> {
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok("never".to_string())
    }
}

/// Takes the store down while the task runs and brings it back after
/// `outage`, so the commit has to retry.
struct OutageHandler {
    backend: Arc<MemoryBackend>,
    outage: Duration,
}

#[async_trait]
impl Handler for OutageHandler {
    async fn handle(&self, _kind: TaskKind, payload: &str) -> Result<String, ProcessingFault> {
        self.backend.set_available(false);
        let backend = Arc::clone(&self.backend);
        let outage = self.outage;
        tokio::spawn(async move {
            tokio::time::sleep(outage).await;
            backend.set_available(true);
        });
        Ok(payload.to_string())
    }
}

// ---------------------------------------------------------------------------
// Happy path
// ---------------------------------------------------------------------------

#[tokio::test]
async fn built_in_kinds_produce_results() {
    let h = Harness::new();
    let cancel = CancellationToken::new();
    let worker = h.spawn(fast_processor(), &cancel);

    let reverse = h.submitter.submit("reverse", "hello").await.unwrap();
    let upper = h.submitter.submit("uppercase", "abc").await.unwrap();
    let slow = h.submitter.submit("slow", "x").await.unwrap();

    assert_eq!(
        h.wait_for(&reverse).await,
        TaskOutcome::Done {
            value: "olleh".to_string()
        }
    );
    assert_eq!(
        h.wait_for(&upper).await,
        TaskOutcome::Done {
            value: "ABC".to_string()
        }
    );
    assert_eq!(
        h.wait_for(&slow).await,
        TaskOutcome::Done {
            value: "processed:x".to_string()
        }
    );

    cancel.cancel();
    let report = worker.await.unwrap();
    assert_eq!(report.processed, 3);
}

#[tokio::test]
async fn polling_is_idempotent() {
    let h = Harness::new();
    let cancel = CancellationToken::new();
    let worker = h.spawn(fast_processor(), &cancel);

    let id = h.submitter.submit("reverse", "abc").await.unwrap();
    let first = h.wait_for(&id).await;
    for _ in 0..3 {
        assert_eq!(h.submitter.outcome(&id).await.unwrap(), first);
    }

    cancel.cancel();
    worker.await.unwrap();
}

#[tokio::test]
async fn unknown_id_stays_pending() {
    let h = Harness::new();
    let outcome = h.submitter.outcome(&TaskId::from("nope")).await.unwrap();
    assert_eq!(outcome, TaskOutcome::Pending);
}

// ---------------------------------------------------------------------------
// Dead letters
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unknown_kind_is_dead_lettered() {
    let h = Harness::new();
    let cancel = CancellationToken::new();
    let worker = h.spawn(fast_processor(), &cancel);

    let id = h.submitter.submit("frobnicate", "some payload").await.unwrap();
    assert_eq!(
        h.wait_for(&id).await,
        TaskOutcome::DeadLettered {
            reason: "unknown kind: frobnicate".to_string()
        }
    );

    let dead = h.backend.items("tasks_dead").await;
    assert_eq!(dead.len(), 1);
    let entry = DeadLetterEntry::from_json(&dead[0]).unwrap();
    assert!(entry.task.contains("some payload"));
    assert!(entry.task.contains("frobnicate"));
    assert_eq!(entry.reason, "unknown kind: frobnicate");

    cancel.cancel();
    worker.await.unwrap();
}

#[tokio::test]
async fn malformed_item_is_dead_lettered_without_outcome() {
    let h = Harness::new();
    let cancel = CancellationToken::new();
    let worker = h.spawn(fast_processor(), &cancel);

    h.queue.push("not json at all").await.unwrap();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    let dead = loop {
        let dead = h.backend.items("tasks_dead").await;
        if !dead.is_empty() {
            break dead;
        }
        assert!(tokio::time::Instant::now() < deadline, "never dead-lettered");
        tokio::time::sleep(Duration::from_millis(5)).await;
    };

    let entry = DeadLetterEntry::from_json(&dead[0]).unwrap();
    assert_eq!(entry.task, "not json at all");
    assert!(entry.reason.starts_with("malformed task:"), "{}", entry.reason);
    assert_eq!(h.backend.outcome_count().await, 0);

    cancel.cancel();
    worker.await.unwrap();
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn rejected_submission_never_reaches_the_worker() {
    let h = Harness::new();
    assert!(h.submitter.submit("reverse", "").await.is_err());
    assert!(h.backend.items("tasks").await.is_empty());
    assert_eq!(h.backend.outcome_count().await, 0);
}

// ---------------------------------------------------------------------------
// Fault containment
// ---------------------------------------------------------------------------

#[tokio::test]
async fn handler_fault_becomes_error_outcome() {
    let h = Harness::new();
    let cancel = CancellationToken::new();
    let worker = h.spawn(FailingHandler, &cancel);

    let id = h.submitter.submit("reverse", "abc").await.unwrap();
    assert_eq!(
        h.wait_for(&id).await,
        TaskOutcome::Error {
            message: "cannot handle abc".to_string()
        }
    );

    // The worker keeps going after a fault.
    let next = h.submitter.submit("reverse", "def").await.unwrap();
    assert!(matches!(h.wait_for(&next).await, TaskOutcome::Error { .. }));

    cancel.cancel();
    assert_eq!(worker.await.unwrap().processed, 2);
}

#[tokio::test]
async fn handler_panic_is_contained() {
    let h = Harness::new();
    let cancel = CancellationToken::new();
    let worker = h.spawn(PanickingHandler, &cancel);

    let id = h.submitter.submit("uppercase", "abc").await.unwrap();
    match h.wait_for(&id).await {
        TaskOutcome::Error { message } => {
            assert!(message.starts_with("task panicked"), "{message}");
            assert!(message.contains("handler exploded"), "{message}");
        }
        other => panic!("expected Error, got {other:?}"),
    }

    cancel.cancel();
    worker.await.unwrap();
}

#[tokio::test]
async fn overrunning_task_times_out() {
    let h = Harness::new();
    let cancel = CancellationToken::new();
    let worker = Worker::new(
        h.queue.clone(),
        h.results.clone(),
        StuckHandler,
        WorkerConfig {
            task_timeout: Duration::from_millis(50),
            ..fast_config()
        },
        cancel.clone(),
    );
    let handle = tokio::spawn(async move { worker.run().await });

    let id = h.submitter.submit("slow", "x").await.unwrap();
    assert_eq!(
        h.wait_for(&id).await,
        TaskOutcome::Error {
            message: "timed out after 50ms".to_string()
        }
    );

    cancel.cancel();
    handle.await.unwrap();
}

// ---------------------------------------------------------------------------
// Concurrency
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn many_workers_process_every_task_once() {
    let h = Harness::new();
    let cancel = CancellationToken::new();
    let workers: Vec<_> = (0..3).map(|_| h.spawn(fast_processor(), &cancel)).collect();

    let mut ids = Vec::new();
    for i in 0..30 {
        let kind = TaskKind::ALL[i % TaskKind::ALL.len()];
        ids.push(h.submitter.submit(kind, &format!("payload-{i}")).await.unwrap());
    }

    for id in &ids {
        assert!(matches!(h.wait_for(id).await, TaskOutcome::Done { .. }));
    }
    assert_eq!(h.backend.outcome_count().await, 30);

    cancel.cancel();
    let mut processed = 0;
    for worker in workers {
        processed += worker.await.unwrap().processed;
    }
    assert_eq!(processed, 30);
}

// ---------------------------------------------------------------------------
// Shutdown
// ---------------------------------------------------------------------------

#[tokio::test]
async fn shutdown_lets_in_flight_task_finish() {
    let h = Harness::new();
    let cancel = CancellationToken::new();
    let worker = h.spawn(
        Processor::new().with_slow_delay(Duration::from_millis(300)),
        &cancel,
    );

    let id = h.submitter.submit("slow", "payload").await.unwrap();
    h.wait_until_popped().await;
    cancel.cancel();

    let report = worker.await.unwrap();
    assert_eq!(report.processed, 1);
    assert_eq!(
        h.results.get(&id).await.unwrap(),
        TaskOutcome::Done {
            value: "processed:payload".to_string()
        }
    );
}

#[tokio::test]
async fn idle_worker_stops_within_one_poll() {
    let h = Harness::new();
    let cancel = CancellationToken::new();
    let worker = h.spawn(fast_processor(), &cancel);

    tokio::time::sleep(Duration::from_millis(20)).await;
    cancel.cancel();

    let report = tokio::time::timeout(Duration::from_secs(1), worker)
        .await
        .expect("worker did not stop")
        .unwrap();
    assert_eq!(report.processed, 0);
}

// ---------------------------------------------------------------------------
// Store outages
// ---------------------------------------------------------------------------

#[tokio::test]
async fn worker_survives_store_outage() {
    let h = Harness::new();
    let cancel = CancellationToken::new();
    let worker = h.spawn(fast_processor(), &cancel);

    h.backend.set_available(false);
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(!worker.is_finished());
    h.backend.set_available(true);

    let id = h.submitter.submit("reverse", "back").await.unwrap();
    assert_eq!(
        h.wait_for(&id).await,
        TaskOutcome::Done {
            value: "kcab".to_string()
        }
    );

    cancel.cancel();
    worker.await.unwrap();
}

#[tokio::test]
async fn commit_retries_through_a_brief_outage() {
    let h = Harness::new();
    let cancel = CancellationToken::new();
    let worker = h.spawn(
        OutageHandler {
            backend: Arc::clone(&h.backend),
            outage: Duration::from_millis(60),
        },
        &cancel,
    );

    let id = h.submitter.submit("reverse", "kept").await.unwrap();
    assert_eq!(
        h.wait_for(&id).await,
        TaskOutcome::Done {
            value: "kept".to_string()
        }
    );

    cancel.cancel();
    worker.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn long_outage_never_loses_a_popped_task() {
    let h = Harness::new();
    let cancel = CancellationToken::new();
    let worker = Worker::new(
        h.queue.clone(),
        h.results.clone(),
        OutageHandler {
            backend: Arc::clone(&h.backend),
            outage: Duration::from_secs(10),
        },
        WorkerConfig::default(),
        cancel.clone(),
    );
    let handle = tokio::spawn(async move { worker.run().await });

    let id = h.submitter.submit("reverse", "kept").await.unwrap();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(60);
    let outcome = loop {
        if let Ok(outcome) = h.submitter.outcome(&id).await {
            if outcome.is_terminal() {
                break outcome;
            }
        }
        assert!(tokio::time::Instant::now() < deadline, "task {id} still pending");
        tokio::time::sleep(Duration::from_millis(500)).await;
    };
    assert_eq!(
        outcome,
        TaskOutcome::Done {
            value: "kept".to_string()
        }
    );

    cancel.cancel();
    assert_eq!(handle.await.unwrap().processed, 1);
}

#[tokio::test]
async fn done_values_that_look_like_markers_stay_done() {
    let h = Harness::new();
    let cancel = CancellationToken::new();
    let worker = h.spawn(fast_processor(), &cancel);

    let error_like = h.submitter.submit("reverse", "olleh:rorre").await.unwrap();
    let dead_like = h.submitter.submit("reverse", "x:rettel-daed").await.unwrap();

    assert_eq!(
        h.wait_for(&error_like).await,
        TaskOutcome::Done {
            value: "error:hello".to_string()
        }
    );
    assert_eq!(
        h.wait_for(&dead_like).await,
        TaskOutcome::Done {
            value: "dead-letter:x".to_string()
        }
    );

    cancel.cancel();
    worker.await.unwrap();
}

// ---------------------------------------------------------------------------
// Single iterations and heartbeats
// ---------------------------------------------------------------------------

#[tokio::test]
async fn tick_processes_at_most_one_item() {
    let h = Harness::new();
    let worker = h.worker(fast_processor(), &CancellationToken::new());
    let mut state = WorkerState::new();

    worker.tick(&mut state).await.unwrap();
    assert_eq!(state.processed(), 0);
    assert_eq!(state.phase(), Phase::Idle);

    h.submitter.submit("reverse", "a").await.unwrap();
    h.submitter.submit("reverse", "b").await.unwrap();
    worker.tick(&mut state).await.unwrap();
    assert_eq!(state.processed(), 1);
    assert_eq!(h.queue.length().await.unwrap(), 1);
}

#[tokio::test]
async fn tick_surfaces_store_failure() {
    let h = Harness::new();
    let worker = h.worker(fast_processor(), &CancellationToken::new());
    let mut state = WorkerState::new();

    h.backend.set_available(false);
    let err = worker.tick(&mut state).await.unwrap_err();
    assert!(err.is_store_unavailable());
}

#[tokio::test(start_paused = true)]
async fn idle_ticks_heartbeat_once_the_interval_passes() {
    let h = Harness::new();
    // poll 50ms, heartbeat every 100ms
    let worker = h.worker(fast_processor(), &CancellationToken::new());
    let mut state = WorkerState::new();
    let start = state.last_heartbeat();

    worker.tick(&mut state).await.unwrap();
    assert_eq!(state.last_heartbeat(), start, "heartbeat before the interval");

    tokio::time::advance(Duration::from_millis(100)).await;
    worker.tick(&mut state).await.unwrap();
    let sent = state.last_heartbeat();
    assert!(sent > start, "no heartbeat after the interval");

    worker.tick(&mut state).await.unwrap();
    assert_eq!(state.last_heartbeat(), sent, "heartbeat repeated too early");
}

#[tokio::test]
async fn heartbeat_reports_depths() {
    let h = Harness::new();
    let worker = h.worker(fast_processor(), &CancellationToken::new());
    let mut state = WorkerState::new();

    h.submitter.submit("reverse", "a").await.unwrap();
    h.submitter.submit("reverse", "b").await.unwrap();
    h.queue.dead_letters().push("entry").await.unwrap();

    let heartbeat = worker.heartbeat(&mut state).await;
    assert_eq!(heartbeat.processed, 0);
    assert_eq!(heartbeat.queue_depth, Some(2));
    assert_eq!(heartbeat.dead_letter_depth, Some(1));
    assert!(!state.heartbeat_due(Duration::from_secs(60)));
}

#[tokio::test]
async fn heartbeat_tolerates_unavailable_store() {
    let h = Harness::new();
    let worker = h.worker(fast_processor(), &CancellationToken::new());
    let mut state = WorkerState::new();

    h.backend.set_available(false);
    let heartbeat = worker.heartbeat(&mut state).await;
    assert_eq!(heartbeat.queue_depth, None);
    assert_eq!(heartbeat.dead_letter_depth, None);
}
