//! The worker loop: pop, dispatch, commit, heartbeat, drain on shutdown.
//!
//! ```text
//! Idle → Fetching ─┬─ empty ─────────────────────────────→ Idle (heartbeat if due)
//!                  ├─ unknown kind / malformed → dead-letter → Idle
//!                  └─ task → Dispatching → Committing ────→ Idle
//! cancelled at Idle → Draining → Stopped
//! ```
//!
//! Cancellation is only observed at the `Idle` boundary. The blocking pop is
//! never raced against the token: abandoning a pop that the store already
//! served would lose the item.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use opentelemetry::KeyValue;
use tokio::task::JoinError;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, warn};

use super::state::{Heartbeat, Phase, WorkerReport, WorkerState};
use crate::error::Result;
use crate::model::{DeadLetterEntry, Task, TaskId, TaskMessage, TaskOutcome};
use crate::processor::{Handler, Processor};
use crate::store::{Queue, ResultStore};
use crate::telemetry::metrics;
use crate::telemetry::task::{record_state_transition, start_task_span};

/// Timing knobs for the worker loop.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Longest a single blocking pop waits; bounds shutdown latency.
    pub poll_timeout: Duration,
    pub heartbeat_interval: Duration,
    /// Tasks running longer are recorded as errors.
    pub task_timeout: Duration,
    /// Pause after a failed iteration or store write.
    pub error_pause: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_timeout: Duration::from_secs(5),
            heartbeat_interval: Duration::from_secs(30),
            task_timeout: Duration::from_secs(30),
            error_pause: Duration::from_secs(1),
        }
    }
}

/// A single sequential consumer of one queue.
///
/// Any number of workers may share a queue: correctness rests on the store's
/// exclusive pop and on task ids being unique.
pub struct Worker<H: Handler = Processor> {
    queue: Queue,
    dead_letters: Queue,
    results: ResultStore,
    handler: Arc<H>,
    config: WorkerConfig,
    cancel: CancellationToken,
}

impl<H: Handler> Worker<H> {
    pub fn new(
        queue: Queue,
        results: ResultStore,
        handler: H,
        config: WorkerConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            dead_letters: queue.dead_letters(),
            queue,
            results,
            handler: Arc::new(handler),
            config,
            cancel,
        }
    }

    /// Token that stops this worker once the current iteration finishes.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run until cancelled. Store failures are logged and retried after a
    /// pause; they never end the loop.
    pub async fn run(&self) -> WorkerReport {
        let mut state = WorkerState::new();
        info!(
            queue = self.queue.name(),
            poll_timeout_ms = self.config.poll_timeout.as_millis() as u64,
            "worker loop starting"
        );

        while !self.cancel.is_cancelled() {
            if let Err(e) = self.tick(&mut state).await {
                state.set_phase(Phase::Idle);
                warn!(
                    error = %e,
                    pause_ms = self.config.error_pause.as_millis() as u64,
                    "worker iteration failed, pausing"
                );
                tokio::time::sleep(self.config.error_pause).await;
            }
        }

        state.set_phase(Phase::Draining);
        info!(processed = state.processed(), "shutdown requested, worker draining");
        state.set_phase(Phase::Stopped);

        let report = state.report();
        info!(
            processed = report.processed,
            uptime_secs = report.uptime.as_secs_f64(),
            "worker shutdown complete"
        );
        report
    }

    /// One `Idle → … → Idle` iteration: pop at most one item, take it to a
    /// terminal record, then heartbeat if due.
    ///
    /// Only a failed pop is returned as an error. Once an item is popped the
    /// iteration does not end until its record is written.
    pub async fn tick(&self, state: &mut WorkerState) -> Result<()> {
        state.set_phase(Phase::Fetching);
        if let Some(raw) = self.queue.pop_blocking(self.config.poll_timeout).await? {
            if let Err(e) = self.process(&raw, state).await {
                error!(error = %e, item = %raw, "popped item could not be recorded, dropping it");
            }
            let processed = state.record_processed();
            if processed % 10 == 0 {
                info!(processed, "worker progress");
            }
        }
        state.set_phase(Phase::Idle);

        if state.heartbeat_due(self.config.heartbeat_interval) {
            self.heartbeat(state).await;
        }
        Ok(())
    }

    /// Gather and emit a heartbeat. Depth lookups that fail are logged and
    /// reported as `None`.
    pub async fn heartbeat(&self, state: &mut WorkerState) -> Heartbeat {
        let queue_depth = self
            .queue
            .length()
            .await
            .inspect_err(|e| warn!(error = %e, queue = self.queue.name(), "queue depth unavailable"))
            .ok();
        let dead_letter_depth = self
            .dead_letters
            .length()
            .await
            .inspect_err(|e| {
                warn!(error = %e, queue = self.dead_letters.name(), "queue depth unavailable")
            })
            .ok();

        for (queue, depth) in [(&self.queue, queue_depth), (&self.dead_letters, dead_letter_depth)] {
            if let Some(depth) = depth {
                metrics::queue_depth().record(depth, &[KeyValue::new("queue", queue.name().to_string())]);
            }
        }

        let heartbeat = Heartbeat {
            processed: state.processed(),
            queue_depth,
            dead_letter_depth,
            uptime: state.uptime(),
            at: Utc::now(),
        };
        info!(
            processed = heartbeat.processed,
            queue_depth = ?heartbeat.queue_depth,
            dead_letter_depth = ?heartbeat.dead_letter_depth,
            uptime_secs = heartbeat.uptime.as_secs_f64(),
            "heartbeat"
        );
        state.mark_heartbeat();
        heartbeat
    }

    async fn process(&self, raw: &str, state: &mut WorkerState) -> Result<()> {
        let message = match TaskMessage::from_json(raw) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "malformed task, dead-lettering");
                return self
                    .dead_letter(raw, format!("malformed task: {e}"), None, "malformed")
                    .await;
            }
        };

        let span = start_task_span(&message.kind, message.id.as_str());
        async {
            let task = match message.classify() {
                Ok(task) => task,
                Err(unknown) => {
                    warn!(kind = %message.kind, "unknown kind, dead-lettering");
                    record_state_transition(&span, "fetching", "dead_lettered");
                    return self
                        .dead_letter(raw, unknown.to_string(), Some(&message.id), "unknown_kind")
                        .await;
                }
            };

            state.set_phase(Phase::Dispatching);
            record_state_transition(&span, "fetching", "dispatching");
            let started = Instant::now();
            let outcome = self.dispatch(&task).await;
            let duration_ms = started.elapsed().as_secs_f64() * 1000.0;
            metrics::task_duration_ms().record(duration_ms, &[KeyValue::new("kind", task.kind.as_str())]);

            state.set_phase(Phase::Committing);
            record_state_transition(&span, "dispatching", "committing");
            self.commit(&task.id, &outcome).await?;
            metrics::tasks_processed().add(
                1,
                &[
                    KeyValue::new("kind", task.kind.as_str()),
                    KeyValue::new("status", outcome.status()),
                ],
            );

            match &outcome {
                TaskOutcome::Error { message } => {
                    warn!(id = %task.id, error = %message, duration_ms, "task failed")
                }
                _ => info!(id = %task.id, duration_ms, "task done"),
            }
            record_state_transition(&span, "committing", "idle");
            Ok(())
        }
        .instrument(span.clone())
        .await
    }

    /// Run the handler in its own task so a panic or overrun is contained
    /// and turned into an error outcome.
    async fn dispatch(&self, task: &Task) -> TaskOutcome {
        let handler = Arc::clone(&self.handler);
        let kind = task.kind;
        let payload = task.payload.clone();
        let mut job = tokio::spawn(async move { handler.handle(kind, &payload).await });

        match tokio::time::timeout(self.config.task_timeout, &mut job).await {
            Ok(Ok(Ok(value))) => TaskOutcome::Done { value },
            Ok(Ok(Err(fault))) => TaskOutcome::Error {
                message: fault.to_string(),
            },
            Ok(Err(join_error)) => TaskOutcome::Error {
                message: join_failure_message(join_error),
            },
            Err(_) => {
                job.abort();
                TaskOutcome::Error {
                    message: format!(
                        "timed out after {}ms",
                        self.config.task_timeout.as_millis()
                    ),
                }
            }
        }
    }

    async fn commit(&self, id: &TaskId, outcome: &TaskOutcome) -> Result<()> {
        let results = &self.results;
        let written = self
            .with_store_retry("commit outcome", move || results.set(id, outcome))
            .await?;
        if !written {
            warn!(id = %id, status = outcome.status(), "outcome already recorded, keeping the first");
        }
        Ok(())
    }

    async fn dead_letter(
        &self,
        raw: &str,
        reason: String,
        id: Option<&TaskId>,
        label: &'static str,
    ) -> Result<()> {
        let entry = DeadLetterEntry::new(raw, reason.clone()).to_json()?;
        let entry = entry.as_str();
        let dead_letters = &self.dead_letters;
        self.with_store_retry("dead-letter push", move || dead_letters.push(entry))
            .await?;
        metrics::tasks_dead_lettered().add(1, &[KeyValue::new("reason", label)]);

        if let Some(id) = id {
            self.commit(id, &TaskOutcome::DeadLettered { reason }).await?;
        }
        debug!(reason = label, "item dead-lettered");
        Ok(())
    }

    /// Retry a store write made on behalf of an item already popped until
    /// the store takes it. Giving up would leave the task pending forever.
    /// Errors other than `StoreUnavailable` are returned at once.
    async fn with_store_retry<T, F, Fut>(&self, operation: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt: u32 = 1;
        loop {
            match op().await {
                Ok(value) => {
                    if attempt > 1 {
                        info!(operation, attempt, "store write succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) if e.is_store_unavailable() => {
                    warn!(operation, attempt, error = %e, "store write failed, retrying");
                    attempt = attempt.saturating_add(1);
                    tokio::time::sleep(self.config.error_pause).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn join_failure_message(err: JoinError) -> String {
    if !err.is_panic() {
        return format!("task aborted: {err}");
    }
    let panic = err.into_panic();
    let detail = panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    format!("task panicked: {detail}")
}
