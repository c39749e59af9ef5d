//! Producer side: validate, enqueue, and look up outcomes.

use opentelemetry::KeyValue;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::model::{TaskId, TaskMessage, TaskOutcome, kind_label};
use crate::store::{Queue, ResultStore};
use crate::telemetry::metrics;

/// Accepts tasks from clients and answers polls.
#[derive(Clone, Debug)]
pub struct Submitter {
    queue: Queue,
    results: ResultStore,
}

impl Submitter {
    pub fn new(queue: Queue, results: ResultStore) -> Self {
        Self { queue, results }
    }

    /// Validate and enqueue a task. Returns its id without waiting for it
    /// to run.
    ///
    /// Kinds are not checked here: a kind this build does not know is still
    /// queued and ends up dead-lettered by the worker.
    pub async fn submit(&self, kind: impl AsRef<str>, payload: &str) -> Result<TaskId> {
        let kind = kind.as_ref();
        let message = match TaskMessage::new(kind, payload) {
            Ok(message) => message,
            Err(e) => {
                if let Error::Validation(ref reason) = e {
                    debug!(kind, %reason, "task rejected");
                    metrics::tasks_rejected().add(1, &[KeyValue::new("kind", kind_label(kind))]);
                }
                return Err(e);
            }
        };

        self.queue.push(&message.to_json()?).await?;

        metrics::tasks_submitted().add(1, &[KeyValue::new("kind", kind_label(kind))]);
        info!(
            id = %message.id,
            kind,
            payload_len = payload.chars().count(),
            queue = self.queue.name(),
            "task submitted"
        );
        Ok(message.id)
    }

    /// Current outcome of a task. Unknown ids are `Pending`.
    pub async fn outcome(&self, id: &TaskId) -> Result<TaskOutcome> {
        self.results.get(id).await
    }
}
