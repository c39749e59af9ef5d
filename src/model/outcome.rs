//! Task outcomes and dead-letter entries.
//!
//! In process, outcomes are a sum type. The Redis result hash, which other
//! producers and pollers read too, can only hold strings and uses a prefix
//! encoding:
//!
//! | outcome | stored as |
//! |---|---|
//! | `Done { value }` | `value` |
//! | `Error { message }` | `error:` + message |
//! | `DeadLettered { reason }` | `dead-letter:` + reason |
//!
//! The `error:` marker is followed directly by the message, with no space.
//! A `Done` value that starts with either marker cannot be told apart from
//! the prefixed outcome; backends that can store tags (Postgres, memory) do
//! not use this encoding.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub const ERROR_PREFIX: &str = "error:";
pub const DEAD_LETTER_PREFIX: &str = "dead-letter:";

/// What a poller sees for a task id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TaskOutcome {
    /// No record yet.
    Pending,
    /// Processed successfully.
    Done { value: String },
    /// Processing failed; the fault was contained.
    Error { message: String },
    /// The item could not be processed and went to the dead-letter list.
    DeadLettered { reason: String },
}

impl TaskOutcome {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TaskOutcome::Pending)
    }

    /// Short status label, also used as the `status` column in Postgres.
    pub fn status(&self) -> &'static str {
        match self {
            TaskOutcome::Pending => "pending",
            TaskOutcome::Done { .. } => "done",
            TaskOutcome::Error { .. } => "error",
            TaskOutcome::DeadLettered { .. } => "dead_lettered",
        }
    }

    /// The value, message, or reason carried by a terminal outcome.
    pub fn detail(&self) -> Option<&str> {
        match self {
            TaskOutcome::Pending => None,
            TaskOutcome::Done { value } => Some(value),
            TaskOutcome::Error { message } => Some(message),
            TaskOutcome::DeadLettered { reason } => Some(reason),
        }
    }

    /// String encoding for string-valued stores. `Pending` has none.
    pub fn encode(&self) -> Option<String> {
        match self {
            TaskOutcome::Pending => None,
            TaskOutcome::Done { value } => Some(value.clone()),
            TaskOutcome::Error { message } => Some(format!("{ERROR_PREFIX}{message}")),
            TaskOutcome::DeadLettered { reason } => Some(format!("{DEAD_LETTER_PREFIX}{reason}")),
        }
    }

    /// Inverse of [`encode`](Self::encode) for a stored string.
    pub fn decode(stored: &str) -> Self {
        if let Some(reason) = stored.strip_prefix(DEAD_LETTER_PREFIX) {
            TaskOutcome::DeadLettered {
                reason: reason.to_string(),
            }
        } else if let Some(message) = stored.strip_prefix(ERROR_PREFIX) {
            TaskOutcome::Error {
                message: message.to_string(),
            }
        } else {
            TaskOutcome::Done {
                value: stored.to_string(),
            }
        }
    }

    /// Rebuild from a `(status, detail)` pair as stored in a tagged table.
    pub fn from_parts(status: &str, detail: String) -> Result<Self> {
        match status {
            "done" => Ok(TaskOutcome::Done { value: detail }),
            "error" => Ok(TaskOutcome::Error { message: detail }),
            "dead_lettered" => Ok(TaskOutcome::DeadLettered { reason: detail }),
            other => Err(Error::Other(format!("unknown outcome status: {other}"))),
        }
    }
}

/// An item diverted to the dead-letter list. Appended, never consumed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    /// The raw queued item, verbatim.
    pub task: String,
    pub reason: String,
    pub dead_lettered_at: DateTime<Utc>,
}

impl DeadLetterEntry {
    pub fn new(task: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            reason: reason.into(),
            dead_lettered_at: Utc::now(),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }
}
