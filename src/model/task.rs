//! Tasks, task ids, and the queue wire format.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::error::{Error, Result};

/// Longest accepted payload, counted in characters.
pub const MAX_PAYLOAD_CHARS: usize = 10_000;

// ---------------------------------------------------------------------------
// Task id
// ---------------------------------------------------------------------------

/// Opaque task identifier.
///
/// Ids minted here are UUIDv4 strings, but anything read back from the queue
/// is accepted as-is: producers other than this crate may push work.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for TaskId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for TaskId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

// ---------------------------------------------------------------------------
// Kind
// ---------------------------------------------------------------------------

/// The closed set of kinds this crate knows how to execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskKind {
    /// Reverse the character sequence.
    Reverse,
    /// Map to uppercase.
    Uppercase,
    /// Simulated slow operation.
    Slow,
}

impl TaskKind {
    pub const ALL: [TaskKind; 3] = [TaskKind::Reverse, TaskKind::Uppercase, TaskKind::Slow];

    pub fn as_str(self) -> &'static str {
        match self {
            TaskKind::Reverse => "reverse",
            TaskKind::Uppercase => "uppercase",
            TaskKind::Slow => "slow",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl AsRef<str> for TaskKind {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

/// Bounded label for a raw kind string: the kind's name when known,
/// `"unknown"` otherwise.
pub fn kind_label(raw: &str) -> &'static str {
    raw.parse::<TaskKind>().map_or("unknown", TaskKind::as_str)
}

/// A kind string outside [`TaskKind`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown kind: {0}")]
pub struct UnknownKind(pub String);

impl FromStr for TaskKind {
    type Err = UnknownKind;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "reverse" => Ok(TaskKind::Reverse),
            "uppercase" => Ok(TaskKind::Uppercase),
            "slow" => Ok(TaskKind::Slow),
            other => Err(UnknownKind(other.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Wire format
// ---------------------------------------------------------------------------

/// A queued item as it appears on the wire:
/// `{"id": "...", "kind": "...", "data": "..."}`.
///
/// `kind` stays a plain string here so items with foreign kinds survive the
/// trip to the worker, which dead-letters them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskMessage {
    pub id: TaskId,
    pub kind: String,
    pub data: String,
}

impl TaskMessage {
    /// Validate the payload and mint a new message with a fresh id.
    pub fn new(kind: impl Into<String>, payload: impl Into<String>) -> Result<Self> {
        let payload = payload.into();
        validate_payload(&payload)?;
        Ok(Self {
            id: TaskId::new(),
            kind: kind.into(),
            data: payload,
        })
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Resolve the kind, yielding an executable [`Task`].
    pub fn classify(&self) -> std::result::Result<Task, UnknownKind> {
        let kind = self.kind.parse()?;
        Ok(Task {
            id: self.id.clone(),
            kind,
            payload: self.data.clone(),
        })
    }
}

/// Reject empty, whitespace-only, and oversized payloads.
pub fn validate_payload(payload: &str) -> Result<()> {
    if payload.trim().is_empty() {
        return Err(Error::Validation("payload cannot be empty".to_string()));
    }
    let chars = payload.chars().count();
    if chars > MAX_PAYLOAD_CHARS {
        return Err(Error::Validation(format!(
            "payload too large: {chars} characters (limit {MAX_PAYLOAD_CHARS})"
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------------

/// A task whose kind is known and can be dispatched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    pub id: TaskId,
    pub kind: TaskKind,
    pub payload: String,
}
