//! Task transformations.
//!
//! [`Processor`] is the production [`Handler`]: an exhaustive match over
//! [`TaskKind`]. Foreign kinds never get here; the worker dead-letters them
//! before dispatch.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::model::TaskKind;

/// Simulated latency of the `slow` kind.
pub const DEFAULT_SLOW_DELAY: Duration = Duration::from_secs(1);

/// A failure while executing one task. Recorded as that task's error
/// outcome; never stops the worker.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ProcessingFault {
    pub message: String,
}

impl ProcessingFault {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Executes a task of a known kind.
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    async fn handle(&self, kind: TaskKind, payload: &str) -> Result<String, ProcessingFault>;
}

/// Built-in transformations.
#[derive(Debug, Clone)]
pub struct Processor {
    slow_delay: Duration,
}

impl Processor {
    pub fn new() -> Self {
        Self {
            slow_delay: DEFAULT_SLOW_DELAY,
        }
    }

    /// Override the simulated latency of `slow` tasks.
    pub fn with_slow_delay(mut self, delay: Duration) -> Self {
        self.slow_delay = delay;
        self
    }
}

impl Default for Processor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Handler for Processor {
    async fn handle(&self, kind: TaskKind, payload: &str) -> Result<String, ProcessingFault> {
        match kind {
            TaskKind::Reverse => Ok(reverse_text(payload)),
            TaskKind::Uppercase => Ok(uppercase_text(payload)),
            TaskKind::Slow => {
                tokio::time::sleep(self.slow_delay).await;
                Ok(slow_process_text(payload))
            }
        }
    }
}

pub fn reverse_text(text: &str) -> String {
    text.chars().rev().collect()
}

pub fn uppercase_text(text: &str) -> String {
    text.to_uppercase()
}

pub fn slow_process_text(text: &str) -> String {
    format!("processed:{text}")
}
