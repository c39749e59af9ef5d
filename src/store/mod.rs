//! Storage abstraction shared by producers and workers.
//!
//! A [`Backend`] provides the raw primitives (push, blocking pop, length,
//! first-write-wins outcome records). [`Queue`] and [`ResultStore`] are the
//! typed views the rest of the crate uses.

pub mod memory;
#[cfg(feature = "redis")]
pub mod redis;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use opentelemetry::KeyValue;

use crate::db::Db;
use crate::error::{Error, Result};
use crate::model::{TaskId, TaskOutcome};
use crate::telemetry::metrics;

/// Suffix appended to a queue name to address its dead-letter list.
pub const DEAD_LETTER_SUFFIX: &str = "_dead";

/// Raw operations a backing store must support.
///
/// Every method may fail with [`Error::StoreUnavailable`]. Pops must be
/// exclusive: two concurrent callers never receive the same item.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Liveness probe.
    async fn ping(&self) -> Result<()>;

    /// Create whatever the named queues need (tables, queues). Idempotent.
    async fn prepare(&self, _queues: &[&str]) -> Result<()> {
        Ok(())
    }

    /// Append an item to the tail of `queue`.
    async fn push(&self, queue: &str, item: &str) -> Result<()>;

    /// Remove and return the head of `queue`, waiting up to `timeout`.
    async fn pop_blocking(&self, queue: &str, timeout: Duration) -> Result<Option<String>>;

    /// Approximate number of items in `queue`.
    async fn length(&self, queue: &str) -> Result<u64>;

    /// Record `outcome` for `id` unless one exists. Returns whether it wrote.
    async fn put_outcome(&self, id: &TaskId, outcome: &TaskOutcome) -> Result<bool>;

    /// Outcome for `id`; `Pending` when nothing is recorded.
    async fn get_outcome(&self, id: &TaskId) -> Result<TaskOutcome>;
}

impl std::fmt::Debug for dyn Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Backend")
    }
}

/// Open a backend for `url` without touching the network.
///
/// Connections are established on first use, so a store that is still
/// starting up does not fail here; probe it with the connection supervisor.
pub fn open(url: &str) -> Result<Arc<dyn Backend>> {
    let scheme = url.split_once("://").map(|(scheme, _)| scheme);
    match scheme {
        Some("postgres" | "postgresql") => Ok(Arc::new(Db::connect_lazy(url)?)),
        #[cfg(feature = "redis")]
        Some("redis" | "rediss") => Ok(Arc::new(self::redis::RedisBackend::open(url)?)),
        #[cfg(not(feature = "redis"))]
        Some("redis" | "rediss") => Err(Error::Config(
            "redis store requested but taskq was built without the `redis` feature".to_string(),
        )),
        _ => Err(Error::Config(
            "unsupported store url (expected postgres:// or redis://)".to_string(),
        )),
    }
}

// ---------------------------------------------------------------------------
// Queue
// ---------------------------------------------------------------------------

/// A named FIFO queue on a backend.
#[derive(Clone)]
pub struct Queue {
    backend: Arc<dyn Backend>,
    name: String,
}

impl Queue {
    pub fn new(backend: Arc<dyn Backend>, name: impl Into<String>) -> Self {
        Self {
            backend,
            name: name.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The dead-letter list paired with this queue.
    pub fn dead_letters(&self) -> Queue {
        Queue {
            backend: Arc::clone(&self.backend),
            name: format!("{}{DEAD_LETTER_SUFFIX}", self.name),
        }
    }

    pub async fn push(&self, item: &str) -> Result<()> {
        self.backend.push(&self.name, item).await?;
        self.count("push");
        Ok(())
    }

    pub async fn pop_blocking(&self, timeout: Duration) -> Result<Option<String>> {
        let item = self.backend.pop_blocking(&self.name, timeout).await?;
        self.count(if item.is_some() { "pop" } else { "pop_empty" });
        Ok(item)
    }

    pub async fn length(&self) -> Result<u64> {
        self.backend.length(&self.name).await
    }

    fn count(&self, operation: &'static str) {
        metrics::queue_operations().add(
            1,
            &[
                KeyValue::new("queue", self.name.clone()),
                KeyValue::new("operation", operation),
            ],
        );
    }
}

impl std::fmt::Debug for Queue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Queue").field("name", &self.name).finish()
    }
}

// ---------------------------------------------------------------------------
// Result store
// ---------------------------------------------------------------------------

/// Task id → outcome map. One writer per id, any number of readers.
#[derive(Clone)]
pub struct ResultStore {
    backend: Arc<dyn Backend>,
}

impl ResultStore {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self { backend }
    }

    pub async fn get(&self, id: &TaskId) -> Result<TaskOutcome> {
        self.backend.get_outcome(id).await
    }

    /// Record a terminal outcome. The first record for an id wins; later
    /// writes are ignored and reported as `false`.
    pub async fn set(&self, id: &TaskId, outcome: &TaskOutcome) -> Result<bool> {
        if !outcome.is_terminal() {
            return Err(Error::Other(format!("refusing to record pending outcome for {id}")));
        }
        self.backend.put_outcome(id, outcome).await
    }
}

impl std::fmt::Debug for ResultStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultStore").finish_non_exhaustive()
    }
}
