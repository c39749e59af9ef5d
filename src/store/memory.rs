//! In-process backend.
//!
//! One list per queue and a map of outcomes kept as values, so any `Done`
//! value reads back exactly. State lives only as long as the process; use it
//! for tests and single-process embedding.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

use super::Backend;
use crate::error::{Error, Result};
use crate::model::{TaskId, TaskOutcome};

pub struct MemoryBackend {
    lists: Mutex<HashMap<String, VecDeque<String>>>,
    results: Mutex<HashMap<TaskId, TaskOutcome>>,
    pushed: Notify,
    available: AtomicBool,
    failing_pings: AtomicU32,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            lists: Mutex::new(HashMap::new()),
            results: Mutex::new(HashMap::new()),
            pushed: Notify::new(),
            available: AtomicBool::new(true),
            failing_pings: AtomicU32::new(0),
        }
    }

    /// Simulate losing (or regaining) the store. While unavailable every
    /// operation fails with `StoreUnavailable`.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Make the next `n` pings fail.
    pub fn fail_next_pings(&self, n: u32) {
        self.failing_pings.store(n, Ordering::SeqCst);
    }

    /// Snapshot of a queue's items, head first.
    pub async fn items(&self, queue: &str) -> Vec<String> {
        self.lists
            .lock()
            .await
            .get(queue)
            .map(|list| list.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of recorded outcomes.
    pub async fn outcome_count(&self) -> usize {
        self.results.lock().await.len()
    }

    fn check(&self) -> Result<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::unavailable("memory store marked unavailable"))
        }
    }

    async fn try_pop(&self, queue: &str) -> Option<String> {
        self.lists
            .lock()
            .await
            .get_mut(queue)
            .and_then(VecDeque::pop_front)
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn ping(&self) -> Result<()> {
        let failed = self
            .failing_pings
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(Error::unavailable("memory store refused ping"));
        }
        self.check()
    }

    async fn push(&self, queue: &str, item: &str) -> Result<()> {
        self.check()?;
        self.lists
            .lock()
            .await
            .entry(queue.to_string())
            .or_default()
            .push_back(item.to_string());
        self.pushed.notify_waiters();
        Ok(())
    }

    async fn pop_blocking(&self, queue: &str, timeout: Duration) -> Result<Option<String>> {
        self.check()?;
        let deadline = Instant::now() + timeout;
        loop {
            // Register for wake-ups before looking, so a push between the
            // check and the wait is not missed.
            let notified = self.pushed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(item) = self.try_pop(queue).await {
                return Ok(Some(item));
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(None);
            }
            self.check()?;
        }
    }

    async fn length(&self, queue: &str) -> Result<u64> {
        self.check()?;
        let lists = self.lists.lock().await;
        Ok(lists.get(queue).map_or(0, |list| list.len() as u64))
    }

    async fn put_outcome(&self, id: &TaskId, outcome: &TaskOutcome) -> Result<bool> {
        self.check()?;
        if !outcome.is_terminal() {
            return Ok(false);
        }
        let mut results = self.results.lock().await;
        if results.contains_key(id) {
            return Ok(false);
        }
        results.insert(id.clone(), outcome.clone());
        Ok(true)
    }

    async fn get_outcome(&self, id: &TaskId) -> Result<TaskOutcome> {
        self.check()?;
        let results = self.results.lock().await;
        Ok(results.get(id).cloned().unwrap_or(TaskOutcome::Pending))
    }
}
