//! Startup connectivity check with linear, capped backoff.

use std::sync::Arc;
use std::time::Duration;

use opentelemetry::KeyValue;
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::store::Backend;
use crate::telemetry::metrics;

/// How long to keep probing the store, and how long to wait in between.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Delay after the first failure; grows by this much per attempt.
    pub step: Duration,
    /// Upper bound for any single delay.
    pub max_delay: Duration,
    /// A probe that has not answered after this long counts as failed.
    pub probe_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 20,
            step: Duration::from_millis(500),
            max_delay: Duration::from_secs(5),
            probe_timeout: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Delay after failed attempt number `attempt` (1-based):
    /// `min(step * attempt, max_delay)`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.step.saturating_mul(attempt).min(self.max_delay)
    }
}

/// Probes the backing store until it answers or the policy gives up.
pub struct ConnectionSupervisor {
    backend: Arc<dyn Backend>,
    policy: RetryPolicy,
}

impl ConnectionSupervisor {
    pub fn new(backend: Arc<dyn Backend>, policy: RetryPolicy) -> Self {
        Self { backend, policy }
    }

    /// Wait until the store answers a ping. Returns the attempt that
    /// succeeded.
    ///
    /// # Errors
    ///
    /// [`Error::StoreUnavailable`] once `max_attempts` probes have failed.
    /// No delay follows the final attempt.
    pub async fn ensure_ready(&self) -> Result<u32> {
        let max_attempts = self.policy.max_attempts;
        let mut last_error = None;

        for attempt in 1..=max_attempts {
            match self.probe().await {
                Ok(()) => {
                    metrics::store_connect_attempts().add(1, &[KeyValue::new("result", "ok")]);
                    info!(attempt, "store connected");
                    return Ok(attempt);
                }
                Err(e) => {
                    metrics::store_connect_attempts()
                        .add(1, &[KeyValue::new("result", "failed")]);
                    if attempt < max_attempts {
                        let wait = self.policy.delay_for(attempt);
                        warn!(
                            attempt,
                            max_attempts,
                            wait_ms = wait.as_millis() as u64,
                            error = %e,
                            "store not ready, retrying"
                        );
                        tokio::time::sleep(wait).await;
                    }
                    last_error = Some(e);
                }
            }
        }

        Err(Error::StoreUnavailable {
            message: format!("store not ready after {max_attempts} attempts"),
            source: last_error.map(|e| Box::new(e) as _),
        })
    }

    async fn probe(&self) -> Result<()> {
        match tokio::time::timeout(self.policy.probe_timeout, self.backend.ping()).await {
            Ok(result) => result,
            Err(_) => Err(Error::unavailable(format!(
                "ping timed out after {}ms",
                self.policy.probe_timeout.as_millis()
            ))),
        }
    }
}
