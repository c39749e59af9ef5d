//! Redis backing store.
//!
//! # Key schema
//!
//! | Key | Type | Purpose |
//! |-----|------|---------|
//! | `{queue}` | List | queued items, `RPUSH` at the tail, `BLPOP` from the head |
//! | `{queue}_dead` | List | dead-letter entries |
//! | `results` | Hash | task id → encoded outcome (see [`crate::model::outcome`]) |
//!
//! Outcomes are written with `HSETNX` so the first record for an id wins.
//!
//! Two multiplexed connections are kept: blocking pops would otherwise stall
//! every other command queued behind them on a shared connection. Both are
//! opened on first use. The blocking one has no client-side response
//! timeout: a `BLPOP` abandoned by the client stays registered on the server
//! and could take the next pushed item with it.

use std::time::Duration;

use ::redis::AsyncConnectionConfig;
use ::redis::aio::MultiplexedConnection;
use async_trait::async_trait;
use tokio::sync::OnceCell;

use super::Backend;
use crate::error::{Error, Result};
use crate::model::{TaskId, TaskOutcome};

/// Hash holding every outcome, prefix-encoded (see
/// [`TaskOutcome::encode`]). The encoding is ambiguous for a `Done` value
/// that itself starts with `error:` or `dead-letter:`; such values read back
/// as the prefixed outcome. Other producers and pollers share this layout,
/// so it is kept as is.
pub const RESULTS_KEY: &str = "results";

pub struct RedisBackend {
    client: ::redis::Client,
    commands: OnceCell<MultiplexedConnection>,
    blocking: OnceCell<MultiplexedConnection>,
}

impl RedisBackend {
    /// Parse `url` into a client. No connection is made yet.
    pub fn open(url: &str) -> Result<Self> {
        let client = ::redis::Client::open(url)?;
        Ok(Self {
            client,
            commands: OnceCell::new(),
            blocking: OnceCell::new(),
        })
    }

    async fn commands(&self) -> Result<MultiplexedConnection> {
        connection(&self.client, &self.commands, &AsyncConnectionConfig::new()).await
    }

    async fn blocking(&self) -> Result<MultiplexedConnection> {
        // BLPOP's own timeout bounds the wait.
        let config = AsyncConnectionConfig::new().set_response_timeout(None);
        connection(&self.client, &self.blocking, &config).await
    }
}

async fn connection(
    client: &::redis::Client,
    cell: &OnceCell<MultiplexedConnection>,
    config: &AsyncConnectionConfig,
) -> Result<MultiplexedConnection> {
    let conn = cell
        .get_or_try_init(|| async {
            client
                .get_multiplexed_async_connection_with_config(config)
                .await
                .map_err(Error::from)
        })
        .await?;
    Ok(conn.clone())
}

#[async_trait]
impl Backend for RedisBackend {
    async fn ping(&self) -> Result<()> {
        let mut conn = self.commands().await?;
        let _: String = ::redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }

    async fn push(&self, queue: &str, item: &str) -> Result<()> {
        let mut conn = self.commands().await?;
        let _: i64 = ::redis::cmd("RPUSH")
            .arg(queue)
            .arg(item)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn pop_blocking(&self, queue: &str, timeout: Duration) -> Result<Option<String>> {
        let mut conn = self.blocking().await?;
        // BLPOP treats 0 as "wait forever".
        let secs = timeout.as_secs_f64().max(0.01);
        let popped: Option<(String, String)> = ::redis::cmd("BLPOP")
            .arg(queue)
            .arg(secs)
            .query_async(&mut conn)
            .await?;
        Ok(popped.map(|(_key, item)| item))
    }

    async fn length(&self, queue: &str) -> Result<u64> {
        let mut conn = self.commands().await?;
        let len: u64 = ::redis::cmd("LLEN")
            .arg(queue)
            .query_async(&mut conn)
            .await?;
        Ok(len)
    }

    async fn put_outcome(&self, id: &TaskId, outcome: &TaskOutcome) -> Result<bool> {
        let Some(encoded) = outcome.encode() else {
            return Ok(false);
        };
        let mut conn = self.commands().await?;
        let written: bool = ::redis::cmd("HSETNX")
            .arg(RESULTS_KEY)
            .arg(id.as_str())
            .arg(encoded)
            .query_async(&mut conn)
            .await?;
        Ok(written)
    }

    async fn get_outcome(&self, id: &TaskId) -> Result<TaskOutcome> {
        let mut conn = self.commands().await?;
        let stored: Option<String> = ::redis::cmd("HGET")
            .arg(RESULTS_KEY)
            .arg(id.as_str())
            .query_async(&mut conn)
            .await?;
        Ok(stored.map_or(TaskOutcome::Pending, |s| TaskOutcome::decode(&s)))
    }
}
