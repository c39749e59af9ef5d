//! Postgres backing store: pgmq queues plus a `task_results` table.
//!
//! One connection pool serves both the queue functions and the result
//! table. The pool connects lazily so a database that is still starting is
//! reported by the first ping, not at construction.

pub mod pgmq;
pub mod results;

use std::time::Duration;

use async_trait::async_trait;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

use crate::error::{Error, Result};
use crate::model::{TaskId, TaskOutcome};
use crate::store::Backend;

/// Visibility timeout (seconds) applied while a popped message is deleted.
const POP_VISIBILITY_SECS: i32 = 30;

/// Database handle. Owns the connection pool.
pub struct Db {
    pool: PgPool,
}

impl Db {
    /// Connect to Postgres and create a connection pool.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = pool_options().connect(url).await?;
        Ok(Self { pool })
    }

    /// Build a pool that opens connections on first use.
    pub fn connect_lazy(url: &str) -> Result<Self> {
        let pool = pool_options().connect_lazy(url)?;
        Ok(Self { pool })
    }

    /// Run all pending migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::Other(format!("migration failed: {e}")))?;
        Ok(())
    }

    /// Run `SELECT 1`.
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

fn pool_options() -> PgPoolOptions {
    PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(5))
}

#[async_trait]
impl Backend for Db {
    async fn ping(&self) -> Result<()> {
        self.health_check().await
    }

    async fn prepare(&self, queues: &[&str]) -> Result<()> {
        self.migrate().await?;
        for queue in queues {
            self.create_queue(queue).await?;
        }
        Ok(())
    }

    async fn push(&self, queue: &str, item: &str) -> Result<()> {
        self.send_to_queue(queue, &pgmq::encode_item(item)).await?;
        Ok(())
    }

    async fn pop_blocking(&self, queue: &str, timeout: Duration) -> Result<Option<String>> {
        let Some(msg) = self
            .read_with_poll(queue, POP_VISIBILITY_SECS, timeout)
            .await?
        else {
            return Ok(None);
        };
        // The visibility timeout keeps other readers off this message until
        // it is gone.
        self.delete_message(queue, msg.msg_id).await?;
        Ok(Some(pgmq::decode_item(msg.message)))
    }

    async fn length(&self, queue: &str) -> Result<u64> {
        self.queue_length(queue).await
    }

    async fn put_outcome(&self, id: &TaskId, outcome: &TaskOutcome) -> Result<bool> {
        self.insert_outcome(id, outcome).await
    }

    async fn get_outcome(&self, id: &TaskId) -> Result<TaskOutcome> {
        self.fetch_outcome(id).await
    }
}
