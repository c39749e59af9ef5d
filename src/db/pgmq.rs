//! pgmq queue operations via direct SQLx.
//!
//! Calls pgmq's SQL functions: pgmq.create, pgmq.send, pgmq.read_with_poll,
//! pgmq.delete, pgmq.metrics.

use std::time::Duration;

use crate::error::Result;

/// Poll interval pgmq uses inside `read_with_poll`.
const POLL_INTERVAL_MS: i32 = 100;

/// A message read from a pgmq queue.
#[derive(Debug, Clone)]
pub struct PgmqMessage {
    pub msg_id: i64,
    pub read_ct: i32,
    pub enqueued_at: chrono::DateTime<chrono::Utc>,
    pub message: serde_json::Value,
}

impl super::Db {
    /// Create a pgmq queue (idempotent).
    pub async fn create_queue(&self, queue_name: &str) -> Result<()> {
        sqlx::query("SELECT pgmq.create($1)")
            .bind(queue_name)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Send a message to a pgmq queue. Returns the message ID.
    pub async fn send_to_queue(&self, queue_name: &str, payload: &serde_json::Value) -> Result<i64> {
        let row: (i64,) = sqlx::query_as("SELECT pgmq.send($1, $2)")
            .bind(queue_name)
            .bind(payload)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.0)
    }

    /// Read the next message, letting pgmq poll for up to `wait`.
    /// Returns None if nothing arrived in time.
    pub async fn read_with_poll(
        &self,
        queue_name: &str,
        vt_seconds: i32,
        wait: Duration,
    ) -> Result<Option<PgmqMessage>> {
        let max_poll_seconds = wait.as_secs_f64().ceil().max(1.0) as i32;
        let row = sqlx::query_as::<
            _,
            (
                i64,
                i32,
                chrono::DateTime<chrono::Utc>,
                serde_json::Value,
            ),
        >(
            "SELECT msg_id, read_ct, enqueued_at, message FROM pgmq.read_with_poll($1, $2, 1, $3, $4)",
        )
        .bind(queue_name)
        .bind(vt_seconds)
        .bind(max_poll_seconds)
        .bind(POLL_INTERVAL_MS)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(msg_id, read_ct, enqueued_at, message)| PgmqMessage {
            msg_id,
            read_ct,
            enqueued_at,
            message,
        }))
    }

    /// Delete a message permanently.
    pub async fn delete_message(&self, queue_name: &str, msg_id: i64) -> Result<()> {
        sqlx::query("SELECT pgmq.delete($1, $2)")
            .bind(queue_name)
            .bind(msg_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Current number of messages in a queue.
    pub async fn queue_length(&self, queue_name: &str) -> Result<u64> {
        let row: (i64,) = sqlx::query_as("SELECT queue_length FROM pgmq.metrics($1)")
            .bind(queue_name)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.0.max(0) as u64)
    }
}

/// pgmq stores JSONB. Items that are JSON objects/arrays/scalars go in as
/// parsed values; anything else (or a bare JSON string) is wrapped as a JSON
/// string so it round-trips unchanged.
pub(crate) fn encode_item(item: &str) -> serde_json::Value {
    match serde_json::from_str::<serde_json::Value>(item) {
        Ok(serde_json::Value::String(_)) | Err(_) => serde_json::Value::String(item.to_string()),
        Ok(value) => value,
    }
}

pub(crate) fn decode_item(message: serde_json::Value) -> String {
    match message {
        serde_json::Value::String(raw) => raw,
        other => other.to_string(),
    }
}
