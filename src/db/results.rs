//! Outcome records in the `task_results` table.
//!
//! Outcomes are stored tagged (`status`, `detail`) rather than with the
//! string prefix convention, so a `done` value that happens to start with
//! `error:` is never misread.

use crate::error::Result;
use crate::model::{TaskId, TaskOutcome};

impl super::Db {
    /// Insert an outcome unless the task already has one.
    /// Returns whether a row was written.
    pub async fn insert_outcome(&self, id: &TaskId, outcome: &TaskOutcome) -> Result<bool> {
        let Some(detail) = outcome.detail() else {
            return Ok(false);
        };
        let rows_affected = sqlx::query(
            "INSERT INTO task_results (task_id, status, detail, recorded_at)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (task_id) DO NOTHING",
        )
        .bind(id.as_str())
        .bind(outcome.status())
        .bind(detail)
        .bind(chrono::Utc::now())
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(rows_affected == 1)
    }

    /// Fetch the outcome for a task; `Pending` when no row exists.
    pub async fn fetch_outcome(&self, id: &TaskId) -> Result<TaskOutcome> {
        let row: Option<(String, String)> =
            sqlx::query_as("SELECT status, detail FROM task_results WHERE task_id = $1")
                .bind(id.as_str())
                .fetch_optional(&self.pool)
                .await?;

        match row {
            Some((status, detail)) => TaskOutcome::from_parts(&status, detail),
            None => Ok(TaskOutcome::Pending),
        }
    }
}
