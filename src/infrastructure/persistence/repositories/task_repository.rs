use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::str::FromStr;

use crate::domain::errors::StoreError;
use crate::domain::repositories::{StoreResult, TaskRepository};
use crate::domain::task::{Task, TaskStatus, TaskType};

/// Durable task queue over the `tasks` table.
pub struct SqliteTaskRepository {
    pool: SqlitePool,
}

impl SqliteTaskRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn map_row(row: &SqliteRow) -> StoreResult<Task> {
        let type_str: String = row.try_get("task_type")?;
        let status_str: String = row.try_get("status")?;
        let payload: String = row.try_get("payload")?;

        Ok(Task {
            id: row.try_get("id")?,
            task_type: TaskType::from_str(&type_str).map_err(|_| StoreError::Unavailable {
                reason: format!("corrupt task type: {}", type_str),
            })?,
            payload: serde_json::from_str(&payload)?,
            status: TaskStatus::from_str(&status_str).map_err(|_| StoreError::Unavailable {
                reason: format!("corrupt task status: {}", status_str),
            })?,
            priority: row.try_get("priority")?,
            queue_key: row.try_get("queue_key")?,
            scheduled_at: row.try_get::<DateTime<Utc>, _>("scheduled_at")?,
            started_at: row.try_get("started_at")?,
            completed_at: row.try_get("completed_at")?,
            attempts: row.try_get::<i64, _>("attempts")? as u32,
            max_attempts: row.try_get::<i64, _>("max_attempts")? as u32,
            last_error: row.try_get("last_error")?,
        })
    }
}

#[async_trait]
impl TaskRepository for SqliteTaskRepository {
    async fn enqueue(&self, task: &Task) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO tasks
            (id, task_type, payload, status, priority, queue_key, scheduled_at,
             started_at, completed_at, attempts, max_attempts, last_error)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&task.id)
        .bind(task.task_type.as_str())
        .bind(task.payload.to_string())
        .bind(task.status.as_str())
        .bind(task.priority)
        .bind(&task.queue_key)
        .bind(task.scheduled_at)
        .bind(task.started_at)
        .bind(task.completed_at)
        .bind(task.attempts as i64)
        .bind(task.max_attempts as i64)
        .bind(&task.last_error)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get(&self, id: &str) -> StoreResult<Task> {
        let row = sqlx::query("SELECT * FROM tasks WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Self::map_row(&row),
            None => Err(StoreError::NotFound {
                entity: "task",
                id: id.to_string(),
            }),
        }
    }

    async fn claim_next(&self, queue_key: &str) -> StoreResult<Option<Task>> {
        // Single-statement claim: the nested select and the update are one
        // atomic step, so concurrent workers can never claim the same task.
        let now = Utc::now();
        let row = sqlx::query(
            r#"
            UPDATE tasks
            SET status = 'running', started_at = ?1, attempts = attempts + 1
            WHERE id = (
                SELECT id FROM tasks
                WHERE queue_key = ?2 AND status = 'pending' AND scheduled_at <= ?1
                ORDER BY priority DESC, scheduled_at ASC
                LIMIT 1
            )
            RETURNING *
            "#,
        )
        .bind(now)
        .bind(queue_key)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::map_row).transpose()
    }

    async fn mark_completed(&self, id: &str, result: &Value) -> StoreResult<()> {
        let affected = sqlx::query(
            r#"
            UPDATE tasks
            SET status = 'completed', completed_at = ?, result = ?, last_error = NULL
            WHERE id = ? AND status = 'running'
            "#,
        )
        .bind(Utc::now())
        .bind(result.to_string())
        .bind(id)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if affected == 0 {
            return Err(StoreError::NotFound {
                entity: "running task",
                id: id.to_string(),
            });
        }
        Ok(())
    }

    async fn mark_failed(
        &self,
        id: &str,
        error: &str,
        reschedule_at: Option<DateTime<Utc>>,
    ) -> StoreResult<()> {
        let affected = match reschedule_at {
            Some(at) => {
                sqlx::query(
                    r#"
                    UPDATE tasks
                    SET status = 'pending', scheduled_at = ?, started_at = NULL, last_error = ?
                    WHERE id = ? AND status = 'running'
                    "#,
                )
                .bind(at)
                .bind(error)
                .bind(id)
                .execute(&self.pool)
                .await?
                .rows_affected()
            }
            None => {
                sqlx::query(
                    r#"
                    UPDATE tasks
                    SET status = 'failed', completed_at = ?, last_error = ?
                    WHERE id = ? AND status = 'running'
                    "#,
                )
                .bind(Utc::now())
                .bind(error)
                .bind(id)
                .execute(&self.pool)
                .await?
                .rows_affected()
            }
        };

        if affected == 0 {
            return Err(StoreError::NotFound {
                entity: "running task",
                id: id.to_string(),
            });
        }
        Ok(())
    }

    async fn reap_stale(&self, older_than: DateTime<Utc>) -> StoreResult<u64> {
        let affected = sqlx::query(
            r#"
            UPDATE tasks
            SET status = 'pending', started_at = NULL
            WHERE status = 'running' AND started_at IS NOT NULL AND started_at < ?
            "#,
        )
        .bind(older_than)
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(affected)
    }

    async fn pending_queue_keys(&self) -> StoreResult<Vec<String>> {
        let rows = sqlx::query("SELECT DISTINCT queue_key FROM tasks WHERE status = 'pending'")
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| row.try_get::<String, _>("queue_key").map_err(Into::into))
            .collect()
    }

    async fn list_by_status(&self, status: &str, limit: i64) -> StoreResult<Vec<Task>> {
        let rows =
            sqlx::query("SELECT * FROM tasks WHERE status = ? ORDER BY scheduled_at ASC LIMIT ?")
                .bind(status)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?;

        rows.iter().map(Self::map_row).collect()
    }

    async fn count_by_status(&self, status: &str) -> StoreResult<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM tasks WHERE status = ?")
            .bind(status)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("n")?)
    }
}
