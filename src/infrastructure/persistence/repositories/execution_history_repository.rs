use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::str::FromStr;

use crate::domain::errors::StoreError;
use crate::domain::repositories::{ExecutionHistoryRepository, StoreResult};
use crate::domain::task::{ExecutionRecord, ExecutionType};

/// Append-only execution log, pruned to the newest N rows.
pub struct SqliteExecutionHistoryRepository {
    pool: SqlitePool,
}

impl SqliteExecutionHistoryRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn map_row(row: &SqliteRow) -> StoreResult<ExecutionRecord> {
        let type_str: String = row.try_get("execution_type")?;
        let symbols: Option<String> = row.try_get("symbols")?;
        Ok(ExecutionRecord {
            task_name: row.try_get("task_name")?,
            task_id: row.try_get::<Option<String>, _>("task_id")?.unwrap_or_default(),
            execution_type: ExecutionType::from_str(&type_str).map_err(|_| {
                StoreError::Unavailable {
                    reason: format!("corrupt execution type: {}", type_str),
                }
            })?,
            user: row.try_get("user")?,
            timestamp: row.try_get::<DateTime<Utc>, _>("timestamp")?,
            symbols: match symbols {
                Some(json) => serde_json::from_str(&json)?,
                None => Vec::new(),
            },
            status: row.try_get("status")?,
            error: row.try_get("error_message")?,
            duration_seconds: row
                .try_get::<Option<f64>, _>("duration_seconds")?
                .unwrap_or(0.0),
        })
    }
}

#[async_trait]
impl ExecutionHistoryRepository for SqliteExecutionHistoryRepository {
    async fn record(&self, record: &ExecutionRecord, max_history: i64) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO execution_history
            (task_name, task_id, execution_type, user, timestamp, symbols,
             symbol_count, status, error_message, duration_seconds)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.task_name)
        .bind(&record.task_id)
        .bind(record.execution_type.as_str())
        .bind(&record.user)
        .bind(record.timestamp)
        .bind(serde_json::to_string(&record.symbols)?)
        .bind(record.symbols.len() as i64)
        .bind(&record.status)
        .bind(&record.error)
        .bind(record.duration_seconds)
        .execute(&self.pool)
        .await?;

        // Retention: keep only the newest rows.
        sqlx::query(
            r#"
            DELETE FROM execution_history
            WHERE id NOT IN (
                SELECT id FROM execution_history
                ORDER BY timestamp DESC, id DESC
                LIMIT ?
            )
            "#,
        )
        .bind(max_history)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn query(
        &self,
        task_name: Option<&str>,
        limit: i64,
    ) -> StoreResult<Vec<ExecutionRecord>> {
        let rows = match task_name {
            Some(name) => {
                sqlx::query(
                    r#"
                    SELECT * FROM execution_history
                    WHERE task_name = ?
                    ORDER BY timestamp DESC, id DESC
                    LIMIT ?
                    "#,
                )
                .bind(name)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    "SELECT * FROM execution_history ORDER BY timestamp DESC, id DESC LIMIT ?",
                )
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
        };

        rows.iter().map(Self::map_row).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::task::{Task, TaskType};
    use crate::infrastructure::persistence::database::Database;
    use serde_json::json;

    async fn repo() -> SqliteExecutionHistoryRepository {
        let db = Database::new("sqlite://:memory:").await.unwrap();
        SqliteExecutionHistoryRepository::new(db.pool)
    }

    fn record(status: &str) -> ExecutionRecord {
        let task = Task::new(TaskType::NewsMonitoring, json!({"symbols": ["INFY"]}));
        ExecutionRecord::scheduled(&task, status, None, 0.5)
    }

    #[tokio::test]
    async fn test_record_and_query() {
        let repo = repo().await;
        repo.record(&record("completed"), 100).await.unwrap();
        repo.record(&record("failed"), 100).await.unwrap();

        let all = repo.query(None, 50).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].status, "failed");

        let by_name = repo.query(Some("news_monitoring"), 50).await.unwrap();
        assert_eq!(by_name.len(), 2);
        assert_eq!(by_name[0].symbols, vec!["INFY".to_string()]);

        let none = repo.query(Some("earnings_check"), 50).await.unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_history_is_pruned_to_max() {
        let repo = repo().await;
        for _ in 0..8 {
            repo.record(&record("completed"), 5).await.unwrap();
        }

        let all = repo.query(None, 50).await.unwrap();
        assert_eq!(all.len(), 5);
    }
}
