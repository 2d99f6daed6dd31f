use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::warn;

use crate::domain::repositories::{StoreResult, TaskConfigRepository};
use crate::domain::task::{TaskSpec, TaskType};

/// Periodic-scheduling configuration (`background_tasks_config` table).
pub struct SqliteTaskConfigRepository {
    pool: SqlitePool,
}

impl SqliteTaskConfigRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TaskConfigRepository for SqliteTaskConfigRepository {
    async fn list(&self) -> StoreResult<Vec<TaskSpec>> {
        let rows = sqlx::query("SELECT * FROM background_tasks_config ORDER BY task_name")
            .fetch_all(&self.pool)
            .await?;

        let mut specs = Vec::with_capacity(rows.len());
        for row in rows {
            let name: String = row.try_get("task_name")?;
            let task_name = match TaskType::from_str(&name) {
                Ok(t) => t,
                Err(_) => {
                    // Rows for task types this build no longer knows are
                    // skipped rather than failing the whole listing.
                    warn!("Ignoring unknown task type in config table: {}", name);
                    continue;
                }
            };
            specs.push(TaskSpec {
                task_name,
                enabled: row.try_get::<i64, _>("enabled")? != 0,
                frequency_seconds: row.try_get("frequency_seconds")?,
                use_claude: row.try_get::<i64, _>("use_claude")? != 0,
                priority: row.try_get("priority")?,
            });
        }
        Ok(specs)
    }

    async fn upsert(&self, spec: &TaskSpec) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO background_tasks_config
            (task_name, enabled, frequency_seconds, use_claude, priority)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT (task_name) DO UPDATE SET
                enabled = excluded.enabled,
                frequency_seconds = excluded.frequency_seconds,
                use_claude = excluded.use_claude,
                priority = excluded.priority
            "#,
        )
        .bind(spec.task_name.as_str())
        .bind(spec.enabled as i64)
        .bind(spec.frequency_seconds)
        .bind(spec.use_claude as i64)
        .bind(spec.priority)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn seed_defaults(&self, specs: &[TaskSpec]) -> StoreResult<()> {
        for spec in specs {
            sqlx::query(
                r#"
                INSERT OR IGNORE INTO background_tasks_config
                (task_name, enabled, frequency_seconds, use_claude, priority)
                VALUES (?, ?, ?, ?, ?)
                "#,
            )
            .bind(spec.task_name.as_str())
            .bind(spec.enabled as i64)
            .bind(spec.frequency_seconds)
            .bind(spec.use_claude as i64)
            .bind(spec.priority)
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }
}
