use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};

use crate::domain::errors::StoreError;
use crate::domain::repositories::{CheckpointRepository, StoreResult};
use crate::domain::research::Checkpoint;

pub struct SqliteCheckpointRepository {
    pool: SqlitePool,
}

impl SqliteCheckpointRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CheckpointRepository for SqliteCheckpointRepository {
    async fn save(&self, checkpoint: &Checkpoint) -> StoreResult<()> {
        let portfolio = checkpoint
            .portfolio
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        sqlx::query(
            r#"
            INSERT INTO checkpoints (id, name, timestamp, metadata, portfolio, intents)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&checkpoint.id)
        .bind(&checkpoint.name)
        .bind(checkpoint.timestamp)
        .bind(checkpoint.metadata.to_string())
        .bind(portfolio)
        .bind(serde_json::to_string(&checkpoint.intents)?)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get(&self, id: &str) -> StoreResult<Checkpoint> {
        let row = sqlx::query("SELECT * FROM checkpoints WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Err(StoreError::NotFound {
                entity: "checkpoint",
                id: id.to_string(),
            });
        };

        let metadata: String = row.try_get("metadata")?;
        let portfolio: Option<String> = row.try_get("portfolio")?;
        let intents: String = row.try_get("intents")?;

        Ok(Checkpoint {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            timestamp: row.try_get::<DateTime<Utc>, _>("timestamp")?,
            metadata: serde_json::from_str(&metadata)?,
            portfolio: portfolio.map(|p| serde_json::from_str(&p)).transpose()?,
            intents: serde_json::from_str(&intents)?,
        })
    }
}
