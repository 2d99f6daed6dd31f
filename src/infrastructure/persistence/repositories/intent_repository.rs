use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::str::FromStr;

use crate::domain::errors::StoreError;
use crate::domain::intent::{Intent, IntentFilter, IntentStatus};
use crate::domain::repositories::{IntentRepository, StoreResult};

pub struct SqliteIntentRepository {
    pool: SqlitePool,
}

impl SqliteIntentRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn map_row(row: &SqliteRow) -> StoreResult<Intent> {
        let status_str: String = row.try_get("status")?;
        let signal: Option<String> = row.try_get("signal")?;
        let risk_decision: Option<String> = row.try_get("risk_decision")?;
        let order_commands: String = row.try_get("order_commands")?;
        let execution_reports: String = row.try_get("execution_reports")?;

        Ok(Intent {
            id: row.try_get("id")?,
            symbol: row.try_get("symbol")?,
            created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
            signal: signal.map(|s| serde_json::from_str(&s)).transpose()?,
            risk_decision: risk_decision.map(|s| serde_json::from_str(&s)).transpose()?,
            order_commands: serde_json::from_str(&order_commands)?,
            execution_reports: serde_json::from_str(&execution_reports)?,
            status: IntentStatus::from_str(&status_str).map_err(|_| StoreError::Unavailable {
                reason: format!("corrupt intent status: {}", status_str),
            })?,
            approved_at: row.try_get("approved_at")?,
            executed_at: row.try_get("executed_at")?,
            source: row.try_get("source")?,
        })
    }
}

#[async_trait]
impl IntentRepository for SqliteIntentRepository {
    async fn save(&self, intent: &Intent) -> StoreResult<()> {
        let signal = intent
            .signal
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let risk_decision = intent
            .risk_decision
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        sqlx::query(
            r#"
            INSERT INTO intents
            (id, symbol, created_at, signal, risk_decision, order_commands,
             execution_reports, status, approved_at, executed_at, source)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (id) DO UPDATE SET
                signal = excluded.signal,
                risk_decision = excluded.risk_decision,
                order_commands = excluded.order_commands,
                execution_reports = excluded.execution_reports,
                status = excluded.status,
                approved_at = excluded.approved_at,
                executed_at = excluded.executed_at
            "#,
        )
        .bind(&intent.id)
        .bind(&intent.symbol)
        .bind(intent.created_at)
        .bind(signal)
        .bind(risk_decision)
        .bind(serde_json::to_string(&intent.order_commands)?)
        .bind(serde_json::to_string(&intent.execution_reports)?)
        .bind(intent.status.as_str())
        .bind(intent.approved_at)
        .bind(intent.executed_at)
        .bind(&intent.source)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get(&self, id: &str) -> StoreResult<Intent> {
        let row = sqlx::query("SELECT * FROM intents WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Self::map_row(&row),
            None => Err(StoreError::NotFound {
                entity: "intent",
                id: id.to_string(),
            }),
        }
    }

    async fn list(&self, filter: &IntentFilter) -> StoreResult<Vec<Intent>> {
        let rows = match (&filter.status, &filter.symbol) {
            (Some(status), Some(symbol)) => {
                sqlx::query(
                    "SELECT * FROM intents WHERE status = ? AND symbol = ? ORDER BY created_at DESC",
                )
                .bind(status.as_str())
                .bind(symbol)
                .fetch_all(&self.pool)
                .await?
            }
            (Some(status), None) => {
                sqlx::query("SELECT * FROM intents WHERE status = ? ORDER BY created_at DESC")
                    .bind(status.as_str())
                    .fetch_all(&self.pool)
                    .await?
            }
            (None, Some(symbol)) => {
                sqlx::query("SELECT * FROM intents WHERE symbol = ? ORDER BY created_at DESC")
                    .bind(symbol)
                    .fetch_all(&self.pool)
                    .await?
            }
            (None, None) => {
                sqlx::query("SELECT * FROM intents ORDER BY created_at DESC")
                    .fetch_all(&self.pool)
                    .await?
            }
        };

        rows.iter().map(Self::map_row).collect()
    }
}
