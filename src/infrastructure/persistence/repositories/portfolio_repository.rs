use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{Row, SqlitePool};
use std::str::FromStr;

use crate::domain::errors::StoreError;
use crate::domain::portfolio::PortfolioSnapshot;
use crate::domain::repositories::{PortfolioRepository, StoreResult};

/// Single-row snapshot storage: the portfolio always lives at id 1 and is
/// replaced wholesale on every put.
pub struct SqlitePortfolioRepository {
    pool: SqlitePool,
}

impl SqlitePortfolioRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PortfolioRepository for SqlitePortfolioRepository {
    async fn get(&self) -> StoreResult<Option<PortfolioSnapshot>> {
        let row = sqlx::query(
            "SELECT as_of, cash, holdings, exposure_total, risk_aggregates FROM portfolio WHERE id = 1",
        )
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let cash_json: String = row.try_get("cash")?;
        let holdings_json: String = row.try_get("holdings")?;
        let risk_json: String = row.try_get("risk_aggregates")?;
        let exposure_str: String = row.try_get("exposure_total")?;

        Ok(Some(PortfolioSnapshot {
            as_of: row.try_get::<DateTime<Utc>, _>("as_of")?,
            cash: serde_json::from_str(&cash_json)?,
            holdings: serde_json::from_str(&holdings_json)?,
            exposure_total: Decimal::from_str(&exposure_str).unwrap_or_default(),
            risk_aggregates: serde_json::from_str(&risk_json)?,
        }))
    }

    async fn put(&self, snapshot: &PortfolioSnapshot) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO portfolio (id, as_of, cash, holdings, exposure_total, risk_aggregates, updated_at)
            VALUES (1, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (id) DO UPDATE SET
                as_of = excluded.as_of,
                cash = excluded.cash,
                holdings = excluded.holdings,
                exposure_total = excluded.exposure_total,
                risk_aggregates = excluded.risk_aggregates,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(snapshot.as_of)
        .bind(serde_json::to_string(&snapshot.cash).map_err(StoreError::Serialization)?)
        .bind(serde_json::to_string(&snapshot.holdings).map_err(StoreError::Serialization)?)
        .bind(snapshot.exposure_total.to_string())
        .bind(snapshot.risk_aggregates.to_string())
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
