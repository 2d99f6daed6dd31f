use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::str::FromStr;

use crate::domain::analysis::{FundamentalAnalysis, Recommendation, RecommendationType};
use crate::domain::errors::StoreError;
use crate::domain::repositories::{FundamentalsRepository, RecommendationRepository, StoreResult};

/// Recommendations and fundamental-analysis rows.
pub struct SqliteAnalysisRepository {
    pool: SqlitePool,
}

impl SqliteAnalysisRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn map_recommendation(row: &SqliteRow) -> StoreResult<Recommendation> {
        let type_str: String = row.try_get("recommendation_type")?;
        let alternatives: Option<String> = row.try_get("alternative_suggestions")?;
        Ok(Recommendation {
            id: Some(row.try_get("id")?),
            symbol: row.try_get("symbol")?,
            recommendation_type: RecommendationType::from_str(&type_str).map_err(|_| {
                StoreError::Unavailable {
                    reason: format!("corrupt recommendation type: {}", type_str),
                }
            })?,
            confidence_score: row.try_get("confidence_score")?,
            target_price: row.try_get("target_price")?,
            stop_loss: row.try_get("stop_loss")?,
            quantity: row.try_get("quantity")?,
            reasoning: row.try_get("reasoning")?,
            analysis_type: row.try_get("analysis_type")?,
            time_horizon: row.try_get("time_horizon")?,
            risk_level: row.try_get("risk_level")?,
            potential_impact: row.try_get("potential_impact")?,
            alternative_suggestions: match alternatives {
                Some(json) => serde_json::from_str(&json)?,
                None => Vec::new(),
            },
            created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
            executed_at: row.try_get("executed_at")?,
            outcome: row.try_get("outcome")?,
            actual_return: row.try_get("actual_return")?,
        })
    }

    fn map_fundamentals(row: &SqliteRow) -> StoreResult<FundamentalAnalysis> {
        let analysis_data: Option<String> = row.try_get("analysis_data")?;
        Ok(FundamentalAnalysis {
            id: Some(row.try_get("id")?),
            symbol: row.try_get("symbol")?,
            analysis_date: row.try_get::<NaiveDate, _>("analysis_date")?,
            pe_ratio: row.try_get("pe_ratio")?,
            pb_ratio: row.try_get("pb_ratio")?,
            roe: row.try_get("roe")?,
            roa: row.try_get("roa")?,
            debt_to_equity: row.try_get("debt_to_equity")?,
            current_ratio: row.try_get("current_ratio")?,
            profit_margins: row.try_get("profit_margins")?,
            revenue_growth: row.try_get("revenue_growth")?,
            earnings_growth: row.try_get("earnings_growth")?,
            dividend_yield: row.try_get("dividend_yield")?,
            market_cap: row.try_get("market_cap")?,
            sector_pe: row.try_get("sector_pe")?,
            industry_rank: row.try_get("industry_rank")?,
            overall_score: row.try_get("overall_score")?,
            recommendation: row.try_get("recommendation")?,
            analysis_data: match analysis_data {
                Some(json) => serde_json::from_str(&json)?,
                None => serde_json::Value::Object(Default::default()),
            },
        })
    }
}

#[async_trait]
impl RecommendationRepository for SqliteAnalysisRepository {
    async fn save(&self, rec: &Recommendation) -> StoreResult<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO recommendations
            (symbol, recommendation_type, confidence_score, target_price, stop_loss,
             quantity, reasoning, analysis_type, time_horizon, risk_level,
             potential_impact, alternative_suggestions, created_at, executed_at,
             outcome, actual_return)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&rec.symbol)
        .bind(rec.recommendation_type.as_str())
        .bind(rec.confidence_score)
        .bind(rec.target_price)
        .bind(rec.stop_loss)
        .bind(rec.quantity)
        .bind(&rec.reasoning)
        .bind(&rec.analysis_type)
        .bind(&rec.time_horizon)
        .bind(&rec.risk_level)
        .bind(&rec.potential_impact)
        .bind(serde_json::to_string(&rec.alternative_suggestions)?)
        .bind(rec.created_at)
        .bind(rec.executed_at)
        .bind(&rec.outcome)
        .bind(rec.actual_return)
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    async fn list(&self, symbol: Option<&str>, limit: i64) -> StoreResult<Vec<Recommendation>> {
        let rows = match symbol {
            Some(symbol) => {
                sqlx::query(
                    "SELECT * FROM recommendations WHERE symbol = ? ORDER BY created_at DESC LIMIT ?",
                )
                .bind(symbol)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query("SELECT * FROM recommendations ORDER BY created_at DESC LIMIT ?")
                    .bind(limit)
                    .fetch_all(&self.pool)
                    .await?
            }
        };

        rows.iter().map(Self::map_recommendation).collect()
    }

    async fn update_outcome(
        &self,
        id: i64,
        outcome: &str,
        actual_return: Option<f64>,
    ) -> StoreResult<()> {
        let result =
            sqlx::query("UPDATE recommendations SET outcome = ?, actual_return = ? WHERE id = ?")
                .bind(outcome)
                .bind(actual_return)
                .bind(id)
                .execute(&self.pool)
                .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                entity: "recommendation",
                id: id.to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl FundamentalsRepository for SqliteAnalysisRepository {
    async fn save(&self, analysis: &FundamentalAnalysis) -> StoreResult<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO fundamental_analysis
            (symbol, analysis_date, pe_ratio, pb_ratio, roe, roa, debt_to_equity,
             current_ratio, profit_margins, revenue_growth, earnings_growth,
             dividend_yield, market_cap, sector_pe, industry_rank, overall_score,
             recommendation, analysis_data)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&analysis.symbol)
        .bind(analysis.analysis_date)
        .bind(analysis.pe_ratio)
        .bind(analysis.pb_ratio)
        .bind(analysis.roe)
        .bind(analysis.roa)
        .bind(analysis.debt_to_equity)
        .bind(analysis.current_ratio)
        .bind(analysis.profit_margins)
        .bind(analysis.revenue_growth)
        .bind(analysis.earnings_growth)
        .bind(analysis.dividend_yield)
        .bind(analysis.market_cap)
        .bind(analysis.sector_pe)
        .bind(analysis.industry_rank)
        .bind(analysis.overall_score)
        .bind(&analysis.recommendation)
        .bind(serde_json::to_string(&analysis.analysis_data)?)
        .execute(&self.pool)
        .await;

        match result {
            Ok(r) => Ok(r.last_insert_rowid()),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                Err(StoreError::Conflict {
                    entity: "fundamental_analysis",
                    key: format!("{}/{}", analysis.symbol, analysis.analysis_date),
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self, symbol: &str, limit: i64) -> StoreResult<Vec<FundamentalAnalysis>> {
        let rows = sqlx::query(
            "SELECT * FROM fundamental_analysis WHERE symbol = ? ORDER BY analysis_date DESC LIMIT ?",
        )
        .bind(symbol)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::map_fundamentals).collect()
    }
}
