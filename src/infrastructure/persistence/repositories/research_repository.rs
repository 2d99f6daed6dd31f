use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::domain::errors::StoreError;
use crate::domain::repositories::{ResearchRepository, StoreResult};
use crate::domain::research::{EarningsReport, FetchKind, NewsItem};

/// News items, earnings reports, and per-symbol fetch tracking.
pub struct SqliteResearchRepository {
    pool: SqlitePool,
}

impl SqliteResearchRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn map_news(row: &SqliteRow) -> StoreResult<NewsItem> {
        let citations: Option<String> = row.try_get("citations")?;
        Ok(NewsItem {
            id: Some(row.try_get("id")?),
            symbol: row.try_get("symbol")?,
            title: row.try_get("title")?,
            summary: row.try_get("summary")?,
            content: row.try_get("content")?,
            source: row.try_get("source")?,
            sentiment: row.try_get("sentiment")?,
            relevance_score: row.try_get("relevance_score")?,
            published_at: row.try_get::<DateTime<Utc>, _>("published_at")?,
            fetched_at: row.try_get::<DateTime<Utc>, _>("fetched_at")?,
            citations: match citations {
                Some(json) => serde_json::from_str(&json)?,
                None => Vec::new(),
            },
        })
    }

    fn map_earnings(row: &SqliteRow) -> StoreResult<EarningsReport> {
        Ok(EarningsReport {
            id: Some(row.try_get("id")?),
            symbol: row.try_get("symbol")?,
            fiscal_period: row.try_get("fiscal_period")?,
            fiscal_year: row.try_get("fiscal_year")?,
            fiscal_quarter: row.try_get("fiscal_quarter")?,
            report_date: row.try_get::<NaiveDate, _>("report_date")?,
            eps_actual: row.try_get("eps_actual")?,
            eps_estimated: row.try_get("eps_estimated")?,
            revenue_actual: row.try_get("revenue_actual")?,
            revenue_estimated: row.try_get("revenue_estimated")?,
            surprise_pct: row.try_get("surprise_pct")?,
            guidance: row.try_get("guidance")?,
            next_earnings_date: row.try_get("next_earnings_date")?,
            fetched_at: row.try_get::<DateTime<Utc>, _>("fetched_at")?,
        })
    }
}

#[async_trait]
impl ResearchRepository for SqliteResearchRepository {
    async fn save_news_item(&self, item: &NewsItem) -> StoreResult<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO news_items
            (symbol, title, summary, content, source, sentiment, relevance_score,
             published_at, fetched_at, citations)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&item.symbol)
        .bind(&item.title)
        .bind(&item.summary)
        .bind(&item.content)
        .bind(&item.source)
        .bind(&item.sentiment)
        .bind(item.relevance_score)
        .bind(item.published_at)
        .bind(item.fetched_at)
        .bind(serde_json::to_string(&item.citations)?)
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    async fn list_news(&self, symbol: &str, limit: i64) -> StoreResult<Vec<NewsItem>> {
        let rows = sqlx::query(
            "SELECT * FROM news_items WHERE symbol = ? ORDER BY published_at DESC LIMIT ?",
        )
        .bind(symbol)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::map_news).collect()
    }

    async fn save_earnings_report(&self, report: &EarningsReport) -> StoreResult<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO earnings_reports
            (symbol, fiscal_period, fiscal_year, fiscal_quarter, report_date,
             eps_actual, eps_estimated, revenue_actual, revenue_estimated,
             surprise_pct, guidance, next_earnings_date, fetched_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&report.symbol)
        .bind(&report.fiscal_period)
        .bind(report.fiscal_year)
        .bind(report.fiscal_quarter)
        .bind(report.report_date)
        .bind(report.eps_actual)
        .bind(report.eps_estimated)
        .bind(report.revenue_actual)
        .bind(report.revenue_estimated)
        .bind(report.surprise_pct)
        .bind(&report.guidance)
        .bind(report.next_earnings_date)
        .bind(report.fetched_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(r) => Ok(r.last_insert_rowid()),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                Err(StoreError::Conflict {
                    entity: "earnings_reports",
                    key: format!("{}/{}", report.symbol, report.fiscal_period),
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn list_earnings(&self, symbol: &str, limit: i64) -> StoreResult<Vec<EarningsReport>> {
        let rows = sqlx::query(
            "SELECT * FROM earnings_reports WHERE symbol = ? ORDER BY report_date DESC LIMIT ?",
        )
        .bind(symbol)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::map_earnings).collect()
    }

    async fn upcoming_earnings(&self, window_days: i64) -> StoreResult<Vec<EarningsReport>> {
        let today = Utc::now().date_naive();
        let horizon = today + Duration::days(window_days);

        let rows = sqlx::query(
            r#"
            SELECT * FROM earnings_reports
            WHERE next_earnings_date IS NOT NULL
              AND next_earnings_date >= ?
              AND next_earnings_date <= ?
            ORDER BY next_earnings_date ASC
            "#,
        )
        .bind(today)
        .bind(horizon)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::map_earnings).collect()
    }

    async fn get_last_fetch(
        &self,
        symbol: &str,
        kind: FetchKind,
    ) -> StoreResult<Option<DateTime<Utc>>> {
        let column = match kind {
            FetchKind::News => "last_news_fetch",
            FetchKind::Earnings => "last_earnings_fetch",
        };
        let row = sqlx::query(&format!(
            "SELECT {} AS ts FROM news_fetch_tracking WHERE symbol = ?",
            column
        ))
        .bind(symbol)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(row.try_get::<Option<DateTime<Utc>>, _>("ts")?),
            None => Ok(None),
        }
    }

    async fn set_last_fetch(
        &self,
        symbol: &str,
        kind: FetchKind,
        ts: DateTime<Utc>,
    ) -> StoreResult<()> {
        let sql = match kind {
            FetchKind::News => {
                "INSERT INTO news_fetch_tracking (symbol, last_news_fetch) VALUES (?, ?)
                 ON CONFLICT (symbol) DO UPDATE SET last_news_fetch = excluded.last_news_fetch"
            }
            FetchKind::Earnings => {
                "INSERT INTO news_fetch_tracking (symbol, last_earnings_fetch) VALUES (?, ?)
                 ON CONFLICT (symbol) DO UPDATE SET last_earnings_fetch = excluded.last_earnings_fetch"
            }
        };
        sqlx::query(sql).bind(symbol).bind(ts).execute(&self.pool).await?;
        Ok(())
    }
}
