use anyhow::{Context, Result};

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tokio::fs;
use tracing::info;

/// Shared database wrapper owning the SQLite pool.
#[derive(Clone)]
pub struct Database {
    pub pool: SqlitePool,
    db_path: Option<PathBuf>,
}

impl Database {
    pub async fn new(db_url: &str) -> Result<Self> {
        // Ensure the directory exists if it's a file path
        let mut db_path = None;
        if let Some(path_part) = db_url.strip_prefix("sqlite://") {
            if path_part != ":memory:" {
                let path = Path::new(path_part);
                if let Some(parent) = path.parent() {
                    if !parent.as_os_str().is_empty() && !parent.exists() {
                        fs::create_dir_all(parent)
                            .await
                            .context("Failed to create database directory")?;
                    }
                }
                db_path = Some(path.to_path_buf());
            }
        }

        let options = SqliteConnectOptions::from_str(db_url)?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        // An in-memory database exists per connection, so the pool must
        // hold exactly one and never recycle it.
        let pool_options = if db_path.is_none() {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(5)
        };

        let pool = pool_options
            .connect_with(options)
            .await
            .context("Failed to connect to SQLite database")?;

        info!("Connected to database: {}", db_url);

        let db = Self { pool, db_path };
        db.init().await?;

        Ok(db)
    }

    /// Filesystem path of the backing database, when file-based.
    pub fn file_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    /// Initialize database schema
    async fn init(&self) -> Result<()> {
        let mut conn = self.pool.acquire().await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS portfolio (
                id INTEGER PRIMARY KEY,
                as_of TEXT NOT NULL,
                cash TEXT NOT NULL,
                holdings TEXT NOT NULL,
                exposure_total TEXT NOT NULL,
                risk_aggregates TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create portfolio table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS intents (
                id TEXT PRIMARY KEY,
                symbol TEXT NOT NULL,
                created_at TEXT NOT NULL,
                signal TEXT,
                risk_decision TEXT,
                order_commands TEXT NOT NULL,
                execution_reports TEXT NOT NULL,
                status TEXT NOT NULL,
                approved_at TEXT,
                executed_at TEXT,
                source TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_intents_status ON intents (status);
            CREATE INDEX IF NOT EXISTS idx_intents_symbol ON intents (symbol);
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create intents table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tasks (
                id TEXT PRIMARY KEY,
                task_type TEXT NOT NULL,
                payload TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                priority INTEGER NOT NULL DEFAULT 0,
                queue_key TEXT NOT NULL,
                scheduled_at TEXT NOT NULL,
                started_at TEXT,
                completed_at TEXT,
                attempts INTEGER NOT NULL DEFAULT 0,
                max_attempts INTEGER NOT NULL DEFAULT 3,
                last_error TEXT,
                result TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_tasks_status_scheduled
            ON tasks (status, scheduled_at);
            CREATE INDEX IF NOT EXISTS idx_tasks_queue_status
            ON tasks (queue_key, status);
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create tasks table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS execution_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                task_name TEXT NOT NULL,
                task_id TEXT,
                execution_type TEXT NOT NULL DEFAULT 'scheduled',
                user TEXT NOT NULL DEFAULT 'system',
                timestamp TEXT NOT NULL,
                symbols TEXT,
                symbol_count INTEGER DEFAULT 0,
                status TEXT NOT NULL DEFAULT 'completed',
                error_message TEXT,
                duration_seconds REAL
            );
            CREATE INDEX IF NOT EXISTS idx_execution_history_timestamp
            ON execution_history (timestamp DESC);
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create execution_history table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS news_items (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                symbol TEXT NOT NULL,
                title TEXT NOT NULL,
                summary TEXT NOT NULL,
                content TEXT,
                source TEXT,
                sentiment TEXT NOT NULL,
                relevance_score REAL NOT NULL DEFAULT 0.5,
                published_at TEXT NOT NULL,
                fetched_at TEXT NOT NULL,
                citations TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_news_symbol_date
            ON news_items (symbol, published_at DESC);
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create news_items table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS earnings_reports (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                symbol TEXT NOT NULL,
                fiscal_period TEXT NOT NULL,
                fiscal_year INTEGER,
                fiscal_quarter INTEGER,
                report_date TEXT NOT NULL,
                eps_actual REAL,
                eps_estimated REAL,
                revenue_actual REAL,
                revenue_estimated REAL,
                surprise_pct REAL,
                guidance TEXT,
                next_earnings_date TEXT,
                fetched_at TEXT NOT NULL,
                UNIQUE (symbol, fiscal_period)
            );
            CREATE INDEX IF NOT EXISTS idx_earnings_symbol_date
            ON earnings_reports (symbol, report_date DESC);
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create earnings_reports table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS fundamental_analysis (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                symbol TEXT NOT NULL,
                analysis_date TEXT NOT NULL,
                pe_ratio REAL,
                pb_ratio REAL,
                roe REAL,
                roa REAL,
                debt_to_equity REAL,
                current_ratio REAL,
                profit_margins REAL,
                revenue_growth REAL,
                earnings_growth REAL,
                dividend_yield REAL,
                market_cap REAL,
                sector_pe REAL,
                industry_rank INTEGER,
                overall_score REAL,
                recommendation TEXT,
                analysis_data TEXT,
                UNIQUE (symbol, analysis_date)
            );
            CREATE INDEX IF NOT EXISTS idx_fundamental_symbol_date
            ON fundamental_analysis (symbol, analysis_date DESC);
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create fundamental_analysis table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS recommendations (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                symbol TEXT NOT NULL,
                recommendation_type TEXT NOT NULL,
                confidence_score REAL,
                target_price REAL,
                stop_loss REAL,
                quantity INTEGER,
                reasoning TEXT,
                analysis_type TEXT,
                time_horizon TEXT,
                risk_level TEXT,
                potential_impact TEXT,
                alternative_suggestions TEXT,
                created_at TEXT NOT NULL,
                executed_at TEXT,
                outcome TEXT,
                actual_return REAL
            );
            CREATE INDEX IF NOT EXISTS idx_recommendations_created
            ON recommendations (created_at DESC);
            CREATE INDEX IF NOT EXISTS idx_recommendations_symbol
            ON recommendations (symbol);
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create recommendations table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS checkpoints (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                metadata TEXT NOT NULL,
                portfolio TEXT,
                intents TEXT NOT NULL
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create checkpoints table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS news_fetch_tracking (
                symbol TEXT PRIMARY KEY,
                last_news_fetch TEXT,
                last_earnings_fetch TEXT
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create news_fetch_tracking table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS background_tasks_config (
                task_name TEXT PRIMARY KEY,
                enabled INTEGER NOT NULL DEFAULT 1,
                frequency_seconds INTEGER NOT NULL,
                use_claude INTEGER NOT NULL DEFAULT 0,
                priority INTEGER NOT NULL DEFAULT 0
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create background_tasks_config table")?;

        info!("Database schema initialized.");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_init() {
        let db = Database::new("sqlite://:memory:").await.unwrap();
        assert!(db.file_path().is_none());

        // Schema init is idempotent against an already-initialized pool.
        db.init().await.unwrap();
    }
}
