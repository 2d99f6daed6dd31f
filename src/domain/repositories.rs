//! Store abstractions for the durable state layer.
//!
//! Each trait covers one entity family; the SQLite implementations live in
//! `infrastructure::persistence::repositories`. Operations return the typed
//! `StoreError` so callers can distinguish `NotFound` and `Conflict` from
//! infrastructure failures without matching on message strings.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::domain::analysis::{FundamentalAnalysis, Recommendation};
use crate::domain::errors::StoreError;
use crate::domain::intent::{Intent, IntentFilter};
use crate::domain::portfolio::PortfolioSnapshot;
use crate::domain::research::{Checkpoint, EarningsReport, FetchKind, NewsItem};
use crate::domain::task::{ExecutionRecord, Task, TaskSpec};

pub type StoreResult<T> = Result<T, StoreError>;

/// Single-row portfolio persistence. The snapshot is replaced wholesale.
#[async_trait]
pub trait PortfolioRepository: Send + Sync {
    async fn get(&self) -> StoreResult<Option<PortfolioSnapshot>>;
    async fn put(&self, snapshot: &PortfolioSnapshot) -> StoreResult<()>;
}

#[async_trait]
pub trait IntentRepository: Send + Sync {
    async fn save(&self, intent: &Intent) -> StoreResult<()>;
    async fn get(&self, id: &str) -> StoreResult<Intent>;
    async fn list(&self, filter: &IntentFilter) -> StoreResult<Vec<Intent>>;
}

#[async_trait]
pub trait RecommendationRepository: Send + Sync {
    async fn save(&self, rec: &Recommendation) -> StoreResult<i64>;
    async fn list(&self, symbol: Option<&str>, limit: i64) -> StoreResult<Vec<Recommendation>>;
    async fn update_outcome(
        &self,
        id: i64,
        outcome: &str,
        actual_return: Option<f64>,
    ) -> StoreResult<()>;
}

#[async_trait]
pub trait FundamentalsRepository: Send + Sync {
    async fn save(&self, analysis: &FundamentalAnalysis) -> StoreResult<i64>;
    async fn list(&self, symbol: &str, limit: i64) -> StoreResult<Vec<FundamentalAnalysis>>;
}

/// News, earnings, and per-symbol fetch tracking.
#[async_trait]
pub trait ResearchRepository: Send + Sync {
    async fn save_news_item(&self, item: &NewsItem) -> StoreResult<i64>;
    async fn list_news(&self, symbol: &str, limit: i64) -> StoreResult<Vec<NewsItem>>;

    /// Insert or, when `(symbol, fiscal_period)` already exists, update the
    /// existing row's figures.
    async fn save_earnings_report(&self, report: &EarningsReport) -> StoreResult<i64>;
    async fn list_earnings(&self, symbol: &str, limit: i64) -> StoreResult<Vec<EarningsReport>>;
    async fn upcoming_earnings(&self, window_days: i64) -> StoreResult<Vec<EarningsReport>>;

    async fn get_last_fetch(
        &self,
        symbol: &str,
        kind: FetchKind,
    ) -> StoreResult<Option<DateTime<Utc>>>;
    async fn set_last_fetch(
        &self,
        symbol: &str,
        kind: FetchKind,
        ts: DateTime<Utc>,
    ) -> StoreResult<()>;
}

#[async_trait]
pub trait CheckpointRepository: Send + Sync {
    async fn save(&self, checkpoint: &Checkpoint) -> StoreResult<()>;
    async fn get(&self, id: &str) -> StoreResult<Checkpoint>;
}

/// Durable task queue. `claim_next` is the only mutation workers race on and
/// must be atomic: two concurrent claims on one queue can never return the
/// same task.
#[async_trait]
pub trait TaskRepository: Send + Sync {
    async fn enqueue(&self, task: &Task) -> StoreResult<()>;
    async fn get(&self, id: &str) -> StoreResult<Task>;

    /// Claim the highest-priority due pending task of `queue_key`, moving it
    /// to `running` and stamping `started_at`.
    async fn claim_next(&self, queue_key: &str) -> StoreResult<Option<Task>>;

    async fn mark_completed(&self, id: &str, result: &Value) -> StoreResult<()>;

    /// Record a failed attempt. With `reschedule_at` set the task returns to
    /// `pending` for another attempt; otherwise it is terminally `failed`.
    async fn mark_failed(
        &self,
        id: &str,
        error: &str,
        reschedule_at: Option<DateTime<Utc>>,
    ) -> StoreResult<()>;

    /// Return `running` tasks whose `started_at` is older than the bound to
    /// `pending`. Returns the number of reaped tasks.
    async fn reap_stale(&self, older_than: DateTime<Utc>) -> StoreResult<u64>;

    /// Distinct queue keys that currently have pending work.
    async fn pending_queue_keys(&self) -> StoreResult<Vec<String>>;

    async fn list_by_status(&self, status: &str, limit: i64) -> StoreResult<Vec<Task>>;
    async fn count_by_status(&self, status: &str) -> StoreResult<i64>;
}

#[async_trait]
pub trait ExecutionHistoryRepository: Send + Sync {
    /// Append one record, then prune to the newest `max_history`.
    async fn record(&self, record: &ExecutionRecord, max_history: i64) -> StoreResult<()>;
    async fn query(
        &self,
        task_name: Option<&str>,
        limit: i64,
    ) -> StoreResult<Vec<ExecutionRecord>>;
}

/// Periodic-scheduling configuration table.
#[async_trait]
pub trait TaskConfigRepository: Send + Sync {
    async fn list(&self) -> StoreResult<Vec<TaskSpec>>;
    async fn upsert(&self, spec: &TaskSpec) -> StoreResult<()>;
    /// Insert defaults without overwriting operator edits.
    async fn seed_defaults(&self, specs: &[TaskSpec]) -> StoreResult<()>;
}
