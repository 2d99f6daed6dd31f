use chrono::{DateTime, Utc};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::domain::analysis::{FundamentalAnalysis, Recommendation};
use crate::domain::errors::StoreError;
use crate::domain::intent::{Intent, IntentFilter};
use crate::domain::portfolio::PortfolioSnapshot;
use crate::domain::repositories::{
    CheckpointRepository, ExecutionHistoryRepository, FundamentalsRepository, IntentRepository,
    PortfolioRepository, RecommendationRepository, ResearchRepository, StoreResult,
    TaskConfigRepository, TaskRepository,
};
use crate::domain::research::{Checkpoint, EarningsReport, FetchKind, NewsItem};
use crate::domain::task::{ExecutionRecord, Task, TaskSpec};
use crate::infrastructure::persistence::database::Database;
use crate::infrastructure::persistence::repositories::{
    SqliteAnalysisRepository, SqliteCheckpointRepository, SqliteExecutionHistoryRepository,
    SqliteIntentRepository, SqlitePortfolioRepository, SqliteResearchRepository,
    SqliteTaskConfigRepository, SqliteTaskRepository,
};

/// Durable state facade composing the per-entity repositories.
///
/// Every operation runs under the store timeout so a wedged database turns
/// into a typed error instead of a hung worker. Writes are single statements
/// or transactions inside the repositories; readers run concurrently.
pub struct StateStore {
    portfolio: Arc<dyn PortfolioRepository>,
    intents: Arc<dyn IntentRepository>,
    recommendations: Arc<dyn RecommendationRepository>,
    fundamentals: Arc<dyn FundamentalsRepository>,
    research: Arc<dyn ResearchRepository>,
    checkpoints: Arc<dyn CheckpointRepository>,
    tasks: Arc<dyn TaskRepository>,
    history: Arc<dyn ExecutionHistoryRepository>,
    task_config: Arc<dyn TaskConfigRepository>,
    op_timeout: Duration,
}

impl StateStore {
    pub fn new(db: &Database, op_timeout: Duration) -> Self {
        let analysis = Arc::new(SqliteAnalysisRepository::new(db.pool.clone()));
        Self {
            portfolio: Arc::new(SqlitePortfolioRepository::new(db.pool.clone())),
            intents: Arc::new(SqliteIntentRepository::new(db.pool.clone())),
            recommendations: analysis.clone(),
            fundamentals: analysis,
            research: Arc::new(SqliteResearchRepository::new(db.pool.clone())),
            checkpoints: Arc::new(SqliteCheckpointRepository::new(db.pool.clone())),
            tasks: Arc::new(SqliteTaskRepository::new(db.pool.clone())),
            history: Arc::new(SqliteExecutionHistoryRepository::new(db.pool.clone())),
            task_config: Arc::new(SqliteTaskConfigRepository::new(db.pool.clone())),
            op_timeout,
        }
    }

    async fn guard<T, F>(&self, fut: F) -> StoreResult<T>
    where
        F: Future<Output = StoreResult<T>>,
    {
        match tokio::time::timeout(self.op_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout {
                timeout_secs: self.op_timeout.as_secs(),
            }),
        }
    }

    // ---- portfolio ----

    pub async fn get_portfolio(&self) -> StoreResult<Option<PortfolioSnapshot>> {
        self.guard(self.portfolio.get()).await
    }

    pub async fn put_portfolio(&self, snapshot: &PortfolioSnapshot) -> StoreResult<()> {
        self.guard(self.portfolio.put(snapshot)).await
    }

    // ---- intents ----

    pub async fn create_intent(
        &self,
        symbol: &str,
        signal: Option<Value>,
        source: &str,
    ) -> StoreResult<Intent> {
        let intent = Intent::new(symbol, signal, source);
        self.guard(self.intents.save(&intent)).await?;
        Ok(intent)
    }

    pub async fn update_intent(&self, intent: &Intent) -> StoreResult<()> {
        self.guard(self.intents.save(intent)).await
    }

    pub async fn get_intent(&self, id: &str) -> StoreResult<Intent> {
        self.guard(self.intents.get(id)).await
    }

    pub async fn list_intents(&self, filter: &IntentFilter) -> StoreResult<Vec<Intent>> {
        self.guard(self.intents.list(filter)).await
    }

    // ---- recommendations & fundamentals ----

    pub async fn save_recommendation(&self, rec: &Recommendation) -> StoreResult<i64> {
        self.guard(self.recommendations.save(rec)).await
    }

    pub async fn list_recommendations(
        &self,
        symbol: Option<&str>,
        limit: i64,
    ) -> StoreResult<Vec<Recommendation>> {
        self.guard(self.recommendations.list(symbol, limit)).await
    }

    pub async fn update_recommendation_outcome(
        &self,
        id: i64,
        outcome: &str,
        actual_return: Option<f64>,
    ) -> StoreResult<()> {
        self.guard(self.recommendations.update_outcome(id, outcome, actual_return))
            .await
    }

    pub async fn save_fundamental_analysis(
        &self,
        analysis: &FundamentalAnalysis,
    ) -> StoreResult<i64> {
        self.guard(self.fundamentals.save(analysis)).await
    }

    pub async fn get_fundamental_analysis(
        &self,
        symbol: &str,
        limit: i64,
    ) -> StoreResult<Vec<FundamentalAnalysis>> {
        self.guard(self.fundamentals.list(symbol, limit)).await
    }

    // ---- news & earnings ----

    pub async fn save_news_item(&self, item: &NewsItem) -> StoreResult<i64> {
        self.guard(self.research.save_news_item(item)).await
    }

    pub async fn list_news(&self, symbol: &str, limit: i64) -> StoreResult<Vec<NewsItem>> {
        self.guard(self.research.list_news(symbol, limit)).await
    }

    pub async fn save_earnings_report(&self, report: &EarningsReport) -> StoreResult<i64> {
        self.guard(self.research.save_earnings_report(report)).await
    }

    pub async fn list_earnings(
        &self,
        symbol: &str,
        limit: i64,
    ) -> StoreResult<Vec<EarningsReport>> {
        self.guard(self.research.list_earnings(symbol, limit)).await
    }

    pub async fn upcoming_earnings(&self, window_days: i64) -> StoreResult<Vec<EarningsReport>> {
        self.guard(self.research.upcoming_earnings(window_days)).await
    }

    pub async fn get_last_fetch(
        &self,
        symbol: &str,
        kind: FetchKind,
    ) -> StoreResult<Option<DateTime<Utc>>> {
        self.guard(self.research.get_last_fetch(symbol, kind)).await
    }

    pub async fn set_last_fetch(
        &self,
        symbol: &str,
        kind: FetchKind,
        ts: DateTime<Utc>,
    ) -> StoreResult<()> {
        self.guard(self.research.set_last_fetch(symbol, kind, ts)).await
    }

    // ---- checkpoints ----

    /// Freeze the current portfolio and intents under a name; returns the
    /// checkpoint id.
    pub async fn create_checkpoint(
        &self,
        name: &str,
        metadata: Option<Value>,
    ) -> StoreResult<String> {
        let portfolio = self.get_portfolio().await?;
        let intents = self.list_intents(&IntentFilter::default()).await?;
        let checkpoint = Checkpoint::new(
            name,
            metadata.unwrap_or_else(|| Value::Object(Default::default())),
            portfolio,
            intents,
        );
        self.guard(self.checkpoints.save(&checkpoint)).await?;
        info!("Checkpoint created: {} ({})", name, checkpoint.id);
        Ok(checkpoint.id)
    }

    /// Roll portfolio and intents back to a checkpoint. Returns false when
    /// the checkpoint does not exist.
    pub async fn restore_checkpoint(&self, id: &str) -> StoreResult<bool> {
        let checkpoint = match self.guard(self.checkpoints.get(id)).await {
            Ok(c) => c,
            Err(StoreError::NotFound { .. }) => return Ok(false),
            Err(e) => return Err(e),
        };

        if let Some(portfolio) = &checkpoint.portfolio {
            self.put_portfolio(portfolio).await?;
        }
        for intent in &checkpoint.intents {
            self.update_intent(intent).await?;
        }
        info!("Checkpoint restored: {} ({})", checkpoint.name, id);
        Ok(true)
    }

    // ---- task queue ----

    pub async fn enqueue_task(&self, task: &Task) -> StoreResult<()> {
        self.guard(self.tasks.enqueue(task)).await
    }

    pub async fn get_task(&self, id: &str) -> StoreResult<Task> {
        self.guard(self.tasks.get(id)).await
    }

    pub async fn claim_next_task(&self, queue_key: &str) -> StoreResult<Option<Task>> {
        self.guard(self.tasks.claim_next(queue_key)).await
    }

    pub async fn mark_task_completed(&self, id: &str, result: &Value) -> StoreResult<()> {
        self.guard(self.tasks.mark_completed(id, result)).await
    }

    pub async fn mark_task_failed(
        &self,
        id: &str,
        error: &str,
        reschedule_at: Option<DateTime<Utc>>,
    ) -> StoreResult<()> {
        self.guard(self.tasks.mark_failed(id, error, reschedule_at)).await
    }

    pub async fn reap_stale_tasks(&self, older_than: DateTime<Utc>) -> StoreResult<u64> {
        self.guard(self.tasks.reap_stale(older_than)).await
    }

    pub async fn pending_queue_keys(&self) -> StoreResult<Vec<String>> {
        self.guard(self.tasks.pending_queue_keys()).await
    }

    pub async fn list_tasks_by_status(&self, status: &str, limit: i64) -> StoreResult<Vec<Task>> {
        self.guard(self.tasks.list_by_status(status, limit)).await
    }

    pub async fn count_tasks_by_status(&self, status: &str) -> StoreResult<i64> {
        self.guard(self.tasks.count_by_status(status)).await
    }

    // ---- execution history ----

    pub async fn record_execution(
        &self,
        record: &ExecutionRecord,
        max_history: i64,
    ) -> StoreResult<()> {
        self.guard(self.history.record(record, max_history)).await
    }

    pub async fn query_execution(
        &self,
        task_name: Option<&str>,
        limit: i64,
    ) -> StoreResult<Vec<ExecutionRecord>> {
        self.guard(self.history.query(task_name, limit)).await
    }

    // ---- background task config ----

    pub async fn list_task_specs(&self) -> StoreResult<Vec<TaskSpec>> {
        self.guard(self.task_config.list()).await
    }

    pub async fn upsert_task_spec(&self, spec: &TaskSpec) -> StoreResult<()> {
        self.guard(self.task_config.upsert(spec)).await
    }

    pub async fn seed_task_specs(&self, specs: &[TaskSpec]) -> StoreResult<()> {
        self.guard(self.task_config.seed_defaults(specs)).await
    }
}
