use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info};

use crate::application::parsers;
use crate::application::scheduler::TaskHandler;
use crate::domain::errors::{StoreError, TaskError};
use crate::domain::events::{Event, EventType};
use crate::domain::task::{Task, TaskOutcome};
use crate::infrastructure::api::{queries, ProviderClient};
use crate::infrastructure::event_bus::EventBus;
use crate::infrastructure::persistence::StateStore;

use super::resolve_symbols;

/// Refreshes fundamental ratios and the derived composite score.
///
/// One analysis row per symbol per day; a second run on the same day counts
/// the symbol as already analyzed instead of failing.
pub struct FundamentalsUpdateHandler {
    store: Arc<StateStore>,
    client: Arc<ProviderClient>,
    bus: EventBus,
}

impl FundamentalsUpdateHandler {
    pub fn new(store: Arc<StateStore>, client: Arc<ProviderClient>, bus: EventBus) -> Self {
        Self { store, client, bus }
    }
}

#[async_trait]
impl TaskHandler for FundamentalsUpdateHandler {
    async fn execute(&self, task: &Task) -> Result<TaskOutcome, TaskError> {
        let symbols = resolve_symbols(task, &self.store).await?;
        if symbols.is_empty() {
            return Ok(TaskOutcome::skipped("no_symbols"));
        }
        if !self.client.has_keys().await {
            return Ok(TaskOutcome::skipped("no_api_keys"));
        }

        let payload = self
            .client
            .call(&queries::fundamentals(&symbols))
            .await
            .map_err(TaskError::from_api)?;
        let stocks = parsers::stocks_map(&payload)?;

        let today = Utc::now().date_naive();
        let mut saved = 0usize;
        let mut already_analyzed = 0usize;
        for symbol in &symbols {
            let Some(mut analysis) = stocks
                .get(symbol)
                .and_then(|e| parsers::parse_fundamentals(symbol, e, today))
            else {
                continue;
            };

            let score = analysis.overall_score.unwrap_or(50.0);
            analysis.recommendation = Some(
                if score >= 65.0 {
                    "BUY"
                } else if score <= 35.0 {
                    "SELL"
                } else {
                    "HOLD"
                }
                .to_string(),
            );

            match self.store.save_fundamental_analysis(&analysis).await {
                Ok(_) => {
                    saved += 1;
                    self.bus
                        .publish(Event::new(
                            EventType::FundamentalsUpdated,
                            "fundamentals_update",
                            json!({ "symbol": symbol, "overall_score": score }),
                        ))
                        .await;
                }
                Err(StoreError::Conflict { .. }) => {
                    debug!("Fundamentals for {} already analyzed today", symbol);
                    already_analyzed += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }

        info!(
            "Fundamentals update: {} saved, {} already analyzed",
            saved, already_analyzed
        );
        Ok(TaskOutcome::completed(json!({
            "symbols_processed": symbols.len(),
            "analyses_saved": saved,
            "already_analyzed": already_analyzed,
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ApiEnvConfig;
    use crate::infrastructure::api::{ProviderRequest, ProviderTransport};
    use crate::infrastructure::persistence::Database;
    use serde_json::Value;
    use std::time::Duration;

    struct CannedTransport;

    #[async_trait]
    impl ProviderTransport for CannedTransport {
        async fn send(
            &self,
            _request: &ProviderRequest,
            _key: &str,
        ) -> Result<Value, crate::domain::errors::ApiError> {
            Ok(json!({
                "stocks": {
                    "HDFCBANK": {
                        "fundamentals": {
                            "pe_ratio": 18.2,
                            "roe": 17.0,
                            "revenue_growth": 14.0,
                            "debt_to_equity": 0.9
                        }
                    }
                }
            }))
        }
    }

    fn test_config() -> ApiEnvConfig {
        ApiEnvConfig {
            api_keys: vec!["k1".to_string()],
            base_url: "http://localhost:1".to_string(),
            model: "sonar-pro".to_string(),
            requests_per_minute: 1000,
            burst_limit: 1000,
            cooldown_seconds: 60,
            failure_threshold: 5,
            recovery_timeout_seconds: 60,
            max_retries: 2,
            initial_backoff_seconds: 0.01,
            max_backoff_seconds: 0.05,
            jitter_enabled: false,
            request_timeout_seconds: 5,
        }
    }

    #[tokio::test]
    async fn test_saves_analysis_once_per_day() {
        let db = Database::new("sqlite://:memory:").await.unwrap();
        let store = Arc::new(StateStore::new(&db, Duration::from_secs(10)));
        let bus = EventBus::new();
        let client = Arc::new(ProviderClient::with_transport(
            Arc::new(CannedTransport),
            &test_config(),
            bus.clone(),
        ));

        let handler = FundamentalsUpdateHandler::new(store.clone(), client, bus);
        let task = Task::new(
            crate::domain::task::TaskType::FundamentalsUpdate,
            json!({"symbols": ["HDFCBANK"]}),
        );

        let outcome = handler.execute(&task).await.unwrap();
        match outcome {
            TaskOutcome::Completed { result } => assert_eq!(result["analyses_saved"], 1),
            other => panic!("unexpected outcome {:?}", other),
        }

        let outcome = handler.execute(&task).await.unwrap();
        match outcome {
            TaskOutcome::Completed { result } => assert_eq!(result["already_analyzed"], 1),
            other => panic!("unexpected outcome {:?}", other),
        }

        let analyses = store.get_fundamental_analysis("HDFCBANK", 10).await.unwrap();
        assert_eq!(analyses.len(), 1);
        assert!(analyses[0].recommendation.is_some());
    }
}
