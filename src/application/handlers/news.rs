use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info};

use crate::application::parsers;
use crate::application::scheduler::TaskHandler;
use crate::domain::errors::TaskError;
use crate::domain::events::{Event, EventType};
use crate::domain::research::FetchKind;
use crate::domain::task::{Task, TaskOutcome};
use crate::infrastructure::api::{queries, ProviderClient};
use crate::infrastructure::event_bus::EventBus;
use crate::infrastructure::persistence::StateStore;

use super::resolve_symbols;

/// Fetches fresh news for portfolio symbols and stores it.
///
/// Symbols fetched within the minimum interval are skipped so scheduled
/// runs don't burn provider quota re-asking the same question.
pub struct NewsMonitoringHandler {
    store: Arc<StateStore>,
    client: Arc<ProviderClient>,
    bus: EventBus,
    min_fetch_interval: ChronoDuration,
}

impl NewsMonitoringHandler {
    pub fn new(store: Arc<StateStore>, client: Arc<ProviderClient>, bus: EventBus) -> Self {
        Self {
            store,
            client,
            bus,
            min_fetch_interval: ChronoDuration::minutes(15),
        }
    }
}

#[async_trait]
impl TaskHandler for NewsMonitoringHandler {
    async fn execute(&self, task: &Task) -> Result<TaskOutcome, TaskError> {
        let symbols = resolve_symbols(task, &self.store).await?;
        if symbols.is_empty() {
            return Ok(TaskOutcome::skipped("no_symbols"));
        }
        if !self.client.has_keys().await {
            return Ok(TaskOutcome::skipped("no_api_keys"));
        }

        // Honor per-symbol fetch intervals.
        let now = Utc::now();
        let mut due = Vec::new();
        for symbol in symbols {
            match self.store.get_last_fetch(&symbol, FetchKind::News).await? {
                Some(last) if now - last < self.min_fetch_interval => {
                    debug!("News for {} fetched recently, skipping", symbol);
                }
                _ => due.push(symbol),
            }
        }
        if due.is_empty() {
            return Ok(TaskOutcome::skipped("recently_fetched"));
        }

        let payload = self
            .client
            .call(&queries::daily_news(&due))
            .await
            .map_err(TaskError::from_api)?;
        let stocks = parsers::stocks_map(&payload)?;

        let mut saved = 0usize;
        for symbol in &due {
            if let Some(entry) = stocks.get(symbol) {
                let items = parsers::parse_news(symbol, entry);
                for item in &items {
                    self.store.save_news_item(item).await?;
                }
                saved += items.len();

                self.bus
                    .publish(Event::new(
                        EventType::NewsFetched,
                        "news_monitoring",
                        json!({ "symbol": symbol, "items": items.len() }),
                    ))
                    .await;
            }
            self.store
                .set_last_fetch(symbol, FetchKind::News, now)
                .await?;
        }

        info!("News monitoring stored {} items for {} symbols", saved, due.len());
        Ok(TaskOutcome::completed(json!({
            "symbols_processed": due.len(),
            "items_saved": saved,
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
                    "INFY": {
                        "news": [
                            {"title": "Deal win", "summary": "Large deal", "sentiment": "positive"}
                        ]
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
    async fn test_fetches_and_stores_news() {
        let db = Database::new("sqlite://:memory:").await.unwrap();
        let store = Arc::new(StateStore::new(&db, Duration::from_secs(10)));
        let bus = EventBus::new();
        let client = Arc::new(ProviderClient::with_transport(
            Arc::new(CannedTransport),
            &test_config(),
            bus.clone(),
        ));

        let handler = NewsMonitoringHandler::new(store.clone(), client, bus);
        let task = Task::new(
            crate::domain::task::TaskType::NewsMonitoring,
            json!({"symbols": ["INFY"]}),
        );

        let outcome = handler.execute(&task).await.unwrap();
        assert!(matches!(outcome, TaskOutcome::Completed { .. }));

        let news = store.list_news("INFY", 10).await.unwrap();
        assert_eq!(news.len(), 1);
        assert_eq!(news[0].sentiment, "positive");

        // Second run inside the fetch interval skips.
        let outcome = handler.execute(&task).await.unwrap();
        match outcome {
            TaskOutcome::Skipped { reason } => assert_eq!(reason, "recently_fetched"),
            other => panic!("expected skip, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_no_symbols_skips() {
        let db = Database::new("sqlite://:memory:").await.unwrap();
        let store = Arc::new(StateStore::new(&db, Duration::from_secs(10)));
        let bus = EventBus::new();
        let client = Arc::new(ProviderClient::with_transport(
            Arc::new(CannedTransport),
            &test_config(),
            bus.clone(),
        ));

        let handler = NewsMonitoringHandler::new(store, client, bus);
        let task = Task::new(crate::domain::task::TaskType::NewsMonitoring, json!({}));
        let outcome = handler.execute(&task).await.unwrap();
        assert!(matches!(outcome, TaskOutcome::Skipped { .. }));
    }
}
