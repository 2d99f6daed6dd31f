use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;

use crate::application::scheduler::TaskHandler;
use crate::domain::errors::TaskError;
use crate::domain::task::{Task, TaskOutcome};
use crate::infrastructure::api::ProviderClient;
use crate::infrastructure::persistence::StateStore;

/// Periodic self-check: queue depths, provider circuit state, and whether
/// the store answers at all.
pub struct HealthCheckHandler {
    store: Arc<StateStore>,
    client: Arc<ProviderClient>,
}

impl HealthCheckHandler {
    pub fn new(store: Arc<StateStore>, client: Arc<ProviderClient>) -> Self {
        Self { store, client }
    }
}

#[async_trait]
impl TaskHandler for HealthCheckHandler {
    async fn execute(&self, _task: &Task) -> Result<TaskOutcome, TaskError> {
        let pending = self.store.count_tasks_by_status("pending").await?;
        let running = self.store.count_tasks_by_status("running").await?;
        let failed = self.store.count_tasks_by_status("failed").await?;
        let has_portfolio = self.store.get_portfolio().await?.is_some();

        let provider = self.client.health().await;

        Ok(TaskOutcome::completed(json!({
            "queue": {
                "pending": pending,
                "running": running,
                "failed": failed,
            },
            "portfolio_loaded": has_portfolio,
            "provider": {
                "circuit_state": provider.circuit_state,
                "failure_count": provider.failure_count,
                "window_count": provider.window_count,
                "keys": provider.keys.len(),
            },
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ApiEnvConfig;
    use crate::infrastructure::event_bus::EventBus;
    use crate::infrastructure::persistence::Database;
    use serde_json::json;
    use std::time::Duration;

    #[tokio::test]
    async fn test_health_report_shape() {
        let db = Database::new("sqlite://:memory:").await.unwrap();
        let store = Arc::new(StateStore::new(&db, Duration::from_secs(10)));
        let config = ApiEnvConfig {
            api_keys: vec![],
            base_url: "http://localhost:1".to_string(),
            model: "sonar-pro".to_string(),
            requests_per_minute: 50,
            burst_limit: 10,
            cooldown_seconds: 60,
            failure_threshold: 5,
            recovery_timeout_seconds: 60,
            max_retries: 5,
            initial_backoff_seconds: 2.0,
            max_backoff_seconds: 120.0,
            jitter_enabled: true,
            request_timeout_seconds: 45,
        };
        let client = Arc::new(ProviderClient::new(&config, EventBus::new()));

        let handler = HealthCheckHandler::new(store, client);
        let task = Task::new(crate::domain::task::TaskType::HealthCheck, json!({}));
        let outcome = handler.execute(&task).await.unwrap();

        match outcome {
            TaskOutcome::Completed { result } => {
                assert_eq!(result["queue"]["pending"], 0);
                assert_eq!(result["provider"]["circuit_state"], "CLOSED");
                assert_eq!(result["portfolio_loaded"], false);
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }
}
