use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use marketmind::config::ApiEnvConfig;
use marketmind::domain::errors::ApiError;
use marketmind::infrastructure::api::{
    CircuitState, ProviderClient, ProviderRequest, ProviderTransport,
};
use marketmind::infrastructure::event_bus::EventBus;

struct AlwaysFailing {
    calls: AtomicUsize,
}

#[async_trait]
impl ProviderTransport for AlwaysFailing {
    async fn send(&self, _request: &ProviderRequest, _key: &str) -> Result<Value, ApiError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(ApiError::Provider {
            status: 500,
            body: "internal error".to_string(),
        })
    }
}

fn config(keys: usize, max_retries: u32, failure_threshold: u32) -> ApiEnvConfig {
    ApiEnvConfig {
        api_keys: (0..keys).map(|i| format!("key-{i}")).collect(),
        base_url: "http://localhost:1".to_string(),
        model: "sonar-pro".to_string(),
        requests_per_minute: 10_000,
        burst_limit: 10_000,
        cooldown_seconds: 60,
        failure_threshold,
        recovery_timeout_seconds: 60,
        max_retries,
        initial_backoff_seconds: 0.01,
        max_backoff_seconds: 0.02,
        jitter_enabled: false,
        request_timeout_seconds: 5,
    }
}

fn request() -> ProviderRequest {
    ProviderRequest {
        query: "latest news".to_string(),
        search_recency: "day".to_string(),
        max_tokens: 500,
    }
}

/// With two keys and a failure threshold of three, three exhausted calls
/// open the breaker; the fourth fails fast without reaching the transport.
#[tokio::test]
async fn test_circuit_opens_after_three_failed_calls() {
    let transport = Arc::new(AlwaysFailing {
        calls: AtomicUsize::new(0),
    });
    let client =
        ProviderClient::with_transport(transport.clone(), &config(2, 2, 3), EventBus::new());

    for i in 0..3 {
        let err = client.call(&request()).await.unwrap_err();
        assert!(
            !matches!(err, ApiError::CircuitOpen { .. }),
            "call {i} should fail at the provider, not the breaker"
        );
    }
    assert_eq!(client.circuit_state().await, CircuitState::Open);

    let transport_calls_before = transport.calls.load(Ordering::SeqCst);
    let err = client.call(&request()).await.unwrap_err();
    assert!(matches!(err, ApiError::CircuitOpen { .. }));
    assert_eq!(
        transport.calls.load(Ordering::SeqCst),
        transport_calls_before,
        "an open breaker must not contact the transport"
    );

    let health = client.health().await;
    assert_eq!(health.circuit_state, "OPEN");
    assert_eq!(health.failure_count, 3);
}

/// Per-key metrics stay internally consistent while calls fail over
/// between keys.
#[tokio::test]
async fn test_key_metrics_invariant_under_failures() {
    let transport = Arc::new(AlwaysFailing {
        calls: AtomicUsize::new(0),
    });
    let client = ProviderClient::with_transport(transport, &config(2, 3, 100), EventBus::new());

    for _ in 0..4 {
        let _ = client.call(&request()).await;
    }

    let health = client.health().await;
    for metrics in &health.keys {
        assert_eq!(
            metrics.total_requests,
            metrics.successful_requests + metrics.failed_requests
        );
    }
    let total: u64 = health.keys.iter().map(|m| m.total_requests).sum();
    assert_eq!(total, 12, "4 calls x 3 attempts each");
}

struct RecoveringTransport {
    calls: AtomicUsize,
    fail_first: usize,
}

#[async_trait]
impl ProviderTransport for RecoveringTransport {
    async fn send(&self, _request: &ProviderRequest, _key: &str) -> Result<Value, ApiError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if n < self.fail_first {
            Err(ApiError::Provider {
                status: 503,
                body: "unavailable".to_string(),
            })
        } else {
            Ok(json!({"stocks": {}}))
        }
    }
}

/// After the recovery timeout the breaker admits one probe; its success
/// closes the circuit again.
#[tokio::test]
async fn test_breaker_recovers_through_half_open_probe() {
    let mut cfg = config(1, 1, 1);
    cfg.recovery_timeout_seconds = 1;
    let transport = Arc::new(RecoveringTransport {
        calls: AtomicUsize::new(0),
        fail_first: 1,
    });
    let client = ProviderClient::with_transport(transport, &cfg, EventBus::new());

    assert!(client.call(&request()).await.is_err());
    assert_eq!(client.circuit_state().await, CircuitState::Open);

    tokio::time::sleep(std::time::Duration::from_millis(1100)).await;

    let value = client.call(&request()).await.unwrap();
    assert_eq!(value, json!({"stocks": {}}));
    assert_eq!(client.circuit_state().await, CircuitState::Closed);
    assert_eq!(client.health().await.failure_count, 0);
}
