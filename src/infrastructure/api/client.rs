use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::config::ApiEnvConfig;
use crate::domain::errors::{ApiError, RetryClass};
use crate::domain::events::{Event, EventType};
use crate::infrastructure::api::circuit_breaker::{CircuitBreaker, CircuitState};
use crate::infrastructure::api::key_rotator::{ApiKeyMetrics, KeyRotator};
use crate::infrastructure::api::rate_limiter::RateLimiter;
use crate::infrastructure::api::retry::RetryPolicy;
use crate::infrastructure::event_bus::EventBus;
use crate::infrastructure::http_client_factory::HttpClientFactory;

/// One outbound research query to the external provider.
#[derive(Debug, Clone)]
pub struct ProviderRequest {
    pub query: String,
    pub search_recency: String,
    pub max_tokens: u32,
}

/// Seam between the client core and the wire. Production uses
/// `HttpTransport`; tests substitute failing or canned transports.
#[async_trait]
pub trait ProviderTransport: Send + Sync {
    async fn send(&self, request: &ProviderRequest, api_key: &str) -> Result<Value, ApiError>;
}

/// POSTs chat-completion style requests to the provider and extracts the
/// JSON document from the response content.
pub struct HttpTransport {
    http: reqwest::Client,
    base_url: String,
    model: String,
    timeout_secs: u64,
}

impl HttpTransport {
    pub fn new(config: &ApiEnvConfig) -> Self {
        Self {
            http: HttpClientFactory::create_client(Duration::from_secs(
                config.request_timeout_seconds,
            )),
            base_url: config.base_url.clone(),
            model: config.model.clone(),
            timeout_secs: config.request_timeout_seconds,
        }
    }
}

#[async_trait]
impl ProviderTransport for HttpTransport {
    async fn send(&self, request: &ProviderRequest, api_key: &str) -> Result<Value, ApiError> {
        let body = json!({
            "model": self.model,
            "messages": [{"role": "user", "content": request.query}],
            "max_tokens": request.max_tokens,
            "response_format": {"type": "json_object"},
            "web_search_options": {"search_recency_filter": request.search_recency},
        });

        let response = self
            .http
            .post(&self.base_url)
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ApiError::Timeout {
                        timeout_secs: self.timeout_secs,
                    }
                } else {
                    ApiError::Transport(e)
                }
            })?;

        let status = response.status();
        if status.as_u16() == 429 {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::RateLimited { message: body });
        }
        if status.as_u16() == 401 || status.as_u16() == 403 {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::AuthFailed { message: body });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::Provider {
                status: status.as_u16(),
                body,
            });
        }

        let envelope: Value = response.json().await.map_err(ApiError::Transport)?;
        let content = envelope["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| ApiError::MalformedPayload {
                reason: "missing choices[0].message.content".to_string(),
            })?;

        serde_json::from_str(content).map_err(|e| ApiError::MalformedPayload {
            reason: format!("content is not valid JSON: {}", e),
        })
    }
}

/// Snapshot of client health for operators and the health-check task.
#[derive(Debug, Clone, Serialize)]
pub struct ClientHealth {
    pub circuit_state: String,
    pub failure_count: u32,
    pub keys: Vec<ApiKeyMetrics>,
    pub window_count: usize,
    pub requests_per_minute: usize,
}

/// Key-rotating, rate-limited, circuit-broken provider client.
///
/// Every outbound call goes through `call`: breaker admission, rate-limit
/// slot, key selection, transport, then metrics and breaker bookkeeping.
/// Transient failures retry with exponential backoff; auth failures rotate
/// the key first. The breaker counts one failure per exhausted call, not
/// per attempt.
pub struct ProviderClient {
    transport: Arc<dyn ProviderTransport>,
    rotator: KeyRotator,
    limiter: RateLimiter,
    breaker: CircuitBreaker,
    policy: RetryPolicy,
    requests_per_minute: usize,
    bus: EventBus,
}

impl ProviderClient {
    pub fn new(config: &ApiEnvConfig, bus: EventBus) -> Self {
        let transport = Arc::new(HttpTransport::new(config));
        Self::with_transport(transport, config, bus)
    }

    pub fn with_transport(
        transport: Arc<dyn ProviderTransport>,
        config: &ApiEnvConfig,
        bus: EventBus,
    ) -> Self {
        Self {
            transport,
            rotator: KeyRotator::new(config.api_keys.clone()),
            limiter: RateLimiter::new(config.requests_per_minute, config.burst_limit),
            breaker: CircuitBreaker::new(
                "provider",
                config.failure_threshold,
                Duration::from_secs(config.recovery_timeout_seconds),
            ),
            policy: RetryPolicy {
                max_retries: config.max_retries.max(1),
                initial_backoff: Duration::from_secs_f64(config.initial_backoff_seconds),
                max_backoff: Duration::from_secs_f64(config.max_backoff_seconds),
                exponential_base: 2.0,
                jitter: config.jitter_enabled,
            },
            requests_per_minute: config.requests_per_minute,
            bus,
        }
    }

    pub async fn has_keys(&self) -> bool {
        self.rotator.key_count().await > 0
    }

    /// Issue one provider call with the full resilience pipeline applied.
    pub async fn call(&self, request: &ProviderRequest) -> Result<Value, ApiError> {
        self.breaker.admit().await?;

        let mut last_err: Option<ApiError> = None;
        for attempt in 0..self.policy.max_retries {
            self.limiter.acquire().await;
            let (index, key) = self.rotator.next_key().await?;

            match self.transport.send(request, &key).await {
                Ok(value) => {
                    self.rotator.record_success(index).await;
                    self.breaker.record_success().await;
                    return Ok(value);
                }
                Err(err) => {
                    let rate_limited = matches!(err, ApiError::RateLimited { .. });
                    self.rotator.record_failure(index, rate_limited).await;

                    match err.retry_class() {
                        RetryClass::Retryable => {
                            let delay = self.policy.backoff_delay(attempt);
                            warn!(
                                attempt = attempt + 1,
                                max = self.policy.max_retries,
                                "Provider call failed ({err}), retrying in {delay:?}"
                            );
                            last_err = Some(err);
                            if attempt + 1 < self.policy.max_retries {
                                sleep(delay).await;
                            }
                        }
                        RetryClass::AuthFailure => {
                            warn!(
                                attempt = attempt + 1,
                                "Provider authentication failed on key {index}, rotating"
                            );
                            self.rotator.rotate_on_error(index).await;
                            last_err = Some(err);
                            if attempt + 1 < self.policy.max_retries {
                                sleep(Duration::from_secs(1)).await;
                            }
                        }
                        RetryClass::NonRetryable | RetryClass::CircuitOpen => {
                            if self.breaker.record_failure().await {
                                self.emit_circuit_opened().await;
                            }
                            return Err(err);
                        }
                    }
                }
            }
        }

        if self.breaker.record_failure().await {
            self.emit_circuit_opened().await;
        }
        Err(last_err.unwrap_or(ApiError::NoKeysAvailable))
    }

    pub async fn health(&self) -> ClientHealth {
        ClientHealth {
            circuit_state: self.breaker.state().await.as_str().to_string(),
            failure_count: self.breaker.failure_count().await,
            keys: self.rotator.metrics().await,
            window_count: self.limiter.window_count().await,
            requests_per_minute: self.requests_per_minute,
        }
    }

    pub async fn circuit_state(&self) -> CircuitState {
        self.breaker.state().await
    }

    /// Administrative reset of per-key metrics.
    pub async fn reset_key_metrics(&self) {
        self.rotator.reset_metrics().await;
    }

    async fn emit_circuit_opened(&self) {
        let failure_count = self.breaker.failure_count().await;
        info!("Provider circuit opened after {failure_count} failures");
        self.bus
            .publish(Event::new(
                EventType::CircuitOpened,
                "provider_client",
                json!({ "failure_count": failure_count }),
            ))
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FailingTransport {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ProviderTransport for FailingTransport {
        async fn send(&self, _request: &ProviderRequest, _key: &str) -> Result<Value, ApiError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(ApiError::Provider {
                status: 500,
                body: "boom".to_string(),
            })
        }
    }

    struct FlakyTransport {
        calls: AtomicUsize,
        fail_first: usize,
    }

    #[async_trait]
    impl ProviderTransport for FlakyTransport {
        async fn send(&self, _request: &ProviderRequest, _key: &str) -> Result<Value, ApiError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first {
                Err(ApiError::RateLimited {
                    message: "slow down".to_string(),
                })
            } else {
                Ok(json!({"stocks": {}}))
            }
        }
    }

    fn config(keys: usize, max_retries: u32, failure_threshold: u32) -> ApiEnvConfig {
        ApiEnvConfig {
            api_keys: (0..keys).map(|i| format!("k{}", i)).collect(),
            base_url: "http://localhost:1".to_string(),
            model: "sonar-pro".to_string(),
            requests_per_minute: 1000,
            burst_limit: 1000,
            cooldown_seconds: 60,
            failure_threshold,
            recovery_timeout_seconds: 60,
            max_retries,
            initial_backoff_seconds: 0.01,
            max_backoff_seconds: 0.05,
            jitter_enabled: false,
            request_timeout_seconds: 5,
        }
    }

    fn request() -> ProviderRequest {
        ProviderRequest {
            query: "test".to_string(),
            search_recency: "day".to_string(),
            max_tokens: 100,
        }
    }

    #[tokio::test]
    async fn test_retry_then_success() {
        let transport = Arc::new(FlakyTransport {
            calls: AtomicUsize::new(0),
            fail_first: 2,
        });
        let client =
            ProviderClient::with_transport(transport.clone(), &config(1, 5, 5), EventBus::new());

        let value = client.call(&request()).await.unwrap();
        assert_eq!(value, json!({"stocks": {}}));
        assert_eq!(transport.calls.load(Ordering::SeqCst), 3);

        let health = client.health().await;
        assert_eq!(health.circuit_state, "CLOSED");
        let m = &health.keys[0];
        assert_eq!(m.total_requests, m.successful_requests + m.failed_requests);
        assert_eq!(m.rate_limit_hits, 2);
    }

    #[tokio::test]
    async fn test_exhausted_retries_count_one_breaker_failure() {
        let transport = Arc::new(FailingTransport {
            calls: AtomicUsize::new(0),
        });
        let client =
            ProviderClient::with_transport(transport.clone(), &config(2, 2, 3), EventBus::new());

        for _ in 0..2 {
            assert!(client.call(&request()).await.is_err());
        }
        assert_eq!(client.circuit_state().await, CircuitState::Closed);
        assert_eq!(client.health().await.failure_count, 2);

        assert!(client.call(&request()).await.is_err());
        assert_eq!(client.circuit_state().await, CircuitState::Open);

        // Fourth call fails fast without touching the transport.
        let before = transport.calls.load(Ordering::SeqCst);
        let err = client.call(&request()).await.unwrap_err();
        assert!(matches!(err, ApiError::CircuitOpen { .. }));
        assert_eq!(transport.calls.load(Ordering::SeqCst), before);
        assert_eq!(client.health().await.circuit_state, "OPEN");
    }

    #[tokio::test]
    async fn test_no_keys_propagates() {
        let transport = Arc::new(FailingTransport {
            calls: AtomicUsize::new(0),
        });
        let client = ProviderClient::with_transport(transport, &config(0, 2, 3), EventBus::new());
        assert!(matches!(
            client.call(&request()).await,
            Err(ApiError::NoKeysAvailable)
        ));
    }
}
