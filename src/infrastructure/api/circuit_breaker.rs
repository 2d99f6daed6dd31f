use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::domain::errors::ApiError;

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,   // Normal operation - requests pass through
    Open,     // Failure threshold breached - reject all requests
    HalfOpen, // Testing if service recovered - allow a single probe
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "CLOSED",
            CircuitState::Open => "OPEN",
            CircuitState::HalfOpen => "HALF_OPEN",
        }
    }
}

struct BreakerInner {
    state: CircuitState,
    failure_count: u32,
    last_failure_at: Option<Instant>,
    probe_in_flight: bool,
}

/// Failure-isolation device for the provider client.
///
/// Closed → Open once the cumulative failure count reaches the threshold;
/// Open → HalfOpen after the recovery timeout, admitting exactly one probe;
/// a successful probe closes the breaker and resets the count, a failed
/// probe re-opens it and restarts the timer.
pub struct CircuitBreaker {
    inner: Mutex<BreakerInner>,
    failure_threshold: u32,
    recovery_timeout: Duration,
    name: String,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, failure_threshold: u32, recovery_timeout: Duration) -> Self {
        Self {
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failure_count: 0,
                last_failure_at: None,
                probe_in_flight: false,
            }),
            failure_threshold: failure_threshold.max(1),
            recovery_timeout,
            name: name.into(),
        }
    }

    /// Gate a call. Fails fast with `CircuitOpen` while the breaker is open
    /// or a recovery probe is already in flight.
    pub async fn admit(&self) -> Result<(), ApiError> {
        let mut inner = self.inner.lock().await;
        match inner.state {
            CircuitState::Closed => Ok(()),
            CircuitState::Open => {
                let elapsed = inner
                    .last_failure_at
                    .map(|t| t.elapsed())
                    .unwrap_or(Duration::MAX);
                if elapsed >= self.recovery_timeout {
                    info!(
                        "CircuitBreaker [{}]: Transitioning Open -> HalfOpen (timeout elapsed)",
                        self.name
                    );
                    inner.state = CircuitState::HalfOpen;
                    inner.probe_in_flight = true;
                    Ok(())
                } else {
                    Err(ApiError::CircuitOpen {
                        retry_in_secs: (self.recovery_timeout - elapsed).as_secs().max(1),
                    })
                }
            }
            CircuitState::HalfOpen => {
                if inner.probe_in_flight {
                    Err(ApiError::CircuitOpen {
                        retry_in_secs: self.recovery_timeout.as_secs().max(1),
                    })
                } else {
                    inner.probe_in_flight = true;
                    Ok(())
                }
            }
        }
    }

    /// Record a successful call.
    pub async fn record_success(&self) {
        let mut inner = self.inner.lock().await;
        match inner.state {
            CircuitState::HalfOpen => {
                info!(
                    "CircuitBreaker [{}]: Transitioning HalfOpen -> Closed (probe succeeded)",
                    self.name
                );
                inner.state = CircuitState::Closed;
                inner.failure_count = 0;
                inner.probe_in_flight = false;
            }
            CircuitState::Closed => {}
            CircuitState::Open => {
                warn!(
                    "CircuitBreaker [{}]: Success recorded in Open state (unexpected)",
                    self.name
                );
            }
        }
    }

    /// Record a failed call. Returns true when this failure opened the
    /// breaker.
    pub async fn record_failure(&self) -> bool {
        let mut inner = self.inner.lock().await;
        inner.failure_count += 1;
        inner.last_failure_at = Some(Instant::now());

        match inner.state {
            CircuitState::Closed => {
                if inner.failure_count >= self.failure_threshold {
                    error!(
                        "CircuitBreaker [{}]: Transitioning Closed -> Open ({} failures)",
                        self.name, inner.failure_count
                    );
                    inner.state = CircuitState::Open;
                    return true;
                }
                false
            }
            CircuitState::HalfOpen => {
                warn!(
                    "CircuitBreaker [{}]: Transitioning HalfOpen -> Open (probe failed)",
                    self.name
                );
                inner.state = CircuitState::Open;
                inner.probe_in_flight = false;
                true
            }
            CircuitState::Open => false,
        }
    }

    pub async fn state(&self) -> CircuitState {
        self.inner.lock().await.state
    }

    pub async fn failure_count(&self) -> u32 {
        self.inner.lock().await.failure_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_opens_at_threshold() {
        let cb = CircuitBreaker::new("test", 3, Duration::from_secs(60));

        for _ in 0..2 {
            cb.admit().await.unwrap();
            cb.record_failure().await;
        }
        assert_eq!(cb.state().await, CircuitState::Closed);

        cb.admit().await.unwrap();
        let opened = cb.record_failure().await;
        assert!(opened);
        assert_eq!(cb.state().await, CircuitState::Open);

        // Next admission fails fast.
        assert!(matches!(
            cb.admit().await,
            Err(ApiError::CircuitOpen { .. })
        ));
    }

    #[tokio::test]
    async fn test_recovers_after_timeout() {
        let cb = CircuitBreaker::new("test", 1, Duration::from_millis(50));

        cb.admit().await.unwrap();
        cb.record_failure().await;
        assert_eq!(cb.state().await, CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(80)).await;

        // Probe admitted, succeeds, breaker closes and count resets.
        cb.admit().await.unwrap();
        assert_eq!(cb.state().await, CircuitState::HalfOpen);
        cb.record_success().await;
        assert_eq!(cb.state().await, CircuitState::Closed);
        assert_eq!(cb.failure_count().await, 0);
    }

    #[tokio::test]
    async fn test_half_open_allows_single_probe() {
        let cb = CircuitBreaker::new("test", 1, Duration::from_millis(50));
        cb.admit().await.unwrap();
        cb.record_failure().await;
        tokio::time::sleep(Duration::from_millis(80)).await;

        cb.admit().await.unwrap();
        // Second caller while the probe is in flight is rejected.
        assert!(matches!(
            cb.admit().await,
            Err(ApiError::CircuitOpen { .. })
        ));
    }

    #[tokio::test]
    async fn test_failed_probe_reopens_and_resets_timer() {
        let cb = CircuitBreaker::new("test", 1, Duration::from_millis(50));
        cb.admit().await.unwrap();
        cb.record_failure().await;
        tokio::time::sleep(Duration::from_millis(80)).await;

        cb.admit().await.unwrap();
        cb.record_failure().await;
        assert_eq!(cb.state().await, CircuitState::Open);

        // Timer restarted: admission still rejected immediately after.
        assert!(matches!(
            cb.admit().await,
            Err(ApiError::CircuitOpen { .. })
        ));
    }
}
