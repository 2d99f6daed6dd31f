use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::domain::errors::ApiError;

/// Per-key health and usage counters.
///
/// Invariant: `total_requests == successful_requests + failed_requests`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ApiKeyMetrics {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub consecutive_failures: u32,
    pub rate_limit_hits: u64,
    pub last_used: Option<DateTime<Utc>>,
}

/// Keys with this many consecutive failures are skipped by scoring until
/// every key is unhealthy.
const UNHEALTHY_THRESHOLD: u32 = 3;

struct RotatorState {
    keys: Vec<String>,
    metrics: Vec<ApiKeyMetrics>,
    current_index: usize,
}

/// Selects the healthiest API key for each request and tracks outcomes.
///
/// Scoring: `consecutive_failures * 10 + hours_since_last_use`, lowest wins;
/// unused keys score as just their failure penalty. When every key is past
/// the unhealthy threshold the rotator degrades to plain round-robin so
/// traffic keeps flowing.
pub struct KeyRotator {
    state: Mutex<RotatorState>,
}

impl KeyRotator {
    pub fn new(keys: Vec<String>) -> Self {
        if keys.is_empty() {
            warn!("No API keys provided to KeyRotator");
        }
        let metrics = keys.iter().map(|_| ApiKeyMetrics::default()).collect();
        Self {
            state: Mutex::new(RotatorState {
                keys,
                metrics,
                current_index: 0,
            }),
        }
    }

    pub async fn key_count(&self) -> usize {
        self.state.lock().await.keys.len()
    }

    /// Pick the next key to use. Errors when no keys are configured.
    pub async fn next_key(&self) -> Result<(usize, String), ApiError> {
        let mut state = self.state.lock().await;
        if state.keys.is_empty() {
            return Err(ApiError::NoKeysAvailable);
        }

        let now = Utc::now();
        let mut best: Option<(usize, f64)> = None;
        for (i, m) in state.metrics.iter().enumerate() {
            if m.consecutive_failures >= UNHEALTHY_THRESHOLD {
                continue;
            }
            let mut score = m.consecutive_failures as f64 * 10.0;
            if let Some(last_used) = m.last_used {
                score += (now - last_used).num_seconds().max(0) as f64 / 3600.0;
            }
            if best.map(|(_, s)| score < s).unwrap_or(true) {
                best = Some((i, score));
            }
        }

        let index = match best {
            Some((i, _)) => i,
            None => {
                // Every key is unhealthy; fall back to round-robin.
                let i = state.current_index % state.keys.len();
                state.current_index = (i + 1) % state.keys.len();
                i
            }
        };

        state.current_index = index;
        Ok((index, state.keys[index].clone()))
    }

    pub async fn record_success(&self, index: usize) {
        let mut state = self.state.lock().await;
        if let Some(m) = state.metrics.get_mut(index) {
            m.total_requests += 1;
            m.successful_requests += 1;
            m.consecutive_failures = 0;
            m.last_used = Some(Utc::now());
        }
    }

    pub async fn record_failure(&self, index: usize, rate_limited: bool) {
        let mut state = self.state.lock().await;
        if let Some(m) = state.metrics.get_mut(index) {
            m.total_requests += 1;
            m.failed_requests += 1;
            m.consecutive_failures += 1;
            m.last_used = Some(Utc::now());
            if rate_limited {
                m.rate_limit_hits += 1;
            }
        }
    }

    /// Advance past a key that just errored so the next attempt starts from
    /// a different one.
    pub async fn rotate_on_error(&self, index: usize) {
        let mut state = self.state.lock().await;
        if state.keys.is_empty() {
            return;
        }
        state.current_index = (index + 1) % state.keys.len();
        info!("Rotated to API key index {}", state.current_index);
    }

    pub async fn metrics(&self) -> Vec<ApiKeyMetrics> {
        self.state.lock().await.metrics.clone()
    }

    /// Administrative reset of all per-key counters.
    pub async fn reset_metrics(&self) {
        let mut state = self.state.lock().await;
        for m in state.metrics.iter_mut() {
            *m = ApiKeyMetrics::default();
        }
        info!("API key metrics reset");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rotator(n: usize) -> KeyRotator {
        KeyRotator::new((0..n).map(|i| format!("key-{}", i)).collect())
    }

    #[tokio::test]
    async fn test_no_keys_is_an_error() {
        let r = KeyRotator::new(vec![]);
        assert!(matches!(
            r.next_key().await,
            Err(ApiError::NoKeysAvailable)
        ));
    }

    #[tokio::test]
    async fn test_unhealthy_key_is_skipped() {
        let r = rotator(2);
        for _ in 0..3 {
            r.record_failure(0, false).await;
        }
        let (idx, _) = r.next_key().await.unwrap();
        assert_eq!(idx, 1);
    }

    #[tokio::test]
    async fn test_all_unhealthy_falls_back_to_round_robin() {
        let r = rotator(2);
        for i in 0..2 {
            for _ in 0..3 {
                r.record_failure(i, false).await;
            }
        }
        let (a, _) = r.next_key().await.unwrap();
        let (b, _) = r.next_key().await.unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_metrics_invariant_holds() {
        let r = rotator(1);
        r.record_success(0).await;
        r.record_failure(0, true).await;
        r.record_success(0).await;

        let m = &r.metrics().await[0];
        assert_eq!(m.total_requests, 3);
        assert_eq!(
            m.total_requests,
            m.successful_requests + m.failed_requests
        );
        assert_eq!(m.rate_limit_hits, 1);
        assert_eq!(m.consecutive_failures, 0);
    }

    #[tokio::test]
    async fn test_success_clears_consecutive_failures() {
        let r = rotator(1);
        r.record_failure(0, false).await;
        r.record_failure(0, false).await;
        r.record_success(0).await;
        assert_eq!(r.metrics().await[0].consecutive_failures, 0);
    }
}
