//! External-provider client configuration from environment variables.

use anyhow::{Context, Result};
use std::env;

/// Provider client environment configuration: API keys, rate limiting,
/// retry, and circuit breaker parameters.
#[derive(Debug, Clone)]
pub struct ApiEnvConfig {
    pub api_keys: Vec<String>,
    pub base_url: String,
    pub model: String,

    // Rate limiting
    pub requests_per_minute: usize,
    pub burst_limit: usize,
    pub cooldown_seconds: u64,

    // Circuit breaker
    pub failure_threshold: u32,
    pub recovery_timeout_seconds: u64,

    // Retry
    pub max_retries: u32,
    pub initial_backoff_seconds: f64,
    pub max_backoff_seconds: f64,
    pub jitter_enabled: bool,

    pub request_timeout_seconds: u64,
}

impl ApiEnvConfig {
    pub fn from_env() -> Result<Self> {
        // Keys are numbered; gaps end the scan.
        let mut api_keys = Vec::new();
        for i in 1..=8 {
            match env::var(format!("PROVIDER_API_KEY_{}", i)) {
                Ok(key) if !key.trim().is_empty() => api_keys.push(key),
                _ => break,
            }
        }

        Ok(Self {
            api_keys,
            base_url: env::var("PROVIDER_BASE_URL")
                .unwrap_or_else(|_| "https://api.perplexity.ai/chat/completions".to_string()),
            model: env::var("PROVIDER_MODEL").unwrap_or_else(|_| "sonar-pro".to_string()),
            requests_per_minute: Self::parse_usize("PROVIDER_REQUESTS_PER_MINUTE", 50)?,
            burst_limit: Self::parse_usize("PROVIDER_BURST_LIMIT", 10)?,
            cooldown_seconds: Self::parse_u64("PROVIDER_COOLDOWN_SECONDS", 60)?,
            failure_threshold: Self::parse_u32("PROVIDER_FAILURE_THRESHOLD", 5)?,
            recovery_timeout_seconds: Self::parse_u64("PROVIDER_RECOVERY_TIMEOUT_SECONDS", 60)?,
            max_retries: Self::parse_u32("PROVIDER_MAX_RETRIES", 5)?,
            initial_backoff_seconds: Self::parse_f64("PROVIDER_INITIAL_BACKOFF_SECONDS", 2.0)?,
            max_backoff_seconds: Self::parse_f64("PROVIDER_MAX_BACKOFF_SECONDS", 120.0)?,
            jitter_enabled: Self::parse_bool("PROVIDER_JITTER_ENABLED", true),
            request_timeout_seconds: Self::parse_u64("PROVIDER_REQUEST_TIMEOUT_SECONDS", 45)?,
        })
    }

    fn parse_usize(key: &str, default: usize) -> Result<usize> {
        env::var(key)
            .unwrap_or_else(|_| default.to_string())
            .parse::<usize>()
            .context(format!("Failed to parse {}", key))
    }

    fn parse_u32(key: &str, default: u32) -> Result<u32> {
        env::var(key)
            .unwrap_or_else(|_| default.to_string())
            .parse::<u32>()
            .context(format!("Failed to parse {}", key))
    }

    fn parse_u64(key: &str, default: u64) -> Result<u64> {
        env::var(key)
            .unwrap_or_else(|_| default.to_string())
            .parse::<u64>()
            .context(format!("Failed to parse {}", key))
    }

    fn parse_f64(key: &str, default: f64) -> Result<f64> {
        env::var(key)
            .unwrap_or_else(|_| default.to_string())
            .parse::<f64>()
            .context(format!("Failed to parse {}", key))
    }

    fn parse_bool(key: &str, default: bool) -> bool {
        env::var(key)
            .unwrap_or_else(|_| default.to_string())
            .parse::<bool>()
            .unwrap_or(default)
    }
}
