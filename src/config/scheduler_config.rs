//! Scheduler configuration from environment variables.

use anyhow::{Context, Result};
use chrono::NaiveTime;
use std::env;

use crate::domain::market_hours::MarketHours;

#[derive(Debug, Clone)]
pub struct SchedulerEnvConfig {
    /// How often the periodic ticker examines the task-spec table.
    pub tick_interval_seconds: u64,
    /// Fallback frequency for specs without one.
    pub default_frequency_seconds: i64,
    /// Global switch for market-hours gating of eligible task types.
    pub market_hours_only: bool,
    pub retry_attempts: u32,
    /// First-retry delay for failed tasks; doubles per attempt.
    pub retry_base_delay_seconds: u64,
    /// Upper bound on the retry delay.
    pub retry_max_delay_seconds: u64,
    /// Per-handler execution budget.
    pub handler_timeout_seconds: u64,
    /// How long a running handler may finish after shutdown begins.
    pub shutdown_grace_seconds: u64,
    /// Running tasks older than this are reaped back to pending.
    pub max_run_time_seconds: i64,
    /// Execution-history retention.
    pub max_history: i64,
    /// Idle poll interval of queue workers.
    pub worker_poll_ms: u64,
    pub market_hours: MarketHours,
}

impl SchedulerEnvConfig {
    pub fn from_env() -> Result<Self> {
        let open = Self::parse_time("MARKET_HOURS_START", "09:15")?;
        let close = Self::parse_time("MARKET_HOURS_END", "15:30")?;
        let offset = Self::parse_i64("MARKET_UTC_OFFSET_MINUTES", 330)? as i32;

        Ok(Self {
            tick_interval_seconds: Self::parse_u64("SCHEDULER_TICK_INTERVAL_SECONDS", 5)?,
            default_frequency_seconds: Self::parse_i64("SCHEDULER_DEFAULT_FREQUENCY_SECONDS", 3600)?,
            market_hours_only: Self::parse_bool("SCHEDULER_MARKET_HOURS_ONLY", true),
            retry_attempts: Self::parse_u32("SCHEDULER_RETRY_ATTEMPTS", 3)?,
            retry_base_delay_seconds: Self::parse_u64("SCHEDULER_RETRY_BASE_DELAY_SECONDS", 1)?,
            retry_max_delay_seconds: Self::parse_u64("SCHEDULER_RETRY_MAX_DELAY_SECONDS", 300)?,
            handler_timeout_seconds: Self::parse_u64("SCHEDULER_HANDLER_TIMEOUT_SECONDS", 300)?,
            shutdown_grace_seconds: Self::parse_u64("SCHEDULER_SHUTDOWN_GRACE_SECONDS", 30)?,
            max_run_time_seconds: Self::parse_i64("SCHEDULER_MAX_RUN_TIME_SECONDS", 1800)?,
            max_history: Self::parse_i64("SCHEDULER_MAX_HISTORY", 100)?,
            worker_poll_ms: Self::parse_u64("SCHEDULER_WORKER_POLL_MS", 500)?,
            market_hours: MarketHours::new(open, close, offset),
        })
    }

    fn parse_time(key: &str, default: &str) -> Result<NaiveTime> {
        let raw = env::var(key).unwrap_or_else(|_| default.to_string());
        NaiveTime::parse_from_str(&raw, "%H:%M")
            .context(format!("Failed to parse {} (expected HH:MM)", key))
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

    fn parse_i64(key: &str, default: i64) -> Result<i64> {
        env::var(key)
            .unwrap_or_else(|_| default.to_string())
            .parse::<i64>()
            .context(format!("Failed to parse {}", key))
    }

    fn parse_bool(key: &str, default: bool) -> bool {
        env::var(key)
            .unwrap_or_else(|_| default.to_string())
            .parse::<bool>()
            .unwrap_or(default)
    }
}
