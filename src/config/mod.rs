//! Configuration module for marketmind.
//!
//! Structured configuration loading from environment variables, organized by
//! domain: provider API, risk limits, scheduler, and backups.

mod api_config;
mod backup_config;
mod risk_config;
mod scheduler_config;

pub use api_config::ApiEnvConfig;
pub use backup_config::BackupEnvConfig;
pub use risk_config::RiskEnvConfig;
pub use scheduler_config::SchedulerEnvConfig;

use anyhow::{Context, Result};
use std::env;
use std::str::FromStr;

/// Execution environment. `Live` tightens validation: missing provider
/// credentials become a fatal startup error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    DryRun,
    Paper,
    Live,
}

impl FromStr for Environment {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dry-run" | "dryrun" => Ok(Environment::DryRun),
            "paper" => Ok(Environment::Paper),
            "live" => Ok(Environment::Live),
            _ => anyhow::bail!(
                "Invalid MARKETMIND_ENV: {}. Must be 'dry-run', 'paper', or 'live'",
                s
            ),
        }
    }
}

/// Main application configuration, aggregated from the sub-modules.
#[derive(Debug, Clone)]
pub struct Config {
    pub environment: Environment,
    pub database_url: String,
    pub api: ApiEnvConfig,
    pub risk: RiskEnvConfig,
    pub scheduler: SchedulerEnvConfig,
    pub backup: BackupEnvConfig,
}

impl Config {
    /// Load configuration from environment variables and validate it for
    /// the selected environment.
    pub fn from_env() -> Result<Self> {
        let env_str = env::var("MARKETMIND_ENV").unwrap_or_else(|_| "dry-run".to_string());
        let environment = Environment::from_str(&env_str)?;

        let database_url =
            env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite://marketmind.db".to_string());

        let config = Self {
            environment,
            database_url,
            api: ApiEnvConfig::from_env().context("Failed to load provider API config")?,
            risk: RiskEnvConfig::from_env().context("Failed to load risk config")?,
            scheduler: SchedulerEnvConfig::from_env().context("Failed to load scheduler config")?,
            backup: BackupEnvConfig::from_env().context("Failed to load backup config")?,
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.environment == Environment::Live && self.api.api_keys.is_empty() {
            anyhow::bail!(
                "No provider API keys configured (PROVIDER_API_KEY_1..). \
                 Credentials are required in the live environment."
            );
        }
        if self.api.requests_per_minute == 0 {
            anyhow::bail!("PROVIDER_REQUESTS_PER_MINUTE must be at least 1");
        }
        if self.scheduler.tick_interval_seconds == 0 {
            anyhow::bail!("SCHEDULER_TICK_INTERVAL_SECONDS must be at least 1");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_environment_parsing() {
        assert_eq!(
            "dry-run".parse::<Environment>().unwrap(),
            Environment::DryRun
        );
        assert_eq!("PAPER".parse::<Environment>().unwrap(), Environment::Paper);
        assert_eq!("live".parse::<Environment>().unwrap(), Environment::Live);
        assert!("prod".parse::<Environment>().is_err());
    }

    #[test]
    fn test_config_defaults() {
        let config = Config::from_env().expect("Should parse with defaults");
        assert_eq!(config.environment, Environment::DryRun);
        assert_eq!(config.api.requests_per_minute, 50);
        assert_eq!(config.api.failure_threshold, 5);
        assert_eq!(config.backup.max_backups, 7);
        assert_eq!(config.scheduler.max_history, 100);
    }
}
