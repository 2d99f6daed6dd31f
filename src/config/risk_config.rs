//! Risk-limit configuration from environment variables.

use anyhow::{Context, Result};
use std::env;

#[derive(Debug, Clone)]
pub struct RiskEnvConfig {
    pub max_position_size_percent: f64,
    pub max_portfolio_risk_percent: f64,
    pub max_single_symbol_exposure_percent: f64,
    pub stop_loss_percent: f64,
    pub max_daily_trades: u32,
    pub max_daily_loss_percent: f64,
}

impl RiskEnvConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            max_position_size_percent: Self::parse_f64("MAX_POSITION_SIZE_PERCENT", 5.0)?,
            max_portfolio_risk_percent: Self::parse_f64("MAX_PORTFOLIO_RISK_PERCENT", 10.0)?,
            max_single_symbol_exposure_percent: Self::parse_f64(
                "MAX_SINGLE_SYMBOL_EXPOSURE_PERCENT",
                15.0,
            )?,
            stop_loss_percent: Self::parse_f64("STOP_LOSS_PERCENT", 2.0)?,
            max_daily_trades: Self::parse_u32("MAX_DAILY_TRADES", 10)?,
            max_daily_loss_percent: Self::parse_f64("MAX_DAILY_LOSS_PERCENT", 3.0)?,
        })
    }

    fn parse_f64(key: &str, default: f64) -> Result<f64> {
        env::var(key)
            .unwrap_or_else(|_| default.to_string())
            .parse::<f64>()
            .context(format!("Failed to parse {}", key))
    }

    fn parse_u32(key: &str, default: u32) -> Result<u32> {
        env::var(key)
            .unwrap_or_else(|_| default.to_string())
            .parse::<u32>()
            .context(format!("Failed to parse {}", key))
    }
}
