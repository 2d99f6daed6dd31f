//! Backup configuration from environment variables.

use anyhow::{Context, Result};
use std::env;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct BackupEnvConfig {
    pub enabled: bool,
    pub interval_hours: f64,
    pub max_backups: usize,
    /// Defaults to `<db dir>/backups` when unset.
    pub backup_dir: Option<PathBuf>,
}

impl BackupEnvConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            enabled: Self::parse_bool("BACKUP_ENABLED", true),
            interval_hours: Self::parse_f64("BACKUP_INTERVAL_HOURS", 6.0)?,
            max_backups: Self::parse_usize("MAX_BACKUPS", 7)?,
            backup_dir: env::var("BACKUP_DIR").ok().map(PathBuf::from),
        })
    }

    fn parse_usize(key: &str, default: usize) -> Result<usize> {
        env::var(key)
            .unwrap_or_else(|_| default.to_string())
            .parse::<usize>()
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
