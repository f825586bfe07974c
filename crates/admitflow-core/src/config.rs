//! Admitflow configuration system.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{AdmitflowError, Result};

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AdmitflowConfig {
    #[serde(default)]
    pub deadline: DeadlineConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
}

impl AdmitflowConfig {
    /// Load config from the default path (~/.admitflow/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| AdmitflowError::Config(format!("Failed to read config: {e}")))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| AdmitflowError::Config(format!("Failed to parse config: {e}")))?;
        Ok(config)
    }

    /// Save config to the default path.
    pub fn save(&self) -> Result<()> {
        let path = Self::default_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| AdmitflowError::Config(format!("Failed to serialize config: {e}")))?;
        std::fs::write(&path, content)?;
        Ok(())
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the Admitflow home directory (~/.admitflow).
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".admitflow")
    }
}

/// Deadline engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadlineConfig {
    /// Seconds between sweep cycles.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
    /// Max deadlines processed concurrently per cycle.
    #[serde(default = "default_concurrency")]
    pub sweep_concurrency: usize,
    /// Wall-clock budget per cycle; unfinished items defer to the next cycle.
    #[serde(default = "default_cycle_budget")]
    pub cycle_budget_secs: u64,
    /// SQLite database path.
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

fn default_sweep_interval() -> u64 {
    300
}
fn default_concurrency() -> usize {
    8
}
fn default_cycle_budget() -> u64 {
    60
}
fn default_db_path() -> String {
    "~/.admitflow/deadlines.db".into()
}

impl Default for DeadlineConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: default_sweep_interval(),
            sweep_concurrency: default_concurrency(),
            cycle_budget_secs: default_cycle_budget(),
            db_path: default_db_path(),
        }
    }
}

/// Outbound notification configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct NotifyConfig {
    /// When set, reminders and expiry notices POST to this webhook.
    /// Empty means log-only delivery.
    #[serde(default)]
    pub webhook_url: String,
    /// Extra headers for the webhook request.
    #[serde(default)]
    pub webhook_headers: Vec<(String, String)>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = AdmitflowConfig::default();
        assert_eq!(cfg.deadline.sweep_interval_secs, 300);
        assert_eq!(cfg.deadline.sweep_concurrency, 8);
        assert!(cfg.notify.webhook_url.is_empty());
    }

    #[test]
    fn test_parse_partial_toml() {
        let cfg: AdmitflowConfig = toml::from_str(
            "[deadline]\nsweep_interval_secs = 60\n",
        )
        .unwrap();
        assert_eq!(cfg.deadline.sweep_interval_secs, 60);
        // Unspecified fields fall back to defaults
        assert_eq!(cfg.deadline.cycle_budget_secs, 60);
        assert_eq!(cfg.deadline.db_path, "~/.admitflow/deadlines.db");
    }
}
