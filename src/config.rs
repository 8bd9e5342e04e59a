use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::engine::{EngineSettings, EvidenceSettings};

/// Environment variable overriding the service config path.
pub const CONFIG_ENV: &str = "RISKLENS_CONFIG";

pub const DEFAULT_CONFIG_PATH: &str = "config.toml";

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub engine: EngineConfig,
    pub rules: RulesConfig,
    pub database: DatabaseConfig,
    pub notifications: NotificationConfig,
    pub feed: FeedConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EngineConfig {
    /// Per-alert budget in milliseconds; 0 disables the check.
    pub timeout_ms: u64,
    pub min_samples: usize,
    pub max_evidence_samples: usize,
    /// Evaluations allowed to run at once in the streaming pipeline.
    pub max_in_flight: usize,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RulesConfig {
    pub path: String,
    pub watch: bool,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct NotificationConfig {
    pub enabled: bool,
    pub desktop: bool,
    pub webhook_url: Option<String>,
    /// Minimum gap between notifications for the same address.
    pub cooldown_seconds: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct FeedConfig {
    pub endpoint: String,
    pub topic: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 1000,
            min_samples: 3,
            max_evidence_samples: 5,
            max_in_flight: 8,
        }
    }
}

impl Default for RulesConfig {
    fn default() -> Self {
        Self {
            path: "config/rules.toml".into(),
            watch: true,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "data/decisions.db".into(),
        }
    }
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            desktop: true,
            webhook_url: None,
            cooldown_seconds: 30,
        }
    }
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            endpoint: "tcp://127.0.0.1:5556".into(),
            topic: "alerts".into(),
        }
    }
}

impl EngineConfig {
    pub fn settings(&self) -> EngineSettings {
        EngineSettings {
            budget: (self.timeout_ms > 0).then(|| Duration::from_millis(self.timeout_ms)),
            evidence: EvidenceSettings {
                min_samples: self.min_samples,
                max_evidence_samples: self.max_evidence_samples,
            },
        }
    }
}

impl Config {
    /// Load config from a TOML file. Falls back to defaults if file doesn't exist.
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        if !path.exists() {
            tracing::info!("Config file {} not found, using defaults", path.display());
            return Self::default();
        }
        match std::fs::read_to_string(path) {
            Ok(contents) => match toml::from_str(&contents) {
                Ok(config) => {
                    tracing::info!("Config loaded from {}", path.display());
                    config
                }
                Err(e) => {
                    tracing::warn!("Failed to parse {}: {e}, using defaults", path.display());
                    Self::default()
                }
            },
            Err(e) => {
                tracing::warn!("Failed to read {}: {e}, using defaults", path.display());
                Self::default()
            }
        }
    }

    /// Path from `RISKLENS_CONFIG`, else `config.toml`.
    pub fn path_from_env() -> String {
        std::env::var(CONFIG_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string())
    }
}
