//! Zone configuration, persisted as TOML.
//!
//! ```toml
//! zone_id = "zone0"
//! workers = 4
//!
//! [load]
//! operations_per_second = 50
//! permissions_probability = 0.8
//! exit_on_fail = false
//! seed = 7
//! ```
//!
//! Every field has a default, so an empty file is a valid config. The
//! `ZONE_ID` environment variable overrides `zone_id`.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};
use crate::graph::ZoneId;

/// Environment variable naming the local zone.
pub const ZONE_ID_ENV: &str = "ZONE_ID";

/// Per-process configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneConfig {
    /// The zone this process serves. Enables zone affinity when set.
    #[serde(default)]
    pub zone_id: Option<ZoneId>,
    /// Dispatcher worker threads.
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default)]
    pub load: LoadConfig,
}

/// Settings for the constant-rate load runner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadConfig {
    #[serde(default = "default_operations_per_second")]
    pub operations_per_second: u32,
    /// Chance that an operation replaces permissions instead of toggling an edge.
    #[serde(default = "default_permissions_probability")]
    pub permissions_probability: f64,
    /// Stop at the first failed operation.
    #[serde(default)]
    pub exit_on_fail: bool,
    /// Fixed RNG seed for reproducible runs.
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default = "default_report_interval_secs")]
    pub report_interval_secs: u64,
}

fn default_workers() -> usize {
    4
}
fn default_operations_per_second() -> u32 {
    10
}
fn default_permissions_probability() -> f64 {
    0.8
}
fn default_report_interval_secs() -> u64 {
    1
}

impl Default for ZoneConfig {
    fn default() -> Self {
        Self {
            zone_id: None,
            workers: default_workers(),
            load: LoadConfig::default(),
        }
    }
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            operations_per_second: default_operations_per_second(),
            permissions_probability: default_permissions_probability(),
            exit_on_fail: false,
            seed: None,
            report_interval_secs: default_report_interval_secs(),
        }
    }
}

impl ZoneConfig {
    /// Load from a TOML file.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            source: e,
        })?;
        Self::parse(&content, path)
    }

    fn parse(content: &str, path: &Path) -> ConfigResult<Self> {
        let config: Self = toml::from_str(content).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Save to a TOML file.
    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        let content = toml::to_string_pretty(self).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Write {
                path: parent.display().to_string(),
                source: e,
            })?;
        }
        std::fs::write(path, content).map_err(|e| ConfigError::Write {
            path: path.display().to_string(),
            source: e,
        })
    }

    /// Replace `zone_id` when `zone` is set and non-empty.
    pub fn with_zone_override(mut self, zone: Option<String>) -> Self {
        if let Some(zone) = zone.filter(|z| !z.trim().is_empty()) {
            self.zone_id = Some(ZoneId::new(zone.trim()));
        }
        self
    }

    /// Apply the `ZONE_ID` environment override.
    pub fn apply_env(self) -> Self {
        self.with_zone_override(std::env::var(ZONE_ID_ENV).ok())
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.workers == 0 {
            return Err(ConfigError::Invalid {
                message: "workers must be at least 1".into(),
            });
        }
        let p = self.load.permissions_probability;
        if !(0.0..=1.0).contains(&p) {
            return Err(ConfigError::Invalid {
                message: format!("load.permissions_probability must be within [0, 1], got {p}"),
            });
        }
        if self.load.operations_per_second == 0 {
            return Err(ConfigError::Invalid {
                message: "load.operations_per_second must be at least 1".into(),
            });
        }
        if self.load.report_interval_secs == 0 {
            return Err(ConfigError::Invalid {
                message: "load.report_interval_secs must be at least 1".into(),
            });
        }
        Ok(())
    }
}
