//! Run configuration for reconstruction jobs.
//!
//! Configuration is loaded with precedence: overrides > Env vars > Config file > Defaults
//!
//! # Example config file (chronorust.toml)
//! ```toml
//! partition_count = 64
//! domains = ["enwiki", "dewiki"]
//!
//! [diagnostics]
//! enabled = true
//! max_raw_len = 2048
//! ```

mod defaults;

pub use defaults::*;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Main configuration for a reconstruction run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconstructionConfig {
    /// Number of processing shards
    pub partition_count: usize,
    /// Domains to process; all domains when unset
    pub domains: Option<Vec<String>>,
    /// Diagnostics side output
    pub diagnostics: DiagnosticsConfig,
}

impl Default for ReconstructionConfig {
    fn default() -> Self {
        Self {
            partition_count: default_partition_count(),
            domains: None,
            diagnostics: DiagnosticsConfig::default(),
        }
    }
}

impl ReconstructionConfig {
    /// Load configuration with precedence: overrides > Env > File > Defaults
    ///
    /// # Arguments
    /// * `config_path` - Optional path to TOML config file
    /// * `overrides` - Caller overrides to apply on top
    pub fn load(
        config_path: Option<&str>,
        overrides: ConfigOverrides,
    ) -> Result<Self, ConfigError> {
        let mut figment =
            Figment::new().merge(Serialized::defaults(ReconstructionConfig::default()));

        // Layer 1: Config file (if provided)
        if let Some(path) = config_path {
            figment = figment.merge(Toml::file(path));
        }

        // Layer 2: Environment variables with CHRONORUST_ prefix
        figment = figment.merge(Env::prefixed(ENV_PREFIX).split(ENV_NESTING_SEPARATOR));

        // Layer 3: Caller overrides
        figment = figment.merge(Serialized::defaults(overrides));

        let config: Self = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Load from environment and optional config file only (no overrides)
    pub fn from_env(config_path: Option<&str>) -> Result<Self, ConfigError> {
        Self::load(config_path, ConfigOverrides::default())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.partition_count == 0 {
            return Err(ConfigError {
                message: "partition_count must be greater than zero".to_string(),
            });
        }
        if self.domains.as_ref().is_some_and(|d| d.is_empty()) {
            return Err(ConfigError {
                message: "domains allow-list is empty; omit it to process every domain"
                    .to_string(),
            });
        }
        Ok(())
    }

    /// Whether records of `domain` take part in the run.
    pub fn allows_domain(&self, domain: &str) -> bool {
        self.domains
            .as_ref()
            .map_or(true, |allowed| allowed.iter().any(|d| d == domain))
    }
}

/// Diagnostics side-output configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiagnosticsConfig {
    /// Collect diagnostics rows
    pub enabled: bool,
    /// Truncate raw record text to this many bytes
    pub max_raw_len: usize,
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            enabled: DEFAULT_DIAGNOSTICS_ENABLED,
            max_raw_len: DEFAULT_MAX_RAW_LEN,
        }
    }
}

/// Overrides that take precedence over file and env config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partition_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domains: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnostics: Option<DiagnosticsOverrides>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DiagnosticsOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_raw_len: Option<usize>,
}

/// Configuration error.
#[derive(Debug)]
pub struct ConfigError {
    pub message: String,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "configuration error: {}", self.message)
    }
}

impl std::error::Error for ConfigError {}

impl From<figment::Error> for ConfigError {
    fn from(e: figment::Error) -> Self {
        Self {
            message: e.to_string(),
        }
    }
}
