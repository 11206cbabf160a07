//! Configuration for lakehouse-control.

use std::time::Duration;

use figment::providers::{Env, Format, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::error::{ControlError, ControlResult};

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ControlConfig {
    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Deployment pipeline configuration.
    #[serde(default)]
    pub deployment: DeploymentConfig,

    /// Session defaults.
    #[serde(default)]
    pub session: SessionConfig,
}

impl ControlConfig {
    /// Load configuration from the default sources.
    ///
    /// Configuration is loaded in the following order (later sources override earlier):
    /// 1. Default values
    /// 2. `lakehouse.toml` in the current directory (if present)
    /// 3. Environment variables with `LAKEHOUSE_CONTROL_` prefix
    pub fn load() -> ControlResult<Self> {
        Self::from_file("lakehouse.toml")
    }

    /// Load configuration from a specific TOML file.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> ControlResult<Self> {
        let config: Self = Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("LAKEHOUSE_CONTROL_").split("__"))
            .extract()
            .map_err(|e| ControlError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints serde cannot express.
    pub fn validate(&self) -> ControlResult<()> {
        if self.deployment.stages.is_empty() {
            return Err(ControlError::Config(
                "deployment.stages must list at least one stage".to_owned(),
            ));
        }
        if self.deployment.poll_interval_ms == 0 {
            return Err(ControlError::Config(
                "deployment.poll_interval_ms must be positive".to_owned(),
            ));
        }
        let mut names: Vec<&str> = self
            .deployment
            .stages
            .iter()
            .map(|s| s.name.as_str())
            .collect();
        names.sort_unstable();
        if let Some(pair) = names.windows(2).find(|pair| pair[0] == pair[1]) {
            return Err(ControlError::Config(format!(
                "duplicate deployment stage: {}",
                pair[0]
            )));
        }
        Ok(())
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Default `tracing` filter directive, overridden by `RUST_LOG`.
    #[serde(default = "default_filter")]
    pub filter: String,
}

fn default_filter() -> String {
    "lakehouse_control=info".to_owned()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_filter(),
        }
    }
}

/// One stage of the remote deployment pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageConfig {
    /// Stable identifier passed to the pipeline probe.
    pub name: String,
    /// Label shown for the stage's operation.
    pub label: String,
}

impl StageConfig {
    #[must_use]
    pub fn new(name: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            label: label.into(),
        }
    }
}

/// Deployment pipeline configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DeploymentConfig {
    /// How often each running stage is polled (milliseconds).
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Time a single stage may take before it fails with a timeout (seconds).
    #[serde(default = "default_stage_timeout_secs")]
    pub stage_timeout_secs: u64,

    /// Stages run in order for every attempt.
    #[serde(default = "default_stages")]
    pub stages: Vec<StageConfig>,
}

const fn default_poll_interval_ms() -> u64 {
    2_000
}

const fn default_stage_timeout_secs() -> u64 {
    900 // 15 minutes, stack creation is slow
}

fn default_stages() -> Vec<StageConfig> {
    vec![
        StageConfig::new("iam_roles", "Create cross-account roles"),
        StageConfig::new("lake_stack", "Create data lake stack"),
        StageConfig::new("log_ingestion", "Configure log ingestion"),
        StageConfig::new("ingestion_pipeline", "Start ingestion pipeline"),
    ]
}

impl DeploymentConfig {
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    #[must_use]
    pub const fn stage_timeout(&self) -> Duration {
        Duration::from_secs(self.stage_timeout_secs)
    }
}

impl Default for DeploymentConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            stage_timeout_secs: default_stage_timeout_secs(),
            stages: default_stages(),
        }
    }
}

/// Session defaults.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// Region used when an installation does not name one.
    #[serde(default = "default_region")]
    pub default_region: String,
}

fn default_region() -> String {
    "us-east-1".to_owned()
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            default_region: default_region(),
        }
    }
}
