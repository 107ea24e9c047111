//! Process configuration
//!
//! Layering, lowest to highest precedence: built-in defaults, optional YAML
//! file, `POLLSRV_*` environment variables, command-line flags.

use std::path::{Path, PathBuf};
use std::time::Duration;

use common::logging::{LogConfig, LogDestination};
use figment::{
    providers::{Env, Format, Serialized, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};
use tracing::Level;

use crate::cycle::CycleOptions;
use crate::error::{PollError, Result};
use crate::scheduler::SchedulerMode;
use crate::session::{Endpoint, DEFAULT_BAUD_RATE};

pub const SERVICE_NAME: &str = "pollsrv";
pub const ENV_PREFIX: &str = "POLLSRV_";

/// Raw, layered configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollerConfig {
    /// `tcp://host[:port]` or `rtu://<device>`
    pub target: Option<String>,
    /// Per connect/read timeout in milliseconds
    pub timeout_ms: u64,
    /// SQLite database file
    pub database: String,
    /// Written to the `device` column
    pub device_identifier: String,
    /// Poll interval, e.g. `30s`, `5m`, `1h 30m`
    pub interval: String,
    pub baud_rate: u32,
    pub log_dir: String,
    pub log_to_stderr: bool,
    pub debug: bool,
    pub once: bool,
    pub dry_run: bool,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            target: None,
            timeout_ms: 1000,
            database: "db.sqlite".to_string(),
            device_identifier: "solar".to_string(),
            interval: "5m".to_string(),
            baud_rate: DEFAULT_BAUD_RATE,
            log_dir: "logs".to_string(),
            log_to_stderr: false,
            debug: false,
            once: false,
            dry_run: false,
        }
    }
}

/// Values given on the command line; unset fields leave lower layers alone
#[derive(Debug, Clone, Default, Serialize)]
pub struct ConfigOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_identifier: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interval: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub baud_rate: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_dir: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_to_stderr: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debug: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub once: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dry_run: Option<bool>,
}

impl PollerConfig {
    /// Defaults + YAML file + environment
    pub fn figment(config_file: Option<&Path>) -> Result<Figment> {
        let mut figment = Figment::new().merge(Serialized::defaults(PollerConfig::default()));

        if let Some(path) = config_file {
            if !path.exists() {
                return Err(PollError::config(format!(
                    "config file {} not found",
                    path.display()
                )));
            }
            figment = figment.merge(Yaml::file(path));
        }

        Ok(figment.merge(Env::prefixed(ENV_PREFIX)))
    }

    /// Load every layer, with `overrides` on top
    pub fn load(config_file: Option<&Path>, overrides: &ConfigOverrides) -> Result<Self> {
        let config: PollerConfig = Self::figment(config_file)?
            .merge(Serialized::globals(overrides))
            .extract()?;
        Ok(config)
    }

    /// Check and type every field
    pub fn resolve(&self) -> Result<Settings> {
        let target = self
            .target
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| PollError::config("--target is required"))?;
        let endpoint = Endpoint::parse(target)?;

        let interval = humantime::parse_duration(self.interval.trim()).map_err(|e| {
            PollError::config(format!("invalid --interval '{}': {}", self.interval, e))
        })?;
        if interval.is_zero() {
            return Err(PollError::config("--interval must be greater than zero"));
        }

        if self.timeout_ms == 0 {
            return Err(PollError::config("--timeout must be greater than zero"));
        }

        if self.device_identifier.trim().is_empty() {
            return Err(PollError::config("--device-identifier must not be empty"));
        }

        if self.database.trim().is_empty() {
            return Err(PollError::config("--database must not be empty"));
        }

        // Dry-run is a diagnostic bundle: one verbose pass to the console
        let dry_run = self.dry_run;

        Ok(Settings {
            endpoint,
            timeout: Duration::from_millis(self.timeout_ms),
            database: PathBuf::from(&self.database),
            device_id: self.device_identifier.clone(),
            interval,
            baud_rate: self.baud_rate,
            log_dir: PathBuf::from(&self.log_dir),
            log_to_stderr: self.log_to_stderr || dry_run,
            debug: self.debug || dry_run,
            once: self.once || dry_run,
            dry_run,
        })
    }
}

/// Validated runtime settings
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub endpoint: Endpoint,
    pub timeout: Duration,
    pub database: PathBuf,
    pub device_id: String,
    pub interval: Duration,
    pub baud_rate: u32,
    pub log_dir: PathBuf,
    pub log_to_stderr: bool,
    pub debug: bool,
    pub once: bool,
    pub dry_run: bool,
}

impl Settings {
    pub fn cycle_options(&self) -> CycleOptions {
        CycleOptions::new(self.device_id.clone()).dry_run(self.dry_run)
    }

    pub fn scheduler_mode(&self) -> SchedulerMode {
        if self.once {
            SchedulerMode::RunOnce
        } else {
            SchedulerMode::Continuous
        }
    }

    pub fn log_level(&self) -> Level {
        if self.debug {
            Level::DEBUG
        } else {
            Level::INFO
        }
    }

    pub fn log_config(&self) -> LogConfig {
        let destination = if self.log_to_stderr {
            LogDestination::Console
        } else {
            LogDestination::File {
                dir: self.log_dir.clone(),
            }
        };
        LogConfig {
            service_name: SERVICE_NAME.to_string(),
            destination,
            level: self.log_level(),
            with_timestamp: !self.dry_run,
        }
    }
}
