//! Service Bootstrap and Initialization
//!
//! This module handles service initialization including:
//! - Command-line arguments
//! - Logging configuration
//! - Storage opening
//! - Configuration validation (`--validate`)

use std::path::PathBuf;

use clap::Parser;
use errors::{ServiceError, ServiceResult};
use tracing::{debug, info};

use crate::config::{ConfigOverrides, PollerConfig, Settings};
use crate::registers::{ValueKind, VariableTable};
use crate::sink::SqliteSink;

/// Command-line arguments for pollsrv
#[derive(Parser, Debug, Clone, Default)]
#[command(
    name = "pollsrv",
    version = env!("CARGO_PKG_VERSION"),
    about = "Modbus data acquisition service",
    long_about = None
)]
pub struct Args {
    /// Device endpoint: tcp://host[:port] or rtu://<serial device>
    #[arg(long)]
    pub target: Option<String>,

    /// Connect/read timeout in milliseconds
    #[arg(long)]
    pub timeout: Option<u64>,

    /// SQLite database file
    #[arg(long)]
    pub database: Option<String>,

    /// Device identifier written with every reading
    #[arg(long)]
    pub device_identifier: Option<String>,

    /// Poll interval (e.g. 30s, 5m, 1h)
    #[arg(long)]
    pub interval: Option<String>,

    /// Serial speed for rtu:// targets
    #[arg(long)]
    pub baud_rate: Option<u32>,

    /// Directory for the rolling log file
    #[arg(long)]
    pub log_dir: Option<String>,

    /// Log to stderr instead of the log file
    #[arg(long)]
    pub logtostderr: bool,

    /// Enable debug logging
    #[arg(long)]
    pub debug: bool,

    /// Poll once and exit
    #[arg(long)]
    pub once: bool,

    /// Poll once, print values, write nothing (implies --once --debug --logtostderr)
    #[arg(long)]
    pub dry_run: bool,

    /// YAML configuration file
    #[arg(short = 'c', long)]
    pub config: Option<PathBuf>,

    /// Validation mode - only validate configuration without starting service
    #[arg(long)]
    pub validate: bool,
}

impl Args {
    /// Flags given on the command line, as the top configuration layer
    pub fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            target: self.target.clone(),
            timeout_ms: self.timeout,
            database: self.database.clone(),
            device_identifier: self.device_identifier.clone(),
            interval: self.interval.clone(),
            baud_rate: self.baud_rate,
            log_dir: self.log_dir.clone(),
            log_to_stderr: self.logtostderr.then_some(true),
            debug: self.debug.then_some(true),
            once: self.once.then_some(true),
            dry_run: self.dry_run.then_some(true),
        }
    }

    /// Layer defaults, file, environment and flags into typed settings
    pub fn load_settings(&self) -> ServiceResult<Settings> {
        let config = PollerConfig::load(self.config.as_deref(), &self.overrides())?;
        Ok(config.resolve()?)
    }
}

/// Initialize logging system from resolved settings
pub fn initialize_logging(settings: &Settings) -> ServiceResult<()> {
    common::logging::init_with_config(settings.log_config())
        .map_err(|e| ServiceError::Configuration(format!("Failed to init logging: {}", e)))?;
    Ok(())
}

/// Load and validate the built-in variable table
pub fn load_variable_table() -> ServiceResult<VariableTable> {
    let table = VariableTable::builtin()?;
    let (values, statuses) = table.kind_counts();
    debug!(
        "Variable table loaded: {} measurements, {} status words",
        values, statuses
    );
    Ok(table)
}

/// Open the SQLite sink and its schema. Dry-run never touches the
/// database file and gets `None`.
pub async fn open_storage(settings: &Settings) -> ServiceResult<Option<SqliteSink>> {
    if settings.dry_run {
        info!(
            "Dry run: database {} left untouched",
            settings.database.display()
        );
        return Ok(None);
    }

    let sink = SqliteSink::open(&settings.database.to_string_lossy())
        .await
        .map_err(|e| {
            ServiceError::StartupFailed(format!(
                "open database {}: {:#}",
                settings.database.display(),
                e
            ))
        })?;
    Ok(Some(sink))
}

/// Summary printed by `--validate`
pub fn describe_configuration(settings: &Settings, table: &VariableTable) -> String {
    let (values, statuses) = table.kind_counts();
    let mut out = format!(
        "target: {}\ninterval: {}\ntimeout: {}\ndatabase: {}\ndevice: {}\nvariables: {} ({} measurements, {} status words)\n",
        settings.endpoint,
        humantime::format_duration(settings.interval),
        humantime::format_duration(settings.timeout),
        settings.database.display(),
        settings.device_id,
        table.len(),
        values,
        statuses,
    );
    for spec in table {
        let unit = match spec.kind {
            ValueKind::Measurement => format!("x{} {}", spec.scale, spec.unit),
            ValueKind::StatusWord => "status".to_string(),
        };
        out.push_str(&format!(
            "  {:<32} unit {:>3} reg {:>5} {:<3} {}\n",
            spec.name,
            spec.unit_id,
            spec.register,
            spec.register_type,
            unit.trim_end()
        ));
    }
    out
}

/// Validation mode: report the configuration and variable table
pub fn validate_configuration(settings: &Settings, table: &VariableTable) {
    println!("{}", describe_configuration(settings, table));
    info!("Configuration validation passed");
}
