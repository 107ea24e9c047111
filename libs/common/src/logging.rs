//! Unified logging module for SolarPoll services
//!
//! Console output goes to stderr; daemon output goes to a daily rolling file
//! written by a non-blocking worker.

use std::path::PathBuf;
use std::sync::{Mutex, OnceLock};

use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt::{self, format::Writer, FmtContext, FormatEvent, FormatFields},
    layer::SubscriberExt,
    registry::LookupSpan,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

/// Custom format for log level with brackets: `[INFO]`, `[WARN]`, etc.
fn format_level(level: &Level) -> &'static str {
    match *level {
        Level::TRACE => "[TRACE]",
        Level::DEBUG => "[DEBUG]",
        Level::INFO => "[INFO]",
        Level::WARN => "[WARN]",
        Level::ERROR => "[ERROR]",
    }
}

/// Custom event formatter that outputs: `timestamp [LEVEL] message`
///
/// Example output: `2025-12-02T00:50:44.809123Z [INFO] Service started`
struct BracketedLevelFormat {
    with_timestamp: bool,
}

impl<S, N> FormatEvent<S, N> for BracketedLevelFormat
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> std::fmt::Result {
        if self.with_timestamp {
            let now = chrono::Utc::now();
            write!(writer, "{} ", now.format("%Y-%m-%dT%H:%M:%S%.6fZ"))?;
        }

        // Format level with brackets and color
        let level = *event.metadata().level();
        if writer.has_ansi_escapes() {
            let color = match level {
                Level::TRACE => "\x1b[35m", // magenta
                Level::DEBUG => "\x1b[34m", // blue
                Level::INFO => "\x1b[32m",  // green
                Level::WARN => "\x1b[33m",  // yellow
                Level::ERROR => "\x1b[31m", // red
            };
            write!(writer, "{}{}\x1b[0m ", color, format_level(&level))?;
        } else {
            write!(writer, "{} ", format_level(&level))?;
        }

        ctx.field_format().format_fields(writer.by_ref(), event)?;

        writeln!(writer)
    }
}

// Keeps the non-blocking file worker alive for the process lifetime
static GUARDS: OnceLock<Mutex<Vec<WorkerGuard>>> = OnceLock::new();

/// Where log events are written
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogDestination {
    /// stderr, colored
    Console,
    /// Daily rolling file `<dir>/<service>.log.YYYY-MM-DD`
    File { dir: PathBuf },
}

/// Logger configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Service name (e.g., "pollsrv"), used as the log file prefix
    pub service_name: String,
    /// Log sink
    pub destination: LogDestination,
    /// Default level when `RUST_LOG` is not set
    pub level: Level,
    /// Prefix every line with a UTC timestamp
    pub with_timestamp: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            service_name: "unknown".to_string(),
            destination: LogDestination::Console,
            level: Level::INFO,
            with_timestamp: true,
        }
    }
}

/// Filter directive used when `RUST_LOG` is not set.
///
/// sqlx statement logging is capped at `warn` so verbose mode stays readable.
pub fn default_filter_directive(level: Level) -> String {
    format!("{},sqlx=warn", level.to_string().to_lowercase())
}

fn build_filter(level: Level) -> EnvFilter {
    match std::env::var("RUST_LOG") {
        Ok(env_str) if !env_str.trim().is_empty() => EnvFilter::new(env_str),
        _ => EnvFilter::new(default_filter_directive(level)),
    }
}

/// Initialize logging system with configuration
pub fn init_with_config(config: LogConfig) -> Result<(), Box<dyn std::error::Error>> {
    let registry = tracing_subscriber::registry().with(build_filter(config.level));
    let format = BracketedLevelFormat {
        with_timestamp: config.with_timestamp,
    };

    let layer = match &config.destination {
        LogDestination::Console => fmt::layer()
            .with_writer(std::io::stderr)
            .with_ansi(true)
            .event_format(format)
            .boxed(),
        LogDestination::File { dir } => {
            std::fs::create_dir_all(dir)?;
            let appender =
                tracing_appender::rolling::daily(dir, format!("{}.log", config.service_name));
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);

            let guards = GUARDS.get_or_init(|| Mutex::new(Vec::new()));
            match guards.lock() {
                Ok(mut guards) => guards.push(guard),
                Err(poisoned) => {
                    eprintln!("Warning: GUARDS lock was poisoned, recovering...");
                    poisoned.into_inner().push(guard);
                },
            }

            fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .event_format(format)
                .boxed()
        },
    };

    registry.with(layer).try_init()?;
    Ok(())
}

/// Console-only logging, used before the full configuration is known
pub fn init_console(level: Level) -> Result<(), Box<dyn std::error::Error>> {
    init_with_config(LogConfig {
        service_name: "console".to_string(),
        destination: LogDestination::Console,
        level,
        with_timestamp: true,
    })
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_format_level() {
        assert_eq!(format_level(&Level::INFO), "[INFO]");
        assert_eq!(format_level(&Level::ERROR), "[ERROR]");
        assert_eq!(format_level(&Level::DEBUG), "[DEBUG]");
    }

    #[test]
    fn test_default_filter_directive() {
        assert_eq!(default_filter_directive(Level::INFO), "info,sqlx=warn");
        assert_eq!(default_filter_directive(Level::DEBUG), "debug,sqlx=warn");
    }

    #[test]
    fn test_default_config_logs_to_console() {
        let config = LogConfig::default();
        assert_eq!(config.destination, LogDestination::Console);
        assert_eq!(config.level, Level::INFO);
        assert!(config.with_timestamp);
    }
}
