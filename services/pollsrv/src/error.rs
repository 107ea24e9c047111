//! Error handling for the poll service

use errors::{ErrorCategory, ServiceError, ServiceErrorTrait};
use thiserror::Error;

use crate::registers::{RegisterType, ValueKind};

/// Poll Service Error Type
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PollError {
    /// Width/kind combination the decoder cannot handle
    #[error("Unsupported encoding: {register_type} as {kind}")]
    UnsupportedEncoding {
        register_type: RegisterType,
        kind: ValueKind,
    },

    /// Device answered with the wrong number of registers
    #[error("Short read: expected {expected} registers, got {actual}")]
    ShortRead { expected: usize, actual: usize },

    /// Device session could not be opened
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// A read or decode failed; the whole cycle is discarded
    #[error("read values: failed to read {variable} ({register}): {cause}")]
    ReadFailure {
        variable: String,
        register: u16,
        cause: String,
    },

    /// A row could not be written; remaining writes are skipped
    #[error("insert {sensor}: {cause}")]
    PersistFailure { sensor: String, cause: String },

    /// Bad flags, config file or variable table
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

/// Result type alias for the poll service
pub type Result<T> = std::result::Result<T, PollError>;

impl PollError {
    pub fn config(msg: impl Into<String>) -> Self {
        PollError::ConfigError(msg.into())
    }

    pub fn connection(msg: impl Into<String>) -> Self {
        PollError::ConnectionError(msg.into())
    }

    pub fn read_failure(
        variable: impl Into<String>,
        register: u16,
        cause: impl std::fmt::Display,
    ) -> Self {
        PollError::ReadFailure {
            variable: variable.into(),
            register,
            cause: cause.to_string(),
        }
    }

    pub fn persist_failure(sensor: impl Into<String>, cause: impl std::fmt::Display) -> Self {
        PollError::PersistFailure {
            sensor: sensor.into(),
            cause: cause.to_string(),
        }
    }
}

impl From<figment::Error> for PollError {
    fn from(err: figment::Error) -> Self {
        PollError::ConfigError(err.to_string())
    }
}

// ============================================================================
// Conversion from PollError to ServiceError at the process boundary
// ============================================================================

impl From<PollError> for ServiceError {
    fn from(err: PollError) -> Self {
        match err {
            PollError::UnsupportedEncoding { .. } | PollError::ShortRead { .. } => {
                ServiceError::Validation(err.to_string())
            },
            PollError::ConnectionError(msg) => ServiceError::Communication(msg),
            PollError::ReadFailure { .. } => ServiceError::Protocol {
                protocol: "modbus".to_string(),
                message: err.to_string(),
            },
            PollError::PersistFailure { .. } => ServiceError::Database(err.to_string()),
            PollError::ConfigError(msg) => ServiceError::Configuration(msg),
        }
    }
}

impl ServiceErrorTrait for PollError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::UnsupportedEncoding { .. } => "POLLSRV_UNSUPPORTED_ENCODING",
            Self::ShortRead { .. } => "POLLSRV_SHORT_READ",
            Self::ConnectionError(_) => "POLLSRV_CONNECTION_ERROR",
            Self::ReadFailure { .. } => "POLLSRV_READ_FAILURE",
            Self::PersistFailure { .. } => "POLLSRV_PERSIST_FAILURE",
            Self::ConfigError(_) => "POLLSRV_CONFIG_ERROR",
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::UnsupportedEncoding { .. } => ErrorCategory::Configuration,
            Self::ShortRead { .. } => ErrorCategory::Protocol,
            Self::ConnectionError(_) => ErrorCategory::Connection,
            Self::ReadFailure { .. } => ErrorCategory::Protocol,
            Self::PersistFailure { .. } => ErrorCategory::Database,
            Self::ConfigError(_) => ErrorCategory::Configuration,
        }
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_read_failure_names_variable_and_register() {
        let err = PollError::read_failure("power_pv", 30035, "timeout");
        assert_eq!(
            err.to_string(),
            "read values: failed to read power_pv (30035): timeout"
        );
        assert_eq!(err.error_code(), "POLLSRV_READ_FAILURE");
        assert!(err.is_retryable());
    }

    #[test]
    fn test_config_error_not_retryable() {
        let err = PollError::config("missing --target");
        assert_eq!(err.category(), ErrorCategory::Configuration);
        assert!(!err.is_retryable());
        assert_eq!(err.log_level(), tracing::Level::ERROR);
    }

    #[test]
    fn test_conversion_to_service_error() {
        let err: ServiceError = PollError::persist_failure("status_on_grid", "disk full").into();
        assert!(matches!(err, ServiceError::Database(_)));
        assert!(err.to_string().contains("insert status_on_grid: disk full"));

        let err: ServiceError = PollError::config("bad interval").into();
        assert_eq!(err.error_code(), "CONFIGURATION_ERROR");

        let err: ServiceError = PollError::connection("refused").into();
        assert_eq!(err.category(), ErrorCategory::Network);
    }

    #[test]
    fn test_unsupported_encoding_display() {
        let err = PollError::UnsupportedEncoding {
            register_type: RegisterType::S16,
            kind: ValueKind::StatusWord,
        };
        assert_eq!(err.to_string(), "Unsupported encoding: s16 as status word");
    }
}
