//! Unified error handling for SolarPoll services
//!
//! Services keep their own domain error enums and convert into
//! [`ServiceError`] at the process boundary. Every domain error also
//! implements [`ServiceErrorTrait`] so logs carry a stable error code and
//! category.

use thiserror::Error;

// ============================================================================
// ServiceError - Main error type
// ============================================================================

/// Main error type returned from service entry points
#[derive(Debug, Error)]
pub enum ServiceError {
    // ======================================
    // Configuration Errors
    // ======================================
    #[error("Configuration error: {0}")]
    Configuration(String),

    // ======================================
    // Database Errors
    // ======================================
    #[error("Database error: {0}")]
    Database(String),

    // ======================================
    // Protocol & Communication Errors
    // ======================================
    #[error("Protocol error: {protocol}: {message}")]
    Protocol { protocol: String, message: String },

    #[error("Communication error: {0}")]
    Communication(String),

    // ======================================
    // Validation Errors
    // ======================================
    #[error("Validation failed: {0}")]
    Validation(String),

    // ======================================
    // Service & Runtime Errors
    // ======================================
    #[error("Service startup failed: {0}")]
    StartupFailed(String),
}

/// Result type alias using ServiceError
pub type ServiceResult<T> = Result<T, ServiceError>;

impl ServiceErrorTrait for ServiceError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "CONFIGURATION_ERROR",
            Self::Database(_) => "DATABASE_ERROR",
            Self::Protocol { .. } => "PROTOCOL_ERROR",
            Self::Communication(_) => "COMMUNICATION_ERROR",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::StartupFailed(_) => "STARTUP_FAILED",
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::Configuration(_) => ErrorCategory::Configuration,
            Self::Database(_) => ErrorCategory::Database,
            Self::Protocol { .. } => ErrorCategory::Protocol,
            Self::Communication(_) => ErrorCategory::Network,
            Self::Validation(_) => ErrorCategory::Validation,
            Self::StartupFailed(_) => ErrorCategory::Internal,
        }
    }
}

// ============================================================================
// Service Error Trait - Architectural layer
// ============================================================================

/// Error category enum - used for classification in logs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    // Infrastructure layer
    Configuration,
    Database,
    Network,

    // Data layer
    Validation,

    // Protocol/communication layer
    Protocol,
    Connection,

    // System level
    Internal,
}

/// Error capability trait
///
/// Each service keeps its own domain-specific error type (e.g., `PollError`)
/// and gains a common interface by implementing this trait.
pub trait ServiceErrorTrait: std::error::Error + Send + Sync + 'static {
    /// Get error code (for logs and monitoring)
    fn error_code(&self) -> &'static str;

    /// Get error category (for classification)
    fn category(&self) -> ErrorCategory;

    /// Whether the error is transient (default implementation is category-based)
    fn is_retryable(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Network
                | ErrorCategory::Connection
                | ErrorCategory::Protocol
                | ErrorCategory::Database
        )
    }

    /// Get log level
    fn log_level(&self) -> tracing::Level {
        use tracing::Level;
        match self.category() {
            ErrorCategory::Internal | ErrorCategory::Database | ErrorCategory::Configuration => {
                Level::ERROR
            },
            ErrorCategory::Network
            | ErrorCategory::Connection
            | ErrorCategory::Protocol
            | ErrorCategory::Validation => Level::WARN,
        }
    }
}

// Tests
#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_error_retryable() {
        assert!(ServiceError::Communication("reset".into()).is_retryable());
        assert!(ServiceError::Database("locked".into()).is_retryable());
        assert!(!ServiceError::Configuration("bad".into()).is_retryable());
        assert!(!ServiceError::Validation("bad".into()).is_retryable());
        assert!(!ServiceError::StartupFailed("no db".into()).is_retryable());
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(
            ServiceError::StartupFailed("open database".into()).error_code(),
            "STARTUP_FAILED"
        );
        assert_eq!(
            ServiceError::Database("locked".into()).category(),
            ErrorCategory::Database
        );
    }

    #[test]
    fn test_log_levels() {
        let err = ServiceError::Configuration("invalid --interval: 5x".into());
        assert_eq!(
            err.to_string(),
            "Configuration error: invalid --interval: 5x"
        );
        assert_eq!(err.log_level(), tracing::Level::ERROR);

        let err = ServiceError::Protocol {
            protocol: "modbus".into(),
            message: "illegal data address".into(),
        };
        assert_eq!(
            err.to_string(),
            "Protocol error: modbus: illegal data address"
        );
        assert_eq!(err.log_level(), tracing::Level::WARN);
    }
}
