//! Poll Service Library (pollsrv)
//!
//! Scheduled Modbus data acquisition: a fixed table of holding registers is
//! read from an inverter/ESS, decoded into engineering values and appended
//! to SQLite as timestamped readings.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐    ┌─────────────┐    ┌─────────────┐    ┌─────────────┐
//! │  Scheduler  │───►│ Poll Cycle  │───►│   Session   │    │    Sink     │
//! │ (interval)  │    │ (fail-fast) │───►│  (Modbus)   │    │  (SQLite)   │
//! └─────────────┘    └─────────────┘    └─────────────┘    └─────────────┘
//!                          │                                      ▲
//!                          ▼                                      │
//!                    ┌─────────────┐    ┌─────────────┐           │
//!                    │  Registers  │───►│   Decoder   │───────────┘
//!                    └─────────────┘    └─────────────┘
//! ```

pub mod bootstrap;
pub mod config;
pub mod cycle;
pub mod decoder;
pub mod error;
pub mod registers;
pub mod scheduler;
pub mod session;
pub mod sink;
pub mod test_utils;

pub use error::{PollError, Result};

/// Service name
pub const SERVICE_NAME: &str = config::SERVICE_NAME;

/// Service version
pub const SERVICE_VERSION: &str = env!("CARGO_PKG_VERSION");
