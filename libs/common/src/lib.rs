//! SolarPoll basic library
//!
//! Provides basic functions shared by all services, including:
//! - logging bootstrap
//! - graceful shutdown signal handling
//! - SQLite client

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub mod logging;
pub mod shutdown;

pub use tokio_util::sync::CancellationToken;
