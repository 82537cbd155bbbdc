//! # quotawatch-core
//!
//! Core logic for QuotaWatch - shared by the CLI and any other front end.
//!
//! This crate provides:
//! - Database operations (`db` module)
//! - Quota tracking, reconciliation and notifications (`services` module)
//! - Environment configuration (`config` module)
//! - Unified error handling (`error` module)

pub mod config;
pub mod db;
pub mod error;
pub mod services;
pub mod utils;

// Re-export utils for convenience
pub use utils::create_command;

// Re-exports for convenience
pub use config::QuotaWatchConfig;
pub use db::Database;
pub use error::{Error, Result};

// Re-export commonly used types from services
pub use services::{
    CommandSink, DeliveryResult, LogSink, Notification, NotificationError, NotificationKind,
    NotificationScheduler, NotificationSink, QuotaRecord, QuotaService, QuotaStatus, QuotaStore,
    RecordingSink, SchedulerStatus, TickOutcome, TickReport, Urgency,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Returns the library version
pub fn version() -> &'static str {
    VERSION
}
