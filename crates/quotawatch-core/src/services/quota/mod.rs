//! Quota tracking module
//!
//! Tracks whether each AI service's usage quota is available or depleted,
//! and when a depleted quota resets. A background scheduler flips records
//! back to available once the reset time passes and notifies the user,
//! once shortly before the reset and once when it happens.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │ QuotaService (facade)                                   │
//! │   - mark_depleted() / mark_available()                  │
//! │   - update_reset_time() / update_notify_settings()      │
//! │   - trigger_check() / scheduler_status()                │
//! └─────────────────────────────────────────────────────────┘
//!          │                               │
//!          ▼                               ▼
//! ┌──────────────────────┐     ┌──────────────────────────┐
//! │ QuotaStore           │◀────│ NotificationScheduler    │
//! │   - append-only rows │     │   - timer loop           │
//! │   - current record   │     │   - coming-soon phase    │
//! └──────────────────────┘     │   - reset phase          │
//!          │                   └──────────────────────────┘
//!          ▼                               │
//! ┌──────────────────────┐                 ▼
//! │ QuotaStateMachine    │     ┌──────────────────────────┐
//! │   - transitions      │     │ trait NotificationSink   │
//! │   - window / episode │     │   Log / Command / Record │
//! └──────────────────────┘     └──────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use std::sync::Arc;
//! use quotawatch_core::services::notification::LogSink;
//! use quotawatch_core::services::quota::{NotificationScheduler, QuotaStore, SystemClock};
//!
//! let store = Arc::new(QuotaStore::new(db.pool.clone()));
//! let scheduler = NotificationScheduler::new(store.clone(), Arc::new(SystemClock), Arc::new(LogSink));
//!
//! store.mark_depleted("claude", Some(reset_at), None).await?;
//! scheduler.start().await;
//! ```

pub mod clock;
pub mod scheduler;
pub mod service;
pub mod state_machine;
pub mod store;
pub mod types;

// Re-export main types
pub use types::{
    default_resource_ids, display_name, format_timestamp, QuotaRecord, QuotaStatus, QuotaUpdate,
    DEFAULT_NOTIFY_BEFORE_MINUTES, DEFAULT_RESOURCES, MAX_NOTIFY_BEFORE_MINUTES,
};

pub use clock::{Clock, ManualClock, SystemClock};

pub use state_machine::{format_time_until, QuotaDecision, QuotaEvent, QuotaStateMachine};

pub use store::{QuotaStore, StoredQuotaRecord};

pub use scheduler::{
    ActivationHandler, NotificationScheduler, SchedulerStatus, TickOutcome, TickReport,
    TickSource, DEFAULT_TICK_INTERVAL_SECS, MAX_TICK_INTERVAL_SECS, MIN_TICK_INTERVAL_SECS,
};

pub use service::QuotaService;
