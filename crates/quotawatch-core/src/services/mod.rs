//! Services module

pub mod notification;
pub mod quota;

pub use notification::{
    CommandSink, DeliveryResult, LogSink, Notification, NotificationError, NotificationKind,
    NotificationSink, RecordingSink, Urgency,
};
pub use quota::{
    NotificationScheduler, QuotaRecord, QuotaService, QuotaStatus, QuotaStore, SchedulerStatus,
    TickOutcome, TickReport,
};
