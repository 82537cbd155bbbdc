//! Quota tracking types
//!
//! Records describing whether an externally rate-limited service is usable
//! right now, and when a depleted one is expected to come back.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Default lead time for the "coming soon" notification
pub const DEFAULT_NOTIFY_BEFORE_MINUTES: i64 = 60;

/// Longest accepted lead time (30 days)
pub const MAX_NOTIFY_BEFORE_MINUTES: i64 = 30 * 24 * 60;

// ============================================================================
// Status
// ============================================================================

/// Quota status of a tracked resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuotaStatus {
    /// Nothing observed yet
    #[default]
    Unknown,
    /// Resource can be used
    Available,
    /// Quota exhausted until `reset_time`
    Depleted,
}

impl QuotaStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuotaStatus::Unknown => "unknown",
            QuotaStatus::Available => "available",
            QuotaStatus::Depleted => "depleted",
        }
    }
}

impl std::fmt::Display for QuotaStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for QuotaStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "unknown" => Ok(QuotaStatus::Unknown),
            "available" => Ok(QuotaStatus::Available),
            "depleted" => Ok(QuotaStatus::Depleted),
            _ => Err(format!("Unknown quota status: {}", s)),
        }
    }
}

// ============================================================================
// Record
// ============================================================================

/// Current quota state of one tracked resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuotaRecord {
    /// Unique identifier (UUID)
    pub id: String,
    /// Stable key of the tracked service (e.g. "claude")
    pub resource_id: String,
    pub status: QuotaStatus,
    /// When a depleted resource becomes usable again, if known
    pub reset_time: Option<DateTime<Utc>>,
    /// Whether this resource takes part in proactive notifications
    pub notify_enabled: bool,
    /// Lead time for the "coming soon" notification
    pub notify_before_minutes: i64,
    /// Last "coming soon" notification in the current depletion episode
    pub last_notified_at: Option<DateTime<Utc>>,
    /// Start of the current depletion episode
    pub marked_depleted_at: Option<DateTime<Utc>>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl QuotaRecord {
    /// Create a fresh record with default settings
    pub fn new(resource_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            resource_id: resource_id.into(),
            status: QuotaStatus::Unknown,
            reset_time: None,
            notify_enabled: true,
            notify_before_minutes: DEFAULT_NOTIFY_BEFORE_MINUTES,
            last_notified_at: None,
            marked_depleted_at: None,
            notes: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Human readable name of the resource
    pub fn display_name(&self) -> &str {
        display_name(&self.resource_id)
    }

    /// Merge a partial update into this record.
    ///
    /// Fields not present in `update` keep their current value.
    pub fn apply(&mut self, update: &QuotaUpdate) {
        if let Some(status) = update.status {
            self.status = status;
        }
        if let Some(reset_time) = update.reset_time {
            self.reset_time = reset_time;
        }
        if let Some(enabled) = update.notify_enabled {
            self.notify_enabled = enabled;
        }
        if let Some(minutes) = update.notify_before_minutes {
            self.notify_before_minutes = minutes;
        }
        if let Some(last_notified_at) = update.last_notified_at {
            self.last_notified_at = last_notified_at;
        }
        if let Some(marked_depleted_at) = update.marked_depleted_at {
            self.marked_depleted_at = marked_depleted_at;
        }
        if let Some(notes) = &update.notes {
            self.notes = notes.clone();
        }
    }
}

// ============================================================================
// Partial update
// ============================================================================

/// Partial update keyed by resource id.
///
/// `None` leaves a field untouched. For nullable fields `Some(None)` clears
/// the stored value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QuotaUpdate {
    pub resource_id: String,
    pub status: Option<QuotaStatus>,
    pub reset_time: Option<Option<DateTime<Utc>>>,
    pub notify_enabled: Option<bool>,
    pub notify_before_minutes: Option<i64>,
    pub last_notified_at: Option<Option<DateTime<Utc>>>,
    pub marked_depleted_at: Option<Option<DateTime<Utc>>>,
    pub notes: Option<Option<String>>,
}

impl QuotaUpdate {
    pub fn new(resource_id: impl Into<String>) -> Self {
        Self {
            resource_id: resource_id.into(),
            ..Default::default()
        }
    }

    pub fn status(mut self, status: QuotaStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn reset_time(mut self, reset_time: Option<DateTime<Utc>>) -> Self {
        self.reset_time = Some(reset_time);
        self
    }

    pub fn notify_enabled(mut self, enabled: bool) -> Self {
        self.notify_enabled = Some(enabled);
        self
    }

    pub fn notify_before_minutes(mut self, minutes: i64) -> Self {
        self.notify_before_minutes = Some(minutes);
        self
    }

    pub fn last_notified_at(mut self, at: Option<DateTime<Utc>>) -> Self {
        self.last_notified_at = Some(at);
        self
    }

    pub fn marked_depleted_at(mut self, at: Option<DateTime<Utc>>) -> Self {
        self.marked_depleted_at = Some(at);
        self
    }

    pub fn notes(mut self, notes: Option<String>) -> Self {
        self.notes = Some(notes);
        self
    }
}

// ============================================================================
// Resource catalogue
// ============================================================================

/// Services tracked out of the box, with their display names
pub const DEFAULT_RESOURCES: &[(&str, &str)] = &[
    ("chatgpt", "ChatGPT"),
    ("claude", "Claude"),
    ("gemini", "Gemini"),
    ("perplexity", "Perplexity"),
    ("grok", "Grok"),
    ("copilot", "Copilot"),
];

/// Ids of the built-in resources
pub fn default_resource_ids() -> Vec<String> {
    DEFAULT_RESOURCES.iter().map(|(id, _)| id.to_string()).collect()
}

/// Display name for a resource id; unknown ids are shown as-is
pub fn display_name(resource_id: &str) -> &str {
    DEFAULT_RESOURCES
        .iter()
        .find(|(id, _)| *id == resource_id)
        .map(|(_, name)| *name)
        .unwrap_or(resource_id)
}

// ============================================================================
// Timestamps
// ============================================================================

/// Canonical persisted form: RFC 3339, UTC, millisecond precision.
///
/// A single fixed-width format keeps lexicographic order equal to
/// chronological order in SQL `ORDER BY`.
pub fn format_timestamp(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_status_display_and_parse() {
        assert_eq!(QuotaStatus::Depleted.to_string(), "depleted");
        assert_eq!("Available".parse::<QuotaStatus>().unwrap(), QuotaStatus::Available);
        assert_eq!("unknown".parse::<QuotaStatus>().unwrap(), QuotaStatus::Unknown);
        assert!("exhausted".parse::<QuotaStatus>().is_err());
    }

    #[test]
    fn test_status_serde_uses_snake_case() {
        let json = serde_json::to_string(&QuotaStatus::Depleted).unwrap();
        assert_eq!(json, "\"depleted\"");
    }

    #[test]
    fn test_new_record_defaults() {
        let record = QuotaRecord::new("claude", t0());
        assert_eq!(record.status, QuotaStatus::Unknown);
        assert!(record.notify_enabled);
        assert_eq!(record.notify_before_minutes, 60);
        assert!(record.reset_time.is_none());
        assert_eq!(record.created_at, record.updated_at);
    }

    #[test]
    fn test_apply_keeps_unspecified_fields() {
        let mut record = QuotaRecord::new("claude", t0());
        record.notes = Some("keep me".to_string());
        record.notify_before_minutes = 15;

        record.apply(&QuotaUpdate::new("claude").status(QuotaStatus::Available));

        assert_eq!(record.status, QuotaStatus::Available);
        assert_eq!(record.notes.as_deref(), Some("keep me"));
        assert_eq!(record.notify_before_minutes, 15);
    }

    #[test]
    fn test_apply_clears_nullable_fields() {
        let mut record = QuotaRecord::new("claude", t0());
        record.reset_time = Some(t0());
        record.notes = Some("old".to_string());

        record.apply(&QuotaUpdate::new("claude").reset_time(None).notes(None));

        assert!(record.reset_time.is_none());
        assert!(record.notes.is_none());
    }

    #[test]
    fn test_display_name() {
        assert_eq!(display_name("chatgpt"), "ChatGPT");
        assert_eq!(display_name("my-llm"), "my-llm");
        assert_eq!(default_resource_ids().len(), DEFAULT_RESOURCES.len());
    }

    #[test]
    fn test_format_timestamp_is_fixed_width_utc() {
        let formatted = format_timestamp(&t0());
        assert_eq!(formatted, "2026-03-01T12:00:00.000Z");
    }
}
