//! Quota command types
//!
//! Clap actions and table rows for quota commands.

use chrono::{DateTime, Utc};
use clap::Subcommand;
use quotawatch_core::services::quota::{format_time_until, QuotaRecord, QuotaStatus};
use serde::Serialize;
use tabled::Tabled;

use super::helpers::{format_local, truncate};

#[derive(Subcommand)]
pub enum QuotaAction {
    /// List all quota records
    List,

    /// Show one quota record
    Show {
        /// Resource ID (e.g. claude, chatgpt)
        resource: String,
    },

    /// List depleted quotas, soonest reset first
    Depleted,

    /// Mark a quota as depleted
    Deplete {
        /// Resource ID
        resource: String,

        /// Time until reset (e.g. 90m, 2h, 1h30m, 1d)
        #[arg(long, conflicts_with = "reset_at")]
        reset_in: Option<String>,

        /// Reset time (RFC 3339, "YYYY-MM-DD HH:MM" or "HH:MM", local time)
        #[arg(long)]
        reset_at: Option<String>,

        /// Free-form note for this episode
        #[arg(short, long)]
        notes: Option<String>,
    },

    /// Mark a quota as available
    Available {
        /// Resource ID
        resource: String,

        /// Next known reset time, if any
        #[arg(long)]
        next_reset: Option<String>,
    },

    /// Change the reset time of an existing record
    ResetTime {
        /// Resource ID
        resource: String,

        /// Reset time (RFC 3339, "YYYY-MM-DD HH:MM", "HH:MM" or a duration like 2h)
        time: String,
    },

    /// Configure reset notifications for a resource
    Notify {
        /// Resource ID
        resource: String,

        /// Turn notifications on
        #[arg(long, conflicts_with = "disabled", required_unless_present = "disabled")]
        enabled: bool,

        /// Turn notifications off
        #[arg(long)]
        disabled: bool,

        /// Minutes before the reset to send the heads-up
        #[arg(short, long)]
        before: Option<i64>,
    },

    /// Create records for configured resources that have none
    Init {
        /// Delete all records (history included) and start over
        #[arg(long)]
        reseed: bool,
    },
}

/// Quota row for table display
#[derive(Debug, Serialize, Tabled)]
pub struct QuotaRow {
    #[tabled(rename = "Resource")]
    pub resource_id: String,
    #[tabled(rename = "Name")]
    pub name: String,
    #[tabled(rename = "Status")]
    pub status: QuotaStatus,
    #[tabled(rename = "Reset At")]
    pub reset_at: String,
    #[tabled(rename = "Resets In")]
    pub resets_in: String,
    #[tabled(rename = "Notify")]
    pub notify: String,
    #[tabled(rename = "Notes")]
    pub notes: String,
}

impl QuotaRow {
    pub fn from_record(record: &QuotaRecord, now: DateTime<Utc>) -> Self {
        let resets_in = match (record.status, record.reset_time) {
            (QuotaStatus::Depleted, Some(reset)) => format_time_until(reset, now),
            _ => "-".to_string(),
        };
        let notify = if record.notify_enabled {
            format!("{}m before", record.notify_before_minutes)
        } else {
            "off".to_string()
        };

        Self {
            resource_id: record.resource_id.clone(),
            name: record.display_name().to_string(),
            status: record.status,
            reset_at: record
                .reset_time
                .map(|t| format_local(&t))
                .unwrap_or_else(|| "-".to_string()),
            resets_in,
            notify,
            notes: record
                .notes
                .as_deref()
                .map(|n| truncate(n, 40))
                .unwrap_or_default(),
        }
    }
}
