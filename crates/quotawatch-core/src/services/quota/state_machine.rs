//! Quota state machine
//!
//! Pure decision logic: given records and the current time, decide which
//! transitions and notifications a reconciliation tick should perform.
//! Nothing in here touches the database or the notification sink.
//!
//! ```text
//!              markDepleted
//!   unknown ───────────────────┐
//!      │                       ▼
//!      │ markAvailable     depleted ──┐ coming-soon window
//!      ▼                    │  ▲      │ (notify once, stay depleted)
//!   available ◀─────────────┘  │ ◀────┘
//!      │   markAvailable /      │
//!      │   reset reached        │
//!      └────────────────────────┘
//!              markDepleted
//! ```

use chrono::{DateTime, Duration, Utc};

use super::types::{QuotaRecord, QuotaStatus};

/// Events that can move a record between states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaEvent {
    /// Explicit depletion report (user action or scraper)
    MarkDepleted,
    /// Explicit availability report
    MarkAvailable,
    /// Reconciliation tick observed `now >= reset_time`
    ResetReached,
    /// Reconciliation tick observed the coming-soon window
    ComingSoonWindow,
}

/// What a tick should do for one record
#[derive(Debug, Clone, PartialEq)]
pub enum QuotaDecision {
    /// Send the "resets soon" notification, then mark the episode notified
    ComingSoon {
        record: QuotaRecord,
        reset_time: DateTime<Utc>,
    },
    /// Flip the record back to available; notify if opted in
    Reset {
        record: QuotaRecord,
        reset_time: DateTime<Utc>,
        notify: bool,
    },
}

impl QuotaDecision {
    pub fn record(&self) -> &QuotaRecord {
        match self {
            QuotaDecision::ComingSoon { record, .. } => record,
            QuotaDecision::Reset { record, .. } => record,
        }
    }

    pub fn resource_id(&self) -> &str {
        &self.record().resource_id
    }
}

/// Stateless transition and decision rules
pub struct QuotaStateMachine;

impl QuotaStateMachine {
    /// Next status for `event`, or `None` if the event does not apply.
    pub fn next_status(current: QuotaStatus, event: QuotaEvent) -> Option<QuotaStatus> {
        match (current, event) {
            (_, QuotaEvent::MarkDepleted) => Some(QuotaStatus::Depleted),
            (_, QuotaEvent::MarkAvailable) => Some(QuotaStatus::Available),
            (QuotaStatus::Depleted, QuotaEvent::ResetReached) => Some(QuotaStatus::Available),
            (QuotaStatus::Depleted, QuotaEvent::ComingSoonWindow) => Some(QuotaStatus::Depleted),
            _ => None,
        }
    }

    /// Whether the "coming soon" notification already went out for the
    /// current depletion episode.
    pub fn notified_this_episode(record: &QuotaRecord) -> bool {
        match (record.last_notified_at, record.marked_depleted_at) {
            (Some(notified), Some(depleted)) => notified >= depleted,
            // Legacy row without an episode start: trust the notification stamp
            (Some(_), None) => true,
            (None, _) => false,
        }
    }

    /// `now < reset_time <= now + notify_before_minutes`
    ///
    /// A window end past the representable range reaches every reset time.
    pub fn in_coming_soon_window(record: &QuotaRecord, now: DateTime<Utc>) -> bool {
        let Some(reset_time) = record.reset_time else {
            return false;
        };
        if reset_time <= now {
            return false;
        }
        match Duration::try_minutes(record.notify_before_minutes.max(0))
            .and_then(|lead| now.checked_add_signed(lead))
        {
            Some(window_end) => reset_time <= window_end,
            None => true,
        }
    }

    /// Depleted with a reset time that has been reached
    pub fn is_expired(record: &QuotaRecord, now: DateTime<Utc>) -> bool {
        record.status == QuotaStatus::Depleted
            && record.reset_time.map(|reset| reset <= now).unwrap_or(false)
    }

    /// Full predicate for the coming-soon notification
    pub fn needs_coming_soon(record: &QuotaRecord, now: DateTime<Utc>) -> bool {
        record.notify_enabled
            && record.status == QuotaStatus::Depleted
            && Self::in_coming_soon_window(record, now)
            && !Self::notified_this_episode(record)
    }

    /// Phase 1 plan: coming-soon decisions, soonest reset first
    pub fn plan_coming_soon(records: Vec<QuotaRecord>, now: DateTime<Utc>) -> Vec<QuotaDecision> {
        let mut decisions: Vec<QuotaDecision> = records
            .into_iter()
            .filter(|r| Self::needs_coming_soon(r, now))
            .filter_map(|record| {
                let reset_time = record.reset_time?;
                Some(QuotaDecision::ComingSoon { record, reset_time })
            })
            .collect();
        sort_by_urgency(&mut decisions);
        decisions
    }

    /// Phase 2 plan: reset decisions for expired records, soonest reset first
    pub fn plan_resets(records: Vec<QuotaRecord>, now: DateTime<Utc>) -> Vec<QuotaDecision> {
        let mut decisions: Vec<QuotaDecision> = records
            .into_iter()
            .filter(|r| Self::is_expired(r, now))
            .filter_map(|record| {
                let reset_time = record.reset_time?;
                let notify = record.notify_enabled;
                Some(QuotaDecision::Reset {
                    record,
                    reset_time,
                    notify,
                })
            })
            .collect();
        sort_by_urgency(&mut decisions);
        decisions
    }
}

fn sort_by_urgency(decisions: &mut [QuotaDecision]) {
    decisions.sort_by_key(|d| match d {
        QuotaDecision::ComingSoon { reset_time, .. } => *reset_time,
        QuotaDecision::Reset { reset_time, .. } => *reset_time,
    });
}

/// Render the time left until `reset_time` the way notifications show it
pub fn format_time_until(reset_time: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let diff = reset_time - now;
    if diff <= Duration::zero() {
        return "now".to_string();
    }

    let minutes = diff.num_minutes();
    let hours = minutes / 60;
    let days = hours / 24;

    if days > 0 {
        format!("{} {} {} {}", days, plural(days, "day"), hours % 24, plural(hours % 24, "hour"))
    } else if hours > 0 {
        format!(
            "{} {} {} {}",
            hours,
            plural(hours, "hour"),
            minutes % 60,
            plural(minutes % 60, "minute")
        )
    } else {
        format!("{} {}", minutes, plural(minutes, "minute"))
    }
}

fn plural(n: i64, unit: &str) -> String {
    if n == 1 {
        unit.to_string()
    } else {
        format!("{}s", unit)
    }
}
