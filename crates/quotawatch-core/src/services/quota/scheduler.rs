//! Quota reconciliation scheduler
//!
//! Background timer that reconciles depleted quotas and sends reset
//! notifications.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  NotificationScheduler                      │
//! │                                                             │
//! │  ┌──────────────┐    ┌──────────────┐    ┌──────────────┐  │
//! │  │ Timer Loop   │    │ Tick Guard   │    │ Status       │  │
//! │  │ - interval   │    │ - one tick   │    │ - last_tick  │  │
//! │  │ - shutdown   │    │   at a time  │    │ - report     │  │
//! │  └──────────────┘    └──────────────┘    └──────────────┘  │
//! └─────────────────────────────────────────────────────────────┘
//!           │                    │                    │
//!           ▼                    ▼                    ▼
//!    ┌──────────┐         ┌──────────────┐      ┌──────────┐
//!    │  Clock   │         │ QuotaStore + │      │   Sink   │
//!    │          │         │ StateMachine │      │ (toast)  │
//!    └──────────┘         └──────────────┘      └──────────┘
//! ```
//!
//! Each tick runs two phases in order:
//!
//! 1. coming-soon notifications for records entering their lead window
//!    (notify, then `mark_notified`)
//! 2. resets for records whose reset time has passed (`mark_available`,
//!    then notify if opted in)
//!
//! Records are processed soonest-reset first. A failure on one record is
//! logged and the tick moves on; phase 2 always runs.
//!
//! Manual triggers and timer ticks share one guard. A trigger that finds a
//! tick in flight returns [`TickOutcome::AlreadyRunning`] without doing
//! anything, and a timer tick that finds a manual one in flight is skipped.
//!
//! Every tick runs behind a panic boundary. A panicking manual tick returns
//! [`TickOutcome::Failed`]; a panicking timer tick stops the timer.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tokio::sync::{oneshot, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

use super::clock::Clock;
use super::state_machine::{format_time_until, QuotaDecision, QuotaStateMachine};
use super::store::QuotaStore;
use super::types::display_name;
use crate::services::notification::{
    ActivateCallback, Notification, NotificationKind, NotificationSink,
};

// ============================================================================
// Constants
// ============================================================================

/// Default tick interval in seconds
pub const DEFAULT_TICK_INTERVAL_SECS: u64 = 60;

/// Minimum tick interval in seconds
pub const MIN_TICK_INTERVAL_SECS: u64 = 1;

/// Maximum tick interval in seconds (one day)
pub const MAX_TICK_INTERVAL_SECS: u64 = 24 * 60 * 60;

/// Called with the resource id when the user clicks a notification
pub type ActivationHandler = Arc<dyn Fn(&str) + Send + Sync>;

// ============================================================================
// Tick results
// ============================================================================

/// What triggered a tick
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TickSource {
    Timer,
    Manual,
}

/// Summary of one reconciliation tick
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickReport {
    pub source: TickSource,
    /// Clock reading the tick was evaluated at
    pub evaluated_at: DateTime<Utc>,
    /// Resources that got a coming-soon notification, in send order
    pub coming_soon: Vec<String>,
    /// Resources flipped back to available, in processing order
    pub reset: Vec<String>,
    /// Available-again notifications handed to the sink
    pub available_notifications: usize,
    /// Sink deliveries that failed (transitions were still recorded)
    pub delivery_failures: usize,
    /// Store or delivery errors, one line each
    pub errors: Vec<String>,
}

impl TickReport {
    fn new(source: TickSource, evaluated_at: DateTime<Utc>) -> Self {
        Self {
            source,
            evaluated_at,
            coming_soon: Vec::new(),
            reset: Vec::new(),
            available_notifications: 0,
            delivery_failures: 0,
            errors: Vec::new(),
        }
    }

    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn notifications_sent(&self) -> usize {
        self.coming_soon.len() + self.available_notifications
    }
}

/// Result of asking for a tick
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TickOutcome {
    Completed(TickReport),
    /// Another tick held the guard; nothing was done
    AlreadyRunning,
    /// The tick panicked part way through
    Failed { error: String },
}

impl TickOutcome {
    pub fn report(&self) -> Option<&TickReport> {
        match self {
            TickOutcome::Completed(report) => Some(report),
            TickOutcome::AlreadyRunning | TickOutcome::Failed { .. } => None,
        }
    }
}

// ============================================================================
// Status
// ============================================================================

/// Status of the scheduler
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchedulerStatus {
    /// Whether the timer is running
    pub is_running: bool,
    /// Whether a tick is in progress
    pub is_ticking: bool,
    pub interval_secs: u64,
    pub last_tick_at: Option<DateTime<Utc>>,
    pub next_tick_at: Option<DateTime<Utc>>,
    /// Last error message (if any)
    pub last_error: Option<String>,
    pub ticks_completed: u64,
    pub last_report: Option<TickReport>,
}

// ============================================================================
// Scheduler
// ============================================================================

/// State shared between the handle and the timer task
struct SchedulerCore {
    store: Arc<QuotaStore>,
    clock: Arc<dyn Clock>,
    sink: Arc<dyn NotificationSink>,
    activation: Option<ActivationHandler>,
    tick_guard: Mutex<()>,
    ticking: AtomicBool,
    status: RwLock<SchedulerStatus>,
}

/// Clears the ticking flag however the tick ends
struct TickingFlag<'a>(&'a AtomicBool);

impl<'a> TickingFlag<'a> {
    fn raise(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::SeqCst);
        Self(flag)
    }
}

impl Drop for TickingFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Drives periodic quota reconciliation
pub struct NotificationScheduler {
    core: Arc<SchedulerCore>,
    shutdown_tx: Mutex<Option<oneshot::Sender<()>>>,
    task: Mutex<Option<JoinHandle<()>>>,
    /// Bumped on every start so a finishing old loop cannot mark a newer one stopped
    generation: Arc<AtomicU64>,
}

impl NotificationScheduler {
    pub fn new(
        store: Arc<QuotaStore>,
        clock: Arc<dyn Clock>,
        sink: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            core: Arc::new(SchedulerCore {
                store,
                clock,
                sink,
                activation: None,
                tick_guard: Mutex::new(()),
                ticking: AtomicBool::new(false),
                status: RwLock::new(SchedulerStatus {
                    interval_secs: DEFAULT_TICK_INTERVAL_SECS,
                    ..Default::default()
                }),
            }),
            shutdown_tx: Mutex::new(None),
            task: Mutex::new(None),
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Attach a handler run when the user activates a notification.
    ///
    /// Must be called before the scheduler is shared.
    pub fn with_activation_handler(mut self, handler: ActivationHandler) -> Self {
        match Arc::get_mut(&mut self.core) {
            Some(core) => core.activation = Some(handler),
            None => log::warn!("[quota:scheduler] Scheduler already shared, activation handler ignored"),
        }
        self
    }

    /// Get the current status
    pub async fn status(&self) -> SchedulerStatus {
        let mut status = self.core.status.read().await.clone();
        status.is_ticking = self.core.ticking.load(Ordering::SeqCst);
        status
    }

    pub async fn is_running(&self) -> bool {
        self.core.status.read().await.is_running
    }

    /// Start ticking at the default interval
    pub async fn start(&self) -> bool {
        self.start_with_interval(Duration::from_secs(DEFAULT_TICK_INTERVAL_SECS))
            .await
    }

    /// Start ticking: one tick right away, then one per `period`.
    ///
    /// `period` is clamped to the min/max interval. Returns `false` (and
    /// does nothing) if already running.
    pub async fn start_with_interval(&self, period: Duration) -> bool {
        let period = period.clamp(
            Duration::from_secs(MIN_TICK_INTERVAL_SECS),
            Duration::from_secs(MAX_TICK_INTERVAL_SECS),
        );

        let mut shutdown_slot = self.shutdown_tx.lock().await;
        {
            let mut status = self.core.status.write().await;
            if status.is_running {
                log::warn!("[quota:scheduler] Scheduler already running, start ignored");
                return false;
            }
            status.is_running = true;
            status.interval_secs = period.as_secs();
            status.next_tick_at = Some(self.core.clock.now());
        }

        let (tx, rx) = oneshot::channel::<()>();
        *shutdown_slot = Some(tx);
        drop(shutdown_slot);

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let core = Arc::clone(&self.core);
        let current_generation = Arc::clone(&self.generation);

        log::info!(
            "[quota:scheduler] Starting with {}s interval",
            period.as_secs()
        );

        let handle = tokio::spawn(run_loop(core, period, rx, generation, current_generation));

        let mut task = self.task.lock().await;
        if let Some(old) = task.replace(handle) {
            // Previous loop was already signalled; let it wind down on its own
            drop(old);
        }
        true
    }

    /// Cancel future ticks. A tick already running is allowed to finish.
    ///
    /// Returns `false` if the scheduler was not running.
    pub async fn stop(&self) -> bool {
        let tx = self.shutdown_tx.lock().await.take();

        let was_running = {
            let mut status = self.core.status.write().await;
            let was_running = status.is_running;
            status.is_running = false;
            status.next_tick_at = None;
            was_running
        };

        if let Some(tx) = tx {
            let _ = tx.send(());
            log::info!("[quota:scheduler] Sent shutdown signal");
        }

        was_running
    }

    /// Stop and wait for the timer task to exit, including any tick in
    /// flight. Call before closing the database.
    pub async fn shutdown(&self) {
        self.stop().await;
        let handle = self.task.lock().await.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                log::error!("[quota:scheduler] Timer task ended abnormally: {}", e);
            }
        }
        log::info!("[quota:scheduler] Shut down");
    }

    /// Run one reconciliation cycle now, outside the timer.
    pub async fn trigger_now(&self) -> TickOutcome {
        log::info!("[quota:scheduler] Manual check triggered");
        self.core.run_tick_guarded(TickSource::Manual).await
    }
}

impl Drop for NotificationScheduler {
    fn drop(&mut self) {
        if let Ok(mut slot) = self.shutdown_tx.try_lock() {
            if let Some(tx) = slot.take() {
                let _ = tx.send(());
            }
        }
    }
}

async fn run_loop(
    core: Arc<SchedulerCore>,
    period: Duration,
    mut shutdown_rx: oneshot::Receiver<()>,
    generation: u64,
    current_generation: Arc<AtomicU64>,
) {
    log::info!("[quota:scheduler] Timer loop started");
    let mut timer = interval(period);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = &mut shutdown_rx => {
                log::info!("[quota:scheduler] Received shutdown signal");
                break;
            }
            // First tick completes immediately
            _ = timer.tick() => {
                if let TickOutcome::Failed { error } = core.run_tick_guarded(TickSource::Timer).await {
                    log::error!("[quota:scheduler] Stopping scheduler after failed tick");
                    core.status.write().await.last_error =
                        Some(format!("scheduler stopped: {}", error));
                    break;
                }

                let mut status = core.status.write().await;
                if status.is_running {
                    status.next_tick_at = chrono::Duration::try_seconds(period.as_secs() as i64)
                        .and_then(|step| core.clock.now().checked_add_signed(step));
                }
            }
        }
    }

    if current_generation.load(Ordering::SeqCst) == generation {
        let mut status = core.status.write().await;
        status.is_running = false;
        status.next_tick_at = None;
    }
    log::info!("[quota:scheduler] Timer loop exited");
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

impl SchedulerCore {
    /// Run a tick, turning a panic into [`TickOutcome::Failed`]
    async fn run_tick_guarded(&self, source: TickSource) -> TickOutcome {
        match AssertUnwindSafe(self.run_tick(source)).catch_unwind().await {
            Ok(outcome) => outcome,
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                log::error!("[quota:scheduler] {:?} tick panicked: {}", source, message);
                self.status.write().await.last_error = Some(format!("tick panicked: {}", message));
                TickOutcome::Failed { error: message }
            }
        }
    }

    async fn run_tick(&self, source: TickSource) -> TickOutcome {
        let Ok(_guard) = self.tick_guard.try_lock() else {
            log::debug!(
                "[quota:scheduler] {:?} tick skipped, another tick is in flight",
                source
            );
            return TickOutcome::AlreadyRunning;
        };
        let _ticking = TickingFlag::raise(&self.ticking);

        let now = self.clock.now();
        let mut report = TickReport::new(source, now);

        self.run_coming_soon_phase(now, &mut report).await;
        self.run_reset_phase(now, &mut report).await;

        if !report.coming_soon.is_empty() || !report.reset.is_empty() {
            log::info!(
                "[quota:scheduler] Sent {} coming-soon notifications, reset {} quotas",
                report.coming_soon.len(),
                report.reset.len()
            );
        }

        {
            let mut status = self.status.write().await;
            status.last_tick_at = Some(now);
            status.ticks_completed += 1;
            status.last_error = report.errors.last().cloned();
            status.last_report = Some(report.clone());
        }

        TickOutcome::Completed(report)
    }

    async fn run_coming_soon_phase(&self, now: DateTime<Utc>, report: &mut TickReport) {
        let candidates = match self.store.list_needing_notification(now).await {
            Ok(records) => records,
            Err(e) => {
                log::error!("[quota:scheduler] Failed to list quotas needing notification: {}", e);
                report.errors.push(format!("list coming-soon: {}", e));
                return;
            }
        };

        for decision in QuotaStateMachine::plan_coming_soon(candidates, now) {
            let QuotaDecision::ComingSoon { record, reset_time } = decision else {
                continue;
            };
            let name = display_name(&record.resource_id);
            let notification = Notification::new(
                NotificationKind::ComingSoon,
                record.resource_id.as_str(),
                format!("{} quota resets soon", name),
                format!(
                    "Your {} quota resets in {}",
                    name,
                    format_time_until(reset_time, now)
                ),
            );
            self.deliver(notification, report).await;

            match self.store.mark_notified(&record.resource_id).await {
                Ok(Some(_)) => report.coming_soon.push(record.resource_id.clone()),
                Ok(None) => {
                    log::warn!(
                        "[quota:scheduler] {} vanished before it could be marked notified",
                        record.resource_id
                    );
                    report.coming_soon.push(record.resource_id.clone());
                }
                Err(e) => {
                    log::error!(
                        "[quota:scheduler] Failed to mark {} notified: {}",
                        record.resource_id,
                        e
                    );
                    report
                        .errors
                        .push(format!("mark notified {}: {}", record.resource_id, e));
                }
            }
        }
    }

    async fn run_reset_phase(&self, now: DateTime<Utc>, report: &mut TickReport) {
        let expired = match self.store.list_expired(now).await {
            Ok(records) => records,
            Err(e) => {
                log::error!("[quota:scheduler] Failed to list expired quotas: {}", e);
                report.errors.push(format!("list expired: {}", e));
                return;
            }
        };

        for decision in QuotaStateMachine::plan_resets(expired, now) {
            let QuotaDecision::Reset { record, notify, .. } = decision else {
                continue;
            };

            match self
                .store
                .mark_available_if_expired(&record.resource_id, now)
                .await
            {
                Ok(Some(_)) => report.reset.push(record.resource_id.clone()),
                Ok(None) => continue,
                Err(e) => {
                    log::error!(
                        "[quota:scheduler] Failed to reset {}: {}",
                        record.resource_id,
                        e
                    );
                    report
                        .errors
                        .push(format!("reset {}: {}", record.resource_id, e));
                    continue;
                }
            }

            if notify {
                let name = display_name(&record.resource_id);
                let notification = Notification::new(
                    NotificationKind::Available,
                    record.resource_id.as_str(),
                    format!("{} quota has reset", name),
                    format!("Your {} quota is available now", name),
                );
                self.deliver(notification, report).await;
                report.available_notifications += 1;
            }
        }
    }

    /// Hand a notification to the sink. Failures are logged and counted,
    /// never retried.
    async fn deliver(&self, notification: Notification, report: &mut TickReport) {
        let notification = match &self.activation {
            Some(handler) => {
                let handler = Arc::clone(handler);
                let resource_id = notification.resource_id.clone();
                let callback: ActivateCallback = Arc::new(move || handler(&resource_id));
                notification.with_on_activate(callback)
            }
            None => notification,
        };

        let resource_id = notification.resource_id.clone();
        match self.sink.send(notification).await {
            Ok(result) => {
                log::debug!(
                    "[quota:scheduler] {} notification for {}: {:?}",
                    self.sink.name(),
                    resource_id,
                    result
                );
            }
            Err(e) => {
                log::warn!(
                    "[quota:scheduler] {} sink failed for {}: {}",
                    self.sink.name(),
                    resource_id,
                    e
                );
                report.delivery_failures += 1;
                report.errors.push(format!("deliver {}: {}", resource_id, e));
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::services::notification::{DeliveryResult, NotificationError, RecordingSink};
    use crate::services::quota::clock::ManualClock;
    use crate::services::quota::types::QuotaStatus;
    use async_trait::async_trait;
    use chrono::{Duration as ChronoDuration, TimeZone};
    use sqlx::SqlitePool;
    use std::sync::atomic::AtomicUsize;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    struct Harness {
        pool: SqlitePool,
        store: Arc<QuotaStore>,
        clock: Arc<ManualClock>,
        sink: Arc<RecordingSink>,
        scheduler: NotificationScheduler,
    }

    async fn harness_with_sink(sink: RecordingSink) -> Harness {
        let db = Database::open_in_memory().await.unwrap();
        let clock = Arc::new(ManualClock::new(t0()));
        let store = Arc::new(QuotaStore::with_clock(db.pool.clone(), clock.clone()));
        let sink = Arc::new(sink);
        let scheduler = NotificationScheduler::new(store.clone(), clock.clone(), sink.clone());
        Harness {
            pool: db.pool.clone(),
            store,
            clock,
            sink,
            scheduler,
        }
    }

    async fn harness() -> Harness {
        harness_with_sink(RecordingSink::new()).await
    }

    fn completed(outcome: TickOutcome) -> TickReport {
        match outcome {
            TickOutcome::Completed(report) => report,
            other => panic!("tick did not complete: {:?}", other),
        }
    }

    /// Panics on the first `panics` sends, then accepts
    struct PanickingSink {
        panics: AtomicUsize,
    }

    impl PanickingSink {
        fn new(panics: usize) -> Self {
            Self {
                panics: AtomicUsize::new(panics),
            }
        }
    }

    #[async_trait]
    impl NotificationSink for PanickingSink {
        fn name(&self) -> &'static str {
            "panicking"
        }

        async fn send(&self, _notification: Notification) -> Result<DeliveryResult, NotificationError> {
            let left = self.panics.load(Ordering::SeqCst);
            if left > 0 {
                self.panics.store(left - 1, Ordering::SeqCst);
                panic!("sink blew up");
            }
            Ok(DeliveryResult::Delivered)
        }
    }

    async fn panicking_scheduler(panics: usize) -> (Arc<QuotaStore>, NotificationScheduler) {
        let db = Database::open_in_memory().await.unwrap();
        let clock = Arc::new(ManualClock::new(t0()));
        let store = Arc::new(QuotaStore::with_clock(db.pool.clone(), clock.clone()));
        let scheduler = NotificationScheduler::new(
            store.clone(),
            clock,
            Arc::new(PanickingSink::new(panics)),
        );
        (store, scheduler)
    }

    #[tokio::test]
    async fn test_coming_soon_sent_once_per_episode() {
        let h = harness().await;
        h.store
            .mark_depleted("claude", Some(t0() + ChronoDuration::hours(2)), None)
            .await
            .unwrap();

        h.clock.set(t0() + ChronoDuration::minutes(65));
        let report = completed(h.scheduler.trigger_now().await);
        assert_eq!(report.coming_soon, vec!["claude".to_string()]);
        let sent = h.sink.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].title, "Claude quota resets soon");
        assert_eq!(sent[0].body, "Your Claude quota resets in 55 minutes");

        h.clock.set(t0() + ChronoDuration::minutes(70));
        let report = completed(h.scheduler.trigger_now().await);
        assert!(report.coming_soon.is_empty());
        assert_eq!(h.sink.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_reset_transitions_and_notifies_once() {
        let h = harness().await;
        h.store
            .mark_depleted("claude", Some(t0() + ChronoDuration::hours(2)), None)
            .await
            .unwrap();

        h.clock.set(t0() + ChronoDuration::minutes(121));
        let report = completed(h.scheduler.trigger_now().await);
        assert_eq!(report.reset, vec!["claude".to_string()]);
        assert_eq!(report.available_notifications, 1);

        let record = h.store.get_current("claude").await.unwrap().unwrap();
        assert_eq!(record.status, QuotaStatus::Available);

        let report = completed(h.scheduler.trigger_now().await);
        assert!(report.reset.is_empty());
        assert_eq!(h.sink.sent_of_kind(NotificationKind::Available).len(), 1);
    }

    #[tokio::test]
    async fn test_opted_out_resets_silently() {
        let h = harness().await;
        h.store
            .mark_depleted("grok", Some(t0() + ChronoDuration::minutes(30)), None)
            .await
            .unwrap();
        h.store.update_notify_settings("grok", false, None).await.unwrap();

        let report = completed(h.scheduler.trigger_now().await);
        assert!(report.coming_soon.is_empty());

        h.clock.set(t0() + ChronoDuration::minutes(31));
        let report = completed(h.scheduler.trigger_now().await);
        assert_eq!(report.reset, vec!["grok".to_string()]);
        assert!(h.sink.sent().is_empty());
    }

    #[tokio::test]
    async fn test_delivery_failure_still_records_transition() {
        let h = harness_with_sink(RecordingSink::failing()).await;
        h.store
            .mark_depleted("claude", Some(t0() + ChronoDuration::minutes(20)), None)
            .await
            .unwrap();
        h.store
            .mark_depleted("gemini", Some(t0() - ChronoDuration::minutes(1)), None)
            .await
            .unwrap();

        let report = completed(h.scheduler.trigger_now().await);
        assert_eq!(report.coming_soon, vec!["claude".to_string()]);
        assert_eq!(report.reset, vec!["gemini".to_string()]);
        assert_eq!(report.delivery_failures, 2);
        assert!(!report.is_clean());

        let claude = h.store.get_current("claude").await.unwrap().unwrap();
        assert!(claude.last_notified_at.is_some());

        // No retry on the next tick
        h.sink.clear();
        completed(h.scheduler.trigger_now().await);
        assert!(h.sink.sent().is_empty());

        let status = h.scheduler.status().await;
        assert_eq!(status.ticks_completed, 2);
    }

    #[tokio::test]
    async fn test_trigger_during_tick_reports_already_running() {
        let h = harness_with_sink(
            RecordingSink::new().with_delay(std::time::Duration::from_millis(300)),
        )
        .await;
        h.store
            .mark_depleted("claude", Some(t0() + ChronoDuration::minutes(10)), None)
            .await
            .unwrap();

        let scheduler = Arc::new(h.scheduler);
        let background = {
            let scheduler = Arc::clone(&scheduler);
            tokio::spawn(async move { scheduler.trigger_now().await })
        };

        // Wait until the first tick is inside the sink
        for _ in 0..100 {
            if scheduler.status().await.is_ticking {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }

        assert_eq!(scheduler.trigger_now().await, TickOutcome::AlreadyRunning);

        let first = completed(background.await.unwrap());
        assert_eq!(first.coming_soon, vec!["claude".to_string()]);
        assert_eq!(h.sink.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_start_ticks_immediately_and_stop_is_idempotent() {
        let h = harness().await;
        h.store
            .mark_depleted("claude", Some(t0() - ChronoDuration::minutes(1)), None)
            .await
            .unwrap();

        assert!(h.scheduler.start_with_interval(std::time::Duration::from_secs(3600)).await);
        assert!(!h.scheduler.start().await);

        for _ in 0..200 {
            if h.scheduler.status().await.ticks_completed >= 1 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        let status = h.scheduler.status().await;
        assert!(status.is_running);
        assert_eq!(status.ticks_completed, 1);
        assert_eq!(status.interval_secs, 3600);

        let record = h.store.get_current("claude").await.unwrap().unwrap();
        assert_eq!(record.status, QuotaStatus::Available);

        assert!(h.scheduler.stop().await);
        assert!(!h.scheduler.stop().await);
        h.scheduler.shutdown().await;

        let status = h.scheduler.status().await;
        assert!(!status.is_running);
        assert!(status.next_tick_at.is_none());
    }

    #[tokio::test]
    async fn test_restart_after_stop() {
        let h = harness().await;
        assert!(h.scheduler.start_with_interval(std::time::Duration::from_secs(3600)).await);
        h.scheduler.shutdown().await;
        assert!(!h.scheduler.is_running().await);

        assert!(h.scheduler.start_with_interval(std::time::Duration::from_secs(3600)).await);
        assert!(h.scheduler.is_running().await);
        h.scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn test_activation_handler_receives_resource_id() {
        let db = Database::open_in_memory().await.unwrap();
        let clock = Arc::new(ManualClock::new(t0()));
        let store = Arc::new(QuotaStore::with_clock(db.pool.clone(), clock.clone()));
        let sink = Arc::new(RecordingSink::new());
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);

        let scheduler = NotificationScheduler::new(store.clone(), clock.clone(), sink.clone())
            .with_activation_handler(Arc::new(move |resource_id: &str| {
                assert_eq!(resource_id, "claude");
                counter.fetch_add(1, Ordering::SeqCst);
            }));

        store
            .mark_depleted("claude", Some(t0() + ChronoDuration::minutes(5)), None)
            .await
            .unwrap();
        completed(scheduler.trigger_now().await);

        let sent = sink.sent();
        assert_eq!(sent.len(), 1);
        sent[0].activate();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_oversized_stored_lead_time_does_not_abort_tick() {
        let h = harness().await;
        h.store
            .mark_depleted("claude", Some(t0() + ChronoDuration::hours(2)), None)
            .await
            .unwrap();
        h.store
            .mark_depleted("gemini", Some(t0() - ChronoDuration::minutes(1)), None)
            .await
            .unwrap();
        // Rows written before the lead time was capped
        sqlx::query(
            "UPDATE quota_tracking SET notify_before_minutes = 200000000000 WHERE resource_id = 'claude'",
        )
        .execute(&h.pool)
        .await
        .unwrap();

        let report = completed(h.scheduler.trigger_now().await);
        assert_eq!(report.coming_soon, vec!["claude".to_string()]);
        assert_eq!(report.reset, vec!["gemini".to_string()]);

        let gemini = h.store.get_current("gemini").await.unwrap().unwrap();
        assert_eq!(gemini.status, QuotaStatus::Available);
    }

    #[tokio::test]
    async fn test_manual_tick_panic_returns_failed_and_clears_ticking() {
        let (store, scheduler) = panicking_scheduler(1).await;
        store
            .mark_depleted("claude", Some(t0() + ChronoDuration::minutes(10)), None)
            .await
            .unwrap();

        let outcome = scheduler.trigger_now().await;
        assert_eq!(
            outcome,
            TickOutcome::Failed {
                error: "sink blew up".to_string()
            }
        );
        assert!(outcome.report().is_none());

        let status = scheduler.status().await;
        assert!(!status.is_ticking);
        assert_eq!(status.last_error.as_deref(), Some("tick panicked: sink blew up"));

        // The guard was released, so the next trigger runs
        let report = completed(scheduler.trigger_now().await);
        assert_eq!(report.coming_soon, vec!["claude".to_string()]);
        assert!(!scheduler.status().await.is_ticking);
    }

    #[tokio::test]
    async fn test_timer_tick_panic_stops_scheduler() {
        let (store, scheduler) = panicking_scheduler(1).await;
        store
            .mark_depleted("claude", Some(t0() + ChronoDuration::minutes(10)), None)
            .await
            .unwrap();

        assert!(scheduler.start_with_interval(std::time::Duration::from_secs(3600)).await);
        for _ in 0..200 {
            if !scheduler.is_running().await {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }

        let status = scheduler.status().await;
        assert!(!status.is_running);
        assert!(!status.is_ticking);
        assert_eq!(status.last_error.as_deref(), Some("scheduler stopped: sink blew up"));
        scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn test_mark_notified_failure_does_not_block_reset_phase() {
        let h = harness().await;
        h.store
            .mark_depleted("claude", Some(t0() + ChronoDuration::minutes(20)), None)
            .await
            .unwrap();
        h.store
            .mark_depleted("gemini", Some(t0() - ChronoDuration::minutes(1)), None)
            .await
            .unwrap();
        sqlx::query(
            "CREATE TRIGGER fail_notified BEFORE UPDATE OF last_notified_at ON quota_tracking \
             WHEN NEW.resource_id = 'claude' BEGIN SELECT RAISE(ABORT, 'disk full'); END;",
        )
        .execute(&h.pool)
        .await
        .unwrap();

        let report = completed(h.scheduler.trigger_now().await);
        assert!(report.coming_soon.is_empty());
        assert_eq!(report.reset, vec!["gemini".to_string()]);
        assert!(report.errors.iter().any(|e| e.starts_with("mark notified claude")));
        assert!(!report.is_clean());

        // Coming-soon was delivered but not recorded
        assert_eq!(h.sink.sent_of_kind(NotificationKind::ComingSoon).len(), 1);
        let claude = h.store.get_current("claude").await.unwrap().unwrap();
        assert!(claude.last_notified_at.is_none());

        let gemini = h.store.get_current("gemini").await.unwrap().unwrap();
        assert_eq!(gemini.status, QuotaStatus::Available);
        let status = h.scheduler.status().await;
        assert!(status.last_error.unwrap().starts_with("mark notified claude"));
    }

    #[tokio::test]
    async fn test_trigger_during_timer_tick_reports_already_running() {
        let h = harness_with_sink(
            RecordingSink::new().with_delay(std::time::Duration::from_millis(300)),
        )
        .await;
        h.store
            .mark_depleted("claude", Some(t0() + ChronoDuration::minutes(10)), None)
            .await
            .unwrap();

        assert!(h.scheduler.start_with_interval(std::time::Duration::from_secs(3600)).await);
        for _ in 0..100 {
            if h.scheduler.status().await.is_ticking {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }

        assert_eq!(h.scheduler.trigger_now().await, TickOutcome::AlreadyRunning);

        for _ in 0..200 {
            if h.scheduler.status().await.ticks_completed >= 1 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        let status = h.scheduler.status().await;
        assert_eq!(status.ticks_completed, 1);
        assert_eq!(h.sink.sent().len(), 1);
        h.scheduler.shutdown().await;
    }

    #[test]
    fn test_tick_outcome_serializes_with_tag() {
        let json = serde_json::to_string(&TickOutcome::AlreadyRunning).unwrap();
        assert_eq!(json, r#"{"outcome":"already_running"}"#);

        let json = serde_json::to_string(&TickOutcome::Failed {
            error: "boom".to_string(),
        })
        .unwrap();
        assert_eq!(json, r#"{"outcome":"failed","error":"boom"}"#);
    }
}
