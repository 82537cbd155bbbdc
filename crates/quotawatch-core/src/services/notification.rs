//! Notification delivery boundary
//!
//! The scheduler decides *when* and *what* to notify; a [`NotificationSink`]
//! decides *how*. Sinks report failures but never retry: a failed delivery
//! does not undo the state transition that triggered it.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::utils::create_command;

// ============================================================================
// Types
// ============================================================================

/// Why a notification is being sent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    /// Quota resets within the configured lead time
    ComingSoon,
    /// Quota has reset
    Available,
}

/// Display urgency hint for the sink
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Urgency {
    Low,
    Normal,
    Critical,
}

impl Urgency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Urgency::Low => "low",
            Urgency::Normal => "normal",
            Urgency::Critical => "critical",
        }
    }
}

/// Invoked when the user clicks the notification
pub type ActivateCallback = Arc<dyn Fn() + Send + Sync>;

/// A notification ready for delivery
#[derive(Clone)]
pub struct Notification {
    pub kind: NotificationKind,
    pub resource_id: String,
    pub title: String,
    pub body: String,
    pub urgency: Urgency,
    pub on_activate: Option<ActivateCallback>,
}

impl Notification {
    pub fn new(
        kind: NotificationKind,
        resource_id: impl Into<String>,
        title: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        let urgency = match kind {
            NotificationKind::ComingSoon => Urgency::Normal,
            NotificationKind::Available => Urgency::Low,
        };
        Self {
            kind,
            resource_id: resource_id.into(),
            title: title.into(),
            body: body.into(),
            urgency,
            on_activate: None,
        }
    }

    pub fn with_on_activate(mut self, callback: ActivateCallback) -> Self {
        self.on_activate = Some(callback);
        self
    }

    /// Run the activation callback, if any
    pub fn activate(&self) {
        if let Some(callback) = &self.on_activate {
            callback();
        }
    }
}

impl std::fmt::Debug for Notification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notification")
            .field("kind", &self.kind)
            .field("resource_id", &self.resource_id)
            .field("title", &self.title)
            .field("body", &self.body)
            .field("urgency", &self.urgency)
            .field("on_activate", &self.on_activate.is_some())
            .finish()
    }
}

/// Outcome reported by a sink
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryResult {
    /// Shown to the user
    Delivered,
    /// Accepted but intentionally not shown (e.g. do-not-disturb)
    Suppressed,
}

/// Errors that can occur while delivering a notification
#[derive(Error, Debug)]
pub enum NotificationError {
    /// The delivery mechanism is not set up on this machine
    #[error("Notifier unavailable: {0}")]
    Unavailable(String),

    /// The delivery mechanism ran and reported a failure
    #[error("Delivery failed: {0}")]
    Failed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

// ============================================================================
// Sink Trait
// ============================================================================

/// Something that can put a notification in front of the user
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Short identifier for logs
    fn name(&self) -> &'static str;

    async fn send(&self, notification: Notification) -> Result<DeliveryResult, NotificationError>;
}

// ============================================================================
// LogSink
// ============================================================================

/// Writes notifications to the log only
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn send(&self, notification: Notification) -> Result<DeliveryResult, NotificationError> {
        log::info!(
            "[quota:sink] {} - {}",
            notification.title,
            notification.body
        );
        Ok(DeliveryResult::Delivered)
    }
}

// ============================================================================
// CommandSink
// ============================================================================

/// Spawns an external notifier program (`notify-send`, `terminal-notifier`, ...)
/// with `<args...> <title> <body>`.
///
/// Activation callbacks cannot be wired through a child process and are ignored.
#[derive(Debug, Clone)]
pub struct CommandSink {
    program: String,
    args: Vec<String>,
}

impl CommandSink {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Parse a command line such as `"notify-send -a quotawatch"`
    pub fn from_command_line(command_line: &str) -> Option<Self> {
        let mut parts = command_line.split_whitespace();
        let program = parts.next()?;
        Some(Self {
            program: program.to_string(),
            args: parts.map(str::to_string).collect(),
        })
    }

    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }
}

#[async_trait]
impl NotificationSink for CommandSink {
    fn name(&self) -> &'static str {
        "command"
    }

    async fn send(&self, notification: Notification) -> Result<DeliveryResult, NotificationError> {
        let program = self.program.clone();
        let args = self.args.clone();
        let title = notification.title.clone();
        let body = notification.body.clone();

        let status = tokio::task::spawn_blocking(move || {
            create_command(&program).args(&args).arg(&title).arg(&body).status()
        })
        .await
        .map_err(|e| NotificationError::Failed(format!("Notifier task failed: {}", e)))?
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => {
                NotificationError::Unavailable(format!("{} not found", self.program))
            }
            _ => NotificationError::Io(e),
        })?;

        if status.success() {
            log::debug!("[quota:sink] {} delivered: {}", self.program, notification.title);
            Ok(DeliveryResult::Delivered)
        } else {
            Err(NotificationError::Failed(format!(
                "{} exited with {}",
                self.program, status
            )))
        }
    }
}

// ============================================================================
// RecordingSink
// ============================================================================

/// Keeps every notification in memory.
///
/// Can be told to fail or to take a while, for exercising the scheduler's
/// failure isolation and tick guard.
#[derive(Default)]
pub struct RecordingSink {
    sent: Mutex<Vec<Notification>>,
    fail: bool,
    delay: Option<Duration>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record, then report every delivery as failed
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    /// Sleep this long inside every `send`
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.lock().clone()
    }

    pub fn sent_of_kind(&self, kind: NotificationKind) -> Vec<Notification> {
        self.lock().iter().filter(|n| n.kind == kind).cloned().collect()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Notification>> {
        self.sent.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl NotificationSink for RecordingSink {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn send(&self, notification: Notification) -> Result<DeliveryResult, NotificationError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.lock().push(notification);
        if self.fail {
            Err(NotificationError::Failed("recording sink set to fail".to_string()))
        } else {
            Ok(DeliveryResult::Delivered)
        }
    }
}
