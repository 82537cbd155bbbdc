//! Quota service
//!
//! Facade the CLI and other callers use: store operations plus the
//! scheduler's manual trigger and status, behind one handle.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use super::scheduler::{NotificationScheduler, SchedulerStatus, TickOutcome};
use super::store::QuotaStore;
use super::types::QuotaRecord;
use crate::error::{Error, Result};

pub struct QuotaService {
    store: Arc<QuotaStore>,
    scheduler: Arc<NotificationScheduler>,
}

impl QuotaService {
    pub fn new(store: Arc<QuotaStore>, scheduler: Arc<NotificationScheduler>) -> Self {
        Self { store, scheduler }
    }

    pub fn store(&self) -> &Arc<QuotaStore> {
        &self.store
    }

    pub fn scheduler(&self) -> &Arc<NotificationScheduler> {
        &self.scheduler
    }

    pub async fn get_by_resource(&self, resource_id: &str) -> Result<Option<QuotaRecord>> {
        self.store.get_current(resource_id).await
    }

    pub async fn get_all(&self) -> Result<Vec<QuotaRecord>> {
        self.store.get_all().await
    }

    pub async fn mark_depleted(
        &self,
        resource_id: &str,
        reset_time: Option<DateTime<Utc>>,
        notes: Option<String>,
    ) -> Result<QuotaRecord> {
        if let Some(reset) = reset_time {
            let now = self.store.clock().now();
            if reset <= now {
                log::warn!(
                    "[quota:service] {} reset time {} is already past, next check will reset it",
                    resource_id,
                    reset
                );
            }
        }
        self.store.mark_depleted(resource_id, reset_time, notes).await
    }

    pub async fn mark_available(
        &self,
        resource_id: &str,
        reset_time: Option<DateTime<Utc>>,
    ) -> Result<QuotaRecord> {
        self.store.mark_available(resource_id, reset_time).await
    }

    /// Errors with `NotFound` when the resource has no record yet
    pub async fn update_reset_time(
        &self,
        resource_id: &str,
        reset_time: DateTime<Utc>,
    ) -> Result<QuotaRecord> {
        self.store
            .update_reset_time(resource_id, reset_time)
            .await?
            .ok_or_else(|| Error::not_found(format!("No quota record for {}", resource_id)))
    }

    pub async fn update_notify_settings(
        &self,
        resource_id: &str,
        enabled: bool,
        before_minutes: Option<i64>,
    ) -> Result<QuotaRecord> {
        self.store
            .update_notify_settings(resource_id, enabled, before_minutes)
            .await
    }

    pub async fn list_depleted(&self) -> Result<Vec<QuotaRecord>> {
        self.store.list_depleted().await
    }

    /// Run a reconciliation tick now. A panicking tick comes back as
    /// [`TickOutcome::Failed`].
    pub async fn trigger_check(&self) -> TickOutcome {
        self.scheduler.trigger_now().await
    }

    pub async fn initialize_missing(&self, resource_ids: &[String]) -> Result<Vec<QuotaRecord>> {
        self.store.initialize_missing(resource_ids).await
    }

    pub async fn reinitialize(&self, resource_ids: &[String]) -> Result<Vec<QuotaRecord>> {
        log::warn!("[quota:service] Resetting all quota records");
        self.store.reinitialize(resource_ids).await
    }

    pub async fn scheduler_status(&self) -> SchedulerStatus {
        self.scheduler.status().await
    }
}
