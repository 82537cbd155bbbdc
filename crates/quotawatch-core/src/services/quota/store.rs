//! Quota storage layer
//!
//! Persists quota records to SQLite. The table may hold several rows for
//! one resource; every read resolves to the most recently updated row.

use std::sync::Arc;

#[cfg(test)]
use chrono::{Datelike, Timelike};
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::sqlite::{Sqlite, SqliteArguments};
use sqlx::{FromRow, SqlitePool};

use super::clock::{Clock, SystemClock};
use super::state_machine::{QuotaEvent, QuotaStateMachine};
use super::types::{
    format_timestamp, QuotaRecord, QuotaStatus, QuotaUpdate, MAX_NOTIFY_BEFORE_MINUTES,
};
use crate::error::{Error, Result};

/// Newest row per resource. Ties on `updated_at` fall back to `created_at`.
const CURRENT_ROWS: &str = r#"
    WITH current AS (
        SELECT id, resource_id, status, reset_time, notify_before_minutes,
               notify_enabled, last_notified_at, marked_depleted_at, notes,
               created_at, updated_at,
               ROW_NUMBER() OVER (
                   PARTITION BY resource_id
                   ORDER BY updated_at DESC, created_at DESC
               ) AS rn
        FROM quota_tracking
    )
    SELECT id, resource_id, status, reset_time, notify_before_minutes,
           notify_enabled, last_notified_at, marked_depleted_at, notes,
           created_at, updated_at
    FROM current
    WHERE rn = 1
"#;

// ============================================================================
// Database Row Types
// ============================================================================

/// Database row representation of a quota record
///
/// This struct maps directly to the `quota_tracking` table schema.
#[derive(Debug, Clone, FromRow)]
pub struct StoredQuotaRecord {
    pub id: String,
    pub resource_id: String,
    /// "unknown", "available" or "depleted"
    pub status: String,
    /// RFC 3339
    pub reset_time: Option<String>,
    pub notify_before_minutes: i64,
    pub notify_enabled: bool,
    pub last_notified_at: Option<String>,
    pub marked_depleted_at: Option<String>,
    pub notes: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl StoredQuotaRecord {
    /// Convert database row to QuotaRecord
    ///
    /// Returns `None` if a required field is malformed.
    pub fn to_quota_record(&self) -> Option<QuotaRecord> {
        let status = match self.status.parse::<QuotaStatus>() {
            Ok(status) => status,
            Err(e) => {
                log::warn!("[quota:store] Record {} has {}", self.id, e);
                return None;
            }
        };

        Some(QuotaRecord {
            id: self.id.clone(),
            resource_id: self.resource_id.clone(),
            status,
            reset_time: self.reset_time.as_deref().and_then(parse_datetime),
            notify_enabled: self.notify_enabled,
            notify_before_minutes: self.notify_before_minutes,
            last_notified_at: self.last_notified_at.as_deref().and_then(parse_datetime),
            marked_depleted_at: self.marked_depleted_at.as_deref().and_then(parse_datetime),
            notes: self.notes.clone(),
            created_at: parse_datetime(&self.created_at)?,
            updated_at: parse_datetime(&self.updated_at)?,
        })
    }
}

/// Parse datetime string (supports both RFC3339 and NaiveDateTime formats)
fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }

    // SQLite CURRENT_TIMESTAMP (e.g., "2026-02-04 10:30:00")
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Some(naive.and_utc());
    }

    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(naive.and_utc());
    }

    log::warn!("[quota:store] Failed to parse datetime: {}", s);
    None
}

fn decode_rows(rows: Vec<StoredQuotaRecord>) -> Vec<QuotaRecord> {
    rows.iter().filter_map(|row| row.to_quota_record()).collect()
}

fn sort_by_reset_time(records: &mut [QuotaRecord]) {
    records.sort_by_key(|r| r.reset_time);
}

fn insert_query(record: &QuotaRecord) -> sqlx::query::Query<'static, Sqlite, SqliteArguments<'static>> {
    sqlx::query(
        r#"
        INSERT INTO quota_tracking
        (id, resource_id, status, reset_time, notify_before_minutes, notify_enabled,
         last_notified_at, marked_depleted_at, notes, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(record.id.clone())
    .bind(record.resource_id.clone())
    .bind(record.status.as_str())
    .bind(record.reset_time.as_ref().map(format_timestamp))
    .bind(record.notify_before_minutes)
    .bind(record.notify_enabled)
    .bind(record.last_notified_at.as_ref().map(format_timestamp))
    .bind(record.marked_depleted_at.as_ref().map(format_timestamp))
    .bind(record.notes.clone())
    .bind(format_timestamp(&record.created_at))
    .bind(format_timestamp(&record.updated_at))
}

// ============================================================================
// QuotaStore
// ============================================================================

/// Repository for quota records
pub struct QuotaStore {
    pool: SqlitePool,
    clock: Arc<dyn Clock>,
}

impl QuotaStore {
    /// Create a store that stamps records with the wall clock
    pub fn new(pool: SqlitePool) -> Self {
        Self::with_clock(pool, Arc::new(SystemClock))
    }

    /// Create a store with an injected clock
    pub fn with_clock(pool: SqlitePool, clock: Arc<dyn Clock>) -> Self {
        Self { pool, clock }
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.clock)
    }

    /// Get the current record for a resource
    pub async fn get_current(&self, resource_id: &str) -> Result<Option<QuotaRecord>> {
        let sql = format!("{} AND resource_id = ? LIMIT 1", CURRENT_ROWS);
        let row = sqlx::query_as::<_, StoredQuotaRecord>(&sql)
            .bind(resource_id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => row.to_quota_record().map(Some).ok_or_else(|| {
                Error::internal(format!("Malformed quota record for {}", resource_id))
            }),
            None => Ok(None),
        }
    }

    /// Current records of every resource, ordered by resource id
    pub async fn get_all(&self) -> Result<Vec<QuotaRecord>> {
        let sql = format!("{} ORDER BY resource_id ASC", CURRENT_ROWS);
        let rows = sqlx::query_as::<_, StoredQuotaRecord>(&sql)
            .fetch_all(&self.pool)
            .await?;
        Ok(decode_rows(rows))
    }

    /// Merge `update` into the current record, creating one with defaults
    /// if the resource has never been seen.
    pub async fn upsert(&self, update: QuotaUpdate) -> Result<QuotaRecord> {
        if update.resource_id.trim().is_empty() {
            return Err(Error::validation("resource_id must not be empty"));
        }
        if let Some(minutes) = update.notify_before_minutes {
            if !(0..=MAX_NOTIFY_BEFORE_MINUTES).contains(&minutes) {
                return Err(Error::validation(format!(
                    "notify_before_minutes must be between 0 and {}, got {}",
                    MAX_NOTIFY_BEFORE_MINUTES, minutes
                )));
            }
        }

        let now = self.clock.now();

        match self.get_current(&update.resource_id).await? {
            Some(mut record) => {
                record.apply(&update);
                record.updated_at = now;
                self.update_row(&record).await?;
                log::debug!(
                    "[quota:store] Updated {} (status={})",
                    record.resource_id,
                    record.status
                );
                Ok(record)
            }
            None => {
                let mut record = QuotaRecord::new(update.resource_id.clone(), now);
                record.apply(&update);
                insert_query(&record).execute(&self.pool).await?;
                log::info!(
                    "[quota:store] Created quota record for {} (status={})",
                    record.resource_id,
                    record.status
                );
                Ok(record)
            }
        }
    }

    async fn update_row(&self, record: &QuotaRecord) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE quota_tracking
            SET status = ?, reset_time = ?, notify_before_minutes = ?, notify_enabled = ?,
                last_notified_at = ?, marked_depleted_at = ?, notes = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(record.status.as_str())
        .bind(record.reset_time.as_ref().map(format_timestamp))
        .bind(record.notify_before_minutes)
        .bind(record.notify_enabled)
        .bind(record.last_notified_at.as_ref().map(format_timestamp))
        .bind(record.marked_depleted_at.as_ref().map(format_timestamp))
        .bind(&record.notes)
        .bind(format_timestamp(&record.updated_at))
        .bind(&record.id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Start a new depletion episode.
    ///
    /// The reset time and notes describe the episode, so omitting them
    /// clears whatever the previous episode recorded.
    pub async fn mark_depleted(
        &self,
        resource_id: &str,
        reset_time: Option<DateTime<Utc>>,
        notes: Option<String>,
    ) -> Result<QuotaRecord> {
        let status = self.next_status(resource_id, QuotaEvent::MarkDepleted).await?;
        let now = self.clock.now();
        let record = self
            .upsert(
                QuotaUpdate::new(resource_id)
                    .status(status)
                    .reset_time(reset_time)
                    .marked_depleted_at(Some(now))
                    .last_notified_at(None)
                    .notes(notes),
            )
            .await?;
        log::info!(
            "[quota:store] {} marked depleted (reset: {:?})",
            resource_id,
            record.reset_time
        );
        Ok(record)
    }

    /// End the current depletion episode.
    pub async fn mark_available(
        &self,
        resource_id: &str,
        reset_time: Option<DateTime<Utc>>,
    ) -> Result<QuotaRecord> {
        let status = self.next_status(resource_id, QuotaEvent::MarkAvailable).await?;
        let record = self
            .upsert(
                QuotaUpdate::new(resource_id)
                    .status(status)
                    .reset_time(reset_time)
                    .marked_depleted_at(None)
                    .last_notified_at(None),
            )
            .await?;
        log::info!("[quota:store] {} marked available", resource_id);
        Ok(record)
    }

    /// Reconciliation transition: flip a record to available only if it is
    /// still depleted with a reached reset time when re-read.
    ///
    /// Returns `None` when another writer changed the record in between.
    pub async fn mark_available_if_expired(
        &self,
        resource_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<QuotaRecord>> {
        let Some(current) = self.get_current(resource_id).await? else {
            return Ok(None);
        };
        if !QuotaStateMachine::is_expired(&current, now) {
            log::debug!(
                "[quota:store] {} no longer expired, skipping reset",
                resource_id
            );
            return Ok(None);
        }
        if QuotaStateMachine::next_status(current.status, QuotaEvent::ResetReached).is_none() {
            return Ok(None);
        }
        self.mark_available(resource_id, None).await.map(Some)
    }

    async fn next_status(&self, resource_id: &str, event: QuotaEvent) -> Result<QuotaStatus> {
        let current = self
            .get_current(resource_id)
            .await?
            .map(|r| r.status)
            .unwrap_or_default();
        QuotaStateMachine::next_status(current, event).ok_or_else(|| {
            Error::validation(format!(
                "{:?} does not apply to {} in state {}",
                event, resource_id, current
            ))
        })
    }

    /// Update the reset time; `None` if the resource has no record
    pub async fn update_reset_time(
        &self,
        resource_id: &str,
        reset_time: DateTime<Utc>,
    ) -> Result<Option<QuotaRecord>> {
        if self.get_current(resource_id).await?.is_none() {
            log::debug!("[quota:store] No record for {}, reset time not updated", resource_id);
            return Ok(None);
        }

        self.upsert(QuotaUpdate::new(resource_id).reset_time(Some(reset_time)))
            .await
            .map(Some)
    }

    /// Update notification preferences, creating the record if needed
    pub async fn update_notify_settings(
        &self,
        resource_id: &str,
        enabled: bool,
        before_minutes: Option<i64>,
    ) -> Result<QuotaRecord> {
        let mut update = QuotaUpdate::new(resource_id).notify_enabled(enabled);
        if let Some(minutes) = before_minutes {
            update = update.notify_before_minutes(minutes);
        }
        self.upsert(update).await
    }

    /// Stamp the coming-soon notification; `None` if the resource has no record
    pub async fn mark_notified(&self, resource_id: &str) -> Result<Option<QuotaRecord>> {
        if self.get_current(resource_id).await?.is_none() {
            return Ok(None);
        }

        let now = self.clock.now();
        self.upsert(QuotaUpdate::new(resource_id).last_notified_at(Some(now)))
            .await
            .map(Some)
    }

    /// Depleted records that should get a coming-soon notification at `now`,
    /// soonest reset first.
    ///
    /// SQL narrows the candidates; the window and episode checks run in
    /// [`QuotaStateMachine::needs_coming_soon`].
    pub async fn list_needing_notification(&self, now: DateTime<Utc>) -> Result<Vec<QuotaRecord>> {
        let sql = format!(
            "{} AND notify_enabled = 1 AND status = 'depleted' AND reset_time IS NOT NULL \
             ORDER BY reset_time ASC",
            CURRENT_ROWS
        );
        let rows = sqlx::query_as::<_, StoredQuotaRecord>(&sql)
            .fetch_all(&self.pool)
            .await?;

        let mut records: Vec<QuotaRecord> = decode_rows(rows)
            .into_iter()
            .filter(|r| QuotaStateMachine::needs_coming_soon(r, now))
            .collect();
        sort_by_reset_time(&mut records);

        log::debug!(
            "[quota:store] {} records need a coming-soon notification",
            records.len()
        );
        Ok(records)
    }

    /// Depleted records with a known reset time, ascending by reset time
    pub async fn list_depleted(&self) -> Result<Vec<QuotaRecord>> {
        let sql = format!(
            "{} AND status = 'depleted' AND reset_time IS NOT NULL ORDER BY reset_time ASC",
            CURRENT_ROWS
        );
        let rows = sqlx::query_as::<_, StoredQuotaRecord>(&sql)
            .fetch_all(&self.pool)
            .await?;

        let mut records: Vec<QuotaRecord> = decode_rows(rows)
            .into_iter()
            .filter(|r| r.reset_time.is_some())
            .collect();
        sort_by_reset_time(&mut records);
        Ok(records)
    }

    /// Depleted records whose reset time has been reached
    pub async fn list_expired(&self, now: DateTime<Utc>) -> Result<Vec<QuotaRecord>> {
        let records: Vec<QuotaRecord> = self
            .list_depleted()
            .await?
            .into_iter()
            .filter(|r| QuotaStateMachine::is_expired(r, now))
            .collect();

        log::debug!("[quota:store] {} depleted records have expired", records.len());
        Ok(records)
    }

    /// Create `unknown` records for resources that have none.
    ///
    /// Returns the records that were created.
    pub async fn initialize_missing(&self, resource_ids: &[String]) -> Result<Vec<QuotaRecord>> {
        let mut created = Vec::new();
        for resource_id in resource_ids {
            if self.get_current(resource_id).await?.is_some() {
                continue;
            }
            let record = self
                .upsert(QuotaUpdate::new(resource_id.as_str()).status(QuotaStatus::Unknown))
                .await?;
            created.push(record);
        }

        if !created.is_empty() {
            log::info!("[quota:store] Initialized {} quota records", created.len());
        }
        Ok(created)
    }

    /// Drop every row (history included) for the given resources and seed
    /// fresh `unknown` records, in one transaction.
    pub async fn reinitialize(&self, resource_ids: &[String]) -> Result<Vec<QuotaRecord>> {
        let now = self.clock.now();
        let mut tx = self.pool.begin().await?;
        let mut seeded = Vec::with_capacity(resource_ids.len());

        for resource_id in resource_ids {
            sqlx::query("DELETE FROM quota_tracking WHERE resource_id = ?")
                .bind(resource_id)
                .execute(&mut *tx)
                .await?;

            let record = QuotaRecord::new(resource_id.as_str(), now);
            insert_query(&record).execute(&mut *tx).await?;
            seeded.push(record);
        }

        tx.commit().await?;
        log::info!("[quota:store] Reinitialized {} quota records", seeded.len());
        Ok(seeded)
    }
}

// ============================================================================
// Tests
// ============================================================================
