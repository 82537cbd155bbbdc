//! CLI commands module
//!
//! Contains all CLI command implementations.

pub mod quota;
pub mod watch;

use std::sync::Arc;

use anyhow::Result;
use quotawatch_core::services::notification::{CommandSink, LogSink, NotificationSink};
use quotawatch_core::services::quota::{
    NotificationScheduler, QuotaService, QuotaStore, SystemClock,
};
use quotawatch_core::{Database, QuotaWatchConfig};

use crate::output::OutputFormat;

/// Shared context for all commands
pub struct Context {
    pub db: Database,
    pub config: QuotaWatchConfig,
    pub service: QuotaService,
    pub format: OutputFormat,
    pub quiet: bool,
}

impl Context {
    pub async fn build(format: OutputFormat, quiet: bool) -> Result<Self> {
        let config = QuotaWatchConfig::from_env()?;
        let db = Database::open(config.db_path.clone()).await?;

        let store = Arc::new(QuotaStore::new(db.pool.clone()));
        let scheduler = NotificationScheduler::new(store.clone(), Arc::new(SystemClock), build_sink(&config))
            .with_activation_handler(Arc::new(|resource_id: &str| {
                log::info!("[quota:cli] Notification for {} opened", resource_id);
            }));
        let service = QuotaService::new(store, Arc::new(scheduler));

        Ok(Self {
            db,
            config,
            service,
            format,
            quiet,
        })
    }

    /// Stop the scheduler, then release the database
    pub async fn close(&self) {
        self.service.scheduler().shutdown().await;
        self.db.close().await;
    }
}

fn build_sink(config: &QuotaWatchConfig) -> Arc<dyn NotificationSink> {
    match config.notifier.as_deref().and_then(CommandSink::from_command_line) {
        Some(sink) => {
            log::debug!("[quota:cli] Delivering notifications with {}", sink.program());
            Arc::new(sink)
        }
        None => Arc::new(LogSink),
    }
}
