//! Scheduler commands
//!
//! `check` runs a single reconciliation pass; `watch` keeps the scheduler
//! running in the foreground until Ctrl-C.

use std::time::Duration;

use anyhow::Result;
use quotawatch_core::services::quota::{
    TickOutcome, TickReport, MAX_TICK_INTERVAL_SECS, MIN_TICK_INTERVAL_SECS,
};
use serde::Serialize;
use tabled::Tabled;

use crate::output::{print_info, print_json, print_single, print_success, OutputFormat};
use super::Context;

/// Check result row for table display
#[derive(Debug, Serialize, Tabled)]
pub struct CheckRow {
    #[tabled(rename = "Checked At")]
    pub checked_at: String,
    #[tabled(rename = "Coming Soon")]
    pub coming_soon: String,
    #[tabled(rename = "Reset")]
    pub reset: String,
    #[tabled(rename = "Failures")]
    pub failures: usize,
}

impl From<&TickReport> for CheckRow {
    fn from(report: &TickReport) -> Self {
        let join = |ids: &[String]| {
            if ids.is_empty() {
                "-".to_string()
            } else {
                ids.join(", ")
            }
        };
        Self {
            checked_at: report.evaluated_at.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
            coming_soon: join(&report.coming_soon),
            reset: join(&report.reset),
            failures: report.errors.len(),
        }
    }
}

pub async fn check(ctx: &Context) -> Result<()> {
    match ctx.service.trigger_check().await {
        TickOutcome::Completed(report) => {
            match ctx.format {
                OutputFormat::Json => print_json(&report)?,
                OutputFormat::Table => print_single(&CheckRow::from(&report), ctx.format)?,
            }
            for error in &report.errors {
                log::warn!("[quota:cli] {}", error);
            }
        }
        TickOutcome::AlreadyRunning => {
            print_info("A check is already running", ctx.quiet);
        }
        TickOutcome::Failed { error } => {
            anyhow::bail!("Check failed: {}", error);
        }
    }
    Ok(())
}

pub async fn watch(ctx: &Context, interval: Option<u64>) -> Result<()> {
    let secs = interval
        .unwrap_or(ctx.config.tick_interval_secs)
        .clamp(MIN_TICK_INTERVAL_SECS, MAX_TICK_INTERVAL_SECS);

    let created = ctx.service.initialize_missing(&ctx.config.resources).await?;
    if !created.is_empty() {
        print_info(
            &format!("Initialized {} quota records", created.len()),
            ctx.quiet,
        );
    }

    let scheduler = ctx.service.scheduler();
    scheduler.start_with_interval(Duration::from_secs(secs)).await;
    print_success(
        &format!("Watching quotas every {}s, press Ctrl-C to stop", secs),
        ctx.quiet,
    );

    tokio::signal::ctrl_c().await?;
    print_info("Stopping...", ctx.quiet);
    scheduler.shutdown().await;

    let status = scheduler.status().await;
    print_info(
        &format!("Ran {} checks", status.ticks_completed),
        ctx.quiet,
    );
    if let Some(error) = status.last_error {
        log::warn!("[quota:cli] Last scheduler error: {}", error);
    }
    Ok(())
}
