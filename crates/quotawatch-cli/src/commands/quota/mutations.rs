//! Quota mutation commands
//!
//! State changes and settings updates for quota records.

use anyhow::{bail, Result};
use chrono::Utc;

use crate::commands::Context;
use crate::output::{print_info, print_output, print_single, print_success};
use super::helpers::{normalize_resource_id, offset_from, parse_duration, parse_reset_time};
use super::types::QuotaRow;

pub async fn deplete(
    ctx: &Context,
    resource: String,
    reset_in: Option<String>,
    reset_at: Option<String>,
    notes: Option<String>,
) -> Result<()> {
    let resource_id = normalize_resource_id(&resource)?;
    let now = Utc::now();

    let reset_time = match (reset_in, reset_at) {
        (Some(d), _) => Some(offset_from(now, parse_duration(&d)?)?),
        (None, Some(t)) => Some(parse_reset_time(&t, now)?),
        (None, None) => None,
    };

    let record = ctx
        .service
        .mark_depleted(&resource_id, reset_time, notes)
        .await?;

    print_success(&format!("Marked {} as depleted", record.display_name()), ctx.quiet);
    if reset_time.is_none() {
        print_info(
            "No reset time given; set one with `quotawatch reset-time` to get notified",
            ctx.quiet,
        );
    }
    if !ctx.quiet {
        print_single(&QuotaRow::from_record(&record, now), ctx.format)?;
    }
    Ok(())
}

pub async fn available(ctx: &Context, resource: String, next_reset: Option<String>) -> Result<()> {
    let resource_id = normalize_resource_id(&resource)?;
    let now = Utc::now();
    let reset_time = next_reset
        .map(|t| parse_reset_time(&t, now))
        .transpose()?;

    let record = ctx.service.mark_available(&resource_id, reset_time).await?;

    print_success(&format!("Marked {} as available", record.display_name()), ctx.quiet);
    if !ctx.quiet {
        print_single(&QuotaRow::from_record(&record, now), ctx.format)?;
    }
    Ok(())
}

pub async fn set_reset_time(ctx: &Context, resource: String, time: String) -> Result<()> {
    let resource_id = normalize_resource_id(&resource)?;
    let now = Utc::now();
    let reset_time = parse_reset_time(&time, now)?;

    let record = ctx.service.update_reset_time(&resource_id, reset_time).await?;

    print_success(
        &format!("Updated reset time for {}", record.display_name()),
        ctx.quiet,
    );
    if !ctx.quiet {
        print_single(&QuotaRow::from_record(&record, now), ctx.format)?;
    }
    Ok(())
}

pub async fn set_notify(
    ctx: &Context,
    resource: String,
    enabled: bool,
    before: Option<i64>,
) -> Result<()> {
    let resource_id = normalize_resource_id(&resource)?;
    if let Some(minutes) = before {
        if minutes < 0 {
            bail!("--before must be zero or more minutes");
        }
    }

    let record = ctx
        .service
        .update_notify_settings(&resource_id, enabled, before)
        .await?;

    let message = if enabled {
        format!(
            "Notifications for {} on, {} minutes before reset",
            record.display_name(),
            record.notify_before_minutes
        )
    } else {
        format!("Notifications for {} off", record.display_name())
    };
    print_success(&message, ctx.quiet);
    Ok(())
}

pub async fn init(ctx: &Context, reseed: bool) -> Result<()> {
    let resources = &ctx.config.resources;

    let records = if reseed {
        ctx.service.reinitialize(resources).await?
    } else {
        ctx.service.initialize_missing(resources).await?
    };

    if records.is_empty() {
        print_info("All configured resources already have records", ctx.quiet);
        return Ok(());
    }

    print_success(
        &format!("Initialized {} quota records", records.len()),
        ctx.quiet,
    );
    if !ctx.quiet {
        let now = Utc::now();
        let rows: Vec<QuotaRow> = records
            .iter()
            .map(|r| QuotaRow::from_record(r, now))
            .collect();
        print_output(&rows, ctx.format)?;
    }
    Ok(())
}
