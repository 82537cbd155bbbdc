//! Quota query commands
//!
//! Read-only views of quota records.

use anyhow::{anyhow, Result};
use chrono::Utc;

use crate::commands::Context;
use crate::output::{print_output, print_single};
use super::helpers::normalize_resource_id;
use super::types::QuotaRow;

pub async fn list_quotas(ctx: &Context) -> Result<()> {
    let now = Utc::now();
    let rows: Vec<QuotaRow> = ctx
        .service
        .get_all()
        .await?
        .iter()
        .map(|r| QuotaRow::from_record(r, now))
        .collect();
    print_output(&rows, ctx.format)
}

pub async fn show_quota(ctx: &Context, resource: String) -> Result<()> {
    let resource_id = normalize_resource_id(&resource)?;
    let record = ctx
        .service
        .get_by_resource(&resource_id)
        .await?
        .ok_or_else(|| anyhow!("No quota record for {}", resource_id))?;
    print_single(&QuotaRow::from_record(&record, Utc::now()), ctx.format)
}

pub async fn list_depleted(ctx: &Context) -> Result<()> {
    let now = Utc::now();
    let rows: Vec<QuotaRow> = ctx
        .service
        .list_depleted()
        .await?
        .iter()
        .map(|r| QuotaRow::from_record(r, now))
        .collect();
    print_output(&rows, ctx.format)
}
