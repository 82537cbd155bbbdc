//! Quota commands
//!
//! Commands for inspecting and updating quota records: list, show, deplete,
//! available, reset-time, notify, depleted, init.

pub mod helpers;
mod mutations;
mod queries;
mod types;

use anyhow::Result;

use crate::commands::Context;

// Re-export public types
pub use types::{QuotaAction, QuotaRow};

pub async fn execute(ctx: &Context, action: QuotaAction) -> Result<()> {
    match action {
        QuotaAction::List => queries::list_quotas(ctx).await,
        QuotaAction::Show { resource } => queries::show_quota(ctx, resource).await,
        QuotaAction::Depleted => queries::list_depleted(ctx).await,
        QuotaAction::Deplete { resource, reset_in, reset_at, notes } => {
            mutations::deplete(ctx, resource, reset_in, reset_at, notes).await
        }
        QuotaAction::Available { resource, next_reset } => {
            mutations::available(ctx, resource, next_reset).await
        }
        QuotaAction::ResetTime { resource, time } => {
            mutations::set_reset_time(ctx, resource, time).await
        }
        QuotaAction::Notify { resource, enabled, disabled: _, before } => {
            mutations::set_notify(ctx, resource, enabled, before).await
        }
        QuotaAction::Init { reseed } => mutations::init(ctx, reseed).await,
    }
}
