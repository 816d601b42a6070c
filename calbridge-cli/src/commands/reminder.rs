use anyhow::Result;
use calbridge_core::ReminderOffset;
use serde_json::json;

use super::Context;
use crate::utils::print_json;

pub async fn get(ctx: &Context, id: &str) -> Result<()> {
    let offset = ctx.client.get_reminder(id).await?;
    print_json(&json!({ "id": id, "offset": offset }))
}

pub async fn set(ctx: &Context, id: &str, offset: &str) -> Result<()> {
    let offset: ReminderOffset = offset.parse()?;
    if ctx.dry_run {
        return print_json(&json!({ "id": id, "offset": offset, "preview": true }));
    }
    let stored = ctx.client.set_reminder(id, offset).await?;
    print_json(&json!({ "id": id, "offset": stored, "preview": false }))
}

pub async fn clear(ctx: &Context, id: &str) -> Result<()> {
    if ctx.dry_run {
        return print_json(&json!({ "id": id, "offset": null, "preview": true }));
    }
    ctx.client.clear_reminder(id).await?;
    print_json(&json!({ "id": id, "offset": null, "preview": false }))
}
