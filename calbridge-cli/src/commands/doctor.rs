use anyhow::Result;

use super::Context;
use crate::utils::print_json;

pub async fn run(ctx: &Context) -> Result<()> {
    let report = ctx.client.doctor().await?;
    print_json(&report)?;
    if !report.ok() {
        anyhow::bail!("calbridge is not ready: see the failed checks above");
    }
    Ok(())
}
