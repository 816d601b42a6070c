use std::io::Read;
use std::path::PathBuf;

use anyhow::{Context as _, Result};
use calbridge_core::journal::FailurePolicy;

use super::Context;
use crate::utils::print_json;

pub async fn undo(ctx: &Context) -> Result<()> {
    let report = ctx.session()?.undo().await?;
    print_json(&report)
}

pub async fn redo(ctx: &Context) -> Result<()> {
    let report = ctx.session()?.redo().await?;
    print_json(&report)
}

fn read_input(file: Option<PathBuf>) -> Result<String> {
    match file {
        Some(path) if path.as_os_str() != "-" => std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display())),
        _ => {
            let mut text = String::new();
            std::io::stdin()
                .read_to_string(&mut text)
                .context("Failed to read batch rows from stdin")?;
            Ok(text)
        }
    }
}

pub async fn batch(ctx: &Context, file: Option<PathBuf>, strict: bool) -> Result<()> {
    let text = read_input(file)?;
    let policy = if strict {
        FailurePolicy::Strict
    } else {
        FailurePolicy::ContinueOnError
    };

    let report = ctx.session()?.run_batch(&text, policy).await;
    print_json(&report)?;
    if report.errors > 0 {
        anyhow::bail!("{} of {} batch rows failed", report.errors, report.rows.len());
    }
    Ok(())
}
