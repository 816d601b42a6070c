use anyhow::Result;
use calbridge_core::filter::EventFilter;
use chrono::{Duration, Utc};

use super::{Context, DEFAULT_WINDOW_DAYS};
use crate::utils::{parse_instant, print_json};

pub struct ListArgs {
    pub from: Option<String>,
    pub to: Option<String>,
    pub calendars: Vec<String>,
    pub query: Option<String>,
    pub field: Option<String>,
    pub limit: Option<usize>,
}

pub async fn calendars(ctx: &Context) -> Result<()> {
    let calendars = ctx.client.list_calendars().await?;
    print_json(&calendars)
}

pub async fn list(ctx: &Context, args: ListArgs) -> Result<()> {
    let from = match args.from.as_deref() {
        Some(text) => parse_instant(text)?,
        None => Utc::now(),
    };
    let to = match args.to.as_deref() {
        Some(text) => parse_instant(text)?,
        None => from + Duration::days(DEFAULT_WINDOW_DAYS),
    };

    let filter = EventFilter {
        calendars: args.calendars,
        query: args.query,
        field: args.field,
        limit: args.limit,
        ..EventFilter::new(from, to)
    };
    let events = ctx.client.list_events(filter).await?;
    print_json(&events)
}

pub async fn get(ctx: &Context, id: &str) -> Result<()> {
    let event = ctx.client.get_event(id).await?;
    print_json(&event)
}
