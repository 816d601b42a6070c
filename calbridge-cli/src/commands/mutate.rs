use anyhow::{Result, bail};
use calbridge_core::journal::EntryTags;
use calbridge_core::recurrence::RecurrenceRule;
use calbridge_core::{EventCreateInput, EventUpdatePatch, FieldUpdate, RecurrenceScope};
use chrono::Duration;

use super::Context;
use crate::utils::{parse_instant, parse_length, print_json};

pub struct AddArgs {
    pub title: String,
    pub calendar: String,
    pub start: String,
    pub end: Option<String>,
    pub duration: Option<String>,
    pub all_day: bool,
    pub location: Option<String>,
    pub notes: Option<String>,
    pub url: Option<String>,
    pub repeat: Option<String>,
}

pub struct UpdateArgs {
    pub title: Option<String>,
    pub start: Option<String>,
    pub end: Option<String>,
    pub all_day: Option<bool>,
    pub location: Option<String>,
    pub notes: Option<String>,
    pub url: Option<String>,
    pub repeat: Option<String>,
    pub no_repeat: bool,
    pub expected_sequence: Option<i64>,
}

fn create_input(args: AddArgs) -> Result<EventCreateInput> {
    let start = parse_instant(&args.start)?;
    let end = match (args.end, args.duration) {
        (Some(end), _) => parse_instant(&end)?,
        (None, Some(length)) => start + parse_length(&length)?,
        (None, None) if args.all_day => start + Duration::days(1),
        (None, None) => start + Duration::hours(1),
    };
    let recurrence = args
        .repeat
        .as_deref()
        .map(RecurrenceRule::parse)
        .transpose()?;

    Ok(EventCreateInput {
        calendar: args.calendar,
        title: args.title,
        start,
        end,
        all_day: args.all_day,
        location: args.location.unwrap_or_default(),
        notes: args.notes.unwrap_or_default(),
        url: args.url.unwrap_or_default(),
        recurrence,
    })
}

fn update_patch(args: UpdateArgs) -> Result<EventUpdatePatch> {
    let recurrence = match (args.repeat.as_deref(), args.no_repeat) {
        (Some(rule), _) => FieldUpdate::Set(Some(RecurrenceRule::parse(rule)?)),
        (None, true) => FieldUpdate::Set(None),
        (None, false) => FieldUpdate::Keep,
    };

    let patch = EventUpdatePatch {
        title: args.title.into(),
        start: args.start.as_deref().map(parse_instant).transpose()?.into(),
        end: args.end.as_deref().map(parse_instant).transpose()?.into(),
        all_day: args.all_day.into(),
        location: args.location.into(),
        notes: args.notes.into(),
        url: args.url.into(),
        recurrence,
        expected_sequence: args.expected_sequence,
    };
    if patch.is_empty() {
        bail!("Nothing to update: pass at least one field to change");
    }
    Ok(patch)
}

pub async fn add(ctx: &Context, args: AddArgs) -> Result<()> {
    let input = create_input(args)?;
    let report = ctx.session()?.add(input, &EntryTags::default()).await?;
    print_json(&report)
}

pub async fn update(ctx: &Context, id: &str, scope: &str, args: UpdateArgs) -> Result<()> {
    let scope: RecurrenceScope = scope.parse()?;
    let patch = update_patch(args)?;
    let report = ctx
        .session()?
        .update(id, scope, patch, &EntryTags::default())
        .await?;
    print_json(&report)
}

pub async fn delete(ctx: &Context, id: &str, scope: &str) -> Result<()> {
    let scope: RecurrenceScope = scope.parse()?;
    let report = ctx
        .session()?
        .delete(id, scope, &EntryTags::default())
        .await?;
    print_json(&report)
}
