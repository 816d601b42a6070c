//! Create, update and delete through automation.
//!
//! The app edits whole series only, so the scopes are built from series
//! primitives: `this` adds an excluded date (and re-creates the edited
//! occurrence on its own), `future` ends the series just before the
//! occurrence (and re-creates the tail as a new series), and `series`
//! edits the series itself, moving it by the same amount the anchoring
//! occurrence moves.

use chrono::{DateTime, Duration, SubsecRound, Utc};
use tracing::{debug, info};

use super::AppleCalendarBackend;
use crate::automation::{SeriesChanges, SeriesDraft, SeriesRecord};
use crate::error::{CalBridgeError, CalBridgeResult};
use crate::event::{Event, EventCreateInput, EventUpdatePatch, FieldUpdate};
use crate::filter::EventFilter;
use crate::identity;
use crate::recurrence::{self, RecurrenceRule};
use crate::scope::{MutationScope, RecurrenceScope};

/// Slack around a new event's own span when confirming the write.
const CONFIRM_SLACK_MINUTES: i64 = 1;
/// Half-width of the window re-read after an update.
const REREAD_SPAN_DAYS: i64 = 31;

fn rrule_of(rule: &FieldUpdate<Option<RecurrenceRule>>) -> FieldUpdate<Option<String>> {
    match rule {
        FieldUpdate::Keep => FieldUpdate::Keep,
        FieldUpdate::Set(rule) => FieldUpdate::Set(rule.as_ref().map(RecurrenceRule::to_rrule)),
    }
}

/// Record for a freshly created series when the read-back cannot see it yet.
fn constructed(uid: &str, input: &EventCreateInput) -> Event {
    Event {
        id: uid.to_string(),
        uid: uid.to_string(),
        calendar_id: String::new(),
        calendar_name: input.calendar.trim().to_string(),
        title: input.title.clone(),
        start: input.start.trunc_subsecs(0),
        end: input.end.trunc_subsecs(0),
        all_day: input.all_day,
        location: input.location.clone(),
        notes: input.notes.clone(),
        url: input.url.clone(),
        recurrence: input.recurrence.as_ref().map(RecurrenceRule::to_rrule),
        sequence: 0,
        last_modified: None,
    }
}

/// Series-level view of an occurrence record.
fn as_series_level(mut event: Event) -> Event {
    event.id = event.uid.clone();
    event
}

impl AppleCalendarBackend {
    pub(super) fn create_event(&self, input: &EventCreateInput) -> CalBridgeResult<Event> {
        input.validate()?;

        let draft = SeriesDraft {
            calendar: input.calendar.trim().to_string(),
            title: input.title.clone(),
            start: input.start.trunc_subsecs(0),
            end: input.end.trunc_subsecs(0),
            all_day: input.all_day,
            location: input.location.clone(),
            notes: input.notes.clone(),
            url: input.url.clone(),
            recurrence: input.recurrence.as_ref().map(RecurrenceRule::to_rrule),
            excluded: Vec::new(),
        };
        let uid = self.retried("create", || self.automation.create_series(&draft))?;
        info!(uid = %uid, calendar = %draft.calendar, "created event");

        let slack = Duration::minutes(CONFIRM_SLACK_MINUTES);
        let window = EventFilter::new(draft.start - slack, draft.end + slack);
        match self.read_events(&window) {
            Ok(events) => {
                if let Some(event) = events.into_iter().find(|e| e.uid == uid) {
                    return Ok(as_series_level(event));
                }
                debug!(uid = %uid, "new event not indexed yet, returning constructed record");
            }
            Err(e) => debug!(uid = %uid, error = %e, "could not confirm new event"),
        }
        Ok(constructed(&uid, input))
    }

    /// Occurrence `occurrence` of `master`, or the series' first occurrence
    /// for a series-level id.
    fn anchor(&self, master: &SeriesRecord, occurrence: i64) -> CalBridgeResult<Event> {
        if occurrence == 0 {
            return master.as_series_event();
        }
        master.occurrence_at(occurrence)?.ok_or_else(|| {
            CalBridgeError::NotFound(format!(
                "{} has no occurrence at {}",
                master.uid, occurrence
            ))
        })
    }

    pub(super) fn modify_event(
        &self,
        id: &str,
        scope: RecurrenceScope,
        patch: &EventUpdatePatch,
    ) -> CalBridgeResult<Event> {
        let (uid, occurrence) = identity::decode(id);
        let scope = scope.resolve(occurrence)?;
        patch.validate()?;

        let master = self.master(&uid)?;
        if let Some(expected) = patch.expected_sequence {
            if master.sequence != expected {
                return Err(CalBridgeError::Concurrency(format!(
                    "{id} is at sequence {}, expected {expected}",
                    master.sequence
                )));
            }
        }
        let anchor = self.anchor(&master, occurrence)?;
        let (new_start, new_end) = patch.times_for(&anchor);
        crate::event::validate_time_range(new_start, new_end)?;

        let scope = if master.recurrence.is_none()
            || (scope == MutationScope::Future && anchor.start <= master.start)
        {
            MutationScope::Series
        } else {
            scope
        };

        let (target_uid, target_start) = match scope {
            MutationScope::Series => {
                self.update_series(&master, &anchor, patch)?;
                (uid.clone(), new_start)
            }
            MutationScope::This => (self.detach_occurrence(&master, &anchor, patch)?, new_start),
            MutationScope::Future => (self.split_series(&master, &anchor, patch)?, new_start),
        };

        let mut expected = patch.apply_to(&anchor);
        expected.uid = target_uid.clone();
        expected.id = target_uid.clone();
        let series_level = occurrence == 0 && target_uid == uid;

        let span = Duration::days(REREAD_SPAN_DAYS);
        let window = EventFilter::new(target_start - span, target_start + span);
        let reread = self.read_events(&window).map(|events| {
            events
                .into_iter()
                .filter(|e| e.uid == target_uid)
                .find(|e| e.start == target_start)
        });
        match reread {
            Ok(Some(event)) if series_level => Ok(as_series_level(event)),
            Ok(Some(event)) => Ok(event),
            Ok(None) | Err(_) => {
                debug!(uid = %target_uid, "updated event not visible yet, returning patched record");
                if expected.recurrence.is_some() && !series_level && scope != MutationScope::This {
                    expected.id = identity::encode(&target_uid, target_start.timestamp())?;
                }
                Ok(expected)
            }
        }
    }

    fn update_series(
        &self,
        master: &SeriesRecord,
        anchor: &Event,
        patch: &EventUpdatePatch,
    ) -> CalBridgeResult<()> {
        let mut changes = SeriesChanges {
            title: patch.title.clone(),
            all_day: patch.all_day.clone(),
            location: patch.location.clone(),
            notes: patch.notes.clone(),
            url: patch.url.clone(),
            recurrence: rrule_of(&patch.recurrence),
            ..Default::default()
        };

        if !(patch.start.is_keep() && patch.end.is_keep()) {
            let (new_start, new_end) = patch.times_for(anchor);
            let shift = new_start - anchor.start;
            let series_start = master.start + shift;
            changes.start = FieldUpdate::Set(series_start);
            changes.end = FieldUpdate::Set(series_start + (new_end - new_start));
            if shift != Duration::zero() && !master.excluded.is_empty() {
                changes.excluded =
                    FieldUpdate::Set(master.excluded.iter().map(|d| *d + shift).collect());
            }
        }

        self.retried("modify", || self.automation.modify_series(&master.uid, &changes))
    }

    /// Exclude the occurrence and re-create it standalone with the patch.
    fn detach_occurrence(
        &self,
        master: &SeriesRecord,
        anchor: &Event,
        patch: &EventUpdatePatch,
    ) -> CalBridgeResult<String> {
        self.exclude(master, anchor.start)?;

        let updated = patch.apply_to(anchor);
        let recurrence = match &patch.recurrence {
            FieldUpdate::Set(Some(rule)) => Some(rule.to_rrule()),
            _ => None,
        };
        let draft = SeriesDraft {
            calendar: master.calendar.id.clone(),
            recurrence,
            excluded: Vec::new(),
            ..draft_from_event(&updated)
        };
        self.retried("create", || self.automation.create_series(&draft))
    }

    /// End the series before the occurrence and continue it as a new
    /// series carrying the patch.
    fn split_series(
        &self,
        master: &SeriesRecord,
        anchor: &Event,
        patch: &EventUpdatePatch,
    ) -> CalBridgeResult<String> {
        let rrule = master.recurrence.as_deref().unwrap_or_default();
        let used = recurrence::generated_before(master.start, rrule, anchor.start)?;
        self.truncate(master, anchor.start)?;

        let updated = patch.apply_to(anchor);
        let shift = updated.start - anchor.start;
        let recurrence = match &patch.recurrence {
            FieldUpdate::Keep => Some(recurrence::remaining_after(rrule, used)),
            FieldUpdate::Set(rule) => rule.as_ref().map(RecurrenceRule::to_rrule),
        };
        let excluded = master
            .excluded
            .iter()
            .filter(|d| **d > anchor.start)
            .map(|d| *d + shift)
            .collect();
        let draft = SeriesDraft {
            calendar: master.calendar.id.clone(),
            recurrence,
            excluded,
            ..draft_from_event(&updated)
        };
        self.retried("create", || self.automation.create_series(&draft))
    }

    fn exclude(&self, master: &SeriesRecord, at: DateTime<Utc>) -> CalBridgeResult<()> {
        let mut excluded = master.excluded.clone();
        if !excluded.contains(&at) {
            excluded.push(at);
            excluded.sort();
        }
        let changes = SeriesChanges {
            excluded: FieldUpdate::Set(excluded),
            ..Default::default()
        };
        self.retried("modify", || self.automation.modify_series(&master.uid, &changes))
    }

    fn truncate(&self, master: &SeriesRecord, at: DateTime<Utc>) -> CalBridgeResult<()> {
        let rrule = master.recurrence.as_deref().unwrap_or_default();
        let changes = SeriesChanges {
            recurrence: FieldUpdate::Set(Some(recurrence::truncate_before(rrule, at))),
            excluded: FieldUpdate::Set(
                master.excluded.iter().filter(|d| **d < at).copied().collect(),
            ),
            ..Default::default()
        };
        self.retried("modify", || self.automation.modify_series(&master.uid, &changes))
    }

    pub(super) fn remove_event(&self, id: &str, scope: RecurrenceScope) -> CalBridgeResult<()> {
        let (uid, occurrence) = identity::decode(id);
        let scope = scope.resolve(occurrence)?;
        let master = self.master(&uid)?;

        if scope == MutationScope::Series {
            return self.delete_series(&uid);
        }

        let anchor = self.anchor(&master, occurrence)?;
        match scope {
            _ if master.recurrence.is_none() => self.delete_series(&uid),
            MutationScope::Future if anchor.start <= master.start => self.delete_series(&uid),
            MutationScope::Future => {
                info!(uid = %uid, from = %anchor.start, "ending series before occurrence");
                self.truncate(&master, anchor.start)
            }
            _ => {
                info!(uid = %uid, at = %anchor.start, "excluding occurrence");
                self.exclude(&master, anchor.start)
            }
        }
    }

    pub(super) fn put_back_series(&self, snapshot: &SeriesRecord) -> CalBridgeResult<Event> {
        let uid = match self.retried("series", || self.automation.series(&snapshot.uid))? {
            Some(_) => {
                let changes = SeriesChanges::restoring(snapshot);
                self.retried("modify", || self.automation.modify_series(&snapshot.uid, &changes))?;
                info!(uid = %snapshot.uid, "restored series");
                snapshot.uid.clone()
            }
            None => {
                let draft = SeriesDraft::from_record(snapshot);
                let uid = self.retried("create", || self.automation.create_series(&draft))?;
                info!(uid = %uid, previous = %snapshot.uid, "re-created series");
                uid
            }
        };
        self.master(&uid)?.as_series_event()
    }

    fn delete_series(&self, uid: &str) -> CalBridgeResult<()> {
        info!(uid = %uid, "deleting event");
        self.retried("delete", || self.automation.delete_series(uid))
    }
}

fn draft_from_event(event: &Event) -> SeriesDraft {
    SeriesDraft {
        calendar: event.calendar_id.clone(),
        title: event.title.clone(),
        start: event.start,
        end: event.end,
        all_day: event.all_day,
        location: event.location.clone(),
        notes: event.notes.clone(),
        url: event.url.clone(),
        recurrence: event.recurrence.clone(),
        excluded: Vec::new(),
    }
}
