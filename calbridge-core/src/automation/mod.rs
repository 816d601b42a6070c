//! The Calendar app's scripting interface.
//!
//! The app only works in whole series: an event is addressed by uid, and a
//! recurring event is one record with an RRULE and a list of excluded dates.
//! Occurrences, edit scopes and composite ids are layered on top by the
//! backend; this module only moves series records in and out of the app.

mod calendar_app;
mod script;

pub use calendar_app::CalendarApp;
pub use script::{OsaScript, applescript_escape};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CalBridgeResult;
use crate::event::{Calendar, Event, FieldUpdate};
use crate::identity;
use crate::recurrence;

/// A series exactly as the app stores it (recurrence unexpanded).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesRecord {
    pub uid: String,
    pub calendar: Calendar,
    pub title: String,
    /// Start and end of the first occurrence.
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub all_day: bool,
    pub location: String,
    pub notes: String,
    pub url: String,
    pub recurrence: Option<String>,
    pub excluded: Vec<DateTime<Utc>>,
    pub sequence: i64,
    pub modified: Option<DateTime<Utc>>,
}

impl SeriesRecord {
    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    fn event_at(&self, start: DateTime<Utc>) -> CalBridgeResult<Event> {
        let occurrence = if self.recurrence.is_some() {
            start.timestamp()
        } else {
            0
        };
        Ok(Event {
            id: identity::encode(&self.uid, occurrence)?,
            uid: self.uid.clone(),
            calendar_id: self.calendar.id.clone(),
            calendar_name: self.calendar.name.clone(),
            title: self.title.clone(),
            start,
            end: start + self.duration(),
            all_day: self.all_day,
            location: self.location.clone(),
            notes: self.notes.clone(),
            url: self.url.clone(),
            recurrence: self.recurrence.clone(),
            sequence: self.sequence,
            last_modified: self.modified,
        })
    }

    /// The series itself, addressed without an occurrence.
    pub fn as_series_event(&self) -> CalBridgeResult<Event> {
        let mut event = self.event_at(self.start)?;
        event.id = identity::encode(&self.uid, 0)?;
        Ok(event)
    }

    /// Every occurrence overlapping `[from, to)`, with composite ids that
    /// match what the store read path produces.
    pub fn occurrences(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> CalBridgeResult<Vec<Event>> {
        match &self.recurrence {
            None => {
                let event = self.event_at(self.start)?;
                Ok(if event.overlaps(from, to) {
                    vec![event]
                } else {
                    Vec::new()
                })
            }
            Some(rrule) => recurrence::expand(
                self.start,
                self.duration(),
                rrule,
                &self.excluded,
                from,
                to,
            )?
            .into_iter()
            .map(|start| self.event_at(start))
            .collect(),
        }
    }

    /// The occurrence starting at `epoch`, if the series produces one.
    pub fn occurrence_at(&self, epoch: i64) -> CalBridgeResult<Option<Event>> {
        let Some(at) = DateTime::<Utc>::from_timestamp(epoch, 0) else {
            return Ok(None);
        };
        if self.recurrence.is_none() {
            return if self.start == at {
                self.event_at(at).map(Some)
            } else {
                Ok(None)
            };
        }
        let found = self
            .occurrences(at, at + Duration::seconds(1))?
            .into_iter()
            .find(|e| e.start == at);
        Ok(found)
    }
}

/// Fields for a new series.
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesDraft {
    /// Calendar id or display name.
    pub calendar: String,
    pub title: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub all_day: bool,
    pub location: String,
    pub notes: String,
    pub url: String,
    pub recurrence: Option<String>,
    pub excluded: Vec<DateTime<Utc>>,
}

impl SeriesDraft {
    /// A copy of `record` (under a new uid once created).
    pub fn from_record(record: &SeriesRecord) -> Self {
        SeriesDraft {
            calendar: record.calendar.id.clone(),
            title: record.title.clone(),
            start: record.start,
            end: record.end,
            all_day: record.all_day,
            location: record.location.clone(),
            notes: record.notes.clone(),
            url: record.url.clone(),
            recurrence: record.recurrence.clone(),
            excluded: record.excluded.clone(),
        }
    }
}

/// Property writes against an existing series. Only `Set` fields are sent.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SeriesChanges {
    pub title: FieldUpdate<String>,
    pub start: FieldUpdate<DateTime<Utc>>,
    pub end: FieldUpdate<DateTime<Utc>>,
    pub all_day: FieldUpdate<bool>,
    pub location: FieldUpdate<String>,
    pub notes: FieldUpdate<String>,
    pub url: FieldUpdate<String>,
    pub recurrence: FieldUpdate<Option<String>>,
    pub excluded: FieldUpdate<Vec<DateTime<Utc>>>,
}

impl SeriesChanges {
    pub fn is_empty(&self) -> bool {
        *self == SeriesChanges::default()
    }

    /// Every editable property set back to what `record` holds.
    pub fn restoring(record: &SeriesRecord) -> Self {
        SeriesChanges {
            title: FieldUpdate::Set(record.title.clone()),
            start: FieldUpdate::Set(record.start),
            end: FieldUpdate::Set(record.end),
            all_day: FieldUpdate::Set(record.all_day),
            location: FieldUpdate::Set(record.location.clone()),
            notes: FieldUpdate::Set(record.notes.clone()),
            url: FieldUpdate::Set(record.url.clone()),
            recurrence: FieldUpdate::Set(record.recurrence.clone()),
            excluded: FieldUpdate::Set(record.excluded.clone()),
        }
    }
}

/// Scripting access to the live Calendar app.
///
/// Calls are blocking and are expected to be issued one at a time; the app
/// is a stateful UI process and concurrent scripts interleave unpredictably.
pub trait Automation: Send + Sync {
    /// Cheap round trip proving the app answers and scripting is permitted.
    fn ping(&self) -> CalBridgeResult<()>;

    fn calendars(&self) -> CalBridgeResult<Vec<Calendar>>;

    /// Series that may have an occurrence overlapping `[from, to)`.
    fn series_in_range(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> CalBridgeResult<Vec<SeriesRecord>>;

    fn series(&self, uid: &str) -> CalBridgeResult<Option<SeriesRecord>>;

    /// Returns the uid the app assigned.
    fn create_series(&self, draft: &SeriesDraft) -> CalBridgeResult<String>;

    fn modify_series(&self, uid: &str, changes: &SeriesChanges) -> CalBridgeResult<()>;

    fn delete_series(&self, uid: &str) -> CalBridgeResult<()>;

    /// Alarm trigger offsets in minutes relative to the start.
    fn alarm_offsets(&self, uid: &str) -> CalBridgeResult<Vec<i64>>;

    fn clear_alarms(&self, uid: &str) -> CalBridgeResult<()>;

    fn add_alarm(&self, uid: &str, minutes: i64) -> CalBridgeResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn weekly() -> SeriesRecord {
        let start = Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap();
        SeriesRecord {
            uid: "S1".into(),
            calendar: Calendar {
                id: "CAL".into(),
                name: "Work".into(),
                writable: true,
            },
            title: "Sync".into(),
            start,
            end: start + Duration::minutes(30),
            all_day: false,
            location: String::new(),
            notes: String::new(),
            url: String::new(),
            recurrence: Some("FREQ=WEEKLY;COUNT=3".into()),
            excluded: Vec::new(),
            sequence: 1,
            modified: None,
        }
    }

    #[test]
    fn occurrences_get_epoch_qualified_ids() {
        let series = weekly();
        let events = series
            .occurrences(series.start, series.start + Duration::days(30))
            .unwrap();
        assert_eq!(events.len(), 3);
        assert_eq!(events[1].id, format!("S1@{}", (series.start + Duration::weeks(1)).timestamp()));
        assert_eq!(events[1].end - events[1].start, Duration::minutes(30));
    }

    #[test]
    fn single_event_keeps_bare_uid() {
        let mut series = weekly();
        series.recurrence = None;
        let events = series
            .occurrences(series.start, series.start + Duration::days(1))
            .unwrap();
        assert_eq!(events[0].id, "S1");
        assert!(series.occurrence_at(series.start.timestamp()).unwrap().is_some());
        assert!(series.occurrence_at(series.start.timestamp() + 60).unwrap().is_none());
    }

    #[test]
    fn occurrence_lookup_respects_exclusions() {
        let mut series = weekly();
        let second = series.start + Duration::weeks(1);
        assert!(series.occurrence_at(second.timestamp()).unwrap().is_some());
        series.excluded.push(second);
        assert!(series.occurrence_at(second.timestamp()).unwrap().is_none());
    }

    #[test]
    fn restoring_changes_cover_rule_and_exclusions() {
        let mut series = weekly();
        series.excluded.push(series.start + Duration::weeks(1));
        let changes = SeriesChanges::restoring(&series);
        assert_eq!(changes.recurrence, FieldUpdate::Set(series.recurrence.clone()));
        assert_eq!(changes.excluded, FieldUpdate::Set(series.excluded.clone()));
        assert_eq!(changes.start, FieldUpdate::Set(series.start));

        let draft = SeriesDraft::from_record(&series);
        assert_eq!(draft.calendar, "CAL");
        assert_eq!(draft.excluded, series.excluded);
    }
}
