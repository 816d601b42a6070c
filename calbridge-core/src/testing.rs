//! In-memory Calendar app for tests.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, DurationRound, Utc};

use crate::automation::{Automation, SeriesChanges, SeriesDraft, SeriesRecord};
use crate::backend::{AppleCalendarBackend, CalendarBackend};
use crate::client::CalendarClient;
use crate::config::RetryPolicy;
use crate::error::{CalBridgeError, CalBridgeResult};
use crate::event::{Calendar, EventCreateInput, FieldUpdate};
use crate::recurrence::RecurrenceRule;
use crate::supervisor::CallSupervisor;

#[derive(Default)]
struct FakeState {
    calendars: Vec<Calendar>,
    series: BTreeMap<String, SeriesRecord>,
    alarms: HashMap<String, Vec<i64>>,
    next_uid: u32,
    transient_failures: u32,
    denied: bool,
    hidden: bool,
    ignore_alarm_writes: bool,
    calls: Vec<String>,
}

pub(crate) struct FakeCalendarApp {
    state: Mutex<FakeState>,
}

impl FakeCalendarApp {
    /// Calendars "Work" (`CAL-WORK`) and "Home" (`CAL-HOME`), no events.
    pub fn new() -> Self {
        let calendars = vec![
            Calendar {
                id: "CAL-WORK".into(),
                name: "Work".into(),
                writable: true,
            },
            Calendar {
                id: "CAL-HOME".into(),
                name: "Home".into(),
                writable: true,
            },
        ];
        FakeCalendarApp {
            state: Mutex::new(FakeState {
                calendars,
                ..Default::default()
            }),
        }
    }

    /// The next `n` calls fail with a transient error.
    pub fn fail_next(&self, n: u32) {
        self.state.lock().unwrap().transient_failures = n;
    }

    /// Every call fails as if Automation permission were denied.
    pub fn deny_access(&self) {
        self.state.lock().unwrap().denied = true;
    }

    /// Range enumeration returns nothing, like a store that lags writes.
    pub fn hide_from_reads(&self) {
        self.state.lock().unwrap().hidden = true;
    }

    /// Alarm writes report success but change nothing.
    pub fn ignore_alarm_writes(&self) {
        self.state.lock().unwrap().ignore_alarm_writes = true;
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn series_count(&self) -> usize {
        self.state.lock().unwrap().series.len()
    }

    fn enter(&self, call: &str) -> CalBridgeResult<std::sync::MutexGuard<'_, FakeState>> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(call.to_string());
        if state.denied {
            return Err(CalBridgeError::BackendUnavailable(
                "not authorized to send Apple events to Calendar (-1743)".into(),
            ));
        }
        if state.transient_failures > 0 {
            state.transient_failures -= 1;
            return Err(CalBridgeError::Transient("AppleEvent timed out (-1712)".into()));
        }
        Ok(state)
    }
}

fn missing(uid: &str) -> CalBridgeError {
    CalBridgeError::NotFound(format!("No event with uid {uid} (-1728)"))
}

impl Automation for FakeCalendarApp {
    fn ping(&self) -> CalBridgeResult<()> {
        self.enter("ping").map(|_| ())
    }

    fn calendars(&self) -> CalBridgeResult<Vec<Calendar>> {
        Ok(self.enter("calendars")?.calendars.clone())
    }

    fn series_in_range(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> CalBridgeResult<Vec<SeriesRecord>> {
        let state = self.enter("series_in_range")?;
        if state.hidden {
            return Ok(Vec::new());
        }
        Ok(state
            .series
            .values()
            .filter(|s| s.start < to && (s.recurrence.is_some() || s.end > from))
            .cloned()
            .collect())
    }

    fn series(&self, uid: &str) -> CalBridgeResult<Option<SeriesRecord>> {
        Ok(self.enter("series")?.series.get(uid).cloned())
    }

    fn create_series(&self, draft: &SeriesDraft) -> CalBridgeResult<String> {
        let mut state = self.enter("create_series")?;
        let calendar = state
            .calendars
            .iter()
            .find(|c| c.matches(&draft.calendar))
            .cloned()
            .ok_or_else(|| {
                CalBridgeError::NotFound(format!("No calendar named {} (-1728)", draft.calendar))
            })?;
        state.next_uid += 1;
        let uid = format!("FAKE-{:04}", state.next_uid);
        let record = SeriesRecord {
            uid: uid.clone(),
            calendar,
            title: draft.title.clone(),
            start: draft.start,
            end: draft.end,
            all_day: draft.all_day,
            location: draft.location.clone(),
            notes: draft.notes.clone(),
            url: draft.url.clone(),
            recurrence: draft.recurrence.clone(),
            excluded: draft.excluded.clone(),
            sequence: 0,
            modified: Some(Utc::now()),
        };
        state.series.insert(uid.clone(), record);
        Ok(uid)
    }

    fn modify_series(&self, uid: &str, changes: &SeriesChanges) -> CalBridgeResult<()> {
        let mut state = self.enter("modify_series")?;
        let record = state.series.get_mut(uid).ok_or_else(|| missing(uid))?;
        if let FieldUpdate::Set(v) = &changes.title {
            record.title = v.clone();
        }
        if let FieldUpdate::Set(v) = &changes.start {
            record.start = *v;
        }
        if let FieldUpdate::Set(v) = &changes.end {
            record.end = *v;
        }
        if let FieldUpdate::Set(v) = &changes.all_day {
            record.all_day = *v;
        }
        if let FieldUpdate::Set(v) = &changes.location {
            record.location = v.clone();
        }
        if let FieldUpdate::Set(v) = &changes.notes {
            record.notes = v.clone();
        }
        if let FieldUpdate::Set(v) = &changes.url {
            record.url = v.clone();
        }
        if let FieldUpdate::Set(v) = &changes.recurrence {
            record.recurrence = v.clone();
        }
        if let FieldUpdate::Set(v) = &changes.excluded {
            record.excluded = v.clone();
        }
        record.sequence += 1;
        record.modified = Some(Utc::now());
        Ok(())
    }

    fn delete_series(&self, uid: &str) -> CalBridgeResult<()> {
        let mut state = self.enter("delete_series")?;
        state.series.remove(uid).ok_or_else(|| missing(uid))?;
        state.alarms.remove(uid);
        Ok(())
    }

    fn alarm_offsets(&self, uid: &str) -> CalBridgeResult<Vec<i64>> {
        let state = self.enter("alarm_offsets")?;
        if !state.series.contains_key(uid) {
            return Err(missing(uid));
        }
        Ok(state.alarms.get(uid).cloned().unwrap_or_default())
    }

    fn clear_alarms(&self, uid: &str) -> CalBridgeResult<()> {
        let mut state = self.enter("clear_alarms")?;
        if !state.series.contains_key(uid) {
            return Err(missing(uid));
        }
        if !state.ignore_alarm_writes {
            state.alarms.remove(uid);
        }
        Ok(())
    }

    fn add_alarm(&self, uid: &str, minutes: i64) -> CalBridgeResult<()> {
        let mut state = self.enter("add_alarm")?;
        if !state.series.contains_key(uid) {
            return Err(missing(uid));
        }
        if !state.ignore_alarm_writes {
            state.alarms.entry(uid.to_string()).or_default().push(minutes);
        }
        Ok(())
    }
}

/// Backend over `fake` with no store and two immediate retries.
pub(crate) fn backend_for(fake: Arc<FakeCalendarApp>) -> AppleCalendarBackend {
    AppleCalendarBackend::new(
        fake,
        None,
        RetryPolicy {
            max_retries: 2,
            backoff: StdDuration::ZERO,
        },
    )
}

pub(crate) fn client_for(fake: Arc<FakeCalendarApp>) -> CalendarClient {
    let backend: Arc<dyn CalendarBackend> = Arc::new(backend_for(fake));
    CalendarClient::new(backend, CallSupervisor::new(Some(StdDuration::from_secs(10))))
}

/// A 30 minute "Standup" in "Work", starting on the minute.
pub(crate) fn single_input(start: DateTime<Utc>) -> EventCreateInput {
    let start = start.duration_trunc(Duration::minutes(1)).unwrap();
    EventCreateInput {
        calendar: "Work".into(),
        title: "Standup".into(),
        start,
        end: start + Duration::minutes(30),
        all_day: false,
        location: String::new(),
        notes: String::new(),
        url: String::new(),
        recurrence: None,
    }
}

pub(crate) fn weekly_input(start: DateTime<Utc>, count: u32) -> EventCreateInput {
    EventCreateInput {
        recurrence: Some(RecurrenceRule::parse(&format!("weekly*{count}")).unwrap()),
        ..single_input(start)
    }
}
