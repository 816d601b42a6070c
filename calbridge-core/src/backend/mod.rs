//! The backend contract and its Calendar app implementation.
//!
//! Reads prefer the on-disk store and fall back to the automation layer;
//! writes always go through automation and are confirmed by reading back.
//! Every automation call is wrapped in the configured retry policy.

mod read;
mod reminder;
mod retry;
mod write;

use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;

use crate::automation::{Automation, CalendarApp, SeriesRecord};
use crate::config::{BridgeConfig, RetryPolicy};
use crate::error::{CalBridgeError, CalBridgeResult};
use crate::event::{Calendar, Event, EventCreateInput, EventUpdatePatch, ReminderOffset};
use crate::filter::EventFilter;
use crate::scope::RecurrenceScope;
use crate::store::StoreReader;

pub(crate) use retry::with_retry;

/// Operations every calendar backend provides. Calls block; the
/// [`CallSupervisor`](crate::supervisor::CallSupervisor) runs them off the
/// async runtime.
pub trait CalendarBackend: Send + Sync {
    /// Check each access path. Individual check failures are reported in
    /// the result, not as an error.
    fn doctor(&self) -> DoctorReport;

    fn list_calendars(&self) -> CalBridgeResult<Vec<Calendar>>;

    fn list_events(&self, filter: &EventFilter) -> CalBridgeResult<Vec<Event>>;

    fn get_event_by_id(&self, id: &str) -> CalBridgeResult<Event>;

    fn add_event(&self, input: &EventCreateInput) -> CalBridgeResult<Event>;

    fn update_event(
        &self,
        id: &str,
        scope: RecurrenceScope,
        patch: &EventUpdatePatch,
    ) -> CalBridgeResult<Event>;

    fn delete_event(&self, id: &str, scope: RecurrenceScope) -> CalBridgeResult<()>;

    fn get_reminder_offset(&self, id: &str) -> CalBridgeResult<Option<ReminderOffset>>;

    /// Replace any reminder with `offset` and verify it reads back.
    fn set_reminder_offset(&self, id: &str, offset: ReminderOffset)
    -> CalBridgeResult<ReminderOffset>;

    /// Remove every reminder and verify none remain.
    fn clear_reminder(&self, id: &str) -> CalBridgeResult<()>;

    /// The whole series behind `id` as the app stores it.
    fn series_snapshot(&self, id: &str) -> CalBridgeResult<SeriesRecord>;

    /// Put a series back to `snapshot`. A series that no longer exists is
    /// re-created under a new uid. Returns the series-level record.
    fn restore_series(&self, snapshot: &SeriesRecord) -> CalBridgeResult<Event>;
}

/// Builds the backend once per command from the loaded configuration.
pub type BackendFactory =
    Arc<dyn Fn(&BridgeConfig) -> CalBridgeResult<Arc<dyn CalendarBackend>> + Send + Sync>;

/// Factory for the live Calendar app and its store.
pub fn default_factory() -> BackendFactory {
    Arc::new(|config: &BridgeConfig| {
        let automation = Arc::new(CalendarApp::new(&config.app_name));
        let backend = AppleCalendarBackend::new(
            automation,
            Some(config.store_path()),
            config.retry_policy()?,
        );
        Ok(Arc::new(backend) as Arc<dyn CalendarBackend>)
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DoctorCheck {
    pub name: String,
    pub ok: bool,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DoctorReport {
    pub checks: Vec<DoctorCheck>,
}

impl DoctorReport {
    pub fn ok(&self) -> bool {
        self.checks.iter().all(|c| c.ok)
    }

    fn record(&mut self, name: &str, result: CalBridgeResult<String>) {
        let (ok, detail) = match result {
            Ok(detail) => (true, detail),
            Err(e) => (false, e.to_string()),
        };
        self.checks.push(DoctorCheck {
            name: name.to_string(),
            ok,
            detail,
        });
    }
}

/// Backend over the Calendar app: store reads, automation writes.
pub struct AppleCalendarBackend {
    automation: Arc<dyn Automation>,
    store_path: Option<PathBuf>,
    retry: RetryPolicy,
}

impl AppleCalendarBackend {
    /// `store_path` of `None` sends every read through automation.
    pub fn new(
        automation: Arc<dyn Automation>,
        store_path: Option<PathBuf>,
        retry: RetryPolicy,
    ) -> Self {
        AppleCalendarBackend {
            automation,
            store_path,
            retry,
        }
    }

    fn store(&self) -> CalBridgeResult<StoreReader> {
        match &self.store_path {
            Some(path) => StoreReader::open(path),
            None => Err(CalBridgeError::Store("no calendar store configured".into())),
        }
    }

    fn retried<T>(
        &self,
        action: &str,
        op: impl FnMut() -> CalBridgeResult<T>,
    ) -> CalBridgeResult<T> {
        with_retry(&self.retry, action, op)
    }

    /// The series behind `uid`, or `NotFound`.
    fn master(&self, uid: &str) -> CalBridgeResult<SeriesRecord> {
        self.retried("series", || self.automation.series(uid))?
            .ok_or_else(|| CalBridgeError::NotFound(format!("no event with uid {uid}")))
    }
}

impl CalendarBackend for AppleCalendarBackend {
    fn doctor(&self) -> DoctorReport {
        let mut report = DoctorReport { checks: Vec::new() };

        report.record(
            "automation",
            self.automation
                .ping()
                .map(|_| "Calendar app answers scripting requests".to_string()),
        );
        report.record(
            "store",
            self.store().and_then(|store| {
                store.check_schema()?;
                Ok(format!("{} is readable", store.path().display()))
            }),
        );
        report
    }

    fn list_calendars(&self) -> CalBridgeResult<Vec<Calendar>> {
        let mut calendars = self.retried("calendars", || self.automation.calendars())?;
        calendars.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));
        Ok(calendars)
    }

    fn list_events(&self, filter: &EventFilter) -> CalBridgeResult<Vec<Event>> {
        self.read_events(filter)
    }

    fn get_event_by_id(&self, id: &str) -> CalBridgeResult<Event> {
        self.find_event(id)
    }

    fn add_event(&self, input: &EventCreateInput) -> CalBridgeResult<Event> {
        self.create_event(input)
    }

    fn update_event(
        &self,
        id: &str,
        scope: RecurrenceScope,
        patch: &EventUpdatePatch,
    ) -> CalBridgeResult<Event> {
        self.modify_event(id, scope, patch)
    }

    fn delete_event(&self, id: &str, scope: RecurrenceScope) -> CalBridgeResult<()> {
        self.remove_event(id, scope)
    }

    fn get_reminder_offset(&self, id: &str) -> CalBridgeResult<Option<ReminderOffset>> {
        self.read_reminder(id)
    }

    fn set_reminder_offset(
        &self,
        id: &str,
        offset: ReminderOffset,
    ) -> CalBridgeResult<ReminderOffset> {
        self.write_reminder(id, offset)
    }

    fn clear_reminder(&self, id: &str) -> CalBridgeResult<()> {
        self.remove_reminder(id)
    }

    fn series_snapshot(&self, id: &str) -> CalBridgeResult<SeriesRecord> {
        let (uid, _) = crate::identity::decode(id);
        self.master(&uid)
    }

    fn restore_series(&self, snapshot: &SeriesRecord) -> CalBridgeResult<Event> {
        self.put_back_series(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeCalendarApp, backend_for};

    #[test]
    fn doctor_reports_each_path() {
        let fake = Arc::new(FakeCalendarApp::new());
        let report = backend_for(fake.clone()).doctor();
        assert_eq!(report.checks.len(), 2);
        assert!(report.checks[0].ok);
        assert!(!report.checks[1].ok);
        assert!(!report.ok());
    }

    #[test]
    fn doctor_survives_unreachable_automation() {
        let fake = Arc::new(FakeCalendarApp::new());
        fake.deny_access();
        let report = backend_for(fake).doctor();
        assert!(!report.checks[0].ok);
        assert!(report.checks[0].detail.contains("not authorized"));
    }

    #[test]
    fn calendars_sorted_by_name() {
        let fake = Arc::new(FakeCalendarApp::new());
        let names: Vec<_> = backend_for(fake)
            .list_calendars()
            .unwrap()
            .into_iter()
            .map(|c| c.name)
            .collect();
        assert_eq!(names, vec!["Home", "Work"]);
    }
}
