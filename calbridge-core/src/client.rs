//! Command context: the backend built for this invocation plus the
//! supervisor every call goes through.

use std::sync::Arc;

use crate::automation::SeriesRecord;
use crate::backend::{BackendFactory, CalendarBackend, DoctorReport};
use crate::config::BridgeConfig;
use crate::error::CalBridgeResult;
use crate::event::{Calendar, Event, EventCreateInput, EventUpdatePatch, ReminderOffset};
use crate::filter::EventFilter;
use crate::identity;
use crate::scope::RecurrenceScope;
use crate::supervisor::CallSupervisor;

#[derive(Clone)]
pub struct CalendarClient {
    backend: Arc<dyn CalendarBackend>,
    supervisor: CallSupervisor,
}

impl CalendarClient {
    pub fn new(backend: Arc<dyn CalendarBackend>, supervisor: CallSupervisor) -> Self {
        CalendarClient {
            backend,
            supervisor,
        }
    }

    /// Build the backend with `factory` and a supervisor using the
    /// configured deadline.
    pub fn from_config(config: &BridgeConfig, factory: &BackendFactory) -> CalBridgeResult<Self> {
        let backend = factory(config)?;
        Ok(CalendarClient::new(backend, CallSupervisor::new(config.deadline()?)))
    }

    pub fn supervisor(&self) -> &CallSupervisor {
        &self.supervisor
    }

    pub async fn doctor(&self) -> CalBridgeResult<DoctorReport> {
        let backend = self.backend.clone();
        self.supervisor.run("doctor", move || Ok(backend.doctor())).await
    }

    pub async fn list_calendars(&self) -> CalBridgeResult<Vec<Calendar>> {
        let backend = self.backend.clone();
        self.supervisor
            .run("list-calendars", move || backend.list_calendars())
            .await
    }

    pub async fn list_events(&self, filter: EventFilter) -> CalBridgeResult<Vec<Event>> {
        filter.validate()?;
        let backend = self.backend.clone();
        self.supervisor
            .run("list-events", move || backend.list_events(&filter))
            .await
    }

    pub async fn get_event(&self, id: &str) -> CalBridgeResult<Event> {
        let backend = self.backend.clone();
        let id = id.to_string();
        self.supervisor
            .run("get-event", move || backend.get_event_by_id(&id))
            .await
    }

    pub async fn add_event(&self, input: EventCreateInput) -> CalBridgeResult<Event> {
        input.validate()?;
        let backend = self.backend.clone();
        self.supervisor
            .run("add-event", move || backend.add_event(&input))
            .await
    }

    pub async fn update_event(
        &self,
        id: &str,
        scope: RecurrenceScope,
        patch: EventUpdatePatch,
    ) -> CalBridgeResult<Event> {
        scope.resolve(identity::decode(id).1)?;
        patch.validate()?;
        let backend = self.backend.clone();
        let id = id.to_string();
        self.supervisor
            .run("update-event", move || backend.update_event(&id, scope, &patch))
            .await
    }

    pub async fn delete_event(&self, id: &str, scope: RecurrenceScope) -> CalBridgeResult<()> {
        scope.resolve(identity::decode(id).1)?;
        let backend = self.backend.clone();
        let id = id.to_string();
        self.supervisor
            .run("delete-event", move || backend.delete_event(&id, scope))
            .await
    }

    pub async fn get_reminder(&self, id: &str) -> CalBridgeResult<Option<ReminderOffset>> {
        let backend = self.backend.clone();
        let id = id.to_string();
        self.supervisor
            .run("get-reminder", move || backend.get_reminder_offset(&id))
            .await
    }

    pub async fn set_reminder(
        &self,
        id: &str,
        offset: ReminderOffset,
    ) -> CalBridgeResult<ReminderOffset> {
        let backend = self.backend.clone();
        let id = id.to_string();
        self.supervisor
            .run("set-reminder", move || backend.set_reminder_offset(&id, offset))
            .await
    }

    pub async fn clear_reminder(&self, id: &str) -> CalBridgeResult<()> {
        let backend = self.backend.clone();
        let id = id.to_string();
        self.supervisor
            .run("clear-reminder", move || backend.clear_reminder(&id))
            .await
    }

    pub async fn series_snapshot(&self, id: &str) -> CalBridgeResult<SeriesRecord> {
        let backend = self.backend.clone();
        let id = id.to_string();
        self.supervisor
            .run("series-snapshot", move || backend.series_snapshot(&id))
            .await
    }

    pub async fn restore_series(&self, snapshot: SeriesRecord) -> CalBridgeResult<Event> {
        let backend = self.backend.clone();
        self.supervisor
            .run("restore-series", move || backend.restore_series(&snapshot))
            .await
    }
}
