use chrono::{Duration, Utc};
use tracing::{debug, warn};

use super::AppleCalendarBackend;
use crate::error::{CalBridgeError, CalBridgeResult};
use crate::event::Event;
use crate::filter::EventFilter;
use crate::identity;

/// Half-width of the window scanned by an id lookup.
const LOOKUP_SPAN_DAYS: i64 = 5 * 366;

impl AppleCalendarBackend {
    /// Store query first; on any store error, enumerate through automation.
    pub(super) fn read_events(&self, filter: &EventFilter) -> CalBridgeResult<Vec<Event>> {
        filter.validate()?;

        match self.store().and_then(|store| store.list_events(filter)) {
            Ok(events) => {
                debug!(count = events.len(), "events read from store");
                Ok(events)
            }
            Err(e) => {
                warn!(error = %e, "store read failed, enumerating through automation");
                self.enumerate_events(filter)
            }
        }
    }

    /// Expand every series the app reports for the window and apply the
    /// filter client-side. Ids follow the store's occurrence convention.
    pub(super) fn enumerate_events(&self, filter: &EventFilter) -> CalBridgeResult<Vec<Event>> {
        let series = self.retried("series-in-range", || {
            self.automation.series_in_range(filter.from, filter.to)
        })?;

        let mut events = Vec::new();
        for record in &series {
            if !filter.matches_calendar(&record.calendar.id, &record.calendar.name) {
                continue;
            }
            events.extend(
                record
                    .occurrences(filter.from, filter.to)?
                    .into_iter()
                    .filter(|e| filter.matches(e)),
            );
        }
        Ok(filter.finish(events))
    }

    /// Bounded scan for one identifier. A bare uid of a recurring series
    /// resolves to its earliest occurrence in the window.
    pub(super) fn find_event(&self, id: &str) -> CalBridgeResult<Event> {
        let (uid, occurrence) = identity::decode(id);
        if uid.is_empty() {
            return Err(CalBridgeError::Validation("event id is empty".into()));
        }

        let now = Utc::now();
        let span = Duration::days(LOOKUP_SPAN_DAYS);
        let mut filter = EventFilter::new(now - span, now + span);
        if let Some(at) = chrono::DateTime::from_timestamp(occurrence, 0) {
            if occurrence > 0 {
                filter.from = filter.from.min(at - Duration::days(1));
                filter.to = filter.to.max(at + Duration::days(1));
            }
        }

        self.read_events(&filter)?
            .into_iter()
            .find(|e| e.uid == uid && (occurrence == 0 || e.occurrence() == occurrence))
            .ok_or_else(|| CalBridgeError::NotFound(format!("no event with id {id}")))
    }
}
