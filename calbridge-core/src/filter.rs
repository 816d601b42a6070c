//! Event filters shared by the store query and the automation fallback.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CalBridgeError, CalBridgeResult};
use crate::event::Event;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchField {
    Title,
    Location,
    Notes,
    Url,
}

impl SearchField {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "title" | "summary" => Some(SearchField::Title),
            "location" => Some(SearchField::Location),
            "notes" | "description" => Some(SearchField::Notes),
            "url" => Some(SearchField::Url),
            _ => None,
        }
    }

    pub fn value<'a>(&self, event: &'a Event) -> &'a str {
        match self {
            SearchField::Title => &event.title,
            SearchField::Location => &event.location,
            SearchField::Notes => &event.notes,
            SearchField::Url => &event.url,
        }
    }
}

/// Fields searched when the query names no field.
pub const DEFAULT_SEARCH_FIELDS: [SearchField; 3] =
    [SearchField::Title, SearchField::Location, SearchField::Notes];

/// What a free-text query is matched against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchTarget {
    /// Title, location or notes.
    Any,
    Field(SearchField),
    /// An unrecognized field name: nothing matches.
    Nothing,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventFilter {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    /// Calendar ids or display names (case-insensitive). Empty allows all.
    #[serde(default)]
    pub calendars: Vec<String>,
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default)]
    pub field: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
}

impl EventFilter {
    pub fn new(from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        EventFilter {
            from,
            to,
            calendars: Vec::new(),
            query: None,
            field: None,
            limit: None,
        }
    }

    pub fn validate(&self) -> CalBridgeResult<()> {
        if self.from > self.to {
            return Err(CalBridgeError::Validation(format!(
                "filter range is reversed ({} > {})",
                self.from.to_rfc3339(),
                self.to.to_rfc3339()
            )));
        }
        Ok(())
    }

    /// The query text, if any non-blank query was given.
    pub fn query_text(&self) -> Option<&str> {
        self.query.as_deref().map(str::trim).filter(|q| !q.is_empty())
    }

    pub fn search_target(&self) -> SearchTarget {
        match self.field.as_deref().map(str::trim).filter(|f| !f.is_empty()) {
            None => SearchTarget::Any,
            Some(name) => SearchField::from_name(name)
                .map(SearchTarget::Field)
                .unwrap_or(SearchTarget::Nothing),
        }
    }

    pub fn matches_calendar(&self, calendar_id: &str, calendar_name: &str) -> bool {
        self.calendars.is_empty()
            || self.calendars.iter().any(|c| {
                c.eq_ignore_ascii_case(calendar_id) || c.eq_ignore_ascii_case(calendar_name)
            })
    }

    pub fn matches_text(&self, event: &Event) -> bool {
        let Some(query) = self.query_text() else {
            return true;
        };
        let needle = query.to_lowercase();
        let contains = |field: &SearchField| field.value(event).to_lowercase().contains(&needle);

        match self.search_target() {
            SearchTarget::Any => DEFAULT_SEARCH_FIELDS.iter().any(contains),
            SearchTarget::Field(field) => contains(&field),
            SearchTarget::Nothing => false,
        }
    }

    /// Client-side evaluation of every predicate the store query pushes down.
    pub fn matches(&self, event: &Event) -> bool {
        event.overlaps(self.from, self.to)
            && self.matches_calendar(&event.calendar_id, &event.calendar_name)
            && self.matches_text(event)
    }

    /// Deterministic ordering, then the row cap.
    pub fn finish(&self, mut events: Vec<Event>) -> Vec<Event> {
        sort_events(&mut events);
        if let Some(limit) = self.limit {
            events.truncate(limit);
        }
        events
    }
}

/// Ascending by start, ties broken by identifier.
pub fn sort_events(events: &mut [Event]) {
    events.sort_by(|a, b| a.start.cmp(&b.start).then_with(|| a.id.cmp(&b.id)));
}
