//! Event model shared by both read paths, the write path and the journal.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{CalBridgeError, CalBridgeResult};
use crate::identity;
use crate::recurrence::RecurrenceRule;

/// A calendar as seen by the Calendar app.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Calendar {
    pub id: String,
    pub name: String,
    #[serde(default = "default_writable")]
    pub writable: bool,
}

fn default_writable() -> bool {
    true
}

impl Calendar {
    /// Case-insensitive match against id or display name.
    pub fn matches(&self, needle: &str) -> bool {
        self.id.eq_ignore_ascii_case(needle) || self.name.eq_ignore_ascii_case(needle)
    }
}

/// One event, or one occurrence of a recurring series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Composite identifier (`uid[@occurrenceEpoch]`).
    pub id: String,
    pub uid: String,
    pub calendar_id: String,
    pub calendar_name: String,
    pub title: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    #[serde(default)]
    pub all_day: bool,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub url: String,
    /// RRULE body of the owning series, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recurrence: Option<String>,
    #[serde(default)]
    pub sequence: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<DateTime<Utc>>,
}

impl Event {
    pub fn occurrence(&self) -> i64 {
        identity::decode(&self.id).1
    }

    pub fn is_recurring(&self) -> bool {
        self.recurrence.is_some()
    }

    /// Whether `[start, end)` overlaps `[from, to)`.
    pub fn overlaps(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> bool {
        self.start < to && self.end > from
    }
}

/// Check a start/end pair before it reaches the automation layer.
pub fn validate_time_range(start: DateTime<Utc>, end: DateTime<Utc>) -> CalBridgeResult<()> {
    if end <= start {
        return Err(CalBridgeError::Validation(format!(
            "end ({}) must be after start ({})",
            end.to_rfc3339(),
            start.to_rfc3339()
        )));
    }
    Ok(())
}

/// Fields for a new event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventCreateInput {
    /// Calendar id or display name.
    pub calendar: String,
    pub title: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    #[serde(default)]
    pub all_day: bool,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recurrence: Option<RecurrenceRule>,
}

impl EventCreateInput {
    pub fn validate(&self) -> CalBridgeResult<()> {
        if self.calendar.trim().is_empty() {
            return Err(CalBridgeError::Validation("calendar is required".into()));
        }
        if self.title.trim().is_empty() {
            return Err(CalBridgeError::Validation("title is required".into()));
        }
        validate_time_range(self.start, self.end)
    }

    /// Input that re-creates `event` as a brand new record.
    pub fn from_event(event: &Event) -> Self {
        EventCreateInput {
            calendar: if event.calendar_id.is_empty() {
                event.calendar_name.clone()
            } else {
                event.calendar_id.clone()
            },
            title: event.title.clone(),
            start: event.start,
            end: event.end,
            all_day: event.all_day,
            location: event.location.clone(),
            notes: event.notes.clone(),
            url: event.url.clone(),
            recurrence: None,
        }
    }
}

/// A single patch field: either left alone or explicitly set.
///
/// `Set(String::new())` is a real value (it clears the field), which is why
/// there is no sentinel text for "not provided".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldUpdate<T> {
    Keep,
    Set(T),
}

impl<T> Default for FieldUpdate<T> {
    fn default() -> Self {
        FieldUpdate::Keep
    }
}

impl<T> FieldUpdate<T> {
    pub fn is_keep(&self) -> bool {
        matches!(self, FieldUpdate::Keep)
    }

    pub fn as_set(&self) -> Option<&T> {
        match self {
            FieldUpdate::Keep => None,
            FieldUpdate::Set(value) => Some(value),
        }
    }
}

impl<T: Clone> FieldUpdate<T> {
    pub fn apply(&self, current: &T) -> T {
        match self {
            FieldUpdate::Keep => current.clone(),
            FieldUpdate::Set(value) => value.clone(),
        }
    }
}

impl<T> From<Option<T>> for FieldUpdate<T> {
    fn from(value: Option<T>) -> Self {
        value.map_or(FieldUpdate::Keep, FieldUpdate::Set)
    }
}

impl<T: Serialize> Serialize for FieldUpdate<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            FieldUpdate::Keep => serializer.serialize_none(),
            FieldUpdate::Set(value) => value.serialize(serializer),
        }
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for FieldUpdate<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        T::deserialize(deserializer).map(FieldUpdate::Set)
    }
}

/// Partial update of an event. Absent fields are left untouched.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EventUpdatePatch {
    #[serde(default, skip_serializing_if = "FieldUpdate::is_keep")]
    pub title: FieldUpdate<String>,
    #[serde(default, skip_serializing_if = "FieldUpdate::is_keep")]
    pub start: FieldUpdate<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "FieldUpdate::is_keep")]
    pub end: FieldUpdate<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "FieldUpdate::is_keep")]
    pub all_day: FieldUpdate<bool>,
    #[serde(default, skip_serializing_if = "FieldUpdate::is_keep")]
    pub location: FieldUpdate<String>,
    #[serde(default, skip_serializing_if = "FieldUpdate::is_keep")]
    pub notes: FieldUpdate<String>,
    #[serde(default, skip_serializing_if = "FieldUpdate::is_keep")]
    pub url: FieldUpdate<String>,
    /// `Set(None)` removes the recurrence.
    #[serde(default, skip_serializing_if = "FieldUpdate::is_keep")]
    pub recurrence: FieldUpdate<Option<RecurrenceRule>>,
    /// Reject the update unless the stored edit sequence equals this value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_sequence: Option<i64>,
}

impl EventUpdatePatch {
    pub fn is_empty(&self) -> bool {
        self.title.is_keep()
            && self.start.is_keep()
            && self.end.is_keep()
            && self.all_day.is_keep()
            && self.location.is_keep()
            && self.notes.is_keep()
            && self.url.is_keep()
            && self.recurrence.is_keep()
    }

    pub fn validate(&self) -> CalBridgeResult<()> {
        if self.is_empty() {
            return Err(CalBridgeError::Validation("update has no fields to change".into()));
        }
        if let Some(title) = self.title.as_set() {
            if title.trim().is_empty() {
                return Err(CalBridgeError::Validation("title cannot be empty".into()));
            }
        }
        if let (Some(start), Some(end)) = (self.start.as_set(), self.end.as_set()) {
            validate_time_range(*start, *end)?;
        }
        Ok(())
    }

    /// New start/end for `event`. A start without an end keeps the duration.
    pub fn times_for(&self, event: &Event) -> (DateTime<Utc>, DateTime<Utc>) {
        let start = self.start.apply(&event.start);
        let end = match (&self.start, &self.end) {
            (_, FieldUpdate::Set(end)) => *end,
            (FieldUpdate::Set(_), FieldUpdate::Keep) => start + (event.end - event.start),
            (FieldUpdate::Keep, FieldUpdate::Keep) => event.end,
        };
        (start, end)
    }

    /// `event` as it should look once the patch is applied.
    pub fn apply_to(&self, event: &Event) -> Event {
        let (start, end) = self.times_for(event);
        let recurrence = match &self.recurrence {
            FieldUpdate::Keep => event.recurrence.clone(),
            FieldUpdate::Set(rule) => rule.as_ref().map(RecurrenceRule::to_rrule),
        };
        Event {
            title: self.title.apply(&event.title),
            start,
            end,
            all_day: self.all_day.apply(&event.all_day),
            location: self.location.apply(&event.location),
            notes: self.notes.apply(&event.notes),
            url: self.url.apply(&event.url),
            recurrence,
            ..event.clone()
        }
    }
}

/// Reminder offset in minutes relative to the event start (never after it).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ReminderOffset {
    minutes: i64,
}

impl ReminderOffset {
    pub fn from_minutes(minutes: i64) -> CalBridgeResult<Self> {
        if minutes > 0 {
            return Err(CalBridgeError::Validation(format!(
                "reminder offset must be at or before the start (got +{minutes}m)"
            )));
        }
        Ok(ReminderOffset { minutes })
    }

    pub fn minutes(&self) -> i64 {
        self.minutes
    }
}

impl fmt::Display for ReminderOffset {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let total = self.minutes.abs();
        let sign = if self.minutes < 0 { "-" } else { "" };
        let (hours, minutes) = (total / 60, total % 60);
        match (hours, minutes) {
            (0, m) => write!(f, "{sign}{m}m"),
            (h, 0) => write!(f, "{sign}{h}h"),
            (h, m) => write!(f, "{sign}{h}h{m}m"),
        }
    }
}

impl FromStr for ReminderOffset {
    type Err = CalBridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let (negative, body) = match trimmed.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, trimmed),
        };
        let duration = humantime::parse_duration(body).map_err(|e| {
            CalBridgeError::Validation(format!("invalid reminder offset '{s}': {e}"))
        })?;
        let seconds = duration.as_secs();
        if seconds % 60 != 0 || duration.subsec_nanos() != 0 {
            return Err(CalBridgeError::Validation(format!(
                "reminder offset '{s}' is not a whole number of minutes"
            )));
        }
        let minutes = (seconds / 60) as i64;
        if !negative && minutes != 0 {
            return Err(CalBridgeError::Validation(format!(
                "reminder offset '{s}' must be negative (minutes before start, e.g. -{s})"
            )));
        }
        ReminderOffset::from_minutes(-minutes)
    }
}

impl Serialize for ReminderOffset {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ReminderOffset {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample() -> Event {
        Event {
            id: "E1".into(),
            uid: "E1".into(),
            calendar_id: "cal-work".into(),
            calendar_name: "Work".into(),
            title: "Standup".into(),
            start: Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap(),
            end: Utc.with_ymd_and_hms(2026, 3, 2, 9, 30, 0).unwrap(),
            all_day: false,
            location: "Room 4".into(),
            notes: String::new(),
            url: String::new(),
            recurrence: None,
            sequence: 3,
            last_modified: None,
        }
    }

    #[test]
    fn patch_distinguishes_absent_from_empty() {
        let patch: EventUpdatePatch = serde_json::from_str(r#"{"location": ""}"#).unwrap();
        assert_eq!(patch.location, FieldUpdate::Set(String::new()));
        assert!(patch.title.is_keep());

        let updated = patch.apply_to(&sample());
        assert_eq!(updated.location, "");
        assert_eq!(updated.title, "Standup");
    }

    #[test]
    fn patch_null_recurrence_clears_it() {
        let patch: EventUpdatePatch = serde_json::from_str(r#"{"recurrence": null}"#).unwrap();
        assert_eq!(patch.recurrence, FieldUpdate::Set(None));
        let mut event = sample();
        event.recurrence = Some("FREQ=DAILY".into());
        assert_eq!(patch.apply_to(&event).recurrence, None);
    }

    #[test]
    fn moving_start_keeps_duration() {
        let event = sample();
        let new_start = Utc.with_ymd_and_hms(2026, 3, 2, 14, 0, 0).unwrap();
        let patch = EventUpdatePatch {
            start: FieldUpdate::Set(new_start),
            ..Default::default()
        };
        let (start, end) = patch.times_for(&event);
        assert_eq!(start, new_start);
        assert_eq!(end - start, chrono::Duration::minutes(30));
    }

    #[test]
    fn empty_patch_is_invalid() {
        let err = EventUpdatePatch::default().validate().unwrap_err();
        assert!(matches!(err, CalBridgeError::Validation(_)));
    }

    #[test]
    fn create_input_requires_ordered_range() {
        let event = sample();
        let mut input = EventCreateInput::from_event(&event);
        input.validate().unwrap();
        input.end = input.start;
        assert!(input.validate().is_err());
        input.end = event.end;
        input.title = "  ".into();
        assert!(input.validate().is_err());
    }

    #[test]
    fn reminder_offset_text() {
        let offset: ReminderOffset = "-15m".parse().unwrap();
        assert_eq!(offset.minutes(), -15);
        assert_eq!(offset.to_string(), "-15m");
        assert_eq!("-1h30m".parse::<ReminderOffset>().unwrap().minutes(), -90);
        assert_eq!("0m".parse::<ReminderOffset>().unwrap().to_string(), "0m");
        assert_eq!(ReminderOffset::from_minutes(-120).unwrap().to_string(), "-2h");
    }

    #[test]
    fn reminder_offset_after_start_is_rejected() {
        assert!("15m".parse::<ReminderOffset>().is_err());
        assert!(ReminderOffset::from_minutes(5).is_err());
        assert!("-90s".parse::<ReminderOffset>().is_err());
    }
}
