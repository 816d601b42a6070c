//! Recurrence rules.
//!
//! Two textual forms meet here: the compact rule text accepted from callers
//! (`weekly:mon,wed*10`) and the iCalendar RRULE body the Calendar app stores
//! (`FREQ=WEEKLY;BYDAY=MO,WE;COUNT=10`). Occurrence expansion and the RRULE
//! edits needed to split a series also live here.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc, Weekday};
use rrule::RRuleSet;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{CalBridgeError, CalBridgeResult};

pub const MAX_COUNT: u32 = 366;

/// Upper bound on occurrences produced by one expansion.
const EXPANSION_LIMIT: u16 = 2000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

impl Frequency {
    fn token(&self) -> &'static str {
        match self {
            Frequency::Daily => "daily",
            Frequency::Weekly => "weekly",
            Frequency::Monthly => "monthly",
            Frequency::Yearly => "yearly",
        }
    }

    fn rrule_name(&self) -> &'static str {
        match self {
            Frequency::Daily => "DAILY",
            Frequency::Weekly => "WEEKLY",
            Frequency::Monthly => "MONTHLY",
            Frequency::Yearly => "YEARLY",
        }
    }
}

/// `<frequency>[:<weekday-list>][*<count>]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecurrenceRule {
    pub frequency: Frequency,
    /// Monday-first, deduplicated. Only used with weekly rules.
    pub weekdays: Vec<Weekday>,
    pub count: Option<u32>,
}

impl RecurrenceRule {
    pub fn parse(text: &str) -> CalBridgeResult<Self> {
        text.parse()
    }

    /// iCalendar RRULE body understood by the Calendar app.
    pub fn to_rrule(&self) -> String {
        let mut parts = vec![format!("FREQ={}", self.frequency.rrule_name())];
        if !self.weekdays.is_empty() {
            let days: Vec<&str> = self.weekdays.iter().map(|d| rrule_day(*d)).collect();
            parts.push(format!("BYDAY={}", days.join(",")));
        }
        if let Some(count) = self.count {
            parts.push(format!("COUNT={count}"));
        }
        parts.join(";")
    }
}

impl RecurrenceRule {
    /// The compact rule for an RRULE body, when the body uses nothing the
    /// compact form cannot express (no INTERVAL above 1, UNTIL, ordinals).
    pub fn from_rrule(rrule: &str) -> Option<Self> {
        let mut frequency = None;
        let mut weekdays = Vec::new();
        let mut count = None;
        for (key, value) in rrule_parts(rrule) {
            match key.as_str() {
                "FREQ" => {
                    frequency = Some(match value.to_ascii_uppercase().as_str() {
                        "DAILY" => Frequency::Daily,
                        "WEEKLY" => Frequency::Weekly,
                        "MONTHLY" => Frequency::Monthly,
                        "YEARLY" => Frequency::Yearly,
                        _ => return None,
                    })
                }
                "INTERVAL" if value == "1" => {}
                "WKST" => {}
                "BYDAY" => {
                    for day in value.split(',') {
                        weekdays.push(weekday_from_rrule(day.trim())?);
                    }
                }
                "COUNT" => count = Some(value.parse::<u32>().ok()?),
                _ => return None,
            }
        }
        let frequency = frequency?;
        if !weekdays.is_empty() && frequency != Frequency::Weekly {
            return None;
        }
        if count.is_some_and(|c| !(1..=MAX_COUNT).contains(&c)) {
            return None;
        }
        weekdays.sort_by_key(|d| d.num_days_from_monday());
        weekdays.dedup();
        Some(RecurrenceRule {
            frequency,
            weekdays,
            count,
        })
    }
}

fn weekday_from_rrule(token: &str) -> Option<Weekday> {
    match token.to_ascii_uppercase().as_str() {
        "MO" => Some(Weekday::Mon),
        "TU" => Some(Weekday::Tue),
        "WE" => Some(Weekday::Wed),
        "TH" => Some(Weekday::Thu),
        "FR" => Some(Weekday::Fri),
        "SA" => Some(Weekday::Sat),
        "SU" => Some(Weekday::Sun),
        _ => None,
    }
}

fn invalid(text: &str, reason: &str) -> CalBridgeError {
    CalBridgeError::Validation(format!("invalid recurrence '{text}': {reason}"))
}

fn parse_weekday(token: &str) -> Option<Weekday> {
    match token {
        "mon" => Some(Weekday::Mon),
        "tue" => Some(Weekday::Tue),
        "wed" => Some(Weekday::Wed),
        "thu" => Some(Weekday::Thu),
        "fri" => Some(Weekday::Fri),
        "sat" => Some(Weekday::Sat),
        "sun" => Some(Weekday::Sun),
        _ => None,
    }
}

fn weekday_token(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "mon",
        Weekday::Tue => "tue",
        Weekday::Wed => "wed",
        Weekday::Thu => "thu",
        Weekday::Fri => "fri",
        Weekday::Sat => "sat",
        Weekday::Sun => "sun",
    }
}

pub(crate) fn rrule_day(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "MO",
        Weekday::Tue => "TU",
        Weekday::Wed => "WE",
        Weekday::Thu => "TH",
        Weekday::Fri => "FR",
        Weekday::Sat => "SA",
        Weekday::Sun => "SU",
    }
}

impl FromStr for RecurrenceRule {
    type Err = CalBridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let text = s.trim().to_ascii_lowercase();
        if text.is_empty() {
            return Err(invalid(s, "empty rule"));
        }

        let (body, count) = match text.split_once('*') {
            Some((body, count)) => {
                let count: u32 = count
                    .trim()
                    .parse()
                    .map_err(|_| invalid(s, "count must be a whole number"))?;
                if !(1..=MAX_COUNT).contains(&count) {
                    return Err(invalid(s, "count must be between 1 and 366"));
                }
                (body, Some(count))
            }
            None => (text.as_str(), None),
        };

        let (frequency, days) = match body.split_once(':') {
            Some((frequency, days)) => (frequency.trim(), Some(days)),
            None => (body.trim(), None),
        };

        let frequency = match frequency {
            "daily" => Frequency::Daily,
            "weekly" => Frequency::Weekly,
            "monthly" => Frequency::Monthly,
            "yearly" => Frequency::Yearly,
            _ => return Err(invalid(s, "frequency must be daily, weekly, monthly or yearly")),
        };

        let mut weekdays = Vec::new();
        if let Some(days) = days {
            if frequency != Frequency::Weekly {
                return Err(invalid(s, "weekdays are only allowed for weekly rules"));
            }
            for token in days.split(',').map(str::trim) {
                let day = parse_weekday(token)
                    .ok_or_else(|| invalid(s, &format!("unknown weekday '{token}'")))?;
                if !weekdays.contains(&day) {
                    weekdays.push(day);
                }
            }
            weekdays.sort_by_key(|d| d.num_days_from_monday());
        }

        Ok(RecurrenceRule {
            frequency,
            weekdays,
            count,
        })
    }
}

impl fmt::Display for RecurrenceRule {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.frequency.token())?;
        if !self.weekdays.is_empty() {
            let days: Vec<&str> = self.weekdays.iter().map(|d| weekday_token(*d)).collect();
            write!(f, ":{}", days.join(","))?;
        }
        if let Some(count) = self.count {
            write!(f, "*{count}")?;
        }
        Ok(())
    }
}

impl Serialize for RecurrenceRule {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for RecurrenceRule {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

// RRULE bodies

fn ics_utc(dt: DateTime<Utc>) -> String {
    dt.format("%Y%m%dT%H%M%SZ").to_string()
}

fn rrule_parts(rrule: &str) -> Vec<(String, String)> {
    rrule
        .trim()
        .trim_start_matches("RRULE:")
        .split(';')
        .filter_map(|part| part.split_once('='))
        .map(|(k, v)| (k.trim().to_ascii_uppercase(), v.trim().to_string()))
        .collect()
}

fn join_parts(parts: &[(String, String)]) -> String {
    parts
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(";")
}

/// Rule that stops just before `occurrence` (used to cut a series in two).
pub fn truncate_before(rrule: &str, occurrence: DateTime<Utc>) -> String {
    let mut parts: Vec<_> = rrule_parts(rrule)
        .into_iter()
        .filter(|(k, _)| k != "COUNT" && k != "UNTIL")
        .collect();
    parts.push(("UNTIL".into(), ics_utc(occurrence - Duration::seconds(1))));
    join_parts(&parts)
}

/// Rule for the tail of a split series whose first `used` occurrences stay
/// with the original. Only a COUNT needs adjusting; UNTIL stays valid.
pub fn remaining_after(rrule: &str, used: u32) -> String {
    let parts: Vec<_> = rrule_parts(rrule)
        .into_iter()
        .map(|(k, v)| {
            if k == "COUNT" {
                let total: u32 = v.parse().unwrap_or(0);
                (k, total.saturating_sub(used).max(1).to_string())
            } else {
                (k, v)
            }
        })
        .collect();
    join_parts(&parts)
}

fn rule_set(
    series_start: DateTime<Utc>,
    rrule: &str,
    excluded: &[DateTime<Utc>],
) -> CalBridgeResult<RRuleSet> {
    let mut lines = vec![
        format!("DTSTART:{}", ics_utc(series_start)),
        format!("RRULE:{}", rrule.trim().trim_start_matches("RRULE:")),
    ];
    for exdate in excluded {
        lines.push(format!("EXDATE:{}", ics_utc(*exdate)));
    }

    lines
        .join("\n")
        .parse()
        .map_err(|e| CalBridgeError::Failure(format!("could not parse recurrence '{rrule}': {e}")))
}

/// Occurrence start instants of a series that overlap `[from, to)`.
///
/// `duration` is the length of one occurrence; an occurrence starting before
/// `from` is still returned when it runs into the window.
pub fn expand(
    series_start: DateTime<Utc>,
    duration: Duration,
    rrule: &str,
    excluded: &[DateTime<Utc>],
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) -> CalBridgeResult<Vec<DateTime<Utc>>> {
    let set = rule_set(series_start, rrule, excluded)?;

    // after/before are exclusive; widen by a second on each side.
    let tz: rrule::Tz = Utc.into();
    let after = (from - duration - Duration::seconds(1)).with_timezone(&tz);
    let before = (to + Duration::seconds(1)).with_timezone(&tz);

    let result = set.after(after).before(before).all(EXPANSION_LIMIT);

    Ok(result
        .dates
        .iter()
        .map(|d| d.with_timezone(&Utc))
        .filter(|start| *start < to && *start + duration > from)
        .collect())
}

/// How many occurrences the rule generates strictly before `occurrence`,
/// ignoring exclusions (COUNT counts excluded instances too).
pub fn generated_before(
    series_start: DateTime<Utc>,
    rrule: &str,
    occurrence: DateTime<Utc>,
) -> CalBridgeResult<u32> {
    let set = rule_set(series_start, rrule, &[])?;
    let tz: rrule::Tz = Utc.into();
    let after = (series_start - Duration::seconds(1)).with_timezone(&tz);
    let before = occurrence.with_timezone(&tz);
    let result = set.after(after).before(before).all(EXPANSION_LIMIT);
    Ok(result
        .dates
        .iter()
        .filter(|d| d.with_timezone(&Utc) < occurrence)
        .count() as u32)
}
