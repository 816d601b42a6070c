//! Read-only access to the Calendar app's on-disk store.
//!
//! The store is a private SQLite database. Occurrences of recurring events
//! are precomputed by the app into `OccurrenceCache`, so a window query is a
//! join rather than an expansion. Instants are stored as seconds since
//! 2001-01-01T00:00:00Z.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};

use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use rusqlite::{Connection, OpenFlags, params_from_iter};
use tracing::debug;

use crate::error::{CalBridgeError, CalBridgeResult};
use crate::event::Event;
use crate::filter::{EventFilter, SearchField, SearchTarget, DEFAULT_SEARCH_FIELDS};
use crate::identity;

/// Unix time of 2001-01-01T00:00:00Z.
pub const APPLE_EPOCH_OFFSET: i64 = 978_307_200;

pub fn to_apple_seconds(dt: DateTime<Utc>) -> f64 {
    (dt.timestamp() - APPLE_EPOCH_OFFSET) as f64
}

pub fn from_apple_seconds(seconds: f64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(seconds.floor() as i64 + APPLE_EPOCH_OFFSET, 0)
}

type SharedConnection = Arc<Mutex<Connection>>;

fn connections() -> &'static Mutex<HashMap<PathBuf, SharedConnection>> {
    static CONNECTIONS: OnceLock<Mutex<HashMap<PathBuf, SharedConnection>>> = OnceLock::new();
    CONNECTIONS.get_or_init(Default::default)
}

fn poisoned<T>(_: T) -> CalBridgeError {
    CalBridgeError::Store("store connection lock poisoned".into())
}

const EVENT_COLUMNS: &str = "\
SELECT ci.unique_identifier,
       c.UUID,
       c.title,
       ci.summary,
       COALESCE(oc.occurrence_start_date, oc.occurrence_date) AS occ_start,
       COALESCE(oc.occurrence_end_date,
                COALESCE(oc.occurrence_start_date, oc.occurrence_date) + (ci.end_date - ci.start_date)) AS occ_end,
       ci.all_day,
       l.title,
       ci.description,
       ci.url,
       ci.has_recurrences,
       ci.sequence_num,
       ci.last_modified,
       r.frequency,
       r.interval,
       r.count,
       r.end_date,
       r.specifier
FROM OccurrenceCache oc
JOIN CalendarItem ci ON ci.ROWID = oc.event_id
JOIN Calendar c ON c.ROWID = ci.calendar_id
LEFT JOIN Location l ON l.ROWID = ci.location_id
LEFT JOIN Recurrence r ON r.owner_id = ci.ROWID";

fn field_column(field: SearchField) -> &'static str {
    match field {
        SearchField::Title => "ci.summary",
        SearchField::Location => "l.title",
        SearchField::Notes => "ci.description",
        SearchField::Url => "ci.url",
    }
}

fn like_pattern(query: &str) -> String {
    let escaped = query
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{escaped}%")
}

/// SQL plus bound values for one filter. Time range, calendar allow-list
/// and text search are all pushed into the WHERE clause; ordering is by
/// start only, the final sort and row cap happen after mapping.
pub(crate) fn build_query(filter: &EventFilter) -> (String, Vec<Value>) {
    let mut clauses = vec![
        "COALESCE(oc.occurrence_start_date, oc.occurrence_date) < ?".to_string(),
        "COALESCE(oc.occurrence_end_date, COALESCE(oc.occurrence_start_date, oc.occurrence_date) + (ci.end_date - ci.start_date)) > ?".to_string(),
    ];
    let mut values = vec![
        Value::Real(to_apple_seconds(filter.to)),
        Value::Real(to_apple_seconds(filter.from)),
    ];

    if !filter.calendars.is_empty() {
        let marks = vec!["?"; filter.calendars.len()].join(", ");
        clauses.push(format!(
            "(lower(c.UUID) IN ({marks}) OR lower(c.title) IN ({marks}))"
        ));
        for _ in 0..2 {
            values.extend(
                filter
                    .calendars
                    .iter()
                    .map(|c| Value::Text(c.to_lowercase())),
            );
        }
    }

    if let Some(query) = filter.query_text() {
        let pattern = like_pattern(query);
        let columns: Vec<SearchField> = match filter.search_target() {
            SearchTarget::Any => DEFAULT_SEARCH_FIELDS.to_vec(),
            SearchTarget::Field(field) => vec![field],
            SearchTarget::Nothing => Vec::new(),
        };
        if columns.is_empty() {
            clauses.push("0".to_string());
        } else {
            let tests: Vec<String> = columns
                .iter()
                .map(|f| format!("COALESCE({}, '') LIKE ? ESCAPE '\\'", field_column(*f)))
                .collect();
            clauses.push(format!("({})", tests.join(" OR ")));
            values.extend(columns.iter().map(|_| Value::Text(pattern.clone())));
        }
    }

    let sql = format!(
        "{EVENT_COLUMNS}\nWHERE {}\nORDER BY occ_start ASC, ci.unique_identifier ASC",
        clauses.join("\n  AND ")
    );
    (sql, values)
}

/// Recurrence row fields, in `SELECT` order.
struct RecurrenceRow {
    frequency: Option<i64>,
    interval: Option<i64>,
    count: Option<i64>,
    end_date: Option<f64>,
    specifier: Option<String>,
}

impl RecurrenceRow {
    /// The RRULE body equivalent to this row, if it describes a rule.
    fn to_rrule(&self) -> Option<String> {
        let frequency = match self.frequency? {
            1 => "DAILY",
            2 => "WEEKLY",
            3 => "MONTHLY",
            4 => "YEARLY",
            _ => return None,
        };
        let mut parts = vec![format!("FREQ={frequency}")];
        if let Some(interval) = self.interval.filter(|i| *i > 1) {
            parts.push(format!("INTERVAL={interval}"));
        }
        if let Some(days) = self.specifier.as_deref().and_then(weekday_specifier) {
            parts.push(format!("BYDAY={days}"));
        }
        match (self.count.filter(|c| *c > 0), self.end_date) {
            (Some(count), _) => parts.push(format!("COUNT={count}")),
            (None, Some(end)) => {
                if let Some(until) = from_apple_seconds(end) {
                    parts.push(format!("UNTIL={}", until.format("%Y%m%dT%H%M%SZ")));
                }
            }
            (None, None) => {}
        }
        Some(parts.join(";"))
    }
}

/// `D=0MO,0WE;M=3` -> `MO,WE`. A leading `0` means "every"; other
/// ordinals are kept as RRULE prefixes (`1MO`, `-1FR`).
fn weekday_specifier(specifier: &str) -> Option<String> {
    let days = specifier
        .split(';')
        .find_map(|part| part.strip_prefix("D="))?;
    let days: Vec<String> = days
        .split(',')
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .map(|d| d.strip_prefix('0').unwrap_or(d).to_string())
        .collect();
    (!days.is_empty()).then(|| days.join(","))
}

fn row_to_event(row: &rusqlite::Row<'_>) -> rusqlite::Result<Option<Event>> {
    let uid: String = row.get(0)?;
    let start = row.get::<_, f64>(4)?;
    let end = row.get::<_, Option<f64>>(5)?.unwrap_or(start);
    let (Some(start), Some(end)) = (from_apple_seconds(start), from_apple_seconds(end)) else {
        return Ok(None);
    };
    let recurring = row.get::<_, Option<i64>>(10)?.unwrap_or(0) != 0;
    let recurrence = RecurrenceRow {
        frequency: row.get(13)?,
        interval: row.get(14)?,
        count: row.get(15)?,
        end_date: row.get(16)?,
        specifier: row.get(17)?,
    };

    let occurrence = if recurring { start.timestamp() } else { 0 };
    let id = match identity::encode(&uid, occurrence) {
        Ok(id) => id,
        Err(_) => return Ok(None),
    };

    Ok(Some(Event {
        id,
        uid,
        calendar_id: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
        calendar_name: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
        title: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
        start,
        end,
        all_day: row.get::<_, Option<i64>>(6)?.unwrap_or(0) != 0,
        location: row.get::<_, Option<String>>(7)?.unwrap_or_default(),
        notes: row.get::<_, Option<String>>(8)?.unwrap_or_default(),
        url: row.get::<_, Option<String>>(9)?.unwrap_or_default(),
        recurrence: if recurring { recurrence.to_rrule() } else { None },
        sequence: row.get::<_, Option<i64>>(11)?.unwrap_or(0),
        last_modified: row
            .get::<_, Option<f64>>(12)?
            .and_then(from_apple_seconds),
    }))
}

/// Read-only handle on the Calendar store.
#[derive(Clone)]
pub struct StoreReader {
    path: PathBuf,
    conn: SharedConnection,
}

impl StoreReader {
    /// Open `path` read-only, reusing the process-wide connection for that
    /// path if one was already opened.
    pub fn open(path: &Path) -> CalBridgeResult<Self> {
        let mut cache = connections().lock().map_err(poisoned)?;
        if let Some(conn) = cache.get(path) {
            return Ok(StoreReader {
                path: path.to_path_buf(),
                conn: conn.clone(),
            });
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| CalBridgeError::Store(format!("{}: {e}", path.display())))?;
        let conn = Arc::new(Mutex::new(conn));
        cache.insert(path.to_path_buf(), conn.clone());
        debug!(path = %path.display(), "opened calendar store");

        Ok(StoreReader {
            path: path.to_path_buf(),
            conn,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the tables and columns the event query needs are present.
    pub fn check_schema(&self) -> CalBridgeResult<()> {
        let conn = self.conn.lock().map_err(poisoned)?;
        conn.prepare(&format!("{EVENT_COLUMNS} LIMIT 0"))?;
        Ok(())
    }

    /// Occurrences matching `filter`, sorted and capped.
    pub fn list_events(&self, filter: &EventFilter) -> CalBridgeResult<Vec<Event>> {
        filter.validate()?;
        let (sql, values) = build_query(filter);

        let conn = self.conn.lock().map_err(poisoned)?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(values.iter()), row_to_event)?
            .collect::<Result<Vec<_>, _>>()?;

        // Multi-day events have one cache row per day.
        let mut seen = HashSet::new();
        let events = rows
            .into_iter()
            .flatten()
            .filter(|e| seen.insert(e.id.clone()))
            .collect();
        Ok(filter.finish(events))
    }
}

#[cfg(test)]
pub(crate) mod fixture {
    use super::*;
    use rusqlite::params;

    pub const SCHEMA: &str = "
        CREATE TABLE Calendar (ROWID INTEGER PRIMARY KEY, UUID TEXT, title TEXT);
        CREATE TABLE Location (ROWID INTEGER PRIMARY KEY, title TEXT);
        CREATE TABLE CalendarItem (
            ROWID INTEGER PRIMARY KEY, unique_identifier TEXT, summary TEXT,
            start_date REAL, end_date REAL, all_day INTEGER, calendar_id INTEGER,
            location_id INTEGER, description TEXT, url TEXT, sequence_num INTEGER,
            last_modified REAL, has_recurrences INTEGER);
        CREATE TABLE OccurrenceCache (
            event_id INTEGER, occurrence_date REAL,
            occurrence_start_date REAL, occurrence_end_date REAL);
        CREATE TABLE Recurrence (
            ROWID INTEGER PRIMARY KEY, owner_id INTEGER, frequency INTEGER,
            interval INTEGER, count INTEGER, end_date REAL, specifier TEXT);
    ";

    /// A store file with calendars "Work" (`CAL-W`) and "Home" (`CAL-H`).
    pub fn create(path: &Path) -> Connection {
        let conn = Connection::open(path).unwrap();
        conn.execute_batch(SCHEMA).unwrap();
        conn.execute(
            "INSERT INTO Calendar (ROWID, UUID, title) VALUES (1, 'CAL-W', 'Work'), (2, 'CAL-H', 'Home')",
            [],
        )
        .unwrap();
        conn
    }

    /// Insert an event with one occurrence row per start in `occurrences`.
    #[allow(clippy::too_many_arguments)]
    pub fn insert_event(
        conn: &Connection,
        rowid: i64,
        uid: &str,
        calendar: i64,
        title: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        location: Option<&str>,
        occurrences: &[DateTime<Utc>],
    ) {
        let location_id = location.map(|title| {
            conn.execute("INSERT INTO Location (title) VALUES (?1)", params![title])
                .unwrap();
            conn.last_insert_rowid()
        });
        conn.execute(
            "INSERT INTO CalendarItem (ROWID, unique_identifier, summary, start_date, end_date, all_day,
                calendar_id, location_id, description, url, sequence_num, last_modified, has_recurrences)
             VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6, ?7, NULL, NULL, 1, ?4, ?8)",
            params![
                rowid,
                uid,
                title,
                to_apple_seconds(start),
                to_apple_seconds(end),
                calendar,
                location_id,
                (occurrences.len() > 1) as i64
            ],
        )
        .unwrap();
        for occ in occurrences {
            conn.execute(
                "INSERT INTO OccurrenceCache (event_id, occurrence_date, occurrence_start_date, occurrence_end_date)
                 VALUES (?1, ?2, ?2, ?3)",
                params![
                    rowid,
                    to_apple_seconds(*occ),
                    to_apple_seconds(*occ + (end - start))
                ],
            )
            .unwrap();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fixture::*;
    use super::*;
    use chrono::{Duration, TimeZone};
    use rusqlite::params;

    fn monday() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap()
    }

    fn seeded() -> (tempfile::TempDir, StoreReader) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Calendar.sqlitedb");
        let conn = create(&path);
        let start = monday();
        let half = Duration::minutes(30);
        let weeks: Vec<_> = (0..3).map(|w| start + Duration::weeks(w)).collect();
        insert_event(&conn, 1, "STANDUP", 1, "Standup", start, start + half, Some("Room 4"), &weeks);
        conn.execute(
            "INSERT INTO Recurrence (owner_id, frequency, interval, count, specifier) VALUES (1, 2, 1, 3, 'D=0MO')",
            [],
        )
        .unwrap();
        let lunch = start + Duration::hours(3);
        insert_event(&conn, 2, "LUNCH", 2, "Lunch 100%", lunch, lunch + Duration::hours(1), None, &[lunch]);
        drop(conn);
        let reader = StoreReader::open(&path).unwrap();
        (dir, reader)
    }

    fn week_filter() -> EventFilter {
        EventFilter::new(monday() - Duration::hours(1), monday() + Duration::days(6))
    }

    #[test]
    fn epoch_conversion_round_trips() {
        let dt = monday();
        assert_eq!(from_apple_seconds(to_apple_seconds(dt)), Some(dt));
        assert_eq!(from_apple_seconds(0.0).unwrap().timestamp(), APPLE_EPOCH_OFFSET);
    }

    #[test]
    fn lists_window_with_composite_ids() {
        let (_dir, reader) = seeded();
        let events = reader.list_events(&week_filter()).unwrap();
        let ids: Vec<_> = events.iter().map(|e| e.id.clone()).collect();
        assert_eq!(
            ids,
            vec![format!("STANDUP@{}", monday().timestamp()), "LUNCH".to_string()]
        );
        assert_eq!(events[0].location, "Room 4");
        assert_eq!(events[0].recurrence.as_deref(), Some("FREQ=WEEKLY;BYDAY=MO;COUNT=3"));
        assert_eq!(events[1].recurrence, None);
    }

    #[test]
    fn calendar_and_text_predicates_push_down() {
        let (_dir, reader) = seeded();
        let mut filter = week_filter();
        filter.calendars = vec!["home".into()];
        let events = reader.list_events(&filter).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].uid, "LUNCH");

        let mut filter = week_filter();
        filter.query = Some("room".into());
        let events = reader.list_events(&filter).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].uid, "STANDUP");

        // '%' is literal, not a wildcard.
        filter.query = Some("100%".into());
        filter.field = Some("title".into());
        assert_eq!(reader.list_events(&filter).unwrap().len(), 1);
        filter.query = Some("1%0".into());
        assert!(reader.list_events(&filter).unwrap().is_empty());
    }

    #[test]
    fn unknown_field_yields_empty_result() {
        let (_dir, reader) = seeded();
        let mut filter = week_filter();
        filter.query = Some("Standup".into());
        filter.field = Some("organizer".into());
        assert!(reader.list_events(&filter).unwrap().is_empty());
    }

    #[test]
    fn limit_applies_after_sorting() {
        let (_dir, reader) = seeded();
        let mut filter = EventFilter::new(monday(), monday() + Duration::weeks(4));
        filter.limit = Some(2);
        let events = reader.list_events(&filter).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].start, monday());
        assert_eq!(events[1].uid, "LUNCH");
    }

    #[test]
    fn connection_is_cached_per_path() {
        let (dir, reader) = seeded();
        let again = StoreReader::open(reader.path()).unwrap();
        assert!(Arc::ptr_eq(&reader.conn, &again.conn));
        drop(dir);
    }

    #[test]
    fn schema_mismatch_is_a_store_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("other.sqlitedb");
        let conn = Connection::open(&path).unwrap();
        conn.execute("CREATE TABLE CalendarItem (x INTEGER)", params![]).unwrap();
        drop(conn);

        let reader = StoreReader::open(&path).unwrap();
        assert!(matches!(reader.check_schema(), Err(CalBridgeError::Store(_))));
        assert!(matches!(
            reader.list_events(&week_filter()),
            Err(CalBridgeError::Store(_))
        ));
    }

    #[test]
    fn missing_file_is_a_store_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = StoreReader::open(&dir.path().join("nope.sqlitedb")).err().unwrap();
        assert!(matches!(err, CalBridgeError::Store(_)));
    }

    #[test]
    fn recurrence_rows_map_to_rrule() {
        let row = RecurrenceRow {
            frequency: Some(2),
            interval: Some(2),
            count: None,
            end_date: Some(to_apple_seconds(monday())),
            specifier: Some("D=0MO,0WE".into()),
        };
        assert_eq!(
            row.to_rrule().as_deref(),
            Some("FREQ=WEEKLY;INTERVAL=2;BYDAY=MO,WE;UNTIL=20260302T090000Z")
        );
        assert_eq!(weekday_specifier("M=3;D=-1FR").as_deref(), Some("-1FR"));
    }
}
