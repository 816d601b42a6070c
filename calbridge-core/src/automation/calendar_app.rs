//! Calendar.app driven over AppleScript.
//!
//! Every script starts with a shared prelude of handlers. Records come back
//! as text with ASCII unit separators between fields and record separators
//! between rows, so titles and notes can hold commas, tabs and newlines.
//! Dates cross the boundary as local wall-clock time, which is what
//! AppleScript dates are.

use chrono::{DateTime, Datelike, Local, NaiveDateTime, TimeZone, Timelike, Utc};
use tracing::debug;

use super::script::{OsaScript, applescript_escape};
use super::{Automation, SeriesChanges, SeriesDraft, SeriesRecord};
use crate::error::{CalBridgeError, CalBridgeResult};
use crate::event::{Calendar, FieldUpdate};

const FIELD_SEP: char = '\u{1f}';
const RECORD_SEP: char = '\u{1e}';
const SERIES_FIELDS: usize = 14;
const LOCAL_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

fn prelude(app: &str) -> String {
    format!(
        r#"property US : character id 31
property RS : character id 30

on pad(n)
	set s to (n as integer) as text
	if (count of s) < 2 then set s to "0" & s
	return s
end pad

on isoDate(d)
	if d is missing value then return ""
	return ((year of d) as text) & "-" & my pad((month of d) as integer) & "-" & my pad(day of d) & "T" & my pad(hours of d) & ":" & my pad(minutes of d) & ":" & my pad(seconds of d)
end isoDate

on makeDate(y, mo, d, h, mi, s)
	set t to current date
	set day of t to 1
	set year of t to y
	set month of t to mo
	set day of t to d
	set time of t to (h * hours + mi * minutes + s)
	return t
end makeDate

on txt(v)
	if v is missing value then return ""
	return v as text
end txt

on joinDates(ds)
	if ds is missing value then return ""
	set out to ""
	repeat with d in ds
		if out is not "" then set out to out & ","
		set out to out & my isoDate(contents of d)
	end repeat
	return out
end joinDates

on describeEvent(ev, calId, calName)
	tell application "{app}"
		set rec to (uid of ev) & US & calId & US & calName & US & my txt(summary of ev) & US & my isoDate(start date of ev) & US & my isoDate(end date of ev) & US & ((allday event of ev) as text) & US & my txt(location of ev) & US & my txt(description of ev) & US & my txt(url of ev) & US & my txt(recurrence of ev) & US & my joinDates(excluded dates of ev) & US & my txt(sequence of ev) & US & my isoDate(stamp date of ev)
	end tell
	return rec & RS
end describeEvent

on findEvent(theUid)
	tell application "{app}"
		repeat with c in calendars
			set found to (every event of c whose uid is theUid)
			if (count of found) > 0 then return item 1 of found
		end repeat
	end tell
	error "No event with uid " & theUid number -1728
end findEvent
"#
    )
}

fn quoted(value: &str) -> String {
    format!("\"{}\"", applescript_escape(value))
}

/// AppleScript expression evaluating to `dt` in local time.
fn date_literal(dt: DateTime<Utc>) -> String {
    let local = dt.with_timezone(&Local);
    format!(
        "my makeDate({}, {}, {}, {}, {}, {})",
        local.year(),
        local.month(),
        local.day(),
        local.hour(),
        local.minute(),
        local.second()
    )
}

fn date_list(dates: &[DateTime<Utc>]) -> String {
    let items: Vec<String> = dates.iter().map(|d| date_literal(*d)).collect();
    format!("{{{}}}", items.join(", "))
}

fn parse_local(text: &str) -> CalBridgeResult<DateTime<Utc>> {
    let naive = NaiveDateTime::parse_from_str(text.trim(), LOCAL_FORMAT)
        .map_err(|e| CalBridgeError::Failure(format!("unreadable date '{text}': {e}")))?;
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|d| d.with_timezone(&Utc))
        .ok_or_else(|| CalBridgeError::Failure(format!("nonexistent local time '{text}'")))
}

fn records(output: &str) -> impl Iterator<Item = Vec<&str>> {
    output
        .split(RECORD_SEP)
        .map(|r| r.trim_start_matches(['\n', '\r']))
        .filter(|r| !r.is_empty())
        .map(|r| r.split(FIELD_SEP).collect())
}

fn parse_calendars(output: &str) -> Vec<Calendar> {
    records(output)
        .filter(|fields| fields.len() >= 2)
        .map(|fields| Calendar {
            id: fields[0].to_string(),
            name: fields[1].to_string(),
            writable: fields.get(2).is_none_or(|w| *w != "false"),
        })
        .collect()
}

fn parse_series(fields: &[&str]) -> CalBridgeResult<SeriesRecord> {
    if fields.len() != SERIES_FIELDS {
        return Err(CalBridgeError::Failure(format!(
            "expected {SERIES_FIELDS} event fields, got {}",
            fields.len()
        )));
    }
    let excluded = fields[11]
        .split(',')
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .map(parse_local)
        .collect::<CalBridgeResult<Vec<_>>>()?;
    let recurrence = Some(fields[10].trim())
        .filter(|r| !r.is_empty())
        .map(str::to_string);
    let modified = Some(fields[13].trim())
        .filter(|m| !m.is_empty())
        .map(parse_local)
        .transpose()?;

    Ok(SeriesRecord {
        uid: fields[0].to_string(),
        calendar: Calendar {
            id: fields[1].to_string(),
            name: fields[2].to_string(),
            writable: true,
        },
        title: fields[3].to_string(),
        start: parse_local(fields[4])?,
        end: parse_local(fields[5])?,
        all_day: fields[6] == "true",
        location: fields[7].to_string(),
        notes: fields[8].to_string(),
        url: fields[9].to_string(),
        recurrence,
        excluded,
        sequence: fields[12].trim().parse().unwrap_or(0),
        modified,
    })
}

fn parse_series_list(output: &str) -> CalBridgeResult<Vec<SeriesRecord>> {
    records(output).map(|fields| parse_series(&fields)).collect()
}

fn calendars_script() -> String {
    "\tset out to \"\"
	repeat with c in calendars
		set out to out & (uid of c) & US & (name of c) & US & ((writable of c) as text) & RS
	end repeat
	return out"
        .to_string()
}

fn range_script(from: DateTime<Utc>, to: DateTime<Utc>) -> String {
    format!(
        "\tset fromDate to {}
	set toDate to {}
	set out to \"\"
	repeat with c in calendars
		set calId to uid of c
		set calName to name of c
		repeat with ev in (every event of c whose start date < toDate)
			if (end date of ev) > fromDate or my txt(recurrence of ev) is not \"\" then
				set out to out & my describeEvent(contents of ev, calId, calName)
			end if
		end repeat
	end repeat
	return out",
        date_literal(from),
        date_literal(to)
    )
}

fn series_script(uid: &str) -> String {
    format!(
        "\trepeat with c in calendars
		set found to (every event of c whose uid is {uid})
		if (count of found) > 0 then return my describeEvent(item 1 of found, uid of c, name of c)
	end repeat
	return \"\"",
        uid = quoted(uid)
    )
}

fn create_script(draft: &SeriesDraft) -> String {
    let calendar = quoted(&draft.calendar);
    let mut lines = vec![
        "\tset targetCal to missing value".to_string(),
        "\trepeat with c in calendars".to_string(),
        format!("\t\tif (uid of c) is {calendar} or (name of c) is {calendar} then"),
        "\t\t\tset targetCal to contents of c".to_string(),
        "\t\t\texit repeat".to_string(),
        "\t\tend if".to_string(),
        "\tend repeat".to_string(),
        format!(
            "\tif targetCal is missing value then error \"No calendar named \" & {calendar} number -1728"
        ),
        format!(
            "\tset ev to make new event at end of events of targetCal with properties {{summary:{}, start date:{}, end date:{}, allday event:{}}}",
            quoted(&draft.title),
            date_literal(draft.start),
            date_literal(draft.end),
            draft.all_day
        ),
    ];
    if !draft.location.is_empty() {
        lines.push(format!("\tset location of ev to {}", quoted(&draft.location)));
    }
    if !draft.notes.is_empty() {
        lines.push(format!("\tset description of ev to {}", quoted(&draft.notes)));
    }
    if !draft.url.is_empty() {
        lines.push(format!("\tset url of ev to {}", quoted(&draft.url)));
    }
    if let Some(rrule) = &draft.recurrence {
        lines.push(format!("\tset recurrence of ev to {}", quoted(rrule)));
    }
    if !draft.excluded.is_empty() {
        lines.push(format!(
            "\tset excluded dates of ev to {}",
            date_list(&draft.excluded)
        ));
    }
    lines.push("\treturn uid of ev".to_string());
    lines.join("\n")
}

fn modify_script(uid: &str, changes: &SeriesChanges) -> String {
    let mut lines = vec![format!("\tset ev to my findEvent({})", quoted(uid))];

    if let FieldUpdate::Set(title) = &changes.title {
        lines.push(format!("\tset summary of ev to {}", quoted(title)));
    }
    if let FieldUpdate::Set(all_day) = &changes.all_day {
        lines.push(format!("\tset allday event of ev to {all_day}"));
    }
    match (&changes.start, &changes.end) {
        (FieldUpdate::Set(start), FieldUpdate::Set(end)) => {
            // The app rejects an end before the start at every step, so the
            // order depends on the direction of the move.
            lines.push(format!("\tset newStart to {}", date_literal(*start)));
            lines.push(format!("\tset newEnd to {}", date_literal(*end)));
            lines.push("\tif newStart ≥ (end date of ev) then".to_string());
            lines.push("\t\tset end date of ev to newEnd".to_string());
            lines.push("\t\tset start date of ev to newStart".to_string());
            lines.push("\telse".to_string());
            lines.push("\t\tset start date of ev to newStart".to_string());
            lines.push("\t\tset end date of ev to newEnd".to_string());
            lines.push("\tend if".to_string());
        }
        (FieldUpdate::Set(start), FieldUpdate::Keep) => {
            lines.push(format!("\tset start date of ev to {}", date_literal(*start)));
        }
        (FieldUpdate::Keep, FieldUpdate::Set(end)) => {
            lines.push(format!("\tset end date of ev to {}", date_literal(*end)));
        }
        (FieldUpdate::Keep, FieldUpdate::Keep) => {}
    }
    if let FieldUpdate::Set(location) = &changes.location {
        lines.push(format!("\tset location of ev to {}", quoted(location)));
    }
    if let FieldUpdate::Set(notes) = &changes.notes {
        lines.push(format!("\tset description of ev to {}", quoted(notes)));
    }
    if let FieldUpdate::Set(url) = &changes.url {
        lines.push(format!("\tset url of ev to {}", quoted(url)));
    }
    if let FieldUpdate::Set(recurrence) = &changes.recurrence {
        let rule = recurrence.as_deref().unwrap_or("");
        lines.push(format!("\tset recurrence of ev to {}", quoted(rule)));
    }
    if let FieldUpdate::Set(excluded) = &changes.excluded {
        lines.push(format!("\tset excluded dates of ev to {}", date_list(excluded)));
    }
    lines.push("\treturn \"\"".to_string());
    lines.join("\n")
}

fn delete_script(uid: &str) -> String {
    format!("\tdelete (my findEvent({}))\n\treturn \"\"", quoted(uid))
}

fn alarms_script(uid: &str) -> String {
    format!(
        "\tset ev to my findEvent({})
	set out to \"\"
	repeat with a in (display alarms of ev)
		set out to out & ((trigger interval of a) as text) & RS
	end repeat
	repeat with a in (sound alarms of ev)
		set out to out & ((trigger interval of a) as text) & RS
	end repeat
	return out",
        quoted(uid)
    )
}

fn clear_alarms_script(uid: &str) -> String {
    format!(
        "\tset ev to my findEvent({})
	delete every display alarm of ev
	delete every sound alarm of ev
	return \"\"",
        quoted(uid)
    )
}

fn add_alarm_script(uid: &str, minutes: i64) -> String {
    format!(
        "\tset ev to my findEvent({})
	make new display alarm at end of display alarms of ev with properties {{trigger interval:{minutes}}}
	return \"\"",
        quoted(uid)
    )
}

/// The live Calendar application.
#[derive(Debug, Clone)]
pub struct CalendarApp {
    runner: OsaScript,
    app_name: String,
}

impl CalendarApp {
    pub fn new(app_name: &str) -> Self {
        CalendarApp {
            runner: OsaScript,
            app_name: app_name.to_string(),
        }
    }

    fn script(&self, body: &str) -> String {
        let app = applescript_escape(&self.app_name);
        format!(
            "{}\ntell application \"{app}\"\n{body}\nend tell\n",
            prelude(&app)
        )
    }

    fn run(&self, action: &str, body: &str) -> CalBridgeResult<String> {
        debug!(action, app = %self.app_name, "running calendar script");
        self.runner.run(&self.script(body))
    }
}

impl Automation for CalendarApp {
    fn ping(&self) -> CalBridgeResult<()> {
        self.run("ping", "\treturn (count of calendars) as text")?;
        Ok(())
    }

    fn calendars(&self) -> CalBridgeResult<Vec<Calendar>> {
        let output = self.run("calendars", &calendars_script())?;
        Ok(parse_calendars(&output))
    }

    fn series_in_range(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> CalBridgeResult<Vec<SeriesRecord>> {
        let output = self.run("series-in-range", &range_script(from, to))?;
        parse_series_list(&output)
    }

    fn series(&self, uid: &str) -> CalBridgeResult<Option<SeriesRecord>> {
        let output = self.run("series", &series_script(uid))?;
        Ok(parse_series_list(&output)?.into_iter().next())
    }

    fn create_series(&self, draft: &SeriesDraft) -> CalBridgeResult<String> {
        let uid = self.run("create", &create_script(draft))?;
        let uid = uid.trim();
        if uid.is_empty() {
            return Err(CalBridgeError::Failure(
                "Calendar created an event without a uid".into(),
            ));
        }
        Ok(uid.to_string())
    }

    fn modify_series(&self, uid: &str, changes: &SeriesChanges) -> CalBridgeResult<()> {
        if changes.is_empty() {
            return Ok(());
        }
        self.run("modify", &modify_script(uid, changes))?;
        Ok(())
    }

    fn delete_series(&self, uid: &str) -> CalBridgeResult<()> {
        self.run("delete", &delete_script(uid))?;
        Ok(())
    }

    fn alarm_offsets(&self, uid: &str) -> CalBridgeResult<Vec<i64>> {
        let output = self.run("alarms", &alarms_script(uid))?;
        output
            .split(RECORD_SEP)
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(|v| {
                v.parse::<i64>().map_err(|_| {
                    CalBridgeError::Failure(format!("unreadable alarm offset '{v}'"))
                })
            })
            .collect()
    }

    fn clear_alarms(&self, uid: &str) -> CalBridgeResult<()> {
        self.run("clear-alarms", &clear_alarms_script(uid))?;
        Ok(())
    }

    fn add_alarm(&self, uid: &str, minutes: i64) -> CalBridgeResult<()> {
        self.run("add-alarm", &add_alarm_script(uid, minutes))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn local(text: &str) -> DateTime<Utc> {
        parse_local(text).unwrap()
    }

    fn row(fields: &[&str]) -> String {
        let mut text = fields.join(&FIELD_SEP.to_string());
        text.push(RECORD_SEP);
        text
    }

    #[test]
    fn parses_series_rows() {
        let output = row(&[
            "UID-1",
            "CAL-1",
            "Work",
            "Planning, Q3",
            "2026-03-02T09:00:00",
            "2026-03-02T10:00:00",
            "false",
            "Room 4",
            "line one\nline two",
            "",
            "FREQ=WEEKLY;COUNT=4",
            "2026-03-09T09:00:00,2026-03-16T09:00:00",
            "3",
            "2026-02-01T08:00:00",
        ]);

        let series = parse_series_list(&output).unwrap();
        assert_eq!(series.len(), 1);
        let s = &series[0];
        assert_eq!(s.title, "Planning, Q3");
        assert_eq!(s.notes, "line one\nline two");
        assert_eq!(s.calendar.name, "Work");
        assert_eq!(s.duration(), Duration::hours(1));
        assert_eq!(s.recurrence.as_deref(), Some("FREQ=WEEKLY;COUNT=4"));
        assert_eq!(
            s.excluded,
            vec![local("2026-03-09T09:00:00"), local("2026-03-16T09:00:00")]
        );
        assert_eq!(s.sequence, 3);
        assert!(s.modified.is_some());
    }

    #[test]
    fn short_rows_are_rejected() {
        let output = row(&["UID-1", "CAL-1", "Work"]);
        assert!(matches!(
            parse_series_list(&output).unwrap_err(),
            CalBridgeError::Failure(_)
        ));
    }

    #[test]
    fn parses_calendar_rows() {
        let output = format!(
            "{}{}",
            row(&["A", "Work", "true"]),
            row(&["B", "Holidays", "false"])
        );
        let calendars = parse_calendars(&output);
        assert_eq!(calendars.len(), 2);
        assert!(calendars[0].writable);
        assert!(!calendars[1].writable);
    }

    #[test]
    fn date_literal_uses_local_components() {
        let dt = local("2026-07-04T18:05:09");
        assert_eq!(date_literal(dt), "my makeDate(2026, 7, 4, 18, 5, 9)");
    }

    #[test]
    fn create_script_escapes_and_skips_empty_fields() {
        let draft = SeriesDraft {
            calendar: "Work".into(),
            title: "Say \"hi\"".into(),
            start: local("2026-03-02T09:00:00"),
            end: local("2026-03-02T09:30:00"),
            all_day: false,
            location: String::new(),
            notes: "a\nb".into(),
            url: String::new(),
            recurrence: Some("FREQ=DAILY;COUNT=2".into()),
            excluded: Vec::new(),
        };
        let script = create_script(&draft);
        assert!(script.contains("summary:\"Say \\\"hi\\\"\""));
        assert!(script.contains("set description of ev to \"a\\nb\""));
        assert!(script.contains("set recurrence of ev to \"FREQ=DAILY;COUNT=2\""));
        assert!(!script.contains("set location of ev"));
        assert!(!script.contains("excluded dates"));
    }

    #[test]
    fn modify_script_only_touches_set_fields() {
        let changes = SeriesChanges {
            location: FieldUpdate::Set(String::new()),
            recurrence: FieldUpdate::Set(None),
            ..Default::default()
        };
        let script = modify_script("UID-1", &changes);
        assert!(script.contains("my findEvent(\"UID-1\")"));
        assert!(script.contains("set location of ev to \"\""));
        assert!(script.contains("set recurrence of ev to \"\""));
        assert!(!script.contains("summary"));
        assert!(!script.contains("start date"));
    }

    #[test]
    fn modify_script_orders_moves() {
        let changes = SeriesChanges {
            start: FieldUpdate::Set(local("2026-03-03T09:00:00")),
            end: FieldUpdate::Set(local("2026-03-03T10:00:00")),
            ..Default::default()
        };
        let script = modify_script("UID-1", &changes);
        assert!(script.contains("if newStart ≥ (end date of ev) then"));
    }
}
