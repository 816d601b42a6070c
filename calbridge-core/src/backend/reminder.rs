//! Reminders live on the series, so every occurrence id of a series shares
//! one reminder. Writes are always checked by reading the alarms back.

use tracing::info;

use super::AppleCalendarBackend;
use crate::error::{CalBridgeError, CalBridgeResult};
use crate::event::ReminderOffset;
use crate::identity;

fn describe(offsets: &[i64]) -> String {
    if offsets.is_empty() {
        return "no reminder".to_string();
    }
    offsets
        .iter()
        .map(|m| match ReminderOffset::from_minutes(*m) {
            Ok(offset) => offset.to_string(),
            Err(_) => format!("+{m}m"),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

impl AppleCalendarBackend {
    fn alarm_offsets(&self, uid: &str) -> CalBridgeResult<Vec<i64>> {
        self.retried("alarms", || self.automation.alarm_offsets(uid))
    }

    fn series_uid(&self, id: &str) -> CalBridgeResult<String> {
        let (uid, _) = identity::decode(id);
        if uid.is_empty() {
            return Err(CalBridgeError::Validation("event id is empty".into()));
        }
        // Fails with NotFound before any alarm is touched.
        self.master(&uid)?;
        Ok(uid)
    }

    pub(super) fn read_reminder(&self, id: &str) -> CalBridgeResult<Option<ReminderOffset>> {
        let uid = self.series_uid(id)?;
        let offsets = self.alarm_offsets(&uid)?;
        match offsets.iter().min() {
            None => Ok(None),
            Some(minutes) => ReminderOffset::from_minutes(*minutes).map(Some).map_err(|_| {
                CalBridgeError::Failure(format!("{id} has a reminder after its start (+{minutes}m)"))
            }),
        }
    }

    pub(super) fn write_reminder(
        &self,
        id: &str,
        offset: ReminderOffset,
    ) -> CalBridgeResult<ReminderOffset> {
        let uid = self.series_uid(id)?;
        self.retried("clear-alarms", || self.automation.clear_alarms(&uid))?;
        self.retried("add-alarm", || self.automation.add_alarm(&uid, offset.minutes()))?;

        let observed = self.alarm_offsets(&uid)?;
        if observed != [offset.minutes()] {
            return Err(CalBridgeError::Verification(format!(
                "set reminder {offset} on {id} but read back {}",
                describe(&observed)
            )));
        }
        info!(uid = %uid, offset = %offset, "reminder set");
        Ok(offset)
    }

    pub(super) fn remove_reminder(&self, id: &str) -> CalBridgeResult<()> {
        let uid = self.series_uid(id)?;
        self.retried("clear-alarms", || self.automation.clear_alarms(&uid))?;

        let observed = self.alarm_offsets(&uid)?;
        if !observed.is_empty() {
            return Err(CalBridgeError::Verification(format!(
                "cleared reminders on {id} but read back {}",
                describe(&observed)
            )));
        }
        info!(uid = %uid, "reminder cleared");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{Duration, Utc};

    use crate::backend::CalendarBackend;
    use crate::error::CalBridgeError;
    use crate::event::ReminderOffset;
    use crate::testing::{FakeCalendarApp, backend_for, single_input};

    #[test]
    fn set_then_read_back_fifteen_minutes() {
        let fake = Arc::new(FakeCalendarApp::new());
        let backend = backend_for(fake);
        let created = backend.add_event(&single_input(Utc::now() + Duration::days(1))).unwrap();

        let offset: ReminderOffset = "-15m".parse().unwrap();
        backend.set_reminder_offset(&created.id, offset).unwrap();
        let read = backend.get_reminder_offset(&created.id).unwrap().unwrap();
        assert_eq!(read.to_string(), "-15m");

        // A second set replaces rather than accumulates.
        backend
            .set_reminder_offset(&created.id, "-1h".parse().unwrap())
            .unwrap();
        assert_eq!(
            backend.get_reminder_offset(&created.id).unwrap().unwrap().minutes(),
            -60
        );

        backend.clear_reminder(&created.id).unwrap();
        assert_eq!(backend.get_reminder_offset(&created.id).unwrap(), None);
    }

    #[test]
    fn mismatched_read_back_is_a_verification_failure() {
        let fake = Arc::new(FakeCalendarApp::new());
        let backend = backend_for(fake.clone());
        let created = backend.add_event(&single_input(Utc::now() + Duration::days(1))).unwrap();

        fake.ignore_alarm_writes();
        let err = backend
            .set_reminder_offset(&created.id, "-15m".parse().unwrap())
            .unwrap_err();
        assert!(matches!(err, CalBridgeError::Verification(_)));
        assert!(err.to_string().contains("no reminder"));
    }

    #[test]
    fn clear_that_does_not_stick_is_reported() {
        let fake = Arc::new(FakeCalendarApp::new());
        let backend = backend_for(fake.clone());
        let created = backend.add_event(&single_input(Utc::now() + Duration::days(1))).unwrap();
        backend
            .set_reminder_offset(&created.id, "-10m".parse().unwrap())
            .unwrap();

        fake.ignore_alarm_writes();
        let err = backend.clear_reminder(&created.id).unwrap_err();
        assert!(matches!(err, CalBridgeError::Verification(_)));
    }

    #[test]
    fn reminder_on_missing_event_is_not_found() {
        let fake = Arc::new(FakeCalendarApp::new());
        let backend = backend_for(fake);
        assert!(matches!(
            backend.get_reminder_offset("GONE@1767225600").unwrap_err(),
            CalBridgeError::NotFound(_)
        ));
    }
}
