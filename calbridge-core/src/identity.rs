//! Composite event identifiers.
//!
//! An event is referenced as `<uid>[@<occurrenceEpoch>]`. The suffix is the
//! occurrence start in Unix seconds and is omitted for the series as a whole.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{CalBridgeError, CalBridgeResult};

pub const SEPARATOR: char = '@';

/// A decoded composite identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId {
    pub uid: String,
    /// Occurrence start (Unix seconds). Zero means the whole series.
    pub occurrence: i64,
}

impl EventId {
    pub fn new(uid: &str, occurrence: i64) -> CalBridgeResult<Self> {
        if uid.is_empty() {
            return Err(CalBridgeError::Validation("event uid is empty".into()));
        }
        Ok(EventId {
            uid: uid.to_string(),
            occurrence: occurrence.max(0),
        })
    }

    pub fn series(uid: &str) -> CalBridgeResult<Self> {
        Self::new(uid, 0)
    }

    pub fn is_occurrence(&self) -> bool {
        self.occurrence > 0
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.occurrence > 0 {
            write!(f, "{}{}{}", self.uid, SEPARATOR, self.occurrence)
        } else {
            write!(f, "{}", self.uid)
        }
    }
}

impl FromStr for EventId {
    type Err = CalBridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (uid, occurrence) = decode(s);
        EventId::new(&uid, occurrence)
    }
}

/// Split an identifier on its last separator.
///
/// Without a usable suffix the whole text is the uid and the occurrence is
/// zero. Provider uids may themselves contain `@` (`abc@google.com`), so a
/// suffix that is not a non-negative integer is treated as part of the uid.
pub fn decode(id: &str) -> (String, i64) {
    if let Some((uid, epoch)) = id.rsplit_once(SEPARATOR) {
        let numeric = !epoch.is_empty() && epoch.bytes().all(|b| b.is_ascii_digit());
        if !uid.is_empty() && numeric {
            if let Ok(occurrence) = epoch.parse::<i64>() {
                return (uid.to_string(), occurrence);
            }
        }
    }
    (id.to_string(), 0)
}

/// Build an identifier. An epoch of zero is omitted.
pub fn encode(uid: &str, occurrence: i64) -> CalBridgeResult<String> {
    Ok(EventId::new(uid, occurrence)?.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn decode_without_separator_is_series_level() {
        assert_eq!(decode("ABC-123"), ("ABC-123".to_string(), 0));
    }

    #[test]
    fn decode_splits_on_last_separator() {
        assert_eq!(
            decode("abc@google.com@1718000000"),
            ("abc@google.com".to_string(), 1718000000)
        );
    }

    #[test]
    fn decode_keeps_non_numeric_suffix_in_uid() {
        assert_eq!(decode("abc@google.com"), ("abc@google.com".to_string(), 0));
        assert_eq!(decode("abc@-5"), ("abc@-5".to_string(), 0));
    }

    #[test]
    fn explicit_zero_decodes_to_series() {
        assert_eq!(decode("E1@0"), ("E1".to_string(), 0));
        assert_eq!(encode("E1", 0).unwrap(), "E1");
    }

    #[test]
    fn encode_rejects_empty_uid() {
        let err = encode("", 10).unwrap_err();
        assert!(matches!(err, CalBridgeError::Validation(_)));
    }

    #[test]
    fn parse_event_id() {
        let id: EventId = "E1@1700000000".parse().unwrap();
        assert_eq!(id.uid, "E1");
        assert!(id.is_occurrence());
        assert_eq!(id.to_string(), "E1@1700000000");
    }

    proptest! {
        #[test]
        fn decode_inverts_encode(uid in "[A-Za-z0-9._:-]{1,40}", occ in 0i64..4_000_000_000) {
            let encoded = encode(&uid, occ).unwrap();
            prop_assert_eq!(decode(&encoded), (uid, occ));
        }
    }
}
