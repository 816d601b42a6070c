//! Recurrence edit scopes.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{CalBridgeError, CalBridgeResult};

/// Scope as requested by the caller. `Auto` is never a mutation target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecurrenceScope {
    #[default]
    Auto,
    This,
    Future,
    Series,
}

/// Concrete scope handed to the write path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationScope {
    This,
    Future,
    Series,
}

impl FromStr for RecurrenceScope {
    type Err = CalBridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "auto" => Ok(RecurrenceScope::Auto),
            "this" => Ok(RecurrenceScope::This),
            "future" => Ok(RecurrenceScope::Future),
            "series" => Ok(RecurrenceScope::Series),
            other => Err(CalBridgeError::Validation(format!(
                "unrecognized scope '{other}' (expected auto, this, future or series)"
            ))),
        }
    }
}

impl RecurrenceScope {
    /// Resolve against the decoded occurrence epoch of the target identifier.
    pub fn resolve(self, occurrence: i64) -> CalBridgeResult<MutationScope> {
        match self {
            RecurrenceScope::Auto if occurrence > 0 => Ok(MutationScope::This),
            RecurrenceScope::Auto => Ok(MutationScope::Series),
            RecurrenceScope::This | RecurrenceScope::Future if occurrence <= 0 => {
                Err(CalBridgeError::Validation(format!(
                    "scope '{self}' requires an occurrence-qualified identifier"
                )))
            }
            RecurrenceScope::This => Ok(MutationScope::This),
            RecurrenceScope::Future => Ok(MutationScope::Future),
            RecurrenceScope::Series => Ok(MutationScope::Series),
        }
    }
}

impl From<MutationScope> for RecurrenceScope {
    fn from(scope: MutationScope) -> Self {
        match scope {
            MutationScope::This => RecurrenceScope::This,
            MutationScope::Future => RecurrenceScope::Future,
            MutationScope::Series => RecurrenceScope::Series,
        }
    }
}

/// Parse a scope token (empty means `auto`) and resolve it in one step.
pub fn resolve_scope(token: &str, occurrence: i64) -> CalBridgeResult<MutationScope> {
    token.parse::<RecurrenceScope>()?.resolve(occurrence)
}

impl fmt::Display for RecurrenceScope {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            RecurrenceScope::Auto => "auto",
            RecurrenceScope::This => "this",
            RecurrenceScope::Future => "future",
            RecurrenceScope::Series => "series",
        };
        write!(f, "{s}")
    }
}

impl fmt::Display for MutationScope {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            MutationScope::This => "this",
            MutationScope::Future => "future",
            MutationScope::Series => "series",
        };
        write!(f, "{s}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auto_depends_on_occurrence() {
        assert_eq!(resolve_scope("auto", 0).unwrap(), MutationScope::Series);
        assert_eq!(resolve_scope("auto", 5).unwrap(), MutationScope::This);
        assert_eq!(resolve_scope("", 5).unwrap(), MutationScope::This);
    }

    #[test]
    fn this_and_future_need_an_occurrence() {
        for token in ["this", "future"] {
            let err = resolve_scope(token, 0).unwrap_err();
            assert!(err.to_string().contains("requires an occurrence-qualified identifier"));
        }
        assert_eq!(resolve_scope("future", 9).unwrap(), MutationScope::Future);
    }

    #[test]
    fn series_is_always_valid() {
        for occ in [0, 1, 1_700_000_000] {
            assert_eq!(resolve_scope("series", occ).unwrap(), MutationScope::Series);
        }
    }

    #[test]
    fn unknown_token_is_rejected() {
        let err = resolve_scope("everything", 3).unwrap_err();
        assert!(matches!(err, CalBridgeError::Validation(_)));
        assert!(err.to_string().contains("unrecognized scope"));
    }
}
