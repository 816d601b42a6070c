//! Error types for calbridge.

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Errors that can occur in calbridge operations.
#[derive(Error, Debug)]
pub enum CalBridgeError {
    /// Bad input. Raised before any backend call and never retried.
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// An optimistic precondition (e.g. expected edit sequence) did not hold.
    #[error("Concurrency conflict: {0}")]
    Concurrency(String),

    /// Automation layer or store unreachable or permission-denied. Terminal.
    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    /// Automation hiccup worth retrying (stale connection, Apple Event timeout).
    #[error("Transient automation failure: {0}")]
    Transient(String),

    #[error("{phase} timed out (deadline {deadline})")]
    Timeout {
        phase: String,
        deadline: DateTime<Utc>,
    },

    #[error("{phase} was canceled")]
    Canceled { phase: String },

    /// The automation call reported success but the read-back disagreed.
    #[error("Verification failed: {0}")]
    Verification(String),

    /// Mutation rejected by the native layer for an unclassified reason.
    #[error("Operation failed: {0}")]
    Failure(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("{phase}: {source}")]
    Phase {
        phase: String,
        #[source]
        source: Box<CalBridgeError>,
    },
}

impl CalBridgeError {
    /// Tag this error with the phase it came from. Already-tagged errors
    /// and deadline errors (which carry their own phase) are left alone.
    pub fn in_phase(self, phase: &str) -> Self {
        match self {
            CalBridgeError::Phase { .. }
            | CalBridgeError::Timeout { .. }
            | CalBridgeError::Canceled { .. } => self,
            other => CalBridgeError::Phase {
                phase: phase.to_string(),
                source: Box::new(other),
            },
        }
    }

    /// The underlying error, with phase annotations stripped.
    pub fn root(&self) -> &CalBridgeError {
        match self {
            CalBridgeError::Phase { source, .. } => source.root(),
            other => other,
        }
    }

    /// Whether a retry of the same automation call could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self.root(),
            CalBridgeError::Transient(_) | CalBridgeError::Timeout { .. }
        )
    }

    /// Stable label for machine consumers.
    pub fn kind(&self) -> &'static str {
        match self.root() {
            CalBridgeError::Validation(_) => "validation",
            CalBridgeError::NotFound(_) => "not_found",
            CalBridgeError::Concurrency(_) => "concurrency",
            CalBridgeError::BackendUnavailable(_) => "backend_unavailable",
            CalBridgeError::Transient(_) => "transient",
            CalBridgeError::Timeout { .. } => "timeout",
            CalBridgeError::Canceled { .. } => "canceled",
            CalBridgeError::Verification(_) => "verification",
            CalBridgeError::Failure(_) => "failure",
            CalBridgeError::Store(_) => "store",
            CalBridgeError::Config(_) => "config",
            CalBridgeError::Io(_) => "io",
            CalBridgeError::Serialization(_) => "serialization",
            CalBridgeError::Phase { .. } => "failure",
        }
    }
}

impl From<rusqlite::Error> for CalBridgeError {
    fn from(e: rusqlite::Error) -> Self {
        CalBridgeError::Store(e.to_string())
    }
}

impl From<serde_json::Error> for CalBridgeError {
    fn from(e: serde_json::Error) -> Self {
        CalBridgeError::Serialization(e.to_string())
    }
}

/// Result type alias for calbridge operations.
pub type CalBridgeResult<T> = Result<T, CalBridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_annotation_keeps_root() {
        let err = CalBridgeError::NotFound("abc".into()).in_phase("delete-event");
        assert_eq!(err.kind(), "not_found");
        assert_eq!(err.to_string(), "delete-event: Not found: abc");
        assert!(matches!(err.root(), CalBridgeError::NotFound(_)));
    }

    #[test]
    fn phase_annotation_is_not_nested() {
        let err = CalBridgeError::Failure("boom".into())
            .in_phase("add-event")
            .in_phase("outer");
        assert_eq!(err.to_string(), "add-event: Operation failed: boom");
    }

    #[test]
    fn only_automation_hiccups_are_transient() {
        assert!(CalBridgeError::Transient("-609".into()).is_transient());
        assert!(
            CalBridgeError::Transient("x".into())
                .in_phase("add-event")
                .is_transient()
        );
        assert!(!CalBridgeError::NotFound("x".into()).is_transient());
        assert!(!CalBridgeError::BackendUnavailable("x".into()).is_transient());
        assert!(!CalBridgeError::Validation("x".into()).is_transient());
    }
}
