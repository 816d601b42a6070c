//! Deadline, cancellation and timing around backend calls.
//!
//! A backend call blocks on the Calendar app, so it runs on the blocking
//! pool while the supervisor waits for whichever comes first: the result,
//! the deadline, or cancellation. A call that loses the race is abandoned,
//! not stopped. It keeps running to completion and its result is dropped,
//! because a script already sent to the app cannot be taken back.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{CalBridgeError, CalBridgeResult};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PhaseTiming {
    pub calls: u32,
    #[serde(rename = "total_ms", serialize_with = "as_millis")]
    pub total: Duration,
}

fn as_millis<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u128(d.as_millis())
}

/// Cumulative time per phase over one command.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TimingReport {
    pub phases: BTreeMap<String, PhaseTiming>,
}

impl fmt::Display for TimingReport {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for (phase, timing) in &self.phases {
            writeln!(
                f,
                "{phase:<16} {:>3} call(s) {:>8.1} ms",
                timing.calls,
                timing.total.as_secs_f64() * 1000.0
            )?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct CallSupervisor {
    deadline: Option<Duration>,
    cancel: CancellationToken,
    timings: Arc<Mutex<BTreeMap<String, PhaseTiming>>>,
}

async fn expiry(deadline: Option<Duration>) {
    match deadline {
        Some(limit) => tokio::time::sleep(limit).await,
        None => std::future::pending::<()>().await,
    }
}

impl CallSupervisor {
    /// `deadline` applies to each call; `None` waits indefinitely.
    pub fn new(deadline: Option<Duration>) -> Self {
        CallSupervisor {
            deadline,
            cancel: CancellationToken::new(),
            timings: Arc::new(Mutex::new(BTreeMap::new())),
        }
    }

    pub fn deadline(&self) -> Option<Duration> {
        self.deadline
    }

    /// Token that cancels every pending and future call when triggered.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Run `op` under the deadline. Errors come back tagged with `phase`.
    pub async fn run<T, F>(&self, phase: &str, op: F) -> CalBridgeResult<T>
    where
        F: FnOnce() -> CalBridgeResult<T> + Send + 'static,
        T: Send + 'static,
    {
        if self.cancel.is_cancelled() {
            return Err(CalBridgeError::Canceled {
                phase: phase.to_string(),
            });
        }

        let started = Instant::now();
        let deadline_at = self
            .deadline
            .and_then(|d| chrono::Duration::from_std(d).ok())
            .and_then(|d| Utc::now().checked_add_signed(d))
            .unwrap_or_else(Utc::now);
        let task = tokio::task::spawn_blocking(op);

        let outcome = tokio::select! {
            biased;
            joined = task => match joined {
                Ok(result) => result,
                Err(e) => Err(CalBridgeError::Failure(format!("backend call panicked: {e}"))),
            },
            _ = self.cancel.cancelled() => {
                warn!(phase, "call canceled, abandoning it");
                Err(CalBridgeError::Canceled { phase: phase.to_string() })
            }
            _ = expiry(self.deadline) => {
                warn!(phase, deadline = %deadline_at, "call timed out, abandoning it");
                Err(CalBridgeError::Timeout { phase: phase.to_string(), deadline: deadline_at })
            }
        };

        let elapsed = started.elapsed();
        self.record(phase, elapsed);
        debug!(phase, elapsed_ms = elapsed.as_millis() as u64, ok = outcome.is_ok(), "call finished");

        outcome.map_err(|e| e.in_phase(phase))
    }

    fn record(&self, phase: &str, elapsed: Duration) {
        if let Ok(mut timings) = self.timings.lock() {
            let entry = timings.entry(phase.to_string()).or_default();
            entry.calls += 1;
            entry.total += elapsed;
        }
    }

    pub fn timings(&self) -> TimingReport {
        let phases = self
            .timings
            .lock()
            .map(|t| t.clone())
            .unwrap_or_default();
        TimingReport { phases }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[tokio::test]
    async fn completed_call_passes_through() {
        let supervisor = CallSupervisor::new(Some(Duration::from_secs(5)));
        let value = supervisor.run("list-events", || Ok(42)).await.unwrap();
        assert_eq!(value, 42);
        assert_eq!(supervisor.timings().phases["list-events"].calls, 1);
    }

    #[tokio::test]
    async fn slow_call_times_out_with_phase_and_deadline() {
        let supervisor = CallSupervisor::new(Some(Duration::from_millis(20)));
        let finished = Arc::new(AtomicBool::new(false));
        let flag = finished.clone();

        let before = Utc::now();
        let err = supervisor
            .run("add-event", move || {
                std::thread::sleep(Duration::from_millis(200));
                flag.store(true, Ordering::SeqCst);
                Ok(())
            })
            .await
            .unwrap_err();

        match &err {
            CalBridgeError::Timeout { phase, deadline } => {
                assert_eq!(phase, "add-event");
                assert!(*deadline >= before);
            }
            other => panic!("expected timeout, got {other:?}"),
        }
        assert!(err.is_transient());
        assert!(err.to_string().starts_with("add-event timed out"));

        // The abandoned call still runs to completion.
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(finished.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn zero_deadline_means_no_deadline() {
        let supervisor = CallSupervisor::new(None);
        let value = supervisor
            .run("doctor", || {
                std::thread::sleep(Duration::from_millis(30));
                Ok("done")
            })
            .await
            .unwrap();
        assert_eq!(value, "done");
    }

    #[tokio::test]
    async fn cancellation_stops_the_wait() {
        let supervisor = CallSupervisor::new(None);
        let token = supervisor.cancellation_token();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            token.cancel();
        });

        let err = supervisor
            .run("update-event", || {
                std::thread::sleep(Duration::from_millis(300));
                Ok(())
            })
            .await
            .unwrap_err();
        assert!(matches!(err, CalBridgeError::Canceled { ref phase } if phase == "update-event"));

        let err = supervisor.run("delete-event", || Ok(())).await.unwrap_err();
        assert!(matches!(err, CalBridgeError::Canceled { .. }));
    }

    #[tokio::test]
    async fn errors_are_tagged_with_phase() {
        let supervisor = CallSupervisor::new(None);
        let err = supervisor
            .run("get-event", || -> CalBridgeResult<()> {
                Err(CalBridgeError::NotFound("E1".into()))
            })
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "get-event: Not found: E1");
        assert!(matches!(err.root(), CalBridgeError::NotFound(_)));
        assert_eq!(err.kind(), "not_found");
    }

    #[tokio::test]
    async fn timings_accumulate_per_phase() {
        let supervisor = CallSupervisor::new(None);
        for _ in 0..3 {
            supervisor.run("list-events", || Ok(())).await.unwrap();
        }
        supervisor.run("doctor", || Ok(())).await.unwrap();
        let report = supervisor.timings();
        assert_eq!(report.phases["list-events"].calls, 3);
        assert_eq!(report.phases["doctor"].calls, 1);
        assert!(report.to_string().contains("list-events"));
    }
}
