//! osascript runner.
//!
//! Scripts are fed to `osascript -` on stdin so quoting never depends on the
//! shell. Failures are classified from the Apple Event error number osascript
//! prints at the end of its message, e.g. `... AppleEvent timed out. (-1712)`.

use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Stdio};

use crate::error::{CalBridgeError, CalBridgeResult};

/// errAETimeout
const AE_TIMEOUT: i64 = -1712;
/// connectionInvalid: the app quit or restarted mid-call
const CONNECTION_INVALID: i64 = -609;
/// errAEEventNotPermitted: Automation permission denied
const NOT_PERMITTED: i64 = -1743;
/// errAENoSuchObject
const NO_SUCH_OBJECT: i64 = -1728;
/// procNotFound: the target application is not running and cannot launch
const PROC_NOT_FOUND: i64 = -600;

#[derive(Debug, Clone, Default)]
pub struct OsaScript;

impl OsaScript {
    fn binary_path(&self) -> CalBridgeResult<PathBuf> {
        which::which("osascript").map_err(|_| {
            CalBridgeError::BackendUnavailable(
                "osascript not found; calendar automation needs macOS".into(),
            )
        })
    }

    /// Run `script` and return its stdout without the trailing newline.
    pub fn run(&self, script: &str) -> CalBridgeResult<String> {
        let binary_path = self.binary_path()?;

        let mut child = Command::new(&binary_path)
            .arg("-")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                CalBridgeError::BackendUnavailable(format!(
                    "Failed to spawn {}: {}",
                    binary_path.display(),
                    e
                ))
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(script.as_bytes())?;
        }

        let output = child.wait_with_output()?;
        if output.status.success() {
            let stdout = String::from_utf8_lossy(&output.stdout);
            Ok(stdout.trim_end_matches(['\n', '\r']).to_string())
        } else {
            Err(classify_failure(&String::from_utf8_lossy(&output.stderr)))
        }
    }
}

/// Escape text for use inside an AppleScript string literal.
pub fn applescript_escape(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('\"', "\\\"")
        .replace('\n', "\\n")
        .replace('\r', "\\r")
}

/// The trailing `(-NNNN)` error number, if osascript printed one.
fn error_number(stderr: &str) -> Option<i64> {
    let trimmed = stderr.trim_end();
    let body = trimmed.strip_suffix(')')?;
    let open = body.rfind('(')?;
    body[open + 1..].trim().parse().ok()
}

pub(crate) fn classify_failure(stderr: &str) -> CalBridgeError {
    let message = stderr.trim().to_string();
    match error_number(&message) {
        Some(AE_TIMEOUT) | Some(CONNECTION_INVALID) => CalBridgeError::Transient(message),
        Some(NOT_PERMITTED) | Some(PROC_NOT_FOUND) => CalBridgeError::BackendUnavailable(message),
        Some(NO_SUCH_OBJECT) => CalBridgeError::NotFound(message),
        _ => CalBridgeError::Failure(message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escape_quotes_and_newlines() {
        assert_eq!(
            applescript_escape("say \"hi\"\nC:\\tmp"),
            "say \\\"hi\\\"\\nC:\\\\tmp"
        );
    }

    #[test]
    fn classify_by_error_number() {
        let timeout = classify_failure(
            "execution error: Calendar got an error: AppleEvent timed out. (-1712)\n",
        );
        assert!(timeout.is_transient());

        let denied = classify_failure(
            "execution error: Not authorized to send Apple events to Calendar. (-1743)",
        );
        assert!(matches!(denied, CalBridgeError::BackendUnavailable(_)));

        let missing = classify_failure("execution error: No event with uid X (-1728)");
        assert!(matches!(missing, CalBridgeError::NotFound(_)));

        let other = classify_failure("syntax error: Expected end of line. (-2741)");
        assert!(matches!(other, CalBridgeError::Failure(_)));
        assert!(matches!(classify_failure("boom"), CalBridgeError::Failure(_)));
    }
}
