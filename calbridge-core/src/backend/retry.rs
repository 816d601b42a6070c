use tracing::warn;

use crate::config::RetryPolicy;
use crate::error::CalBridgeResult;

/// Run `op`, retrying transient failures up to the policy's limit with a
/// fixed pause between attempts. Anything else is returned as-is.
pub(crate) fn with_retry<T>(
    policy: &RetryPolicy,
    action: &str,
    mut op: impl FnMut() -> CalBridgeResult<T>,
) -> CalBridgeResult<T> {
    let mut attempt = 0;
    loop {
        match op() {
            Err(e) if e.is_transient() && attempt < policy.max_retries => {
                attempt += 1;
                warn!(action, attempt, error = %e, "transient automation failure, retrying");
                if !policy.backoff.is_zero() {
                    std::thread::sleep(policy.backoff);
                }
            }
            other => return other,
        }
    }
}
