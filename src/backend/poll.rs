//! Bounded platform polling
//!
//! Long-running platform operations (a VM settling into `RUNNING` after a
//! NIC or disk attach) are waited out with a fixed-interval, fixed-timeout
//! poll. Exceeding the timeout is a terminal `ResourceAction` error; no
//! cancellation signal propagates into an in-progress poll.

use crate::error::{Error, Result};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Default attach-settle timeout
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(120);
/// Default probe interval
pub const DEFAULT_WAIT_INTERVAL: Duration = Duration::from_secs(3);

/// Poll `probe` until it reports completion or `timeout` elapses. The probe
/// returns `Ok(true)` when the awaited condition holds; probe errors are
/// terminal and propagate as-is.
pub async fn wait_until<F, Fut>(
    what: &str,
    timeout: Duration,
    interval: Duration,
    mut probe: F,
) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool>>,
{
    let deadline = Instant::now() + timeout;
    let mut attempts = 0u32;

    loop {
        attempts += 1;
        if probe().await? {
            debug!(what, attempts, "condition reached");
            return Ok(());
        }

        if Instant::now() + interval > deadline {
            return Err(Error::ResourceAction {
                action: what.to_string(),
                reason: format!("timed out after {:?} ({} probes)", timeout, attempts),
            });
        }
        tokio::time::sleep(interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_returns_once_condition_holds() {
        let calls = AtomicU32::new(0);
        wait_until(
            "vm running",
            Duration::from_secs(5),
            Duration::from_millis(1),
            || async { Ok(calls.fetch_add(1, Ordering::SeqCst) >= 2) },
        )
        .await
        .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_timeout_is_resource_action_error() {
        let result = wait_until(
            "vm running",
            Duration::from_millis(5),
            Duration::from_millis(2),
            || async { Ok(false) },
        )
        .await;
        assert_matches!(result, Err(Error::ResourceAction { .. }));
    }

    #[tokio::test]
    async fn test_probe_error_is_terminal() {
        let result = wait_until(
            "vm running",
            Duration::from_secs(5),
            Duration::from_millis(1),
            || async { Err(Error::Connection("reset".into())) },
        )
        .await;
        assert_matches!(result, Err(Error::Connection(_)));
    }
}
