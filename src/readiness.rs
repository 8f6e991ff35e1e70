//! Bounded-retry readiness polling.
//!
//! A probe is any async closure that runs a command against a service and
//! reports its [`ExecOutput`]. The service counts as ready the first time the
//! probe succeeds with exit code 0. Failed attempts are logged and retried;
//! the only terminal failure is running out of attempts.

use std::fmt::Display;
use std::future::Future;
use std::num::NonZeroU32;
use std::time::Duration;

use thiserror::Error;

use crate::orchestrator::ExecOutput;

/// How many times to probe and how long to wait in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: NonZeroU32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub const fn new(max_attempts: NonZeroU32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: NonZeroU32::new(10).unwrap_or(NonZeroU32::MIN),
            delay: Duration::from_millis(1000),
        }
    }
}

/// Errors from [`wait_until_ready`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReadinessError {
    #[error(
        "{service} didn't become available even after {attempts} attempts with {delay:?} between attempts"
    )]
    Timeout {
        service: String,
        attempts: u32,
        delay: Duration,
    },
}

/// Probe `service` until it reports success or `policy` runs out.
///
/// Sleeps `policy.delay` between attempts, never after the last one.
pub async fn wait_until_ready<F, Fut, E>(
    service: &str,
    policy: &RetryPolicy,
    mut probe: F,
) -> Result<(), ReadinessError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<ExecOutput, E>>,
    E: Display,
{
    let attempts = policy.max_attempts.get();

    for attempt in 1..=attempts {
        match probe().await {
            Ok(output) if output.is_success() => {
                tracing::debug!(service, attempt, "Service is available");
                return Ok(());
            }
            Ok(output) => {
                tracing::debug!(
                    service,
                    attempt,
                    exit_code = output.exit_code,
                    "Availability probe failed with logs:\n{}",
                    output.output
                );
            }
            Err(e) => {
                tracing::debug!(service, attempt, "Availability probe returned error: {}", e);
            }
        }

        if attempt < attempts {
            tokio::time::sleep(policy.delay).await;
        }
    }

    Err(ReadinessError::Timeout {
        service: service.to_string(),
        attempts,
        delay: policy.delay,
    })
}
