//! Polling a stack until it settles
//!
//! Checks back off exponentially from `initial_delay` up to `max_delay`. The
//! wait ends at the first ready check, a failed check, the deadline, or the
//! cancellation token.

use backon::{BackoffBuilder, ExponentialBuilder};
use std::future::Future;
use std::iter;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// How often and for how long to poll
#[derive(Debug, Clone, PartialEq)]
pub struct WaitConfig {
    pub initial_delay: Duration,
    /// Cap for the exponential growth
    pub max_delay: Duration,
    /// Deadline, measured from the first check
    pub timeout: Duration,
    /// Randomize each delay
    pub jitter: bool,
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            timeout: Duration::from_secs(60),
            jitter: true,
        }
    }
}

impl WaitConfig {
    /// Polling profile for CloudFormation stack operations, which take minutes
    pub fn for_stack(timeout: Duration) -> Self {
        Self {
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(15),
            timeout,
            jitter: true,
        }
    }

    /// Delays between checks, never running out
    fn delays(&self) -> impl Iterator<Item = Duration> {
        let builder = ExponentialBuilder::default()
            .with_min_delay(self.initial_delay)
            .with_max_delay(self.max_delay)
            .without_max_times();
        let builder = if self.jitter {
            builder.with_jitter()
        } else {
            builder
        };
        builder.build().chain(iter::repeat(self.max_delay))
    }
}

#[derive(Debug, Error)]
pub enum WaitError {
    #[error("Wait for {0} cancelled")]
    Cancelled(String),

    #[error("Timed out waiting for {name} after {timeout:?} ({polls} checks)")]
    TimedOut {
        name: String,
        timeout: Duration,
        polls: u32,
    },

    #[error(transparent)]
    Check(#[from] anyhow::Error),
}

/// Run `check` until it reports ready.
///
/// `check` returns `Ok(false)` to keep waiting. An error from it ends the
/// wait and is passed through as [`WaitError::Check`].
pub async fn wait_for_resource<F, Fut>(
    config: WaitConfig,
    cancel: Option<&CancellationToken>,
    mut check: F,
    resource_name: &str,
) -> Result<(), WaitError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<bool>>,
{
    let deadline = Instant::now() + config.timeout;
    let never = CancellationToken::new();
    let cancel = cancel.unwrap_or(&never);
    let mut delays = config.delays();
    let mut polls = 0u32;

    loop {
        if cancel.is_cancelled() {
            return Err(WaitError::Cancelled(resource_name.to_string()));
        }

        polls += 1;
        let ready = check()
            .await
            .inspect_err(|e| warn!(resource = %resource_name, error = %e, "Check failed"))?;
        if ready {
            debug!(resource = %resource_name, polls, "Resource settled");
            return Ok(());
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(WaitError::TimedOut {
                name: resource_name.to_string(),
                timeout: config.timeout,
                polls,
            });
        }
        let delay = delays.next().unwrap_or(config.max_delay).min(remaining);
        debug!(
            resource = %resource_name,
            polls,
            delay_ms = delay.as_millis(),
            "Not settled yet"
        );

        tokio::select! {
            () = cancel.cancelled() => {
                return Err(WaitError::Cancelled(resource_name.to_string()));
            }
            () = tokio::time::sleep(delay) => {}
        }
    }
}
