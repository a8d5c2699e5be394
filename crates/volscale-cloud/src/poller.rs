//! Modification polling with bounded retries and an overall deadline.
//!
//! A resize is an asynchronous provider operation; this module turns it
//! into an explicit outcome: `Completed`, `Failed`, or `TimedOut`. There
//! is no unbounded wait anywhere — the poll loop carries a deadline and
//! throttled calls back off exponentially up to a fixed attempt count.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};

use volscale_core::config::CloudConfig;

use crate::client::{CloudVolumes, ModificationPhase};
use crate::{CloudError, CloudResult};

/// Bounds for polling and throttle retries.
#[derive(Debug, Clone, Copy)]
pub struct PollPolicy {
    /// Sleep between status polls.
    pub interval: Duration,
    /// Overall deadline for the modification to complete.
    pub timeout: Duration,
    /// Retries allowed per call when the provider throttles.
    pub throttle_retries: u32,
    /// Initial backoff after a throttled call.
    pub backoff_base: Duration,
    /// Backoff ceiling.
    pub backoff_max: Duration,
}

impl PollPolicy {
    pub fn from_config(config: &CloudConfig) -> Self {
        Self {
            interval: Duration::from_secs(config.poll_interval_secs),
            timeout: Duration::from_secs(config.poll_timeout_secs),
            throttle_retries: config.throttle_retries,
            backoff_base: Duration::from_secs(config.backoff_base_secs),
            backoff_max: Duration::from_secs(config.backoff_max_secs),
        }
    }
}

/// Terminal result of waiting on one modification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResizeOutcome {
    Completed,
    Failed(String),
    TimedOut,
}

/// Retry a provider call on throttling with exponential backoff.
///
/// Any non-throttle error passes through immediately; exhausting the
/// retry budget surfaces the last throttle error.
pub async fn with_throttle_retry<T, F, Fut>(
    policy: &PollPolicy,
    what: &str,
    mut call: F,
) -> CloudResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = CloudResult<T>>,
{
    let mut delay = policy.backoff_base;
    let mut attempt = 0u32;
    loop {
        match call().await {
            Err(e) if e.is_throttle() && attempt < policy.throttle_retries => {
                attempt += 1;
                warn!(
                    %what,
                    attempt,
                    retries = policy.throttle_retries,
                    delay_secs = delay.as_secs(),
                    "provider throttled, backing off"
                );
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(policy.backoff_max);
            }
            other => return other,
        }
    }
}

/// Poll the provider until the modification reaches a terminal phase.
///
/// Persistent API errors and a vanished modification are `Failed`
/// outcomes; only the caller decides what to do with them.
pub async fn await_modification(
    client: &dyn CloudVolumes,
    volume_id: &str,
    policy: &PollPolicy,
) -> ResizeOutcome {
    let deadline = Instant::now() + policy.timeout;

    loop {
        let status =
            with_throttle_retry(policy, "describe-volumes-modifications", || {
                client.modification_status(volume_id)
            })
            .await;

        match status.map(|s| s.phase) {
            Ok(ModificationPhase::Completed) => {
                debug!(volume = %volume_id, "modification completed");
                return ResizeOutcome::Completed;
            }
            Ok(ModificationPhase::Failed { reason }) => {
                return ResizeOutcome::Failed(reason);
            }
            Ok(ModificationPhase::NoModification) => {
                return ResizeOutcome::Failed(format!(
                    "no modification found for {volume_id}"
                ));
            }
            Ok(phase @ (ModificationPhase::Modifying | ModificationPhase::Optimizing)) => {
                debug!(volume = %volume_id, ?phase, "modification in progress");
            }
            Err(CloudError::Throttled(detail)) => {
                return ResizeOutcome::Failed(format!("throttle retries exhausted: {detail}"));
            }
            Err(e) => {
                return ResizeOutcome::Failed(e.to_string());
            }
        }

        if Instant::now() + policy.interval > deadline {
            warn!(volume = %volume_id, timeout_secs = policy.timeout.as_secs(),
                "modification did not complete before deadline");
            return ResizeOutcome::TimedOut;
        }
        tokio::time::sleep(policy.interval).await;
    }
}
