//! Bounded polling of remote state.
//!
//! Every wait site (changeset settlement, stack terminal status) is a [`PollPolicy`]
//! plus a check closure that classifies one observation as [`Poll::Ready`],
//! [`Poll::Pending`] or [`Poll::Failed`]. Only pending observations are retried; the
//! whole wait, including any stalled provider call, is bounded by the policy timeout.

use std::{future::Future, sync::Mutex, time::Duration};

use backon::{ConstantBuilder, Retryable};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::error::DeployError;

/// Default interval between two status checks.
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;

/// Outcome of a single status check.
#[derive(Debug)]
pub enum Poll<T> {
    /// A terminal, successful observation.
    Ready(T),
    /// Not settled yet. Carries the observed status for diagnostics.
    Pending(String),
    /// A terminal failure. Stops polling immediately.
    Failed(DeployError),
}

/// Interval and overall bound for one wait site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollPolicy {
    /// Seconds between two checks.
    pub interval_secs: u64,
    /// Maximum number of seconds to wait before failing with a timeout.
    pub timeout_secs: u64,
}

impl PollPolicy {
    pub const fn new(interval_secs: u64, timeout_secs: u64) -> Self {
        Self {
            interval_secs,
            timeout_secs,
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Number of retries that fit in the timeout at the configured interval.
    pub fn max_retries(&self) -> usize {
        (self.timeout_secs / self.interval_secs.max(1)).max(1) as usize
    }

    /// Run `check` until it reports a terminal outcome or the policy is exhausted.
    ///
    /// `operation` names the wait in logs and in the timeout error.
    pub async fn poll<T, F, Fut>(&self, operation: &str, mut check: F) -> Result<T, DeployError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Poll<T>>,
    {
        let last_status: Mutex<Option<String>> = Mutex::new(None);
        let start = Instant::now();

        let backoff = ConstantBuilder::default()
            .with_delay(self.interval())
            .with_max_times(self.max_retries());

        let attempts = (|| {
            let observation = check();
            let last_status = &last_status;
            async move {
                match observation.await {
                    Poll::Ready(value) => Ok(value),
                    Poll::Pending(status) => {
                        tracing::trace!(operation, status = %status, "Not settled yet, retrying...");
                        if let Ok(mut last) = last_status.lock() {
                            *last = Some(status);
                        }
                        Err(Attempt::Pending)
                    }
                    Poll::Failed(err) => Err(Attempt::Failed(err)),
                }
            }
        })
        .retry(backoff)
        .when(|attempt| matches!(attempt, Attempt::Pending));

        match tokio::time::timeout(self.timeout(), attempts).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(Attempt::Failed(err))) => {
                let last_status = last_status.lock().ok().and_then(|last| last.clone());
                Err(err.with_last_status(last_status))
            }
            Ok(Err(Attempt::Pending)) | Err(_) => {
                let last_status = last_status.lock().ok().and_then(|last| last.clone());
                tracing::debug!(operation, ?last_status, "Polling bound exceeded");
                Err(DeployError::Timeout {
                    operation: operation.to_string(),
                    elapsed: start.elapsed(),
                    last_status,
                })
            }
        }
    }
}

/// Internal error channel for the retry loop.
enum Attempt {
    Pending,
    Failed(DeployError),
}
