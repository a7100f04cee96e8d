//! Catalog call retry logic
//!
//! Exponential backoff for classified source errors:
//! - TRANSIENT: retried until `max_retries` attempts have been made;
//!   delay `base · 2^(n−1)`, capped at `backoff_max_seconds`
//! - RATE_LIMITED: waits `max(retry_after, backoff)`; counted against
//!   `max_rate_limit_waits`, never against the TRANSIENT budget
//! - PERMANENT: returned immediately
//!
//! Backoff sleeps end early when the batch is cancelled; the last error is
//! returned and the caller decides the track's fate.

use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::config::EngineConfig;
use crate::error::{SourceError, SourceErrorKind};
use crate::types::SourceKind;

/// Retry limits for one catalog call
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts for TRANSIENT errors
    pub max_attempts: u32,
    pub max_rate_limit_waits: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            max_attempts: config.max_retries.max(1),
            max_rate_limit_waits: config.max_rate_limit_waits,
            backoff_base: Duration::from_secs_f64(config.backoff_base_seconds.max(0.0)),
            backoff_max: Duration::from_secs_f64(config.backoff_max_seconds.max(0.0)),
        }
    }

    /// Delay before retry `n` (1-based); non-decreasing in `n`
    pub fn backoff(&self, n: u32) -> Duration {
        let factor = 2u32.saturating_pow(n.saturating_sub(1).min(30));
        self.backoff_base
            .saturating_mul(factor)
            .min(self.backoff_max)
    }
}

/// What happened across the attempts of one call
#[derive(Debug)]
pub struct RetryOutcome<T> {
    pub result: Result<T, SourceError>,
    /// Calls made (every attempt, including rate-limited ones)
    pub attempts: u32,
    pub transient_failures: u32,
    pub rate_limit_waits: u32,
    /// Sleeps taken between attempts, in order
    pub delays: Vec<Duration>,
}

/// Run `operation` under `policy`
pub async fn retry_source_call<F, Fut, T>(
    source: SourceKind,
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    mut operation: F,
) -> RetryOutcome<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, SourceError>>,
{
    let mut attempts = 0u32;
    let mut transient_failures = 0u32;
    let mut rate_limit_waits = 0u32;
    let mut delays = Vec::new();

    let result = loop {
        attempts += 1;
        if attempts > 1 {
            tracing::debug!(source = %source, attempt = attempts, "Retrying source call");
        }

        let err = match operation().await {
            Ok(value) => {
                if attempts > 1 {
                    tracing::debug!(
                        source = %source,
                        attempt = attempts,
                        "Source call succeeded after retry"
                    );
                }
                break Ok(value);
            }
            Err(err) => err,
        };

        let delay = match err.kind {
            SourceErrorKind::Permanent => break Err(err),
            SourceErrorKind::Transient => {
                transient_failures += 1;
                if transient_failures >= policy.max_attempts {
                    tracing::warn!(
                        source = %source,
                        attempts = transient_failures,
                        error = %err.message,
                        "Source call failed: transient retries exhausted"
                    );
                    break Err(err);
                }
                policy.backoff(transient_failures)
            }
            SourceErrorKind::RateLimited { retry_after } => {
                rate_limit_waits += 1;
                if rate_limit_waits > policy.max_rate_limit_waits {
                    tracing::warn!(
                        source = %source,
                        waits = rate_limit_waits - 1,
                        "Source call failed: rate-limit wait budget exhausted"
                    );
                    break Err(err);
                }
                let backoff = policy.backoff(rate_limit_waits);
                retry_after.map_or(backoff, |ra| ra.max(backoff))
            }
        };

        // Never shorter than the previous sleep
        let delay = delays.last().map_or(delay, |prev: &Duration| delay.max(*prev));

        tracing::warn!(
            source = %source,
            attempt = attempts,
            backoff_ms = delay.as_millis() as u64,
            error = %err.message,
            "Source call failed, will retry after backoff"
        );

        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::debug!(source = %source, "Backoff interrupted by cancellation");
                break Err(err);
            }
            _ = tokio::time::sleep(delay) => {}
        }
        delays.push(delay);
    };

    RetryOutcome {
        result,
        attempts,
        transient_failures,
        rate_limit_waits,
        delays,
    }
}
