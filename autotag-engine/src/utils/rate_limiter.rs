//! Per-source rate limiting
//!
//! One gate per catalog, shared by every worker:
//! - a `tokio::sync::Semaphore` bounding in-flight calls
//! - a governor token bucket bounding calls per interval
//! - a consecutive-failure counter acting as the source's failure budget
//!
//! Gates are independent: waiting on one catalog never blocks another.

use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter as GovernorLimiter};
use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::sync::{Semaphore, SemaphorePermit};
use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::error::SourceError;
use crate::types::SourceKind;

type DirectLimiter = GovernorLimiter<NotKeyed, InMemoryState, DefaultClock>;

struct SourceGate {
    in_flight: Semaphore,
    bucket: DirectLimiter,
    consecutive_failures: AtomicU32,
}

/// Held for the duration of one catalog call
pub struct SourcePermit<'a> {
    _permit: SemaphorePermit<'a>,
}

pub struct RateLimiter {
    gates: HashMap<SourceKind, SourceGate>,
    failure_budget: u32,
}

impl RateLimiter {
    pub fn new(config: &EngineConfig) -> Self {
        let calls = NonZeroU32::new(config.per_source_rate_limit).unwrap_or(NonZeroU32::MIN);
        let period = Duration::from_secs_f64(
            config.rate_limit_interval_seconds.max(0.0) / f64::from(calls.get()),
        );
        let quota = Quota::with_period(period)
            .map(|q| q.allow_burst(calls))
            .unwrap_or_else(|| Quota::per_second(calls));

        let gates = SourceKind::CASCADE
            .iter()
            .map(|kind| {
                (
                    *kind,
                    SourceGate {
                        in_flight: Semaphore::new(config.per_source_concurrency.max(1)),
                        bucket: GovernorLimiter::direct(quota),
                        consecutive_failures: AtomicU32::new(0),
                    },
                )
            })
            .collect();

        Self {
            gates,
            failure_budget: config.source_failure_budget,
        }
    }

    fn gate(&self, source: SourceKind) -> &SourceGate {
        // Every SourceKind gets a gate in `new`
        &self.gates[&source]
    }

    /// Wait for a concurrency slot, then for a token. Consumes one unit of
    /// the source's rate budget.
    pub async fn acquire(&self, source: SourceKind) -> Result<SourcePermit<'_>, SourceError> {
        let gate = self.gate(source);

        let permit = gate
            .in_flight
            .acquire()
            .await
            .map_err(|_| SourceError::transient(source, "rate limiter closed"))?;

        if gate.bucket.check().is_err() {
            debug!(source = %source, "Rate limit reached, waiting for token");
            gate.bucket.until_ready().await;
        }

        Ok(SourcePermit { _permit: permit })
    }

    /// A call succeeded; the failure streak resets
    pub fn record_success(&self, source: SourceKind) {
        self.gate(source).consecutive_failures.store(0, Ordering::Relaxed);
    }

    /// A call failed after retries; returns the new streak length
    pub fn record_failure(&self, source: SourceKind) -> u32 {
        let count = self
            .gate(source)
            .consecutive_failures
            .fetch_add(1, Ordering::Relaxed)
            + 1;
        if count == self.failure_budget {
            warn!(
                source = %source,
                failures = count,
                "Source failure budget exhausted; skipping it for the rest of the batch"
            );
        }
        count
    }

    pub fn failure_count(&self, source: SourceKind) -> u32 {
        self.gate(source).consecutive_failures.load(Ordering::Relaxed)
    }

    /// Stage should be skipped
    pub fn is_exhausted(&self, source: SourceKind) -> bool {
        self.failure_budget > 0 && self.failure_count(source) >= self.failure_budget
    }
}
