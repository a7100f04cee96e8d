//! Utility modules for catalog access

pub mod rate_limiter;
pub mod retry;

pub use rate_limiter::{RateLimiter, SourcePermit};
pub use retry::{retry_source_call, RetryOutcome, RetryPolicy};
