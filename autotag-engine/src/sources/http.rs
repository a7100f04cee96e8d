//! Shared HTTP plumbing for catalog adapters
//!
//! Maps transport failures and status codes onto [`SourceError`] kinds:
//! - network failure, timeout, 5xx → TRANSIENT
//! - 429 → RATE_LIMITED (honoring `Retry-After` when present)
//! - 404 → no result
//! - any other 4xx → PERMANENT
//! - unparseable body → PERMANENT (via [`ValidationError`])

use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use crate::error::{SourceError, ValidationError};
use crate::types::SourceKind;

pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Build the HTTP client every adapter uses
pub fn build_client(source: SourceKind) -> Result<reqwest::Client, SourceError> {
    reqwest::Client::builder()
        .user_agent(autotag_common::config::get_user_agent())
        .timeout(REQUEST_TIMEOUT)
        .connect_timeout(CONNECT_TIMEOUT)
        .build()
        .map_err(|e| SourceError::permanent(source, format!("HTTP client setup failed: {}", e)))
}

/// `Retry-After` in seconds (HTTP-date form is ignored)
pub fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|s| s.is_finite() && *s >= 0.0)
        .map(Duration::from_secs_f64)
}

/// Classify a non-success status; `None` means the body should be read
pub fn classify_status(
    source: SourceKind,
    status: StatusCode,
    retry_after: Option<Duration>,
) -> Option<SourceError> {
    if status.is_success() || status == StatusCode::NOT_FOUND {
        return None;
    }
    let err = if status == StatusCode::TOO_MANY_REQUESTS {
        SourceError::rate_limited(source, retry_after)
    } else if status.is_server_error() || status == StatusCode::REQUEST_TIMEOUT {
        SourceError::transient(source, format!("HTTP {}", status))
    } else {
        SourceError::permanent(source, format!("HTTP {}", status))
    };
    Some(err.with_status(status.as_u16()))
}

/// Network-level failure
pub fn classify_transport(source: SourceKind, err: &reqwest::Error) -> SourceError {
    if err.is_builder() {
        SourceError::permanent(source, format!("Invalid request: {}", err))
    } else {
        SourceError::transient(source, format!("Network error: {}", err))
    }
}

/// Send `request` and decode the JSON body; `Ok(None)` on 404
pub async fn fetch_json<T: DeserializeOwned>(
    source: SourceKind,
    request: RequestBuilder,
) -> Result<Option<T>, SourceError> {
    let response = request
        .send()
        .await
        .map_err(|e| classify_transport(source, &e))?;

    let status = response.status();
    if let Some(err) = classify_status(source, status, parse_retry_after(response.headers())) {
        tracing::debug!(source = %source, status = status.as_u16(), "Catalog request failed");
        return Err(err);
    }
    if status == StatusCode::NOT_FOUND {
        return Ok(None);
    }

    let body = response
        .bytes()
        .await
        .map_err(|e| classify_transport(source, &e))?;

    serde_json::from_slice(&body)
        .map(Some)
        .map_err(|e| ValidationError::new(source, e.to_string()).into())
}

/// Minimum spacing between an adapter's own HTTP requests
///
/// One adapter query may issue several requests (lookup, then detail);
/// the shared limiter admits the query, this spaces the requests inside it.
pub struct RequestPacer {
    last_request: Mutex<Option<Instant>>,
    min_interval: Duration,
}

impl RequestPacer {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            last_request: Mutex::new(None),
            min_interval,
        }
    }

    pub async fn wait(&self) {
        let mut last = self.last_request.lock().await;

        if let Some(last_time) = *last {
            let elapsed = last_time.elapsed();
            if elapsed < self.min_interval {
                let wait_time = self.min_interval - elapsed;
                tracing::trace!("Pacing catalog request: waiting {:?}", wait_time);
                tokio::time::sleep(wait_time).await;
            }
        }

        *last = Some(Instant::now());
    }
}

/// Trimmed, non-empty string
pub(crate) fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Leading four-digit year of a date like `1999`, `1999-10` or `1999-10-04`
pub(crate) fn year_of(date: Option<&str>) -> Option<i32> {
    let date = date?.trim();
    date.get(..4)?.parse().ok().filter(|y| *y > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SourceErrorKind;
    use reqwest::header::HeaderValue;

    #[test]
    fn test_status_classification() {
        let s = SourceKind::Editorial;

        assert!(classify_status(s, StatusCode::OK, None).is_none());
        assert!(classify_status(s, StatusCode::NOT_FOUND, None).is_none());

        let err = classify_status(s, StatusCode::BAD_GATEWAY, None).unwrap();
        assert_eq!(err.kind, SourceErrorKind::Transient);

        let err = classify_status(s, StatusCode::UNAUTHORIZED, None).unwrap();
        assert_eq!(err.kind, SourceErrorKind::Permanent);
        assert_eq!(err.status, Some(401));

        let err = classify_status(s, StatusCode::TOO_MANY_REQUESTS, Some(Duration::from_secs(2))).unwrap();
        assert_eq!(
            err.kind,
            SourceErrorKind::RateLimited {
                retry_after: Some(Duration::from_secs(2))
            }
        );
        assert_eq!(err.status, Some(429));
    }

    #[test]
    fn test_retry_after_header() {
        let mut headers = HeaderMap::new();
        assert_eq!(parse_retry_after(&headers), None);

        headers.insert(RETRY_AFTER, HeaderValue::from_static("3"));
        assert_eq!(parse_retry_after(&headers), Some(Duration::from_secs(3)));

        headers.insert(RETRY_AFTER, HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"));
        assert_eq!(parse_retry_after(&headers), None);
    }

    #[test]
    fn test_year_of() {
        assert_eq!(year_of(Some("1999-10-04")), Some(1999));
        assert_eq!(year_of(Some("2001")), Some(2001));
        assert_eq!(year_of(Some("")), None);
        assert_eq!(year_of(Some("n/a")), None);
        assert_eq!(year_of(None), None);
    }

    #[tokio::test]
    async fn test_pacer_spaces_requests() {
        let pacer = RequestPacer::new(Duration::from_millis(50));
        let start = Instant::now();
        pacer.wait().await;
        pacer.wait().await;
        assert!(start.elapsed() >= Duration::from_millis(45));
    }
}
