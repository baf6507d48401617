//! Retry policy, response classification and `Retry-After` handling.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use rand::Rng;
use serde_json::Value;
use std::cmp::max;
use std::time::Duration;

use super::transport::TransportResponse;
use crate::errors::UploadError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            max_jitter: Duration::from_millis(250),
        }
    }
}

impl RetryPolicy {
    /// `base_delay * 2^retry`, saturating instead of overflowing.
    pub fn backoff_delay(&self, retry: u32) -> Duration {
        2u32.checked_pow(retry)
            .and_then(|factor| self.base_delay.checked_mul(factor))
            .unwrap_or(Duration::MAX)
    }

    /// Wait before retry number `retry` (0-based): the larger of the backoff
    /// and the server hint, plus jitter.
    pub fn delay_for(&self, retry: u32, retry_after: Option<Duration>) -> Duration {
        let base = match retry_after {
            Some(hint) => max(self.backoff_delay(retry), hint),
            None => self.backoff_delay(retry),
        };
        base.saturating_add(self.jitter())
    }

    fn jitter(&self) -> Duration {
        let max_ms = self.max_jitter.as_millis() as u64;
        if max_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
    }
}

/// Why a single attempt did not produce a URL.
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptFailure {
    Retryable {
        status: u16,
        message: String,
        retry_after: Option<Duration>,
    },
    Fatal(UploadError),
}

pub fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 502 | 503 | 504)
}

/// Turn a raw response into a URL or a classified failure.
pub fn classify_response(response: &TransportResponse) -> Result<String, AttemptFailure> {
    if (200..300).contains(&response.status) {
        let content_type = response.content_type.clone().unwrap_or_default();
        if !content_type.to_ascii_lowercase().contains("application/json") {
            return Err(AttemptFailure::Fatal(UploadError::UnexpectedContentType {
                content_type: if content_type.is_empty() {
                    "none".to_string()
                } else {
                    content_type
                },
            }));
        }

        let json: Value = serde_json::from_slice(&response.body).map_err(|e| {
            AttemptFailure::Fatal(UploadError::InvalidResponse(e.to_string()))
        })?;

        return match json.get("url").and_then(Value::as_str) {
            Some(url) if !url.is_empty() => Ok(url.to_string()),
            _ => Err(AttemptFailure::Fatal(UploadError::MissingUrl)),
        };
    }

    let message = error_message(response);

    if is_retryable_status(response.status) {
        let retry_after = response
            .retry_after
            .as_deref()
            .and_then(|value| parse_retry_after(value, Utc::now()));

        Err(AttemptFailure::Retryable {
            status: response.status,
            message,
            retry_after,
        })
    } else {
        Err(AttemptFailure::Fatal(UploadError::Http {
            status: response.status,
            message,
        }))
    }
}

/// Prefer the body's `message` or `error` field, fall back to the status text.
fn error_message(response: &TransportResponse) -> String {
    serde_json::from_slice::<Value>(&response.body)
        .ok()
        .and_then(|json| {
            ["message", "error"]
                .iter()
                .find_map(|key| json.get(*key).and_then(Value::as_str).map(str::to_string))
        })
        .unwrap_or_else(|| {
            reqwest::StatusCode::from_u16(response.status)
                .ok()
                .and_then(|s| s.canonical_reason())
                .unwrap_or("Unknown error")
                .to_string()
        })
}

/// Obsolete HTTP date forms, always in GMT.
const OBSOLETE_HTTP_DATE_FORMATS: [&str; 2] = [
    "%A, %d-%b-%y %H:%M:%S GMT", // RFC 850
    "%a %b %e %H:%M:%S %Y",      // asctime
];

fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(date) = DateTime::parse_from_rfc2822(value) {
        return Some(date.with_timezone(&Utc));
    }

    OBSOLETE_HTTP_DATE_FORMATS.iter().find_map(|format| {
        NaiveDateTime::parse_from_str(value, format)
            .ok()
            .map(|naive| Utc.from_utc_datetime(&naive))
    })
}

/// Parse a `Retry-After` value given as delta-seconds or an HTTP date.
/// Dates in the past yield a zero wait.
pub fn parse_retry_after(value: &str, now: DateTime<Utc>) -> Option<Duration> {
    let value = value.trim();

    if let Ok(seconds) = value.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }

    let date = parse_http_date(value)?;
    Some((date - now).to_std().unwrap_or(Duration::ZERO))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(status: u16, content_type: Option<&str>, body: &str) -> TransportResponse {
        TransportResponse {
            status,
            content_type: content_type.map(str::to_string),
            retry_after: None,
            body: body.as_bytes().to_vec().into(),
        }
    }

    fn no_jitter() -> RetryPolicy {
        RetryPolicy {
            max_jitter: Duration::ZERO,
            ..RetryPolicy::default()
        }
    }

    #[test]
    fn test_default_retry_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_retries, 3);
        assert_eq!(policy.base_delay, Duration::from_millis(500));
        assert_eq!(policy.max_jitter, Duration::from_millis(250));
    }

    #[test]
    fn test_backoff_doubles_per_retry() {
        let policy = no_jitter();
        assert_eq!(policy.backoff_delay(0), Duration::from_millis(500));
        assert_eq!(policy.backoff_delay(1), Duration::from_millis(1000));
        assert_eq!(policy.backoff_delay(2), Duration::from_millis(2000));
        assert_eq!(policy.backoff_delay(3), Duration::from_millis(4000));
    }

    #[test]
    fn test_backoff_keeps_doubling_for_late_retries() {
        let policy = no_jitter();
        for retry in 0..10 {
            let minimum = Duration::from_millis(500) * 2u32.pow(retry);
            assert!(policy.delay_for(retry, None) >= minimum, "retry {}", retry);
        }
        assert_eq!(policy.delay_for(6, None), Duration::from_secs(32));
        assert_eq!(policy.delay_for(9, None), Duration::from_secs(256));
    }

    #[test]
    fn test_backoff_saturates_instead_of_overflowing() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff_delay(40), Duration::MAX);
        assert_eq!(policy.delay_for(40, None), Duration::MAX);
    }

    #[test]
    fn test_retry_after_hint_wins_when_larger() {
        let policy = no_jitter();
        assert_eq!(
            policy.delay_for(0, Some(Duration::from_secs(2))),
            Duration::from_secs(2)
        );
        assert_eq!(
            policy.delay_for(2, Some(Duration::from_millis(100))),
            Duration::from_millis(2000)
        );
    }

    #[test]
    fn test_large_server_hint_is_honoured() {
        let policy = no_jitter();
        assert_eq!(
            policy.delay_for(0, Some(Duration::from_secs(90))),
            Duration::from_secs(90)
        );
    }

    #[test]
    fn test_jitter_is_bounded() {
        let policy = RetryPolicy::default();
        for _ in 0..100 {
            let delay = policy.delay_for(0, None);
            assert!(delay >= Duration::from_millis(500));
            assert!(delay <= Duration::from_millis(750));
        }
    }

    #[test]
    fn test_parse_retry_after_seconds() {
        let now = Utc::now();
        assert_eq!(parse_retry_after("2", now), Some(Duration::from_secs(2)));
        assert_eq!(parse_retry_after(" 120 ", now), Some(Duration::from_secs(120)));
    }

    #[test]
    fn test_parse_retry_after_http_date() {
        let now = Utc.with_ymd_and_hms(2015, 10, 21, 7, 28, 0).unwrap();
        assert_eq!(
            parse_retry_after("Wed, 21 Oct 2015 07:28:05 GMT", now),
            Some(Duration::from_secs(5))
        );
        assert_eq!(
            parse_retry_after("Wed, 21 Oct 2015 07:27:00 GMT", now),
            Some(Duration::ZERO)
        );
    }

    #[test]
    fn test_parse_retry_after_obsolete_date_forms() {
        let now = Utc.with_ymd_and_hms(1994, 11, 6, 8, 49, 30).unwrap();
        assert_eq!(
            parse_retry_after("Sunday, 06-Nov-94 08:49:37 GMT", now),
            Some(Duration::from_secs(7))
        );
        assert_eq!(
            parse_retry_after("Sun Nov  6 08:49:37 1994", now),
            Some(Duration::from_secs(7))
        );
    }

    #[test]
    fn test_parse_retry_after_garbage() {
        assert_eq!(parse_retry_after("soon", Utc::now()), None);
        assert_eq!(parse_retry_after("-1", Utc::now()), None);
    }

    #[test]
    fn test_retryable_statuses() {
        for status in [429, 502, 503, 504] {
            assert!(is_retryable_status(status));
        }
        for status in [400, 401, 403, 404, 413, 500] {
            assert!(!is_retryable_status(status));
        }
    }

    #[test]
    fn test_classify_success() {
        let r = response(200, Some("application/json; charset=utf-8"), r#"{"url":"/uploads/a.png"}"#);
        assert_eq!(classify_response(&r), Ok("/uploads/a.png".to_string()));
    }

    #[test]
    fn test_classify_non_json_success_is_fatal() {
        let r = response(200, Some("text/html"), "<html>index</html>");
        assert!(matches!(
            classify_response(&r),
            Err(AttemptFailure::Fatal(UploadError::UnexpectedContentType { .. }))
        ));
    }

    #[test]
    fn test_classify_missing_url_is_fatal() {
        let r = response(201, Some("application/json"), r#"{"ok":true}"#);
        assert_eq!(
            classify_response(&r),
            Err(AttemptFailure::Fatal(UploadError::MissingUrl))
        );
    }

    #[test]
    fn test_classify_malformed_json_is_fatal() {
        let r = response(200, Some("application/json"), "{not json");
        assert!(matches!(
            classify_response(&r),
            Err(AttemptFailure::Fatal(UploadError::InvalidResponse(_)))
        ));
    }

    #[test]
    fn test_classify_client_error_uses_body_message() {
        let r = response(400, Some("application/json"), r#"{"message":"File too big"}"#);
        assert_eq!(
            classify_response(&r),
            Err(AttemptFailure::Fatal(UploadError::Http {
                status: 400,
                message: "File too big".to_string(),
            }))
        );

        let r = response(401, Some("application/json"), r#"{"error":"Not authorized"}"#);
        assert_eq!(
            classify_response(&r),
            Err(AttemptFailure::Fatal(UploadError::Http {
                status: 401,
                message: "Not authorized".to_string(),
            }))
        );
    }

    #[test]
    fn test_classify_retryable_with_hint() {
        let mut r = response(429, None, "");
        r.retry_after = Some("3".to_string());
        assert_eq!(
            classify_response(&r),
            Err(AttemptFailure::Retryable {
                status: 429,
                message: "Too Many Requests".to_string(),
                retry_after: Some(Duration::from_secs(3)),
            })
        );
    }
}
