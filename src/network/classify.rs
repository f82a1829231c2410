//! Error Classification
//!
//! Maps transport failures and non-success statuses onto [`NetworkError`].

use crate::error::NetworkError;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, RETRY_AFTER};
use std::time::Duration;

/// Longest error body carried into a message verbatim
const MAX_MESSAGE_LEN: usize = 512;

/// Classify a transport-level failure
pub fn classify_transport(err: &reqwest::Error) -> NetworkError {
    let message = err.to_string();
    if err.is_timeout() {
        NetworkError::Timeout(message)
    } else if err.is_connect() || err.is_request() || err.is_body() {
        NetworkError::Network(message)
    } else if err.is_decode() {
        NetworkError::ParseError(message)
    } else {
        NetworkError::Unknown(message)
    }
}

/// Classify a non-success status with its headers and body
pub fn classify_status(status: u16, headers: &HeaderMap, body: &[u8]) -> NetworkError {
    let message = error_message(status, body);
    match status {
        401 => NetworkError::Unauthorized(message),
        403 => NetworkError::Forbidden(message),
        404 => NetworkError::NotFound(message),
        429 => NetworkError::RateLimited {
            retry_after: parse_retry_after(headers, Utc::now()),
        },
        400..=499 => NetworkError::BadRequest { status, message },
        500..=599 => NetworkError::ServerError { status, message },
        _ => NetworkError::Unknown(format!("Unexpected status {}: {}", status, message)),
    }
}

/// Extract a human-readable message from an error body
///
/// Prefers the conventional `{"detail": ...}` field; a non-string detail is
/// rendered as compact JSON. Falls back to the raw body, then to the
/// canonical reason phrase.
pub fn error_message(status: u16, body: &[u8]) -> String {
    if let Ok(value) = serde_json::from_slice::<serde_json::Value>(body) {
        match value.get("detail") {
            Some(serde_json::Value::String(detail)) => return detail.clone(),
            Some(detail) if !detail.is_null() => return detail.to_string(),
            _ => {}
        }
    }

    let text = String::from_utf8_lossy(body);
    let text = text.trim();
    if !text.is_empty() {
        return truncate(text);
    }

    reqwest::StatusCode::from_u16(status)
        .ok()
        .and_then(|s| s.canonical_reason())
        .unwrap_or("unknown status")
        .to_string()
}

/// Parse `Retry-After` as delta-seconds or an HTTP date
pub fn parse_retry_after(headers: &HeaderMap, now: DateTime<Utc>) -> Option<Duration> {
    let raw = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();

    if let Ok(secs) = raw.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }

    let at = DateTime::parse_from_rfc2822(raw).ok()?.with_timezone(&Utc);
    Some((at - now).to_std().unwrap_or(Duration::ZERO))
}

fn truncate(text: &str) -> String {
    if text.len() <= MAX_MESSAGE_LEN {
        return text.to_string();
    }
    let mut end = MAX_MESSAGE_LEN;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &text[..end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use reqwest::header::HeaderValue;

    #[test]
    fn test_status_mapping() {
        let headers = HeaderMap::new();
        assert_matches!(classify_status(401, &headers, b""), NetworkError::Unauthorized(_));
        assert_matches!(classify_status(403, &headers, b""), NetworkError::Forbidden(_));
        assert_matches!(classify_status(404, &headers, b""), NetworkError::NotFound(_));
        assert_matches!(
            classify_status(422, &headers, b""),
            NetworkError::BadRequest { status: 422, .. }
        );
        assert_matches!(
            classify_status(503, &headers, b""),
            NetworkError::ServerError { status: 503, .. }
        );
        assert_matches!(
            classify_status(429, &headers, b""),
            NetworkError::RateLimited { retry_after: None }
        );
        assert_matches!(classify_status(304, &headers, b""), NetworkError::Unknown(_));
    }

    #[test]
    fn test_detail_message() {
        assert_eq!(error_message(400, br#"{"detail":"Field is required"}"#), "Field is required");
        assert_eq!(
            error_message(422, br#"{"detail":[{"loc":["body"],"msg":"missing"}]}"#),
            r#"[{"loc":["body"],"msg":"missing"}]"#
        );
        assert_eq!(error_message(500, b"upstream exploded"), "upstream exploded");
        assert_eq!(error_message(503, b""), "Service Unavailable");
    }

    #[test]
    fn test_long_body_is_truncated() {
        let body = "x".repeat(MAX_MESSAGE_LEN * 2);
        let message = error_message(500, body.as_bytes());
        assert_eq!(message.len(), MAX_MESSAGE_LEN + 3);
        assert!(message.ends_with("..."));
    }

    #[test]
    fn test_retry_after_forms() {
        let now = Utc::now();
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_static("7"));
        assert_eq!(parse_retry_after(&headers, now), Some(Duration::from_secs(7)));

        let later = (now + chrono::Duration::seconds(20)).to_rfc2822();
        headers.insert(RETRY_AFTER, HeaderValue::from_str(&later).unwrap());
        let parsed = parse_retry_after(&headers, now).unwrap();
        assert!(parsed <= Duration::from_secs(20) && parsed >= Duration::from_secs(19));

        headers.insert(RETRY_AFTER, HeaderValue::from_static("soon"));
        assert_eq!(parse_retry_after(&headers, now), None);
    }
}
