//! Response construction and transformation.
//!
//! # Responsibilities
//! - Render pipeline denials as JSON responses
//! - Copy pipeline headers (rate limit, Retry-After) onto responses
//! - Strip hop-by-hop headers between client and upstream
//!
//! # Design Decisions
//! - Denial bodies carry only the pipeline message; no stack traces, no
//!   internal identifiers
//! - Invalid header names or values from the pipeline are skipped, never fatal

use axum::body::Body;
use axum::http::header::CONNECTION;
use axum::http::{HeaderMap, HeaderName, HeaderValue, Response, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;
use std::collections::BTreeMap;

use crate::security::SecurityCheckResult;

/// Headers that describe a single connection and must not be forwarded.
pub const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

#[derive(Debug, Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<&'a str>,
}

/// JSON error response with the given status.
pub fn error_response(status: StatusCode, message: &str) -> Response<Body> {
    (
        status,
        Json(ErrorBody {
            error: message,
            reason: None,
        }),
    )
        .into_response()
}

/// Render a denied [`SecurityCheckResult`].
pub fn deny_response(result: &SecurityCheckResult) -> Response<Body> {
    let status = result
        .status_code
        .and_then(|code| StatusCode::from_u16(code).ok())
        .unwrap_or(StatusCode::FORBIDDEN);
    let message = result.message.as_deref().unwrap_or("Access denied");

    let mut response = (
        status,
        Json(ErrorBody {
            error: message,
            reason: result.deny_reason.as_deref(),
        }),
    )
        .into_response();

    if let Some(extra) = &result.extra_headers {
        apply_headers(response.headers_mut(), extra);
    }
    response
}

/// Insert each `(name, value)` pair, skipping any that are not valid headers.
pub fn apply_headers(headers: &mut HeaderMap, extra: &BTreeMap<String, String>) {
    for (name, value) in extra {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                headers.insert(name, value);
            }
            _ => tracing::debug!(header = %name, "Skipping invalid header"),
        }
    }
}

/// Remove hop-by-hop headers, including any named by `Connection`.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let named: Vec<HeaderName> = headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();

    for name in named {
        headers.remove(name);
    }
    for name in HOP_BY_HOP_HEADERS {
        headers.remove(*name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::header::CONTENT_TYPE;

    fn is_json(headers: &HeaderMap) -> bool {
        headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.starts_with("application/json"))
    }

    fn denied(status: u16, headers: &[(&str, &str)]) -> SecurityCheckResult {
        SecurityCheckResult {
            allowed: false,
            status_code: Some(status),
            message: Some("Too many requests".to_string()),
            extra_headers: Some(
                headers
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            ),
            deny_reason: Some("rate_limit_exceeded".to_string()),
        }
    }

    #[tokio::test]
    async fn test_deny_response() {
        let result = denied(429, &[("Retry-After", "42"), ("X-RateLimit-Remaining", "0")]);
        let response = deny_response(&result);

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()["retry-after"], "42");
        assert_eq!(response.headers()["x-ratelimit-remaining"], "0");
        assert!(is_json(response.headers()));

        let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"], "Too many requests");
        assert_eq!(json["reason"], "rate_limit_exceeded");
    }

    #[test]
    fn test_invalid_headers_skipped() {
        let mut headers = HeaderMap::new();
        let extra = BTreeMap::from([
            ("bad header".to_string(), "x".to_string()),
            ("X-Ok".to_string(), "yes".to_string()),
        ]);
        apply_headers(&mut headers, &extra);
        assert_eq!(headers.len(), 1);
        assert_eq!(headers["x-ok"], "yes");
    }

    #[test]
    fn test_strip_hop_by_hop() {
        let mut headers = HeaderMap::new();
        headers.insert(CONNECTION, HeaderValue::from_static("keep-alive, x-session-hint"));
        headers.insert("keep-alive", HeaderValue::from_static("timeout=5"));
        headers.insert("x-session-hint", HeaderValue::from_static("abc"));
        headers.insert("transfer-encoding", HeaderValue::from_static("chunked"));
        headers.insert("content-type", HeaderValue::from_static("text/plain"));

        strip_hop_by_hop(&mut headers);

        assert_eq!(headers.len(), 1);
        assert!(headers.contains_key("content-type"));
    }
}
