//! Request body limits.
//!
//! # Responsibilities
//! - Reject declared oversized bodies before reading them
//! - Buffer bodies up to the configured maximum for scanning
//!
//! # Design Decisions
//! - `Content-Length` checked first (early rejection)
//! - A body that fails to buffer is treated as oversized: 413 Payload Too Large

use axum::body::{Body, Bytes};
use axum::http::header::CONTENT_LENGTH;
use axum::http::HeaderMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LimitError {
    #[error("declared body of {declared} bytes exceeds limit of {limit} bytes")]
    DeclaredTooLarge { declared: u64, limit: usize },

    #[error("body exceeds limit of {limit} bytes: {source}")]
    TooLarge {
        limit: usize,
        #[source]
        source: axum::Error,
    },
}

/// Reject requests whose `Content-Length` exceeds `limit`.
pub fn check_content_length(headers: &HeaderMap, limit: usize) -> Result<(), LimitError> {
    let declared = headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());

    match declared {
        Some(declared) if declared > limit as u64 => Err(LimitError::DeclaredTooLarge { declared, limit }),
        _ => Ok(()),
    }
}

/// Read the whole body, failing once more than `limit` bytes arrive.
pub async fn buffer_body(body: Body, limit: usize) -> Result<Bytes, LimitError> {
    axum::body::to_bytes(body, limit)
        .await
        .map_err(|source| LimitError::TooLarge { limit, source })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_declared_length() {
        let mut headers = HeaderMap::new();
        assert!(check_content_length(&headers, 10).is_ok());

        headers.insert(CONTENT_LENGTH, HeaderValue::from_static("10"));
        assert!(check_content_length(&headers, 10).is_ok());

        headers.insert(CONTENT_LENGTH, HeaderValue::from_static("11"));
        assert!(matches!(
            check_content_length(&headers, 10),
            Err(LimitError::DeclaredTooLarge { declared: 11, limit: 10 })
        ));
    }

    #[tokio::test]
    async fn test_buffer_body_enforces_limit() {
        let bytes = buffer_body(Body::from("hello"), 5).await.unwrap();
        assert_eq!(&bytes[..], b"hello");

        assert!(buffer_body(Body::from("hello!"), 5).await.is_err());
    }
}
