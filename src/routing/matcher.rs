//! Profile matching logic.
//!
//! # Responsibilities
//! - Match host (`Host` header or URI authority, case-insensitive)
//! - Match path prefix (case-sensitive, segment-aware)
//! - Combine conditions with AND semantics
//!
//! # Design Decisions
//! - Host matching is case-insensitive (RFC 9110)
//! - Path matching is case-sensitive
//! - Empty condition = always matches (wildcard)
//! - No regex to guarantee O(n) matching

use axum::body::Body;
use axum::http::Request;

use crate::security::pipeline::request_host;

/// Trait for matching requests against conditions.
pub trait Matcher: Send + Sync + std::fmt::Debug {
    /// Returns true if the request matches this condition.
    fn matches(&self, req: &Request<Body>) -> bool;
}

/// Matches the Host header, ignoring any port.
#[derive(Debug, Clone)]
pub struct HostMatcher {
    expected_host: String,
}

impl HostMatcher {
    /// The host is normalized to lowercase for case-insensitive matching.
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            expected_host: host.into().to_lowercase(),
        }
    }
}

impl Matcher for HostMatcher {
    fn matches(&self, req: &Request<Body>) -> bool {
        request_host(req.headers(), req.uri())
            .map(|h| h.split(':').next().unwrap_or(h))
            .map(|h| h.eq_ignore_ascii_case(&self.expected_host))
            .unwrap_or(false)
    }
}

/// Matches the request path prefix on a segment boundary, so `/api/auth`
/// matches `/api/auth` and `/api/auth/login` but not `/api/authors`.
#[derive(Debug, Clone)]
pub struct PathPrefixMatcher {
    prefix: String,
}

impl PathPrefixMatcher {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn len(&self) -> usize {
        self.prefix.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prefix.is_empty()
    }
}

impl Matcher for PathPrefixMatcher {
    fn matches(&self, req: &Request<Body>) -> bool {
        let path = req.uri().path();
        match path.strip_prefix(self.prefix.as_str()) {
            Some(rest) => rest.is_empty() || rest.starts_with('/'),
            None => false,
        }
    }
}

/// Combines multiple matchers with AND semantics.
#[derive(Debug)]
pub struct AndMatcher {
    matchers: Vec<Box<dyn Matcher>>,
}

impl AndMatcher {
    pub fn new(matchers: Vec<Box<dyn Matcher>>) -> Self {
        Self { matchers }
    }
}

impl Matcher for AndMatcher {
    fn matches(&self, req: &Request<Body>) -> bool {
        self.matchers.iter().all(|m| m.matches(req))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(host: &str, uri: &str) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .header("Host", host)
            .body(Body::default())
            .unwrap()
    }

    #[test]
    fn test_host_matcher() {
        let matcher = HostMatcher::new("example.com");
        assert!(matcher.matches(&request("example.com", "/")));
        assert!(matcher.matches(&request("EXAMPLE.COM", "/"))); // Case insensitive
        assert!(matcher.matches(&request("example.com:8080", "/")));
        assert!(!matcher.matches(&request("other.com", "/")));

        // HTTP/2 requests carry the host in the URI authority
        let h2 = Request::builder()
            .uri("https://example.com/")
            .body(Body::default())
            .unwrap();
        assert!(matcher.matches(&h2));
    }

    #[test]
    fn test_path_matcher_respects_segments() {
        let matcher = PathPrefixMatcher::new("/api/auth");
        assert!(matcher.matches(&request("h", "/api/auth")));
        assert!(matcher.matches(&request("h", "/api/auth/login?next=/")));
        assert!(!matcher.matches(&request("h", "/api/authors")));
        assert!(!matcher.matches(&request("h", "/images")));
    }

    #[test]
    fn test_root_prefix_matches_everything() {
        let matcher = PathPrefixMatcher::new("/");
        assert!(matcher.is_empty());
        assert!(matcher.matches(&request("h", "/")));
        assert!(matcher.matches(&request("h", "/anything/at/all")));
    }

    #[test]
    fn test_and_matcher() {
        let matcher = AndMatcher::new(vec![
            Box::new(HostMatcher::new("api.example.com")),
            Box::new(PathPrefixMatcher::new("/api")),
        ]);
        assert!(matcher.matches(&request("api.example.com", "/api/x")));
        assert!(!matcher.matches(&request("www.example.com", "/api/x")));
        assert!(!matcher.matches(&request("api.example.com", "/x")));
    }
}
