//! CORS origin validation.
//!
//! Allowed origins are exact strings or wildcard subdomain entries
//! (`*.example.com`, optionally with a scheme: `https://*.example.com`).
//! An allowed origin is always echoed back verbatim with `Vary: Origin`;
//! a literal `*` is never emitted.

use arc_swap::ArcSwap;
use axum::body::Body;
use axum::http::header::{
    ACCESS_CONTROL_ALLOW_CREDENTIALS, ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS,
    ACCESS_CONTROL_ALLOW_ORIGIN, ACCESS_CONTROL_EXPOSE_HEADERS, ACCESS_CONTROL_MAX_AGE, ORIGIN, VARY,
};
use axum::http::{HeaderMap, HeaderValue, Method, Response, StatusCode};
use std::sync::Arc;
use url::Url;

use crate::config::{CorsConfig, Environment};

/// Origins allowed outside production when nothing is configured.
pub const DEVELOPMENT_ORIGINS: &[&str] = &[
    "http://localhost:3000",
    "http://localhost:5173",
    "http://127.0.0.1:3000",
    "http://127.0.0.1:5173",
];

const ALLOWED_METHODS: &str = "GET, POST, PUT, PATCH, DELETE, OPTIONS";
const ALLOWED_HEADERS: &str = "Content-Type, Authorization, X-Requested-With, X-CSRF-Token";
const EXPOSED_HEADERS: &str =
    "X-Request-Id, X-RateLimit-Limit, X-RateLimit-Remaining, X-RateLimit-Reset, Retry-After";

/// Split a comma-separated origin list, e.g. the `ALLOWED_ORIGINS` variable.
pub fn parse_origin_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().trim_end_matches('/'))
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Effective allow-list for `environment`.
///
/// Production always merges `production_defaults` into whatever is
/// configured. Development falls back to [`DEVELOPMENT_ORIGINS`].
pub fn resolve_allowed_origins(
    configured: &[String],
    environment: Environment,
    production_defaults: &[String],
) -> Vec<String> {
    let mut origins: Vec<String> = configured.to_vec();

    if environment.is_production() {
        for origin in production_defaults {
            if !origins.contains(origin) {
                origins.push(origin.clone());
            }
        }
    } else if origins.is_empty() {
        origins = DEVELOPMENT_ORIGINS.iter().map(|s| s.to_string()).collect();
    }

    origins
}

/// Whether `origin` matches an entry of `allow_list`.
pub fn is_origin_allowed(origin: &str, allow_list: &[String]) -> bool {
    let origin = origin.trim_end_matches('/');
    if allow_list.iter().any(|entry| entry == origin) {
        return true;
    }

    let Ok(parsed) = Url::parse(origin) else {
        return false;
    };
    let Some(hostname) = parsed.host_str() else {
        return false;
    };
    let hostname = hostname.to_ascii_lowercase();

    allow_list.iter().any(|entry| {
        let (scheme, pattern) = match entry.split_once("://") {
            Some((scheme, rest)) => (Some(scheme), rest),
            None => (None, entry.as_str()),
        };
        let Some(domain) = pattern.strip_prefix("*.") else {
            return false;
        };
        if scheme.is_some_and(|s| !s.eq_ignore_ascii_case(parsed.scheme())) {
            return false;
        }
        let domain = domain.to_ascii_lowercase();
        hostname == domain || hostname.ends_with(&format!(".{}", domain))
    })
}

/// Per-request CORS options.
#[derive(Debug, Clone, Copy)]
pub struct CorsOptions {
    pub allow_credentials: bool,
    pub max_age_secs: u64,
}

impl Default for CorsOptions {
    fn default() -> Self {
        Self {
            allow_credentials: false,
            max_age_secs: 86_400,
        }
    }
}

/// CORS response headers for a request, or `None` when its `Origin` is
/// present and not allowed.
///
/// Requests without an `Origin` header get the method and header lists but
/// no `Access-Control-Allow-Origin`.
pub fn get_cors_headers(
    request_headers: &HeaderMap,
    allow_list: &[String],
    options: CorsOptions,
) -> Option<HeaderMap> {
    let mut headers = HeaderMap::new();
    headers.insert(ACCESS_CONTROL_ALLOW_METHODS, HeaderValue::from_static(ALLOWED_METHODS));
    headers.insert(ACCESS_CONTROL_ALLOW_HEADERS, HeaderValue::from_static(ALLOWED_HEADERS));
    headers.insert(ACCESS_CONTROL_MAX_AGE, HeaderValue::from(options.max_age_secs));

    let Some(origin) = request_headers.get(ORIGIN) else {
        return Some(headers);
    };

    let allowed = origin
        .to_str()
        .map(|o| is_origin_allowed(o, allow_list))
        .unwrap_or(false);
    if !allowed {
        return None;
    }

    headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, origin.clone());
    headers.insert(VARY, HeaderValue::from_static("Origin"));
    headers.insert(ACCESS_CONTROL_EXPOSE_HEADERS, HeaderValue::from_static(EXPOSED_HEADERS));
    if options.allow_credentials {
        headers.insert(ACCESS_CONTROL_ALLOW_CREDENTIALS, HeaderValue::from_static("true"));
    }

    Some(headers)
}

/// Answer an `OPTIONS` preflight: 200 with CORS headers when the origin is
/// allowed, 403 with an empty body otherwise. Other methods yield `None`.
pub fn handle_preflight(
    method: &Method,
    request_headers: &HeaderMap,
    allow_list: &[String],
    options: CorsOptions,
) -> Option<Response<Body>> {
    if method != Method::OPTIONS {
        return None;
    }

    let mut response = Response::new(Body::empty());
    match get_cors_headers(request_headers, allow_list, options) {
        Some(headers) => {
            *response.status_mut() = StatusCode::OK;
            response.headers_mut().extend(headers);
        }
        None => {
            tracing::warn!(
                origin = ?request_headers.get(ORIGIN),
                "CORS preflight rejected"
            );
            *response.status_mut() = StatusCode::FORBIDDEN;
        }
    }
    Some(response)
}

/// The live allow-list. Swapped wholesale on config reload.
pub struct CorsPolicy {
    origins: ArcSwap<Vec<String>>,
    max_age_secs: ArcSwap<u64>,
}

impl CorsPolicy {
    pub fn from_config(config: &CorsConfig, environment: Environment) -> Self {
        let origins =
            resolve_allowed_origins(&config.allowed_origins, environment, &config.production_origins);
        tracing::info!(environment = %environment, origins = ?origins, "CORS allow-list resolved");
        Self {
            origins: ArcSwap::from_pointee(origins),
            max_age_secs: ArcSwap::from_pointee(config.max_age_secs),
        }
    }

    /// Replace the allow-list from a reloaded configuration.
    pub fn reload(&self, config: &CorsConfig, environment: Environment) {
        let origins =
            resolve_allowed_origins(&config.allowed_origins, environment, &config.production_origins);
        tracing::info!(origins = ?origins, "CORS allow-list reloaded");
        self.origins.store(Arc::new(origins));
        self.max_age_secs.store(Arc::new(config.max_age_secs));
    }

    pub fn allowed_origins(&self) -> Arc<Vec<String>> {
        self.origins.load_full()
    }

    pub fn is_allowed(&self, origin: &str) -> bool {
        is_origin_allowed(origin, &self.origins.load())
    }

    fn options(&self, allow_credentials: bool) -> CorsOptions {
        CorsOptions {
            allow_credentials,
            max_age_secs: **self.max_age_secs.load(),
        }
    }

    pub fn cors_headers(&self, request_headers: &HeaderMap, allow_credentials: bool) -> Option<HeaderMap> {
        get_cors_headers(request_headers, &self.origins.load(), self.options(allow_credentials))
    }

    pub fn handle_preflight(
        &self,
        method: &Method,
        request_headers: &HeaderMap,
        allow_credentials: bool,
    ) -> Option<Response<Body>> {
        handle_preflight(
            method,
            request_headers,
            &self.origins.load(),
            self.options(allow_credentials),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list(entries: &[&str]) -> Vec<String> {
        entries.iter().map(|s| s.to_string()).collect()
    }

    fn with_origin(origin: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(ORIGIN, HeaderValue::from_static(origin));
        headers
    }

    #[test]
    fn test_wildcard_subdomain_matching() {
        let allow = list(&["*.example.com"]);
        assert!(is_origin_allowed("https://app.example.com", &allow));
        assert!(is_origin_allowed("https://example.com", &allow));
        assert!(is_origin_allowed("https://a.b.example.com", &allow));
        assert!(!is_origin_allowed("https://evilexample.com", &allow));
        assert!(!is_origin_allowed("https://example.com.evil.io", &allow));
    }

    #[test]
    fn test_wildcard_with_scheme() {
        let allow = list(&["https://*.example.com"]);
        assert!(is_origin_allowed("https://app.example.com", &allow));
        assert!(!is_origin_allowed("http://app.example.com", &allow));
    }

    #[test]
    fn test_exact_match() {
        let allow = list(&["https://example.com"]);
        assert!(is_origin_allowed("https://example.com", &allow));
        assert!(!is_origin_allowed("https://app.example.com", &allow));
        assert!(!is_origin_allowed("null", &allow));
    }

    #[test]
    fn test_parse_origin_list() {
        assert_eq!(
            parse_origin_list(" https://a.com/ ,, *.b.com,"),
            list(&["https://a.com", "*.b.com"])
        );
    }

    #[test]
    fn test_production_force_merges_defaults() {
        let defaults = list(&["https://example.com"]);
        let resolved =
            resolve_allowed_origins(&list(&["https://partner.io"]), Environment::Production, &defaults);
        assert_eq!(resolved, list(&["https://partner.io", "https://example.com"]));

        let resolved = resolve_allowed_origins(&[], Environment::Production, &defaults);
        assert_eq!(resolved, defaults);
    }

    #[test]
    fn test_development_defaults() {
        let resolved = resolve_allowed_origins(&[], Environment::Development, &list(&["https://example.com"]));
        assert!(resolved.contains(&"http://localhost:3000".to_string()));
        assert!(!resolved.contains(&"https://example.com".to_string()));
    }

    #[test]
    fn test_allowed_origin_is_echoed_with_vary() {
        let allow = list(&["*.example.com"]);
        let headers = get_cors_headers(&with_origin("https://app.example.com"), &allow, CorsOptions::default())
            .unwrap();
        assert_eq!(headers[ACCESS_CONTROL_ALLOW_ORIGIN], "https://app.example.com");
        assert_eq!(headers[VARY], "Origin");
        assert!(headers.get(ACCESS_CONTROL_ALLOW_CREDENTIALS).is_none());

        let options = CorsOptions {
            allow_credentials: true,
            ..CorsOptions::default()
        };
        let headers = get_cors_headers(&with_origin("https://app.example.com"), &allow, options).unwrap();
        assert_eq!(headers[ACCESS_CONTROL_ALLOW_CREDENTIALS], "true");
    }

    #[test]
    fn test_no_origin_gets_lists_without_allow_origin() {
        let headers = get_cors_headers(&HeaderMap::new(), &[], CorsOptions::default()).unwrap();
        assert!(headers.get(ACCESS_CONTROL_ALLOW_ORIGIN).is_none());
        assert!(headers.get(ACCESS_CONTROL_ALLOW_METHODS).is_some());
    }

    #[test]
    fn test_disallowed_origin_blocks() {
        let allow = list(&["https://example.com"]);
        assert!(get_cors_headers(&with_origin("https://evil.io"), &allow, CorsOptions::default()).is_none());
    }

    #[test]
    fn test_preflight_status() {
        let allow = list(&["https://example.com"]);

        let ok = handle_preflight(&Method::OPTIONS, &with_origin("https://example.com"), &allow, CorsOptions::default())
            .unwrap();
        assert_eq!(ok.status(), StatusCode::OK);
        assert_eq!(ok.headers()[ACCESS_CONTROL_ALLOW_ORIGIN], "https://example.com");
        assert_eq!(ok.headers()[VARY], "Origin");

        let denied = handle_preflight(&Method::OPTIONS, &with_origin("https://evil.io"), &allow, CorsOptions::default())
            .unwrap();
        assert_eq!(denied.status(), StatusCode::FORBIDDEN);
        assert!(denied.headers().get(ACCESS_CONTROL_ALLOW_ORIGIN).is_none());

        assert!(handle_preflight(&Method::GET, &with_origin("https://example.com"), &allow, CorsOptions::default()).is_none());
    }

    #[test]
    fn test_policy_reload() {
        let policy = CorsPolicy::from_config(&CorsConfig::default(), Environment::Development);
        assert!(policy.is_allowed("http://localhost:3000"));

        let config = CorsConfig {
            allowed_origins: list(&["https://new.example.org"]),
            ..CorsConfig::default()
        };
        policy.reload(&config, Environment::Development);
        assert!(policy.is_allowed("https://new.example.org"));
        assert!(!policy.is_allowed("http://localhost:3000"));
    }
}
