//! Outbound security headers.
//!
//! # Responsibilities
//! - Build a Content-Security-Policy without `unsafe-inline`/`unsafe-eval`
//! - Generate a per-request CSP nonce for inline scripts
//! - Add nosniff, frame, referrer, permissions and HSTS headers
//! - Strip server-identifying headers from upstream responses
//!
//! # Design Decisions
//! - Applied to every response, allowed or denied
//! - Development relaxes `connect-src` for local dev servers and hot reload
//! - Production adds `upgrade-insecure-requests`

use axum::http::header::{
    CONTENT_SECURITY_POLICY, REFERRER_POLICY, SERVER, STRICT_TRANSPORT_SECURITY,
    X_CONTENT_TYPE_OPTIONS, X_FRAME_OPTIONS,
};
use axum::http::{HeaderMap, HeaderName, HeaderValue};
use base64::{engine::general_purpose::STANDARD, Engine};
use rand::{thread_rng, RngCore};
use std::sync::Arc;

use crate::config::{Environment, HeadersConfig};

/// Header carrying the nonce to the upstream application so it can tag
/// its inline scripts.
pub const X_CSP_NONCE: &str = "x-csp-nonce";

const NONCE_BYTES_LEN: usize = 16;

const PERMISSIONS_POLICY: &str =
    "camera=(), microphone=(), geolocation=(), payment=(), usb=(), interest-cohort=()";

const DEV_CONNECT_SRC: &[&str] = &["ws://localhost:*", "http://localhost:*", "ws://127.0.0.1:*"];

const IDENTIFYING_HEADERS: &[&str] = &["x-powered-by", "x-aspnet-version", "x-aspnetmvc-version"];

/// 128 random bits, base64 encoded.
pub fn generate_nonce() -> String {
    let mut bytes = [0u8; NONCE_BYTES_LEN];
    thread_rng().fill_bytes(&mut bytes);
    STANDARD.encode(bytes)
}

/// Request extension holding the nonce for the current request.
#[derive(Debug, Clone)]
pub struct CspNonce(pub Arc<String>);

impl CspNonce {
    pub fn new() -> Self {
        Self(Arc::new(generate_nonce()))
    }

    pub fn value(&self) -> &str {
        &self.0
    }
}

impl Default for CspNonce {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone)]
pub struct SecurityHeaderPolicy {
    enabled: bool,
    environment: Environment,
    hsts_max_age_secs: u64,
    connect_src: Vec<String>,
}

impl SecurityHeaderPolicy {
    pub fn new(config: &HeadersConfig, environment: Environment) -> Self {
        Self {
            enabled: config.enabled,
            environment,
            hsts_max_age_secs: config.hsts_max_age_secs,
            connect_src: config.connect_src.clone(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn content_security_policy(&self, nonce: Option<&str>) -> String {
        let nonce_source = nonce.map(|n| format!(" 'nonce-{}'", n)).unwrap_or_default();

        let mut connect_src = vec!["'self'".to_string()];
        connect_src.extend(self.connect_src.iter().cloned());
        if !self.environment.is_production() {
            connect_src.extend(DEV_CONNECT_SRC.iter().map(|s| s.to_string()));
        }

        let mut directives = vec![
            "default-src 'self'".to_string(),
            format!("script-src 'self'{}", nonce_source),
            format!("style-src 'self'{}", nonce_source),
            "img-src 'self' data: https:".to_string(),
            "font-src 'self' data:".to_string(),
            format!("connect-src {}", connect_src.join(" ")),
            "object-src 'none'".to_string(),
            "base-uri 'self'".to_string(),
            "form-action 'self'".to_string(),
            "frame-ancestors 'none'".to_string(),
        ];
        if self.environment.is_production() {
            directives.push("upgrade-insecure-requests".to_string());
        }

        directives.join("; ")
    }

    /// Harden `headers` in place.
    pub fn apply(&self, headers: &mut HeaderMap, nonce: Option<&str>) {
        if !self.enabled {
            return;
        }

        match HeaderValue::from_str(&self.content_security_policy(nonce)) {
            Ok(csp) => {
                headers.insert(CONTENT_SECURITY_POLICY, csp);
            }
            Err(e) => tracing::error!(error = %e, "Generated CSP is not a valid header value"),
        }
        headers.insert(X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff"));
        headers.insert(X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
        headers.insert(
            REFERRER_POLICY,
            HeaderValue::from_static("strict-origin-when-cross-origin"),
        );
        headers.insert(
            HeaderName::from_static("permissions-policy"),
            HeaderValue::from_static(PERMISSIONS_POLICY),
        );
        if let Ok(hsts) = HeaderValue::from_str(&format!(
            "max-age={}; includeSubDomains",
            self.hsts_max_age_secs
        )) {
            headers.insert(STRICT_TRANSPORT_SECURITY, hsts);
        }

        headers.remove(SERVER);
        for name in IDENTIFYING_HEADERS {
            headers.remove(*name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(environment: Environment) -> SecurityHeaderPolicy {
        SecurityHeaderPolicy::new(&HeadersConfig::default(), environment)
    }

    #[test]
    fn test_nonce_generation() {
        let a = generate_nonce();
        let b = generate_nonce();
        assert_ne!(a, b);
        assert_eq!(STANDARD.decode(&a).unwrap().len(), NONCE_BYTES_LEN);
    }

    #[test]
    fn test_csp_is_strict() {
        let csp = policy(Environment::Production).content_security_policy(Some("abc123"));
        assert!(!csp.contains("unsafe-inline"));
        assert!(!csp.contains("unsafe-eval"));
        assert!(csp.contains("script-src 'self' 'nonce-abc123'"));
        assert!(csp.contains("upgrade-insecure-requests"));
        assert!(!csp.contains("ws://localhost"));
    }

    #[test]
    fn test_development_csp_allows_local_connections() {
        let csp = policy(Environment::Development).content_security_policy(None);
        assert!(csp.contains("ws://localhost:*"));
        assert!(!csp.contains("upgrade-insecure-requests"));
        assert!(csp.contains("script-src 'self';"));
    }

    #[test]
    fn test_apply_sets_and_strips_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(SERVER, HeaderValue::from_static("nginx/1.25"));
        headers.insert("x-powered-by", HeaderValue::from_static("Express"));

        policy(Environment::Production).apply(&mut headers, None);

        assert_eq!(headers[X_CONTENT_TYPE_OPTIONS], "nosniff");
        assert_eq!(headers[X_FRAME_OPTIONS], "DENY");
        assert_eq!(headers[REFERRER_POLICY], "strict-origin-when-cross-origin");
        assert!(headers.contains_key("permissions-policy"));
        assert_eq!(headers[STRICT_TRANSPORT_SECURITY], "max-age=31536000; includeSubDomains");
        assert!(headers.get(SERVER).is_none());
        assert!(headers.get("x-powered-by").is_none());
    }

    #[test]
    fn test_disabled_policy_is_a_no_op() {
        let config = HeadersConfig {
            enabled: false,
            ..HeadersConfig::default()
        };
        let mut headers = HeaderMap::new();
        SecurityHeaderPolicy::new(&config, Environment::Production).apply(&mut headers, None);
        assert!(headers.is_empty());
    }
}
