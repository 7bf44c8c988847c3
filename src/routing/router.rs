//! Profile lookup.
//!
//! # Responsibilities
//! - Store compiled profiles
//! - Resolve the security profile for a request
//!
//! # Design Decisions
//! - Immutable after construction (thread-safe without locks)
//! - O(n) scan in priority order (acceptable for typical profile counts)
//! - Ties broken by longer path prefix
//! - Unmatched requests fall back to the general API profile

use axum::body::Body;
use axum::http::Request;

use crate::config::ProfileConfig;
use crate::routing::matcher::{AndMatcher, HostMatcher, Matcher, PathPrefixMatcher};
use crate::security::SecurityCheckOptions;

/// A compiled profile: match conditions plus the pipeline options they select.
#[derive(Debug)]
pub struct Profile {
    pub name: String,
    pub options: SecurityCheckOptions,
    priority: u32,
    prefix_len: usize,
    matcher: AndMatcher,
}

impl Profile {
    fn compile(config: &ProfileConfig) -> Self {
        let path = PathPrefixMatcher::new(config.path_prefix.clone());
        let prefix_len = path.len();

        let mut matchers: Vec<Box<dyn Matcher>> = vec![Box::new(path)];
        if let Some(host) = &config.host {
            matchers.push(Box::new(HostMatcher::new(host.clone())));
        }

        Self {
            name: config.name.clone(),
            options: SecurityCheckOptions::from_profile(config),
            priority: config.priority,
            prefix_len,
            matcher: AndMatcher::new(matchers),
        }
    }
}

#[derive(Debug)]
pub struct ProfileRouter {
    profiles: Vec<Profile>,
    fallback: Profile,
}

impl ProfileRouter {
    pub fn from_config(configs: &[ProfileConfig]) -> Self {
        let mut profiles: Vec<Profile> = configs.iter().map(Profile::compile).collect();
        profiles.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(b.prefix_len.cmp(&a.prefix_len))
        });

        tracing::debug!(
            profiles = ?profiles.iter().map(|p| p.name.as_str()).collect::<Vec<_>>(),
            "Security profiles compiled"
        );

        Self {
            profiles,
            fallback: Profile {
                name: "default".to_string(),
                options: SecurityCheckOptions::api(),
                priority: 0,
                prefix_len: 0,
                matcher: AndMatcher::new(Vec::new()),
            },
        }
    }

    /// First matching profile, or the default API profile.
    pub fn resolve(&self, req: &Request<Body>) -> &Profile {
        self.profiles
            .iter()
            .find(|p| p.matcher.matches(req))
            .unwrap_or(&self.fallback)
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RateLimitType, SecurityConfig};

    fn request(uri: &str) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .header("host", "api.example.com")
            .body(Body::empty())
            .unwrap()
    }

    #[test]
    fn test_default_profiles() {
        let router = ProfileRouter::from_config(&SecurityConfig::default().profiles);

        let auth = router.resolve(&request("/api/auth/login"));
        assert_eq!(auth.name, "auth");
        assert_eq!(auth.options.rate_limit_type, RateLimitType::Auth);
        assert!(auth.options.allow_credentials);

        let leads = router.resolve(&request("/api/leads"));
        assert_eq!(leads.options.rate_limit_type, RateLimitType::Lead);
        assert!(leads.options.safe_fields.contains(&"email".to_string()));

        let other = router.resolve(&request("/api/articles/1"));
        assert_eq!(other.name, "api");
        assert!(other.options.scan_body);
    }

    #[test]
    fn test_priority_and_prefix_length_order() {
        let profiles = vec![
            ProfileConfig {
                name: "broad".into(),
                host: None,
                path_prefix: "/api".into(),
                rate_limit: RateLimitType::Api,
                scan_body: false,
                safe_fields: vec![],
                allow_credentials: false,
                priority: 5,
            },
            ProfileConfig {
                name: "narrow".into(),
                host: None,
                path_prefix: "/api/auth".into(),
                rate_limit: RateLimitType::Auth,
                scan_body: true,
                safe_fields: vec![],
                allow_credentials: false,
                priority: 5,
            },
            ProfileConfig {
                name: "other-host".into(),
                host: Some("admin.example.com".into()),
                path_prefix: "/".into(),
                rate_limit: RateLimitType::Auth,
                scan_body: true,
                safe_fields: vec![],
                allow_credentials: false,
                priority: 100,
            },
        ];
        let router = ProfileRouter::from_config(&profiles);

        assert_eq!(router.resolve(&request("/api/auth/x")).name, "narrow");
        assert_eq!(router.resolve(&request("/api/x")).name, "broad");
        assert_eq!(router.resolve(&request("/static/app.js")).name, "default");
    }
}
