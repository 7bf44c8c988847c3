//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (windows > 0, limits > 0, addresses parse)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ShieldConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::fmt;
use std::net::SocketAddr;

use crate::config::schema::{RateLimitPolicy, ShieldConfig};
use crate::http::request::TrustedProxies;

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validate a configuration, collecting every problem found.
pub fn validate_config(config: &ShieldConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    check_addr(&mut errors, "listener.bind_address", &config.listener.bind_address);
    check_addr(&mut errors, "upstream.address", &config.upstream.address);
    if let Err(e) = TrustedProxies::parse(&config.listener.trusted_proxies) {
        errors.push(ValidationError::new("listener.trusted_proxies", e));
    }
    if config.admin.enabled {
        check_addr(&mut errors, "admin.bind_address", &config.admin.bind_address);
        if config.admin.api_key.trim().is_empty() {
            errors.push(ValidationError::new("admin.api_key", "must not be empty"));
        }
    }
    if config.observability.metrics_enabled {
        check_addr(
            &mut errors,
            "observability.metrics_address",
            &config.observability.metrics_address,
        );
    }

    let security = &config.security;
    if security.max_body_size == 0 {
        errors.push(ValidationError::new("security.max_body_size", "must be > 0"));
    }

    check_policy(&mut errors, "security.rate_limits.api", &security.rate_limits.api);
    check_policy(&mut errors, "security.rate_limits.auth", &security.rate_limits.auth);
    check_policy(&mut errors, "security.rate_limits.lead", &security.rate_limits.lead);
    check_policy(&mut errors, "security.ddos.limit", &security.ddos.limit);
    if security.rate_limits.sweep_interval_secs == 0 {
        errors.push(ValidationError::new(
            "security.rate_limits.sweep_interval_secs",
            "must be > 0",
        ));
    }

    if security.ddos.block_step_secs == 0 {
        errors.push(ValidationError::new("security.ddos.block_step_secs", "must be > 0"));
    }
    if security.ddos.max_block_secs < security.ddos.block_step_secs {
        errors.push(ValidationError::new(
            "security.ddos.max_block_secs",
            "must be >= block_step_secs",
        ));
    }

    if security.reputation.auto_blacklist_threshold == 0 {
        errors.push(ValidationError::new(
            "security.reputation.auto_blacklist_threshold",
            "must be > 0",
        ));
    }
    if security.reputation.operation_timeout_ms == 0 {
        errors.push(ValidationError::new(
            "security.reputation.operation_timeout_ms",
            "must be > 0",
        ));
    }

    if security.reputation.violation_queue_capacity == 0 {
        errors.push(ValidationError::new(
            "security.reputation.violation_queue_capacity",
            "must be > 0",
        ));
    }

    for (i, origin) in security.cors.allowed_origins.iter().enumerate() {
        if origin.trim().is_empty() || origin == "*" {
            errors.push(ValidationError::new(
                format!("security.cors.allowed_origins[{}]", i),
                "must be an explicit origin or a *.domain wildcard",
            ));
        }
    }

    for (i, profile) in security.profiles.iter().enumerate() {
        if !profile.path_prefix.starts_with('/') {
            errors.push(ValidationError::new(
                format!("security.profiles[{}].path_prefix", i),
                "must start with '/'",
            ));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_addr(errors: &mut Vec<ValidationError>, field: &str, value: &str) {
    if value.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(field, format!("'{}' is not a socket address", value)));
    }
}

fn check_policy(errors: &mut Vec<ValidationError>, field: &str, policy: &RateLimitPolicy) {
    if policy.window_secs == 0 {
        errors.push(ValidationError::new(format!("{}.window_secs", field), "must be > 0"));
    }
    if policy.max_requests == 0 {
        errors.push(ValidationError::new(format!("{}.max_requests", field), "must be > 0"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate_config(&ShieldConfig::default()).is_ok());
    }

    #[test]
    fn test_collects_all_errors() {
        let mut config = ShieldConfig::default();
        config.listener.bind_address = "not-an-address".into();
        config.security.rate_limits.auth.max_requests = 0;
        config.security.cors.allowed_origins = vec!["*".into()];

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 3);
        assert!(errors.iter().any(|e| e.field == "listener.bind_address"));
        assert!(errors.iter().any(|e| e.field == "security.rate_limits.auth.max_requests"));
    }

    #[test]
    fn test_trusted_proxies_must_parse() {
        let mut config = ShieldConfig::default();
        config.listener.trusted_proxies = vec!["10.0.0.0/8".into(), "192.0.2.1".into()];
        assert!(validate_config(&config).is_ok());

        config.listener.trusted_proxies.push("lb.internal".into());
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "listener.trusted_proxies");
    }
}
