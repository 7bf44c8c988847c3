//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Root configuration for the security gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ShieldConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// Upstream API the gateway protects.
    pub upstream: UpstreamConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Admin API settings.
    pub admin: AdminConfig,

    /// Security pipeline settings.
    pub security: SecurityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Load balancers whose `X-Forwarded-For` / `X-Real-IP` are believed,
    /// as addresses or CIDRs. Empty means clients connect directly.
    pub trusted_proxies: Vec<String>,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            trusted_proxies: Vec::new(),
        }
    }
}

/// Upstream application configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Upstream address (e.g., "127.0.0.1:3000").
    pub address: String,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:3000".to_string(),
        }
    }
}

/// Timeout configuration for various operations.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Request timeout (total time for request/response) in seconds.
    pub request_secs: u64,

    /// Upstream response timeout in seconds.
    pub upstream_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            request_secs: 30,
            upstream_secs: 25,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log output format.
    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable admin API.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,

    /// Admin API bind address.
    pub bind_address: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            // WARNING: This is a placeholder! Change this in production.
            api_key: "CHANGE_ME_IN_PRODUCTION".to_string(),
            bind_address: "127.0.0.1:8081".to_string(),
        }
    }
}

/// Deployment environment. Affects default origins, CSP strictness and
/// how much detail denial messages carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Production,
}

impl Environment {
    pub fn is_production(self) -> bool {
        self == Environment::Production
    }

    /// Parse the usual spellings found in `APP_ENV`-style variables.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "production" | "prod" => Some(Environment::Production),
            "development" | "dev" | "local" | "test" => Some(Environment::Development),
            _ => None,
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Environment::Development => f.write_str("development"),
            Environment::Production => f.write_str("production"),
        }
    }
}

/// Named rate limiter a request is counted against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RateLimitType {
    #[default]
    Api,
    Auth,
    Lead,
}

impl RateLimitType {
    pub fn as_str(self) -> &'static str {
        match self {
            RateLimitType::Api => "api",
            RateLimitType::Auth => "auth",
            RateLimitType::Lead => "lead",
        }
    }
}

impl fmt::Display for RateLimitType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Security pipeline configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Deployment environment.
    pub environment: Environment,

    /// Maximum request body size in bytes.
    pub max_body_size: usize,

    /// CORS allow-list settings.
    pub cors: CorsConfig,

    /// IP reputation store settings.
    pub reputation: ReputationConfig,

    /// Named rate limiter policies.
    pub rate_limits: RateLimitsConfig,

    /// DDoS escalation guard settings.
    pub ddos: DdosConfig,

    /// Outbound security header settings.
    pub headers: HeadersConfig,

    /// Path-based security profiles, highest priority first.
    pub profiles: Vec<ProfileConfig>,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            environment: Environment::Development,
            max_body_size: 2 * 1024 * 1024, // 2MB
            cors: CorsConfig::default(),
            reputation: ReputationConfig::default(),
            rate_limits: RateLimitsConfig::default(),
            ddos: DdosConfig::default(),
            headers: HeadersConfig::default(),
            profiles: default_profiles(),
        }
    }
}

/// CORS configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CorsConfig {
    /// Allowed origins. Entries may use `*.domain` wildcards.
    /// Overridden by `ALLOWED_ORIGINS`.
    pub allowed_origins: Vec<String>,

    /// Origins always merged into the allow-list in production.
    pub production_origins: Vec<String>,

    /// Preflight cache lifetime in seconds.
    pub max_age_secs: u64,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: Vec::new(),
            production_origins: vec![
                "https://example.com".to_string(),
                "https://www.example.com".to_string(),
            ],
            max_age_secs: 86_400,
        }
    }
}

/// Storage used by the reputation store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ReputationBackendKind {
    Memory,
    #[default]
    File,
}

/// IP reputation configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ReputationConfig {
    /// Backend storage kind.
    pub backend: ReputationBackendKind,

    /// Path of the JSON snapshot when `backend = "file"`.
    pub path: String,

    /// Violations after which an IP is auto-blacklisted.
    pub auto_blacklist_threshold: u32,

    /// Lifetime of an automatic blacklist entry in seconds.
    pub auto_blacklist_ttl_secs: u64,

    /// Deadline for a single backend call in milliseconds.
    pub operation_timeout_ms: u64,

    /// Violations waiting for the background writer before new ones are dropped.
    pub violation_queue_capacity: usize,
}

impl Default for ReputationConfig {
    fn default() -> Self {
        Self {
            backend: ReputationBackendKind::File,
            path: "ip_reputation.json".to_string(),
            auto_blacklist_threshold: 5,
            auto_blacklist_ttl_secs: 24 * 60 * 60,
            operation_timeout_ms: 500,
            violation_queue_capacity: 1024,
        }
    }
}

impl ReputationConfig {
    pub fn auto_blacklist_ttl(&self) -> Duration {
        Duration::from_secs(self.auto_blacklist_ttl_secs)
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }
}

/// A fixed-window policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct RateLimitPolicy {
    /// Window length in seconds.
    pub window_secs: u64,

    /// Requests admitted per window.
    pub max_requests: u32,
}

impl RateLimitPolicy {
    pub const fn new(window_secs: u64, max_requests: u32) -> Self {
        Self {
            window_secs,
            max_requests,
        }
    }

    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitsConfig {
    /// General API traffic.
    pub api: RateLimitPolicy,

    /// Authentication attempts.
    pub auth: RateLimitPolicy,

    /// Lead form submissions.
    pub lead: RateLimitPolicy,

    /// Interval between sweeps of expired entries in seconds.
    pub sweep_interval_secs: u64,
}

impl Default for RateLimitsConfig {
    fn default() -> Self {
        Self {
            api: RateLimitPolicy::new(15 * 60, 100),
            auth: RateLimitPolicy::new(15 * 60, 5),
            lead: RateLimitPolicy::new(60 * 60, 10),
            sweep_interval_secs: 5 * 60,
        }
    }
}

impl RateLimitsConfig {
    pub fn policy(&self, kind: RateLimitType) -> RateLimitPolicy {
        match kind {
            RateLimitType::Api => self.api,
            RateLimitType::Auth => self.auth,
            RateLimitType::Lead => self.lead,
        }
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

/// DDoS escalation guard configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DdosConfig {
    /// Flood limiter policy.
    pub limit: RateLimitPolicy,

    /// Block added per accumulated violation, in seconds.
    pub block_step_secs: u64,

    /// Upper bound for a single block, in seconds.
    pub max_block_secs: u64,

    /// Quiet time after a block ends before the identifier is forgotten.
    pub forgiveness_secs: u64,
}

impl Default for DdosConfig {
    fn default() -> Self {
        Self {
            limit: RateLimitPolicy::new(60, 60),
            block_step_secs: 5 * 60,
            max_block_secs: 60 * 60,
            forgiveness_secs: 10 * 60,
        }
    }
}

/// Outbound security header configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HeadersConfig {
    /// Apply security headers to every response.
    pub enabled: bool,

    /// HSTS max-age in seconds.
    pub hsts_max_age_secs: u64,

    /// Extra `connect-src` sources for the CSP.
    pub connect_src: Vec<String>,
}

impl Default for HeadersConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            hsts_max_age_secs: 31_536_000,
            connect_src: Vec::new(),
        }
    }
}

/// Security profile selected by request path (and optionally host).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProfileConfig {
    /// Profile identifier for logging/metrics.
    pub name: String,

    /// Host header to match (exact match).
    #[serde(default)]
    pub host: Option<String>,

    /// Path prefix to match.
    pub path_prefix: String,

    /// Rate limiter the profile counts against.
    #[serde(default)]
    pub rate_limit: RateLimitType,

    /// Scan JSON bodies of non-GET requests.
    #[serde(default)]
    pub scan_body: bool,

    /// Body fields whose values are excluded from scanning.
    #[serde(default)]
    pub safe_fields: Vec<String>,

    /// Emit `Access-Control-Allow-Credentials: true`.
    #[serde(default)]
    pub allow_credentials: bool,

    /// Profile priority (higher = checked first).
    #[serde(default)]
    pub priority: u32,
}

/// Free-text fields on lead forms that routinely carry quotes, semicolons
/// and ampersands.
pub const LEAD_SAFE_FIELDS: &[&str] = &[
    "name",
    "first_name",
    "last_name",
    "email",
    "company",
    "phone",
    "job_title",
    "jobTitle",
    "notes",
    "message",
    "website",
    "url",
];

fn default_profiles() -> Vec<ProfileConfig> {
    vec![
        ProfileConfig {
            name: "auth".to_string(),
            host: None,
            path_prefix: "/api/auth".to_string(),
            rate_limit: RateLimitType::Auth,
            scan_body: true,
            safe_fields: Vec::new(),
            allow_credentials: true,
            priority: 20,
        },
        ProfileConfig {
            name: "leads".to_string(),
            host: None,
            path_prefix: "/api/leads".to_string(),
            rate_limit: RateLimitType::Lead,
            scan_body: true,
            safe_fields: LEAD_SAFE_FIELDS.iter().map(|f| f.to_string()).collect(),
            allow_credentials: false,
            priority: 20,
        },
        ProfileConfig {
            name: "api".to_string(),
            host: None,
            path_prefix: "/".to_string(),
            rate_limit: RateLimitType::Api,
            scan_body: true,
            safe_fields: Vec::new(),
            allow_credentials: false,
            priority: 0,
        },
    ]
}
