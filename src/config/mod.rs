//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML) + environment (ALLOWED_ORIGINS, SHIELD_ENV/APP_ENV)
//!     → loader.rs (parse, deserialize, apply env overrides)
//!     → validation.rs (semantic checks)
//!     → ShieldConfig (validated, immutable)
//!     → shared with the gateway and HTTP layers
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → CORS allow-list and header policy swapped atomically
//! ```
//!
//! # Design Decisions
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks
//! - Limiter and reputation settings are fixed at startup; only
//!   origin and header policy are hot-reloadable

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{apply_env_overrides, load_config, load_from_env, ConfigError};
pub use schema::{
    AdminConfig, CorsConfig, DdosConfig, Environment, HeadersConfig, ListenerConfig, LogFormat,
    ObservabilityConfig, ProfileConfig, RateLimitPolicy, RateLimitType, RateLimitsConfig,
    ReputationBackendKind, ReputationConfig, SecurityConfig, ShieldConfig, TimeoutConfig,
    UpstreamConfig, LEAD_SAFE_FIELDS,
};
