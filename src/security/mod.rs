//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → limits.rs (reject oversized bodies)
//!     → cors.rs (answer preflight, validate Origin)
//!     → pipeline.rs
//!         → reputation/ (whitelist / blacklist)
//!         → ddos.rs (flood guard with escalating blocks)
//!         → rate_limit.rs (named fixed-window limiter)
//!         → scanner/ (URL, headers, body)
//!         → CSRF origin/host check
//!     → Pass to upstream, or deny with 400/403/429
//!     → on deny: violations.rs (bounded queue, single reputation writer)
//!
//! Every response:
//!     → headers.rs (CSP with nonce, hardening headers)
//!     → cors.rs (Access-Control-* for the allowed origin)
//! ```
//!
//! # Design Decisions
//! - Defense in depth: multiple layers of protection
//! - Cheapest, most certain checks run first
//! - Reputation reads fail open; detected threats fail closed
//! - No trust in client input

pub mod cors;
pub mod ddos;
pub mod headers;
pub mod limits;
pub mod pipeline;
pub mod rate_limit;
pub mod reputation;
pub mod scanner;
pub mod violations;

pub use cors::{CorsOptions, CorsPolicy};
pub use ddos::{DdosDecision, DdosGuard};
pub use headers::{CspNonce, SecurityHeaderPolicy};
pub use pipeline::{
    DenyReason, GatewayStatus, InboundRequest, SecurityCheckOptions, SecurityCheckResult,
    SecurityGateway,
};
pub use rate_limit::{RateLimitDecision, RateLimiter, RateLimiters};
pub use reputation::{Classification, IpRecord, ReputationStore, StoreError};
pub use scanner::{SecurityScanResult, SecurityThreat, Severity, ThreatScanner, ThreatType};
pub use violations::ViolationQueue;
