//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, request ID, tracing, timeout)
//!     → middleware/security.rs (profile, body limit, pipeline, CORS)
//!     → server.rs proxy handler (forward to upstream)
//!     → response.rs (hop-by-hop stripping, denial rendering)
//!     → middleware/security.rs (rate-limit, CORS and security headers)
//!     → Send to client
//! ```

pub mod middleware;
pub mod request;
pub mod response;
pub mod server;

pub use request::{client_identifier, TrustedProxies, X_REQUEST_ID};
pub use server::HttpServer;
