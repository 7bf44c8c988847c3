//! Adaptive request-security gateway library.

pub mod admin;
pub mod config;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod routing;
pub mod security;

pub use config::ShieldConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
pub use security::SecurityGateway;
