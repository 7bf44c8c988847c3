//! Security profile routing.
//!
//! # Data Flow
//! ```text
//! Incoming Request (host, path)
//!     → router.rs (profile lookup)
//!     → matcher.rs (evaluate match conditions)
//!     → Return: matched Profile or the default API profile
//!
//! Profile Compilation (at startup):
//!     ProfileConfig[]
//!     → Sort by priority, then prefix length
//!     → Compile matchers
//!     → Freeze as immutable ProfileRouter
//! ```
//!
//! # Design Decisions
//! - Profiles compiled at startup, immutable at runtime
//! - No regex in hot path (prefix matching only)
//! - Deterministic: same input always matches same profile
//! - First match wins (ordered by priority)

pub mod matcher;
pub mod router;

pub use router::{Profile, ProfileRouter};
