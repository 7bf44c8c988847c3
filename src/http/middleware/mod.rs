pub mod security;

pub use security::{security_middleware, SecurityState};
