//! Configuration loading from disk and the process environment.

use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::config::schema::{Environment, ShieldConfig};
use crate::config::validation::{validate_config, ValidationError};
use crate::security::cors::parse_origin_list;

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load and validate configuration from a TOML file.
///
/// Environment overrides are applied before validation.
pub fn load_config(path: &Path) -> Result<ShieldConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    let mut config: ShieldConfig = toml::from_str(&content)?;

    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

/// Build a configuration from defaults plus environment overrides.
pub fn load_from_env() -> Result<ShieldConfig, ConfigError> {
    let mut config = ShieldConfig::default();
    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// Apply `ALLOWED_ORIGINS` and `SHIELD_ENV` / `APP_ENV` on top of `config`.
///
/// `lookup` abstracts the environment so tests do not mutate process state.
pub fn apply_env_overrides<F>(config: &mut ShieldConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(raw) = lookup("ALLOWED_ORIGINS") {
        let origins = parse_origin_list(&raw);
        if !origins.is_empty() {
            config.security.cors.allowed_origins = origins;
        }
    }

    let env_value = lookup("SHIELD_ENV").or_else(|| lookup("APP_ENV"));
    if let Some(raw) = env_value {
        match Environment::parse(&raw) {
            Some(environment) => config.security.environment = environment,
            None => tracing::warn!(value = %raw, "Ignoring unknown environment name"),
        }
    }
}
