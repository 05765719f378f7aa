//! Configuration loading
//!
//! Settings come from three layers, later ones winning: built-in defaults,
//! an optional JSON file, and `DECOY_*` environment variables. Command-line
//! flags are applied on top by the binary.

use std::path::Path;

use tracing::debug;

use super::types::Config;
use crate::error::ConfigError;

/// Load configuration from a JSON file
///
/// # Errors
///
/// Returns `ConfigError` if the file cannot be read or parsed, or if the
/// result fails validation.
pub fn load_config(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let path = path.as_ref();

    debug!("loading configuration from {:?}", path);

    if !path.exists() {
        return Err(ConfigError::FileNotFound {
            path: path.display().to_string(),
        });
    }

    let contents = std::fs::read_to_string(path)?;
    let config = load_config_str(&contents)?;

    Ok(config)
}

/// Load configuration from a JSON string
///
/// # Errors
///
/// Returns `ConfigError` if parsing or validation fails.
pub fn load_config_str(json: &str) -> Result<Config, ConfigError> {
    let config: Config =
        serde_json::from_str(json).map_err(|e| ConfigError::ParseError(e.to_string()))?;

    config.validate()?;

    Ok(config)
}

/// Apply `DECOY_*` environment variable overrides.
///
/// Recognized variables: `DECOY_BIND_ADDR`, `DECOY_REQUEST`,
/// `DECOY_RESPONSE`, `DECOY_TIMEOUT_SECS`, `DECOY_LOG_LEVEL`.
///
/// # Errors
///
/// Returns `ConfigError::EnvError` for a malformed value, or a validation
/// error if the overridden configuration is inconsistent.
pub fn apply_env_overrides(config: &mut Config) -> Result<(), ConfigError> {
    if let Ok(addr) = std::env::var("DECOY_BIND_ADDR") {
        config.server.bind_address = addr.parse().map_err(|_| ConfigError::EnvError {
            name: "DECOY_BIND_ADDR".into(),
            reason: format!("invalid socket address: {addr}"),
        })?;
        debug!("bind address overridden to {}", config.server.bind_address);
    }

    if let Ok(request) = std::env::var("DECOY_REQUEST") {
        config.probe.request = request;
    }

    if let Ok(response) = std::env::var("DECOY_RESPONSE") {
        config.probe.response = response;
    }

    if let Ok(timeout) = std::env::var("DECOY_TIMEOUT_SECS") {
        config.probe.timeout_secs = timeout.parse().map_err(|_| ConfigError::EnvError {
            name: "DECOY_TIMEOUT_SECS".into(),
            reason: format!("invalid number: {timeout}"),
        })?;
    }

    if let Ok(level) = std::env::var("DECOY_LOG_LEVEL") {
        config.log.level = level;
    }

    config.validate()?;

    Ok(())
}

/// Load configuration from an optional file, then the environment.
///
/// With no file, the built-in defaults are the base layer.
///
/// # Errors
///
/// Returns `ConfigError` from any layer.
pub fn load_config_with_env(path: Option<&Path>) -> Result<Config, ConfigError> {
    let mut config = match path {
        Some(path) => load_config(path)?,
        None => Config::default(),
    };

    apply_env_overrides(&mut config)?;

    Ok(config)
}
