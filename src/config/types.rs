//! Configuration types for decoy-probe
//!
//! One structure covers both roles: the server section is ignored in client
//! mode and vice versa. Probe payloads and the operation timeout are shared,
//! since both ends must agree on the request/response bytes.

use std::net::SocketAddr;
use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Server-mode settings
    #[serde(default)]
    pub server: ServerConfig,

    /// Client-mode settings
    #[serde(default)]
    pub client: ClientConfig,

    /// Probe payloads and timing, shared by both modes
    #[serde(default)]
    pub probe: ProbeConfig,

    /// Logging configuration
    #[serde(default)]
    pub log: LogConfig,
}

impl Config {
    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if validation fails.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.probe.validate()?;
        self.client.validate()?;
        Ok(())
    }
}

/// Server-mode settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Address the transparent listener binds to
    #[serde(default = "default_bind_address")]
    pub bind_address: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
        }
    }
}

/// Client-mode settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClientConfig {
    /// Server to probe; set from the command line in client mode
    #[serde(default)]
    pub remote_address: Option<SocketAddr>,

    /// Fixed local port the probe is sent from (the port the spoofed reply
    /// will be addressed to)
    #[serde(default)]
    pub local_port: u16,

    /// Number of exchanges to attempt
    #[serde(default = "default_attempts")]
    pub attempts: u32,

    /// Minimum successful exchanges for the probe run to count as a pass
    #[serde(default = "default_min_responses")]
    pub min_responses: u32,

    /// Stop probing as soon as `min_responses` is reached
    #[serde(default = "default_true")]
    pub break_early: bool,
}

impl ClientConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.attempts == 0 {
            return Err(ConfigError::ValidationError(
                "attempts must be at least 1".into(),
            ));
        }
        if self.min_responses > self.attempts {
            return Err(ConfigError::ValidationError(format!(
                "min_responses ({}) cannot exceed attempts ({})",
                self.min_responses, self.attempts
            )));
        }
        Ok(())
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            remote_address: None,
            local_port: 0,
            attempts: default_attempts(),
            min_responses: default_min_responses(),
            break_early: true,
        }
    }
}

/// Probe payloads and timing
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProbeConfig {
    /// Request payload the client sends and the server matches
    #[serde(default = "default_request")]
    pub request: String,

    /// Response payload the server spoofs and the client expects
    #[serde(default = "default_response")]
    pub response: String,

    /// Per-exchange timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl ProbeConfig {
    /// Request payload as bytes.
    pub fn request_bytes(&self) -> Bytes {
        Bytes::from(self.request.clone().into_bytes())
    }

    /// Response payload as bytes.
    pub fn response_bytes(&self) -> Bytes {
        Bytes::from(self.response.clone().into_bytes())
    }

    /// Per-exchange timeout as a `Duration`.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.request.is_empty() {
            return Err(ConfigError::ValidationError(
                "probe request must not be empty".into(),
            ));
        }
        if self.response.is_empty() {
            return Err(ConfigError::ValidationError(
                "probe response must not be empty".into(),
            ));
        }
        if self.timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "timeout_secs must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            request: default_request(),
            response: default_response(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LogConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: "text" or "json"
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_bind_address() -> SocketAddr {
    "127.0.0.1:1820".parse().expect("valid default bind address")
}

fn default_attempts() -> u32 {
    10
}

fn default_min_responses() -> u32 {
    5
}

fn default_request() -> String {
    "PING".into()
}

fn default_response() -> String {
    "PONG".into()
}

fn default_timeout_secs() -> u64 {
    5
}

fn default_log_level() -> String {
    "info".into()
}

fn default_log_format() -> String {
    "text".into()
}

fn default_true() -> bool {
    true
}
