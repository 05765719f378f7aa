//! Configuration module for decoy-probe
//!
//! Types in [`types`], layered loading (defaults -> optional JSON file ->
//! `DECOY_*` environment) in [`loader`].

mod loader;
mod types;

pub use loader::{apply_env_overrides, load_config, load_config_str, load_config_with_env};
pub use types::{ClientConfig, Config, LogConfig, ProbeConfig, ServerConfig};
