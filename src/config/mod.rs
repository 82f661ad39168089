//! Configuration management
//!
//! Handles pppcp.toml (user-defined) and pppcp.lock (generated with all defaults).

mod types;
mod validation;

pub use types::*;
pub use validation::{validate, validate_pair, ValidationResult};

use crate::{Error, Result};
use std::path::Path;

/// Load configuration from a TOML file
pub fn load<P: AsRef<Path>>(path: P) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(Error::Io)?;
    parse(&content)
}

/// Parse configuration from TOML text
pub fn parse(content: &str) -> Result<Config> {
    toml::from_str(content).map_err(|e| Error::Config(e.to_string()))
}

/// Generate a lock file from config, filling in all defaults
pub fn generate_lock(config: &Config) -> ConfigLock {
    ConfigLock::from_config(config)
}

/// Render a lock file as TOML
pub fn render_lock(lock: &ConfigLock) -> Result<String> {
    toml::to_string_pretty(lock).map_err(|e| Error::Config(e.to_string()))
}
