use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

use tailscope_client::ClientConfig;
use tailscope_logs::{FilterConfig, SessionConfig};

/// Everything read from the optional TOML config file
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub client: ClientConfig,
    pub session: SessionConfig,
    pub filter: FilterConfig,
}

impl AppConfig {
    /// Load from `path`, or defaults when no file was given
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("Invalid config file {}", path.display()))
    }

    pub fn parse(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }
}
