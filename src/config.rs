use crate::error::{LmsError, Result};
use serde::Deserialize;
use std::fs;

#[derive(Debug, Deserialize)]
pub struct Config {
    pub feed: FeedConfig,
    pub poller: PollerConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize)]
pub struct FeedConfig {
    /// "http" for the hosted provider, "local" for a fixtures file on disk
    pub mode: String,
    pub base_url: String,
    pub timeout_seconds: u64,
    /// Used when mode = "local"
    pub fixtures_path: String,
}

#[derive(Debug, Deserialize)]
pub struct PollerConfig {
    pub interval_seconds: u64,
}

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    pub port: u16,
}

impl Config {
    pub fn load() -> Result<Self> {
        let config_path = "config.toml";
        let config_content = fs::read_to_string(config_path).map_err(|e| {
            LmsError::Config(format!("Failed to read config file '{}': {}", config_path, e))
        })?;

        let config: Config = toml::from_str(&config_content)?;
        Ok(config)
    }
}
