//! Configuration Manager

use super::{Config, RelayConfig};
use crate::Result;
use anyhow::{bail, Context};
use std::path::Path;

/// Manages configuration loading and validation
pub struct ConfigManager;

impl ConfigManager {
    /// Load configuration from a TOML file
    pub fn load_from_file(path: &Path) -> Result<Config> {
        if path.exists() {
            tracing::info!("Loading configuration from: {}", path.display());
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;

            let config: Config = toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

            config
                .validate()
                .with_context(|| "Configuration validation failed")?;

            tracing::info!("Configuration loaded and validated successfully");
            Ok(config)
        } else {
            tracing::warn!(
                "Configuration file not found at {}, using defaults",
                path.display()
            );
            let config = Config::default();
            config.validate()?;
            Ok(config)
        }
    }

    /// Load configuration from environment variables
    pub fn load_from_env() -> Result<Config> {
        let mut config = Config::default();

        if let Ok(log_level) = std::env::var("RELAYCAST_LOG_LEVEL") {
            config.general.log_level = log_level;
        }

        if let Ok(buffer_size) = std::env::var("RELAYCAST_BUFFER_SIZE") {
            config.general.buffer_size = buffer_size
                .parse::<usize>()
                .with_context(|| format!("Invalid RELAYCAST_BUFFER_SIZE: {}", buffer_size))?;
        }

        if let Ok(timeout) = std::env::var("RELAYCAST_SHUTDOWN_TIMEOUT") {
            config.general.shutdown_timeout = humantime::parse_duration(&timeout)
                .with_context(|| format!("Invalid RELAYCAST_SHUTDOWN_TIMEOUT: {}", timeout))?;
        }

        config.validate()?;
        Ok(config)
    }
}

impl Config {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.validate_general()
            .with_context(|| "General configuration validation failed")?;

        for relay in &self.relays {
            relay.validate().with_context(|| {
                format!("Relay '{}' configuration validation failed", relay.name)
            })?;
        }

        Ok(())
    }

    fn validate_general(&self) -> Result<()> {
        if self.general.buffer_size < 1024 {
            bail!("buffer_size must be at least 1024 bytes");
        }

        if self.general.buffer_size > 1048576 {
            bail!("buffer_size cannot exceed 1MB");
        }

        if self.general.shutdown_timeout.as_secs() == 0 {
            bail!("shutdown_timeout must be greater than 0");
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.general.log_level.as_str()) {
            bail!("log_level must be one of: {}", valid_log_levels.join(", "));
        }

        Ok(())
    }

    /// Merge with CLI arguments
    pub fn merge_with_cli_args(&mut self, buffer_size: Option<usize>, shutdown_timeout: Option<u64>) {
        if let Some(buffer_size) = buffer_size {
            self.general.buffer_size = buffer_size;
            tracing::info!("CLI override: buffer size set to {} bytes", buffer_size);
        }

        if let Some(timeout_secs) = shutdown_timeout {
            self.general.shutdown_timeout = std::time::Duration::from_secs(timeout_secs);
            tracing::info!("CLI override: shutdown timeout set to {}s", timeout_secs);
        }
    }
}

impl RelayConfig {
    /// Validate one relay entry
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            bail!("relay name must not be empty");
        }

        if self.retry_interval.as_millis() == 0 {
            bail!("retry_interval must be greater than 0");
        }

        if self.retry_interval > std::time::Duration::from_secs(3600) {
            bail!("retry_interval cannot exceed 1 hour");
        }

        if self.mode.upstream_is_listen()
            && self.mode.downstream_is_listen()
            && self.upstream == self.downstream
        {
            bail!("upstream and downstream cannot listen on the same endpoint");
        }

        Ok(())
    }
}
