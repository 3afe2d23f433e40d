//! Configuration management for the Sheikh chat engine
//!
//! This module handles loading, parsing, validating, and managing
//! configuration from files, environment variables, and CLI overrides.

use crate::error::{Result, SheikhError};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Failure text written into an assistant message whose stream broke
pub const DEFAULT_FAILURE_MESSAGE: &str =
    "Sorry, something went wrong while generating a response. Please try again.";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Backend connection settings
    #[serde(default)]
    pub server: ServerConfig,
    /// Streaming reply settings
    #[serde(default)]
    pub streaming: StreamingConfig,
}

/// Backend connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Base URL of the backend; `/api/v1/...` paths are joined onto it
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Timeout for each REST round trip (seconds)
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,

    /// User-Agent header sent with every request
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_base_url() -> String {
    "http://127.0.0.1:8000".to_string()
}

fn default_timeout_seconds() -> u64 {
    30
}

fn default_user_agent() -> String {
    format!("sheikh-chat/{}", env!("CARGO_PKG_VERSION"))
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_seconds: default_timeout_seconds(),
            user_agent: default_user_agent(),
        }
    }
}

impl ServerConfig {
    /// Per-request timeout as a [`Duration`]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

/// Streaming reply configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamingConfig {
    /// Text that replaces an assistant message when its stream fails
    #[serde(default = "default_failure_message")]
    pub failure_message: String,

    /// Maximum silence between frames before the stream is failed (seconds, 0 = wait forever)
    #[serde(default = "default_idle_timeout_seconds")]
    pub idle_timeout_seconds: u64,

    /// Title given to sessions created without one
    #[serde(default = "default_title")]
    pub default_title: String,
}

fn default_failure_message() -> String {
    DEFAULT_FAILURE_MESSAGE.to_string()
}

fn default_idle_timeout_seconds() -> u64 {
    120
}

fn default_title() -> String {
    "New Conversation".to_string()
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            failure_message: default_failure_message(),
            idle_timeout_seconds: default_idle_timeout_seconds(),
            default_title: default_title(),
        }
    }
}

impl StreamingConfig {
    /// Idle timeout between frames, `None` when disabled
    pub fn idle_timeout(&self) -> Option<Duration> {
        match self.idle_timeout_seconds {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}

impl Config {
    /// Load configuration from file with environment and CLI overrides
    ///
    /// # Arguments
    ///
    /// * `path` - Path to configuration file
    /// * `cli` - CLI arguments for overrides
    ///
    /// # Errors
    ///
    /// Returns error if the file exists but cannot be read or parsed
    pub fn load(path: &str, cli: &crate::cli::Cli) -> Result<Self> {
        let mut config = if Path::new(path).exists() {
            Self::from_file(path)?
        } else {
            tracing::warn!("Config file not found at {}, using defaults", path);
            Self::default()
        };

        config.apply_env_vars();
        config.apply_cli_overrides(cli);

        Ok(config)
    }

    fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| SheikhError::Config(format!("Failed to read config file: {}", e)))?;
        serde_yaml::from_str(&contents)
            .map_err(|e| SheikhError::Config(format!("Failed to parse config: {}", e)).into())
    }

    fn apply_env_vars(&mut self) {
        if let Ok(base_url) = std::env::var("SHEIKH_BASE_URL") {
            tracing::debug!(base_url = %base_url, "Env override: SHEIKH_BASE_URL");
            self.server.base_url = base_url;
        }

        if let Ok(timeout) = std::env::var("SHEIKH_TIMEOUT_SECONDS") {
            match timeout.parse::<u64>() {
                Ok(v) => self.server.timeout_seconds = v,
                Err(_) => tracing::warn!("Invalid SHEIKH_TIMEOUT_SECONDS: {}", timeout),
            }
        }

        if let Ok(message) = std::env::var("SHEIKH_FAILURE_MESSAGE") {
            self.streaming.failure_message = message;
        }

        if let Ok(idle) = std::env::var("SHEIKH_STREAM_IDLE_TIMEOUT") {
            match idle.parse::<u64>() {
                Ok(v) => {
                    self.streaming.idle_timeout_seconds = v;
                    tracing::debug!(
                        idle_timeout_seconds = v,
                        "Env override: SHEIKH_STREAM_IDLE_TIMEOUT"
                    );
                }
                Err(_) => tracing::warn!("Invalid SHEIKH_STREAM_IDLE_TIMEOUT: {}", idle),
            }
        }
    }

    fn apply_cli_overrides(&mut self, cli: &crate::cli::Cli) {
        if let Some(base_url) = &cli.base_url {
            self.server.base_url = base_url.clone();
        }
        if cli.verbose {
            tracing::debug!("Verbose mode enabled");
        }
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns error if any validation check fails
    pub fn validate(&self) -> Result<()> {
        let url = url::Url::parse(&self.server.base_url).map_err(|e| {
            SheikhError::Config(format!(
                "Invalid server.base_url '{}': {}",
                self.server.base_url, e
            ))
        })?;

        if !matches!(url.scheme(), "http" | "https") {
            return Err(SheikhError::Config(format!(
                "server.base_url must use http or https, got {}",
                url.scheme()
            ))
            .into());
        }

        if self.server.timeout_seconds == 0 {
            return Err(SheikhError::Config(
                "server.timeout_seconds must be greater than 0".to_string(),
            )
            .into());
        }

        if self.streaming.failure_message.trim().is_empty() {
            return Err(SheikhError::Config(
                "streaming.failure_message cannot be empty".to_string(),
            )
            .into());
        }

        Ok(())
    }
}
