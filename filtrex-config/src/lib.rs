//! Layered runtime settings: built-in defaults, an optional `filtrex.toml`,
//! then `FILTREX__`-prefixed environment overrides.
#![allow(missing_docs)]

use std::path::Path;
use std::time::Duration;

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct RateLimitSettings {
    pub max_requests: u32,
    pub window_secs: u64,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            max_requests: 10,
            window_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct CacheSettings {
    pub enabled: bool,
    pub ttl_secs: u64,
}

impl CacheSettings {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_secs: 3600,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct DownloaderSettings {
    pub timeout_secs: u64,
    pub max_retries: u32,
    /// Concurrent source fetches per compilation.
    pub parallelism: usize,
}

impl DownloaderSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for DownloaderSettings {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            max_retries: 2,
            parallelism: 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct WorkflowSettings {
    pub event_ttl_secs: u64,
    pub max_events: usize,
}

impl WorkflowSettings {
    pub fn event_ttl(&self) -> Duration {
        Duration::from_secs(self.event_ttl_secs)
    }
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self {
            event_ttl_secs: 3600,
            max_events: 100,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct SessionSettings {
    /// Concurrent compilations per WebSocket connection.
    pub max_concurrent_compilations: usize,
    pub heartbeat_timeout_secs: u64,
    pub max_message_bytes: usize,
}

impl SessionSettings {
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout_secs)
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            max_concurrent_compilations: 3,
            heartbeat_timeout_secs: 300,
            max_message_bytes: 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct MetricsSettings {
    pub window_secs: u64,
}

impl MetricsSettings {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

impl Default for MetricsSettings {
    fn default() -> Self {
        Self { window_secs: 1800 }
    }
}

/// Complete runtime configuration for the server binary.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct Settings {
    pub server: ServerSettings,
    pub rate_limit: RateLimitSettings,
    pub cache: CacheSettings,
    pub downloader: DownloaderSettings,
    pub workflow: WorkflowSettings,
    pub session: SessionSettings,
    pub metrics: MetricsSettings,
}

impl Settings {
    /// Load from the default locations: `filtrex.toml` in the working
    /// directory (optional) plus `FILTREX__SECTION__KEY` environment
    /// variables.
    pub fn load() -> Result<Self, SettingsError> {
        Self::load_from(None::<&Path>)
    }

    pub fn load_from<P: AsRef<Path>>(path: Option<P>) -> Result<Self, SettingsError> {
        let mut builder = Config::builder();
        builder = match path {
            Some(path) => builder.add_source(File::from(path.as_ref())),
            None => builder.add_source(File::with_name("filtrex").required(false)),
        };
        let settings: Settings = builder
            .add_source(Environment::with_prefix("FILTREX").separator("__"))
            .build()?
            .try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), SettingsError> {
        if self.rate_limit.window_secs == 0 {
            return Err(SettingsError::Invalid(
                "rate_limit.window_secs must be positive".to_string(),
            ));
        }
        if self.downloader.parallelism == 0 {
            return Err(SettingsError::Invalid(
                "downloader.parallelism must be positive".to_string(),
            ));
        }
        if self.session.max_message_bytes == 0 {
            return Err(SettingsError::Invalid(
                "session.max_message_bytes must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
