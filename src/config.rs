//! Application configuration

use std::net::SocketAddr;
use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use serde_with::serde_as;

use crate::errors::HarborError;

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub water: WaterConfig,
    #[serde(default)]
    pub notification: NotificationConfig,
    #[serde(default)]
    pub broadcast: BroadcastConfig,
    #[serde(default)]
    pub cache: CacheConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: SocketAddr,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    10
}

/// External water/land classifier
#[serde_as]
#[derive(Debug, Deserialize, Clone)]
pub struct WaterConfig {
    /// Base URL, e.g. `http://ceklaut.internal:8000`
    pub url: String,
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    #[serde(default = "default_water_timeout")]
    pub timeout: Duration,
}

fn default_water_timeout() -> Duration {
    Duration::from_secs(8)
}

/// Push notification gateway. Notifications are disabled when `url` is unset.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct NotificationConfig {
    pub url: Option<String>,
    pub server_key: Option<String>,
}

#[serde_as]
#[derive(Debug, Deserialize, Clone)]
pub struct BroadcastConfig {
    pub batch_size: usize,
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    pub fast_interval: Duration,
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    pub slow_interval: Duration,
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    pub fleet_refresh_interval: Duration,
    /// Optional dashboard relay to dial out to, in addition to serving viewers.
    pub relay_url: Option<String>,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            batch_size: 30,
            fast_interval: Duration::from_secs(1),
            slow_interval: Duration::from_secs(10),
            fleet_refresh_interval: Duration::from_secs(3600),
            relay_url: None,
        }
    }
}

#[serde_as]
#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    pub ttl: Duration,
    /// Half-width of the "recently changed" window around the newest update
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    pub change_window: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(3600),
            change_window: Duration::from_secs(10),
        }
    }
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(
                Environment::with_prefix("HARBOR")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Validate all sections
    pub fn validate(&self) -> Result<(), HarborError> {
        self.database.validate()?;
        self.water.validate()?;
        self.broadcast.validate()?;
        Ok(())
    }
}

impl DatabaseConfig {
    pub fn validate(&self) -> Result<(), HarborError> {
        if self.url.trim().is_empty() {
            return Err(HarborError::ConfigurationError {
                message: "Database url cannot be empty".to_string(),
            });
        }
        if self.max_connections == 0 {
            return Err(HarborError::ConfigurationError {
                message: "Database max_connections must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

impl WaterConfig {
    pub fn validate(&self) -> Result<(), HarborError> {
        if self.url.trim().is_empty() {
            return Err(HarborError::ConfigurationError {
                message: "Water classifier url cannot be empty".to_string(),
            });
        }
        if self.timeout.is_zero() {
            return Err(HarborError::ConfigurationError {
                message: "Water classifier timeout must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

impl BroadcastConfig {
    pub fn validate(&self) -> Result<(), HarborError> {
        if self.batch_size == 0 {
            return Err(HarborError::ConfigurationError {
                message: "Broadcast batch size must be greater than zero".to_string(),
            });
        }
        if self.fast_interval.is_zero() || self.slow_interval.is_zero() {
            return Err(HarborError::ConfigurationError {
                message: "Broadcast pacing intervals must be greater than zero".to_string(),
            });
        }
        if self.fleet_refresh_interval.is_zero() {
            return Err(HarborError::ConfigurationError {
                message: "Fleet refresh interval must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}
