//! # Configuration Management
//!
//! Process settings are read from `APPROVED_SECRETS_*` environment variables
//! (a `.env` file is honoured by the binary). The backend's own configuration
//! (service credentials, approval TTL, notification target) lives in storage
//! and is written through the API, see [`crate::domain::BackendConfig`].

pub mod settings;

pub use settings::{
    AppConfig, HousekeepingConfig, MountConfig, ObservabilityConfig, ServerConfig, StorageConfig,
};

use crate::errors::{ApprovalError, Result};
use std::str::FromStr;

fn env_or<T: FromStr>(name: &str, default: T) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .parse()
            .map_err(|e| ApprovalError::config(format!("Invalid {}: {}", name, e))),
        Err(_) => Ok(default),
    }
}

impl AppConfig {
    /// Create configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let defaults = AppConfig::default();

        let config = AppConfig {
            server: ServerConfig {
                host: env_or("APPROVED_SECRETS_HOST", defaults.server.host)?,
                port: env_or("APPROVED_SECRETS_PORT", defaults.server.port)?,
            },
            storage: StorageConfig {
                url: env_or("APPROVED_SECRETS_STORAGE_URL", defaults.storage.url)?,
                max_connections: env_or(
                    "APPROVED_SECRETS_STORAGE_MAX_CONNECTIONS",
                    defaults.storage.max_connections,
                )?,
            },
            observability: ObservabilityConfig {
                log_level: env_or("APPROVED_SECRETS_LOG_LEVEL", defaults.observability.log_level)?,
                json_logging: env_or(
                    "APPROVED_SECRETS_JSON_LOGGING",
                    defaults.observability.json_logging,
                )?,
            },
            housekeeping: HousekeepingConfig {
                renew_interval_seconds: env_or(
                    "APPROVED_SECRETS_RENEW_INTERVAL_SECONDS",
                    defaults.housekeeping.renew_interval_seconds,
                )?,
                renew_increment_seconds: env_or(
                    "APPROVED_SECRETS_RENEW_INCREMENT_SECONDS",
                    defaults.housekeeping.renew_increment_seconds,
                )?,
                sweep_interval_seconds: env_or(
                    "APPROVED_SECRETS_SWEEP_INTERVAL_SECONDS",
                    defaults.housekeeping.sweep_interval_seconds,
                )?,
            },
            mount: MountConfig {
                max_lease_ttl_seconds: env_or(
                    "APPROVED_SECRETS_MOUNT_MAX_LEASE_TTL_SECONDS",
                    defaults.mount.max_lease_ttl_seconds,
                )?,
            },
        };

        config.validate()?;
        Ok(config)
    }
}
