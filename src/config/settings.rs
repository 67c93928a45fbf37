//! # Configuration Settings
//!
//! Process-level settings for the approved-secrets service.

use crate::errors::{ApprovalError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use validator::Validate;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate, Default)]
pub struct AppConfig {
    /// HTTP server configuration
    #[validate(nested)]
    pub server: ServerConfig,

    /// Key-value storage configuration
    #[validate(nested)]
    pub storage: StorageConfig,

    /// Logging configuration
    #[validate(nested)]
    pub observability: ObservabilityConfig,

    /// Background housekeeping configuration
    #[validate(nested)]
    pub housekeeping: HousekeepingConfig,

    /// Host mount limits
    #[validate(nested)]
    pub mount: MountConfig,
}

impl AppConfig {
    /// Validate the entire configuration
    pub fn validate(&self) -> Result<()> {
        Validate::validate(self).map_err(ApprovalError::from)?;
        self.validate_custom()?;
        Ok(())
    }

    fn validate_custom(&self) -> Result<()> {
        if self.storage.url != "memory" && !self.storage.url.starts_with("postgresql://") {
            return Err(ApprovalError::invalid_field(
                "Storage URL must be 'memory' or start with 'postgresql://'",
                "storage.url",
            ));
        }

        if self.housekeeping.renew_increment_seconds < self.housekeeping.renew_interval_seconds {
            return Err(ApprovalError::invalid_field(
                "Renewal increment must not be shorter than the renewal interval",
                "housekeeping.renew_increment_seconds",
            ));
        }

        Ok(())
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ServerConfig {
    /// Server bind address
    #[validate(length(min = 1, message = "Host cannot be empty"))]
    pub host: String,

    /// Server port
    #[validate(range(min = 1, max = 65535, message = "Port must be between 1 and 65535"))]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { host: "127.0.0.1".to_string(), port: 8300 }
    }
}

impl ServerConfig {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct StorageConfig {
    /// `memory` or a PostgreSQL connection URL
    #[validate(length(min = 1, message = "Storage URL cannot be empty"))]
    pub url: String,

    /// Maximum number of connections in the pool
    #[validate(range(min = 1, max = 100, message = "Max connections must be between 1 and 100"))]
    pub max_connections: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self { url: "memory".to_string(), max_connections: 5 }
    }
}

impl StorageConfig {
    pub fn is_memory(&self) -> bool {
        self.url == "memory"
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ObservabilityConfig {
    /// Default filter directive when `RUST_LOG` is unset
    #[validate(length(min = 1, message = "Log level cannot be empty"))]
    pub log_level: String,

    /// Emit JSON log lines instead of human-readable output
    pub json_logging: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self { log_level: "info".to_string(), json_logging: false }
    }
}

/// Periodic service-token renewal and expired request sweep
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct HousekeepingConfig {
    /// Seconds between renewal attempts
    #[validate(range(min = 1, message = "Renew interval must be at least 1 second"))]
    pub renew_interval_seconds: u64,

    /// Increment requested on each self-renewal
    #[validate(range(min = 1, message = "Renew increment must be at least 1 second"))]
    pub renew_increment_seconds: u64,

    /// Seconds between expired request sweeps
    #[validate(range(min = 1, message = "Sweep interval must be at least 1 second"))]
    pub sweep_interval_seconds: u64,
}

impl Default for HousekeepingConfig {
    fn default() -> Self {
        Self {
            renew_interval_seconds: 3600,
            renew_increment_seconds: 72 * 3600,
            sweep_interval_seconds: 300,
        }
    }
}

impl HousekeepingConfig {
    pub fn renew_interval(&self) -> Duration {
        Duration::from_secs(self.renew_interval_seconds)
    }

    pub fn renew_increment(&self) -> Duration {
        Duration::from_secs(self.renew_increment_seconds)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_seconds)
    }
}

/// Ceiling imposed by the host mount on issued lease TTLs
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct MountConfig {
    #[validate(range(
        min = 1,
        max = 315_360_000,
        message = "Mount max lease TTL must be between 1 second and 3650 days"
    ))]
    pub max_lease_ttl_seconds: u64,
}

impl Default for MountConfig {
    fn default() -> Self {
        Self { max_lease_ttl_seconds: 32 * 24 * 3600 }
    }
}

impl MountConfig {
    pub fn max_lease_ttl(&self) -> Duration {
        Duration::from_secs(self.max_lease_ttl_seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.storage.is_memory());
        assert_eq!(config.server.bind_address(), "127.0.0.1:8300");
    }

    #[test]
    fn mount_max_lease_ttl_is_bounded() {
        let mut config = AppConfig::default();
        config.mount.max_lease_ttl_seconds = 315_360_001;
        assert!(config.validate().is_err());
        config.mount.max_lease_ttl_seconds = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_unknown_storage_scheme() {
        let mut config = AppConfig::default();
        config.storage.url = "sqlite://./data.db".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("Storage URL"));
    }

    #[test]
    fn rejects_zero_port() {
        let mut config = AppConfig::default();
        config.server.port = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_increment_shorter_than_interval() {
        let mut config = AppConfig::default();
        config.housekeeping.renew_interval_seconds = 7200;
        config.housekeeping.renew_increment_seconds = 3600;
        assert!(config.validate().is_err());
    }
}
