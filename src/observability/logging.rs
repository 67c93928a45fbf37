//! # Structured Logging
//!
//! Subscriber setup and span macros built on the tracing ecosystem.

use crate::config::{AppConfig, ObservabilityConfig};
use crate::errors::{ApprovalError, Result};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the global subscriber.
///
/// `RUST_LOG` wins over the configured level when set.
pub fn init_logging(config: &ObservabilityConfig) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .map_err(|e| ApprovalError::config(format!("Invalid log filter: {}", e)))?;

    let registry = tracing_subscriber::registry().with(env_filter);

    let result = if config.json_logging {
        registry
            .with(fmt::layer().json().with_current_span(true).with_target(true))
            .try_init()
    } else {
        registry.with(fmt::layer().with_target(true)).try_init()
    };

    result.map_err(|e| ApprovalError::config(format!("Failed to install subscriber: {}", e)))
}

/// Create a tracing span for one workflow operation.
///
/// ```rust,ignore
/// let span = workflow_span!("approve", role = "k8s-admin");
/// ```
#[macro_export]
macro_rules! workflow_span {
    ($operation:expr) => {
        tracing::info_span!(
            "workflow_operation",
            operation = %$operation,
            operation_id = %uuid::Uuid::new_v4()
        )
    };
    ($operation:expr, $($field:tt)*) => {
        tracing::info_span!(
            "workflow_operation",
            operation = %$operation,
            operation_id = %uuid::Uuid::new_v4(),
            $($field)*
        )
    };
}

/// Create a tracing span for storage operations
#[macro_export]
macro_rules! storage_span {
    ($operation:expr, $key:expr) => {
        tracing::debug_span!("storage_operation", operation = %$operation, key = %$key)
    };
}

/// Log configuration at startup
pub fn log_config_info(config: &AppConfig) {
    tracing::info!(
        server_address = %config.server.bind_address(),
        storage = if config.storage.is_memory() { "memory" } else { "postgresql" },
        renew_interval_seconds = config.housekeeping.renew_interval_seconds,
        sweep_interval_seconds = config.housekeeping.sweep_interval_seconds,
        mount_max_lease_ttl_seconds = config.mount.max_lease_ttl_seconds,
        "Approved secrets configuration"
    );
}
