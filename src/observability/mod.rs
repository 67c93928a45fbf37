//! # Observability Infrastructure
//!
//! Structured logging for the approved-secrets service. HTTP requests are
//! traced by `tower-http`'s `TraceLayer` in [`crate::api`].

pub mod logging;

pub use logging::{init_logging, log_config_info};
