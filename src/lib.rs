//! # Approved Secrets
//!
//! Multi-party approval in front of a secret store. A requester opens a
//! request against a role, a quorum of approvers signs off, and only then can
//! the requester exchange the request for the secret behind the role.
//!
//! ## Architecture
//!
//! ```text
//! HTTP API ─→ ApprovedSecretsBackend ─→ Role registry / Request ledger
//!                    │                     Approval / Issuance engines
//!                    │                               │
//!              Background renewer        Vault adapter, Slack notifier
//!                    └────────────→ Storage (memory | PostgreSQL)
//! ```
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use approved_secrets::{
//!     clock::SystemClock, config::AppConfig, identity::EntityIdentityResolver,
//!     notify::SlackNotifier, secrets::VaultAdapter, services::Collaborators, storage,
//!     ApprovedSecretsBackend,
//! };
//!
//! # async fn run() -> approved_secrets::Result<()> {
//! let config = AppConfig::from_env()?;
//! let vault = Arc::new(VaultAdapter::new());
//! let deps = Collaborators {
//!     resolver: Arc::new(EntityIdentityResolver::new()),
//!     source: vault.clone(),
//!     broker: vault,
//!     notifier: Arc::new(SlackNotifier::new()),
//!     clock: Arc::new(SystemClock),
//! };
//! let storage = storage::connect(&config.storage).await?;
//! let backend = ApprovedSecretsBackend::new(storage, deps, config.housekeeping, config.mount);
//! backend.start().await;
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod backend;
pub mod clock;
pub mod config;
pub mod domain;
pub mod errors;
pub mod identity;
pub mod notify;
pub mod observability;
pub mod secrets;
pub mod services;
pub mod storage;

pub use backend::ApprovedSecretsBackend;
pub use config::AppConfig;
pub use errors::{ApprovalError, Result};

/// Application version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name from Cargo.toml
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
