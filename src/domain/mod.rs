//! # Domain Types
//!
//! Records persisted by the approval workflow and the payloads used to
//! write them.

pub mod config;
pub mod duration;
pub mod issue;
pub mod request;
pub mod role;
pub mod secret_data;

pub use config::{BackendConfig, ConfigInput, ConfigView, NotificationPolicy};
pub use duration::{deadline, parse_duration, DurationInput};
pub use issue::Issue;
pub use request::{bound_allows, generate_nonce, Request, RequestView};
pub use role::{validate_role_name, Role, RoleInput, SecretPathMethod};
pub use secret_data::{SecretData, SecretValue};
