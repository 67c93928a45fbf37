//! # HTTP API
//!
//! JSON over HTTP in front of [`crate::backend::ApprovedSecretsBackend`].
//! Caller identity arrives in trusted headers, see [`caller`].

pub mod caller;
pub mod error;
pub mod handlers;
pub mod routes;
pub mod server;

pub use caller::Caller;
pub use error::ApiError;
pub use handlers::ApiState;
pub use routes::build_router;
pub use server::start_api_server;
