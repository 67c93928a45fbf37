//! # Downstream Secrets
//!
//! Collaborator traits used by the issuance engine, the Vault adapter that
//! implements them, and the redacting [`SecretString`] wrapper.

pub mod source;
pub mod types;
pub mod vault;

pub use source::{
    DownstreamCall, DownstreamSecret, DownstreamSecretSource, ScopedToken, ScopedTokenRequest,
    ServiceCredentials, TokenBroker,
};
pub use types::SecretString;
pub use vault::VaultAdapter;
