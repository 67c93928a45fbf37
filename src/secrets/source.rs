//! Downstream collaborators of the issuance engine.
//!
//! The engine never talks HTTP itself. It asks a [`TokenBroker`] for a
//! short-lived credential bound to the requester, then hands a
//! [`DownstreamCall`] to the [`DownstreamSecretSource`].

use super::types::SecretString;
use crate::domain::SecretPathMethod;
use crate::errors::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Where and as whom the backend's own service identity operates
#[derive(Debug, Clone)]
pub struct ServiceCredentials {
    pub vault_addr: String,
    pub token: SecretString,
}

/// One read or write against the downstream secret store
#[derive(Debug, Clone)]
pub struct DownstreamCall {
    /// Base address of the downstream store
    pub address: String,
    pub path: String,
    pub method: SecretPathMethod,
    /// Request body for POST
    pub data: Option<serde_json::Map<String, serde_json::Value>>,
    /// Scoped credential the call runs under
    pub token: SecretString,
    /// Stable per request nonce; lets the downstream side recognise retries
    pub idempotency_key: String,
}

/// Result of a downstream call
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct DownstreamSecret {
    pub data: serde_json::Map<String, serde_json::Value>,
    /// Token accessor when the downstream artifact is itself a token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_accessor: Option<String>,
}

impl std::fmt::Debug for DownstreamSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownstreamSecret")
            .field("keys", &self.data.keys().collect::<Vec<_>>())
            .field("token_accessor", &self.token_accessor)
            .finish()
    }
}

/// Parameters for a token bound to one entity alias
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopedTokenRequest {
    pub policies: Vec<String>,
    /// Lower-cased alias the token is bound to
    pub entity_alias: String,
    pub ttl: Option<Duration>,
    pub idempotency_key: String,
    /// Extra token parameters forwarded verbatim
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// A freshly minted token
#[derive(Debug, Clone)]
pub struct ScopedToken {
    pub token: SecretString,
    pub accessor: String,
    pub policies: Vec<String>,
    pub lease_duration: Duration,
}

#[async_trait]
pub trait DownstreamSecretSource: Send + Sync {
    async fn invoke(&self, call: &DownstreamCall) -> Result<DownstreamSecret>;

    /// Revoke a token previously issued as a secret. Already-revoked tokens
    /// are not an error.
    async fn revoke_token(&self, service: &ServiceCredentials, accessor: &str) -> Result<()>;
}

#[async_trait]
pub trait TokenBroker: Send + Sync {
    /// Trade an administrator token for the backend's own orphan service token
    async fn exchange(
        &self,
        vault_addr: &str,
        admin_token: &SecretString,
        policies: &[String],
    ) -> Result<SecretString>;

    /// Mint a non-renewable token bound to one entity alias
    async fn scoped_token(
        &self,
        service: &ServiceCredentials,
        request: &ScopedTokenRequest,
    ) -> Result<ScopedToken>;

    async fn renew_self(&self, service: &ServiceCredentials, increment: Duration) -> Result<()>;
}
