//! Lease callbacks invoked by the host when a lease ends or is renewed.

use super::config_service::credentials_of;
use super::{Collaborators, ConfigService, Stores};
use crate::domain::Issue;
use crate::errors::{ApprovalError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::instrument;

/// What a lease wraps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeaseKind {
    Request,
    Issue,
}

/// Internal data the host hands back on revoke/renew
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseHandle {
    pub kind: LeaseKind,
    pub role_name: String,
    pub nonce: String,
}

impl LeaseHandle {
    pub fn new(kind: LeaseKind, role_name: &str, nonce: &str) -> Self {
        Self { kind, role_name: role_name.to_lowercase(), nonce: nonce.to_string() }
    }
}

impl fmt::Display for LeaseHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            LeaseKind::Request => "request",
            LeaseKind::Issue => "issue",
        };
        write!(f, "{}/{}/{}", kind, self.role_name, self.nonce)
    }
}

#[derive(Debug, Clone)]
pub struct LeaseRevocation {
    stores: Stores,
    config: ConfigService,
    deps: Collaborators,
}

impl LeaseRevocation {
    pub fn new(stores: Stores, config: ConfigService, deps: Collaborators) -> Self {
        Self { stores, config, deps }
    }

    /// Tear down whatever `lease` refers to. Revoking twice is a no-op.
    #[instrument(skip(self), fields(lease = %lease))]
    pub async fn revoke(&self, lease: &LeaseHandle) -> Result<()> {
        let parts = [lease.role_name.as_str(), lease.nonce.as_str()];
        match lease.kind {
            LeaseKind::Request => {
                let _guard = self.stores.requests.lock(&parts).await;
                self.stores.requests.delete(&parts).await?;
                tracing::info!(role = %lease.role_name, nonce = %lease.nonce, "Request lease revoked");
            }
            LeaseKind::Issue => {
                let _guard = self.stores.issues.lock(&parts).await;
                let Some(issue) = self.stores.issues.get::<Issue>(&parts).await? else {
                    tracing::debug!(role = %lease.role_name, nonce = %lease.nonce, "Issue already gone");
                    return Ok(());
                };

                if let Some(accessor) = issue.token_accessor.as_deref() {
                    let config = self.config.load().await?;
                    self.deps.source.revoke_token(&credentials_of(&config), accessor).await?;
                    tracing::info!(role = %lease.role_name, nonce = %lease.nonce, "Issued token revoked");
                }

                self.stores.issues.delete(&parts).await?;
                tracing::info!(role = %lease.role_name, nonce = %lease.nonce, "Issue lease revoked");
            }
        }
        Ok(())
    }

    /// Leases from this backend never renew
    pub async fn renew(&self, lease: &LeaseHandle) -> Result<()> {
        tracing::debug!(lease = %lease, "Renewal refused");
        Err(ApprovalError::invalid("cannot be renewed - request again instead"))
    }

    /// Nonces of the issues recorded under `role_name`
    pub async fn list_issues(&self, role_name: &str) -> Result<Vec<String>> {
        self.stores.issues.list(&[role_name]).await
    }
}
