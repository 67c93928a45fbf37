//! Request ledger: opens, reads and lists approval requests.

use super::revocation::{LeaseHandle, LeaseKind};
use super::{Collaborators, ConfigService, RoleRegistry, Stores};
use crate::domain::{bound_allows, Issue, Request, RequestView};
use crate::errors::{ApprovalError, Result};
use crate::identity::CallerContext;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::instrument;

/// Result of opening a request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenedRequest {
    pub request: RequestView,
    pub lease: LeaseHandle,
    pub lease_ttl_seconds: u64,
    pub renewable: bool,
}

#[derive(Debug, Clone)]
pub struct RequestLedger {
    stores: Stores,
    config: ConfigService,
    roles: RoleRegistry,
    deps: Collaborators,
}

impl RequestLedger {
    pub fn new(stores: Stores, config: ConfigService, roles: RoleRegistry, deps: Collaborators) -> Self {
        Self { stores, config, roles, deps }
    }

    /// Open a request against `role_name` on behalf of the caller
    #[instrument(skip(self, requester), fields(role = %role_name))]
    pub async fn open(&self, role_name: &str, requester: &CallerContext) -> Result<OpenedRequest> {
        let role = self.roles.get(role_name).await?;
        let config = self.config.load().await?;

        let identity = self
            .deps
            .resolver
            .resolve(requester, config.identity_template.as_deref())
            .await?;

        if !bound_allows(
            &role.bound_requester_ids,
            &role.bound_requester_roles,
            &identity.id,
            &identity.roles,
        ) {
            tracing::warn!(role = %role_name, requester = %identity.id, "Requester outside bound set");
            return Err(ApprovalError::permission_denied(format!(
                "'{}' may not request role '{}'",
                identity.id, role_name
            )));
        }

        // Held across the check and the write so two opens on an exclusive
        // role cannot both slip past an issue recorded in between.
        let _exclusive_guard = if role.exclusive_lease {
            let guard = self.stores.issues.lock(&[role_name]).await;
            let now = self.deps.clock.now();
            if let Some(active) = self.active_issue(role_name, now).await? {
                tracing::info!(role = %role_name, nonce = %active.nonce, "Exclusive lease still active");
                return Err(ApprovalError::conflict(format!(
                    "exclusive lease still active for role '{}' until {}",
                    role_name,
                    active.expires_at.to_rfc3339()
                )));
            }
            Some(guard)
        } else {
            None
        };

        let now = self.deps.clock.now();
        let request = Request::open(
            role_name,
            &role,
            &identity.id,
            identity.roles.clone(),
            now,
            config.approval_ttl(),
        )?;

        self.stores.requests.put(&[&request.role_name, &request.nonce], &request).await?;

        tracing::info!(
            role = %request.role_name,
            nonce = %request.nonce,
            requester = %request.requester_id,
            min_approvers = request.min_approvers,
            expires_at = %request.expires_at.to_rfc3339(),
            "Request opened"
        );

        Ok(OpenedRequest {
            lease: LeaseHandle::new(LeaseKind::Request, &request.role_name, &request.nonce),
            lease_ttl_seconds: config.approval_ttl,
            renewable: false,
            request: RequestView::from(&request),
        })
    }

    /// Current state of a request
    pub async fn read(&self, role_name: &str, nonce: &str) -> Result<RequestView> {
        let request = load_live(&self.stores, self.deps.clock.now(), role_name, nonce).await?;
        Ok(RequestView::from(&request))
    }

    /// Nonces of the live requests under `role_name`. Expired requests found
    /// along the way are purged.
    pub async fn list(&self, role_name: &str) -> Result<Vec<String>> {
        let now = self.deps.clock.now();
        let mut live = Vec::new();
        for nonce in self.stores.requests.list(&[role_name]).await? {
            if self.purge_if_expired(role_name, &nonce, now).await? {
                continue;
            }
            live.push(nonce);
        }
        Ok(live)
    }

    /// Delete a request outright. Missing requests are fine.
    #[instrument(skip(self), fields(role = %role_name, nonce = %nonce))]
    pub async fn cancel(&self, role_name: &str, nonce: &str) -> Result<()> {
        let _guard = self.stores.requests.lock(&[role_name, nonce]).await;
        self.stores.requests.delete(&[role_name, nonce]).await?;
        tracing::info!(role = %role_name, nonce = %nonce, "Request removed");
        Ok(())
    }

    /// Purge expired requests under every role. Returns how many went.
    pub async fn sweep_expired(&self) -> Result<usize> {
        let now = self.deps.clock.now();
        let mut purged = 0;
        for dir in self.stores.requests.list(&[]).await? {
            let role_name = dir.trim_end_matches('/');
            for nonce in self.stores.requests.list(&[role_name]).await? {
                if self.purge_if_expired(role_name, &nonce, now).await? {
                    purged += 1;
                }
            }
        }
        Ok(purged)
    }

    /// Drop issue records whose lease has run out. Returns how many went.
    pub async fn sweep_expired_issues(&self) -> Result<usize> {
        let now = self.deps.clock.now();
        let mut purged = 0;
        for dir in self.stores.issues.list(&[]).await? {
            let role_name = dir.trim_end_matches('/');
            for nonce in self.stores.issues.list(&[role_name]).await? {
                let _guard = self.stores.issues.lock(&[role_name, &nonce]).await;
                match self.stores.issues.get::<Issue>(&[role_name, &nonce]).await? {
                    Some(issue) if !issue.is_active(now) => {
                        self.stores.issues.delete(&[role_name, &nonce]).await?;
                        tracing::debug!(role = %role_name, nonce = %nonce, "Purged ended issue");
                        purged += 1;
                    }
                    _ => {}
                }
            }
        }
        Ok(purged)
    }

    async fn purge_if_expired(&self, role_name: &str, nonce: &str, now: DateTime<Utc>) -> Result<bool> {
        let _guard = self.stores.requests.lock(&[role_name, nonce]).await;
        match self.stores.requests.get::<Request>(&[role_name, nonce]).await? {
            Some(request) if request.is_expired(now) => {
                self.stores.requests.delete(&[role_name, nonce]).await?;
                tracing::debug!(role = %role_name, nonce = %nonce, "Purged expired request");
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Ok(true),
        }
    }

    async fn active_issue(&self, role_name: &str, now: DateTime<Utc>) -> Result<Option<Issue>> {
        for nonce in self.stores.issues.list(&[role_name]).await? {
            if let Some(issue) = self.stores.issues.get::<Issue>(&[role_name, &nonce]).await? {
                if issue.is_active(now) {
                    return Ok(Some(issue));
                }
            }
        }
        Ok(None)
    }
}

/// Load a request that is still inside its approval window.
///
/// Expired requests are reported as such and left in place; the ledger's
/// list and sweep remove them.
pub(crate) async fn load_live(
    stores: &Stores,
    now: DateTime<Utc>,
    role_name: &str,
    nonce: &str,
) -> Result<Request> {
    let request = stores
        .requests
        .get::<Request>(&[role_name, nonce])
        .await?
        .ok_or_else(|| ApprovalError::not_found("request", format!("{}/{}", role_name, nonce)))?;

    if request.is_expired(now) {
        return Err(ApprovalError::expired(role_name, nonce));
    }
    Ok(request)
}
