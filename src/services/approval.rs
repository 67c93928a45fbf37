//! Approval engine.

use super::ledger::load_live;
use super::{Collaborators, ConfigService, Stores};
use crate::domain::{Request, RequestView};
use crate::errors::{ApprovalError, Result};
use crate::identity::CallerContext;
use tracing::instrument;

/// Attempts before a contended approval gives up with `Conflict`
pub const MAX_APPROVE_ATTEMPTS: usize = 5;

#[derive(Debug, Clone)]
pub struct ApprovalEngine {
    stores: Stores,
    config: ConfigService,
    deps: Collaborators,
}

impl ApprovalEngine {
    pub fn new(stores: Stores, config: ConfigService, deps: Collaborators) -> Self {
        Self { stores, config, deps }
    }

    /// Record the caller's approval of `(role_name, nonce)`.
    ///
    /// Approving twice is harmless: the count stays put and only the expiry
    /// moves forward.
    #[instrument(skip(self, approver, reason), fields(role = %role_name, nonce = %nonce))]
    pub async fn approve(
        &self,
        role_name: &str,
        nonce: &str,
        approver: &CallerContext,
        reason: Option<&str>,
    ) -> Result<RequestView> {
        let config = self.config.load().await?;
        let identity = self
            .deps
            .resolver
            .resolve(approver, config.identity_template.as_deref())
            .await?;

        for attempt in 1..=MAX_APPROVE_ATTEMPTS {
            let _guard = self.stores.requests.lock(&[role_name, nonce]).await;

            let now = self.deps.clock.now();
            let mut request = load_live(&self.stores, now, role_name, nonce).await?;
            let expected = request.generation;

            if !request.approver_allowed(&identity.id, &identity.roles) {
                tracing::warn!(
                    role = %role_name,
                    nonce = %nonce,
                    approver = %identity.id,
                    "Approver outside bound set"
                );
                return Err(ApprovalError::permission_denied(format!(
                    "'{}' may not approve requests for role '{}'",
                    identity.id, role_name
                )));
            }

            if !config.allow_self_approval && identity.id == request.requester_id {
                return Err(ApprovalError::permission_denied(
                    "requesters may not approve their own request",
                ));
            }

            let added = request.record_approval(&identity.id, reason, now, config.approval_ttl())?;

            let written = self
                .stores
                .requests
                .put_if_generation(&[role_name, nonce], &request, expected, |r: &Request| {
                    r.generation
                })
                .await?;

            if written {
                tracing::info!(
                    role = %role_name,
                    nonce = %nonce,
                    approver = %identity.id,
                    added,
                    approvals = request.approval_count(),
                    min_approvers = request.min_approvers,
                    "Approval recorded"
                );
                return Ok(RequestView::from(&request));
            }

            tracing::debug!(role = %role_name, nonce = %nonce, attempt, "Approval lost a race, retrying");
        }

        Err(ApprovalError::conflict(format!(
            "request {}/{} kept changing underneath the approval; try again",
            role_name, nonce
        )))
    }
}
