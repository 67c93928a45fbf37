//! Issuance engine: trades a sufficiently approved request for the secret.
//!
//! Everything that can fail runs before the secret is released, so a failed
//! issue call leaves the request in place and can simply be retried with the
//! same nonce. Once released, the request is consumed before the [`Issue`]
//! is recorded; if either write fails a minted token is revoked again.

use super::ledger::load_live;
use super::revocation::{LeaseHandle, LeaseKind};
use super::{config_service::credentials_of, Collaborators, ConfigService, RoleRegistry, Stores};
use crate::domain::role::DEFAULT_SECRET_TTL;
use crate::domain::secret_data::{render_templates, to_json};
use crate::domain::{
    deadline, BackendConfig, DurationInput, Issue, NotificationPolicy, Request, Role, SecretData,
    SecretPathMethod, SecretValue,
};
use crate::errors::{ApprovalError, Result};
use crate::identity::{CallerContext, CallerIdentity};
use crate::notify::Notification;
use crate::secrets::{
    DownstreamCall, DownstreamSecret, ScopedTokenRequest, ServiceCredentials,
};
use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::instrument;

/// Lifetime of the credential used for a single downstream read or write
pub const CLIENT_TOKEN_TTL: Duration = Duration::from_secs(300);

/// Optional inputs to an issue call
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IssueParams {
    #[serde(default)]
    pub ttl: Option<DurationInput>,
    /// Values for the role's `secret_required_fields`
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
}

/// The released secret, wrapped as a lease
#[derive(Clone, Serialize)]
pub struct IssuedSecret {
    pub data: Map<String, Value>,
    pub lease: LeaseHandle,
    pub lease_ttl_seconds: u64,
    pub renewable: bool,
}

impl std::fmt::Debug for IssuedSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IssuedSecret")
            .field("keys", &self.data.keys().collect::<Vec<_>>())
            .field("lease", &self.lease)
            .field("lease_ttl_seconds", &self.lease_ttl_seconds)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct IssuanceEngine {
    stores: Stores,
    config: ConfigService,
    roles: RoleRegistry,
    deps: Collaborators,
}

impl IssuanceEngine {
    pub fn new(stores: Stores, config: ConfigService, roles: RoleRegistry, deps: Collaborators) -> Self {
        Self { stores, config, roles, deps }
    }

    #[instrument(skip(self, caller, params), fields(role = %role_name, nonce = %nonce))]
    pub async fn issue(
        &self,
        role_name: &str,
        nonce: &str,
        caller: &CallerContext,
        params: IssueParams,
    ) -> Result<IssuedSecret> {
        let config = self.config.load().await?;
        let identity = self
            .deps
            .resolver
            .resolve(caller, config.identity_template.as_deref())
            .await?;

        let _guard = self.stores.requests.lock(&[role_name, nonce]).await;
        let request = load_live(&self.stores, self.deps.clock.now(), role_name, nonce).await?;

        if !request.is_approved() {
            return Err(ApprovalError::permission_denied(format!(
                "insufficient approvals ({} of {})",
                request.approval_count(),
                request.min_approvers
            )));
        }
        if identity.id != request.requester_id {
            tracing::warn!(
                role = %role_name,
                nonce = %nonce,
                caller = %identity.id,
                "Issue attempted by someone other than the requester"
            );
            return Err(ApprovalError::permission_denied(
                "only the requester may issue an approved request",
            ));
        }

        let role = self.roles.get(role_name).await?;
        let missing: Vec<&str> = role
            .secret_required_fields
            .iter()
            .filter(|field| params.fields.get(*field).map_or(true, |v| v.is_empty()))
            .map(String::as_str)
            .collect();
        if !missing.is_empty() {
            return Err(ApprovalError::invalid_field(
                format!("missing required fields: {}", missing.join(", ")),
                "fields",
            ));
        }
        check_supplied_fields(&role, &params.fields)?;

        let requested = params.ttl.as_ref().map(|ttl| ttl.to_duration("ttl")).transpose()?;
        let lease_ttl = lease_ttl(&role, requested);
        let now = self.deps.clock.now();
        let expires_at = deadline(now, lease_ttl, "ttl")?;

        // Serializes against opens on the same exclusive role.
        let _exclusive_guard = if role.exclusive_lease {
            let guard = self.stores.issues.lock(&[role_name]).await;
            self.ensure_no_active_issue(role_name).await?;
            Some(guard)
        } else {
            None
        };

        if config.notification_failure_policy == NotificationPolicy::FailClosed {
            self.notify(&config, &role, &request).await?;
        }

        let service = credentials_of(&config);
        let downstream = self
            .fetch(&service, &config, &role, &request, &identity, caller, &params, lease_ttl)
            .await?;

        let issue = Issue {
            role_name: request.role_name.clone(),
            nonce: request.nonce.clone(),
            requester_id: request.requester_id.clone(),
            approver_ids: request.approver_ids.clone(),
            secret_path: role.secret_path.clone(),
            secret_type: role.secret_type.clone(),
            issued_at: now,
            expires_at,
            token_accessor: downstream.token_accessor.clone(),
        };

        // The request goes first: once the secret is out it must never be
        // issued a second time, whatever happens to the bookkeeping below.
        if let Err(e) = self.stores.requests.delete(&[role_name, nonce]).await {
            tracing::warn!(
                role = %role_name,
                nonce = %nonce,
                error = %e,
                "Could not consume request after release, withdrawing issued secret"
            );
            self.withdraw(&service, &issue).await;
            return Err(e);
        }
        if let Err(e) = self.stores.issues.put(&[role_name, nonce], &issue).await {
            tracing::warn!(
                role = %role_name,
                nonce = %nonce,
                error = %e,
                "Could not record issue, withdrawing issued secret"
            );
            self.withdraw(&service, &issue).await;
            return Err(e);
        }

        if config.notification_failure_policy == NotificationPolicy::BestEffort {
            if let Err(e) = self.notify(&config, &role, &request).await {
                tracing::warn!(role = %role_name, nonce = %nonce, error = %e, "Issue notification failed");
            }
        }

        tracing::info!(
            role = %role_name,
            nonce = %nonce,
            requester = %request.requester_id,
            approvers = ?request.approver_ids,
            lease_ttl_seconds = lease_ttl.as_secs(),
            "Secret issued"
        );

        Ok(IssuedSecret {
            data: downstream.data,
            lease: LeaseHandle::new(LeaseKind::Issue, role_name, nonce),
            lease_ttl_seconds: lease_ttl.as_secs(),
            renewable: false,
        })
    }

    /// Best-effort rollback of a released secret whose bookkeeping failed.
    /// Only minted tokens can be taken back; anything else is logged.
    async fn withdraw(&self, service: &ServiceCredentials, issue: &Issue) {
        let Some(accessor) = issue.token_accessor.as_deref() else {
            tracing::warn!(
                role = %issue.role_name,
                nonce = %issue.nonce,
                secret_path = %issue.secret_path,
                "Released secret has no handle to revoke"
            );
            return;
        };
        if let Err(e) = self.deps.source.revoke_token(service, accessor).await {
            tracing::warn!(role = %issue.role_name, nonce = %issue.nonce, error = %e, "Token withdrawal failed");
        }
    }

    async fn ensure_no_active_issue(&self, role_name: &str) -> Result<()> {
        let now = self.deps.clock.now();
        for other in self.stores.issues.list(&[role_name]).await? {
            if let Some(issue) = self.stores.issues.get::<Issue>(&[role_name, &other]).await? {
                if issue.is_active(now) {
                    return Err(ApprovalError::conflict(format!(
                        "exclusive lease still active for role '{}'",
                        role_name
                    )));
                }
            }
        }
        Ok(())
    }

    async fn notify(&self, config: &BackendConfig, role: &Role, request: &Request) -> Result<()> {
        if role.notify_slack_channels.is_empty() {
            return Ok(());
        }
        let Some(webhook) = config.slack_webhook_url.as_ref() else {
            tracing::debug!(role = %request.role_name, "No Slack webhook configured, skipping notification");
            return Ok(());
        };

        let notifications: Vec<Notification> = role
            .notify_slack_channels
            .iter()
            .map(|channel| {
                Notification::issued(
                    channel,
                    &request.role_name,
                    &request.requester_id,
                    &request.approver_ids,
                )
            })
            .collect();

        try_join_all(notifications.iter().map(|n| self.deps.notifier.notify(webhook, n))).await?;
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn fetch(
        &self,
        service: &ServiceCredentials,
        config: &BackendConfig,
        role: &Role,
        request: &Request,
        identity: &CallerIdentity,
        caller: &CallerContext,
        params: &IssueParams,
        lease_ttl: Duration,
    ) -> Result<DownstreamSecret> {
        let rendered = role
            .secret_data
            .as_ref()
            .map(|data| render_templates(data, &|template: &str| self.deps.resolver.render(caller, template)))
            .unwrap_or_default();

        if role.issues_vault_token() {
            return self.mint_token(service, rendered, request, identity, params, lease_ttl).await;
        }

        let client = self
            .deps
            .broker
            .scoped_token(
                service,
                &ScopedTokenRequest {
                    policies: config.vault_policies.clone(),
                    entity_alias: identity.id.clone(),
                    ttl: Some(CLIENT_TOKEN_TTL),
                    idempotency_key: request.nonce.clone(),
                    extra: Map::new(),
                },
            )
            .await?;

        let data = match role.secret_path_method {
            SecretPathMethod::Get => None,
            SecretPathMethod::Post => {
                let mut body = to_json(&rendered);
                for (key, value) in &params.fields {
                    body.insert(key.clone(), Value::String(value.clone()));
                }
                body.insert("ttl".to_string(), Value::String(format!("{}s", lease_ttl.as_secs())));
                Some(body)
            }
        };

        self.deps
            .source
            .invoke(&DownstreamCall {
                address: config.vault_addr.clone(),
                path: role.secret_path.clone(),
                method: role.secret_path_method,
                data,
                token: client.token,
                idempotency_key: request.nonce.clone(),
            })
            .await
    }

    async fn mint_token(
        &self,
        service: &ServiceCredentials,
        mut rendered: SecretData,
        request: &Request,
        identity: &CallerIdentity,
        params: &IssueParams,
        lease_ttl: Duration,
    ) -> Result<DownstreamSecret> {
        let policies = match rendered.remove("policies") {
            Some(SecretValue::Text(text)) => text
                .split(',')
                .map(|p| p.trim().to_string())
                .filter(|p| !p.is_empty())
                .collect::<Vec<_>>(),
            Some(SecretValue::Map(_)) => {
                return Err(ApprovalError::invalid_field(
                    "secret_data policies must be a comma separated string",
                    "secret_data",
                ))
            }
            None => {
                return Err(ApprovalError::invalid_field(
                    "secret_data must name the policies of the issued token",
                    "secret_data",
                ))
            }
        };

        let mut extra = to_json(&rendered);
        for (key, value) in &params.fields {
            extra.insert(key.clone(), Value::String(value.clone()));
        }

        let token = self
            .deps
            .broker
            .scoped_token(
                service,
                &ScopedTokenRequest {
                    policies,
                    entity_alias: identity.id.clone(),
                    ttl: Some(lease_ttl),
                    idempotency_key: request.nonce.clone(),
                    extra,
                },
            )
            .await?;

        let mut data = Map::new();
        data.insert("token".to_string(), Value::String(token.token.expose_secret().to_string()));
        data.insert("accessor".to_string(), Value::String(token.accessor.clone()));
        data.insert(
            "policies".to_string(),
            Value::Array(token.policies.iter().cloned().map(Value::String).collect()),
        );
        data.insert("lease_duration".to_string(), Value::from(token.lease_duration.as_secs()));

        Ok(DownstreamSecret { data, token_accessor: Some(token.accessor) })
    }
}

/// Supplied fields only fill in `secret_required_fields` and never replace a
/// key the role itself sends downstream.
fn check_supplied_fields(role: &Role, fields: &BTreeMap<String, String>) -> Result<()> {
    let unexpected: Vec<&str> = fields
        .keys()
        .filter(|key| !role.secret_required_fields.contains(key))
        .map(String::as_str)
        .collect();
    if !unexpected.is_empty() {
        return Err(ApprovalError::invalid_field(
            format!("unexpected fields: {}", unexpected.join(", ")),
            "fields",
        ));
    }

    if let Some(key) = fields.keys().find(|key| role.sets_field(key)) {
        return Err(ApprovalError::invalid_field(
            format!("field '{}' is set by the role and cannot be supplied", key),
            "fields",
        ));
    }
    Ok(())
}

/// `min(requested, ceiling)`; the ceiling applies when nothing is requested.
fn lease_ttl(role: &Role, requested: Option<Duration>) -> Duration {
    let ceiling = match role.lease_ceiling() {
        d if d.is_zero() => DEFAULT_SECRET_TTL,
        d => d,
    };
    match requested {
        Some(ttl) if ttl.is_zero() => ceiling,
        Some(ttl) if ttl > ceiling => {
            tracing::warn!(
                requested_seconds = ttl.as_secs(),
                ceiling_seconds = ceiling.as_secs(),
                "Requested TTL capped by role"
            );
            ceiling
        }
        Some(ttl) => ttl,
        None => ceiling,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    fn role(ttl: u64, max: u64) -> Role {
        Role { secret_path: "p".into(), secret_ttl: ttl, secret_max_ttl: max, ..Role::default() }
    }

    #[test]
    fn lease_ttl_takes_the_smaller_value() {
        let role = role(3600, 7200);
        assert_eq!(lease_ttl(&role, None), Duration::from_secs(3600));
        assert_eq!(lease_ttl(&role, Some(Duration::from_secs(60))), Duration::from_secs(60));
        assert_eq!(lease_ttl(&role, Some(Duration::from_secs(86_400))), Duration::from_secs(3600));
    }

    #[test]
    #[traced_test]
    fn capping_is_logged() {
        lease_ttl(&role(600, 600), Some(Duration::from_secs(3600)));
        assert!(logs_contain("Requested TTL capped by role"));
    }

    #[test]
    fn supplied_fields_are_limited_to_required_ones() {
        let mut role = role(600, 600);
        role.secret_required_fields = vec!["ticket".to_string()];
        role.secret_data =
            Some([("user".to_string(), SecretValue::Text("{{identity.entity.name}}".into()))].into());

        let fields = |pairs: &[(&str, &str)]| -> BTreeMap<String, String> {
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
        };

        assert!(check_supplied_fields(&role, &fields(&[("ticket", "OPS-1")])).is_ok());
        let err = check_supplied_fields(&role, &fields(&[("ticket", "OPS-1"), ("user", "root")])).unwrap_err();
        assert!(err.to_string().contains("unexpected fields: user"));

        // A role stored before required fields were checked against its data
        role.secret_required_fields.push("user".to_string());
        let err = check_supplied_fields(&role, &fields(&[("user", "root")])).unwrap_err();
        assert!(err.to_string().contains("field 'user' is set by the role"));
    }

    #[test]
    fn lease_ttl_falls_back_to_max_ttl() {
        assert_eq!(lease_ttl(&role(0, 7200), None), Duration::from_secs(7200));
        assert_eq!(lease_ttl(&role(0, 0), None), DEFAULT_SECRET_TTL);
    }
}
