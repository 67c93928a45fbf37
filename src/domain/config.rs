//! Backend configuration singleton, written by an administrator.

use super::duration::DurationInput;
use crate::errors::{ApprovalError, Result};
use crate::secrets::types::{exposed, exposed_opt, SecretString, SENSITIVE_PLACEHOLDER};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_APPROVAL_TTL: Duration = Duration::from_secs(3600);
/// Longest approval window an administrator may configure
pub const MAX_APPROVAL_TTL: Duration = Duration::from_secs(31 * 24 * 3600);
pub const DEFAULT_VAULT_ADDR: &str = "http://127.0.0.1:8200";

/// What a failed Slack notification does to an issue call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum NotificationPolicy {
    /// Abort issuance, leaving the request in place for a retry
    #[default]
    FailClosed,
    /// Log and carry on
    BestEffort,
}

/// Stored configuration. Credentials are persisted in clear through the
/// `exposed` adapters and redacted everywhere else.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Seconds
    pub approval_ttl: u64,
    pub vault_addr: String,
    #[serde(with = "exposed")]
    pub vault_token: SecretString,
    #[serde(default)]
    pub vault_policies: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity_template: Option<String>,
    #[serde(with = "exposed_opt", default, skip_serializing_if = "Option::is_none")]
    pub slack_webhook_url: Option<SecretString>,
    #[serde(default)]
    pub notification_failure_policy: NotificationPolicy,
    #[serde(default)]
    pub allow_self_approval: bool,
}

impl BackendConfig {
    pub fn approval_ttl(&self) -> Duration {
        Duration::from_secs(self.approval_ttl)
    }

    pub fn view(&self) -> ConfigView {
        ConfigView {
            approval_ttl: self.approval_ttl,
            vault_addr: self.vault_addr.clone(),
            vault_token: SENSITIVE_PLACEHOLDER.to_string(),
            vault_policies: self.vault_policies.clone(),
            identity_template: self.identity_template.clone().unwrap_or_default(),
            slack_webhook_url: self
                .slack_webhook_url
                .as_ref()
                .map(|_| SENSITIVE_PLACEHOLDER.to_string())
                .unwrap_or_default(),
            notification_failure_policy: self.notification_failure_policy,
            allow_self_approval: self.allow_self_approval,
        }
    }
}

/// Configuration as echoed back on read
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConfigView {
    pub approval_ttl: u64,
    pub vault_addr: String,
    pub vault_token: String,
    pub vault_policies: Vec<String>,
    pub identity_template: String,
    pub slack_webhook_url: String,
    pub notification_failure_policy: NotificationPolicy,
    pub allow_self_approval: bool,
}

/// Configuration write payload
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigInput {
    pub approval_ttl: Option<DurationInput>,
    pub vault_addr: Option<String>,
    pub vault_token: Option<SecretString>,
    pub vault_policies: Option<Vec<String>>,
    pub identity_template: Option<String>,
    pub slack_webhook_url: Option<SecretString>,
    pub notification_failure_policy: Option<NotificationPolicy>,
    pub allow_self_approval: Option<bool>,
}

impl ConfigInput {
    /// Merge onto the stored config. `vault_token` is required when nothing
    /// is stored yet.
    pub fn apply(self, existing: Option<BackendConfig>) -> Result<BackendConfig> {
        let token = match (self.vault_token, existing.as_ref()) {
            (Some(token), _) if !token.is_empty() => token,
            (None, Some(current)) => current.vault_token.clone(),
            _ => {
                return Err(ApprovalError::invalid_field("vault_token is required", "vault_token"))
            }
        };

        let mut config = existing.unwrap_or_else(|| BackendConfig {
            approval_ttl: DEFAULT_APPROVAL_TTL.as_secs(),
            vault_addr: DEFAULT_VAULT_ADDR.to_string(),
            vault_token: token.clone(),
            vault_policies: Vec::new(),
            identity_template: None,
            slack_webhook_url: None,
            notification_failure_policy: NotificationPolicy::default(),
            allow_self_approval: false,
        });
        config.vault_token = token;

        if let Some(ttl) = self.approval_ttl {
            let ttl = ttl.to_duration_at_most("approval_ttl", MAX_APPROVAL_TTL)?;
            if ttl.is_zero() {
                return Err(ApprovalError::invalid_field(
                    "approval_ttl must be greater than zero",
                    "approval_ttl",
                ));
            }
            config.approval_ttl = ttl.as_secs();
        }
        if let Some(addr) = self.vault_addr {
            if !(addr.starts_with("http://") || addr.starts_with("https://")) {
                return Err(ApprovalError::invalid_field(
                    "vault_addr must be an http(s) URL",
                    "vault_addr",
                ));
            }
            config.vault_addr = addr.trim_end_matches('/').to_string();
        }
        if let Some(policies) = self.vault_policies {
            config.vault_policies = split_policies(policies);
        }
        if let Some(template) = self.identity_template {
            let template = template.trim().to_string();
            config.identity_template = if template.is_empty() { None } else { Some(template) };
        }
        if let Some(url) = self.slack_webhook_url {
            config.slack_webhook_url = if url.is_empty() { None } else { Some(url) };
        }
        if let Some(policy) = self.notification_failure_policy {
            config.notification_failure_policy = policy;
        }
        if let Some(allow) = self.allow_self_approval {
            config.allow_self_approval = allow;
        }

        Ok(config)
    }
}

/// Accepts `["a", "b"]` as well as `["a,b"]`
fn split_policies(values: Vec<String>) -> Vec<String> {
    values
        .iter()
        .flat_map(|v| v.split(','))
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .collect()
}
