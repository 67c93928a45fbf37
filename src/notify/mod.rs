//! # Issue Notifications
//!
//! Posts a message to every Slack channel listed on a role when a secret is
//! issued. Whether a failed post aborts issuance is decided by the caller
//! according to [`crate::domain::NotificationPolicy`].

use crate::errors::{ApprovalError, Result};
use crate::secrets::SecretString;
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;

/// One message for one channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub channel: String,
    pub text: String,
}

impl Notification {
    pub fn issued(channel: &str, role_name: &str, requester: &str, approvers: &[String]) -> Self {
        Self {
            channel: channel.to_string(),
            text: format!(
                "approved-secrets: `{}` was issued the secret of role `{}` (approved by {})",
                requester,
                role_name,
                approvers.join(", ")
            ),
        }
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, webhook_url: &SecretString, notification: &Notification) -> Result<()>;
}

/// Slack incoming-webhook client
#[derive(Debug, Clone)]
pub struct SlackNotifier {
    client: reqwest::Client,
}

impl Default for SlackNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl SlackNotifier {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { client }
    }
}

#[derive(Serialize)]
struct SlackPayload<'a> {
    channel: &'a str,
    text: &'a str,
    username: &'static str,
}

#[async_trait]
impl Notifier for SlackNotifier {
    async fn notify(&self, webhook_url: &SecretString, notification: &Notification) -> Result<()> {
        let payload = SlackPayload {
            channel: &notification.channel,
            text: &notification.text,
            username: "approved-secrets",
        };

        let response = self
            .client
            .post(webhook_url.expose_secret())
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                // The webhook URL is a credential; keep it out of the error.
                ApprovalError::upstream(
                    "notify",
                    format!("slack channel {}", notification.channel),
                    e.without_url().to_string(),
                )
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ApprovalError::upstream(
                "notify",
                format!("slack channel {}", notification.channel),
                format!("status {}", status.as_u16()),
            ));
        }

        tracing::info!(channel = %notification.channel, "Slack notification sent");
        Ok(())
    }
}
