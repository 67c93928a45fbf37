//! Backend configuration singleton.

use super::Stores;
use crate::domain::{BackendConfig, ConfigInput, ConfigView};
use crate::errors::{ApprovalError, Result};
use crate::secrets::{ServiceCredentials, TokenBroker};
use std::sync::Arc;
use tracing::instrument;

const CONFIG_KEY: &str = "backend";

#[derive(Clone)]
pub struct ConfigService {
    stores: Stores,
    broker: Arc<dyn TokenBroker>,
}

impl std::fmt::Debug for ConfigService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigService").finish_non_exhaustive()
    }
}

impl ConfigService {
    pub fn new(stores: Stores, broker: Arc<dyn TokenBroker>) -> Self {
        Self { stores, broker }
    }

    /// Merge `input` into the stored config.
    ///
    /// A newly supplied `vault_token` is exchanged for an orphan service
    /// token carrying `vault_policies`; only the service token is stored.
    #[instrument(skip(self, input))]
    pub async fn write(&self, input: ConfigInput) -> Result<ConfigView> {
        let _guard = self.stores.config.lock(&[CONFIG_KEY]).await;

        let existing = self.stores.config.get::<BackendConfig>(&[CONFIG_KEY]).await?;
        let new_token = input.vault_token.is_some();
        let mut config = input.apply(existing)?;

        if new_token {
            let service_token = self
                .broker
                .exchange(&config.vault_addr, &config.vault_token, &config.vault_policies)
                .await?;
            config.vault_token = service_token;
        }

        self.stores.config.put(&[CONFIG_KEY], &config).await?;

        tracing::info!(
            vault_addr = %config.vault_addr,
            approval_ttl_seconds = config.approval_ttl,
            notification_failure_policy = ?config.notification_failure_policy,
            "Backend configuration updated"
        );
        Ok(config.view())
    }

    /// Stored config with credentials redacted
    pub async fn read(&self) -> Result<Option<ConfigView>> {
        Ok(self.load_optional().await?.map(|config| config.view()))
    }

    pub async fn load_optional(&self) -> Result<Option<BackendConfig>> {
        self.stores.config.get::<BackendConfig>(&[CONFIG_KEY]).await
    }

    /// Stored config, or an error when the backend was never configured
    pub async fn load(&self) -> Result<BackendConfig> {
        self.load_optional()
            .await?
            .ok_or_else(|| ApprovalError::invalid("backend is not configured: write config first"))
    }

    pub async fn service_credentials(&self) -> Result<ServiceCredentials> {
        let config = self.load().await?;
        Ok(credentials_of(&config))
    }
}

pub(crate) fn credentials_of(config: &BackendConfig) -> ServiceCredentials {
    ServiceCredentials { vault_addr: config.vault_addr.clone(), token: config.vault_token.clone() }
}
