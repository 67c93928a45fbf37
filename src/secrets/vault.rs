//! HashiCorp Vault adapter.
//!
//! Implements both [`DownstreamSecretSource`] and [`TokenBroker`] against the
//! Vault HTTP API. Generic logical reads and writes go through `reqwest`;
//! token self-renewal and health checks use `vaultrs`.
//!
//! Scoped tokens follow a create-role/create-token/delete-role sequence. The
//! temporary token role is named after the request nonce, so a retried issue
//! call overwrites the same role instead of leaking a new one.
//!
//! # Security
//!
//! - Tokens are never logged
//! - Error messages carry the HTTP status and Vault's error list, never
//!   request or response bodies

use super::source::{
    DownstreamCall, DownstreamSecret, DownstreamSecretSource, ScopedToken, ScopedTokenRequest,
    ServiceCredentials, TokenBroker,
};
use super::types::SecretString;
use crate::domain::SecretPathMethod;
use crate::errors::{ApprovalError, Result};
use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::time::Duration;
use vaultrs::client::{VaultClient, VaultClientSettingsBuilder};

const TOKEN_HEADER: &str = "X-Vault-Token";
const SERVICE_TOKEN_TTL: &str = "72h";
const SERVICE_TOKEN_DISPLAY_NAME: &str = "approved-secrets-plugin";
const TOKEN_ROLE_PREFIX: &str = "approved-secrets";

#[derive(Debug, Deserialize)]
struct VaultResponse {
    #[serde(default)]
    data: Option<Map<String, Value>>,
    #[serde(default)]
    auth: Option<VaultAuth>,
}

#[derive(Debug, Deserialize)]
struct VaultAuth {
    client_token: String,
    #[serde(default)]
    accessor: String,
    #[serde(default)]
    policies: Vec<String>,
    #[serde(default)]
    lease_duration: u64,
}

#[derive(Debug, Deserialize)]
struct VaultErrors {
    #[serde(default)]
    errors: Vec<String>,
}

/// Vault adapter shared by all requests
#[derive(Debug, Clone)]
pub struct VaultAdapter {
    http: reqwest::Client,
}

impl Default for VaultAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl VaultAdapter {
    pub fn new() -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { http }
    }

    fn vaultrs_client(&self, service: &ServiceCredentials) -> Result<VaultClient> {
        let mut settings_builder = VaultClientSettingsBuilder::default();
        settings_builder.address(&service.vault_addr);
        settings_builder.token(service.token.expose_secret());

        let settings = settings_builder.build().map_err(|e| {
            ApprovalError::config(format!("Invalid Vault configuration: {}", e))
        })?;

        VaultClient::new(settings).map_err(|e| {
            ApprovalError::upstream("connect", &service.vault_addr, e.to_string())
        })
    }

    /// Check that the configured Vault answers
    pub async fn health(&self, service: &ServiceCredentials) -> Result<()> {
        let client = self.vaultrs_client(service)?;
        vaultrs::sys::health(&client).await.map_err(|e| {
            tracing::error!(error = %e, address = %service.vault_addr, "Vault health check failed");
            ApprovalError::upstream("health", &service.vault_addr, e.to_string())
        })?;
        Ok(())
    }

    /// One call against `{addr}/v1/{path}`. `Ok(None)` for empty responses.
    async fn logical(
        &self,
        addr: &str,
        token: &SecretString,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Option<VaultResponse>> {
        let url = format!("{}/v1/{}", addr.trim_end_matches('/'), path.trim_start_matches('/'));
        let operation = method.to_string();

        let mut request =
            self.http.request(method, &url).header(TOKEN_HEADER, token.expose_secret());
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(|e| {
            ApprovalError::upstream(&operation, path, format!("request failed: {}", e.without_url()))
        })?;

        let status = response.status();
        if status == StatusCode::NO_CONTENT {
            return Ok(None);
        }

        let bytes = response.bytes().await.map_err(|e| {
            ApprovalError::upstream(&operation, path, format!("reading response failed: {}", e))
        })?;

        if !status.is_success() {
            let errors = serde_json::from_slice::<VaultErrors>(&bytes)
                .map(|e| e.errors.join("; "))
                .unwrap_or_default();
            tracing::warn!(operation = %operation, path = %path, status = status.as_u16(), "Vault call failed");
            return Err(ApprovalError::upstream(
                operation,
                path,
                format!("status {}: {}", status.as_u16(), errors),
            ));
        }

        if bytes.is_empty() {
            return Ok(None);
        }

        let parsed = serde_json::from_slice(&bytes).map_err(|e| {
            ApprovalError::upstream(&operation, path, format!("malformed response: {}", e))
        })?;
        Ok(Some(parsed))
    }

    fn auth_of(response: Option<VaultResponse>, operation: &str, path: &str) -> Result<VaultAuth> {
        response
            .and_then(|r| r.auth)
            .ok_or_else(|| ApprovalError::upstream(operation, path, "response carried no token"))
    }
}

#[async_trait]
impl DownstreamSecretSource for VaultAdapter {
    async fn invoke(&self, call: &DownstreamCall) -> Result<DownstreamSecret> {
        let (method, body) = match call.method {
            SecretPathMethod::Get => (Method::GET, None),
            SecretPathMethod::Post => {
                (Method::POST, Some(Value::Object(call.data.clone().unwrap_or_default())))
            }
        };

        tracing::debug!(
            method = %call.method,
            path = %call.path,
            idempotency_key = %call.idempotency_key,
            "Invoking downstream secret path"
        );

        let response =
            self.logical(&call.address, &call.token, method, &call.path, body.as_ref()).await?;

        let Some(response) = response else {
            return Ok(DownstreamSecret::default());
        };
        let token_accessor = response.auth.as_ref().map(|auth| auth.accessor.clone());
        let mut data = response.data.unwrap_or_default();
        if let Some(auth) = response.auth {
            data.insert("token".to_string(), Value::String(auth.client_token));
            data.insert("accessor".to_string(), Value::String(auth.accessor));
            data.insert("policies".to_string(), json!(auth.policies));
        }
        Ok(DownstreamSecret { data, token_accessor })
    }

    async fn revoke_token(&self, service: &ServiceCredentials, accessor: &str) -> Result<()> {
        let path = "auth/token/revoke-accessor";
        let body = json!({ "accessor": accessor });
        match self.logical(&service.vault_addr, &service.token, Method::POST, path, Some(&body)).await {
            Ok(_) => Ok(()),
            // Vault answers 400 for accessors that no longer exist.
            Err(ApprovalError::Upstream { message, .. }) if message.starts_with("status 400") => {
                tracing::debug!("Token accessor already revoked");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl TokenBroker for VaultAdapter {
    async fn exchange(
        &self,
        vault_addr: &str,
        admin_token: &SecretString,
        policies: &[String],
    ) -> Result<SecretString> {
        let path = "auth/token/create-orphan";
        let body = json!({
            "policies": policies,
            "ttl": SERVICE_TOKEN_TTL,
            "renewable": true,
            "display_name": SERVICE_TOKEN_DISPLAY_NAME,
        });

        let response = self.logical(vault_addr, admin_token, Method::POST, path, Some(&body)).await?;
        let auth = Self::auth_of(response, "POST", path)?;

        tracing::info!(policies = ?policies, "Created orphan service token");
        Ok(SecretString::new(auth.client_token))
    }

    async fn scoped_token(
        &self,
        service: &ServiceCredentials,
        request: &ScopedTokenRequest,
    ) -> Result<ScopedToken> {
        let role_name = format!("{}-{}", TOKEN_ROLE_PREFIX, request.idempotency_key.to_lowercase());
        let role_path = format!("auth/token/roles/{}", role_name);
        let entity_alias = request.entity_alias.to_lowercase();

        let role_body = json!({
            "allowed_policies": request.policies,
            "allowed_entity_aliases": entity_alias,
            "orphan": true,
            "renewable": false,
        });
        self.logical(&service.vault_addr, &service.token, Method::POST, &role_path, Some(&role_body))
            .await?;

        let mut token_body = request.extra.clone();
        token_body.insert("policies".to_string(), json!(request.policies));
        token_body.insert("display_name".to_string(), Value::String(entity_alias.clone()));
        token_body.insert("entity_alias".to_string(), Value::String(entity_alias.clone()));
        if let Some(ttl) = request.ttl {
            token_body.insert("ttl".to_string(), Value::String(format!("{}s", ttl.as_secs())));
        }

        let create_path = format!("auth/token/create/{}", role_name);
        let created = self
            .logical(
                &service.vault_addr,
                &service.token,
                Method::POST,
                &create_path,
                Some(&Value::Object(token_body)),
            )
            .await;

        // The role is single-use; drop it whatever happened above.
        if let Err(e) = self
            .logical(&service.vault_addr, &service.token, Method::DELETE, &role_path, None)
            .await
        {
            tracing::warn!(error = %e, role = %role_name, "Failed to delete temporary token role");
        }

        let auth = Self::auth_of(created?, "POST", &create_path)?;
        Ok(ScopedToken {
            token: SecretString::new(auth.client_token),
            accessor: auth.accessor,
            policies: auth.policies,
            lease_duration: Duration::from_secs(auth.lease_duration),
        })
    }

    async fn renew_self(&self, service: &ServiceCredentials, increment: Duration) -> Result<()> {
        let client = self.vaultrs_client(service)?;
        let increment = format!("{}s", increment.as_secs());
        vaultrs::token::renew_self(&client, Some(increment.as_str())).await.map_err(|e| {
            ApprovalError::upstream("renew-self", &service.vault_addr, e.to_string())
        })?;
        Ok(())
    }
}
