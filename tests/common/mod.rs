//! Common test utilities for all integration tests.
//!
//! In-memory fakes for the downstream collaborators and a harness that wires
//! them into a backend driven by a manual clock.

#![allow(dead_code)]
#![allow(clippy::duplicate_mod)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use approved_secrets::clock::ManualClock;
use approved_secrets::config::{HousekeepingConfig, MountConfig};
use approved_secrets::domain::{ConfigInput, RoleInput};
use approved_secrets::errors::{ApprovalError, Result};
use approved_secrets::identity::{CallerContext, EntityIdentityResolver};
use approved_secrets::notify::{Notification, Notifier};
use approved_secrets::secrets::{
    DownstreamCall, DownstreamSecret, DownstreamSecretSource, ScopedToken, ScopedTokenRequest,
    SecretString, ServiceCredentials, TokenBroker,
};
use approved_secrets::services::Collaborators;
use approved_secrets::storage::{InMemoryStorage, Storage};
use approved_secrets::ApprovedSecretsBackend;
use async_trait::async_trait;
use chrono::{TimeZone, Utc};

pub const LDAP_ACCESSOR: &str = "auth_ldap_1234";

/// Caller with a single LDAP alias and the given group roles
pub fn caller(name: &str, roles: &[&str]) -> CallerContext {
    CallerContext::with_alias(&format!("entity-{}", name), LDAP_ACCESSOR, name)
        .with_roles(roles.iter().copied())
}

pub fn role_input(value: serde_json::Value) -> RoleInput {
    serde_json::from_value(value).expect("valid role input")
}

pub fn config_input(value: serde_json::Value) -> ConfigInput {
    serde_json::from_value(value).expect("valid config input")
}

#[derive(Debug, Default)]
pub struct FakeBroker {
    pub exchanged: Mutex<Vec<Vec<String>>>,
    pub scoped: Mutex<Vec<ScopedTokenRequest>>,
    pub renewals: AtomicUsize,
    pub fail_renew: AtomicBool,
    counter: AtomicUsize,
}

#[async_trait]
impl TokenBroker for FakeBroker {
    async fn exchange(
        &self,
        _vault_addr: &str,
        _admin_token: &SecretString,
        policies: &[String],
    ) -> Result<SecretString> {
        self.exchanged.lock().unwrap().push(policies.to_vec());
        Ok(SecretString::new("s.service-token"))
    }

    async fn scoped_token(
        &self,
        _service: &ServiceCredentials,
        request: &ScopedTokenRequest,
    ) -> Result<ScopedToken> {
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        self.scoped.lock().unwrap().push(request.clone());
        Ok(ScopedToken {
            token: SecretString::new(format!("s.scoped-{}", n)),
            accessor: format!("accessor-{}", n),
            policies: request.policies.clone(),
            lease_duration: request.ttl.unwrap_or(Duration::from_secs(300)),
        })
    }

    async fn renew_self(&self, _service: &ServiceCredentials, _increment: Duration) -> Result<()> {
        self.renewals.fetch_add(1, Ordering::SeqCst);
        if self.fail_renew.load(Ordering::SeqCst) {
            return Err(ApprovalError::upstream("renew-self", "vault", "status 403: permission denied"));
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct FakeSource {
    pub calls: Mutex<Vec<DownstreamCall>>,
    pub revoked: Mutex<Vec<String>>,
    pub fail: AtomicBool,
}

impl FakeSource {
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl DownstreamSecretSource for FakeSource {
    async fn invoke(&self, call: &DownstreamCall) -> Result<DownstreamSecret> {
        self.calls.lock().unwrap().push(call.clone());
        if self.fail.load(Ordering::SeqCst) {
            return Err(ApprovalError::upstream("read", call.path.clone(), "status 503: sealed"));
        }
        let mut data = serde_json::Map::new();
        data.insert("kubeconfig".to_string(), serde_json::Value::String("top-secret".into()));
        Ok(DownstreamSecret { data, token_accessor: None })
    }

    async fn revoke_token(&self, _service: &ServiceCredentials, accessor: &str) -> Result<()> {
        self.revoked.lock().unwrap().push(accessor.to_string());
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct FakeNotifier {
    pub sent: Mutex<Vec<Notification>>,
    pub fail: AtomicBool,
}

#[async_trait]
impl Notifier for FakeNotifier {
    async fn notify(&self, _webhook_url: &SecretString, notification: &Notification) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(ApprovalError::upstream("notify", "slack channel", "status 500"));
        }
        self.sent.lock().unwrap().push(notification.clone());
        Ok(())
    }
}

/// Storage that fails writes or deletes under a chosen key prefix
#[derive(Default)]
pub struct FaultyStorage {
    pub inner: Arc<InMemoryStorage>,
    pub fail_put: Mutex<Option<String>>,
    pub fail_delete: Mutex<Option<String>>,
}

impl FaultyStorage {
    fn refuses(rule: &Mutex<Option<String>>, key: &str) -> bool {
        rule.lock().unwrap().as_deref().is_some_and(|prefix| key.starts_with(prefix))
    }
}

#[async_trait]
impl Storage for FaultyStorage {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.inner.get(key).await
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<()> {
        if Self::refuses(&self.fail_put, key) {
            return Err(ApprovalError::storage(format!("put {} refused", key)));
        }
        self.inner.put(key, value).await
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        self.inner.list(prefix).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        if Self::refuses(&self.fail_delete, key) {
            return Err(ApprovalError::storage(format!("delete {} refused", key)));
        }
        self.inner.delete(key).await
    }
}

pub struct Harness {
    pub backend: Arc<ApprovedSecretsBackend>,
    pub clock: ManualClock,
    pub broker: Arc<FakeBroker>,
    pub source: Arc<FakeSource>,
    pub notifier: Arc<FakeNotifier>,
    pub storage: Arc<InMemoryStorage>,
    pub faults: Arc<FaultyStorage>,
}

impl Harness {
    /// Backend with a 10 minute approval window and no roles
    pub async fn new() -> Self {
        let harness = Self::unconfigured();
        harness
            .backend
            .config
            .write(config_input(serde_json::json!({
                "vault_token": "root",
                "vault_policies": ["approved-secrets"],
                "approval_ttl": "10m",
                "slack_webhook_url": "https://hooks.slack.test/services/T0/B0/X",
            })))
            .await
            .expect("configure backend");
        harness
    }

    pub fn unconfigured() -> Self {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap());
        let broker = Arc::new(FakeBroker::default());
        let source = Arc::new(FakeSource::default());
        let notifier = Arc::new(FakeNotifier::default());
        let storage = Arc::new(InMemoryStorage::new());
        let faults = Arc::new(FaultyStorage { inner: storage.clone(), ..FaultyStorage::default() });

        let deps = Collaborators {
            resolver: Arc::new(EntityIdentityResolver::new()),
            source: source.clone(),
            broker: broker.clone(),
            notifier: notifier.clone(),
            clock: Arc::new(clock.clone()),
        };

        let backend = Arc::new(ApprovedSecretsBackend::new(
            faults.clone() as Arc<dyn Storage>,
            deps,
            HousekeepingConfig::default(),
            MountConfig::default(),
        ));

        Self { backend, clock, broker, source, notifier, storage, faults }
    }

    /// The `k8s-admin` role used throughout: two approvers from `sre`
    pub async fn k8s_admin_role(&self) {
        self.backend
            .roles
            .put(
                "k8s-admin",
                role_input(serde_json::json!({
                    "secret_path": "secret/data/k8s/admin",
                    "min_approvers": 2,
                    "bound_approver_roles": ["sre"],
                    "secret_ttl": "1h",
                    "notify_slack_channels": ["#security"],
                })),
            )
            .await
            .expect("store k8s-admin role");
    }

    pub fn advance_minutes(&self, minutes: i64) {
        self.clock.advance(chrono::Duration::minutes(minutes));
    }
}
