//! # Approved Secrets Backend
//!
//! Wires the workflow services over one storage handle and owns the
//! background renewer.

use crate::config::{HousekeepingConfig, MountConfig};
use crate::errors::Result;
use crate::services::{
    ApprovalEngine, Collaborators, ConfigService, IssuanceEngine, LeaseRevocation, Renewer,
    RenewerHandle, RequestLedger, RoleRegistry, Stores,
};
use crate::storage::Storage;
use std::sync::Arc;
use tokio::sync::Mutex;

pub struct ApprovedSecretsBackend {
    pub config: ConfigService,
    pub roles: RoleRegistry,
    pub ledger: RequestLedger,
    pub approvals: ApprovalEngine,
    pub issuance: IssuanceEngine,
    pub leases: LeaseRevocation,
    stores: Stores,
    deps: Collaborators,
    housekeeping: HousekeepingConfig,
    renewer: Mutex<Option<RenewerHandle>>,
}

impl std::fmt::Debug for ApprovedSecretsBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApprovedSecretsBackend")
            .field("housekeeping", &self.housekeeping)
            .finish_non_exhaustive()
    }
}

impl ApprovedSecretsBackend {
    pub fn new(
        storage: Arc<dyn Storage>,
        deps: Collaborators,
        housekeeping: HousekeepingConfig,
        mount: MountConfig,
    ) -> Self {
        let stores = Stores::new(storage);
        let config = ConfigService::new(stores.clone(), Arc::clone(&deps.broker));
        let roles = RoleRegistry::new(stores.clone(), mount.max_lease_ttl());
        let ledger =
            RequestLedger::new(stores.clone(), config.clone(), roles.clone(), deps.clone());
        let approvals = ApprovalEngine::new(stores.clone(), config.clone(), deps.clone());
        let issuance =
            IssuanceEngine::new(stores.clone(), config.clone(), roles.clone(), deps.clone());
        let leases = LeaseRevocation::new(stores.clone(), config.clone(), deps.clone());

        Self {
            config,
            roles,
            ledger,
            approvals,
            issuance,
            leases,
            stores,
            deps,
            housekeeping,
            renewer: Mutex::new(None),
        }
    }

    /// Start the background renewer. Calling it twice keeps the first one.
    pub async fn start(&self) {
        let mut slot = self.renewer.lock().await;
        if slot.is_some() {
            return;
        }
        let renewer = Renewer::new(
            self.config.clone(),
            self.ledger.clone(),
            Arc::clone(&self.deps.broker),
            self.housekeeping.clone(),
        );
        *slot = Some(renewer.spawn());
    }

    pub async fn stop(&self) {
        let handle = self.renewer.lock().await.take();
        if let Some(handle) = handle {
            handle.stop().await;
        }
    }

    pub async fn is_running(&self) -> bool {
        self.renewer.lock().await.is_some()
    }

    /// Storage round trip used by the health endpoint
    pub async fn check_storage(&self) -> Result<()> {
        self.stores.config.list(&[]).await.map(|_| ())
    }
}
