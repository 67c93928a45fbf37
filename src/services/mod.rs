//! # Workflow Services
//!
//! Each service owns one step of the approval workflow:
//!
//! - [`ConfigService`]: backend configuration singleton
//! - [`RoleRegistry`]: approval policies
//! - [`RequestLedger`]: opening, reading and listing requests
//! - [`ApprovalEngine`]: recording approvals
//! - [`IssuanceEngine`]: exchanging an approved request for a secret
//! - [`LeaseRevocation`]: host callbacks at lease end
//! - [`renewer`]: background service-token renewal and request sweep

pub mod approval;
pub mod config_service;
pub mod issuance;
pub mod ledger;
pub mod renewer;
pub mod revocation;
pub mod roles;

pub use approval::ApprovalEngine;
pub use config_service::ConfigService;
pub use issuance::{IssueParams, IssuedSecret, IssuanceEngine};
pub use ledger::{OpenedRequest, RequestLedger};
pub use renewer::{Renewer, RenewerHandle};
pub use revocation::{LeaseHandle, LeaseKind, LeaseRevocation};
pub use roles::RoleRegistry;

use crate::clock::Clock;
use crate::identity::IdentityResolver;
use crate::notify::Notifier;
use crate::secrets::{DownstreamSecretSource, TokenBroker};
use crate::storage::{Accessor, KeyLocks, Storage};
use std::sync::Arc;

/// The four storage namespaces, sharing one lock registry
#[derive(Debug, Clone)]
pub struct Stores {
    pub config: Accessor,
    pub roles: Accessor,
    pub requests: Accessor,
    pub issues: Accessor,
}

impl Stores {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        let locks = Arc::new(KeyLocks::new());
        Self {
            config: Accessor::new(Arc::clone(&storage), Arc::clone(&locks), "config"),
            roles: Accessor::new(Arc::clone(&storage), Arc::clone(&locks), "role"),
            requests: Accessor::new(Arc::clone(&storage), Arc::clone(&locks), "request"),
            issues: Accessor::new(storage, locks, "issue"),
        }
    }
}

/// External collaborators of the workflow
#[derive(Clone)]
pub struct Collaborators {
    pub resolver: Arc<dyn IdentityResolver>,
    pub source: Arc<dyn DownstreamSecretSource>,
    pub broker: Arc<dyn TokenBroker>,
    pub notifier: Arc<dyn Notifier>,
    pub clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators").field("clock", &self.clock).finish_non_exhaustive()
    }
}
