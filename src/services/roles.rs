//! Role registry: CRUD over approval policies.
//!
//! Deleting or editing a role never touches requests already opened against
//! it; those carry their own snapshot.

use super::Stores;
use crate::domain::{validate_role_name, Role, RoleInput};
use crate::errors::{ApprovalError, Result};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::instrument;

#[derive(Debug, Clone)]
pub struct RoleRegistry {
    stores: Stores,
    mount_max_ttl: Duration,
}

impl RoleRegistry {
    pub fn new(stores: Stores, mount_max_ttl: Duration) -> Self {
        Self { stores, mount_max_ttl }
    }

    /// Create or update `name`. Returns the stored role and any warnings
    /// (e.g. `secret_max_ttl` clamped to the mount ceiling).
    #[instrument(skip(self, input), fields(role = %name))]
    pub async fn put(&self, name: &str, input: RoleInput) -> Result<(Role, Vec<String>)> {
        validate_role_name(name)?;
        let _guard = self.stores.roles.lock(&[name]).await;

        let existing = self.stores.roles.get::<Role>(&[name]).await?;
        let created = existing.is_none();
        let (role, warnings) = input.apply(existing, self.mount_max_ttl)?;

        for warning in &warnings {
            tracing::warn!(role = %name, warning = %warning, "Role write adjusted");
        }

        self.stores.roles.put(&[name], &role).await?;
        tracing::info!(
            role = %name,
            created,
            min_approvers = role.min_approvers,
            exclusive_lease = role.exclusive_lease,
            "Role stored"
        );
        Ok((role, warnings))
    }

    pub async fn get(&self, name: &str) -> Result<Role> {
        self.find(name).await?.ok_or_else(|| ApprovalError::not_found("role", name))
    }

    pub async fn find(&self, name: &str) -> Result<Option<Role>> {
        self.stores.roles.get::<Role>(&[name]).await
    }

    pub async fn list(&self) -> Result<Vec<String>> {
        self.stores.roles.list(&[]).await
    }

    #[instrument(skip(self), fields(role = %name))]
    pub async fn delete(&self, name: &str) -> Result<()> {
        let _guard = self.stores.roles.lock(&[name]).await;
        self.stores.roles.delete(&[name]).await?;
        tracing::info!(role = %name, "Role deleted");
        Ok(())
    }

    /// Every role whose `bound_requester_roles` contains `bound_requester_role`,
    /// or every role when no filter is given.
    pub async fn overview(&self, bound_requester_role: Option<&str>) -> Result<BTreeMap<String, Role>> {
        let filter = bound_requester_role.map(|r| r.trim().to_lowercase()).filter(|r| !r.is_empty());

        let mut roles = BTreeMap::new();
        for name in self.list().await? {
            let Some(role) = self.find(&name).await? else {
                continue;
            };
            let include = match &filter {
                Some(wanted) => role.bound_requester_roles.contains(wanted),
                None => true,
            };
            if include {
                roles.insert(name, role);
            }
        }
        Ok(roles)
    }
}
