//! Request: one in-flight approval round.
//!
//! Approver constraints are copied from the role when the request is opened
//! and never re-read, so an administrator editing or deleting the role does
//! not change who may approve this round.

use super::duration::deadline;
use super::role::Role;
use crate::errors::Result;
use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

/// Nonce entropy in bytes
pub const NONCE_BYTES: usize = 32;

/// Generate a fresh request nonce (hex, 256 bits from the OS CSPRNG)
pub fn generate_nonce() -> String {
    let mut bytes = [0u8; NONCE_BYTES];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Stored approval request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    pub role_name: String,
    pub nonce: String,
    pub requester_id: String,
    pub requester_roles: BTreeSet<String>,
    pub bound_approver_ids: BTreeSet<String>,
    pub bound_approver_roles: BTreeSet<String>,
    pub min_approvers: u32,
    /// Distinct approvers in arrival order
    pub approver_ids: Vec<String>,
    #[serde(default)]
    pub reasons: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Bumped on every write
    pub generation: u64,
}

impl Request {
    /// Open a request against `role`, snapshotting its approver constraints
    pub fn open(
        role_name: &str,
        role: &Role,
        requester_id: &str,
        requester_roles: BTreeSet<String>,
        now: DateTime<Utc>,
        approval_ttl: Duration,
    ) -> Result<Self> {
        Ok(Self {
            role_name: role_name.to_lowercase(),
            nonce: generate_nonce(),
            requester_id: requester_id.to_string(),
            requester_roles,
            bound_approver_ids: role.bound_approver_ids.clone(),
            bound_approver_roles: role.bound_approver_roles.clone(),
            min_approvers: role.min_approvers,
            approver_ids: Vec::new(),
            reasons: BTreeMap::new(),
            created_at: now,
            expires_at: deadline(now, approval_ttl, "approval_ttl")?,
            generation: 1,
        })
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    pub fn approval_count(&self) -> usize {
        self.approver_ids.len()
    }

    /// Sufficiency is derived, never stored
    pub fn is_approved(&self) -> bool {
        self.approval_count() >= self.min_approvers as usize
    }

    pub fn has_approved(&self, approver_id: &str) -> bool {
        self.approver_ids.iter().any(|id| id == approver_id)
    }

    /// Record an approval and push the expiry forward.
    ///
    /// Returns `true` when `approver_id` was not already counted. Nothing
    /// changes when the new expiry is out of range.
    pub fn record_approval(
        &mut self,
        approver_id: &str,
        reason: Option<&str>,
        now: DateTime<Utc>,
        approval_ttl: Duration,
    ) -> Result<bool> {
        let expires_at = deadline(now, approval_ttl, "approval_ttl")?;
        let added = !self.has_approved(approver_id);
        if added {
            self.approver_ids.push(approver_id.to_string());
        }
        if let Some(reason) = reason.filter(|r| !r.trim().is_empty()) {
            self.reasons.insert(approver_id.to_string(), reason.trim().to_string());
        }
        self.expires_at = expires_at;
        self.generation += 1;
        Ok(added)
    }

    /// Whether `identity`/`roles` satisfy the snapshotted approver bounds.
    ///
    /// Empty bound sets are unrestricted. When both sets are populated a
    /// match on either suffices.
    pub fn approver_allowed(&self, identity: &str, roles: &BTreeSet<String>) -> bool {
        bound_allows(&self.bound_approver_ids, &self.bound_approver_roles, identity, roles)
    }
}

/// Shared membership rule for requester and approver bounds
pub fn bound_allows(
    bound_ids: &BTreeSet<String>,
    bound_roles: &BTreeSet<String>,
    identity: &str,
    roles: &BTreeSet<String>,
) -> bool {
    if bound_ids.is_empty() && bound_roles.is_empty() {
        return true;
    }
    bound_ids.contains(identity) || roles.iter().any(|role| bound_roles.contains(role))
}

/// Request as returned to callers
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RequestView {
    pub role_name: String,
    pub nonce: String,
    pub requester_id: String,
    pub min_approvers: u32,
    pub approver_ids: Vec<String>,
    pub approval_count: usize,
    pub approved: bool,
    pub bound_approver_ids: BTreeSet<String>,
    pub bound_approver_roles: BTreeSet<String>,
    pub reasons: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl From<&Request> for RequestView {
    fn from(request: &Request) -> Self {
        Self {
            role_name: request.role_name.clone(),
            nonce: request.nonce.clone(),
            requester_id: request.requester_id.clone(),
            min_approvers: request.min_approvers,
            approver_ids: request.approver_ids.clone(),
            approval_count: request.approval_count(),
            approved: request.is_approved(),
            bound_approver_ids: request.bound_approver_ids.clone(),
            bound_approver_roles: request.bound_approver_roles.clone(),
            reasons: request.reasons.clone(),
            created_at: request.created_at,
            expires_at: request.expires_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ApprovalError;

    const HOUR: Duration = Duration::from_secs(3600);

    fn role() -> Role {
        Role {
            secret_path: "secret/data/k8s".to_string(),
            min_approvers: 2,
            bound_approver_roles: ["sre".to_string()].into_iter().collect(),
            ..Role::default()
        }
    }

    #[test]
    fn nonces_are_unique_hex() {
        let a = generate_nonce();
        let b = generate_nonce();
        assert_eq!(a.len(), NONCE_BYTES * 2);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[test]
    fn open_snapshots_role() {
        let now = Utc::now();
        let mut role = role();
        let request =
            Request::open("K8s-Admin", &role, "alice", BTreeSet::new(), now, HOUR).unwrap();

        role.min_approvers = 5;
        role.bound_approver_roles.clear();

        assert_eq!(request.role_name, "k8s-admin");
        assert_eq!(request.min_approvers, 2);
        assert!(request.bound_approver_roles.contains("sre"));
        assert_eq!(request.expires_at, now + chrono::Duration::hours(1));
        assert!(!request.is_approved());
    }

    #[test]
    fn duplicate_approval_counts_once_but_extends_expiry() {
        let start = Utc::now();
        let ttl = Duration::from_secs(600);
        let mut request = Request::open("r", &role(), "alice", BTreeSet::new(), start, ttl).unwrap();

        assert!(request.record_approval("bob", Some("on call"), start, ttl).unwrap());
        let later = start + chrono::Duration::minutes(5);
        assert!(!request.record_approval("bob", None, later, ttl).unwrap());

        assert_eq!(request.approval_count(), 1);
        assert_eq!(request.expires_at, later + chrono::Duration::minutes(10));
        assert_eq!(request.reasons.get("bob").map(String::as_str), Some("on call"));
        assert_eq!(request.generation, 3);
    }

    #[test]
    fn expiry_is_strict() {
        let now = Utc::now();
        let request =
            Request::open("r", &role(), "alice", BTreeSet::new(), now, Duration::from_secs(600)).unwrap();
        assert!(!request.is_expired(now + chrono::Duration::minutes(10)));
        assert!(request.is_expired(now + chrono::Duration::minutes(11)));
    }

    #[test]
    fn out_of_range_window_is_rejected() {
        let now = Utc::now();
        let huge = Duration::from_secs(1_000_000_000_000_000);
        let err = Request::open("r", &role(), "alice", BTreeSet::new(), now, huge).unwrap_err();
        assert!(matches!(err, ApprovalError::Invalid { .. }));

        let mut request = Request::open("r", &role(), "alice", BTreeSet::new(), now, HOUR).unwrap();
        let before = request.clone();
        assert!(request.record_approval("bob", None, now, huge).is_err());
        assert_eq!(request, before);
    }

    #[test]
    fn bounds() {
        let empty = BTreeSet::new();
        let sre: BTreeSet<String> = ["sre".to_string()].into_iter().collect();
        let ops: BTreeSet<String> = ["ops".to_string()].into_iter().collect();
        let ids: BTreeSet<String> = ["carol".to_string()].into_iter().collect();

        assert!(bound_allows(&empty, &empty, "anyone", &empty));
        assert!(bound_allows(&empty, &sre, "bob", &sre));
        assert!(!bound_allows(&empty, &sre, "dave", &ops));
        assert!(bound_allows(&ids, &sre, "carol", &ops));
    }
}
