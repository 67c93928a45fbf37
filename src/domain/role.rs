//! Role: a named approval policy binding a downstream secret target to its
//! approval rules.

use super::duration::DurationInput;
use super::secret_data::SecretData;
use crate::errors::{ApprovalError, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;
use validator::Validate;

pub const DEFAULT_SECRET_TTL: Duration = Duration::from_secs(8 * 3600);
pub const DEFAULT_SECRET_MAX_TTL: Duration = Duration::from_secs(12 * 3600);
/// Hard ceiling on any role TTL, independent of the mount
pub const MAX_SECRET_TTL: Duration = Duration::from_secs(3650 * 24 * 3600);

/// Payload keys the backend fills in itself
pub const RESERVED_FIELDS: &[&str] = &["ttl", "policies", "display_name", "entity_alias"];

/// `secret_type` value that issues a Vault token instead of touching a path
pub const SECRET_TYPE_VAULT_TOKEN: &str = "vault-token";

static ROLE_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\w([\w.-]*\w)?$").expect("role name regex is valid"));

/// HTTP method used against `secret_path`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum SecretPathMethod {
    #[default]
    Get,
    Post,
}

impl SecretPathMethod {
    pub fn parse(value: &str) -> Result<Self> {
        match value.to_ascii_uppercase().as_str() {
            "GET" => Ok(Self::Get),
            "POST" => Ok(Self::Post),
            _ => Err(ApprovalError::invalid_field(
                "bad secret_path_method (expected POST or GET)",
                "secret_path_method",
            )),
        }
    }
}

impl fmt::Display for SecretPathMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Get => write!(f, "GET"),
            Self::Post => write!(f, "POST"),
        }
    }
}

/// Stored approval policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct Role {
    #[validate(length(min = 1, message = "secret_path is required"))]
    pub secret_path: String,
    pub secret_path_method: SecretPathMethod,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_data: Option<SecretData>,
    #[serde(default)]
    pub secret_type: String,
    #[serde(default)]
    pub secret_environment: String,
    #[serde(default)]
    pub secret_required_fields: Vec<String>,
    /// Seconds
    pub secret_ttl: u64,
    /// Seconds
    pub secret_max_ttl: u64,
    pub exclusive_lease: bool,
    #[validate(range(min = 1, message = "bad min_approvers (must be >= 1)"))]
    pub min_approvers: u32,
    #[serde(default)]
    pub bound_requester_ids: BTreeSet<String>,
    #[serde(default)]
    pub bound_requester_roles: BTreeSet<String>,
    #[serde(default)]
    pub bound_approver_ids: BTreeSet<String>,
    #[serde(default)]
    pub bound_approver_roles: BTreeSet<String>,
    #[serde(default)]
    pub notify_slack_channels: Vec<String>,
}

impl Default for Role {
    fn default() -> Self {
        Self {
            secret_path: String::new(),
            secret_path_method: SecretPathMethod::Get,
            secret_data: None,
            secret_type: String::new(),
            secret_environment: String::new(),
            secret_required_fields: Vec::new(),
            secret_ttl: DEFAULT_SECRET_TTL.as_secs(),
            secret_max_ttl: DEFAULT_SECRET_MAX_TTL.as_secs(),
            exclusive_lease: false,
            min_approvers: 1,
            bound_requester_ids: BTreeSet::new(),
            bound_requester_roles: BTreeSet::new(),
            bound_approver_ids: BTreeSet::new(),
            bound_approver_roles: BTreeSet::new(),
            notify_slack_channels: Vec::new(),
        }
    }
}

impl Role {
    /// Check the role invariants
    pub fn validate(&self) -> Result<()> {
        Validate::validate(self).map_err(ApprovalError::from)?;

        if self.secret_data.is_some() && self.secret_path_method != SecretPathMethod::Post {
            return Err(ApprovalError::invalid_field(
                "bad method for secret_data (must be POST)",
                "secret_data",
            ));
        }

        if self.secret_max_ttl > 0 && self.secret_ttl > self.secret_max_ttl {
            return Err(ApprovalError::invalid_field(
                "secret_ttl should not be greater than secret_max_ttl",
                "secret_ttl",
            ));
        }

        if self.secret_ttl > MAX_SECRET_TTL.as_secs() || self.secret_max_ttl > MAX_SECRET_TTL.as_secs() {
            return Err(ApprovalError::invalid_field(
                format!("role TTLs must not exceed {}s", MAX_SECRET_TTL.as_secs()),
                "secret_ttl",
            ));
        }

        // Caller-supplied fields must never stand in for admin-set data.
        if let Some(field) = self.secret_required_fields.iter().find(|f| self.sets_field(f)) {
            return Err(ApprovalError::invalid_field(
                format!("required field '{}' is already set by the role", field),
                "secret_required_fields",
            ));
        }

        Ok(())
    }

    pub fn secret_ttl(&self) -> Duration {
        Duration::from_secs(self.secret_ttl)
    }

    pub fn secret_max_ttl(&self) -> Duration {
        Duration::from_secs(self.secret_max_ttl)
    }

    /// Upper bound for an issued lease: `secret_ttl`, or `secret_max_ttl`
    /// when no TTL is set.
    pub fn lease_ceiling(&self) -> Duration {
        if self.secret_ttl > 0 {
            self.secret_ttl()
        } else {
            self.secret_max_ttl()
        }
    }

    /// Whether `key` is filled in by the role or the backend rather than the
    /// requester
    pub fn sets_field(&self, key: &str) -> bool {
        RESERVED_FIELDS.contains(&key)
            || self.secret_data.as_ref().is_some_and(|data| data.contains_key(key))
    }

    pub fn issues_vault_token(&self) -> bool {
        self.secret_type == SECRET_TYPE_VAULT_TOKEN
    }
}

pub fn validate_role_name(name: &str) -> Result<()> {
    if ROLE_NAME.is_match(name) {
        Ok(())
    } else {
        Err(ApprovalError::invalid_field(format!("invalid role name '{}'", name), "name"))
    }
}

/// Role write payload. Absent fields keep the stored value (or the default
/// when creating).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RoleInput {
    pub secret_path: Option<String>,
    pub secret_path_method: Option<String>,
    pub secret_data: Option<SecretData>,
    pub secret_type: Option<String>,
    pub secret_environment: Option<String>,
    pub secret_required_fields: Option<Vec<String>>,
    pub secret_ttl: Option<DurationInput>,
    pub secret_max_ttl: Option<DurationInput>,
    pub exclusive_lease: Option<bool>,
    pub min_approvers: Option<i64>,
    pub bound_requester_ids: Option<Vec<String>>,
    pub bound_requester_roles: Option<Vec<String>>,
    pub bound_approver_ids: Option<Vec<String>>,
    pub bound_approver_roles: Option<Vec<String>>,
    pub notify_slack_channels: Option<Vec<String>>,
}

impl RoleInput {
    /// Merge onto `existing` and validate.
    ///
    /// `secret_max_ttl` above `mount_max_ttl` is clamped; the returned
    /// warnings describe any clamping.
    pub fn apply(self, existing: Option<Role>, mount_max_ttl: Duration) -> Result<(Role, Vec<String>)> {
        let mut role = existing.unwrap_or_default();
        let mut warnings = Vec::new();

        if let Some(path) = self.secret_path {
            role.secret_path = path;
        }
        if let Some(method) = self.secret_path_method {
            role.secret_path_method = SecretPathMethod::parse(&method)?;
        }
        if let Some(data) = self.secret_data {
            role.secret_data = if data.is_empty() { None } else { Some(data) };
        }
        if let Some(secret_type) = self.secret_type {
            role.secret_type = secret_type;
        }
        if let Some(environment) = self.secret_environment {
            role.secret_environment = environment;
        }
        if let Some(fields) = self.secret_required_fields {
            role.secret_required_fields = normalize_list(fields);
        }
        if let Some(ttl) = self.secret_ttl {
            role.secret_ttl = ttl.to_duration_at_most("secret_ttl", MAX_SECRET_TTL)?.as_secs();
        }
        if let Some(max_ttl) = self.secret_max_ttl {
            role.secret_max_ttl =
                max_ttl.to_duration_at_most("secret_max_ttl", MAX_SECRET_TTL)?.as_secs();
        }
        if role.secret_max_ttl > mount_max_ttl.as_secs() {
            warnings.push(format!(
                "secret_max_ttl is greater than the mount's maximum TTL ({}s); clamping",
                mount_max_ttl.as_secs()
            ));
            role.secret_max_ttl = mount_max_ttl.as_secs();
        }
        // With no max set, secret_ttl alone bounds the lease.
        if role.secret_max_ttl == 0 && role.secret_ttl > mount_max_ttl.as_secs() {
            warnings.push(format!(
                "secret_ttl is greater than the mount's maximum TTL ({}s); clamping",
                mount_max_ttl.as_secs()
            ));
            role.secret_ttl = mount_max_ttl.as_secs();
        }
        if let Some(exclusive) = self.exclusive_lease {
            role.exclusive_lease = exclusive;
        }
        if let Some(min) = self.min_approvers {
            role.min_approvers = u32::try_from(min).map_err(|_| {
                ApprovalError::invalid_field("bad min_approvers (must be >= 1)", "min_approvers")
            })?;
        }
        if let Some(ids) = self.bound_requester_ids {
            role.bound_requester_ids = normalize_identities(ids);
        }
        if let Some(roles) = self.bound_requester_roles {
            role.bound_requester_roles = normalize_identities(roles);
        }
        if let Some(ids) = self.bound_approver_ids {
            role.bound_approver_ids = normalize_identities(ids);
        }
        if let Some(roles) = self.bound_approver_roles {
            role.bound_approver_roles = normalize_identities(roles);
        }
        if let Some(channels) = self.notify_slack_channels {
            role.notify_slack_channels = normalize_list(channels);
        }

        role.validate()?;
        Ok((role, warnings))
    }
}

/// Identities and role names compare case-insensitively
pub fn normalize_identities(values: Vec<String>) -> BTreeSet<String> {
    values
        .into_iter()
        .map(|v| v.trim().to_lowercase())
        .filter(|v| !v.is_empty())
        .collect()
}

fn normalize_list(values: Vec<String>) -> Vec<String> {
    values.into_iter().map(|v| v.trim().to_string()).filter(|v| !v.is_empty()).collect()
}
