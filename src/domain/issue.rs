//! Issue: bookkeeping for one released secret, kept until the lease ends.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    pub role_name: String,
    pub nonce: String,
    pub requester_id: String,
    pub approver_ids: Vec<String>,
    pub secret_path: String,
    #[serde(default)]
    pub secret_type: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Accessor of a downstream token that must be revoked with the lease
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_accessor: Option<String>,
}

impl Issue {
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        now <= self.expires_at
    }
}
