//! # Storage and Persistence
//!
//! The approval workflow only needs a flat key-value store with
//! get/put/list/delete. No transactions or compare-and-swap are assumed;
//! [`accessor::Accessor`] layers per-key locking and generation checks on top.

pub mod accessor;
pub mod memory;
pub mod postgres;

pub use accessor::{Accessor, KeyGuard, KeyLocks};
pub use memory::InMemoryStorage;
pub use postgres::PostgresStorage;

use crate::config::StorageConfig;
use crate::errors::Result;
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Durable key-value store.
///
/// Keys are `/`-separated paths. `list` follows directory semantics: it
/// returns the immediate children of `prefix`, with sub-directories suffixed
/// by `/`.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<()>;

    async fn list(&self, prefix: &str) -> Result<Vec<String>>;

    /// Deleting an absent key is not an error.
    async fn delete(&self, key: &str) -> Result<()>;
}

/// Build the configured storage backend
pub async fn connect(config: &StorageConfig) -> Result<Arc<dyn Storage>> {
    if config.is_memory() {
        tracing::info!("Using in-memory storage");
        return Ok(Arc::new(InMemoryStorage::new()));
    }

    let storage = PostgresStorage::connect(config).await?;
    Ok(Arc::new(storage))
}

/// Reduce full keys under `prefix` to their immediate children.
pub(crate) fn immediate_children<'a, I>(prefix: &str, keys: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut children = BTreeSet::new();
    for key in keys {
        let Some(rest) = key.strip_prefix(prefix) else {
            continue;
        };
        if rest.is_empty() {
            continue;
        }
        match rest.find('/') {
            Some(idx) => children.insert(rest[..=idx].to_string()),
            None => children.insert(rest.to_string()),
        };
    }
    children.into_iter().collect()
}
