//! Namespaced key-value accessor with per-key locking.
//!
//! Keys are lower-cased and joined with `/` beneath a fixed namespace
//! (`config`, `role`, `request`, `issue`), so `(role, nonce)` pairs are
//! addressable individually and by prefix listing.
//!
//! Locks are keyed by the full storage key. Two calls touching different
//! requests in the same namespace never contend; two calls touching the same
//! request are serialized for the whole read-modify-write.

use super::Storage;
use crate::errors::{ApprovalError, Result};
use dashmap::DashMap;
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::Instrument;

/// Registry of in-process locks, one per storage key.
///
/// Entries are pruned once the last holder or waiter lets go.
#[derive(Debug, Default)]
pub struct KeyLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl KeyLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(self: &Arc<Self>, key: &str) -> KeyGuard {
        let mutex = self
            .locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        let guard = mutex.lock_owned().await;
        tracing::trace!(key = %key, "acquired key lock");

        KeyGuard { guard: Some(guard), key: key.to_string(), locks: Arc::clone(self) }
    }

    /// Number of keys with a live lock entry
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

/// Holds one key lock until dropped
#[derive(Debug)]
pub struct KeyGuard {
    guard: Option<OwnedMutexGuard<()>>,
    key: String,
    locks: Arc<KeyLocks>,
}

impl KeyGuard {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for KeyGuard {
    fn drop(&mut self) {
        // Release first so the strong count below only sees waiters.
        self.guard.take();
        self.locks.locks.remove_if(&self.key, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}

/// Typed access to one storage namespace
#[derive(Clone)]
pub struct Accessor {
    storage: Arc<dyn Storage>,
    locks: Arc<KeyLocks>,
    namespace: &'static str,
}

impl std::fmt::Debug for Accessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Accessor").field("namespace", &self.namespace).finish()
    }
}

impl Accessor {
    pub fn new(storage: Arc<dyn Storage>, locks: Arc<KeyLocks>, namespace: &'static str) -> Self {
        Self { storage, locks, namespace }
    }

    pub fn namespace(&self) -> &'static str {
        self.namespace
    }

    /// Full storage key for the given path segments.
    ///
    /// Empty segments and stray slashes are dropped, everything is lower-cased.
    pub fn key(&self, parts: &[&str]) -> String {
        let mut segments = vec![self.namespace.to_string()];
        for part in parts {
            segments.extend(
                part.split('/').filter(|s| !s.is_empty()).map(|s| s.to_lowercase()),
            );
        }
        segments.join("/")
    }

    pub async fn lock(&self, parts: &[&str]) -> KeyGuard {
        self.locks.lock(&self.key(parts)).await
    }

    pub async fn get<T: DeserializeOwned>(&self, parts: &[&str]) -> Result<Option<T>> {
        let key = self.key(parts);
        let stored =
            self.storage.get(&key).instrument(crate::storage_span!("get", key)).await?;

        match stored {
            Some(bytes) => {
                let value = serde_json::from_slice(&bytes).map_err(|e| {
                    ApprovalError::serialization(format!("Failed to decode entry '{}'", key), e)
                })?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    pub async fn put<T: Serialize>(&self, parts: &[&str], value: &T) -> Result<()> {
        let key = self.key(parts);
        let bytes = serde_json::to_vec(value).map_err(|e| {
            ApprovalError::serialization(format!("Failed to encode entry '{}'", key), e)
        })?;
        self.storage.put(&key, bytes).instrument(crate::storage_span!("put", key)).await
    }

    /// Write `value` only if the stored generation still equals `expected`.
    ///
    /// Callers hold the key lock; the re-read catches writers in other
    /// processes sharing the same store. Returns `false` on a lost race.
    pub async fn put_if_generation<T, F>(
        &self,
        parts: &[&str],
        value: &T,
        expected: u64,
        generation_of: F,
    ) -> Result<bool>
    where
        T: Serialize + DeserializeOwned,
        F: Fn(&T) -> u64,
    {
        let current = self.get::<T>(parts).await?;
        match current {
            Some(stored) if generation_of(&stored) == expected => {
                self.put(parts, value).await?;
                Ok(true)
            }
            Some(stored) => {
                tracing::debug!(
                    key = %self.key(parts),
                    expected,
                    found = generation_of(&stored),
                    "generation changed underneath writer"
                );
                Ok(false)
            }
            None => Ok(false),
        }
    }

    pub async fn list(&self, parts: &[&str]) -> Result<Vec<String>> {
        let mut prefix = self.key(parts);
        prefix.push('/');
        self.storage.list(&prefix).await
    }

    pub async fn delete(&self, parts: &[&str]) -> Result<()> {
        let key = self.key(parts);
        self.storage.delete(&key).instrument(crate::storage_span!("delete", key)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryStorage;
    use serde::Deserialize;
    use std::time::Duration;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Entry {
        value: String,
        generation: u64,
    }

    fn accessor(namespace: &'static str) -> Accessor {
        Accessor::new(Arc::new(InMemoryStorage::new()), Arc::new(KeyLocks::new()), namespace)
    }

    #[test]
    fn keys_are_lowercased_and_joined() {
        let acc = accessor("request");
        assert_eq!(acc.key(&["K8s-Admin", "ABCdef"]), "request/k8s-admin/abcdef");
        assert_eq!(acc.key(&["/role/", "", "x"]), "request/role/x");
        assert_eq!(acc.key(&[]), "request");
    }

    #[tokio::test]
    async fn typed_round_trip_and_listing() {
        let acc = accessor("role");
        let entry = Entry { value: "a".into(), generation: 1 };
        acc.put(&["Alpha"], &entry).await.unwrap();
        acc.put(&["beta"], &entry).await.unwrap();

        assert_eq!(acc.get::<Entry>(&["ALPHA"]).await.unwrap(), Some(entry));
        assert_eq!(acc.list(&[]).await.unwrap(), vec!["alpha", "beta"]);

        acc.delete(&["alpha"]).await.unwrap();
        assert!(acc.get::<Entry>(&["alpha"]).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn put_if_generation_detects_lost_race() {
        let acc = accessor("request");
        acc.put(&["r", "n"], &Entry { value: "a".into(), generation: 2 }).await.unwrap();

        let stale = Entry { value: "b".into(), generation: 2 };
        let written = acc.put_if_generation(&["r", "n"], &stale, 1, |e| e.generation).await.unwrap();
        assert!(!written);

        let fresh = Entry { value: "c".into(), generation: 3 };
        let written = acc.put_if_generation(&["r", "n"], &fresh, 2, |e| e.generation).await.unwrap();
        assert!(written);
        assert_eq!(acc.get::<Entry>(&["r", "n"]).await.unwrap().unwrap().value, "c");
    }

    #[tokio::test]
    async fn key_locks_serialize_same_key_and_prune() {
        let locks = Arc::new(KeyLocks::new());
        let guard = locks.lock("request/r/n").await;
        assert_eq!(guard.key(), "request/r/n");

        // A different key is independent.
        let other = locks.lock("request/r/m").await;
        drop(other);

        let contended = {
            let locks = Arc::clone(&locks);
            tokio::spawn(async move {
                let _g = locks.lock("request/r/n").await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contended.is_finished());

        drop(guard);
        contended.await.unwrap();
        assert!(locks.is_empty());
    }
}
