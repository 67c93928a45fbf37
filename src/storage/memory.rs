//! In-process storage, used for development and tests.

use super::{immediate_children, Storage};
use crate::errors::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::sync::RwLock;

#[derive(Debug, Default)]
pub struct InMemoryStorage {
    entries: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl Storage for InMemoryStorage {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<()> {
        self.entries.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let entries = self.entries.read().await;
        let keys = entries
            .range(prefix.to_string()..)
            .map(|(k, _)| k.as_str())
            .take_while(|k| k.starts_with(prefix));
        Ok(immediate_children(prefix, keys))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.write().await.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_get_delete() {
        let storage = InMemoryStorage::new();
        assert!(storage.get("role/a").await.unwrap().is_none());

        storage.put("role/a", b"x".to_vec()).await.unwrap();
        assert_eq!(storage.get("role/a").await.unwrap(), Some(b"x".to_vec()));

        storage.delete("role/a").await.unwrap();
        storage.delete("role/a").await.unwrap();
        assert!(storage.is_empty().await);
    }

    #[tokio::test]
    async fn list_only_sees_prefix() {
        let storage = InMemoryStorage::new();
        storage.put("request/a/1", vec![]).await.unwrap();
        storage.put("request/a/2", vec![]).await.unwrap();
        storage.put("request/ab/3", vec![]).await.unwrap();
        storage.put("role/a", vec![]).await.unwrap();

        assert_eq!(storage.list("request/a/").await.unwrap(), vec!["1", "2"]);
        assert_eq!(storage.list("request/").await.unwrap(), vec!["a/", "ab/"]);
        assert!(storage.list("issue/").await.unwrap().is_empty());
    }
}
