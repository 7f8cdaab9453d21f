//! In-Memory Query Cache
//!
//! Information Hiding:
//! - HashMap storage structure hidden from users
//! - Thread-safe access via RwLock hidden behind async interface
//! - Suitable for testing and single-node deployments

use super::{CacheKey, QueryCache};
use crate::search::document::Document;
use anyhow::Result;
use async_trait::async_trait;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// In-memory cache using HashMap
/// Data is lost when process terminates
pub struct InMemoryQueryCache {
    entries: Arc<RwLock<HashMap<CacheKey, Vec<Document>>>>,
}

impl InMemoryQueryCache {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for InMemoryQueryCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl QueryCache for InMemoryQueryCache {
    async fn get(&self, key: &CacheKey) -> Result<Option<Vec<Document>>> {
        let entries = self.entries.read().await;
        let hit = entries.get(key).cloned();
        tracing::debug!(
            "[InMemoryQueryCache] {} for '{}' at '{}'",
            if hit.is_some() { "Hit" } else { "Miss" },
            key.query,
            key.source
        );
        Ok(hit)
    }

    async fn put(&self, key: CacheKey, documents: Vec<Document>) -> Result<bool> {
        let mut entries = self.entries.write().await;
        match entries.entry(key) {
            Entry::Occupied(entry) => {
                tracing::debug!(
                    "[InMemoryQueryCache] Kept existing entry for '{}' at '{}'",
                    entry.key().query,
                    entry.key().source
                );
                Ok(false)
            }
            Entry::Vacant(entry) => {
                tracing::debug!(
                    "[InMemoryQueryCache] Stored {} documents for '{}' at '{}'",
                    documents.len(),
                    entry.key().query,
                    entry.key().source
                );
                entry.insert(documents);
                Ok(true)
            }
        }
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.entries.read().await.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(title: &str) -> Document {
        Document::new().with_field("title", title)
    }

    #[tokio::test]
    async fn test_put_and_get() {
        let cache = InMemoryQueryCache::new();
        let key = CacheKey::new("acm", "Rust Actors");

        assert!(cache.get(&key).await.unwrap().is_none());
        assert!(cache.put(key.clone(), vec![doc("one"), doc("two")]).await.unwrap());

        let hit = cache.get(&CacheKey::new("acm", "rust   actors")).await.unwrap().unwrap();
        assert_eq!(hit.len(), 2);
        assert_eq!(hit[0].field("title"), Some("one"));
    }

    #[tokio::test]
    async fn test_first_writer_wins() {
        let cache = InMemoryQueryCache::new();
        let key = CacheKey::new("acm", "q");

        assert!(cache.put(key.clone(), vec![doc("first")]).await.unwrap());
        assert!(!cache.put(key.clone(), vec![doc("second"), doc("third")]).await.unwrap());

        let hit = cache.get(&key).await.unwrap().unwrap();
        assert_eq!(hit, vec![doc("first")]);
        assert_eq!(cache.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_empty_answers_are_cached() {
        let cache = InMemoryQueryCache::new();
        let key = CacheKey::new("ieee", "nothing matches");

        assert!(cache.is_empty().await.unwrap());
        assert!(cache.put(key.clone(), Vec::new()).await.unwrap());
        assert_eq!(cache.get(&key).await.unwrap(), Some(Vec::new()));
    }

    #[tokio::test]
    async fn test_concurrent_writers_store_once() {
        let cache = Arc::new(InMemoryQueryCache::new());
        let key = CacheKey::new("acm", "race");

        let writers: Vec<_> = (0..8)
            .map(|i| {
                let cache = cache.clone();
                let key = key.clone();
                tokio::spawn(async move { cache.put(key, vec![doc(&format!("w{}", i))]).await.unwrap() })
            })
            .collect();

        let mut written = 0;
        for writer in writers {
            if writer.await.unwrap() {
                written += 1;
            }
        }
        assert_eq!(written, 1);
    }
}
