//! Query Cache Abstraction
//!
//! Information Hiding:
//! - Cache backend implementation details hidden behind trait
//! - Allows swapping between memory and SQLite without touching the coordinator
//! - Query normalization owned here so every backend keys entries the same way

use crate::config::{CacheBackend, CacheConfig};
use crate::search::document::Document;
use anyhow::Result;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;

pub mod memory;
pub mod sqlite;

pub use memory::InMemoryQueryCache;
pub use sqlite::SqliteQueryCache;

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid regex"));

/// Lowercase, trim and collapse internal whitespace.
pub fn normalize_query(text: &str) -> String {
    WHITESPACE
        .replace_all(text.trim(), " ")
        .to_lowercase()
}

/// One cached answer: what `source` returned for a normalized query text.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub source: String,
    pub query: String,
}

impl CacheKey {
    pub fn new(source: impl Into<String>, query_text: &str) -> Self {
        Self {
            source: source.into(),
            query: normalize_query(query_text),
        }
    }
}

/// Trait defining the per-source query cache
/// The first writer for a key wins; later puts leave the entry untouched
#[async_trait]
pub trait QueryCache: Send + Sync {
    /// Cached documents for `key`, `None` on a miss
    async fn get(&self, key: &CacheKey) -> Result<Option<Vec<Document>>>;

    /// Store `documents` under `key`. Returns whether this call wrote the entry
    async fn put(&self, key: CacheKey, documents: Vec<Document>) -> Result<bool>;

    /// Number of cached entries
    async fn len(&self) -> Result<usize>;

    async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }
}

/// Build the backend named in configuration.
pub fn open_cache(config: &CacheConfig) -> Result<Arc<dyn QueryCache>> {
    match config.backend {
        CacheBackend::Memory => Ok(Arc::new(InMemoryQueryCache::new())),
        CacheBackend::Sqlite => Ok(Arc::new(SqliteQueryCache::open(&config.path)?)),
    }
}
