//! SQLite Query Cache
//!
//! Information Hiding:
//! - Schema and JSON encoding of document lists hidden from users
//! - Blocking rusqlite calls moved off the runtime with spawn_blocking
//! - First-writer-wins enforced by the primary key and INSERT OR IGNORE

use super::{CacheKey, QueryCache};
use crate::search::document::Document;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Cache persisted in a single SQLite file, one row per (source, query)
pub struct SqliteQueryCache {
    conn: Arc<Mutex<Connection>>,
    db_path: PathBuf,
}

impl SqliteQueryCache {
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref().to_path_buf();

        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).context("Failed to create cache directory")?;
        }

        let conn = Connection::open(&db_path)
            .with_context(|| format!("Failed to open query cache at {:?}", db_path))?;
        Self::init_schema(&conn)?;

        tracing::info!("[SqliteQueryCache] Opened {:?}", db_path);
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            db_path,
        })
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r"
            CREATE TABLE IF NOT EXISTS query_cache (
                source TEXT NOT NULL,
                query TEXT NOT NULL,
                documents TEXT NOT NULL,
                stored_at TEXT NOT NULL,
                PRIMARY KEY (source, query)
            );
            ",
        )
        .context("Failed to init query cache schema")?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    async fn blocking<T, F>(&self, work: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || work(&conn.lock()))
            .await
            .context("Query cache task panicked")?
    }
}

#[async_trait]
impl QueryCache for SqliteQueryCache {
    async fn get(&self, key: &CacheKey) -> Result<Option<Vec<Document>>> {
        let (source, query) = (key.source.clone(), key.query.clone());
        let stored: Option<String> = self
            .blocking(move |conn| {
                conn.query_row(
                    "SELECT documents FROM query_cache WHERE source = ?1 AND query = ?2",
                    params![source, query],
                    |row| row.get(0),
                )
                .optional()
                .context("Failed to read query cache")
            })
            .await?;

        match stored {
            Some(json) => {
                let documents: Vec<Document> =
                    serde_json::from_str(&json).context("Corrupt query cache entry")?;
                tracing::debug!(
                    "[SqliteQueryCache] Hit for '{}' at '{}' ({} documents)",
                    key.query,
                    key.source,
                    documents.len()
                );
                Ok(Some(documents))
            }
            None => Ok(None),
        }
    }

    async fn put(&self, key: CacheKey, documents: Vec<Document>) -> Result<bool> {
        let json = serde_json::to_string(&documents).context("Failed to encode documents")?;
        let count = documents.len();
        let CacheKey { source, query } = key;

        let (source_log, query_log) = (source.clone(), query.clone());
        let written = self
            .blocking(move |conn| {
                conn.execute(
                    "INSERT OR IGNORE INTO query_cache (source, query, documents, stored_at)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![source, query, json, Utc::now().to_rfc3339()],
                )
                .context("Failed to write query cache")
            })
            .await?;

        if written > 0 {
            tracing::debug!(
                "[SqliteQueryCache] Stored {} documents for '{}' at '{}'",
                count,
                query_log,
                source_log
            );
        }
        Ok(written > 0)
    }

    async fn len(&self) -> Result<usize> {
        self.blocking(|conn| {
            let count: i64 = conn
                .query_row("SELECT COUNT(*) FROM query_cache", [], |row| row.get(0))
                .context("Failed to count query cache")?;
            Ok(count as usize)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn doc(title: &str) -> Document {
        Document::new().with_field("title", title)
    }

    #[tokio::test]
    async fn test_first_writer_wins_on_disk() {
        let dir = TempDir::new().unwrap();
        let cache = SqliteQueryCache::open(dir.path().join("cache.db")).unwrap();
        let key = CacheKey::new("acm", "Actor Models");

        assert!(cache.get(&key).await.unwrap().is_none());
        assert!(cache.put(key.clone(), vec![doc("first")]).await.unwrap());
        assert!(!cache.put(key.clone(), vec![doc("second")]).await.unwrap());

        let hit = cache.get(&CacheKey::new("acm", "actor models")).await.unwrap().unwrap();
        assert_eq!(hit, vec![doc("first")]);
        assert_eq!(cache.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_entries_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("cache.db");

        {
            let cache = SqliteQueryCache::open(&path).unwrap();
            cache
                .put(CacheKey::new("ieee", "q"), vec![doc("kept"), doc("also kept")])
                .await
                .unwrap();
        }

        let reopened = SqliteQueryCache::open(&path).unwrap();
        assert_eq!(reopened.path(), path.as_path());
        let hit = reopened.get(&CacheKey::new("ieee", "q")).await.unwrap().unwrap();
        assert_eq!(hit.len(), 2);
        assert!(reopened.get(&CacheKey::new("acm", "q")).await.unwrap().is_none());
    }
}
