//! Freshness cache for fetched pages.
//!
//! [`FreshnessCache`] is the URL-keyed, TTL-driven read-through store the search
//! pipeline consults before retrieving content. Two backends:
//! - [`MemoryCache`]: process-local map, used by tests and long-running services
//! - [`Storage`]: Turso Embedded / libSQL database, persistent across CLI runs

mod memory;
mod migrations;

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use libsql::{Connection, Database, params};

use awardsearch_shared::{AwardSearchError, CacheEntry, PageRecord, Result};

pub use memory::MemoryCache;

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// URL-keyed page store with fixed expiry.
///
/// Expired entries are never returned; backends evict them when they see them.
#[async_trait]
pub trait FreshnessCache: Send + Sync {
    /// Return the fresh subset of `urls`, keyed by URL.
    async fn get_multiple(&self, urls: &[String]) -> Result<HashMap<String, PageRecord>>;

    /// Store `page` under `url`, replacing any previous entry.
    async fn set(&self, url: &str, page: &PageRecord) -> Result<()>;

    /// Evict every expired entry. Returns how many were removed.
    async fn purge_expired(&self) -> Result<usize>;

    /// Number of stored entries, fresh or not.
    async fn len(&self) -> Result<usize>;
}

// ---------------------------------------------------------------------------
// Storage (libSQL)
// ---------------------------------------------------------------------------

/// Persistent page cache wrapping a libSQL database.
pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
    ttl: chrono::Duration,
}

impl Storage {
    /// Open or create a database at `path` in read-write mode.
    pub async fn open(path: &Path, ttl: chrono::Duration) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| AwardSearchError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| AwardSearchError::Storage(e.to_string()))?;

        let conn = db
            .connect()
            .map_err(|e| AwardSearchError::Storage(e.to_string()))?;

        let storage = Self { db, conn, ttl };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn
                    .execute_batch(migration.sql)
                    .await
                    .map_err(|e| {
                        AwardSearchError::Storage(format!(
                            "migration v{} failed: {e}",
                            migration.version
                        ))
                    })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    /// Load one entry regardless of freshness.
    async fn get_entry(&self, url: &str) -> Result<Option<CacheEntry>> {
        let mut rows = self
            .conn
            .query(
                "SELECT url, data_json, cached_at, expires_at FROM page_cache WHERE url = ?1",
                params![url],
            )
            .await
            .map_err(|e| AwardSearchError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_entry(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(AwardSearchError::Storage(e.to_string())),
        }
    }

    /// Write a fully formed entry (upserts on URL).
    async fn put_entry(&self, entry: &CacheEntry) -> Result<()> {
        let data_json = serde_json::to_string(&entry.data)
            .map_err(|e| AwardSearchError::Storage(format!("serialize page: {e}")))?;
        self.conn
            .execute(
                "INSERT INTO page_cache (url, data_json, cached_at, expires_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(url) DO UPDATE SET
                   data_json = excluded.data_json,
                   cached_at = excluded.cached_at,
                   expires_at = excluded.expires_at",
                params![
                    entry.url.as_str(),
                    data_json,
                    timestamp(entry.cached_at),
                    timestamp(entry.expires_at),
                ],
            )
            .await
            .map_err(|e| AwardSearchError::Storage(e.to_string()))?;
        Ok(())
    }

    /// Delete one entry by URL.
    async fn delete_entry(&self, url: &str) -> Result<()> {
        self.conn
            .execute("DELETE FROM page_cache WHERE url = ?1", params![url])
            .await
            .map_err(|e| AwardSearchError::Storage(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl FreshnessCache for Storage {
    async fn get_multiple(&self, urls: &[String]) -> Result<HashMap<String, PageRecord>> {
        let now = Utc::now();
        let mut fresh = HashMap::new();

        for url in urls {
            if fresh.contains_key(url) {
                continue;
            }
            match self.get_entry(url).await? {
                Some(entry) if entry.is_fresh_at(now) => {
                    fresh.insert(url.clone(), entry.data);
                }
                Some(_) => {
                    tracing::debug!(%url, "evicting expired cache entry");
                    self.delete_entry(url).await?;
                }
                None => {}
            }
        }

        tracing::debug!(requested = urls.len(), fresh = fresh.len(), "cache lookup");
        Ok(fresh)
    }

    async fn set(&self, url: &str, page: &PageRecord) -> Result<()> {
        let entry = CacheEntry::new(url, page.clone(), self.ttl);
        self.put_entry(&entry).await
    }

    async fn purge_expired(&self) -> Result<usize> {
        let removed = self
            .conn
            .execute(
                "DELETE FROM page_cache WHERE expires_at <= ?1",
                params![timestamp(Utc::now())],
            )
            .await
            .map_err(|e| AwardSearchError::Storage(e.to_string()))?;
        tracing::info!(removed, "purged expired cache entries");
        Ok(removed as usize)
    }

    async fn len(&self) -> Result<usize> {
        let mut rows = self
            .conn
            .query("SELECT COUNT(*) FROM page_cache", params![])
            .await
            .map_err(|e| AwardSearchError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let count: i64 = row
                    .get(0)
                    .map_err(|e| AwardSearchError::Storage(e.to_string()))?;
                Ok(count as usize)
            }
            Ok(None) => Ok(0),
            Err(e) => Err(AwardSearchError::Storage(e.to_string())),
        }
    }
}

/// Fixed-width UTC timestamps so `expires_at` compares correctly as text.
fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| AwardSearchError::Storage(format!("invalid date: {e}")))
}

/// Convert a database row to a [`CacheEntry`].
fn row_to_entry(row: &libsql::Row) -> Result<CacheEntry> {
    let data_json: String = row
        .get(1)
        .map_err(|e| AwardSearchError::Storage(e.to_string()))?;
    let cached_at: String = row
        .get(2)
        .map_err(|e| AwardSearchError::Storage(e.to_string()))?;
    let expires_at: String = row
        .get(3)
        .map_err(|e| AwardSearchError::Storage(e.to_string()))?;

    Ok(CacheEntry {
        url: row
            .get::<String>(0)
            .map_err(|e| AwardSearchError::Storage(e.to_string()))?,
        data: serde_json::from_str(&data_json)
            .map_err(|e| AwardSearchError::Storage(format!("corrupt cached page: {e}")))?,
        cached_at: parse_timestamp(&cached_at)?,
        expires_at: parse_timestamp(&expires_at)?,
    })
}


#[cfg(test)]
mod tests {
    use super::test_support::page;
    use super::*;
    use uuid::Uuid;

    /// Create a temp file storage for testing.
    async fn test_storage(ttl: chrono::Duration) -> Storage {
        let tmp = std::env::temp_dir().join(format!("as_test_{}.db", Uuid::now_v7()));
        Storage::open(&tmp, ttl).await.expect("open test db")
    }

    #[tokio::test]
    async fn open_and_migrate() {
        let storage = test_storage(chrono::Duration::days(7)).await;
        let version = storage.get_schema_version().await;
        assert_eq!(version, 1);
    }

    #[tokio::test]
    async fn idempotent_migration() {
        let tmp = std::env::temp_dir().join(format!("as_test_{}.db", Uuid::now_v7()));
        let _s1 = Storage::open(&tmp, chrono::Duration::days(7))
            .await
            .expect("first open");
        drop(_s1);
        let s2 = Storage::open(&tmp, chrono::Duration::days(7))
            .await
            .expect("second open");
        assert_eq!(s2.get_schema_version().await, 1);
    }

    #[tokio::test]
    async fn set_then_get_returns_same_page() {
        let storage = test_storage(chrono::Duration::days(7)).await;
        let url = "https://www.stevieawards.com/aba/deadlines";
        let stored = page(url, "ABA Deadlines");

        storage.set(url, &stored).await.expect("set");

        let found = storage
            .get_multiple(&[url.to_string(), "https://example.com/missing".into()])
            .await
            .expect("get");
        assert_eq!(found.len(), 1);
        assert_eq!(found.get(url), Some(&stored));
        assert_eq!(storage.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn set_overwrites_existing_entry() {
        let storage = test_storage(chrono::Duration::days(7)).await;
        let url = "https://www.stevieawards.com/iba";
        storage.set(url, &page(url, "Old")).await.unwrap();
        storage.set(url, &page(url, "New")).await.unwrap();

        let found = storage.get_multiple(&[url.to_string()]).await.unwrap();
        assert_eq!(found[url].title, "New");
        assert_eq!(storage.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn expired_entries_are_absent_and_evicted() {
        let storage = test_storage(chrono::Duration::days(7)).await;
        let url = "https://www.stevieawards.com/sales";
        let mut entry = CacheEntry::new(url, page(url, "Sales"), chrono::Duration::days(7));
        entry.cached_at -= chrono::Duration::days(8);
        entry.expires_at -= chrono::Duration::days(8);
        storage.put_entry(&entry).await.expect("put");

        let found = storage.get_multiple(&[url.to_string()]).await.unwrap();
        assert!(found.is_empty());
        assert_eq!(storage.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn purge_removes_only_expired() {
        let storage = test_storage(chrono::Duration::days(7)).await;
        let stale_url = "https://www.stevieawards.com/women";
        let mut stale = CacheEntry::new(stale_url, page(stale_url, "Women"), chrono::Duration::days(7));
        stale.expires_at = Utc::now() - chrono::Duration::seconds(1);
        storage.put_entry(&stale).await.unwrap();
        storage
            .set("https://www.stevieawards.com/tech", &page("https://www.stevieawards.com/tech", "Tech"))
            .await
            .unwrap();

        let removed = storage.purge_expired().await.expect("purge");
        assert_eq!(removed, 1);
        assert_eq!(storage.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn entry_survives_reopen() {
        let tmp = std::env::temp_dir().join(format!("as_test_{}.db", Uuid::now_v7()));
        let url = "https://www.stevieawards.com/aba";
        {
            let storage = Storage::open(&tmp, chrono::Duration::days(7)).await.unwrap();
            storage.set(url, &page(url, "ABA")).await.unwrap();
        }
        let storage = Storage::open(&tmp, chrono::Duration::days(7)).await.unwrap();
        let found = storage.get_multiple(&[url.to_string()]).await.unwrap();
        assert_eq!(found[url].title, "ABA");
    }
}
