//! Process-local freshness cache.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use awardsearch_shared::{CacheEntry, PageRecord, Result};

use crate::FreshnessCache;

/// In-memory [`FreshnessCache`] backed by a `RwLock<HashMap>`.
pub struct MemoryCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
    ttl: chrono::Duration,
}

impl MemoryCache {
    /// Create an empty cache whose entries live for `ttl`.
    pub fn new(ttl: chrono::Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    /// Insert a fully formed entry, bypassing the TTL stamp.
    #[cfg(test)]
    pub(crate) async fn insert_entry(&self, entry: CacheEntry) {
        self.entries.write().await.insert(entry.url.clone(), entry);
    }
}

#[async_trait]
impl FreshnessCache for MemoryCache {
    async fn get_multiple(&self, urls: &[String]) -> Result<HashMap<String, PageRecord>> {
        let now = Utc::now();
        let mut fresh = HashMap::new();
        let mut expired = Vec::new();

        {
            let entries = self.entries.read().await;
            for url in urls {
                match entries.get(url) {
                    Some(entry) if entry.is_fresh_at(now) => {
                        fresh.insert(url.clone(), entry.data.clone());
                    }
                    Some(_) => expired.push(url.clone()),
                    None => {}
                }
            }
        }

        if !expired.is_empty() {
            let mut entries = self.entries.write().await;
            for url in &expired {
                // Re-check: a concurrent set may have refreshed it.
                if entries.get(url).is_some_and(|e| !e.is_fresh_at(now)) {
                    entries.remove(url);
                }
            }
            tracing::debug!(evicted = expired.len(), "evicted expired cache entries");
        }

        Ok(fresh)
    }

    async fn set(&self, url: &str, page: &PageRecord) -> Result<()> {
        let entry = CacheEntry::new(url, page.clone(), self.ttl);
        self.entries.write().await.insert(url.to_string(), entry);
        Ok(())
    }

    async fn purge_expired(&self) -> Result<usize> {
        let now = Utc::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| entry.is_fresh_at(now));
        Ok(before - entries.len())
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.entries.read().await.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::page;

    #[tokio::test]
    async fn roundtrip_returns_exact_page() {
        let cache = MemoryCache::new(chrono::Duration::days(7));
        let url = "https://www.stevieawards.com/aba/deadlines";
        let stored = page(url, "ABA Deadlines");
        cache.set(url, &stored).await.unwrap();

        let found = cache.get_multiple(&[url.to_string()]).await.unwrap();
        assert_eq!(found.get(url), Some(&stored));
    }

    #[tokio::test]
    async fn only_fresh_subset_is_returned() {
        let cache = MemoryCache::new(chrono::Duration::days(7));
        let fresh_url = "https://www.stevieawards.com/aba";
        let stale_url = "https://www.stevieawards.com/iba";
        cache.set(fresh_url, &page(fresh_url, "ABA")).await.unwrap();

        let mut stale = CacheEntry::new(stale_url, page(stale_url, "IBA"), chrono::Duration::days(7));
        stale.expires_at = Utc::now() - chrono::Duration::seconds(1);
        cache.insert_entry(stale).await;

        let found = cache
            .get_multiple(&[fresh_url.to_string(), stale_url.to_string()])
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert!(found.contains_key(fresh_url));
        // Expired entry was evicted on read.
        assert_eq!(cache.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn entry_disappears_after_ttl() {
        let cache = MemoryCache::new(chrono::Duration::milliseconds(30));
        let url = "https://www.stevieawards.com/sales";
        cache.set(url, &page(url, "Sales")).await.unwrap();
        assert_eq!(cache.get_multiple(&[url.to_string()]).await.unwrap().len(), 1);

        tokio::time::sleep(std::time::Duration::from_millis(60)).await;
        assert!(cache.get_multiple(&[url.to_string()]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn purge_counts_removed() {
        let cache = MemoryCache::new(chrono::Duration::days(7));
        let url = "https://www.stevieawards.com/women";
        let mut stale = CacheEntry::new(url, page(url, "Women"), chrono::Duration::days(7));
        stale.expires_at = Utc::now() - chrono::Duration::seconds(1);
        cache.insert_entry(stale).await;
        cache
            .set("https://www.stevieawards.com/tech", &page("https://www.stevieawards.com/tech", "Tech"))
            .await
            .unwrap();

        assert_eq!(cache.purge_expired().await.unwrap(), 1);
        assert_eq!(cache.len().await.unwrap(), 1);
    }
}
