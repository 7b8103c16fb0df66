use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use log::warn;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;

/// Read-through TTL cache: an in-memory map in front of one JSON file per
/// key. Purely a freshness optimization; losing it costs refetches, never
/// correctness. Concurrent writers race last-writer-wins.
#[derive(Clone)]
pub struct TtlCache {
    dir: PathBuf,
    ttl: Duration,
    entries: Arc<DashMap<String, CacheEntry>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheEntry {
    stored_at: DateTime<Utc>,
    value: Value,
}

impl TtlCache {
    pub async fn open<P: AsRef<Path>>(dir: P, ttl: Duration) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("failed to create cache directory {}", dir.display()))?;
        Ok(Self {
            dir,
            ttl,
            entries: Arc::new(DashMap::new()),
        })
    }

    /// Returns the cached value while it is fresh; an expired entry is
    /// evicted from memory and disk and reported as absent.
    pub async fn get(&self, key: &str) -> Option<Value> {
        if let Some(entry) = self.entries.get(key).map(|entry| entry.value().clone()) {
            if self.is_fresh(entry.stored_at) {
                return Some(entry.value);
            }
            self.evict(key).await;
            return None;
        }

        let entry = self.load(key).await?;
        if self.is_fresh(entry.stored_at) {
            self.entries.insert(key.to_string(), entry.clone());
            return Some(entry.value);
        }
        self.evict(key).await;
        None
    }

    /// Stores `value` under `key` with the current timestamp, overwriting
    /// any prior entry. The disk write is best-effort.
    pub async fn set(&self, key: &str, value: Value) {
        let entry = CacheEntry {
            stored_at: Utc::now(),
            value,
        };
        self.entries.insert(key.to_string(), entry.clone());

        let path = self.file_path(key);
        match serde_json::to_vec_pretty(&entry) {
            Ok(payload) => {
                if let Err(err) = fs::write(&path, payload).await {
                    warn!("Failed to persist cache entry {}: {}", key, err);
                }
            }
            Err(err) => warn!("Failed to serialize cache entry {}: {}", key, err),
        }
    }

    pub async fn invalidate(&self, key: &str) {
        self.evict(key).await;
    }

    pub async fn invalidate_all(&self) {
        self.entries.clear();
        let Ok(mut dir) = fs::read_dir(&self.dir).await else {
            return;
        };
        while let Ok(Some(entry)) = dir.next_entry().await {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) == Some("json") {
                let _ = fs::remove_file(path).await;
            }
        }
    }

    fn is_fresh(&self, stored_at: DateTime<Utc>) -> bool {
        let age = Utc::now().signed_duration_since(stored_at);
        match age.to_std() {
            Ok(age) => age < self.ttl,
            // stored_at in the future (clock adjustment): keep it
            Err(_) => true,
        }
    }

    async fn load(&self, key: &str) -> Option<CacheEntry> {
        let path = self.file_path(key);
        match fs::read(&path).await {
            Ok(bytes) => match serde_json::from_slice(&bytes) {
                Ok(entry) => Some(entry),
                Err(err) => {
                    warn!("Discarding unreadable cache file {}: {}", path.display(), err);
                    let _ = fs::remove_file(&path).await;
                    None
                }
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => None,
            Err(err) => {
                warn!("Failed to read cache file {}: {}", path.display(), err);
                None
            }
        }
    }

    async fn evict(&self, key: &str) {
        self.entries.remove(key);
        let _ = fs::remove_file(self.file_path(key)).await;
    }

    fn file_path(&self, key: &str) -> PathBuf {
        let sanitized: String = key
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(format!("{}.json", sanitized))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn temp_cache(ttl: Duration) -> TtlCache {
        let dir = std::env::temp_dir().join(format!("statsync-cache-test-{}", fastrand::u64(..)));
        TtlCache::open(dir, ttl).await.expect("cache should open")
    }

    #[tokio::test]
    async fn set_then_get_within_ttl_returns_value() {
        let cache = temp_cache(Duration::from_secs(60)).await;
        cache.set("accounts:1", json!({"balance": 100.0})).await;
        let value = cache.get("accounts:1").await.expect("entry should be fresh");
        assert_eq!(value["balance"], json!(100.0));
    }

    #[tokio::test]
    async fn expired_entry_is_absent_and_its_file_is_removed() {
        let cache = temp_cache(Duration::ZERO).await;
        cache.set("accounts:1", json!(1)).await;
        let path = cache.file_path("accounts:1");
        assert!(path.exists());

        assert!(cache.get("accounts:1").await.is_none());
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn set_overwrites_prior_entry() {
        let cache = temp_cache(Duration::from_secs(60)).await;
        cache.set("key", json!(1)).await;
        cache.set("key", json!(2)).await;
        assert_eq!(cache.get("key").await, Some(json!(2)));
    }

    #[tokio::test]
    async fn entries_survive_on_disk_across_instances() {
        let dir = std::env::temp_dir().join(format!("statsync-cache-test-{}", fastrand::u64(..)));
        let cache = TtlCache::open(&dir, Duration::from_secs(60)).await.unwrap();
        cache.set("accounts:7", json!({"id": 7})).await;

        let reopened = TtlCache::open(&dir, Duration::from_secs(60)).await.unwrap();
        let value = reopened.get("accounts:7").await.expect("persisted entry");
        assert_eq!(value["id"], json!(7));
    }

    #[tokio::test]
    async fn invalidate_all_clears_memory_and_disk() {
        let cache = temp_cache(Duration::from_secs(60)).await;
        cache.set("a", json!(1)).await;
        cache.set("b", json!(2)).await;
        cache.invalidate_all().await;
        assert!(cache.get("a").await.is_none());
        assert!(cache.get("b").await.is_none());
    }

    #[tokio::test]
    async fn keys_with_path_characters_are_sanitized() {
        let cache = temp_cache(Duration::from_secs(60)).await;
        cache.set("accounts/../../etc", json!(1)).await;
        let path = cache.file_path("accounts/../../etc");
        assert_eq!(
            path.file_name().and_then(|n| n.to_str()),
            Some("accounts_.._.._etc.json")
        );
        assert_eq!(cache.get("accounts/../../etc").await, Some(json!(1)));
    }
}
