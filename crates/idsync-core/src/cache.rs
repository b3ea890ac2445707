//! Identity cache: sync state keyed by first-party id.
//!
//! [`MokaCache`] is an in-memory, bounded cache with a per-entry TTL. It can
//! be persisted to a JSON snapshot on shutdown and reloaded on start, so a
//! restart keeps the state of recently seen browsers.

use std::path::Path;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use moka::sync::Cache;
use moka::Expiry;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{SyncError, SyncResult};

/// Key/value store with per-entry expiry.
pub trait IdentityCache<V>: Send + Sync {
    /// Returns the value if present and not expired.
    fn get(&self, key: &str) -> Option<V>;

    /// Inserts or replaces `key`, expiring after `ttl`.
    fn set(&self, key: &str, value: V, ttl: Duration);
}

#[derive(Debug, Clone)]
struct Stamped<V> {
    value: V,
    ttl: Duration,
    expires_at: DateTime<Utc>,
}

struct StampedExpiry;

impl<V> Expiry<String, Stamped<V>> for StampedExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &Stamped<V>,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &Stamped<V>,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

#[derive(Serialize, Deserialize)]
struct Snapshot<V> {
    entries: Vec<SnapshotEntry<V>>,
}

#[derive(Serialize, Deserialize)]
struct SnapshotEntry<V> {
    key: String,
    value: V,
    expires_at: DateTime<Utc>,
}

/// Bounded in-memory cache backed by moka.
pub struct MokaCache<V> {
    inner: Cache<String, Stamped<V>>,
}

impl<V> MokaCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn new(max_entries: u64) -> Self {
        let inner = Cache::builder()
            .max_capacity(max_entries)
            .expire_after(StampedExpiry)
            .build();
        Self { inner }
    }

    /// Number of live entries, after flushing pending maintenance.
    pub fn entry_count(&self) -> u64 {
        self.inner.run_pending_tasks();
        self.inner.entry_count()
    }
}

impl<V> MokaCache<V>
where
    V: Clone + Send + Sync + Serialize + DeserializeOwned + 'static,
{
    /// Loads a snapshot written by [`MokaCache::save_file`].
    ///
    /// A missing file is an empty cache. Entries already past their expiry are
    /// dropped. Returns the number of entries restored.
    pub async fn load_file(&self, path: &Path) -> SyncResult<usize> {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(component = "cache", path = %path.display(), "no cache snapshot, starting empty");
                return Ok(0);
            }
            Err(e) => return Err(cache_error("read", path, e)),
        };

        let snapshot: Snapshot<V> =
            serde_json::from_slice(&bytes).map_err(|e| cache_error("parse", path, e))?;

        let now = Utc::now();
        let mut restored = 0;
        for entry in snapshot.entries {
            let Ok(remaining) = (entry.expires_at - now).to_std() else {
                continue;
            };
            if remaining.is_zero() {
                continue;
            }
            self.inner.insert(
                entry.key,
                Stamped {
                    value: entry.value,
                    ttl: remaining,
                    expires_at: entry.expires_at,
                },
            );
            restored += 1;
        }

        info!(component = "cache", path = %path.display(), entries = restored, "cache snapshot loaded");
        Ok(restored)
    }

    /// Writes every live entry to `path`, replacing it atomically.
    pub async fn save_file(&self, path: &Path) -> SyncResult<usize> {
        let now = Utc::now();
        let entries: Vec<SnapshotEntry<V>> = self
            .inner
            .iter()
            .filter(|(_, stamped)| stamped.expires_at > now)
            .map(|(key, stamped)| SnapshotEntry {
                key: key.as_ref().clone(),
                value: stamped.value,
                expires_at: stamped.expires_at,
            })
            .collect();
        let count = entries.len();

        let bytes = serde_json::to_vec(&Snapshot { entries })
            .map_err(|e| cache_error("serialize", path, e))?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| cache_error("create directory for", path, e))?;
        }

        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, &bytes)
            .await
            .map_err(|e| cache_error("write", &tmp, e))?;
        tokio::fs::rename(&tmp, path)
            .await
            .map_err(|e| cache_error("rename", path, e))?;

        info!(component = "cache", path = %path.display(), entries = count, "cache snapshot saved");
        Ok(count)
    }
}

impl<V> IdentityCache<V> for MokaCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn get(&self, key: &str) -> Option<V> {
        self.inner.get(key).map(|stamped| stamped.value)
    }

    fn set(&self, key: &str, value: V, ttl: Duration) {
        let expires_at = chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|d| Utc::now().checked_add_signed(d))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        self.inner.insert(
            key.to_string(),
            Stamped {
                value,
                ttl,
                expires_at,
            },
        );
    }
}

fn cache_error(action: &str, path: &Path, err: impl std::fmt::Display) -> SyncError {
    SyncError::Cache {
        message: format!("failed to {} {}: {}", action, path.display(), err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_then_get() {
        let cache: MokaCache<String> = MokaCache::new(16);
        cache.set("a", "one".to_string(), Duration::from_secs(60));
        assert_eq!(cache.get("a"), Some("one".to_string()));
        assert_eq!(cache.get("b"), None);
    }

    #[test]
    fn test_set_replaces_value() {
        let cache: MokaCache<String> = MokaCache::new(16);
        cache.set("a", "one".to_string(), Duration::from_secs(60));
        cache.set("a", "two".to_string(), Duration::from_secs(60));
        assert_eq!(cache.get("a"), Some("two".to_string()));
        assert_eq!(cache.entry_count(), 1);
    }

    #[test]
    fn test_entry_expires() {
        let cache: MokaCache<String> = MokaCache::new(16);
        cache.set("a", "one".to_string(), Duration::from_millis(20));
        std::thread::sleep(Duration::from_millis(60));
        assert_eq!(cache.get("a"), None);
    }

    #[tokio::test]
    async fn test_snapshot_round_trip_keeps_live_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("cache.db");

        let cache: MokaCache<String> = MokaCache::new(16);
        cache.set("a", "one".to_string(), Duration::from_secs(3600));
        cache.set("b", "two".to_string(), Duration::from_secs(3600));
        assert_eq!(cache.save_file(&path).await.unwrap(), 2);
        assert!(!path.with_extension("tmp").exists());

        let restored: MokaCache<String> = MokaCache::new(16);
        assert_eq!(restored.load_file(&path).await.unwrap(), 2);
        assert_eq!(restored.get("b"), Some("two".to_string()));
    }

    #[tokio::test]
    async fn test_load_skips_expired_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.db");
        let snapshot = serde_json::json!({
            "entries": [
                { "key": "old", "value": "x", "expires_at": "2001-01-01T00:00:00Z" },
                { "key": "new", "value": "y", "expires_at": "2999-01-01T00:00:00Z" }
            ]
        });
        std::fs::write(&path, serde_json::to_vec(&snapshot).unwrap()).unwrap();

        let cache: MokaCache<String> = MokaCache::new(16);
        assert_eq!(cache.load_file(&path).await.unwrap(), 1);
        assert_eq!(cache.get("old"), None);
        assert_eq!(cache.get("new"), Some("y".to_string()));
    }

    #[tokio::test]
    async fn test_missing_snapshot_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let cache: MokaCache<String> = MokaCache::new(16);
        let loaded = cache.load_file(&dir.path().join("absent.db")).await.unwrap();
        assert_eq!(loaded, 0);
    }

    #[tokio::test]
    async fn test_corrupt_snapshot_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.db");
        std::fs::write(&path, b"not json").unwrap();

        let cache: MokaCache<String> = MokaCache::new(16);
        let err = cache.load_file(&path).await.unwrap_err();
        assert!(matches!(err, SyncError::Cache { .. }));
    }
}
