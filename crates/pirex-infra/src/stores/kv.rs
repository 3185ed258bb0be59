//! The tiered key/value cache (C1's "tiered KV" capability set).
//!
//! Three logical tiers — hot, warm, cold — distinguished only by TTL
//! defaults and pool sizing per §4.1; the storage mechanics are identical.
//! `InMemoryTieredCache` backs local running and tests. Expired entries are
//! reaped lazily on read: per §5, "rate-limit windows are compacted on
//! write; no separate sweeper is required" generalizes to the cache tiers
//! too, so there is no background sweep task here.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheTier {
    Hot,
    Warm,
    Cold,
}

#[derive(Clone)]
struct CacheEntry {
    value: Vec<u8>,
    expires_at: Option<DateTime<Utc>>,
}

impl CacheEntry {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|at| now >= at).unwrap_or(false)
    }
}

/// A tiered byte-value store. Values are opaque here; typed helpers live on
/// top of this trait (see `CachedCodec`) so the cache itself never has to
/// know about `ContentItem`, `AlgorithmResult`, etc.
#[async_trait::async_trait]
pub trait TieredCache: Send + Sync {
    async fn get(&self, tier: CacheTier, key: &str) -> Option<Vec<u8>>;
    async fn set(&self, tier: CacheTier, key: &str, value: Vec<u8>, ttl: Option<Duration>);
    async fn delete(&self, tier: CacheTier, key: &str);
    /// Delete every key with the given prefix, used by §4.8/§4.10's
    /// user-scoped invalidation (`recs:user:<id>`, `profile:<id>`, ...).
    async fn delete_prefix(&self, tier: CacheTier, prefix: &str);
}

#[derive(Default)]
pub struct InMemoryTieredCache {
    hot: RwLock<HashMap<String, CacheEntry>>,
    warm: RwLock<HashMap<String, CacheEntry>>,
    cold: RwLock<HashMap<String, CacheEntry>>,
}

impl InMemoryTieredCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn map(&self, tier: CacheTier) -> &RwLock<HashMap<String, CacheEntry>> {
        match tier {
            CacheTier::Hot => &self.hot,
            CacheTier::Warm => &self.warm,
            CacheTier::Cold => &self.cold,
        }
    }
}

#[async_trait::async_trait]
impl TieredCache for InMemoryTieredCache {
    async fn get(&self, tier: CacheTier, key: &str) -> Option<Vec<u8>> {
        let map = self.map(tier);
        let now = Utc::now();
        {
            let guard = map.read().await;
            if let Some(entry) = guard.get(key) {
                if !entry.is_expired(now) {
                    return Some(entry.value.clone());
                }
            } else {
                return None;
            }
        }
        // Lazily reap the expired entry.
        map.write().await.remove(key);
        None
    }

    async fn set(&self, tier: CacheTier, key: &str, value: Vec<u8>, ttl: Option<Duration>) {
        let expires_at = ttl.and_then(|d| chrono::Duration::from_std(d).ok()).map(|d| Utc::now() + d);
        self.map(tier).write().await.insert(key.to_string(), CacheEntry { value, expires_at });
    }

    async fn delete(&self, tier: CacheTier, key: &str) {
        self.map(tier).write().await.remove(key);
    }

    async fn delete_prefix(&self, tier: CacheTier, prefix: &str) {
        self.map(tier).write().await.retain(|k, _| !k.starts_with(prefix));
    }
}

pub type SharedCache = Arc<dyn TieredCache>;

/// `serde_json`-backed get/set helpers for typed cache values, layered over
/// the raw byte-oriented `TieredCache`. Kept separate from the trait itself
/// so `TieredCache` implementors never need to know about serde.
pub async fn get_json<T: serde::de::DeserializeOwned>(cache: &dyn TieredCache, tier: CacheTier, key: &str) -> Option<T> {
    let bytes = cache.get(tier, key).await?;
    serde_json::from_slice(&bytes).ok()
}

pub async fn set_json<T: serde::Serialize>(cache: &dyn TieredCache, tier: CacheTier, key: &str, value: &T, ttl: Option<Duration>) {
    if let Ok(bytes) = serde_json::to_vec(value) {
        cache.set(tier, key, bytes, ttl).await;
    }
}
