//! The profile manager: cache-aside reads/writes over `UserProfileStore`,
//! plus the per-user advisory lock §5 requires since two independent
//! writers — C8 (preference vector) and C9 (algorithm weights, reliability
//! score) — read-modify-write the same row.
//!
//! Both writers go through `ProfileManager::update`, which takes the
//! per-user lock, reads cache-first with a store fallback, lets the caller
//! mutate in place, then writes through to both the store and the
//! `profile:<id>` cache key. This is the same cache-aside shape
//! `JobManager` uses for job records, generalized with the extra per-user
//! mutex `JobManager` doesn't need (jobs have exactly one writer).

use std::collections::HashMap;
use std::sync::Arc;

use pirex_types::{CacheConfig, Result, UserId, UserProfile};
use tokio::sync::Mutex;

use crate::cache_keys;
use crate::stores::kv::{get_json, set_json, SharedCache};
use crate::stores::profile_store::UserProfileStore;

pub struct ProfileManager<S: UserProfileStore> {
    store: S,
    cache: SharedCache,
    cache_config: CacheConfig,
    embedding_dim: usize,
    locks: Mutex<HashMap<UserId, Arc<Mutex<()>>>>,
}

impl<S: UserProfileStore> ProfileManager<S> {
    pub fn new(store: S, cache: SharedCache, cache_config: CacheConfig, embedding_dim: usize) -> Self {
        Self { store, cache, cache_config, embedding_dim, locks: Mutex::new(HashMap::new()) }
    }

    async fn lock_for(&self, user: UserId) -> Arc<Mutex<()>> {
        self.locks.lock().await.entry(user).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }

    /// Cache-first read with a durable-store fallback, matching
    /// `JobManager::get`'s pattern but without taking the per-user lock,
    /// since a plain read needs no serialization against concurrent writers.
    pub async fn get(&self, user: UserId) -> Result<UserProfile> {
        let key = cache_keys::profile_key(user);
        if let Some(profile) = get_json::<UserProfile>(self.cache.as_ref(), crate::stores::kv::CacheTier::Warm, &key).await {
            return Ok(profile);
        }
        let profile = self.store.get_or_create(user, self.embedding_dim).await?;
        set_json(self.cache.as_ref(), crate::stores::kv::CacheTier::Warm, &key, &profile, None).await;
        Ok(profile)
    }

    /// Read-modify-write a user's profile under its advisory lock. `f`
    /// mutates the in-memory profile; the result is written through to the
    /// store and the cache before the lock releases.
    pub async fn update<F>(&self, user: UserId, f: F) -> Result<UserProfile>
    where
        F: FnOnce(&mut UserProfile),
    {
        let lock = self.lock_for(user).await;
        let _guard = lock.lock().await;

        let mut profile = self.store.get_or_create(user, self.embedding_dim).await?;
        f(&mut profile);
        self.store.save(&profile).await?;
        set_json(
            self.cache.as_ref(),
            crate::stores::kv::CacheTier::Warm,
            &cache_keys::profile_key(user),
            &profile,
            None,
        )
        .await;
        Ok(profile)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stores::kv::InMemoryTieredCache;
    use crate::stores::profile_store::InMemoryUserProfileStore;
    use pirex_types::new_id;

    fn manager() -> ProfileManager<InMemoryUserProfileStore> {
        let cache: SharedCache = Arc::new(InMemoryTieredCache::new());
        ProfileManager::new(InMemoryUserProfileStore::new(), cache, CacheConfig::default(), 8)
    }

    #[tokio::test]
    async fn update_persists_mutation_and_warms_cache() {
        let mgr = manager();
        let user = new_id();
        mgr.update(user, |p| p.reliability_score = 80).await.unwrap();

        let fetched = mgr.get(user).await.unwrap();
        assert_eq!(fetched.reliability_score, 80);
    }

    #[tokio::test]
    async fn concurrent_updates_serialize_without_lost_writes() {
        let mgr = Arc::new(manager());
        let user = new_id();
        mgr.get(user).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..20 {
            let mgr = mgr.clone();
            handles.push(tokio::spawn(async move {
                mgr.update(user, |p| p.interaction_count += 1).await.unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        let profile = mgr.get(user).await.unwrap();
        assert_eq!(profile.interaction_count, 20);
    }
}
