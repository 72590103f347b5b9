//! Short-lived read cache in front of the rankers.
//!
//! Entries are keyed by user, strategy and requested size. Every rating
//! mutation for a user must call [`RecommendationCache::invalidate_user`].
//! Cache failures degrade to a miss; rankers never depend on the cache.
//!
//! Each user has an epoch that invalidation advances. Readers take the epoch
//! before touching the store and hand it back to `put`, which drops the entry
//! when the epoch has moved in between.

use crate::config::{CacheBackend, CacheConfig, RedisConfig};
use crate::error::StoreResult;
use crate::models::{Ranking, Strategy};
use async_trait::async_trait;
use dashmap::DashMap;
use redis::AsyncCommands;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub user_id: i64,
    pub strategy: Strategy,
    pub k: usize,
}

#[async_trait]
pub trait RecommendationCache: Send + Sync {
    async fn get(&self, key: &CacheKey) -> Option<Ranking>;
    /// Current epoch for the user. `None` means results must not be cached.
    async fn epoch(&self, user_id: i64) -> Option<u64>;
    /// Stores `ranking` only if the user's epoch still equals `epoch`.
    async fn put(&self, key: CacheKey, epoch: u64, ranking: &Ranking);
    async fn invalidate_user(&self, user_id: i64);
}

pub async fn build_cache(cache: &CacheConfig, redis: &RedisConfig) -> anyhow::Result<Arc<dyn RecommendationCache>> {
    let ttl = Duration::from_secs(cache.ttl_seconds);
    let built: Arc<dyn RecommendationCache> = match cache.backend {
        CacheBackend::Memory => Arc::new(MemoryCache::new(ttl)),
        CacheBackend::Redis => Arc::new(RedisCache::new(&redis.url, ttl)?),
        CacheBackend::Disabled => Arc::new(NoCache),
    };
    info!("Recommendation cache backend: {:?}", cache.backend);
    Ok(built)
}

pub struct MemoryCache {
    entries: DashMap<CacheKey, (Instant, Ranking)>,
    epochs: DashMap<i64, u64>,
    ttl: Duration,
}

impl MemoryCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            epochs: DashMap::new(),
            ttl,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl RecommendationCache for MemoryCache {
    async fn get(&self, key: &CacheKey) -> Option<Ranking> {
        {
            let entry = self.entries.get(key)?;
            if entry.0.elapsed() <= self.ttl {
                return Some(entry.1.clone());
            }
        }
        self.entries.remove(key);
        None
    }

    async fn epoch(&self, user_id: i64) -> Option<u64> {
        Some(self.epochs.get(&user_id).map_or(0, |e| *e))
    }

    async fn put(&self, key: CacheKey, epoch: u64, ranking: &Ranking) {
        if self.ttl.is_zero() {
            return;
        }
        // The epoch shard stays locked until the entry is in, so an
        // invalidation either sees this entry or rejects it.
        let current = self.epochs.entry(key.user_id).or_insert(0);
        if *current != epoch {
            debug!("Dropping stale ranking for user {} (epoch {} != {})", key.user_id, epoch, *current);
            return;
        }
        self.entries.insert(key, (Instant::now(), ranking.clone()));
    }

    async fn invalidate_user(&self, user_id: i64) {
        *self.epochs.entry(user_id).or_insert(0) += 1;
        self.entries.retain(|key, _| key.user_id != user_id);
    }
}

/// Redis-backed cache. Invalidation bumps a per-user generation counter that
/// is part of every entry key, so stale entries become unreachable and age out.
pub struct RedisCache {
    client: redis::Client,
    ttl: Duration,
}

impl RedisCache {
    pub fn new(url: &str, ttl: Duration) -> anyhow::Result<Self> {
        Ok(Self {
            client: redis::Client::open(url)?,
            ttl,
        })
    }

    fn generation_key(user_id: i64) -> String {
        format!("recs:{}:gen", user_id)
    }

    fn entry_key(key: &CacheKey, generation: u64) -> String {
        format!("recs:{}:{}:{}:{}", key.user_id, generation, key.strategy, key.k)
    }

    async fn try_get(&self, key: &CacheKey) -> StoreResult<Option<Ranking>> {
        let mut conn = self.client.get_async_connection().await?;
        let generation: Option<u64> = conn.get(Self::generation_key(key.user_id)).await?;
        let cached: Option<String> = conn.get(Self::entry_key(key, generation.unwrap_or(0))).await?;
        match cached {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn try_epoch(&self, user_id: i64) -> StoreResult<u64> {
        let mut conn = self.client.get_async_connection().await?;
        let generation: Option<u64> = conn.get(Self::generation_key(user_id)).await?;
        Ok(generation.unwrap_or(0))
    }

    /// Writes under the generation the reader started from. If it has moved,
    /// the entry is unreachable and ages out.
    async fn try_put(&self, key: &CacheKey, generation: u64, ranking: &Ranking) -> StoreResult<()> {
        let mut conn = self.client.get_async_connection().await?;
        let json = serde_json::to_string(ranking)?;
        let _: () = conn
            .set_ex(Self::entry_key(key, generation), json, self.ttl.as_secs())
            .await?;
        Ok(())
    }

    async fn try_invalidate(&self, user_id: i64) -> StoreResult<()> {
        let mut conn = self.client.get_async_connection().await?;
        let _: u64 = conn.incr(Self::generation_key(user_id), 1u64).await?;
        Ok(())
    }
}

#[async_trait]
impl RecommendationCache for RedisCache {
    async fn get(&self, key: &CacheKey) -> Option<Ranking> {
        match self.try_get(key).await {
            Ok(found) => found,
            Err(e) => {
                warn!("Redis cache read failed for user {}: {}", key.user_id, e);
                None
            }
        }
    }

    async fn epoch(&self, user_id: i64) -> Option<u64> {
        match self.try_epoch(user_id).await {
            Ok(generation) => Some(generation),
            Err(e) => {
                warn!("Redis generation read failed for user {}: {}", user_id, e);
                None
            }
        }
    }

    async fn put(&self, key: CacheKey, epoch: u64, ranking: &Ranking) {
        if self.ttl.is_zero() {
            return;
        }
        if let Err(e) = self.try_put(&key, epoch, ranking).await {
            warn!("Redis cache write failed for user {}: {}", key.user_id, e);
        }
    }

    async fn invalidate_user(&self, user_id: i64) {
        if let Err(e) = self.try_invalidate(user_id).await {
            warn!("Redis cache invalidation failed for user {}: {}", user_id, e);
        }
    }
}

pub struct NoCache;

#[async_trait]
impl RecommendationCache for NoCache {
    async fn get(&self, _key: &CacheKey) -> Option<Ranking> {
        None
    }

    async fn epoch(&self, _user_id: i64) -> Option<u64> {
        None
    }

    async fn put(&self, _key: CacheKey, _epoch: u64, _ranking: &Ranking) {}

    async fn invalidate_user(&self, _user_id: i64) {}
}
