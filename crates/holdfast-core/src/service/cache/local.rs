// In-process lock cache backed by moka with per-entry expiry

use std::time::{Duration, Instant};

use async_trait::async_trait;
use moka::Expiry;
use moka::future::Cache;
use moka::ops::compute::{CompResult, Op};

use super::LockCache;

#[derive(Clone, Debug)]
struct CachedValue {
    value: String,
    ttl: Duration,
}

struct PerEntryExpiry;

impl Expiry<String, CachedValue> for PerEntryExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &CachedValue,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &CachedValue,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// Single-node cache, for standalone deployments and tests
#[derive(Clone)]
pub struct LocalLockCache {
    cache: Cache<String, CachedValue>,
}

impl Default for LocalLockCache {
    fn default() -> Self {
        Self::new(100_000)
    }
}

impl LocalLockCache {
    pub fn new(max_capacity: u64) -> Self {
        Self {
            cache: Cache::builder()
                .max_capacity(max_capacity)
                .expire_after(PerEntryExpiry)
                .build(),
        }
    }
}

#[async_trait]
impl LockCache for LocalLockCache {
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> anyhow::Result<bool> {
        let entry = self
            .cache
            .entry(key.to_string())
            .or_insert_with(async {
                CachedValue {
                    value: value.to_string(),
                    ttl,
                }
            })
            .await;
        Ok(entry.is_fresh())
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> anyhow::Result<()> {
        self.cache
            .insert(
                key.to_string(),
                CachedValue {
                    value: value.to_string(),
                    ttl,
                },
            )
            .await;
        Ok(())
    }

    async fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        Ok(self.cache.get(key).await.map(|v| v.value))
    }

    async fn delete(&self, key: &str) -> anyhow::Result<()> {
        self.cache.invalidate(key).await;
        Ok(())
    }

    async fn delete_if_value(&self, key: &str, value: &str) -> anyhow::Result<bool> {
        let result = self
            .cache
            .entry(key.to_string())
            .and_compute_with(|current| {
                let op = match current {
                    Some(entry) if entry.value().value == value => Op::Remove,
                    _ => Op::Nop,
                };
                std::future::ready(op)
            })
            .await;
        Ok(matches!(result, CompResult::Removed(_)))
    }
}
