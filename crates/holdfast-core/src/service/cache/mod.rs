//! Fast lock cache
//!
//! An ephemeral key/value store with native per-key expiry. It backs the
//! acquisition gate and mirrors lock expiry; it is never the source of truth
//! for ownership.

mod local;
mod remote;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use local::LocalLockCache;
pub use remote::RedisLockCache;

#[async_trait]
pub trait LockCache: Send + Sync {
    /// Store `value` under `key` only if no live value exists
    ///
    /// Returns `true` if this call created the key.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> anyhow::Result<bool>;

    /// Store `value` under `key`, replacing any previous value and TTL
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> anyhow::Result<()>;

    async fn get(&self, key: &str) -> anyhow::Result<Option<String>>;

    async fn delete(&self, key: &str) -> anyhow::Result<()>;

    /// Delete `key` only if it still holds `value`
    async fn delete_if_value(&self, key: &str, value: &str) -> anyhow::Result<bool>;
}

/// Cache backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CacheMode {
    /// Shared Redis instance
    Redis,
    /// In-process cache (single node)
    Local,
}

impl std::fmt::Display for CacheMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheMode::Redis => write!(f, "redis"),
            CacheMode::Local => write!(f, "local"),
        }
    }
}

impl std::str::FromStr for CacheMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "redis" => Ok(CacheMode::Redis),
            "local" | "memory" => Ok(CacheMode::Local),
            _ => Err(format!("unknown cache mode: {}", s)),
        }
    }
}
