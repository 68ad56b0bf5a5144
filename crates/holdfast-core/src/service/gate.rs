// Acquisition gate
// Serializes concurrent acquire attempts on one record through a short-lived
// token in the shared cache

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use holdfast_common::{LockError, acquire_key};

use super::cache::LockCache;

/// Proof of holding the gate for one record
///
/// Dropping a token that was never handed back to `leave` (a cancelled
/// acquire) still releases the gate from a spawned task.
pub struct GateToken {
    key: String,
    value: String,
    cache: Arc<dyn LockCache>,
    timeout: Duration,
    released: bool,
}

impl std::fmt::Debug for GateToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GateToken")
            .field("key", &self.key)
            .field("value", &self.value)
            .field("timeout", &self.timeout)
            .field("released", &self.released)
            .finish_non_exhaustive()
    }
}

impl Drop for GateToken {
    fn drop(&mut self) {
        if self.released {
            return;
        }

        let key = std::mem::take(&mut self.key);
        let value = std::mem::take(&mut self.value);
        let cache = self.cache.clone();
        let timeout = self.timeout;
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                debug!(key = %key, "Releasing abandoned acquisition gate");
                handle.spawn(async move {
                    delete_token(cache.as_ref(), &key, &value, timeout).await;
                });
            }
            Err(_) => warn!(key = %key, "Acquisition gate dropped outside a runtime, left to expire"),
        }
    }
}

async fn delete_token(cache: &dyn LockCache, key: &str, value: &str, timeout: Duration) {
    match tokio::time::timeout(timeout, cache.delete_if_value(key, value)).await {
        Ok(Ok(true)) => {}
        Ok(Ok(false)) => {
            warn!(key = %key, "Acquisition gate token already gone on release");
        }
        Ok(Err(e)) => {
            warn!(key = %key, error = %e, "Failed to release acquisition gate");
        }
        Err(_) => {
            warn!(key = %key, "Timed out releasing acquisition gate");
        }
    }
}

pub struct AcquisitionGate {
    cache: Arc<dyn LockCache>,
    ttl: Duration,
    timeout: Duration,
}

impl AcquisitionGate {
    pub fn new(cache: Arc<dyn LockCache>, ttl: Duration, timeout: Duration) -> Self {
        Self {
            cache,
            ttl,
            timeout,
        }
    }

    /// Try to take the gate for `record_id`
    ///
    /// Fails immediately with `AcquisitionInProgress` if another attempt holds
    /// it; there is no retry or queueing.
    pub async fn enter(&self, record_id: &str, actor_id: &str) -> Result<GateToken, LockError> {
        let key = acquire_key(record_id);
        let value = format!("{}:{}", actor_id, uuid::Uuid::new_v4());

        let created = tokio::time::timeout(
            self.timeout,
            self.cache.set_if_absent(&key, &value, self.ttl),
        )
        .await
        .map_err(|_| LockError::CacheUnavailable(anyhow::anyhow!("acquisition gate timed out")))?
        .map_err(LockError::CacheUnavailable)?;

        if !created {
            debug!(record_id = %record_id, actor_id = %actor_id, "Acquisition gate busy");
            return Err(LockError::AcquisitionInProgress);
        }

        Ok(GateToken {
            key,
            value,
            cache: self.cache.clone(),
            timeout: self.timeout,
            released: false,
        })
    }

    /// Give the gate back; a failure only delays the next attempt until the TTL runs out
    pub async fn leave(&self, mut token: GateToken) {
        token.released = true;
        delete_token(self.cache.as_ref(), &token.key, &token.value, self.timeout).await;
    }
}
