// Record lock manager
// Reconciles the durable lock store with the fast cache mirror and enforces
// ownership and expiry rules

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use holdfast_common::{ActorInfo, Lock, LockError, is_valid_id, lock_key};
use holdfast_persistence::{LockStorageData, PersistenceService};

use super::cache::LockCache;
use super::gate::AcquisitionGate;
use crate::model::LockConfig;

/// Whether a lock with `remaining` time left may be renewed
///
/// The boundary is inclusive: exactly `threshold` remaining is allowed.
pub fn renewal_due(remaining: chrono::Duration, threshold: Duration) -> bool {
    remaining.num_milliseconds() <= threshold.as_millis() as i64
}

fn validate_id(value: &str, what: &str) -> Result<(), LockError> {
    if is_valid_id(value) {
        Ok(())
    } else {
        Err(LockError::IllegalArgument(format!("{} must not be empty", what)))
    }
}

fn lock_from_storage(data: LockStorageData) -> Result<Lock, LockError> {
    let expires_at = DateTime::<Utc>::from_timestamp_millis(data.expires_at).ok_or_else(|| {
        LockError::StoreUnavailable(anyhow::anyhow!(
            "stored expiry out of range for record '{}'",
            data.record_id
        ))
    })?;

    Ok(Lock {
        record_id: data.record_id,
        holder_id: data.holder_id,
        holder_info: ActorInfo::new(data.holder_name, data.holder_email),
        expires_at,
    })
}

pub struct LockManager {
    store: Arc<dyn PersistenceService>,
    cache: Arc<dyn LockCache>,
    gate: AcquisitionGate,
    config: LockConfig,
}

impl LockManager {
    pub fn new(
        store: Arc<dyn PersistenceService>,
        cache: Arc<dyn LockCache>,
        config: LockConfig,
    ) -> Self {
        let gate = AcquisitionGate::new(
            cache.clone(),
            config.acquisition_token_ttl,
            config.store_timeout,
        );

        info!(
            lock_duration_ms = config.lock_duration.as_millis() as u64,
            renewal_threshold_ms = config.renewal_threshold.as_millis() as u64,
            storage_mode = %store.storage_mode(),
            "LockManager initialized"
        );

        Self {
            store,
            cache,
            gate,
            config,
        }
    }

    /// Run a durable store call under the store timeout
    async fn store_call<T, F>(&self, call: F) -> Result<T, LockError>
    where
        F: Future<Output = anyhow::Result<T>>,
    {
        tokio::time::timeout(self.config.store_timeout, call)
            .await
            .map_err(|_| LockError::StoreUnavailable(anyhow::anyhow!("lock store timed out")))?
            .map_err(LockError::StoreUnavailable)
    }

    /// Mirror a lock's expiry into the cache; failures leave the durable write in place
    async fn mirror_set(&self, lock: &Lock) {
        let Ok(ttl) = lock.remaining_at(Utc::now()).to_std() else {
            return;
        };

        let key = lock_key(&lock.record_id);
        match tokio::time::timeout(
            self.config.store_timeout,
            self.cache.set(&key, &lock.holder_id, ttl),
        )
        .await
        {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(record_id = %lock.record_id, error = %e, "Failed to mirror lock into cache"),
            Err(_) => warn!(record_id = %lock.record_id, "Timed out mirroring lock into cache"),
        }
    }

    async fn mirror_delete(&self, record_id: &str) {
        let key = lock_key(record_id);
        match tokio::time::timeout(self.config.store_timeout, self.cache.delete(&key)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(record_id = %record_id, error = %e, "Failed to clear lock mirror"),
            Err(_) => warn!(record_id = %record_id, "Timed out clearing lock mirror"),
        }
    }

    /// Clear the mirror only while it still names `holder_id`
    async fn mirror_delete_held(&self, record_id: &str, holder_id: &str) {
        let key = lock_key(record_id);
        match tokio::time::timeout(
            self.config.store_timeout,
            self.cache.delete_if_value(&key, holder_id),
        )
        .await
        {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => warn!(record_id = %record_id, error = %e, "Failed to clear lock mirror"),
            Err(_) => warn!(record_id = %record_id, "Timed out clearing lock mirror"),
        }
    }

    /// Delete a row only if it is still expired at `now`
    ///
    /// A row renewed or re-acquired since it was read is left alone.
    async fn purge_expired(&self, record_id: &str, holder_id: &str, now: i64) -> Result<bool, LockError> {
        let deleted = self
            .store_call(self.store.lock_delete_expired(record_id, now))
            .await?;
        if deleted {
            self.mirror_delete_held(record_id, holder_id).await;
            info!(record_id = %record_id, holder_id = %holder_id, "Expired lock released");
        }
        Ok(deleted)
    }

    /// Current live lock on a record
    ///
    /// An expired row seen here is purged before reporting the record as
    /// unlocked. If the row changed hands in the meantime it is read again.
    pub async fn get_status(&self, record_id: &str) -> Result<Option<Lock>, LockError> {
        validate_id(record_id, "record id")?;

        let Some(data) = self.store_call(self.store.lock_find(record_id)).await? else {
            return Ok(None);
        };

        let lock = lock_from_storage(data)?;
        let now = Utc::now();
        if !lock.is_expired_at(now) {
            return Ok(Some(lock));
        }

        debug!(record_id = %record_id, holder_id = %lock.holder_id, "Purging expired lock on read");
        if self
            .purge_expired(record_id, &lock.holder_id, now.timestamp_millis())
            .await?
        {
            return Ok(None);
        }

        let Some(data) = self.store_call(self.store.lock_find(record_id)).await? else {
            return Ok(None);
        };
        let current = lock_from_storage(data)?;
        Ok((!current.is_expired_at(Utc::now())).then_some(current))
    }

    /// Acquire or self-renew the lock on a record
    pub async fn acquire(
        &self,
        record_id: &str,
        actor_id: &str,
        actor_info: ActorInfo,
    ) -> Result<Lock, LockError> {
        validate_id(record_id, "record id")?;
        validate_id(actor_id, "actor id")?;

        let token = self.gate.enter(record_id, actor_id).await?;
        let result = self.acquire_gated(record_id, actor_id, actor_info).await;
        self.gate.leave(token).await;

        match &result {
            Ok(lock) => info!(
                record_id = %record_id,
                actor_id = %actor_id,
                expires_at = %lock.expires_at,
                "Lock acquired"
            ),
            Err(e) => debug!(record_id = %record_id, actor_id = %actor_id, error = %e, "Lock acquire rejected"),
        }

        result
    }

    async fn acquire_gated(
        &self,
        record_id: &str,
        actor_id: &str,
        actor_info: ActorInfo,
    ) -> Result<Lock, LockError> {
        if let Some(existing) = self.get_status(record_id).await?
            && !existing.is_held_by(actor_id)
        {
            return Err(LockError::HeldByOther {
                holder_name: existing.holder_info.name,
            });
        }

        let expires_at = Utc::now().timestamp_millis() + self.config.lock_duration.as_millis() as i64;
        let data = self
            .store_call(self.store.lock_upsert(record_id, actor_id, expires_at))
            .await?;

        let mut lock = lock_from_storage(data)?;
        lock.holder_info = actor_info;

        self.mirror_set(&lock).await;
        Ok(lock)
    }

    /// Release a lock held by `actor_id`
    pub async fn release(&self, record_id: &str, actor_id: &str) -> Result<(), LockError> {
        validate_id(record_id, "record id")?;

        let Some(data) = self.store_call(self.store.lock_find(record_id)).await? else {
            return Err(LockError::NotFound);
        };
        if data.holder_id != actor_id {
            return Err(LockError::NotOwner);
        }

        // The row may have changed hands since it was read
        let deleted = self
            .store_call(self.store.lock_delete_by_holder(record_id, actor_id))
            .await?;
        if !deleted {
            return Err(LockError::NotOwner);
        }

        self.mirror_delete_held(record_id, actor_id).await;
        info!(record_id = %record_id, actor_id = %actor_id, "Lock released");
        Ok(())
    }

    /// Remove the lock on a record regardless of holder
    ///
    /// Idempotent. Returns whether a row was actually removed.
    pub async fn force_release(&self, record_id: &str) -> Result<bool, LockError> {
        validate_id(record_id, "record id")?;

        let deleted = self.store_call(self.store.lock_delete(record_id)).await?;
        self.mirror_delete(record_id).await;

        if deleted {
            info!(record_id = %record_id, "Lock force-released");
        }
        Ok(deleted)
    }

    /// Extend a lock held by `actor_id` once it is inside the renewal window
    pub async fn renew_lock(&self, record_id: &str, actor_id: &str) -> Result<Lock, LockError> {
        validate_id(record_id, "record id")?;

        let Some(data) = self.store_call(self.store.lock_find(record_id)).await? else {
            return Err(LockError::NotOwner);
        };
        if data.holder_id != actor_id {
            return Err(LockError::NotOwner);
        }

        let mut lock = lock_from_storage(data)?;
        let now = Utc::now();
        if lock.is_expired_at(now) {
            self.purge_expired(record_id, actor_id, now.timestamp_millis())
                .await?;
            return Err(LockError::NotOwner);
        }

        let remaining = lock.remaining_at(now);
        if !renewal_due(remaining, self.config.renewal_threshold) {
            return Err(LockError::RenewalTooEarly {
                remaining_ms: remaining.num_milliseconds(),
            });
        }

        let expires_at = now.timestamp_millis() + self.config.lock_duration.as_millis() as i64;
        let updated = self
            .store_call(self.store.lock_update_expiry(record_id, actor_id, expires_at))
            .await?;
        if !updated {
            return Err(LockError::NotOwner);
        }

        lock.expires_at = DateTime::<Utc>::from_timestamp_millis(expires_at).unwrap_or(lock.expires_at);
        self.mirror_set(&lock).await;

        info!(record_id = %record_id, actor_id = %actor_id, expires_at = %lock.expires_at, "Lock renewed");
        Ok(lock)
    }

    /// Succeeds only while `actor_id` holds a live lock on the record
    pub async fn verify_holder(&self, record_id: &str, actor_id: &str) -> Result<Lock, LockError> {
        match self.get_status(record_id).await? {
            Some(lock) if lock.is_held_by(actor_id) => Ok(lock),
            _ => Err(LockError::NotOwner),
        }
    }

    /// Release every lock past expiry; returns the released record ids
    pub async fn sweep_expired(&self) -> Result<Vec<String>, LockError> {
        let now = Utc::now().timestamp_millis();
        let expired = self.store_call(self.store.lock_find_expired(now)).await?;

        let mut released = Vec::with_capacity(expired.len());
        for data in expired {
            match self
                .purge_expired(&data.record_id, &data.holder_id, now)
                .await
            {
                Ok(true) => released.push(data.record_id),
                Ok(false) => {}
                Err(e) => {
                    warn!(record_id = %data.record_id, error = %e, "Failed to release expired lock");
                }
            }
        }

        if !released.is_empty() {
            info!(count = released.len(), "Swept expired locks");
        }
        Ok(released)
    }

    // Guarded delete so a row taken over since the scan survives
    async fn release_held(&self, record_id: &str, actor_id: &str) -> Result<bool, LockError> {
        let deleted = self
            .store_call(self.store.lock_delete_by_holder(record_id, actor_id))
            .await?;
        if deleted {
            self.mirror_delete_held(record_id, actor_id).await;
        }
        Ok(deleted)
    }

    /// Release every lock held by an actor; returns the released record ids
    pub async fn release_all_for(&self, actor_id: &str) -> Result<Vec<String>, LockError> {
        let held = self
            .store_call(self.store.lock_find_by_holder(actor_id))
            .await?;

        let mut released = Vec::with_capacity(held.len());
        for data in held {
            match self.release_held(&data.record_id, actor_id).await {
                Ok(true) => released.push(data.record_id),
                Ok(false) => {}
                Err(e) => {
                    warn!(record_id = %data.record_id, actor_id = %actor_id, error = %e, "Failed to release actor lock");
                }
            }
        }

        if !released.is_empty() {
            info!(actor_id = %actor_id, count = released.len(), "Released all locks for actor");
        }
        Ok(released)
    }
}
