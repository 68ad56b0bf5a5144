//! Lock persistence trait
//!
//! One row per locked record, keyed by record id. Ownership-sensitive writes
//! take the expected holder so the backend re-validates it in the same
//! statement.

use async_trait::async_trait;

use crate::model::LockStorageData;

/// Durable lock store operations
#[async_trait]
pub trait LockPersistence: Send + Sync {
    /// Find the lock row for a record, joined with holder info
    async fn lock_find(&self, record_id: &str) -> anyhow::Result<Option<LockStorageData>>;

    /// Insert or overwrite the lock row for a record
    async fn lock_upsert(
        &self,
        record_id: &str,
        holder_id: &str,
        expires_at: i64,
    ) -> anyhow::Result<LockStorageData>;

    /// Move the expiry of a lock still held by `holder_id`
    ///
    /// Returns `false` if the row is gone or held by someone else.
    async fn lock_update_expiry(
        &self,
        record_id: &str,
        holder_id: &str,
        expires_at: i64,
    ) -> anyhow::Result<bool>;

    /// Delete the lock row regardless of holder; `false` if there was none
    async fn lock_delete(&self, record_id: &str) -> anyhow::Result<bool>;

    /// Delete the lock row only if held by `holder_id`
    async fn lock_delete_by_holder(&self, record_id: &str, holder_id: &str)
    -> anyhow::Result<bool>;

    /// Delete the lock row only if its expiry is at or before `now`
    async fn lock_delete_expired(&self, record_id: &str, now: i64) -> anyhow::Result<bool>;

    /// Find rows whose expiry is strictly before `now`
    async fn lock_find_expired(&self, now: i64) -> anyhow::Result<Vec<LockStorageData>>;

    /// Find rows held by an actor
    async fn lock_find_by_holder(&self, holder_id: &str) -> anyhow::Result<Vec<LockStorageData>>;
}
