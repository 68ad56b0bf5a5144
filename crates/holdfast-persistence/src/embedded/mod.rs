// Embedded persistence backend using in-process concurrent maps
// Provides standalone (single-node) storage without an external database

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::model::{LockStorageData, StorageMode, UserInfo};
use crate::traits::{LockPersistence, PersistenceService, UserPersistence};

#[derive(Clone, Debug)]
struct LockRow {
    holder_id: String,
    expires_at: i64,
}

/// Standalone embedded persistence
///
/// Rows live for the lifetime of the process. Every conditional write runs
/// under the map's per-shard entry lock, so the holder check and the write
/// happen atomically.
#[derive(Default)]
pub struct EmbeddedPersistService {
    locks: DashMap<String, LockRow>,
    users: DashMap<String, UserInfo>,
}

impl EmbeddedPersistService {
    pub fn new() -> Self {
        Self::default()
    }

    fn to_storage(&self, record_id: &str, row: &LockRow) -> LockStorageData {
        let (holder_name, holder_email) = match self.users.get(&row.holder_id) {
            Some(user) => (user.name.clone(), user.email.clone()),
            None => (row.holder_id.clone(), String::new()),
        };

        LockStorageData {
            record_id: record_id.to_string(),
            holder_id: row.holder_id.clone(),
            holder_name,
            holder_email,
            expires_at: row.expires_at,
        }
    }

    fn collect<F>(&self, predicate: F) -> Vec<LockStorageData>
    where
        F: Fn(&LockRow) -> bool,
    {
        // Snapshot first so no shard lock is held while reading users
        let rows: Vec<(String, LockRow)> = self
            .locks
            .iter()
            .filter(|entry| predicate(entry.value()))
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();

        rows.iter()
            .map(|(record_id, row)| self.to_storage(record_id, row))
            .collect()
    }
}

#[async_trait]
impl PersistenceService for EmbeddedPersistService {
    fn storage_mode(&self) -> StorageMode {
        StorageMode::Embedded
    }

    async fn health_check(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

#[async_trait]
impl LockPersistence for EmbeddedPersistService {
    async fn lock_find(&self, record_id: &str) -> anyhow::Result<Option<LockStorageData>> {
        let row = self.locks.get(record_id).map(|r| r.value().clone());
        Ok(row.map(|row| self.to_storage(record_id, &row)))
    }

    async fn lock_upsert(
        &self,
        record_id: &str,
        holder_id: &str,
        expires_at: i64,
    ) -> anyhow::Result<LockStorageData> {
        let row = LockRow {
            holder_id: holder_id.to_string(),
            expires_at,
        };
        self.locks.insert(record_id.to_string(), row.clone());
        Ok(self.to_storage(record_id, &row))
    }

    async fn lock_update_expiry(
        &self,
        record_id: &str,
        holder_id: &str,
        expires_at: i64,
    ) -> anyhow::Result<bool> {
        match self.locks.get_mut(record_id) {
            Some(mut row) if row.holder_id == holder_id => {
                row.expires_at = expires_at;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn lock_delete(&self, record_id: &str) -> anyhow::Result<bool> {
        Ok(self.locks.remove(record_id).is_some())
    }

    async fn lock_delete_by_holder(
        &self,
        record_id: &str,
        holder_id: &str,
    ) -> anyhow::Result<bool> {
        match self.locks.entry(record_id.to_string()) {
            Entry::Occupied(entry) if entry.get().holder_id == holder_id => {
                entry.remove();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn lock_delete_expired(&self, record_id: &str, now: i64) -> anyhow::Result<bool> {
        match self.locks.entry(record_id.to_string()) {
            Entry::Occupied(entry) if entry.get().expires_at <= now => {
                entry.remove();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn lock_find_expired(&self, now: i64) -> anyhow::Result<Vec<LockStorageData>> {
        Ok(self.collect(|row| row.expires_at < now))
    }

    async fn lock_find_by_holder(&self, holder_id: &str) -> anyhow::Result<Vec<LockStorageData>> {
        Ok(self.collect(|row| row.holder_id == holder_id))
    }
}

#[async_trait]
impl UserPersistence for EmbeddedPersistService {
    async fn user_find_by_id(&self, id: &str) -> anyhow::Result<Option<UserInfo>> {
        Ok(self.users.get(id).map(|u| u.value().clone()))
    }

    async fn user_save(&self, user: &UserInfo) -> anyhow::Result<()> {
        self.users.insert(user.id.clone(), user.clone());
        Ok(())
    }
}
