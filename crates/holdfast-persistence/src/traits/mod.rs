//! Persistence traits for the durable lock store
//!
//! Backends: external database (MySQL/PostgreSQL) and embedded in-process
//! storage.

pub mod lock;
pub mod user;

pub use lock::LockPersistence;
pub use user::UserPersistence;

use async_trait::async_trait;

use crate::model::StorageMode;

/// Unified persistence service trait
#[async_trait]
pub trait PersistenceService: LockPersistence + UserPersistence + Send + Sync {
    /// Get the current storage mode
    fn storage_mode(&self) -> StorageMode;

    /// Health check for the storage backend
    async fn health_check(&self) -> anyhow::Result<()>;
}
