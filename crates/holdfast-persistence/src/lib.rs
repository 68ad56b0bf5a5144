//! Holdfast Persistence - Durable lock store
//!
//! This crate provides:
//! - SeaORM entity definitions for the `appointment_lock` and `users` tables
//! - Persistence trait abstractions over the storage backend
//! - An external database backend (MySQL/PostgreSQL) and an embedded
//!   in-process backend for single-node deployments and tests

pub mod embedded;
pub mod entity;
pub mod model;
pub mod sql;
pub mod traits;

// Re-export sea-orm for convenience
pub use sea_orm;

// Re-export persistence traits
pub use traits::{LockPersistence, PersistenceService, UserPersistence};

// Re-export backends
pub use embedded::EmbeddedPersistService;
pub use sql::ExternalDbPersistService;

// Re-export model types
pub use model::{LockStorageData, StorageMode, UserInfo};
