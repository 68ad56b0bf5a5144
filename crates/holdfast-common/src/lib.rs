//! Holdfast Common - Shared types and error codes
//!
//! This crate provides the foundational types used across all Holdfast components:
//! - Lock error taxonomy and API error codes
//! - Actor and lock models shared by the lock manager, the HTTP API and the
//!   realtime transport
//! - Common constants

pub mod error;
pub mod model;

// Re-exports for convenience
pub use error::{ErrorCode, ErrorKind, LockError};
pub use model::{ActorInfo, Lock, VerifiedActor};

/// Role name that grants privileged operations such as force-release
pub const ADMIN_ROLE: &str = "admin";

/// Cache key prefix for lock expiry mirrors
pub const LOCK_KEY_PREFIX: &str = "lock:";

/// Cache key prefix for acquisition gate tokens
pub const ACQUIRE_KEY_PREFIX: &str = "acquire:";

/// Build the cache mirror key for a record
pub fn lock_key(record_id: &str) -> String {
    format!("{}{}", LOCK_KEY_PREFIX, record_id)
}

/// Build the acquisition gate key for a record
pub fn acquire_key(record_id: &str) -> String {
    format!("{}{}", ACQUIRE_KEY_PREFIX, record_id)
}

/// Check that an identifier is usable as a record or actor id
pub fn is_valid_id(id: &str) -> bool {
    !id.trim().is_empty()
}
