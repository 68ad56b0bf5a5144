//! Holdfast Core - Record locking and realtime presence
//!
//! This crate provides:
//! - `LockManager`: dual-store lock lifecycle over the durable store and the fast cache
//! - `AcquisitionGate`: per-record mutual exclusion for concurrent acquire attempts
//! - `ExpiryReaper`: periodic sweep of expired locks
//! - `RealtimeBroadcaster`: room-scoped fan-out of lock and cursor events

pub mod event;
pub mod model;
pub mod service;

// Re-export commonly used types
pub use event::{ClientEvent, ServerEvent};
pub use model::{Configuration, LockConfig, RealtimeClient, RealtimeConfig};
pub use service::broadcast::{PresenceEntry, RealtimeBroadcaster};
pub use service::cache::{CacheMode, LocalLockCache, LockCache, RedisLockCache};
pub use service::gate::{AcquisitionGate, GateToken};
pub use service::lock::LockManager;
pub use service::reaper::ExpiryReaper;
