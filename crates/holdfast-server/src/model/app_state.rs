//! Application state shared across all handlers

use std::sync::Arc;

use holdfast_core::{LockManager, RealtimeBroadcaster};
use holdfast_persistence::PersistenceService;

use super::config::Configuration;

#[derive(Clone)]
pub struct AppState {
    pub configuration: Configuration,
    /// Durable lock store, also used for health checks and user lookups
    pub persistence: Arc<dyn PersistenceService>,
    pub lock_manager: Arc<LockManager>,
    pub broadcaster: Arc<RealtimeBroadcaster>,
    /// Process start, epoch milliseconds
    pub started_at: i64,
}

impl AppState {
    pub fn new(
        configuration: Configuration,
        persistence: Arc<dyn PersistenceService>,
        lock_manager: Arc<LockManager>,
        broadcaster: Arc<RealtimeBroadcaster>,
    ) -> Self {
        Self {
            configuration,
            persistence,
            lock_manager,
            broadcaster,
            started_at: chrono::Utc::now().timestamp_millis(),
        }
    }

    pub fn persistence(&self) -> &dyn PersistenceService {
        self.persistence.as_ref()
    }

    /// Shared secret used to verify session tokens
    pub fn jwt_secret(&self) -> String {
        self.configuration.jwt_secret()
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("configuration", &self.configuration)
            .field("persistence", &self.persistence.storage_mode())
            .field("lock_manager", &"<LockManager>")
            .field("connections", &self.broadcaster.connection_count())
            .field("started_at", &self.started_at)
            .finish()
    }
}
