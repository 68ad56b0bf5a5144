//! Application startup: logging, storage wiring, servers and shutdown.

mod http;
mod logging;
mod realtime;
mod shutdown;

use std::sync::Arc;

use tracing::info;

use holdfast_core::{CacheMode, LocalLockCache, LockCache, LockManager, RealtimeBroadcaster, RedisLockCache};
use holdfast_persistence::{
    EmbeddedPersistService, ExternalDbPersistService, PersistenceService, StorageMode,
};

use crate::model::{AppState, Configuration};

pub use http::main_server;
pub use logging::{LogRotation, LoggingConfig, LoggingGuard, init_logging};
pub use realtime::{RealtimeError, RealtimeServer};
pub use shutdown::{ShutdownSignal, join_with_timeout};

/// Open the configured stores and build the shared lock services
pub async fn build_app_state(configuration: Configuration) -> anyhow::Result<AppState> {
    let persistence: Arc<dyn PersistenceService> = match configuration.persistence_mode()? {
        StorageMode::ExternalDb => {
            let db = configuration.database_connection().await?;
            Arc::new(ExternalDbPersistService::new(db))
        }
        StorageMode::Embedded => Arc::new(EmbeddedPersistService::new()),
    };
    info!("Persistence mode: {}", persistence.storage_mode());

    let cache_mode = configuration.cache_mode()?;
    let cache: Arc<dyn LockCache> = match cache_mode {
        CacheMode::Redis => {
            let url = configuration
                .redis_url()
                .ok_or_else(|| anyhow::anyhow!("redis_url is required for the redis cache"))?;
            Arc::new(RedisLockCache::connect(&url).await?)
        }
        CacheMode::Local => Arc::new(LocalLockCache::default()),
    };
    info!("Cache mode: {}", cache_mode);

    let core_config = configuration.to_core_config();
    let lock_manager = Arc::new(LockManager::new(
        persistence.clone(),
        cache,
        core_config.lock_config(),
    ));
    let broadcaster = Arc::new(RealtimeBroadcaster::new(
        lock_manager.clone(),
        core_config.realtime_config(),
    ));

    Ok(AppState::new(
        configuration,
        persistence,
        lock_manager,
        broadcaster,
    ))
}
