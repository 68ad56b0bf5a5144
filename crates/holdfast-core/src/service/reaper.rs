// Expiry reaper
// Periodically force-releases locks whose expiry has passed

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::broadcast::RealtimeBroadcaster;
use super::lock::LockManager;

pub struct ExpiryReaper {
    manager: Arc<LockManager>,
    broadcaster: Option<Arc<RealtimeBroadcaster>>,
    interval: Duration,
}

impl ExpiryReaper {
    pub fn new(manager: Arc<LockManager>, interval: Duration) -> Self {
        Self {
            manager,
            broadcaster: None,
            interval,
        }
    }

    /// Tell room members when their lock is reclaimed
    pub fn with_broadcaster(mut self, broadcaster: Arc<RealtimeBroadcaster>) -> Self {
        self.broadcaster = Some(broadcaster);
        self
    }

    /// Run a single sweep; errors are logged and the released ids returned
    pub async fn sweep(&self) -> Vec<String> {
        match self.manager.sweep_expired().await {
            Ok(released) => {
                if let Some(broadcaster) = &self.broadcaster {
                    broadcaster.notify_locks_reclaimed(&released);
                }
                released
            }
            Err(e) => {
                warn!(error = %e, "Expired lock sweep failed");
                Vec::new()
            }
        }
    }

    /// Start sweeping every interval until shutdown is signalled
    pub fn spawn(self, mut shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.interval);
            // The first tick fires immediately
            interval.tick().await;

            info!(interval_ms = self.interval.as_millis() as u64, "Expiry reaper started");
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let released = self.sweep().await;
                        debug!(count = released.len(), "Expiry reaper tick");
                    }
                    _ = shutdown.recv() => {
                        info!("Expiry reaper stopped");
                        break;
                    }
                }
            }
        })
    }
}
