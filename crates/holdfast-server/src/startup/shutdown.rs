//! Graceful shutdown handling
//!
//! One broadcast signal fans out to the expiry reaper, the realtime listener,
//! the rate limiter cleanup and the HTTP server. Stopping the realtime
//! listener closes every socket, which runs disconnect cleanup and releases
//! the locks those actors held.

use std::time::Duration;

use actix_web::dev::ServerHandle;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

#[derive(Clone)]
pub struct ShutdownSignal {
    sender: broadcast::Sender<()>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(1);
        Self { sender }
    }

    /// Signal that fires on Ctrl+C or SIGTERM
    pub fn install() -> Self {
        let shutdown = Self::new();
        let trigger = shutdown.clone();

        tokio::spawn(async move {
            tokio::select! {
                _ = ctrl_c() => info!("Received Ctrl+C, releasing locks and shutting down"),
                _ = terminate() => info!("Received SIGTERM, releasing locks and shutting down"),
            }
            trigger.shutdown();
        });

        shutdown
    }

    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.sender.subscribe()
    }

    pub fn shutdown(&self) {
        let _ = self.sender.send(());
    }

    /// Stop the HTTP server gracefully once the signal fires
    ///
    /// The server runs with its own signal handling disabled.
    pub fn stop_http_server(&self, handle: ServerHandle) -> JoinHandle<()> {
        let mut rx = self.subscribe();
        tokio::spawn(async move {
            let _ = rx.recv().await;
            info!("Stopping lock API");
            handle.stop(true).await;
        })
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
}

#[cfg(unix)]
async fn terminate() {
    match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
        Ok(mut signal) => {
            signal.recv().await;
        }
        Err(e) => {
            error!(error = %e, "Failed to install SIGTERM handler");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminate() {
    std::future::pending::<()>().await;
}

/// Wait for the reaper, the realtime listener and other background tasks,
/// giving up after `timeout`
pub async fn join_with_timeout(handles: Vec<JoinHandle<()>>, timeout: Duration) {
    let joined = tokio::time::timeout(timeout, futures::future::join_all(handles)).await;
    match joined {
        Ok(results) => {
            for result in results {
                if let Err(e) = result {
                    warn!(error = %e, "Background task ended abnormally");
                }
            }
        }
        Err(_) => {
            warn!(timeout_ms = timeout.as_millis() as u64, "Background tasks did not stop in time");
        }
    }
}
