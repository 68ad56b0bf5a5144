// Core data models and structures
// This file defines lock timing, realtime settings and connection handles

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::Sender;

use holdfast_common::VerifiedActor;

use crate::event::ServerEvent;

pub const LOCK_DURATION: &str = "lock_duration";
pub const LOCK_RENEWAL_THRESHOLD: &str = "lock_renewal_threshold";
pub const ACQUISITION_TOKEN_TTL: &str = "acquisition_token_ttl";
pub const LOCK_STORE_TIMEOUT: &str = "lock_store_timeout";
pub const LOCK_CLEANUP_INTERVAL: &str = "lock_cleanup_interval";
pub const CURSOR_UPDATE_THROTTLE: &str = "cursor_update_throttle";
pub const REALTIME_OUTBOUND_BUFFER: &str = "realtime_outbound_buffer";

pub const DEFAULT_LOCK_DURATION_MS: u64 = 300_000;
pub const DEFAULT_LOCK_RENEWAL_THRESHOLD_MS: u64 = 120_000;
pub const DEFAULT_ACQUISITION_TOKEN_TTL_MS: u64 = 10_000;
pub const DEFAULT_LOCK_STORE_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_LOCK_CLEANUP_INTERVAL_MS: u64 = 60_000;
pub const DEFAULT_CURSOR_UPDATE_THROTTLE_MS: u64 = 50;
pub const DEFAULT_REALTIME_OUTBOUND_BUFFER: usize = 256;

/// Lock timing used by the lock manager, the gate and the reaper
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockConfig {
    pub lock_duration: Duration,
    pub renewal_threshold: Duration,
    pub acquisition_token_ttl: Duration,
    pub store_timeout: Duration,
    pub cleanup_interval: Duration,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            lock_duration: Duration::from_millis(DEFAULT_LOCK_DURATION_MS),
            renewal_threshold: Duration::from_millis(DEFAULT_LOCK_RENEWAL_THRESHOLD_MS),
            acquisition_token_ttl: Duration::from_millis(DEFAULT_ACQUISITION_TOKEN_TTL_MS),
            store_timeout: Duration::from_millis(DEFAULT_LOCK_STORE_TIMEOUT_MS),
            cleanup_interval: Duration::from_millis(DEFAULT_LOCK_CLEANUP_INTERVAL_MS),
        }
    }
}

/// Realtime broadcaster settings
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RealtimeConfig {
    pub cursor_throttle: Duration,
    pub outbound_buffer: usize,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            cursor_throttle: Duration::from_millis(DEFAULT_CURSOR_UPDATE_THROTTLE_MS),
            outbound_buffer: DEFAULT_REALTIME_OUTBOUND_BUFFER,
        }
    }
}

/// Application configuration wrapper
/// Provides access to lock and realtime settings
#[derive(Clone, Debug)]
pub struct Configuration {
    pub config: config::Config,
}

impl Configuration {
    /// Create a new configuration from a Config instance
    pub fn from_config(config: config::Config) -> Self {
        Self { config }
    }

    fn millis(&self, key: &str, default: u64) -> Duration {
        let value = self
            .config
            .get_int(key)
            .ok()
            .filter(|v| *v > 0)
            .map_or(default, |v| v as u64);
        Duration::from_millis(value)
    }

    /// Lock lifetime after acquire or renew (default: 300000ms)
    pub fn lock_duration(&self) -> Duration {
        self.millis(LOCK_DURATION, DEFAULT_LOCK_DURATION_MS)
    }

    /// Remaining time below which renewal is allowed (default: 120000ms)
    pub fn lock_renewal_threshold(&self) -> Duration {
        self.millis(LOCK_RENEWAL_THRESHOLD, DEFAULT_LOCK_RENEWAL_THRESHOLD_MS)
    }

    /// Acquisition gate token TTL (default: 10000ms)
    pub fn acquisition_token_ttl(&self) -> Duration {
        self.millis(ACQUISITION_TOKEN_TTL, DEFAULT_ACQUISITION_TOKEN_TTL_MS)
    }

    /// Timeout for every durable store and cache call (default: 5000ms)
    pub fn lock_store_timeout(&self) -> Duration {
        self.millis(LOCK_STORE_TIMEOUT, DEFAULT_LOCK_STORE_TIMEOUT_MS)
    }

    /// Reaper sweep period (default: 60000ms)
    pub fn lock_cleanup_interval(&self) -> Duration {
        self.millis(LOCK_CLEANUP_INTERVAL, DEFAULT_LOCK_CLEANUP_INTERVAL_MS)
    }

    /// Minimum spacing of relayed cursor updates per actor (default: 50ms)
    pub fn cursor_update_throttle(&self) -> Duration {
        self.millis(CURSOR_UPDATE_THROTTLE, DEFAULT_CURSOR_UPDATE_THROTTLE_MS)
    }

    /// Per-connection outbound queue capacity (default: 256)
    pub fn realtime_outbound_buffer(&self) -> usize {
        self.config
            .get_int(REALTIME_OUTBOUND_BUFFER)
            .ok()
            .filter(|v| *v > 0)
            .map_or(DEFAULT_REALTIME_OUTBOUND_BUFFER, |v| v as usize)
    }

    pub fn lock_config(&self) -> LockConfig {
        LockConfig {
            lock_duration: self.lock_duration(),
            renewal_threshold: self.lock_renewal_threshold(),
            acquisition_token_ttl: self.acquisition_token_ttl(),
            store_timeout: self.lock_store_timeout(),
            cleanup_interval: self.lock_cleanup_interval(),
        }
    }

    pub fn realtime_config(&self) -> RealtimeConfig {
        RealtimeConfig {
            cursor_throttle: self.cursor_update_throttle(),
            outbound_buffer: self.realtime_outbound_buffer(),
        }
    }
}

/// A live realtime connection
#[derive(Clone, Debug)]
pub struct RealtimeClient {
    pub connection_id: String,
    pub actor: VerifiedActor,
    pub remote_addr: String,
    pub create_time: i64,
    pub tx: Sender<ServerEvent>,
}

impl RealtimeClient {
    pub fn new(
        connection_id: impl Into<String>,
        actor: VerifiedActor,
        remote_addr: impl Into<String>,
        tx: Sender<ServerEvent>,
    ) -> Self {
        Self {
            connection_id: connection_id.into(),
            actor,
            remote_addr: remote_addr.into(),
            create_time: chrono::Utc::now().timestamp_millis(),
            tx,
        }
    }
}
