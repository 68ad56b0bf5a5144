//! Configuration management for the Holdfast server
//!
//! Values are layered: `conf/application.yml` (optional), then environment
//! variables (`LOCK_DURATION` style flat keys, `__` for nesting such as
//! `SERVER__PORT`), then command line flags.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use config::{Config, Environment};
use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use tracing::{Level, warn};

use holdfast_auth::DEFAULT_JWT_SECRET;
use holdfast_core::CacheMode;
use holdfast_persistence::StorageMode;

use crate::middleware::rate_limit::RateLimitConfig;
use crate::startup::LoggingConfig;

pub const SERVER_ADDRESS: &str = "server.address";
pub const SERVER_PORT: &str = "server.port";
pub const REALTIME_PORT: &str = "realtime.port";
pub const JWT_SECRET: &str = "jwt_secret";
pub const PERSISTENCE_MODE: &str = "persistence.mode";
pub const CACHE_MODE: &str = "cache.mode";
pub const DATABASE_URL: &str = "database_url";
pub const REDIS_URL: &str = "redis_url";
pub const NODE_ENV: &str = "node_env";
pub const LOCK_RATE_LIMIT_WINDOW: &str = "lock_rate_limit_window";
pub const LOCK_RATE_LIMIT_MAX: &str = "lock_rate_limit_max";

pub const DEFAULT_SERVER_ADDRESS: &str = "0.0.0.0";
pub const DEFAULT_SERVER_PORT: u16 = 3001;
pub const DEFAULT_REALTIME_PORT: u16 = 3002;
pub const DEFAULT_LOCK_RATE_LIMIT_WINDOW_MS: u64 = 60_000;
pub const DEFAULT_LOCK_RATE_LIMIT_MAX: u32 = 10;

const PRODUCTION: &str = "production";

/// Command line arguments for the server
#[derive(Debug, Parser)]
#[command(name = "holdfast-server", version, about)]
struct Cli {
    #[arg(short = 'p', long = "port")]
    port: Option<u16>,
    #[arg(long = "realtime-port")]
    realtime_port: Option<u16>,
    #[arg(long = "db-url", env = "DATABASE_URL")]
    database_url: Option<String>,
    #[arg(long = "redis-url", env = "REDIS_URL")]
    redis_url: Option<String>,
    #[arg(short = 'm', long = "persistence-mode")]
    persistence_mode: Option<String>,
    #[arg(short = 'c', long = "config", default_value = "conf/application.yml")]
    config_file: String,
}

/// Application configuration loaded from config files and environment
#[derive(Clone, Debug, Default)]
pub struct Configuration {
    pub config: Config,
}

impl Configuration {
    pub fn new() -> anyhow::Result<Self> {
        let args = Cli::parse();

        let mut config_builder = Config::builder()
            .add_source(config::File::with_name(&args.config_file).required(false))
            .add_source(Environment::default().separator("__").try_parsing(true));

        if let Some(v) = args.port {
            config_builder = config_builder.set_override(SERVER_PORT, v)?;
        }
        if let Some(v) = args.realtime_port {
            config_builder = config_builder.set_override(REALTIME_PORT, v)?;
        }
        if let Some(v) = args.database_url {
            config_builder = config_builder.set_override(DATABASE_URL, v)?;
        }
        if let Some(v) = args.redis_url {
            config_builder = config_builder.set_override(REDIS_URL, v)?;
        }
        if let Some(v) = args.persistence_mode {
            config_builder = config_builder.set_override(PERSISTENCE_MODE, v)?;
        }

        let app_config = config_builder
            .build()
            .with_context(|| format!("failed to build configuration from {}", args.config_file))?;

        Ok(Configuration { config: app_config })
    }

    pub fn from_config(config: Config) -> Self {
        Configuration { config }
    }

    // ========================================================================
    // Server Configuration
    // ========================================================================

    pub fn server_address(&self) -> String {
        self.config
            .get_string(SERVER_ADDRESS)
            .unwrap_or(DEFAULT_SERVER_ADDRESS.to_string())
    }

    pub fn server_port(&self) -> u16 {
        self.config
            .get_int(SERVER_PORT)
            .ok()
            .and_then(|v| u16::try_from(v).ok())
            .unwrap_or(DEFAULT_SERVER_PORT)
    }

    pub fn realtime_port(&self) -> u16 {
        self.config
            .get_int(REALTIME_PORT)
            .ok()
            .and_then(|v| u16::try_from(v).ok())
            .unwrap_or(DEFAULT_REALTIME_PORT)
    }

    pub fn node_env(&self) -> String {
        self.config
            .get_string(NODE_ENV)
            .unwrap_or("development".to_string())
    }

    pub fn is_production(&self) -> bool {
        self.node_env().eq_ignore_ascii_case(PRODUCTION)
    }

    // ========================================================================
    // Auth Configuration
    // ========================================================================

    pub fn jwt_secret(&self) -> String {
        self.config
            .get_string(JWT_SECRET)
            .ok()
            .filter(|s| !s.is_empty())
            .unwrap_or(DEFAULT_JWT_SECRET.to_string())
    }

    pub fn is_default_jwt_secret(&self) -> bool {
        self.jwt_secret() == DEFAULT_JWT_SECRET
    }

    // ========================================================================
    // Storage Configuration
    // ========================================================================

    pub fn database_url(&self) -> Option<String> {
        self.config
            .get_string(DATABASE_URL)
            .ok()
            .filter(|s| !s.is_empty())
    }

    pub fn redis_url(&self) -> Option<String> {
        self.config.get_string(REDIS_URL).ok().filter(|s| !s.is_empty())
    }

    /// Explicit `persistence.mode`, or external-db when a database url is set
    pub fn persistence_mode(&self) -> anyhow::Result<StorageMode> {
        match self.config.get_string(PERSISTENCE_MODE) {
            Ok(mode) => mode.parse().map_err(anyhow::Error::msg),
            Err(_) if self.database_url().is_some() => Ok(StorageMode::ExternalDb),
            Err(_) => Ok(StorageMode::Embedded),
        }
    }

    /// Explicit `cache.mode`, or redis when a redis url is set
    pub fn cache_mode(&self) -> anyhow::Result<CacheMode> {
        match self.config.get_string(CACHE_MODE) {
            Ok(mode) => mode.parse().map_err(anyhow::Error::msg),
            Err(_) if self.redis_url().is_some() => Ok(CacheMode::Redis),
            Err(_) => Ok(CacheMode::Local),
        }
    }

    // ========================================================================
    // Rate Limit Configuration
    // ========================================================================

    pub fn lock_rate_limit_window(&self) -> Duration {
        let millis = self
            .config
            .get_int(LOCK_RATE_LIMIT_WINDOW)
            .ok()
            .filter(|v| *v > 0)
            .map_or(DEFAULT_LOCK_RATE_LIMIT_WINDOW_MS, |v| v as u64);
        Duration::from_millis(millis)
    }

    pub fn lock_rate_limit_max(&self) -> u32 {
        self.config
            .get_int(LOCK_RATE_LIMIT_MAX)
            .ok()
            .and_then(|v| u32::try_from(v).ok())
            .filter(|v| *v > 0)
            .unwrap_or(DEFAULT_LOCK_RATE_LIMIT_MAX)
    }

    pub fn lock_rate_limit_config(&self) -> RateLimitConfig {
        RateLimitConfig {
            max_requests: self.lock_rate_limit_max(),
            window_duration: self.lock_rate_limit_window(),
            enabled: self.config.get_bool("lock_rate_limit_enabled").unwrap_or(true),
        }
    }

    // ========================================================================
    // Logging Configuration
    // ========================================================================

    /// Environment logging settings, overridden by `logging.*` keys when present
    pub fn logging_config(&self) -> LoggingConfig {
        let mut logging = LoggingConfig::from_env();
        if let Ok(dir) = self.config.get_string("logging.dir") {
            logging.log_dir = PathBuf::from(dir);
        }
        if let Ok(console) = self.config.get_bool("logging.console") {
            logging.console_output = console;
        }
        if let Ok(file) = self.config.get_bool("logging.file") {
            logging.file_logging = file;
        }
        if let Some(level) = self
            .config
            .get_string("logging.level")
            .ok()
            .and_then(|v| v.parse::<Level>().ok())
        {
            logging.console_level = level;
            logging.file_level = level;
        }
        logging
    }

    pub fn to_core_config(&self) -> holdfast_core::Configuration {
        holdfast_core::Configuration::from_config(self.config.clone())
    }

    /// Reject settings the server cannot start with and warn about weak ones
    pub fn validate(&self) -> anyhow::Result<()> {
        self.persistence_mode()?;
        self.cache_mode()?;

        if self.is_production() {
            if self.database_url().is_none() {
                anyhow::bail!("{} is required when {} is production", DATABASE_URL, NODE_ENV);
            }
            if self.redis_url().is_none() {
                anyhow::bail!("{} is required when {} is production", REDIS_URL, NODE_ENV);
            }
        }

        if self.is_default_jwt_secret() {
            warn!("Using the default JWT secret, set jwt_secret before exposing this server");
        }

        Ok(())
    }

    pub async fn database_connection(&self) -> anyhow::Result<DatabaseConnection> {
        let max_connections = self
            .config
            .get_int("db.pool.max_connections")
            .unwrap_or(20) as u32;
        let min_connections = self
            .config
            .get_int("db.pool.min_connections")
            .unwrap_or(1) as u32;
        let connect_timeout = self
            .config
            .get_int("db.pool.connect_timeout")
            .unwrap_or(30) as u64;
        let acquire_timeout = self
            .config
            .get_int("db.pool.acquire_timeout")
            .unwrap_or(8) as u64;
        let idle_timeout = self.config.get_int("db.pool.idle_timeout").unwrap_or(10) as u64;
        let max_lifetime = self
            .config
            .get_int("db.pool.max_lifetime")
            .unwrap_or(1800) as u64;
        let sqlx_logging = self
            .config
            .get_bool("db.pool.sqlx_logging")
            .unwrap_or(false);

        let url = self
            .database_url()
            .with_context(|| format!("{} is not set", DATABASE_URL))?;

        let mut opt = ConnectOptions::new(url);

        opt.max_connections(max_connections)
            .min_connections(min_connections)
            .connect_timeout(Duration::from_secs(connect_timeout))
            .acquire_timeout(Duration::from_secs(acquire_timeout))
            .idle_timeout(Duration::from_secs(idle_timeout))
            .max_lifetime(Duration::from_secs(max_lifetime))
            .sqlx_logging(sqlx_logging);

        Database::connect(opt)
            .await
            .context("failed to connect to the lock database")
    }
}
