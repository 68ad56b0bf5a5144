//! Main entry point for the Holdfast server.
//!
//! Starts the HTTP lock API, the realtime WebSocket listener and the expiry
//! reaper, and stops all of them on Ctrl+C or SIGTERM.

use std::sync::Arc;
use std::time::Duration;

use holdfast_core::ExpiryReaper;
use holdfast_server::{
    middleware::rate_limit::{self, RateLimiterState},
    model::Configuration,
    startup::{self, RealtimeServer, ShutdownSignal},
};
use tracing::{error, info};

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    let configuration = Configuration::new()?;

    let _logging_guard = startup::init_logging(&configuration.logging_config())?;

    configuration.validate()?;

    let server_address = configuration.server_address();
    let server_port = configuration.server_port();
    let realtime_port = configuration.realtime_port();
    let rate_limit_config = configuration.lock_rate_limit_config();
    let cleanup_interval = configuration.to_core_config().lock_cleanup_interval();
    let jwt_secret = configuration.jwt_secret();

    let app_state = Arc::new(startup::build_app_state(configuration).await?);

    let shutdown = ShutdownSignal::install();

    // Expiry reaper
    let reaper_handle = ExpiryReaper::new(app_state.lock_manager.clone(), cleanup_interval)
        .with_broadcaster(app_state.broadcaster.clone())
        .spawn(shutdown.subscribe());

    // Realtime listener
    let listener = RealtimeServer::bind(&server_address, realtime_port).await?;
    let realtime_handle = RealtimeServer::new(app_state.broadcaster.clone(), jwt_secret)
        .spawn(listener, shutdown.subscribe());

    // Lock API
    let rate_limit_state = Arc::new(RateLimiterState::new(rate_limit_config));
    let cleanup_handle =
        rate_limit::start_cleanup_task(rate_limit_state.clone(), shutdown.subscribe());

    let server = startup::main_server(
        app_state.clone(),
        rate_limit_state,
        server_address.clone(),
        server_port,
    )?;
    let stop_handle = shutdown.stop_http_server(server.handle());

    info!(
        "Holdfast started: http://{}:{} (lock API), ws://{}:{} (realtime)",
        server_address, server_port, server_address, realtime_port
    );

    if let Err(e) = server.await {
        error!(error = %e, "HTTP server stopped with error");
    }

    // The HTTP server can also stop on its own; make sure everything else follows
    shutdown.shutdown();
    startup::join_with_timeout(
        vec![reaper_handle, realtime_handle, cleanup_handle, stop_handle],
        SHUTDOWN_TIMEOUT,
    )
    .await;

    info!("Holdfast stopped");
    Ok(())
}
