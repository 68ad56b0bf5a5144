//! HTTP server setup

use std::sync::Arc;

use actix_web::{App, HttpServer, dev::Server, middleware::Logger, web};

use crate::{
    api,
    middleware::{
        auth::Authentication,
        rate_limit::{RateLimiter, RateLimiterState},
    },
    model::AppState,
};

/// Creates and binds the lock API server.
///
/// `rate_limit` is shared by every worker so the per-client budget holds
/// across the whole process.
pub fn main_server(
    app_state: Arc<AppState>,
    rate_limit: Arc<RateLimiterState>,
    address: String,
    port: u16,
) -> Result<Server, std::io::Error> {
    Ok(HttpServer::new(move || {
        App::new()
            .wrap(Logger::default())
            .wrap(Authentication)
            .app_data(web::Data::from(app_state.clone()))
            .service(api::health::health)
            .service(api::lock::routes(RateLimiter::from_state(rate_limit.clone())))
    })
    .disable_signals()
    .bind((address, port))?
    .run())
}
