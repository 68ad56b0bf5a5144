//! Liveness endpoint, reachable without a session

use actix_web::{HttpResponse, get, http::StatusCode, web};
use serde::Serialize;
use tracing::warn;

use holdfast_common::error::SERVICE_UNAVAILABLE;
use holdfast_persistence::PersistenceService;

use crate::model::{AppState, response::Result};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthStatus {
    status: &'static str,
    storage: String,
    timestamp: String,
    /// Seconds since start
    uptime: i64,
    connections: usize,
}

#[get("/health")]
pub async fn health(data: web::Data<AppState>) -> HttpResponse {
    let now = chrono::Utc::now();
    let healthy = match data.persistence().health_check().await {
        Ok(()) => true,
        Err(e) => {
            warn!(error = %e, "Lock store health check failed");
            false
        }
    };

    let status = HealthStatus {
        status: if healthy { "OK" } else { "DOWN" },
        storage: data.persistence.storage_mode().to_string(),
        timestamp: now.to_rfc3339(),
        uptime: (now.timestamp_millis() - data.started_at) / 1000,
        connections: data.broadcaster.connection_count(),
    };

    if healthy {
        Result::<()>::http_success(status)
    } else {
        Result::<()>::http_response(
            StatusCode::SERVICE_UNAVAILABLE.as_u16(),
            SERVICE_UNAVAILABLE.code,
            SERVICE_UNAVAILABLE.message.to_string(),
            status,
        )
    }
}
