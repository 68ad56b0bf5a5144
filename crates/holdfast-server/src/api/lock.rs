//! Appointment lock endpoints
//!
//! Every route needs a verified session. Successful mutations are announced
//! to the record's realtime room after the lock manager call returns.

use actix_web::{HttpRequest, HttpResponse, Scope, http::StatusCode, web};
use serde::Serialize;
use tracing::{error, info, warn};

use holdfast_common::error::ACCESS_DENIED;
use holdfast_common::{ErrorKind, LockError, VerifiedActor};
use holdfast_persistence::{StorageMode, UserInfo, UserPersistence};

use crate::authenticated;
use crate::middleware::rate_limit::RateLimiter;
use crate::model::{AppState, response::Result};

/// HTTP status for a lock failure
pub fn error_status(err: &LockError) -> StatusCode {
    match err.kind() {
        ErrorKind::Contention => StatusCode::CONFLICT,
        ErrorKind::Conflict => match err {
            LockError::NotOwner => StatusCode::FORBIDDEN,
            _ => StatusCode::CONFLICT,
        },
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::PolicyViolation => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorKind::Validation => StatusCode::BAD_REQUEST,
        ErrorKind::Infrastructure => StatusCode::SERVICE_UNAVAILABLE,
    }
}

/// Turn a lock failure into an API error body
///
/// Infrastructure details are logged here and never reach the caller.
pub fn error_response(record_id: &str, err: &LockError) -> HttpResponse {
    if err.kind() == ErrorKind::Infrastructure {
        error!(record_id = %record_id, error = ?err, "Lock operation failed");
    }
    Result::<()>::http_error(error_status(err), &err.error_code(), err.user_message())
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ForceReleaseResult {
    record_id: String,
    released: bool,
}

// The embedded store has no user directory of its own; keep the holder's
// display info so other actors see a name when they are turned away
async fn remember_actor(data: &AppState, actor: &VerifiedActor) {
    if data.persistence.storage_mode() != StorageMode::Embedded {
        return;
    }

    let user = UserInfo {
        id: actor.id.clone(),
        name: actor.name.clone(),
        email: actor.email.clone(),
        role: actor.role.clone(),
    };
    if let Err(e) = data.persistence.user_save(&user).await {
        warn!(actor_id = %actor.id, error = %e, "Failed to record lock holder info");
    }
}

async fn lock_status(
    req: HttpRequest,
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> HttpResponse {
    let _actor = authenticated!(req);
    let record_id = path.into_inner();

    match data.lock_manager.get_status(&record_id).await {
        Ok(lock) => Result::<()>::http_success(lock),
        Err(e) => error_response(&record_id, &e),
    }
}

async fn acquire_lock(
    req: HttpRequest,
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> HttpResponse {
    let actor = authenticated!(req);
    let record_id = path.into_inner();

    remember_actor(&data, &actor).await;

    match data
        .lock_manager
        .acquire(&record_id, &actor.id, actor.info())
        .await
    {
        Ok(lock) => {
            data.broadcaster.notify_lock_acquired(&lock);
            Result::<()>::http_success(lock)
        }
        Err(e) => error_response(&record_id, &e),
    }
}

async fn release_lock(
    req: HttpRequest,
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> HttpResponse {
    let actor = authenticated!(req);
    let record_id = path.into_inner();

    match data.lock_manager.release(&record_id, &actor.id).await {
        Ok(()) => {
            data.broadcaster.notify_lock_released(&record_id, &actor.id);
            Result::<()>::http_success(true)
        }
        Err(e) => error_response(&record_id, &e),
    }
}

async fn force_release_lock(
    req: HttpRequest,
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> HttpResponse {
    let actor = authenticated!(req);
    let record_id = path.into_inner();

    if !actor.is_admin() {
        warn!(record_id = %record_id, actor_id = %actor.id, "Force release denied");
        return Result::<()>::http_error(
            StatusCode::FORBIDDEN,
            &ACCESS_DENIED,
            "admin access required",
        );
    }

    match data.lock_manager.force_release(&record_id).await {
        Ok(released) => {
            if released {
                info!(record_id = %record_id, released_by = %actor.id, "Lock force-released by admin");
                data.broadcaster
                    .notify_lock_force_released(&record_id, Some(&actor.id));
            }
            Result::<()>::http_success(ForceReleaseResult {
                record_id,
                released,
            })
        }
        Err(e) => error_response(&record_id, &e),
    }
}

async fn renew_lock(
    req: HttpRequest,
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> HttpResponse {
    let actor = authenticated!(req);
    let record_id = path.into_inner();

    match data.lock_manager.renew_lock(&record_id, &actor.id).await {
        Ok(lock) => {
            data.broadcaster.notify_lock_renewed(&lock);
            Result::<()>::http_success(lock)
        }
        Err(e) => error_response(&record_id, &e),
    }
}

async fn lock_holder_check(
    req: HttpRequest,
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> HttpResponse {
    let actor = authenticated!(req);
    let record_id = path.into_inner();

    match data.lock_manager.verify_holder(&record_id, &actor.id).await {
        Ok(lock) => Result::<()>::http_success(lock),
        Err(e) => error_response(&record_id, &e),
    }
}

async fn presence(
    req: HttpRequest,
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> HttpResponse {
    let _actor = authenticated!(req);
    let record_id = path.into_inner();

    Result::<()>::http_success(data.broadcaster.presence(&record_id))
}

/// `/api/appointments` routes; lock-mutating routes share `limiter`
pub fn routes(limiter: RateLimiter) -> Scope {
    web::scope("/api/appointments")
        .route("/{id}/lock-status", web::get().to(lock_status))
        .service(
            web::resource("/{id}/acquire-lock")
                .route(web::post().to(acquire_lock))
                .wrap(limiter.clone()),
        )
        .service(
            web::resource("/{id}/release-lock")
                .route(web::delete().to(release_lock))
                .wrap(limiter.clone()),
        )
        .service(
            web::resource("/{id}/force-release-lock")
                .route(web::delete().to(force_release_lock))
                .wrap(limiter.clone()),
        )
        .service(
            web::resource("/{id}/renew-lock")
                .route(web::post().to(renew_lock))
                .wrap(limiter),
        )
        .route("/{id}/lock-holder-check", web::get().to(lock_holder_check))
        .route("/{id}/presence", web::get().to(presence))
}
