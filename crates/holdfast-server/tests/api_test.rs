//! Integration tests for the lock HTTP API
//!
//! Runs the real routes against the embedded store and the local cache.

use std::sync::Arc;
use std::time::Duration;

use actix_web::{App, http::StatusCode, test, web};
use serde_json::Value;

use holdfast_auth::service::token::encode_session_token;
use holdfast_common::VerifiedActor;
use holdfast_server::{
    api,
    middleware::{
        auth::Authentication,
        rate_limit::{RateLimitConfig, RateLimiter},
    },
    model::{AppState, Configuration},
    startup::build_app_state,
};

const SECRET: &str = "holdfast-api-test-secret";
const RECORD: &str = "appt-001";

async fn app_state() -> Arc<AppState> {
    let config = config::Config::builder()
        .set_override("jwt_secret", SECRET)
        .unwrap()
        .build()
        .unwrap();
    Arc::new(
        build_app_state(Configuration::from_config(config))
            .await
            .unwrap(),
    )
}

fn limiter(max_requests: u32) -> RateLimiter {
    RateLimiter::new(RateLimitConfig {
        max_requests,
        window_duration: Duration::from_secs(60),
        enabled: true,
    })
}

fn actor(id: &str, name: &str, role: &str) -> VerifiedActor {
    VerifiedActor {
        id: id.to_string(),
        name: name.to_string(),
        email: format!("{id}@clinic.test"),
        role: role.to_string(),
    }
}

fn bearer(actor: &VerifiedActor) -> (&'static str, String) {
    let token = encode_session_token(actor, SECRET, 3600).unwrap();
    ("Authorization", format!("Bearer {token}"))
}

macro_rules! init_app {
    ($state:expr, $limiter:expr) => {
        test::init_service(
            App::new()
                .wrap(Authentication)
                .app_data(web::Data::from($state.clone()))
                .service(api::health::health)
                .service(api::lock::routes($limiter)),
        )
        .await
    };
}

#[actix_web::test]
async fn test_requests_without_token_are_rejected() {
    let state = app_state().await;
    let app = init_app!(state, limiter(100));

    let req = test::TestRequest::get()
        .uri(&format!("/api/appointments/{RECORD}/lock-status"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let req = test::TestRequest::post()
        .uri(&format!("/api/appointments/{RECORD}/acquire-lock"))
        .insert_header(("Authorization", "Bearer not-a-jwt"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    let body: Value = test::read_body_json(resp).await;
    assert!(body["message"].as_str().unwrap().starts_with("invalid token"));
}

#[actix_web::test]
async fn test_query_token_is_accepted() {
    let state = app_state().await;
    let app = init_app!(state, limiter(100));
    let alice = actor("user-1", "Alice", "user");
    let token = encode_session_token(&alice, SECRET, 3600).unwrap();

    let req = test::TestRequest::get()
        .uri(&format!("/api/appointments/{RECORD}/lock-status?token={token}"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);

    let body: Value = test::read_body_json(resp).await;
    assert!(body["data"].is_null());
}

#[actix_web::test]
async fn test_acquire_conflict_names_the_holder() {
    let state = app_state().await;
    let app = init_app!(state, limiter(100));
    let alice = actor("user-1", "Alice", "user");
    let bob = actor("user-2", "Bob", "user");

    let req = test::TestRequest::post()
        .uri(&format!("/api/appointments/{RECORD}/acquire-lock"))
        .insert_header(bearer(&alice))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["data"]["recordId"], RECORD);
    assert_eq!(body["data"]["holderId"], "user-1");
    assert_eq!(body["data"]["holderInfo"]["name"], "Alice");

    let req = test::TestRequest::post()
        .uri(&format!("/api/appointments/{RECORD}/acquire-lock"))
        .insert_header(bearer(&bob))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::CONFLICT);
    let body: Value = test::read_body_json(resp).await;
    assert!(body["message"].as_str().unwrap().contains("Alice"));

    let req = test::TestRequest::get()
        .uri(&format!("/api/appointments/{RECORD}/lock-status"))
        .insert_header(bearer(&bob))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["data"]["holderId"], "user-1");
}

#[actix_web::test]
async fn test_release_requires_ownership() {
    let state = app_state().await;
    let app = init_app!(state, limiter(100));
    let alice = actor("user-1", "Alice", "user");
    let bob = actor("user-2", "Bob", "user");

    let req = test::TestRequest::post()
        .uri(&format!("/api/appointments/{RECORD}/acquire-lock"))
        .insert_header(bearer(&alice))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);

    let req = test::TestRequest::delete()
        .uri(&format!("/api/appointments/{RECORD}/release-lock"))
        .insert_header(bearer(&bob))
        .to_request();
    assert_eq!(
        test::call_service(&app, req).await.status(),
        StatusCode::FORBIDDEN
    );

    let req = test::TestRequest::delete()
        .uri(&format!("/api/appointments/{RECORD}/release-lock"))
        .insert_header(bearer(&alice))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["data"], true);

    let req = test::TestRequest::delete()
        .uri(&format!("/api/appointments/{RECORD}/release-lock"))
        .insert_header(bearer(&alice))
        .to_request();
    assert_eq!(
        test::call_service(&app, req).await.status(),
        StatusCode::NOT_FOUND
    );
}

#[actix_web::test]
async fn test_renew_fresh_lock_is_too_early() {
    let state = app_state().await;
    let app = init_app!(state, limiter(100));
    let alice = actor("user-1", "Alice", "user");

    let req = test::TestRequest::post()
        .uri(&format!("/api/appointments/{RECORD}/renew-lock"))
        .insert_header(bearer(&alice))
        .to_request();
    assert_eq!(
        test::call_service(&app, req).await.status(),
        StatusCode::FORBIDDEN
    );

    let req = test::TestRequest::post()
        .uri(&format!("/api/appointments/{RECORD}/acquire-lock"))
        .insert_header(bearer(&alice))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);

    let req = test::TestRequest::post()
        .uri(&format!("/api/appointments/{RECORD}/renew-lock"))
        .insert_header(bearer(&alice))
        .to_request();
    assert_eq!(
        test::call_service(&app, req).await.status(),
        StatusCode::UNPROCESSABLE_ENTITY
    );
}

#[actix_web::test]
async fn test_holder_check() {
    let state = app_state().await;
    let app = init_app!(state, limiter(100));
    let alice = actor("user-1", "Alice", "user");
    let bob = actor("user-2", "Bob", "user");

    let req = test::TestRequest::post()
        .uri(&format!("/api/appointments/{RECORD}/acquire-lock"))
        .insert_header(bearer(&alice))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);

    let req = test::TestRequest::get()
        .uri(&format!("/api/appointments/{RECORD}/lock-holder-check"))
        .insert_header(bearer(&alice))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);

    let req = test::TestRequest::get()
        .uri(&format!("/api/appointments/{RECORD}/lock-holder-check"))
        .insert_header(bearer(&bob))
        .to_request();
    assert_eq!(
        test::call_service(&app, req).await.status(),
        StatusCode::FORBIDDEN
    );
}

#[actix_web::test]
async fn test_force_release_is_admin_only() {
    let state = app_state().await;
    let app = init_app!(state, limiter(100));
    let alice = actor("user-1", "Alice", "user");
    let bob = actor("user-2", "Bob", "user");
    let admin = actor("admin-1", "Root", "admin");

    let req = test::TestRequest::post()
        .uri(&format!("/api/appointments/{RECORD}/acquire-lock"))
        .insert_header(bearer(&alice))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);

    let req = test::TestRequest::delete()
        .uri(&format!("/api/appointments/{RECORD}/force-release-lock"))
        .insert_header(bearer(&bob))
        .to_request();
    assert_eq!(
        test::call_service(&app, req).await.status(),
        StatusCode::FORBIDDEN
    );

    let req = test::TestRequest::delete()
        .uri(&format!("/api/appointments/{RECORD}/force-release-lock"))
        .insert_header(bearer(&admin))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["data"]["released"], true);

    // Nothing left to release
    let req = test::TestRequest::delete()
        .uri(&format!("/api/appointments/{RECORD}/force-release-lock"))
        .insert_header(bearer(&admin))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["data"]["released"], false);

    let req = test::TestRequest::post()
        .uri(&format!("/api/appointments/{RECORD}/acquire-lock"))
        .insert_header(bearer(&bob))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);
}

#[actix_web::test]
async fn test_lock_operations_are_rate_limited_per_client() {
    let state = app_state().await;
    let app = init_app!(state, limiter(3));
    let alice = actor("user-1", "Alice", "user");
    let first: std::net::SocketAddr = "10.0.0.1:40000".parse().unwrap();
    let second: std::net::SocketAddr = "10.0.0.2:40000".parse().unwrap();

    for _ in 0..3 {
        let req = test::TestRequest::post()
            .uri(&format!("/api/appointments/{RECORD}/acquire-lock"))
            .insert_header(bearer(&alice))
            .peer_addr(first)
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(resp.headers().contains_key("x-ratelimit-remaining"));
    }

    let req = test::TestRequest::post()
        .uri(&format!("/api/appointments/{RECORD}/acquire-lock"))
        .insert_header(bearer(&alice))
        .peer_addr(first)
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(resp.headers().contains_key("retry-after"));

    // Reads are not limited
    let req = test::TestRequest::get()
        .uri(&format!("/api/appointments/{RECORD}/lock-status"))
        .insert_header(bearer(&alice))
        .peer_addr(first)
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);

    let req = test::TestRequest::post()
        .uri(&format!("/api/appointments/{RECORD}/acquire-lock"))
        .insert_header(bearer(&alice))
        .peer_addr(second)
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);
}

#[actix_web::test]
async fn test_presence_starts_empty() {
    let state = app_state().await;
    let app = init_app!(state, limiter(100));
    let alice = actor("user-1", "Alice", "user");

    let req = test::TestRequest::get()
        .uri(&format!("/api/appointments/{RECORD}/presence"))
        .insert_header(bearer(&alice))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["data"], serde_json::json!([]));
}

#[actix_web::test]
async fn test_health_is_public() {
    let state = app_state().await;
    let app = init_app!(state, limiter(100));

    let req = test::TestRequest::get().uri("/health").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);

    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["data"]["status"], "OK");
    assert_eq!(body["data"]["storage"], "embedded");
    assert_eq!(body["data"]["connections"], 0);
}
