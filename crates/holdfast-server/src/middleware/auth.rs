// Authentication middleware for Actix-web
// Verifies the session token and stores an AuthContext in request extensions

use actix_service::forward_ready;
use actix_utils::future::{Ready, ok};
use actix_web::{
    Error, HttpMessage, HttpRequest, HttpResponse,
    body::EitherBody,
    dev::{Service, ServiceRequest, ServiceResponse, Transform},
    http::{Method, StatusCode},
    web::Data,
};
use futures::future::LocalBoxFuture;
use tracing::{debug, error};

use holdfast_auth::{AUTHORIZATION_HEADER, AuthContext, bearer_token, query_token};
use holdfast_common::VerifiedActor;
use holdfast_common::error::UNAUTHORIZED;

use crate::model::{AppState, response};

pub struct Authentication;

impl<S, B> Transform<S, ServiceRequest> for Authentication
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type InitError = ();
    type Transform = AuthenticationMiddleware<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ok(AuthenticationMiddleware { service })
    }
}

pub struct AuthenticationMiddleware<S> {
    service: S,
}

/// Extract the token from `Authorization: Bearer <token>`, falling back to
/// the `token` query parameter
fn extract_token(req: &ServiceRequest) -> Option<String> {
    if let Some(header_val) = req.headers().get(AUTHORIZATION_HEADER)
        && let Ok(s) = header_val.to_str()
        && let Some(token) = bearer_token(s.trim())
    {
        return Some(token.to_string());
    }

    req.uri()
        .query()
        .and_then(query_token)
        .map(str::to_string)
}

impl<S, B> Service<ServiceRequest> for AuthenticationMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        if Method::OPTIONS != *req.method() {
            let mut auth_context = AuthContext::default();

            if let Some(token) = extract_token(&req) {
                auth_context.token_provided = true;

                if let Some(app_state) = req.app_data::<Data<AppState>>() {
                    let secret = app_state.jwt_secret();
                    match holdfast_auth::service::token::verify_session_token(&token, &secret) {
                        Ok(actor) => {
                            auth_context.actor = Some(actor);
                        }
                        Err(err) => {
                            debug!(path = %req.path(), error = %err, "Session token rejected");
                            auth_context.jwt_error = Some(err);
                        }
                    }
                } else {
                    error!("AppState not found in request app_data");
                }
            }

            // Always present so handlers can tell a missing token from a bad one
            req.extensions_mut().insert(auth_context);
        }

        let res = self.service.call(req);

        Box::pin(async move { res.await.map(ServiceResponse::map_into_left_body) })
    }
}

/// The verified actor for this request, or the 401 response to return
pub fn authenticated_actor(req: &HttpRequest) -> Result<VerifiedActor, HttpResponse> {
    let extensions = req.extensions();
    let Some(context) = extensions.get::<AuthContext>() else {
        return Err(unauthorized("authentication required"));
    };

    match &context.actor {
        Some(actor) => Ok(actor.clone()),
        None if context.token_provided => Err(unauthorized(format!(
            "invalid token: {}",
            context.jwt_error_string()
        ))),
        None => Err(unauthorized("authentication required")),
    }
}

fn unauthorized(message: impl Into<String>) -> HttpResponse {
    response::Result::<()>::http_error(StatusCode::UNAUTHORIZED, &UNAUTHORIZED, message)
}

/// Resolve the caller or return 401 from the enclosing handler
#[macro_export]
macro_rules! authenticated {
    ($req:expr) => {
        match $crate::middleware::auth::authenticated_actor(&$req) {
            Ok(actor) => actor,
            Err(response) => return response,
        }
    };
}
