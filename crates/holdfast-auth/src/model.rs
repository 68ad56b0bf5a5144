//! Authentication models
//!
//! This file defines the session token claims and the per-request auth context

use jsonwebtoken::errors::ErrorKind;
use serde::{Deserialize, Serialize};

use holdfast_common::VerifiedActor;

pub const AUTHORIZATION_HEADER: &str = "Authorization";
pub const TOKEN_PREFIX: &str = "Bearer ";
pub const TOKEN_QUERY_PARAM: &str = "token";
pub const DEFAULT_JWT_SECRET: &str = "your-super-secret-jwt-key";
pub const DEFAULT_TOKEN_EXPIRE_SECONDS: i64 = 86400;

/// Claims carried by a session token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionClaims {
    pub id: String,
    pub name: String,
    pub email: String,
    pub role: String,
    pub exp: i64,
}

impl SessionClaims {
    pub fn actor(&self) -> VerifiedActor {
        VerifiedActor {
            id: self.id.clone(),
            name: self.name.clone(),
            email: self.email.clone(),
            role: self.role.clone(),
        }
    }
}

impl From<SessionClaims> for VerifiedActor {
    fn from(value: SessionClaims) -> Self {
        Self {
            id: value.id,
            name: value.name,
            email: value.email,
            role: value.role,
        }
    }
}

/// Authentication context stored in request extensions
#[derive(Debug, Default)]
pub struct AuthContext {
    pub actor: Option<VerifiedActor>,
    pub jwt_error: Option<jsonwebtoken::errors::Error>,
    pub token_provided: bool,
}

impl AuthContext {
    pub fn jwt_error_string(&self) -> String {
        if let Some(e) = &self.jwt_error {
            match e.kind() {
                ErrorKind::ExpiredSignature => "token expired!".to_string(),
                _ => e.to_string(),
            }
        } else {
            String::default()
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.actor.is_some()
    }
}

/// Strip the `Bearer ` prefix from an Authorization header value
pub fn bearer_token(header_value: &str) -> Option<&str> {
    header_value
        .strip_prefix(TOKEN_PREFIX)
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Find `token=<value>` in a raw query string
pub fn query_token(query: &str) -> Option<&str> {
    query.split('&').find_map(|pair| {
        let (key, value) = pair.split_once('=')?;
        (key == TOKEN_QUERY_PARAM && !value.is_empty()).then_some(value)
    })
}
