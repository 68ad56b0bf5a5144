//! JWT session token service

use std::sync::LazyLock;
use std::time::Duration;

use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use moka::sync::Cache;

use holdfast_common::VerifiedActor;

use crate::model::SessionClaims;

/// Decoded claims cache keyed by signing secret and raw token
static TOKEN_CACHE: LazyLock<Cache<(String, String), SessionClaims>> = LazyLock::new(|| {
    Cache::builder()
        .max_capacity(10_000)
        .time_to_live(Duration::from_secs(300))
        .build()
});

/// Decode and validate a session token with caching
pub fn decode_session_token_cached(
    token: &str,
    secret: &str,
) -> jsonwebtoken::errors::Result<SessionClaims> {
    let key = (secret.to_string(), token.to_string());
    if let Some(cached) = TOKEN_CACHE.get(&key) {
        if cached.exp > chrono::Utc::now().timestamp() {
            return Ok(cached);
        }
        TOKEN_CACHE.invalidate(&key);
    }

    let claims = decode_session_token(token, secret)?;
    TOKEN_CACHE.insert(key, claims.clone());

    Ok(claims)
}

/// Decode and validate a session token without caching
pub fn decode_session_token(
    token: &str,
    secret: &str,
) -> jsonwebtoken::errors::Result<SessionClaims> {
    let decoding_key = DecodingKey::from_secret(secret.as_bytes());
    let data = decode::<SessionClaims>(token, &decoding_key, &Validation::new(Algorithm::HS256))?;
    Ok(data.claims)
}

/// Verify a token and return the actor it names
pub fn verify_session_token(token: &str, secret: &str) -> jsonwebtoken::errors::Result<VerifiedActor> {
    decode_session_token_cached(token, secret).map(VerifiedActor::from)
}

/// Encode a session token for an actor
pub fn encode_session_token(
    actor: &VerifiedActor,
    secret: &str,
    expire_seconds: i64,
) -> jsonwebtoken::errors::Result<String> {
    let exp = chrono::Utc::now()
        .checked_add_signed(chrono::Duration::seconds(expire_seconds))
        .unwrap_or_else(chrono::Utc::now)
        .timestamp();

    let claims = SessionClaims {
        id: actor.id.clone(),
        name: actor.name.clone(),
        email: actor.email.clone(),
        role: actor.role.clone(),
        exp,
    };

    let encoding_key = EncodingKey::from_secret(secret.as_bytes());
    encode(&Header::new(Algorithm::HS256), &claims, &encoding_key)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "holdfast-test-secret";

    fn actor() -> VerifiedActor {
        VerifiedActor {
            id: "user-1".to_string(),
            name: "John Doe".to_string(),
            email: "john@example.com".to_string(),
            role: "user".to_string(),
        }
    }

    #[test]
    fn test_encode_decode() {
        let token = encode_session_token(&actor(), SECRET, 3600).unwrap();
        let claims = decode_session_token(&token, SECRET).unwrap();
        assert_eq!(claims.id, "user-1");
        assert_eq!(claims.name, "John Doe");
        assert_eq!(claims.role, "user");
    }

    #[test]
    fn test_verify_cached() {
        let token = encode_session_token(&actor(), SECRET, 3600).unwrap();
        assert_eq!(verify_session_token(&token, SECRET).unwrap(), actor());
        // Second call is served from the cache
        assert_eq!(verify_session_token(&token, SECRET).unwrap(), actor());
    }

    #[test]
    fn test_cached_token_not_valid_under_other_secret() {
        let token = encode_session_token(&actor(), SECRET, 3600).unwrap();
        assert!(verify_session_token(&token, SECRET).is_ok());
        assert!(verify_session_token(&token, "rotated-secret").is_err());
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let token = encode_session_token(&actor(), SECRET, 3600).unwrap();
        assert!(decode_session_token(&token, "another-secret").is_err());
    }

    #[test]
    fn test_expired_token_rejected() {
        // Well past the default validation leeway
        let token = encode_session_token(&actor(), SECRET, -3600).unwrap();
        let err = decode_session_token(&token, SECRET).unwrap_err();
        assert_eq!(
            *err.kind(),
            jsonwebtoken::errors::ErrorKind::ExpiredSignature
        );
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(decode_session_token("not-a-token", SECRET).is_err());
    }
}
