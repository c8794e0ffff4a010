use crate::roles::{Capability, Role};
use crate::shared::state::AppState;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::header::{AUTHORIZATION, COOKIE};
use axum::http::request::Parts;
use axum::http::StatusCode;
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

pub const SESSION_COOKIE: &str = "session";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub email: String,
    pub name: String,
    pub role: Role,
    pub iat: i64,
    pub exp: i64,
}

pub fn issue_token(
    secret: &str,
    ttl_hours: i64,
    profile_id: Uuid,
    email: &str,
    name: &str,
    role: Role,
) -> Result<String> {
    let now = Utc::now();
    let claims = Claims {
        sub: profile_id.to_string(),
        email: email.to_string(),
        name: name.to_string(),
        role,
        iat: now.timestamp(),
        exp: (now + Duration::hours(ttl_hours)).timestamp(),
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| anyhow!("token encoding failed: {e}"))
}

pub fn decode_token(secret: &str, token: &str) -> Result<Claims> {
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|e| anyhow!("invalid token: {e}"))?;
    Ok(data.claims)
}

/// Authenticated caller, extracted from the session cookie or a bearer
/// header.
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    pub role: Role,
}

impl CurrentUser {
    pub fn require(&self, capability: Capability) -> Result<(), (StatusCode, String)> {
        if self.role.can(capability) {
            Ok(())
        } else {
            Err((StatusCode::FORBIDDEN, "Insufficient privileges".to_string()))
        }
    }
}

fn bearer_token(parts: &Parts) -> Option<String> {
    parts
        .headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|v| v.to_string())
}

fn cookie_token(parts: &Parts) -> Option<String> {
    let header = parts.headers.get(COOKIE)?.to_str().ok()?;
    header.split(';').find_map(|pair| {
        let (name, value) = pair.trim().split_once('=')?;
        (name == SESSION_COOKIE).then(|| value.to_string())
    })
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for CurrentUser {
    type Rejection = (StatusCode, String);

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts)
            .or_else(|| cookie_token(parts))
            .ok_or((StatusCode::UNAUTHORIZED, "Not signed in".to_string()))?;

        let claims = decode_token(&state.config.auth.jwt_secret, &token)
            .map_err(|_| (StatusCode::UNAUTHORIZED, "Session expired".to_string()))?;

        let id = Uuid::parse_str(&claims.sub)
            .map_err(|_| (StatusCode::UNAUTHORIZED, "Malformed session".to_string()))?;

        Ok(CurrentUser {
            id,
            email: claims.email,
            name: claims.name,
            role: claims.role,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_round_trip_preserves_claims() {
        let id = Uuid::new_v4();
        let token = issue_token("test-secret", 12, id, "kim@shop.test", "Kim", Role::Manager)
            .unwrap();
        let claims = decode_token("test-secret", &token).unwrap();
        assert_eq!(claims.sub, id.to_string());
        assert_eq!(claims.role, Role::Manager);
        assert!(claims.exp > claims.iat);
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let token = issue_token("secret-a", 1, Uuid::new_v4(), "a@b.c", "A", Role::Admin).unwrap();
        assert!(decode_token("secret-b", &token).is_err());
    }
}
