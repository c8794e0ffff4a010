pub mod lockout;
pub mod password;
pub mod session;

use crate::auth::lockout::KeyedRateLimiter;
use crate::auth::session::{CurrentUser, SESSION_COOKIE};
use crate::roles::{Capability, Role};
use crate::shared::schema::profiles;
use crate::shared::state::AppState;
use crate::team::{Profile, ProfileResponse};
use axum::extract::{ConnectInfo, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_cookies::{Cookie, Cookies};
use tracing::{info, warn};

/// Login surface variant selected before authentication. Used only for
/// post-login role validation and lockout bucketing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Portal {
    Customer,
    Staff,
}

impl Portal {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Customer => "customer",
            Self::Staff => "staff",
        }
    }

    pub fn admits(&self, role: Role) -> bool {
        match self {
            Self::Customer => role == Role::Customer,
            Self::Staff => role.is_staff(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
    pub portal: Portal,
    /// Accepted for wire compatibility with the browser client; bot
    /// verification happens at the edge, not here.
    #[serde(default)]
    pub captcha_token: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub profile: ProfileResponse,
}

pub async fn login(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    cookies: Cookies,
    Json(req): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, (StatusCode, String)> {
    let _ = &req.captcha_token;
    let bucket = format!("{}:{}", addr.ip(), req.portal.as_str());

    let mut conn = state
        .conn
        .get()
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("DB error: {e}")))?;

    let email = req.email.trim().to_lowercase();
    let profile: Profile = match profiles::table
        .filter(profiles::email.eq(&email))
        .first(&mut conn)
    {
        Ok(profile) => profile,
        Err(_) => return Err(failed_login(&state.login_limiter, &bucket).await),
    };

    if !password::verify_password(&req.password, &profile.password_hash) {
        return Err(failed_login(&state.login_limiter, &bucket).await);
    }

    let role: Role = profile
        .role
        .parse()
        .map_err(|_| (StatusCode::INTERNAL_SERVER_ERROR, "Corrupt profile role".to_string()))?;

    // Wrong-portal logins are refused outright instead of the SPA's
    // sign-in-then-forced-sign-out dance, and they count as failed
    // attempts against the bucket.
    if !req.portal.admits(role) {
        warn!(%email, portal = req.portal.as_str(), "portal/role mismatch");
        let throttled = failed_login(&state.login_limiter, &bucket).await;
        if throttled.0 == StatusCode::TOO_MANY_REQUESTS {
            return Err(throttled);
        }
        return Err((
            StatusCode::FORBIDDEN,
            "This account cannot use the selected portal".to_string(),
        ));
    }

    let token = session::issue_token(
        &state.config.auth.jwt_secret,
        state.config.auth.token_ttl_hours,
        profile.id,
        &profile.email,
        &profile.full_name,
        role,
    )
    .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Token error: {e}")))?;

    let mut cookie = Cookie::new(SESSION_COOKIE, token.clone());
    cookie.set_path("/");
    cookie.set_http_only(true);
    cookies.add(cookie);

    info!(%email, role = role.as_str(), "login");
    Ok(Json(LoginResponse {
        token,
        profile: ProfileResponse::from(profile),
    }))
}

fn invalid_credentials() -> (StatusCode, String) {
    (
        StatusCode::UNAUTHORIZED,
        "Invalid email or password".to_string(),
    )
}

/// Books one failed attempt against the bucket. Successful logins never
/// touch the limiter, so a shared front-desk terminal cannot lock
/// itself out through normal use.
async fn failed_login(limiter: &KeyedRateLimiter, bucket: &str) -> (StatusCode, String) {
    if limiter.check(bucket).await {
        invalid_credentials()
    } else {
        warn!(bucket, "login throttled");
        (
            StatusCode::TOO_MANY_REQUESTS,
            "Too many failed attempts, try again later".to_string(),
        )
    }
}

pub async fn logout(cookies: Cookies) -> StatusCode {
    let mut cookie = Cookie::new(SESSION_COOKIE, "");
    cookie.set_path("/");
    cookies.remove(cookie);
    StatusCode::NO_CONTENT
}

pub async fn me(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
) -> Result<Json<ProfileResponse>, (StatusCode, String)> {
    let mut conn = state
        .conn
        .get()
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("DB error: {e}")))?;

    let profile: Profile = profiles::table
        .find(user.id)
        .first(&mut conn)
        .map_err(|_| (StatusCode::NOT_FOUND, "Profile not found".to_string()))?;

    Ok(Json(ProfileResponse::from(profile)))
}

/// Admin override for locked-out users; replaces the old client-side
/// reset gesture.
pub async fn clear_lockouts(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
) -> Result<StatusCode, (StatusCode, String)> {
    user.require(Capability::ClearLockouts)?;
    let tracked = state.login_limiter.tracked_keys().await;
    state.login_limiter.clear().await;
    info!(by = %user.email, buckets = tracked, "login lockouts cleared");
    Ok(StatusCode::NO_CONTENT)
}

pub fn configure_auth_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/auth/login", post(login))
        .route("/api/auth/logout", post(logout))
        .route("/api/auth/me", get(me))
        .route("/api/auth/lockouts/clear", post(clear_lockouts))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn portal_admission_rules() {
        assert!(Portal::Customer.admits(Role::Customer));
        assert!(!Portal::Customer.admits(Role::Employee));
        assert!(Portal::Staff.admits(Role::Employee));
        assert!(Portal::Staff.admits(Role::Admin));
        assert!(!Portal::Staff.admits(Role::Customer));
    }

    #[test]
    fn login_request_accepts_optional_captcha_field() {
        let req: LoginRequest = serde_json::from_str(
            r#"{"email":"a@b.c","password":"pw","portal":"staff","captcha_token":"tok"}"#,
        )
        .unwrap();
        assert_eq!(req.portal, Portal::Staff);
        assert_eq!(req.captcha_token.as_deref(), Some("tok"));

        let req: LoginRequest =
            serde_json::from_str(r#"{"email":"a@b.c","password":"pw","portal":"customer"}"#)
                .unwrap();
        assert!(req.captcha_token.is_none());
    }

    #[tokio::test]
    async fn only_failed_attempts_trip_the_lockout() {
        let limiter = KeyedRateLimiter::new(3, 3600);
        let bucket = "203.0.113.9:staff";

        for _ in 0..3 {
            let (status, _) = failed_login(&limiter, bucket).await;
            assert_eq!(status, StatusCode::UNAUTHORIZED);
        }
        let (status, _) = failed_login(&limiter, bucket).await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);

        // Other buckets keep their full allowance.
        let (status, _) = failed_login(&limiter, "203.0.113.9:customer").await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }
}
