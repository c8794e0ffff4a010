use crate::auth::password::hash_password;
use crate::auth::session::CurrentUser;
use crate::roles::{Capability, Role};
use crate::shared::schema::profiles;
use crate::shared::state::AppState;
use crate::shared::utils::DbPool;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, put};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Clone, Queryable, Insertable)]
#[diesel(table_name = profiles)]
pub struct Profile {
    pub id: Uuid,
    pub email: String,
    pub password_hash: String,
    pub full_name: String,
    pub role: String,
    /// Customer record this login belongs to; `None` for staff.
    pub customer_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

/// Profile as exposed over the wire; never carries the hash.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileResponse {
    pub id: Uuid,
    pub email: String,
    pub full_name: String,
    pub role: String,
    pub customer_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl From<Profile> for ProfileResponse {
    fn from(profile: Profile) -> Self {
        Self {
            id: profile.id,
            email: profile.email,
            full_name: profile.full_name,
            role: profile.role,
            customer_id: profile.customer_id,
            created_at: profile.created_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateMemberRequest {
    pub email: String,
    pub password: String,
    pub full_name: String,
    pub role: Role,
    /// Links a customer-role login to its customer record.
    pub customer_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct ChangeRoleRequest {
    pub role: Role,
}

pub async fn list_team(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
) -> Result<Json<Vec<ProfileResponse>>, (StatusCode, String)> {
    user.require(Capability::ViewBoard)?;
    let mut conn = state
        .conn
        .get()
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("DB error: {e}")))?;

    let rows: Vec<Profile> = profiles::table
        .filter(profiles::role.ne(Role::Customer.as_str()))
        .order(profiles::full_name.asc())
        .load(&mut conn)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Query error: {e}")))?;

    Ok(Json(rows.into_iter().map(ProfileResponse::from).collect()))
}

pub async fn create_member(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Json(req): Json<CreateMemberRequest>,
) -> Result<Json<ProfileResponse>, (StatusCode, String)> {
    user.require(Capability::ManageTeam)?;
    let email = req.email.trim().to_lowercase();
    if email.is_empty() || !email.contains('@') {
        return Err((StatusCode::BAD_REQUEST, "A valid email is required".to_string()));
    }
    if req.password.len() < 8 {
        return Err((
            StatusCode::BAD_REQUEST,
            "Password must be at least 8 characters".to_string(),
        ));
    }

    let mut conn = state
        .conn
        .get()
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("DB error: {e}")))?;

    let profile = Profile {
        id: Uuid::new_v4(),
        email,
        password_hash: hash_password(&req.password)
            .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Hash error: {e}")))?,
        full_name: req.full_name,
        role: req.role.as_str().to_string(),
        customer_id: req.customer_id,
        created_at: Utc::now(),
    };

    diesel::insert_into(profiles::table)
        .values(&profile)
        .execute(&mut conn)
        .map_err(|e| (StatusCode::CONFLICT, format!("Insert error: {e}")))?;

    Ok(Json(ProfileResponse::from(profile)))
}

fn admin_count(conn: &mut PgConnection) -> QueryResult<i64> {
    profiles::table
        .filter(profiles::role.eq(Role::Admin.as_str()))
        .count()
        .get_result(conn)
}

pub async fn change_role(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
    Json(req): Json<ChangeRoleRequest>,
) -> Result<Json<ProfileResponse>, (StatusCode, String)> {
    user.require(Capability::ManageTeam)?;
    let mut conn = state
        .conn
        .get()
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("DB error: {e}")))?;

    let target: Profile = profiles::table
        .find(id)
        .first(&mut conn)
        .map_err(|_| (StatusCode::NOT_FOUND, "Profile not found".to_string()))?;

    if target.role == Role::Admin.as_str() && req.role != Role::Admin {
        let admins = admin_count(&mut conn)
            .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Query error: {e}")))?;
        if admins <= 1 {
            return Err((
                StatusCode::CONFLICT,
                "Cannot demote the last admin".to_string(),
            ));
        }
    }

    diesel::update(profiles::table.filter(profiles::id.eq(id)))
        .set(profiles::role.eq(req.role.as_str()))
        .execute(&mut conn)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Update error: {e}")))?;

    info!(target = %target.email, role = req.role.as_str(), by = %user.email, "role changed");

    let updated: Profile = profiles::table
        .find(id)
        .first(&mut conn)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Query error: {e}")))?;
    Ok(Json(ProfileResponse::from(updated)))
}

pub async fn remove_member(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, (StatusCode, String)> {
    user.require(Capability::ManageTeam)?;
    let mut conn = state
        .conn
        .get()
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("DB error: {e}")))?;

    let target: Profile = profiles::table
        .find(id)
        .first(&mut conn)
        .map_err(|_| (StatusCode::NOT_FOUND, "Profile not found".to_string()))?;

    if target.role == Role::Admin.as_str() {
        let admins = admin_count(&mut conn)
            .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Query error: {e}")))?;
        if admins <= 1 {
            return Err((
                StatusCode::CONFLICT,
                "Cannot remove the last admin".to_string(),
            ));
        }
    }

    diesel::delete(profiles::table.filter(profiles::id.eq(id)))
        .execute(&mut conn)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Delete error: {e}")))?;

    info!(target = %target.email, by = %user.email, "team member removed");
    Ok(StatusCode::NO_CONTENT)
}

/// First-run bootstrap: seeds one admin when the profiles table is
/// empty, from ADMIN_EMAIL / ADMIN_PASSWORD.
pub fn ensure_admin_profile(pool: &DbPool) -> anyhow::Result<()> {
    let mut conn = pool.get()?;
    let existing: i64 = profiles::table.count().get_result(&mut conn)?;
    if existing > 0 {
        return Ok(());
    }

    let (Ok(email), Ok(password)) = (
        std::env::var("ADMIN_EMAIL"),
        std::env::var("ADMIN_PASSWORD"),
    ) else {
        tracing::warn!("no profiles and no ADMIN_EMAIL/ADMIN_PASSWORD set; skipping admin seed");
        return Ok(());
    };

    let profile = Profile {
        id: Uuid::new_v4(),
        email: email.trim().to_lowercase(),
        password_hash: hash_password(&password)?,
        full_name: "Administrator".to_string(),
        role: Role::Admin.as_str().to_string(),
        customer_id: None,
        created_at: Utc::now(),
    };
    diesel::insert_into(profiles::table)
        .values(&profile)
        .execute(&mut conn)?;
    info!(email = %profile.email, "seeded initial admin profile");
    Ok(())
}

pub fn configure_team_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/team", get(list_team).post(create_member))
        .route("/api/team/:id/role", put(change_role))
        .route("/api/team/:id", axum::routing::delete(remove_member))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profile_response_drops_the_hash() {
        let profile = Profile {
            id: Uuid::new_v4(),
            email: "kim@shop.test".to_string(),
            password_hash: "$argon2id$secret".to_string(),
            full_name: "Kim".to_string(),
            role: "manager".to_string(),
            customer_id: None,
            created_at: Utc::now(),
        };
        let value = serde_json::to_value(ProfileResponse::from(profile)).unwrap();
        assert!(value.get("password_hash").is_none());
        assert_eq!(value["role"], "manager");
    }

    #[test]
    fn customer_logins_carry_their_customer_link() {
        let customer_id = Uuid::new_v4();
        let req: CreateMemberRequest = serde_json::from_str(&format!(
            r#"{{"email":"ada@example.com","password":"long-enough-pw","full_name":"Ada","role":"customer","customer_id":"{customer_id}"}}"#
        ))
        .unwrap();
        assert_eq!(req.customer_id, Some(customer_id));

        let staff: CreateMemberRequest = serde_json::from_str(
            r#"{"email":"kim@shop.test","password":"long-enough-pw","full_name":"Kim","role":"employee"}"#,
        )
        .unwrap();
        assert!(staff.customer_id.is_none());
    }

    #[test]
    fn role_change_request_uses_typed_roles() {
        let req: ChangeRoleRequest = serde_json::from_str(r#"{"role":"employee"}"#).unwrap();
        assert_eq!(req.role, Role::Employee);
        assert!(serde_json::from_str::<ChangeRoleRequest>(r#"{"role":"owner"}"#).is_err());
    }
}
