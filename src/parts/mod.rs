use crate::audit::{self, ACTION_PART_STATUS_CHANGED};
use crate::auth::session::CurrentUser;
use crate::roles::Capability;
use crate::shared::schema::{parts_orders, tickets};
use crate::shared::state::AppState;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, put};
use axum::{Json, Router};
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

/// Vendor order progression. Unlike ticket status this one is strictly
/// forward-only in the UI, but the server accepts any of the three.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartStatus {
    Ordered,
    Shipped,
    Received,
}

impl PartStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ordered => "ordered",
            Self::Shipped => "shipped",
            Self::Received => "received",
        }
    }
}

impl fmt::Display for PartStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PartStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ordered" => Ok(Self::Ordered),
            "shipped" => Ok(Self::Shipped),
            "received" => Ok(Self::Received),
            other => Err(format!("unknown part status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable)]
#[diesel(table_name = parts_orders)]
pub struct PartsOrder {
    pub id: Uuid,
    pub ticket_id: Uuid,
    pub part_name: String,
    pub vendor: Option<String>,
    pub cost: Option<BigDecimal>,
    pub status: String,
    pub tracking_link: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct CreatePartRequest {
    pub part_name: String,
    pub vendor: Option<String>,
    pub cost: Option<BigDecimal>,
    pub tracking_link: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdatePartRequest {
    pub part_name: Option<String>,
    pub vendor: Option<String>,
    pub cost: Option<BigDecimal>,
    pub tracking_link: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PartStatusRequest {
    pub status: String,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub status: Option<String>,
}

/// Inserts a vendor order for a ticket. Returns `None` when the ticket
/// does not exist so callers can answer 404 instead of tripping the
/// foreign key.
pub fn insert_part(
    conn: &mut PgConnection,
    ticket_id: Uuid,
    req: CreatePartRequest,
) -> QueryResult<Option<PartsOrder>> {
    let exists: Option<Uuid> = tickets::table
        .find(ticket_id)
        .select(tickets::id)
        .first(conn)
        .optional()?;
    if exists.is_none() {
        return Ok(None);
    }

    let order = PartsOrder {
        id: Uuid::new_v4(),
        ticket_id,
        part_name: req.part_name,
        vendor: req.vendor,
        cost: req.cost,
        status: PartStatus::Ordered.as_str().to_string(),
        tracking_link: req.tracking_link,
        created_at: Utc::now(),
    };

    diesel::insert_into(parts_orders::table)
        .values(&order)
        .execute(conn)?;

    Ok(Some(order))
}

pub async fn add_part(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(ticket_id): Path<Uuid>,
    Json(req): Json<CreatePartRequest>,
) -> Result<Json<PartsOrder>, (StatusCode, String)> {
    user.require(Capability::ManageParts)?;
    let mut conn = state
        .conn
        .get()
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("DB error: {e}")))?;

    let order = insert_part(&mut conn, ticket_id, req)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Insert error: {e}")))?
        .ok_or_else(|| (StatusCode::NOT_FOUND, "Ticket not found".to_string()))?;

    Ok(Json(order))
}

pub async fn list_for_ticket(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(ticket_id): Path<Uuid>,
) -> Result<Json<Vec<PartsOrder>>, (StatusCode, String)> {
    user.require(Capability::ViewBoard)?;
    let mut conn = state
        .conn
        .get()
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("DB error: {e}")))?;

    let rows: Vec<PartsOrder> = parts_orders::table
        .filter(parts_orders::ticket_id.eq(ticket_id))
        .order(parts_orders::created_at.asc())
        .load(&mut conn)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Query error: {e}")))?;

    Ok(Json(rows))
}

pub async fn list_all(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<PartsOrder>>, (StatusCode, String)> {
    user.require(Capability::ViewBoard)?;
    let mut conn = state
        .conn
        .get()
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("DB error: {e}")))?;

    let mut q = parts_orders::table.into_boxed();
    if let Some(status) = query.status {
        q = q.filter(parts_orders::status.eq(status));
    }

    let rows: Vec<PartsOrder> = q
        .order(parts_orders::created_at.desc())
        .load(&mut conn)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Query error: {e}")))?;

    Ok(Json(rows))
}

pub async fn update_part(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdatePartRequest>,
) -> Result<Json<PartsOrder>, (StatusCode, String)> {
    user.require(Capability::ManageParts)?;
    let mut conn = state
        .conn
        .get()
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("DB error: {e}")))?;

    if let Some(part_name) = req.part_name {
        diesel::update(parts_orders::table.filter(parts_orders::id.eq(id)))
            .set(parts_orders::part_name.eq(part_name))
            .execute(&mut conn)
            .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Update error: {e}")))?;
    }
    if let Some(vendor) = req.vendor {
        diesel::update(parts_orders::table.filter(parts_orders::id.eq(id)))
            .set(parts_orders::vendor.eq(vendor))
            .execute(&mut conn)
            .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Update error: {e}")))?;
    }
    if let Some(cost) = req.cost {
        diesel::update(parts_orders::table.filter(parts_orders::id.eq(id)))
            .set(parts_orders::cost.eq(cost))
            .execute(&mut conn)
            .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Update error: {e}")))?;
    }
    if let Some(tracking_link) = req.tracking_link {
        diesel::update(parts_orders::table.filter(parts_orders::id.eq(id)))
            .set(parts_orders::tracking_link.eq(tracking_link))
            .execute(&mut conn)
            .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Update error: {e}")))?;
    }

    let order: PartsOrder = parts_orders::table
        .find(id)
        .first(&mut conn)
        .map_err(|_| (StatusCode::NOT_FOUND, "Parts order not found".to_string()))?;
    Ok(Json(order))
}

pub async fn change_part_status(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
    Json(req): Json<PartStatusRequest>,
) -> Result<Json<PartsOrder>, (StatusCode, String)> {
    user.require(Capability::ManageParts)?;
    let status: PartStatus = req
        .status
        .parse()
        .map_err(|e: String| (StatusCode::BAD_REQUEST, e))?;

    let mut conn = state
        .conn
        .get()
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("DB error: {e}")))?;

    let order: PartsOrder = parts_orders::table
        .find(id)
        .first(&mut conn)
        .map_err(|_| (StatusCode::NOT_FOUND, "Parts order not found".to_string()))?;

    diesel::update(parts_orders::table.filter(parts_orders::id.eq(id)))
        .set(parts_orders::status.eq(status.as_str()))
        .execute(&mut conn)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Update error: {e}")))?;

    audit::append(
        &mut conn,
        order.ticket_id,
        &user.name,
        ACTION_PART_STATUS_CHANGED,
        format!("{} marked {}", order.part_name, status),
        Some(serde_json::json!({ "part": order.part_name, "to": status.as_str() })),
    )
    .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Audit error: {e}")))?;

    let updated: PartsOrder = parts_orders::table
        .find(id)
        .first(&mut conn)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Query error: {e}")))?;
    Ok(Json(updated))
}

pub async fn delete_part(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, (StatusCode, String)> {
    user.require(Capability::ManageParts)?;
    let mut conn = state
        .conn
        .get()
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("DB error: {e}")))?;

    let removed = diesel::delete(parts_orders::table.filter(parts_orders::id.eq(id)))
        .execute(&mut conn)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Delete error: {e}")))?;

    if removed == 0 {
        return Err((StatusCode::NOT_FOUND, "Parts order not found".to_string()));
    }
    Ok(StatusCode::NO_CONTENT)
}

pub fn configure_parts_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/parts", get(list_all))
        .route("/api/parts/:id", put(update_part).delete(delete_part))
        .route("/api/parts/:id/status", put(change_part_status))
        .route("/api/tickets/:id/parts", get(list_for_ticket).post(add_part))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn part_status_round_trips() {
        for status in [PartStatus::Ordered, PartStatus::Shipped, PartStatus::Received] {
            assert_eq!(status.as_str().parse::<PartStatus>().unwrap(), status);
        }
        assert!("backordered".parse::<PartStatus>().is_err());
    }

    #[test]
    fn create_request_defaults() {
        let req: CreatePartRequest =
            serde_json::from_str(r#"{"part_name":"Drive belt"}"#).unwrap();
        assert!(req.vendor.is_none());
        assert!(req.cost.is_none());
        assert!(req.tracking_link.is_none());
    }
}
