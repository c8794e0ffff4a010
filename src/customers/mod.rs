use crate::auth::session::CurrentUser;
use crate::roles::Capability;
use crate::shared::schema::{customers, tickets};
use crate::shared::state::AppState;
use crate::shared::utils::like_pattern;
use crate::tickets::Ticket;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable)]
#[diesel(table_name = customers)]
pub struct Customer {
    pub id: Uuid,
    pub full_name: String,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub total_repairs: i32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct CreateCustomerRequest {
    pub full_name: String,
    pub phone: Option<String>,
    pub email: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateCustomerRequest {
    pub full_name: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub search: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

pub async fn create_customer(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Json(req): Json<CreateCustomerRequest>,
) -> Result<Json<Customer>, (StatusCode, String)> {
    user.require(Capability::ManageCustomers)?;
    if req.full_name.trim().is_empty() {
        return Err((StatusCode::BAD_REQUEST, "Name is required".to_string()));
    }
    let mut conn = state
        .conn
        .get()
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("DB error: {e}")))?;

    let customer = Customer {
        id: Uuid::new_v4(),
        full_name: req.full_name.trim().to_string(),
        phone: req.phone,
        email: req.email.map(|e| e.trim().to_lowercase()),
        total_repairs: 0,
        created_at: Utc::now(),
    };

    diesel::insert_into(customers::table)
        .values(&customer)
        .execute(&mut conn)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Insert error: {e}")))?;

    Ok(Json(customer))
}

pub async fn list_customers(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<Customer>>, (StatusCode, String)> {
    user.require(Capability::ViewBoard)?;
    let mut conn = state
        .conn
        .get()
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("DB error: {e}")))?;

    let mut q = customers::table.into_boxed();
    if let Some(search) = query.search.filter(|s| !s.trim().is_empty()) {
        let pattern = like_pattern(&search);
        q = q.filter(
            customers::full_name
                .ilike(pattern.clone())
                .or(customers::phone.ilike(pattern.clone()))
                .or(customers::email.ilike(pattern)),
        );
    }

    let rows: Vec<Customer> = q
        .order(customers::full_name.asc())
        .limit(query.limit.unwrap_or(100))
        .offset(query.offset.unwrap_or(0))
        .load(&mut conn)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Query error: {e}")))?;

    Ok(Json(rows))
}

pub async fn get_customer(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
) -> Result<Json<Customer>, (StatusCode, String)> {
    user.require(Capability::ViewBoard)?;
    let mut conn = state
        .conn
        .get()
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("DB error: {e}")))?;

    let customer: Customer = customers::table
        .find(id)
        .first(&mut conn)
        .map_err(|_| (StatusCode::NOT_FOUND, "Customer not found".to_string()))?;

    Ok(Json(customer))
}

pub async fn customer_tickets(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<Ticket>>, (StatusCode, String)> {
    user.require(Capability::ViewBoard)?;
    let mut conn = state
        .conn
        .get()
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("DB error: {e}")))?;

    let rows: Vec<Ticket> = tickets::table
        .filter(tickets::customer_id.eq(id))
        .order(tickets::created_at.desc())
        .load(&mut conn)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Query error: {e}")))?;

    Ok(Json(rows))
}

pub async fn update_customer(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateCustomerRequest>,
) -> Result<Json<Customer>, (StatusCode, String)> {
    user.require(Capability::ManageCustomers)?;
    let mut conn = state
        .conn
        .get()
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("DB error: {e}")))?;

    if let Some(full_name) = req.full_name {
        diesel::update(customers::table.filter(customers::id.eq(id)))
            .set(customers::full_name.eq(full_name))
            .execute(&mut conn)
            .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Update error: {e}")))?;
    }
    if let Some(phone) = req.phone {
        diesel::update(customers::table.filter(customers::id.eq(id)))
            .set(customers::phone.eq(phone))
            .execute(&mut conn)
            .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Update error: {e}")))?;
    }
    if let Some(email) = req.email {
        diesel::update(customers::table.filter(customers::id.eq(id)))
            .set(customers::email.eq(email.trim().to_lowercase()))
            .execute(&mut conn)
            .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Update error: {e}")))?;
    }

    get_customer(State(state), user, Path(id)).await
}

pub async fn delete_customer(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, (StatusCode, String)> {
    user.require(Capability::ManageCustomers)?;
    let mut conn = state
        .conn
        .get()
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("DB error: {e}")))?;

    let open: i64 = tickets::table
        .filter(tickets::customer_id.eq(id))
        .count()
        .get_result(&mut conn)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Query error: {e}")))?;

    if open > 0 {
        return Err((
            StatusCode::CONFLICT,
            "Customer still has tickets on file".to_string(),
        ));
    }

    let removed = diesel::delete(customers::table.filter(customers::id.eq(id)))
        .execute(&mut conn)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Delete error: {e}")))?;

    if removed == 0 {
        return Err((StatusCode::NOT_FOUND, "Customer not found".to_string()));
    }
    Ok(StatusCode::NO_CONTENT)
}

pub fn configure_customer_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/customers", get(list_customers).post(create_customer))
        .route(
            "/api/customers/:id",
            get(get_customer).put(update_customer).delete(delete_customer),
        )
        .route("/api/customers/:id/tickets", get(customer_tickets))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_request_requires_only_a_name() {
        let req: CreateCustomerRequest =
            serde_json::from_str(r#"{"full_name":"Ada Lindgren"}"#).unwrap();
        assert!(req.phone.is_none());
        assert!(req.email.is_none());
    }

    #[test]
    fn customer_serializes_counter() {
        let customer = Customer {
            id: Uuid::new_v4(),
            full_name: "Ada Lindgren".to_string(),
            phone: Some("555-0100".to_string()),
            email: None,
            total_repairs: 3,
            created_at: Utc::now(),
        };
        let value = serde_json::to_value(&customer).unwrap();
        assert_eq!(value["total_repairs"], 3);
    }
}
