pub mod calc;

use crate::audit::{self, ACTION_ESTIMATE_APPROVED, ACTION_ESTIMATE_SENT};
use crate::auth::session::CurrentUser;
use crate::customers::Customer;
use crate::email;
use crate::roles::Capability;
use crate::settings;
use crate::shared::schema::{customers, estimate_items, tickets};
use crate::shared::state::AppState;
use crate::tickets::{Ticket, TicketStatus, ESTIMATE_APPROVED, ESTIMATE_SENT};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// String convention distinguishing labor lines from part lines.
pub const LABOR_PREFIX: &str = "(Labor) ";

/// An approved estimate cannot be re-sent; sending would knock the
/// ticket back to `sent` with no approval path left to restore it.
pub fn sendable(estimate_status: &str) -> bool {
    estimate_status != ESTIMATE_APPROVED
}

/// Whether an approval call with this many still-pending items mutates
/// the ticket and appends an audit entry. Zero pending means the
/// estimate was already fully approved and the call is a plain read.
pub fn approval_mutates(pending: usize) -> bool {
    pending > 0
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable)]
#[diesel(table_name = estimate_items)]
pub struct EstimateItem {
    pub id: Uuid,
    pub ticket_id: Uuid,
    pub description: String,
    pub part_cost: BigDecimal,
    pub labor_cost: BigDecimal,
    pub is_approved: bool,
    pub created_at: DateTime<Utc>,
}

impl EstimateItem {
    pub fn is_labor(&self) -> bool {
        self.description.starts_with(LABOR_PREFIX)
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateItemRequest {
    pub description: String,
    pub part_cost: Option<BigDecimal>,
    pub labor_cost: Option<BigDecimal>,
    /// Prefixes the description with the labor convention marker.
    #[serde(default)]
    pub is_labor: bool,
}

#[derive(Debug, Deserialize)]
pub struct UpdateItemRequest {
    pub description: Option<String>,
    pub part_cost: Option<BigDecimal>,
    pub labor_cost: Option<BigDecimal>,
}

#[derive(Debug, Deserialize)]
pub struct ApproveRequest {
    #[serde(default)]
    pub device_fingerprint: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct EstimateView {
    pub ticket_id: Uuid,
    pub estimate_status: String,
    pub items: Vec<EstimateItem>,
    pub totals: calc::EstimateTotals,
}

#[derive(Debug, Serialize)]
pub struct ApprovalOutcome {
    pub ticket: Ticket,
    pub items: Vec<EstimateItem>,
    pub totals: calc::EstimateTotals,
    /// Zero when the estimate was already fully approved (idempotent
    /// re-invocation).
    pub newly_approved: usize,
}

fn load_view(conn: &mut PgConnection, ticket: &Ticket) -> QueryResult<EstimateView> {
    let items: Vec<EstimateItem> = estimate_items::table
        .filter(estimate_items::ticket_id.eq(ticket.id))
        .order(estimate_items::created_at.asc())
        .load(conn)?;
    let rate = settings::shop_tax_rate(conn);
    let totals = calc::totals(&items, &rate);
    Ok(EstimateView {
        ticket_id: ticket.id,
        estimate_status: ticket.estimate_status.clone(),
        items,
        totals,
    })
}

pub async fn get_estimate(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(ticket_id): Path<Uuid>,
) -> Result<Json<EstimateView>, (StatusCode, String)> {
    user.require(Capability::ViewBoard)?;
    let mut conn = state
        .conn
        .get()
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("DB error: {e}")))?;

    let ticket: Ticket = tickets::table
        .find(ticket_id)
        .first(&mut conn)
        .map_err(|_| (StatusCode::NOT_FOUND, "Ticket not found".to_string()))?;

    let view = load_view(&mut conn, &ticket)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Query error: {e}")))?;
    Ok(Json(view))
}

pub async fn add_item(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(ticket_id): Path<Uuid>,
    Json(req): Json<CreateItemRequest>,
) -> Result<Json<EstimateItem>, (StatusCode, String)> {
    user.require(Capability::ManageEstimates)?;
    let mut conn = state
        .conn
        .get()
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("DB error: {e}")))?;

    tickets::table
        .find(ticket_id)
        .first::<Ticket>(&mut conn)
        .map_err(|_| (StatusCode::NOT_FOUND, "Ticket not found".to_string()))?;

    let description = if req.is_labor && !req.description.starts_with(LABOR_PREFIX) {
        format!("{LABOR_PREFIX}{}", req.description)
    } else {
        req.description
    };

    let item = EstimateItem {
        id: Uuid::new_v4(),
        ticket_id,
        description,
        part_cost: req.part_cost.unwrap_or_else(|| BigDecimal::from(0)),
        labor_cost: req.labor_cost.unwrap_or_else(|| BigDecimal::from(0)),
        is_approved: false,
        created_at: Utc::now(),
    };

    diesel::insert_into(estimate_items::table)
        .values(&item)
        .execute(&mut conn)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Insert error: {e}")))?;

    Ok(Json(item))
}

pub async fn update_item(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(item_id): Path<Uuid>,
    Json(req): Json<UpdateItemRequest>,
) -> Result<Json<EstimateItem>, (StatusCode, String)> {
    user.require(Capability::ManageEstimates)?;
    let mut conn = state
        .conn
        .get()
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("DB error: {e}")))?;

    let item: EstimateItem = estimate_items::table
        .find(item_id)
        .first(&mut conn)
        .map_err(|_| (StatusCode::NOT_FOUND, "Estimate item not found".to_string()))?;

    if item.is_approved {
        return Err((
            StatusCode::CONFLICT,
            "Approved estimate items are locked".to_string(),
        ));
    }

    if let Some(description) = req.description {
        diesel::update(estimate_items::table.filter(estimate_items::id.eq(item_id)))
            .set(estimate_items::description.eq(description))
            .execute(&mut conn)
            .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Update error: {e}")))?;
    }
    if let Some(part_cost) = req.part_cost {
        diesel::update(estimate_items::table.filter(estimate_items::id.eq(item_id)))
            .set(estimate_items::part_cost.eq(part_cost))
            .execute(&mut conn)
            .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Update error: {e}")))?;
    }
    if let Some(labor_cost) = req.labor_cost {
        diesel::update(estimate_items::table.filter(estimate_items::id.eq(item_id)))
            .set(estimate_items::labor_cost.eq(labor_cost))
            .execute(&mut conn)
            .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Update error: {e}")))?;
    }

    let updated: EstimateItem = estimate_items::table
        .find(item_id)
        .first(&mut conn)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Query error: {e}")))?;
    Ok(Json(updated))
}

pub async fn delete_item(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(item_id): Path<Uuid>,
) -> Result<StatusCode, (StatusCode, String)> {
    user.require(Capability::ManageEstimates)?;
    let mut conn = state
        .conn
        .get()
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("DB error: {e}")))?;

    let item: EstimateItem = estimate_items::table
        .find(item_id)
        .first(&mut conn)
        .map_err(|_| (StatusCode::NOT_FOUND, "Estimate item not found".to_string()))?;

    if item.is_approved {
        return Err((
            StatusCode::CONFLICT,
            "Approved estimate items are locked".to_string(),
        ));
    }

    diesel::delete(estimate_items::table.filter(estimate_items::id.eq(item_id)))
        .execute(&mut conn)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Delete error: {e}")))?;

    Ok(StatusCode::NO_CONTENT)
}

/// Marks the estimate sent and emails the customer when SMTP is up.
pub async fn send_estimate(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(ticket_id): Path<Uuid>,
) -> Result<Json<EstimateView>, (StatusCode, String)> {
    user.require(Capability::ManageEstimates)?;
    let mut conn = state
        .conn
        .get()
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("DB error: {e}")))?;

    let ticket: Ticket = tickets::table
        .find(ticket_id)
        .first(&mut conn)
        .map_err(|_| (StatusCode::NOT_FOUND, "Ticket not found".to_string()))?;

    if !sendable(&ticket.estimate_status) {
        return Err((
            StatusCode::CONFLICT,
            "Estimate is already approved".to_string(),
        ));
    }

    diesel::update(tickets::table.filter(tickets::id.eq(ticket_id)))
        .set((
            tickets::estimate_status.eq(ESTIMATE_SENT),
            tickets::updated_at.eq(Utc::now()),
        ))
        .execute(&mut conn)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Update error: {e}")))?;

    audit::append(
        &mut conn,
        ticket_id,
        &user.name,
        ACTION_ESTIMATE_SENT,
        "Estimate sent to customer".to_string(),
        None,
    )
    .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Audit error: {e}")))?;

    let customer: Option<Customer> = customers::table
        .find(ticket.customer_id)
        .first(&mut conn)
        .optional()
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Query error: {e}")))?;

    let ticket: Ticket = tickets::table
        .find(ticket_id)
        .first(&mut conn)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Query error: {e}")))?;
    let view = load_view(&mut conn, &ticket)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Query error: {e}")))?;

    if let Some(address) = customer.and_then(|c| c.email) {
        let link = format!(
            "{}/status/{}",
            state.config.server.public_base_url, ticket_id
        );
        let html = estimate_email_html(&ticket, &view.items, &view.totals, &link);
        match email::send_html(&state, &address, "Your repair estimate", &html) {
            Ok(()) => info!(ticket = %ticket_id, "estimate email sent"),
            Err(e) => warn!(ticket = %ticket_id, error = %e, "estimate email not delivered"),
        }
    }

    Ok(Json(view))
}

pub async fn approve_estimate(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(ticket_id): Path<Uuid>,
    Json(req): Json<ApproveRequest>,
) -> Result<Json<ApprovalOutcome>, (StatusCode, String)> {
    user.require(Capability::ManageEstimates)?;
    let mut conn = state
        .conn
        .get()
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("DB error: {e}")))?;

    let outcome = run_approval(
        &mut conn,
        ticket_id,
        &user.name,
        req.device_fingerprint.as_deref(),
    )
    .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Approval error: {e}")))?
    .ok_or((StatusCode::NOT_FOUND, "Ticket not found".to_string()))?;

    Ok(Json(outcome))
}

/// The approval workflow: one transaction approves every pending item,
/// moves the ticket to waiting_parts with the total cached, and appends
/// a single audit entry. Re-running against a fully approved estimate
/// touches nothing and logs nothing.
pub fn run_approval(
    conn: &mut PgConnection,
    ticket_id: Uuid,
    actor: &str,
    device_fingerprint: Option<&str>,
) -> Result<Option<ApprovalOutcome>, diesel::result::Error> {
    conn.transaction(|conn| {
        let Some(_ticket) = tickets::table
            .find(ticket_id)
            .first::<Ticket>(conn)
            .optional()?
        else {
            return Ok(None);
        };

        let newly_approved = diesel::update(
            estimate_items::table
                .filter(estimate_items::ticket_id.eq(ticket_id))
                .filter(estimate_items::is_approved.eq(false)),
        )
        .set(estimate_items::is_approved.eq(true))
        .execute(conn)?;

        let items: Vec<EstimateItem> = estimate_items::table
            .filter(estimate_items::ticket_id.eq(ticket_id))
            .order(estimate_items::created_at.asc())
            .load(conn)?;
        let rate = settings::shop_tax_rate(conn);
        let totals = calc::totals(&items, &rate);

        if approval_mutates(newly_approved) {
            diesel::update(tickets::table.filter(tickets::id.eq(ticket_id)))
                .set((
                    tickets::status.eq(TicketStatus::WaitingParts.as_str()),
                    tickets::estimate_status.eq(ESTIMATE_APPROVED),
                    tickets::estimate_total.eq(Some(totals.total.clone())),
                    tickets::updated_at.eq(Utc::now()),
                ))
                .execute(conn)?;

            audit::append(
                conn,
                ticket_id,
                actor,
                ACTION_ESTIMATE_APPROVED,
                format!("Estimate approved ({newly_approved} item(s), total {})", totals.total),
                Some(serde_json::json!({
                    "device_fingerprint": device_fingerprint,
                    "items_approved": newly_approved,
                })),
            )?;
        }

        let ticket = tickets::table.find(ticket_id).first::<Ticket>(conn)?;
        Ok(Some(ApprovalOutcome {
            ticket,
            items,
            totals,
            newly_approved,
        }))
    })
}

pub fn estimate_email_html(
    ticket: &Ticket,
    items: &[EstimateItem],
    totals: &calc::EstimateTotals,
    status_link: &str,
) -> String {
    use bigdecimal::RoundingMode;
    let money = |v: &BigDecimal| v.with_scale_round(2, RoundingMode::HalfUp);
    let mut rows = String::new();
    for item in items {
        let line_total = &item.part_cost + &item.labor_cost;
        rows.push_str(&format!(
            "<tr><td>{}</td><td>${}</td></tr>",
            item.description,
            money(&line_total)
        ));
    }
    format!(
        "<h2>Repair estimate for your {} {}</h2>\
         <table>{rows}</table>\
         <p>Subtotal: ${}<br>Tax: ${}<br><strong>Total: ${}</strong></p>\
         <p><a href=\"{status_link}\">Review and approve online</a></p>",
        ticket.brand,
        ticket.model,
        money(&totals.subtotal),
        money(&totals.tax),
        money(&totals.total)
    )
}

pub fn configure_estimate_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/tickets/:id/estimate", get(get_estimate))
        .route("/api/tickets/:id/estimate/items", post(add_item))
        .route("/api/tickets/:id/estimate/send", post(send_estimate))
        .route("/api/tickets/:id/estimate/approve", post(approve_estimate))
        .route(
            "/api/estimate-items/:id",
            put(update_item).delete(delete_item),
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn labor_prefix_convention() {
        let item = EstimateItem {
            id: Uuid::new_v4(),
            ticket_id: Uuid::new_v4(),
            description: format!("{LABOR_PREFIX}Motor rebuild"),
            part_cost: BigDecimal::from(0),
            labor_cost: BigDecimal::from(80),
            is_approved: false,
            created_at: Utc::now(),
        };
        assert!(item.is_labor());
    }

    #[test]
    fn approved_estimates_cannot_be_resent() {
        assert!(sendable(crate::tickets::ESTIMATE_NONE));
        assert!(sendable(ESTIMATE_SENT));
        assert!(!sendable(ESTIMATE_APPROVED));
    }

    #[test]
    fn approval_with_nothing_pending_is_a_read() {
        assert!(!approval_mutates(0));
        assert!(approval_mutates(1));
        assert!(approval_mutates(4));
    }

    #[test]
    fn create_request_costs_default_to_zero() {
        let req: CreateItemRequest =
            serde_json::from_str(r#"{"description":"Brush Roll"}"#).unwrap();
        assert!(req.part_cost.is_none());
        assert!(req.labor_cost.is_none());
        assert!(!req.is_labor);
    }

    #[test]
    fn email_body_uses_the_shared_totals() {
        let items = vec![EstimateItem {
            id: Uuid::new_v4(),
            ticket_id: Uuid::new_v4(),
            description: "Brush Roll".to_string(),
            part_cost: BigDecimal::from(20),
            labor_cost: BigDecimal::from(15),
            is_approved: false,
            created_at: Utc::now(),
        }];
        let totals = calc::totals(&items, &calc::default_tax_rate());
        let ticket = Ticket {
            id: Uuid::new_v4(),
            customer_id: Uuid::new_v4(),
            brand: "Dyson".to_string(),
            model: "V8".to_string(),
            serial_number: None,
            description: None,
            status: "diagnosing".to_string(),
            is_backordered: false,
            estimate_status: "sent".to_string(),
            estimate_total: None,
            assigned_to: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let html = estimate_email_html(&ticket, &items, &totals, "https://x/status/1");
        assert!(html.contains("$35.00"));
        assert!(html.contains("$37.45"));
        assert_eq!(
            totals.total,
            BigDecimal::from_str("37.45").unwrap()
        );
    }
}
