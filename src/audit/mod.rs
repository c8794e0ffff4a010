//! Append-only per-ticket history.
//!
//! Entries are never updated; the only destructive operation is the
//! admin-only hard delete, and callers should treat it as exceptional.

use crate::auth::session::CurrentUser;
use crate::roles::Capability;
use crate::shared::schema::{audit_logs, tickets};
use crate::shared::state::AppState;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

pub const ACTION_TICKET_CREATED: &str = "ticket_created";
pub const ACTION_STATUS_CHANGED: &str = "status_changed";
pub const ACTION_TICKET_REOPENED: &str = "ticket_reopened";
pub const ACTION_TICKET_ASSIGNED: &str = "ticket_assigned";
pub const ACTION_BACKORDER_CHANGED: &str = "backorder_changed";
pub const ACTION_ESTIMATE_SENT: &str = "estimate_sent";
pub const ACTION_ESTIMATE_APPROVED: &str = "estimate_approved";
pub const ACTION_PART_STATUS_CHANGED: &str = "part_status_changed";
pub const ACTION_NOTE_ADDED: &str = "note_added";

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable)]
#[diesel(table_name = audit_logs)]
pub struct AuditLogEntry {
    pub id: Uuid,
    pub ticket_id: Uuid,
    pub actor_name: String,
    pub action: String,
    pub details: String,
    pub metadata: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

pub fn append(
    conn: &mut PgConnection,
    ticket_id: Uuid,
    actor_name: &str,
    action: &str,
    details: String,
    metadata: Option<serde_json::Value>,
) -> QueryResult<AuditLogEntry> {
    let entry = AuditLogEntry {
        id: Uuid::new_v4(),
        ticket_id,
        actor_name: actor_name.to_string(),
        action: action.to_string(),
        details,
        metadata,
        created_at: Utc::now(),
    };
    diesel::insert_into(audit_logs::table)
        .values(&entry)
        .execute(conn)?;
    Ok(entry)
}

pub async fn list_for_ticket(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(ticket_id): Path<Uuid>,
) -> Result<Json<Vec<AuditLogEntry>>, (StatusCode, String)> {
    user.require(Capability::ViewBoard)?;
    let mut conn = state
        .conn
        .get()
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("DB error: {e}")))?;

    let entries: Vec<AuditLogEntry> = audit_logs::table
        .filter(audit_logs::ticket_id.eq(ticket_id))
        .order(audit_logs::created_at.asc())
        .load(&mut conn)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Query error: {e}")))?;

    Ok(Json(entries))
}

#[derive(Debug, Deserialize)]
pub struct AddNoteRequest {
    pub body: String,
}

/// Appends a `note_added` entry, first confirming the ticket exists.
/// Returns `None` for an unknown ticket so the handler can answer 404.
pub fn note_entry(
    conn: &mut PgConnection,
    ticket_id: Uuid,
    actor_name: &str,
    body: &str,
) -> QueryResult<Option<AuditLogEntry>> {
    let exists: Option<Uuid> = tickets::table
        .find(ticket_id)
        .select(tickets::id)
        .first(conn)
        .optional()?;
    if exists.is_none() {
        return Ok(None);
    }
    append(conn, ticket_id, actor_name, ACTION_NOTE_ADDED, body.to_string(), None).map(Some)
}

/// Free-text technician note, stored as a history entry like any other
/// action.
pub async fn add_note(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(ticket_id): Path<Uuid>,
    Json(req): Json<AddNoteRequest>,
) -> Result<Json<AuditLogEntry>, (StatusCode, String)> {
    user.require(Capability::EditTickets)?;
    let body = req.body.trim();
    if body.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "Note body is required".to_string()));
    }
    let mut conn = state
        .conn
        .get()
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("DB error: {e}")))?;

    let entry = note_entry(&mut conn, ticket_id, &user.name, body)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Insert error: {e}")))?
        .ok_or_else(|| (StatusCode::NOT_FOUND, "Ticket not found".to_string()))?;

    Ok(Json(entry))
}

/// Hard delete of a single entry; returns the number of rows removed.
pub fn delete_by_id(conn: &mut PgConnection, id: Uuid) -> QueryResult<usize> {
    diesel::delete(audit_logs::table.filter(audit_logs::id.eq(id))).execute(conn)
}

pub async fn delete_entry(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, (StatusCode, String)> {
    user.require(Capability::DeleteAuditEntries)?;
    let mut conn = state
        .conn
        .get()
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("DB error: {e}")))?;

    let removed = delete_by_id(&mut conn, id)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Delete error: {e}")))?;

    if removed == 0 {
        return Err((StatusCode::NOT_FOUND, "Audit entry not found".to_string()));
    }
    warn!(entry = %id, by = %user.email, "audit entry hard-deleted");
    Ok(StatusCode::NO_CONTENT)
}

pub fn configure_audit_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/tickets/:id/audit", get(list_for_ticket))
        .route("/api/tickets/:id/notes", post(add_note))
        .route("/api/audit/:id", delete(delete_entry))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_labels_are_distinct() {
        let all = [
            ACTION_TICKET_CREATED,
            ACTION_STATUS_CHANGED,
            ACTION_TICKET_REOPENED,
            ACTION_TICKET_ASSIGNED,
            ACTION_BACKORDER_CHANGED,
            ACTION_ESTIMATE_SENT,
            ACTION_ESTIMATE_APPROVED,
            ACTION_PART_STATUS_CHANGED,
            ACTION_NOTE_ADDED,
        ];
        for (i, a) in all.iter().enumerate() {
            for b in &all[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn entry_serializes_with_metadata() {
        let entry = AuditLogEntry {
            id: Uuid::new_v4(),
            ticket_id: Uuid::new_v4(),
            actor_name: "Kim".to_string(),
            action: ACTION_STATUS_CHANGED.to_string(),
            details: "Intake -> Diagnosing".to_string(),
            metadata: Some(serde_json::json!({"from": "intake", "to": "diagnosing"})),
            created_at: Utc::now(),
        };
        let value = serde_json::to_value(&entry).unwrap();
        assert_eq!(value["metadata"]["from"], "intake");
        assert_eq!(value["action"], "status_changed");
    }
}
