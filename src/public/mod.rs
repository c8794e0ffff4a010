//! Unauthenticated status surface. Possession of the ticket link is the
//! only credential, matching the paper claim-ticket workflow.

use crate::estimates::{self, calc, EstimateItem};
use crate::settings;
use crate::shared::schema::{estimate_items, tickets};
use crate::shared::state::AppState;
use crate::tickets::{Ticket, TicketStatus, ESTIMATE_NONE};
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use diesel::prelude::*;
use qrcode::QrCode;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Serialize)]
pub struct PublicTicket {
    pub id: Uuid,
    pub brand: String,
    pub model: String,
    pub status: String,
    pub status_label: String,
    /// Zero-based progress step for the tracker strip.
    pub step_index: usize,
    pub is_backordered: bool,
    pub estimate_status: String,
    pub estimate: Option<PublicEstimate>,
}

#[derive(Debug, Serialize)]
pub struct PublicEstimate {
    pub items: Vec<EstimateItem>,
    pub totals: calc::EstimateTotals,
}

#[derive(Debug, Deserialize)]
pub struct PublicApproveRequest {
    #[serde(default)]
    pub device_fingerprint: Option<String>,
}

pub async fn public_ticket(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<PublicTicket>, (StatusCode, String)> {
    let mut conn = state
        .conn
        .get()
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("DB error: {e}")))?;

    let ticket: Ticket = tickets::table
        .find(id)
        .first(&mut conn)
        .map_err(|_| (StatusCode::NOT_FOUND, "Ticket not found".to_string()))?;

    let status: TicketStatus = ticket.status.parse().unwrap_or(TicketStatus::Intake);

    let estimate = if ticket.estimate_status != ESTIMATE_NONE {
        let items: Vec<EstimateItem> = estimate_items::table
            .filter(estimate_items::ticket_id.eq(id))
            .order(estimate_items::created_at.asc())
            .load(&mut conn)
            .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Query error: {e}")))?;
        let rate = settings::shop_tax_rate(&mut conn);
        let totals = calc::totals(&items, &rate);
        Some(PublicEstimate { items, totals })
    } else {
        None
    };

    Ok(Json(PublicTicket {
        id: ticket.id,
        brand: ticket.brand,
        model: ticket.model,
        status: ticket.status,
        status_label: status.label().to_string(),
        step_index: status.step_index(),
        is_backordered: ticket.is_backordered,
        estimate_status: ticket.estimate_status,
        estimate,
    }))
}

/// Anonymous approval from the emailed status link. Same idempotent
/// workflow the staff route runs, with a fixed actor label.
pub async fn public_approve(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<PublicApproveRequest>,
) -> Result<Json<PublicTicket>, (StatusCode, String)> {
    {
        let mut conn = state
            .conn
            .get()
            .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("DB error: {e}")))?;

        estimates::run_approval(
            &mut conn,
            id,
            "Customer (online approval)",
            req.device_fingerprint.as_deref(),
        )
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Approval error: {e}")))?
        .ok_or((StatusCode::NOT_FOUND, "Ticket not found".to_string()))?;
    }

    public_ticket(State(state), Path(id)).await
}

/// Renders a QR code PNG for scanned data, black on white, 8x module
/// scale.
pub fn qr_png(data: &str) -> Result<Vec<u8>, String> {
    let code = QrCode::new(data.as_bytes()).map_err(|e| format!("QR encode failed: {e}"))?;
    let matrix = code.to_colors();
    let width = code.width();
    let scale = 8usize;
    let size = width * scale;

    let mut pixels: Vec<u8> = Vec::with_capacity(size * size);
    for y in 0..size {
        for x in 0..size {
            let idx = (y / scale) * width + (x / scale);
            let is_dark = matrix
                .get(idx)
                .map(|c| *c == qrcode::Color::Dark)
                .unwrap_or(false);
            pixels.push(if is_dark { 0 } else { 255 });
        }
    }

    let mut buf = Vec::new();
    {
        let mut encoder = png::Encoder::new(&mut buf, size as u32, size as u32);
        encoder.set_color(png::ColorType::Grayscale);
        encoder.set_depth(png::BitDepth::Eight);
        let mut writer = encoder
            .write_header()
            .map_err(|e| format!("PNG header failed: {e}"))?;
        writer
            .write_image_data(&pixels)
            .map_err(|e| format!("PNG write failed: {e}"))?;
    }
    Ok(buf)
}

/// Printable label: QR deep link back to this ticket's status page.
pub async fn ticket_label(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Response, (StatusCode, String)> {
    let mut conn = state
        .conn
        .get()
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("DB error: {e}")))?;

    // 404 for unknown tickets rather than emitting a dead-link label.
    tickets::table
        .find(id)
        .first::<Ticket>(&mut conn)
        .map_err(|_| (StatusCode::NOT_FOUND, "Ticket not found".to_string()))?;

    let link = format!("{}/status/{}", state.config.server.public_base_url, id);
    let image = qr_png(&link).map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e))?;

    Ok(([(header::CONTENT_TYPE, "image/png")], image).into_response())
}

pub fn configure_public_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/public/tickets/:id", get(public_ticket))
        .route("/public/tickets/:id/approve", post(public_approve))
        .route("/public/tickets/:id/label.png", get(ticket_label))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qr_png_emits_valid_png_magic() {
        let image = qr_png("https://shop.example.com/status/abc").unwrap();
        assert_eq!(&image[..8], &[0x89, b'P', b'N', b'G', b'\r', b'\n', 0x1a, b'\n']);
    }

    #[test]
    fn approve_request_tolerates_missing_fingerprint() {
        let req: PublicApproveRequest = serde_json::from_str("{}").unwrap();
        assert!(req.device_fingerprint.is_none());
    }
}
