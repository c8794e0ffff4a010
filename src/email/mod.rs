//! Outbound mail. The relay endpoint the browser client used to call
//! anonymously now sits behind the SendEmail capability.

use crate::auth::session::CurrentUser;
use crate::config::EmailConfig;
use crate::roles::Capability;
use crate::shared::state::AppState;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum MailError {
    #[error("SMTP relay is not configured")]
    NotConfigured,
    #[error("invalid address: {0}")]
    BadAddress(String),
    #[error("message build failed: {0}")]
    Build(#[from] lettre::error::Error),
    #[error("SMTP send failed: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),
}

impl MailError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::NotConfigured => StatusCode::SERVICE_UNAVAILABLE,
            Self::BadAddress(_) => StatusCode::BAD_REQUEST,
            Self::Build(_) | Self::Smtp(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

pub fn build_mailer(config: &EmailConfig) -> Option<SmtpTransport> {
    if config.smtp_server.is_empty() {
        return None;
    }
    let relay = match SmtpTransport::relay(&config.smtp_server) {
        Ok(relay) => relay,
        Err(e) => {
            warn!(server = %config.smtp_server, error = %e, "SMTP relay unavailable");
            return None;
        }
    };
    let mut builder = relay.port(config.smtp_port);
    if !config.username.is_empty() {
        builder = builder.credentials(Credentials::new(
            config.username.clone(),
            config.password.clone(),
        ));
    }
    Some(builder.build())
}

pub fn send_html(state: &AppState, to: &str, subject: &str, html: &str) -> Result<(), MailError> {
    let mailer = state.mailer.as_ref().ok_or(MailError::NotConfigured)?;
    let from: Mailbox = state
        .config
        .email
        .from
        .parse()
        .map_err(|_| MailError::BadAddress(state.config.email.from.clone()))?;
    let to_mailbox: Mailbox = to
        .parse()
        .map_err(|_| MailError::BadAddress(to.to_string()))?;

    let message = Message::builder()
        .from(from)
        .to(to_mailbox)
        .subject(subject)
        .header(ContentType::TEXT_HTML)
        .body(html.to_string())?;

    mailer.send(&message)?;
    Ok(())
}

#[derive(Debug, Deserialize)]
pub struct SendEmailRequest {
    pub to: String,
    pub subject: String,
    pub html: String,
}

#[derive(Debug, Serialize)]
pub struct SendEmailResponse {
    pub sent: bool,
}

pub async fn send_email(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Json(req): Json<SendEmailRequest>,
) -> Result<Json<SendEmailResponse>, (StatusCode, String)> {
    user.require(Capability::SendEmail)?;
    send_html(&state, &req.to, &req.subject, &req.html)
        .map_err(|e| (e.status(), e.to_string()))?;
    info!(to = %req.to, by = %user.email, "relay email sent");
    Ok(Json(SendEmailResponse { sent: true }))
}

pub fn configure_email_routes() -> Router<Arc<AppState>> {
    Router::new().route("/api/email/send", post(send_email))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_mailer_without_smtp_server() {
        let config = EmailConfig {
            smtp_server: String::new(),
            smtp_port: 587,
            username: String::new(),
            password: String::new(),
            from: "shop@example.com".to_string(),
        };
        assert!(build_mailer(&config).is_none());
    }

    #[test]
    fn mail_errors_map_to_statuses() {
        assert_eq!(MailError::NotConfigured.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            MailError::BadAddress("nope".to_string()).status(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn request_shape() {
        let req: SendEmailRequest = serde_json::from_str(
            r#"{"to":"a@b.c","subject":"Hi","html":"<p>Ready</p>"}"#,
        )
        .unwrap();
        assert_eq!(req.to, "a@b.c");
    }
}
