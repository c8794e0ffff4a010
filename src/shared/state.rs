use crate::auth::lockout::KeyedRateLimiter;
use crate::config::AppConfig;
use crate::shared::utils::DbPool;
use lettre::SmtpTransport;

pub struct AppState {
    pub conn: DbPool,
    pub config: AppConfig,
    /// `None` when no SMTP relay is configured; email surfaces degrade to 503.
    pub mailer: Option<SmtpTransport>,
    pub login_limiter: KeyedRateLimiter,
}
