use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use dotenvy::dotenv;
use shopserver::audit::configure_audit_routes;
use shopserver::auth::configure_auth_routes;
use shopserver::auth::lockout::KeyedRateLimiter;
use shopserver::config::AppConfig;
use shopserver::customers::configure_customer_routes;
use shopserver::email::{build_mailer, configure_email_routes};
use shopserver::estimates::configure_estimate_routes;
use shopserver::inventory::configure_inventory_routes;
use shopserver::parts::configure_parts_routes;
use shopserver::public::configure_public_routes;
use shopserver::settings::configure_settings_routes;
use shopserver::shared::state::AppState;
use shopserver::shared::utils::create_conn;
use shopserver::team::{configure_team_routes, ensure_admin_profile};
use shopserver::tickets::configure_ticket_routes;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_cookies::CookieManagerLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

const MIGRATIONS: EmbeddedMigrations = embed_migrations!();

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = AppConfig::load()?;
    let pool = create_conn(&config.database.url)?;

    {
        let mut conn = pool.get()?;
        conn.run_pending_migrations(MIGRATIONS)
            .map_err(|e| anyhow::anyhow!("migrations failed: {e}"))?;
    }
    ensure_admin_profile(&pool)?;

    let mailer = build_mailer(&config.email);
    if mailer.is_none() {
        info!("SMTP not configured, outbound email disabled");
    }
    let login_limiter =
        KeyedRateLimiter::new(config.auth.login_attempts, config.auth.login_refill_secs);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let state = Arc::new(AppState {
        conn: pool,
        config,
        mailer,
        login_limiter,
    });

    let app = axum::Router::new()
        .merge(configure_auth_routes())
        .merge(configure_ticket_routes())
        .merge(configure_estimate_routes())
        .merge(configure_customer_routes())
        .merge(configure_parts_routes())
        .merge(configure_inventory_routes())
        .merge(configure_settings_routes())
        .merge(configure_team_routes())
        .merge(configure_audit_routes())
        .merge(configure_email_routes())
        .merge(configure_public_routes())
        .layer(CookieManagerLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state);

    info!("shopserver listening on {addr}");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}
