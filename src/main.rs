use axum::{routing::get, Router};
use dotenvy::dotenv;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, services::ServeDir, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::EnvFilter;

use helpdesk_server::auth::{configure_auth_routes, ensure_bootstrap_admin};
use helpdesk_server::config::AppConfig;
use helpdesk_server::email::Mailer;
use helpdesk_server::notify::{events_ws_handler, EventBroadcaster};
use helpdesk_server::shared::state::AppState;
use helpdesk_server::shared::utils::{create_conn, run_migrations};
use helpdesk_server::tickets::configure_ticket_routes;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = AppConfig::from_env();
    let pool = create_conn(&config)?;
    run_migrations(&pool)?;
    ensure_bootstrap_admin(&pool, &config)?;

    tokio::fs::create_dir_all(&config.uploads_dir).await?;

    let state = Arc::new(AppState {
        conn: pool,
        events: EventBroadcaster::new(128),
        mailer: Mailer::new(config.smtp.clone()),
        config: config.clone(),
    });

    let app = Router::new()
        .merge(configure_auth_routes())
        .merge(configure_ticket_routes())
        .route("/ws/events", get(events_ws_handler))
        .nest_service("/uploads", ServeDir::new(&config.uploads_dir))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("helpdesk server listening on {addr}");
    axum::serve(listener, app).await?;

    Ok(())
}
