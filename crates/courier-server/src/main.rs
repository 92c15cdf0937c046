mod config;

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Query, State, WebSocketUpgrade},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
};
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use courier_api::middleware::verify_token;
use courier_api::state::{AppState, AppStateInner};
use courier_db::Database;
use courier_gateway::connection;
use courier_gateway::dispatcher::Dispatcher;

use crate::config::ServerConfig;

#[derive(Clone)]
struct ServerState {
    app: AppState,
    badge_poll: std::time::Duration,
}

#[derive(Debug, Deserialize)]
struct GatewayQuery {
    token: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "courier=debug,tower_http=debug".into()),
        )
        .init();

    let config = ServerConfig::from_env()?;

    let db = Arc::new(Database::open(&config.db_path)?);
    let dispatcher = Dispatcher::new();
    let app_state: AppState = Arc::new(AppStateInner {
        db,
        dispatcher,
        jwt_secret: config.jwt_secret.clone(),
    });

    let protected_routes = courier_api::routes(app_state.clone());

    let ws_route = Router::new()
        .route("/gateway", get(ws_upgrade))
        .with_state(ServerState {
            app: app_state,
            badge_poll: config.badge_poll,
        });

    let app = Router::new()
        .route("/health", get(health))
        .merge(protected_routes)
        .merge(ws_route)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    info!("Courier server listening on {}", config.addr);
    info!("Inbox badge poll every {}s", config.badge_poll.as_secs());

    let listener = tokio::net::TcpListener::bind(config.addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

/// The token rides in the query string: browsers cannot set headers on a
/// WebSocket handshake.
async fn ws_upgrade(
    State(state): State<ServerState>,
    Query(query): Query<GatewayQuery>,
    ws: WebSocketUpgrade,
) -> Result<impl IntoResponse, StatusCode> {
    let claims = verify_token(&query.token, &state.app.jwt_secret).ok_or(StatusCode::UNAUTHORIZED)?;

    let db = state.app.db.clone();
    let dispatcher = state.app.dispatcher.clone();
    Ok(ws.on_upgrade(move |socket| {
        connection::handle_connection_authenticated(socket, db, dispatcher, claims.sub, state.badge_poll)
    }))
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
                }
            }
            Err(e) => {
                warn!("SIGTERM handler unavailable ({}), waiting for Ctrl+C only", e);
                ctrl_c.await.ok();
                info!("Received Ctrl+C, shutting down...");
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }
}
