use std::{net::SocketAddr, sync::Arc, time::Duration};

use {
    axum::{
        Router,
        extract::{State, WebSocketUpgrade},
        response::{IntoResponse, Json},
        routing::{delete, get, post},
    },
    tower_http::{
        cors::{Any, CorsLayer},
        timeout::TimeoutLayer,
    },
    tracing::info,
};

use {
    neurelay_storage::{ChatStore, MessageStore},
    neurelay_upstream::NeuralClient,
};

use crate::{api, session, session::SessionTimeouts};

/// Write buffer negotiated for each upgraded client connection.
const WS_WRITE_BUFFER: usize = 1024;

// ── Shared app state ─────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct AppState {
    pub messages: Arc<dyn MessageStore>,
    pub chats: Arc<dyn ChatStore>,
    pub upstream: Arc<NeuralClient>,
    pub timeouts: SessionTimeouts,
}

// ── Server startup ───────────────────────────────────────────────────────────

/// Build the gateway router (shared between production startup and tests).
///
/// `http_timeout` bounds the REST routes only; the WebSocket route is
/// long-lived and paces itself with its own heartbeat deadlines.
pub fn build_app(state: AppState, http_timeout: Duration) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let rest = Router::new()
        .route("/health", get(health_handler))
        .route("/chats", post(api::create_chat).get(api::list_chats))
        .route("/chats/{id}", delete(api::delete_chat))
        .route("/chats/{id}/messages", get(api::list_messages))
        .route("/messages/{id}/feedback", post(api::set_feedback))
        .layer(TimeoutLayer::new(http_timeout));

    Router::new()
        .route("/ws", get(ws_upgrade_handler))
        .merge(rest)
        .layer(cors)
        .with_state(state)
}

/// Bind and serve until SIGINT/SIGTERM.
pub async fn serve(addr: &str, state: AppState, http_timeout: Duration) -> anyhow::Result<()> {
    let addr: SocketAddr = addr.parse()?;
    let app = build_app(state, http_timeout);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    info!(%addr, "gateway listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => tracing::error!("failed to install SIGTERM handler: {e}"),
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("shutdown signal received");
}

// ── Handlers ─────────────────────────────────────────────────────────────────

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "neurelay",
        "upstream_ready": state.upstream.is_ready(),
    }))
}

async fn ws_upgrade_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.write_buffer_size(WS_WRITE_BUFFER)
        .on_upgrade(move |socket| session::run(socket, state))
}
