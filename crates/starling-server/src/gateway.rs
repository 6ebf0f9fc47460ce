//! WebSocket gateway — the only transport surface of the server.
//!
//! One route, `/ws`, carrying both binary snapshots and text control
//! messages on a single connection. Session IDs are process-local and
//! monotonic; they never appear on the wire.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::session::{self, SessionContext};

#[derive(Clone)]
struct GatewayState {
    ctx: SessionContext,
    next_session: Arc<AtomicU64>,
}

pub fn build_router(ctx: SessionContext) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(GatewayState { ctx, next_session: Arc::new(AtomicU64::new(1)) })
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<GatewayState>,
) -> impl IntoResponse {
    let id = state.next_session.fetch_add(1, Ordering::Relaxed);
    ws.on_upgrade(move |socket| session::run(socket, id, state.ctx))
}

/// Bind and serve until the process is stopped.
pub async fn serve(
    addr: &str,
    ctx: SessionContext,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let app = build_router(ctx);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("gateway: listening on ws://{addr}/ws");
    axum::serve(listener, app).await?;
    Ok(())
}
