//! Session WebSocket server (spec §4.12): a thin Axum router exposing the
//! bidirectional protocol over `/ws`, backed by one [`SessionRuntime`] per
//! connection.

mod state;
mod ws;

pub use state::AppState;
pub use ws::ws_handler;

use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

/// Build the server's router. Split out from `main` so integration tests
/// can mount it against an in-process client without binding a socket.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/healthz", get(healthz))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(Arc::new(state))
}

async fn healthz(axum::extract::State(state): axum::extract::State<Arc<AppState>>) -> String {
    format!("{{\"status\":\"ok\",\"active_sessions\":{}}}", state.sessions.len())
}
