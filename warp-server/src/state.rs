//! Shared application state (spec §4.12).

use std::sync::Arc;

use dashmap::DashMap;
use warp_core::SessionId;
use warp_orchestrator::{SessionDeps, SessionRuntime};

/// Everything the router's handlers need, injected via Axum's `State`
/// extractor. Cloning is cheap: every field is an `Arc` or `Arc`-backed
/// collection.
#[derive(Clone)]
pub struct AppState {
    pub deps: SessionDeps,
    /// Live session runtimes, keyed by id. Entries are inserted when a
    /// WebSocket connects and removed once its read loop exits, so this
    /// also doubles as a live-connection count for `/healthz`.
    pub sessions: Arc<DashMap<SessionId, Arc<SessionRuntime>>>,
}

impl AppState {
    pub fn new(deps: SessionDeps) -> Self {
        Self {
            deps,
            sessions: Arc::new(DashMap::new()),
        }
    }
}
