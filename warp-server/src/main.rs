//! Warp session server entry point (spec §4.10, §4.12).
//!
//! Bootstraps configuration, wires the Registry/Store/Permission/LLM
//! dependencies, and serves the bidirectional session protocol over
//! WebSocket until `ctrl_c`.

use std::sync::Arc;

use warp_core::{ConfigError, OrchestratorResult, RuntimeConfig};
use warp_llm::providers::{AnthropicClient, OpenAIClient};
use warp_llm::LlmClient;
use warp_orchestrator::SessionDeps;
use warp_permission::PermissionManager;
use warp_registry::{AdapterRegistry, NodeRegistry};
use warp_server::{build_router, AppState};
use warp_store::{FsWorkflowStore, WorkflowStore};

#[tokio::main]
async fn main() -> OrchestratorResult<()> {
    let config = RuntimeConfig::from_env()?;
    init_tracing(&config);

    tracing::info!(bind = %config.server_bind_addr, "starting warp session server");

    let store: Arc<dyn WorkflowStore> =
        Arc::new(FsWorkflowStore::open(config.store_root.clone()).await.map_err(|e| {
            ConfigError::InvalidValue {
                field: "STORE_ROOT".to_string(),
                value: config.store_root.clone(),
                reason: e.to_string(),
            }
        })?);

    let permission_manager = Arc::new(PermissionManager::new(config.permission_default_ttl));
    let sweep_cancel = tokio_util::sync::CancellationToken::new();
    tokio::spawn({
        let permission_manager = permission_manager.clone();
        let sweep_cancel = sweep_cancel.clone();
        async move { permission_manager.run_sweep_loop(sweep_cancel).await }
    });

    let deps = SessionDeps::new(
        Arc::new(NodeRegistry::with_builtins()),
        Arc::new(AdapterRegistry::with_builtins()),
        store,
        permission_manager,
        build_llm_client(&config),
        config.session_deadline,
    );

    let app = build_router(AppState::new(deps));

    let listener = tokio::net::TcpListener::bind(&config.server_bind_addr)
        .await
        .map_err(|e| ConfigError::InvalidValue {
            field: "SERVER_BIND_ADDR".to_string(),
            value: config.server_bind_addr.clone(),
            reason: e.to_string(),
        })?;

    tokio::select! {
        result = axum::serve(listener, app.into_make_service()) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "server error");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received");
        }
    }

    sweep_cancel.cancel();
    Ok(())
}

/// Pick a concrete provider from the configured model name. Anthropic and
/// OpenAI model identifiers don't overlap, so a simple prefix check is
/// enough to route without a dedicated `LLM_PROVIDER` setting.
fn build_llm_client(config: &RuntimeConfig) -> Arc<dyn LlmClient> {
    if config.llm_model.starts_with("gpt") || config.llm_model.starts_with("o1") {
        Arc::new(OpenAIClient::new(
            config.llm_api_key.clone(),
            config.llm_model.clone(),
            config.llm_requests_per_minute,
        ))
    } else {
        Arc::new(AnthropicClient::new(
            config.llm_api_key.clone(),
            config.llm_model.clone(),
            config.llm_requests_per_minute,
        ))
    }
}

fn init_tracing(config: &RuntimeConfig) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_filter_str()));
    fmt().with_env_filter(filter).init();
}
