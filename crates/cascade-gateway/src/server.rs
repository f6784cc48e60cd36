use crate::completions::chat_completions;
use crate::middleware::trace_requests;
use axum::{
    extract::State,
    middleware as axum_mw,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use cascade_router::Dispatcher;
use std::sync::Arc;
use tower::ServiceBuilder;

/// Shared application state.
pub struct AppState {
    /// Dispatcher every completion request goes through.
    pub dispatcher: Arc<Dispatcher>,
}

/// The main gateway server.
pub struct GatewayServer;

impl GatewayServer {
    /// Build the gateway router around a dispatcher.
    pub fn build(dispatcher: Arc<Dispatcher>) -> Router {
        let state = Arc::new(AppState { dispatcher });

        Router::new()
            .route("/v1/chat/completions", post(chat_completions))
            .route("/v1/models", get(models_handler))
            .route("/health", get(health_handler))
            .with_state(state)
            .layer(ServiceBuilder::new().layer(axum_mw::from_fn(trace_requests)))
    }
}

async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({"status": "ok", "service": "cascade"}))
}

/// Lists the configured roles in the OpenAI model-list shape.
async fn models_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let table = state.dispatcher.table().snapshot();
    let data: Vec<_> = table
        .profiles()
        .iter()
        .map(|p| {
            serde_json::json!({
                "id": p.role_id,
                "object": "model",
                "owned_by": p.provider.tag(),
                "default": p.role_id == table.default_role(),
                "supports_media": p.supports_media,
            })
        })
        .collect();
    Json(serde_json::json!({"object": "list", "data": data}))
}
