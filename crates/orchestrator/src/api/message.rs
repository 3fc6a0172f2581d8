//! Ingress handlers: normalized message intake and the embedding proxy.

use axum::extract::{Json, State};
use axum::response::IntoResponse;
use serde::Deserialize;

use ma_domain::message::IncomingMessage;

use crate::runtime::agent_loop;
use crate::state::AppState;

/// `GET /health` — public liveness probe.
pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

/// `POST /message` — run one agent turn for a normalized message.
///
/// Always answers 200 with an [`ma_domain::message::AgentResponse`];
/// failures are carried in its `error` field so adapters have a single
/// decode path.
pub async fn ingest_message(
    State(state): State<AppState>,
    Json(incoming): Json<IncomingMessage>,
) -> impl IntoResponse {
    let response = agent_loop::handle_message(&state, incoming).await;
    Json(response)
}

#[derive(Deserialize)]
pub struct EmbedRequest {
    pub text: String,
}

/// `POST /embed` — embed text for callers that store their own vectors.
///
/// Degrades to `{"embedding": null}` when no embedding provider is
/// available; callers treat the vector as optional.
pub async fn embed_text(
    State(state): State<AppState>,
    Json(req): Json<EmbedRequest>,
) -> impl IntoResponse {
    match state.llm.embed(&req.text).await {
        Ok(embedding) => Json(serde_json::json!({ "embedding": embedding })),
        Err(e) => {
            tracing::warn!(error = %e, "embedding request failed");
            Json(serde_json::json!({ "embedding": serde_json::Value::Null }))
        }
    }
}
