pub mod auth;
pub mod message;

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;

use crate::state::AppState;

/// Build the ingress router.
///
/// Routes are split into **public** (health probe) and **protected**
/// (gated behind the inter-service bearer-token middleware).
pub fn router(state: AppState) -> Router<AppState> {
    let public = Router::new().route("/health", get(message::health));

    let protected = Router::new()
        .route("/message", post(message::ingest_message))
        .route("/embed", post(message::embed_text))
        .route_layer(middleware::from_fn_with_state(
            state,
            auth::require_service_token,
        ));

    public
        .merge(protected)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
