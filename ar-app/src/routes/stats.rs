use crate::server::AppState;
use axum::routing::get;
use axum::{Extension, Json};
use std::sync::Arc;

pub fn router() -> axum::Router {
    axum::Router::new().route("/api/v1/stats", get(get_stats))
}

#[tracing::instrument(level = "debug", skip_all)]
async fn get_stats(Extension(state): Extension<Arc<AppState>>) -> Json<serde_json::Value> {
    let stats = state.responder.stats();
    Json(serde_json::json!({
        "uptime_secs": state.started_at.elapsed().as_secs(),
        "stats": stats,
        "settings": state.responder.settings().snapshot(),
        "recent_transitions": state.responder.lifecycle_history(),
    }))
}
