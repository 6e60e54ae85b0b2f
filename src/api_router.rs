//! Top-level router assembly. Module routers are merged here so `main`
//! only deals with one `Router`.

use axum::{extract::State, response::Json, routing::get, Router};
use std::sync::Arc;

use crate::shared::state::AppState;
use crate::tickets;

pub fn configure_api_routes() -> Router<Arc<AppState>> {
    Router::new()
        .merge(tickets::configure_tickets_routes())
        .route("/health", get(handle_health))
}

async fn handle_health(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "tickets": state.store.count().await,
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}
