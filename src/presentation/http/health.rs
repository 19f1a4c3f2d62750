use axum::{Json, Router, extract::State, routing::get};
use serde::Serialize;

use crate::bootstrap::app_context::AppContext;
use crate::presentation::http::fallback;

#[derive(Debug, Serialize)]
pub struct HealthResp {
    pub status: &'static str,
}

pub async fn health(State(ctx): State<AppContext>) -> Json<HealthResp> {
    let status = match ctx.database().ping().await {
        Ok(()) => "ok",
        Err(e) => {
            tracing::warn!(error = ?e, "database_ping_failed");
            "degraded"
        }
    };
    Json(HealthResp { status })
}

pub fn routes(ctx: AppContext) -> Router {
    Router::new()
        .route("/health", get(health).fallback(fallback::not_found))
        .with_state(ctx)
}
