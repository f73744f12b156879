use axum::{Json, Router, extract::State, routing::get};
use serde::Serialize;

use crate::state::{AppState, Capacity};

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    capacity: Capacity,
}

pub fn health_router() -> Router<AppState> {
    Router::new().route("/", get(health))
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        capacity: state.capacity(),
    })
}
