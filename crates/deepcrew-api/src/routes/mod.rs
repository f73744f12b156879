mod health;
mod research;

use axum::{
    Router,
    http::{HeaderValue, Method, header},
};
use health::health_router;
use research::research_router;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::warn;

use crate::state::AppState;

pub use research::{ResearchRequest, ResearchResponse};

pub fn build_router(state: AppState) -> Router {
    let cors = cors_layer(state.cors_origin());

    Router::new()
        .nest("/health", health_router())
        .nest("/api", research_router())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(origin: &str) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE]);

    match HeaderValue::from_str(origin) {
        Ok(value) => layer.allow_origin(value),
        Err(err) => {
            warn!(origin, error = %err, "ignoring invalid CORS origin");
            layer
        }
    }
}
