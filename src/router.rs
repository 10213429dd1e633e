use axum::{
    http::HeaderValue,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::AppState;

/// Build the application router with all routes
pub fn build(state: Arc<AppState>, cors_origins: &[String]) -> Router {
    Router::new()
        // Health check
        .route("/healthcheck", get(handlers::healthcheck))
        // Location routes
        .route("/locations", get(handlers::locations::list_locations))
        .route("/locations/regional", get(handlers::locations::list_locations_by_region))
        // Single command routes
        .route("/ping/:location/:destination", get(handlers::lookingglass::ping))
        .route("/traceroute/:location/:destination", get(handlers::lookingglass::traceroute))
        .route("/bgp/:location/*destination", get(handlers::lookingglass::bgp))
        // Multi command routes
        .route("/multi/ping", post(handlers::lookingglass::multi_ping))
        .route("/multi/bgp", post(handlers::lookingglass::multi_bgp))
        .with_state(state)
        .layer(cors_layer(cors_origins))
        .layer(TraceLayer::new_for_http())
}

/// Restrict origins to the configured list; "*" or an empty list allows any
fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);

    if origins.is_empty() || origins.iter().any(|o| o == "*") {
        return layer.allow_origin(Any);
    }

    let values: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!("Ignoring invalid CORS origin: {}", origin);
                None
            }
        })
        .collect();

    if values.is_empty() {
        layer.allow_origin(Any)
    } else {
        layer.allow_origin(AllowOrigin::list(values))
    }
}
