use axum::{extract::State, Json};
use std::sync::Arc;

use crate::models::{LocationRegionResponse, LocationResponse};
use crate::AppState;

/// List all configured locations
pub async fn list_locations(State(state): State<Arc<AppState>>) -> Json<Vec<LocationResponse>> {
    Json(state.lg.location_list())
}

/// List locations grouped by region
pub async fn list_locations_by_region(State(state): State<Arc<AppState>>) -> Json<Vec<LocationRegionResponse>> {
    Json(state.lg.locations_by_region())
}
