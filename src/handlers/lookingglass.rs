use axum::{
    extract::{Path, Query, State},
    Json,
};
use std::sync::Arc;

use super::ApiError;
use crate::error::LgError;
use crate::models::{CommandKind, CommandResult, MultiResult, MultiTargetBody, RawQuery};
use crate::utils::{check_target_list, is_valid_ip, is_valid_ip_or_network};
use crate::AppState;

fn destination_validator(command: CommandKind) -> fn(&str) -> bool {
    match command {
        CommandKind::Bgp => is_valid_ip_or_network,
        _ => is_valid_ip,
    }
}

/// Run one command at one location and build its result
async fn run_single(
    state: &AppState,
    location: &str,
    command: CommandKind,
    destination: &str,
    raw: bool,
) -> Result<Json<CommandResult>, ApiError> {
    let loc_cfg = state.lg.location(location)?;
    if !destination_validator(command)(destination) {
        return Err(ApiError::bad_request(format!("Invalid destination: {}", destination)));
    }

    let output = state
        .orchestrator
        .execute_single(location, command, destination)
        .await
        .map_err(|e| match e {
            LgError::Transport(_) => ApiError::internal(format!(
                "Error executing command '{}' at location '{}'",
                command, loc_cfg.name
            )),
            other => other.into(),
        })?;

    let result = state
        .processor
        .command_result(location, command, &[(destination.to_string(), output)], raw)
        .await?;
    Ok(Json(result))
}

/// Run one command for every (location, destination) pair in the body
async fn run_multi(
    state: &AppState,
    body: MultiTargetBody,
    command: CommandKind,
    raw: bool,
) -> Result<Json<MultiResult>, ApiError> {
    let limits = &state.lg.limits;
    check_target_list(
        "locations",
        &body.locations,
        limits.max_sources.for_kind(command),
        |code| state.lg.locations.contains_key(code),
    )
    .map_err(ApiError::bad_request)?;
    check_target_list(
        "destinations",
        &body.destinations,
        limits.max_destinations.for_kind(command),
        destination_validator(command),
    )
    .map_err(ApiError::bad_request)?;

    let results = state
        .orchestrator
        .execute(&body.locations, &body.destinations, command)
        .await?;
    let multi = state.processor.multi_result(results, command, raw).await?;

    if !multi.errors.is_empty() {
        tracing::info!(
            "{} request finished with {} error(s)",
            command,
            multi.errors.len()
        );
    }
    Ok(Json(multi))
}

/// GET /ping/:location/:destination
pub async fn ping(
    State(state): State<Arc<AppState>>,
    Path((location, destination)): Path<(String, String)>,
    Query(query): Query<RawQuery>,
) -> Result<Json<CommandResult>, ApiError> {
    run_single(&state, &location, CommandKind::Ping, &destination, query.raw).await
}

/// GET /traceroute/:location/:destination
pub async fn traceroute(
    State(state): State<Arc<AppState>>,
    Path((location, destination)): Path<(String, String)>,
    Query(query): Query<RawQuery>,
) -> Result<Json<CommandResult>, ApiError> {
    run_single(&state, &location, CommandKind::Traceroute, &destination, query.raw).await
}

/// GET /bgp/:location/*destination (the destination may be a prefix with a slash)
pub async fn bgp(
    State(state): State<Arc<AppState>>,
    Path((location, destination)): Path<(String, String)>,
    Query(query): Query<RawQuery>,
) -> Result<Json<CommandResult>, ApiError> {
    let destination = destination.trim_start_matches('/');
    run_single(&state, &location, CommandKind::Bgp, destination, query.raw).await
}

/// POST /multi/ping
pub async fn multi_ping(
    State(state): State<Arc<AppState>>,
    Query(query): Query<RawQuery>,
    Json(body): Json<MultiTargetBody>,
) -> Result<Json<MultiResult>, ApiError> {
    run_multi(&state, body, CommandKind::Ping, query.raw).await
}

/// POST /multi/bgp
pub async fn multi_bgp(
    State(state): State<Arc<AppState>>,
    Query(query): Query<RawQuery>,
    Json(body): Json<MultiTargetBody>,
) -> Result<Json<MultiResult>, ApiError> {
    run_multi(&state, body, CommandKind::Bgp, query.raw).await
}
