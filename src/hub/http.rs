// Hub HTTP surface
// axum router: the live-server directory, WebSocket connect endpoints for
// servers and clients, and cache-stamped static data downloads.

use std::sync::Arc;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use tower_http::services::ServeDir;
use uuid::Uuid;

use crate::hub::broker::{handle_client_socket, handle_server_socket};
use crate::hub::directory::HubDirectory;
use crate::hub::static_data::{StaticData, StaticResource};

#[derive(Clone)]
pub struct HubState {
    pub directory: Arc<HubDirectory>,
    pub static_data: Arc<StaticData>,
}

/// The hub's full route table.
pub fn router(state: HubState) -> Router {
    let mut router = Router::new()
        .route("/servers", get(list_servers))
        .route("/connect", get(connect_server))
        .route("/connect/{server_id}", get(connect_client))
        .route("/cache/servers", get(cache_servers))
        .route("/cache/{resource}", get(cache_resource))
        .route("/{resource}", get(download_resource));

    // individual shape files download straight from disk; /topologies itself
    // stays the JSON listing
    if let Some(dir) = state.static_data.topologies_dir() {
        router = router.nest_service("/topologies/files", ServeDir::new(dir));
    }

    router.with_state(state)
}

async fn list_servers(State(state): State<HubState>) -> impl IntoResponse {
    Json(state.directory.list().await)
}

async fn connect_server(State(state): State<HubState>, ws: WebSocketUpgrade) -> Response {
    let directory = Arc::clone(&state.directory);
    ws.on_upgrade(move |socket| handle_server_socket(directory, socket))
}

async fn connect_client(
    State(state): State<HubState>,
    Path(server_id): Path<Uuid>,
    ws: WebSocketUpgrade,
) -> Response {
    let directory = Arc::clone(&state.directory);
    ws.on_upgrade(move |socket| handle_client_socket(directory, server_id, socket))
}

async fn cache_servers(State(state): State<HubState>) -> impl IntoResponse {
    Json(state.directory.stamp().await)
}

async fn cache_resource(
    State(state): State<HubState>,
    Path(resource): Path<String>,
) -> Response {
    let resource: StaticResource = match resource.parse() {
        Ok(r) => r,
        Err(()) => return StatusCode::NOT_FOUND.into_response(),
    };
    match state.static_data.last_write(resource).await {
        Some(stamp) => Json(stamp).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn download_resource(
    State(state): State<HubState>,
    Path(resource): Path<String>,
) -> Response {
    let resource: StaticResource = match resource.parse() {
        Ok(r) => r,
        Err(()) => return StatusCode::NOT_FOUND.into_response(),
    };
    match state.static_data.read(resource).await {
        Some(bytes) => bytes.into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}
