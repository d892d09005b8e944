use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use relay_core::{ActiveTask, Relay, RelayRequest, RelayStatus};
use relay_types::{ControlState, HistoryRecord, TaskKey};
use relay_webdav::{ProbeResult, test_connection};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

use crate::resume::relay_local_file;

/// Shared application state for all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub relay: Arc<Relay>,
}

// ── Request/response types ──────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct CompletedTask {
    pub group_id: i64,
    pub item_id: i64,
    #[serde(flatten)]
    pub record: HistoryRecord,
}

#[derive(Debug, Deserialize)]
pub struct ProbeRequest {
    pub url: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct StartRelayRequest {
    pub group_id: i64,
    pub item_id: i64,
    /// Local file to stream.
    pub file_name: String,
    #[serde(default)]
    pub task_id: i64,
}

// ── Handlers ────────────────────────────────────────────────────────────

/// GET /health
pub async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

/// GET /status: global speeds, pause flag and counts.
pub async fn status(State(state): State<AppState>) -> Json<RelayStatus> {
    Json(state.relay.status())
}

/// GET /tasks/active
pub async fn active_tasks(State(state): State<AppState>) -> Json<Vec<ActiveTask>> {
    Json(state.relay.active_tasks())
}

/// GET /tasks/completed
pub async fn completed_tasks(State(state): State<AppState>) -> Json<Vec<CompletedTask>> {
    let tasks = state
        .relay
        .completed_tasks()
        .into_iter()
        .map(|(key, record)| CompletedTask {
            group_id: key.group_id,
            item_id: key.item_id,
            record,
        })
        .collect();
    Json(tasks)
}

/// POST /state/{action}: `pause` or `continue` every transfer.
pub async fn set_global_state(
    State(state): State<AppState>,
    Path(action): Path<String>,
) -> Result<impl IntoResponse, StatusCode> {
    match action.as_str() {
        "pause" => state.relay.pause_all(),
        "continue" => state.relay.resume_all(),
        _ => return Err(StatusCode::BAD_REQUEST),
    }
    Ok(Json(json!({ "download_state": state.relay.controls().download_state() })))
}

/// POST /tasks/{group}/{item}/{action}: `pause`, `resume` or `delete`.
pub async fn control_task(
    State(state): State<AppState>,
    Path((group_id, item_id, action)): Path<(i64, i64, String)>,
) -> Result<impl IntoResponse, StatusCode> {
    let key = TaskKey::new(group_id, item_id);
    let control = match action.as_str() {
        "pause" => ControlState::Paused,
        "resume" => ControlState::Running,
        "delete" => ControlState::Deleted,
        _ => return Err(StatusCode::BAD_REQUEST),
    };
    state.relay.controls().set_state(key, control);
    info!(group_id, item_id, action = %action, "Task control");
    Ok(Json(json!({ "state": control })))
}

/// DELETE /tasks/{group}/{item}: drop one task from history and telemetry.
pub async fn remove_task(
    State(state): State<AppState>,
    Path((group_id, item_id)): Path<(i64, i64)>,
) -> StatusCode {
    if state.relay.remove_task(TaskKey::new(group_id, item_id)) {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    }
}

/// DELETE /history
pub async fn clear_history(State(state): State<AppState>) -> impl IntoResponse {
    let removed = state.relay.clear_history();
    Json(json!({ "removed": removed }))
}

/// POST /probe: check WebDAV connectivity and credentials.
pub async fn probe(Json(req): Json<ProbeRequest>) -> Json<ProbeResult> {
    Json(test_connection(&req.url, &req.username, &req.password).await)
}

/// POST /relay: stream a local file to remote storage in the background.
///
/// An explicit request restarts the task even if it was deleted earlier.
pub async fn start_relay(
    State(state): State<AppState>,
    Json(req): Json<StartRelayRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    let meta = tokio::fs::metadata(&req.file_name).await.map_err(|e| {
        warn!(file = %req.file_name, error = %e, "Relay source not readable");
        StatusCode::NOT_FOUND
    })?;
    if !meta.is_file() {
        return Err(StatusCode::BAD_REQUEST);
    }

    let key = TaskKey::new(req.group_id, req.item_id);
    state.relay.controls().set_state(key, ControlState::Running);
    let request = RelayRequest {
        key,
        file_name: req.file_name,
        total_bytes: meta.len(),
        task_id: req.task_id,
    };
    tokio::spawn(relay_local_file(Arc::clone(&state.relay), request));

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "group_id": key.group_id, "item_id": key.item_id, "total_bytes": meta.len() })),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Method, Request};
    use http_body_util::BodyExt;
    use relay_store::MemorySettings;
    use relay_types::TaskState;
    use relay_webdav::WebDavConfig;
    use tower::ServiceExt;

    fn state() -> AppState {
        let relay = Relay::open(Arc::new(MemorySettings::new()), WebDavConfig::default()).unwrap();
        AppState {
            relay: Arc::new(relay),
        }
    }

    async fn call(state: &AppState, method: Method, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = crate::router(state.clone())
            .oneshot(Request::builder().method(method).uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let value = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, value)
    }

    #[tokio::test]
    async fn global_pause_and_continue() {
        let state = state();
        let (status, body) = call(&state, Method::POST, "/state/pause").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["download_state"], 2);

        let (_, body) = call(&state, Method::GET, "/status").await;
        assert_eq!(body["download_state"], 2);
        assert_eq!(body["upload_speed"], 0);

        let (_, body) = call(&state, Method::POST, "/state/continue").await;
        assert_eq!(body["download_state"], 1);
        let (status, _) = call(&state, Method::POST, "/state/sideways").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn task_controls_and_listing() {
        let state = state();
        let key = TaskKey::new(4, 2);
        state.relay.uploads().register(key, "a.mp4", 10, 0);
        state.relay.uploads().update(key, 5, 10, Some(5), "");
        state.relay.uploads().set_state(key, TaskState::Uploading);

        let (status, body) = call(&state, Method::POST, "/tasks/4/2/pause").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["state"], "paused");

        let (_, body) = call(&state, Method::GET, "/tasks/active").await;
        assert_eq!(body[0]["control"], "paused");
        assert_eq!(body[0]["transferred_bytes"], 5);
        assert_eq!(body[0]["key"]["group_id"], 4);

        let (status, _) = call(&state, Method::DELETE, "/tasks/4/2").await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _) = call(&state, Method::DELETE, "/tasks/4/2").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn completed_listing_and_clear() {
        let state = state();
        state.relay.verify_and_record(TaskKey::new(1, 1), "x.mp4", 64, 3).unwrap();

        let (_, body) = call(&state, Method::GET, "/tasks/completed").await;
        assert_eq!(body[0]["group_id"], 1);
        assert_eq!(body[0]["total_bytes"], 64);
        assert_eq!(body[0]["transferred_bytes"], 64);

        let (_, body) = call(&state, Method::DELETE, "/history").await;
        assert_eq!(body["removed"], 1);
    }
}
