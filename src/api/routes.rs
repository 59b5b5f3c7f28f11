//! API route definitions.

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use super::state::AppState;
use crate::config;
use crate::executor::ExecutorError;

pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/config", get(get_config).post(save_config))
        .route("/start", post(start))
        .route("/stop", post(stop))
        .route("/status", get(status))
        .route("/history", get(history))
}

pub fn index_routes() -> Router<AppState> {
    Router::new().route("/", get(index))
}

fn failure(code: StatusCode, error: impl std::fmt::Display) -> Response {
    (
        code,
        Json(json!({ "success": false, "error": error.to_string() })),
    )
        .into_response()
}

async fn index(State(state): State<AppState>) -> Response {
    let path = state.settings.server.frontend_dir.join("index.html");
    match tokio::fs::read_to_string(&path).await {
        Ok(page) => Html(page).into_response(),
        Err(_) => Json(json!({
            "message": format!("frontend not found; create {}", path.display())
        }))
        .into_response(),
    }
}

async fn health() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

async fn get_config(State(state): State<AppState>) -> Response {
    match config::load_base(state.executor.materializer().base_config()).await {
        Ok(config) => Json(json!({ "success": true, "config": config })).into_response(),
        Err(e) => failure(StatusCode::NOT_FOUND, e),
    }
}

async fn save_config(State(state): State<AppState>, body: Bytes) -> Response {
    let update = match parse_body(&body) {
        Ok(update) => update,
        Err(resp) => return resp,
    };
    let path = state.executor.materializer().base_config();
    match config::save_base(path, &update).await {
        Ok(_) => Json(json!({ "success": true, "message": "configuration saved" })).into_response(),
        Err(e) => failure(StatusCode::INTERNAL_SERVER_ERROR, format!("{:#}", e)),
    }
}

async fn start(State(state): State<AppState>, body: Bytes) -> Response {
    let mut overlay = match parse_body(&body) {
        Ok(overlay) => overlay,
        Err(resp) => return resp,
    };
    normalize_start_request(&mut overlay);

    match state.executor.start(overlay).await {
        Ok(execution_id) => Json(json!({
            "success": true,
            "execution_id": execution_id,
            "message": "job started",
        }))
        .into_response(),
        Err(e) => {
            warn!(error = %e, "start request failed");
            let code = match &e {
                ExecutorError::AlreadyRunning { .. } => StatusCode::CONFLICT,
                ExecutorError::WorkerUnavailable { .. } | ExecutorError::Spawn { .. } => {
                    StatusCode::SERVICE_UNAVAILABLE
                }
                ExecutorError::ConfigUnavailable(_) | ExecutorError::Materialize(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            };
            (
                code,
                Json(json!({ "success": false, "code": e.code(), "error": e.to_string() })),
            )
                .into_response()
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct StopParams {
    #[serde(default)]
    force: bool,
}

async fn stop(State(state): State<AppState>, Query(params): Query<StopParams>) -> Response {
    if state.executor.stop(params.force).await {
        Json(json!({ "success": true, "message": "job stopped" })).into_response()
    } else {
        failure(StatusCode::CONFLICT, "no running job to stop")
    }
}

async fn status(State(state): State<AppState>) -> Json<Value> {
    let status = state.executor.status().await;
    Json(json!({ "success": true, "status": status }))
}

#[derive(Debug, Default, Deserialize)]
struct HistoryParams {
    limit: Option<usize>,
}

async fn history(State(state): State<AppState>, Query(params): Query<HistoryParams>) -> Json<Value> {
    let limit = params
        .limit
        .unwrap_or_else(|| state.executor.default_history_limit());
    let history = state.executor.history(limit).await;
    Json(json!({ "success": true, "history": history }))
}

/// Empty bodies count as `{}`.
fn parse_body(body: &Bytes) -> Result<Value, Response> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Object(Default::default()));
    }
    serde_json::from_slice(body)
        .map_err(|e| failure(StatusCode::BAD_REQUEST, format!("invalid JSON body: {}", e)))
}

/// Older frontends send the pre-change status filter as
/// `search_settings.change_status`; carry it over to `search_status`.
fn normalize_start_request(overlay: &mut Value) {
    let Some(search) = overlay
        .get_mut("search_settings")
        .and_then(Value::as_object_mut)
    else {
        return;
    };
    if search.contains_key("search_status") {
        return;
    }
    if let Some(legacy) = search.get("change_status").cloned() {
        info!("mapping legacy change_status onto search_status");
        search.insert("search_status".to_string(), legacy);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
