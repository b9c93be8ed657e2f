use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        Json,
    },
};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use tracing::info;

use peer_core::types::{PatchRequest, PatchStatus};

use crate::AppState;

// ── Error helper ──────────────────────────────────────────────────────────

pub(crate) fn internal(e: impl std::fmt::Display) -> StatusCode {
    tracing::error!("internal error: {e}");
    StatusCode::INTERNAL_SERVER_ERROR
}

// ── Request types ─────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub(crate) struct RunsQuery {
    pub repo: String,
    pub pr: Option<i64>,
}

#[derive(Deserialize)]
pub(crate) struct CreatePatchBody {
    #[serde(rename = "findingIds")]
    pub finding_ids: Vec<String>,
    #[serde(rename = "userId")]
    pub user_id: Option<String>,
}

// ── Health / status ───────────────────────────────────────────────────────

pub(crate) async fn health(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "uptime_s": state.start_time.elapsed().as_secs(),
    }))
}

// ── Runs ──────────────────────────────────────────────────────────────────

pub(crate) async fn get_run(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, StatusCode> {
    let run = state
        .db
        .get_run(&id)
        .map_err(internal)?
        .ok_or(StatusCode::NOT_FOUND)?;
    Ok(Json(serde_json::to_value(run).map_err(internal)?))
}

pub(crate) async fn list_runs(
    State(state): State<Arc<AppState>>,
    Query(query): Query<RunsQuery>,
) -> Result<Json<Value>, StatusCode> {
    let runs = state
        .db
        .list_runs(&query.repo, query.pr)
        .map_err(internal)?;
    Ok(Json(serde_json::to_value(runs).map_err(internal)?))
}

// ── Patches ───────────────────────────────────────────────────────────────

pub(crate) async fn get_patch(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, StatusCode> {
    let patch = state
        .db
        .get_patch(&id)
        .map_err(internal)?
        .ok_or(StatusCode::NOT_FOUND)?;
    Ok(Json(serde_json::to_value(patch).map_err(internal)?))
}

/// One file of a patch preview, for incremental UI rendering while the
/// preview is still assembling.
pub(crate) async fn get_patch_file(
    State(state): State<Arc<AppState>>,
    Path((id, file)): Path<(String, String)>,
) -> Result<Json<Value>, StatusCode> {
    let patch = state
        .db
        .get_patch(&id)
        .map_err(internal)?
        .ok_or(StatusCode::NOT_FOUND)?;
    let entry = patch
        .preview
        .files
        .iter()
        .find(|f| f.file == file)
        .ok_or(StatusCode::NOT_FOUND)?;
    Ok(Json(serde_json::to_value(entry).map_err(internal)?))
}

/// Explicit selection flow (`review` mode): create a patch for a subset of a
/// run's findings and queue its per-file previews.
pub(crate) async fn create_patch(
    State(state): State<Arc<AppState>>,
    Path(run_id): Path<String>,
    Json(body): Json<CreatePatchBody>,
) -> Result<Json<Value>, StatusCode> {
    let run = state
        .db
        .get_run(&run_id)
        .map_err(internal)?
        .ok_or(StatusCode::NOT_FOUND)?;
    if body.finding_ids.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }
    let known: Vec<String> = run
        .findings
        .iter()
        .filter(|f| body.finding_ids.contains(&f.id))
        .map(|f| f.id.clone())
        .collect();
    if known.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }

    let mut patch = PatchRequest::new(&run, body.user_id.as_deref(), known.clone());
    let mut files: Vec<String> = Vec::new();
    for f in run.findings.iter().filter(|f| known.contains(&f.id)) {
        if !files.contains(&f.file) {
            files.push(f.file.clone());
        }
    }
    patch.preview.files = files
        .iter()
        .map(|f| peer_core::types::PreviewFile::pending(f))
        .collect();
    patch.preview.files_expected = files.len() as u32;

    state.db.insert_patch(&patch).map_err(internal)?;
    for file in &files {
        state
            .queues
            .put(
                "autofix",
                json!({ "patchRequestId": patch.id, "file": file }),
            )
            .await
            .map_err(internal)?;
    }
    info!(patch_id = %patch.id, files = files.len(), "patch created from selection");
    Ok(Json(json!({ "patchRequestId": patch.id, "filesExpected": files.len() })))
}

/// Explicit apply for a ready preview (`review` mode).
pub(crate) async fn apply_patch(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, StatusCode> {
    let patch = state
        .db
        .get_patch(&id)
        .map_err(internal)?
        .ok_or(StatusCode::NOT_FOUND)?;
    if patch.status != PatchStatus::PreviewReady {
        return Err(StatusCode::CONFLICT);
    }
    state
        .queues
        .put("apply", json!({ "patchRequestId": id }))
        .await
        .map_err(internal)?;
    Ok(Json(json!({ "status": "applying" })))
}

// ── Notifications ─────────────────────────────────────────────────────────

pub(crate) async fn list_notifications(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> Result<Json<Value>, StatusCode> {
    let notes = state
        .db
        .list_notifications(&user_id)
        .map_err(internal)?;
    Ok(Json(serde_json::to_value(notes).map_err(internal)?))
}

// ── SSE logs ──────────────────────────────────────────────────────────────

pub(crate) async fn sse_logs(
    State(state): State<Arc<AppState>>,
) -> Sse<impl tokio_stream::Stream<Item = Result<Event, std::convert::Infallible>>> {
    let backlog: Vec<String> = {
        let ring = state.log_ring.lock().unwrap_or_else(|e| e.into_inner());
        ring.iter().cloned().collect()
    };
    let live = BroadcastStream::new(state.log_tx.subscribe()).filter_map(|r| r.ok());
    let stream = tokio_stream::iter(backlog)
        .chain(live)
        .map(|line| Ok(Event::default().data(line)));
    Sse::new(stream).keep_alive(KeepAlive::default())
}
