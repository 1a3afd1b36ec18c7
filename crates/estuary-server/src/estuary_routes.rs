//! `/v1/estuary/...` handlers (spec §4.7/§6): subscribe/unsubscribe a
//! source stream to an estuary's sink stream, and get/touch/delete the
//! estuary's own lifecycle.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use estuary_engine::CreateRequest;
use estuary_types::{ApiError, ErrorCode, StreamPath};
use serde::{Deserialize, Serialize};

use crate::error::ApiErrorResponse;
use crate::state::AppState;

/// Estuaries with no explicit TTL on subscribe get this lifetime.
const DEFAULT_ESTUARY_TTL_SECONDS: u64 = 300;

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn path_of(project: &str, stream: &str) -> Result<StreamPath, ApiError> {
    StreamPath::parse(&format!("{project}/{stream}"))
        .map_err(|e| ApiError::new(ErrorCode::MissingProjectOrStreamId, e.to_string()))
}

fn estuary_not_found(project: &str, estuary_id: &str) -> ApiError {
    ApiError::new(
        ErrorCode::StreamNotFound,
        format!("no estuary {estuary_id} in project {project}"),
    )
}

#[derive(Debug, Deserialize)]
pub struct SubscribeBody {
    #[serde(rename = "estuaryId")]
    pub estuary_id: String,
}

#[derive(Debug, Serialize)]
struct SubscribeResponse {
    #[serde(rename = "estuaryId")]
    estuary_id: String,
    #[serde(rename = "streamId")]
    stream_id: String,
    #[serde(rename = "estuaryStreamPath")]
    estuary_stream_path: String,
    #[serde(rename = "expiresAt")]
    expires_at: i64,
    #[serde(rename = "isNewEstuary")]
    is_new_estuary: bool,
}

#[derive(Debug, Serialize)]
struct SuccessResponse {
    success: bool,
}

pub async fn subscribe(
    State(state): State<AppState>,
    Path((project, stream)): Path<(String, String)>,
    Json(body): Json<SubscribeBody>,
) -> Response {
    match subscribe_inner(state, project, stream, body).await {
        Ok(resp) => resp,
        Err(e) => ApiErrorResponse(e).into_response(),
    }
}

async fn subscribe_inner(
    state: AppState,
    project: String,
    stream: String,
    body: SubscribeBody,
) -> Result<Response, ApiError> {
    let source = path_of(&project, &stream)?;
    let source_handle = state.engine.handle_for(&source)?;
    let source_head = source_handle.head().await?;

    let sink = StreamPath::sink(&project, &body.estuary_id)
        .map_err(|e| ApiError::new(ErrorCode::MissingProjectOrStreamId, e.to_string()))?;
    let sink_handle = state.engine.handle_for(&sink)?;

    let is_new_estuary = sink_handle.head().await.is_err();
    sink_handle
        .create(CreateRequest {
            content_type: Some(source_head.content_type.clone()),
            ttl_seconds: None,
            expires_at: None,
            close: false,
            public: true,
            initial_data: None,
            producer: None,
        })
        .await?;

    let now = now_ms();
    state.subscribers.add_subscriber(&source, &body.estuary_id, now).await;
    state
        .estuary_index
        .add_subscription(&project, &body.estuary_id, &source, now)
        .await;
    let expires_at = state
        .lifecycle
        .touch(&project, &body.estuary_id, now, DEFAULT_ESTUARY_TTL_SECONDS);

    Ok(Json(SubscribeResponse {
        estuary_id: body.estuary_id,
        stream_id: source.to_string(),
        estuary_stream_path: sink.to_string(),
        expires_at,
        is_new_estuary,
    })
    .into_response())
}

pub async fn unsubscribe(
    State(state): State<AppState>,
    Path((project, stream)): Path<(String, String)>,
    Json(body): Json<SubscribeBody>,
) -> Response {
    match unsubscribe_inner(state, project, stream, body).await {
        Ok(resp) => resp,
        Err(e) => ApiErrorResponse(e).into_response(),
    }
}

async fn unsubscribe_inner(
    state: AppState,
    project: String,
    stream: String,
    body: SubscribeBody,
) -> Result<Response, ApiError> {
    let source = path_of(&project, &stream)?;
    state.subscribers.remove_subscriber(&source, &body.estuary_id).await;
    state
        .estuary_index
        .remove_subscription(&project, &body.estuary_id, &source)
        .await;
    Ok(Json(SuccessResponse { success: true }).into_response())
}

#[derive(Debug, Serialize)]
struct EstuaryInfo {
    #[serde(rename = "estuaryId")]
    estuary_id: String,
    sources: Vec<String>,
    #[serde(rename = "expiresAt")]
    expires_at: Option<i64>,
}

pub async fn get(
    State(state): State<AppState>,
    Path((project, estuary_id)): Path<(String, String)>,
) -> Response {
    match get_inner(state, project, estuary_id).await {
        Ok(resp) => resp,
        Err(e) => ApiErrorResponse(e).into_response(),
    }
}

async fn get_inner(state: AppState, project: String, estuary_id: String) -> Result<Response, ApiError> {
    let expires_at = state.lifecycle.expires_at(&project, &estuary_id);
    if expires_at.is_none() {
        return Err(estuary_not_found(&project, &estuary_id));
    }
    let sources = state
        .estuary_index
        .list(&project, &estuary_id)
        .await
        .into_iter()
        .map(|p| p.to_string())
        .collect();

    Ok(Json(EstuaryInfo {
        estuary_id,
        sources,
        expires_at,
    })
    .into_response())
}

pub async fn touch(
    State(state): State<AppState>,
    Path((project, estuary_id)): Path<(String, String)>,
) -> Response {
    match touch_inner(state, project, estuary_id).await {
        Ok(resp) => resp,
        Err(e) => ApiErrorResponse(e).into_response(),
    }
}

async fn touch_inner(state: AppState, project: String, estuary_id: String) -> Result<Response, ApiError> {
    if state.lifecycle.expires_at(&project, &estuary_id).is_none() {
        return Err(estuary_not_found(&project, &estuary_id));
    }
    let expires_at = state
        .lifecycle
        .touch(&project, &estuary_id, now_ms(), DEFAULT_ESTUARY_TTL_SECONDS);
    Ok(Json(EstuaryInfo {
        sources: state
            .estuary_index
            .list(&project, &estuary_id)
            .await
            .into_iter()
            .map(|p| p.to_string())
            .collect(),
        estuary_id,
        expires_at: Some(expires_at),
    })
    .into_response())
}

pub async fn delete(
    State(state): State<AppState>,
    Path((project, estuary_id)): Path<(String, String)>,
) -> Response {
    if state.lifecycle.expires_at(&project, &estuary_id).is_none() {
        return ApiErrorResponse(estuary_not_found(&project, &estuary_id)).into_response();
    }
    state.lifecycle.expire_one(&project, &estuary_id).await;
    StatusCode::NO_CONTENT.into_response()
}
