//! `/v1/stream/<project>/<stream>` handlers (spec §6).

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, HeaderName, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use estuary_edge::{CacheEligibility, CachedResponse, Lease, SharedResult};
use estuary_engine::{AppendRequest, CreateRequest, EngineHandle, ReadRequest};
use estuary_types::{resolve_offset, ApiError, ErrorCode, StreamPath};
use serde::Deserialize;
use tracing::warn;

use crate::error::ApiErrorResponse;
use crate::headers::{content_type, producer_headers, stream_closed, stream_expires_at, stream_ttl};
use crate::sse;
use crate::state::AppState;

#[derive(Debug, Deserialize, Default)]
pub struct ReadQuery {
    pub offset: Option<String>,
    pub live: Option<String>,
    pub cursor: Option<String>,
    pub rk: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct CreateQuery {
    #[serde(default)]
    pub public: bool,
}

fn path_of(project: &str, stream: &str) -> Result<StreamPath, ApiError> {
    StreamPath::parse(&format!("{project}/{stream}"))
        .map_err(|e| ApiError::new(ErrorCode::MissingProjectOrStreamId, e.to_string()))
}

pub async fn create(
    State(state): State<AppState>,
    Path((project, stream)): Path<(String, String)>,
    Query(query): Query<CreateQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    match create_inner(state, project, stream, query, headers, body).await {
        Ok(resp) => resp,
        Err(e) => ApiErrorResponse(e).into_response(),
    }
}

async fn create_inner(
    state: AppState,
    project: String,
    stream: String,
    query: CreateQuery,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let path = path_of(&project, &stream)?;
    let ttl_seconds = stream_ttl(&headers)?;
    let expires_at = stream_expires_at(&headers)?;
    if ttl_seconds.is_some() && expires_at.is_some() {
        return Err(ApiError::new(
            ErrorCode::StreamTtlMismatch,
            "Stream-TTL and Stream-Expires-At are mutually exclusive",
        ));
    }

    let req = CreateRequest {
        content_type: content_type(&headers),
        ttl_seconds,
        expires_at,
        close: stream_closed(&headers),
        public: query.public,
        initial_data: if body.is_empty() { None } else { Some(body.to_vec()) },
        producer: producer_headers(&headers)?,
    };

    let handle = state.engine.handle_for(&path)?;
    let outcome = handle.create(req).await?;

    let status = if outcome.created { StatusCode::CREATED } else { StatusCode::OK };
    let mut response = (status, ()).into_response();
    let headers_mut = response.headers_mut();
    headers_mut.insert(
        "Stream-Next-Offset",
        outcome.next_offset.encode().parse().unwrap(),
    );
    if outcome.closed {
        headers_mut.insert("Stream-Closed", "true".parse().unwrap());
    }
    if let Some(key) = outcome.reader_key {
        if let Ok(v) = key.parse() {
            headers_mut.insert("Stream-Reader-Key", v);
        }
    }
    *response.status_mut() = status;
    Ok(response)
}

pub async fn append(
    State(state): State<AppState>,
    Path((project, stream)): Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    match append_inner(state, project, stream, headers, body).await {
        Ok(resp) => resp,
        Err(e) => ApiErrorResponse(e).into_response(),
    }
}

async fn append_inner(
    state: AppState,
    project: String,
    stream: String,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let path = path_of(&project, &stream)?;
    if body.is_empty() {
        return Err(ApiError::new(ErrorCode::EmptyBody, "append body must not be empty"));
    }

    let req = AppendRequest {
        payload: body.to_vec(),
        content_type: content_type(&headers).unwrap_or_else(|| estuary_types::DEFAULT_CONTENT_TYPE.to_string()),
        producer: producer_headers(&headers)?,
        close: stream_closed(&headers),
    };

    // Route through the fan-out engine rather than the bare handle: it does
    // the durable append itself (spec §4.7 step 1) and then replicates to
    // every subscriber, which a direct `handle.append` would skip entirely.
    let result = state.fanout.publish(&path, req).await?;
    let outcome = result.outcome;

    state.edge_cache.invalidate(&path.to_string());

    let mut response = (StatusCode::OK, ()).into_response();
    let headers_mut = response.headers_mut();
    headers_mut.insert(
        "Stream-Next-Offset",
        outcome.next_offset.encode().parse().unwrap(),
    );
    headers_mut.insert(
        "Stream-Seq",
        outcome.accepted_offset.stream_seq.to_string().parse().unwrap(),
    );
    if outcome.duplicate {
        if let Some(seq) = outcome.producer_received_seq {
            headers_mut.insert("Producer-Received-Seq", seq.to_string().parse().unwrap());
        }
    }
    if outcome.stream_closed {
        headers_mut.insert("Stream-Closed", "true".parse().unwrap());
    }
    Ok(response)
}

pub async fn head(
    State(state): State<AppState>,
    Path((project, stream)): Path<(String, String)>,
) -> Response {
    match head_inner(state, project, stream).await {
        Ok(resp) => resp,
        Err(e) => ApiErrorResponse(e).into_response(),
    }
}

async fn head_inner(state: AppState, project: String, stream: String) -> Result<Response, ApiError> {
    let path = path_of(&project, &stream)?;
    let handle = state.engine.handle_for(&path)?;
    let outcome = handle.head().await?;

    let mut response = (StatusCode::OK, ()).into_response();
    let headers_mut = response.headers_mut();
    headers_mut.insert(header::CONTENT_TYPE, outcome.content_type.parse().unwrap());
    headers_mut.insert("Stream-Next-Offset", outcome.tail.encode().parse().unwrap());
    if outcome.closed {
        headers_mut.insert("Stream-Closed", "true".parse().unwrap());
    }
    if let Some(expires_at) = outcome.expires_at {
        headers_mut.insert("Stream-Expires-At", expires_at.to_string().parse().unwrap());
    }
    if let Some(key) = outcome.reader_key {
        if let Ok(v) = key.parse() {
            headers_mut.insert("Stream-Reader-Key", v);
        }
    }
    Ok(response)
}

pub async fn delete(
    State(state): State<AppState>,
    Path((project, stream)): Path<(String, String)>,
) -> Response {
    match delete_inner(state, project, stream).await {
        Ok(resp) => resp,
        Err(e) => ApiErrorResponse(e).into_response(),
    }
}

async fn delete_inner(state: AppState, project: String, stream: String) -> Result<Response, ApiError> {
    let path = path_of(&project, &stream)?;
    let handle = state.engine.handle_for(&path)?;
    handle.delete().await?;
    state.engine.forget(&path);
    state.edge_cache.invalidate(&path.to_string());
    Ok(StatusCode::NO_CONTENT.into_response())
}

pub async fn read(
    State(state): State<AppState>,
    Path((project, stream)): Path<(String, String)>,
    Query(query): Query<ReadQuery>,
    headers: HeaderMap,
) -> Response {
    match read_inner(state, project, stream, query, headers).await {
        Ok(resp) => resp,
        Err(e) => ApiErrorResponse(e).into_response(),
    }
}

async fn read_inner(
    state: AppState,
    project: String,
    stream: String,
    query: ReadQuery,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let path = path_of(&project, &stream)?;
    let handle = state.engine.handle_for(&path)?;
    let head_outcome = handle.head().await?;

    let offset = resolve_offset(query.offset.as_deref(), head_outcome.tail)
        .map_err(|e| ApiError::new(ErrorCode::InvalidOffset, e.to_string()))?;

    match query.live.as_deref() {
        Some("sse") => return Ok(sse::serve(state, path, offset).await.into_response()),
        Some("ws-internal") => {
            warn!(path = %path, "ws-internal upgrade requested over the plain read route");
            return Err(ApiError::new(
                ErrorCode::WebsocketUpgradeRequired,
                "ws-internal requires a WebSocket upgrade",
            ));
        }
        _ => {}
    }

    let long_poll = query.live.as_deref() == Some("long-poll");
    let coalesce_url = format!(
        "{path}?offset={}&live={}",
        offset.encode(),
        if long_poll { "long-poll" } else { "read" }
    );

    // Concurrent identical cache-miss reads coalesce onto a single engine
    // round trip (spec §4.8 "In-flight coalescing"); the leader fetches and
    // every follower just waits on the broadcast and applies its own
    // conditional-GET handling below.
    let shared: SharedResult = match state.coalescer.acquire(&coalesce_url) {
        Some(Lease::Leader) => {
            let result = fetch_read(&state, &handle, &path, &query, offset, long_poll, &head_outcome)
                .await
                .map(Arc::new)
                .map_err(|e| encode_error(&e));
            let was_cached = long_poll && cache_eligibility(&query, &head_outcome).allows_caching();
            state.coalescer.resolve(&coalesce_url, result.clone(), was_cached);
            if was_cached {
                state.coalescer.evict_after_linger(coalesce_url.clone());
            }
            result
        }
        Some(Lease::Follower(mut rx)) => match rx.recv().await {
            Ok(shared) => shared,
            Err(_) => fetch_read(&state, &handle, &path, &query, offset, long_poll, &head_outcome)
                .await
                .map(Arc::new)
                .map_err(|e| encode_error(&e)),
        },
        None => fetch_read(&state, &handle, &path, &query, offset, long_poll, &head_outcome)
            .await
            .map(Arc::new)
            .map_err(|e| encode_error(&e)),
    };

    let cached = shared.map_err(|e| decode_error(&e))?;

    if let Some(if_none_match) = headers.get(header::IF_NONE_MATCH).and_then(|v| v.to_str().ok()) {
        if estuary_edge::etag_matches(Some(if_none_match), &cached.etag) {
            let mut response = StatusCode::NOT_MODIFIED.into_response();
            response.headers_mut().insert(header::ETAG, cached.etag.parse().unwrap());
            return Ok(response);
        }
    }

    let status = StatusCode::from_u16(cached.status).unwrap_or(StatusCode::OK);
    let mut response = (status, cached.body.clone()).into_response();
    let headers_mut = response.headers_mut();
    for (name, value) in &cached.headers {
        if let (Ok(name), Ok(value)) = (name.parse::<HeaderName>(), value.parse()) {
            headers_mut.insert(name, value);
        }
    }
    Ok(response)
}

fn cache_eligibility(query: &ReadQuery, head_outcome: &estuary_engine::HeadOutcome) -> CacheEligibility {
    let keyless_private =
        !head_outcome.public && query.rk.as_deref() != head_outcome.reader_key.as_deref();
    CacheEligibility {
        is_uncacheable_tail_read: false,
        is_keyless_private_url: keyless_private,
    }
}

/// The actual engine round trip + response framing for a read, shared by
/// every request coalesced onto the same URL.
async fn fetch_read(
    state: &AppState,
    handle: &EngineHandle,
    path: &StreamPath,
    query: &ReadQuery,
    offset: estuary_types::Offset,
    long_poll: bool,
    head_outcome: &estuary_engine::HeadOutcome,
) -> Result<CachedResponse, ApiError> {
    let client_cursor = query.cursor.as_deref().and_then(estuary_types::parse_cursor);
    let read_req = ReadRequest {
        offset,
        byte_cap: 1 << 20,
        client_cursor,
    };

    let read_outcome = if long_poll {
        handle
            .read_long_poll(read_req, state.options.long_poll_default_ms)
            .await?
    } else {
        handle.read(read_req).await?
    };

    let body = estuary_engine::format_messages(&read_outcome.content_type, &read_outcome.messages);
    let etag = format!(
        "\"{}:{}\"",
        offset.encode(),
        read_outcome.next_offset.encode()
    );

    let mut resp_headers = vec![
        (header::CONTENT_TYPE.to_string(), read_outcome.content_type.clone()),
        (header::ETAG.to_string(), etag.clone()),
        ("Stream-Next-Offset".to_string(), read_outcome.next_offset.encode()),
        ("Stream-Up-To-Date".to_string(), read_outcome.up_to_date.to_string()),
        ("Stream-Cursor".to_string(), read_outcome.cursor.clone()),
    ];
    if read_outcome.stream_closed {
        resp_headers.push(("Stream-Closed".to_string(), "true".to_string()));
    }

    let cached = CachedResponse {
        status: 200,
        headers: resp_headers,
        body: bytes::Bytes::from(body),
        etag,
    };

    if long_poll {
        let eligibility = cache_eligibility(query, head_outcome);
        let ttl = Duration::from_secs(30);
        state.edge_cache.put(
            &format!("{path}?offset={}&live=long-poll", offset.encode()),
            cached.clone(),
            ttl,
            eligibility,
        );
    }
    // Plain at-tail GETs are never cached (spec §4.8): this branch simply
    // never calls `edge_cache.put`.

    Ok(cached)
}

/// Compact wire form for sharing an `ApiError` across the coalescer's
/// `Result<_, String>` channel, since followers only ever see the leader's
/// encoded result.
fn encode_error(e: &ApiError) -> String {
    serde_json::json!({
        "status": e.status,
        "code": e.code,
        "message": e.message,
    })
    .to_string()
}

fn decode_error(s: &str) -> ApiError {
    let Ok(value) = serde_json::from_str::<serde_json::Value>(s) else {
        return ApiError::new(ErrorCode::InternalError, s.to_string());
    };
    let status = value.get("status").and_then(|v| v.as_u64()).unwrap_or(500) as u16;
    let code: ErrorCode = value
        .get("code")
        .and_then(|v| serde_json::from_value(v.clone()).ok())
        .unwrap_or(ErrorCode::InternalError);
    let message = value
        .get("message")
        .and_then(|v| v.as_str())
        .unwrap_or("coalesced request failed")
        .to_string();
    ApiError::new(code, message).with_status(status)
}

