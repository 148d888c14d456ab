//! Stream management handlers
//!
//! Handles stream creation, listing, renaming, stop, restart and deletion.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::handlers::HttpError;
use crate::state::AppState;
use crate::supervisor::{output_location_for, Stream, StreamState};

/// Request to create a new stream
#[derive(Debug, Deserialize)]
pub struct CreateStreamRequest {
    /// Live source, e.g. `rtsp://camera/feed`
    pub source_uri: String,
    /// Optional label (defaults to the source URI)
    pub display_name: Option<String>,
}

/// Response after creating a stream
#[derive(Debug, Serialize, Deserialize)]
pub struct CreateStreamResponse {
    pub stream_id: String,
    /// Where the playlist will be served once the stream runs
    pub output_location: String,
    pub state: StreamState,
}

/// List of streams
#[derive(Debug, Serialize, Deserialize)]
pub struct StreamListResponse {
    /// Total number of streams, before paging
    pub count: usize,
    pub streams: Vec<Stream>,
}

/// Query parameters for stream listing
#[derive(Debug, Deserialize)]
pub struct StreamListQuery {
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateStreamRequest {
    pub display_name: String,
}

/// Query parameters for stream deletion
#[derive(Debug, Default, Deserialize)]
pub struct DeleteStreamQuery {
    /// Remove the segment directory too
    #[serde(default)]
    pub purge: bool,
    /// Remove the stream's overlays too
    #[serde(default)]
    pub cascade: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StopStreamResponse {
    pub stopped: bool,
}

/// Create a new stream
/// POST /streams
pub async fn create_stream(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreateStreamRequest>,
) -> Result<Response, HttpError> {
    let stream = state
        .supervisor
        .create_stream(&request.source_uri, request.display_name)
        .await?;

    let response = CreateStreamResponse {
        output_location: output_location_for(&stream.id),
        stream_id: stream.id,
        state: stream.state,
    };
    Ok((StatusCode::CREATED, Json(response)).into_response())
}

/// List streams in creation order
/// GET /streams
pub async fn list_streams(
    State(state): State<Arc<AppState>>,
    Query(query): Query<StreamListQuery>,
) -> Json<StreamListResponse> {
    let all = state.supervisor.list_streams();
    let count = all.len();
    let streams = all
        .into_iter()
        .skip(query.offset.unwrap_or(0))
        .take(query.limit.unwrap_or(usize::MAX))
        .collect();

    Json(StreamListResponse { count, streams })
}

/// GET /streams/{id}
pub async fn get_stream(
    State(state): State<Arc<AppState>>,
    Path(stream_id): Path<String>,
) -> Result<Json<Stream>, HttpError> {
    Ok(Json(state.supervisor.get_stream(&stream_id)?))
}

/// Rename a stream
/// PATCH /streams/{id}
pub async fn update_stream(
    State(state): State<Arc<AppState>>,
    Path(stream_id): Path<String>,
    Json(request): Json<UpdateStreamRequest>,
) -> Result<Json<Stream>, HttpError> {
    let stream = state
        .supervisor
        .rename_stream(&stream_id, request.display_name)
        .await?;
    Ok(Json(stream))
}

/// Stop the transcoder. Stopping a finished or unknown stream is not an
/// error, it just reports `stopped: false`.
/// POST /streams/{id}/stop
pub async fn stop_stream(
    State(state): State<Arc<AppState>>,
    Path(stream_id): Path<String>,
) -> Json<StopStreamResponse> {
    let stopped = state.supervisor.stop_stream(&stream_id).await;
    Json(StopStreamResponse { stopped })
}

/// POST /streams/{id}/restart
pub async fn restart_stream(
    State(state): State<Arc<AppState>>,
    Path(stream_id): Path<String>,
) -> Result<Json<Stream>, HttpError> {
    Ok(Json(state.supervisor.restart_stream(&stream_id).await?))
}

/// Delete a stream, stopping it first
/// DELETE /streams/{id}?purge=true&cascade=true
pub async fn delete_stream(
    State(state): State<Arc<AppState>>,
    Path(stream_id): Path<String>,
    Query(query): Query<DeleteStreamQuery>,
) -> Result<StatusCode, HttpError> {
    state
        .supervisor
        .delete_stream(&stream_id, query.purge)
        .await?;

    if query.cascade {
        let removed = state.overlays.delete_for_stream(&stream_id)?;
        tracing::debug!("Removed {} overlay(s) of stream {}", removed, stream_id);
    }

    Ok(StatusCode::NO_CONTENT)
}
