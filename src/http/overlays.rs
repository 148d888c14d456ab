//! Overlay handlers
//!
//! Pass-through to the overlay registry. The stream id in the path is not
//! checked against the supervisor.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::handlers::HttpError;
use crate::overlay::{Geometry, Overlay, OverlayKind, OverlayPatch};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateOverlayRequest {
    pub kind: OverlayKind,
    pub content: String,
    pub geometry: Geometry,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct OverlayListResponse {
    pub count: usize,
    pub overlays: Vec<Overlay>,
}

/// POST /streams/{id}/overlays
pub async fn create_overlay(
    State(state): State<Arc<AppState>>,
    Path(stream_id): Path<String>,
    Json(request): Json<CreateOverlayRequest>,
) -> Result<Response, HttpError> {
    let overlay = state.overlays.create(
        &stream_id,
        request.kind,
        request.content,
        request.geometry,
    )?;
    Ok((StatusCode::CREATED, Json(overlay)).into_response())
}

/// GET /streams/{id}/overlays
pub async fn list_overlays(
    State(state): State<Arc<AppState>>,
    Path(stream_id): Path<String>,
) -> Json<OverlayListResponse> {
    let overlays = state.overlays.list_for_stream(&stream_id);
    Json(OverlayListResponse {
        count: overlays.len(),
        overlays,
    })
}

/// GET /overlays/{id}
pub async fn get_overlay(
    State(state): State<Arc<AppState>>,
    Path(overlay_id): Path<String>,
) -> Result<Json<Overlay>, HttpError> {
    Ok(Json(state.overlays.get(&overlay_id)?))
}

/// PATCH /overlays/{id}
pub async fn update_overlay(
    State(state): State<Arc<AppState>>,
    Path(overlay_id): Path<String>,
    Json(patch): Json<OverlayPatch>,
) -> Result<Json<Overlay>, HttpError> {
    Ok(Json(state.overlays.update(&overlay_id, patch)?))
}

/// DELETE /overlays/{id}
pub async fn delete_overlay(
    State(state): State<Arc<AppState>>,
    Path(overlay_id): Path<String>,
) -> Result<StatusCode, HttpError> {
    if state.overlays.delete(&overlay_id)? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(HttpError::NotFound(format!(
            "Overlay not found: {}",
            overlay_id
        )))
    }
}
