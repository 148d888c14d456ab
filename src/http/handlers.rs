//! HTTP error mapping and service endpoints

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};

use crate::error::LiveError;

/// HTTP error type
#[derive(Debug)]
pub enum HttpError {
    NotFound(String),
    BadRequest(String),
    Unavailable(String),
    InternalError(String),
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            HttpError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            HttpError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            HttpError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
            HttpError::InternalError(msg) => {
                tracing::error!("Request failed: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };

        (status, body).into_response()
    }
}

impl From<LiveError> for HttpError {
    fn from(err: LiveError) -> Self {
        match err {
            LiveError::StreamNotFound(_) | LiveError::OverlayNotFound(_) => {
                HttpError::NotFound(err.to_string())
            }
            LiveError::InvalidSource(_)
            | LiveError::InvalidGeometry(_)
            | LiveError::InvalidOverlay(_) => HttpError::BadRequest(err.to_string()),
            LiveError::TooManyStreams(_) | LiveError::ProcessNotReaped(_) => {
                HttpError::Unavailable(err.to_string())
            }
            _ => HttpError::InternalError(err.to_string()),
        }
    }
}

/// Health check endpoint
pub async fn health_check() -> &'static str {
    "OK"
}

/// Version endpoint
pub async fn version_check() -> &'static str {
    concat!("hls-live-server v", env!("CARGO_PKG_VERSION"))
}
