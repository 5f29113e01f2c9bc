//! HTTP error response conversion
//!
//! The two removal endpoints report failures in different JSON shapes, so
//! each gets its own wrapper around `ClearCutError`. Both map client errors
//! to 400 with their message and everything else to an opaque 500.

use crate::error::ClearCutError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// Message returned for every server-side failure
pub const OPAQUE_FAILURE: &str = "Failed to process image";

/// `{"detail": ...}` body used by the download endpoint and fallbacks
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub detail: String,
}

/// `{"success": false, "error": ...}` body used by the preview endpoint
#[derive(Debug, Serialize)]
pub struct PreviewErrorResponse {
    pub success: bool,
    pub error: String,
}

/// Error of the download endpoint
#[derive(Debug)]
pub struct HttpError(pub ClearCutError);

/// Error of the preview endpoint
#[derive(Debug)]
pub struct PreviewError(pub ClearCutError);

impl From<ClearCutError> for HttpError {
    fn from(err: ClearCutError) -> Self {
        HttpError(err)
    }
}

impl From<ClearCutError> for PreviewError {
    fn from(err: ClearCutError) -> Self {
        PreviewError(err)
    }
}

/// Log the error and pick the status and client-facing message
fn classify(error: &ClearCutError) -> (StatusCode, String) {
    if error.is_client_error() {
        tracing::warn!(error = %error, "Rejected request");
        (StatusCode::BAD_REQUEST, error.to_string())
    } else {
        tracing::error!(error = %error, "Processing error");
        (StatusCode::INTERNAL_SERVER_ERROR, OPAQUE_FAILURE.to_string())
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let (status, detail) = classify(&self.0);
        (status, Json(ErrorResponse { detail })).into_response()
    }
}

impl IntoResponse for PreviewError {
    fn into_response(self) -> Response {
        let (status, error) = classify(&self.0);
        (
            status,
            Json(PreviewErrorResponse {
                success: false,
                error,
            }),
        )
            .into_response()
    }
}
