//! Route handlers

use super::{
    error::{ErrorResponse, HttpError, PreviewError},
    AppState,
};
use crate::{
    acquisition::{acquire, UploadedFile},
    error::{ClearCutError, Result},
    engine::ModelStatus,
    types::{ProcessingResult, SourceImage},
};
use axum::{
    extract::{multipart::MultipartRejection, Multipart, State},
    http::{header, HeaderName, StatusCode},
    response::{Html, IntoResponse, Response},
    Json,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, info_span, Instrument};
use uuid::Uuid;

/// Bounding box of the preview thumbnail
const PREVIEW_MAX_WIDTH: u32 = 800;
const PREVIEW_MAX_HEIGHT: u32 = 600;

const SERVICE_NAME: &str = "ClearCut";
const PRIVACY_NOTICE: &str = "No data stored - processed in memory only";
const X_PROCESSING_TIME: HeaderName = HeaderName::from_static("x-processing-time");

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
    pub model: ModelStatus,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub service: &'static str,
    pub version: &'static str,
    pub model: String,
    pub max_file_size: usize,
    pub supported_formats: Vec<String>,
    pub privacy: &'static str,
    /// Human readable, e.g. `2h 5m 12s`
    pub uptime: String,
    pub uptime_seconds: i64,
}

#[derive(Debug, Serialize)]
pub struct PreviewResponse {
    pub success: bool,
    /// PNG data URI
    pub preview: String,
    /// Seconds spent in the engine
    pub processing_time: f64,
    pub original_size: usize,
    pub result_size: usize,
}

pub async fn index() -> Html<&'static str> {
    Html(include_str!("index.html"))
}

pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        service: SERVICE_NAME,
        model: state.engine.model_info(),
    })
}

pub async fn stats(State(state): State<Arc<AppState>>) -> Json<StatsResponse> {
    let uptime_seconds = (Utc::now() - state.started_at).num_seconds().max(0);
    Json(StatsResponse {
        service: SERVICE_NAME,
        version: env!("CARGO_PKG_VERSION"),
        model: state.engine.config().model_spec.name.clone(),
        max_file_size: state.config.max_file_size,
        supported_formats: state.config.allowed_extensions.clone(),
        privacy: PRIVACY_NOTICE,
        uptime: format_uptime(uptime_seconds),
        uptime_seconds,
    })
}

pub async fn not_found() -> (StatusCode, Json<ErrorResponse>) {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorResponse {
            detail: "Not Found".to_string(),
        }),
    )
}

/// `POST /remove-bg`: full-size transparent PNG as an attachment
pub async fn remove_background(
    State(state): State<Arc<AppState>>,
    multipart: std::result::Result<Multipart, MultipartRejection>,
) -> std::result::Result<Response, HttpError> {
    let span = info_span!("remove_bg", request_id = %Uuid::new_v4());
    async move {
        let (source, result) = process_request(&state, multipart).await?;
        let processing_time = result.processing_seconds();
        let png = encode_blocking(result, None).await?;

        Ok((
            [
                (header::CONTENT_TYPE, "image/png".to_string()),
                (
                    header::CONTENT_DISPOSITION,
                    format!(
                        "attachment; filename=clearcut_{}.png",
                        header_safe(source.stem())
                    ),
                ),
                (X_PROCESSING_TIME, processing_time.to_string()),
                (
                    header::CACHE_CONTROL,
                    "no-cache, no-store, must-revalidate".to_string(),
                ),
            ],
            png,
        )
            .into_response())
    }
    .instrument(span)
    .await
}

/// `POST /remove-bg-preview`: thumbnail as a data URI plus timing and sizes
pub async fn remove_background_preview(
    State(state): State<Arc<AppState>>,
    multipart: std::result::Result<Multipart, MultipartRejection>,
) -> std::result::Result<Json<PreviewResponse>, PreviewError> {
    let span = info_span!("remove_bg_preview", request_id = %Uuid::new_v4());
    async move {
        let (source, result) = process_request(&state, multipart).await?;
        let processing_time = result.processing_seconds();
        let png = encode_blocking(result, Some((PREVIEW_MAX_WIDTH, PREVIEW_MAX_HEIGHT))).await?;

        Ok(Json(PreviewResponse {
            success: true,
            preview: format!("data:image/png;base64,{}", STANDARD.encode(&png)),
            processing_time,
            original_size: source.len(),
            result_size: png.len(),
        }))
    }
    .instrument(span)
    .await
}

/// Shared front half of both removal endpoints
async fn process_request(
    state: &AppState,
    multipart: std::result::Result<Multipart, MultipartRejection>,
) -> Result<(SourceImage, ProcessingResult)> {
    let (file, url) = match multipart {
        Ok(multipart) => read_form(multipart).await?,
        Err(rejection) => {
            debug!(%rejection, "Request carried no multipart form");
            (None, None)
        },
    };

    let source = acquire(file, url, state.fetcher.as_ref()).await?;
    if !state.validator.is_valid(&source.bytes, &source.filename) {
        return Err(ClearCutError::validation("Invalid image file"));
    }

    let cache_key = source.cache_key();
    info!(
        filename = %source.filename,
        size = source.len(),
        %cache_key,
        "Processing image"
    );

    let start = Instant::now();
    let image = state.engine.remove_background(source.bytes.clone()).await?;
    let processing_time = start.elapsed();

    info!(
        filename = %source.filename,
        elapsed_secs = processing_time.as_secs_f64(),
        "Processed image"
    );

    let original_size = source.len();
    Ok((
        source,
        ProcessingResult {
            image,
            processing_time,
            original_size,
        },
    ))
}

/// Collect the `file` and `url` fields of a removal form
async fn read_form(mut multipart: Multipart) -> Result<(Option<UploadedFile>, Option<String>)> {
    let mut file = None;
    let mut url = None;

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => {
                return Err(ClearCutError::validation(format!(
                    "Failed to read multipart: {e}"
                )))
            },
        };

        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                let filename = field.file_name().map(ToString::to_string);
                let bytes = field.bytes().await.map_err(|e| {
                    ClearCutError::validation(format!("Failed to read file data: {e}"))
                })?;
                file = Some(UploadedFile { filename, bytes });
            },
            "url" => {
                let text = field.text().await.map_err(|e| {
                    ClearCutError::validation(format!("Failed to read url field: {e}"))
                })?;
                url = Some(text);
            },
            other => debug!(field = other, "Ignoring unknown form field"),
        }
    }

    Ok((file, url))
}

/// PNG-encode on the blocking pool, optionally as a bounded thumbnail
async fn encode_blocking(
    result: ProcessingResult,
    preview_box: Option<(u32, u32)>,
) -> Result<Vec<u8>> {
    tokio::task::spawn_blocking(move || match preview_box {
        Some((width, height)) => result.to_preview_png(width, height),
        None => result.to_png(),
    })
    .await
    .map_err(|e| ClearCutError::internal(format!("Encoding task failed: {e}")))?
}

/// Replace characters that cannot appear in an unquoted header parameter
fn header_safe(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_graphic() && !matches!(c, '"' | ';' | ',' | '\\') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn format_uptime(total_seconds: i64) -> String {
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;
    format!("{hours}h {minutes}m {seconds}s")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_safe_filenames() {
        assert_eq!(header_safe("holiday"), "holiday");
        assert_eq!(header_safe("my photo"), "my_photo");
        assert_eq!(header_safe("tricky\";x"), "tricky__x");
        assert_eq!(header_safe("café"), "caf_");
    }

    #[test]
    fn test_format_uptime() {
        assert_eq!(format_uptime(0), "0h 0m 0s");
        assert_eq!(format_uptime(3725), "1h 2m 5s");
    }
}
