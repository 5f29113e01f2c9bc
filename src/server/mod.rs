//! HTTP surface
//!
//! Builds the axum router over a shared [`AppState`]. The state is created
//! once by the binary and handed to every handler through an `Arc`.

pub mod error;
pub mod handlers;

use crate::{
    acquisition::ImageFetcher, config::AppConfig, engine::BackgroundRemover,
    validation::ImageValidator,
};
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tower_http::{limit::RequestBodyLimitLayer, services::ServeDir, trace::TraceLayer};

/// Room for multipart framing and the `url` field on top of the file itself
const MULTIPART_OVERHEAD: usize = 1024 * 1024;

/// State shared by all requests
pub struct AppState {
    pub config: AppConfig,
    pub validator: ImageValidator,
    pub fetcher: Arc<dyn ImageFetcher>,
    pub engine: Arc<BackgroundRemover>,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        engine: Arc<BackgroundRemover>,
        fetcher: Arc<dyn ImageFetcher>,
    ) -> Self {
        let validator =
            ImageValidator::new(config.max_file_size, config.allowed_extensions.clone());
        Self {
            config,
            validator,
            fetcher,
            engine,
            started_at: Utc::now(),
        }
    }

    /// Largest request body accepted before the validator sees the file
    #[must_use]
    pub fn body_limit(&self) -> usize {
        self.config
            .max_file_size
            .saturating_mul(2)
            .saturating_add(MULTIPART_OVERHEAD)
    }
}

/// Build the application router
pub fn router(state: Arc<AppState>) -> Router {
    let body_limit = state.body_limit();
    let static_files = ServeDir::new(state.config.static_dir.clone());

    Router::new()
        .route("/", get(handlers::index))
        .route("/health", get(handlers::health))
        .route("/api/stats", get(handlers::stats))
        .route("/remove-bg", post(handlers::remove_background))
        .route("/remove-bg-preview", post(handlers::remove_background_preview))
        .nest_service("/static", static_files)
        .fallback(handlers::not_found)
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
