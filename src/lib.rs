#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::uninlined_format_args)]

//! # ClearCut
//!
//! Privacy-first background removal served over HTTP. Uploaded or fetched
//! images are segmented with a U²-Net ONNX model, cut out onto a transparent
//! canvas and returned as PNG. Nothing is persisted; every image lives in
//! memory for the duration of its request.
//!
//! ## Pipeline
//!
//! 1. [`acquisition`] picks the input (uploaded file wins over URL)
//! 2. [`validation`] checks size, extension, content type and decodability
//! 3. [`engine::BackgroundRemover`] downscales large inputs, runs
//!    [`processor::BackgroundRemovalProcessor`] on the blocking pool and
//!    restores the original size
//! 4. [`postprocess::AlphaRefiner`] smooths the alpha channel
//! 5. [`server`] encodes the result as a PNG download or a preview data URI
//!
//! ## Using the engine directly
//!
//! ```rust,no_run
//! use clearcut::{BackgroundRemover, EngineConfig};
//!
//! # async fn example(upload: bytes::Bytes) -> anyhow::Result<()> {
//! let engine = BackgroundRemover::initialize(EngineConfig::default()).await?;
//! let cutout = engine.remove_background(upload).await?;
//! cutout.save("cutout.png")?;
//! # Ok(())
//! # }
//! ```
//!
//! ### Feature Flags
//!
//! - `onnx` (default): ONNX Runtime backend
//! - `webp-support` (default): WebP input decoding
//! - `tracing-json`: JSON log output for the service binary

pub mod acquisition;
pub mod backends;
pub mod config;
pub mod download;
pub mod engine;
pub mod error;
pub mod inference;
pub mod maintenance;
pub mod models;
pub mod postprocess;
pub mod preprocessing;
pub mod processor;
pub mod server;
pub mod tracing_config;
pub mod types;
pub mod validation;

pub use acquisition::{acquire, HttpImageFetcher, ImageFetcher, UploadedFile};
pub use backends::*;
pub use config::{AppConfig, EngineConfig, EngineConfigBuilder};
pub use download::ModelDownloader;
pub use engine::{BackgroundRemover, ModelStatus};
pub use error::{ClearCutError, Result};
pub use inference::InferenceBackend;
pub use maintenance::TempCleaner;
pub use models::{ModelInfo, ModelManager, ModelSource, ModelSpec, PreprocessingConfig};
pub use postprocess::AlphaRefiner;
pub use preprocessing::ImagePreprocessor;
pub use processor::BackgroundRemovalProcessor;
pub use server::{router, AppState};
pub use tracing_config::{TracingConfig, TracingFormat};
pub use types::{CacheKey, ProcessingResult, SourceImage};
pub use validation::{ImageValidator, ValidationError};
