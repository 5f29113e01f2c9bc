//! Background removal engine
//!
//! `BackgroundRemover` is the async face of the pipeline. Every request runs
//! decode, optional downscale, segmentation, restore and alpha refinement as
//! a single job on Tokio's blocking pool. The configured timeout starts once
//! the job holds the inference session, so time spent queued behind other
//! requests is not counted.

use crate::{
    config::EngineConfig,
    error::{ClearCutError, Result},
    inference::InferenceBackend,
    postprocess::AlphaRefiner,
    processor::BackgroundRemovalProcessor,
};
use bytes::Bytes;
use image::{imageops::FilterType, DynamicImage, ImageFormat, RgbaImage};
use serde::Serialize;
use std::io::Cursor;
use std::sync::{Arc, RwLock};
use std::time::Instant;
use tokio::sync::oneshot;
use tracing::{debug, info, instrument};

const MODEL_DESCRIPTION: &str = "U²-Net model for high-quality background removal";

/// Model status as reported by the health endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelStatus {
    pub model_name: String,
    /// `loaded` or `not_loaded`
    pub status: String,
    pub description: String,
}

/// Owns the model and runs removal jobs off the async runtime
#[derive(Debug)]
pub struct BackgroundRemover {
    processor: RwLock<Option<Arc<BackgroundRemovalProcessor>>>,
    config: EngineConfig,
}

impl BackgroundRemover {
    /// Resolve, download if needed, and load the ONNX model
    ///
    /// # Errors
    /// - Model file missing or download failed
    /// - ONNX session creation failed
    #[cfg(feature = "onnx")]
    #[instrument(skip_all, fields(model = %config.model_spec.source.display_name()))]
    pub async fn initialize(config: EngineConfig) -> Result<Self> {
        use crate::backends::OnnxBackend;
        use crate::models::ModelManager;

        config.validate()?;
        let manager = ModelManager::prepare(&config.model_spec).await?;
        info!(path = %manager.model_path().display(), "Loading segmentation model");

        let engine_config = config.clone();
        let processor = tokio::task::spawn_blocking(move || {
            BackgroundRemovalProcessor::new(
                Box::new(OnnxBackend::with_model_manager(manager)),
                &engine_config,
            )
        })
        .await
        .map_err(|e| ClearCutError::internal(format!("Model loading task failed: {e}")))??;

        Ok(Self::from_processor(processor, config))
    }

    /// Without ONNX Runtime support there is no model to load
    ///
    /// # Errors
    /// - Always
    #[cfg(not(feature = "onnx"))]
    pub async fn initialize(_config: EngineConfig) -> Result<Self> {
        Err(ClearCutError::model(
            "Built without the `onnx` feature; no inference backend available",
        ))
    }

    /// Build an engine around an arbitrary backend
    ///
    /// # Errors
    /// - Invalid configuration
    /// - Backend initialization failures
    pub fn with_backend(backend: Box<dyn InferenceBackend>, config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let processor = BackgroundRemovalProcessor::new(backend, &config)?;
        Ok(Self::from_processor(processor, config))
    }

    fn from_processor(processor: BackgroundRemovalProcessor, config: EngineConfig) -> Self {
        Self {
            processor: RwLock::new(Some(Arc::new(processor))),
            config,
        }
    }

    /// Remove the background of an encoded image
    ///
    /// The output has the input's dimensions. The input bytes are not
    /// modified.
    ///
    /// # Errors
    /// - Model not loaded (after `shutdown`)
    /// - Decode, inference or resize failures
    /// - Inference and post-processing exceeded the inference timeout
    #[instrument(skip_all, fields(bytes = bytes.len()))]
    pub async fn remove_background(&self, bytes: Bytes) -> Result<RgbaImage> {
        let processor = self.processor()?;
        let max_dimension = self.config.max_dimension;
        let enhance_edges = self.config.enhance_edges;
        let (session_tx, session_rx) = oneshot::channel();

        let handle = tokio::task::spawn_blocking(move || {
            run_pipeline(&processor, &bytes, max_dimension, enhance_edges, session_tx)
        });

        let joined = match self.config.inference_timeout {
            Some(limit) => {
                // A dropped sender means the job failed before reaching the session
                let _ = session_rx.await;
                tokio::time::timeout(limit, handle)
                    .await
                    .map_err(|_| ClearCutError::Timeout(limit))?
            },
            None => handle.await,
        };

        joined
            .map_err(|e| ClearCutError::internal(format!("Background removal task failed: {e}")))?
    }

    /// Drop the engine's reference to the model
    ///
    /// Jobs already running keep their own reference and finish normally.
    pub fn shutdown(&self) {
        match self.processor.write() {
            Ok(mut guard) => {
                if guard.take().is_some() {
                    info!("Segmentation model released");
                }
            },
            Err(e) => tracing::warn!(error = %e, "Model lock poisoned during shutdown"),
        }
    }

    /// Whether a model is currently loaded
    #[must_use]
    pub fn is_loaded(&self) -> bool {
        self.processor
            .read()
            .map(|guard| guard.is_some())
            .unwrap_or(false)
    }

    /// Name, load status and description of the model
    #[must_use]
    pub fn model_info(&self) -> ModelStatus {
        ModelStatus {
            model_name: self.config.model_spec.name.clone(),
            status: if self.is_loaded() {
                "loaded".to_string()
            } else {
                "not_loaded".to_string()
            },
            description: MODEL_DESCRIPTION.to_string(),
        }
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn processor(&self) -> Result<Arc<BackgroundRemovalProcessor>> {
        self.processor
            .read()
            .map_err(|_| ClearCutError::internal("Model lock poisoned"))?
            .clone()
            .ok_or_else(|| ClearCutError::model("Model not loaded"))
    }
}

/// Working size for an image whose longest side may exceed `max_dimension`
///
/// Returns `None` when no downscale is needed. Scaled sides are truncated
/// and never drop below one pixel.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
#[must_use]
pub fn working_size(width: u32, height: u32, max_dimension: u32) -> Option<(u32, u32)> {
    let longest = width.max(height);
    if longest <= max_dimension {
        return None;
    }
    let ratio = f64::from(max_dimension) / f64::from(longest);
    let scaled = |side: u32| ((f64::from(side) * ratio) as u32).max(1);
    Some((scaled(width), scaled(height)))
}

/// The blocking part of one request
fn run_pipeline(
    processor: &BackgroundRemovalProcessor,
    bytes: &[u8],
    max_dimension: u32,
    enhance_edges: bool,
    session_acquired: oneshot::Sender<()>,
) -> Result<RgbaImage> {
    let start = Instant::now();
    let decoded = image::load_from_memory(bytes)
        .map_err(|e| ClearCutError::processing(format!("Failed to decode image: {e}")))?;
    let rgb = decoded.to_rgb8();
    drop(decoded);
    let (width, height) = rgb.dimensions();

    let working = match working_size(width, height, max_dimension) {
        Some((w, h)) => {
            debug!(width, height, working_width = w, working_height = h, "Downscaling for inference");
            image::imageops::resize(&rgb, w, h, FilterType::Lanczos3)
        },
        None => rgb,
    };

    let mut intermediate = Vec::new();
    DynamicImage::ImageRgb8(working)
        .write_to(&mut Cursor::new(&mut intermediate), ImageFormat::Png)?;

    let mut cutout = processor.process_bytes_with(&intermediate, move || {
        let _ = session_acquired.send(());
    })?;
    if cutout.dimensions() != (width, height) {
        cutout = image::imageops::resize(&cutout, width, height, FilterType::Lanczos3);
    }

    let mut result = AlphaRefiner::refine(DynamicImage::ImageRgba8(cutout));
    if enhance_edges {
        result = AlphaRefiner::enhance_edges(result);
    }

    debug!(
        elapsed_ms = start.elapsed().as_millis() as u64,
        "Removal pipeline finished"
    );
    Ok(result.into_rgba8())
}
