//! Synchronous segmentation step
//!
//! `BackgroundRemovalProcessor` owns the inference backend and turns a
//! lossless intermediate (PNG bytes) into an RGBA cut-out of the same size.
//! It blocks the calling thread and is meant to run on the blocking pool.

use crate::{
    config::EngineConfig,
    error::{ClearCutError, Result},
    inference::InferenceBackend,
    models::PreprocessingConfig,
    preprocessing::ImagePreprocessor,
};
use image::RgbaImage;
use std::sync::Mutex;
use std::time::Instant;
use tracing::{debug, info, instrument, span, Level};

/// Runs preprocessing, inference and mask application for one image
pub struct BackgroundRemovalProcessor {
    // ONNX sessions need `&mut` to run, so inferences are serialized here
    backend: Mutex<Box<dyn InferenceBackend>>,
    preprocessing: PreprocessingConfig,
}

impl std::fmt::Debug for BackgroundRemovalProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackgroundRemovalProcessor")
            .field("preprocessing", &self.preprocessing)
            .finish_non_exhaustive()
    }
}

impl BackgroundRemovalProcessor {
    /// Initialize `backend` and wrap it in a processor
    ///
    /// # Errors
    /// - Backend initialization or model loading failures
    pub fn new(mut backend: Box<dyn InferenceBackend>, config: &EngineConfig) -> Result<Self> {
        if let Some(load_time) = backend.initialize(config)? {
            info!(
                load_ms = load_time.as_millis() as u64,
                "Inference backend initialized"
            );
        }

        let preprocessing = backend.preprocessing_config();

        Ok(Self {
            backend: Mutex::new(backend),
            preprocessing,
        })
    }

    /// Segment an encoded image and return its RGBA cut-out
    ///
    /// # Errors
    /// - The bytes cannot be decoded
    /// - Inference fails
    pub fn process_bytes(&self, encoded: &[u8]) -> Result<RgbaImage> {
        self.process_bytes_with(encoded, || {})
    }

    /// `process_bytes`, calling `on_session` as soon as the backend lock is held
    ///
    /// # Errors
    /// - The bytes cannot be decoded
    /// - Inference fails
    #[instrument(skip_all, fields(bytes = encoded.len()))]
    pub fn process_bytes_with(
        &self,
        encoded: &[u8],
        on_session: impl FnOnce(),
    ) -> Result<RgbaImage> {
        let image = image::load_from_memory(encoded).map_err(|e| {
            ClearCutError::processing(format!("Failed to decode intermediate image: {e}"))
        })?;
        let rgb = image.to_rgb8();
        let (width, height) = rgb.dimensions();

        let input_tensor = {
            let _span = span!(Level::DEBUG, "preprocessing", width, height).entered();
            ImagePreprocessor::preprocess_for_inference(&image, &self.preprocessing)?
        };

        let output_tensor = {
            let _span = span!(Level::DEBUG, "inference").entered();
            let start = Instant::now();
            let mut backend = self
                .backend
                .lock()
                .map_err(|_| ClearCutError::internal("Inference backend lock poisoned"))?;
            on_session();
            let output = backend.infer(&input_tensor)?;
            debug!(
                inference_ms = start.elapsed().as_millis() as u64,
                "Inference finished"
            );
            output
        };

        let _span = span!(Level::DEBUG, "mask_application", width, height).entered();
        let mask = ImagePreprocessor::tensor_to_mask(&output_tensor, width, height)?;
        ImagePreprocessor::apply_mask(&rgb, &mask)
    }

    /// Whether the underlying backend finished initialization
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.backend
            .lock()
            .map(|backend| backend.is_initialized())
            .unwrap_or(false)
    }
}
