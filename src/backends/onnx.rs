//! ONNX Runtime backend running the U²-Net segmentation model
//!
//! The session is created once from the model bytes and runs on the CPU
//! execution provider with the configured intra/inter-op thread counts.

use crate::config::EngineConfig;
use crate::error::{ClearCutError, Result};
use crate::inference::InferenceBackend;
use crate::models::{ModelManager, PreprocessingConfig};
use log;
use ndarray::Array4;
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::{self, value::Value};
use std::time::{Duration, Instant};

/// ONNX Runtime backend for the segmentation model
#[derive(Debug)]
pub struct OnnxBackend {
    session: Option<Session>,
    model_manager: ModelManager,
    initialized: bool,
}

impl OnnxBackend {
    /// Create a new ONNX backend for the model resolved by `model_manager`
    #[must_use]
    pub fn with_model_manager(model_manager: ModelManager) -> Self {
        Self {
            session: None,
            model_manager,
            initialized: false,
        }
    }

    /// Load and initialize the ONNX model
    fn load_model(&mut self, config: &EngineConfig) -> Result<Duration> {
        let model_load_start = Instant::now();
        let model_data = self.model_manager.load_model()?;

        log::debug!(
            "Loading model from {} ({} threads intra-op, {} inter-op)",
            self.model_manager.model_path().display(),
            config.intra_threads,
            config.inter_threads
        );

        let session = Session::builder()
            .map_err(|e| {
                ClearCutError::model(format!("Failed to create session builder: {e}"))
            })?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| {
                ClearCutError::model(format!("Failed to set optimization level: {e}"))
            })?
            .with_intra_threads(config.intra_threads)
            .map_err(|e| ClearCutError::model(format!("Failed to set intra threads: {e}")))?
            .with_inter_threads(config.inter_threads)
            .map_err(|e| ClearCutError::model(format!("Failed to set inter threads: {e}")))?
            .commit_from_memory(&model_data)
            .map_err(|e| {
                ClearCutError::model(format!("Failed to create session from model data: {e}"))
            })?;

        let model_info = self.model_manager.get_info()?;
        log::debug!("ONNX Runtime session created");
        log::debug!("  - Execution provider: CPU");
        log::debug!("  - Optimization level: Level3");
        log::debug!("  - Model: {}", model_info.name);
        #[allow(clippy::cast_precision_loss)] // Precision loss acceptable for logging display
        let size_mb = model_info.size_bytes as f64 / (1024.0 * 1024.0);
        log::debug!("  - Model size: {size_mb:.2} MB");

        self.session = Some(session);
        self.initialized = true;

        let model_load_time = model_load_start.elapsed();
        log::info!(
            "Model loading complete: {:.0}ms",
            model_load_time.as_secs_f64() * 1000.0
        );

        Ok(model_load_time)
    }
}

impl InferenceBackend for OnnxBackend {
    fn initialize(&mut self, config: &EngineConfig) -> Result<Option<Duration>> {
        if self.initialized {
            return Ok(None);
        }

        let model_load_time = self.load_model(config)?;
        Ok(Some(model_load_time))
    }

    fn infer(&mut self, input: &Array4<f32>) -> Result<Array4<f32>> {
        if !self.initialized {
            return Err(ClearCutError::internal("Backend not initialized"));
        }

        let session = self
            .session
            .as_mut()
            .ok_or_else(|| ClearCutError::internal("ONNX session not initialized"))?;

        let inference_start = Instant::now();
        log::debug!("Starting inference with input shape: {:?}", input.dim());

        let input_value = Value::from_array(input.clone()).map_err(|e| {
            ClearCutError::inference(format!("Failed to convert input tensor: {e}"))
        })?;

        let outputs = session
            .run(ort::inputs![input_value])
            .map_err(|e| ClearCutError::inference(format!("ONNX inference failed: {e}")))?;

        // U²-Net emits seven side outputs; the first is the fused prediction
        let output_tensor = {
            let keys: Vec<_> = outputs.keys().collect();
            let first_key = keys
                .first()
                .ok_or_else(|| ClearCutError::inference("No output tensors found"))?;
            outputs
                .get(first_key)
                .ok_or_else(|| ClearCutError::inference("First output tensor not found"))?
                .try_extract_array::<f32>()
                .map_err(|e| {
                    ClearCutError::inference(format!("Failed to extract output tensor: {e}"))
                })?
        };

        let output_shape = output_tensor.shape().to_vec();
        if output_shape.len() != 4 {
            return Err(ClearCutError::inference(format!(
                "Expected 4D output tensor, got {}D",
                output_shape.len()
            )));
        }

        let output_data = output_tensor.view().to_owned();
        let result = Array4::from_shape_vec(
            (
                output_shape.first().copied().unwrap_or(1),
                output_shape.get(1).copied().unwrap_or(1),
                output_shape.get(2).copied().unwrap_or(1),
                output_shape.get(3).copied().unwrap_or(1),
            ),
            output_data.into_raw_vec_and_offset().0,
        )
        .map_err(|e| ClearCutError::inference(format!("Failed to reshape output tensor: {e}")))?;

        log::debug!(
            "Inference complete: {:.2}ms, output shape {:?}",
            inference_start.elapsed().as_secs_f64() * 1000.0,
            result.dim()
        );

        Ok(result)
    }

    fn preprocessing_config(&self) -> PreprocessingConfig {
        self.model_manager.get_preprocessing_config()
    }

    fn is_initialized(&self) -> bool {
        self.initialized
    }
}
