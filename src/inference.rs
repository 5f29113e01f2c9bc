//! Inference backend abstraction

use crate::{
    config::EngineConfig,
    error::Result,
    models::PreprocessingConfig,
};
use ndarray::Array4;
use std::time::Duration;

/// Trait for inference backends
///
/// Backends are driven from blocking worker threads, hence `Send`.
pub trait InferenceBackend: Send {
    /// Initialize the backend with the given configuration
    ///
    /// Returns the model load time when a model was actually loaded.
    ///
    /// # Errors
    /// - Backend initialization failures
    /// - Model loading or validation errors
    fn initialize(&mut self, config: &EngineConfig) -> Result<Option<Duration>>;

    /// Run inference on an NCHW input tensor, producing an N×1×H×W mask
    ///
    /// # Errors
    /// - Backend not initialized
    /// - Model inference failures
    /// - Tensor conversion errors
    fn infer(&mut self, input: &Array4<f32>) -> Result<Array4<f32>>;

    /// Preprocessing parameters the backend's model expects
    fn preprocessing_config(&self) -> PreprocessingConfig;

    /// Check if backend is initialized
    fn is_initialized(&self) -> bool;
}
