//! Mock backend implementation for testing and debugging
//!
//! Produces a synthetic segmentation mask so the whole pipeline can run
//! without a model file or ONNX Runtime.

use crate::config::EngineConfig;
use crate::error::{ClearCutError, Result};
use crate::inference::InferenceBackend;
use crate::models::PreprocessingConfig;
use ndarray::Array4;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Shape of the synthetic mask
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockMask {
    /// Soft-edged disc in the centre (default)
    Circle,
    /// Everything foreground
    Full,
    /// Everything background
    Empty,
}

/// Mock backend for testing and debugging purposes
#[derive(Debug, Clone)]
pub struct MockBackend {
    mask: MockMask,
    initialized: bool,
    should_fail_init: bool,
    should_fail_inference: bool,
    delay: Option<Duration>,
    inference_calls: Arc<AtomicUsize>,
}

impl MockBackend {
    /// Create a new mock backend
    #[must_use]
    pub fn new() -> Self {
        Self {
            mask: MockMask::Circle,
            initialized: false,
            should_fail_init: false,
            should_fail_inference: false,
            delay: None,
            inference_calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    #[must_use]
    pub fn with_mask(mut self, mask: MockMask) -> Self {
        self.mask = mask;
        self
    }

    /// Fail during initialization
    #[must_use]
    pub fn failing_init(mut self) -> Self {
        self.should_fail_init = true;
        self
    }

    /// Fail during inference
    #[must_use]
    pub fn failing_inference(mut self) -> Self {
        self.should_fail_inference = true;
        self
    }

    /// Sleep this long inside every inference call
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Shared counter of `infer` calls, usable after the backend is boxed
    #[must_use]
    pub fn inference_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.inference_calls)
    }

    fn mask_value(&self, x: usize, y: usize, width: usize, height: usize) -> f32 {
        match self.mask {
            MockMask::Full => 1.0,
            MockMask::Empty => 0.0,
            MockMask::Circle => {
                let center_x = width as f32 / 2.0;
                let center_y = height as f32 / 2.0;
                let radius = (width.min(height) as f32 / 3.0).max(1.0);
                let dx = x as f32 - center_x;
                let dy = y as f32 - center_y;
                let distance = (dx * dx + dy * dy).sqrt();
                if distance < radius {
                    ((radius - distance) / radius * 4.0).min(1.0)
                } else {
                    0.0
                }
            },
        }
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl InferenceBackend for MockBackend {
    fn initialize(&mut self, _config: &EngineConfig) -> Result<Option<Duration>> {
        if self.should_fail_init {
            return Err(ClearCutError::model("Mock initialization failure"));
        }
        self.initialized = true;
        Ok(None)
    }

    fn infer(&mut self, input: &Array4<f32>) -> Result<Array4<f32>> {
        self.inference_calls.fetch_add(1, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        if self.should_fail_inference {
            return Err(ClearCutError::inference("Mock inference failure"));
        }

        let (n, _c, h, w) = input.dim();
        let mut output = Array4::<f32>::zeros((n, 1, h, w));
        for ((_, _, y, x), value) in output.indexed_iter_mut() {
            *value = self.mask_value(x, y, w, h);
        }
        Ok(output)
    }

    fn preprocessing_config(&self) -> PreprocessingConfig {
        PreprocessingConfig::u2net()
    }

    fn is_initialized(&self) -> bool {
        self.initialized
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_circle_mask_shape_and_values() {
        let mut backend = MockBackend::new();
        backend.initialize(&EngineConfig::default()).unwrap();
        assert!(backend.is_initialized());

        let input = Array4::<f32>::zeros((1, 3, 32, 32));
        let output = backend.infer(&input).unwrap();

        assert_eq!(output.dim(), (1, 1, 32, 32));
        assert!((output[[0, 0, 16, 16]] - 1.0).abs() < f32::EPSILON);
        assert!(output[[0, 0, 0, 0]].abs() < f32::EPSILON);
        assert_eq!(backend.inference_counter().load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_mock_failure_modes() {
        let mut backend = MockBackend::new().failing_init();
        assert!(backend.initialize(&EngineConfig::default()).is_err());

        let mut backend = MockBackend::new().failing_inference();
        let input = Array4::<f32>::zeros((1, 3, 8, 8));
        assert!(matches!(
            backend.infer(&input),
            Err(ClearCutError::Inference(_))
        ));
    }
}
