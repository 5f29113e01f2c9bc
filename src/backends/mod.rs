//! Backend implementations for different inference engines
//!
//! - ONNX Runtime backend running the U²-Net model on CPU
//! - Mock backend producing a synthetic mask, for tests and local development

#[cfg(feature = "onnx")]
pub mod onnx;

pub mod mock;

#[cfg(feature = "onnx")]
pub use self::onnx::OnnxBackend;

pub use self::mock::MockBackend;
