//! Inference engines behind [`crate::inference::InferenceBackend`]
//!
//! `tract` runs the model in pure Rust and is the default; `onnx` uses ONNX
//! Runtime with optional CUDA and `CoreML` acceleration.

#[cfg(feature = "onnx")]
pub mod onnx;
#[cfg(feature = "tract")]
pub mod tract;

#[cfg(test)]
pub mod test_utils;

#[cfg(feature = "onnx")]
pub use self::onnx::OnnxBackend;
#[cfg(feature = "tract")]
pub use self::tract::TractBackend;
