//! Inference backend abstraction

use crate::{
    config::RemovalConfig,
    error::Result,
    models::{ModelInfo, PreprocessingConfig},
};
use ndarray::Array4;

// Use instant crate for cross-platform time compatibility
use instant::Duration;

/// Trait for inference backends
///
/// A backend owns one loaded segmentation model. It receives a normalised
/// NCHW `f32` tensor and returns the raw `1 x 1 x H x W` mask tensor.
pub trait InferenceBackend {
    /// Initialize the backend with the given configuration
    ///
    /// Returns the model load time, or `None` when already initialized.
    ///
    /// # Errors
    /// - Model unavailable or failed to download
    /// - Model loading or validation errors
    fn initialize(&mut self, config: &RemovalConfig) -> Result<Option<Duration>>;

    /// Run inference on the input tensor
    ///
    /// # Errors
    /// - Backend not initialized
    /// - Model inference failures
    /// - Output tensor is not 4-dimensional
    fn infer(&mut self, input: &Array4<f32>) -> Result<Array4<f32>>;

    /// Get preprocessing configuration for the loaded model
    ///
    /// # Errors
    /// - Backend not initialized
    /// - Invalid or missing preprocessing metadata
    fn get_preprocessing_config(&self) -> Result<PreprocessingConfig>;

    /// Get model information for the loaded model
    ///
    /// # Errors
    /// - Backend not initialized
    /// - Model metadata unavailable or invalid
    fn get_model_info(&self) -> Result<ModelInfo>;

    /// Check if backend is initialized
    fn is_initialized(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::test_utils::MockBackend;

    #[test]
    fn test_backend_trait_object_lifecycle() {
        let mut backend: Box<dyn InferenceBackend> = Box::new(MockBackend::new());
        assert!(!backend.is_initialized());

        let load_time = backend.initialize(&RemovalConfig::default()).unwrap();
        assert!(load_time.is_some());
        assert!(backend.is_initialized());

        // Second initialization is a no-op
        assert!(backend.initialize(&RemovalConfig::default()).unwrap().is_none());
    }

    #[test]
    fn test_backend_shapes_follow_preprocessing() {
        let mut backend = MockBackend::new();
        backend.initialize(&RemovalConfig::default()).unwrap();

        let config = backend.get_preprocessing_config().unwrap();
        let [height, width] = config.target_size;
        let input = Array4::<f32>::zeros((1, 3, height as usize, width as usize));

        let output = backend.infer(&input).unwrap();
        assert_eq!(output.dim(), (1, 1, height as usize, width as usize));

        let info = backend.get_model_info().unwrap();
        assert_eq!(info.input_shape.1, 3);
        assert_eq!(info.output_shape.1, 1);
    }
}
