//! Mock backends for testing inference functionality
//!
//! These implement [`InferenceBackend`] without model files or a native
//! runtime, producing a deterministic soft circular mask.

use crate::{
    config::RemovalConfig,
    error::{BgRemovalError, Result},
    inference::InferenceBackend,
    models::{ModelInfo, PreprocessingConfig},
};
use instant::Duration;
use ndarray::Array4;
use std::sync::{Arc, Mutex};

/// Mock inference backend for testing
#[derive(Debug, Clone)]
pub struct MockBackend {
    initialized: bool,
    preprocessing_config: PreprocessingConfig,
    call_history: Arc<Mutex<Vec<String>>>,
    should_fail_init: bool,
    should_fail_inference: bool,
}

impl MockBackend {
    /// Create a mock backend with a 320x320 model input
    #[must_use]
    pub fn new() -> Self {
        Self::with_target_size(320)
    }

    /// Create a mock backend with a square model input of `size`
    #[must_use]
    pub fn with_target_size(size: u32) -> Self {
        Self {
            initialized: false,
            preprocessing_config: PreprocessingConfig {
                target_size: [size, size],
                normalization_mean: [0.485, 0.456, 0.406],
                normalization_std: [0.229, 0.224, 0.225],
            },
            call_history: Arc::new(Mutex::new(Vec::new())),
            should_fail_init: false,
            should_fail_inference: false,
        }
    }

    /// Create a mock backend that will fail during initialization
    #[must_use]
    pub fn new_failing_init() -> Self {
        let mut backend = Self::with_target_size(32);
        backend.should_fail_init = true;
        backend
    }

    /// Create a mock backend that will fail during inference
    #[must_use]
    pub fn new_failing_inference() -> Self {
        let mut backend = Self::with_target_size(32);
        backend.should_fail_inference = true;
        backend
    }

    /// Shared handle to the recorded calls, usable after the backend is boxed
    #[must_use]
    pub fn call_history_handle(&self) -> Arc<Mutex<Vec<String>>> {
        Arc::clone(&self.call_history)
    }

    fn record_call(&self, method: &str) {
        if let Ok(mut history) = self.call_history.lock() {
            history.push(method.to_string());
        }
    }

    /// Circular mask with soft edges, 1.0 at the centre falling to 0.0 at the radius
    fn generate_mock_output(&self, batch_size: usize) -> Array4<f32> {
        let [height, width] = self.preprocessing_config.target_size;
        let (height, width) = (height as usize, width as usize);

        let center_x = width as f32 / 2.0;
        let center_y = height as f32 / 2.0;
        let radius = (width.min(height) as f32 / 3.0).max(1.0);

        Array4::from_shape_fn((batch_size, 1, height, width), |(_, _, y, x)| {
            let dx = x as f32 - center_x;
            let dy = y as f32 - center_y;
            let distance = (dx * dx + dy * dy).sqrt();
            ((radius - distance) / radius).clamp(0.0, 1.0)
        })
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl InferenceBackend for MockBackend {
    fn initialize(&mut self, _config: &RemovalConfig) -> Result<Option<Duration>> {
        self.record_call("initialize");

        if self.should_fail_init {
            return Err(BgRemovalError::model("Mock initialization failure"));
        }
        if self.initialized {
            return Ok(None);
        }

        self.initialized = true;
        Ok(Some(Duration::from_millis(1)))
    }

    fn infer(&mut self, input: &Array4<f32>) -> Result<Array4<f32>> {
        self.record_call("infer");

        if !self.initialized {
            return Err(BgRemovalError::inference("Mock backend not initialized"));
        }
        if self.should_fail_inference {
            return Err(BgRemovalError::inference("Mock inference failure"));
        }

        let [height, width] = self.preprocessing_config.target_size;
        let (batch, channels, in_h, in_w) = input.dim();
        if channels != 3 || in_h != height as usize || in_w != width as usize {
            return Err(BgRemovalError::inference(format!(
                "Unexpected input shape {:?}",
                input.dim()
            )));
        }

        Ok(self.generate_mock_output(batch))
    }

    fn get_preprocessing_config(&self) -> Result<PreprocessingConfig> {
        Ok(self.preprocessing_config.clone())
    }

    fn get_model_info(&self) -> Result<ModelInfo> {
        let [height, width] = self.preprocessing_config.target_size;
        let (height, width) = (height as usize, width as usize);
        Ok(ModelInfo {
            name: "mock-fp32".to_string(),
            precision: "fp32".to_string(),
            size_bytes: 1024 * 1024,
            input_shape: (1, 3, height, width),
            output_shape: (1, 1, height, width),
        })
    }

    fn is_initialized(&self) -> bool {
        self.initialized
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_mask_is_soft_circle() {
        let mut backend = MockBackend::with_target_size(30);
        backend.initialize(&RemovalConfig::default()).unwrap();

        let output = backend.infer(&Array4::zeros((1, 3, 30, 30))).unwrap();
        assert!(output[[0, 0, 15, 15]] > 0.9);
        assert_eq!(output[[0, 0, 0, 0]], 0.0);
        assert!(output.iter().all(|v| (0.0..=1.0).contains(v)));
    }

    #[test]
    fn test_mock_failure_modes() {
        let mut backend = MockBackend::new_failing_init();
        assert!(backend.initialize(&RemovalConfig::default()).is_err());
        assert!(!backend.is_initialized());

        let mut backend = MockBackend::new_failing_inference();
        backend.initialize(&RemovalConfig::default()).unwrap();
        assert!(backend.infer(&Array4::zeros((1, 3, 32, 32))).is_err());
    }

    #[test]
    fn test_mock_records_calls() {
        let mut backend = MockBackend::with_target_size(8);
        let history = backend.call_history_handle();

        backend.initialize(&RemovalConfig::default()).unwrap();
        backend.infer(&Array4::zeros((1, 3, 8, 8))).unwrap();

        assert_eq!(*history.lock().unwrap(), vec!["initialize", "infer"]);
    }

    #[test]
    fn test_mock_rejects_wrong_shape() {
        let mut backend = MockBackend::with_target_size(8);
        backend.initialize(&RemovalConfig::default()).unwrap();
        assert!(backend.infer(&Array4::zeros((1, 3, 9, 8))).is_err());
    }
}
