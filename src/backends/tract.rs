//! Tract backend implementation for background removal models
//!
//! Tract is a pure Rust neural network inference library, so this backend
//! works without any native runtime installed. It always runs on the CPU.

use crate::config::RemovalConfig;
use crate::error::{BgRemovalError, Result};
use crate::inference::InferenceBackend;
use crate::models::{ModelInfo, ModelManager, PreprocessingConfig};
use ndarray::Array4;
use tract_onnx::prelude::*;

/// Type alias for the complex Tract model type to reduce complexity warnings
type TractModel = RunnableModel<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

// Use instant crate for cross-platform time compatibility
use instant::{Duration, Instant};

/// Tract backend for running background removal models using pure Rust inference
#[derive(Debug, Default)]
pub struct TractBackend {
    model: Option<TractModel>,
    model_manager: Option<ModelManager>,
}

impl TractBackend {
    /// Create a new uninitialized Tract backend
    ///
    /// The model is resolved from the configuration passed to
    /// [`InferenceBackend::initialize`].
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a Tract backend with a pre-resolved model
    #[must_use]
    pub fn with_model_manager(model_manager: ModelManager) -> Self {
        Self {
            model: None,
            model_manager: Some(model_manager),
        }
    }

    fn manager(&self) -> Result<&ModelManager> {
        self.model_manager
            .as_ref()
            .ok_or_else(|| BgRemovalError::internal("Model manager not initialized"))
    }

    /// Load and optimize the model for a fixed input shape
    fn load_model(&mut self, config: &RemovalConfig) -> Result<Duration> {
        let model_load_start = Instant::now();

        if self.model_manager.is_none() {
            self.model_manager = Some(ModelManager::from_config(config)?);
        }
        let model_manager = self.manager()?;

        let model_data = model_manager.load_model()?;
        let model_info = model_manager.get_info()?;
        let [height, width] = model_manager.get_preprocessing_config()?.target_size;

        tracing::info!(
            model = %model_info.name,
            precision = %model_info.precision,
            size_bytes = model_info.size_bytes,
            "Initializing Tract backend"
        );

        let model = onnx()
            .model_for_read(&mut std::io::Cursor::new(model_data))
            .map_err(|e| BgRemovalError::model(format!("Failed to load ONNX model: {e}")))?
            .with_input_fact(
                0,
                f32::fact([1, 3, height as usize, width as usize]).into(),
            )
            .map_err(|e| BgRemovalError::model(format!("Failed to set model input shape: {e}")))?
            .into_optimized()
            .map_err(|e| BgRemovalError::model(format!("Failed to optimize model: {e}")))?
            .into_runnable()
            .map_err(|e| {
                BgRemovalError::model(format!("Failed to create runnable model: {e}"))
            })?;

        self.model = Some(model);

        let model_load_time = model_load_start.elapsed();
        tracing::info!(
            load_ms = model_load_time.as_millis(),
            "Tract backend initialized"
        );

        Ok(model_load_time)
    }
}

impl InferenceBackend for TractBackend {
    fn initialize(&mut self, config: &RemovalConfig) -> Result<Option<Duration>> {
        if self.model.is_some() {
            return Ok(None);
        }

        let model_load_time = self.load_model(config)?;
        Ok(Some(model_load_time))
    }

    fn infer(&mut self, input: &Array4<f32>) -> Result<Array4<f32>> {
        let model = self
            .model
            .as_ref()
            .ok_or_else(|| BgRemovalError::inference("Tract model not initialized"))?;

        tracing::debug!(input_shape = ?input.shape(), "Running Tract inference");
        let inference_start = Instant::now();

        let contiguous = input.as_standard_layout();
        let input_data = contiguous
            .as_slice()
            .ok_or_else(|| BgRemovalError::inference("Input tensor is not contiguous"))?;
        let input_tensor = Tensor::from_shape(input.shape(), input_data)
            .map_err(|e| BgRemovalError::inference(format!("Failed to build input tensor: {e}")))?;

        let outputs = model
            .run(tvec![input_tensor.into()])
            .map_err(|e| BgRemovalError::inference(format!("Tract inference failed: {e}")))?;

        let output_tensor = outputs
            .into_iter()
            .next()
            .ok_or_else(|| BgRemovalError::inference("No output tensor found"))?;

        let &[batch, channels, height, width] = output_tensor.shape() else {
            return Err(BgRemovalError::inference(format!(
                "Expected 4D output tensor, got {}D",
                output_tensor.rank()
            )));
        };

        let output_data = output_tensor.as_slice::<f32>().map_err(|e| {
            BgRemovalError::inference(format!("Failed to convert output tensor: {e}"))
        })?;

        let output_array =
            Array4::from_shape_vec((batch, channels, height, width), output_data.to_vec())
                .map_err(|e| {
                    BgRemovalError::inference(format!("Failed to reshape output tensor: {e}"))
                })?;

        tracing::debug!(
            inference_ms = inference_start.elapsed().as_millis(),
            output_shape = ?output_array.shape(),
            "Tract inference completed"
        );

        Ok(output_array)
    }

    fn is_initialized(&self) -> bool {
        self.model.is_some()
    }

    fn get_preprocessing_config(&self) -> Result<PreprocessingConfig> {
        self.manager()?.get_preprocessing_config()
    }

    fn get_model_info(&self) -> Result<ModelInfo> {
        self.manager()?.get_info()
    }
}
