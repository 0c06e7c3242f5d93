//! ONNX Runtime backend implementation for background removal models
//!
//! Supports the CPU, CUDA and CoreML execution providers. A provider that is
//! requested but not available falls back to the CPU.

use crate::config::{ExecutionProvider, RemovalConfig};
use crate::error::{BgRemovalError, Result};
use crate::inference::InferenceBackend;
use crate::models::{ModelInfo, ModelManager, PreprocessingConfig};
use instant::{Duration, Instant};
use ndarray::Array4;
use ort::execution_providers::{
    CUDAExecutionProvider, CoreMLExecutionProvider, ExecutionProvider as OrtExecutionProvider,
    ExecutionProviderDispatch,
};
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Value;

/// ONNX Runtime backend for running background removal models
#[derive(Debug, Default)]
pub struct OnnxBackend {
    session: Option<Session>,
    model_manager: Option<ModelManager>,
}

impl OnnxBackend {
    /// Create a new uninitialized ONNX backend
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new ONNX backend with a pre-resolved model
    #[must_use]
    pub fn with_model_manager(model_manager: ModelManager) -> Self {
        Self {
            session: None,
            model_manager: Some(model_manager),
        }
    }

    fn manager(&self) -> Result<&ModelManager> {
        self.model_manager
            .as_ref()
            .ok_or_else(|| BgRemovalError::internal("Model manager not initialized"))
    }

    /// Execution providers to register, in priority order
    fn execution_providers(provider: ExecutionProvider) -> Vec<ExecutionProviderDispatch> {
        let cuda = || {
            let cuda = CUDAExecutionProvider::default();
            OrtExecutionProvider::is_available(&cuda)
                .unwrap_or(false)
                .then(|| cuda.build())
        };
        let coreml = || {
            let coreml = CoreMLExecutionProvider::default();
            OrtExecutionProvider::is_available(&coreml)
                .unwrap_or(false)
                .then(|| coreml.with_subgraphs(true).build())
        };

        let providers: Vec<_> = match provider {
            ExecutionProvider::Auto => [cuda(), coreml()].into_iter().flatten().collect(),
            ExecutionProvider::Cuda => cuda().into_iter().collect(),
            ExecutionProvider::CoreMl => coreml().into_iter().collect(),
            ExecutionProvider::Cpu => Vec::new(),
        };

        if providers.is_empty() && provider != ExecutionProvider::Cpu {
            tracing::warn!(requested = %provider, "No hardware acceleration available, using CPU");
        }
        providers
    }

    /// Load the ONNX model into a new session
    fn load_model(&mut self, config: &RemovalConfig) -> Result<Duration> {
        let model_load_start = Instant::now();

        if self.model_manager.is_none() {
            self.model_manager = Some(ModelManager::from_config(config)?);
        }
        let model_manager = self.manager()?;
        let model_data = model_manager.load_model()?;
        let model_info = model_manager.get_info()?;

        let available_threads = std::thread::available_parallelism()
            .map(std::num::NonZeroUsize::get)
            .unwrap_or(8);
        let intra_threads = if config.intra_threads > 0 {
            config.intra_threads
        } else {
            available_threads
        };
        let inter_threads = if config.inter_threads > 0 {
            config.inter_threads
        } else {
            (available_threads / 4).max(1)
        };

        let session = Session::builder()
            .map_err(|e| session_error("Failed to create session builder", e))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| session_error("Failed to set optimization level", e))?
            .with_execution_providers(Self::execution_providers(config.execution_provider))
            .map_err(|e| session_error("Failed to set execution providers", e))?
            .with_parallel_execution(true)
            .map_err(|e| session_error("Failed to enable parallel execution", e))?
            .with_intra_threads(intra_threads)
            .map_err(|e| session_error("Failed to set intra threads", e))?
            .with_inter_threads(inter_threads)
            .map_err(|e| session_error("Failed to set inter threads", e))?
            .commit_from_memory(&model_data)
            .map_err(|e| session_error("Failed to create session from model data", e))?;

        tracing::info!(
            model = %model_info.name,
            provider = %config.execution_provider,
            intra_threads,
            inter_threads,
            "ONNX Runtime session created"
        );

        self.session = Some(session);
        Ok(model_load_start.elapsed())
    }
}

fn session_error<E: std::fmt::Display>(stage: &str, e: E) -> BgRemovalError {
    BgRemovalError::inference(format!("{stage}: {e}"))
}

impl InferenceBackend for OnnxBackend {
    fn initialize(&mut self, config: &RemovalConfig) -> Result<Option<Duration>> {
        if self.session.is_some() {
            return Ok(None);
        }

        let model_load_time = self.load_model(config)?;
        Ok(Some(model_load_time))
    }

    fn infer(&mut self, input: &Array4<f32>) -> Result<Array4<f32>> {
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| BgRemovalError::inference("ONNX session not initialized"))?;

        let inference_start = Instant::now();
        tracing::debug!(input_shape = ?input.dim(), "Running ONNX inference");

        let input_value = Value::from_array(input.clone()).map_err(|e| {
            BgRemovalError::inference(format!("Failed to convert input tensor: {e}"))
        })?;

        // Positional inputs and outputs; tensor names differ between models
        let outputs = session
            .run(ort::inputs![input_value])
            .map_err(|e| BgRemovalError::inference(format!("ONNX inference failed: {e}")))?;

        let first_key = outputs
            .keys()
            .next()
            .ok_or_else(|| BgRemovalError::inference("No output tensors found"))?;
        let output_tensor = outputs
            .get(first_key)
            .ok_or_else(|| BgRemovalError::inference("First output tensor not found"))?
            .try_extract_array::<f32>()
            .map_err(|e| {
                BgRemovalError::inference(format!("Failed to extract output tensor: {e}"))
            })?;

        let &[batch, channels, height, width] = output_tensor.shape() else {
            return Err(BgRemovalError::inference(format!(
                "Expected 4D output tensor, got {}D",
                output_tensor.ndim()
            )));
        };

        let output_array = Array4::from_shape_vec(
            (batch, channels, height, width),
            output_tensor.iter().copied().collect(),
        )
        .map_err(|e| BgRemovalError::inference(format!("Failed to reshape output tensor: {e}")))?;

        tracing::debug!(
            inference_ms = inference_start.elapsed().as_millis(),
            output_shape = ?output_array.dim(),
            "ONNX inference completed"
        );

        Ok(output_array)
    }

    fn is_initialized(&self) -> bool {
        self.session.is_some()
    }

    fn get_preprocessing_config(&self) -> Result<PreprocessingConfig> {
        self.manager()?.get_preprocessing_config()
    }

    fn get_model_info(&self) -> Result<ModelInfo> {
        self.manager()?.get_info()
    }
}
