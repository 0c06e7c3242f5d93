//! Configuration types for background removal operations
//!
//! The filter itself takes no flags. Everything the removal capability needs
//! (where models are cached, which model and backend to use) comes from
//! defaults that can be overridden through `BGREMOVE_*` environment variables.

use crate::download::validate_model_url;
use crate::error::{BgRemovalError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default model repository, fetched on first use
pub const DEFAULT_MODEL_URL: &str = "https://huggingface.co/imgly/isnet-general-onnx";

/// Environment variable overriding the model cache root
pub const ENV_CACHE_DIR: &str = "BGREMOVE_CACHE_DIR";
/// Environment variable overriding the model repository URL
pub const ENV_MODEL_URL: &str = "BGREMOVE_MODEL_URL";
/// Environment variable selecting the inference backend (`tract` or `onnx`)
pub const ENV_BACKEND: &str = "BGREMOVE_BACKEND";
/// Environment variable selecting the model variant (`fp32`, `fp16`)
pub const ENV_VARIANT: &str = "BGREMOVE_VARIANT";
/// Environment variable disabling model downloads
pub const ENV_OFFLINE: &str = "BGREMOVE_OFFLINE";

/// Inference backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendType {
    /// ONNX Runtime backend (supports GPU acceleration)
    Onnx,
    /// Tract backend (pure Rust, no external dependencies)
    Tract,
}

impl Default for BackendType {
    fn default() -> Self {
        if cfg!(feature = "tract") || !cfg!(feature = "onnx") {
            Self::Tract
        } else {
            Self::Onnx
        }
    }
}

impl std::fmt::Display for BackendType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Onnx => write!(f, "onnx"),
            Self::Tract => write!(f, "tract"),
        }
    }
}

impl std::str::FromStr for BackendType {
    type Err = BgRemovalError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "onnx" | "ort" => Ok(Self::Onnx),
            "tract" => Ok(Self::Tract),
            other => Err(BgRemovalError::invalid_config(format!(
                "Unknown backend '{}'. Expected 'tract' or 'onnx'",
                other
            ))),
        }
    }
}

/// Execution provider options for ONNX Runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ExecutionProvider {
    /// Use whatever acceleration the runtime reports as available
    #[default]
    Auto,
    /// CPU execution (always available)
    Cpu,
    /// NVIDIA CUDA GPU acceleration
    Cuda,
    /// Apple Silicon acceleration
    CoreMl,
}

impl std::fmt::Display for ExecutionProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Auto => write!(f, "auto"),
            Self::Cpu => write!(f, "cpu"),
            Self::Cuda => write!(f, "cuda"),
            Self::CoreMl => write!(f, "coreml"),
        }
    }
}

/// Configuration for the background removal capability
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemovalConfig {
    /// Repository the model is downloaded from
    pub model_url: String,

    /// Model variant (`fp32`, `fp16`); `None` picks one for the backend
    pub variant: Option<String>,

    /// Inference backend
    pub backend_type: BackendType,

    /// Execution provider for ONNX Runtime
    pub execution_provider: ExecutionProvider,

    /// Number of intra-op threads for inference (0 = auto)
    pub intra_threads: usize,

    /// Number of inter-op threads for inference (0 = auto)
    pub inter_threads: usize,

    /// Cache root override; `None` uses the platform cache directory
    pub cache_dir: Option<PathBuf>,

    /// Whether a missing model may be downloaded
    pub allow_download: bool,
}

impl Default for RemovalConfig {
    fn default() -> Self {
        Self {
            model_url: DEFAULT_MODEL_URL.to_string(),
            variant: None,
            backend_type: BackendType::default(),
            execution_provider: ExecutionProvider::default(),
            intra_threads: 0,
            inter_threads: 0,
            cache_dir: None,
            allow_download: true,
        }
    }
}

impl RemovalConfig {
    /// Create a new configuration builder
    #[must_use]
    pub fn builder() -> RemovalConfigBuilder {
        RemovalConfigBuilder::default()
    }

    /// Build the configuration from the process environment
    ///
    /// # Errors
    /// - Unknown backend name
    /// - Malformed model URL or empty variant
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup
    ///
    /// Empty values are treated as unset.
    ///
    /// # Errors
    /// - Unknown backend name
    /// - Malformed model URL or empty variant
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        let mut builder = Self::builder();

        if let Some(dir) = get(ENV_CACHE_DIR) {
            builder = builder.cache_dir(dir);
        }
        if let Some(url) = get(ENV_MODEL_URL) {
            builder = builder.model_url(url.trim());
        }
        if let Some(backend) = get(ENV_BACKEND) {
            builder = builder.backend_type(backend.parse()?);
        }
        if let Some(variant) = get(ENV_VARIANT) {
            builder = builder.variant(variant.trim());
        }
        if let Some(offline) = get(ENV_OFFLINE) {
            builder = builder.allow_download(!parse_flag(&offline));
        }

        builder.build()
    }

    /// Validate all configuration parameters
    ///
    /// # Errors
    /// - Model URL is not a `HuggingFace` repository URL
    /// - Variant is present but blank
    pub fn validate(&self) -> Result<()> {
        validate_model_url(&self.model_url)?;

        if let Some(variant) = &self.variant {
            if variant.trim().is_empty() {
                return Err(BgRemovalError::invalid_config(
                    "Model variant cannot be empty",
                ));
            }
        }

        Ok(())
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// Builder for `RemovalConfig`
#[derive(Debug, Default)]
pub struct RemovalConfigBuilder {
    config: RemovalConfig,
}

impl RemovalConfigBuilder {
    #[must_use]
    pub fn model_url<S: Into<String>>(mut self, url: S) -> Self {
        self.config.model_url = url.into();
        self
    }

    #[must_use]
    pub fn variant<S: Into<String>>(mut self, variant: S) -> Self {
        self.config.variant = Some(variant.into());
        self
    }

    #[must_use]
    pub fn backend_type(mut self, backend_type: BackendType) -> Self {
        self.config.backend_type = backend_type;
        self
    }

    #[must_use]
    pub fn execution_provider(mut self, provider: ExecutionProvider) -> Self {
        self.config.execution_provider = provider;
        self
    }

    #[must_use]
    pub fn intra_threads(mut self, threads: usize) -> Self {
        self.config.intra_threads = threads;
        self
    }

    #[must_use]
    pub fn inter_threads(mut self, threads: usize) -> Self {
        self.config.inter_threads = threads;
        self
    }

    #[must_use]
    pub fn cache_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.config.cache_dir = Some(dir.into());
        self
    }

    #[must_use]
    pub fn allow_download(mut self, allow: bool) -> Self {
        self.config.allow_download = allow;
        self
    }

    /// Build the configuration
    ///
    /// # Errors
    /// - Validation failures, see [`RemovalConfig::validate`]
    pub fn build(self) -> Result<RemovalConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
