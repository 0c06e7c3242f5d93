//! Model resolution, metadata and loading
//!
//! A model is a `HuggingFace`-style directory in the [`ModelCache`]:
//! `config.json`, `preprocessor_config.json` and one or more ONNX variants under
//! `onnx/`. [`ModelManager`] picks the variant, exposes the preprocessing
//! parameters from the model metadata and hands the weights to a backend.

use crate::cache::ModelCache;
use crate::config::{BackendType, ExecutionProvider, RemovalConfig};
use crate::download::{read_checksums, sha256_hex, ModelDownloader};
use crate::error::{BgRemovalError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Preprocessing parameters taken from the model metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreprocessingConfig {
    /// Model input size as `[height, width]`
    pub target_size: [u32; 2],
    /// Per-channel mean on the 0-1 scale
    pub normalization_mean: [f32; 3],
    /// Per-channel standard deviation on the 0-1 scale
    pub normalization_std: [f32; 3],
}

/// Model information and metadata
#[derive(Debug, Clone)]
pub struct ModelInfo {
    pub name: String,
    pub precision: String,
    pub size_bytes: usize,
    pub input_shape: (usize, usize, usize, usize), // NCHW format
    pub output_shape: (usize, usize, usize, usize),
}

/// Make sure the configured model is present in the cache
///
/// Downloads the model when it is missing and downloads are allowed. The
/// download runs to completion on a private current-thread runtime.
///
/// # Errors
/// - Model missing while downloads are disabled
/// - Network or file system errors during download
pub fn ensure_model(config: &RemovalConfig) -> Result<(ModelCache, String)> {
    let cache = ModelCache::from_config(config)?;
    let model_id = ModelCache::url_to_model_id(&config.model_url);

    if cache.is_model_cached(&model_id) {
        return Ok((cache, model_id));
    }

    if !config.allow_download {
        let available: Vec<String> = cache
            .scan_cached_models()?
            .into_iter()
            .map(|m| m.model_id)
            .collect();
        return Err(BgRemovalError::model(format!(
            "Model '{}' not found in cache and downloads are disabled. Available models: {:?}",
            model_id, available
        )));
    }

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| BgRemovalError::internal(format!("Failed to start download runtime: {}", e)))?;

    let downloader = ModelDownloader::new(cache.clone())?;
    let model_id = runtime.block_on(downloader.download_model(&config.model_url))?;
    Ok((cache, model_id))
}

/// Cached model with a resolved variant
#[derive(Debug)]
pub struct ModelManager {
    model_id: String,
    model_path: PathBuf,
    model_config: serde_json::Value,
    preprocessor_config: serde_json::Value,
    variant: String,
    checksums: Option<BTreeMap<String, String>>,
}

impl ModelManager {
    /// Resolve the model described by `config`, downloading it if needed
    ///
    /// # Errors
    /// - Model unavailable (see [`ensure_model`])
    /// - Invalid or missing configuration files
    /// - Requested variant not available
    pub fn from_config(config: &RemovalConfig) -> Result<Self> {
        let (cache, model_id) = ensure_model(config)?;
        Self::for_cached_model(
            &cache,
            &model_id,
            config.variant.as_deref(),
            config.backend_type,
            config.execution_provider,
        )
    }

    /// Open a model that is already in the cache
    ///
    /// # Errors
    /// - Model not found in cache
    /// - Invalid or missing configuration files
    /// - Requested variant not available
    pub fn for_cached_model(
        cache: &ModelCache,
        model_id: &str,
        variant: Option<&str>,
        backend: BackendType,
        execution_provider: ExecutionProvider,
    ) -> Result<Self> {
        if !cache.is_model_cached(model_id) {
            return Err(BgRemovalError::model(format!(
                "Model '{}' not found in cache. Available models: {:?}",
                model_id,
                cache
                    .scan_cached_models()?
                    .iter()
                    .map(|m| &m.model_id)
                    .collect::<Vec<_>>()
            )));
        }

        let model_path = cache.get_model_path(model_id);
        let model_config = read_json(&model_path.join("config.json"))?;
        let preprocessor_config = read_json(&model_path.join("preprocessor_config.json"))?;
        let variant = Self::resolve_variant(&model_path, variant, backend, execution_provider)?;
        let checksums = read_checksums(&model_path)?;

        tracing::debug!(model_id, variant = %variant, %backend, "Resolved cached model");

        Ok(Self {
            model_id: model_id.to_string(),
            model_path,
            model_config,
            preprocessor_config,
            variant,
            checksums,
        })
    }

    /// Pick a variant: the requested one, else the best fit for the backend
    fn resolve_variant(
        model_path: &Path,
        requested: Option<&str>,
        backend: BackendType,
        execution_provider: ExecutionProvider,
    ) -> Result<String> {
        let available = ModelCache::list_variants(model_path);

        if available.is_empty() {
            return Err(BgRemovalError::model(format!(
                "No ONNX model files found in cached model: {}",
                model_path.join("onnx").display()
            )));
        }

        if let Some(variant) = requested {
            if available.iter().any(|v| v == variant) {
                return Ok(variant.to_string());
            }
            return Err(BgRemovalError::model(format!(
                "Requested variant '{}' not available in cached model. Available: {:?}",
                variant, available
            )));
        }

        // Tract has no fp16 kernels worth using; CoreML also wants fp32
        let preferred: &[&str] = match (backend, execution_provider) {
            (BackendType::Tract, _) | (BackendType::Onnx, ExecutionProvider::CoreMl) => {
                &["fp32", "fp16"]
            },
            (BackendType::Onnx, _) => &["fp16", "fp32"],
        };

        for candidate in preferred {
            if available.iter().any(|v| v == candidate) {
                return Ok((*candidate).to_string());
            }
        }

        available
            .into_iter()
            .next()
            .ok_or_else(|| BgRemovalError::internal("variant list emptied during resolution"))
    }

    /// Path to the ONNX file of the selected variant
    #[must_use]
    pub fn model_file_path(&self) -> PathBuf {
        ModelCache::variant_file(&self.model_path, &self.variant)
    }

    /// Read the model weights, verifying them against the recorded digest
    ///
    /// # Errors
    /// - Model file missing or unreadable
    /// - Digest mismatch with `checksums.json`
    pub fn load_model(&self) -> Result<Vec<u8>> {
        let path = self.model_file_path();
        let data = fs::read(&path)
            .map_err(|e| BgRemovalError::file_io_error("read cached model file", &path, &e))?;

        if let Some(expected) = self.expected_digest(&path) {
            let actual = sha256_hex(&data);
            if !actual.eq_ignore_ascii_case(expected) {
                return Err(BgRemovalError::model(format!(
                    "Checksum mismatch for {}: expected {}, got {}. Delete the cached model to download it again.",
                    path.display(),
                    expected,
                    actual
                )));
            }
        }

        Ok(data)
    }

    fn expected_digest(&self, file: &Path) -> Option<&str> {
        let checksums = self.checksums.as_ref()?;
        let relative = file.strip_prefix(&self.model_path).ok()?;
        let key = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        checksums.get(&key).map(String::as_str)
    }

    /// Get model information
    ///
    /// # Errors
    /// - Model file unreadable
    /// - Invalid size in the preprocessor config
    pub fn get_info(&self) -> Result<ModelInfo> {
        let size_bytes = fs::metadata(self.model_file_path())
            .map(|m| m.len() as usize)
            .map_err(|e| {
                BgRemovalError::file_io_error("stat model file", self.model_file_path(), &e)
            })?;

        let model_type = self
            .model_config
            .get("model_type")
            .and_then(serde_json::Value::as_str)
            .unwrap_or("unknown");

        let [height, width] = parse_image_size(&self.preprocessor_config)?;
        let (height, width) = (height as usize, width as usize);

        Ok(ModelInfo {
            name: format!("{}-{}", model_type, self.variant),
            precision: self.variant.clone(),
            size_bytes,
            input_shape: (1, 3, height, width),
            output_shape: (1, 1, height, width),
        })
    }

    /// Get preprocessing configuration from the model metadata
    ///
    /// # Errors
    /// - Missing or invalid `size`, `image_mean` or `image_std`
    pub fn get_preprocessing_config(&self) -> Result<PreprocessingConfig> {
        Ok(PreprocessingConfig {
            target_size: parse_image_size(&self.preprocessor_config)?,
            normalization_mean: parse_channel_triplet(&self.preprocessor_config, "image_mean")?,
            normalization_std: parse_channel_triplet(&self.preprocessor_config, "image_std")?,
        })
    }

    #[must_use]
    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    #[must_use]
    pub fn variant(&self) -> &str {
        &self.variant
    }
}

fn read_json(path: &Path) -> Result<serde_json::Value> {
    let content = fs::read_to_string(path)
        .map_err(|e| BgRemovalError::file_io_error("read model metadata", path, &e))?;
    serde_json::from_str(&content).map_err(|e| {
        BgRemovalError::model(format!("Failed to parse {}: {}", path.display(), e))
    })
}

fn parse_image_size(preprocessor: &serde_json::Value) -> Result<[u32; 2]> {
    let size = preprocessor
        .get("size")
        .ok_or_else(|| BgRemovalError::model("Missing size in preprocessor config"))?;

    let dimension = |key: &str| -> Result<u32> {
        let value = size
            .get(key)
            .and_then(serde_json::Value::as_u64)
            .ok_or_else(|| {
                BgRemovalError::model(format!("Missing or invalid {} in size config", key))
            })?;
        match u32::try_from(value) {
            Ok(0) => Err(BgRemovalError::model(format!("Model input {} is zero", key))),
            Ok(v) => Ok(v),
            Err(_) => Err(BgRemovalError::model(format!("{} value too large for u32", key))),
        }
    };

    Ok([dimension("height")?, dimension("width")?])
}

/// Parse a 0-255 per-channel triplet and convert it to the 0-1 scale
fn parse_channel_triplet(preprocessor: &serde_json::Value, key: &str) -> Result<[f32; 3]> {
    let values = preprocessor
        .get(key)
        .and_then(serde_json::Value::as_array)
        .ok_or_else(|| {
            BgRemovalError::model(format!("Missing or invalid {} in preprocessor config", key))
        })?;

    let mut triplet = [0.0f32; 3];
    for (slot, value) in triplet.iter_mut().zip(values.iter()) {
        let raw = value.as_f64().ok_or_else(|| {
            BgRemovalError::model(format!("{} must contain numbers", key))
        })?;
        *slot = (raw / 255.0) as f32;
    }

    if values.len() < 3 {
        return Err(BgRemovalError::model(format!(
            "{} must have at least 3 values",
            key
        )));
    }
    if key == "image_std" && triplet.iter().any(|v| *v <= 0.0) {
        return Err(BgRemovalError::model("image_std values must be positive"));
    }

    Ok(triplet)
}
