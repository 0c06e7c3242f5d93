//! Model cache management for downloaded models
//!
//! Models live under `<cache root>/models/<model id>/`, mirroring the layout of
//! the `HuggingFace` repository they were fetched from.

use crate::config::RemovalConfig;
use crate::error::{BgRemovalError, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Information about a cached model
#[derive(Debug, Clone)]
pub struct CachedModelInfo {
    /// Model identifier (derived from URL)
    pub model_id: String,
    /// Path to the cached model directory
    pub path: PathBuf,
    /// Available ONNX model variants (fp16, fp32, ...)
    pub variants: Vec<String>,
}

/// Model cache manager
#[derive(Debug, Clone)]
pub struct ModelCache {
    cache_dir: PathBuf,
}

impl ModelCache {
    /// Create a cache manager rooted at the platform cache directory
    ///
    /// - Linux: `~/.cache/bgremove/models/`
    /// - macOS: `~/Library/Caches/bgremove/models/`
    /// - Windows: `%LOCALAPPDATA%/bgremove/models/`
    ///
    /// # Errors
    /// - Failed to determine or create the cache directory
    pub fn new() -> Result<Self> {
        let root = dirs::cache_dir()
            .ok_or_else(|| {
                BgRemovalError::invalid_config(format!(
                    "Failed to determine cache directory. Set {} to choose one.",
                    crate::config::ENV_CACHE_DIR
                ))
            })?
            .join("bgremove");
        Self::with_custom_cache_dir(&root)
    }

    /// Create a cache manager rooted at `cache_dir` (models go in `cache_dir/models`)
    ///
    /// # Errors
    /// - Failed to create the cache directory
    pub fn with_custom_cache_dir(cache_dir: &Path) -> Result<Self> {
        let models_dir = cache_dir.join("models");

        if !models_dir.exists() {
            fs::create_dir_all(&models_dir).map_err(|e| {
                BgRemovalError::file_io_error("create cache directory", &models_dir, &e)
            })?;
        }

        Ok(Self {
            cache_dir: models_dir,
        })
    }

    /// Create the cache manager described by a removal configuration
    ///
    /// # Errors
    /// - Failed to determine or create the cache directory
    pub fn from_config(config: &RemovalConfig) -> Result<Self> {
        match &config.cache_dir {
            Some(dir) => Self::with_custom_cache_dir(dir),
            None => Self::new(),
        }
    }

    /// Generate a model ID from a URL
    ///
    /// ```
    /// use bgremove_filter::cache::ModelCache;
    ///
    /// let id = ModelCache::url_to_model_id("https://huggingface.co/imgly/isnet-general-onnx");
    /// assert_eq!(id, "imgly--isnet-general-onnx");
    /// ```
    #[must_use]
    pub fn url_to_model_id(url: &str) -> String {
        let prefix = "https://huggingface.co/";
        if let Some(repo) = url.strip_prefix(prefix) {
            repo.trim_end_matches('/').replace('/', "--")
        } else {
            use sha2::{Digest, Sha256};
            let mut hasher = Sha256::new();
            hasher.update(url.as_bytes());
            let hash_string = format!("url-{:x}", hasher.finalize());
            hash_string.get(..16).unwrap_or(&hash_string).to_string()
        }
    }

    /// Check whether a complete model is present in the cache
    #[must_use]
    pub fn is_model_cached(&self, model_id: &str) -> bool {
        let model_path = self.cache_dir.join(model_id);
        model_path.is_dir() && Self::validate_model_directory(&model_path)
    }

    /// Path to a cached model directory (may not exist)
    #[must_use]
    pub fn get_model_path(&self, model_id: &str) -> PathBuf {
        self.cache_dir.join(model_id)
    }

    /// Directory holding all cached models
    #[must_use]
    pub fn get_current_cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Scan the cache directory and return all complete models, sorted by ID
    ///
    /// # Errors
    /// - Failed to read the cache directory
    pub fn scan_cached_models(&self) -> Result<Vec<CachedModelInfo>> {
        let mut models = Vec::new();

        if !self.cache_dir.exists() {
            return Ok(models);
        }

        let entries = fs::read_dir(&self.cache_dir).map_err(|e| {
            BgRemovalError::file_io_error("read cache directory", &self.cache_dir, &e)
        })?;

        for entry in entries {
            let entry = entry.map_err(|e| {
                BgRemovalError::file_io_error("read cache directory entry", &self.cache_dir, &e)
            })?;

            let path = entry.path();
            if !path.is_dir() || !Self::validate_model_directory(&path) {
                continue;
            }

            let Some(model_id) = path.file_name().and_then(|n| n.to_str()).map(String::from)
            else {
                continue;
            };

            models.push(CachedModelInfo {
                model_id,
                variants: Self::list_variants(&path),
                path,
            });
        }

        models.sort_by(|a, b| a.model_id.cmp(&b.model_id));
        Ok(models)
    }

    /// List the ONNX variants present in a model directory
    ///
    /// `onnx/model.onnx` is `fp32`, `onnx/model_<name>.onnx` is `<name>`.
    #[must_use]
    pub fn list_variants(model_path: &Path) -> Vec<String> {
        let mut variants = Vec::new();
        let Ok(entries) = fs::read_dir(model_path.join("onnx")) else {
            return variants;
        };

        for entry in entries.flatten() {
            let Some(file_name) = entry.file_name().to_str().map(String::from) else {
                continue;
            };
            if !Path::new(&file_name)
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case("onnx"))
            {
                continue;
            }
            if file_name == "model.onnx" {
                variants.push("fp32".to_string());
            } else if let Some(variant) = file_name
                .strip_prefix("model_")
                .and_then(|s| s.strip_suffix(".onnx"))
            {
                variants.push(variant.to_string());
            }
        }

        variants.sort();
        variants
    }

    /// Model file path for a variant inside a model directory
    #[must_use]
    pub fn variant_file(model_path: &Path, variant: &str) -> PathBuf {
        let onnx_dir = model_path.join("onnx");
        match variant {
            "fp32" => onnx_dir.join("model.onnx"),
            other => onnx_dir.join(format!("model_{}.onnx", other)),
        }
    }

    /// Remove a cached model; returns whether anything was removed
    ///
    /// # Errors
    /// - Failed to remove the model directory
    pub fn clear_specific_model(&self, model_id: &str) -> Result<bool> {
        let model_path = self.get_model_path(model_id);

        if !model_path.exists() {
            return Ok(false);
        }

        tracing::info!(model_id, "Removing cached model");
        fs::remove_dir_all(&model_path).map_err(|e| {
            BgRemovalError::file_io_error("remove cached model", &model_path, &e)
        })?;

        Ok(true)
    }

    fn validate_model_directory(model_path: &Path) -> bool {
        model_path.join("config.json").is_file()
            && model_path.join("preprocessor_config.json").is_file()
            && !Self::list_variants(model_path).is_empty()
    }
}
