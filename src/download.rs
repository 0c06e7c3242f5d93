//! Model downloading from `HuggingFace` repositories
//!
//! Files are streamed into a temporary directory inside the cache and moved
//! into place with a single rename once every required file has arrived, so
//! an interrupted download never leaves a half-written model behind. The
//! SHA-256 of every file is recorded in `checksums.json` next to the model.

use crate::cache::ModelCache;
use crate::error::{BgRemovalError, Result};
use futures_util::stream::TryStreamExt;
use reqwest::Client;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tokio::io::AsyncWriteExt;
use tokio_util::io::StreamReader;

/// Files that need to be downloaded for a `HuggingFace` model
pub(crate) const REQUIRED_FILES: &[&str] = &["config.json", "preprocessor_config.json"];

/// ONNX model files to attempt downloading
pub(crate) const ONNX_FILES: &[(&str, &str)] = &[
    ("onnx/model.onnx", "fp32"),
    ("onnx/model_fp16.onnx", "fp16"),
];

/// Name of the digest manifest written next to a downloaded model
pub const CHECKSUM_FILE: &str = "checksums.json";

const HUGGINGFACE_PREFIX: &str = "https://huggingface.co/";

/// Model downloader
#[derive(Debug)]
pub struct ModelDownloader {
    client: Client,
    cache: ModelCache,
}

impl ModelDownloader {
    /// Create a downloader that stores models in `cache`
    ///
    /// # Errors
    /// - Failed to create HTTP client
    pub fn new(cache: ModelCache) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(300))
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| BgRemovalError::network_error("Failed to create HTTP client", e))?;

        Ok(Self { client, cache })
    }

    /// Download a model repository into the cache, returning its model ID
    ///
    /// Already-cached models are not downloaded again.
    ///
    /// # Errors
    /// - Invalid or unsupported URL format
    /// - Network errors during download
    /// - File system errors during caching
    pub async fn download_model(&self, url: &str) -> Result<String> {
        validate_model_url(url)?;
        let model_id = ModelCache::url_to_model_id(url);

        if self.cache.is_model_cached(&model_id) {
            tracing::debug!(%model_id, "Model already cached");
            return Ok(model_id);
        }

        tracing::info!(%url, %model_id, "Downloading model");

        let temp_dir = tempfile::Builder::new()
            .prefix(".download-")
            .tempdir_in(self.cache.get_current_cache_dir())
            .map_err(|e| {
                BgRemovalError::file_io_error(
                    "create temp download directory",
                    self.cache.get_current_cache_dir(),
                    &e,
                )
            })?;

        let checksums = self.download_model_files(url, temp_dir.path()).await?;
        write_checksums(temp_dir.path(), &checksums)?;

        // Leftovers from an earlier incomplete download
        self.cache.clear_specific_model(&model_id)?;

        let final_dir = self.cache.get_model_path(&model_id);
        fs::rename(temp_dir.path(), &final_dir).map_err(|e| {
            BgRemovalError::file_io_error("move downloaded model to cache", &final_dir, &e)
        })?;

        tracing::info!(%model_id, files = checksums.len(), "Model downloaded");
        Ok(model_id)
    }

    /// Download all required model files, returning their digests
    async fn download_model_files(
        &self,
        base_url: &str,
        download_dir: &Path,
    ) -> Result<BTreeMap<String, String>> {
        let raw_base = format!("{}/resolve/main/", base_url.trim_end_matches('/'));
        let mut checksums = BTreeMap::new();

        for file_name in REQUIRED_FILES {
            let digest = self
                .download_file(&format!("{}{}", raw_base, file_name), &download_dir.join(file_name))
                .await?;
            checksums.insert((*file_name).to_string(), digest);
        }

        // At least one variant must succeed
        for (file_path, variant) in ONNX_FILES {
            let url = format!("{}{}", raw_base, file_path);
            match self.download_file(&url, &download_dir.join(file_path)).await {
                Ok(digest) => {
                    tracing::debug!(variant, "Downloaded model variant");
                    checksums.insert((*file_path).to_string(), digest);
                },
                Err(e) => tracing::warn!(variant, error = %e, "Failed to download model variant"),
            }
        }

        if !ONNX_FILES
            .iter()
            .any(|(file_path, _)| checksums.contains_key(*file_path))
        {
            return Err(BgRemovalError::network_error(
                format!("Failed to download any ONNX model variants from {}", base_url),
                std::io::Error::new(std::io::ErrorKind::NotFound, "No model files found"),
            ));
        }

        Ok(checksums)
    }

    /// Stream a single file to disk, returning its SHA-256 digest
    async fn download_file(&self, url: &str, local_path: &Path) -> Result<String> {
        tracing::debug!(%url, path = %local_path.display(), "Downloading file");

        if let Some(parent) = local_path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| BgRemovalError::file_io_error("create directory", parent, &e))?;
        }

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| BgRemovalError::network_error(format!("Failed to download {}", url), e))?;

        if !response.status().is_success() {
            return Err(BgRemovalError::network_error(
                format!("HTTP error {} for {}", response.status(), url),
                std::io::Error::new(std::io::ErrorKind::Other, "HTTP error"),
            ));
        }

        let total_size = response.content_length();
        let mut file = tokio::fs::File::create(local_path)
            .await
            .map_err(|e| BgRemovalError::file_io_error("create file", local_path, &e))?;

        let mut stream = StreamReader::new(
            response
                .bytes_stream()
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e)),
        );

        let mut hasher = Sha256::new();
        let mut downloaded = 0u64;
        let mut buffer = vec![0; 64 * 1024];

        loop {
            let bytes_read = tokio::io::AsyncReadExt::read(&mut stream, &mut buffer)
                .await
                .map_err(|e| BgRemovalError::network_error("Failed to read download stream", e))?;

            if bytes_read == 0 {
                break;
            }

            let chunk = buffer.get(..bytes_read).unwrap_or(&[]);
            hasher.update(chunk);
            file.write_all(chunk)
                .await
                .map_err(|e| BgRemovalError::file_io_error("write to file", local_path, &e))?;

            downloaded += bytes_read as u64;
            tracing::trace!(downloaded, total = ?total_size, "Download progress");
        }

        file.flush()
            .await
            .map_err(|e| BgRemovalError::file_io_error("flush file", local_path, &e))?;

        if let Some(total) = total_size {
            if total != downloaded {
                return Err(BgRemovalError::network_error(
                    format!("Truncated download for {}", url),
                    std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        format!("expected {} bytes, got {}", total, downloaded),
                    ),
                ));
            }
        }

        let digest = format!("{:x}", hasher.finalize());
        tracing::debug!(bytes = downloaded, sha256 = %digest, "Downloaded file");
        Ok(digest)
    }

    /// Get the model cache for other operations
    #[must_use]
    pub fn cache(&self) -> &ModelCache {
        &self.cache
    }
}

/// Hex-encoded SHA-256 digest of `bytes`
#[must_use]
pub fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Read the digest manifest of a model directory, if one was recorded
///
/// # Errors
/// - Manifest exists but cannot be read or parsed
pub fn read_checksums(model_dir: &Path) -> Result<Option<BTreeMap<String, String>>> {
    let path = model_dir.join(CHECKSUM_FILE);
    if !path.exists() {
        return Ok(None);
    }

    let content = fs::read_to_string(&path)
        .map_err(|e| BgRemovalError::file_io_error("read checksum manifest", &path, &e))?;
    serde_json::from_str(&content)
        .map(Some)
        .map_err(|e| BgRemovalError::model(format!("Failed to parse {}: {}", CHECKSUM_FILE, e)))
}

fn write_checksums(model_dir: &Path, checksums: &BTreeMap<String, String>) -> Result<()> {
    let path = model_dir.join(CHECKSUM_FILE);
    let content = serde_json::to_string_pretty(checksums)
        .map_err(|e| BgRemovalError::internal(format!("Failed to encode checksums: {}", e)))?;
    fs::write(&path, content)
        .map_err(|e| BgRemovalError::file_io_error("write checksum manifest", &path, &e))
}

/// Validate that a URL is a supported model repository
///
/// Only `https://huggingface.co/<user>/<repo>` URLs are accepted.
///
/// # Errors
/// - Empty URL, wrong host or scheme, missing repository name
pub fn validate_model_url(url: &str) -> Result<()> {
    if url.is_empty() {
        return Err(BgRemovalError::invalid_config("Model URL cannot be empty"));
    }

    let Some(repo_path) = url.strip_prefix(HUGGINGFACE_PREFIX) else {
        return Err(BgRemovalError::invalid_config(format!(
            "Unsupported URL format: {}. Only HuggingFace repositories are supported (https://huggingface.co/...)",
            url
        )));
    };

    let mut parts = repo_path.trim_end_matches('/').split('/');
    let user = parts.next().unwrap_or_default();
    let repo = parts.next().unwrap_or_default();
    if user.is_empty() || repo.is_empty() || parts.next().is_some() {
        return Err(BgRemovalError::invalid_config(format!(
            "Invalid HuggingFace repository URL: {}. Expected format: https://huggingface.co/username/repo-name",
            url
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_validate_model_url() {
        assert!(validate_model_url("https://huggingface.co/imgly/isnet-general-onnx").is_ok());
        assert!(validate_model_url("https://huggingface.co/ZhengPeng7/BiRefNet/").is_ok());

        let invalid_urls = [
            "",
            "http://huggingface.co/user/repo",
            "https://github.com/user/repo",
            "https://huggingface.co/",
            "https://huggingface.co/onlyuser",
            "https://huggingface.co/user/repo/tree/main",
            "https://subdomain.huggingface.co/user/repo",
        ];
        for url in invalid_urls {
            assert!(validate_model_url(url).is_err(), "URL should be invalid: {url}");
        }
    }

    #[test]
    fn test_validate_model_url_messages() {
        assert!(validate_model_url("")
            .unwrap_err()
            .to_string()
            .contains("cannot be empty"));
        assert!(validate_model_url("not-a-url")
            .unwrap_err()
            .to_string()
            .contains("Unsupported URL format"));
        assert!(validate_model_url("https://huggingface.co/single")
            .unwrap_err()
            .to_string()
            .contains("Invalid HuggingFace repository URL"));
    }

    #[test]
    fn test_sha256_hex() {
        assert_eq!(
            sha256_hex(b"test content"),
            "6ae8a75555209fd6c44157c0aed8016e763ff435a19cf186f76863140143ff72"
        );
    }

    #[test]
    fn test_checksum_manifest_roundtrip() {
        let temp = TempDir::new().unwrap();
        assert!(read_checksums(temp.path()).unwrap().is_none());

        let mut checksums = BTreeMap::new();
        checksums.insert("onnx/model.onnx".to_string(), sha256_hex(b"weights"));
        write_checksums(temp.path(), &checksums).unwrap();

        assert_eq!(read_checksums(temp.path()).unwrap(), Some(checksums));
    }

    #[test]
    fn test_corrupt_checksum_manifest_is_model_error() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join(CHECKSUM_FILE), "not json").unwrap();
        let err = read_checksums(temp.path()).unwrap_err();
        assert!(matches!(err, BgRemovalError::Model(_)));
    }

    #[test]
    fn test_file_constants() {
        assert!(REQUIRED_FILES.contains(&"config.json"));
        assert!(REQUIRED_FILES.contains(&"preprocessor_config.json"));
        assert!(ONNX_FILES.contains(&("onnx/model.onnx", "fp32")));
        assert!(ONNX_FILES.contains(&("onnx/model_fp16.onnx", "fp16")));
    }

    #[tokio::test]
    async fn test_cached_model_is_not_downloaded_again() {
        let temp = TempDir::new().unwrap();
        let cache = ModelCache::with_custom_cache_dir(temp.path()).unwrap();
        crate::cache::tests::write_fake_model(
            &cache.get_model_path("imgly--isnet-general-onnx"),
            &["model.onnx"],
        );

        let downloader = ModelDownloader::new(cache).unwrap();
        let model_id = downloader
            .download_model("https://huggingface.co/imgly/isnet-general-onnx")
            .await
            .unwrap();
        assert_eq!(model_id, "imgly--isnet-general-onnx");
    }

    #[tokio::test]
    async fn test_download_rejects_invalid_url_before_network() {
        let temp = TempDir::new().unwrap();
        let cache = ModelCache::with_custom_cache_dir(temp.path()).unwrap();
        let downloader = ModelDownloader::new(cache).unwrap();

        let err = downloader
            .download_model("https://example.com/model")
            .await
            .unwrap_err();
        assert!(matches!(err, BgRemovalError::InvalidConfig(_)));
    }
}
