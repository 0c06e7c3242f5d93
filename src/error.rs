//! Errors of the background removal capability
//!
//! The `Display` text of every variant starts with its kind, followed by the
//! detailed cause. The filter prints it verbatim after `Error: `.

use std::path::Path;
use thiserror::Error;

/// Result type alias for background removal operations
pub type Result<T> = std::result::Result<T, BgRemovalError>;

/// Failures of the background removal capability
#[derive(Error, Debug)]
pub enum BgRemovalError {
    /// File system failures, mostly in the model cache
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Input could not be decoded or the result could not be encoded
    #[error("Image processing error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Inference error: {0}")]
    Inference(String),

    /// Bad environment value or builder parameter
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Input bytes are not a supported raster encoding
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// Model missing, unreadable or with invalid metadata
    #[error("Model error: {0}")]
    Model(String),

    /// Model download failed
    #[error("Network error: {context}: {source}")]
    Network {
        context: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Tensor or mask post-processing failed
    #[error("Processing error: {0}")]
    Processing(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl BgRemovalError {
    pub fn invalid_config<S: Into<String>>(msg: S) -> Self {
        Self::InvalidConfig(msg.into())
    }

    pub fn unsupported_format<S: Into<String>>(detail: S) -> Self {
        Self::UnsupportedFormat(detail.into())
    }

    pub fn model<S: Into<String>>(msg: S) -> Self {
        Self::Model(msg.into())
    }

    pub fn processing<S: Into<String>>(msg: S) -> Self {
        Self::Processing(msg.into())
    }

    pub fn inference<S: Into<String>>(msg: S) -> Self {
        Self::Inference(msg.into())
    }

    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Internal(msg.into())
    }

    /// Wrap a transport failure, keeping it as the error source
    pub fn network_error<S, E>(context: S, source: E) -> Self
    where
        S: Into<String>,
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Network {
            context: context.into(),
            source: Box::new(source),
        }
    }

    /// I/O error naming the failed operation and path, e.g.
    /// `Failed to read model file '/cache/model.onnx': permission denied`
    pub fn file_io_error<P: AsRef<Path>>(operation: &str, path: P, error: &std::io::Error) -> Self {
        let message = format!(
            "Failed to {} '{}': {}",
            operation,
            path.as_ref().display(),
            error
        );
        Self::Io(std::io::Error::new(error.kind(), message))
    }

    /// Processing error tagged with the pipeline stage and optional input description
    pub fn processing_stage_error(stage: &str, details: &str, input_info: Option<&str>) -> Self {
        let message = match input_info {
            Some(info) => format!("{} failed (input: {}): {}", stage, info, details),
            None => format!("{} failed: {}", stage, details),
        };
        Self::Processing(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = BgRemovalError::invalid_config("test config error");
        assert!(matches!(err, BgRemovalError::InvalidConfig(_)));

        let err = BgRemovalError::unsupported_format("TGA");
        assert!(matches!(err, BgRemovalError::UnsupportedFormat(_)));
    }

    #[test]
    fn test_error_display() {
        let err = BgRemovalError::invalid_config("Unknown backend 'cuda'");
        assert_eq!(
            err.to_string(),
            "Invalid configuration: Unknown backend 'cuda'"
        );

        let err = BgRemovalError::model("missing onnx directory");
        assert_eq!(err.to_string(), "Model error: missing onnx directory");
    }

    #[test]
    fn test_network_error_keeps_source() {
        let io = std::io::Error::new(std::io::ErrorKind::TimedOut, "timed out");
        let err = BgRemovalError::network_error("Failed to download config.json", io);

        let msg = err.to_string();
        assert!(msg.starts_with("Network error: Failed to download config.json"));
        assert!(msg.contains("timed out"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_file_io_error_context() {
        let io_error = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "access denied");
        let err = BgRemovalError::file_io_error(
            "read cached model file",
            Path::new("/cache/models/model.onnx"),
            &io_error,
        );

        let msg = err.to_string();
        assert!(msg.contains("read cached model file"));
        assert!(msg.contains("/cache/models/model.onnx"));
        assert!(msg.contains("access denied"));
    }

    #[test]
    fn test_processing_stage_error() {
        let err = BgRemovalError::processing_stage_error(
            "preprocessing",
            "invalid tensor shape",
            Some("1920x1080 RGB"),
        );
        let msg = err.to_string();
        assert!(msg.contains("preprocessing"));
        assert!(msg.contains("1920x1080 RGB"));
        assert!(msg.contains("invalid tensor shape"));
    }
}
