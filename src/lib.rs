#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::uninlined_format_args)]

//! # Background Removal Filter
//!
//! A pipeline filter that reads one encoded image on stdin, removes its
//! background with an `ISNet` segmentation model and writes a PNG with a
//! transparent background to stdout.
//!
//! ```text
//! remove-bg < input.jpg > output.png
//! ```
//!
//! On empty input or any removal failure the filter prints a single
//! `Error: <message>` line on stderr, writes nothing to stdout and exits with
//! status 1.
//!
//! ## Features
//!
//! - **Pure Rust inference**: Tract backend, enabled by default
//! - **ONNX Runtime**: optional `onnx` feature with CUDA and `CoreML` providers
//! - **Model Management**: automatic download and caching from `HuggingFace`
//! - **Format Support**: JPEG, PNG, BMP, TIFF, GIF and WebP (`webp-support`)
//!
//! ## Library Usage
//!
//! The filter talks to the model only through [`BackgroundRemover`]:
//!
//! ```rust,no_run
//! use bgremove_filter::{filter, BackgroundRemovalProcessor, RemovalConfig};
//!
//! # fn example() -> bgremove_filter::Result<()> {
//! let config = RemovalConfig::from_env()?;
//! let processor = BackgroundRemovalProcessor::new(config)?;
//!
//! let input = std::fs::File::open("input.jpg")?;
//! let output = std::fs::File::create("output.png")?;
//! let status = filter::run_with(input, output, std::io::stderr(), processor);
//! assert_eq!(status, filter::FilterStatus::Success);
//! # Ok(())
//! # }
//! ```
//!
//! ### Feature Flags
//!
//! - `tract` (default): pure Rust backend
//! - `onnx`: ONNX Runtime backend with hardware acceleration
//! - `cli` (default): command-line parsing and tracing subscriber
//! - `tracing-json`: JSON formatted diagnostics
//! - `webp-support` (default): WebP input decoding
//!
//! ## Environment
//!
//! | Variable | Meaning |
//! |---|---|
//! | `BGREMOVE_CACHE_DIR` | model cache root |
//! | `BGREMOVE_MODEL_URL` | `HuggingFace` repository of the model |
//! | `BGREMOVE_BACKEND` | `tract` or `onnx` |
//! | `BGREMOVE_VARIANT` | `fp32` or `fp16` |
//! | `BGREMOVE_OFFLINE` | never download when `1` or `true` |
//! | `RUST_LOG` | tracing filter, logging is off when unset |
//! | `BGREMOVE_LOG_FORMAT` | `compact` or `json` (`tracing-json` feature) |

pub mod backends;
pub mod cache;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod download;
pub mod error;
pub mod filter;
pub mod inference;
pub mod models;
pub mod processor;
pub mod remover;
#[cfg(feature = "cli")]
pub mod tracing_config;
pub mod types;
pub mod utils;

// Public API exports
#[cfg(feature = "onnx")]
pub use backends::OnnxBackend;
#[cfg(feature = "tract")]
pub use backends::TractBackend;
pub use cache::{CachedModelInfo, ModelCache};
pub use config::{BackendType, ExecutionProvider, RemovalConfig, RemovalConfigBuilder};
pub use download::{validate_model_url, ModelDownloader};
pub use error::{BgRemovalError, Result};
pub use filter::{FilterError, FilterStatus};
pub use inference::InferenceBackend;
pub use models::{ModelInfo, ModelManager, PreprocessingConfig};
pub use processor::{BackendFactory, BackgroundRemovalProcessor, BoxedBackend, DefaultBackendFactory};
pub use remover::{remove, BackgroundRemover, DefaultRemover};
pub use types::{ProcessingTimings, RemovalResult, SegmentationMask};
pub use utils::{ImagePreprocessor, ResizeGeometry};

#[cfg(feature = "cli")]
pub use tracing_config::{TracingConfig, TracingFormat};
