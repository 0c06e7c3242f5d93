//! The background removal capability
//!
//! [`BackgroundRemover`] is the seam between the stdin/stdout filter and the
//! segmentation pipeline: encoded image bytes in, PNG bytes out. The
//! process-wide default remover is built on first use from the environment.

use crate::{
    config::RemovalConfig,
    error::{BgRemovalError, Result},
    processor::BackgroundRemovalProcessor,
};
use std::sync::{Mutex, OnceLock};

/// Turns encoded image bytes into a PNG with the background made transparent
pub trait BackgroundRemover {
    /// Remove the background from an encoded image
    ///
    /// The output has the same pixel dimensions as the input; alpha is 0 for
    /// background, 255 for foreground and intermediate on soft edges.
    ///
    /// # Errors
    /// - Empty, malformed or unsupported input
    /// - Model download or loading failures
    /// - Inference errors
    fn remove(&mut self, image_bytes: &[u8]) -> Result<Vec<u8>>;
}

impl<R: BackgroundRemover + ?Sized> BackgroundRemover for &mut R {
    fn remove(&mut self, image_bytes: &[u8]) -> Result<Vec<u8>> {
        (**self).remove(image_bytes)
    }
}

static DEFAULT_REMOVER: OnceLock<Result<Mutex<BackgroundRemovalProcessor>>> = OnceLock::new();

/// Process-wide remover configured from the environment
///
/// The processor is created once; its model is loaded on the first image
/// that decodes. A configuration failure is cached and reported on every call.
///
/// # Errors
/// - Invalid environment configuration
pub fn default_remover() -> Result<&'static Mutex<BackgroundRemovalProcessor>> {
    DEFAULT_REMOVER
        .get_or_init(|| {
            RemovalConfig::from_env()
                .and_then(BackgroundRemovalProcessor::new)
                .map(Mutex::new)
        })
        .as_ref()
        .map_err(replay_init_error)
}

/// Owned copy of a cached initialization error
fn replay_init_error(err: &BgRemovalError) -> BgRemovalError {
    match err {
        BgRemovalError::InvalidConfig(message) => BgRemovalError::invalid_config(message.clone()),
        other => BgRemovalError::internal(format!("Failed to create background remover: {other}")),
    }
}

/// Remove the background using the process-wide default remover
///
/// # Errors
/// - Invalid environment configuration
/// - Any failure of [`BackgroundRemover::remove`]
pub fn remove(image_bytes: &[u8]) -> Result<Vec<u8>> {
    let remover = default_remover()?;
    let mut processor = remover
        .lock()
        .map_err(|_| BgRemovalError::internal("Background remover lock poisoned"))?;
    processor.remove(image_bytes)
}

/// [`BackgroundRemover`] backed by the process-wide default remover
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultRemover;

impl BackgroundRemover for DefaultRemover {
    fn remove(&mut self, image_bytes: &[u8]) -> Result<Vec<u8>> {
        remove(image_bytes)
    }
}
