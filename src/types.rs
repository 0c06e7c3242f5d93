//! Core types for background removal operations

use crate::error::{BgRemovalError, Result};
use image::{ImageBuffer, Luma, RgbaImage};
use serde::{Deserialize, Serialize};

/// Result of a background removal operation
#[derive(Debug, Clone)]
pub struct RemovalResult {
    /// The processed image with background removed
    pub image: RgbaImage,

    /// The segmentation mask used for removal
    pub mask: SegmentationMask,

    /// Original image dimensions
    pub original_dimensions: (u32, u32),

    /// Per-stage timings
    pub timings: ProcessingTimings,
}

impl RemovalResult {
    /// Create a new removal result
    #[must_use]
    pub fn new(
        image: RgbaImage,
        mask: SegmentationMask,
        original_dimensions: (u32, u32),
        timings: ProcessingTimings,
    ) -> Self {
        Self {
            image,
            mask,
            original_dimensions,
            timings,
        }
    }

    /// Encode the image as PNG
    ///
    /// # Errors
    /// - PNG encoding failure
    pub fn to_png_bytes(&self) -> Result<Vec<u8>> {
        let mut buffer = Vec::new();
        self.image
            .write_to(&mut std::io::Cursor::new(&mut buffer), image::ImageFormat::Png)?;
        Ok(buffer)
    }

    /// Get image dimensions
    #[must_use]
    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    /// One-line timing breakdown for logs
    #[must_use]
    pub fn timing_summary(&self) -> String {
        let t = &self.timings;
        format!(
            "Total: {}ms | Decode: {}ms | Model load: {}ms | Preprocess: {}ms | Inference: {}ms | Postprocess: {}ms | Encode: {}ms",
            t.total_ms,
            t.decode_ms,
            t.model_load_ms,
            t.preprocessing_ms,
            t.inference_ms,
            t.postprocessing_ms,
            t.encode_ms
        )
    }
}

/// Alpha mask with one value per source pixel, row-major
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentationMask {
    /// Mask data as grayscale values (0-255)
    pub data: Vec<u8>,

    /// Mask dimensions (width, height)
    pub dimensions: (u32, u32),
}

impl SegmentationMask {
    /// Create a new segmentation mask
    #[must_use]
    pub fn new(data: Vec<u8>, dimensions: (u32, u32)) -> Self {
        Self { data, dimensions }
    }

    /// Convert mask to a grayscale image
    ///
    /// # Errors
    /// - Data length does not match the dimensions
    pub fn to_image(&self) -> Result<ImageBuffer<Luma<u8>, Vec<u8>>> {
        let (width, height) = self.dimensions;
        ImageBuffer::from_raw(width, height, self.data.clone())
            .ok_or_else(|| BgRemovalError::processing("Failed to create image from mask data"))
    }

    /// Scale the alpha channel of `image` by the mask
    ///
    /// Existing transparency is kept: the result alpha is the input alpha
    /// times the mask value. Fully transparent pixels are cleared to
    /// transparent black.
    ///
    /// # Errors
    /// - Image and mask dimensions differ
    pub fn apply_to_image(&self, image: &mut RgbaImage) -> Result<()> {
        if image.dimensions() != self.dimensions
            || self.data.len() != image.pixels().len()
        {
            return Err(BgRemovalError::processing(format!(
                "Image and mask dimensions do not match: {:?} vs {:?}",
                image.dimensions(),
                self.dimensions
            )));
        }

        for (pixel, &mask_value) in image.pixels_mut().zip(&self.data) {
            let alpha = scale_alpha(pixel[3], mask_value);
            *pixel = if alpha == 0 {
                image::Rgba([0, 0, 0, 0])
            } else {
                image::Rgba([pixel[0], pixel[1], pixel[2], alpha])
            };
        }

        Ok(())
    }

    /// Fraction of pixels with alpha above one half
    #[must_use]
    pub fn foreground_ratio(&self) -> f32 {
        if self.data.is_empty() {
            return 0.0;
        }
        let foreground = self.data.iter().filter(|&&a| a > 127).count();
        foreground as f32 / self.data.len() as f32
    }
}

/// `alpha * mask / 255`, rounded
fn scale_alpha(alpha: u8, mask_value: u8) -> u8 {
    ((u16::from(alpha) * u16::from(mask_value) + 127) / 255) as u8
}

/// Timing of each processing stage in milliseconds
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingTimings {
    /// Image decoding from bytes
    pub decode_ms: u64,

    /// Model loading (first call only)
    pub model_load_ms: u64,

    /// Resize, padding and tensor conversion
    pub preprocessing_ms: u64,

    /// Backend inference
    pub inference_ms: u64,

    /// Mask generation and alpha application
    pub postprocessing_ms: u64,

    /// PNG encoding
    pub encode_ms: u64,

    /// Total end-to-end processing time
    pub total_ms: u64,
}
