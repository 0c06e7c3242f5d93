//! Image preprocessing for model inference
//!
//! Images are letterboxed into the model input: resized with their aspect ratio
//! preserved, centred on a padded canvas, then normalised into an NCHW tensor.
//! [`ResizeGeometry`] describes that placement so the mask can be mapped back.

use crate::{
    error::{BgRemovalError, Result},
    models::PreprocessingConfig,
};
use image::{imageops::FilterType, DynamicImage, ImageBuffer, Rgb, RgbImage};
use ndarray::Array4;

/// Placement of a resized image inside the model input canvas
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResizeGeometry {
    /// Scale factor from original to model coordinates
    pub scale: f32,
    /// Size of the resized image as `(width, height)`
    pub scaled_dimensions: (u32, u32),
    /// Offset of the resized image inside the canvas as `(x, y)`
    pub offset: (u32, u32),
    /// Canvas size as `(width, height)`
    pub canvas_dimensions: (u32, u32),
}

impl ResizeGeometry {
    /// Fit `original` (width, height) inside `canvas` (width, height)
    ///
    /// # Errors
    /// - Zero-sized original image or canvas
    pub fn fit(original: (u32, u32), canvas: (u32, u32)) -> Result<Self> {
        let (orig_width, orig_height) = original;
        let (canvas_width, canvas_height) = canvas;

        if orig_width == 0 || orig_height == 0 {
            return Err(BgRemovalError::processing_stage_error(
                "preprocessing",
                "image has zero width or height",
                Some(&format!("{}x{}", orig_width, orig_height)),
            ));
        }
        if canvas_width == 0 || canvas_height == 0 {
            return Err(BgRemovalError::invalid_config(
                "Model input size must be non-zero",
            ));
        }

        let scale = (canvas_width as f32 / orig_width as f32)
            .min(canvas_height as f32 / orig_height as f32);

        let scaled_width = ((orig_width as f32 * scale).round() as u32).clamp(1, canvas_width);
        let scaled_height = ((orig_height as f32 * scale).round() as u32).clamp(1, canvas_height);

        Ok(Self {
            scale,
            scaled_dimensions: (scaled_width, scaled_height),
            offset: (
                (canvas_width - scaled_width) / 2,
                (canvas_height - scaled_height) / 2,
            ),
            canvas_dimensions: canvas,
        })
    }

    /// Map an original pixel centre to the canvas pixel covering it
    #[must_use]
    pub fn to_canvas(&self, x: u32, y: u32) -> (u32, u32) {
        let (scaled_width, scaled_height) = self.scaled_dimensions;
        let map = |v: u32, limit: u32| -> u32 {
            let mapped = ((v as f32 + 0.5) * self.scale - 0.5).round().max(0.0) as u32;
            mapped.min(limit - 1)
        };
        (
            map(x, scaled_width) + self.offset.0,
            map(y, scaled_height) + self.offset.1,
        )
    }
}

/// Padding colour of the letterbox canvas
const PADDING_COLOR: Rgb<u8> = Rgb([255, 255, 255]);

/// Image preprocessing utilities
pub struct ImagePreprocessor;

impl ImagePreprocessor {
    /// Preprocess an image into the model input tensor
    ///
    /// Converts to RGB, resizes with aspect ratio preserved (bilinear), pads
    /// with white to the model input size and normalises each channel as
    /// `(value / 255 - mean) / std`.
    ///
    /// # Errors
    /// - Zero-sized image or model input
    pub fn preprocess_for_inference(
        image: &DynamicImage,
        preprocessing_config: &PreprocessingConfig,
    ) -> Result<(Array4<f32>, ResizeGeometry)> {
        let [target_height, target_width] = preprocessing_config.target_size;
        let rgb_image = image.to_rgb8();
        let geometry =
            ResizeGeometry::fit(rgb_image.dimensions(), (target_width, target_height))?;

        let (scaled_width, scaled_height) = geometry.scaled_dimensions;
        let resized = image::imageops::resize(
            &rgb_image,
            scaled_width,
            scaled_height,
            FilterType::Triangle,
        );

        let mut canvas: RgbImage = ImageBuffer::from_pixel(target_width, target_height, PADDING_COLOR);
        image::imageops::replace(
            &mut canvas,
            &resized,
            i64::from(geometry.offset.0),
            i64::from(geometry.offset.1),
        );

        Ok((Self::canvas_to_tensor(&canvas, preprocessing_config), geometry))
    }

    /// Convert the padded canvas to a normalised NCHW tensor
    fn canvas_to_tensor(canvas: &RgbImage, config: &PreprocessingConfig) -> Array4<f32> {
        let (width, height) = canvas.dimensions();
        let mut tensor = Array4::<f32>::zeros((1, 3, height as usize, width as usize));

        for (x, y, pixel) in canvas.enumerate_pixels() {
            for channel in 0..3 {
                let value = (f32::from(pixel[channel]) / 255.0
                    - config.normalization_mean[channel])
                    / config.normalization_std[channel];
                tensor[[0, channel, y as usize, x as usize]] = value;
            }
        }

        tensor
    }
}
