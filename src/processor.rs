//! Background removal processor
//!
//! [`BackgroundRemovalProcessor`] runs the whole pipeline for one image:
//! decode, preprocess, inference, mask generation, alpha application and PNG
//! encoding. The inference backend is created and initialized lazily, after
//! the first input has decoded successfully.

use crate::{
    config::{BackendType, RemovalConfig},
    error::{BgRemovalError, Result},
    inference::InferenceBackend,
    remover::BackgroundRemover,
    types::{ProcessingTimings, RemovalResult, SegmentationMask},
    utils::{ImagePreprocessor, ResizeGeometry},
};
use image::{
    metadata::Orientation, DynamicImage, GenericImageView, ImageDecoder, ImageReader, RgbaImage,
};
use instant::Instant;
use ndarray::Array4;
use std::io::Cursor;
use tracing::{debug, info, instrument, span, Level};

/// Inference backend that can be moved into the process-wide remover
pub type BoxedBackend = Box<dyn InferenceBackend + Send>;

/// Factory trait for creating inference backends
pub trait BackendFactory: Send + Sync {
    /// Create an uninitialized backend of the specified type
    ///
    /// # Errors
    /// - Backend type not compiled into this build
    fn create_backend(&self, backend_type: BackendType) -> Result<BoxedBackend>;

    /// List available backend types
    fn available_backends(&self) -> Vec<BackendType>;
}

/// Backend factory for the backends enabled at compile time
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultBackendFactory;

impl BackendFactory for DefaultBackendFactory {
    fn create_backend(&self, backend_type: BackendType) -> Result<BoxedBackend> {
        match backend_type {
            #[cfg(feature = "tract")]
            BackendType::Tract => Ok(Box::new(crate::backends::TractBackend::new())),
            #[cfg(feature = "onnx")]
            BackendType::Onnx => Ok(Box::new(crate::backends::OnnxBackend::new())),
            #[allow(unreachable_patterns)]
            other => Err(BgRemovalError::invalid_config(format!(
                "Backend '{}' is not available in this build (enable the '{}' feature)",
                other, other
            ))),
        }
    }

    fn available_backends(&self) -> Vec<BackendType> {
        let mut backends = Vec::new();
        #[cfg(feature = "tract")]
        backends.push(BackendType::Tract);
        #[cfg(feature = "onnx")]
        backends.push(BackendType::Onnx);
        backends
    }
}

/// Background removal processor
pub struct BackgroundRemovalProcessor {
    config: RemovalConfig,
    backend_factory: Box<dyn BackendFactory>,
    backend: Option<BoxedBackend>,
    pending_model_load_ms: u64,
}

impl std::fmt::Debug for BackgroundRemovalProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackgroundRemovalProcessor")
            .field("config", &self.config)
            .field("initialized", &self.is_initialized())
            .finish_non_exhaustive()
    }
}

impl BackgroundRemovalProcessor {
    /// Create a processor with the default backend factory
    ///
    /// # Errors
    /// - Invalid configuration
    pub fn new(config: RemovalConfig) -> Result<Self> {
        Self::with_factory(config, Box::new(DefaultBackendFactory))
    }

    /// Create a processor with a custom backend factory
    ///
    /// # Errors
    /// - Invalid configuration
    pub fn with_factory(
        config: RemovalConfig,
        backend_factory: Box<dyn BackendFactory>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            backend_factory,
            backend: None,
            pending_model_load_ms: 0,
        })
    }

    /// Create and initialize the inference backend if not done yet
    ///
    /// A failed initialization leaves the processor uninitialized, so the next
    /// call tries again.
    ///
    /// # Errors
    /// - Backend unavailable in this build
    /// - Model download or loading failures
    pub fn initialize(&mut self) -> Result<()> {
        if self.backend.is_some() {
            return Ok(());
        }

        info!(
            backend = %self.config.backend_type,
            model_url = %self.config.model_url,
            "Initializing background removal processor"
        );

        let mut backend = self
            .backend_factory
            .create_backend(self.config.backend_type)?;
        let model_load_time = backend.initialize(&self.config)?;
        self.pending_model_load_ms =
            model_load_time.map_or(0, |duration| duration.as_millis() as u64);

        if let Ok(model_info) = backend.get_model_info() {
            debug!(
                model = %model_info.name,
                input_shape = ?model_info.input_shape,
                "Model ready"
            );
        }

        self.backend = Some(backend);
        Ok(())
    }

    /// Decode image bytes and remove the background
    ///
    /// The image format is detected from the content.
    ///
    /// # Errors
    /// - Empty or undecodable input
    /// - Model initialization or inference errors
    pub fn process_bytes(&mut self, image_bytes: &[u8]) -> Result<RemovalResult> {
        let decode_start = Instant::now();
        let image = Self::decode(image_bytes)?;
        let decode_ms = decode_start.elapsed().as_millis() as u64;

        let mut result = self.process_image(&image)?;
        result.timings.decode_ms = decode_ms;
        result.timings.total_ms += decode_ms;
        Ok(result)
    }

    fn decode(image_bytes: &[u8]) -> Result<DynamicImage> {
        if image_bytes.is_empty() {
            return Err(BgRemovalError::unsupported_format("input contains no image data"));
        }

        let reader = ImageReader::new(Cursor::new(image_bytes)).with_guessed_format()?;
        let format = reader.format().ok_or_else(|| {
            BgRemovalError::unsupported_format(
                "unrecognized image data (expected JPEG, PNG, BMP, TIFF, GIF or WebP)",
            )
        })?;
        debug!(?format, bytes = image_bytes.len(), "Decoding input image");

        let mut decoder = reader.into_decoder()?;
        let orientation = decoder.orientation().unwrap_or_else(|e| {
            debug!(error = %e, "Unreadable orientation metadata, keeping pixel order");
            Orientation::NoTransforms
        });

        let mut image = DynamicImage::from_decoder(decoder)?;
        if orientation != Orientation::NoTransforms {
            debug!(?orientation, "Applying EXIF orientation");
            image.apply_orientation(orientation);
        }
        Ok(image)
    }

    /// Remove the background from a decoded image
    ///
    /// # Errors
    /// - Model initialization failures
    /// - Image preprocessing failures
    /// - Inference execution errors
    /// - Mask generation and application errors
    #[instrument(
        skip(self, image),
        fields(
            backend = %self.config.backend_type,
            dimensions = %format!("{}x{}", image.width(), image.height())
        )
    )]
    pub fn process_image(&mut self, image: &DynamicImage) -> Result<RemovalResult> {
        let total_start = Instant::now();
        self.initialize()?;

        let mut timings = ProcessingTimings {
            model_load_ms: std::mem::take(&mut self.pending_model_load_ms),
            ..ProcessingTimings::default()
        };
        let original_dimensions = image.dimensions();

        let backend = self
            .backend
            .as_mut()
            .ok_or_else(|| BgRemovalError::internal("Backend not initialized"))?;

        let (input_tensor, geometry) = {
            let _span = span!(
                Level::DEBUG,
                "preprocessing",
                original_width = %original_dimensions.0,
                original_height = %original_dimensions.1
            )
            .entered();
            let preprocess_start = Instant::now();
            let preprocessing_config = backend.get_preprocessing_config()?;
            let preprocessed =
                ImagePreprocessor::preprocess_for_inference(image, &preprocessing_config)?;
            timings.preprocessing_ms = preprocess_start.elapsed().as_millis() as u64;
            preprocessed
        };

        let output_tensor = {
            let _span = span!(Level::INFO, "inference", backend = %self.config.backend_type)
                .entered();
            let inference_start = Instant::now();
            let output = backend.infer(&input_tensor)?;
            timings.inference_ms = inference_start.elapsed().as_millis() as u64;
            output
        };

        let (mask, result_image) = {
            let _span = span!(
                Level::DEBUG,
                "background_removal",
                width = %original_dimensions.0,
                height = %original_dimensions.1
            )
            .entered();
            let postprocess_start = Instant::now();
            let mask = Self::tensor_to_mask(&output_tensor, &geometry, original_dimensions)?;
            let result_image = Self::apply_background_removal(image, &mask)?;
            timings.postprocessing_ms = postprocess_start.elapsed().as_millis() as u64;
            (mask, result_image)
        };

        timings.total_ms = total_start.elapsed().as_millis() as u64;
        debug!(
            foreground_ratio = mask.foreground_ratio(),
            total_ms = timings.total_ms,
            "Background removed"
        );

        Ok(RemovalResult::new(
            result_image,
            mask,
            original_dimensions,
            timings,
        ))
    }

    /// Get the current configuration
    #[must_use]
    pub fn config(&self) -> &RemovalConfig {
        &self.config
    }

    /// Check if the backend has been initialized
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.backend.is_some()
    }

    /// Get available backends from the factory
    #[must_use]
    pub fn available_backends(&self) -> Vec<BackendType> {
        self.backend_factory.available_backends()
    }

    /// Convert the model output to a mask over the original image
    ///
    /// Each original pixel samples the model output at the position it was
    /// letterboxed to during preprocessing.
    fn tensor_to_mask(
        tensor: &Array4<f32>,
        geometry: &ResizeGeometry,
        original_dimensions: (u32, u32),
    ) -> Result<SegmentationMask> {
        let (batch, channels, mask_height, mask_width) = tensor.dim();
        if batch != 1 || channels != 1 || mask_height == 0 || mask_width == 0 {
            return Err(BgRemovalError::processing(format!(
                "Invalid output tensor shape: {:?}",
                tensor.shape()
            )));
        }

        let output_dimensions = (mask_width as u32, mask_height as u32);
        let geometry = if geometry.canvas_dimensions == output_dimensions {
            *geometry
        } else {
            debug!(?output_dimensions, "Model output differs from input size");
            ResizeGeometry::fit(original_dimensions, output_dimensions)?
        };

        let (orig_width, orig_height) = original_dimensions;
        let mut mask_data = Vec::with_capacity(orig_width as usize * orig_height as usize);

        for y in 0..orig_height {
            for x in 0..orig_width {
                let (tensor_x, tensor_y) = geometry.to_canvas(x, y);
                let value = tensor
                    .get([0, 0, tensor_y as usize, tensor_x as usize])
                    .copied()
                    .unwrap_or(0.0);
                let value = if value.is_nan() { 0.0 } else { value };
                mask_data.push((value.clamp(0.0, 1.0) * 255.0).round() as u8);
            }
        }

        Ok(SegmentationMask::new(mask_data, original_dimensions))
    }

    /// Scale the image's own alpha channel by the mask
    fn apply_background_removal(
        image: &DynamicImage,
        mask: &SegmentationMask,
    ) -> Result<RgbaImage> {
        let mut rgba_image = image.to_rgba8();
        mask.apply_to_image(&mut rgba_image)?;
        Ok(rgba_image)
    }
}

impl BackgroundRemover for BackgroundRemovalProcessor {
    fn remove(&mut self, image_bytes: &[u8]) -> Result<Vec<u8>> {
        let mut result = self.process_bytes(image_bytes)?;

        let encode_start = Instant::now();
        let png = result.to_png_bytes()?;
        result.timings.encode_ms = encode_start.elapsed().as_millis() as u64;
        result.timings.total_ms += result.timings.encode_ms;

        info!(
            width = result.original_dimensions.0,
            height = result.original_dimensions.1,
            output_bytes = png.len(),
            timings = %result.timing_summary(),
            "Background removal completed"
        );

        Ok(png)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::test_utils::MockBackend;
    use image::{Rgb, RgbImage, Rgba};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Factory handing out mock backends and counting how many it created
    struct MockFactory {
        created: Arc<AtomicUsize>,
        template: MockBackend,
    }

    impl MockFactory {
        fn boxed(template: MockBackend) -> (Box<dyn BackendFactory>, Arc<AtomicUsize>) {
            let created = Arc::new(AtomicUsize::new(0));
            let factory = Self {
                created: Arc::clone(&created),
                template,
            };
            (Box::new(factory), created)
        }
    }

    impl BackendFactory for MockFactory {
        fn create_backend(&self, _backend_type: BackendType) -> Result<BoxedBackend> {
            self.created.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(self.template.clone()))
        }

        fn available_backends(&self) -> Vec<BackendType> {
            vec![BackendType::Tract]
        }
    }

    fn processor_with(template: MockBackend) -> (BackgroundRemovalProcessor, Arc<AtomicUsize>) {
        let (factory, created) = MockFactory::boxed(template);
        let processor =
            BackgroundRemovalProcessor::with_factory(RemovalConfig::default(), factory).unwrap();
        (processor, created)
    }

    fn encoded_image(width: u32, height: u32, format: image::ImageFormat) -> Vec<u8> {
        let image = RgbImage::from_pixel(width, height, Rgb([200, 30, 30]));
        let mut bytes = Vec::new();
        DynamicImage::ImageRgb8(image)
            .write_to(&mut Cursor::new(&mut bytes), format)
            .unwrap();
        bytes
    }

    #[test]
    fn test_remove_produces_png_with_same_dimensions() {
        let (mut processor, _) = processor_with(MockBackend::with_target_size(32));
        let input = encoded_image(40, 20, image::ImageFormat::Jpeg);

        let png = processor.remove(&input).unwrap();
        assert_eq!(image::guess_format(&png).unwrap(), image::ImageFormat::Png);

        let output = image::load_from_memory(&png).unwrap().to_rgba8();
        assert_eq!(output.dimensions(), (40, 20));

        // Circle in the middle is kept, corners are removed
        assert!(output.get_pixel(20, 10)[3] > 200);
        assert_eq!(output.get_pixel(0, 0), &Rgba([0, 0, 0, 0]));
        assert_eq!(output.get_pixel(39, 19)[3], 0);
    }

    #[test]
    fn test_garbage_input_fails_before_backend_creation() {
        let (mut processor, created) = processor_with(MockBackend::with_target_size(8));

        let err = processor.remove(b"definitely not an image").unwrap_err();
        assert!(matches!(err, BgRemovalError::UnsupportedFormat(_)));
        assert_eq!(created.load(Ordering::SeqCst), 0);
        assert!(!processor.is_initialized());
    }

    #[test]
    fn test_truncated_image_is_decode_error() {
        let (mut processor, created) = processor_with(MockBackend::with_target_size(8));
        let mut input = encoded_image(16, 16, image::ImageFormat::Png);
        input.truncate(input.len() / 2);

        let err = processor.remove(&input).unwrap_err();
        assert!(matches!(err, BgRemovalError::Image(_)));
        assert_eq!(created.load(Ordering::SeqCst), 0);
    }

    /// Insert an Exif APP1 segment with the given orientation after the JFIF header
    fn with_exif_orientation(jpeg: &[u8], orientation: u8) -> Vec<u8> {
        let mut app1 = vec![0xFF, 0xE1, 0x00, 0x22];
        app1.extend_from_slice(b"Exif\0\0");
        app1.extend_from_slice(&[0x4D, 0x4D, 0x00, 0x2A, 0x00, 0x00, 0x00, 0x08]);
        app1.extend_from_slice(&[0x00, 0x01]);
        app1.extend_from_slice(&[0x01, 0x12, 0x00, 0x03, 0x00, 0x00, 0x00, 0x01]);
        app1.extend_from_slice(&[0x00, orientation, 0x00, 0x00]);
        app1.extend_from_slice(&[0x00, 0x00, 0x00, 0x00]);

        let app0_len = usize::from(u16::from_be_bytes([jpeg[4], jpeg[5]]));
        let insert_at = 4 + app0_len;
        let mut tagged = jpeg[..insert_at].to_vec();
        tagged.extend_from_slice(&app1);
        tagged.extend_from_slice(&jpeg[insert_at..]);
        tagged
    }

    #[test]
    fn test_exif_orientation_is_applied() {
        let (mut processor, _) = processor_with(MockBackend::with_target_size(32));
        let input = with_exif_orientation(&encoded_image(40, 20, image::ImageFormat::Jpeg), 6);

        let png = processor.remove(&input).unwrap();
        let output = image::load_from_memory(&png).unwrap();
        assert_eq!((output.width(), output.height()), (20, 40));
    }

    #[test]
    fn test_transparent_input_stays_transparent() {
        let (mut processor, _) = processor_with(MockBackend::with_target_size(32));
        let mut input = Vec::new();
        DynamicImage::ImageRgba8(RgbaImage::from_pixel(40, 40, Rgba([255, 0, 0, 0])))
            .write_to(&mut Cursor::new(&mut input), image::ImageFormat::Png)
            .unwrap();

        let png = processor.remove(&input).unwrap();
        let output = image::load_from_memory(&png).unwrap().to_rgba8();

        // Centre is foreground for the mock model but was already invisible
        assert_eq!(output.get_pixel(20, 20), &Rgba([0, 0, 0, 0]));
        assert!(output.pixels().all(|p| p[3] == 0));
    }

    #[cfg(feature = "webp-support")]
    #[test]
    fn test_webp_input_is_decoded() {
        let (mut processor, _) = processor_with(MockBackend::with_target_size(16));
        let input = encoded_image(24, 12, image::ImageFormat::WebP);

        let png = processor.remove(&input).unwrap();
        let output = image::load_from_memory(&png).unwrap();
        assert_eq!((output.width(), output.height()), (24, 12));
    }

    #[test]
    fn test_empty_input_is_rejected() {
        let (mut processor, _) = processor_with(MockBackend::with_target_size(8));
        assert!(matches!(
            processor.remove(&[]).unwrap_err(),
            BgRemovalError::UnsupportedFormat(_)
        ));
    }

    #[test]
    fn test_backend_is_created_once() {
        let (mut processor, created) = processor_with(MockBackend::with_target_size(16));
        let input = encoded_image(8, 8, image::ImageFormat::Png);

        processor.remove(&input).unwrap();
        processor.remove(&input).unwrap();

        assert_eq!(created.load(Ordering::SeqCst), 1);
        assert!(processor.is_initialized());
    }

    #[test]
    fn test_model_load_time_reported_once() {
        let (mut processor, _) = processor_with(MockBackend::with_target_size(16));
        let input = encoded_image(8, 8, image::ImageFormat::Png);

        let first = processor.process_bytes(&input).unwrap();
        let second = processor.process_bytes(&input).unwrap();
        assert_eq!(first.timings.model_load_ms, 1);
        assert_eq!(second.timings.model_load_ms, 0);
    }

    #[test]
    fn test_initialization_failure_is_retried() {
        let (mut processor, created) = processor_with(MockBackend::new_failing_init());
        let input = encoded_image(8, 8, image::ImageFormat::Png);

        let err = processor.remove(&input).unwrap_err();
        assert!(matches!(err, BgRemovalError::Model(_)));
        assert!(!processor.is_initialized());

        assert!(processor.remove(&input).is_err());
        assert_eq!(created.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_inference_failure_propagates() {
        let (mut processor, _) = processor_with(MockBackend::new_failing_inference());
        let input = encoded_image(8, 8, image::ImageFormat::Png);

        let err = processor.remove(&input).unwrap_err();
        assert_eq!(err.to_string(), "Inference error: Mock inference failure");
    }

    #[test]
    fn test_tensor_to_mask_rejects_bad_shape() {
        let geometry = ResizeGeometry::fit((4, 4), (4, 4)).unwrap();
        let tensor = Array4::<f32>::zeros((1, 3, 4, 4));
        assert!(BackgroundRemovalProcessor::tensor_to_mask(&tensor, &geometry, (4, 4)).is_err());
    }

    #[test]
    fn test_tensor_to_mask_maps_through_letterbox() {
        // 4x2 image letterboxed into 4x4: rows 1..3 hold the image
        let geometry = ResizeGeometry::fit((4, 2), (4, 4)).unwrap();
        let mut tensor = Array4::<f32>::zeros((1, 1, 4, 4));
        for x in 0..4 {
            tensor[[0, 0, 1, x]] = 1.0;
            tensor[[0, 0, 2, x]] = 0.5;
        }

        let mask = BackgroundRemovalProcessor::tensor_to_mask(&tensor, &geometry, (4, 2)).unwrap();
        assert_eq!(mask.dimensions, (4, 2));
        assert_eq!(mask.data, vec![255, 255, 255, 255, 128, 128, 128, 128]);
    }

    #[test]
    fn test_tensor_to_mask_handles_other_output_size() {
        let geometry = ResizeGeometry::fit((2, 2), (8, 8)).unwrap();
        let tensor = Array4::<f32>::from_elem((1, 1, 4, 4), 2.0);

        let mask = BackgroundRemovalProcessor::tensor_to_mask(&tensor, &geometry, (2, 2)).unwrap();
        assert_eq!(mask.data, vec![255; 4]);
    }

    #[test]
    fn test_default_factory_lists_compiled_backends() {
        let factory = DefaultBackendFactory;
        let backends = factory.available_backends();
        assert_eq!(backends.contains(&BackendType::Tract), cfg!(feature = "tract"));
        assert_eq!(backends.contains(&BackendType::Onnx), cfg!(feature = "onnx"));
    }

    #[test]
    fn test_invalid_config_rejected_at_construction() {
        let config = RemovalConfig {
            model_url: "https://example.com/model".to_string(),
            ..RemovalConfig::default()
        };
        assert!(BackgroundRemovalProcessor::new(config).is_err());
    }
}
