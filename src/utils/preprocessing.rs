//! Image preprocessing for the tag classifier
//!
//! The classifier was trained on square, white-padded, channel-reversed images
//! with raw `0..=255` pixel values. Every step here changes the model output
//! numerically, so the order is fixed:
//!
//! 1. convert to 8-bit RGB (alpha is dropped, grayscale is expanded)
//! 2. scale by `target / max(width, height)` with a bicubic filter
//! 3. paste centered onto a white `target x target` canvas
//! 4. emit an `H x W x C` float tensor with channels reversed (BGR)

use crate::error::{Result, TaggerError};
use image::{imageops, DynamicImage, ImageBuffer, Rgb, RgbImage};
use ndarray::{Array3, Array4, Axis};

/// Canvas color outside the aspect-fit region
pub const PADDING_COLOR: [u8; 3] = [255, 255, 255];

/// Preprocessing for the tag classifier
pub struct ImagePreprocessor;

impl ImagePreprocessor {
    /// Decode image bytes and preprocess them
    pub fn preprocess_bytes(bytes: &[u8], target_size: u32) -> Result<Array3<f32>> {
        let image = Self::decode(bytes)?;
        Self::preprocess(&image, target_size)
    }

    /// Decode encoded image bytes
    pub fn decode(bytes: &[u8]) -> Result<DynamicImage> {
        if bytes.is_empty() {
            return Err(TaggerError::decode("image data is empty"));
        }
        image::load_from_memory(bytes).map_err(|e| TaggerError::decode(e.to_string()))
    }

    /// Transform an image into a `target_size x target_size x 3` BGR tensor
    ///
    /// No batch dimension is added; see [`Self::add_batch_dimension`].
    pub fn preprocess(image: &DynamicImage, target_size: u32) -> Result<Array3<f32>> {
        if target_size == 0 {
            return Err(TaggerError::invalid_config("target size must be non-zero"));
        }
        if image.width() == 0 || image.height() == 0 {
            return Err(TaggerError::decode("image has zero width or height"));
        }

        let canvas = Self::letterbox(&image.to_rgb8(), target_size);
        Ok(Self::canvas_to_tensor(&canvas))
    }

    /// Resize preserving aspect ratio and center on a white square canvas
    #[must_use]
    pub fn letterbox(rgb_image: &RgbImage, target_size: u32) -> RgbImage {
        let (orig_width, orig_height) = rgb_image.dimensions();
        let (new_width, new_height) = Self::fit_dimensions(orig_width, orig_height, target_size);

        let resized = imageops::resize(
            rgb_image,
            new_width,
            new_height,
            imageops::FilterType::CatmullRom,
        );

        let mut canvas = ImageBuffer::from_pixel(target_size, target_size, Rgb(PADDING_COLOR));
        let offset_x = (target_size - new_width) / 2;
        let offset_y = (target_size - new_height) / 2;
        imageops::replace(
            &mut canvas,
            &resized,
            i64::from(offset_x),
            i64::from(offset_y),
        );

        canvas
    }

    /// Aspect-fit dimensions: `floor(side * target / max(width, height))`
    #[must_use]
    pub fn fit_dimensions(width: u32, height: u32, target_size: u32) -> (u32, u32) {
        let scale = f64::from(target_size) / f64::from(width.max(height));
        let fit = |side: u32| ((f64::from(side) * scale) as u32).clamp(1, target_size);
        (fit(width), fit(height))
    }

    /// Convert canvas to an HWC float tensor with reversed channel order
    fn canvas_to_tensor(canvas: &RgbImage) -> Array3<f32> {
        let (width, height) = canvas.dimensions();
        Array3::from_shape_fn(
            (height as usize, width as usize, 3),
            |(y, x, c)| {
                let pixel = canvas.get_pixel(x as u32, y as u32);
                // Channel 0 of the output is blue
                f32::from(pixel.0.get(2 - c).copied().unwrap_or(0))
            },
        )
    }

    /// Add the leading batch axis expected by the classifier
    #[must_use]
    pub fn add_batch_dimension(tensor: Array3<f32>) -> Array4<f32> {
        tensor.insert_axis(Axis(0))
    }
}
