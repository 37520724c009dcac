//! Background removal with a salient-object segmentation model
//!
//! The remover owns one segmentation session created at bootstrap. Every
//! request stretches the image to the model's square input, runs one forward
//! pass and turns channel 0 of the output into the alpha channel of the
//! original-resolution image.

use crate::error::{Result, TaggerError};
use crate::inference::SegmentationBackend;
use image::{
    imageops::FilterType, DynamicImage, GrayImage, ImageBuffer, ImageDecoder, ImageFormat,
    ImageReader, ImageResult, Rgba, RgbaImage,
};
use ndarray::Array4;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Cursor;
use std::str::FromStr;
use std::time::Instant;

const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Registered segmentation models
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SegmentationModel {
    /// General purpose IS-Net, 1024px input
    #[default]
    #[serde(rename = "isnet-general-use")]
    IsnetGeneralUse,
    #[serde(rename = "u2net")]
    U2net,
    /// Lightweight U^2-Net
    #[serde(rename = "u2netp")]
    U2netp,
    #[serde(rename = "silueta")]
    Silueta,
}

impl SegmentationModel {
    /// Every registered model
    pub const ALL: [Self; 4] = [Self::IsnetGeneralUse, Self::U2net, Self::U2netp, Self::Silueta];

    /// Registry name, also used for the status display and the file stem
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::IsnetGeneralUse => "isnet-general-use",
            Self::U2net => "u2net",
            Self::U2netp => "u2netp",
            Self::Silueta => "silueta",
        }
    }

    /// Model file name in the model directory
    #[must_use]
    pub fn file_name(self) -> String {
        format!("{}.onnx", self.name())
    }

    /// Square input edge length
    #[must_use]
    pub fn input_size(self) -> u32 {
        match self {
            Self::IsnetGeneralUse => 1024,
            Self::U2net | Self::U2netp | Self::Silueta => 320,
        }
    }

    /// Per-channel RGB mean
    #[must_use]
    pub fn mean(self) -> [f32; 3] {
        match self {
            Self::IsnetGeneralUse => [0.5, 0.5, 0.5],
            Self::U2net | Self::U2netp | Self::Silueta => IMAGENET_MEAN,
        }
    }

    /// Per-channel RGB standard deviation
    #[must_use]
    pub fn std(self) -> [f32; 3] {
        match self {
            Self::IsnetGeneralUse => [1.0, 1.0, 1.0],
            Self::U2net | Self::U2netp | Self::Silueta => IMAGENET_STD,
        }
    }

    /// Download URL below `base_url`
    #[must_use]
    pub fn url(self, base_url: &str) -> String {
        format!("{}/{}", base_url.trim_end_matches('/'), self.file_name())
    }
}

impl fmt::Display for SegmentationModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SegmentationModel {
    type Err = TaggerError;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|model| model.name() == wanted)
            .ok_or_else(|| {
                let known: Vec<_> = Self::ALL.iter().map(|m| m.name()).collect();
                TaggerError::invalid_config(format!(
                    "Unknown segmentation model '{s}', expected one of: {}",
                    known.join(", ")
                ))
            })
    }
}

/// Background remover owning the segmentation session
pub struct BackgroundRemover {
    backend: Box<dyn SegmentationBackend>,
    model: SegmentationModel,
}

impl BackgroundRemover {
    #[must_use]
    pub fn new(backend: Box<dyn SegmentationBackend>, model: SegmentationModel) -> Self {
        Self { backend, model }
    }

    /// Model this remover was created for
    #[must_use]
    pub fn model(&self) -> SegmentationModel {
        self.model
    }

    /// Strip the background from encoded image bytes, returning PNG bytes
    ///
    /// Any failure, including an undecodable upload, is reported as
    /// [`TaggerError::Segmentation`].
    pub fn remove_background(&self, image_bytes: &[u8]) -> Result<Vec<u8>> {
        let start = Instant::now();

        let image = decode_oriented(image_bytes)
            .map_err(|e| TaggerError::segmentation(format!("Failed to decode image: {e}")))?;

        let cutout = self.cutout(&image)?;

        let mut buffer = Cursor::new(Vec::new());
        cutout
            .write_to(&mut buffer, ImageFormat::Png)
            .map_err(|e| TaggerError::segmentation(format!("Failed to encode PNG: {e}")))?;

        tracing::debug!(
            model = self.model.name(),
            "Removed background from {}x{} image in {:.2}ms",
            image.width(),
            image.height(),
            start.elapsed().as_secs_f64() * 1000.0
        );

        Ok(buffer.into_inner())
    }

    /// Produce the RGBA cutout of a decoded image
    pub fn cutout(&self, image: &DynamicImage) -> Result<RgbaImage> {
        if image.width() == 0 || image.height() == 0 {
            return Err(TaggerError::segmentation("image has zero width or height"));
        }

        let input = preprocess(image, self.model);
        let output = self.backend.segment(input)?;
        let mask = mask_from_output(&output, image.width(), image.height())?;
        Ok(apply_mask(image, &mask))
    }
}

impl fmt::Debug for BackgroundRemover {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackgroundRemover")
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

/// Decode an upload and rotate it upright according to its EXIF orientation
pub fn decode_oriented(image_bytes: &[u8]) -> ImageResult<DynamicImage> {
    let mut decoder = ImageReader::new(Cursor::new(image_bytes))
        .with_guessed_format()?
        .into_decoder()?;
    let orientation = decoder.orientation()?;
    let mut image = DynamicImage::from_decoder(decoder)?;
    image.apply_orientation(orientation);
    Ok(image)
}

/// Stretch to the model input and normalize into a `1 x 3 x S x S` tensor
#[must_use]
pub fn preprocess(image: &DynamicImage, model: SegmentationModel) -> Array4<f32> {
    let size = model.input_size();
    let resized = image.to_rgb8();
    let resized = image::imageops::resize(&resized, size, size, FilterType::Lanczos3);

    let max_value = resized
        .pixels()
        .flat_map(|p| p.0)
        .max()
        .map_or(0.0, f32::from)
        .max(1e-6);
    let mean = model.mean();
    let std = model.std();

    let size = size as usize;
    Array4::from_shape_fn((1, 3, size, size), |(_, c, y, x)| {
        let value = f32::from(resized.get_pixel(x as u32, y as u32).0[c]) / max_value;
        (value - mean[c]) / std[c]
    })
}

/// Min-max normalize channel 0 into a grayscale mask at the original size
pub fn mask_from_output(output: &Array4<f32>, width: u32, height: u32) -> Result<GrayImage> {
    let shape = output.shape();
    let (mask_height, mask_width) = match shape {
        &[batch, channels, h, w] if batch >= 1 && channels >= 1 && h > 0 && w > 0 => (h, w),
        _ => {
            return Err(TaggerError::segmentation(format!(
                "Invalid output tensor shape {shape:?}"
            )))
        }
    };

    let channel = output.slice(ndarray::s![0, 0, .., ..]);
    let (min, max) = channel
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), v| {
            (lo.min(*v), hi.max(*v))
        });
    let range = max - min;

    let raw = ImageBuffer::from_fn(mask_width as u32, mask_height as u32, |x, y| {
        let value = channel[[y as usize, x as usize]];
        let scaled = if range > 0.0 && range.is_finite() {
            (value - min) / range * 255.0
        } else {
            0.0
        };
        image::Luma([scaled.clamp(0.0, 255.0) as u8])
    });

    Ok(image::imageops::resize(&raw, width, height, FilterType::Lanczos3))
}

/// Composite the image over transparent black through the mask
///
/// Every channel, alpha included, is scaled by `mask / 255`, so a zero mask
/// clears the pixel and edge pixels carry darkened color.
#[must_use]
pub fn apply_mask(image: &DynamicImage, mask: &GrayImage) -> RgbaImage {
    let mut result = image.to_rgba8();
    for (x, y, pixel) in result.enumerate_pixels_mut() {
        let alpha = mask.get_pixel(x, y).0[0];
        let [r, g, b, _] = pixel.0;
        *pixel = Rgba([
            mul_div_255(r, alpha),
            mul_div_255(g, alpha),
            mul_div_255(b, alpha),
            alpha,
        ]);
    }
    result
}

/// Rounded `a * b / 255` in integer arithmetic
fn mul_div_255(a: u8, b: u8) -> u8 {
    let t = u32::from(a) * u32::from(b) + 128;
    (((t >> 8) + t) >> 8) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::mock::MockSegmenter;
    use image::{GenericImageView, Rgb};
    use std::sync::atomic::Ordering;

    fn png(width: u32, height: u32) -> Vec<u8> {
        let image = DynamicImage::ImageRgb8(ImageBuffer::from_pixel(width, height, Rgb([90, 160, 30])));
        let mut buffer = Cursor::new(Vec::new());
        image.write_to(&mut buffer, ImageFormat::Png).unwrap();
        buffer.into_inner()
    }

    #[test]
    fn test_model_registry() {
        assert_eq!(SegmentationModel::default(), SegmentationModel::IsnetGeneralUse);
        assert_eq!(SegmentationModel::IsnetGeneralUse.file_name(), "isnet-general-use.onnx");
        assert_eq!(SegmentationModel::IsnetGeneralUse.input_size(), 1024);
        assert_eq!(SegmentationModel::U2netp.input_size(), 320);
        assert_eq!(
            SegmentationModel::U2net.url("https://example.com/releases/"),
            "https://example.com/releases/u2net.onnx"
        );
    }

    #[test]
    fn test_model_parsing_and_serde_names() {
        for model in SegmentationModel::ALL {
            assert_eq!(model.name().parse::<SegmentationModel>().unwrap(), model);
            let json = serde_json::to_string(&model).unwrap();
            assert_eq!(json, format!("\"{}\"", model.name()));
        }
        assert_eq!(
            " U2NETP ".parse::<SegmentationModel>().unwrap(),
            SegmentationModel::U2netp
        );
        assert!(matches!(
            "birefnet".parse::<SegmentationModel>(),
            Err(TaggerError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_preprocess_normalization() {
        let image = DynamicImage::ImageRgb8(ImageBuffer::from_pixel(10, 20, Rgb([255, 255, 255])));
        let tensor = preprocess(&image, SegmentationModel::U2netp);
        assert_eq!(tensor.shape(), &[1, 3, 320, 320]);
        // White divides to 1.0 before mean/std
        let expected = (1.0 - 0.485) / 0.229;
        assert!((tensor[[0, 0, 160, 160]] - expected).abs() < 1e-4);

        let tensor = preprocess(&image, SegmentationModel::IsnetGeneralUse);
        assert_eq!(tensor.shape(), &[1, 3, 1024, 1024]);
        assert!((tensor[[0, 2, 512, 512]] - 0.5).abs() < 1e-4);
    }

    #[test]
    fn test_black_image_does_not_divide_by_zero() {
        let image = DynamicImage::ImageRgb8(ImageBuffer::from_pixel(4, 4, Rgb([0, 0, 0])));
        let tensor = preprocess(&image, SegmentationModel::Silueta);
        assert!(tensor.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_mask_min_max_normalization() {
        let output = Array4::from_shape_fn((1, 1, 2, 2), |(_, _, y, x)| (y * 2 + x) as f32);
        let mask = mask_from_output(&output, 2, 2).unwrap();
        assert_eq!(mask.get_pixel(0, 0).0[0], 0);
        assert_eq!(mask.get_pixel(1, 1).0[0], 255);
    }

    #[test]
    fn test_flat_output_is_empty_mask() {
        let output = Array4::from_elem((1, 1, 4, 4), 0.7);
        let mask = mask_from_output(&output, 8, 8).unwrap();
        assert!(mask.pixels().all(|p| p.0[0] == 0));
    }

    #[test]
    fn test_invalid_output_shape() {
        let output = Array4::zeros((1, 0, 4, 4));
        assert!(matches!(
            mask_from_output(&output, 4, 4),
            Err(TaggerError::Segmentation(_))
        ));
    }

    #[test]
    fn test_remove_background_returns_png_with_alpha() {
        let segmenter = MockSegmenter::new(64);
        let calls = segmenter.call_counter();
        let remover = BackgroundRemover::new(Box::new(segmenter), SegmentationModel::U2netp);

        let bytes = remover.remove_background(&png(40, 30)).unwrap();
        assert!(bytes.starts_with(&[0x89, b'P', b'N', b'G']));

        let decoded = image::load_from_memory(&bytes).unwrap().to_rgba8();
        assert_eq!(decoded.dimensions(), (40, 30));
        assert_eq!(decoded.get_pixel(20, 15).0, [90, 160, 30, 255]);
        assert_eq!(decoded.get_pixel(0, 0).0, [0, 0, 0, 0]);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    /// Baseline JPEG of `width x height` with an EXIF APP1 segment carrying `orientation`
    fn jpeg_with_orientation(width: u32, height: u32, orientation: u8) -> Vec<u8> {
        let image = DynamicImage::ImageRgb8(ImageBuffer::from_pixel(width, height, Rgb([90, 160, 30])));
        let mut buffer = Cursor::new(Vec::new());
        image.write_to(&mut buffer, ImageFormat::Jpeg).unwrap();
        let jpeg = buffer.into_inner();

        let mut exif = b"Exif\0\0II*\0".to_vec();
        exif.extend_from_slice(&8u32.to_le_bytes());
        exif.extend_from_slice(&1u16.to_le_bytes());
        exif.extend_from_slice(&0x0112u16.to_le_bytes());
        exif.extend_from_slice(&3u16.to_le_bytes());
        exif.extend_from_slice(&1u32.to_le_bytes());
        exif.extend_from_slice(&[orientation, 0, 0, 0]);
        exif.extend_from_slice(&0u32.to_le_bytes());

        let mut out = jpeg[..2].to_vec();
        out.extend_from_slice(&[0xFF, 0xE1]);
        out.extend_from_slice(&((exif.len() + 2) as u16).to_be_bytes());
        out.extend_from_slice(&exif);
        out.extend_from_slice(&jpeg[2..]);
        out
    }

    #[test]
    fn test_exif_orientation_is_applied_before_segmentation() {
        let remover = BackgroundRemover::new(Box::new(MockSegmenter::new(64)), SegmentationModel::U2netp);

        let upload = jpeg_with_orientation(40, 30, 6);
        assert_eq!(image::load_from_memory(&upload).unwrap().dimensions(), (40, 30));
        assert_eq!(decode_oriented(&upload).unwrap().dimensions(), (30, 40));

        let bytes = remover.remove_background(&upload).unwrap();
        let decoded = image::load_from_memory(&bytes).unwrap();
        assert_eq!(decoded.dimensions(), (30, 40));

        // Orientation 1 leaves the image as stored
        let upright = remover
            .remove_background(&jpeg_with_orientation(40, 30, 1))
            .unwrap();
        assert_eq!(image::load_from_memory(&upright).unwrap().dimensions(), (40, 30));
    }

    #[test]
    fn test_partial_mask_scales_color() {
        let image = DynamicImage::ImageRgb8(ImageBuffer::from_pixel(3, 1, Rgb([200, 100, 255])));
        let mask = GrayImage::from_raw(3, 1, vec![255, 128, 0]).unwrap();
        let cutout = apply_mask(&image, &mask);

        assert_eq!(cutout.get_pixel(0, 0).0, [200, 100, 255, 255]);
        assert_eq!(cutout.get_pixel(1, 0).0, [100, 50, 128, 128]);
        assert_eq!(cutout.get_pixel(2, 0).0, [0, 0, 0, 0]);
    }

    #[test]
    fn test_failures_are_segmentation_errors() {
        let remover = BackgroundRemover::new(Box::new(MockSegmenter::new(8)), SegmentationModel::U2netp);
        assert!(matches!(
            remover.remove_background(b"not an image"),
            Err(TaggerError::Segmentation(_))
        ));

        let remover = BackgroundRemover::new(
            Box::new(MockSegmenter::failing("session crashed")),
            SegmentationModel::U2netp,
        );
        let err = remover.remove_background(&png(8, 8)).unwrap_err();
        assert!(matches!(err, TaggerError::Segmentation(_)));
        assert!(err.to_string().contains("session crashed"));
    }
}
