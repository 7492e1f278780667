//! # Image Preprocessing
//!
//! Images are converted to RGB, resized to the model input size, and
//! normalized per channel into a ``[3, height, width]`` (CHW) `f32` buffer.
//! The same [`PreprocessConfig`] is stored with checkpoints and artifacts so
//! inference reproduces the training transform.

use anyhow::Context;
use burn::config::Config;
use image::DynamicImage;
use image::imageops::FilterType;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// ImageNet per-channel mean, for `[0, 1]` scaled pixels.
pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];

/// ImageNet per-channel standard deviation, for `[0, 1]` scaled pixels.
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Pixel normalization, selected to match the backbone's pretraining.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PixelNormalization {
    /// ``x / 127.5 - 1``, mapping to `[-1, 1]`.
    Inception,

    /// ``(x / 255 - mean[c]) / std[c]``, torchvision weights.
    ImageNet,
}

impl PixelNormalization {
    /// Normalize one 8-bit channel value.
    #[inline(always)]
    pub fn apply(
        &self,
        channel: usize,
        value: u8,
    ) -> f32 {
        let value = value as f32;
        match self {
            PixelNormalization::Inception => value / 127.5 - 1.0,
            PixelNormalization::ImageNet => {
                (value / 255.0 - IMAGENET_MEAN[channel]) / IMAGENET_STD[channel]
            }
        }
    }
}

/// Resize interpolation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResizeFilter {
    /// Nearest neighbor.
    Nearest,
    /// Bilinear.
    Triangle,
    /// Bicubic.
    CatmullRom,
    /// Lanczos with window 3.
    Lanczos3,
}

impl From<ResizeFilter> for FilterType {
    fn from(filter: ResizeFilter) -> Self {
        match filter {
            ResizeFilter::Nearest => FilterType::Nearest,
            ResizeFilter::Triangle => FilterType::Triangle,
            ResizeFilter::CatmullRom => FilterType::CatmullRom,
            ResizeFilter::Lanczos3 => FilterType::Lanczos3,
        }
    }
}

/// [`PreprocessConfig`] describes the model input transform.
#[derive(Config, Debug)]
pub struct PreprocessConfig {
    /// Model input ``[height, width]``.
    #[config(default = "[256, 256]")]
    pub image_size: [usize; 2],

    /// Resize interpolation.
    #[config(default = "ResizeFilter::Nearest")]
    pub filter: ResizeFilter,

    /// Pixel normalization.
    #[config(default = "PixelNormalization::ImageNet")]
    pub normalization: PixelNormalization,
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl PreprocessConfig {
    /// Shape of one preprocessed image, ``[3, height, width]``.
    pub fn item_shape(&self) -> [usize; 3] {
        [3, self.image_size[0], self.image_size[1]]
    }

    /// Number of values in one preprocessed image.
    pub fn item_len(&self) -> usize {
        self.item_shape().iter().product()
    }

    /// Resize and normalize an image into a CHW buffer.
    pub fn preprocess_image(
        &self,
        image: &DynamicImage,
    ) -> Vec<f32> {
        let [height, width] = self.image_size;
        let rgb = image.to_rgb8();
        let resized = image::imageops::resize(
            &rgb,
            width as u32,
            height as u32,
            self.filter.into(),
        );

        let plane = height * width;
        let mut buffer = vec![0.0; self.item_len()];
        for (x, y, pixel) in resized.enumerate_pixels() {
            let offset = y as usize * width + x as usize;
            for channel in 0..3 {
                buffer[channel * plane + offset] =
                    self.normalization.apply(channel, pixel.0[channel]);
            }
        }
        buffer
    }

    /// Decode encoded image bytes (png, jpeg, ...) and preprocess them.
    pub fn preprocess_bytes(
        &self,
        bytes: &[u8],
    ) -> anyhow::Result<Vec<f32>> {
        let image = image::load_from_memory(bytes).context("decoding image bytes")?;
        Ok(self.preprocess_image(&image))
    }

    /// Load an image file and preprocess it.
    pub fn preprocess_path<P: AsRef<Path>>(
        &self,
        path: P,
    ) -> anyhow::Result<Vec<f32>> {
        let path = path.as_ref();
        let image =
            image::open(path).with_context(|| format!("decoding image {}", path.display()))?;
        Ok(self.preprocess_image(&image))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hamcrest::prelude::*;
    use image::{Rgb, RgbImage};

    #[test]
    fn test_normalization() {
        let inception = PixelNormalization::Inception;
        assert_eq!(inception.apply(0, 0), -1.0);
        assert_eq!(inception.apply(1, 255), 1.0);

        let imagenet = PixelNormalization::ImageNet;
        assert_that!(imagenet.apply(0, 0), close_to(-0.485 / 0.229, 1e-6));
        assert_that!(imagenet.apply(2, 255), close_to((1.0 - 0.406) / 0.225, 1e-6));
    }

    #[test]
    fn test_defaults() {
        let config = PreprocessConfig::default();
        assert_eq!(config.image_size, [256, 256]);
        assert_eq!(config.filter, ResizeFilter::Nearest);
        assert_eq!(config.item_shape(), [3, 256, 256]);
        assert_eq!(config.item_len(), 3 * 256 * 256);
    }

    #[test]
    fn test_preprocess_layout_is_chw() {
        let config = PreprocessConfig::new()
            .with_image_size([2, 3])
            .with_normalization(PixelNormalization::Inception);

        // 2x3 image (width 3, height 2), red channel encodes the column.
        let image = RgbImage::from_fn(3, 2, |x, y| Rgb([(x * 100) as u8, (y * 255) as u8, 255]));
        let buffer = config.preprocess_image(&DynamicImage::ImageRgb8(image));

        assert_eq!(buffer.len(), 18);
        let red = &buffer[0..6];
        let green = &buffer[6..12];
        let blue = &buffer[12..18];

        assert_that!(red[0], close_to(-1.0, 1e-6));
        assert_that!(red[2], close_to(200.0 / 127.5 - 1.0, 1e-6));
        assert_eq!(&green[0..3], &[-1.0, -1.0, -1.0]);
        assert_eq!(&green[3..6], &[1.0, 1.0, 1.0]);
        assert!(blue.iter().all(|v| *v == 1.0));
    }

    #[test]
    fn test_preprocess_resizes_and_converts_gray() {
        let config = PreprocessConfig::new().with_image_size([4, 4]);

        let gray = image::GrayImage::from_pixel(10, 7, image::Luma([128]));
        let buffer = config.preprocess_image(&DynamicImage::ImageLuma8(gray));
        assert_eq!(buffer.len(), 3 * 4 * 4);

        let expected_red = PixelNormalization::ImageNet.apply(0, 128);
        assert!(buffer[0..16].iter().all(|v| *v == expected_red));
    }

    #[test]
    fn test_preprocess_bytes() {
        let config = PreprocessConfig::new().with_image_size([2, 2]);

        let image = RgbImage::from_pixel(5, 5, Rgb([10, 20, 30]));
        let mut encoded = std::io::Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(image)
            .write_to(&mut encoded, image::ImageFormat::Png)
            .unwrap();

        let buffer = config.preprocess_bytes(encoded.get_ref()).unwrap();
        assert_eq!(buffer.len(), 12);

        assert!(config.preprocess_bytes(b"not an image").is_err());
    }
}
