//! Image preprocessing into the model's planar input tensor
//!
//! Images are stretched (aspect ratio is not preserved) to the fixed input
//! resolution, alpha is dropped and each of R, G, B is written into its own
//! contiguous plane scaled to [0, 1].

use crate::config::InputSpec;
use image::imageops::FilterType;
use image::DynamicImage;
use seethrough_core::{Error, Result};
use std::str::FromStr;

/// One image as a `[1, 3, H, W]` float tensor, channel-major
#[derive(Debug, Clone, PartialEq)]
pub struct PreprocessedTensor {
    shape: [usize; 4],
    data: Vec<f32>,
}

impl PreprocessedTensor {
    /// Tensor shape as `[batch, channels, height, width]`
    pub fn shape(&self) -> [usize; 4] {
        self.shape
    }

    /// Shape in the signed form runtimes expect
    pub fn dims(&self) -> Vec<i64> {
        self.shape.iter().map(|&d| d as i64).collect()
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn into_data(self) -> Vec<f32> {
        self.data
    }

    /// One channel plane (0 = R, 1 = G, 2 = B)
    pub fn plane(&self, channel: usize) -> &[f32] {
        let plane = self.shape[2] * self.shape[3];
        &self.data[channel * plane..(channel + 1) * plane]
    }
}

/// Rectangle to cut out of an image before it is resized
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl CropRegion {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Intersect with an image of the given size, `None` when empty
    fn clamp_to(&self, image_width: u32, image_height: u32) -> Option<Self> {
        if self.x >= image_width || self.y >= image_height {
            return None;
        }
        let width = self.width.min(image_width - self.x);
        let height = self.height.min(image_height - self.y);
        if width == 0 || height == 0 {
            return None;
        }
        Some(Self::new(self.x, self.y, width, height))
    }
}

impl FromStr for CropRegion {
    type Err = Error;

    /// Parse `x,y,width,height`
    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<u32> = s
            .split(',')
            .map(|p| p.trim().parse::<u32>())
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| Error::config(format!("Invalid crop region '{}': {}", s, e)))?;

        match parts.as_slice() {
            [x, y, w, h] => Ok(Self::new(*x, *y, *w, *h)),
            _ => Err(Error::config(format!(
                "Invalid crop region '{}': expected x,y,width,height",
                s
            ))),
        }
    }
}

/// Turns encoded images into model input tensors
#[derive(Debug, Clone)]
pub struct ImagePreprocessor {
    width: u32,
    height: u32,
    filter: FilterType,
}

impl ImagePreprocessor {
    /// Create a preprocessor for the given target resolution
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            filter: FilterType::Triangle,
        }
    }

    pub fn from_spec(spec: &InputSpec) -> Self {
        Self::new(spec.width, spec.height)
    }

    /// Set the resampling filter (bilinear by default)
    pub fn with_filter(mut self, filter: FilterType) -> Self {
        self.filter = filter;
        self
    }

    /// Target `(width, height)`
    pub fn target_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Decode and preprocess encoded image bytes
    pub fn preprocess_bytes(&self, bytes: &[u8]) -> Result<PreprocessedTensor> {
        let image = decode(bytes)?;
        Ok(self.preprocess_image(&image))
    }

    /// Decode, crop to `region` and preprocess
    pub fn preprocess_region(&self, bytes: &[u8], region: CropRegion) -> Result<PreprocessedTensor> {
        let image = decode(bytes)?;
        let region = region
            .clamp_to(image.width(), image.height())
            .ok_or_else(|| {
                Error::image_load(format!(
                    "Crop region {:?} lies outside the {}x{} image",
                    region,
                    image.width(),
                    image.height()
                ))
            })?;
        let cropped = image.crop_imm(region.x, region.y, region.width, region.height);
        Ok(self.preprocess_image(&cropped))
    }

    /// Preprocess an already decoded image
    pub fn preprocess_image(&self, image: &DynamicImage) -> PreprocessedTensor {
        let resized = image.resize_exact(self.width, self.height, self.filter);
        let rgba = resized.to_rgba8();

        let plane = (self.width as usize) * (self.height as usize);
        let mut data = vec![0.0f32; 3 * plane];

        for (i, pixel) in rgba.pixels().enumerate() {
            let [r, g, b, _alpha] = pixel.0;
            data[i] = r as f32 / 255.0;
            data[plane + i] = g as f32 / 255.0;
            data[2 * plane + i] = b as f32 / 255.0;
        }

        PreprocessedTensor {
            shape: [1, 3, self.height as usize, self.width as usize],
            data,
        }
    }
}

fn decode(bytes: &[u8]) -> Result<DynamicImage> {
    if bytes.is_empty() {
        return Err(Error::image_load("Image source is empty"));
    }
    image::load_from_memory(bytes)
        .map_err(|e| Error::image_load(format!("Failed to decode image: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgba, RgbaImage};
    use std::io::Cursor;

    fn encode_png(image: RgbaImage) -> Vec<u8> {
        let mut buf = Cursor::new(Vec::new());
        DynamicImage::ImageRgba8(image)
            .write_to(&mut buf, ImageFormat::Png)
            .unwrap();
        buf.into_inner()
    }

    fn solid(width: u32, height: u32, color: [u8; 4]) -> Vec<u8> {
        encode_png(RgbaImage::from_pixel(width, height, Rgba(color)))
    }

    #[test]
    fn test_planar_layout_and_scaling() {
        let bytes = solid(10, 10, [255, 0, 51, 255]);
        let tensor = ImagePreprocessor::new(4, 4).preprocess_bytes(&bytes).unwrap();

        assert_eq!(tensor.shape(), [1, 3, 4, 4]);
        assert_eq!(tensor.data().len(), 3 * 16);
        assert!(tensor.plane(0).iter().all(|&v| v == 1.0));
        assert!(tensor.plane(1).iter().all(|&v| v == 0.0));
        assert!(tensor.plane(2).iter().all(|&v| (v - 0.2).abs() < 1e-6));
    }

    #[test]
    fn test_alpha_is_discarded() {
        let opaque = ImagePreprocessor::new(2, 2)
            .preprocess_bytes(&solid(2, 2, [10, 20, 30, 255]))
            .unwrap();
        let translucent = ImagePreprocessor::new(2, 2)
            .preprocess_bytes(&solid(2, 2, [10, 20, 30, 40]))
            .unwrap();
        assert_eq!(opaque.shape(), translucent.shape());
        for (a, b) in opaque.data().iter().zip(translucent.data()) {
            assert!((a - b).abs() <= 1.0 / 255.0);
        }
    }

    #[test]
    fn test_small_and_large_images_are_stretched() {
        let preprocessor = ImagePreprocessor::new(8, 8);
        for (w, h) in [(1, 1), (3, 17), (64, 9)] {
            let tensor = preprocessor
                .preprocess_bytes(&solid(w, h, [0, 128, 255, 255]))
                .unwrap();
            assert_eq!(tensor.shape(), [1, 3, 8, 8]);
            assert!(tensor.data().iter().all(|&v| (0.0..=1.0).contains(&v)));
        }
    }

    #[test]
    fn test_preprocessing_is_deterministic() {
        let mut image = RgbaImage::new(37, 23);
        for (x, y, pixel) in image.enumerate_pixels_mut() {
            *pixel = Rgba([(x * 7) as u8, (y * 11) as u8, ((x + y) * 3) as u8, 255]);
        }
        let bytes = encode_png(image);
        let preprocessor = ImagePreprocessor::new(16, 16);

        let first = preprocessor.preprocess_bytes(&bytes).unwrap();
        let second = preprocessor.preprocess_bytes(&bytes).unwrap();
        let first_bits: Vec<u32> = first.data().iter().map(|v| v.to_bits()).collect();
        let second_bits: Vec<u32> = second.data().iter().map(|v| v.to_bits()).collect();
        assert_eq!(first_bits, second_bits);
    }

    #[test]
    fn test_corrupt_bytes_fail_with_image_load() {
        let err = ImagePreprocessor::new(4, 4)
            .preprocess_bytes(b"definitely not an image")
            .unwrap_err();
        assert!(matches!(err, Error::ImageLoad(_)));

        let err = ImagePreprocessor::new(4, 4).preprocess_bytes(&[]).unwrap_err();
        assert!(matches!(err, Error::ImageLoad(_)));
    }

    #[test]
    fn test_crop_region() {
        // Left half red, right half blue
        let mut image = RgbaImage::new(20, 10);
        for (x, _, pixel) in image.enumerate_pixels_mut() {
            *pixel = if x < 10 {
                Rgba([255, 0, 0, 255])
            } else {
                Rgba([0, 0, 255, 255])
            };
        }
        let bytes = encode_png(image);
        let preprocessor = ImagePreprocessor::new(4, 4);

        let right = preprocessor
            .preprocess_region(&bytes, CropRegion::new(10, 0, 10, 10))
            .unwrap();
        assert!(right.plane(0).iter().all(|&v| v == 0.0));
        assert!(right.plane(2).iter().all(|&v| v == 1.0));

        // Oversized regions are clamped to the image
        let clamped = preprocessor
            .preprocess_region(&bytes, CropRegion::new(10, 0, 500, 500))
            .unwrap();
        assert_eq!(clamped, right);

        let err = preprocessor
            .preprocess_region(&bytes, CropRegion::new(30, 0, 5, 5))
            .unwrap_err();
        assert!(matches!(err, Error::ImageLoad(_)));
    }

    #[test]
    fn test_parse_crop_region() {
        let region: CropRegion = "10, 20,30,40".parse().unwrap();
        assert_eq!(region, CropRegion::new(10, 20, 30, 40));
        assert!("1,2,3".parse::<CropRegion>().is_err());
        assert!("a,b,c,d".parse::<CropRegion>().is_err());
    }
}
