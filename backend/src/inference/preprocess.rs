use image::imageops::{self, FilterType};
use image::{ImageError, ImageReader, Limits, RgbImage};
use ndarray::{Array4, ArrayView4};
use std::io::Cursor;

use crate::error::PredictError;

/// Side length of the square input the model was trained on.
pub const INPUT_SIZE: u32 = 128;
pub const INPUT_CHANNELS: usize = 3;

/// Bilinear filtering, matching the resize applied to the training set.
const RESIZE_FILTER: FilterType = FilterType::Triangle;

/// Largest accepted width or height of an upload.
pub const MAX_IMAGE_SIDE: u32 = 8192;
const MAX_DECODE_ALLOC: u64 = 256 * 1024 * 1024;

/// Single-image NCHW batch with values in `[0, 1]`.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedTensor(Array4<f32>);

impl NormalizedTensor {
    pub const SHAPE: [usize; 4] = [1, INPUT_CHANNELS, INPUT_SIZE as usize, INPUT_SIZE as usize];

    pub fn view(&self) -> ArrayView4<'_, f32> {
        self.0.view()
    }

    pub fn shape(&self) -> &[usize] {
        self.0.shape()
    }

    /// Values in row-major NCHW order.
    pub fn to_vec(&self) -> Vec<f32> {
        self.0.iter().copied().collect()
    }

    fn from_rgb(image: &RgbImage) -> Self {
        let (width, height) = image.dimensions();
        let mut data = Array4::<f32>::zeros((1, INPUT_CHANNELS, height as usize, width as usize));
        for (x, y, pixel) in image.enumerate_pixels() {
            for c in 0..INPUT_CHANNELS {
                data[[0, c, y as usize, x as usize]] = pixel[c] as f32 / 255.0;
            }
        }
        Self(data)
    }
}

/// Decodes an uploaded image and turns it into the classifier's input tensor.
pub fn preprocess(raw: &[u8]) -> Result<NormalizedTensor, PredictError> {
    let image = decode_rgb(raw)?;
    let resized = imageops::resize(&image, INPUT_SIZE, INPUT_SIZE, RESIZE_FILTER);
    Ok(NormalizedTensor::from_rgb(&resized))
}

/// Grayscale is replicated across channels, alpha is dropped and palettes are expanded.
pub fn decode_rgb(raw: &[u8]) -> Result<RgbImage, PredictError> {
    if raw.is_empty() {
        return Err(PredictError::EmptyImage);
    }
    let mut reader = ImageReader::new(Cursor::new(raw))
        .with_guessed_format()
        .map_err(ImageError::IoError)?;
    reader.limits(decode_limits());
    let image = reader.decode()?;
    log::debug!(
        "Decoded {}x{} image ({:?})",
        image.width(),
        image.height(),
        image.color()
    );
    Ok(image.to_rgb8())
}

fn decode_limits() -> Limits {
    let mut limits = Limits::default();
    limits.max_image_width = Some(MAX_IMAGE_SIDE);
    limits.max_image_height = Some(MAX_IMAGE_SIDE);
    limits.max_alloc = Some(MAX_DECODE_ALLOC);
    limits
}
