//! Conversions between float pixel buffers and `image` crate buffers.
//!
//! Buffers are row-major with values in `[0, 1]`; bytes are mapped with a
//! plain `/ 255` so a loaded photograph is fitted in its stored encoding.

use crate::core::color::{u8_to_unit, unit_to_u8};
use image::{ImageResult, Rgb, RgbImage};
use nalgebra::Vector3;
use std::path::Path;

/// A decoded image with an optional alpha matte.
#[derive(Clone, Debug)]
pub struct LoadedImage {
    pub width: u32,
    pub height: u32,
    pub color: Vec<Vector3<f32>>,
    /// Present when the file carries an alpha channel.
    pub alpha: Option<Vec<f32>>,
}

pub fn rgb_image_to_buffer(img: &RgbImage) -> Vec<Vector3<f32>> {
    img.pixels()
        .map(|p| Vector3::new(u8_to_unit(p[0]), u8_to_unit(p[1]), u8_to_unit(p[2])))
        .collect()
}

/// Quantize a float buffer; out-of-range and non-finite values are clamped.
pub fn buffer_to_rgb_image(buffer: &[Vector3<f32>], width: u32, height: u32) -> RgbImage {
    assert_eq!(buffer.len(), width as usize * height as usize);
    RgbImage::from_fn(width, height, |x, y| {
        let c = &buffer[(y * width + x) as usize];
        Rgb([unit_to_u8(c.x), unit_to_u8(c.y), unit_to_u8(c.z)])
    })
}

/// Grayscale image of a scalar buffer (depth, alpha) normalized by its maximum.
pub fn scalar_to_rgb_image(values: &[f32], width: u32, height: u32) -> RgbImage {
    assert_eq!(values.len(), width as usize * height as usize);
    let max = values
        .iter()
        .copied()
        .filter(|v| v.is_finite())
        .fold(0.0f32, f32::max);
    let scale = if max > 0.0 { 1.0 / max } else { 0.0 };
    RgbImage::from_fn(width, height, |x, y| {
        let v = unit_to_u8(values[(y * width + x) as usize] * scale);
        Rgb([v, v, v])
    })
}

pub fn load_image(path: &Path) -> ImageResult<LoadedImage> {
    let img = image::open(path)?;
    let (width, height) = (img.width(), img.height());
    let alpha = img
        .color()
        .has_alpha()
        .then(|| img.to_rgba8().pixels().map(|p| u8_to_unit(p[3])).collect());
    Ok(LoadedImage {
        width,
        height,
        color: rgb_image_to_buffer(&img.to_rgb8()),
        alpha,
    })
}

pub fn save_image(path: &Path, buffer: &[Vector3<f32>], width: u32, height: u32) -> ImageResult<()> {
    buffer_to_rgb_image(buffer, width, height).save(path)
}
