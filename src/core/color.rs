//! Color value conversions.
//!
//! All rendering and training happens on linear RGB floats in `[0, 1]`.
//! Bytes only appear at the boundaries (point-cloud colors, PNG/JPEG files).

use nalgebra::Vector3;

/// Range of incoming point colors.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ColorRange {
    /// Already in `[0, 1]`.
    Unit,
    /// Byte values in `[0, 255]`.
    Byte,
}

/// Convert a byte (0-255) to a float in `[0, 1]`.
pub fn u8_to_unit(u: u8) -> f32 {
    u as f32 / 255.0
}

/// Convert a float to a byte, clamping to `[0, 1]` first.
pub fn unit_to_u8(x: f32) -> u8 {
    if !x.is_finite() {
        return 0;
    }
    (x.clamp(0.0, 1.0) * 255.0).round() as u8
}

/// Guess whether a set of colors is byte-valued: any component above 1
/// means the whole set is in `[0, 255]`.
pub fn detect_color_range(colors: &[Vector3<f32>]) -> ColorRange {
    if colors.iter().any(|c| c.max() > 1.0) {
        ColorRange::Byte
    } else {
        ColorRange::Unit
    }
}

/// Bring point colors into `[0, 1]`.
pub fn normalize_colors(colors: &[Vector3<f32>], range: ColorRange) -> Vec<Vector3<f32>> {
    match range {
        ColorRange::Unit => colors.iter().map(|c| c.map(|v| v.clamp(0.0, 1.0))).collect(),
        ColorRange::Byte => colors
            .iter()
            .map(|c| c.map(|v| (v / 255.0).clamp(0.0, 1.0)))
            .collect(),
    }
}
