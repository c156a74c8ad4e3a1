//! Spherical harmonics evaluation for view-dependent color.
//!
//! Primitives store color as real SH coefficients up to degree 3: a DC term
//! (3 floats) and `M × 3` "rest" coefficients, coefficient-major
//! (`rest[k * 3 + channel]`), `M = (degree + 1)² - 1`.

use nalgebra::Vector3;

/// Highest supported SH degree.
pub const MAX_SH_DEGREE: usize = 3;

/// Y_0^0.
pub const SH_C0: f32 = 0.282_094_8;
const SH_C1: f32 = 0.488_602_5;
const SH_C2: [f32; 5] = [1.092_548_4, -1.092_548_4, 0.315_391_57, -1.092_548_4, 0.546_274_2];
const SH_C3: [f32; 7] = [
    -0.590_043_6,
    2.890_611_4,
    -0.457_045_8,
    0.373_176_33,
    -0.457_045_8,
    1.445_305_7,
    -0.590_043_6,
];

/// Number of SH coefficients per channel for `degree` (DC included).
pub const fn num_sh_coeffs(degree: usize) -> usize {
    (degree + 1) * (degree + 1)
}

/// Number of non-DC coefficients per channel (`M`).
pub const fn num_sh_rest(degree: usize) -> usize {
    num_sh_coeffs(degree) - 1
}

/// Convert a linear RGB color to the DC coefficient that reproduces it.
pub fn rgb_to_sh(rgb: f32) -> f32 {
    (rgb - 0.5) / SH_C0
}

/// Inverse of [`rgb_to_sh`].
pub fn sh_to_rgb(sh: f32) -> f32 {
    sh * SH_C0 + 0.5
}

/// Evaluate the SH basis functions up to `degree` (entries beyond it are 0).
///
/// The basis functions are ordered as:
/// - Degree 0 (1 function): Y_0^0
/// - Degree 1 (3 functions): Y_1^{-1}, Y_1^0, Y_1^1
/// - Degree 2 (5 functions): Y_2^{-2} .. Y_2^2
/// - Degree 3 (7 functions): Y_3^{-3} .. Y_3^3
pub fn sh_basis(direction: &Vector3<f32>, degree: usize) -> [f32; 16] {
    let mut basis = [0.0f32; 16];
    basis[0] = SH_C0;
    if degree == 0 {
        return basis;
    }

    let (x, y, z) = (direction.x, direction.y, direction.z);
    basis[1] = -SH_C1 * y;
    basis[2] = SH_C1 * z;
    basis[3] = -SH_C1 * x;
    if degree == 1 {
        return basis;
    }

    let (xx, yy, zz) = (x * x, y * y, z * z);
    let (xy, yz, xz) = (x * y, y * z, x * z);
    basis[4] = SH_C2[0] * xy;
    basis[5] = SH_C2[1] * yz;
    basis[6] = SH_C2[2] * (2.0 * zz - xx - yy);
    basis[7] = SH_C2[3] * xz;
    basis[8] = SH_C2[4] * (xx - yy);
    if degree == 2 {
        return basis;
    }

    basis[9] = SH_C3[0] * y * (3.0 * xx - yy);
    basis[10] = SH_C3[1] * xy * z;
    basis[11] = SH_C3[2] * y * (4.0 * zz - xx - yy);
    basis[12] = SH_C3[3] * z * (2.0 * zz - 3.0 * xx - 3.0 * yy);
    basis[13] = SH_C3[4] * x * (4.0 * zz - xx - yy);
    basis[14] = SH_C3[5] * z * (xx - yy);
    basis[15] = SH_C3[6] * x * (xx - 3.0 * yy);
    basis
}

/// Result of evaluating a primitive's SH color.
#[derive(Clone, Copy, Debug)]
pub struct ShColor {
    /// `max(Σ basis·coeff + 0.5, 0)` per channel.
    pub color: Vector3<f32>,
    /// Channels where the `≥ 0` clamp was active (no gradient flows there).
    pub clamped: [bool; 3],
}

/// Evaluate view-dependent color.
///
/// - `dc`: DC coefficient (RGB)
/// - `rest`: `M × 3` coefficients, coefficient-major
/// - `active_degree`: only coefficients up to this degree contribute
/// - `direction`: unit vector from the camera center to the primitive
pub fn evaluate_sh(
    dc: &Vector3<f32>,
    rest: &[f32],
    active_degree: usize,
    direction: &Vector3<f32>,
) -> ShColor {
    let degree = active_degree.min(MAX_SH_DEGREE);
    let basis = sh_basis(direction, degree);
    let available = rest.len() / 3;
    let used = num_sh_rest(degree).min(available);

    let mut color = dc * basis[0];
    for k in 0..used {
        let b = basis[k + 1];
        color.x += b * rest[k * 3];
        color.y += b * rest[k * 3 + 1];
        color.z += b * rest[k * 3 + 2];
    }
    color.add_scalar_mut(0.5);

    let clamped = [color.x < 0.0, color.y < 0.0, color.z < 0.0];
    ShColor {
        color: color.map(|c| c.max(0.0)),
        clamped,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_sh_basis_dc_component() {
        let basis1 = sh_basis(&Vector3::new(1.0, 0.0, 0.0), 3);
        let basis2 = sh_basis(&Vector3::new(0.0, 1.0, 0.0), 3);
        assert_relative_eq!(basis1[0], basis2[0], epsilon = 1e-6);
        assert_relative_eq!(basis1[0], 0.282_094_8, epsilon = 1e-6);
    }

    #[test]
    fn test_basis_respects_degree() {
        let basis = sh_basis(&Vector3::new(0.3, 0.4, 0.866), 1);
        assert!(basis[1] != 0.0);
        assert!(basis[4..].iter().all(|&b| b == 0.0));
    }

    #[test]
    fn test_evaluate_sh_dc_only() {
        let dc = Vector3::new(1.0, 0.5, 0.2);
        let rest = vec![0.0f32; num_sh_rest(3) * 3];
        let c1 = evaluate_sh(&dc, &rest, 3, &Vector3::new(1.0, 0.0, 0.0));
        let c2 = evaluate_sh(&dc, &rest, 3, &Vector3::new(0.0, 0.0, 1.0));
        assert_relative_eq!(c1.color, c2.color, epsilon = 1e-6);
        assert_relative_eq!(c1.color, dc * SH_C0 + Vector3::repeat(0.5), epsilon = 1e-6);
    }

    #[test]
    fn test_evaluate_sh_clamps_negative_light() {
        let dc = Vector3::new(-10.0, 0.0, 10.0);
        let out = evaluate_sh(&dc, &[], 0, &Vector3::z());
        assert_eq!(out.color.x, 0.0);
        assert!(out.clamped[0]);
        assert!(!out.clamped[2]);
    }

    #[test]
    fn test_view_dependence_with_degree_one() {
        let dc = Vector3::zeros();
        let mut rest = vec![0.0f32; num_sh_rest(1) * 3];
        // Y_1^1 term (basis index 3 → rest index 2), red channel.
        rest[2 * 3] = -1.0;
        let a = evaluate_sh(&dc, &rest, 1, &Vector3::new(1.0, 0.0, 0.0));
        let b = evaluate_sh(&dc, &rest, 1, &Vector3::new(-1.0, 0.0, 0.0));
        assert!(a.color.x > b.color.x);
    }

    #[test]
    fn test_rgb_sh_roundtrip() {
        assert_relative_eq!(sh_to_rgb(rgb_to_sh(0.8)), 0.8, epsilon = 1e-6);
        assert_relative_eq!(rgb_to_sh(0.5), 0.0, epsilon = 1e-9);
    }
}
