//! Gradients for spherical harmonics evaluation.
//!
//! Forward op (in `core/sh.rs`):
//! `color = max(sum_i basis[i] * coeff[i] + 0.5, 0)` (per-channel).
//!
//! The map is linear in the coefficients, so the gradient is the basis times
//! the upstream gradient, masked where the `≥ 0` clamp was active. The
//! view-direction dependence is not differentiated.

use crate::core::sh::{num_sh_rest, ShColor};
use nalgebra::Vector3;

/// Write dL/d(DC) into `d_dc` and dL/d(rest) into `d_rest` (`M × 3`,
/// coefficient-major). Only coefficients up to `active_degree` receive
/// gradient.
pub fn evaluate_sh_grad_coeffs(
    basis: &[f32; 16],
    active_degree: usize,
    eval: &ShColor,
    d_color: &Vector3<f32>,
    d_dc: &mut [f32],
    d_rest: &mut [f32],
) {
    assert_eq!(d_dc.len(), 3);
    let masked = Vector3::new(
        if eval.clamped[0] { 0.0 } else { d_color.x },
        if eval.clamped[1] { 0.0 } else { d_color.y },
        if eval.clamped[2] { 0.0 } else { d_color.z },
    );

    for c in 0..3 {
        d_dc[c] += basis[0] * masked[c];
    }

    let used = num_sh_rest(active_degree).min(d_rest.len() / 3);
    for k in 0..used {
        let b = basis[k + 1];
        for c in 0..3 {
            d_rest[k * 3 + c] += b * masked[c];
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::sh::{evaluate_sh, sh_basis};
    use approx::assert_relative_eq;

    #[test]
    fn test_sh_grad_matches_finite_difference() {
        let dir = Vector3::new(0.3, -0.4, 0.866).normalize();
        let dc = Vector3::new(0.2, -0.1, 0.4);
        let mut rest: Vec<f32> = (0..45).map(|i| 0.001 * (i as f32 - 20.0)).collect();
        let d_color = Vector3::new(0.5, -1.0, 0.25);
        let loss = |dc: &Vector3<f32>, rest: &[f32]| evaluate_sh(dc, rest, 3, &dir).color.dot(&d_color);

        let eval = evaluate_sh(&dc, &rest, 3, &dir);
        assert!(eval.clamped.iter().all(|c| !c));
        let mut d_dc = [0.0f32; 3];
        let mut d_rest = vec![0.0f32; 45];
        evaluate_sh_grad_coeffs(&sh_basis(&dir, 3), 3, &eval, &d_color, &mut d_dc, &mut d_rest);

        let eps = 1e-2f32;
        for k in [0usize, 7, 20, 44] {
            let orig = rest[k];
            rest[k] = orig + eps;
            let lp = loss(&dc, &rest);
            rest[k] = orig - eps;
            let lm = loss(&dc, &rest);
            rest[k] = orig;
            assert_relative_eq!(d_rest[k], (lp - lm) / (2.0 * eps), epsilon = 1e-3);
        }
        let lp = loss(&(dc + Vector3::new(eps, 0.0, 0.0)), &rest);
        let lm = loss(&(dc - Vector3::new(eps, 0.0, 0.0)), &rest);
        assert_relative_eq!(d_dc[0], (lp - lm) / (2.0 * eps), epsilon = 1e-3);
    }

    #[test]
    fn test_clamped_channel_gets_no_gradient() {
        let dir = Vector3::z();
        let dc = Vector3::new(-10.0, 1.0, 1.0);
        let eval = evaluate_sh(&dc, &[], 0, &dir);
        let mut d_dc = [0.0f32; 3];
        evaluate_sh_grad_coeffs(&sh_basis(&dir, 0), 0, &eval, &Vector3::repeat(1.0), &mut d_dc, &mut []);
        assert_eq!(d_dc[0], 0.0);
        assert!(d_dc[1] > 0.0);
    }
}
