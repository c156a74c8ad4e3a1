//! Value and gradients of the screen-space Gaussian weight
//! `w = exp(-0.5 * dᵀ Σ⁻¹ d)` with `d = pixel - mean`, as evaluated by
//! `render::footprint::Ellipse::weight`.
//!
//! With `u = Σ⁻¹ d`:
//!   dw/dmean = w u
//!   dw/dΣ    = 0.5 w u uᵀ
//! The off-diagonal entry appears twice in Σ, so its gradient is doubled.

use nalgebra::Vector2;

#[derive(Clone, Copy, Debug)]
pub struct Gaussian2DEvalGrads {
    pub value: f32,
    pub d_mean: Vector2<f32>,
    pub d_cov_xx: f32,
    pub d_cov_xy: f32,
    pub d_cov_yy: f32,
}

/// `cov_*` are the entries of Σ = [[xx, xy], [xy, yy]]. The projector adds a
/// dilation to the diagonal, so Σ is assumed invertible.
pub fn gaussian2d_evaluate_with_grads(
    mean: Vector2<f32>,
    cov_xx: f32,
    cov_xy: f32,
    cov_yy: f32,
    pixel: Vector2<f32>,
) -> Gaussian2DEvalGrads {
    let d = pixel - mean;
    let inv_det = 1.0 / (cov_xx * cov_yy - cov_xy * cov_xy);
    let u = Vector2::new(
        (cov_yy * d.x - cov_xy * d.y) * inv_det,
        (cov_xx * d.y - cov_xy * d.x) * inv_det,
    );
    let value = (-0.5 * d.dot(&u)).exp();

    Gaussian2DEvalGrads {
        value,
        d_mean: u * value,
        d_cov_xx: 0.5 * value * u.x * u.x,
        d_cov_xy: value * u.x * u.y,
        d_cov_yy: 0.5 * value * u.y * u.y,
    }
}
