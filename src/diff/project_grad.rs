//! Gradients for projecting world points to pixels.
//!
//! Forward:
//!   clip  = P · [p, 1]             (P = projection · view)
//!   ndc   = clip.xy / clip.w
//!   pixel = ((ndc + 1) · dim − 1) / 2
//!
//! Depth used for sorting and the depth buffer is the camera-space z, i.e.
//! the third row of the view matrix.

use nalgebra::{Matrix4, Vector2, Vector3, Vector4};

/// Pixel coordinates of a clip-space point.
pub fn clip_to_pixel(clip: &Vector4<f32>, width: u32, height: u32) -> Vector2<f32> {
    let w_inv = 1.0 / (clip.w + 1e-7);
    Vector2::new(
        crate::core::camera::ndc_to_pixel(clip.x * w_inv, width),
        crate::core::camera::ndc_to_pixel(clip.y * w_inv, height),
    )
}

/// Gradient of `clip_to_pixel(P · [p, 1])` w.r.t. the world point `p`.
pub fn world_to_pixel_grad(
    full_projection: &Matrix4<f32>,
    point: &Vector3<f32>,
    width: u32,
    height: u32,
    d_pixel: &Vector2<f32>,
) -> Vector3<f32> {
    let clip = full_projection * point.push(1.0);
    let w_inv = 1.0 / (clip.w + 1e-7);
    let half_w = 0.5 * width as f32;
    let half_h = 0.5 * height as f32;

    // du/dclip.x = W / (2w), du/dclip.w = -W clip.x / (2w²); same for v.
    let d_clip = Vector4::new(
        d_pixel.x * half_w * w_inv,
        d_pixel.y * half_h * w_inv,
        0.0,
        -(d_pixel.x * half_w * clip.x + d_pixel.y * half_h * clip.y) * w_inv * w_inv,
    );

    full_projection.fixed_view::<4, 3>(0, 0).transpose() * d_clip
}

/// Gradient of the camera-space depth `(view · [p, 1]).z` w.r.t. `p`.
pub fn depth_grad(view: &Matrix4<f32>, d_depth: f32) -> Vector3<f32> {
    Vector3::new(view[(2, 0)], view[(2, 1)], view[(2, 2)]) * d_depth
}

/// Pixel-space mean gradient expressed in NDC units, `(d_u · W/2, d_v · H/2)`.
pub fn pixel_grad_to_ndc(d_pixel: &Vector2<f32>, width: u32, height: u32) -> Vector2<f32> {
    Vector2::new(d_pixel.x * 0.5 * width as f32, d_pixel.y * 0.5 * height as f32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Camera;
    use approx::assert_relative_eq;

    #[test]
    fn test_world_to_pixel_grad_matches_finite_difference() {
        let cam = Camera::look_at(
            Vector3::new(1.0, -0.5, -4.0),
            Vector3::zeros(),
            Vector3::new(0.0, -1.0, 0.0),
            0.9,
            64,
            48,
        );
        let p = Vector3::new(0.2, 0.3, 0.5);
        let d_pixel = Vector2::new(0.7, -0.4);
        let loss = |q: &Vector3<f32>| {
            let clip = cam.full_projection * q.push(1.0);
            clip_to_pixel(&clip, 64, 48).dot(&d_pixel)
        };
        let grad = world_to_pixel_grad(&cam.full_projection, &p, 64, 48, &d_pixel);

        let eps = 1e-3f32;
        for k in 0..3 {
            let mut pp = p;
            let mut pm = p;
            pp[k] += eps;
            pm[k] -= eps;
            let numeric = (loss(&pp) - loss(&pm)) / (2.0 * eps);
            assert_relative_eq!(grad[k], numeric, epsilon = 5e-2, max_relative = 1e-2);
        }
    }

    #[test]
    fn test_clip_to_pixel_matches_camera() {
        let cam = Camera::new(Matrix4::identity(), 1.0, 0.8, 40, 30);
        let p = Vector3::new(0.1, -0.2, 2.0);
        let a = clip_to_pixel(&(cam.full_projection * p.push(1.0)), 40, 30);
        let b = cam.world_to_pixel(&p).unwrap();
        assert_relative_eq!(a, b, epsilon = 1e-3);
    }
}
