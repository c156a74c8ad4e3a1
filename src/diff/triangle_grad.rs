//! Gradients for the soft triangle window.
//!
//! Forward (see `render::footprint::TriangleWindow`):
//!   cr_k  = cross(v_{k+1} - v_k, p - v_k)
//!   k*    = argmin_k cr_k / |e_k|
//!   ratio = cr_k* · P / (|e_k*| · A2)
//!   w     = ratio^σ,  σ = exp(log_smoothness)
//!
//! The argmin is treated as a constant selection (subgradient on ties).

use crate::render::footprint::TriangleWindow;
use nalgebra::Vector2;

#[derive(Clone, Copy, Debug)]
pub struct TriangleWindowGrads {
    pub value: f32,
    /// dw/dv_k for each 2D vertex.
    pub d_verts: [Vector2<f32>; 3],
    /// dw/d(log σ).
    pub d_log_smoothness: f32,
}

impl TriangleWindowGrads {
    fn zero() -> Self {
        Self {
            value: 0.0,
            d_verts: [Vector2::zeros(); 3],
            d_log_smoothness: 0.0,
        }
    }
}

/// Evaluate the window at `pixel` together with its gradients.
pub fn triangle_window_with_grads(window: &TriangleWindow, pixel: &Vector2<f32>) -> TriangleWindowGrads {
    let (k, cr, len) = window.closest_edge(pixel);
    let perimeter = window.perimeter;
    let area2 = window.area2;
    let ratio = cr * perimeter / (len * area2);
    if !(ratio > 0.0) {
        return TriangleWindowGrads::zero();
    }

    let sigma = window.smoothness;
    let value = ratio.powf(sigma);
    let d_ratio = sigma * value / ratio;

    let v = &window.verts;
    let ia = k;
    let ib = (k + 1) % 3;
    let a = v[ia];
    let b = v[ib];
    let p = pixel;

    // ratio partials w.r.t. its four scalar factors.
    let r_cr = perimeter / (len * area2);
    let r_p = cr / (len * area2);
    let r_l = -ratio / len;
    let r_a2 = -ratio / area2;

    let mut d_verts = [Vector2::zeros(); 3];

    // cr
    d_verts[ia] += Vector2::new(b.y - p.y, p.x - b.x) * r_cr;
    d_verts[ib] += Vector2::new(p.y - a.y, -(p.x - a.x)) * r_cr;

    // |e_k|
    let e_k = (b - a) / len;
    d_verts[ib] += e_k * r_l;
    d_verts[ia] -= e_k * r_l;

    // perimeter
    for j in 0..3 {
        let e = v[(j + 1) % 3] - v[j];
        let unit = e / (e.norm() + crate::core::math::EPSILON);
        d_verts[(j + 1) % 3] += unit * r_p;
        d_verts[j] -= unit * r_p;
    }

    // A2 = cross(v1 - v0, v2 - v0)
    let d_a2_v1 = Vector2::new(v[2].y - v[0].y, -(v[2].x - v[0].x));
    let d_a2_v2 = Vector2::new(-(v[1].y - v[0].y), v[1].x - v[0].x);
    d_verts[1] += d_a2_v1 * r_a2;
    d_verts[2] += d_a2_v2 * r_a2;
    d_verts[0] -= (d_a2_v1 + d_a2_v2) * r_a2;

    for d in d_verts.iter_mut() {
        *d *= d_ratio;
    }

    TriangleWindowGrads {
        value,
        d_verts,
        d_log_smoothness: value * ratio.ln() * sigma,
    }
}
