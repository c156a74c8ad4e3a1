//! Screen-space footprints and their per-pixel weight.
//!
//! Both rasterizer backends and the backward pass evaluate weights through
//! [`Footprint::weight`], so they can never disagree on coverage.

use nalgebra::Vector2;

/// 2D Gaussian footprint.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Ellipse {
    /// Regularized covariance `(xx, xy, yy)`.
    pub cov: [f32; 3],
    /// Inverse covariance `(xx, xy, yy)`.
    pub conic: [f32; 3],
}

impl Ellipse {
    /// Build from a regularized covariance. `None` if not invertible.
    pub fn from_cov(cov: [f32; 3]) -> Option<Self> {
        let det = cov[0] * cov[2] - cov[1] * cov[1];
        if !(det > 0.0) || !det.is_finite() {
            return None;
        }
        let inv_det = 1.0 / det;
        Some(Self {
            cov,
            conic: [cov[2] * inv_det, -cov[1] * inv_det, cov[0] * inv_det],
        })
    }

    /// `exp(-½ dᵀ Σ⁻¹ d)`, `d = pixel - mean`.
    pub fn weight(&self, mean: &Vector2<f32>, pixel: &Vector2<f32>) -> f32 {
        let dx = pixel.x - mean.x;
        let dy = pixel.y - mean.y;
        let power = -0.5 * (self.conic[0] * dx * dx + self.conic[2] * dy * dy) - self.conic[1] * dx * dy;
        if power > 0.0 {
            return 0.0;
        }
        power.exp()
    }
}

/// Soft triangle window: `max(sdf(p) / sdf(incenter), 0)^σ`.
///
/// With `cr_k(p) = cross(v_{k+1} - v_k, p - v_k)` (positive inside for a
/// front-facing triangle), the outward signed distance to edge k is
/// `-cr_k / |e_k|`, and `sdf(incenter) = -A2 / P` where `A2` is twice the
/// signed area and `P` the perimeter. The ratio therefore reduces to
/// `min_k(cr_k / |e_k|) · P / A2`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TriangleWindow {
    pub verts: [Vector2<f32>; 3],
    pub smoothness: f32,
    pub perimeter: f32,
    pub area2: f32,
}

/// Twice the signed area, positive for front-facing (counter-clockwise in
/// image coordinates with +y down) triangles.
pub fn signed_area2(v: &[Vector2<f32>; 3]) -> f32 {
    let e1 = v[1] - v[0];
    let e2 = v[2] - v[0];
    e1.x * e2.y - e1.y * e2.x
}

impl TriangleWindow {
    pub fn new(verts: [Vector2<f32>; 3], smoothness: f32) -> Self {
        let perimeter = (0..3).map(|k| (verts[(k + 1) % 3] - verts[k]).norm()).sum();
        Self {
            verts,
            smoothness,
            perimeter,
            area2: signed_area2(&verts),
        }
    }

    /// Edge-length-weighted vertex average (each vertex weighted by the
    /// length of the opposite edge).
    pub fn incenter(&self) -> Vector2<f32> {
        let v = &self.verts;
        let a = (v[2] - v[1]).norm();
        let b = (v[0] - v[2]).norm();
        let c = (v[1] - v[0]).norm();
        (v[0] * a + v[1] * b + v[2] * c) / (a + b + c + crate::core::math::EPSILON)
    }

    /// Edge with the largest outward distance: `(k, cr_k, |e_k|)`.
    pub fn closest_edge(&self, p: &Vector2<f32>) -> (usize, f32, f32) {
        let mut best = (0usize, 0.0f32, 1.0f32);
        let mut best_dist = f32::INFINITY;
        for k in 0..3 {
            let a = self.verts[k];
            let b = self.verts[(k + 1) % 3];
            let e = b - a;
            let len = e.norm() + crate::core::math::EPSILON;
            let cr = e.x * (p.y - a.y) - e.y * (p.x - a.x);
            let dist = cr / len;
            if dist < best_dist {
                best_dist = dist;
                best = (k, cr, len);
            }
        }
        best
    }

    /// `sdf(p) / sdf(incenter)`: 1 at the incenter, 0 on the boundary,
    /// negative outside.
    pub fn ratio(&self, p: &Vector2<f32>) -> f32 {
        let (_, cr, len) = self.closest_edge(p);
        cr * self.perimeter / (len * self.area2)
    }

    pub fn weight(&self, p: &Vector2<f32>) -> f32 {
        let ratio = self.ratio(p);
        if ratio <= 0.0 {
            return 0.0;
        }
        ratio.powf(self.smoothness)
    }

    pub fn centroid(&self) -> Vector2<f32> {
        (self.verts[0] + self.verts[1] + self.verts[2]) / 3.0
    }
}

/// Variant-specific part of a projected primitive.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Footprint {
    Ellipse(Ellipse),
    Triangle(TriangleWindow),
}

impl Footprint {
    /// Coverage weight of `pixel` for a primitive centered at `mean`.
    pub fn weight(&self, mean: &Vector2<f32>, pixel: &Vector2<f32>) -> f32 {
        match self {
            Footprint::Ellipse(e) => e.weight(mean, pixel),
            Footprint::Triangle(t) => t.weight(pixel),
        }
    }
}
