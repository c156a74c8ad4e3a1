//! Initialization utilities for primitive populations.
//!
//! Both variants are seeded from a colored point cloud:
//! - position ↦ primitive position (Gaussian) or triangle centroid
//! - color ↦ SH DC term via `SH = (RGB - 0.5) / C0`
//! - size ↦ distance to the nearest neighbours

use crate::core::color::{detect_color_range, normalize_colors};
use crate::core::gaussian::{Gaussian, GaussianCloud};
use crate::core::math::inverse_sigmoid;
use crate::core::sh::rgb_to_sh;
use crate::core::triangle::{Triangle, TriangleSoup};
use nalgebra::Vector3;
use rand::Rng;
use rand_distr::{Distribution, UnitSphere};
use rayon::prelude::*;

/// Nearest neighbours averaged for the initial size.
const NEIGHBOURS: usize = 3;
/// Squared distances are floored at this value (duplicate points).
const MIN_DIST2: f32 = 1e-7;

/// A colored point cloud, colors in `[0, 1]`.
#[derive(Clone, Debug, Default)]
pub struct PointCloud {
    pub positions: Vec<Vector3<f32>>,
    pub colors: Vec<Vector3<f32>>,
}

impl PointCloud {
    /// Build from positions and colors given either in `[0, 1]` or `[0, 255]`.
    pub fn new(positions: Vec<Vector3<f32>>, colors: Vec<Vector3<f32>>) -> Self {
        assert_eq!(positions.len(), colors.len());
        let range = detect_color_range(&colors);
        Self {
            positions,
            colors: normalize_colors(&colors, range),
        }
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}

/// Mean squared distance from every point to its `NEIGHBOURS` nearest
/// neighbours (brute force, parallel over points).
pub fn mean_neighbour_dist2(positions: &[Vector3<f32>]) -> Vec<f32> {
    positions
        .par_iter()
        .enumerate()
        .map(|(i, p)| {
            let mut best = [f32::INFINITY; NEIGHBOURS];
            for (j, q) in positions.iter().enumerate() {
                if i == j {
                    continue;
                }
                let d2 = (p - q).norm_squared();
                if d2 < best[NEIGHBOURS - 1] {
                    best[NEIGHBOURS - 1] = d2;
                    best.sort_by(f32::total_cmp);
                }
            }
            let found: Vec<f32> = best.iter().copied().filter(|d| d.is_finite()).collect();
            if found.is_empty() {
                return 1.0;
            }
            (found.iter().sum::<f32>() / found.len() as f32).max(MIN_DIST2)
        })
        .collect()
}

/// Radius of the sphere around the centroid of `centers` that holds them
/// all, padded by 10%. Used as the scene extent for density thresholds.
pub fn scene_extent(centers: &[Vector3<f32>]) -> f32 {
    if centers.is_empty() {
        return 1.0;
    }
    let mean = centers.iter().sum::<Vector3<f32>>() / centers.len() as f32;
    let radius = centers
        .iter()
        .map(|c| (c - mean).norm())
        .fold(0.0f32, f32::max);
    if radius > 0.0 {
        radius * 1.1
    } else {
        1.0
    }
}

fn color_to_dc(color: &Vector3<f32>) -> Vector3<f32> {
    color.map(rgb_to_sh)
}

/// One isotropic Gaussian per point, sized by the neighbour distance.
pub fn gaussians_from_points(points: &PointCloud, sh_degree: usize, initial_opacity: f32) -> GaussianCloud {
    let dist2 = mean_neighbour_dist2(&points.positions);
    let opacity_logit = inverse_sigmoid(initial_opacity);

    let gaussians: Vec<Gaussian> = points
        .positions
        .iter()
        .zip(points.colors.iter())
        .zip(dist2.iter())
        .map(|((p, c), d2)| Gaussian::isotropic(*p, d2.sqrt().ln(), opacity_logit, color_to_dc(c), sh_degree))
        .collect();

    GaussianCloud::from_gaussians(sh_degree, &gaussians)
}

/// One equilateral triangle per point, centered on the point, lying in a
/// random plane, with circumradius equal to the neighbour distance.
pub fn triangles_from_points<R: Rng + ?Sized>(
    points: &PointCloud,
    sh_degree: usize,
    initial_opacity: f32,
    rng: &mut R,
) -> TriangleSoup {
    let dist2 = mean_neighbour_dist2(&points.positions);
    let opacity_logit = inverse_sigmoid(initial_opacity);

    let mut soup = TriangleSoup::new(sh_degree);
    for ((p, c), d2) in points.positions.iter().zip(points.colors.iter()).zip(dist2.iter()) {
        let n: [f32; 3] = UnitSphere.sample(rng);
        let normal = Vector3::from(n);
        let radius = d2.sqrt();
        let (u, v) = plane_basis(&normal);
        let corner = |k: usize| {
            let angle = k as f32 * std::f32::consts::TAU / 3.0;
            p + (u * angle.cos() + v * angle.sin()) * radius
        };
        soup.push(&Triangle::new(
            [corner(0), corner(1), corner(2)],
            opacity_logit,
            0.0,
            color_to_dc(c),
            sh_degree,
        ));
    }
    soup
}

/// Two unit vectors spanning the plane orthogonal to `normal`.
fn plane_basis(normal: &Vector3<f32>) -> (Vector3<f32>, Vector3<f32>) {
    let helper = if normal.x.abs() < 0.9 {
        Vector3::x()
    } else {
        Vector3::y()
    };
    let u = normal.cross(&helper).normalize();
    let v = normal.cross(&u);
    (u, v)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::params::PrimitiveStore;
    use crate::core::sh::SH_C0;
    use approx::assert_relative_eq;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn grid_points() -> PointCloud {
        let mut positions = Vec::new();
        let mut colors = Vec::new();
        for x in 0..3 {
            for y in 0..3 {
                positions.push(Vector3::new(x as f32, y as f32, 5.0));
                colors.push(Vector3::new(255.0, 128.0, 0.0));
            }
        }
        PointCloud::new(positions, colors)
    }

    #[test]
    fn test_neighbour_distance_on_grid() {
        let d2 = mean_neighbour_dist2(&grid_points().positions);
        // Center point has 4 neighbours at distance 1.
        assert_relative_eq!(d2[4], 1.0, epsilon = 1e-6);
        // Corner: neighbours at 1, 1, sqrt(2).
        assert_relative_eq!(d2[0], 4.0 / 3.0, epsilon = 1e-6);
    }

    #[test]
    fn test_single_point_gets_unit_size() {
        assert_eq!(mean_neighbour_dist2(&[Vector3::zeros()]), vec![1.0]);
    }

    #[test]
    fn test_gaussians_from_points_color_and_scale() {
        let points = grid_points();
        let cloud = gaussians_from_points(&points, 2, 0.1);
        assert_eq!(cloud.len(), 9);
        // DC term reproduces the byte color through the SH affine map.
        let dc = cloud.dc(0);
        assert_relative_eq!(dc.x * SH_C0 + 0.5, 1.0, epsilon = 1e-5);
        assert_relative_eq!(dc.z * SH_C0 + 0.5, 0.0, epsilon = 1e-5);
        assert_relative_eq!(cloud.scale(4).x, 1.0, epsilon = 1e-5);
        assert_relative_eq!(cloud.opacity(0), 0.1, epsilon = 1e-5);
    }

    #[test]
    fn test_triangles_centered_on_points() {
        let points = grid_points();
        let mut rng = StdRng::seed_from_u64(3);
        let soup = triangles_from_points(&points, 0, 0.5, &mut rng);
        assert_eq!(soup.len(), 9);
        for i in 0..9 {
            assert_relative_eq!(soup.centroid(i), points.positions[i], epsilon = 1e-5);
        }
    }

    #[test]
    fn test_scene_extent() {
        let centers = vec![Vector3::new(-1.0, 0.0, 0.0), Vector3::new(1.0, 0.0, 0.0)];
        assert_relative_eq!(scene_extent(&centers), 1.1, epsilon = 1e-6);
        assert_relative_eq!(scene_extent(&[]), 1.0);
    }
}
