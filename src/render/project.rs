//! World → screen projection of both primitive variants.
//!
//! Degenerate or out-of-view primitives are culled here and never produce a
//! record; nothing downstream has to re-check them.

use crate::core::math::{build_covariance_3d, max_eigenvalue_2x2};
use crate::core::sh::{evaluate_sh, ShColor};
use crate::core::{Camera, GaussianCloud, PrimitiveStore, Scene, TriangleSoup};
use crate::diff::covariance_grad::project_covariance_2d;
use crate::diff::project_grad::clip_to_pixel;
use crate::render::footprint::{Ellipse, Footprint, TriangleWindow};
use crate::render::tile::PixelRect;
use crate::render::RenderConfig;
use log::{debug, warn};
use nalgebra::{Vector2, Vector3};
use rayon::prelude::*;

/// Low-pass filter added to the projected covariance diagonal.
pub const COVARIANCE_DILATION: f32 = 0.3;

/// Screen-space record of one visible primitive.
#[derive(Clone, Debug)]
pub struct ProjectedPrimitive {
    /// Index into the primitive store.
    pub index: usize,
    /// Pixel-space center (2D centroid for triangles).
    pub mean: Vector2<f32>,
    /// Camera-space depth used for sorting and the depth buffer.
    pub depth: f32,
    pub color: ShColor,
    pub opacity: f32,
    pub radius: f32,
    pub rect: PixelRect,
    pub footprint: Footprint,
}

impl ProjectedPrimitive {
    pub fn weight(&self, pixel: &Vector2<f32>) -> f32 {
        self.footprint.weight(&self.mean, pixel)
    }
}

enum Culled {
    OutOfView,
    NonFinite,
}

/// Project every primitive of `scene`, returning records in store order.
pub fn project_scene(camera: &Camera, scene: &Scene, sh_degree: usize, config: &RenderConfig) -> Vec<ProjectedPrimitive> {
    let results: Vec<Result<ProjectedPrimitive, Culled>> = match scene {
        Scene::Gaussians(cloud) => (0..cloud.len())
            .into_par_iter()
            .map(|i| project_gaussian(camera, cloud, i, sh_degree, config))
            .collect(),
        Scene::Triangles(soup) => (0..soup.len())
            .into_par_iter()
            .map(|i| project_triangle(camera, soup, i, sh_degree, config))
            .collect(),
    };

    let mut non_finite = 0usize;
    let mut records = Vec::with_capacity(results.len());
    for r in results {
        match r {
            Ok(rec) => records.push(rec),
            Err(Culled::NonFinite) => non_finite += 1,
            Err(Culled::OutOfView) => {}
        }
    }
    if non_finite > 0 {
        warn!("culled {non_finite} {} with non-finite projection", scene.kind_name());
    }
    debug!("projected {}/{} {}", records.len(), scene.len(), scene.kind_name());
    records
}

/// The color clamp would turn a NaN coefficient into black, so check them here.
fn finite_coefficients(dc: &Vector3<f32>, rest: &[f32]) -> bool {
    dc.iter().chain(rest).all(|c| c.is_finite())
}

fn project_gaussian(
    camera: &Camera,
    cloud: &GaussianCloud,
    i: usize,
    sh_degree: usize,
    config: &RenderConfig,
) -> Result<ProjectedPrimitive, Culled> {
    let opacity = cloud.opacity(i);
    if !opacity.is_finite() || !finite_coefficients(&cloud.dc(i), cloud.rest(i)) {
        return Err(Culled::NonFinite);
    }
    let position = cloud.position(i);
    let point_cam = camera.world_to_camera(&position);
    if !point_cam.iter().all(|v| v.is_finite()) {
        return Err(Culled::NonFinite);
    }
    if point_cam.z < config.near {
        return Err(Culled::OutOfView);
    }

    let mean = clip_to_pixel(&(camera.full_projection * position.push(1.0)), camera.width, camera.height);

    let sigma = build_covariance_3d(&cloud.scale(i), &cloud.rotation(i));
    let proj = project_covariance_2d(
        &point_cam,
        &camera.view_rotation(),
        camera.fx,
        camera.fy,
        camera.tan_half_fov(),
        &sigma,
    );
    let cov = [
        proj.cov2d[(0, 0)] + COVARIANCE_DILATION,
        proj.cov2d[(0, 1)],
        proj.cov2d[(1, 1)] + COVARIANCE_DILATION,
    ];
    if !mean.iter().chain(cov.iter()).all(|v| v.is_finite()) {
        return Err(Culled::NonFinite);
    }
    let ellipse = Ellipse::from_cov(cov).ok_or(Culled::OutOfView)?;

    let radius = 3.0 * max_eigenvalue_2x2(cov[0], cov[1], cov[2]).sqrt().ceil();
    if !(radius > 0.0) {
        return Err(Culled::OutOfView);
    }

    let rect = PixelRect::from_bounds(
        mean.x - radius,
        mean.y - radius,
        mean.x + radius,
        mean.y + radius,
        camera.width,
        camera.height,
    );
    if rect.is_empty() {
        return Err(Culled::OutOfView);
    }

    Ok(ProjectedPrimitive {
        index: i,
        mean,
        depth: point_cam.z,
        color: evaluate_sh(&cloud.dc(i), cloud.rest(i), sh_degree, &camera.view_direction(&position)),
        opacity,
        radius,
        rect,
        footprint: Footprint::Ellipse(ellipse),
    })
}

fn project_triangle(
    camera: &Camera,
    soup: &TriangleSoup,
    i: usize,
    sh_degree: usize,
    config: &RenderConfig,
) -> Result<ProjectedPrimitive, Culled> {
    let opacity = soup.opacity(i);
    let smoothness = soup.smoothness(i);
    if !opacity.is_finite() || !smoothness.is_finite() || !finite_coefficients(&soup.dc(i), soup.rest(i)) {
        return Err(Culled::NonFinite);
    }
    let verts = soup.triangle_vertices(i);
    let mut depth = 0.0;
    for v in &verts {
        let z = camera.world_to_camera(v).z;
        if !z.is_finite() {
            return Err(Culled::NonFinite);
        }
        if z < config.near {
            return Err(Culled::OutOfView);
        }
        depth += z / 3.0;
    }

    let px = verts.map(|v| clip_to_pixel(&(camera.full_projection * v.push(1.0)), camera.width, camera.height));
    if !px.iter().all(|p| p.iter().all(|c| c.is_finite())) {
        return Err(Culled::NonFinite);
    }

    let window = TriangleWindow::new(px, smoothness);
    // Rejects back-facing (A2 ≤ 0) and sub-pixel triangles.
    if !(window.area2 >= 2.0 * config.min_triangle_area) {
        return Err(Culled::OutOfView);
    }

    let mean = window.centroid();
    let radius = px.iter().map(|p| (p - mean).norm()).fold(0.0f32, f32::max);
    let min = px.iter().fold(Vector2::repeat(f32::INFINITY), |a, p| a.inf(p));
    let max = px.iter().fold(Vector2::repeat(f32::NEG_INFINITY), |a, p| a.sup(p));
    let rect = PixelRect::from_bounds(min.x, min.y, max.x, max.y, camera.width, camera.height);
    if rect.is_empty() {
        return Err(Culled::OutOfView);
    }

    let centroid: Vector3<f32> = soup.centroid(i);
    Ok(ProjectedPrimitive {
        index: i,
        mean,
        depth,
        color: evaluate_sh(&soup.dc(i), soup.rest(i), sh_degree, &camera.view_direction(&centroid)),
        opacity,
        radius,
        rect,
        footprint: Footprint::Triangle(window),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Gaussian, Triangle};
    use approx::assert_relative_eq;
    use nalgebra::Matrix4;

    fn camera() -> Camera {
        Camera::new(Matrix4::identity(), 1.2, 1.2, 64, 64)
    }

    fn cloud(points: &[Vector3<f32>]) -> Scene {
        let gs: Vec<Gaussian> = points
            .iter()
            .map(|p| Gaussian::isotropic(*p, (0.05f32).ln(), 0.0, Vector3::zeros(), 0))
            .collect();
        Scene::Gaussians(GaussianCloud::from_gaussians(0, &gs))
    }

    #[test]
    fn test_centered_gaussian_projects_to_image_center() {
        let recs = project_scene(&camera(), &cloud(&[Vector3::new(0.0, 0.0, 3.0)]), 0, &RenderConfig::default());
        assert_eq!(recs.len(), 1);
        assert_relative_eq!(recs[0].mean, Vector2::new(31.5, 31.5), epsilon = 1e-3);
        assert_relative_eq!(recs[0].depth, 3.0, epsilon = 1e-6);
        assert_relative_eq!(recs[0].opacity, 0.5, epsilon = 1e-6);
        assert!(recs[0].radius >= 3.0);
        assert!(recs[0].rect.contains(31, 31));
    }

    #[test]
    fn test_near_and_offscreen_gaussians_are_culled() {
        let scene = cloud(&[
            Vector3::new(0.0, 0.0, 0.1),
            Vector3::new(0.0, 0.0, -2.0),
            Vector3::new(50.0, 0.0, 2.0),
            Vector3::new(0.0, 0.0, 2.0),
        ]);
        let recs = project_scene(&camera(), &scene, 0, &RenderConfig::default());
        assert_eq!(recs.len(), 1);
        assert_eq!(recs[0].index, 3);
    }

    #[test]
    fn test_nan_gaussian_is_culled() {
        let recs = project_scene(&camera(), &cloud(&[Vector3::new(f32::NAN, 0.0, 2.0)]), 0, &RenderConfig::default());
        assert!(recs.is_empty());
    }

    #[test]
    fn test_non_finite_opacity_and_color_are_culled() {
        let mut g = Gaussian::isotropic(Vector3::new(0.0, 0.0, 2.0), (0.05f32).ln(), f32::NAN, Vector3::zeros(), 0);
        let nan_opacity = Scene::Gaussians(GaussianCloud::from_gaussians(0, &[g.clone()]));
        assert!(project_scene(&camera(), &nan_opacity, 0, &RenderConfig::default()).is_empty());

        g.opacity_logit = 0.0;
        g.sh_dc.y = f32::NAN;
        let nan_color = Scene::Gaussians(GaussianCloud::from_gaussians(0, &[g]));
        assert!(project_scene(&camera(), &nan_color, 0, &RenderConfig::default()).is_empty());
    }

    #[test]
    fn test_non_finite_triangle_parameters_are_culled() {
        let config = RenderConfig::default();
        let nan_smoothness = Triangle::new(front_facing(), 0.0, f32::NAN, Vector3::zeros(), 0);
        let nan_opacity = Triangle::new(front_facing(), f32::NAN, 0.0, Vector3::zeros(), 0);
        for t in [nan_smoothness, nan_opacity] {
            let scene = Scene::Triangles(TriangleSoup::from_triangles(0, &[t]));
            assert!(project_scene(&camera(), &scene, 0, &config).is_empty());
        }
    }

    fn soup(verts: [Vector3<f32>; 3]) -> Scene {
        Scene::Triangles(TriangleSoup::from_triangles(0, &[Triangle::new(verts, 0.0, 0.0, Vector3::zeros(), 0)]))
    }

    // Counter-clockwise on screen (x right, y down) for the identity camera.
    fn front_facing() -> [Vector3<f32>; 3] {
        [
            Vector3::new(-0.5, -0.5, 2.0),
            Vector3::new(0.5, -0.5, 2.0),
            Vector3::new(-0.5, 0.5, 2.0),
        ]
    }

    #[test]
    fn test_triangle_projection() {
        let recs = project_scene(&camera(), &soup(front_facing()), 0, &RenderConfig::default());
        assert_eq!(recs.len(), 1);
        let r = &recs[0];
        assert_relative_eq!(r.depth, 2.0, epsilon = 1e-6);
        match r.footprint {
            Footprint::Triangle(w) => assert!(w.area2 > 0.0),
            _ => panic!("expected triangle footprint"),
        }
        assert!(r.rect.width() > 10 && r.rect.height() > 10);
    }

    #[test]
    fn test_back_facing_and_tiny_triangles_are_culled() {
        let [a, b, c] = front_facing();
        let config = RenderConfig::default();
        assert!(project_scene(&camera(), &soup([a, c, b]), 0, &config).is_empty());
        let tiny = [a, a + Vector3::new(0.0, 1e-3, 0.0), a + Vector3::new(1e-3, 0.0, 0.0)];
        assert!(project_scene(&camera(), &soup(tiny), 0, &config).is_empty());
        let near = [Vector3::new(-0.5, -0.5, 0.1), b, c];
        assert!(project_scene(&camera(), &soup(near), 0, &config).is_empty());
    }
}
