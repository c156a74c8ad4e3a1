//! Backward pass of the rasterizer.
//!
//! Walks the exact tile lists saved by `forward`, runs the blend backward per
//! pixel and accumulates per-record screen-space gradients in thread-local
//! buffers (one per rayon fold), then chains them to store parameters.

use crate::core::math::build_covariance_3d;
use crate::core::sh::sh_basis;
use crate::core::{Camera, GaussianCloud, ParamGrads, ParamKind, PrimitiveStore, Scene, TriangleSoup};
use crate::diff::blend_grad::{blend_backward, blend_forward, BlendUpstream};
use crate::diff::covariance_grad::{covariance_3d_backward, project_covariance_2d, project_covariance_2d_backward};
use crate::diff::gaussian2d_grad::gaussian2d_evaluate_with_grads;
use crate::diff::math_grad::sigmoid_grad_from_sigmoid;
use crate::diff::project_grad::{depth_grad, pixel_grad_to_ndc, world_to_pixel_grad};
use crate::diff::sh_grad::evaluate_sh_grad_coeffs;
use crate::diff::triangle_grad::triangle_window_with_grads;
use crate::render::composite::{walk_pixel, Contribution};
use crate::render::footprint::Footprint;
use crate::render::{ForwardContext, RenderConfig, RenderOutput};
use nalgebra::{Vector2, Vector3};
use rayon::prelude::*;

/// Parameter gradients of one backward pass.
#[derive(Clone, Debug)]
pub struct Gradients {
    pub params: ParamGrads,
    /// Per primitive: norm of the screen-position gradient in NDC units
    /// (summed over vertices for triangles). Zero for culled primitives.
    pub screen_grad_norm: Vec<f32>,
}

/// Screen-space gradients, indexed by record slot.
struct ScreenGrads {
    d_mean: Vec<Vector2<f32>>,
    d_cov: Vec<Vector3<f32>>,
    d_verts: Vec<[Vector2<f32>; 3]>,
    d_log_smoothness: Vec<f32>,
    d_color: Vec<Vector3<f32>>,
    d_opacity: Vec<f32>,
    d_depth: Vec<f32>,
}

impl ScreenGrads {
    fn new(n: usize) -> Self {
        Self {
            d_mean: vec![Vector2::zeros(); n],
            d_cov: vec![Vector3::zeros(); n],
            d_verts: vec![[Vector2::zeros(); 3]; n],
            d_log_smoothness: vec![0.0; n],
            d_color: vec![Vector3::zeros(); n],
            d_opacity: vec![0.0; n],
            d_depth: vec![0.0; n],
        }
    }

    fn merge(mut self, other: Self) -> Self {
        for i in 0..self.d_color.len() {
            self.d_mean[i] += other.d_mean[i];
            self.d_cov[i] += other.d_cov[i];
            for k in 0..3 {
                self.d_verts[i][k] += other.d_verts[i][k];
            }
            self.d_log_smoothness[i] += other.d_log_smoothness[i];
            self.d_color[i] += other.d_color[i];
            self.d_opacity[i] += other.d_opacity[i];
            self.d_depth[i] += other.d_depth[i];
        }
        self
    }
}

/// Gradients of a loss w.r.t. every parameter of `scene`, given the loss
/// gradients w.r.t. the rendered color (and optionally depth) buffers.
///
/// `output` must come from `forward` on the same scene generation.
pub fn backward(
    camera: &Camera,
    scene: &Scene,
    output: &RenderOutput,
    d_color: &[Vector3<f32>],
    d_depth: Option<&[f32]>,
    config: &RenderConfig,
) -> Gradients {
    let num_pixels = (output.width * output.height) as usize;
    assert_eq!(d_color.len(), num_pixels);
    if let Some(d) = d_depth {
        assert_eq!(d.len(), num_pixels);
    }
    assert_eq!(output.context.generation, scene.generation(), "render output is from a different population");

    let screen = screen_gradients(&output.context, output.width, d_color, d_depth, config);
    match scene {
        Scene::Gaussians(cloud) => gaussian_param_grads(camera, cloud, &output.context, &screen),
        Scene::Triangles(soup) => triangle_param_grads(camera, soup, &output.context, &screen),
    }
}

fn screen_gradients(
    ctx: &ForwardContext,
    width: u32,
    d_color: &[Vector3<f32>],
    d_depth: Option<&[f32]>,
    config: &RenderConfig,
) -> ScreenGrads {
    let n = ctx.records.len();
    let grid = ctx.assignment.grid;
    let bg = config.background();

    (0..grid.num_tiles())
        .into_par_iter()
        .fold(
            || ScreenGrads::new(n),
            |mut acc, t| {
                let entries = ctx.assignment.tile_entries(t);
                if entries.len() <= config.skip_threshold {
                    return acc;
                }
                let rect = grid.tile_rect(t);

                let mut contribs: Vec<Contribution> = Vec::new();
                for y in rect.y0..rect.y1 {
                    for x in rect.x0..rect.x1 {
                        contribs.clear();
                        walk_pixel(&ctx.records, entries, x, y, config, |c| contribs.push(*c));
                        if contribs.is_empty() {
                            continue;
                        }

                        let i = (y * width + x) as usize;
                        let alphas: Vec<f32> = contribs.iter().map(|c| c.alpha).collect();
                        let colors: Vec<Vector3<f32>> = contribs.iter().map(|c| ctx.records[c.slot].color.color).collect();
                        let depths: Vec<f32> = contribs.iter().map(|c| ctx.records[c.slot].depth).collect();
                        let fwd = blend_forward(&alphas, &colors, &depths, &bg);
                        let up = BlendUpstream {
                            d_color: d_color[i],
                            d_depth: d_depth.map_or(0.0, |d| d[i]),
                            d_alpha: 0.0,
                        };
                        let g = blend_backward(&alphas, &colors, &depths, &bg, &fwd, &up);

                        let pixel = Vector2::new(x as f32, y as f32);
                        for (k, c) in contribs.iter().enumerate() {
                            let rec = &ctx.records[c.slot];
                            acc.d_color[c.slot] += g.d_colors[k];
                            acc.d_depth[c.slot] += g.d_depths[k];
                            if c.capped {
                                continue;
                            }

                            acc.d_opacity[c.slot] += g.d_alphas[k] * c.weight;
                            let d_weight = g.d_alphas[k] * rec.opacity;
                            match &rec.footprint {
                                Footprint::Ellipse(e) => {
                                    let wg = gaussian2d_evaluate_with_grads(rec.mean, e.cov[0], e.cov[1], e.cov[2], pixel);
                                    acc.d_mean[c.slot] += wg.d_mean * d_weight;
                                    acc.d_cov[c.slot] += Vector3::new(wg.d_cov_xx, wg.d_cov_xy, wg.d_cov_yy) * d_weight;
                                }
                                Footprint::Triangle(window) => {
                                    let tg = triangle_window_with_grads(window, &pixel);
                                    for v in 0..3 {
                                        acc.d_verts[c.slot][v] += tg.d_verts[v] * d_weight;
                                    }
                                    acc.d_log_smoothness[c.slot] += tg.d_log_smoothness * d_weight;
                                }
                            }
                        }
                    }
                }
                acc
            },
        )
        .reduce(|| ScreenGrads::new(n), ScreenGrads::merge)
}

fn gaussian_param_grads(camera: &Camera, cloud: &GaussianCloud, ctx: &ForwardContext, s: &ScreenGrads) -> Gradients {
    let n = cloud.len();
    let rest = cloud.sh_rest_len() * 3;
    let mut d_positions = vec![0.0f32; n * 3];
    let mut d_log_scales = vec![0.0f32; n * 3];
    let mut d_rotations = vec![0.0f32; n * 4];
    let mut d_opacity = vec![0.0f32; n];
    let mut d_dc = vec![0.0f32; n * 3];
    let mut d_rest = vec![0.0f32; n * rest];
    let mut screen_grad_norm = vec![0.0f32; n];

    let view_rotation = camera.view_rotation();
    let (w, h) = (camera.width, camera.height);

    for (slot, rec) in ctx.records.iter().enumerate() {
        let i = rec.index;
        let position = cloud.position(i);
        let rotation = cloud.rotation(i);

        let mut d_pos = world_to_pixel_grad(&camera.full_projection, &position, w, h, &s.d_mean[slot]);
        d_pos += depth_grad(&camera.view, s.d_depth[slot]);

        let point_cam = camera.world_to_camera(&position);
        let sigma = build_covariance_3d(&cloud.scale(i), &rotation);
        let proj = project_covariance_2d(
            &point_cam,
            &view_rotation,
            camera.fx,
            camera.fy,
            camera.tan_half_fov(),
            &sigma,
        );
        let (d_sigma, d_point_cam) = project_covariance_2d_backward(
            &proj,
            &point_cam,
            &view_rotation,
            camera.fx,
            camera.fy,
            &sigma,
            &s.d_cov[slot],
        );
        d_pos += view_rotation.transpose() * d_point_cam;
        let (d_ls, d_q) = covariance_3d_backward(&cloud.log_scale(i), &rotation, &d_sigma);

        d_positions[i * 3..i * 3 + 3].copy_from_slice(d_pos.as_slice());
        d_log_scales[i * 3..i * 3 + 3].copy_from_slice(d_ls.as_slice());
        d_rotations[i * 4..i * 4 + 4].copy_from_slice(d_q.as_slice());
        d_opacity[i] = s.d_opacity[slot] * sigmoid_grad_from_sigmoid(rec.opacity);

        let basis = sh_basis(&camera.view_direction(&position), ctx.sh_degree);
        evaluate_sh_grad_coeffs(
            &basis,
            ctx.sh_degree,
            &rec.color,
            &s.d_color[slot],
            &mut d_dc[i * 3..i * 3 + 3],
            &mut d_rest[i * rest..(i + 1) * rest],
        );

        screen_grad_norm[i] = pixel_grad_to_ndc(&s.d_mean[slot], w, h).norm();
    }

    Gradients {
        params: ParamGrads::from_groups(vec![
            (ParamKind::Positions, d_positions),
            (ParamKind::LogScales, d_log_scales),
            (ParamKind::Rotations, d_rotations),
            (ParamKind::OpacityLogits, d_opacity),
            (ParamKind::ShDc, d_dc),
            (ParamKind::ShRest, d_rest),
        ]),
        screen_grad_norm,
    }
}

fn triangle_param_grads(camera: &Camera, soup: &TriangleSoup, ctx: &ForwardContext, s: &ScreenGrads) -> Gradients {
    let n = soup.len();
    let rest = soup.sh_rest_len() * 3;
    let mut d_vertices = vec![0.0f32; n * 9];
    let mut d_opacity = vec![0.0f32; n];
    let mut d_log_smoothness = vec![0.0f32; n];
    let mut d_dc = vec![0.0f32; n * 3];
    let mut d_rest = vec![0.0f32; n * rest];
    let mut screen_grad_norm = vec![0.0f32; n];

    let (w, h) = (camera.width, camera.height);

    for (slot, rec) in ctx.records.iter().enumerate() {
        let i = rec.index;
        let verts = soup.triangle_vertices(i);
        // Depth is the mean vertex depth.
        let d_vertex_depth = depth_grad(&camera.view, s.d_depth[slot] / 3.0);

        let mut d_screen = Vector2::zeros();
        for (k, v) in verts.iter().enumerate() {
            let d_px = &s.d_verts[slot][k];
            let g = world_to_pixel_grad(&camera.full_projection, v, w, h, d_px) + d_vertex_depth;
            d_vertices[i * 9 + k * 3..i * 9 + k * 3 + 3].copy_from_slice(g.as_slice());
            d_screen += d_px;
        }

        d_log_smoothness[i] = s.d_log_smoothness[slot];
        d_opacity[i] = s.d_opacity[slot] * sigmoid_grad_from_sigmoid(rec.opacity);

        let basis = sh_basis(&camera.view_direction(&soup.centroid(i)), ctx.sh_degree);
        evaluate_sh_grad_coeffs(
            &basis,
            ctx.sh_degree,
            &rec.color,
            &s.d_color[slot],
            &mut d_dc[i * 3..i * 3 + 3],
            &mut d_rest[i * rest..(i + 1) * rest],
        );

        screen_grad_norm[i] = pixel_grad_to_ndc(&d_screen, w, h).norm();
    }

    Gradients {
        params: ParamGrads::from_groups(vec![
            (ParamKind::Vertices, d_vertices),
            (ParamKind::OpacityLogits, d_opacity),
            (ParamKind::LogSmoothness, d_log_smoothness),
            (ParamKind::ShDc, d_dc),
            (ParamKind::ShRest, d_rest),
        ]),
        screen_grad_norm,
    }
}
