//! Adaptive density control: split, clone and prune.
//!
//! Statistics are gathered after every backward pass and consumed by
//! [`densify_and_prune`], which rebuilds the population in one pass
//! (split → clone → prune) and reports which new primitives carry over from
//! the old population so optimizer state can follow them.

use crate::core::math::inverse_sigmoid;
use crate::core::{longest_edge, GaussianCloud, PrimitiveStore, Scene, Triangle, TriangleSoup};
use log::info;
use nalgebra::Vector3;
use rand::Rng;
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DensityConfig {
    /// Run every this many iterations...
    pub interval: usize,
    /// ...within `[densify_from, densify_until)`.
    pub densify_from: usize,
    pub densify_until: usize,
    /// Average screen-gradient threshold for split/clone.
    pub grad_threshold: f32,
    /// Size threshold as a fraction of the scene extent.
    pub percent_dense: f32,
    /// Split children are scaled down by this factor.
    pub split_factor: f32,
    pub prune_opacity: f32,
    /// Screen radius (px) above which a primitive is pruned.
    pub max_screen_radius: f32,
    /// Opacity reset period; 0 disables it.
    pub opacity_reset_interval: usize,
    /// Opacity ceiling applied by the reset.
    pub opacity_reset_value: f32,
}

impl Default for DensityConfig {
    fn default() -> Self {
        Self {
            interval: 100,
            densify_from: 500,
            densify_until: 15_000,
            grad_threshold: 2e-4,
            percent_dense: 0.01,
            split_factor: 1.6,
            prune_opacity: 0.005,
            max_screen_radius: 20.0,
            opacity_reset_interval: 3000,
            opacity_reset_value: 0.01,
        }
    }
}

impl DensityConfig {
    pub fn should_densify(&self, iteration: usize) -> bool {
        self.interval > 0
            && iteration >= self.densify_from
            && iteration < self.densify_until
            && iteration % self.interval == 0
    }

    pub fn should_reset_opacity(&self, iteration: usize) -> bool {
        self.opacity_reset_interval > 0
            && iteration > 0
            && iteration < self.densify_until
            && iteration % self.opacity_reset_interval == 0
    }
}

/// Per-primitive tracking state between density-control passes.
#[derive(Clone, Debug, Default)]
pub struct DensityStats {
    pub grad_accum: Vec<f32>,
    pub denom: Vec<u32>,
    pub max_radii: Vec<f32>,
}

impl DensityStats {
    pub fn new(n: usize) -> Self {
        Self {
            grad_accum: vec![0.0; n],
            denom: vec![0; n],
            max_radii: vec![0.0; n],
        }
    }

    pub fn len(&self) -> usize {
        self.grad_accum.len()
    }

    pub fn is_empty(&self) -> bool {
        self.grad_accum.is_empty()
    }

    /// Accumulate one view's statistics for the visible primitives.
    pub fn record(&mut self, visible: &[bool], radii: &[f32], screen_grad_norm: &[f32]) {
        assert_eq!(visible.len(), self.len());
        assert_eq!(radii.len(), self.len());
        assert_eq!(screen_grad_norm.len(), self.len());
        for i in 0..self.len() {
            if !visible[i] {
                continue;
            }
            self.grad_accum[i] += screen_grad_norm[i];
            self.denom[i] += 1;
            self.max_radii[i] = self.max_radii[i].max(radii[i]);
        }
    }

    /// `accum / max(count, 1)`.
    pub fn average_grads(&self) -> Vec<f32> {
        self.grad_accum
            .iter()
            .zip(self.denom.iter())
            .map(|(g, &d)| g / d.max(1) as f32)
            .collect()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DensityOutcome {
    pub split: usize,
    pub cloned: usize,
    pub pruned: usize,
    pub before: usize,
    pub after: usize,
    /// For each new primitive, its index in the old population when it is
    /// an unchanged survivor.
    pub carried: Vec<Option<usize>>,
}

struct Plan {
    split: Vec<bool>,
    clone: Vec<bool>,
}

fn plan(avg: &[f32], sizes: &[f32], config: &DensityConfig, extent: f32) -> Plan {
    let size_threshold = config.percent_dense * extent;
    let hot: Vec<bool> = avg.iter().map(|g| *g > config.grad_threshold).collect();
    Plan {
        split: hot.iter().zip(sizes).map(|(h, s)| *h && *s > size_threshold).collect(),
        clone: hot.iter().zip(sizes).map(|(h, s)| *h && *s <= size_threshold).collect(),
    }
}

fn normal3<R: Rng + ?Sized>(rng: &mut R, std: &Vector3<f32>) -> Vector3<f32> {
    Vector3::new(
        rng.sample::<f32, _>(StandardNormal) * std.x,
        rng.sample::<f32, _>(StandardNormal) * std.y,
        rng.sample::<f32, _>(StandardNormal) * std.z,
    )
}

/// Split, clone and prune `scene` in place. `stats` must describe the
/// current population; reset it afterwards with `DensityStats::new`.
pub fn densify_and_prune<R: Rng + ?Sized>(
    scene: &mut Scene,
    stats: &DensityStats,
    config: &DensityConfig,
    extent: f32,
    rng: &mut R,
) -> DensityOutcome {
    assert_eq!(stats.len(), scene.len(), "density stats are stale");
    let outcome = match scene {
        Scene::Gaussians(cloud) => densify_gaussians(cloud, stats, config, extent, rng),
        Scene::Triangles(soup) => densify_triangles(soup, stats, config, extent, rng),
    };
    info!(
        "density control: split {}, cloned {}, pruned {} ({} -> {} {})",
        outcome.split,
        outcome.cloned,
        outcome.pruned,
        outcome.before,
        outcome.after,
        scene.kind_name()
    );
    outcome
}

/// Indices to keep after pruning `opacity < threshold`, or an oversized
/// screen footprint for primitives that have radius statistics.
fn survivors(opacities: &[f32], radii: &[Option<f32>], config: &DensityConfig) -> Vec<usize> {
    (0..opacities.len())
        .filter(|&j| {
            let faint = opacities[j] < config.prune_opacity;
            let huge = radii[j].is_some_and(|r| r > config.max_screen_radius);
            !(faint || huge)
        })
        .collect()
}

fn densify_gaussians<R: Rng + ?Sized>(
    cloud: &mut GaussianCloud,
    stats: &DensityStats,
    config: &DensityConfig,
    extent: f32,
    rng: &mut R,
) -> DensityOutcome {
    let n = cloud.len();
    let sizes: Vec<f32> = (0..n).map(|i| cloud.scale(i).max()).collect();
    let p = plan(&stats.average_grads(), &sizes, config, extent);

    let kept: Vec<usize> = (0..n).filter(|&i| !p.split[i]).collect();
    let mut next = cloud.gather(&kept);
    let mut carried: Vec<Option<usize>> = kept.iter().map(|&i| Some(i)).collect();
    let mut radii: Vec<Option<f32>> = kept.iter().map(|&i| Some(stats.max_radii[i])).collect();

    let mut split = 0;
    for i in (0..n).filter(|&i| p.split[i]) {
        let g = cloud.get(i);
        let scale = cloud.scale(i);
        let rotation = cloud.rotation_matrix(i);
        let child_log_scale = (scale / config.split_factor).map(f32::ln);
        for _ in 0..2 {
            let mut child = g.clone();
            child.position = g.position + rotation * normal3(rng, &scale);
            child.log_scale = child_log_scale;
            next.push(&child);
            carried.push(None);
            radii.push(None);
        }
        split += 1;
    }

    let mut cloned = 0;
    for i in (0..n).filter(|&i| p.clone[i]) {
        let mut copy = cloud.get(i);
        copy.position += normal3(rng, &(cloud.scale(i) * 0.1));
        next.push(&copy);
        carried.push(None);
        radii.push(None);
        cloned += 1;
    }

    let opacities: Vec<f32> = (0..next.len()).map(|j| next.opacity(j)).collect();
    let keep = survivors(&opacities, &radii, config);
    let pruned = next.len() - keep.len();
    let next = next.gather(&keep);
    let carried = keep.iter().map(|&j| carried[j]).collect();

    cloud.rebuild(next);
    cloud.shrink_to_fit();
    DensityOutcome {
        split,
        cloned,
        pruned,
        before: n,
        after: cloud.len(),
        carried,
    }
}

fn densify_triangles<R: Rng + ?Sized>(
    soup: &mut TriangleSoup,
    stats: &DensityStats,
    config: &DensityConfig,
    extent: f32,
    rng: &mut R,
) -> DensityOutcome {
    let n = soup.len();
    let sizes: Vec<f32> = (0..n).map(|i| longest_edge(&soup.triangle_vertices(i)).1).collect();
    let p = plan(&stats.average_grads(), &sizes, config, extent);

    let kept: Vec<usize> = (0..n).filter(|&i| !p.split[i]).collect();
    let mut next = soup.gather(&kept);
    let mut carried: Vec<Option<usize>> = kept.iter().map(|&i| Some(i)).collect();
    let mut radii: Vec<Option<f32>> = kept.iter().map(|&i| Some(stats.max_radii[i])).collect();

    let mut split = 0;
    for i in (0..n).filter(|&i| p.split[i]) {
        let t = soup.get(i);
        let centroid = t.centroid();
        let (k, len) = longest_edge(&t.vertices);
        let dir = (t.vertices[(k + 1) % 3] - t.vertices[k]) / len.max(f32::EPSILON);
        for sign in [-1.0f32, 1.0] {
            let offset = dir * (0.25 * len * sign);
            let vertices = t
                .vertices
                .map(|v| centroid + (v - centroid) / config.split_factor + offset);
            next.push(&Triangle { vertices, ..t.clone() });
            carried.push(None);
            radii.push(None);
        }
        split += 1;
    }

    let mut cloned = 0;
    for i in (0..n).filter(|&i| p.clone[i]) {
        let mut copy = soup.get(i);
        let jitter = normal3(rng, &Vector3::repeat(0.1 * sizes[i]));
        copy.vertices = copy.vertices.map(|v| v + jitter);
        next.push(&copy);
        carried.push(None);
        radii.push(None);
        cloned += 1;
    }

    let opacities: Vec<f32> = (0..next.len()).map(|j| next.opacity(j)).collect();
    let keep = survivors(&opacities, &radii, config);
    let pruned = next.len() - keep.len();
    let next = next.gather(&keep);
    let carried = keep.iter().map(|&j| carried[j]).collect();

    soup.rebuild(next);
    soup.shrink_to_fit();
    DensityOutcome {
        split,
        cloned,
        pruned,
        before: n,
        after: soup.len(),
        carried,
    }
}

/// Clamp every opacity to at most `max_opacity`. Returns how many changed.
pub fn reset_opacity(scene: &mut Scene, max_opacity: f32) -> usize {
    let ceiling = inverse_sigmoid(max_opacity);
    let logits = match scene {
        Scene::Gaussians(c) => &mut c.opacity_logits,
        Scene::Triangles(t) => &mut t.opacity_logits,
    };
    let mut changed = 0;
    for l in logits.iter_mut() {
        if *l > ceiling {
            *l = ceiling;
            changed += 1;
        }
    }
    info!("opacity reset: {changed} primitives clamped to {max_opacity}");
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{sigmoid, Gaussian};
    use approx::assert_relative_eq;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn cloud(log_scales: &[f32]) -> Scene {
        let gs: Vec<Gaussian> = log_scales
            .iter()
            .enumerate()
            .map(|(i, &s)| Gaussian::isotropic(Vector3::new(i as f32, 0.0, 0.0), s, 2.0, Vector3::zeros(), 0))
            .collect();
        Scene::Gaussians(GaussianCloud::from_gaussians(0, &gs))
    }

    fn hot_stats(n: usize, hot: &[usize]) -> DensityStats {
        let mut stats = DensityStats::new(n);
        let mut grads = vec![0.0; n];
        for &i in hot {
            grads[i] = 1.0;
        }
        stats.record(&vec![true; n], &vec![1.0; n], &grads);
        stats
    }

    #[test]
    fn test_stats_average_and_visibility() {
        let mut stats = DensityStats::new(3);
        stats.record(&[true, false, true], &[4.0, 9.0, 1.0], &[1.0, 5.0, 2.0]);
        stats.record(&[true, false, false], &[2.0, 9.0, 7.0], &[3.0, 5.0, 2.0]);
        assert_eq!(stats.average_grads(), vec![2.0, 0.0, 2.0]);
        assert_eq!(stats.max_radii, vec![4.0, 0.0, 1.0]);
    }

    #[test]
    fn test_split_adds_one_per_split() {
        // Extent 10 → size threshold 0.1: index 1 and 3 are large.
        let mut scene = cloud(&[-5.0, 0.0, -5.0, 0.0, 0.0]);
        let stats = hot_stats(5, &[1, 3]);
        let mut rng = StdRng::seed_from_u64(0);
        let gen_before = scene.generation();
        let out = densify_and_prune(&mut scene, &stats, &DensityConfig::default(), 10.0, &mut rng);
        assert_eq!(out.split, 2);
        assert_eq!(out.cloned, 0);
        assert_eq!(scene.len(), 5 + 2);
        assert_eq!(out.carried.len(), 7);
        assert_eq!(&out.carried[..3], &[Some(0), Some(2), Some(4)]);
        assert_eq!(scene.generation(), gen_before + 1);
        if let Scene::Gaussians(c) = &scene {
            assert_relative_eq!(c.scale(3).x, 1.0 / 1.6, epsilon = 1e-5);
        }
    }

    #[test]
    fn test_clone_keeps_original() {
        let mut scene = cloud(&[-5.0, -5.0]);
        let stats = hot_stats(2, &[0]);
        let mut rng = StdRng::seed_from_u64(1);
        let out = densify_and_prune(&mut scene, &stats, &DensityConfig::default(), 10.0, &mut rng);
        assert_eq!(out.cloned, 1);
        assert_eq!(scene.len(), 3);
        assert_eq!(out.carried, vec![Some(0), Some(1), None]);
    }

    #[test]
    fn test_prune_removes_faint_and_huge() {
        let mut scene = cloud(&[-5.0; 4]);
        if let Scene::Gaussians(c) = &mut scene {
            c.opacity_logits[2] = inverse_sigmoid(0.001);
        }
        let mut stats = DensityStats::new(4);
        stats.record(&[true; 4], &[1.0, 30.0, 1.0, 1.0], &[0.0; 4]);
        let mut rng = StdRng::seed_from_u64(2);
        let out = densify_and_prune(&mut scene, &stats, &DensityConfig::default(), 10.0, &mut rng);
        assert_eq!(out.pruned, 2);
        assert_eq!(scene.len(), 4 - 2);
        assert_eq!(out.carried, vec![Some(0), Some(3)]);
    }

    #[test]
    fn test_triangle_split_shrinks_about_centroid() {
        let t = Triangle::new(
            [Vector3::zeros(), Vector3::new(2.0, 0.0, 0.0), Vector3::new(0.0, 2.0, 0.0)],
            2.0,
            0.0,
            Vector3::zeros(),
            0,
        );
        let mut scene = Scene::Triangles(TriangleSoup::from_triangles(0, &[t.clone()]));
        let stats = hot_stats(1, &[0]);
        let mut rng = StdRng::seed_from_u64(3);
        let out = densify_and_prune(&mut scene, &stats, &DensityConfig::default(), 10.0, &mut rng);
        assert_eq!(out.split, 1);
        assert_eq!(scene.len(), 2);
        if let Scene::Triangles(s) = &scene {
            let (_, parent_len) = longest_edge(&t.vertices);
            let (_, child_len) = longest_edge(&s.triangle_vertices(0));
            assert_relative_eq!(child_len, parent_len / 1.6, epsilon = 1e-5);
            let mid = (s.centroid(0) + s.centroid(1)) / 2.0;
            assert_relative_eq!(mid, t.centroid(), epsilon = 1e-5);
        }
    }

    #[test]
    fn test_reset_opacity() {
        let mut scene = cloud(&[0.0, 0.0]);
        if let Scene::Gaussians(c) = &mut scene {
            c.opacity_logits[1] = -10.0;
        }
        assert_eq!(reset_opacity(&mut scene, 0.01), 1);
        if let Scene::Gaussians(c) = &scene {
            assert_relative_eq!(sigmoid(c.opacity_logits[0]), 0.01, epsilon = 1e-5);
            assert_eq!(c.opacity_logits[1], -10.0);
        }
    }

    #[test]
    fn test_schedule() {
        let config = DensityConfig::default();
        assert!(!config.should_densify(400));
        assert!(config.should_densify(600));
        assert!(!config.should_densify(650));
        assert!(!config.should_densify(15_000));
        assert!(config.should_reset_opacity(3000));
        assert!(!config.should_reset_opacity(0));
    }
}
