//! Adam optimizer over the flat parameter groups of a primitive store.
//!
//! One [`AdamF32`] per [`ParamKind`]. The moment buffers are tied to the
//! store generation they were built for; after density control they are
//! rebuilt (surviving primitives keep their moments, new ones start at zero)
//! and every step checks the generations still agree.

use crate::core::{ParamGrads, ParamKind, PrimitiveStore};
use serde::{Deserialize, Serialize};

pub struct AdamF32 {
    pub lr: f32,
    pub beta1: f32,
    pub beta2: f32,
    pub eps: f32,
    t: u32,
    m: Vec<f32>,
    v: Vec<f32>,
}

impl AdamF32 {
    pub fn new(lr: f32, beta1: f32, beta2: f32, eps: f32) -> Self {
        Self {
            lr,
            beta1,
            beta2,
            eps,
            t: 0,
            m: Vec::new(),
            v: Vec::new(),
        }
    }

    pub fn ensure_len(&mut self, len: usize) {
        if self.m.len() != len {
            self.m.resize(len, 0.0);
            self.v.resize(len, 0.0);
        }
    }

    /// Reset moment estimates while keeping the global timestep.
    pub fn reset_moments_keep_t(&mut self, len: usize) {
        self.m.clear();
        self.v.clear();
        self.m.resize(len, 0.0);
        self.v.resize(len, 0.0);
    }

    /// Rebuild the moments for a new population. `carried[j]` is the old
    /// index of new primitive `j` when it survived, `None` for new ones.
    pub fn remap_moments_keep_t(&mut self, stride: usize, carried: &[Option<usize>]) {
        let mut m = vec![0.0; carried.len() * stride];
        let mut v = vec![0.0; carried.len() * stride];
        for (j, src) in carried.iter().enumerate() {
            if let Some(i) = *src {
                if (i + 1) * stride <= self.m.len() {
                    m[j * stride..(j + 1) * stride].copy_from_slice(&self.m[i * stride..(i + 1) * stride]);
                    v[j * stride..(j + 1) * stride].copy_from_slice(&self.v[i * stride..(i + 1) * stride]);
                }
            }
        }
        self.m = m;
        self.v = v;
    }

    pub fn timestep(&self) -> u32 {
        self.t
    }

    pub fn step(&mut self, params: &mut [f32], grads: &[f32]) {
        assert_eq!(params.len(), grads.len());
        self.ensure_len(params.len());

        self.t += 1;
        let t = self.t as f32;
        let b1 = self.beta1;
        let b2 = self.beta2;

        let bias1 = 1.0 - b1.powf(t);
        let bias2 = 1.0 - b2.powf(t);

        for i in 0..params.len() {
            let g = grads[i];
            self.m[i] = self.m[i] * b1 + g * (1.0 - b1);
            self.v[i] = self.v[i] * b2 + g * g * (1.0 - b2);

            let m_hat = self.m[i] / bias1;
            let v_hat = self.v[i] / bias2;

            params[i] -= self.lr * m_hat / (v_hat.sqrt() + self.eps);
        }
    }
}

/// Per-group learning rates.
///
/// The position rate is multiplied by the scene extent and decays
/// exponentially from `position` to `position_final` over
/// `position_decay_steps` iterations. Triangle vertices follow the same
/// schedule.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LearningRates {
    pub position: f32,
    pub position_final: f32,
    pub position_decay_steps: usize,
    pub log_scale: f32,
    pub rotation: f32,
    pub opacity: f32,
    pub log_smoothness: f32,
    pub sh_dc: f32,
    pub sh_rest: f32,
}

impl Default for LearningRates {
    fn default() -> Self {
        Self {
            position: 1.6e-4,
            position_final: 1.6e-6,
            position_decay_steps: 30_000,
            log_scale: 5e-3,
            rotation: 1e-3,
            opacity: 5e-2,
            log_smoothness: 2e-3,
            sh_dc: 2.5e-3,
            sh_rest: 2.5e-3 / 20.0,
        }
    }
}

impl LearningRates {
    /// Position rate at `iteration`, before scaling by the scene extent.
    pub fn position_at(&self, iteration: usize) -> f32 {
        if self.position_decay_steps == 0 {
            return self.position_final;
        }
        let t = (iteration as f32 / self.position_decay_steps as f32).clamp(0.0, 1.0);
        let log_lr = self.position.ln() * (1.0 - t) + self.position_final.ln() * t;
        log_lr.exp()
    }

    fn base(&self, kind: ParamKind) -> f32 {
        match kind {
            ParamKind::Positions | ParamKind::Vertices => self.position,
            ParamKind::LogScales => self.log_scale,
            ParamKind::Rotations => self.rotation,
            ParamKind::OpacityLogits => self.opacity,
            ParamKind::LogSmoothness => self.log_smoothness,
            ParamKind::ShDc => self.sh_dc,
            ParamKind::ShRest => self.sh_rest,
        }
    }
}

/// Adam state for every parameter group of one store.
pub struct SceneOptimizer {
    rates: LearningRates,
    spatial_scale: f32,
    groups: Vec<(ParamKind, AdamF32)>,
    generation: u64,
}

impl SceneOptimizer {
    pub fn new(store: &dyn PrimitiveStore, rates: LearningRates, spatial_scale: f32) -> Self {
        let groups = store
            .param_layout()
            .into_iter()
            .map(|(kind, len)| {
                let mut adam = AdamF32::new(rates.base(kind), 0.9, 0.999, 1e-15);
                adam.reset_moments_keep_t(len);
                (kind, adam)
            })
            .collect();
        Self {
            rates,
            spatial_scale,
            groups,
            generation: store.generation(),
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn rates(&self) -> &LearningRates {
        &self.rates
    }

    /// Rebuild all moment buffers after the population changed.
    pub fn rebuild(&mut self, store: &dyn PrimitiveStore, carried: &[Option<usize>]) {
        assert_eq!(carried.len(), store.len());
        let n = store.len().max(1);
        for ((kind, adam), (layout_kind, len)) in self.groups.iter_mut().zip(store.param_layout()) {
            assert_eq!(*kind, layout_kind);
            adam.remap_moments_keep_t(len / n, carried);
        }
        self.generation = store.generation();
    }

    /// Zero the moments of one group (after its values were overwritten).
    pub fn reset_group(&mut self, kind: ParamKind) {
        if let Some((_, adam)) = self.groups.iter_mut().find(|(k, _)| *k == kind) {
            let len = adam.m.len();
            adam.reset_moments_keep_t(len);
        }
    }

    /// One Adam update of every group.
    pub fn step(&mut self, store: &mut dyn PrimitiveStore, grads: &ParamGrads, iteration: usize) {
        assert_eq!(
            self.generation,
            store.generation(),
            "optimizer state is stale; rebuild after density control"
        );
        let position_lr = self.rates.position_at(iteration) * self.spatial_scale;
        for (kind, params) in store.params_mut() {
            let Some((_, adam)) = self.groups.iter_mut().find(|(k, _)| *k == kind) else {
                continue;
            };
            let Some(g) = grads.get(kind) else {
                continue;
            };
            if matches!(kind, ParamKind::Positions | ParamKind::Vertices) {
                adam.lr = position_lr;
            }
            adam.step(params, g);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Gaussian, GaussianCloud};
    use approx::assert_relative_eq;
    use nalgebra::Vector3;

    #[test]
    fn test_adam_f32_basic_update() {
        let mut opt = AdamF32::new(0.01, 0.9, 0.999, 1e-8);
        let mut params = vec![1.0f32, 1.0];
        opt.step(&mut params, &[1.0, -1.0]);
        assert!(params[0] < 1.0);
        assert!(params[1] > 1.0);
        // First bias-corrected step moves by ~lr.
        assert_relative_eq!(params[0], 0.99, epsilon = 1e-5);
    }

    #[test]
    fn test_remap_keeps_survivors_and_timestep() {
        let mut opt = AdamF32::new(0.01, 0.9, 0.999, 1e-8);
        let mut params = vec![1.0f32; 6];
        let grads = [0.1, 0.1, 0.2, 0.2, 0.3, 0.3];
        opt.step(&mut params, &grads);
        opt.step(&mut params, &grads);

        let before = opt.m[4];
        opt.remap_moments_keep_t(2, &[Some(2), None, Some(0), None]);
        assert_eq!(opt.timestep(), 2);
        assert_eq!(opt.m.len(), 8);
        assert_eq!(opt.m[0], before);
        assert_eq!(opt.m[2], 0.0);
        assert!(opt.v[4] > 0.0);
    }

    fn cloud(n: usize) -> GaussianCloud {
        let gs: Vec<Gaussian> = (0..n)
            .map(|i| Gaussian::isotropic(Vector3::new(i as f32, 0.0, 0.0), 0.0, 0.0, Vector3::zeros(), 1))
            .collect();
        GaussianCloud::from_gaussians(1, &gs)
    }

    #[test]
    fn test_position_lr_decay() {
        let rates = LearningRates::default();
        assert_relative_eq!(rates.position_at(0), rates.position, epsilon = 1e-9);
        assert_relative_eq!(rates.position_at(rates.position_decay_steps), rates.position_final, epsilon = 1e-9);
        let mid = rates.position_at(rates.position_decay_steps / 2);
        assert_relative_eq!(mid, (rates.position * rates.position_final).sqrt(), max_relative = 1e-3);
    }

    #[test]
    fn test_scene_step_moves_every_group() {
        let mut c = cloud(2);
        let before = c.clone();
        let mut opt = SceneOptimizer::new(&c, LearningRates::default(), 1.0);
        let mut grads = ParamGrads::zeros(&c.param_layout());
        for (kind, _) in c.param_layout() {
            grads.get_mut(kind).unwrap().iter_mut().for_each(|g| *g = 1.0);
        }
        opt.step(&mut c, &grads, 0);
        assert!(c.positions[0] < before.positions[0]);
        assert!(c.log_scales[0] < before.log_scales[0]);
        assert!(c.opacity_logits[1] < before.opacity_logits[1]);
        assert!(c.sh_rest[8] < before.sh_rest[8]);
    }

    #[test]
    #[should_panic(expected = "stale")]
    fn test_step_on_stale_generation_panics() {
        let mut c = cloud(2);
        let mut opt = SceneOptimizer::new(&c, LearningRates::default(), 1.0);
        c.rebuild(cloud(3));
        let grads = ParamGrads::zeros(&c.param_layout());
        opt.step(&mut c, &grads, 0);
    }
}
