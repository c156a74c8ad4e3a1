//! Training orchestration.
//!
//! One iteration is `forward -> loss -> backward -> Adam step`, followed by
//! the density-control schedule. Progress goes to a [`TrainingEventSink`];
//! a shared stop flag is polled between iterations so a run can be ended
//! from another thread without leaving a half-applied update behind.

use crate::core::{init, Camera, ParamKind, PrimitiveStore, Scene};
use crate::optim::adam::{LearningRates, SceneOptimizer};
use crate::optim::density::{densify_and_prune, reset_opacity, DensityConfig, DensityStats};
use crate::optim::events::{IterationStats, TrainingEventSink};
use crate::optim::loss::{combined_loss, psnr, LossWeights};
use crate::render::{backward, forward, RenderConfig};
use anyhow::{bail, ensure};
use log::{info, warn};
use nalgebra::Vector3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainConfig {
    pub iterations: usize,
    pub loss: LossWeights,
    pub learning_rates: LearningRates,
    pub density: DensityConfig,
    pub render: RenderConfig,
    /// The active SH degree grows by one every this many iterations (0 = start at full degree).
    pub sh_degree_interval: usize,
    /// Report a preview image every N iterations (0 = never).
    pub image_every: usize,
    /// Report a scene snapshot every N iterations (0 = never).
    pub snapshot_every: usize,
    pub seed: u64,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            iterations: 30_000,
            loss: LossWeights::default(),
            learning_rates: LearningRates::default(),
            density: DensityConfig::default(),
            render: RenderConfig::default(),
            sh_degree_interval: 1000,
            image_every: 0,
            snapshot_every: 0,
            seed: 0,
        }
    }
}

/// A ground-truth photograph and its camera.
#[derive(Clone, Debug)]
pub struct TrainingView {
    pub camera: Camera,
    /// Row-major linear RGB in `[0, 1]`.
    pub image: Vec<Vector3<f32>>,
    /// Optional alpha matte; the image is composited over the background with it.
    pub alpha: Option<Vec<f32>>,
    /// Optional depth target; values `<= 0` are ignored by the loss.
    pub depth: Option<Vec<f32>>,
}

impl TrainingView {
    pub fn new(camera: Camera, image: Vec<Vector3<f32>>) -> Self {
        Self {
            camera,
            image,
            alpha: None,
            depth: None,
        }
    }

    fn num_pixels(&self) -> usize {
        self.camera.width as usize * self.camera.height as usize
    }

    /// Ground truth as the renderer should reproduce it.
    pub fn target(&self, background: &Vector3<f32>) -> Vec<Vector3<f32>> {
        match &self.alpha {
            Some(alpha) => self
                .image
                .iter()
                .zip(alpha.iter())
                .map(|(c, &a)| c * a + background * (1.0 - a))
                .collect(),
            None => self.image.clone(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct TrainReport {
    /// Iterations attempted, skipped ones included.
    pub iterations_run: usize,
    pub skipped_steps: usize,
    pub stopped: bool,
    pub last: Option<IterationStats>,
    pub num_primitives: usize,
}

pub struct Trainer {
    scene: Scene,
    views: Vec<TrainingView>,
    targets: Vec<Vec<Vector3<f32>>>,
    config: TrainConfig,
    optimizer: SceneOptimizer,
    stats: DensityStats,
    extent: f32,
    rng: StdRng,
    active_sh_degree: usize,
    iteration: usize,
    skipped_steps: usize,
    stop: Arc<AtomicBool>,
}

impl Trainer {
    pub fn new(scene: Scene, views: Vec<TrainingView>, config: TrainConfig) -> anyhow::Result<Self> {
        ensure!(!views.is_empty(), "training needs at least one view");
        config.render.validate()?;
        for (i, view) in views.iter().enumerate() {
            let n = view.num_pixels();
            ensure!(view.image.len() == n, "view {i}: image has {} pixels, camera expects {n}", view.image.len());
            if let Some(alpha) = &view.alpha {
                ensure!(alpha.len() == n, "view {i}: alpha matte has {} pixels, camera expects {n}", alpha.len());
            }
            if let Some(depth) = &view.depth {
                ensure!(depth.len() == n, "view {i}: depth has {} pixels, camera expects {n}", depth.len());
            }
        }

        let centers: Vec<Vector3<f32>> = views.iter().map(|v| v.camera.center).collect();
        let extent = init::scene_extent(&centers);
        let background = config.render.background();
        let targets = views.iter().map(|v| v.target(&background)).collect();
        let optimizer = SceneOptimizer::new(&scene, config.learning_rates.clone(), extent);
        let stats = DensityStats::new(scene.len());
        let active_sh_degree = if config.sh_degree_interval == 0 {
            scene.sh_degree()
        } else {
            0
        };
        info!(
            "trainer: {} {} from {} views, extent {:.3}",
            scene.len(),
            scene.kind_name(),
            views.len(),
            extent
        );

        Ok(Self {
            scene,
            views,
            targets,
            rng: StdRng::seed_from_u64(config.seed),
            config,
            optimizer,
            stats,
            extent,
            active_sh_degree,
            iteration: 0,
            skipped_steps: 0,
            stop: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Flag that ends `run` before the next iteration once set.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    pub fn scene(&self) -> &Scene {
        &self.scene
    }

    pub fn into_scene(self) -> Scene {
        self.scene
    }

    pub fn iteration(&self) -> usize {
        self.iteration
    }

    pub fn skipped_steps(&self) -> usize {
        self.skipped_steps
    }

    pub fn active_sh_degree(&self) -> usize {
        self.active_sh_degree
    }

    pub fn extent(&self) -> f32 {
        self.extent
    }

    /// Train until `config.iterations` or until the stop flag is raised.
    pub fn run(&mut self, sink: &mut dyn TrainingEventSink) -> anyhow::Result<TrainReport> {
        let start = self.iteration;
        let mut last = None;
        let mut stopped = false;
        while self.iteration < self.config.iterations {
            if self.stop.load(Ordering::Relaxed) {
                info!("stop requested after iteration {}", self.iteration);
                stopped = true;
                break;
            }
            if let Some(stats) = self.step(sink)? {
                last = Some(stats);
            }
        }
        if self.skipped_steps > 0 {
            warn!("{} of {} steps skipped (non-finite)", self.skipped_steps, self.iteration);
        }
        Ok(TrainReport {
            iterations_run: self.iteration - start,
            skipped_steps: self.skipped_steps,
            stopped,
            last,
            num_primitives: self.scene.len(),
        })
    }

    /// One training iteration. Returns `None` when the step was skipped.
    pub fn step(&mut self, sink: &mut dyn TrainingEventSink) -> anyhow::Result<Option<IterationStats>> {
        self.iteration += 1;
        let iteration = self.iteration;

        let interval = self.config.sh_degree_interval;
        if interval > 0 && iteration % interval == 0 && self.active_sh_degree < self.scene.sh_degree() {
            self.active_sh_degree += 1;
            info!("iter {iteration}: active SH degree {}", self.active_sh_degree);
        }

        if self.scene.is_empty() {
            bail!("iteration {iteration}: the scene has no primitives left");
        }

        let view_index = self.rng.gen_range(0..self.views.len());
        let view = &self.views[view_index];
        let target = &self.targets[view_index];
        let render = &self.config.render;

        let output = forward(&view.camera, &self.scene, self.active_sh_degree, render)?;
        let depth = view.depth.as_deref().map(|d| (output.depth.as_slice(), d));
        let loss = combined_loss(&output.color, target, depth, output.width, output.height, &self.config.loss);

        if !loss.total.is_finite() {
            self.skipped_steps += 1;
            warn!("iter {iteration}: non-finite loss {}, step skipped", loss.total);
            return Ok(None);
        }

        let grads = backward(&view.camera, &self.scene, &output, &loss.d_color, loss.d_depth.as_deref(), render);
        if !grads.params.is_finite() {
            self.skipped_steps += 1;
            warn!("iter {iteration}: non-finite gradients, step skipped");
            return Ok(None);
        }

        let density = &self.config.density;
        if iteration < density.densify_until {
            self.stats.record(&output.visible, &output.radii, &grads.screen_grad_norm);
        }
        self.optimizer.step(&mut self.scene, &grads.params, iteration);

        let stats = IterationStats {
            iteration,
            loss: loss.total,
            psnr: psnr(&output.color, target),
            num_primitives: self.scene.len(),
            num_visible: output.num_visible(),
        };
        sink.on_loss(&stats);
        if self.config.image_every > 0 && iteration % self.config.image_every == 0 {
            sink.on_image(iteration, view_index, &output);
        }

        if density.should_densify(iteration) {
            let outcome = densify_and_prune(&mut self.scene, &self.stats, density, self.extent, &mut self.rng);
            self.optimizer.rebuild(&self.scene, &outcome.carried);
            self.stats = DensityStats::new(self.scene.len());
        }
        if density.should_reset_opacity(iteration) {
            reset_opacity(&mut self.scene, density.opacity_reset_value);
            self.optimizer.reset_group(ParamKind::OpacityLogits);
        }

        if self.config.snapshot_every > 0 && iteration % self.config.snapshot_every == 0 {
            sink.on_snapshot(iteration, &self.scene);
        }
        Ok(Some(stats))
    }
}
