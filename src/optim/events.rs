//! Training progress reporting.
//!
//! The trainer owns no global state; callers pass a sink and decide what to
//! do with losses, preview images and snapshots.

use crate::core::Scene;
use crate::render::RenderOutput;
use log::info;

/// Per-iteration metrics.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct IterationStats {
    pub iteration: usize,
    pub loss: f32,
    pub psnr: f32,
    pub num_primitives: usize,
    pub num_visible: usize,
}

pub trait TrainingEventSink {
    fn on_loss(&mut self, stats: &IterationStats);

    /// A rendered preview of view `view`.
    fn on_image(&mut self, _iteration: usize, _view: usize, _output: &RenderOutput) {}

    /// The scene at a snapshot iteration.
    fn on_snapshot(&mut self, _iteration: usize, _scene: &Scene) {}
}

/// Logs every `every`-th loss through `log`.
pub struct LogSink {
    pub every: usize,
}

impl TrainingEventSink for LogSink {
    fn on_loss(&mut self, stats: &IterationStats) {
        if self.every > 0 && stats.iteration % self.every == 0 {
            info!(
                "iter {:6}  loss={:.5}  psnr={:.2}  primitives={} (visible {})",
                stats.iteration, stats.loss, stats.psnr, stats.num_primitives, stats.num_visible
            );
        }
    }
}

/// Discards everything.
pub struct NullSink;

impl TrainingEventSink for NullSink {
    fn on_loss(&mut self, _stats: &IterationStats) {}
}

/// Keeps every reported value; useful for tests and progress plots.
#[derive(Default)]
pub struct RecordingSink {
    pub losses: Vec<IterationStats>,
    pub images: Vec<(usize, usize)>,
    pub snapshots: Vec<(usize, usize)>,
}

impl TrainingEventSink for RecordingSink {
    fn on_loss(&mut self, stats: &IterationStats) {
        self.losses.push(*stats);
    }

    fn on_image(&mut self, iteration: usize, view: usize, _output: &RenderOutput) {
        self.images.push((iteration, view));
    }

    fn on_snapshot(&mut self, iteration: usize, scene: &Scene) {
        use crate::core::PrimitiveStore;
        self.snapshots.push((iteration, scene.len()));
    }
}
