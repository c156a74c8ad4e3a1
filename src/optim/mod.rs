//! Optimization components.
//!
//! - Adam optimizer with per-group learning rates
//! - Loss functions (L1, SSIM, PSNR, masked depth)
//! - Adaptive density control (split/clone/prune, opacity reset)
//! - Training orchestration and progress events

pub mod adam;
pub mod density;
pub mod events;
pub mod loss;
pub mod trainer;

pub use adam::{LearningRates, SceneOptimizer};
pub use density::{densify_and_prune, DensityConfig, DensityOutcome, DensityStats};
pub use events::{IterationStats, TrainingEventSink};
pub use loss::{combined_loss, LossOutput, LossWeights};
pub use trainer::{TrainConfig, TrainReport, Trainer, TrainingView};
