//! Tiled differentiable rasterizer.
//!
//! `forward` projects a scene, assigns records to tiles, sorts each tile front
//! to back and composites. The [`ForwardContext`] it returns carries the exact
//! per-tile lists the backward pass walks again.
//!
//! Two backends share projection, sort order and the per-pixel compositing
//! function:
//! - `Backend::Array`: per-tile mask + sort, sequential tile loop
//! - `Backend::Kernel`: global key sort over a bounded key buffer, parallel
//!   tile grid; fails with [`RenderError::CapacityExceeded`] when a frame does
//!   not fit

mod array;
pub mod backward;
pub mod composite;
pub mod footprint;
mod kernel;
pub mod project;
pub mod tile;

pub use backward::{backward, Gradients};
pub use project::ProjectedPrimitive;
pub use tile::{compute_tile_mask, PixelRect, TileAssignment, TileGrid};

use crate::core::{Camera, PrimitiveStore, Scene};
use log::debug;
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("{what} buffer overflow: {required} required, capacity {capacity}")]
    CapacityExceeded {
        what: &'static str,
        required: usize,
        capacity: usize,
    },

    #[error("invalid render config: {0}")]
    InvalidConfig(String),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Backend {
    #[default]
    Array,
    Kernel,
}

/// Buffer sizes of the kernel backend.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelCapacity {
    pub max_primitives: usize,
    /// Total (tile, primitive) pairs per frame.
    pub max_keys: usize,
}

impl Default for KernelCapacity {
    fn default() -> Self {
        Self {
            max_primitives: 1 << 22,
            max_keys: 1 << 25,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    pub tile_size: u32,
    /// Tiles with at most this many primitives emit background.
    pub skip_threshold: usize,
    pub white_background: bool,
    /// Minimum camera depth of a visible primitive.
    pub near: f32,
    pub alpha_cap: f32,
    pub min_alpha: f32,
    pub transmittance_floor: f32,
    /// Minimum screen area (px²) of a triangle.
    pub min_triangle_area: f32,
    pub backend: Backend,
    pub kernel_capacity: KernelCapacity,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            tile_size: 16,
            skip_threshold: 0,
            white_background: false,
            near: 0.2,
            alpha_cap: 0.99,
            min_alpha: 1.0 / 255.0,
            transmittance_floor: 1e-3,
            min_triangle_area: 0.5,
            backend: Backend::default(),
            kernel_capacity: KernelCapacity::default(),
        }
    }
}

impl RenderConfig {
    pub fn background(&self) -> Vector3<f32> {
        if self.white_background {
            Vector3::repeat(1.0)
        } else {
            Vector3::zeros()
        }
    }

    pub fn validate(&self) -> Result<(), RenderError> {
        if self.tile_size == 0 {
            return Err(RenderError::InvalidConfig("tile_size must be positive".into()));
        }
        if !(self.near > 0.0) {
            return Err(RenderError::InvalidConfig(format!("near must be positive, got {}", self.near)));
        }
        if !(self.alpha_cap > 0.0 && self.alpha_cap < 1.0) {
            return Err(RenderError::InvalidConfig(format!("alpha_cap must be in (0, 1), got {}", self.alpha_cap)));
        }
        Ok(())
    }
}

/// State saved by `forward` for the backward pass.
#[derive(Clone, Debug)]
pub struct ForwardContext {
    pub records: Vec<ProjectedPrimitive>,
    pub assignment: TileAssignment,
    pub sh_degree: usize,
    /// Store generation the records were projected from.
    pub generation: u64,
}

#[derive(Clone, Debug)]
pub struct RenderOutput {
    pub width: u32,
    pub height: u32,
    /// Row-major linear RGB.
    pub color: Vec<Vector3<f32>>,
    pub depth: Vec<f32>,
    /// Accumulated opacity `1 - T_final` (up to early termination).
    pub alpha: Vec<f32>,
    /// Per primitive: survived culling.
    pub visible: Vec<bool>,
    /// Per primitive: screen radius in pixels, 0 when culled.
    pub radii: Vec<f32>,
    pub context: ForwardContext,
}

impl RenderOutput {
    pub fn num_visible(&self) -> usize {
        self.context.records.len()
    }
}

/// Render `scene` from `camera` with SH evaluated up to `sh_degree`.
pub fn forward(camera: &Camera, scene: &Scene, sh_degree: usize, config: &RenderConfig) -> Result<RenderOutput, RenderError> {
    config.validate()?;
    let sh_degree = sh_degree.min(scene.sh_degree());

    let records = project::project_scene(camera, scene, sh_degree, config);
    let grid = TileGrid::new(camera.width, camera.height, config.tile_size);

    let (assignment, tiles) = match config.backend {
        Backend::Array => {
            let assignment = array::assign(&records, &grid);
            let tiles = array::composite(&records, &assignment, config);
            (assignment, tiles)
        }
        Backend::Kernel => {
            let assignment = kernel::assign(&records, &grid, &config.kernel_capacity)?;
            let tiles = kernel::composite(&records, &assignment, config);
            (assignment, tiles)
        }
    };
    debug!(
        "{:?} backend: {} visible, {} tile intersections over {} tiles",
        config.backend,
        records.len(),
        assignment.num_intersections(),
        grid.num_tiles()
    );

    let frame = composite::assemble(camera.width, camera.height, tiles);

    let mut visible = vec![false; scene.len()];
    let mut radii = vec![0.0f32; scene.len()];
    for r in &records {
        visible[r.index] = true;
        radii[r.index] = r.radius;
    }

    Ok(RenderOutput {
        width: camera.width,
        height: camera.height,
        color: frame.color,
        depth: frame.depth,
        alpha: frame.alpha,
        visible,
        radii,
        context: ForwardContext {
            records,
            assignment,
            sh_degree,
            generation: scene.generation(),
        },
    })
}
