//! # tile-splat: tiled differentiable rasterization of splats
//!
//! Scenes are collections of simple 3D primitives, either oriented Gaussians
//! or soft-edged triangles, that are projected into a camera, depth sorted
//! per screen tile and alpha composited front to back. Every stage has an
//! analytic backward pass, so scenes can be fitted to photographs.
//!
//! ## Architecture
//!
//! - `core`: primitive stores, cameras, SH and math utilities
//! - `render`: projection, tiling, compositing (array and kernel backends), backward pass
//! - `diff`: gradients of the individual math building blocks
//! - `optim`: losses, Adam, density control and the training loop
//! - `io`: PLY snapshots and image buffers

// Core data structures and math
pub mod core;

// Differentiable building blocks (backward passes)
pub mod diff;

// Snapshots and images
pub mod io;

// Optimization (training loop, losses, density control)
pub mod optim;

// Tiled forward and backward rasterization
pub mod render;

// Re-export commonly used types at crate root for convenience
pub use core::{Camera, GaussianCloud, PrimitiveStore, Scene, TriangleSoup};
pub use io::SnapshotError;
pub use render::{backward, forward, Backend, RenderConfig, RenderError, RenderOutput};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
