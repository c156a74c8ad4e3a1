//! Core data structures and mathematical operations.
//!
//! This module contains the fundamental types used throughout the system:
//! - `GaussianCloud` / `TriangleSoup`: the two primitive populations
//! - `Camera`: camera intrinsics and extrinsics
//! - Math utilities: quaternions, covariance, projections, SH
//!
//! All types here are "pure data" - no I/O, no rendering logic.

pub mod camera;
pub mod color;
mod gaussian;
pub mod init;
pub mod math;
mod params;
mod scene;
pub mod sh;
mod triangle;

// Re-export public types
pub use camera::{normalize_camera_basis, Camera, CameraConvention, MatrixLayout, PoseKind};
pub use gaussian::{Gaussian, GaussianCloud};
pub use init::PointCloud;
pub use math::{inverse_sigmoid, quaternion_to_matrix, sigmoid};
pub use params::{ParamGrads, ParamKind, PrimitiveStore};
pub use scene::Scene;
pub use sh::{evaluate_sh, sh_basis};
pub use triangle::{longest_edge, Triangle, TriangleSoup};
