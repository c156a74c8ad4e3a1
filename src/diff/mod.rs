//! Differentiable operations (backward passes).
//!
//! Each submodule pairs with a forward operation in `core` or `render` and
//! is checked against finite differences in its tests. The rasterizer's
//! backward pass (`render::backward`) chains them together.

pub mod blend_grad;
pub mod covariance_grad;
pub mod gaussian2d_grad;
pub mod math_grad;
pub mod project_grad;
pub mod quaternion_grad;
pub mod sh_grad;
pub mod triangle_grad;
