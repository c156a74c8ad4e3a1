//! Gradients for small scalar math utilities (activations).

/// Derivative of sigmoid σ(x) = 1 / (1 + e^{-x}) with respect to x.
///
/// dσ/dx = σ(x) * (1 - σ(x))
pub fn sigmoid_grad_from_sigmoid(sigmoid_x: f32) -> f32 {
    sigmoid_x * (1.0 - sigmoid_x)
}
