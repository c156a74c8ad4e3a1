//! Gradients for alpha blending (front-to-back compositing).
//!
//! Forward (per pixel):
//!   T_0 = 1
//!   for i in 0..N:
//!     color += T_i * a_i * c_i
//!     depth += T_i * a_i * z_i
//!     acc   += T_i * a_i
//!     T_{i+1} = T_i * (1 - a_i)
//!   color += T_N * bg
//!
//! where:
//! - `a_i` is the per-pixel alpha of contribution i (opacity * weight, clamped)
//! - `c_i` is RGB color, `z_i` camera depth
//! - `T_i` is transmittance before applying contribution i

use nalgebra::Vector3;

#[derive(Clone, Debug)]
pub struct BlendForward {
    pub color: Vector3<f32>,
    pub depth: f32,
    pub alpha: f32,
    /// T_i for i=0..=N (length N+1)
    pub transmittance: Vec<f32>,
}

/// Forward alpha compositing, returning the outputs and saved transmittances.
pub fn blend_forward(
    alphas: &[f32],
    colors: &[Vector3<f32>],
    depths: &[f32],
    bg: &Vector3<f32>,
) -> BlendForward {
    assert_eq!(alphas.len(), colors.len());
    assert_eq!(alphas.len(), depths.len());

    let mut color = Vector3::<f32>::zeros();
    let mut depth = 0.0f32;
    let mut alpha = 0.0f32;
    let mut transmittance = Vec::with_capacity(alphas.len() + 1);
    let mut t = 1.0f32;
    transmittance.push(t);

    for ((&a, c), &z) in alphas.iter().zip(colors.iter()).zip(depths.iter()) {
        let w = t * a;
        color += c * w;
        depth += z * w;
        alpha += w;
        t *= 1.0 - a;
        transmittance.push(t);
    }
    color += bg * t;

    BlendForward {
        color,
        depth,
        alpha,
        transmittance,
    }
}

/// Upstream gradients for one pixel.
#[derive(Clone, Copy, Debug, Default)]
pub struct BlendUpstream {
    pub d_color: Vector3<f32>,
    pub d_depth: f32,
    pub d_alpha: f32,
}

#[derive(Clone, Debug)]
pub struct BlendGrads {
    pub d_alphas: Vec<f32>,
    pub d_colors: Vec<Vector3<f32>>,
    pub d_depths: Vec<f32>,
    pub d_bg: Vector3<f32>,
}

/// Backward pass for alpha compositing.
///
/// Inputs:
/// - `alphas`, `colors`, `depths`, `bg`: same as forward
/// - `forward`: output of `blend_forward` (contains all T_i)
/// - `up`: upstream gradients w.r.t. the color, depth and alpha outputs
pub fn blend_backward(
    alphas: &[f32],
    colors: &[Vector3<f32>],
    depths: &[f32],
    bg: &Vector3<f32>,
    forward: &BlendForward,
    up: &BlendUpstream,
) -> BlendGrads {
    assert_eq!(alphas.len(), colors.len());
    assert_eq!(alphas.len(), depths.len());
    assert_eq!(forward.transmittance.len(), alphas.len() + 1);

    let n = alphas.len();
    let mut d_alphas = vec![0.0f32; n];
    let mut d_colors = vec![Vector3::<f32>::zeros(); n];
    let mut d_depths = vec![0.0f32; n];

    // Reverse scan over the transmittance recurrence. g_t is dL/dT_{i+1};
    // the final transmittance only reaches the output through the background.
    let t_final = forward.transmittance[n];
    let d_bg = up.d_color * t_final;
    let mut g_t = up.d_color.dot(bg);

    for i in (0..n).rev() {
        let a_i = alphas[i];
        let t_i = forward.transmittance[i];

        d_colors[i] = up.d_color * (t_i * a_i);
        d_depths[i] = up.d_depth * (t_i * a_i);

        // Scalar "value" the weight T_i * a_i multiplies.
        let s_i = up.d_color.dot(&colors[i]) + up.d_depth * depths[i] + up.d_alpha;

        // (1) direct: T_i * s_i
        // (2) via T_{i+1} = T_i * (1 - a_i): -T_i * g_T_{i+1}
        d_alphas[i] = t_i * (s_i - g_t);

        g_t = a_i * s_i + (1.0 - a_i) * g_t;
    }

    BlendGrads {
        d_alphas,
        d_colors,
        d_depths,
        d_bg,
    }
}
