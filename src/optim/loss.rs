//! Photometric losses and their gradients w.r.t. the rendered buffers.
//!
//! SSIM follows the usual splatting setup: an 11×11 Gaussian window
//! (σ = 1.5) applied as a separable per-channel convolution with zero
//! padding, `C1 = 0.01²`, `C2 = 0.03²`, averaged over pixels and channels.

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

const SSIM_RADIUS: usize = 5;
const SSIM_SIGMA: f32 = 1.5;
const SSIM_C1: f32 = 0.01 * 0.01;
const SSIM_C2: f32 = 0.03 * 0.03;

/// Mean absolute difference over all pixels and channels, with gradient.
pub fn l1_loss(rendered: &[Vector3<f32>], target: &[Vector3<f32>]) -> (f32, Vec<Vector3<f32>>) {
    assert_eq!(rendered.len(), target.len());
    let n = (rendered.len() * 3).max(1) as f32;
    let mut loss = 0.0f32;
    let d: Vec<Vector3<f32>> = rendered
        .iter()
        .zip(target.iter())
        .map(|(r, t)| {
            let diff = r - t;
            loss += diff.abs().sum();
            diff.map(f32::signum) / n
        })
        .collect();
    (loss / n, d)
}

/// `-10·log10(MSE + ε)`.
pub fn psnr(rendered: &[Vector3<f32>], target: &[Vector3<f32>]) -> f32 {
    assert_eq!(rendered.len(), target.len());
    let n = (rendered.len() * 3).max(1) as f32;
    let mse: f32 = rendered
        .iter()
        .zip(target.iter())
        .map(|(r, t)| (r - t).norm_squared())
        .sum::<f32>()
        / n;
    -10.0 * (mse + 1e-10).log10()
}

fn gaussian_window() -> [f32; 2 * SSIM_RADIUS + 1] {
    let mut k = [0.0f32; 2 * SSIM_RADIUS + 1];
    for (i, w) in k.iter_mut().enumerate() {
        let x = i as f32 - SSIM_RADIUS as f32;
        *w = (-x * x / (2.0 * SSIM_SIGMA * SSIM_SIGMA)).exp();
    }
    let sum: f32 = k.iter().sum();
    k.iter_mut().for_each(|w| *w /= sum);
    k
}

/// Separable Gaussian blur of a single-channel image, zero outside.
fn blur(src: &[f32], width: usize, height: usize, kernel: &[f32]) -> Vec<f32> {
    let r = SSIM_RADIUS as isize;
    let mut tmp = vec![0.0f32; src.len()];
    for y in 0..height {
        for x in 0..width {
            let mut acc = 0.0;
            for (k, w) in kernel.iter().enumerate() {
                let sx = x as isize + k as isize - r;
                if sx >= 0 && (sx as usize) < width {
                    acc += w * src[y * width + sx as usize];
                }
            }
            tmp[y * width + x] = acc;
        }
    }
    let mut out = vec![0.0f32; src.len()];
    for y in 0..height {
        for x in 0..width {
            let mut acc = 0.0;
            for (k, w) in kernel.iter().enumerate() {
                let sy = y as isize + k as isize - r;
                if sy >= 0 && (sy as usize) < height {
                    acc += w * tmp[sy as usize * width + x];
                }
            }
            out[y * width + x] = acc;
        }
    }
    out
}

fn channel(img: &[Vector3<f32>], c: usize) -> Vec<f32> {
    img.iter().map(|p| p[c]).collect()
}

/// Mean SSIM and its gradient w.r.t. `rendered`.
pub fn ssim_with_grad(
    rendered: &[Vector3<f32>],
    target: &[Vector3<f32>],
    width: u32,
    height: u32,
) -> (f32, Vec<Vector3<f32>>) {
    let (w, h) = (width as usize, height as usize);
    assert_eq!(rendered.len(), w * h);
    assert_eq!(target.len(), w * h);

    let kernel = gaussian_window();
    let count = (w * h * 3).max(1) as f32;
    let mut total = 0.0f32;
    let mut grad = vec![Vector3::zeros(); w * h];

    for c in 0..3 {
        let x = channel(rendered, c);
        let y = channel(target, c);
        let xx: Vec<f32> = x.iter().map(|v| v * v).collect();
        let yy: Vec<f32> = y.iter().map(|v| v * v).collect();
        let xy: Vec<f32> = x.iter().zip(y.iter()).map(|(a, b)| a * b).collect();

        let mu_x = blur(&x, w, h, &kernel);
        let mu_y = blur(&y, w, h, &kernel);
        let m_xx = blur(&xx, w, h, &kernel);
        let m_yy = blur(&yy, w, h, &kernel);
        let m_xy = blur(&xy, w, h, &kernel);

        // Per-pixel dSSIM/d(mu_x), d(E[x²]), d(E[xy]), scaled by 1/count.
        let mut d_mu = vec![0.0f32; w * h];
        let mut d_xx = vec![0.0f32; w * h];
        let mut d_xy = vec![0.0f32; w * h];

        for i in 0..w * h {
            let (m1, m2) = (mu_x[i], mu_y[i]);
            let s11 = m_xx[i] - m1 * m1;
            let s22 = m_yy[i] - m2 * m2;
            let s12 = m_xy[i] - m1 * m2;

            let a = 2.0 * m1 * m2 + SSIM_C1;
            let b = 2.0 * s12 + SSIM_C2;
            let cc = m1 * m1 + m2 * m2 + SSIM_C1;
            let d = s11 + s22 + SSIM_C2;
            let s = a * b / (cc * d);
            total += s;

            d_mu[i] = (2.0 * m2 * (b - a) / (cc * d) - 2.0 * m1 * s * (1.0 / cc - 1.0 / d)) / count;
            d_xx[i] = -s / d / count;
            d_xy[i] = 2.0 * a / (cc * d) / count;
        }

        let g_mu = blur(&d_mu, w, h, &kernel);
        let g_xx = blur(&d_xx, w, h, &kernel);
        let g_xy = blur(&d_xy, w, h, &kernel);
        for i in 0..w * h {
            grad[i][c] = g_mu[i] + 2.0 * x[i] * g_xx[i] + y[i] * g_xy[i];
        }
    }

    (total / count, grad)
}

pub fn ssim(rendered: &[Vector3<f32>], target: &[Vector3<f32>], width: u32, height: u32) -> f32 {
    ssim_with_grad(rendered, target, width, height).0
}

/// Weights of the training objective
/// `(1 − λ)·L1 + λ·(1 − SSIM) + λ_depth·L1(depth)`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LossWeights {
    pub lambda_dssim: f32,
    pub lambda_depth: f32,
}

impl Default for LossWeights {
    fn default() -> Self {
        Self {
            lambda_dssim: 0.2,
            lambda_depth: 0.0,
        }
    }
}

#[derive(Clone, Debug)]
pub struct LossOutput {
    pub total: f32,
    pub l1: f32,
    pub ssim: f32,
    /// Masked depth L1, when a target depth was given.
    pub depth_l1: Option<f32>,
    pub d_color: Vec<Vector3<f32>>,
    pub d_depth: Option<Vec<f32>>,
}

/// L1 over pixels whose target depth is valid (`> 0`), with gradient.
pub fn masked_depth_l1(rendered: &[f32], target: &[f32]) -> (f32, Vec<f32>) {
    assert_eq!(rendered.len(), target.len());
    let valid = target.iter().filter(|&&t| t > 0.0).count();
    if valid == 0 {
        return (0.0, vec![0.0; rendered.len()]);
    }
    let n = valid as f32;
    let mut loss = 0.0f32;
    let grad: Vec<f32> = rendered
        .iter()
        .zip(target.iter())
        .map(|(&r, &t)| {
            if t > 0.0 {
                loss += (r - t).abs();
                (r - t).signum() / n
            } else {
                0.0
            }
        })
        .collect();
    (loss / n, grad)
}

/// Training objective and its gradients w.r.t. rendered color and depth.
pub fn combined_loss(
    rendered: &[Vector3<f32>],
    target: &[Vector3<f32>],
    depth: Option<(&[f32], &[f32])>,
    width: u32,
    height: u32,
    weights: &LossWeights,
) -> LossOutput {
    let lambda = weights.lambda_dssim;
    let (l1, d_l1) = l1_loss(rendered, target);
    let (s, d_ssim) = ssim_with_grad(rendered, target, width, height);

    let d_color: Vec<Vector3<f32>> = d_l1
        .iter()
        .zip(d_ssim.iter())
        .map(|(a, b)| a * (1.0 - lambda) - b * lambda)
        .collect();
    let mut total = (1.0 - lambda) * l1 + lambda * (1.0 - s);

    let (depth_l1, d_depth) = match depth {
        Some((rendered_depth, target_depth)) if weights.lambda_depth > 0.0 => {
            let (l, g) = masked_depth_l1(rendered_depth, target_depth);
            total += weights.lambda_depth * l;
            (Some(l), Some(g.into_iter().map(|v| v * weights.lambda_depth).collect()))
        }
        _ => (None, None),
    };

    LossOutput {
        total,
        l1,
        ssim: s,
        depth_l1,
        d_color,
        d_depth,
    }
}
