//! Gaussian representation and cloud data structure.
//!
//! A Gaussian is parameterized by:
//! - Position (mean μ)
//! - Scale (log-space: exp(scale) gives actual scale)
//! - Rotation (raw quaternion `(x, y, z, r)`, normalized before use)
//! - Opacity (logit-space: sigmoid(opacity) gives actual opacity)
//! - Spherical harmonics coefficients (view-dependent color)

use crate::core::math::{build_covariance_3d, quaternion_to_matrix, sigmoid};
use crate::core::params::{ParamKind, PrimitiveStore};
use crate::core::sh::{num_sh_rest, MAX_SH_DEGREE};
use nalgebra::{Matrix3, Vector3, Vector4};
use serde::{Deserialize, Serialize};

/// One Gaussian, as plain values. Used to build and inspect clouds; the cloud
/// itself stores every attribute in flat per-group arrays.
#[derive(Clone, Debug, PartialEq)]
pub struct Gaussian {
    pub position: Vector3<f32>,
    /// Log-space scale (actual scale = exp(log_scale)).
    pub log_scale: Vector3<f32>,
    /// Raw quaternion `(x, y, z, r)`.
    pub rotation: Vector4<f32>,
    pub opacity_logit: f32,
    pub sh_dc: Vector3<f32>,
    /// `M × 3`, coefficient-major.
    pub sh_rest: Vec<f32>,
}

impl Gaussian {
    /// Isotropic Gaussian with identity rotation and no view dependence.
    pub fn isotropic(position: Vector3<f32>, log_scale: f32, opacity_logit: f32, sh_dc: Vector3<f32>, sh_degree: usize) -> Self {
        Self {
            position,
            log_scale: Vector3::repeat(log_scale),
            rotation: Vector4::new(0.0, 0.0, 0.0, 1.0),
            opacity_logit,
            sh_dc,
            sh_rest: vec![0.0; num_sh_rest(sh_degree) * 3],
        }
    }
}

/// A collection of Gaussians in Struct-of-Arrays layout.
///
/// Fields are public for the optimizer and the snapshot reader; any code that
/// changes the population must go through [`GaussianCloud::rebuild`] so the
/// generation advances.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GaussianCloud {
    sh_degree: usize,
    /// `N × 3`
    pub positions: Vec<f32>,
    /// `N × 3`
    pub log_scales: Vec<f32>,
    /// `N × 4`, `(x, y, z, r)`
    pub rotations: Vec<f32>,
    /// `N`
    pub opacity_logits: Vec<f32>,
    /// `N × 3`
    pub sh_dc: Vec<f32>,
    /// `N × M × 3`
    pub sh_rest: Vec<f32>,
    #[serde(default)]
    generation: u64,
}

impl GaussianCloud {
    /// Create a new empty Gaussian cloud.
    pub fn new(sh_degree: usize) -> Self {
        assert!(sh_degree <= MAX_SH_DEGREE, "SH degree {sh_degree} unsupported");
        Self {
            sh_degree,
            positions: Vec::new(),
            log_scales: Vec::new(),
            rotations: Vec::new(),
            opacity_logits: Vec::new(),
            sh_dc: Vec::new(),
            sh_rest: Vec::new(),
            generation: 0,
        }
    }

    /// Create a cloud from individual Gaussians.
    pub fn from_gaussians(sh_degree: usize, gaussians: &[Gaussian]) -> Self {
        let mut cloud = Self::new(sh_degree);
        for g in gaussians {
            cloud.push(g);
        }
        cloud
    }

    /// Number of SH rest coefficients per channel (`M`).
    pub fn sh_rest_len(&self) -> usize {
        num_sh_rest(self.sh_degree)
    }

    /// Append one Gaussian. Only meant for building a population.
    pub fn push(&mut self, g: &Gaussian) {
        assert_eq!(g.sh_rest.len(), self.sh_rest_len() * 3);
        self.positions.extend_from_slice(g.position.as_slice());
        self.log_scales.extend_from_slice(g.log_scale.as_slice());
        self.rotations.extend_from_slice(g.rotation.as_slice());
        self.opacity_logits.push(g.opacity_logit);
        self.sh_dc.extend_from_slice(g.sh_dc.as_slice());
        self.sh_rest.extend_from_slice(&g.sh_rest);
    }

    /// Copy Gaussian `i` out of the cloud.
    pub fn get(&self, i: usize) -> Gaussian {
        Gaussian {
            position: self.position(i),
            log_scale: self.log_scale(i),
            rotation: self.rotation(i),
            opacity_logit: self.opacity_logits[i],
            sh_dc: self.dc(i),
            sh_rest: self.rest(i).to_vec(),
        }
    }

    pub fn position(&self, i: usize) -> Vector3<f32> {
        Vector3::from_column_slice(&self.positions[i * 3..i * 3 + 3])
    }

    pub fn log_scale(&self, i: usize) -> Vector3<f32> {
        Vector3::from_column_slice(&self.log_scales[i * 3..i * 3 + 3])
    }

    /// Activated scale `exp(log_scale)`.
    pub fn scale(&self, i: usize) -> Vector3<f32> {
        self.log_scale(i).map(f32::exp)
    }

    pub fn rotation(&self, i: usize) -> Vector4<f32> {
        Vector4::from_column_slice(&self.rotations[i * 4..i * 4 + 4])
    }

    pub fn rotation_matrix(&self, i: usize) -> Matrix3<f32> {
        quaternion_to_matrix(&self.rotation(i))
    }

    /// Activated opacity `sigmoid(logit)`.
    pub fn opacity(&self, i: usize) -> f32 {
        sigmoid(self.opacity_logits[i])
    }

    pub fn dc(&self, i: usize) -> Vector3<f32> {
        Vector3::from_column_slice(&self.sh_dc[i * 3..i * 3 + 3])
    }

    pub fn rest(&self, i: usize) -> &[f32] {
        let stride = self.sh_rest_len() * 3;
        &self.sh_rest[i * stride..(i + 1) * stride]
    }

    /// World-space covariance Σ = (R·S)(R·S)ᵀ.
    pub fn covariance(&self, i: usize) -> Matrix3<f32> {
        build_covariance_3d(&self.scale(i), &self.rotation(i))
    }

    /// Gather the Gaussians at `indices` (in that order) into a new cloud.
    ///
    /// The result keeps this cloud's generation; use [`Self::rebuild`] to
    /// install it as the next population.
    pub fn gather(&self, indices: &[usize]) -> Self {
        let mut out = Self::new(self.sh_degree);
        let rest = self.sh_rest_len() * 3;
        out.positions.reserve(indices.len() * 3);
        out.log_scales.reserve(indices.len() * 3);
        out.rotations.reserve(indices.len() * 4);
        out.opacity_logits.reserve(indices.len());
        out.sh_dc.reserve(indices.len() * 3);
        out.sh_rest.reserve(indices.len() * rest);
        for &i in indices {
            out.positions.extend_from_slice(&self.positions[i * 3..i * 3 + 3]);
            out.log_scales.extend_from_slice(&self.log_scales[i * 3..i * 3 + 3]);
            out.rotations.extend_from_slice(&self.rotations[i * 4..i * 4 + 4]);
            out.opacity_logits.push(self.opacity_logits[i]);
            out.sh_dc.extend_from_slice(&self.sh_dc[i * 3..i * 3 + 3]);
            out.sh_rest.extend_from_slice(&self.sh_rest[i * rest..(i + 1) * rest]);
        }
        out.generation = self.generation;
        out
    }

    /// Replace the population with `next` and advance the generation.
    pub fn rebuild(&mut self, next: GaussianCloud) {
        assert_eq!(next.sh_degree, self.sh_degree);
        next.assert_consistent();
        let generation = self.generation + 1;
        *self = next;
        self.generation = generation;
    }

    /// Panic if any group length disagrees with the population size.
    pub fn assert_consistent(&self) {
        let n = self.opacity_logits.len();
        assert_eq!(self.positions.len(), n * 3);
        assert_eq!(self.log_scales.len(), n * 3);
        assert_eq!(self.rotations.len(), n * 4);
        assert_eq!(self.sh_dc.len(), n * 3);
        assert_eq!(self.sh_rest.len(), n * self.sh_rest_len() * 3);
    }
}

impl PrimitiveStore for GaussianCloud {
    fn len(&self) -> usize {
        self.opacity_logits.len()
    }

    fn generation(&self) -> u64 {
        self.generation
    }

    fn sh_degree(&self) -> usize {
        self.sh_degree
    }

    fn param_layout(&self) -> Vec<(ParamKind, usize)> {
        vec![
            (ParamKind::Positions, self.positions.len()),
            (ParamKind::LogScales, self.log_scales.len()),
            (ParamKind::Rotations, self.rotations.len()),
            (ParamKind::OpacityLogits, self.opacity_logits.len()),
            (ParamKind::ShDc, self.sh_dc.len()),
            (ParamKind::ShRest, self.sh_rest.len()),
        ]
    }

    fn params_mut(&mut self) -> Vec<(ParamKind, &mut [f32])> {
        vec![
            (ParamKind::Positions, self.positions.as_mut_slice()),
            (ParamKind::LogScales, self.log_scales.as_mut_slice()),
            (ParamKind::Rotations, self.rotations.as_mut_slice()),
            (ParamKind::OpacityLogits, self.opacity_logits.as_mut_slice()),
            (ParamKind::ShDc, self.sh_dc.as_mut_slice()),
            (ParamKind::ShRest, self.sh_rest.as_mut_slice()),
        ]
    }

    fn shrink_to_fit(&mut self) {
        self.positions.shrink_to_fit();
        self.log_scales.shrink_to_fit();
        self.rotations.shrink_to_fit();
        self.opacity_logits.shrink_to_fit();
        self.sh_dc.shrink_to_fit();
        self.sh_rest.shrink_to_fit();
    }
}
