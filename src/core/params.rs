//! Parameter groups shared by both primitive variants.
//!
//! Every optimizable attribute lives in one flat `Vec<f32>` per group
//! (`positions` is `N × 3`, `rotations` is `N × 4`, ...). Gradients use the
//! exact same layout, so the optimizer can treat every group uniformly.

use serde::{Deserialize, Serialize};

/// Name of an optimizable parameter group.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ParamKind {
    Positions,
    LogScales,
    Rotations,
    Vertices,
    OpacityLogits,
    LogSmoothness,
    ShDc,
    ShRest,
}

impl ParamKind {
    /// Floats per primitive in this group (`ShRest` depends on the SH degree).
    pub fn stride(self, sh_rest_len: usize) -> usize {
        match self {
            ParamKind::Positions | ParamKind::LogScales | ParamKind::ShDc => 3,
            ParamKind::Rotations => 4,
            ParamKind::Vertices => 9,
            ParamKind::OpacityLogits | ParamKind::LogSmoothness => 1,
            ParamKind::ShRest => sh_rest_len * 3,
        }
    }
}

/// Gradients for every parameter group of a store, in store layout.
#[derive(Clone, Debug, Default)]
pub struct ParamGrads {
    groups: Vec<(ParamKind, Vec<f32>)>,
}

impl ParamGrads {
    /// Zero gradients for the given `(kind, length)` layout.
    pub fn zeros(layout: &[(ParamKind, usize)]) -> Self {
        Self {
            groups: layout
                .iter()
                .map(|&(kind, len)| (kind, vec![0.0; len]))
                .collect(),
        }
    }

    pub fn from_groups(groups: Vec<(ParamKind, Vec<f32>)>) -> Self {
        Self { groups }
    }

    pub fn get(&self, kind: ParamKind) -> Option<&[f32]> {
        self.groups
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, v)| v.as_slice())
    }

    pub fn get_mut(&mut self, kind: ParamKind) -> Option<&mut [f32]> {
        self.groups
            .iter_mut()
            .find(|(k, _)| *k == kind)
            .map(|(_, v)| v.as_mut_slice())
    }

    pub fn iter(&self) -> impl Iterator<Item = (ParamKind, &[f32])> {
        self.groups.iter().map(|(k, v)| (*k, v.as_slice()))
    }

    pub fn layout(&self) -> Vec<(ParamKind, usize)> {
        self.groups.iter().map(|(k, v)| (*k, v.len())).collect()
    }

    /// True when no group contains a NaN or infinity.
    pub fn is_finite(&self) -> bool {
        self.groups
            .iter()
            .all(|(_, v)| v.iter().all(|g| g.is_finite()))
    }

    /// Element-wise sum; both sides must share a layout.
    pub fn accumulate(&mut self, other: &ParamGrads) {
        assert_eq!(self.groups.len(), other.groups.len());
        for ((ka, a), (kb, b)) in self.groups.iter_mut().zip(other.groups.iter()) {
            assert_eq!(ka, kb);
            assert_eq!(a.len(), b.len());
            for (x, y) in a.iter_mut().zip(b.iter()) {
                *x += *y;
            }
        }
    }
}

/// A population of primitives with flat, group-wise parameter storage.
///
/// `generation` changes whenever the population is rebuilt (density control,
/// snapshot load); per-primitive side buffers compare it to detect staleness.
pub trait PrimitiveStore {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn generation(&self) -> u64;

    /// SH degree the coefficients are stored for.
    fn sh_degree(&self) -> usize;

    /// `(kind, total length)` of every parameter group.
    fn param_layout(&self) -> Vec<(ParamKind, usize)>;

    /// Mutable views of every parameter group, in `param_layout` order.
    fn params_mut(&mut self) -> Vec<(ParamKind, &mut [f32])>;

    /// Release spare capacity after the population shrank.
    fn shrink_to_fit(&mut self);
}
