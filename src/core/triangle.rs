//! Triangle primitives.
//!
//! A triangle is parameterized by its three world-space vertices, an opacity
//! logit, a log-smoothness (the window exponent is `exp(log_smoothness)`) and
//! SH color coefficients. Storage mirrors [`crate::core::GaussianCloud`].

use crate::core::math::sigmoid;
use crate::core::params::{ParamKind, PrimitiveStore};
use crate::core::sh::{num_sh_rest, MAX_SH_DEGREE};
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

/// One triangle as plain values.
#[derive(Clone, Debug, PartialEq)]
pub struct Triangle {
    pub vertices: [Vector3<f32>; 3],
    pub opacity_logit: f32,
    pub log_smoothness: f32,
    pub sh_dc: Vector3<f32>,
    /// `M × 3`, coefficient-major.
    pub sh_rest: Vec<f32>,
}

impl Triangle {
    pub fn new(vertices: [Vector3<f32>; 3], opacity_logit: f32, log_smoothness: f32, sh_dc: Vector3<f32>, sh_degree: usize) -> Self {
        Self {
            vertices,
            opacity_logit,
            log_smoothness,
            sh_dc,
            sh_rest: vec![0.0; num_sh_rest(sh_degree) * 3],
        }
    }

    pub fn centroid(&self) -> Vector3<f32> {
        (self.vertices[0] + self.vertices[1] + self.vertices[2]) / 3.0
    }
}

/// Length of the longest edge.
pub fn longest_edge(vertices: &[Vector3<f32>; 3]) -> (usize, f32) {
    (0..3)
        .map(|k| (k, (vertices[(k + 1) % 3] - vertices[k]).norm()))
        .fold((0, f32::MIN), |best, cur| if cur.1 > best.1 { cur } else { best })
}

/// A population of triangles in Struct-of-Arrays layout.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TriangleSoup {
    sh_degree: usize,
    /// `N × 9`: `v0.xyz, v1.xyz, v2.xyz`
    pub vertices: Vec<f32>,
    /// `N`
    pub opacity_logits: Vec<f32>,
    /// `N`
    pub log_smoothness: Vec<f32>,
    /// `N × 3`
    pub sh_dc: Vec<f32>,
    /// `N × M × 3`
    pub sh_rest: Vec<f32>,
    #[serde(default)]
    generation: u64,
}

impl TriangleSoup {
    pub fn new(sh_degree: usize) -> Self {
        assert!(sh_degree <= MAX_SH_DEGREE, "SH degree {sh_degree} unsupported");
        Self {
            sh_degree,
            vertices: Vec::new(),
            opacity_logits: Vec::new(),
            log_smoothness: Vec::new(),
            sh_dc: Vec::new(),
            sh_rest: Vec::new(),
            generation: 0,
        }
    }

    pub fn from_triangles(sh_degree: usize, triangles: &[Triangle]) -> Self {
        let mut soup = Self::new(sh_degree);
        for t in triangles {
            soup.push(t);
        }
        soup
    }

    pub fn sh_rest_len(&self) -> usize {
        num_sh_rest(self.sh_degree)
    }

    pub fn push(&mut self, t: &Triangle) {
        assert_eq!(t.sh_rest.len(), self.sh_rest_len() * 3);
        for v in &t.vertices {
            self.vertices.extend_from_slice(v.as_slice());
        }
        self.opacity_logits.push(t.opacity_logit);
        self.log_smoothness.push(t.log_smoothness);
        self.sh_dc.extend_from_slice(t.sh_dc.as_slice());
        self.sh_rest.extend_from_slice(&t.sh_rest);
    }

    pub fn get(&self, i: usize) -> Triangle {
        Triangle {
            vertices: self.triangle_vertices(i),
            opacity_logit: self.opacity_logits[i],
            log_smoothness: self.log_smoothness[i],
            sh_dc: self.dc(i),
            sh_rest: self.rest(i).to_vec(),
        }
    }

    pub fn triangle_vertices(&self, i: usize) -> [Vector3<f32>; 3] {
        let v = &self.vertices[i * 9..i * 9 + 9];
        [
            Vector3::new(v[0], v[1], v[2]),
            Vector3::new(v[3], v[4], v[5]),
            Vector3::new(v[6], v[7], v[8]),
        ]
    }

    pub fn centroid(&self, i: usize) -> Vector3<f32> {
        let [a, b, c] = self.triangle_vertices(i);
        (a + b + c) / 3.0
    }

    pub fn opacity(&self, i: usize) -> f32 {
        sigmoid(self.opacity_logits[i])
    }

    /// Window exponent `exp(log_smoothness)`, always positive.
    pub fn smoothness(&self, i: usize) -> f32 {
        self.log_smoothness[i].exp()
    }

    pub fn dc(&self, i: usize) -> Vector3<f32> {
        Vector3::from_column_slice(&self.sh_dc[i * 3..i * 3 + 3])
    }

    pub fn rest(&self, i: usize) -> &[f32] {
        let stride = self.sh_rest_len() * 3;
        &self.sh_rest[i * stride..(i + 1) * stride]
    }

    pub fn gather(&self, indices: &[usize]) -> Self {
        let mut out = Self::new(self.sh_degree);
        let rest = self.sh_rest_len() * 3;
        out.vertices.reserve(indices.len() * 9);
        out.sh_rest.reserve(indices.len() * rest);
        for &i in indices {
            out.vertices.extend_from_slice(&self.vertices[i * 9..i * 9 + 9]);
            out.opacity_logits.push(self.opacity_logits[i]);
            out.log_smoothness.push(self.log_smoothness[i]);
            out.sh_dc.extend_from_slice(&self.sh_dc[i * 3..i * 3 + 3]);
            out.sh_rest.extend_from_slice(&self.sh_rest[i * rest..(i + 1) * rest]);
        }
        out.generation = self.generation;
        out
    }

    /// Replace the population with `next` and advance the generation.
    pub fn rebuild(&mut self, next: TriangleSoup) {
        assert_eq!(next.sh_degree, self.sh_degree);
        next.assert_consistent();
        let generation = self.generation + 1;
        *self = next;
        self.generation = generation;
    }

    pub fn assert_consistent(&self) {
        let n = self.opacity_logits.len();
        assert_eq!(self.vertices.len(), n * 9);
        assert_eq!(self.log_smoothness.len(), n);
        assert_eq!(self.sh_dc.len(), n * 3);
        assert_eq!(self.sh_rest.len(), n * self.sh_rest_len() * 3);
    }
}

impl PrimitiveStore for TriangleSoup {
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
            (ParamKind::Vertices, self.vertices.len()),
            (ParamKind::OpacityLogits, self.opacity_logits.len()),
            (ParamKind::LogSmoothness, self.log_smoothness.len()),
            (ParamKind::ShDc, self.sh_dc.len()),
            (ParamKind::ShRest, self.sh_rest.len()),
        ]
    }

    fn params_mut(&mut self) -> Vec<(ParamKind, &mut [f32])> {
        vec![
            (ParamKind::Vertices, self.vertices.as_mut_slice()),
            (ParamKind::OpacityLogits, self.opacity_logits.as_mut_slice()),
            (ParamKind::LogSmoothness, self.log_smoothness.as_mut_slice()),
            (ParamKind::ShDc, self.sh_dc.as_mut_slice()),
            (ParamKind::ShRest, self.sh_rest.as_mut_slice()),
        ]
    }

    fn shrink_to_fit(&mut self) {
        self.vertices.shrink_to_fit();
        self.opacity_logits.shrink_to_fit();
        self.log_smoothness.shrink_to_fit();
        self.sh_dc.shrink_to_fit();
        self.sh_rest.shrink_to_fit();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn unit_triangle(z: f32) -> Triangle {
        Triangle::new(
            [
                Vector3::new(0.0, 0.0, z),
                Vector3::new(1.0, 0.0, z),
                Vector3::new(0.0, 1.0, z),
            ],
            0.0,
            0.0,
            Vector3::new(0.1, 0.2, 0.3),
            0,
        )
    }

    #[test]
    fn test_soup_roundtrip_and_accessors() {
        let tris = vec![unit_triangle(1.0), unit_triangle(2.0)];
        let soup = TriangleSoup::from_triangles(0, &tris);
        assert_eq!(soup.len(), 2);
        assert_eq!(soup.get(1), tris[1]);
        assert_relative_eq!(soup.smoothness(0), 1.0, epsilon = 1e-6);
        assert_relative_eq!(soup.centroid(1), Vector3::new(1.0 / 3.0, 1.0 / 3.0, 2.0), epsilon = 1e-6);
    }

    #[test]
    fn test_longest_edge() {
        let (k, len) = longest_edge(&unit_triangle(0.0).vertices);
        assert_eq!(k, 1);
        assert_relative_eq!(len, 2.0f32.sqrt(), epsilon = 1e-6);
    }

    #[test]
    fn test_rebuild_bumps_generation() {
        let mut soup = TriangleSoup::from_triangles(0, &[unit_triangle(1.0), unit_triangle(2.0)]);
        let next = soup.gather(&[1]);
        soup.rebuild(next);
        assert_eq!(soup.generation(), 1);
        assert_eq!(soup.len(), 1);
        assert_relative_eq!(soup.triangle_vertices(0)[0].z, 2.0);
    }
}
