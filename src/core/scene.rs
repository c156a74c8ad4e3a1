//! A scene holds exactly one primitive variant.

use crate::core::gaussian::GaussianCloud;
use crate::core::params::{ParamKind, PrimitiveStore};
use crate::core::sh::sh_to_rgb;
use crate::core::triangle::TriangleSoup;
use nalgebra::Vector3;

#[derive(Clone, Debug)]
pub enum Scene {
    Gaussians(GaussianCloud),
    Triangles(TriangleSoup),
}

impl Scene {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Scene::Gaussians(_) => "gaussians",
            Scene::Triangles(_) => "triangles",
        }
    }

    /// Gaussian means or triangle centroids.
    pub fn centers(&self) -> Vec<Vector3<f32>> {
        match self {
            Scene::Gaussians(c) => (0..c.len()).map(|i| c.position(i)).collect(),
            Scene::Triangles(t) => (0..t.len()).map(|i| t.centroid(i)).collect(),
        }
    }

    /// View-independent (DC) color of every primitive.
    pub fn base_colors(&self) -> Vec<Vector3<f32>> {
        let dc: Vec<Vector3<f32>> = match self {
            Scene::Gaussians(c) => (0..c.len()).map(|i| c.dc(i)).collect(),
            Scene::Triangles(t) => (0..t.len()).map(|i| t.dc(i)).collect(),
        };
        dc.into_iter().map(|c| c.map(sh_to_rgb)).collect()
    }

    fn store(&self) -> &dyn PrimitiveStore {
        match self {
            Scene::Gaussians(c) => c,
            Scene::Triangles(t) => t,
        }
    }

    fn store_mut(&mut self) -> &mut dyn PrimitiveStore {
        match self {
            Scene::Gaussians(c) => c,
            Scene::Triangles(t) => t,
        }
    }
}

impl PrimitiveStore for Scene {
    fn len(&self) -> usize {
        self.store().len()
    }

    fn generation(&self) -> u64 {
        self.store().generation()
    }

    fn sh_degree(&self) -> usize {
        self.store().sh_degree()
    }

    fn param_layout(&self) -> Vec<(ParamKind, usize)> {
        self.store().param_layout()
    }

    fn params_mut(&mut self) -> Vec<(ParamKind, &mut [f32])> {
        self.store_mut().params_mut()
    }

    fn shrink_to_fit(&mut self) {
        self.store_mut().shrink_to_fit()
    }
}

impl From<GaussianCloud> for Scene {
    fn from(cloud: GaussianCloud) -> Self {
        Scene::Gaussians(cloud)
    }
}

impl From<TriangleSoup> for Scene {
    fn from(soup: TriangleSoup) -> Self {
        Scene::Triangles(soup)
    }
}
