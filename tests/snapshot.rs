//! PLY snapshot round trips through files on disk.

use nalgebra::{Vector3, Vector4};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::path::PathBuf;

use tile_splat::core::{Gaussian, GaussianCloud, PrimitiveStore, Triangle, TriangleSoup};
use tile_splat::io::{load_snapshot, save_snapshot};
use tile_splat::{Scene, SnapshotError};

fn temp_path(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("tile_splat_{}_{}.ply", name, std::process::id()))
}

fn v3(rng: &mut StdRng) -> Vector3<f32> {
    Vector3::new(rng.gen_range(-10.0..10.0), rng.gen_range(-10.0..10.0), rng.gen_range(-10.0..10.0))
}

fn random_cloud(rng: &mut StdRng, n: usize, sh_degree: usize) -> GaussianCloud {
    let gs: Vec<Gaussian> = (0..n)
        .map(|_| {
            let mut g = Gaussian::isotropic(v3(rng), 0.0, rng.gen_range(-8.0..8.0), v3(rng), sh_degree);
            g.log_scale = v3(rng) * 0.3;
            g.rotation = Vector4::new(rng.gen(), rng.gen(), rng.gen(), rng.gen());
            for c in g.sh_rest.iter_mut() {
                *c = rng.gen_range(-1.0..1.0);
            }
            g
        })
        .collect();
    GaussianCloud::from_gaussians(sh_degree, &gs)
}

fn random_soup(rng: &mut StdRng, n: usize, sh_degree: usize) -> TriangleSoup {
    let ts: Vec<Triangle> = (0..n)
        .map(|_| {
            let mut t = Triangle::new([v3(rng), v3(rng), v3(rng)], rng.gen_range(-5.0..5.0), rng.gen_range(-2.0..2.0), v3(rng), sh_degree);
            for c in t.sh_rest.iter_mut() {
                *c = rng.gen_range(-1.0..1.0);
            }
            t
        })
        .collect();
    TriangleSoup::from_triangles(sh_degree, &ts)
}

fn bits(values: &[f32]) -> Vec<u32> {
    values.iter().map(|v| v.to_bits()).collect()
}

fn roundtrip(scene: &Scene, name: &str) -> Scene {
    let path = temp_path(name);
    save_snapshot(scene, &path).unwrap();
    let back = load_snapshot(&path).unwrap();
    std::fs::remove_file(&path).ok();
    back
}

#[test]
fn test_gaussian_snapshot_roundtrip_is_bit_exact() {
    let mut rng = StdRng::seed_from_u64(2024);
    for n in [0usize, 1, 1000] {
        let cloud = random_cloud(&mut rng, n, 3);
        let back = roundtrip(&Scene::Gaussians(cloud.clone()), &format!("gaussians_{n}"));
        let Scene::Gaussians(back) = back else {
            panic!("variant changed");
        };
        assert_eq!(back.len(), n);
        assert_eq!(back.sh_degree(), 3);
        assert_eq!(bits(&back.positions), bits(&cloud.positions));
        assert_eq!(bits(&back.log_scales), bits(&cloud.log_scales));
        assert_eq!(bits(&back.rotations), bits(&cloud.rotations));
        assert_eq!(bits(&back.opacity_logits), bits(&cloud.opacity_logits));
        assert_eq!(bits(&back.sh_dc), bits(&cloud.sh_dc));
        assert_eq!(bits(&back.sh_rest), bits(&cloud.sh_rest));
    }
}

#[test]
fn test_triangle_snapshot_roundtrip_is_bit_exact() {
    let mut rng = StdRng::seed_from_u64(7);
    for n in [0usize, 1, 1000] {
        let soup = random_soup(&mut rng, n, 1);
        let back = roundtrip(&Scene::Triangles(soup.clone()), &format!("triangles_{n}"));
        let Scene::Triangles(back) = back else {
            panic!("variant changed");
        };
        assert_eq!(back.len(), n);
        assert_eq!(back.sh_degree(), 1);
        assert_eq!(bits(&back.vertices), bits(&soup.vertices));
        assert_eq!(bits(&back.opacity_logits), bits(&soup.opacity_logits));
        assert_eq!(bits(&back.log_smoothness), bits(&soup.log_smoothness));
        assert_eq!(bits(&back.sh_dc), bits(&soup.sh_dc));
        assert_eq!(bits(&back.sh_rest), bits(&soup.sh_rest));
    }
}

#[test]
fn test_every_sh_degree_roundtrips() {
    let mut rng = StdRng::seed_from_u64(1);
    for degree in 0..=3 {
        let cloud = random_cloud(&mut rng, 4, degree);
        let back = roundtrip(&Scene::Gaussians(cloud), &format!("degree_{degree}"));
        assert_eq!(back.sh_degree(), degree);
    }
}

#[test]
fn test_missing_file_is_io_error() {
    let err = load_snapshot(&temp_path("does_not_exist")).unwrap_err();
    assert!(matches!(err, SnapshotError::Io(_)));
}
