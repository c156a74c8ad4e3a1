//! Mathematical utilities (quaternions, covariance, activation functions, 2×2 algebra).

use nalgebra::{Matrix2, Matrix3, Vector3, Vector4};

/// Guards every division by a norm or a determinant.
pub const EPSILON: f32 = 1e-8;

/// Sigmoid activation function: σ(x) = 1 / (1 + e^(-x))
///
/// Maps R → (0, 1)
/// Used for opacity (converts unbounded optimization to valid probability)
pub fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// Inverse sigmoid (logit): logit(p) = log(p / (1-p))
///
/// Maps (0, 1) → R
/// Used to convert initial opacity values to optimization space
pub fn inverse_sigmoid(p: f32) -> f32 {
    // Clamp to avoid log(0) or division by zero
    let p_clamped = p.clamp(1e-6, 1.0 - 1e-6);
    (p_clamped / (1.0 - p_clamped)).ln()
}

/// Normalize a raw quaternion stored as `(x, y, z, r)`.
///
/// A zero quaternion stays (near) zero instead of producing NaN; the
/// resulting rotation is then the identity.
pub fn normalize_quaternion(q_raw: &Vector4<f32>) -> Vector4<f32> {
    q_raw / (q_raw.norm() + EPSILON)
}

/// Convert a raw quaternion `(x, y, z, r)` to a 3×3 rotation matrix.
///
/// The quaternion is normalized first, so any non-zero 4-vector is valid.
/// The component order matches `nalgebra::Quaternion::coords`.
///
/// R = | 1-2(y²+z²)   2(xy-rz)    2(xz+ry)  |
///     | 2(xy+rz)     1-2(x²+z²)  2(yz-rx)  |
///     | 2(xz-ry)     2(yz+rx)    1-2(x²+y²)|
pub fn quaternion_to_matrix(q_raw: &Vector4<f32>) -> Matrix3<f32> {
    let q = normalize_quaternion(q_raw);
    let (x, y, z, r) = (q.x, q.y, q.z, q.w);

    Matrix3::new(
        1.0 - 2.0 * (y * y + z * z),
        2.0 * (x * y - r * z),
        2.0 * (x * z + r * y),
        2.0 * (x * y + r * z),
        1.0 - 2.0 * (x * x + z * z),
        2.0 * (y * z - r * x),
        2.0 * (x * z - r * y),
        2.0 * (y * z + r * x),
        1.0 - 2.0 * (x * x + y * y),
    )
}

/// Build the 3D covariance Σ = (R·S)(R·S)ᵀ.
///
/// `scale` is the *activated* scale (already exponentiated).
pub fn build_covariance_3d(scale: &Vector3<f32>, q_raw: &Vector4<f32>) -> Matrix3<f32> {
    let m = quaternion_to_matrix(q_raw) * Matrix3::from_diagonal(scale);
    m * m.transpose()
}

/// Pack the upper triangle of a symmetric 3×3 matrix as
/// `[xx, xy, xz, yy, yz, zz]`.
pub fn strip_lower_triangle(m: &Matrix3<f32>) -> [f32; 6] {
    [
        m[(0, 0)],
        m[(0, 1)],
        m[(0, 2)],
        m[(1, 1)],
        m[(1, 2)],
        m[(2, 2)],
    ]
}

/// Inverse of [`strip_lower_triangle`].
pub fn covariance_from_upper(u: &[f32; 6]) -> Matrix3<f32> {
    Matrix3::new(u[0], u[1], u[2], u[1], u[3], u[4], u[2], u[4], u[5])
}

/// Inverse of a 2×2 matrix.
///
/// The determinant is clamped away from zero (keeping its sign) so the
/// result is always finite for finite input.
pub fn inverse_2x2(m: &Matrix2<f32>) -> Matrix2<f32> {
    let det = m[(0, 0)] * m[(1, 1)] - m[(0, 1)] * m[(1, 0)];
    let det = if det.abs() < EPSILON {
        EPSILON.copysign(det)
    } else {
        det
    };
    let inv_det = 1.0 / det;
    Matrix2::new(
        m[(1, 1)] * inv_det,
        -m[(0, 1)] * inv_det,
        -m[(1, 0)] * inv_det,
        m[(0, 0)] * inv_det,
    )
}

/// Largest eigenvalue of the symmetric 2×2 matrix `[[a, b], [b, c]]`.
///
/// Closed form `mid + sqrt(mid² - det)`; the discriminant is floored at 0.1
/// so nearly isotropic footprints still get a stable radius.
pub fn max_eigenvalue_2x2(a: f32, b: f32, c: f32) -> f32 {
    let mid = 0.5 * (a + c);
    let det = a * c - b * b;
    mid + (mid * mid - det).max(0.1).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::{SymmetricEigen, UnitQuaternion};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    #[test]
    fn test_sigmoid() {
        assert_relative_eq!(sigmoid(0.0), 0.5, epsilon = 1e-6);
        assert!(sigmoid(10.0) > 0.99);
        assert!(sigmoid(-10.0) < 0.01);
    }

    #[test]
    fn test_sigmoid_inverse_roundtrip() {
        let p = 0.7;
        let x = inverse_sigmoid(p);
        assert_relative_eq!(p, sigmoid(x), epsilon = 1e-6);
    }

    #[test]
    fn test_quaternion_to_matrix_identity() {
        let r = quaternion_to_matrix(&Vector4::new(0.0, 0.0, 0.0, 1.0));
        assert_relative_eq!(r, Matrix3::identity(), epsilon = 1e-6);
    }

    #[test]
    fn test_quaternion_x_first_is_half_turn_about_x() {
        let r = quaternion_to_matrix(&Vector4::new(1.0, 0.0, 0.0, 0.0));
        let p = r * Vector3::new(0.3, 1.0, 2.0);
        assert_relative_eq!(p, Vector3::new(0.3, -1.0, -2.0), epsilon = 1e-6);
    }

    #[test]
    fn test_quaternion_matches_nalgebra_convention() {
        let uq = UnitQuaternion::from_euler_angles(0.5, -0.3, 1.2);
        let r = quaternion_to_matrix(&uq.coords);
        assert_relative_eq!(r, uq.to_rotation_matrix().into_inner(), epsilon = 1e-5);
    }

    #[test]
    fn test_quaternion_unnormalized_input() {
        let q = Vector4::new(0.2, -0.4, 0.1, 0.9);
        let r1 = quaternion_to_matrix(&q);
        let r2 = quaternion_to_matrix(&(q * 7.5));
        assert_relative_eq!(r1, r2, epsilon = 1e-5);
        assert_relative_eq!(r1 * r1.transpose(), Matrix3::identity(), epsilon = 1e-5);
    }

    #[test]
    fn test_zero_quaternion_does_not_produce_nan() {
        let r = quaternion_to_matrix(&Vector4::zeros());
        assert!(r.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_covariance_symmetric_psd() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..200 {
            let scale = Vector3::new(
                rng.gen_range(1e-3..2.0),
                rng.gen_range(1e-3..2.0),
                rng.gen_range(1e-3..2.0),
            );
            let q = Vector4::new(
                rng.gen_range(-1.0..1.0),
                rng.gen_range(-1.0..1.0),
                rng.gen_range(-1.0..1.0),
                rng.gen_range(-1.0..1.0),
            );
            let packed = strip_lower_triangle(&build_covariance_3d(&scale, &q));
            assert_eq!(packed.len(), 6);
            let m = covariance_from_upper(&packed);
            assert_relative_eq!(m, m.transpose(), epsilon = 0.0);
            let eigen = SymmetricEigen::new(m);
            let max = eigen.eigenvalues.max();
            for &l in eigen.eigenvalues.iter() {
                assert!(l >= -1e-5 * max.max(1.0), "eigenvalue {l} not PSD");
            }
        }
    }

    #[test]
    fn test_inverse_2x2_roundtrip() {
        let mut rng = StdRng::seed_from_u64(11);
        let mut checked = 0;
        while checked < 100 {
            let m: Matrix2<f32> = Matrix2::new(
                rng.gen_range(-3.0..3.0),
                rng.gen_range(-3.0..3.0),
                rng.gen_range(-3.0..3.0),
                rng.gen_range(-3.0..3.0),
            );
            if m.determinant().abs() < 0.5 {
                continue;
            }
            assert_relative_eq!(m * inverse_2x2(&m), Matrix2::identity(), epsilon = 1e-5);
            checked += 1;
        }
    }

    #[test]
    fn test_inverse_2x2_singular_is_finite() {
        let inv = inverse_2x2(&Matrix2::zeros());
        assert!(inv.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_max_eigenvalue_diagonal() {
        assert_relative_eq!(max_eigenvalue_2x2(9.0, 0.0, 1.0), 9.0, epsilon = 1e-5);
    }
}
