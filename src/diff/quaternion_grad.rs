//! Gradients for quaternion -> rotation matrix conversion.
//!
//! The optimization parameter is an unconstrained 4-vector `q_raw` stored as
//! `(x, y, z, r)`; it is normalized internally:
//!   q = q_raw / ||q_raw||
//!
//! The forward conversion is `core::math::quaternion_to_matrix`.

use nalgebra::{Matrix3, Vector4};

/// Gradient of `quaternion_to_matrix` w.r.t. `q_raw`, given upstream `d_r`.
///
/// `d_r` is dL/dR (3×3). Returns dL/dq_raw as `(x, y, z, r)`.
pub fn quaternion_raw_to_matrix_grad(q_raw: &Vector4<f32>, d_r: &Matrix3<f32>) -> Vector4<f32> {
    let n = q_raw.norm() + crate::core::math::EPSILON;
    let q = q_raw / n;

    let (x, y, z, r) = (q.x, q.y, q.z, q.w);
    let g = d_r;

    // Off-diagonal entries of R pair up as 2(ab ± rc), so only the symmetric
    // and antisymmetric parts of the upstream gradient matter.
    let s_xy = g[(0, 1)] + g[(1, 0)];
    let s_xz = g[(0, 2)] + g[(2, 0)];
    let s_yz = g[(1, 2)] + g[(2, 1)];
    let a_x = g[(2, 1)] - g[(1, 2)];
    let a_y = g[(0, 2)] - g[(2, 0)];
    let a_z = g[(1, 0)] - g[(0, 1)];

    let dx = 2.0 * (y * s_xy + z * s_xz + r * a_x) - 4.0 * x * (g[(1, 1)] + g[(2, 2)]);
    let dy = 2.0 * (x * s_xy + z * s_yz + r * a_y) - 4.0 * y * (g[(0, 0)] + g[(2, 2)]);
    let dz = 2.0 * (x * s_xz + y * s_yz + r * a_z) - 4.0 * z * (g[(0, 0)] + g[(1, 1)]);
    let dr = 2.0 * (x * a_x + y * a_y + z * a_z);

    let grad_unit = Vector4::new(dx, dy, dz, dr);

    // Backprop through normalization: q = q_raw / ||q_raw||.
    // dL/dq_raw = (I - q q^T) / ||q_raw|| * dL/dq
    let dot = q.dot(&grad_unit);
    (grad_unit - q * dot) / n
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::math::quaternion_to_matrix;
    use approx::assert_relative_eq;

    #[test]
    fn test_quaternion_grad_matches_finite_difference() {
        let q = Vector4::new(0.3, -0.5, 0.2, 1.4);
        let d_r = Matrix3::new(0.3, -0.1, 0.7, 0.2, 0.5, -0.4, -0.6, 0.1, 0.9);
        let loss = |q: &Vector4<f32>| quaternion_to_matrix(q).component_mul(&d_r).sum();
        let grad = quaternion_raw_to_matrix_grad(&q, &d_r);

        let eps = 1e-3f32;
        for k in 0..4 {
            let mut qp = q;
            let mut qm = q;
            qp[k] += eps;
            qm[k] -= eps;
            let numeric = (loss(&qp) - loss(&qm)) / (2.0 * eps);
            assert_relative_eq!(grad[k], numeric, epsilon = 2e-3);
        }
    }

    #[test]
    fn test_gradient_orthogonal_to_quaternion() {
        // Scaling q_raw does not change R, so the gradient has no radial part.
        let q = Vector4::new(0.1, 0.2, -0.3, 0.8);
        let d_r = Matrix3::new(1.0, 2.0, 3.0, -1.0, 0.5, 0.0, 0.2, -0.7, 1.1);
        let grad = quaternion_raw_to_matrix_grad(&q, &d_r);
        assert_relative_eq!(grad.dot(&q), 0.0, epsilon = 1e-5);
    }
}
