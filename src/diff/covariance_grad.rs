//! Gradients for covariance reconstruction and projection.
//!
//! Critical math path:
//!   log-scale + quaternion -> Σ (3×3) -> Σ₂d = T Σ Tᵀ, T = J(t) W
//!
//! where `W` is the view rotation, `t` the camera-space center and `J` the
//! perspective Jacobian at `t`, with `t.x/t.z` and `t.y/t.z` clamped to
//! ±1.3·tan(fov/2) so primitives near the frustum edge do not blow up.

use crate::diff::quaternion_grad::quaternion_raw_to_matrix_grad;
use nalgebra::{Matrix2, Matrix2x3, Matrix3, Vector3, Vector4};

/// Frustum margin for the Jacobian clamp.
pub const JACOBIAN_CLAMP: f32 = 1.3;

/// Saved state of [`project_covariance_2d`].
#[derive(Clone, Copy, Debug)]
pub struct CovarianceProjection {
    /// Σ₂d before regularization.
    pub cov2d: Matrix2<f32>,
    /// J W
    pub t: Matrix2x3<f32>,
    /// Clamped camera-space x and y used in J.
    pub tx: f32,
    pub ty: f32,
    /// Whether the x / y clamp was active, and its signed limit.
    pub clamp_x: Option<f32>,
    pub clamp_y: Option<f32>,
}

/// Project a world-space 3D covariance into a 2D pixel-space covariance.
pub fn project_covariance_2d(
    point_cam: &Vector3<f32>,
    view_rotation: &Matrix3<f32>,
    fx: f32,
    fy: f32,
    tan_half_fov: (f32, f32),
    sigma: &Matrix3<f32>,
) -> CovarianceProjection {
    let tz = point_cam.z;
    let lim_x = JACOBIAN_CLAMP * tan_half_fov.0;
    let lim_y = JACOBIAN_CLAMP * tan_half_fov.1;

    let (tx, clamp_x) = clamp_ratio(point_cam.x / tz, lim_x, tz);
    let (ty, clamp_y) = clamp_ratio(point_cam.y / tz, lim_y, tz);

    let tz2 = tz * tz;
    let j = Matrix2x3::new(fx / tz, 0.0, -fx * tx / tz2, 0.0, fy / tz, -fy * ty / tz2);
    let t = j * view_rotation;
    let cov2d = t * sigma * t.transpose();

    CovarianceProjection {
        cov2d,
        t,
        tx,
        ty,
        clamp_x,
        clamp_y,
    }
}

fn clamp_ratio(ratio: f32, limit: f32, tz: f32) -> (f32, Option<f32>) {
    if ratio > limit {
        (limit * tz, Some(limit))
    } else if ratio < -limit {
        (-limit * tz, Some(-limit))
    } else {
        (ratio * tz, None)
    }
}

/// Backward of [`project_covariance_2d`].
///
/// `d_cov` is `(dL/dΣxx, dL/dΣxy, dL/dΣyy)` with Σxy counted once.
/// Returns `(dL/dΣ, dL/dt)`.
pub fn project_covariance_2d_backward(
    fwd: &CovarianceProjection,
    point_cam: &Vector3<f32>,
    view_rotation: &Matrix3<f32>,
    fx: f32,
    fy: f32,
    sigma: &Matrix3<f32>,
    d_cov: &Vector3<f32>,
) -> (Matrix3<f32>, Vector3<f32>) {
    // Symmetric upstream: the off-diagonal entry appears twice in Σ₂d.
    let g = Matrix2::new(d_cov.x, 0.5 * d_cov.y, 0.5 * d_cov.y, d_cov.z);

    let d_sigma = fwd.t.transpose() * g * fwd.t;
    let d_t = 2.0 * g * fwd.t * sigma;
    let d_j = d_t * view_rotation.transpose();

    let tz = point_cam.z;
    let tz2 = tz * tz;
    let tz3 = tz2 * tz;

    let d_tx = -fx / tz2 * d_j[(0, 2)];
    let d_ty = -fy / tz2 * d_j[(1, 2)];
    let mut d_tz = -fx / tz2 * d_j[(0, 0)] - fy / tz2 * d_j[(1, 1)]
        + 2.0 * fx * fwd.tx / tz3 * d_j[(0, 2)]
        + 2.0 * fy * fwd.ty / tz3 * d_j[(1, 2)];

    let mut d_point = Vector3::zeros();
    match fwd.clamp_x {
        None => d_point.x = d_tx,
        Some(limit) => d_tz += limit * d_tx,
    }
    match fwd.clamp_y {
        None => d_point.y = d_ty,
        Some(limit) => d_tz += limit * d_ty,
    }
    d_point.z = d_tz;

    (d_sigma, d_point)
}

/// Backward of Σ = (R S)(R S)ᵀ, S = diag(exp(log_scale)), R = R(q_raw).
///
/// Returns `(dL/dlog_scale, dL/dq_raw)` for an upstream dL/dΣ (symmetric).
pub fn covariance_3d_backward(
    log_scale: &Vector3<f32>,
    q_raw: &Vector4<f32>,
    d_sigma: &Matrix3<f32>,
) -> (Vector3<f32>, Vector4<f32>) {
    let s = log_scale.map(f32::exp);
    let r = crate::core::quaternion_to_matrix(q_raw);
    let m = r * Matrix3::from_diagonal(&s);

    // Σ = M Mᵀ  =>  dM = 2 dΣ M
    let d_m = 2.0 * d_sigma * m;

    // M = R S  =>  dS = Rᵀ dM (diagonal part), dR = dM S
    let rt_dm = r.transpose() * d_m;
    let d_log_scale = Vector3::new(rt_dm[(0, 0)] * s.x, rt_dm[(1, 1)] * s.y, rt_dm[(2, 2)] * s.z);
    let d_r = d_m * Matrix3::from_diagonal(&s);

    (d_log_scale, quaternion_raw_to_matrix_grad(q_raw, &d_r))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::math::build_covariance_3d;
    use approx::assert_relative_eq;

    fn view_rotation() -> Matrix3<f32> {
        nalgebra::Rotation3::from_euler_angles(0.1, -0.2, 0.3).into_inner()
    }

    fn scalar_loss(point: &Vector3<f32>, log_scale: &Vector3<f32>, q: &Vector4<f32>, up: &Vector3<f32>) -> f32 {
        let sigma = build_covariance_3d(&log_scale.map(f32::exp), q);
        let p = project_covariance_2d(point, &view_rotation(), 300.0, 280.0, (0.5, 0.4), &sigma);
        up.x * p.cov2d[(0, 0)] + up.y * p.cov2d[(0, 1)] + up.z * p.cov2d[(1, 1)]
    }

    #[test]
    fn test_covariance_projection_backward_matches_finite_difference() {
        let point = Vector3::new(0.3, -0.2, 3.0);
        let log_scale = Vector3::new(-1.0, -1.5, -0.7);
        let q = Vector4::new(0.2, -0.1, 0.3, 0.9);
        let up = Vector3::new(0.01, -0.02, 0.015);

        let sigma = build_covariance_3d(&log_scale.map(f32::exp), &q);
        let fwd = project_covariance_2d(&point, &view_rotation(), 300.0, 280.0, (0.5, 0.4), &sigma);
        let (d_sigma, d_point) = project_covariance_2d_backward(&fwd, &point, &view_rotation(), 300.0, 280.0, &sigma, &up);
        let (d_log_scale, d_q) = covariance_3d_backward(&log_scale, &q, &d_sigma);

        let eps = 1e-3f32;
        for k in 0..3 {
            let mut pp = point;
            let mut pm = point;
            pp[k] += eps;
            pm[k] -= eps;
            let numeric = (scalar_loss(&pp, &log_scale, &q, &up) - scalar_loss(&pm, &log_scale, &q, &up)) / (2.0 * eps);
            assert_relative_eq!(d_point[k], numeric, epsilon = 2e-2, max_relative = 2e-2);

            let mut sp = log_scale;
            let mut sm = log_scale;
            sp[k] += eps;
            sm[k] -= eps;
            let numeric = (scalar_loss(&point, &sp, &q, &up) - scalar_loss(&point, &sm, &q, &up)) / (2.0 * eps);
            assert_relative_eq!(d_log_scale[k], numeric, epsilon = 2e-2, max_relative = 2e-2);
        }
        for k in 0..4 {
            let mut qp = q;
            let mut qm = q;
            qp[k] += eps;
            qm[k] -= eps;
            let numeric = (scalar_loss(&point, &log_scale, &qp, &up) - scalar_loss(&point, &log_scale, &qm, &up)) / (2.0 * eps);
            assert_relative_eq!(d_q[k], numeric, epsilon = 2e-2, max_relative = 2e-2);
        }
    }

    #[test]
    fn test_jacobian_clamp_limits_tx() {
        let sigma = Matrix3::identity() * 0.01;
        let far_right = Vector3::new(10.0, 0.0, 1.0);
        let p = project_covariance_2d(&far_right, &Matrix3::identity(), 100.0, 100.0, (0.5, 0.5), &sigma);
        assert_relative_eq!(p.clamp_x.unwrap(), 0.65, epsilon = 1e-6);
        assert_relative_eq!(p.tx, 0.65, epsilon = 1e-6);
        assert!(p.clamp_y.is_none());
    }
}
