//! Camera model (pinhole camera with intrinsics and extrinsics).
//!
//! Internal convention (the only one the renderer ever sees):
//! - column vectors, `p_camera = view * p_world`
//! - OpenCV axes: +x right, +y down, +z forward
//!
//! Every other convention is converted once, in [`normalize_camera_basis`].

use nalgebra::{Matrix3, Matrix4, Vector2, Vector3, Vector4};
use serde::{Deserialize, Serialize};

/// Default near clipping plane used for the projection matrix.
pub const DEFAULT_ZNEAR: f32 = 0.01;
/// Default far clipping plane used for the projection matrix.
pub const DEFAULT_ZFAR: f32 = 100.0;

/// Axis convention of an incoming camera pose.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CameraConvention {
    /// +x right, +y down, +z forward (COLMAP, OpenCV).
    OpenCv,
    /// +x right, +y up, -z forward (OpenGL, Blender, NeRF synthetic).
    OpenGl,
}

/// Memory layout of an incoming 4×4 matrix given as 16 floats.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatrixLayout {
    RowMajor,
    ColumnMajor,
}

/// Direction of an incoming pose matrix.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PoseKind {
    WorldToCamera,
    CameraToWorld,
}

/// Convert any supported pose encoding to a camera-to-world matrix in the
/// internal convention (column vectors, OpenCV axes).
///
/// Input: 16 floats in `layout`, describing a `kind` transform whose camera
/// axes follow `convention`.
/// Output: camera-to-world 4×4, OpenCV axes.
///
/// Panics if a world-to-camera pose is not invertible.
pub fn normalize_camera_basis(
    raw: &[f32; 16],
    layout: MatrixLayout,
    kind: PoseKind,
    convention: CameraConvention,
) -> Matrix4<f32> {
    let m = match layout {
        MatrixLayout::RowMajor => Matrix4::from_row_slice(raw),
        MatrixLayout::ColumnMajor => Matrix4::from_column_slice(raw),
    };

    let c2w = match kind {
        PoseKind::CameraToWorld => m,
        PoseKind::WorldToCamera => {
            let Some(c2w) = m.try_inverse() else {
                panic!("singular world-to-camera pose: {m}");
            };
            c2w
        }
    };

    match convention {
        CameraConvention::OpenCv => c2w,
        // Flip the camera's y and z axes (columns 1 and 2 of c2w).
        CameraConvention::OpenGl => c2w * Matrix4::from_diagonal(&Vector4::new(1.0, -1.0, -1.0, 1.0)),
    }
}

/// Focal length (pixels) for a field of view (radians) across `pixels`.
pub fn fov_to_focal(fov: f32, pixels: u32) -> f32 {
    pixels as f32 / (2.0 * (0.5 * fov).tan())
}

/// Field of view (radians) for a focal length (pixels) across `pixels`.
pub fn focal_to_fov(focal: f32, pixels: u32) -> f32 {
    2.0 * (pixels as f32 / (2.0 * focal)).atan()
}

/// Map an NDC coordinate to a pixel coordinate (pixel centers are integers).
pub fn ndc_to_pixel(ndc: f32, pixels: u32) -> f32 {
    ((ndc + 1.0) * pixels as f32 - 1.0) * 0.5
}

/// Symmetric perspective projection matrix (camera space → clip space).
///
/// Maps `z = znear` to depth 0 and `z = zfar` to depth 1; `w = z`.
pub fn projection_matrix(znear: f32, zfar: f32, fov_x: f32, fov_y: f32) -> Matrix4<f32> {
    let tan_x = (0.5 * fov_x).tan();
    let tan_y = (0.5 * fov_y).tan();

    let mut p = Matrix4::zeros();
    p[(0, 0)] = 1.0 / tan_x;
    p[(1, 1)] = 1.0 / tan_y;
    p[(2, 2)] = zfar / (zfar - znear);
    p[(2, 3)] = -(zfar * znear) / (zfar - znear);
    p[(3, 2)] = 1.0;
    p
}

/// A pinhole camera with intrinsic and extrinsic parameters.
///
/// Built once per training step or render call, never mutated afterwards.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Camera {
    /// Image width (pixels)
    pub width: u32,

    /// Image height (pixels)
    pub height: u32,

    /// Horizontal field of view (radians)
    pub fov_x: f32,

    /// Vertical field of view (radians)
    pub fov_y: f32,

    /// Focal length in X (pixels)
    pub fx: f32,

    /// Focal length in Y (pixels)
    pub fy: f32,

    pub znear: f32,
    pub zfar: f32,

    /// World → camera transform.
    pub view: Matrix4<f32>,

    /// Camera → clip transform.
    pub projection: Matrix4<f32>,

    /// `projection * view`.
    pub full_projection: Matrix4<f32>,

    /// Camera center in world coordinates.
    pub center: Vector3<f32>,
}

impl Camera {
    /// Create a camera from a world-to-camera matrix and fields of view.
    pub fn new(view: Matrix4<f32>, fov_x: f32, fov_y: f32, width: u32, height: u32) -> Self {
        Self::with_clip_planes(view, fov_x, fov_y, width, height, DEFAULT_ZNEAR, DEFAULT_ZFAR)
    }

    pub fn with_clip_planes(
        view: Matrix4<f32>,
        fov_x: f32,
        fov_y: f32,
        width: u32,
        height: u32,
        znear: f32,
        zfar: f32,
    ) -> Self {
        let projection = projection_matrix(znear, zfar, fov_x, fov_y);
        let full_projection = projection * view;

        // Camera center in world: C = -Rᵀ t
        let rotation = view.fixed_view::<3, 3>(0, 0).into_owned();
        let translation = view.fixed_view::<3, 1>(0, 3).into_owned();
        let center = -(rotation.transpose() * translation);

        Self {
            width,
            height,
            fov_x,
            fov_y,
            fx: fov_to_focal(fov_x, width),
            fy: fov_to_focal(fov_y, height),
            znear,
            zfar,
            view,
            projection,
            full_projection,
            center,
        }
    }

    /// Create a camera from a 3×3 intrinsic matrix and a camera-to-world pose
    /// in the internal convention (see [`normalize_camera_basis`]).
    ///
    /// The principal point is assumed to be the image center. Panics if the
    /// pose is not invertible.
    pub fn from_intrinsics(
        intrinsics: &Matrix3<f32>,
        camera_to_world: &Matrix4<f32>,
        width: u32,
        height: u32,
    ) -> Self {
        let Some(view) = camera_to_world.try_inverse() else {
            panic!("singular camera-to-world pose: {camera_to_world}");
        };
        let fov_x = focal_to_fov(intrinsics[(0, 0)], width);
        let fov_y = focal_to_fov(intrinsics[(1, 1)], height);
        Self::new(view, fov_x, fov_y, width, height)
    }

    /// Camera at `eye` looking at `target`; `up` is the world up direction.
    pub fn look_at(
        eye: Vector3<f32>,
        target: Vector3<f32>,
        up: Vector3<f32>,
        fov_y: f32,
        width: u32,
        height: u32,
    ) -> Self {
        let forward = (target - eye).normalize();
        let right = forward.cross(&up).normalize();
        let down = forward.cross(&right);

        let rotation = Matrix3::from_rows(&[
            right.transpose(),
            down.transpose(),
            forward.transpose(),
        ]);
        let translation = -(rotation * eye);

        let mut view = Matrix4::identity();
        view.fixed_view_mut::<3, 3>(0, 0).copy_from(&rotation);
        view.fixed_view_mut::<3, 1>(0, 3).copy_from(&translation);

        let fov_x = focal_to_fov(fov_to_focal(fov_y, height), width);
        Self::new(view, fov_x, fov_y, width, height)
    }

    /// Rotation part of the view transform.
    pub fn view_rotation(&self) -> Matrix3<f32> {
        self.view.fixed_view::<3, 3>(0, 0).into_owned()
    }

    /// `(tan(fov_x / 2), tan(fov_y / 2))`.
    pub fn tan_half_fov(&self) -> (f32, f32) {
        ((0.5 * self.fov_x).tan(), (0.5 * self.fov_y).tan())
    }

    /// Transform a point from world coordinates to camera coordinates.
    pub fn world_to_camera(&self, point_world: &Vector3<f32>) -> Vector3<f32> {
        (self.view * point_world.push(1.0)).xyz()
    }

    /// Project a world point to normalized device coordinates.
    ///
    /// Returns `None` if the homogeneous `w` is not positive.
    pub fn world_to_ndc(&self, point_world: &Vector3<f32>) -> Option<Vector3<f32>> {
        let clip = self.full_projection * point_world.push(1.0);
        if clip.w <= crate::core::math::EPSILON {
            return None;
        }
        Some(clip.xyz() / clip.w)
    }

    /// Project a world point to pixel coordinates.
    pub fn world_to_pixel(&self, point_world: &Vector3<f32>) -> Option<Vector2<f32>> {
        let ndc = self.world_to_ndc(point_world)?;
        Some(Vector2::new(
            ndc_to_pixel(ndc.x, self.width),
            ndc_to_pixel(ndc.y, self.height),
        ))
    }

    /// Get the viewing direction for a point in world space.
    ///
    /// Used for spherical harmonics evaluation (view-dependent color).
    pub fn view_direction(&self, point_world: &Vector3<f32>) -> Vector3<f32> {
        let dir = point_world - self.center;
        dir / (dir.norm() + crate::core::math::EPSILON)
    }

    /// Same camera at a different resolution (fields of view preserved).
    pub fn resized(&self, width: u32, height: u32) -> Self {
        Self::with_clip_planes(
            self.view,
            self.fov_x,
            self.fov_y,
            width,
            height,
            self.znear,
            self.zfar,
        )
    }
}

/// `count` cameras evenly spaced on a horizontal circle of `radius` around
/// `center`, raised by `elevation` radians and looking at the center. The
/// world up axis is `-y` (OpenCV convention).
pub fn orbit_cameras(
    center: &Vector3<f32>,
    radius: f32,
    elevation: f32,
    count: usize,
    fov_y: f32,
    width: u32,
    height: u32,
) -> Vec<Camera> {
    let up = Vector3::new(0.0, -1.0, 0.0);
    (0..count)
        .map(|i| {
            let azimuth = i as f32 * std::f32::consts::TAU / count as f32;
            let offset = Vector3::new(
                elevation.cos() * azimuth.sin(),
                -elevation.sin(),
                -elevation.cos() * azimuth.cos(),
            );
            Camera::look_at(center + offset * radius, *center, up, fov_y, width, height)
        })
        .collect()
}

/// A camera ray in world space (direction not normalized).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Ray {
    pub origin: Vector3<f32>,
    pub direction: Vector3<f32>,
}

/// Generate one ray per pixel, row-major.
///
/// Pixel `(u, v)` maps to `K⁻¹ [u, v, 1]` in camera space, rotated into the
/// world by `camera_to_world`; directions are left un-normalized.
pub fn generate_rays(
    intrinsics: &Matrix3<f32>,
    camera_to_world: &Matrix4<f32>,
    width: u32,
    height: u32,
) -> Vec<Ray> {
    let k_inv = intrinsics
        .try_inverse()
        .unwrap_or_else(Matrix3::identity);
    let rotation = camera_to_world.fixed_view::<3, 3>(0, 0).into_owned();
    let origin = camera_to_world.fixed_view::<3, 1>(0, 3).into_owned();

    let mut rays = Vec::with_capacity((width * height) as usize);
    for v in 0..height {
        for u in 0..width {
            let dir_cam = k_inv * Vector3::new(u as f32, v as f32, 1.0);
            rays.push(Ray {
                origin,
                direction: rotation * dir_cam,
            });
        }
    }
    rays
}
