//! Math utilities and types
//!
//! Provides the nalgebra aliases used across the renderer and the Vulkan-space
//! projection helpers. Matrices use the column-vector convention: a point is
//! transformed as `view_proj * world * p`.

pub use nalgebra::{Matrix3, Matrix4, Quaternion, Unit, Vector2, Vector3, Vector4};

/// 2D vector type
pub type Vec2 = Vector2<f32>;

/// 3D vector type
pub type Vec3 = Vector3<f32>;

/// 4D vector type
pub type Vec4 = Vector4<f32>;

/// 3x3 matrix type
pub type Mat3 = Matrix3<f32>;

/// 4x4 matrix type
pub type Mat4 = Matrix4<f32>;

/// 3D point type
pub type Point3 = nalgebra::Point3<f32>;

/// Quaternion type for rotations
pub type Quat = Unit<Quaternion<f32>>;

/// Math constants
pub mod constants {
    /// Pi constant
    pub const PI: f32 = std::f32::consts::PI;

    /// 2 * Pi
    pub const TAU: f32 = 2.0 * PI;

    /// Pi / 4
    pub const QUARTER_PI: f32 = PI * 0.25;
}

/// Math utility functions
pub mod utils {
    /// Linear interpolation
    pub fn lerp(a: f32, b: f32, t: f32) -> f32 {
        a + (b - a) * t
    }

    /// Element of the radical-inverse Halton sequence for `base`
    ///
    /// Returns a value in [0, 1). Used for sub-pixel projection jitter.
    pub fn halton(mut index: u32, base: u32) -> f32 {
        let mut fraction = 1.0;
        let mut result = 0.0;
        while index > 0 {
            fraction /= base as f32;
            result += fraction * (index % base) as f32;
            index /= base;
        }
        result
    }
}

/// Extension trait for Mat4 with Vulkan-space constructors
pub trait Mat4Ext {
    /// Perspective projection mapping view depth `[near, far]` to `[0, 1]`
    fn perspective(fov_y: f32, aspect: f32, near: f32, far: f32) -> Mat4;

    /// Symmetric orthographic projection mapping view depth `[near, far]` to `[0, 1]`
    fn orthographic(width: f32, height: f32, near: f32, far: f32) -> Mat4;

    /// Right-handed look-at view matrix
    fn look_at(eye: Vec3, target: Vec3, up: Vec3) -> Mat4;

    /// Y/Z flip between right-handed Y-up view space and Vulkan's Y-down, Z-forward clip space
    fn vulkan_coordinate_transform() -> Mat4;
}

impl Mat4Ext for Mat4 {
    fn perspective(fov_y: f32, aspect: f32, near: f32, far: f32) -> Mat4 {
        // P = [a⁻¹/tan(φ/2)    0              0          0        ]
        //     [0               1/tan(φ/2)     0          0        ]
        //     [0               0              f/(f-n)    -nf/(f-n)]
        //     [0               0              1          0        ]
        let tan_half_fovy = (fov_y * 0.5).tan();

        let mut result = Mat4::zeros();
        result[(0, 0)] = 1.0 / (aspect * tan_half_fovy);
        result[(1, 1)] = 1.0 / tan_half_fovy;
        result[(2, 2)] = far / (far - near);
        result[(2, 3)] = -(near * far) / (far - near);
        result[(3, 2)] = 1.0;
        result
    }

    fn orthographic(width: f32, height: f32, near: f32, far: f32) -> Mat4 {
        let mut result = Mat4::zeros();
        result[(0, 0)] = 2.0 / width;
        result[(1, 1)] = 2.0 / height;
        result[(2, 2)] = 1.0 / (far - near);
        result[(2, 3)] = -near / (far - near);
        result[(3, 3)] = 1.0;
        result
    }

    fn look_at(eye: Vec3, target: Vec3, up: Vec3) -> Mat4 {
        let forward = (target - eye).normalize();
        // Degenerate when looking straight along `up`; pick another reference axis
        let up = if forward.cross(&up).norm_squared() < 1e-8 {
            Vec3::new(0.0, 0.0, 1.0)
        } else {
            up
        };
        let right = forward.cross(&up).normalize();
        let camera_up = right.cross(&forward);

        let translation = Mat4::new_translation(&(-eye));
        let rotation = Mat4::new(
            right.x, right.y, right.z, 0.0,
            camera_up.x, camera_up.y, camera_up.z, 0.0,
            -forward.x, -forward.y, -forward.z, 0.0,
            0.0, 0.0, 0.0, 1.0,
        );

        rotation * translation
    }

    fn vulkan_coordinate_transform() -> Mat4 {
        Mat4::new(
            1.0,  0.0,  0.0, 0.0,
            0.0, -1.0,  0.0, 0.0,
            0.0,  0.0, -1.0, 0.0,
            0.0,  0.0,  0.0, 1.0,
        )
    }
}

/// Projects a world-space point with `view_proj`, returning normalized device coordinates
///
/// Returns `None` for points behind the projection origin (`w <= 0`).
pub fn project_point(view_proj: &Mat4, point: &Vec3) -> Option<Vec3> {
    let clip = view_proj * Vec4::new(point.x, point.y, point.z, 1.0);
    if clip.w <= f32::EPSILON {
        return None;
    }
    Some(Vec3::new(clip.x / clip.w, clip.y / clip.w, clip.z / clip.w))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn camera_view_proj() -> Mat4 {
        let view = Mat4::look_at(Vec3::new(0.0, 0.0, 5.0), Vec3::zeros(), Vec3::y());
        Mat4::perspective(constants::QUARTER_PI, 1.0, 0.1, 100.0)
            * Mat4::vulkan_coordinate_transform()
            * view
    }

    #[test]
    fn test_perspective_depth_range() {
        let view_proj = camera_view_proj();

        let near = project_point(&view_proj, &Vec3::new(0.0, 0.0, 4.9)).unwrap();
        let far = project_point(&view_proj, &Vec3::new(0.0, 0.0, -95.0)).unwrap();

        assert_relative_eq!(near.z, 0.0, epsilon = 1e-4);
        assert_relative_eq!(far.z, 1.0, epsilon = 1e-4);
    }

    #[test]
    fn test_vulkan_y_points_down() {
        let view_proj = camera_view_proj();
        let above = project_point(&view_proj, &Vec3::new(0.0, 1.0, 0.0)).unwrap();
        assert!(above.y < 0.0, "world +Y must map to the top of the screen (negative NDC y)");
    }

    #[test]
    fn test_orthographic_maps_box_to_unit_cube() {
        let view = Mat4::look_at(Vec3::new(0.0, 10.0, 0.0), Vec3::zeros(), Vec3::z());
        let view_proj = Mat4::orthographic(4.0, 4.0, 1.0, 19.0)
            * Mat4::vulkan_coordinate_transform()
            * view;

        let corner = project_point(&view_proj, &Vec3::new(2.0, 9.0, 2.0)).unwrap();
        assert_relative_eq!(corner.x.abs(), 1.0, epsilon = 1e-5);
        assert_relative_eq!(corner.y.abs(), 1.0, epsilon = 1e-5);
        assert_relative_eq!(corner.z, 0.0, epsilon = 1e-5);
    }

    #[test]
    fn test_halton_sequence() {
        assert_relative_eq!(utils::halton(1, 2), 0.5);
        assert_relative_eq!(utils::halton(2, 2), 0.25);
        assert_relative_eq!(utils::halton(1, 3), 1.0 / 3.0);
        assert_relative_eq!(utils::halton(0, 3), 0.0);
    }

    #[test]
    fn test_point_behind_camera_is_rejected() {
        let view_proj = camera_view_proj();
        assert!(project_point(&view_proj, &Vec3::new(0.0, 0.0, 10.0)).is_none());
    }
}
