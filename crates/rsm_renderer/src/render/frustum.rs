//! View-frustum culling
//!
//! Planes are extracted from a model-view-projection matrix (Gribb–Hartmann),
//! so a primitive's object-space bounding sphere can be tested directly.

use crate::foundation::math::{Mat4, Vec3, Vec4};

#[derive(Debug, Clone, Copy)]
struct Plane {
    normal: Vec3,
    distance: f32,
}

impl Plane {
    /// Plane `row · (x, y, z, 1) >= 0`, normalized
    fn from_row(row: Vec4) -> Self {
        let normal = row.xyz();
        let length = normal.norm();
        if length <= f32::EPSILON {
            // Degenerate rows never reject anything
            return Self {
                normal: Vec3::zeros(),
                distance: 0.0,
            };
        }
        Self {
            normal: normal / length,
            distance: row.w / length,
        }
    }

    /// Signed distance from point to plane (positive = inside)
    fn distance_to_point(&self, point: &Vec3) -> f32 {
        self.normal.dot(point) + self.distance
    }
}

/// View frustum for culling
#[derive(Debug, Clone)]
pub struct Frustum {
    planes: [Plane; 6], // left, right, bottom, top, near, far
}

impl Frustum {
    /// Extract the planes of clip space `-w <= x, y <= w`, `0 <= z <= w`
    pub fn from_matrix(mvp: &Mat4) -> Self {
        let row = |i: usize| mvp.row(i).transpose();
        let (r0, r1, r2, r3) = (row(0), row(1), row(2), row(3));
        Self {
            planes: [
                Plane::from_row(r3 + r0),
                Plane::from_row(r3 - r0),
                Plane::from_row(r3 + r1),
                Plane::from_row(r3 - r1),
                Plane::from_row(r2),
                Plane::from_row(r3 - r2),
            ],
        }
    }

    /// Test if a sphere intersects the frustum
    ///
    /// A sphere straddling a plane counts as inside.
    pub fn intersects_sphere(&self, center: &Vec3, radius: f32) -> bool {
        self.planes
            .iter()
            .all(|plane| plane.distance_to_point(center) >= -radius)
    }

    /// Test if a point is inside the frustum
    pub fn contains_point(&self, point: &Vec3) -> bool {
        self.intersects_sphere(point, 0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::math::{constants, Mat4Ext};

    fn view_proj() -> Mat4 {
        let view = Mat4::look_at(Vec3::new(0.0, 0.0, 10.0), Vec3::zeros(), Vec3::y());
        Mat4::perspective(constants::QUARTER_PI, 1.0, 0.1, 50.0) * Mat4::vulkan_coordinate_transform() * view
    }

    #[test]
    fn test_sphere_at_target_is_inside() {
        let frustum = Frustum::from_matrix(&view_proj());
        assert!(frustum.intersects_sphere(&Vec3::zeros(), 1.0));
        assert!(frustum.contains_point(&Vec3::zeros()));
    }

    #[test]
    fn test_spheres_outside_each_side_are_rejected() {
        let frustum = Frustum::from_matrix(&view_proj());
        for center in [
            Vec3::new(50.0, 0.0, 0.0),
            Vec3::new(-50.0, 0.0, 0.0),
            Vec3::new(0.0, 50.0, 0.0),
            Vec3::new(0.0, -50.0, 0.0),
            Vec3::new(0.0, 0.0, 20.0),
            Vec3::new(0.0, 0.0, -100.0),
        ] {
            assert!(!frustum.intersects_sphere(&center, 1.0), "{center:?} should be culled");
        }
    }

    #[test]
    fn test_straddling_sphere_is_kept() {
        let frustum = Frustum::from_matrix(&view_proj());
        // Right plane at z = 0 sits at x = 10 * tan(pi/8) ~ 4.14
        assert!(frustum.intersects_sphere(&Vec3::new(4.5, 0.0, 0.0), 1.0));
        assert!(!frustum.intersects_sphere(&Vec3::new(6.0, 0.0, 0.0), 1.0));
    }

    #[test]
    fn test_object_space_culling_with_model_matrix() {
        let world = Mat4::new_translation(&Vec3::new(100.0, 0.0, 0.0));
        let frustum = Frustum::from_matrix(&(view_proj() * world));
        assert!(!frustum.intersects_sphere(&Vec3::zeros(), 1.0));
        assert!(frustum.intersects_sphere(&Vec3::new(-100.0, 0.0, 0.0), 1.0));
    }
}
