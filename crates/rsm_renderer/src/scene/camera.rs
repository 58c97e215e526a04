//! Perspective camera

use crate::foundation::math::{Mat4, Mat4Ext, Vec2, Vec3};

/// Perspective look-at camera
#[derive(Debug, Clone, PartialEq)]
pub struct Camera {
    /// Camera position in world space
    pub position: Vec3,
    /// Point the camera is looking at in world space
    pub target: Vec3,
    /// Up vector for camera orientation
    pub up: Vec3,
    /// Vertical field of view in radians
    pub fov: f32,
    /// Aspect ratio (width / height)
    pub aspect: f32,
    /// Distance to near clipping plane
    pub near: f32,
    /// Distance to far clipping plane
    pub far: f32,
}

impl Camera {
    /// Perspective camera at `position` looking at the origin with +Y up
    pub fn perspective(position: Vec3, fov: f32, aspect: f32, near: f32, far: f32) -> Self {
        Self {
            position,
            target: Vec3::zeros(),
            up: Vec3::y(),
            fov,
            aspect,
            near,
            far,
        }
    }

    /// Point the camera at `target`
    pub fn look_at(&mut self, target: Vec3) {
        self.target = target;
    }

    /// Update the aspect ratio after a resize
    pub fn set_aspect(&mut self, width: u32, height: u32) {
        if height > 0 {
            self.aspect = width as f32 / height as f32;
        }
    }

    /// World to view space
    pub fn view_matrix(&self) -> Mat4 {
        Mat4::look_at(self.position, self.target, self.up)
    }

    /// View to Vulkan clip space, including the Y/Z flip
    pub fn projection_matrix(&self) -> Mat4 {
        Mat4::perspective(self.fov, self.aspect, self.near, self.far) * Mat4::vulkan_coordinate_transform()
    }

    /// World to clip space
    pub fn view_projection_matrix(&self) -> Mat4 {
        self.projection_matrix() * self.view_matrix()
    }

    /// World to clip space shifted by a sub-pixel offset given in NDC units
    pub fn jittered_view_projection(&self, jitter_ndc: Vec2) -> Mat4 {
        let mut offset = Mat4::identity();
        offset[(0, 3)] = jitter_ndc.x;
        offset[(1, 3)] = jitter_ndc.y;
        offset * self.view_projection_matrix()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::math::project_point;
    use approx::assert_relative_eq;

    #[test]
    fn test_target_projects_to_center() {
        let camera = Camera::perspective(Vec3::new(3.0, 2.0, 6.0), 0.8, 16.0 / 9.0, 0.1, 100.0);
        let ndc = project_point(&camera.view_projection_matrix(), &camera.target).unwrap();
        assert_relative_eq!(ndc.x, 0.0, epsilon = 1e-5);
        assert_relative_eq!(ndc.y, 0.0, epsilon = 1e-5);
    }

    #[test]
    fn test_jitter_shifts_ndc() {
        let camera = Camera::perspective(Vec3::new(0.0, 0.0, 5.0), 0.8, 1.0, 0.1, 100.0);
        let jittered = camera.jittered_view_projection(Vec2::new(0.01, -0.02));
        let ndc = project_point(&jittered, &Vec3::zeros()).unwrap();
        assert_relative_eq!(ndc.x, 0.01, epsilon = 1e-5);
        assert_relative_eq!(ndc.y, -0.02, epsilon = 1e-5);
    }

    #[test]
    fn test_set_aspect_ignores_zero_height() {
        let mut camera = Camera::perspective(Vec3::z(), 0.8, 1.0, 0.1, 10.0);
        camera.set_aspect(1280, 720);
        assert_relative_eq!(camera.aspect, 1280.0 / 720.0);
        camera.set_aspect(1280, 0);
        assert_relative_eq!(camera.aspect, 1280.0 / 720.0);
    }
}
