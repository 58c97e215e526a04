//! Punctual lights and their shadow-map view-projections

use super::BoundingSphere;
use crate::foundation::math::{Mat4, Mat4Ext, Vec3};

/// Shape of a punctual light
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LightKind {
    /// Parallel rays along `direction`
    Directional,
    /// Omnidirectional from `position`; casts no RSM
    Point,
    /// Cone from `position` along `direction`
    Spot,
}

/// Depth bias applied when comparing against a directional light's shadow map
pub const DIRECTIONAL_DEPTH_BIAS: f32 = 100.0 / 100_000.0;
/// Depth bias applied when comparing against a spot light's shadow map
pub const SPOT_DEPTH_BIAS: f32 = 70.0 / 100_000.0;

/// Light in world space
#[derive(Debug, Clone, PartialEq)]
pub struct Light {
    /// Light shape
    pub kind: LightKind,
    /// World position (point and spot)
    pub position: Vec3,
    /// Normalized direction the light travels (directional and spot)
    pub direction: Vec3,
    /// Linear colour
    pub color: Vec3,
    /// Scalar intensity multiplying `color`
    pub intensity: f32,
    /// Falloff distance; negative means unlimited
    pub range: f32,
    /// Spot cone angle of full intensity, radians
    pub inner_cone_angle: f32,
    /// Spot cone cut-off angle, radians
    pub outer_cone_angle: f32,
    /// World to light clip space
    pub view_proj: Mat4,
    /// RSM atlas quadrant, or -1 when the light has no shadow map
    pub shadow_map_index: i32,
    /// Bias subtracted before the shadow depth comparison
    pub depth_bias: f32,
}

impl Light {
    fn base(kind: LightKind) -> Self {
        Self {
            kind,
            position: Vec3::zeros(),
            direction: -Vec3::y(),
            color: Vec3::repeat(1.0),
            intensity: 1.0,
            range: -1.0,
            inner_cone_angle: 0.0,
            outer_cone_angle: std::f32::consts::FRAC_PI_4,
            view_proj: Mat4::identity(),
            shadow_map_index: -1,
            depth_bias: 0.0,
        }
    }

    /// Directional light travelling along `direction`
    pub fn directional(direction: Vec3, color: Vec3, intensity: f32) -> Self {
        Self {
            direction: direction.normalize(),
            color,
            intensity,
            ..Self::base(LightKind::Directional)
        }
    }

    /// Spot light at `position` pointing along `direction`
    pub fn spot(position: Vec3, direction: Vec3, color: Vec3, intensity: f32, range: f32, inner: f32, outer: f32) -> Self {
        Self {
            position,
            direction: direction.normalize(),
            color,
            intensity,
            range,
            inner_cone_angle: inner,
            outer_cone_angle: outer,
            ..Self::base(LightKind::Spot)
        }
    }

    /// Point light at `position`
    pub fn point(position: Vec3, color: Vec3, intensity: f32, range: f32) -> Self {
        Self {
            position,
            color,
            intensity,
            range,
            ..Self::base(LightKind::Point)
        }
    }

    /// Whether the light renders into the RSM atlas
    pub fn casts_rsm(&self) -> bool {
        self.kind != LightKind::Point
    }

    /// Radiance scale: colour times intensity
    pub fn radiance(&self) -> Vec3 {
        self.color * self.intensity
    }

    /// Assign atlas quadrant `slot` and the per-type depth bias
    ///
    /// Point lights get no shadow map.
    pub fn assign_shadow_slot(&mut self, slot: i32) {
        match self.kind {
            LightKind::Directional => {
                self.shadow_map_index = slot;
                self.depth_bias = DIRECTIONAL_DEPTH_BIAS;
            }
            LightKind::Spot => {
                self.shadow_map_index = slot;
                self.depth_bias = SPOT_DEPTH_BIAS;
            }
            LightKind::Point => {
                self.shadow_map_index = -1;
                self.depth_bias = 0.0;
            }
        }
    }

    /// Rebuild `view_proj` so the light's shadow frustum covers `scene_bounds`
    ///
    /// Directional lights get an orthographic box fitted around the sphere;
    /// spot lights a perspective frustum spanning the outer cone out to the range.
    pub fn update_view_proj(&mut self, scene_bounds: &BoundingSphere) {
        let radius = scene_bounds.radius.max(1e-3);
        self.view_proj = match self.kind {
            LightKind::Directional => {
                let eye = scene_bounds.center - self.direction * (radius * 2.0);
                let view = Mat4::look_at(eye, scene_bounds.center, Vec3::y());
                Mat4::orthographic(radius * 2.0, radius * 2.0, radius * 0.5, radius * 3.5)
                    * Mat4::vulkan_coordinate_transform()
                    * view
            }
            LightKind::Spot => {
                let far = if self.range > 0.0 {
                    self.range
                } else {
                    (scene_bounds.center - self.position).norm() + radius
                };
                let near = (far * 0.001).max(0.05);
                let view = Mat4::look_at(self.position, self.position + self.direction, Vec3::y());
                Mat4::perspective(self.outer_cone_angle * 2.0, 1.0, near, far.max(near * 2.0))
                    * Mat4::vulkan_coordinate_transform()
                    * view
            }
            LightKind::Point => Mat4::identity(),
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::math::project_point;
    use approx::assert_relative_eq;

    fn bounds() -> BoundingSphere {
        BoundingSphere { center: Vec3::zeros(), radius: 5.0 }
    }

    #[test]
    fn test_shadow_slots_per_kind() {
        let mut sun = Light::directional(-Vec3::y(), Vec3::repeat(1.0), 3.0);
        sun.assign_shadow_slot(0);
        assert_eq!(sun.shadow_map_index, 0);
        assert_relative_eq!(sun.depth_bias, 0.001);

        let mut spot = Light::spot(Vec3::y() * 4.0, -Vec3::y(), Vec3::repeat(1.0), 10.0, 20.0, 0.3, 0.5);
        spot.assign_shadow_slot(0);
        assert_relative_eq!(spot.depth_bias, 0.0007);

        let mut point = Light::point(Vec3::zeros(), Vec3::repeat(1.0), 1.0, 5.0);
        point.assign_shadow_slot(0);
        assert_eq!(point.shadow_map_index, -1);
        assert!(!point.casts_rsm());
    }

    #[test]
    fn test_directional_fit_contains_scene() {
        let mut sun = Light::directional(Vec3::new(-1.0, -2.0, -0.5), Vec3::repeat(1.0), 1.0);
        sun.update_view_proj(&bounds());

        for corner in [
            Vec3::new(2.8, 2.8, 2.8),
            Vec3::new(-2.8, -2.8, 2.8),
            Vec3::new(2.8, -2.8, -2.8),
            Vec3::zeros(),
        ] {
            let ndc = project_point(&sun.view_proj, &corner).unwrap();
            assert!(ndc.x.abs() <= 1.0 && ndc.y.abs() <= 1.0, "{corner:?} -> {ndc:?}");
            assert!((0.0..=1.0).contains(&ndc.z), "{corner:?} depth {}", ndc.z);
        }
    }

    #[test]
    fn test_directional_depth_grows_along_direction() {
        let mut sun = Light::directional(-Vec3::y(), Vec3::repeat(1.0), 1.0);
        sun.update_view_proj(&bounds());
        let top = project_point(&sun.view_proj, &Vec3::new(0.0, 2.0, 0.0)).unwrap();
        let bottom = project_point(&sun.view_proj, &Vec3::new(0.0, -2.0, 0.0)).unwrap();
        assert!(top.z < bottom.z);
    }

    #[test]
    fn test_spot_projects_axis_to_center() {
        let mut spot = Light::spot(Vec3::new(0.0, 5.0, 0.0), -Vec3::y(), Vec3::repeat(1.0), 1.0, 20.0, 0.2, 0.6);
        spot.update_view_proj(&bounds());
        let ndc = project_point(&spot.view_proj, &Vec3::zeros()).unwrap();
        assert_relative_eq!(ndc.x, 0.0, epsilon = 1e-5);
        assert_relative_eq!(ndc.y, 0.0, epsilon = 1e-5);
        assert!(ndc.z > 0.0 && ndc.z < 1.0);
    }
}
