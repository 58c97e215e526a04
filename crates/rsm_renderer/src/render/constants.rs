//! GPU constant blocks
//!
//! std140 mirrors of `per_frame.glsl`. Every block is a multiple of 16 bytes
//! and built from `[f32; 4]` rows so no implicit padding exists.

use bytemuck::{Pod, Zeroable};

use crate::foundation::math::{Mat4, Vec2, Vec3};
use crate::scene::{Light, LightKind, Material, MaterialFlags};

/// Light slots in the per-frame block and quadrants in the RSM atlas
pub const MAX_LIGHTS: usize = 4;

/// `rsm_light_index` outside RSM rendering
pub const NO_RSM_LIGHT: i32 = -1;

fn columns(m: &Mat4) -> [[f32; 4]; 4] {
    (*m).into()
}

fn from_columns(c: &[[f32; 4]; 4]) -> Mat4 {
    Mat4::from(*c)
}

/// One light as seen by the shaders
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default, Pod, Zeroable)]
pub struct LightConstants {
    view_proj: [[f32; 4]; 4], // 64 bytes - world to light clip space
    direction: [f32; 4],      // 16 bytes - xyz + range
    color: [f32; 4],          // 16 bytes - rgb + intensity
    position: [f32; 4],       // 16 bytes - xyz + inner cone cos
    params: [f32; 4],         // 16 bytes - outer cone cos, type, depth bias, shadow map index
}

impl LightConstants {
    /// Shader type tag: 0 directional, 1 point, 2 spot
    pub fn type_tag(kind: LightKind) -> f32 {
        match kind {
            LightKind::Directional => 0.0,
            LightKind::Point => 1.0,
            LightKind::Spot => 2.0,
        }
    }

    /// Pack a scene light
    pub fn from_light(light: &Light) -> Self {
        let d = light.direction;
        let p = light.position;
        let c = light.color;
        Self {
            view_proj: columns(&light.view_proj),
            direction: [d.x, d.y, d.z, light.range],
            color: [c.x, c.y, c.z, light.intensity],
            position: [p.x, p.y, p.z, light.inner_cone_angle.cos()],
            params: [
                light.outer_cone_angle.cos(),
                Self::type_tag(light.kind),
                light.depth_bias,
                light.shadow_map_index as f32,
            ],
        }
    }

    /// World to light clip space
    pub fn view_proj(&self) -> Mat4 {
        from_columns(&self.view_proj)
    }

    /// Atlas quadrant, or -1
    pub fn shadow_map_index(&self) -> i32 {
        self.params[3] as i32
    }

    /// Colour times intensity
    pub fn radiance(&self) -> Vec3 {
        Vec3::new(self.color[0], self.color[1], self.color[2]) * self.color[3]
    }
}

/// Constants shared by every draw of one pass
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct PerFrameConstants {
    view_proj: [[f32; 4]; 4],      // 64 bytes - current world to clip
    prev_view_proj: [[f32; 4]; 4], // 64 bytes - last frame's world to clip
    inv_view_proj: [[f32; 4]; 4],  // 64 bytes - clip to world
    camera_position: [f32; 4],     // 16 bytes - xyz + padding
    factors: [f32; 4],             // 16 bytes - ibl, emissive, 1/width, 1/height
    jitter: [f32; 4],              // 16 bytes - ndc jitter xy, light count, rsm light index
    prev_jitter: [f32; 4],         // 16 bytes - last frame's ndc jitter xy + padding
    lights: [LightConstants; MAX_LIGHTS],
}

impl PerFrameConstants {
    /// Camera-view constants with no lights and `rsm_light_index = -1`
    pub fn from_camera(view_proj: &Mat4, prev_view_proj: &Mat4, camera_position: Vec3) -> Self {
        let inverse = view_proj.try_inverse().unwrap_or_else(Mat4::identity);
        Self {
            view_proj: columns(view_proj),
            prev_view_proj: columns(prev_view_proj),
            inv_view_proj: columns(&inverse),
            camera_position: [camera_position.x, camera_position.y, camera_position.z, 0.0],
            factors: [0.0, 0.0, 0.0, 0.0],
            jitter: [0.0, 0.0, 0.0, NO_RSM_LIGHT as f32],
            prev_jitter: [0.0; 4],
            lights: [LightConstants::default(); MAX_LIGHTS],
        }
    }

    /// Copy up to [`MAX_LIGHTS`] lights
    pub fn set_lights(&mut self, lights: &[Light]) {
        let count = lights.len().min(MAX_LIGHTS);
        self.lights = [LightConstants::default(); MAX_LIGHTS];
        for (slot, light) in self.lights.iter_mut().zip(lights) {
            *slot = LightConstants::from_light(light);
        }
        self.jitter[2] = count as f32;
    }

    /// Image-based lighting and emissive intensities
    pub fn set_factors(&mut self, ibl_factor: f32, emissive_factor: f32) {
        self.factors[0] = ibl_factor;
        self.factors[1] = emissive_factor;
    }

    /// Store the inverse of the render target size
    pub fn set_screen_size(&mut self, width: u32, height: u32) {
        self.factors[2] = 1.0 / width.max(1) as f32;
        self.factors[3] = 1.0 / height.max(1) as f32;
    }

    /// Sub-pixel jitter in NDC units
    pub fn set_jitter(&mut self, jitter: Vec2) {
        self.jitter[0] = jitter.x;
        self.jitter[1] = jitter.y;
    }

    /// Jitter the previous frame was rendered with
    pub fn set_prev_jitter(&mut self, jitter: Vec2) {
        self.prev_jitter[0] = jitter.x;
        self.prev_jitter[1] = jitter.y;
    }

    /// Current and previous sub-pixel jitter
    pub fn jitter_pair(&self) -> (Vec2, Vec2) {
        (
            Vec2::new(self.jitter[0], self.jitter[1]),
            Vec2::new(self.prev_jitter[0], self.prev_jitter[1]),
        )
    }

    /// Copy of these constants viewed from light `index` for its RSM render
    ///
    /// The receiver keeps the camera view-projection, so camera passes recorded
    /// afterwards see the original matrices.
    pub fn for_rsm_light(&self, index: usize) -> Option<Self> {
        let light = self.lights.get(index)?;
        let view_proj = light.view_proj();
        let mut constants = *self;
        constants.view_proj = columns(&view_proj);
        constants.prev_view_proj = columns(&view_proj);
        constants.inv_view_proj = columns(&view_proj.try_inverse().unwrap_or_else(Mat4::identity));
        constants.jitter = [0.0, 0.0, self.jitter[2], index as f32];
        constants.prev_jitter = [0.0; 4];
        Some(constants)
    }

    /// Current world to clip
    pub fn view_proj(&self) -> Mat4 {
        from_columns(&self.view_proj)
    }

    /// Clip to world
    pub fn inv_view_proj(&self) -> Mat4 {
        from_columns(&self.inv_view_proj)
    }

    /// Light being rendered into the RSM, or -1
    pub fn rsm_light_index(&self) -> i32 {
        self.jitter[3] as i32
    }

    /// Number of valid light slots
    pub fn light_count(&self) -> usize {
        self.jitter[2] as usize
    }

    /// Light slot
    pub fn light(&self, index: usize) -> Option<&LightConstants> {
        self.lights.get(index).filter(|_| index < self.light_count())
    }

    /// Image-based lighting intensity
    pub fn ibl_factor(&self) -> f32 {
        self.factors[0]
    }

    /// Emissive intensity
    pub fn emissive_factor(&self) -> f32 {
        self.factors[1]
    }

    /// Inverse render target size
    pub fn inv_screen_resolution(&self) -> Vec2 {
        Vec2::new(self.factors[2], self.factors[3])
    }

    /// Camera position in world space
    pub fn camera_position(&self) -> Vec3 {
        Vec3::new(self.camera_position[0], self.camera_position[1], self.camera_position[2])
    }
}

/// Constants of one drawn primitive
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct PerObjectConstants {
    world: [[f32; 4]; 4],      // 64 bytes - object to world
    prev_world: [[f32; 4]; 4], // 64 bytes - last frame's object to world
    base_color: [f32; 4],      // 16 bytes - linear rgba
    emissive: [f32; 4],        // 16 bytes - rgb + alpha cutoff
    pbr_params: [f32; 4],      // 16 bytes - metallic, roughness, double sided, padding
}

impl PerObjectConstants {
    /// Pack a node transform and its material
    pub fn new(world: &Mat4, prev_world: &Mat4, material: &Material) -> Self {
        let b = material.base_color;
        let e = material.emissive;
        let double_sided = if material.flags.contains(MaterialFlags::DOUBLE_SIDED) { 1.0 } else { 0.0 };
        Self {
            world: columns(world),
            prev_world: columns(prev_world),
            base_color: [b.x, b.y, b.z, b.w],
            emissive: [e.x, e.y, e.z, material.alpha_cutoff],
            pbr_params: [material.metallic, material.roughness, double_sided, 0.0],
        }
    }

    /// Object to world
    pub fn world(&self) -> Mat4 {
        from_columns(&self.world)
    }

    /// Linear base colour
    pub fn base_color(&self) -> [f32; 4] {
        self.base_color
    }

    /// Metallic and roughness
    pub fn metallic_roughness(&self) -> (f32, f32) {
        (self.pbr_params[0], self.pbr_params[1])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_std140_sizes() {
        assert_eq!(std::mem::size_of::<LightConstants>(), 128);
        assert_eq!(std::mem::size_of::<PerFrameConstants>(), 192 + 64 + 4 * 128);
        assert_eq!(std::mem::size_of::<PerObjectConstants>(), 176);
        assert_eq!(std::mem::offset_of!(PerFrameConstants, prev_jitter), 240);
        assert_eq!(std::mem::offset_of!(PerFrameConstants, lights), 256);
    }

    #[test]
    fn test_both_jitters_reach_the_shader() {
        let mut constants = PerFrameConstants::from_camera(&Mat4::identity(), &Mat4::identity(), Vec3::zeros());
        constants.set_jitter(Vec2::new(0.25, -0.5));
        constants.set_prev_jitter(Vec2::new(-0.125, 0.75));

        let bytes = bytemuck::bytes_of(&constants);
        let floats: &[f32] = bytemuck::cast_slice(&bytes[224..256]);
        assert_eq!(&floats[..2], &[0.25, -0.5]);
        assert_eq!(&floats[4..6], &[-0.125, 0.75]);

        let (curr, prev) = constants.jitter_pair();
        assert_relative_eq!(curr, Vec2::new(0.25, -0.5));
        assert_relative_eq!(prev, Vec2::new(-0.125, 0.75));
        assert_relative_eq!(constants.for_rsm_light(0).unwrap().jitter_pair().1, Vec2::zeros());
    }

    #[test]
    fn test_camera_constants_have_no_rsm_light() {
        let vp = Mat4::new_scaling(2.0);
        let constants = PerFrameConstants::from_camera(&vp, &vp, Vec3::zeros());
        assert_eq!(constants.rsm_light_index(), NO_RSM_LIGHT);
        assert_relative_eq!(constants.inv_view_proj(), Mat4::new_scaling(0.5));
    }

    #[test]
    fn test_rsm_view_leaves_camera_constants_untouched() {
        let camera_vp = Mat4::new_scaling(2.0);
        let mut light = Light::directional(-Vec3::y(), Vec3::repeat(1.0), 2.0);
        light.view_proj = Mat4::new_translation(&Vec3::new(1.0, 2.0, 3.0));
        light.assign_shadow_slot(0);

        let mut camera = PerFrameConstants::from_camera(&camera_vp, &camera_vp, Vec3::zeros());
        camera.set_lights(std::slice::from_ref(&light));
        let rsm = camera.for_rsm_light(0).unwrap();

        assert_eq!(rsm.rsm_light_index(), 0);
        assert_relative_eq!(rsm.view_proj(), light.view_proj);
        assert_eq!(camera.rsm_light_index(), NO_RSM_LIGHT);
        assert_relative_eq!(camera.view_proj(), camera_vp);
        assert!(camera.for_rsm_light(MAX_LIGHTS).is_none());
    }

    #[test]
    fn test_light_packing() {
        let mut spot = Light::spot(Vec3::new(1.0, 2.0, 3.0), -Vec3::y(), Vec3::new(1.0, 0.5, 0.25), 4.0, 10.0, 0.0, 0.5);
        spot.assign_shadow_slot(2);
        let packed = LightConstants::from_light(&spot);
        assert_eq!(packed.shadow_map_index(), 2);
        assert_relative_eq!(packed.color[3], 4.0);
        assert_relative_eq!(packed.params[0], 0.5_f32.cos());
        assert_relative_eq!(packed.params[1], 2.0);
    }

    #[test]
    fn test_light_slots_capped() {
        let lights = vec![Light::point(Vec3::zeros(), Vec3::repeat(1.0), 1.0, 1.0); 6];
        let mut constants = PerFrameConstants::from_camera(&Mat4::identity(), &Mat4::identity(), Vec3::zeros());
        constants.set_lights(&lights);
        assert_eq!(constants.light_count(), MAX_LIGHTS);
        constants.set_lights(&lights[..1]);
        assert!(constants.light(1).is_none());
        assert!(constants.light(0).is_some());
    }
}
