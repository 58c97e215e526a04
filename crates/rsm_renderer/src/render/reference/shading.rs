//! Lighting math shared with `pbr.glsl`, `direct_lighting.frag` and
//! `indirect_lighting.frag`

use super::image::{Image2D, Rect};
use crate::foundation::math::{constants::PI, project_point, Mat4, Vec2, Vec3, Vec4};
use crate::render::sampling::{rotate, SamplingKernel, SAMPLE_RADIUS};
use crate::scene::{Light, LightKind};

/// Fraction of `ibl_factor` applied to the diffuse albedo as constant ambient light
pub const AMBIENT_SCALE: f32 = 0.12;

/// Squared distances below this are clamped in the form factor
pub const MIN_DISTANCE_SQUARED: f32 = 1e-4;

/// One shaded G-Buffer texel
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Surface {
    /// World position
    pub position: Vec3,
    /// Unit normal
    pub normal: Vec3,
    /// Diffuse albedo
    pub diffuse: Vec3,
    /// Reflectance at normal incidence
    pub specular: Vec3,
    /// Perceptual roughness
    pub roughness: f32,
}

/// Ambient and emissive radiance written by the G-Buffer pass
pub fn seed_radiance(diffuse: Vec3, emissive: Vec3, ibl_factor: f32, emissive_factor: f32) -> Vec3 {
    diffuse * (ibl_factor * AMBIENT_SCALE) + emissive * emissive_factor
}

/// Unit vector from `position` towards the light and the light's attenuation there
pub fn light_incidence(light: &Light, position: &Vec3) -> (Vec3, f32) {
    match light.kind {
        LightKind::Directional => (-light.direction, 1.0),
        LightKind::Point | LightKind::Spot => {
            let to_light = light.position - position;
            let distance = to_light.norm().max(1e-4);
            let l = to_light / distance;
            let mut attenuation = range_attenuation(distance, light.range);
            if light.kind == LightKind::Spot {
                attenuation *= spot_attenuation(light, &l);
            }
            (l, attenuation)
        }
    }
}

// Inverse square with a smooth window to zero at `range`; unlimited for range <= 0
fn range_attenuation(distance: f32, range: f32) -> f32 {
    let inverse_square = 1.0 / (distance * distance);
    if range <= 0.0 {
        return inverse_square;
    }
    let ratio = distance / range;
    (1.0 - ratio.powi(4)).clamp(0.0, 1.0).powi(2) * inverse_square
}

fn spot_attenuation(light: &Light, l: &Vec3) -> f32 {
    let outer = light.outer_cone_angle.cos();
    let inner = light.inner_cone_angle.cos();
    let cos_angle = light.direction.dot(&-l);
    let t = ((cos_angle - outer) / (inner - outer).max(1e-4)).clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}

/// Outgoing radiance towards `eye` from `light`: Lambert diffuse plus a GGX
/// microfacet specular term with Smith shadowing and Schlick Fresnel
pub fn shade_point(surface: &Surface, light: &Light, eye: &Vec3) -> Vec3 {
    let n = surface.normal;
    let v = (eye - surface.position).normalize();
    let (l, attenuation) = light_incidence(light, &surface.position);

    let n_dot_l = n.dot(&l);
    if n_dot_l <= 0.0 || attenuation <= 0.0 {
        return Vec3::zeros();
    }
    let n_dot_v = n.dot(&v).max(1e-4);
    let h = (l + v).normalize();
    let n_dot_h = n.dot(&h).max(0.0);
    let v_dot_h = v.dot(&h).max(0.0);

    let alpha = (surface.roughness * surface.roughness).max(1e-3);
    let alpha2 = alpha * alpha;
    let denom = n_dot_h * n_dot_h * (alpha2 - 1.0) + 1.0;
    let distribution = alpha2 / (PI * denom * denom);

    let k = (surface.roughness + 1.0).powi(2) / 8.0;
    let smith_l = n_dot_l / (n_dot_l * (1.0 - k) + k);
    let smith_v = n_dot_v / (n_dot_v * (1.0 - k) + k);

    let fresnel = surface.specular + (Vec3::repeat(1.0) - surface.specular) * (1.0 - v_dot_h).powi(5);
    let specular = fresnel * (distribution * smith_l * smith_v / (4.0 * n_dot_l * n_dot_v));
    let diffuse = (Vec3::repeat(1.0) - fresnel).component_mul(&surface.diffuse) / PI;

    (diffuse + specular).component_mul(&light.radiance()) * (n_dot_l * attenuation)
}

/// Texture coordinate of `position` in the shadow map of `view_proj`
///
/// Also returns the light-space depth. `None` behind a perspective light.
pub fn shadow_coord(view_proj: &Mat4, position: &Vec3) -> Option<(Vec2, f32)> {
    let ndc = project_point(view_proj, position)?;
    Some((Vec2::new(ndc.x * 0.5 + 0.5, ndc.y * 0.5 + 0.5), ndc.z))
}

/// Fraction of a 3×3 texel neighbourhood of the quadrant `quadrant` that sees the light
///
/// A texel lets light through when `depth - bias <= stored`, the
/// `LESS_OR_EQUAL` comparison of the shadow sampler. Points projecting outside
/// the quadrant are lit.
pub fn pcf_shadow(depth: &Image2D<f32>, quadrant: Rect, view_proj: &Mat4, position: &Vec3, bias: f32) -> f32 {
    let Some((uv, reference)) = shadow_coord(view_proj, position) else {
        return 1.0;
    };
    if !(0.0..=1.0).contains(&uv.x) || !(0.0..=1.0).contains(&uv.y) || reference > 1.0 {
        return 1.0;
    }

    let cx = (quadrant.x as f32 + uv.x * quadrant.width as f32).floor() as i64;
    let cy = (quadrant.y as f32 + uv.y * quadrant.height as f32).floor() as i64;
    let x_range = (i64::from(quadrant.x), i64::from(quadrant.x + quadrant.width) - 1);
    let y_range = (i64::from(quadrant.y), i64::from(quadrant.y + quadrant.height) - 1);

    let mut lit = 0;
    for dy in -1..=1 {
        for dx in -1..=1 {
            let x = (cx + dx).clamp(x_range.0, x_range.1);
            let y = (cy + dy).clamp(y_range.0, y_range.1);
            if reference - bias <= depth.clamped(x, y) {
                lit += 1;
            }
        }
    }
    lit as f32 / 9.0
}

/// RSM images of one light, read by the indirect gather
#[derive(Debug, Clone, Copy)]
pub struct LightSurfaces<'a> {
    /// World positions; `w == 0` marks empty texels
    pub world: &'a Image2D<Vec4>,
    /// Normals
    pub normal: &'a Image2D<Vec4>,
    /// Reflected flux
    pub flux: &'a Image2D<Vec4>,
    /// Quadrant of the light in the atlas
    pub quadrant: Rect,
    /// World to light clip space
    pub view_proj: &'a Mat4,
}

/// One-bounce diffuse irradiance at `position` with normal `normal`
///
/// Every kernel offset is rotated by `rotation` turns, scaled by
/// [`SAMPLE_RADIUS`] and placed around the point's projection in the quadrant.
/// Each RSM texel it lands on contributes its flux times the point-to-point
/// form factor `max(0, n_p·(x − x_p))·max(0, n·(x_p − x)) / |x − x_p|⁴` and the
/// offset weight `offset.x²`. The sum is divided by the kernel size.
pub fn gather_indirect(
    position: &Vec3,
    normal: &Vec3,
    rsm: &LightSurfaces<'_>,
    kernel: &SamplingKernel,
    rotation: f32,
) -> Vec3 {
    let Some((center, _)) = shadow_coord(rsm.view_proj, position) else {
        return Vec3::zeros();
    };
    if kernel.is_empty() {
        return Vec3::zeros();
    }

    let mut sum = Vec3::zeros();
    for offset in kernel.offsets() {
        let uv = center + rotate(*offset, rotation) * SAMPLE_RADIUS;
        if !(0.0..1.0).contains(&uv.x) || !(0.0..1.0).contains(&uv.y) {
            continue;
        }
        let x = rsm.quadrant.x + (uv.x * rsm.quadrant.width as f32) as u32;
        let y = rsm.quadrant.y + (uv.y * rsm.quadrant.height as f32) as u32;
        let (Some(sample_world), Some(sample_normal), Some(flux)) =
            (rsm.world.get(x, y), rsm.normal.get(x, y), rsm.flux.get(x, y))
        else {
            continue;
        };
        if sample_world.w <= 0.0 {
            continue;
        }

        let x_p = sample_world.xyz();
        let n_p = sample_normal.xyz();
        let d = position - x_p;
        let distance_squared = d.norm_squared().max(MIN_DISTANCE_SQUARED);
        let form_factor = n_p.dot(&d).max(0.0) * normal.dot(&-d).max(0.0) / (distance_squared * distance_squared);
        sum += flux.xyz() * (form_factor * SamplingKernel::weight(offset));
    }
    sum / kernel.len() as f32
}

/// `(1 − w)·direct + w·indirect`, with `w` clamped to [0, 1]
pub fn blend(direct: Vec4, indirect: Vec4, weight: f32) -> Vec4 {
    let w = weight.clamp(0.0, 1.0);
    direct * (1.0 - w) + indirect * w
}
