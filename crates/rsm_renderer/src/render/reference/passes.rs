//! CPU renditions of the frame's passes
//!
//! Each function mirrors one GPU pass over host images. [`ReferenceRenderer`]
//! runs them in the order of [`standard_frame_phases`], fed by the same batch
//! builder, constant blocks, sampling kernel and light setup as [`Renderer`].
//! Material textures and motion vectors are not reproduced.
//!
//! [`Renderer`]: crate::render::renderer::Renderer

use super::image::{Image2D, Rect};
use super::raster::{Cull, Rasterizer};
use super::shading::{
    blend, gather_indirect, pcf_shadow, seed_radiance, shade_point, shadow_coord, LightSurfaces, Surface,
};
use crate::config::RendererConfig;
use crate::foundation::math::{Mat3, Mat4, Vec2, Vec3, Vec4};
use crate::render::backends::vulkan::{RenderError, RenderResult};
use crate::render::batch::{Batch, BatchBuilder, BatchStats, EveryPrimitive};
use crate::render::constants::{PerFrameConstants, PerObjectConstants, MAX_LIGHTS};
use crate::render::passes::indirect_lighting::{output_extent, NOISE_TILING};
use crate::render::passes::{active_quadrants, alloc_light_constants, quadrant_rect, RsmStats};
use crate::render::renderer::{frame_barrier_plan, prepare_lights, rsm_slots, FrameStats, RendererState};
use crate::render::ring::{ConstantRing, DEFAULT_ALIGNMENT};
use crate::render::sampling::{RotationNoise, SamplingKernel};
use crate::render::transitions::{standard_frame_phases, Phase};
use crate::scene::{Camera, Light, SceneCollaborator};
use ash::vk;

/// G-Buffer images of the camera or of the RSM atlas
#[derive(Debug, Clone, PartialEq)]
pub struct SurfaceTargets {
    /// World position, `w = 1` where covered
    pub world: Image2D<Vec4>,
    /// World normal
    pub normal: Image2D<Vec4>,
    /// Diffuse albedo
    pub diffuse: Image2D<Vec4>,
    /// Specular reflectance and roughness
    pub specular: Image2D<Vec4>,
    /// Camera: emissive + ambient seed. RSM: reflected flux
    pub radiance: Image2D<Vec4>,
    /// Depth, cleared to 1
    pub depth: Image2D<f32>,
}

impl SurfaceTargets {
    /// Cleared targets of `width × height`
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            world: Image2D::new(width, height, Vec4::zeros()),
            normal: Image2D::new(width, height, Vec4::zeros()),
            diffuse: Image2D::new(width, height, Vec4::zeros()),
            specular: Image2D::new(width, height, Vec4::zeros()),
            radiance: Image2D::new(width, height, Vec4::zeros()),
            depth: Image2D::new(width, height, 1.0),
        }
    }

    /// Shading inputs at pixel `(x, y)`, `None` where nothing was drawn
    pub fn surface(&self, x: u32, y: u32) -> Option<Surface> {
        let world = self.world.get(x, y).filter(|w| w.w > 0.0)?;
        let normal = self.normal.get(x, y)?;
        let diffuse = self.diffuse.get(x, y)?;
        let specular = self.specular.get(x, y)?;
        Some(Surface {
            position: world.xyz(),
            normal: normal.xyz(),
            diffuse: diffuse.xyz(),
            specular: specular.xyz(),
            roughness: specular.w,
        })
    }
}

/// What the G-Buffer fragment writes into [`SurfaceTargets::radiance`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SurfaceOutput {
    /// Camera view: ambient and emissive seed
    Camera {
        /// Ambient intensity
        ibl_factor: f32,
        /// Emissive intensity
        emissive_factor: f32,
    },
    /// Light view: diffuse albedo times the light's radiance
    Light {
        /// Colour times intensity of the rendering light
        radiance: Vec3,
    },
}

fn normal_matrix(world: &Mat4) -> Mat3 {
    let linear: Mat3 = world.fixed_view::<3, 3>(0, 0).into_owned();
    linear.try_inverse().map_or(linear, |inverse| inverse.transpose())
}

/// Rasterise `batches` into `targets`
///
/// Object transforms are read back from each batch's per-object constants in
/// `ring`. Returns the number of fragments written.
pub fn render_gbuffer<S>(
    batches: &[Batch<'_, S>],
    ring: &ConstantRing,
    rasterizer: &Rasterizer,
    output: SurfaceOutput,
    targets: &mut SurfaceTargets,
) -> usize {
    let SurfaceTargets {
        world: world_target,
        normal: normal_target,
        diffuse: diffuse_target,
        specular: specular_target,
        radiance: radiance_target,
        depth,
    } = targets;

    let mut fragments = 0;
    for batch in batches {
        let Some(constants) = ring.read_as::<PerObjectConstants>(&batch.per_object) else {
            log::warn!("Per-object constants of mesh {:?} no longer live", batch.mesh);
            continue;
        };
        let Some(mesh_data) = batch.primitive.mesh_data.as_ref() else {
            continue;
        };

        let world = constants.world();
        let normals = normal_matrix(&world);
        let material = batch.material;
        let (diffuse, specular) = material.diffuse_and_specular();
        let radiance = match output {
            SurfaceOutput::Camera {
                ibl_factor,
                emissive_factor,
            } => seed_radiance(diffuse, material.emissive, ibl_factor, emissive_factor),
            SurfaceOutput::Light { radiance } => diffuse.component_mul(&radiance),
        };
        let cull = if material.is_double_sided() { Cull::None } else { Cull::Back };

        for [a, b, c] in mesh_data.triangles() {
            let corners = [a, b, c].map(|v| Vec4::new(v.position[0], v.position[1], v.position[2], 1.0));
            let clip = corners.map(|p| batch.model_view_proj * p);
            let world_corners = corners.map(|p| (world * p).xyz());
            let normal_corners = [a, b, c].map(|v| normals * Vec3::from(v.normal));

            fragments += rasterizer.draw_triangle(clip, cull, depth, |fragment| {
                let w = fragment.barycentric;
                let position = world_corners[0] * w.x + world_corners[1] * w.y + world_corners[2] * w.z;
                let mut normal = (normal_corners[0] * w.x + normal_corners[1] * w.y + normal_corners[2] * w.z)
                    .try_normalize(1e-8)
                    .unwrap_or_else(Vec3::y);
                if !fragment.front_facing {
                    normal = -normal;
                }

                let (x, y) = (fragment.x, fragment.y);
                world_target.set(x, y, position.push(1.0));
                normal_target.set(x, y, normal.push(0.0));
                diffuse_target.set(x, y, diffuse.push(1.0));
                specular_target.set(x, y, specular.push(material.roughness));
                radiance_target.set(x, y, radiance.push(1.0));
            });
        }
    }
    fragments
}

/// Render light slot `slot` of `per_frame` into atlas quadrant `quadrant`
///
/// `None` when the light was skipped and its quadrant left empty.
pub fn render_rsm_quadrant<C: SceneCollaborator + ?Sized>(
    scene: &C,
    per_frame: &PerFrameConstants,
    slot: usize,
    quadrant: usize,
    map_size: u32,
    ring: &mut ConstantRing,
    atlas: &mut SurfaceTargets,
) -> Option<BatchStats> {
    let (light_constants, _) = alloc_light_constants(per_frame, slot, ring)?;
    let radiance = per_frame.light(slot)?.radiance();

    let lists = BatchBuilder::build(scene, &light_constants.view_proj(), &EveryPrimitive, ring);
    let rasterizer = Rasterizer::new(quadrant_rect(quadrant, map_size).into());
    render_gbuffer(&lists.opaque, ring, &rasterizer, SurfaceOutput::Light { radiance }, atlas);
    Some(lists.stats)
}

/// Render every active light of `slots` into its quadrant
pub fn render_rsm<C: SceneCollaborator + ?Sized>(
    scene: &C,
    per_frame: &PerFrameConstants,
    slots: &[Option<usize>; MAX_LIGHTS],
    map_size: u32,
    ring: &mut ConstantRing,
    atlas: &mut SurfaceTargets,
) -> RsmStats {
    let mut stats = RsmStats::default();
    for (quadrant, slot) in active_quadrants(slots) {
        match render_rsm_quadrant(scene, per_frame, slot, quadrant, map_size, ring, atlas) {
            Some(batches) => stats.batches.accumulate(&batches),
            None => stats.skipped_lights += 1,
        }
    }
    stats
}

/// HDR after direct lighting: the G-Buffer seed plus light 0 with its shadow term
pub fn direct_lighting(
    camera: &SurfaceTargets,
    atlas_depth: &Image2D<f32>,
    map_size: u32,
    light: Option<&Light>,
    eye: &Vec3,
) -> Image2D<Vec4> {
    let mut hdr = camera.radiance.clone();
    let Some(light) = light else {
        return hdr;
    };

    for y in 0..hdr.height() {
        for x in 0..hdr.width() {
            let Some(surface) = camera.surface(x, y) else { continue };
            let shadow = match usize::try_from(light.shadow_map_index) {
                Ok(index) => pcf_shadow(
                    atlas_depth,
                    quadrant_rect(index, map_size).into(),
                    &light.view_proj,
                    &surface.position,
                    light.depth_bias,
                ),
                Err(_) => 1.0,
            };
            let lit = shade_point(&surface, light, eye) * shadow;
            let seed = hdr.get(x, y).unwrap_or_else(Vec4::zeros);
            hdr.set(x, y, seed + lit.push(0.0));
        }
    }
    hdr
}

/// Half-resolution one-bounce irradiance from the RSM quadrant of `light`
pub fn indirect_lighting(
    camera: &SurfaceTargets,
    atlas: &SurfaceTargets,
    map_size: u32,
    light: Option<&Light>,
    kernel: &SamplingKernel,
    noise: &RotationNoise,
) -> Image2D<Vec4> {
    let extent = output_extent(vk::Extent2D {
        width: camera.world.width(),
        height: camera.world.height(),
    });
    let mut output = Image2D::new(extent.width, extent.height, Vec4::zeros());
    let Some((light, index)) = light.and_then(|l| usize::try_from(l.shadow_map_index).ok().map(|i| (l, i))) else {
        return output;
    };

    let rsm = LightSurfaces {
        world: &atlas.world,
        normal: &atlas.normal,
        flux: &atlas.radiance,
        quadrant: quadrant_rect(index, map_size).into(),
        view_proj: &light.view_proj,
    };

    for y in 0..extent.height {
        for x in 0..extent.width {
            let Some(surface) = camera.surface(x * 2, y * 2) else { continue };
            let rotation = shadow_coord(&light.view_proj, &surface.position)
                .map_or(0.0, |(uv, _)| noise.sample_repeat(uv, NOISE_TILING));
            let irradiance = gather_indirect(&surface.position, &surface.normal, &rsm, kernel, rotation);
            output.set(x, y, irradiance.push(1.0));
        }
    }
    output
}

/// Blend `direct` with the bilinearly upsampled `indirect`
pub fn aggregate(direct: &Image2D<Vec4>, indirect: &Image2D<Vec4>, weight: f32) -> Image2D<Vec4> {
    let (width, height) = (direct.width(), direct.height());
    let mut output = Image2D::new(width, height, Vec4::zeros());
    for (x, y, value) in direct.region(direct.rect()) {
        let uv = Vec2::new((x as f32 + 0.5) / width as f32, (y as f32 + 0.5) / height as f32);
        output.set(x, y, blend(value, indirect.sample_bilinear(uv), weight));
    }
    output
}

/// Every image of one reference frame
#[derive(Debug, Clone)]
pub struct ReferenceFrame {
    /// Camera G-Buffer
    pub camera: SurfaceTargets,
    /// RSM atlas
    pub atlas: SurfaceTargets,
    /// HDR after direct lighting
    pub direct: Image2D<Vec4>,
    /// Half-resolution indirect light
    pub indirect: Image2D<Vec4>,
    /// Aggregated HDR
    pub output: Image2D<Vec4>,
    /// Lights as drawn
    pub lights: Vec<Light>,
    /// Camera constants of the frame
    pub per_frame: PerFrameConstants,
    /// Draw counts
    pub stats: FrameStats,
}

/// Host-side renderer producing a [`ReferenceFrame`] per call
pub struct ReferenceRenderer {
    width: u32,
    height: u32,
    config: RendererConfig,
    kernel: SamplingKernel,
    noise: RotationNoise,
    ring: ConstantRing,
    phases: Vec<Phase>,
}

impl ReferenceRenderer {
    /// Renderer for a `width × height` target
    pub fn new(config: &RendererConfig, width: u32, height: u32) -> RenderResult<Self> {
        if width == 0 || height == 0 {
            return Err(RenderError::InvalidOperation {
                reason: format!("reference target {width}x{height} is empty"),
            });
        }
        let config = config.clone().validated()?;
        // Same ordering guarantees as the GPU frame
        frame_barrier_plan()?;

        Ok(Self {
            width,
            height,
            kernel: SamplingKernel::generate(config.sample_seed, config.sample_count as usize),
            noise: RotationNoise::generate(config.sample_seed, config.noise_dimension),
            ring: ConstantRing::new_host(config.constant_ring_size, config.back_buffer_count, DEFAULT_ALIGNMENT),
            phases: standard_frame_phases(),
            config,
        })
    }

    /// Sampling kernel
    pub fn kernel(&self) -> &SamplingKernel {
        &self.kernel
    }

    /// Rotation noise
    pub fn noise(&self) -> &RotationNoise {
        &self.noise
    }

    /// Render `scene` from `camera`
    pub fn render<C: SceneCollaborator + ?Sized>(
        &mut self,
        scene: &C,
        camera: &Camera,
        state: &RendererState,
    ) -> RenderResult<ReferenceFrame> {
        self.ring.on_begin_frame();
        let map_size = self.config.shadow_map_size;

        let lights = prepare_lights(scene.lights(), state, &scene.bounds());
        let view_proj = camera.view_projection_matrix();
        let mut per_frame = PerFrameConstants::from_camera(&view_proj, &view_proj, camera.position);
        per_frame.set_lights(&lights);
        per_frame.set_factors(self.config.ibl_factor, self.config.emissive_factor);
        per_frame.set_screen_size(self.width, self.height);

        let mut camera_targets = SurfaceTargets::new(self.width, self.height);
        let mut atlas = SurfaceTargets::new(map_size * 2, map_size * 2);
        let mut direct = Image2D::new(self.width, self.height, Vec4::zeros());
        let half = output_extent(vk::Extent2D {
            width: self.width,
            height: self.height,
        });
        let mut indirect = Image2D::new(half.width, half.height, Vec4::zeros());
        let mut output = Image2D::new(self.width, self.height, Vec4::zeros());
        let mut stats = FrameStats::default();

        for phase in &self.phases {
            for pass in &phase.passes {
                match pass.name {
                    "gbuffer" => {
                        let lists = BatchBuilder::build(scene, &view_proj, &EveryPrimitive, &mut self.ring);
                        let rasterizer = Rasterizer::new(Rect::sized(self.width, self.height));
                        let seed = SurfaceOutput::Camera {
                            ibl_factor: per_frame.ibl_factor(),
                            emissive_factor: per_frame.emissive_factor(),
                        };
                        render_gbuffer(&lists.opaque, &self.ring, &rasterizer, seed, &mut camera_targets);
                        stats.gbuffer = lists.stats;
                    }
                    "rsm" => {
                        stats.rsm =
                            render_rsm(scene, &per_frame, &rsm_slots(&lights), map_size, &mut self.ring, &mut atlas);
                    }
                    "direct_lighting" => {
                        direct = direct_lighting(&camera_targets, &atlas.depth, map_size, lights.first(), &camera.position);
                    }
                    "indirect_lighting" => {
                        indirect =
                            indirect_lighting(&camera_targets, &atlas, map_size, lights.first(), &self.kernel, &self.noise);
                    }
                    "aggregator" => output = aggregate(&direct, &indirect, state.di_weight),
                    other => log::trace!("Reference frame skips external pass {other}"),
                }
            }
        }

        Ok(ReferenceFrame {
            camera: camera_targets,
            atlas,
            direct,
            indirect,
            output,
            lights,
            per_frame,
            stats,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::{Material, Mesh, MeshData, Primitive, Scene};
    use approx::assert_relative_eq;

    fn config(map_size: u32) -> RendererConfig {
        RendererConfig {
            shadow_map_size: map_size,
            sample_count: 32,
            constant_ring_size: 3 * 64 * 1024,
            ..RendererConfig::default()
        }
    }

    // Two small cubes far apart and one light above each
    fn two_light_scene() -> Scene {
        let mut scene = Scene::new();
        let material = scene.add_material(Material::solid(Vec3::new(0.8, 0.8, 0.8), 0.9));
        let mut mesh = Mesh::default();
        mesh.primitives.push(Primitive::from_data(Some(material), MeshData::cube(0.5)));
        let cube = scene.add_mesh(mesh);
        scene.add_node(Mat4::new_translation(&Vec3::new(-3.0, 0.0, 0.0)), Some(cube));
        scene.add_node(Mat4::new_translation(&Vec3::new(3.0, 0.0, 0.0)), Some(cube));

        let mut left = Light::spot(Vec3::new(-3.0, 4.0, 0.0), -Vec3::y(), Vec3::repeat(1.0), 20.0, 10.0, 0.2, 0.3);
        let mut right = Light::spot(Vec3::new(3.0, 4.0, 0.0), -Vec3::y(), Vec3::new(1.0, 0.5, 0.2), 20.0, 10.0, 0.2, 0.3);
        left.update_view_proj(&scene.bounds());
        right.update_view_proj(&scene.bounds());
        scene.add_light(left);
        scene.add_light(right);
        scene.commit_transforms();
        scene
    }

    fn two_light_constants(scene: &Scene) -> PerFrameConstants {
        let mut per_frame = PerFrameConstants::from_camera(&Mat4::identity(), &Mat4::identity(), Vec3::zeros());
        per_frame.set_lights(scene.lights());
        per_frame
    }

    #[test]
    fn test_rsm_quadrants_are_isolated() {
        let map_size = 32;
        let scene = two_light_scene();
        let per_frame = two_light_constants(&scene);
        let mut ring = ConstantRing::new_host(256 * 1024, 1, DEFAULT_ALIGNMENT);

        let mut both = SurfaceTargets::new(map_size * 2, map_size * 2);
        render_rsm(&scene, &per_frame, &[Some(0), Some(1), None, None], map_size, &mut ring, &mut both);

        let mut only_second = SurfaceTargets::new(map_size * 2, map_size * 2);
        render_rsm_quadrant(&scene, &per_frame, 1, 1, map_size, &mut ring, &mut only_second);

        let first: Rect = quadrant_rect(0, map_size).into();
        let second: Rect = quadrant_rect(1, map_size).into();

        // The single-light render touches nothing outside its quadrant
        for (x, y, world) in only_second.world.region(only_second.world.rect()) {
            if !second.contains(x, y) {
                assert_eq!(world, Vec4::zeros(), "pixel {x},{y} written outside quadrant 1");
            }
        }
        // and matches the two-light render inside it
        let a: Vec<_> = both.world.region(second).collect();
        let b: Vec<_> = only_second.world.region(second).collect();
        assert_eq!(a, b);

        // The quadrants see different geometry
        let covered = |rect: Rect| both.world.region(rect).filter(|(_, _, w)| w.w > 0.0).count();
        assert!(covered(first) > 0 && covered(second) > 0);
        let first_x: Vec<f32> = both.world.region(first).filter(|(_, _, w)| w.w > 0.0).map(|(_, _, w)| w.x).collect();
        let second_x: Vec<f32> = both.world.region(second).filter(|(_, _, w)| w.w > 0.0).map(|(_, _, w)| w.x).collect();
        assert!(first_x.iter().all(|x| *x < 0.0));
        assert!(second_x.iter().all(|x| *x > 0.0));
    }

    #[test]
    fn test_full_ring_skips_light_quadrants() {
        let map_size = 16;
        let scene = two_light_scene();
        let per_frame = two_light_constants(&scene);
        let block = (std::mem::size_of::<PerFrameConstants>() as u64).div_ceil(DEFAULT_ALIGNMENT) * DEFAULT_ALIGNMENT;
        // Room for the first light's constants and nothing else
        let mut ring = ConstantRing::new_host(block, 1, DEFAULT_ALIGNMENT);
        let mut atlas = SurfaceTargets::new(map_size * 2, map_size * 2);

        let stats = render_rsm(&scene, &per_frame, &[Some(0), Some(1), None, None], map_size, &mut ring, &mut atlas);
        assert_eq!(stats.skipped_lights, 1);
        assert_eq!(stats.batches.visible, 0);
        assert!(stats.batches.dropped >= 1);
        assert!(atlas.world.pixels().iter().all(|w| *w == Vec4::zeros()));

        // A fresh frame has room again
        ring.on_begin_frame();
        let mut atlas = SurfaceTargets::new(map_size * 2, map_size * 2);
        assert!(render_rsm_quadrant(&scene, &per_frame, 0, 0, map_size, &mut ring, &mut atlas).is_some());
    }

    #[test]
    fn test_flux_is_albedo_times_light() {
        let map_size = 16;
        let scene = two_light_scene();
        let per_frame = two_light_constants(&scene);
        let mut ring = ConstantRing::new_host(256 * 1024, 1, DEFAULT_ALIGNMENT);
        let mut atlas = SurfaceTargets::new(map_size * 2, map_size * 2);
        render_rsm_quadrant(&scene, &per_frame, 1, 0, map_size, &mut ring, &mut atlas);

        let (diffuse, _) = Material::solid(Vec3::new(0.8, 0.8, 0.8), 0.9).diffuse_and_specular();
        let expected = diffuse.component_mul(&(Vec3::new(1.0, 0.5, 0.2) * 20.0));
        let flux: Vec<Vec4> = atlas.radiance.pixels().iter().copied().filter(|f| f.w > 0.0).collect();
        assert!(!flux.is_empty());
        for f in flux {
            assert_relative_eq!(f.xyz(), expected, epsilon = 1e-4);
        }
    }

    #[test]
    fn test_aggregate_blend_law() {
        let mut direct = Image2D::new(4, 4, Vec4::new(1.0, 0.5, 0.25, 1.0));
        direct.set(1, 2, Vec4::new(3.0, 3.0, 3.0, 1.0));
        let indirect = Image2D::new(2, 2, Vec4::new(0.2, 0.2, 0.2, 1.0));

        assert_eq!(aggregate(&direct, &indirect, 0.0), direct);
        let full = aggregate(&direct, &indirect, 1.0);
        assert!(full.pixels().iter().all(|p| (p - Vec4::new(0.2, 0.2, 0.2, 1.0)).norm() < 1e-6));

        for w in [0.1, 0.5, 0.9] {
            let mixed = aggregate(&direct, &indirect, w);
            for (x, y, value) in mixed.region(mixed.rect()) {
                let d = direct.get(x, y).unwrap();
                assert_relative_eq!(value, d * (1.0 - w) + Vec4::new(0.2, 0.2, 0.2, 1.0) * w, epsilon = 1e-5);
            }
        }
    }

    #[test]
    fn test_direct_without_light_is_the_seed() {
        let camera = SurfaceTargets::new(4, 4);
        let depth = Image2D::new(8, 8, 1.0);
        assert_eq!(direct_lighting(&camera, &depth, 4, None, &Vec3::zeros()), camera.radiance);
    }

    #[test]
    fn test_reference_frame_runs_every_pass() {
        let scene = two_light_scene();
        let mut camera = Camera::perspective(Vec3::new(0.0, 6.0, 8.0), 1.0, 4.0 / 3.0, 0.1, 50.0);
        camera.look_at(Vec3::zeros());
        let mut renderer = ReferenceRenderer::new(&config(32), 64, 48).unwrap();
        let frame = renderer.render(&scene, &camera, &RendererState::default()).unwrap();

        assert_eq!(frame.stats.gbuffer.visible, 2);
        assert!(frame.stats.rsm.batches.visible >= 1);
        assert_eq!(frame.stats.rsm.skipped_lights, 0);
        assert_eq!(frame.indirect.width(), 32);
        assert_eq!(frame.output.width(), 64);
        assert_eq!(frame.per_frame.rsm_light_index(), -1);
        assert_eq!(frame.lights[0].shadow_map_index, 0);
        assert_eq!(frame.lights[1].shadow_map_index, -1);
        assert!(frame.camera.world.pixels().iter().any(|w| w.w > 0.0));
    }

    #[test]
    fn test_empty_target_rejected() {
        assert!(ReferenceRenderer::new(&RendererConfig::default(), 0, 10).is_err());
    }
}
