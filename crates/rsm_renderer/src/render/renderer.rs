//! Frame orchestration
//!
//! [`Renderer`] owns every pass and drives one frame:
//!
//! 1. command buffer 1: skydome hook, G-Buffer, RSM, direct + indirect
//!    lighting, aggregation and the temporal hook, separated by the barrier
//!    groups synthesized from the pass manifests;
//! 2. command buffer 2: the present hook, submitted against the presenter's
//!    semaphores once a swapchain image is available.
//!
//! Resources live in two tiers. [`PersistentResources`] survive for the life of
//! the renderer; [`SizeDependentResources`] are dropped and rebuilt by
//! [`Renderer::on_resize`], which then re-issues the new views to every pass.

use ash::vk;
use std::collections::BTreeMap;
use std::sync::Arc;

use super::backends::vulkan::rendering::{CommandPool, CommandRing, ShaderCache, ShaderLocator};
use super::backends::vulkan::resources::{Sampler, SamplerKind};
use super::backends::vulkan::state::AsyncPool;
use super::backends::vulkan::{DeviceContext, RenderError, RenderResult};
use super::batch::BatchStats;
use super::constants::{PerFrameConstants, MAX_LIGHTS, NO_RSM_LIGHT};
use super::passes::{
    Aggregator, CameraGBufferViews, DirectLighting, GBuffer, GBufferPass, IndirectLighting, MaterialBindings, Rsm,
    RsmStats,
};
use super::ring::ConstantRing;
use super::sampling::{RotationNoise, SamplingKernel};
use super::transitions::{audit, standard_frame_phases, synthesize, BarrierPlan, ImageTable};
use crate::config::RendererConfig;
use crate::foundation::math::{utils::halton, Mat4, Vec2, Vec3};
use crate::scene::{BoundingSphere, Camera, Light, LightKind, SceneCollaborator};

/// Length of the jitter sequence before it repeats
pub const JITTER_PHASES: u32 = 16;

/// Stage returned by [`Renderer::load_scene`] once loading is complete
pub const LOAD_DONE: u32 = 4;

/// Per-renderer frame counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameContext {
    /// Frames rendered so far
    pub frame_index: u64,
    /// Position in the jitter sequence
    pub jitter_seed: u32,
}

impl FrameContext {
    /// Step to the next frame and return its sub-pixel jitter in NDC units
    ///
    /// The offset follows Halton(2, 3) and stays within half a pixel of
    /// `extent` on each axis.
    pub fn advance(&mut self, extent: vk::Extent2D) -> Vec2 {
        self.frame_index += 1;
        self.jitter_seed = (self.jitter_seed + 1) % JITTER_PHASES;
        let index = self.jitter_seed + 1;
        let width = extent.width.max(1) as f32;
        let height = extent.height.max(1) as f32;
        Vec2::new(
            (halton(index, 2) - 0.5) * 2.0 / width,
            (halton(index, 3) - 0.5) * 2.0 / height,
        )
    }
}

/// Knobs the shell may change every frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RendererState {
    /// Indirect weight of the aggregator, in [0, 1]
    pub di_weight: f32,
    /// Overrides the direction of the first directional light
    pub sun_direction: Option<Vec3>,
}

impl RendererState {
    /// State seeded from `config`
    pub fn from_config(config: &RendererConfig) -> Self {
        Self {
            di_weight: config.di_weight,
            sun_direction: None,
        }
    }
}

impl Default for RendererState {
    fn default() -> Self {
        Self::from_config(&RendererConfig::default())
    }
}

/// Passes the shell records around the core pipeline
///
/// Every hook records into a command buffer that is already begun.
pub trait ExternalPasses {
    /// Before the G-Buffer, e.g. a sky background
    fn draw_skydome(&mut self, _cmd: vk::CommandBuffer, _per_frame: &PerFrameConstants) {}

    /// After aggregation, reading HDR, motion vectors and camera depth
    fn draw_temporal_resolve(&mut self, _cmd: vk::CommandBuffer, _views: &CameraGBufferViews) {}

    /// Tone map and GUI into swapchain image `image_index`
    fn draw_present(&mut self, _cmd: vk::CommandBuffer, _image_index: u32, _views: &CameraGBufferViews) {}
}

/// Hooks that record nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct NoExternalPasses;

impl ExternalPasses for NoExternalPasses {}

/// Swapchain side of a frame
pub trait Presenter {
    /// Wait for (and reset) the in-flight fence, then acquire an image
    fn wait_for_swapchain(&mut self) -> RenderResult<u32>;

    /// Signalled when the acquired image may be written
    fn image_available(&self) -> vk::Semaphore;

    /// Signalled by the second command buffer
    fn render_finished(&self) -> vk::Semaphore;

    /// Signalled when the second command buffer completes
    fn in_flight_fence(&self) -> vk::Fence;

    /// Queue image `image_index` for display
    fn present(&mut self, image_index: u32) -> RenderResult<()>;
}

/// Draw counts of one frame
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    /// Camera G-Buffer batches
    pub gbuffer: BatchStats,
    /// RSM batches over every active quadrant and skipped lights
    pub rsm: RsmStats,
}

/// Lights as drawn this frame
///
/// At most [`MAX_LIGHTS`] are kept. `state.sun_direction` replaces the
/// direction of the first directional light. Light 0 owns RSM quadrant 0;
/// every other light is drawn without a shadow map. View-projections are
/// refitted to `bounds`.
pub fn prepare_lights(lights: &[Light], state: &RendererState, bounds: &BoundingSphere) -> Vec<Light> {
    let mut lights: Vec<Light> = lights.iter().take(MAX_LIGHTS).cloned().collect();

    if let Some(direction) = state.sun_direction.filter(|d| d.norm() > f32::EPSILON) {
        if let Some(sun) = lights.iter_mut().find(|l| l.kind == LightKind::Directional) {
            sun.direction = direction.normalize();
        }
    }

    for (index, light) in lights.iter_mut().enumerate() {
        if index == 0 {
            light.assign_shadow_slot(0);
        } else {
            light.shadow_map_index = NO_RSM_LIGHT;
        }
        light.update_view_proj(bounds);
    }
    lights
}

/// Light slot rendered into each RSM quadrant
///
/// Only light 0 is active; the remaining quadrants are the extension point for
/// more shadowed lights.
pub fn rsm_slots(lights: &[Light]) -> [Option<usize>; MAX_LIGHTS] {
    let mut slots = [None; MAX_LIGHTS];
    slots[0] = lights.first().filter(|l| l.casts_rsm()).map(|_| 0);
    slots
}

/// Barrier groups of the standard frame, audited before use
pub fn frame_barrier_plan() -> RenderResult<BarrierPlan> {
    let phases = standard_frame_phases();
    let plan = synthesize(&phases, &BTreeMap::new())
        .map_err(|e| RenderError::InitializationFailed(format!("barrier synthesis failed: {e}")))?;

    let findings = audit(&phases, &plan);
    if !findings.is_empty() {
        for finding in &findings {
            log::error!("[BARRIER] Unguarded dependency {finding}");
        }
        return Err(RenderError::InitializationFailed(format!(
            "{} unguarded dependencies in the frame",
            findings.len()
        )));
    }
    Ok(plan)
}

/// Objects that live as long as the renderer
pub struct PersistentResources {
    constant_ring: ConstantRing,
    command_ring: CommandRing,
    upload_pool: CommandPool,
    workers: AsyncPool,
    shaders: Arc<ShaderCache>,
    materials: MaterialBindings,
    gbuffer_pass: GBufferPass,
    rsm: Rsm,
    direct: DirectLighting,
    indirect: IndirectLighting,
    aggregator: Aggregator,
    barriers: BarrierPlan,
}

impl PersistentResources {
    fn new(context: &DeviceContext, config: &RendererConfig) -> RenderResult<Self> {
        let constant_ring = ConstantRing::new(context, config.constant_ring_size, config.back_buffer_count)?;
        let command_ring = CommandRing::new(context, config.back_buffer_count, config.command_lists_per_back_buffer)?;
        let upload_pool = CommandPool::new(
            &context.device,
            context.graphics_family,
            vk::CommandPoolCreateFlags::TRANSIENT,
        )?;
        let workers = AsyncPool::new(config.pipeline_workers);
        let shaders = Arc::new(ShaderCache::new(ShaderLocator::new(&config.shader_dir)));
        let materials = MaterialBindings::new(Sampler::new(context, SamplerKind::LinearClamp)?);

        let kernel = SamplingKernel::generate(config.sample_seed, config.sample_count as usize);
        let noise = RotationNoise::generate(config.sample_seed, config.noise_dimension);

        let gbuffer_pass = GBufferPass::new(context, &constant_ring)?;
        let rsm = Rsm::new(context, &constant_ring, config.shadow_map_size)?;
        let mut direct = DirectLighting::new(context, &constant_ring, &shaders)?;
        let mut indirect = IndirectLighting::new(
            context,
            upload_pool.handle(),
            &constant_ring,
            &shaders,
            kernel,
            &noise,
        )?;
        let aggregator = Aggregator::new(context, &constant_ring, &shaders)?;

        // The atlas never changes size, so its views are issued once
        let light_views = rsm.views();
        direct.set_light_gbuffer(&light_views);
        indirect.set_light_gbuffer(&light_views);

        Ok(Self {
            constant_ring,
            command_ring,
            upload_pool,
            workers,
            shaders,
            materials,
            gbuffer_pass,
            rsm,
            direct,
            indirect,
            aggregator,
            barriers: frame_barrier_plan()?,
        })
    }
}

/// Objects rebuilt on every resize
pub struct SizeDependentResources {
    gbuffer: GBuffer,
    images: ImageTable,
}

/// Deferred renderer with reflective-shadow-map global illumination
pub struct Renderer {
    context: DeviceContext,
    config: RendererConfig,
    persistent: PersistentResources,
    sized: Option<SizeDependentResources>,
    frame: FrameContext,
    /// Jittered view-projection and jitter of the last presented frame
    prev_frame: Option<(Mat4, Vec2)>,
}

impl Renderer {
    /// Create every persistent resource; call [`Renderer::on_resize`] before the first frame
    pub fn new(context: DeviceContext, config: RendererConfig) -> RenderResult<Self> {
        let config = config.validated().map_err(RenderError::Config)?;
        let persistent = PersistentResources::new(&context, &config)?;
        log::info!(
            "Renderer ready: {} frames in flight, {}x{} RSM quadrants, {} samples",
            config.back_buffer_count,
            config.shadow_map_size,
            config.shadow_map_size,
            config.sample_count
        );

        Ok(Self {
            context,
            config,
            persistent,
            sized: None,
            frame: FrameContext::default(),
            prev_frame: None,
        })
    }

    /// Validated configuration
    pub fn config(&self) -> &RendererConfig {
        &self.config
    }

    /// Device handles the renderer was created with
    pub fn context(&self) -> &DeviceContext {
        &self.context
    }

    /// Frame counters
    pub fn frame_context(&self) -> &FrameContext {
        &self.frame
    }

    /// Barrier groups recorded every frame
    pub fn barrier_plan(&self) -> &BarrierPlan {
        &self.persistent.barriers
    }

    /// Views of the current G-Buffer; valid until the next resize
    pub fn camera_views(&self) -> Option<CameraGBufferViews> {
        self.sized.as_ref().map(|sized| sized.gbuffer.views())
    }

    /// Run loading stage `stage` and return the next one
    ///
    /// Stages: 0 material textures, 1 RSM pipelines, 2 G-Buffer pipelines,
    /// 3 wait for uploads. Returns [`LOAD_DONE`] when finished. Scene geometry
    /// must already be uploaded.
    pub fn load_scene<C: SceneCollaborator + ?Sized>(&mut self, scene: &C, stage: u32) -> RenderResult<u32> {
        let persistent = &mut self.persistent;
        match stage {
            0 => {
                persistent
                    .materials
                    .upload(&self.context, persistent.upload_pool.handle(), scene)?;
                log::info!("[LOAD] Uploaded {} textured materials", persistent.materials.len());
            }
            1 => {
                persistent
                    .rsm
                    .build_pipelines(&persistent.workers, &persistent.shaders, scene, &persistent.materials);
            }
            2 => {
                persistent
                    .gbuffer_pass
                    .build_pipelines(&persistent.workers, &persistent.shaders, scene, &persistent.materials);
            }
            3 => {
                unsafe { self.context.device.queue_wait_idle(self.context.graphics_queue) }?;
                log::info!("[LOAD] Scene loaded, {} shader variants cached", persistent.shaders.len());
            }
            _ => return Ok(LOAD_DONE),
        }
        Ok(stage + 1)
    }

    /// Drop every scene-dependent object
    pub fn unload_scene(&mut self) -> RenderResult<()> {
        unsafe { self.context.device.device_wait_idle() }?;
        self.persistent.gbuffer_pass.release_pipelines();
        self.persistent.rsm.release_pipelines();
        self.persistent.materials.clear();
        self.prev_frame = None;
        log::info!("[LOAD] Scene unloaded");
        Ok(())
    }

    /// Rebuild the window-sized tier for a `width × height` target
    ///
    /// A zero extent drops the tier; frames are skipped until the next resize.
    pub fn on_resize(&mut self, width: u32, height: u32) -> RenderResult<()> {
        unsafe { self.context.device.device_wait_idle() }?;

        let persistent = &mut self.persistent;
        persistent.direct.release_size_dependent();
        persistent.indirect.release_size_dependent();
        self.sized = None;

        if width == 0 || height == 0 {
            log::debug!("Zero-sized target, size-dependent resources released");
            return Ok(());
        }

        let extent = vk::Extent2D { width, height };
        let gbuffer = GBuffer::new(&self.context, &persistent.gbuffer_pass, extent)?;
        let views = gbuffer.views();
        persistent.direct.set_camera_gbuffer(&views)?;
        persistent.indirect.set_camera_gbuffer(&self.context, &views)?;
        persistent.aggregator.set_inputs(&views, persistent.indirect.output_view());

        let mut images = ImageTable::new();
        gbuffer.register(&mut images);
        persistent.rsm.register(&mut images);
        persistent.indirect.register(&mut images);

        self.sized = Some(SizeDependentResources { gbuffer, images });
        self.prev_frame = None;
        log::info!("Resized to {width}x{height}");
        Ok(())
    }

    /// Render and present one frame of `scene` seen from `camera`
    ///
    /// Returns `Ok(None)` when there is no target to render into.
    pub fn on_render<C, P, E>(
        &mut self,
        scene: &C,
        camera: &Camera,
        state: &RendererState,
        presenter: &mut P,
        external: &mut E,
    ) -> RenderResult<Option<FrameStats>>
    where
        C: SceneCollaborator + ?Sized,
        P: Presenter + ?Sized,
        E: ExternalPasses + ?Sized,
    {
        let Some(sized) = self.sized.as_ref() else {
            return Ok(None);
        };
        let PersistentResources {
            constant_ring,
            command_ring,
            materials,
            gbuffer_pass,
            rsm,
            direct,
            indirect,
            aggregator,
            barriers,
            ..
        } = &mut self.persistent;
        let device = &self.context.device;
        let queue = self.context.graphics_queue;

        command_ring.on_begin_frame()?;
        constant_ring.on_begin_frame();

        let extent = sized.gbuffer.extent();
        let jitter = self.frame.advance(extent);
        let view_proj = camera.jittered_view_projection(jitter);
        let (prev_view_proj, prev_jitter) = self.prev_frame.unwrap_or((view_proj, jitter));

        let lights = prepare_lights(scene.lights(), state, &scene.bounds());
        let mut per_frame = PerFrameConstants::from_camera(&view_proj, &prev_view_proj, camera.position);
        per_frame.set_lights(&lights);
        per_frame.set_factors(self.config.ibl_factor, self.config.emissive_factor);
        per_frame.set_screen_size(extent.width, extent.height);
        per_frame.set_jitter(jitter);
        per_frame.set_prev_jitter(prev_jitter);
        let per_frame_alloc = constant_ring.alloc_constant(&per_frame)?;

        let views = sized.gbuffer.views();
        let cmd = command_ring.get_new_command_list()?;

        external.draw_skydome(cmd, &per_frame);
        let gbuffer_stats = gbuffer_pass.draw(
            cmd,
            &sized.gbuffer,
            scene,
            &view_proj,
            &per_frame_alloc,
            constant_ring,
            materials,
        );
        let rsm_stats = rsm.draw(cmd, &rsm_slots(&lights), &per_frame, scene, constant_ring, materials);

        record_barriers(device, cmd, barriers, 1, &sized.images);
        direct.draw(cmd, &per_frame_alloc);
        indirect.draw(cmd, &per_frame_alloc);

        record_barriers(device, cmd, barriers, 2, &sized.images);
        aggregator.draw(cmd, constant_ring, state.di_weight)?;

        record_barriers(device, cmd, barriers, 3, &sized.images);
        external.draw_temporal_resolve(cmd, &views);

        unsafe { device.end_command_buffer(cmd) }?;
        submit(device, queue, cmd, None, None, vk::Fence::null())?;

        // Command buffer 1 is in flight: the slot fence has to signal whatever happens next
        let presented = record_present(device, queue, command_ring, presenter, external, &views);
        let signalled = command_ring.signal_frame_fence();
        let image_index = presented?;
        signalled?;

        presenter.present(image_index)?;
        self.prev_frame = Some((view_proj, jitter));

        let stats = FrameStats {
            gbuffer: gbuffer_stats,
            rsm: rsm_stats,
        };
        if stats.gbuffer.failed > 0 || stats.gbuffer.dropped > 0 || stats.rsm.skipped_lights > 0 {
            log::debug!("Frame {}: {:?}", self.frame.frame_index, stats);
        }
        Ok(Some(stats))
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        unsafe {
            let _ = self.context.device.device_wait_idle();
        }
    }
}

fn record_barriers(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    plan: &BarrierPlan,
    phase: usize,
    images: &ImageTable,
) {
    if let Some(group) = plan.before(phase) {
        group.record(device, cmd, images);
    }
}

/// Acquire a swap chain image, then record and submit command buffer 2
fn record_present<P, E>(
    device: &ash::Device,
    queue: vk::Queue,
    command_ring: &mut CommandRing,
    presenter: &mut P,
    external: &mut E,
    views: &CameraGBufferViews,
) -> RenderResult<u32>
where
    P: Presenter + ?Sized,
    E: ExternalPasses + ?Sized,
{
    let image_index = presenter.wait_for_swapchain()?;
    let present_cmd = command_ring.get_new_command_list()?;
    external.draw_present(present_cmd, image_index, views);
    unsafe { device.end_command_buffer(present_cmd) }?;
    submit(
        device,
        queue,
        present_cmd,
        Some(presenter.image_available()),
        Some(presenter.render_finished()),
        presenter.in_flight_fence(),
    )?;
    Ok(image_index)
}

fn submit(
    device: &ash::Device,
    queue: vk::Queue,
    cmd: vk::CommandBuffer,
    wait: Option<vk::Semaphore>,
    signal: Option<vk::Semaphore>,
    fence: vk::Fence,
) -> RenderResult<()> {
    let command_buffers = [cmd];
    let wait_semaphores: Vec<vk::Semaphore> = wait.into_iter().collect();
    let wait_stages: Vec<vk::PipelineStageFlags> = wait_semaphores
        .iter()
        .map(|_| vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
        .collect();
    let signal_semaphores: Vec<vk::Semaphore> = signal.into_iter().collect();

    let submit_info = vk::SubmitInfo::builder()
        .command_buffers(&command_buffers)
        .wait_semaphores(&wait_semaphores)
        .wait_dst_stage_mask(&wait_stages)
        .signal_semaphores(&signal_semaphores)
        .build();
    unsafe { device.queue_submit(queue, &[submit_info], fence) }?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::transitions::ResourceId;
    use approx::assert_relative_eq;

    fn bounds() -> BoundingSphere {
        BoundingSphere {
            center: Vec3::zeros(),
            radius: 4.0,
        }
    }

    #[test]
    fn test_jitter_within_half_pixel() {
        let extent = vk::Extent2D { width: 640, height: 480 };
        let mut frame = FrameContext::default();
        for _ in 0..(JITTER_PHASES * 2) {
            let jitter = frame.advance(extent);
            assert!(jitter.x.abs() <= 1.0 / 640.0);
            assert!(jitter.y.abs() <= 1.0 / 480.0);
        }
        assert_eq!(frame.frame_index, u64::from(JITTER_PHASES * 2));
        assert_eq!(frame.jitter_seed, 0);
    }

    #[test]
    fn test_frame_contexts_are_independent() {
        let extent = vk::Extent2D { width: 100, height: 100 };
        let mut a = FrameContext::default();
        let mut b = FrameContext::default();
        a.advance(extent);
        a.advance(extent);
        let first_b = b.advance(extent);

        let mut fresh = FrameContext::default();
        assert_eq!(first_b, fresh.advance(extent));
        assert_eq!(a.frame_index, 2);
        assert_eq!(b.frame_index, 1);
    }

    #[test]
    fn test_jitter_sequence_repeats() {
        let extent = vk::Extent2D { width: 64, height: 64 };
        let mut frame = FrameContext::default();
        let first: Vec<Vec2> = (0..JITTER_PHASES).map(|_| frame.advance(extent)).collect();
        let second: Vec<Vec2> = (0..JITTER_PHASES).map(|_| frame.advance(extent)).collect();
        assert_eq!(first, second);
        assert_ne!(first[0], first[1]);
    }

    #[test]
    fn test_light_zero_owns_the_shadow_map() {
        let lights = vec![
            Light::directional(Vec3::new(0.0, -1.0, 0.0), Vec3::repeat(1.0), 3.0),
            Light::spot(Vec3::new(0.0, 3.0, 0.0), -Vec3::y(), Vec3::repeat(1.0), 5.0, 10.0, 0.2, 0.4),
        ];
        let prepared = prepare_lights(&lights, &RendererState::default(), &bounds());

        assert_eq!(prepared[0].shadow_map_index, 0);
        assert_relative_eq!(prepared[0].depth_bias, crate::scene::DIRECTIONAL_DEPTH_BIAS);
        assert_eq!(prepared[1].shadow_map_index, NO_RSM_LIGHT);
        assert_ne!(prepared[0].view_proj, Mat4::identity());
        assert_eq!(rsm_slots(&prepared), [Some(0), None, None, None]);
    }

    #[test]
    fn test_point_light_zero_has_no_quadrant() {
        let lights = vec![Light::point(Vec3::new(0.0, 2.0, 0.0), Vec3::repeat(1.0), 4.0, 10.0)];
        let prepared = prepare_lights(&lights, &RendererState::default(), &bounds());
        assert_eq!(prepared[0].shadow_map_index, NO_RSM_LIGHT);
        assert_eq!(rsm_slots(&prepared), [None; MAX_LIGHTS]);
        assert_eq!(rsm_slots(&[]), [None; MAX_LIGHTS]);
    }

    #[test]
    fn test_sun_direction_overrides_first_directional() {
        let lights = vec![
            Light::point(Vec3::new(0.0, 2.0, 0.0), Vec3::repeat(1.0), 4.0, 10.0),
            Light::directional(Vec3::new(0.0, -1.0, 0.0), Vec3::repeat(1.0), 3.0),
        ];
        let state = RendererState {
            di_weight: 0.5,
            sun_direction: Some(Vec3::new(2.0, -2.0, 0.0)),
        };
        let prepared = prepare_lights(&lights, &state, &bounds());
        let expected = Vec3::new(1.0, -1.0, 0.0).normalize();
        assert_relative_eq!(prepared[1].direction, expected, epsilon = 1e-6);
        assert_eq!(prepared[0].direction, lights[0].direction);
    }

    #[test]
    fn test_at_most_four_lights() {
        let lights = vec![Light::directional(-Vec3::y(), Vec3::repeat(1.0), 1.0); 6];
        assert_eq!(prepare_lights(&lights, &RendererState::default(), &bounds()).len(), MAX_LIGHTS);
    }

    #[test]
    fn test_frame_plan_passes_audit() {
        let plan = frame_barrier_plan().unwrap();
        let lighting = plan.before(1).unwrap();
        assert!(lighting.transition(ResourceId::CameraWorld).is_some());
        assert!(lighting.transition(ResourceId::RsmDepth).is_some());
        assert!(plan.before(2).unwrap().transition(ResourceId::IndirectOutput).is_some());
        assert!(plan.before(3).unwrap().transition(ResourceId::Hdr).is_some());
    }

    #[test]
    fn test_state_defaults_from_config() {
        let config = RendererConfig {
            di_weight: 0.25,
            ..RendererConfig::default()
        };
        let state = RendererState::from_config(&config);
        assert_eq!(state.di_weight, 0.25);
        assert!(state.sun_direction.is_none());
    }
}
