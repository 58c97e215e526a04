//! Reflective shadow map atlas
//!
//! One `2·size × 2·size` set of images (world position, normal, flux, depth)
//! shared by up to four lights. Light `i` renders into quadrant `i`, selected
//! purely by viewport and scissor; the render pass clears the whole atlas once.

use ash::{vk, Device};
use std::sync::Arc;

use super::{
    build_primitive_pipelines, draw_batches, formats, LightGBufferViews, MaterialBindings, PassProgram,
    PrimitivePipelines, SceneFrameSet,
};
use crate::render::backends::vulkan::rendering::{
    set_viewport_and_scissor, AttachmentDesc, Framebuffer, GraphicsPipelineDesc, RenderPass, ShaderCache,
};
use crate::render::backends::vulkan::resources::{DescriptorPool, Image, ImageDesc};
use crate::render::backends::vulkan::state::AsyncPool;
use crate::render::backends::vulkan::{DeviceContext, RenderResult};
use crate::render::batch::{BatchBuilder, BatchStats};
use crate::render::constants::{PerFrameConstants, MAX_LIGHTS};
use crate::render::ring::{ConstantAllocation, ConstantRing};
use crate::render::transitions::{ImageTable, ResourceId};
use crate::scene::SceneCollaborator;

const PROGRAM: PassProgram = PassProgram {
    vertex: "rsm",
    fragment: "rsm",
};

fn attachments() -> [AttachmentDesc; 4] {
    [
        AttachmentDesc::color_clear(formats::WORLD),
        AttachmentDesc::color_clear(formats::NORMAL),
        AttachmentDesc::color_clear(formats::FLUX),
        AttachmentDesc::depth_clear(formats::DEPTH),
    ]
}

/// Viewport and scissor of atlas quadrant `index` for maps of `map_size`
///
/// Quadrants are laid out row-major: 0 top-left, 1 top-right, 2 bottom-left,
/// 3 bottom-right.
pub fn quadrant_rect(index: usize, map_size: u32) -> vk::Rect2D {
    let column = (index % 2) as u32;
    let row = ((index / 2) % 2) as u32;
    vk::Rect2D {
        offset: vk::Offset2D {
            x: (column * map_size) as i32,
            y: (row * map_size) as i32,
        },
        extent: vk::Extent2D {
            width: map_size,
            height: map_size,
        },
    }
}

/// `(quadrant, light slot)` pairs up to the first empty entry
pub fn active_quadrants(lights: &[Option<usize>; MAX_LIGHTS]) -> impl Iterator<Item = (usize, usize)> + '_ {
    lights
        .iter()
        .enumerate()
        .map_while(|(quadrant, slot)| slot.map(|slot| (quadrant, slot)))
}

/// Counters of one RSM pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RsmStats {
    /// Batches over every drawn quadrant
    pub batches: BatchStats,
    /// Active lights whose quadrant was left empty
    pub skipped_lights: usize,
}

/// Per-frame constants of light `slot` and their ring allocation
///
/// `None` skips the light's quadrant for this frame: either the slot is out of
/// range or the constant ring is full.
pub fn alloc_light_constants(
    per_frame: &PerFrameConstants,
    slot: usize,
    ring: &mut ConstantRing,
) -> Option<(PerFrameConstants, ConstantAllocation)> {
    let Some(light_constants) = per_frame.for_rsm_light(slot) else {
        log::warn!("[RSM] Light slot {slot} out of range");
        return None;
    };
    match ring.alloc_constant(&light_constants) {
        Ok(allocation) => Some((light_constants, allocation)),
        Err(err) => {
            log::warn!("[RSM] Skipped light {slot}: {err}");
            None
        }
    }
}

/// RSM atlas, render pass and pipelines; persistent across resizes
pub struct Rsm {
    device: Device,
    map_size: u32,
    world: Image,
    normal: Image,
    flux: Image,
    depth: Image,
    render_pass: RenderPass,
    framebuffer: Framebuffer,
    _descriptor_pool: DescriptorPool,
    frame_set: SceneFrameSet,
    pipelines: PrimitivePipelines,
}

impl Rsm {
    /// Allocate an atlas of four `map_size × map_size` quadrants
    pub fn new(context: &DeviceContext, ring: &ConstantRing, map_size: u32) -> RenderResult<Self> {
        let device = context.device.clone();
        let extent = vk::Extent2D {
            width: map_size * 2,
            height: map_size * 2,
        };

        let world = Image::new(context, &ImageDesc::color_target("rsm world", extent, formats::WORLD))?;
        let normal = Image::new(context, &ImageDesc::color_target("rsm normal", extent, formats::NORMAL))?;
        let flux = Image::new(context, &ImageDesc::color_target("rsm flux", extent, formats::FLUX))?;
        let depth = Image::new(context, &ImageDesc::depth_target("rsm depth", extent))?;

        let render_pass = RenderPass::new(&device, "rsm", &attachments())?;
        let views = [world.view(), normal.view(), flux.view(), depth.view()];
        let framebuffer = Framebuffer::new(&device, &render_pass, &views, extent)?;

        let descriptor_pool = DescriptorPool::new(&device, 1)?;
        let frame_set = SceneFrameSet::new(&device, &descriptor_pool, ring.buffer())?;
        log::info!("[RSM] Created {}x{} atlas", extent.width, extent.height);

        Ok(Self {
            device,
            map_size,
            world,
            normal,
            flux,
            depth,
            render_pass,
            framebuffer,
            _descriptor_pool: descriptor_pool,
            frame_set,
            pipelines: PrimitivePipelines::new(),
        })
    }

    /// Build a pipeline for every primitive of `scene`
    pub fn build_pipelines<C: SceneCollaborator + ?Sized>(
        &mut self,
        workers: &AsyncPool,
        shaders: &Arc<ShaderCache>,
        scene: &C,
        materials: &MaterialBindings,
    ) {
        let base = GraphicsPipelineDesc::geometry(self.render_pass.handle(), 3, vk::CompareOp::LESS_OR_EQUAL);
        self.pipelines = build_primitive_pipelines(
            &self.device,
            workers,
            shaders,
            scene,
            PROGRAM,
            base,
            &SceneFrameSet::defines(),
            self.frame_set.layout(),
            materials,
        );
    }

    /// Drop every per-primitive pipeline
    pub fn release_pipelines(&mut self) {
        self.pipelines.clear();
    }

    /// Per-primitive pipelines
    pub fn pipelines(&self) -> &PrimitivePipelines {
        &self.pipelines
    }

    /// Size of one quadrant
    pub fn map_size(&self) -> u32 {
        self.map_size
    }

    /// Views of the atlas; valid as long as this RSM
    pub fn views(&self) -> LightGBufferViews {
        LightGBufferViews {
            world: self.world.view(),
            normal: self.normal.view(),
            flux: self.flux.view(),
            depth: self.depth.view(),
            extent: self.framebuffer.extent(),
        }
    }

    /// Add the atlas images to the barrier image table
    pub fn register(&self, table: &mut ImageTable) {
        table.insert(ResourceId::RsmWorld, self.world.handle());
        table.insert(ResourceId::RsmNormal, self.normal.handle());
        table.insert(ResourceId::RsmFlux, self.flux.handle());
        table.insert(ResourceId::RsmDepth, self.depth.handle());
    }

    /// Render each light of `lights` into its quadrant
    ///
    /// `lights[i]` names the per-frame light slot drawn into quadrant `i`;
    /// rendering stops at the first `None`. Every light gets its own copy of
    /// `per_frame` carrying its view-projection and `rsm_light_index`, so the
    /// camera constants in `per_frame` are never modified.
    pub fn draw<C: SceneCollaborator + ?Sized>(
        &self,
        cmd: vk::CommandBuffer,
        lights: &[Option<usize>; MAX_LIGHTS],
        per_frame: &PerFrameConstants,
        scene: &C,
        ring: &mut ConstantRing,
        materials: &MaterialBindings,
    ) -> RsmStats {
        let clear_values = self.render_pass.clear_values([0.0; 4]);
        self.render_pass.begin(cmd, &self.framebuffer, &clear_values);

        let mut stats = RsmStats::default();
        for (quadrant, slot) in active_quadrants(lights) {
            let Some((light_constants, allocation)) = alloc_light_constants(per_frame, slot, ring) else {
                stats.skipped_lights += 1;
                continue;
            };

            set_viewport_and_scissor(&self.device, cmd, quadrant_rect(quadrant, self.map_size));
            let lists = BatchBuilder::build(scene, &light_constants.view_proj(), &self.pipelines, ring);
            draw_batches(&self.device, cmd, &lists.opaque, self.frame_set.set(), &allocation, materials);
            stats.batches.accumulate(&lists.stats);
        }

        self.render_pass.end(cmd);
        stats
    }
}
