//! Camera G-Buffer
//!
//! [`GBufferPass`] is the persistent half: render pass, per-frame descriptor
//! set and the per-primitive pipelines. [`GBuffer`] holds the window-sized
//! targets and the framebuffer and is dropped and rebuilt on every resize.
//!
//! Attachments, in framebuffer order: depth, world position, normal, diffuse,
//! specular + roughness, motion vectors and the HDR target. The fragment
//! shader seeds the HDR target with emissive and ambient light; direct
//! lighting adds onto it later in the frame.

use ash::{vk, Device};
use std::sync::Arc;

use super::{
    build_primitive_pipelines, draw_batches, formats, full_rect, CameraGBufferViews, MaterialBindings, PassProgram,
    PrimitivePipelines, SceneFrameSet,
};
use crate::foundation::math::Mat4;
use crate::render::backends::vulkan::rendering::{
    set_viewport_and_scissor, AttachmentDesc, Framebuffer, GraphicsPipelineDesc, RenderPass, ShaderCache,
};
use crate::render::backends::vulkan::resources::{DescriptorPool, Image, ImageDesc};
use crate::render::backends::vulkan::state::AsyncPool;
use crate::render::backends::vulkan::{DeviceContext, RenderResult};
use crate::render::batch::{BatchBuilder, BatchStats};
use crate::render::ring::{ConstantAllocation, ConstantRing};
use crate::render::transitions::{ImageTable, ResourceId};
use crate::scene::SceneCollaborator;

const PROGRAM: PassProgram = PassProgram {
    vertex: "gbuffer",
    fragment: "gbuffer",
};

/// Colour attachments written by the G-Buffer fragment shader
pub const COLOR_ATTACHMENTS: u32 = 6;

fn attachments() -> [AttachmentDesc; 7] {
    [
        AttachmentDesc::depth_clear(formats::DEPTH),
        AttachmentDesc::color_clear(formats::WORLD),
        AttachmentDesc::color_clear(formats::NORMAL),
        AttachmentDesc::color_clear(formats::DIFFUSE),
        AttachmentDesc::color_clear(formats::SPECULAR),
        AttachmentDesc::color_clear(formats::MOTION),
        AttachmentDesc::color_clear(formats::HDR),
    ]
}

/// Window-sized G-Buffer targets
pub struct GBuffer {
    depth: Image,
    world: Image,
    normal: Image,
    diffuse: Image,
    specular: Image,
    motion: Image,
    hdr: Image,
    framebuffer: Framebuffer,
}

impl GBuffer {
    /// Allocate every target at `extent` and bind them to `pass`
    pub fn new(context: &DeviceContext, pass: &GBufferPass, extent: vk::Extent2D) -> RenderResult<Self> {
        let depth = Image::new(context, &ImageDesc::depth_target("gbuffer depth", extent))?;
        let world = Image::new(context, &ImageDesc::color_target("gbuffer world", extent, formats::WORLD))?;
        let normal = Image::new(context, &ImageDesc::color_target("gbuffer normal", extent, formats::NORMAL))?;
        let diffuse = Image::new(context, &ImageDesc::color_target("gbuffer diffuse", extent, formats::DIFFUSE))?;
        let specular = Image::new(context, &ImageDesc::color_target("gbuffer specular", extent, formats::SPECULAR))?;
        let motion = Image::new(context, &ImageDesc::color_target("gbuffer motion", extent, formats::MOTION))?;
        // The aggregator blends into the HDR target as a storage image
        let hdr = Image::new(
            context,
            &ImageDesc::color_target("gbuffer hdr", extent, formats::HDR).with_usage(vk::ImageUsageFlags::STORAGE),
        )?;

        let views = [
            depth.view(),
            world.view(),
            normal.view(),
            diffuse.view(),
            specular.view(),
            motion.view(),
            hdr.view(),
        ];
        let framebuffer = Framebuffer::new(&context.device, &pass.render_pass, &views, extent)?;
        log::info!("Created G-Buffer {}x{}", extent.width, extent.height);

        Ok(Self {
            depth,
            world,
            normal,
            diffuse,
            specular,
            motion,
            hdr,
            framebuffer,
        })
    }

    /// Views for the passes that read the G-Buffer; valid until this G-Buffer is dropped
    pub fn views(&self) -> CameraGBufferViews {
        CameraGBufferViews {
            depth: self.depth.view(),
            world: self.world.view(),
            normal: self.normal.view(),
            diffuse: self.diffuse.view(),
            specular: self.specular.view(),
            motion: self.motion.view(),
            hdr: self.hdr.view(),
            extent: self.extent(),
        }
    }

    /// Size of every target
    pub fn extent(&self) -> vk::Extent2D {
        self.framebuffer.extent()
    }

    /// Add the targets to the barrier image table
    pub fn register(&self, table: &mut ImageTable) {
        table.insert(ResourceId::CameraDepth, self.depth.handle());
        table.insert(ResourceId::CameraWorld, self.world.handle());
        table.insert(ResourceId::CameraNormal, self.normal.handle());
        table.insert(ResourceId::CameraDiffuse, self.diffuse.handle());
        table.insert(ResourceId::CameraSpecular, self.specular.handle());
        table.insert(ResourceId::MotionVectors, self.motion.handle());
        table.insert(ResourceId::Hdr, self.hdr.handle());
    }
}

/// Persistent G-Buffer state
pub struct GBufferPass {
    device: Device,
    render_pass: RenderPass,
    _descriptor_pool: DescriptorPool,
    frame_set: SceneFrameSet,
    pipelines: PrimitivePipelines,
}

impl GBufferPass {
    /// Create the render pass and the per-frame set over `ring`
    pub fn new(context: &DeviceContext, ring: &ConstantRing) -> RenderResult<Self> {
        let device = context.device.clone();
        let render_pass = RenderPass::new(&device, "gbuffer", &attachments())?;
        let descriptor_pool = DescriptorPool::new(&device, 1)?;
        let frame_set = SceneFrameSet::new(&device, &descriptor_pool, ring.buffer())?;
        log::info!("Created G-Buffer pass");

        Ok(Self {
            device,
            render_pass,
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
        let base = GraphicsPipelineDesc::geometry(self.render_pass.handle(), COLOR_ATTACHMENTS, vk::CompareOp::LESS_OR_EQUAL);
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

    /// Record the G-Buffer pass for the camera at `view_proj`
    pub fn draw<C: SceneCollaborator + ?Sized>(
        &self,
        cmd: vk::CommandBuffer,
        target: &GBuffer,
        scene: &C,
        view_proj: &Mat4,
        per_frame: &ConstantAllocation,
        ring: &mut ConstantRing,
        materials: &MaterialBindings,
    ) -> BatchStats {
        let lists = BatchBuilder::build(scene, view_proj, &self.pipelines, ring);

        let clear_values = self.render_pass.clear_values([0.0; 4]);
        self.render_pass.begin(cmd, &target.framebuffer, &clear_values);
        set_viewport_and_scissor(&self.device, cmd, full_rect(target.extent()));
        draw_batches(&self.device, cmd, &lists.opaque, self.frame_set.set(), per_frame, materials);
        self.render_pass.end(cmd);

        lists.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::backends::vulkan::rendering::AttachmentRole;

    #[test]
    fn test_attachment_layout() {
        let attachments = attachments();
        assert_eq!(attachments[0].role, AttachmentRole::Depth);
        let colors = attachments.iter().filter(|a| a.role == AttachmentRole::Color).count();
        assert_eq!(colors as u32, COLOR_ATTACHMENTS);
        assert_eq!(attachments[6].format, formats::HDR);
        assert!(attachments.iter().all(|a| a.initial_layout == vk::ImageLayout::UNDEFINED));
    }
}
