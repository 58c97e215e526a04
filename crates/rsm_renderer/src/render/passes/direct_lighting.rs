//! Direct lighting
//!
//! A fullscreen pass over the camera G-Buffer, read as input attachments, that
//! shades every pixel with light 0 and its percentage-closer shadow term from
//! the RSM depth. The result is blended additively onto the HDR target, which
//! already holds the emissive and ambient terms written by the G-Buffer pass.

use ash::{vk, Device};
use std::mem::size_of;

use super::{draw_fullscreen, formats, full_rect, CameraGBufferViews, LightGBufferViews};
use crate::render::backends::vulkan::rendering::{
    set_viewport_and_scissor, AttachmentDesc, Framebuffer, GraphicsPipelineDesc, Pipeline, RenderPass, ShaderCache,
    ShaderStage,
};
use crate::render::backends::vulkan::resources::{
    create_layout_and_alloc_set, DescriptorPool, DescriptorSetLayout, DescriptorSetLayoutBuilder,
    DescriptorSetWriter, Sampler, SamplerKind,
};
use crate::render::backends::vulkan::{DeviceContext, RenderResult};
use crate::render::constants::PerFrameConstants;
use crate::render::defines::Defines;
use crate::render::ring::{ConstantAllocation, ConstantRing};

/// Binding indices of set 0
pub mod bindings {
    /// Per-frame constants, dynamic uniform
    pub const PER_FRAME: u32 = 0;
    /// G-Buffer world position input
    pub const WORLD: u32 = 1;
    /// G-Buffer normal input
    pub const NORMAL: u32 = 2;
    /// G-Buffer diffuse input
    pub const DIFFUSE: u32 = 3;
    /// G-Buffer specular input
    pub const SPECULAR: u32 = 4;
    /// RSM depth with comparison sampler
    pub const SHADOW_MAP: u32 = 5;
}

fn attachments() -> [AttachmentDesc; 5] {
    [
        AttachmentDesc::input(formats::WORLD),
        AttachmentDesc::input(formats::NORMAL),
        AttachmentDesc::input(formats::DIFFUSE),
        AttachmentDesc::input(formats::SPECULAR),
        AttachmentDesc::color_load(formats::HDR),
    ]
}

/// Defines shared with `direct_lighting.frag`
pub fn defines() -> Defines {
    Defines::new()
        .with("ID_PER_FRAME", bindings::PER_FRAME)
        .with("ID_gbufferWorld", bindings::WORLD)
        .with("ID_gbufferNormal", bindings::NORMAL)
        .with("ID_gbufferDiffuse", bindings::DIFFUSE)
        .with("ID_gbufferSpecular", bindings::SPECULAR)
        .with("ID_shadowMap", bindings::SHADOW_MAP)
}

/// Direct lighting pass
pub struct DirectLighting {
    device: Device,
    render_pass: RenderPass,
    pipeline: Pipeline,
    shadow_sampler: Sampler,
    _descriptor_pool: DescriptorPool,
    _layout: DescriptorSetLayout,
    set: vk::DescriptorSet,
    framebuffer: Option<Framebuffer>,
}

impl DirectLighting {
    /// Create the render pass, shadow sampler and pipeline
    pub fn new(context: &DeviceContext, ring: &ConstantRing, shaders: &ShaderCache) -> RenderResult<Self> {
        let device = context.device.clone();
        let render_pass = RenderPass::new(&device, "direct_lighting", &attachments())?;
        let shadow_sampler = Sampler::new(context, SamplerKind::ShadowCompare)?;

        let descriptor_pool = DescriptorPool::new(&device, 1)?;
        let builder = DescriptorSetLayoutBuilder::new()
            .add_dynamic_uniform_buffer(bindings::PER_FRAME, vk::ShaderStageFlags::FRAGMENT)
            .add_input_attachment(bindings::WORLD)
            .add_input_attachment(bindings::NORMAL)
            .add_input_attachment(bindings::DIFFUSE)
            .add_input_attachment(bindings::SPECULAR)
            .add_combined_image_sampler(bindings::SHADOW_MAP, vk::ShaderStageFlags::FRAGMENT);
        let (layout, set) = create_layout_and_alloc_set(&device, &descriptor_pool, builder)?;
        DescriptorSetWriter::new(set)
            .dynamic_uniform_buffer(bindings::PER_FRAME, ring.buffer(), size_of::<PerFrameConstants>() as u64)
            .update(&device);

        let defines = defines();
        let vertex = shaders.module(&device, "fullscreen", ShaderStage::Vertex, &Defines::new())?;
        let fragment = shaders.module(&device, "direct_lighting", ShaderStage::Fragment, &defines)?;
        let desc = GraphicsPipelineDesc::fullscreen(render_pass.handle(), 1).additive();
        let pipeline = Pipeline::graphics(&device, &desc, &vertex, &fragment, &[layout.handle()])?;
        log::info!("Created direct lighting pass");

        Ok(Self {
            device,
            render_pass,
            pipeline,
            shadow_sampler,
            _descriptor_pool: descriptor_pool,
            _layout: layout,
            set,
            framebuffer: None,
        })
    }

    /// Point the pass at a new G-Buffer; call after every resize
    pub fn set_camera_gbuffer(&mut self, views: &CameraGBufferViews) -> RenderResult<()> {
        let attachments = [views.world, views.normal, views.diffuse, views.specular, views.hdr];
        self.framebuffer = None;
        self.framebuffer = Some(Framebuffer::new(&self.device, &self.render_pass, &attachments, views.extent)?);

        DescriptorSetWriter::new(self.set)
            .input_attachment(bindings::WORLD, views.world)
            .input_attachment(bindings::NORMAL, views.normal)
            .input_attachment(bindings::DIFFUSE, views.diffuse)
            .input_attachment(bindings::SPECULAR, views.specular)
            .update(&self.device);
        Ok(())
    }

    /// Bind the RSM depth as the shadow map
    pub fn set_light_gbuffer(&mut self, views: &LightGBufferViews) {
        DescriptorSetWriter::new(self.set)
            .depth_sampler(bindings::SHADOW_MAP, views.depth, self.shadow_sampler.handle())
            .update(&self.device);
    }

    /// Drop the framebuffer over the old G-Buffer
    pub fn release_size_dependent(&mut self) {
        self.framebuffer = None;
    }

    /// Record the pass; a no-op until a G-Buffer has been set
    pub fn draw(&self, cmd: vk::CommandBuffer, per_frame: &ConstantAllocation) {
        let Some(framebuffer) = self.framebuffer.as_ref() else {
            log::warn!("Direct lighting drawn without a G-Buffer");
            return;
        };

        let clear_values = self.render_pass.clear_values([0.0; 4]);
        self.render_pass.begin(cmd, framebuffer, &clear_values);
        set_viewport_and_scissor(&self.device, cmd, full_rect(framebuffer.extent()));
        self.pipeline.bind(cmd);
        self.pipeline.bind_sets(cmd, &[self.set], &[per_frame.dynamic_offset()]);
        draw_fullscreen(&self.device, cmd);
        self.render_pass.end(cmd);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::backends::vulkan::rendering::AttachmentRole;

    #[test]
    fn test_inputs_then_hdr() {
        let attachments = attachments();
        assert!(attachments[..4].iter().all(|a| a.role == AttachmentRole::Input));
        assert_eq!(attachments[4].role, AttachmentRole::Color);
        assert_eq!(attachments[4].load_op, vk::AttachmentLoadOp::LOAD);
    }

    #[test]
    fn test_defines_name_every_binding() {
        let defines = defines();
        assert_eq!(defines.binding("ID_shadowMap"), Some(bindings::SHADOW_MAP));
        assert_eq!(defines.binding("ID_PER_FRAME"), Some(bindings::PER_FRAME));
        assert_eq!(defines.len(), 6);
    }
}
