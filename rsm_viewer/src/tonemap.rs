//! Present pass: Reinhard tone map of the HDR target into the swap chain
//!
//! The same operator runs on the host for `--reference` output, followed by
//! the sRGB encoding the swap chain format applies on the GPU.

use ash::{vk, Device};

use rsm_renderer::foundation::math::Vec3;
use rsm_renderer::render::backends::vulkan::rendering::{
    set_viewport_and_scissor, GraphicsPipelineDesc, Pipeline, ShaderLocator, ShaderModule, ShaderStage,
};
use rsm_renderer::render::backends::vulkan::resources::{
    DescriptorPool, DescriptorSetLayout, DescriptorSetLayoutBuilder, DescriptorSetWriter, Sampler, SamplerKind,
};
use rsm_renderer::render::defines::Defines;
use rsm_renderer::render::passes::CameraGBufferViews;
use rsm_renderer::render::{DeviceContext, ExternalPasses, RenderResult};

use crate::config::ViewerConfig;

const HDR_BINDING: u32 = 0;

/// Exposed radiance mapped into [0, 1) per channel
pub fn reinhard(radiance: Vec3, exposure: f32) -> Vec3 {
    let exposed = radiance.map(|c| c.max(0.0) * exposure);
    exposed.component_div(&exposed.add_scalar(1.0))
}

/// Linear [0, 1] to an 8-bit sRGB code value
pub fn encode_srgb(linear: f32) -> u8 {
    let linear = linear.clamp(0.0, 1.0);
    let encoded = if linear <= 0.003_130_8 {
        linear * 12.92
    } else {
        1.055 * linear.powf(1.0 / 2.4) - 0.055
    };
    (encoded * 255.0).round() as u8
}

/// Tone-mapped 8-bit pixel of `radiance`
pub fn display_pixel(radiance: Vec3, exposure: f32) -> [u8; 3] {
    let mapped = reinhard(radiance, exposure);
    [encode_srgb(mapped.x), encode_srgb(mapped.y), encode_srgb(mapped.z)]
}

fn create_render_pass(device: &Device, format: vk::Format) -> RenderResult<vk::RenderPass> {
    let attachments = [vk::AttachmentDescription {
        format,
        samples: vk::SampleCountFlags::TYPE_1,
        load_op: vk::AttachmentLoadOp::DONT_CARE,
        store_op: vk::AttachmentStoreOp::STORE,
        stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
        stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
        initial_layout: vk::ImageLayout::UNDEFINED,
        final_layout: vk::ImageLayout::PRESENT_SRC_KHR,
        ..Default::default()
    }];
    let color_refs = [vk::AttachmentReference {
        attachment: 0,
        layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
    }];
    let subpasses = [vk::SubpassDescription::builder()
        .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
        .color_attachments(&color_refs)
        .build()];
    // The acquire semaphore is waited on at colour output
    let dependencies = [vk::SubpassDependency {
        src_subpass: vk::SUBPASS_EXTERNAL,
        dst_subpass: 0,
        src_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        dst_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        src_access_mask: vk::AccessFlags::empty(),
        dst_access_mask: vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
        dependency_flags: vk::DependencyFlags::empty(),
    }];

    let create_info = vk::RenderPassCreateInfo::builder()
        .attachments(&attachments)
        .subpasses(&subpasses)
        .dependencies(&dependencies);
    Ok(unsafe { device.create_render_pass(&create_info, None) }?)
}

/// Fullscreen tone-map pass recorded by the present hook
pub struct ToneMap {
    device: Device,
    render_pass: vk::RenderPass,
    framebuffers: Vec<vk::Framebuffer>,
    extent: vk::Extent2D,
    pipeline: Pipeline,
    // Own `set`'s layout and storage
    _set_layout: DescriptorSetLayout,
    _pool: DescriptorPool,
    set: vk::DescriptorSet,
    sampler: Sampler,
    bound_hdr: vk::ImageView,
}

impl ToneMap {
    /// Pass writing swap chain images of `format`
    pub fn new(context: &DeviceContext, config: &ViewerConfig, format: vk::Format) -> RenderResult<Self> {
        let device = &context.device;
        let render_pass = create_render_pass(device, format)?;

        let set_layout = DescriptorSetLayoutBuilder::new()
            .add_combined_image_sampler(HDR_BINDING, vk::ShaderStageFlags::FRAGMENT)
            .build(device)?;
        let pool = DescriptorPool::new(device, 1)?;
        let set = pool.allocate_one(&set_layout)?;

        let locator = ShaderLocator::new(&config.renderer.shader_dir);
        let vertex_words = locator.load("fullscreen", ShaderStage::Vertex, &Defines::new())?;
        let defines = if (config.exposure - 1.0).abs() > f32::EPSILON {
            Defines::new().with("EXPOSURE", format!("{:.4}", config.exposure))
        } else {
            Defines::new()
        };
        let fragment_words = locator.load("tonemap", ShaderStage::Fragment, &defines)?;
        let vertex = ShaderModule::new(device, ShaderStage::Vertex, &vertex_words)?;
        let fragment = ShaderModule::new(device, ShaderStage::Fragment, &fragment_words)?;

        let desc = GraphicsPipelineDesc::fullscreen(render_pass, 1);
        let pipeline = Pipeline::graphics(device, &desc, &vertex, &fragment, &[set_layout.handle()])?;
        log::info!("Created tone-map pass for {format:?}");

        Ok(Self {
            device: device.clone(),
            render_pass,
            framebuffers: Vec::new(),
            extent: vk::Extent2D::default(),
            pipeline,
            _set_layout: set_layout,
            _pool: pool,
            set,
            sampler: Sampler::new(context, SamplerKind::LinearClamp)?,
            bound_hdr: vk::ImageView::null(),
        })
    }

    /// Rebuild the framebuffers over the swap chain `views`
    pub fn set_targets(&mut self, views: &[vk::ImageView], extent: vk::Extent2D) -> RenderResult<()> {
        self.destroy_framebuffers();
        for &view in views {
            let attachments = [view];
            let create_info = vk::FramebufferCreateInfo::builder()
                .render_pass(self.render_pass)
                .attachments(&attachments)
                .width(extent.width)
                .height(extent.height)
                .layers(1);
            let framebuffer = unsafe { self.device.create_framebuffer(&create_info, None) }?;
            self.framebuffers.push(framebuffer);
        }
        self.extent = extent;
        log::debug!("Tone-map framebuffers: {} at {}x{}", views.len(), extent.width, extent.height);
        Ok(())
    }

    /// Point the descriptor set at a new HDR target
    ///
    /// Only valid while no frame using the set is in flight, i.e. right after
    /// a resize.
    pub fn bind_hdr(&mut self, hdr: vk::ImageView) {
        if hdr == self.bound_hdr {
            return;
        }
        DescriptorSetWriter::new(self.set)
            .combined_image_sampler(HDR_BINDING, hdr, self.sampler.handle())
            .update(&self.device);
        self.bound_hdr = hdr;
    }

    fn destroy_framebuffers(&mut self) {
        for framebuffer in self.framebuffers.drain(..) {
            unsafe { self.device.destroy_framebuffer(framebuffer, None) };
        }
    }
}

impl ExternalPasses for ToneMap {
    fn draw_present(&mut self, cmd: vk::CommandBuffer, image_index: u32, views: &CameraGBufferViews) {
        if views.hdr != self.bound_hdr {
            log::warn!("Tone map skipped: HDR target changed without a rebind");
            return;
        }
        let Some(&framebuffer) = self.framebuffers.get(image_index as usize) else {
            log::warn!("Tone map skipped: no framebuffer for swapchain image {image_index}");
            return;
        };

        // The aggregator's storage writes are read by this fragment shader
        let barrier = vk::MemoryBarrier::builder()
            .src_access_mask(vk::AccessFlags::SHADER_WRITE)
            .dst_access_mask(vk::AccessFlags::SHADER_READ)
            .build();
        let area = vk::Rect2D {
            offset: vk::Offset2D::default(),
            extent: self.extent,
        };
        let begin_info = vk::RenderPassBeginInfo::builder()
            .render_pass(self.render_pass)
            .framebuffer(framebuffer)
            .render_area(area);

        unsafe {
            self.device.cmd_pipeline_barrier(
                cmd,
                vk::PipelineStageFlags::COMPUTE_SHADER,
                vk::PipelineStageFlags::FRAGMENT_SHADER,
                vk::DependencyFlags::empty(),
                &[barrier],
                &[],
                &[],
            );
            self.device
                .cmd_begin_render_pass(cmd, &begin_info, vk::SubpassContents::INLINE);
        }
        set_viewport_and_scissor(&self.device, cmd, area);
        self.pipeline.bind(cmd);
        self.pipeline.bind_sets(cmd, &[self.set], &[]);
        unsafe {
            self.device.cmd_draw(cmd, 3, 1, 0, 0);
            self.device.cmd_end_render_pass(cmd);
        }
    }
}

impl Drop for ToneMap {
    fn drop(&mut self) {
        self.destroy_framebuffers();
        unsafe { self.device.destroy_render_pass(self.render_pass, None) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_reinhard_compresses_highlights() {
        assert_relative_eq!(reinhard(Vec3::zeros(), 1.0), Vec3::zeros());
        assert_relative_eq!(reinhard(Vec3::repeat(1.0), 1.0), Vec3::repeat(0.5));
        assert_relative_eq!(reinhard(Vec3::repeat(0.5), 2.0), Vec3::repeat(0.5));
        assert!(reinhard(Vec3::repeat(1e6), 1.0).x < 1.0);
        assert_relative_eq!(reinhard(Vec3::new(-3.0, 0.0, 0.0), 1.0).x, 0.0);
    }

    #[test]
    fn test_srgb_endpoints_and_midpoint() {
        assert_eq!(encode_srgb(0.0), 0);
        assert_eq!(encode_srgb(1.0), 255);
        assert_eq!(encode_srgb(2.0), 255);
        // Linear 0.5 is brighter than half in sRGB
        assert_eq!(encode_srgb(0.5), 188);
    }

    #[test]
    fn test_display_pixel_of_unit_radiance() {
        assert_eq!(display_pixel(Vec3::repeat(1.0), 1.0), [188, 188, 188]);
    }
}
