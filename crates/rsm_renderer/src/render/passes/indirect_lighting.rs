//! Indirect lighting
//!
//! One-bounce diffuse light gathered from the RSM at half the camera
//! resolution. For each output pixel the fragment shader projects the shading
//! point into the light's quadrant, rotates every offset of the sampling
//! kernel by the pixel's noise value and accumulates the flux of the RSM texels
//! it lands on, weighted by the point-to-point form factor.
//!
//! Descriptor sets:
//! - 0: per-frame constants, sample offsets, rotation noise
//! - 1: RSM world position, normal, flux
//! - 2: camera world position, normal

use ash::{vk, Device};
use std::mem::size_of;

use super::{draw_fullscreen, formats, full_rect, CameraGBufferViews, LightGBufferViews};
use crate::render::backends::vulkan::rendering::{
    set_viewport_and_scissor, AttachmentDesc, Framebuffer, GraphicsPipelineDesc, Pipeline, RenderPass, ShaderCache,
    ShaderStage,
};
use crate::render::backends::vulkan::resources::{
    create_layout_and_alloc_set, Buffer, DescriptorPool, DescriptorSetLayout, DescriptorSetLayoutBuilder,
    DescriptorSetWriter, Image, ImageDesc, Sampler, SamplerKind,
};
use crate::render::backends::vulkan::{DeviceContext, RenderResult};
use crate::render::constants::PerFrameConstants;
use crate::render::defines::Defines;
use crate::render::ring::{ConstantAllocation, ConstantRing};
use crate::render::sampling::{RotationNoise, SamplingKernel, SAMPLE_RADIUS};
use crate::render::transitions::{ImageTable, ResourceId};

/// Binding indices
pub mod bindings {
    /// Set 0: per-frame constants, dynamic uniform
    pub const PER_FRAME: u32 = 0;
    /// Set 0: sample offsets
    pub const SAMPLE_OFFSETS: u32 = 1;
    /// Set 0: rotation noise
    pub const KERNEL_ROTATIONS: u32 = 2;
    /// Set 1: RSM world position
    pub const RSM_WORLD: u32 = 0;
    /// Set 1: RSM normal
    pub const RSM_NORMAL: u32 = 1;
    /// Set 1: RSM flux
    pub const RSM_FLUX: u32 = 2;
    /// Set 2: camera world position
    pub const CAMERA_WORLD: u32 = 0;
    /// Set 2: camera normal
    pub const CAMERA_NORMAL: u32 = 1;
}

/// Times the rotation noise repeats across the RSM
pub const NOISE_TILING: f32 = 4.0;

/// Output size for a camera of `extent`: half in each dimension
pub fn output_extent(extent: vk::Extent2D) -> vk::Extent2D {
    vk::Extent2D {
        width: (extent.width / 2).max(1),
        height: (extent.height / 2).max(1),
    }
}

/// Defines shared with `indirect_lighting.frag`
pub fn defines(sample_count: usize) -> Defines {
    Defines::new()
        .with("ID_PER_FRAME", bindings::PER_FRAME)
        .with("ID_sampleOffsets", bindings::SAMPLE_OFFSETS)
        .with("ID_kernelRotations", bindings::KERNEL_ROTATIONS)
        .with("ID_rsmWorld", bindings::RSM_WORLD)
        .with("ID_rsmNormal", bindings::RSM_NORMAL)
        .with("ID_rsmFlux", bindings::RSM_FLUX)
        .with("ID_cameraWorld", bindings::CAMERA_WORLD)
        .with("ID_cameraNormal", bindings::CAMERA_NORMAL)
        .with("NUM_RSM_SAMPLES", sample_count)
        .with("NOISE_TILING", format!("{NOISE_TILING:.1}"))
        .with("RSM_SAMPLE_RADIUS", format!("{SAMPLE_RADIUS:?}"))
}

struct Output {
    image: Image,
    framebuffer: Framebuffer,
}

/// Indirect lighting pass
pub struct IndirectLighting {
    device: Device,
    render_pass: RenderPass,
    pipeline: Pipeline,
    clamp_sampler: Sampler,
    _noise_sampler: Sampler,
    _offsets: Buffer,
    _noise: Image,
    _descriptor_pool: DescriptorPool,
    _layouts: [DescriptorSetLayout; 3],
    sets: [vk::DescriptorSet; 3],
    kernel: SamplingKernel,
    output: Option<Output>,
}

impl IndirectLighting {
    /// Upload `kernel` and `noise` and create the pipeline
    pub fn new(
        context: &DeviceContext,
        command_pool: vk::CommandPool,
        ring: &ConstantRing,
        shaders: &ShaderCache,
        kernel: SamplingKernel,
        noise: &RotationNoise,
    ) -> RenderResult<Self> {
        let device = context.device.clone();
        let render_pass = RenderPass::new(&device, "indirect_lighting", &[AttachmentDesc::color_clear(formats::HDR)])?;
        let clamp_sampler = Sampler::new(context, SamplerKind::LinearClamp)?;
        let noise_sampler = Sampler::new(context, SamplerKind::NearestRepeat)?;

        let offset_data = kernel.to_uniform_data();
        let offset_bytes: &[u8] = bytemuck::cast_slice(&offset_data);
        let mut offsets = Buffer::new_mapped(context, offset_bytes.len() as u64, vk::BufferUsageFlags::UNIFORM_BUFFER)?;
        offsets.write_bytes(0, offset_bytes)?;

        let dim = noise.dimension();
        let noise_desc = ImageDesc {
            name: "rotation noise",
            extent: vk::Extent2D { width: dim, height: dim },
            format: vk::Format::R32_SFLOAT,
            usage: vk::ImageUsageFlags::SAMPLED,
        };
        let noise_image = Image::from_data(context, command_pool, &noise_desc, &noise.to_texture_bytes())?;

        let fragment_stage = vk::ShaderStageFlags::FRAGMENT;
        let descriptor_pool = DescriptorPool::new(&device, 3)?;
        let (frame_layout, frame_set) = create_layout_and_alloc_set(
            &device,
            &descriptor_pool,
            DescriptorSetLayoutBuilder::new()
                .add_dynamic_uniform_buffer(bindings::PER_FRAME, fragment_stage)
                .add_uniform_buffer(bindings::SAMPLE_OFFSETS, fragment_stage)
                .add_combined_image_sampler(bindings::KERNEL_ROTATIONS, fragment_stage),
        )?;
        let (rsm_layout, rsm_set) = create_layout_and_alloc_set(
            &device,
            &descriptor_pool,
            DescriptorSetLayoutBuilder::new()
                .add_combined_image_sampler(bindings::RSM_WORLD, fragment_stage)
                .add_combined_image_sampler(bindings::RSM_NORMAL, fragment_stage)
                .add_combined_image_sampler(bindings::RSM_FLUX, fragment_stage),
        )?;
        let (camera_layout, camera_set) = create_layout_and_alloc_set(
            &device,
            &descriptor_pool,
            DescriptorSetLayoutBuilder::new()
                .add_combined_image_sampler(bindings::CAMERA_WORLD, fragment_stage)
                .add_combined_image_sampler(bindings::CAMERA_NORMAL, fragment_stage),
        )?;

        DescriptorSetWriter::new(frame_set)
            .dynamic_uniform_buffer(bindings::PER_FRAME, ring.buffer(), size_of::<PerFrameConstants>() as u64)
            .uniform_buffer(bindings::SAMPLE_OFFSETS, offsets.handle(), 0, offsets.size())
            .combined_image_sampler(bindings::KERNEL_ROTATIONS, noise_image.view(), noise_sampler.handle())
            .update(&device);

        let vertex = shaders.module(&device, "fullscreen", ShaderStage::Vertex, &Defines::new())?;
        let fragment = shaders.module(&device, "indirect_lighting", ShaderStage::Fragment, &defines(kernel.len()))?;
        let layouts = [frame_layout, rsm_layout, camera_layout];
        let handles = layouts.each_ref().map(DescriptorSetLayout::handle);
        let desc = GraphicsPipelineDesc::fullscreen(render_pass.handle(), 1);
        let pipeline = Pipeline::graphics(&device, &desc, &vertex, &fragment, &handles)?;
        log::info!("Created indirect lighting pass with {} samples", kernel.len());

        Ok(Self {
            device,
            render_pass,
            pipeline,
            clamp_sampler,
            _noise_sampler: noise_sampler,
            _offsets: offsets,
            _noise: noise_image,
            _descriptor_pool: descriptor_pool,
            _layouts: layouts,
            sets: [frame_set, rsm_set, camera_set],
            kernel,
            output: None,
        })
    }

    /// Allocate the half-resolution output and bind the camera G-Buffer; call after every resize
    pub fn set_camera_gbuffer(&mut self, context: &DeviceContext, views: &CameraGBufferViews) -> RenderResult<()> {
        self.output = None;
        let extent = output_extent(views.extent);
        let image = Image::new(context, &ImageDesc::color_target("indirect output", extent, formats::HDR))?;
        let framebuffer = Framebuffer::new(&self.device, &self.render_pass, &[image.view()], extent)?;
        self.output = Some(Output { image, framebuffer });

        DescriptorSetWriter::new(self.sets[2])
            .combined_image_sampler(bindings::CAMERA_WORLD, views.world, self.clamp_sampler.handle())
            .combined_image_sampler(bindings::CAMERA_NORMAL, views.normal, self.clamp_sampler.handle())
            .update(&self.device);
        log::info!("Indirect lighting output {}x{}", extent.width, extent.height);
        Ok(())
    }

    /// Bind the RSM atlas
    pub fn set_light_gbuffer(&mut self, views: &LightGBufferViews) {
        DescriptorSetWriter::new(self.sets[1])
            .combined_image_sampler(bindings::RSM_WORLD, views.world, self.clamp_sampler.handle())
            .combined_image_sampler(bindings::RSM_NORMAL, views.normal, self.clamp_sampler.handle())
            .combined_image_sampler(bindings::RSM_FLUX, views.flux, self.clamp_sampler.handle())
            .update(&self.device);
    }

    /// Drop the output and its framebuffer
    pub fn release_size_dependent(&mut self) {
        self.output = None;
    }

    /// Kernel uploaded at creation
    pub fn kernel(&self) -> &SamplingKernel {
        &self.kernel
    }

    /// View of the output, null before the first G-Buffer
    pub fn output_view(&self) -> vk::ImageView {
        self.output.as_ref().map_or(vk::ImageView::null(), |o| o.image.view())
    }

    /// Add the output to the barrier image table
    pub fn register(&self, table: &mut ImageTable) {
        if let Some(output) = &self.output {
            table.insert(ResourceId::IndirectOutput, output.image.handle());
        }
    }

    /// Record the pass; a no-op until a G-Buffer has been set
    pub fn draw(&self, cmd: vk::CommandBuffer, per_frame: &ConstantAllocation) {
        let Some(output) = self.output.as_ref() else {
            log::warn!("Indirect lighting drawn without a G-Buffer");
            return;
        };

        let clear_values = self.render_pass.clear_values([0.0; 4]);
        self.render_pass.begin(cmd, &output.framebuffer, &clear_values);
        set_viewport_and_scissor(&self.device, cmd, full_rect(output.framebuffer.extent()));
        self.pipeline.bind(cmd);
        self.pipeline.bind_sets(cmd, &self.sets, &[per_frame.dynamic_offset()]);
        draw_fullscreen(&self.device, cmd);
        self.render_pass.end(cmd);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_is_half_resolution() {
        let extent = output_extent(vk::Extent2D { width: 1280, height: 720 });
        assert_eq!((extent.width, extent.height), (640, 360));
        let tiny = output_extent(vk::Extent2D { width: 1, height: 1 });
        assert_eq!((tiny.width, tiny.height), (1, 1));
    }

    #[test]
    fn test_defines_carry_sample_count() {
        let defines = defines(100);
        assert_eq!(defines.get("NUM_RSM_SAMPLES"), Some("100"));
        assert_eq!(defines.get("NOISE_TILING"), Some("4.0"));
        assert_eq!(defines.get("RSM_SAMPLE_RADIUS"), Some("0.2"));
        assert_eq!(defines.binding("ID_rsmFlux"), Some(bindings::RSM_FLUX));
        assert_eq!(defines.binding("ID_cameraNormal"), Some(bindings::CAMERA_NORMAL));
    }
}
