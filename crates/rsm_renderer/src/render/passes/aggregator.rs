//! Direct/indirect blend
//!
//! A compute dispatch over the full camera resolution that rewrites the HDR
//! target in place with `direct·(1 − w) + indirect·w`. The indirect output is
//! half resolution and is upsampled by the linear sampler.

use ash::{vk, Device};
use bytemuck::{Pod, Zeroable};
use std::mem::size_of;

use super::CameraGBufferViews;
use crate::render::backends::vulkan::rendering::{Pipeline, ShaderCache, ShaderStage};
use crate::render::backends::vulkan::resources::{
    create_layout_and_alloc_set, DescriptorPool, DescriptorSetLayout, DescriptorSetLayoutBuilder,
    DescriptorSetWriter, Sampler, SamplerKind,
};
use crate::render::backends::vulkan::{DeviceContext, RenderResult};
use crate::render::defines::Defines;
use crate::render::ring::ConstantRing;

/// Workgroup edge length
pub const WG_SIZE_XY: u32 = 32;

/// Binding indices of set 0
pub mod bindings {
    /// Blend parameters, dynamic uniform
    pub const PARAMS: u32 = 0;
    /// HDR target, storage image
    pub const DIRECT: u32 = 1;
    /// Indirect output, linear sampler
    pub const INDIRECT: u32 = 2;
}

/// Blend parameters
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default, Pod, Zeroable)]
pub struct AggregatorParams {
    /// Indirect weight in [0, 1]
    pub weight: f32,
    /// Target width
    pub img_width: u32,
    /// Target height
    pub img_height: u32,
    /// Pads the block to one `vec4`
    pub pad: [u32; 1],
}

impl AggregatorParams {
    /// Parameters for a target of `extent`; the weight is clamped to [0, 1]
    pub fn new(weight: f32, extent: vk::Extent2D) -> Self {
        Self {
            weight: weight.clamp(0.0, 1.0),
            img_width: extent.width,
            img_height: extent.height,
            pad: [0],
        }
    }
}

/// Workgroups covering `extent`
pub fn dispatch_size(extent: vk::Extent2D) -> (u32, u32) {
    (extent.width.div_ceil(WG_SIZE_XY), extent.height.div_ceil(WG_SIZE_XY))
}

/// Defines shared with `aggregator.comp`
pub fn defines() -> Defines {
    Defines::new()
        .with("ID_Params", bindings::PARAMS)
        .with("ID_DLight", bindings::DIRECT)
        .with("ID_ILight", bindings::INDIRECT)
        .with("WG_SIZE_XY", WG_SIZE_XY)
}

/// Aggregation compute pass
pub struct Aggregator {
    device: Device,
    pipeline: Pipeline,
    sampler: Sampler,
    _descriptor_pool: DescriptorPool,
    _layout: DescriptorSetLayout,
    set: vk::DescriptorSet,
    extent: vk::Extent2D,
}

impl Aggregator {
    /// Create the compute pipeline
    pub fn new(context: &DeviceContext, ring: &ConstantRing, shaders: &ShaderCache) -> RenderResult<Self> {
        let device = context.device.clone();
        let sampler = Sampler::new(context, SamplerKind::LinearClamp)?;

        let compute = vk::ShaderStageFlags::COMPUTE;
        let descriptor_pool = DescriptorPool::new(&device, 1)?;
        let (layout, set) = create_layout_and_alloc_set(
            &device,
            &descriptor_pool,
            DescriptorSetLayoutBuilder::new()
                .add_dynamic_uniform_buffer(bindings::PARAMS, compute)
                .add_storage_image(bindings::DIRECT, compute)
                .add_combined_image_sampler(bindings::INDIRECT, compute),
        )?;
        DescriptorSetWriter::new(set)
            .dynamic_uniform_buffer(bindings::PARAMS, ring.buffer(), size_of::<AggregatorParams>() as u64)
            .update(&device);

        let shader = shaders.module(&device, "aggregator", ShaderStage::Compute, &defines())?;
        let pipeline = Pipeline::compute(&device, &shader, &[layout.handle()])?;
        log::info!("Created aggregator");

        Ok(Self {
            device,
            pipeline,
            sampler,
            _descriptor_pool: descriptor_pool,
            _layout: layout,
            set,
            extent: vk::Extent2D::default(),
        })
    }

    /// Bind the HDR target and the indirect output; call after every resize
    pub fn set_inputs(&mut self, views: &CameraGBufferViews, indirect: vk::ImageView) {
        DescriptorSetWriter::new(self.set)
            .storage_image(bindings::DIRECT, views.hdr)
            .combined_image_sampler(bindings::INDIRECT, indirect, self.sampler.handle())
            .update(&self.device);
        self.extent = views.extent;
    }

    /// Record the blend with indirect weight `weight`
    pub fn draw(&self, cmd: vk::CommandBuffer, ring: &mut ConstantRing, weight: f32) -> RenderResult<()> {
        if self.extent.width == 0 || self.extent.height == 0 {
            return Ok(());
        }
        let params = ring.alloc_constant(&AggregatorParams::new(weight, self.extent))?;
        let (groups_x, groups_y) = dispatch_size(self.extent);

        self.pipeline.bind(cmd);
        self.pipeline.bind_sets(cmd, &[self.set], &[params.dynamic_offset()]);
        unsafe { self.device.cmd_dispatch(cmd, groups_x, groups_y, 1) };
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_params_layout() {
        assert_eq!(size_of::<AggregatorParams>(), 16);
        let params = AggregatorParams::new(1.5, vk::Extent2D { width: 8, height: 4 });
        assert_eq!(params.weight, 1.0);
        assert_eq!((params.img_width, params.img_height), (8, 4));

        let words: &[u32] = bytemuck::cast_slice(bytemuck::bytes_of(&params));
        assert_eq!(words, &[1.0_f32.to_bits(), 8, 4, 0]);
    }

    #[test]
    fn test_dispatch_covers_target() {
        assert_eq!(dispatch_size(vk::Extent2D { width: 1280, height: 720 }), (40, 23));
        assert_eq!(dispatch_size(vk::Extent2D { width: 32, height: 1 }), (1, 1));
    }
}
