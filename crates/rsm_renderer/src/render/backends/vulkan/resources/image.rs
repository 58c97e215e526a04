//! Render targets, sampled images and samplers
//!
//! Every G-Buffer target, RSM atlas plane and lighting output is an [`Image`]:
//! one 2D image, its dedicated memory and a single full view, destroyed
//! together on drop.

use ash::{vk, Device};

use crate::render::backends::vulkan::rendering::commands::submit_one_time;
use crate::render::backends::vulkan::resources::Buffer;
use crate::render::backends::vulkan::{DeviceContext, RenderResult};

/// Creation parameters of an [`Image`]
#[derive(Debug, Clone, Copy)]
pub struct ImageDesc {
    /// Debug name used in log output
    pub name: &'static str,
    /// Size in texels
    pub extent: vk::Extent2D,
    /// Texel format
    pub format: vk::Format,
    /// Usage flags
    pub usage: vk::ImageUsageFlags,
}

impl ImageDesc {
    /// Colour render target that later passes sample or read as an input attachment
    pub fn color_target(name: &'static str, extent: vk::Extent2D, format: vk::Format) -> Self {
        Self {
            name,
            extent,
            format,
            usage: vk::ImageUsageFlags::COLOR_ATTACHMENT
                | vk::ImageUsageFlags::SAMPLED
                | vk::ImageUsageFlags::INPUT_ATTACHMENT,
        }
    }

    /// Depth target that later passes sample
    pub fn depth_target(name: &'static str, extent: vk::Extent2D) -> Self {
        Self {
            name,
            extent,
            format: vk::Format::D32_SFLOAT,
            usage: vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT | vk::ImageUsageFlags::SAMPLED,
        }
    }

    /// Add usage flags
    #[must_use]
    pub fn with_usage(mut self, usage: vk::ImageUsageFlags) -> Self {
        self.usage |= usage;
        self
    }

    /// Aspect implied by the format
    pub fn aspect(&self) -> vk::ImageAspectFlags {
        aspect_of(self.format)
    }
}

/// Aspect flags for a format
pub fn aspect_of(format: vk::Format) -> vk::ImageAspectFlags {
    match format {
        vk::Format::D16_UNORM | vk::Format::D32_SFLOAT | vk::Format::X8_D24_UNORM_PACK32 => {
            vk::ImageAspectFlags::DEPTH
        }
        vk::Format::D24_UNORM_S8_UINT | vk::Format::D32_SFLOAT_S8_UINT => {
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        }
        _ => vk::ImageAspectFlags::COLOR,
    }
}

/// 2D image with memory and a full view
pub struct Image {
    device: Device,
    image: vk::Image,
    memory: vk::DeviceMemory,
    view: vk::ImageView,
    desc: ImageDesc,
}

impl Image {
    /// Create a device-local image in `UNDEFINED` layout
    pub fn new(context: &DeviceContext, desc: &ImageDesc) -> RenderResult<Self> {
        let device = context.device.clone();

        let image_info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::TYPE_2D)
            .extent(vk::Extent3D {
                width: desc.extent.width,
                height: desc.extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .format(desc.format)
            .tiling(vk::ImageTiling::OPTIMAL)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .usage(desc.usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .samples(vk::SampleCountFlags::TYPE_1);

        let image = unsafe { device.create_image(&image_info, None) }?;
        let mut result = Self {
            device,
            image,
            memory: vk::DeviceMemory::null(),
            view: vk::ImageView::null(),
            desc: *desc,
        };

        let requirements = unsafe { result.device.get_image_memory_requirements(image) };
        let memory_type_index =
            context.find_memory_type(requirements.memory_type_bits, vk::MemoryPropertyFlags::DEVICE_LOCAL)?;
        let alloc_info = vk::MemoryAllocateInfo::builder()
            .allocation_size(requirements.size)
            .memory_type_index(memory_type_index);

        result.memory = unsafe { result.device.allocate_memory(&alloc_info, None) }?;
        unsafe { result.device.bind_image_memory(image, result.memory, 0) }?;

        let view_info = vk::ImageViewCreateInfo::builder()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(desc.format)
            .subresource_range(full_range(desc.aspect()));
        result.view = unsafe { result.device.create_image_view(&view_info, None) }?;

        log::debug!(
            "Created image '{}' {}x{} {:?}",
            desc.name,
            desc.extent.width,
            desc.extent.height,
            desc.format
        );
        Ok(result)
    }

    /// Create a sampled image filled from `pixel_data`, left in `SHADER_READ_ONLY_OPTIMAL`
    pub fn from_data(
        context: &DeviceContext,
        command_pool: vk::CommandPool,
        desc: &ImageDesc,
        pixel_data: &[u8],
    ) -> RenderResult<Self> {
        let desc = desc.with_usage(vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED);
        let image = Self::new(context, &desc)?;

        let mut staging = Buffer::new_mapped(
            context,
            pixel_data.len() as vk::DeviceSize,
            vk::BufferUsageFlags::TRANSFER_SRC,
        )?;
        staging.write_bytes(0, pixel_data)?;

        submit_one_time(context, command_pool, |device, cmd| {
            let range = full_range(vk::ImageAspectFlags::COLOR);
            let to_transfer = vk::ImageMemoryBarrier::builder()
                .old_layout(vk::ImageLayout::UNDEFINED)
                .new_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
                .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .image(image.image)
                .subresource_range(range)
                .src_access_mask(vk::AccessFlags::empty())
                .dst_access_mask(vk::AccessFlags::TRANSFER_WRITE)
                .build();

            let region = vk::BufferImageCopy::builder()
                .image_subresource(vk::ImageSubresourceLayers {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    mip_level: 0,
                    base_array_layer: 0,
                    layer_count: 1,
                })
                .image_extent(vk::Extent3D {
                    width: desc.extent.width,
                    height: desc.extent.height,
                    depth: 1,
                })
                .build();

            let to_shader = vk::ImageMemoryBarrier::builder()
                .old_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
                .new_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
                .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .image(image.image)
                .subresource_range(range)
                .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
                .dst_access_mask(vk::AccessFlags::SHADER_READ)
                .build();

            unsafe {
                device.cmd_pipeline_barrier(
                    cmd,
                    vk::PipelineStageFlags::TOP_OF_PIPE,
                    vk::PipelineStageFlags::TRANSFER,
                    vk::DependencyFlags::empty(),
                    &[],
                    &[],
                    &[to_transfer],
                );
                device.cmd_copy_buffer_to_image(
                    cmd,
                    staging.handle(),
                    image.image,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    &[region],
                );
                device.cmd_pipeline_barrier(
                    cmd,
                    vk::PipelineStageFlags::TRANSFER,
                    vk::PipelineStageFlags::FRAGMENT_SHADER,
                    vk::DependencyFlags::empty(),
                    &[],
                    &[],
                    &[to_shader],
                );
            }
        })?;

        Ok(image)
    }

    /// Get the image handle
    pub fn handle(&self) -> vk::Image {
        self.image
    }

    /// Get the full image view
    pub fn view(&self) -> vk::ImageView {
        self.view
    }

    /// Size in texels
    pub fn extent(&self) -> vk::Extent2D {
        self.desc.extent
    }

    /// Texel format
    pub fn format(&self) -> vk::Format {
        self.desc.format
    }

    /// Aspect of the full view
    pub fn aspect(&self) -> vk::ImageAspectFlags {
        self.desc.aspect()
    }
}

impl Drop for Image {
    fn drop(&mut self) {
        log::debug!("Destroying image '{}'", self.desc.name);
        unsafe {
            if self.view != vk::ImageView::null() {
                self.device.destroy_image_view(self.view, None);
            }
            self.device.destroy_image(self.image, None);
            if self.memory != vk::DeviceMemory::null() {
                self.device.free_memory(self.memory, None);
            }
        }
    }
}

/// Subresource range covering mip 0, layer 0
pub fn full_range(aspect_mask: vk::ImageAspectFlags) -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask,
        base_mip_level: 0,
        level_count: 1,
        base_array_layer: 0,
        layer_count: 1,
    }
}

/// Sampler presets used by the lighting passes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplerKind {
    /// Linear filtering, clamp to edge (G-Buffer, RSM, indirect upsample)
    LinearClamp,
    /// Nearest filtering, repeat addressing (tiled rotation noise)
    NearestRepeat,
    /// Linear depth comparison with `LESS_OR_EQUAL` (percentage-closer shadow lookups)
    ShadowCompare,
}

/// Sampler wrapper with RAII cleanup
pub struct Sampler {
    device: Device,
    sampler: vk::Sampler,
    kind: SamplerKind,
}

impl Sampler {
    /// Create a sampler from a preset
    pub fn new(context: &DeviceContext, kind: SamplerKind) -> RenderResult<Self> {
        let info = Self::create_info(kind);
        let sampler = unsafe { context.device.create_sampler(&info, None) }?;
        log::debug!("Created {kind:?} sampler");
        Ok(Self {
            device: context.device.clone(),
            sampler,
            kind,
        })
    }

    fn create_info(kind: SamplerKind) -> vk::SamplerCreateInfo {
        let (filter, address_mode) = match kind {
            SamplerKind::LinearClamp | SamplerKind::ShadowCompare => {
                (vk::Filter::LINEAR, vk::SamplerAddressMode::CLAMP_TO_EDGE)
            }
            SamplerKind::NearestRepeat => (vk::Filter::NEAREST, vk::SamplerAddressMode::REPEAT),
        };
        let compare = kind == SamplerKind::ShadowCompare;

        vk::SamplerCreateInfo::builder()
            .mag_filter(filter)
            .min_filter(filter)
            .mipmap_mode(vk::SamplerMipmapMode::NEAREST)
            .address_mode_u(address_mode)
            .address_mode_v(address_mode)
            .address_mode_w(address_mode)
            .compare_enable(compare)
            .compare_op(if compare { vk::CompareOp::LESS_OR_EQUAL } else { vk::CompareOp::ALWAYS })
            .border_color(vk::BorderColor::FLOAT_OPAQUE_WHITE)
            .min_lod(-1000.0)
            .max_lod(1000.0)
            .max_anisotropy(1.0)
            .build()
    }

    /// Get the sampler handle
    pub fn handle(&self) -> vk::Sampler {
        self.sampler
    }

    /// Preset this sampler was created from
    pub fn kind(&self) -> SamplerKind {
        self.kind
    }
}

impl Drop for Sampler {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_sampler(self.sampler, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aspect_follows_format() {
        assert_eq!(aspect_of(vk::Format::D32_SFLOAT), vk::ImageAspectFlags::DEPTH);
        assert_eq!(aspect_of(vk::Format::R16G16B16A16_SFLOAT), vk::ImageAspectFlags::COLOR);
        assert_eq!(
            aspect_of(vk::Format::D24_UNORM_S8_UINT),
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        );
    }

    #[test]
    fn test_shadow_sampler_compares_less_or_equal() {
        let info = Sampler::create_info(SamplerKind::ShadowCompare);
        assert_eq!(info.compare_enable, vk::TRUE);
        assert_eq!(info.compare_op, vk::CompareOp::LESS_OR_EQUAL);
        assert_eq!(info.mag_filter, vk::Filter::LINEAR);
    }

    #[test]
    fn test_noise_sampler_repeats() {
        let info = Sampler::create_info(SamplerKind::NearestRepeat);
        assert_eq!(info.address_mode_u, vk::SamplerAddressMode::REPEAT);
        assert_eq!(info.address_mode_v, vk::SamplerAddressMode::REPEAT);
        assert_eq!(info.compare_enable, vk::FALSE);
    }

    #[test]
    fn test_target_descs_are_readable_by_later_passes() {
        let extent = vk::Extent2D { width: 8, height: 8 };
        let color = ImageDesc::color_target("world", extent, vk::Format::R16G16B16A16_SFLOAT);
        assert!(color.usage.contains(vk::ImageUsageFlags::INPUT_ATTACHMENT | vk::ImageUsageFlags::SAMPLED));

        let depth = ImageDesc::depth_target("depth", extent);
        assert_eq!(depth.aspect(), vk::ImageAspectFlags::DEPTH);
        assert!(depth.usage.contains(vk::ImageUsageFlags::SAMPLED));
    }
}
