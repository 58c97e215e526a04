//! Descriptor set layouts, pools and writes
//!
//! Every lighting pass declares its bindings with a [`DescriptorSetLayoutBuilder`],
//! allocates from one [`DescriptorPool`] and fills sets with a
//! [`DescriptorSetWriter`]. Size-dependent sets are rewritten after a resize.

use ash::{vk, Device};

use crate::render::backends::vulkan::{RenderError, RenderResult};

/// Descriptor set layout builder for creating reusable layouts
#[derive(Default)]
pub struct DescriptorSetLayoutBuilder {
    bindings: Vec<vk::DescriptorSetLayoutBinding>,
}

impl DescriptorSetLayoutBuilder {
    /// Create a new descriptor set layout builder
    pub fn new() -> Self {
        Self::default()
    }

    fn add(mut self, binding: u32, ty: vk::DescriptorType, stage_flags: vk::ShaderStageFlags) -> Self {
        self.bindings.push(
            vk::DescriptorSetLayoutBinding::builder()
                .binding(binding)
                .descriptor_type(ty)
                .descriptor_count(1)
                .stage_flags(stage_flags)
                .build(),
        );
        self
    }

    /// Add a uniform buffer binding
    pub fn add_uniform_buffer(self, binding: u32, stage_flags: vk::ShaderStageFlags) -> Self {
        self.add(binding, vk::DescriptorType::UNIFORM_BUFFER, stage_flags)
    }

    /// Add a uniform buffer binding whose offset is supplied at bind time
    pub fn add_dynamic_uniform_buffer(self, binding: u32, stage_flags: vk::ShaderStageFlags) -> Self {
        self.add(binding, vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC, stage_flags)
    }

    /// Add a combined image sampler binding
    pub fn add_combined_image_sampler(self, binding: u32, stage_flags: vk::ShaderStageFlags) -> Self {
        self.add(binding, vk::DescriptorType::COMBINED_IMAGE_SAMPLER, stage_flags)
    }

    /// Add a subpass input attachment binding (fragment stage only)
    pub fn add_input_attachment(self, binding: u32) -> Self {
        self.add(binding, vk::DescriptorType::INPUT_ATTACHMENT, vk::ShaderStageFlags::FRAGMENT)
    }

    /// Add a storage image binding
    pub fn add_storage_image(self, binding: u32, stage_flags: vk::ShaderStageFlags) -> Self {
        self.add(binding, vk::DescriptorType::STORAGE_IMAGE, stage_flags)
    }

    /// Bindings declared so far
    pub fn bindings(&self) -> &[vk::DescriptorSetLayoutBinding] {
        &self.bindings
    }

    /// Build the descriptor set layout
    pub fn build(self, device: &Device) -> RenderResult<DescriptorSetLayout> {
        let layout_info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(&self.bindings);
        let layout = unsafe { device.create_descriptor_set_layout(&layout_info, None) }?;

        Ok(DescriptorSetLayout {
            layout,
            device: device.clone(),
            bindings: self.bindings,
        })
    }
}

/// Descriptor set layout wrapper with automatic cleanup
pub struct DescriptorSetLayout {
    layout: vk::DescriptorSetLayout,
    device: Device,
    bindings: Vec<vk::DescriptorSetLayoutBinding>,
}

impl DescriptorSetLayout {
    /// Get the Vulkan descriptor set layout handle
    pub fn handle(&self) -> vk::DescriptorSetLayout {
        self.layout
    }

    /// Get the bindings used in this layout
    pub fn bindings(&self) -> &[vk::DescriptorSetLayoutBinding] {
        &self.bindings
    }
}

impl Drop for DescriptorSetLayout {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_descriptor_set_layout(self.layout, None);
        }
    }
}

/// Descriptor pool for allocating descriptor sets
pub struct DescriptorPool {
    pool: vk::DescriptorPool,
    device: Device,
}

impl DescriptorPool {
    /// Create a new descriptor pool sized for `max_sets` sets of the lighting passes
    pub fn new(device: &Device, max_sets: u32) -> RenderResult<Self> {
        let pool_sizes = [
            (vk::DescriptorType::UNIFORM_BUFFER, 4),
            (vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC, 4),
            (vk::DescriptorType::COMBINED_IMAGE_SAMPLER, 8),
            (vk::DescriptorType::INPUT_ATTACHMENT, 4),
            (vk::DescriptorType::STORAGE_IMAGE, 2),
        ]
        .map(|(ty, per_set)| {
            vk::DescriptorPoolSize::builder()
                .ty(ty)
                .descriptor_count(max_sets * per_set)
                .build()
        });

        let pool_info = vk::DescriptorPoolCreateInfo::builder()
            .flags(vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET)
            .max_sets(max_sets)
            .pool_sizes(&pool_sizes);

        let pool = unsafe { device.create_descriptor_pool(&pool_info, None) }?;
        Ok(Self {
            pool,
            device: device.clone(),
        })
    }

    /// Allocate descriptor sets from this pool
    pub fn allocate(&self, layouts: &[vk::DescriptorSetLayout]) -> RenderResult<Vec<vk::DescriptorSet>> {
        let alloc_info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(self.pool)
            .set_layouts(layouts);

        Ok(unsafe { self.device.allocate_descriptor_sets(&alloc_info) }?)
    }

    /// Allocate a single set for `layout`
    pub fn allocate_one(&self, layout: &DescriptorSetLayout) -> RenderResult<vk::DescriptorSet> {
        let sets = self.allocate(&[layout.handle()])?;
        sets.into_iter().next().ok_or(RenderError::InvalidOperation {
            reason: "descriptor pool returned no set".to_string(),
        })
    }

    /// Get the pool handle
    pub fn handle(&self) -> vk::DescriptorPool {
        self.pool
    }
}

impl Drop for DescriptorPool {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_descriptor_pool(self.pool, None);
        }
    }
}

/// Build a layout and allocate one set from it
pub fn create_layout_and_alloc_set(
    device: &Device,
    pool: &DescriptorPool,
    builder: DescriptorSetLayoutBuilder,
) -> RenderResult<(DescriptorSetLayout, vk::DescriptorSet)> {
    let layout = builder.build(device)?;
    let set = pool.allocate_one(&layout)?;
    Ok((layout, set))
}

enum PendingWrite {
    Buffer {
        binding: u32,
        ty: vk::DescriptorType,
        info: vk::DescriptorBufferInfo,
    },
    Image {
        binding: u32,
        ty: vk::DescriptorType,
        info: vk::DescriptorImageInfo,
    },
}

/// Descriptor set writer for updating descriptor sets
///
/// Writes are collected by value and turned into `vk::WriteDescriptorSet`s in
/// [`update`](Self::update), so no info pointer outlives its storage.
pub struct DescriptorSetWriter {
    set: vk::DescriptorSet,
    writes: Vec<PendingWrite>,
}

impl DescriptorSetWriter {
    /// Start writing `set`
    pub fn new(set: vk::DescriptorSet) -> Self {
        Self { set, writes: Vec::new() }
    }

    /// Write a uniform buffer range
    pub fn uniform_buffer(self, binding: u32, buffer: vk::Buffer, offset: u64, range: u64) -> Self {
        self.buffer(binding, vk::DescriptorType::UNIFORM_BUFFER, buffer, offset, range)
    }

    /// Write a dynamic uniform buffer; `range` is the size of one bound element
    pub fn dynamic_uniform_buffer(self, binding: u32, buffer: vk::Buffer, range: u64) -> Self {
        self.buffer(binding, vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC, buffer, 0, range)
    }

    fn buffer(mut self, binding: u32, ty: vk::DescriptorType, buffer: vk::Buffer, offset: u64, range: u64) -> Self {
        self.writes.push(PendingWrite::Buffer {
            binding,
            ty,
            info: vk::DescriptorBufferInfo { buffer, offset, range },
        });
        self
    }

    /// Write a combined image sampler in `SHADER_READ_ONLY_OPTIMAL`
    pub fn combined_image_sampler(self, binding: u32, view: vk::ImageView, sampler: vk::Sampler) -> Self {
        self.image(
            binding,
            vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            view,
            sampler,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        )
    }

    /// Write a combined image sampler over a depth image in `DEPTH_STENCIL_READ_ONLY_OPTIMAL`
    pub fn depth_sampler(self, binding: u32, view: vk::ImageView, sampler: vk::Sampler) -> Self {
        self.image(
            binding,
            vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            view,
            sampler,
            vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL,
        )
    }

    /// Write an input attachment read in `SHADER_READ_ONLY_OPTIMAL`
    pub fn input_attachment(self, binding: u32, view: vk::ImageView) -> Self {
        self.image(
            binding,
            vk::DescriptorType::INPUT_ATTACHMENT,
            view,
            vk::Sampler::null(),
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        )
    }

    /// Write a storage image in `GENERAL`
    pub fn storage_image(self, binding: u32, view: vk::ImageView) -> Self {
        self.image(
            binding,
            vk::DescriptorType::STORAGE_IMAGE,
            view,
            vk::Sampler::null(),
            vk::ImageLayout::GENERAL,
        )
    }

    fn image(
        mut self,
        binding: u32,
        ty: vk::DescriptorType,
        image_view: vk::ImageView,
        sampler: vk::Sampler,
        image_layout: vk::ImageLayout,
    ) -> Self {
        self.writes.push(PendingWrite::Image {
            binding,
            ty,
            info: vk::DescriptorImageInfo {
                sampler,
                image_view,
                image_layout,
            },
        });
        self
    }

    /// Number of pending writes
    pub fn len(&self) -> usize {
        self.writes.len()
    }

    /// Whether nothing has been written
    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    /// Apply all writes
    pub fn update(self, device: &Device) {
        let writes: Vec<vk::WriteDescriptorSet> = self
            .writes
            .iter()
            .map(|write| match write {
                PendingWrite::Buffer { binding, ty, info } => vk::WriteDescriptorSet::builder()
                    .dst_set(self.set)
                    .dst_binding(*binding)
                    .descriptor_type(*ty)
                    .buffer_info(std::slice::from_ref(info))
                    .build(),
                PendingWrite::Image { binding, ty, info } => vk::WriteDescriptorSet::builder()
                    .dst_set(self.set)
                    .dst_binding(*binding)
                    .descriptor_type(*ty)
                    .image_info(std::slice::from_ref(info))
                    .build(),
            })
            .collect();

        unsafe {
            device.update_descriptor_sets(&writes, &[]);
        }
    }
}
