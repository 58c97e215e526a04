//! Vulkan resource management
//!
//! Buffers, images, samplers and descriptor sets. Each wrapper owns its
//! handles and releases them on drop.

pub mod buffer;
pub mod descriptor_set;
pub mod image;

pub use buffer::Buffer;
pub use descriptor_set::{
    create_layout_and_alloc_set, DescriptorPool, DescriptorSetLayout, DescriptorSetLayoutBuilder,
    DescriptorSetWriter,
};
pub use image::{full_range, Image, ImageDesc, Sampler, SamplerKind};
