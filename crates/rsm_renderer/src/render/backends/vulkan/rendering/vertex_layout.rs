//! Vulkan vertex input state for [`Vertex`]
//!
//! Kept apart from the scene types so the mesh module stays backend-agnostic.

use ash::vk;
use std::mem::{offset_of, size_of};

use crate::scene::Vertex;

/// Shader locations of the vertex attributes
pub mod location {
    /// `vec3` position
    pub const POSITION: u32 = 0;
    /// `vec3` normal
    pub const NORMAL: u32 = 1;
    /// `vec2` texture coordinate
    pub const TEXCOORD_0: u32 = 2;
}

/// Vertex input layout of the scene vertex buffer
pub struct VulkanVertexLayout;

impl VulkanVertexLayout {
    /// Single interleaved binding
    pub fn binding_description() -> vk::VertexInputBindingDescription {
        vk::VertexInputBindingDescription {
            binding: 0,
            stride: size_of::<Vertex>() as u32,
            input_rate: vk::VertexInputRate::VERTEX,
        }
    }

    /// Position, normal and texture coordinate
    pub fn attribute_descriptions() -> [vk::VertexInputAttributeDescription; 3] {
        [
            vk::VertexInputAttributeDescription {
                binding: 0,
                location: location::POSITION,
                format: vk::Format::R32G32B32_SFLOAT,
                offset: offset_of!(Vertex, position) as u32,
            },
            vk::VertexInputAttributeDescription {
                binding: 0,
                location: location::NORMAL,
                format: vk::Format::R32G32B32_SFLOAT,
                offset: offset_of!(Vertex, normal) as u32,
            },
            vk::VertexInputAttributeDescription {
                binding: 0,
                location: location::TEXCOORD_0,
                format: vk::Format::R32G32_SFLOAT,
                offset: offset_of!(Vertex, uv) as u32,
            },
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_matches_vertex() {
        let binding = VulkanVertexLayout::binding_description();
        assert_eq!(binding.stride, 32);

        let attributes = VulkanVertexLayout::attribute_descriptions();
        let offsets: Vec<u32> = attributes.iter().map(|a| a.offset).collect();
        assert_eq!(offsets, vec![0, 12, 24]);
        assert_eq!(attributes[2].location, location::TEXCOORD_0);
    }
}
