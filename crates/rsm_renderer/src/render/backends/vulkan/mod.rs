//! Vulkan backend implementation
//!
//! Organized into initialization, resources, rendering and state modules.

/// Vulkan initialization types (instance, device, context)
pub mod initialization;

/// Vulkan resource management (buffers, images, descriptors)
pub mod resources;

/// Vulkan rendering operations (shaders, pipelines, render passes, commands)
pub mod rendering;

/// Synchronization primitives and the load-time worker pool
pub mod state;

pub use initialization::{DeviceContext, LogicalDevice, PhysicalDeviceInfo, RenderError, RenderResult, VulkanInstance};
