//! Vulkan instance and device creation

pub mod context;

pub use context::{
    find_memory_type, DeviceContext, LogicalDevice, PhysicalDeviceInfo, RenderError, RenderResult,
    VulkanInstance,
};
