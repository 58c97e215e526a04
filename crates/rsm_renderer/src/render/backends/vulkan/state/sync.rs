//! Synchronization primitives
//!
//! Fences gate reuse of per-frame command pools and constant-ring slices;
//! semaphores order the two per-frame submissions against presentation.

use ash::{vk, Device};

use crate::render::backends::vulkan::RenderResult;

/// Binary semaphore with RAII cleanup
pub struct Semaphore {
    device: Device,
    semaphore: vk::Semaphore,
}

impl Semaphore {
    /// Create an unsignaled semaphore
    pub fn new(device: &Device) -> RenderResult<Self> {
        let create_info = vk::SemaphoreCreateInfo::builder();
        let semaphore = unsafe { device.create_semaphore(&create_info, None) }?;
        Ok(Self {
            device: device.clone(),
            semaphore,
        })
    }

    /// Get the semaphore handle
    pub fn handle(&self) -> vk::Semaphore {
        self.semaphore
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_semaphore(self.semaphore, None);
        }
    }
}

/// Fence with RAII cleanup
pub struct Fence {
    device: Device,
    fence: vk::Fence,
}

impl Fence {
    /// Create a fence, optionally already signaled so the first wait returns at once
    pub fn new(device: &Device, signaled: bool) -> RenderResult<Self> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };

        let create_info = vk::FenceCreateInfo::builder().flags(flags);
        let fence = unsafe { device.create_fence(&create_info, None) }?;
        Ok(Self {
            device: device.clone(),
            fence,
        })
    }

    /// Block until the fence is signaled
    pub fn wait(&self, timeout: u64) -> RenderResult<()> {
        unsafe { self.device.wait_for_fences(&[self.fence], true, timeout) }?;
        Ok(())
    }

    /// Return the fence to the unsignaled state
    pub fn reset(&self) -> RenderResult<()> {
        unsafe { self.device.reset_fences(&[self.fence]) }?;
        Ok(())
    }

    /// Get the fence handle
    pub fn handle(&self) -> vk::Fence {
        self.fence
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_fence(self.fence, None);
        }
    }
}
