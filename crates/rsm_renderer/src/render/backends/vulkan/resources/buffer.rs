//! Buffer management
//!
//! Host-visible buffers stay persistently mapped for their whole lifetime; the
//! constant ring and the static sample-offset buffer write through that mapping.

use ash::{vk, Device};
use std::ptr::NonNull;

use crate::render::backends::vulkan::{DeviceContext, RenderError, RenderResult};

/// Buffer wrapper with memory management
pub struct Buffer {
    device: Device,
    buffer: vk::Buffer,
    memory: vk::DeviceMemory,
    size: vk::DeviceSize,
    mapped: Option<NonNull<u8>>,
}

impl Buffer {
    /// Create a new buffer with its own memory allocation
    pub fn new(
        context: &DeviceContext,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        properties: vk::MemoryPropertyFlags,
    ) -> RenderResult<Self> {
        let device = context.device.clone();
        let buffer_info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe { device.create_buffer(&buffer_info, None) }?;

        let requirements = unsafe { device.get_buffer_memory_requirements(buffer) };
        let memory_type_index = match context.find_memory_type(requirements.memory_type_bits, properties) {
            Ok(index) => index,
            Err(e) => {
                unsafe { device.destroy_buffer(buffer, None) };
                return Err(e);
            }
        };

        let alloc_info = vk::MemoryAllocateInfo::builder()
            .allocation_size(requirements.size)
            .memory_type_index(memory_type_index);

        let memory = match unsafe { device.allocate_memory(&alloc_info, None) } {
            Ok(memory) => memory,
            Err(e) => {
                unsafe { device.destroy_buffer(buffer, None) };
                return Err(RenderError::Api(e));
            }
        };

        let mut result = Self {
            device,
            buffer,
            memory,
            size,
            mapped: None,
        };
        unsafe { result.device.bind_buffer_memory(buffer, memory, 0) }?;

        log::debug!("Created buffer {:?} ({} bytes, {:?})", buffer, size, usage);
        Ok(result)
    }

    /// Create a host-visible, coherent buffer that stays mapped until dropped
    pub fn new_mapped(
        context: &DeviceContext,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
    ) -> RenderResult<Self> {
        let mut buffer = Self::new(
            context,
            size,
            usage,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )?;

        let ptr = unsafe {
            buffer
                .device
                .map_memory(buffer.memory, 0, vk::WHOLE_SIZE, vk::MemoryMapFlags::empty())
        }?;
        buffer.mapped = NonNull::new(ptr.cast::<u8>());
        Ok(buffer)
    }

    /// Mutable view of `len` mapped bytes starting at `offset`
    pub fn mapped_range(&mut self, offset: vk::DeviceSize, len: usize) -> RenderResult<&mut [u8]> {
        let Some(ptr) = self.mapped else {
            return Err(RenderError::InvalidOperation {
                reason: "buffer is not host mapped".to_string(),
            });
        };
        if offset + len as vk::DeviceSize > self.size {
            return Err(RenderError::InvalidOperation {
                reason: format!("range {offset}+{len} exceeds buffer size {}", self.size),
            });
        }

        // The mapping covers the whole allocation and lives until drop
        Ok(unsafe { std::slice::from_raw_parts_mut(ptr.as_ptr().add(offset as usize), len) })
    }

    /// Copy bytes into the mapped buffer
    pub fn write_bytes(&mut self, offset: vk::DeviceSize, data: &[u8]) -> RenderResult<()> {
        self.mapped_range(offset, data.len())?.copy_from_slice(data);
        Ok(())
    }

    /// Get buffer handle
    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    /// Get size
    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        unsafe {
            if self.mapped.take().is_some() {
                self.device.unmap_memory(self.memory);
            }
            self.device.destroy_buffer(self.buffer, None);
            self.device.free_memory(self.memory, None);
        }
    }
}
