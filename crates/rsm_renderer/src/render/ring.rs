//! Per-frame constant ring
//!
//! One persistently mapped buffer is split into `back_buffer_count` equal
//! slices. Each frame bump-allocates from its slice; [`ConstantRing::on_begin_frame`]
//! moves to the next slice and forgets everything allocated there
//! `back_buffer_count` frames ago. The caller must have waited on that frame's
//! fence first.

use ash::vk;
use bytemuck::Pod;

use crate::render::backends::vulkan::resources::Buffer;
use crate::render::backends::vulkan::{DeviceContext, RenderError, RenderResult};

/// Default `minUniformBufferOffsetAlignment` used by host-backed rings
pub const DEFAULT_ALIGNMENT: u64 = 256;

/// Location of one constant block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConstantAllocation {
    /// Frame counter value when allocated
    pub frame: u64,
    /// Byte offset in the ring buffer
    pub offset: u64,
    /// Requested size in bytes
    pub size: u64,
}

impl ConstantAllocation {
    /// Descriptor info for a plain uniform binding
    pub fn descriptor_info(&self, buffer: vk::Buffer) -> vk::DescriptorBufferInfo {
        vk::DescriptorBufferInfo {
            buffer,
            offset: self.offset,
            range: self.size,
        }
    }

    /// Offset passed to `vkCmdBindDescriptorSets` for a dynamic uniform binding
    pub fn dynamic_offset(&self) -> u32 {
        self.offset as u32
    }
}

enum Backing {
    Gpu(Buffer),
    Host(Vec<u8>),
}

/// Ring allocator for per-frame and per-object constants
pub struct ConstantRing {
    backing: Backing,
    slice_size: u64,
    alignment: u64,
    back_buffer_count: u32,
    frame: u64,
    head: u64,
}

impl ConstantRing {
    /// Ring over a host-visible uniform buffer
    pub fn new(context: &DeviceContext, total_size: u64, back_buffer_count: u32) -> RenderResult<Self> {
        let buffer = Buffer::new_mapped(context, total_size, vk::BufferUsageFlags::UNIFORM_BUFFER)?;
        let alignment = context.uniform_alignment().max(16);
        log::debug!(
            "Created constant ring: {} bytes, {} frames, alignment {}",
            total_size,
            back_buffer_count,
            alignment
        );
        Ok(Self::with_backing(Backing::Gpu(buffer), total_size, back_buffer_count, alignment))
    }

    /// Ring over plain memory, for software rendering and tests
    pub fn new_host(total_size: u64, back_buffer_count: u32, alignment: u64) -> Self {
        Self::with_backing(
            Backing::Host(vec![0; total_size as usize]),
            total_size,
            back_buffer_count,
            alignment.max(1),
        )
    }

    fn with_backing(backing: Backing, total_size: u64, back_buffer_count: u32, alignment: u64) -> Self {
        let back_buffer_count = back_buffer_count.max(1);
        let slice_size = total_size / u64::from(back_buffer_count) / alignment * alignment;
        Self {
            backing,
            slice_size,
            alignment,
            back_buffer_count,
            frame: 0,
            head: 0,
        }
    }

    /// Advance to the next frame's slice
    pub fn on_begin_frame(&mut self) {
        self.frame += 1;
        self.head = 0;
    }

    fn slot_base(&self) -> u64 {
        (self.frame % u64::from(self.back_buffer_count)) * self.slice_size
    }

    /// Reserve `size` bytes in the current slice
    pub fn alloc_constant_buffer(&mut self, size: usize) -> RenderResult<(&mut [u8], ConstantAllocation)> {
        let aligned = (size as u64).div_ceil(self.alignment) * self.alignment;
        if size == 0 || self.head + aligned > self.slice_size {
            log::warn!(
                "Constant ring exhausted: {} bytes requested, {} of {} used",
                size,
                self.head,
                self.slice_size
            );
            return Err(RenderError::OutOfMemory { requested: size });
        }

        let allocation = ConstantAllocation {
            frame: self.frame,
            offset: self.slot_base() + self.head,
            size: size as u64,
        };
        self.head += aligned;

        let bytes = match &mut self.backing {
            Backing::Gpu(buffer) => buffer.mapped_range(allocation.offset, size)?,
            Backing::Host(memory) => {
                let start = allocation.offset as usize;
                &mut memory[start..start + size]
            }
        };
        Ok((bytes, allocation))
    }

    /// Copy `value` into the ring
    pub fn alloc_constant<T: Pod>(&mut self, value: &T) -> RenderResult<ConstantAllocation> {
        let data = bytemuck::bytes_of(value);
        let (bytes, allocation) = self.alloc_constant_buffer(data.len())?;
        bytes.copy_from_slice(data);
        Ok(allocation)
    }

    /// Whether the allocation's memory has not been handed out again
    ///
    /// False once the ring has begun `back_buffer_count` frames after the
    /// allocation was made.
    pub fn is_live(&self, allocation: &ConstantAllocation) -> bool {
        allocation.frame <= self.frame && self.frame - allocation.frame < u64::from(self.back_buffer_count)
    }

    /// Whether the allocation belongs to the frame being recorded
    pub fn is_current(&self, allocation: &ConstantAllocation) -> bool {
        allocation.frame == self.frame
    }

    /// Bytes of a live allocation
    pub fn read(&self, allocation: &ConstantAllocation) -> Option<&[u8]> {
        if !self.is_live(allocation) {
            return None;
        }
        let start = allocation.offset as usize;
        let end = start + allocation.size as usize;
        match &self.backing {
            Backing::Host(memory) => memory.get(start..end),
            Backing::Gpu(_) => None,
        }
    }

    /// Decode a live host-backed allocation
    pub fn read_as<T: Pod>(&self, allocation: &ConstantAllocation) -> Option<T> {
        self.read(allocation)
            .filter(|bytes| bytes.len() == std::mem::size_of::<T>())
            .map(bytemuck::pod_read_unaligned)
    }

    /// Backing buffer handle; null for host rings
    pub fn buffer(&self) -> vk::Buffer {
        match &self.backing {
            Backing::Gpu(buffer) => buffer.handle(),
            Backing::Host(_) => vk::Buffer::null(),
        }
    }

    /// Bytes available to one frame
    pub fn slice_size(&self) -> u64 {
        self.slice_size
    }

    /// Bytes used by the current frame
    pub fn used(&self) -> u64 {
        self.head
    }

    /// Frames in flight
    pub fn back_buffer_count(&self) -> u32 {
        self.back_buffer_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SENTINEL: [f32; 4] = [1.0, 2.0, 3.0, 4.0];

    #[test]
    fn test_allocations_are_aligned() {
        let mut ring = ConstantRing::new_host(3 * 4096, 3, 256);
        let a = ring.alloc_constant(&[0u32; 3]).unwrap();
        let b = ring.alloc_constant(&[0u32; 3]).unwrap();
        assert_eq!(a.offset, 0);
        assert_eq!(b.offset, 256);
        assert_eq!(a.size, 12);
        assert_eq!(ring.used(), 512);
    }

    #[test]
    fn test_frames_use_disjoint_slices() {
        let mut ring = ConstantRing::new_host(3 * 4096, 3, 256);
        let first = ring.alloc_constant(&SENTINEL).unwrap();
        ring.on_begin_frame();
        let second = ring.alloc_constant(&SENTINEL).unwrap();
        assert_eq!(second.offset, first.offset + ring.slice_size());
    }

    #[test]
    fn test_sentinel_expires_after_back_buffer_count_frames() {
        let mut ring = ConstantRing::new_host(3 * 4096, 3, 256);
        ring.on_begin_frame();
        let allocation = ring.alloc_constant(&SENTINEL).unwrap();
        assert_eq!(ring.read_as::<[f32; 4]>(&allocation), Some(SENTINEL));

        for _ in 0..2 {
            ring.on_begin_frame();
            assert!(ring.is_live(&allocation));
            assert!(!ring.is_current(&allocation));
        }

        ring.on_begin_frame();
        assert!(!ring.is_live(&allocation));
        assert_eq!(ring.read(&allocation), None);

        // The slot is handed out again and the sentinel may be overwritten
        let reused = ring.alloc_constant(&[9.0_f32; 4]).unwrap();
        assert_eq!(reused.offset, allocation.offset);
    }

    #[test]
    fn test_exhaustion_is_out_of_memory() {
        let mut ring = ConstantRing::new_host(2 * 512, 2, 256);
        ring.alloc_constant(&SENTINEL).unwrap();
        ring.alloc_constant(&SENTINEL).unwrap();
        let result = ring.alloc_constant(&SENTINEL);
        assert!(matches!(result, Err(RenderError::OutOfMemory { requested: 16 })));

        ring.on_begin_frame();
        assert!(ring.alloc_constant(&SENTINEL).is_ok());
    }

    #[test]
    fn test_descriptor_info_uses_offset_and_size() {
        let allocation = ConstantAllocation { frame: 1, offset: 512, size: 64 };
        let info = allocation.descriptor_info(vk::Buffer::null());
        assert_eq!(info.offset, 512);
        assert_eq!(info.range, 64);
        assert_eq!(allocation.dynamic_offset(), 512);
    }
}
