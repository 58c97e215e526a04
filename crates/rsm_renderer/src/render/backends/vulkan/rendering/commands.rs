//! Command pools, one-time submits and the per-frame command ring

use ash::{vk, Device};

use crate::render::backends::vulkan::state::Fence;
use crate::render::backends::vulkan::{DeviceContext, RenderError, RenderResult};

/// Command pool wrapper with RAII cleanup
pub struct CommandPool {
    device: Device,
    pool: vk::CommandPool,
}

impl CommandPool {
    /// Create a pool on `queue_family`
    pub fn new(device: &Device, queue_family: u32, flags: vk::CommandPoolCreateFlags) -> RenderResult<Self> {
        let create_info = vk::CommandPoolCreateInfo::builder()
            .queue_family_index(queue_family)
            .flags(flags);
        let pool = unsafe { device.create_command_pool(&create_info, None) }?;
        Ok(Self {
            device: device.clone(),
            pool,
        })
    }

    /// Get the pool handle
    pub fn handle(&self) -> vk::CommandPool {
        self.pool
    }

    /// Allocate `count` primary command buffers
    pub fn allocate(&self, count: u32) -> RenderResult<Vec<vk::CommandBuffer>> {
        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(self.pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(count);
        Ok(unsafe { self.device.allocate_command_buffers(&alloc_info) }?)
    }

    /// Recycle every command buffer of the pool
    pub fn reset(&self) -> RenderResult<()> {
        Ok(unsafe { self.device.reset_command_pool(self.pool, vk::CommandPoolResetFlags::empty()) }?)
    }
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        unsafe { self.device.destroy_command_pool(self.pool, None) };
    }
}

/// Begin recording a command buffer submitted once
pub fn begin_one_time(device: &Device, cmd: vk::CommandBuffer) -> RenderResult<()> {
    let begin_info = vk::CommandBufferBeginInfo::builder().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
    Ok(unsafe { device.begin_command_buffer(cmd, &begin_info) }?)
}

/// Record `record` into a fresh command buffer, submit it and wait for the queue
///
/// Used for uploads at load time only.
pub fn submit_one_time<F>(context: &DeviceContext, pool: vk::CommandPool, record: F) -> RenderResult<()>
where
    F: FnOnce(&Device, vk::CommandBuffer),
{
    let device = &context.device;
    let alloc_info = vk::CommandBufferAllocateInfo::builder()
        .command_pool(pool)
        .level(vk::CommandBufferLevel::PRIMARY)
        .command_buffer_count(1);
    let buffers = unsafe { device.allocate_command_buffers(&alloc_info) }?;

    let result = (|| -> RenderResult<()> {
        let cmd = *buffers
            .first()
            .ok_or_else(|| RenderError::InitializationFailed("no command buffer allocated".to_string()))?;
        begin_one_time(device, cmd)?;
        record(device, cmd);
        unsafe {
            device.end_command_buffer(cmd)?;
            let submit = vk::SubmitInfo::builder().command_buffers(&buffers).build();
            device.queue_submit(context.graphics_queue, &[submit], vk::Fence::null())?;
            device.queue_wait_idle(context.graphics_queue)?;
        }
        Ok(())
    })();

    unsafe { device.free_command_buffers(pool, &buffers) };
    result
}

/// Fence bookkeeping of one ring slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotFence {
    /// Signalled; waiting returns at once
    Signaled,
    /// Submitted; signals once the slot's work retires
    Pending,
    /// Reset with no submission behind it; waiting would never return
    Reset,
}

/// How a frame makes sure its slot's previous work has retired
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotWait {
    /// Wait on the slot fence
    Fence,
    /// Nothing signals the fence; drain the queue instead
    QueueIdle,
}

/// Which slot a frame uses, how many of its command buffers are taken and
/// the state of every slot's fence
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RingCursor {
    slots: u32,
    per_slot: u32,
    frame: u64,
    used: u32,
    fences: Vec<SlotFence>,
}

impl RingCursor {
    /// `slots` frames with `per_slot` command buffers each; starts before frame 0
    pub fn new(slots: u32, per_slot: u32) -> Self {
        let slots = slots.max(1);
        Self {
            slots,
            per_slot,
            frame: u64::MAX,
            used: 0,
            fences: vec![SlotFence::Signaled; slots as usize],
        }
    }

    /// Move to the next frame's slot
    pub fn advance(&mut self) -> usize {
        self.frame = self.frame.wrapping_add(1);
        self.used = 0;
        self.slot()
    }

    /// Slot of the current frame
    pub fn slot(&self) -> usize {
        (self.frame % u64::from(self.slots)) as usize
    }

    /// Take the next command buffer index of the slot
    pub fn take(&mut self) -> Option<usize> {
        (self.used < self.per_slot).then(|| {
            self.used += 1;
            (self.used - 1) as usize
        })
    }

    /// Fence state of the current slot
    pub fn fence(&self) -> SlotFence {
        self.fences.get(self.slot()).copied().unwrap_or(SlotFence::Signaled)
    }

    /// How to wait for the current slot, given its fence state
    pub fn wait_kind(&self) -> SlotWait {
        match self.fence() {
            SlotFence::Signaled | SlotFence::Pending => SlotWait::Fence,
            SlotFence::Reset => SlotWait::QueueIdle,
        }
    }

    /// The slot's previous work has retired
    pub fn mark_retired(&mut self) {
        if self.fence() == SlotFence::Pending {
            self.set_fence(SlotFence::Signaled);
        }
    }

    /// The slot fence was reset ahead of its signalling submission
    pub fn mark_reset(&mut self) {
        self.set_fence(SlotFence::Reset);
    }

    /// A submission that signals the slot fence was queued
    pub fn mark_submitted(&mut self) {
        self.set_fence(SlotFence::Pending);
    }

    fn set_fence(&mut self, state: SlotFence) {
        let slot = self.slot();
        if let Some(fence) = self.fences.get_mut(slot) {
            *fence = state;
        }
    }
}

struct FrameCommands {
    pool: CommandPool,
    buffers: Vec<vk::CommandBuffer>,
    fence: Fence,
}

/// `back_buffer_count × lists_per_frame` command buffers, recycled per frame
///
/// [`CommandRing::on_begin_frame`] waits for the slot's previous work to
/// retire, then resets the slot's pool. The slot fence is only reset by
/// [`CommandRing::signal_frame_fence`], right before the submission that
/// signals it, so a frame abandoned halfway leaves it signalled.
pub struct CommandRing {
    device: Device,
    queue: vk::Queue,
    frames: Vec<FrameCommands>,
    cursor: RingCursor,
}

impl CommandRing {
    /// Allocate the ring on the graphics queue family
    pub fn new(context: &DeviceContext, back_buffer_count: u32, lists_per_frame: u32) -> RenderResult<Self> {
        let frames = (0..back_buffer_count.max(1))
            .map(|_| {
                let pool = CommandPool::new(
                    &context.device,
                    context.graphics_family,
                    vk::CommandPoolCreateFlags::TRANSIENT,
                )?;
                let buffers = pool.allocate(lists_per_frame)?;
                let fence = Fence::new(&context.device, true)?;
                Ok(FrameCommands { pool, buffers, fence })
            })
            .collect::<RenderResult<Vec<_>>>()?;
        log::debug!("Created command ring: {back_buffer_count} frames x {lists_per_frame} lists");

        Ok(Self {
            device: context.device.clone(),
            queue: context.graphics_queue,
            frames,
            cursor: RingCursor::new(back_buffer_count, lists_per_frame),
        })
    }

    fn current(&self) -> RenderResult<&FrameCommands> {
        let slot = self.cursor.slot();
        self.frames.get(slot).ok_or_else(|| RenderError::InvalidOperation {
            reason: format!("command ring slot {slot} out of range"),
        })
    }

    /// Wait for the slot's previous submission and recycle its buffers
    pub fn on_begin_frame(&mut self) -> RenderResult<()> {
        self.cursor.advance();
        match self.cursor.wait_kind() {
            SlotWait::Fence => self.current()?.fence.wait(u64::MAX)?,
            SlotWait::QueueIdle => {
                log::warn!("Slot {} fence was never submitted; draining the queue", self.cursor.slot());
                unsafe { self.device.queue_wait_idle(self.queue) }?;
            }
        }
        self.cursor.mark_retired();
        self.current()?.pool.reset()
    }

    /// Next unused command buffer of this frame, already begun
    pub fn get_new_command_list(&mut self) -> RenderResult<vk::CommandBuffer> {
        let slot = self.cursor.slot();
        let index = self.cursor.take().ok_or_else(|| RenderError::InvalidOperation {
            reason: "command lists of this frame exhausted".to_string(),
        })?;
        let cmd = self
            .frames
            .get(slot)
            .and_then(|frame| frame.buffers.get(index))
            .copied()
            .ok_or_else(|| RenderError::InvalidOperation {
                reason: format!("command list {index} of slot {slot} missing"),
            })?;
        begin_one_time(&self.device, cmd)?;
        Ok(cmd)
    }

    /// Reset the slot fence and queue an empty submission that signals it
    ///
    /// Goes after every submission of the frame, so the fence retires all of
    /// them. Must run once per frame that submitted work.
    pub fn signal_frame_fence(&mut self) -> RenderResult<()> {
        let fence = self.current()?.fence.handle();
        self.current()?.fence.reset()?;
        self.cursor.mark_reset();
        unsafe { self.device.queue_submit(self.queue, &[], fence) }?;
        self.cursor.mark_submitted();
        Ok(())
    }

    /// Fence state of the current slot
    pub fn fence_state(&self) -> SlotFence {
        self.cursor.fence()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cursor_cycles_slots() {
        let mut cursor = RingCursor::new(3, 2);
        let slots: Vec<usize> = (0..5).map(|_| cursor.advance()).collect();
        assert_eq!(slots, vec![0, 1, 2, 0, 1]);
    }

    #[test]
    fn test_cursor_limits_lists_per_frame() {
        let mut cursor = RingCursor::new(2, 2);
        cursor.advance();
        assert_eq!(cursor.take(), Some(0));
        assert_eq!(cursor.take(), Some(1));
        assert_eq!(cursor.take(), None);

        cursor.advance();
        assert_eq!(cursor.take(), Some(0));
    }

    #[test]
    fn test_abandoned_frame_keeps_fence_waitable() {
        let mut cursor = RingCursor::new(2, 2);

        // Frame 0 submits and signals its fence
        cursor.advance();
        cursor.mark_retired();
        cursor.mark_reset();
        cursor.mark_submitted();
        assert_eq!(cursor.fence(), SlotFence::Pending);

        // Frame 1 fails before any submission: its fence is never touched
        cursor.advance();
        assert_eq!(cursor.wait_kind(), SlotWait::Fence);
        cursor.mark_retired();
        assert_eq!(cursor.fence(), SlotFence::Signaled);

        // Frame 2 reuses slot 0 and waits on frame 0's pending fence
        assert_eq!(cursor.advance(), 0);
        assert_eq!(cursor.wait_kind(), SlotWait::Fence);
        cursor.mark_retired();
        assert_eq!(cursor.fence(), SlotFence::Signaled);

        // Frame 3 reuses slot 1, left signalled by the abandoned frame
        assert_eq!(cursor.advance(), 1);
        assert_eq!(cursor.fence(), SlotFence::Signaled);
        assert_eq!(cursor.wait_kind(), SlotWait::Fence);
    }

    #[test]
    fn test_failed_signal_submit_drains_the_queue() {
        let mut cursor = RingCursor::new(1, 2);
        cursor.advance();
        cursor.mark_retired();
        // Reset went through but the signalling submit failed
        cursor.mark_reset();

        cursor.advance();
        assert_eq!(cursor.wait_kind(), SlotWait::QueueIdle);
        cursor.mark_retired();
        // Still reset until a submission signals it again
        assert_eq!(cursor.wait_kind(), SlotWait::QueueIdle);
        cursor.mark_reset();
        cursor.mark_submitted();
        assert_eq!(cursor.wait_kind(), SlotWait::Fence);
    }
}
