//! Per-slot command buffer and synchronization primitives.

use crate::backend::{CommandBufferHandle, FenceHandle, GraphicsBackend, SemaphoreHandle};
use crate::error::BackendResult;

/// One of the N reusable sets of frame resources.
///
/// The semaphore that presentation waits on belongs to the swapchain image,
/// not to the slot, and is owned by the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameSlot {
    pub index: usize,
    pub command_buffer: CommandBufferHandle,
    /// Signaled by the swapchain when the acquired image can be rendered to.
    pub image_available: SemaphoreHandle,
    /// Signaled when the GPU is done with this slot. Created signaled so the
    /// first frame does not wait.
    pub in_flight: FenceHandle,
}

impl FrameSlot {
    pub fn new(backend: &dyn GraphicsBackend, index: usize) -> BackendResult<Self> {
        let command_buffer = backend.allocate_command_buffer()?;
        let image_available = match backend.create_semaphore() {
            Ok(semaphore) => semaphore,
            Err(e) => {
                backend.free_command_buffer(command_buffer);
                return Err(e);
            }
        };
        let in_flight = match backend.create_fence(true) {
            Ok(fence) => fence,
            Err(e) => {
                backend.destroy_semaphore(image_available);
                backend.free_command_buffer(command_buffer);
                return Err(e);
            }
        };

        Ok(Self {
            index,
            command_buffer,
            image_available,
            in_flight,
        })
    }

    /// Release the slot's primitives. The device must be idle.
    pub fn destroy(&self, backend: &dyn GraphicsBackend) {
        backend.destroy_fence(self.in_flight);
        backend.destroy_semaphore(self.image_available);
        backend.free_command_buffer(self.command_buffer);
    }
}
