//! Core backend abstraction trait
//!
//! Every backend (the host-memory [`HeadlessBackend`] used in tests and the
//! Vulkan backend) implements [`GraphicsBackend`]. The trait is object safe;
//! the engine holds the selected backend as `Arc<dyn GraphicsBackend>`.
//!
//! Methods take `&self`: backends keep their bookkeeping behind interior
//! locks so the arena, the texture store and the frame scheduler can share
//! one device.
//!
//! [`HeadlessBackend`]: crate::backend::HeadlessBackend

use std::time::Duration;

use crate::backend::types::*;
use crate::error::BackendResult;

/// Main graphics backend trait
pub trait GraphicsBackend: Send + Sync {
    /// Short backend name for logging.
    fn name(&self) -> &'static str;

    // Resources

    /// Create a buffer
    fn create_buffer(&self, desc: &BufferDescriptor) -> BackendResult<BufferHandle>;

    /// Write bytes into a host-visible buffer through its mapping.
    fn write_buffer(&self, buffer: BufferHandle, offset: u64, data: &[u8]) -> BackendResult<()>;

    /// Read bytes back from a buffer. Used for debugging and tests.
    fn read_buffer(&self, buffer: BufferHandle, offset: u64, size: u64) -> BackendResult<Vec<u8>>;

    /// Destroy a buffer
    fn destroy_buffer(&self, buffer: BufferHandle);

    /// Create a sampled 2D texture
    fn create_texture(&self, desc: &TextureDescriptor) -> BackendResult<TextureHandle>;

    /// Destroy a texture
    fn destroy_texture(&self, texture: TextureHandle);

    // Command buffers

    fn allocate_command_buffer(&self) -> BackendResult<CommandBufferHandle>;

    fn free_command_buffer(&self, cmd: CommandBufferHandle);

    /// Return a command buffer to the initial state.
    ///
    /// Resetting a command buffer that is still pending execution is an error.
    fn reset_command_buffer(&self, cmd: CommandBufferHandle) -> BackendResult<()>;

    fn begin_command_buffer(
        &self,
        cmd: CommandBufferHandle,
        usage: CommandBufferUsage,
    ) -> BackendResult<()>;

    fn end_command_buffer(&self, cmd: CommandBufferHandle) -> BackendResult<()>;

    /// Record a buffer-to-buffer copy.
    fn cmd_copy_buffer(
        &self,
        cmd: CommandBufferHandle,
        src: BufferHandle,
        dst: BufferHandle,
        regions: &[BufferCopyRegion],
    ) -> BackendResult<()>;

    /// Record a copy of tightly packed pixels into a texture, including the
    /// layout transitions to transfer-destination and back to shader-read.
    fn cmd_copy_buffer_to_texture(
        &self,
        cmd: CommandBufferHandle,
        src: BufferHandle,
        src_offset: u64,
        dst: TextureHandle,
        extent: Extent2d,
    ) -> BackendResult<()>;

    /// Begin rendering into a swapchain image, clearing it.
    fn cmd_begin_frame_pass(
        &self,
        cmd: CommandBufferHandle,
        image_index: u32,
        clear_color: [f32; 4],
    ) -> BackendResult<()>;

    /// End rendering and transition the swapchain image for presentation.
    fn cmd_end_frame_pass(&self, cmd: CommandBufferHandle, image_index: u32) -> BackendResult<()>;

    fn cmd_bind_pipeline(&self, cmd: CommandBufferHandle, pipeline: PipelineHandle)
        -> BackendResult<()>;

    fn cmd_bind_vertex_buffer(
        &self,
        cmd: CommandBufferHandle,
        buffer: BufferHandle,
        offset: u64,
    ) -> BackendResult<()>;

    /// Bind a buffer of 32-bit indices.
    fn cmd_bind_index_buffer(
        &self,
        cmd: CommandBufferHandle,
        buffer: BufferHandle,
        offset: u64,
    ) -> BackendResult<()>;

    fn cmd_set_viewport(&self, cmd: CommandBufferHandle, viewport: &Viewport) -> BackendResult<()>;

    fn cmd_draw_indexed(&self, cmd: CommandBufferHandle, args: &DrawIndexedArgs)
        -> BackendResult<()>;

    // Synchronization

    fn create_fence(&self, signaled: bool) -> BackendResult<FenceHandle>;

    /// Block until the fence is signaled. There is no timeout.
    fn wait_for_fence(&self, fence: FenceHandle) -> BackendResult<()>;

    /// Block until the fence is signaled or the timeout elapses.
    /// Returns `Ok(false)` on timeout.
    fn wait_for_fence_timeout(&self, fence: FenceHandle, timeout: Duration) -> BackendResult<bool>;

    fn fence_status(&self, fence: FenceHandle) -> BackendResult<FenceStatus>;

    fn reset_fence(&self, fence: FenceHandle) -> BackendResult<()>;

    fn destroy_fence(&self, fence: FenceHandle);

    fn create_semaphore(&self) -> BackendResult<SemaphoreHandle>;

    fn destroy_semaphore(&self, semaphore: SemaphoreHandle);

    // Queue

    /// Submit recorded command buffers to the graphics queue.
    fn submit(&self, info: &SubmitInfo<'_>) -> BackendResult<()>;

    fn queue_wait_idle(&self) -> BackendResult<()>;

    fn device_wait_idle(&self) -> BackendResult<()>;

    // Presentation

    /// Acquire the next swapchain image, signaling `signal` when it is ready.
    ///
    /// Returns [`BackendError::SurfaceOutOfDate`] when the swapchain no longer
    /// matches the surface.
    ///
    /// [`BackendError::SurfaceOutOfDate`]: crate::error::BackendError::SurfaceOutOfDate
    fn acquire_next_image(&self, signal: SemaphoreHandle) -> BackendResult<AcquiredImage>;

    /// Queue an image for presentation after `wait` is signaled.
    fn present(&self, image_index: u32, wait: SemaphoreHandle) -> BackendResult<PresentStatus>;

    /// Recreate the swapchain for a new surface size.
    fn recreate_swapchain(&self, width: u32, height: u32) -> BackendResult<()>;

    fn swapchain_extent(&self) -> Extent2d;

    fn swapchain_image_count(&self) -> u32;
}
