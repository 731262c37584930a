//! Common types shared between backends

use bitflags::bitflags;

/// Handle to a GPU buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferHandle(pub(crate) u64);

/// Handle to a GPU texture (image plus its default view)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureHandle(pub(crate) u64);

/// Handle to a primary command buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CommandBufferHandle(pub(crate) u64);

/// Handle to a CPU-waitable fence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FenceHandle(pub(crate) u64);

/// Handle to a binary GPU semaphore
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SemaphoreHandle(pub(crate) u64);

/// Handle to a graphics pipeline created outside this crate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PipelineHandle(pub(crate) u64);

macro_rules! impl_raw_handle {
    ($($ty:ident),*) => {
        $(
            impl $ty {
                /// Raw backend identifier (for logging).
                pub fn raw(&self) -> u64 {
                    self.0
                }
            }
        )*
    };
}

impl_raw_handle!(
    BufferHandle,
    TextureHandle,
    CommandBufferHandle,
    FenceHandle,
    SemaphoreHandle,
    PipelineHandle
);

bitflags! {
    /// Usage flags for buffers.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BufferUsage: u32 {
        /// Buffer can be bound as a vertex buffer.
        const VERTEX = 1 << 0;
        /// Buffer can be bound as an index buffer.
        const INDEX = 1 << 1;
        /// Buffer can be the source of a copy.
        const COPY_SRC = 1 << 2;
        /// Buffer can be the destination of a copy.
        const COPY_DST = 1 << 3;
        /// Host-visible, host-coherent memory the CPU writes through a mapping.
        const MAP_WRITE = 1 << 4;
        /// Host-visible memory the CPU reads back.
        const MAP_READ = 1 << 5;
    }
}

impl Default for BufferUsage {
    fn default() -> Self {
        Self::empty()
    }
}

impl BufferUsage {
    /// Whether the buffer lives in host-visible memory.
    pub fn is_host_visible(&self) -> bool {
        self.intersects(Self::MAP_WRITE | Self::MAP_READ)
    }
}

/// Descriptor for creating a buffer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct BufferDescriptor {
    /// Debug label for the buffer.
    pub label: Option<String>,
    /// Size in bytes.
    pub size: u64,
    /// Usage flags.
    pub usage: BufferUsage,
}

impl BufferDescriptor {
    /// Create a new buffer descriptor.
    pub fn new(size: u64, usage: BufferUsage) -> Self {
        Self {
            label: None,
            size,
            usage,
        }
    }

    /// Set the debug label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

/// Texture format enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    Rgba8Unorm,
    Rgba8UnormSrgb,
    Bgra8Unorm,
    Bgra8UnormSrgb,
}

impl TextureFormat {
    pub fn bytes_per_pixel(&self) -> u32 {
        4
    }
}

/// Two-dimensional extent in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Extent2d {
    pub width: u32,
    pub height: u32,
}

impl Extent2d {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Descriptor for creating a sampled 2D texture.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TextureDescriptor {
    pub label: Option<String>,
    pub extent: Extent2d,
    pub format: TextureFormat,
}

impl TextureDescriptor {
    pub fn new_2d(width: u32, height: u32, format: TextureFormat) -> Self {
        Self {
            label: None,
            extent: Extent2d::new(width, height),
            format,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Size of the tightly packed pixel data in bytes.
    pub fn byte_size(&self) -> u64 {
        self.extent.width as u64 * self.extent.height as u64 * self.format.bytes_per_pixel() as u64
    }
}

/// One region of a buffer-to-buffer copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferCopyRegion {
    pub src_offset: u64,
    pub dst_offset: u64,
    pub size: u64,
}

/// How a command buffer will be submitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandBufferUsage {
    /// Recorded, submitted once, then reset or freed.
    OneTimeSubmit,
    /// Recorded once per frame and reused after its fence signals.
    Reusable,
}

/// Pipeline stage a semaphore wait blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    TopOfPipe,
    Transfer,
    ColorAttachmentOutput,
    AllCommands,
}

/// A queue submission.
#[derive(Debug, Clone, Copy)]
pub struct SubmitInfo<'a> {
    /// Semaphores to wait on, each paired with the stage that waits.
    pub wait_semaphores: &'a [(SemaphoreHandle, PipelineStage)],
    pub command_buffers: &'a [CommandBufferHandle],
    pub signal_semaphores: &'a [SemaphoreHandle],
    /// Fence signaled when every command buffer has completed.
    pub fence: Option<FenceHandle>,
}

/// Status of a fence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FenceStatus {
    /// The fence has not yet been signaled.
    Unsignaled,
    /// The fence has been signaled (GPU work complete).
    Signaled,
}

/// A presentable image handed out by the swapchain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcquiredImage {
    pub image_index: u32,
    /// The swapchain still works but no longer matches the surface exactly.
    pub suboptimal: bool,
}

/// Outcome of a present request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentStatus {
    Optimal,
    Suboptimal,
    /// The surface changed; the swapchain must be recreated before the next frame.
    OutOfDate,
}

impl PresentStatus {
    pub fn needs_recreate(&self) -> bool {
        matches!(self, PresentStatus::OutOfDate)
    }
}

/// Viewport transform.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub min_depth: f32,
    pub max_depth: f32,
}

impl Viewport {
    /// Viewport covering the whole extent with the `[0, 1]` depth range.
    pub fn full(extent: Extent2d) -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        }
    }
}

/// Parameters of an indexed draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DrawIndexedArgs {
    pub index_count: u32,
    pub instance_count: u32,
    pub first_index: u32,
    pub vertex_offset: i32,
    pub first_instance: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_visibility() {
        assert!(BufferUsage::MAP_WRITE.is_host_visible());
        assert!((BufferUsage::COPY_SRC | BufferUsage::MAP_READ).is_host_visible());
        assert!(!(BufferUsage::VERTEX | BufferUsage::INDEX | BufferUsage::COPY_DST).is_host_visible());
    }

    #[test]
    fn test_texture_byte_size() {
        let desc = TextureDescriptor::new_2d(16, 8, TextureFormat::Rgba8UnormSrgb);
        assert_eq!(desc.byte_size(), 16 * 8 * 4);
    }

    #[test]
    fn test_present_status() {
        assert!(PresentStatus::OutOfDate.needs_recreate());
        assert!(!PresentStatus::Suboptimal.needs_recreate());
    }
}
