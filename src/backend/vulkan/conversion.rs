//! Type conversions between engine types and Vulkan types.

use ash::vk;
use gpu_allocator::{AllocationError, MemoryLocation};

use crate::backend::types::{BufferUsage, PipelineStage, TextureFormat, Viewport};
use crate::error::BackendError;

/// Convert BufferUsage flags to Vulkan buffer usage flags.
pub fn convert_buffer_usage(usage: BufferUsage) -> vk::BufferUsageFlags {
    let mut result = vk::BufferUsageFlags::empty();

    if usage.contains(BufferUsage::VERTEX) {
        result |= vk::BufferUsageFlags::VERTEX_BUFFER;
    }
    if usage.contains(BufferUsage::INDEX) {
        result |= vk::BufferUsageFlags::INDEX_BUFFER;
    }
    if usage.contains(BufferUsage::COPY_SRC) {
        result |= vk::BufferUsageFlags::TRANSFER_SRC;
    }
    if usage.contains(BufferUsage::COPY_DST) {
        result |= vk::BufferUsageFlags::TRANSFER_DST;
    }

    // MAP_READ and MAP_WRITE select the memory location instead
    result
}

/// Memory location for a buffer with the given usage.
pub fn memory_location(usage: BufferUsage) -> MemoryLocation {
    if usage.contains(BufferUsage::MAP_READ) {
        MemoryLocation::GpuToCpu
    } else if usage.contains(BufferUsage::MAP_WRITE) {
        MemoryLocation::CpuToGpu
    } else {
        MemoryLocation::GpuOnly
    }
}

/// Convert TextureFormat to Vulkan format.
pub fn convert_texture_format(format: TextureFormat) -> vk::Format {
    match format {
        TextureFormat::Rgba8Unorm => vk::Format::R8G8B8A8_UNORM,
        TextureFormat::Rgba8UnormSrgb => vk::Format::R8G8B8A8_SRGB,
        TextureFormat::Bgra8Unorm => vk::Format::B8G8R8A8_UNORM,
        TextureFormat::Bgra8UnormSrgb => vk::Format::B8G8R8A8_SRGB,
    }
}

/// Convert a pipeline stage to the Vulkan stage mask.
pub fn convert_pipeline_stage(stage: PipelineStage) -> vk::PipelineStageFlags {
    match stage {
        PipelineStage::TopOfPipe => vk::PipelineStageFlags::TOP_OF_PIPE,
        PipelineStage::Transfer => vk::PipelineStageFlags::TRANSFER,
        PipelineStage::ColorAttachmentOutput => vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        PipelineStage::AllCommands => vk::PipelineStageFlags::ALL_COMMANDS,
    }
}

pub fn convert_viewport(viewport: &Viewport) -> vk::Viewport {
    vk::Viewport {
        x: viewport.x,
        y: viewport.y,
        width: viewport.width,
        height: viewport.height,
        min_depth: viewport.min_depth,
        max_depth: viewport.max_depth,
    }
}

/// Map a Vulkan error code to a backend error.
///
/// Memory exhaustion, device loss and a stale surface keep their own
/// variants; everything else is reported as internal with `context`.
pub fn map_vk_error(context: &str, result: vk::Result) -> BackendError {
    match result {
        vk::Result::ERROR_OUT_OF_HOST_MEMORY | vk::Result::ERROR_OUT_OF_DEVICE_MEMORY => {
            BackendError::OutOfMemory
        }
        vk::Result::ERROR_DEVICE_LOST => BackendError::DeviceLost,
        vk::Result::ERROR_OUT_OF_DATE_KHR => BackendError::SurfaceOutOfDate,
        other => BackendError::Internal(format!("{}: {:?}", context, other)),
    }
}

/// Map a gpu-allocator failure to a backend error.
pub fn map_allocation_error(context: &str, error: AllocationError) -> BackendError {
    match error {
        AllocationError::OutOfMemory => BackendError::OutOfMemory,
        other => BackendError::Internal(format!("{}: {}", context, other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_staging_usage_is_host_visible() {
        let usage = BufferUsage::MAP_WRITE | BufferUsage::COPY_SRC;
        assert_eq!(memory_location(usage), MemoryLocation::CpuToGpu);
        assert_eq!(
            convert_buffer_usage(usage),
            vk::BufferUsageFlags::TRANSFER_SRC
        );

        let arena = BufferUsage::VERTEX | BufferUsage::INDEX | BufferUsage::COPY_DST;
        assert_eq!(memory_location(arena), MemoryLocation::GpuOnly);
    }

    #[test]
    fn test_error_mapping() {
        assert_eq!(
            map_vk_error("present", vk::Result::ERROR_OUT_OF_DATE_KHR),
            BackendError::SurfaceOutOfDate
        );
        assert_eq!(
            map_vk_error("submit", vk::Result::ERROR_DEVICE_LOST),
            BackendError::DeviceLost
        );
        assert_eq!(
            map_vk_error("alloc", vk::Result::ERROR_OUT_OF_DEVICE_MEMORY),
            BackendError::OutOfMemory
        );
    }
}
