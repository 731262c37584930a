//! Vulkan backend implementation using ash
//!
//! This backend provides direct Vulkan API access:
//! - Vulkan 1.3 dynamic rendering for the frame pass
//! - gpu-allocator for memory management (`CpuToGpu` staging, `GpuOnly`
//!   device-local buffers and images)
//! - Validation layer output routed through `log`
//!
//! Objects are exposed as opaque ids. The queue and the command pool are
//! externally synchronized objects in Vulkan and sit behind their own locks.
//! Lock order is resources, then swapchain, then queue.

mod conversion;
mod debug;
mod device;
mod instance;
mod swapchain;

use std::collections::HashMap;
use std::mem::ManuallyDrop;
use std::sync::Arc;
use std::time::Duration;

use ash::vk;
use gpu_allocator::vulkan::{
    Allocation, AllocationCreateDesc, AllocationScheme, Allocator, AllocatorCreateDesc,
};
use gpu_allocator::MemoryLocation;
use parking_lot::Mutex;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use winit::window::Window;

use self::conversion::{
    convert_buffer_usage, convert_pipeline_stage, convert_texture_format, convert_viewport,
    map_allocation_error, map_vk_error, memory_location,
};
use self::instance::DebugMessenger;
use self::swapchain::{color_subresource_range, SwapchainContext, VulkanSwapchain};
use crate::backend::traits::GraphicsBackend;
use crate::backend::types::*;
use crate::error::{BackendError, BackendResult};

struct VkBuffer {
    buffer: vk::Buffer,
    allocation: Allocation,
    size: u64,
}

struct VkTexture {
    image: vk::Image,
    allocation: Allocation,
}

struct VkPipeline {
    pipeline: vk::Pipeline,
    layout: vk::PipelineLayout,
}

#[derive(Default)]
struct VulkanResources {
    next_id: u64,
    buffers: HashMap<u64, VkBuffer>,
    textures: HashMap<u64, VkTexture>,
    command_buffers: HashMap<u64, vk::CommandBuffer>,
    fences: HashMap<u64, vk::Fence>,
    semaphores: HashMap<u64, vk::Semaphore>,
    pipelines: HashMap<u64, VkPipeline>,
}

impl VulkanResources {
    fn alloc_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn buffer(&self, handle: BufferHandle) -> BackendResult<&VkBuffer> {
        self.buffers.get(&handle.0).ok_or(BackendError::InvalidHandle {
            kind: "buffer",
            id: handle.0,
        })
    }

    fn image(&self, handle: TextureHandle) -> BackendResult<vk::Image> {
        self.textures
            .get(&handle.0)
            .map(|t| t.image)
            .ok_or(BackendError::InvalidHandle {
                kind: "texture",
                id: handle.0,
            })
    }

    fn command_buffer(&self, handle: CommandBufferHandle) -> BackendResult<vk::CommandBuffer> {
        self.command_buffers
            .get(&handle.0)
            .copied()
            .ok_or(BackendError::InvalidHandle {
                kind: "command buffer",
                id: handle.0,
            })
    }

    fn fence(&self, handle: FenceHandle) -> BackendResult<vk::Fence> {
        self.fences
            .get(&handle.0)
            .copied()
            .ok_or(BackendError::InvalidHandle {
                kind: "fence",
                id: handle.0,
            })
    }

    fn semaphore(&self, handle: SemaphoreHandle) -> BackendResult<vk::Semaphore> {
        self.semaphores
            .get(&handle.0)
            .copied()
            .ok_or(BackendError::InvalidHandle {
                kind: "semaphore",
                id: handle.0,
            })
    }
}

/// Vulkan implementation of [`GraphicsBackend`] presenting to a winit window.
pub struct VulkanBackend {
    entry: ash::Entry,
    instance: ash::Instance,
    debug: Option<DebugMessenger>,
    surface_fn: ash::khr::surface::Instance,
    surface: vk::SurfaceKHR,
    physical_device: vk::PhysicalDevice,
    device: ash::Device,
    swapchain_fn: ash::khr::swapchain::Device,
    queue_family: u32,
    queue: Mutex<vk::Queue>,
    command_pool: Mutex<vk::CommandPool>,
    allocator: ManuallyDrop<Mutex<Allocator>>,
    resources: Mutex<VulkanResources>,
    swapchain: Mutex<VulkanSwapchain>,
    vsync: bool,
    _window: Arc<Window>,
}

impl VulkanBackend {
    /// Initialize Vulkan for `window`: instance, surface, device, allocator,
    /// command pool and a swapchain matching the window size.
    pub fn new(window: Arc<Window>, vsync: bool, validation: bool) -> BackendResult<Self> {
        let entry = unsafe { ash::Entry::load() }.map_err(|e| {
            BackendError::InitializationFailed(format!("Failed to load Vulkan library: {}", e))
        })?;

        let display = window
            .display_handle()
            .map_err(|e| BackendError::SurfaceCreationFailed(e.to_string()))?
            .as_raw();
        let window_handle = window
            .window_handle()
            .map_err(|e| BackendError::SurfaceCreationFailed(e.to_string()))?
            .as_raw();

        let (instance, debug) = instance::create_instance(&entry, display, validation)?;
        let surface_fn = ash::khr::surface::Instance::new(&entry, &instance);

        let surface = match unsafe {
            ash_window::create_surface(&entry, &instance, display, window_handle, None)
        } {
            Ok(surface) => surface,
            Err(e) => {
                unsafe { destroy_instance(&instance, debug.as_ref()) };
                return Err(BackendError::SurfaceCreationFailed(format!(
                    "Failed to create Vulkan surface: {:?}",
                    e
                )));
            }
        };

        let device_result = device::select_physical_device(&instance, &surface_fn, surface)
            .and_then(|(physical_device, queue_family)| {
                device::create_logical_device(&instance, physical_device, queue_family)
                    .map(|device| (physical_device, queue_family, device))
            });
        let (physical_device, queue_family, device) = match device_result {
            Ok(selected) => selected,
            Err(e) => {
                unsafe {
                    surface_fn.destroy_surface(surface, None);
                    destroy_instance(&instance, debug.as_ref());
                }
                return Err(e);
            }
        };

        let swapchain_fn = ash::khr::swapchain::Device::new(&instance, &device);
        let queue = unsafe { device.get_device_queue(queue_family, 0) };

        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.clone(),
            device: device.clone(),
            physical_device,
            debug_settings: Default::default(),
            buffer_device_address: false,
            allocation_sizes: gpu_allocator::AllocationSizes::default(),
        });
        let allocator = match allocator {
            Ok(allocator) => allocator,
            Err(e) => {
                unsafe {
                    device.destroy_device(None);
                    surface_fn.destroy_surface(surface, None);
                    destroy_instance(&instance, debug.as_ref());
                }
                return Err(BackendError::InitializationFailed(format!(
                    "Failed to create memory allocator: {}",
                    e
                )));
            }
        };

        let pool_info = vk::CommandPoolCreateInfo::default()
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .queue_family_index(queue_family);
        let command_pool = match unsafe { device.create_command_pool(&pool_info, None) } {
            Ok(pool) => pool,
            Err(e) => {
                drop(allocator);
                unsafe {
                    device.destroy_device(None);
                    surface_fn.destroy_surface(surface, None);
                    destroy_instance(&instance, debug.as_ref());
                }
                return Err(map_vk_error("Failed to create command pool", e));
            }
        };

        let size = window.inner_size();
        let ctx = SwapchainContext {
            device: &device,
            surface_fn: &surface_fn,
            swapchain_fn: &swapchain_fn,
            physical_device,
            surface,
            vsync,
        };
        let swapchain = match VulkanSwapchain::new(
            &ctx,
            size.width.max(1),
            size.height.max(1),
            vk::SwapchainKHR::null(),
        ) {
            Ok(swapchain) => swapchain,
            Err(e) => {
                drop(allocator);
                unsafe {
                    device.destroy_command_pool(command_pool, None);
                    device.destroy_device(None);
                    surface_fn.destroy_surface(surface, None);
                    destroy_instance(&instance, debug.as_ref());
                }
                return Err(e);
            }
        };

        log::info!("Vulkan backend initialized (vsync: {})", vsync);

        Ok(Self {
            entry,
            instance,
            debug,
            surface_fn,
            surface,
            physical_device,
            device,
            swapchain_fn,
            queue_family,
            queue: Mutex::new(queue),
            command_pool: Mutex::new(command_pool),
            allocator: ManuallyDrop::new(Mutex::new(allocator)),
            resources: Mutex::new(VulkanResources::default()),
            swapchain: Mutex::new(swapchain),
            vsync,
            _window: window,
        })
    }

    pub fn entry(&self) -> &ash::Entry {
        &self.entry
    }

    pub fn instance(&self) -> &ash::Instance {
        &self.instance
    }

    pub fn device(&self) -> &ash::Device {
        &self.device
    }

    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    pub fn queue_family(&self) -> u32 {
        self.queue_family
    }

    /// Format of the swapchain images, for building compatible pipelines.
    pub fn swapchain_format(&self) -> vk::Format {
        self.swapchain.lock().format
    }

    /// Take ownership of a graphics pipeline built by the caller so it can be
    /// bound through [`GraphicsBackend::cmd_bind_pipeline`]. Both objects are
    /// destroyed with the backend.
    pub fn register_pipeline(
        &self,
        pipeline: vk::Pipeline,
        layout: vk::PipelineLayout,
    ) -> PipelineHandle {
        let mut resources = self.resources.lock();
        let id = resources.alloc_id();
        resources
            .pipelines
            .insert(id, VkPipeline { pipeline, layout });
        PipelineHandle(id)
    }

    fn swapchain_context(&self) -> SwapchainContext<'_> {
        SwapchainContext {
            device: &self.device,
            surface_fn: &self.surface_fn,
            swapchain_fn: &self.swapchain_fn,
            physical_device: self.physical_device,
            surface: self.surface,
            vsync: self.vsync,
        }
    }

    fn command_buffer(&self, cmd: CommandBufferHandle) -> BackendResult<vk::CommandBuffer> {
        self.resources.lock().command_buffer(cmd)
    }

    fn allocate(
        &self,
        name: &str,
        requirements: vk::MemoryRequirements,
        location: MemoryLocation,
        linear: bool,
    ) -> BackendResult<Allocation> {
        self.allocator
            .lock()
            .allocate(&AllocationCreateDesc {
                name,
                requirements,
                location,
                linear,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })
            .map_err(|e| map_allocation_error("Failed to allocate memory", e))
    }

    fn free(&self, allocation: Allocation) {
        if let Err(e) = self.allocator.lock().free(allocation) {
            log::error!("Failed to free allocation: {}", e);
        }
    }
}

/// Destroy the debug messenger and the instance.
///
/// # Safety
/// Every object created from `instance` must already be destroyed.
unsafe fn destroy_instance(instance: &ash::Instance, debug: Option<&DebugMessenger>) {
    if let Some(debug) = debug {
        debug
            .utils
            .destroy_debug_utils_messenger(debug.messenger, None);
    }
    instance.destroy_instance(None);
}

impl Drop for VulkanBackend {
    fn drop(&mut self) {
        unsafe {
            if let Err(e) = self.device.device_wait_idle() {
                log::error!("device wait idle failed during Vulkan teardown: {:?}", e);
            }

            let resources = self.resources.get_mut();
            let allocator = self.allocator.get_mut();
            for (_, buffer) in resources.buffers.drain() {
                self.device.destroy_buffer(buffer.buffer, None);
                if let Err(e) = allocator.free(buffer.allocation) {
                    log::error!("Failed to free buffer memory: {}", e);
                }
            }
            for (_, texture) in resources.textures.drain() {
                self.device.destroy_image(texture.image, None);
                if let Err(e) = allocator.free(texture.allocation) {
                    log::error!("Failed to free image memory: {}", e);
                }
            }
            for (_, pipeline) in resources.pipelines.drain() {
                self.device.destroy_pipeline(pipeline.pipeline, None);
                self.device.destroy_pipeline_layout(pipeline.layout, None);
            }
            for (_, fence) in resources.fences.drain() {
                self.device.destroy_fence(fence, None);
            }
            for (_, semaphore) in resources.semaphores.drain() {
                self.device.destroy_semaphore(semaphore, None);
            }
            // Freed with the pool
            resources.command_buffers.clear();

            self.swapchain
                .get_mut()
                .destroy(&self.device, &self.swapchain_fn);
            self.device
                .destroy_command_pool(*self.command_pool.get_mut(), None);

            // Allocator before device
            ManuallyDrop::drop(&mut self.allocator);

            self.device.destroy_device(None);
            self.surface_fn.destroy_surface(self.surface, None);
            destroy_instance(&self.instance, self.debug.as_ref());
        }
        log::info!("Vulkan backend destroyed");
    }
}

impl GraphicsBackend for VulkanBackend {
    fn name(&self) -> &'static str {
        "Vulkan Backend (ash)"
    }

    fn create_buffer(&self, desc: &BufferDescriptor) -> BackendResult<BufferHandle> {
        if desc.size == 0 {
            return Err(BackendError::BufferCreationFailed(
                "buffer size must be non-zero".to_string(),
            ));
        }

        let buffer_info = vk::BufferCreateInfo::default()
            .size(desc.size)
            .usage(convert_buffer_usage(desc.usage))
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let buffer = unsafe { self.device.create_buffer(&buffer_info, None) }.map_err(|e| {
            BackendError::BufferCreationFailed(format!("Failed to create buffer: {:?}", e))
        })?;

        let requirements = unsafe { self.device.get_buffer_memory_requirements(buffer) };
        let name = desc.label.as_deref().unwrap_or("buffer");
        let allocation =
            match self.allocate(name, requirements, memory_location(desc.usage), true) {
                Ok(allocation) => allocation,
                Err(e) => {
                    unsafe { self.device.destroy_buffer(buffer, None) };
                    return Err(e);
                }
            };

        if let Err(e) = unsafe {
            self.device
                .bind_buffer_memory(buffer, allocation.memory(), allocation.offset())
        } {
            self.free(allocation);
            unsafe { self.device.destroy_buffer(buffer, None) };
            return Err(map_vk_error("Failed to bind buffer memory", e));
        }

        let mut resources = self.resources.lock();
        let id = resources.alloc_id();
        resources.buffers.insert(
            id,
            VkBuffer {
                buffer,
                allocation,
                size: desc.size,
            },
        );
        log::trace!(
            "VulkanBackend: created buffer {} '{}' ({} bytes, {:?})",
            id,
            name,
            desc.size,
            desc.usage
        );
        Ok(BufferHandle(id))
    }

    fn write_buffer(&self, buffer: BufferHandle, offset: u64, data: &[u8]) -> BackendResult<()> {
        let mut resources = self.resources.lock();
        let entry = resources
            .buffers
            .get_mut(&buffer.0)
            .ok_or(BackendError::InvalidHandle {
                kind: "buffer",
                id: buffer.0,
            })?;
        let end = offset + data.len() as u64;
        if end > entry.size {
            return Err(BackendError::InvalidUsage(format!(
                "write of {} bytes at offset {} overruns buffer {} ({} bytes)",
                data.len(),
                offset,
                buffer.0,
                entry.size
            )));
        }
        let mapped = entry.allocation.mapped_slice_mut().ok_or_else(|| {
            BackendError::InvalidUsage(format!("buffer {} is not host visible", buffer.0))
        })?;
        mapped[offset as usize..end as usize].copy_from_slice(data);
        Ok(())
    }

    fn read_buffer(&self, buffer: BufferHandle, offset: u64, size: u64) -> BackendResult<Vec<u8>> {
        let resources = self.resources.lock();
        let entry = resources.buffer(buffer)?;
        let end = offset + size;
        if end > entry.size {
            return Err(BackendError::InvalidUsage(format!(
                "read of {} bytes at offset {} overruns buffer {} ({} bytes)",
                size, offset, buffer.0, entry.size
            )));
        }
        let mapped = entry.allocation.mapped_slice().ok_or_else(|| {
            BackendError::InvalidUsage(format!("buffer {} is not host visible", buffer.0))
        })?;
        Ok(mapped[offset as usize..end as usize].to_vec())
    }

    fn destroy_buffer(&self, buffer: BufferHandle) {
        let removed = self.resources.lock().buffers.remove(&buffer.0);
        if let Some(entry) = removed {
            unsafe { self.device.destroy_buffer(entry.buffer, None) };
            self.free(entry.allocation);
        }
    }

    fn create_texture(&self, desc: &TextureDescriptor) -> BackendResult<TextureHandle> {
        if desc.extent.is_empty() {
            return Err(BackendError::TextureCreationFailed(format!(
                "invalid extent {}x{}",
                desc.extent.width, desc.extent.height
            )));
        }

        let image_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(convert_texture_format(desc.format))
            .extent(vk::Extent3D {
                width: desc.extent.width,
                height: desc.extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);
        let image = unsafe { self.device.create_image(&image_info, None) }.map_err(|e| {
            BackendError::TextureCreationFailed(format!("Failed to create image: {:?}", e))
        })?;

        let requirements = unsafe { self.device.get_image_memory_requirements(image) };
        let name = desc.label.as_deref().unwrap_or("texture");
        let allocation = match self.allocate(name, requirements, MemoryLocation::GpuOnly, false) {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { self.device.destroy_image(image, None) };
                return Err(e);
            }
        };

        if let Err(e) = unsafe {
            self.device
                .bind_image_memory(image, allocation.memory(), allocation.offset())
        } {
            self.free(allocation);
            unsafe { self.device.destroy_image(image, None) };
            return Err(map_vk_error("Failed to bind image memory", e));
        }

        let mut resources = self.resources.lock();
        let id = resources.alloc_id();
        resources.textures.insert(id, VkTexture { image, allocation });
        log::trace!(
            "VulkanBackend: created texture {} '{}' ({}x{} {:?})",
            id,
            name,
            desc.extent.width,
            desc.extent.height,
            desc.format
        );
        Ok(TextureHandle(id))
    }

    fn destroy_texture(&self, texture: TextureHandle) {
        let removed = self.resources.lock().textures.remove(&texture.0);
        if let Some(entry) = removed {
            unsafe { self.device.destroy_image(entry.image, None) };
            self.free(entry.allocation);
        }
    }

    fn allocate_command_buffer(&self) -> BackendResult<CommandBufferHandle> {
        let pool = self.command_pool.lock();
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(*pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let buffers = unsafe { self.device.allocate_command_buffers(&alloc_info) }
            .map_err(|e| map_vk_error("Failed to allocate command buffer", e))?;
        let cmd = buffers.first().copied().ok_or_else(|| {
            BackendError::Internal("driver returned no command buffer".to_string())
        })?;

        let mut resources = self.resources.lock();
        let id = resources.alloc_id();
        resources.command_buffers.insert(id, cmd);
        Ok(CommandBufferHandle(id))
    }

    fn free_command_buffer(&self, cmd: CommandBufferHandle) {
        let removed = self.resources.lock().command_buffers.remove(&cmd.0);
        if let Some(buffer) = removed {
            let pool = self.command_pool.lock();
            unsafe { self.device.free_command_buffers(*pool, &[buffer]) };
        }
    }

    fn reset_command_buffer(&self, cmd: CommandBufferHandle) -> BackendResult<()> {
        let buffer = self.command_buffer(cmd)?;
        unsafe {
            self.device
                .reset_command_buffer(buffer, vk::CommandBufferResetFlags::empty())
        }
        .map_err(|e| map_vk_error("Failed to reset command buffer", e))
    }

    fn begin_command_buffer(
        &self,
        cmd: CommandBufferHandle,
        usage: CommandBufferUsage,
    ) -> BackendResult<()> {
        let buffer = self.command_buffer(cmd)?;
        let flags = match usage {
            CommandBufferUsage::OneTimeSubmit => vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT,
            CommandBufferUsage::Reusable => vk::CommandBufferUsageFlags::empty(),
        };
        let begin_info = vk::CommandBufferBeginInfo::default().flags(flags);
        unsafe { self.device.begin_command_buffer(buffer, &begin_info) }
            .map_err(|e| map_vk_error("Failed to begin command buffer", e))
    }

    fn end_command_buffer(&self, cmd: CommandBufferHandle) -> BackendResult<()> {
        let buffer = self.command_buffer(cmd)?;
        unsafe { self.device.end_command_buffer(buffer) }
            .map_err(|e| map_vk_error("Failed to end command buffer", e))
    }

    fn cmd_copy_buffer(
        &self,
        cmd: CommandBufferHandle,
        src: BufferHandle,
        dst: BufferHandle,
        regions: &[BufferCopyRegion],
    ) -> BackendResult<()> {
        let (buffer, src_buffer, dst_buffer) = {
            let resources = self.resources.lock();
            (
                resources.command_buffer(cmd)?,
                resources.buffer(src)?.buffer,
                resources.buffer(dst)?.buffer,
            )
        };
        let copies: Vec<vk::BufferCopy> = regions
            .iter()
            .map(|r| vk::BufferCopy {
                src_offset: r.src_offset,
                dst_offset: r.dst_offset,
                size: r.size,
            })
            .collect();
        unsafe {
            self.device
                .cmd_copy_buffer(buffer, src_buffer, dst_buffer, &copies)
        };
        Ok(())
    }

    fn cmd_copy_buffer_to_texture(
        &self,
        cmd: CommandBufferHandle,
        src: BufferHandle,
        src_offset: u64,
        dst: TextureHandle,
        extent: Extent2d,
    ) -> BackendResult<()> {
        let (buffer, src_buffer, image) = {
            let resources = self.resources.lock();
            (
                resources.command_buffer(cmd)?,
                resources.buffer(src)?.buffer,
                resources.image(dst)?,
            )
        };

        let to_transfer = vk::ImageMemoryBarrier::default()
            .old_layout(vk::ImageLayout::UNDEFINED)
            .new_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(image)
            .subresource_range(color_subresource_range())
            .src_access_mask(vk::AccessFlags::empty())
            .dst_access_mask(vk::AccessFlags::TRANSFER_WRITE);

        let region = vk::BufferImageCopy::default()
            .buffer_offset(src_offset)
            .buffer_row_length(0)
            .buffer_image_height(0)
            .image_subresource(vk::ImageSubresourceLayers {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                mip_level: 0,
                base_array_layer: 0,
                layer_count: 1,
            })
            .image_offset(vk::Offset3D { x: 0, y: 0, z: 0 })
            .image_extent(vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            });

        let to_shader_read = vk::ImageMemoryBarrier::default()
            .old_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
            .new_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(image)
            .subresource_range(color_subresource_range())
            .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
            .dst_access_mask(vk::AccessFlags::SHADER_READ);

        unsafe {
            self.device.cmd_pipeline_barrier(
                buffer,
                vk::PipelineStageFlags::TOP_OF_PIPE,
                vk::PipelineStageFlags::TRANSFER,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[to_transfer],
            );
            self.device.cmd_copy_buffer_to_image(
                buffer,
                src_buffer,
                image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
            );
            self.device.cmd_pipeline_barrier(
                buffer,
                vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::FRAGMENT_SHADER,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[to_shader_read],
            );
        }
        Ok(())
    }

    fn cmd_begin_frame_pass(
        &self,
        cmd: CommandBufferHandle,
        image_index: u32,
        clear_color: [f32; 4],
    ) -> BackendResult<()> {
        let buffer = self.command_buffer(cmd)?;
        let swapchain = self.swapchain.lock();
        let (image, view) = swapchain
            .images
            .get(image_index as usize)
            .zip(swapchain.image_views.get(image_index as usize))
            .ok_or_else(|| {
                BackendError::InvalidUsage(format!("no swapchain image {}", image_index))
            })?;

        let to_attachment = vk::ImageMemoryBarrier::default()
            .old_layout(vk::ImageLayout::UNDEFINED)
            .new_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(*image)
            .subresource_range(color_subresource_range())
            .src_access_mask(vk::AccessFlags::empty())
            .dst_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE);

        let color_attachments = [vk::RenderingAttachmentInfo::default()
            .image_view(*view)
            .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::STORE)
            .clear_value(vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: clear_color,
                },
            })];

        let rendering_info = vk::RenderingInfo::default()
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: swapchain.extent,
            })
            .layer_count(1)
            .color_attachments(&color_attachments);

        unsafe {
            self.device.cmd_pipeline_barrier(
                buffer,
                vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
                vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[to_attachment],
            );
            self.device.cmd_begin_rendering(buffer, &rendering_info);
        }
        Ok(())
    }

    fn cmd_end_frame_pass(&self, cmd: CommandBufferHandle, image_index: u32) -> BackendResult<()> {
        let buffer = self.command_buffer(cmd)?;
        let image = self
            .swapchain
            .lock()
            .images
            .get(image_index as usize)
            .copied()
            .ok_or_else(|| {
                BackendError::InvalidUsage(format!("no swapchain image {}", image_index))
            })?;

        let to_present = vk::ImageMemoryBarrier::default()
            .old_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            .new_layout(vk::ImageLayout::PRESENT_SRC_KHR)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(image)
            .subresource_range(color_subresource_range())
            .src_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE)
            .dst_access_mask(vk::AccessFlags::empty());

        unsafe {
            self.device.cmd_end_rendering(buffer);
            self.device.cmd_pipeline_barrier(
                buffer,
                vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
                vk::PipelineStageFlags::BOTTOM_OF_PIPE,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[to_present],
            );
        }
        Ok(())
    }

    fn cmd_bind_pipeline(
        &self,
        cmd: CommandBufferHandle,
        pipeline: PipelineHandle,
    ) -> BackendResult<()> {
        let (buffer, pipeline) = {
            let resources = self.resources.lock();
            let vk_pipeline = resources
                .pipelines
                .get(&pipeline.0)
                .map(|p| p.pipeline)
                .ok_or(BackendError::InvalidHandle {
                    kind: "pipeline",
                    id: pipeline.0,
                })?;
            (resources.command_buffer(cmd)?, vk_pipeline)
        };
        unsafe {
            self.device
                .cmd_bind_pipeline(buffer, vk::PipelineBindPoint::GRAPHICS, pipeline)
        };
        Ok(())
    }

    fn cmd_bind_vertex_buffer(
        &self,
        cmd: CommandBufferHandle,
        buffer: BufferHandle,
        offset: u64,
    ) -> BackendResult<()> {
        let (cmd_buffer, vertex_buffer) = {
            let resources = self.resources.lock();
            (resources.command_buffer(cmd)?, resources.buffer(buffer)?.buffer)
        };
        unsafe {
            self.device
                .cmd_bind_vertex_buffers(cmd_buffer, 0, &[vertex_buffer], &[offset])
        };
        Ok(())
    }

    fn cmd_bind_index_buffer(
        &self,
        cmd: CommandBufferHandle,
        buffer: BufferHandle,
        offset: u64,
    ) -> BackendResult<()> {
        let (cmd_buffer, index_buffer) = {
            let resources = self.resources.lock();
            (resources.command_buffer(cmd)?, resources.buffer(buffer)?.buffer)
        };
        unsafe {
            self.device.cmd_bind_index_buffer(
                cmd_buffer,
                index_buffer,
                offset,
                vk::IndexType::UINT32,
            )
        };
        Ok(())
    }

    fn cmd_set_viewport(&self, cmd: CommandBufferHandle, viewport: &Viewport) -> BackendResult<()> {
        let buffer = self.command_buffer(cmd)?;
        let scissor = vk::Rect2D {
            offset: vk::Offset2D {
                x: viewport.x.max(0.0) as i32,
                y: viewport.y.max(0.0) as i32,
            },
            extent: vk::Extent2D {
                width: viewport.width.max(0.0) as u32,
                height: viewport.height.max(0.0) as u32,
            },
        };
        unsafe {
            self.device
                .cmd_set_viewport(buffer, 0, &[convert_viewport(viewport)]);
            self.device.cmd_set_scissor(buffer, 0, &[scissor]);
        }
        Ok(())
    }

    fn cmd_draw_indexed(
        &self,
        cmd: CommandBufferHandle,
        args: &DrawIndexedArgs,
    ) -> BackendResult<()> {
        let buffer = self.command_buffer(cmd)?;
        unsafe {
            self.device.cmd_draw_indexed(
                buffer,
                args.index_count,
                args.instance_count,
                args.first_index,
                args.vertex_offset,
                args.first_instance,
            )
        };
        Ok(())
    }

    fn create_fence(&self, signaled: bool) -> BackendResult<FenceHandle> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        let fence_info = vk::FenceCreateInfo::default().flags(flags);
        let fence = unsafe { self.device.create_fence(&fence_info, None) }
            .map_err(|e| map_vk_error("Failed to create fence", e))?;

        let mut resources = self.resources.lock();
        let id = resources.alloc_id();
        resources.fences.insert(id, fence);
        Ok(FenceHandle(id))
    }

    fn wait_for_fence(&self, fence: FenceHandle) -> BackendResult<()> {
        let vk_fence = self.resources.lock().fence(fence)?;
        unsafe { self.device.wait_for_fences(&[vk_fence], true, u64::MAX) }
            .map_err(|e| map_vk_error("Failed to wait for fence", e))
    }

    fn wait_for_fence_timeout(&self, fence: FenceHandle, timeout: Duration) -> BackendResult<bool> {
        let vk_fence = self.resources.lock().fence(fence)?;
        let timeout_ns = u64::try_from(timeout.as_nanos()).unwrap_or(u64::MAX);
        match unsafe { self.device.wait_for_fences(&[vk_fence], true, timeout_ns) } {
            Ok(()) => Ok(true),
            Err(vk::Result::TIMEOUT) => Ok(false),
            Err(e) => Err(map_vk_error("Failed to wait for fence", e)),
        }
    }

    fn fence_status(&self, fence: FenceHandle) -> BackendResult<FenceStatus> {
        let vk_fence = self.resources.lock().fence(fence)?;
        match unsafe { self.device.get_fence_status(vk_fence) } {
            Ok(true) => Ok(FenceStatus::Signaled),
            Ok(false) => Ok(FenceStatus::Unsignaled),
            Err(e) => Err(map_vk_error("Failed to query fence", e)),
        }
    }

    fn reset_fence(&self, fence: FenceHandle) -> BackendResult<()> {
        let vk_fence = self.resources.lock().fence(fence)?;
        unsafe { self.device.reset_fences(&[vk_fence]) }
            .map_err(|e| map_vk_error("Failed to reset fence", e))
    }

    fn destroy_fence(&self, fence: FenceHandle) {
        if let Some(vk_fence) = self.resources.lock().fences.remove(&fence.0) {
            unsafe { self.device.destroy_fence(vk_fence, None) };
        }
    }

    fn create_semaphore(&self) -> BackendResult<SemaphoreHandle> {
        let semaphore_info = vk::SemaphoreCreateInfo::default();
        let semaphore = unsafe { self.device.create_semaphore(&semaphore_info, None) }
            .map_err(|e| map_vk_error("Failed to create semaphore", e))?;

        let mut resources = self.resources.lock();
        let id = resources.alloc_id();
        resources.semaphores.insert(id, semaphore);
        Ok(SemaphoreHandle(id))
    }

    fn destroy_semaphore(&self, semaphore: SemaphoreHandle) {
        if let Some(vk_semaphore) = self.resources.lock().semaphores.remove(&semaphore.0) {
            unsafe { self.device.destroy_semaphore(vk_semaphore, None) };
        }
    }

    fn submit(&self, info: &SubmitInfo<'_>) -> BackendResult<()> {
        let resources = self.resources.lock();

        let mut wait_semaphores = Vec::with_capacity(info.wait_semaphores.len());
        let mut wait_stages = Vec::with_capacity(info.wait_semaphores.len());
        for (semaphore, stage) in info.wait_semaphores {
            wait_semaphores.push(resources.semaphore(*semaphore)?);
            wait_stages.push(convert_pipeline_stage(*stage));
        }
        let command_buffers = info
            .command_buffers
            .iter()
            .map(|cmd| resources.command_buffer(*cmd))
            .collect::<BackendResult<Vec<_>>>()?;
        let signal_semaphores = info
            .signal_semaphores
            .iter()
            .map(|s| resources.semaphore(*s))
            .collect::<BackendResult<Vec<_>>>()?;
        let fence = match info.fence {
            Some(fence) => resources.fence(fence)?,
            None => vk::Fence::null(),
        };

        let submit_info = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        let queue = self.queue.lock();
        unsafe { self.device.queue_submit(*queue, &[submit_info], fence) }
            .map_err(|e| map_vk_error("Failed to submit command buffers", e))?;
        log::trace!(
            "VulkanBackend: submitted {} command buffer(s)",
            command_buffers.len()
        );
        Ok(())
    }

    fn queue_wait_idle(&self) -> BackendResult<()> {
        let queue = self.queue.lock();
        unsafe { self.device.queue_wait_idle(*queue) }
            .map_err(|e| map_vk_error("Failed to wait for queue idle", e))
    }

    fn device_wait_idle(&self) -> BackendResult<()> {
        let _queue = self.queue.lock();
        unsafe { self.device.device_wait_idle() }
            .map_err(|e| map_vk_error("Failed to wait for device idle", e))
    }

    fn acquire_next_image(&self, signal: SemaphoreHandle) -> BackendResult<AcquiredImage> {
        let semaphore = self.resources.lock().semaphore(signal)?;
        let swapchain = self.swapchain.lock();
        match unsafe {
            self.swapchain_fn.acquire_next_image(
                swapchain.swapchain,
                u64::MAX,
                semaphore,
                vk::Fence::null(),
            )
        } {
            Ok((image_index, suboptimal)) => Ok(AcquiredImage {
                image_index,
                suboptimal,
            }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Err(BackendError::SurfaceOutOfDate),
            Err(e) => Err(map_vk_error("Failed to acquire swapchain image", e)),
        }
    }

    fn present(&self, image_index: u32, wait: SemaphoreHandle) -> BackendResult<PresentStatus> {
        let semaphore = self.resources.lock().semaphore(wait)?;
        let swapchain = self.swapchain.lock();

        let wait_semaphores = [semaphore];
        let swapchains = [swapchain.swapchain];
        let image_indices = [image_index];
        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let queue = self.queue.lock();
        match unsafe { self.swapchain_fn.queue_present(*queue, &present_info) } {
            Ok(false) => Ok(PresentStatus::Optimal),
            Ok(true) => Ok(PresentStatus::Suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentStatus::OutOfDate),
            Err(e) => Err(map_vk_error("Failed to present", e)),
        }
    }

    fn recreate_swapchain(&self, width: u32, height: u32) -> BackendResult<()> {
        self.device_wait_idle()?;

        let mut swapchain = self.swapchain.lock();
        let replacement =
            VulkanSwapchain::new(&self.swapchain_context(), width, height, swapchain.swapchain)?;
        let mut old = std::mem::replace(&mut *swapchain, replacement);
        old.destroy(&self.device, &self.swapchain_fn);
        Ok(())
    }

    fn swapchain_extent(&self) -> Extent2d {
        let extent = self.swapchain.lock().extent;
        Extent2d::new(extent.width, extent.height)
    }

    fn swapchain_image_count(&self) -> u32 {
        self.swapchain.lock().images.len() as u32
    }
}
