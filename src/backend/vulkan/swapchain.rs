//! Vulkan swapchain and per-image views.

use ash::vk;

use crate::error::{BackendError, BackendResult};

/// Swapchain images and their color views.
pub struct VulkanSwapchain {
    pub swapchain: vk::SwapchainKHR,
    pub images: Vec<vk::Image>,
    pub image_views: Vec<vk::ImageView>,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
}

/// Everything swapchain creation reads from the backend.
pub struct SwapchainContext<'a> {
    pub device: &'a ash::Device,
    pub surface_fn: &'a ash::khr::surface::Instance,
    pub swapchain_fn: &'a ash::khr::swapchain::Device,
    pub physical_device: vk::PhysicalDevice,
    pub surface: vk::SurfaceKHR,
    pub vsync: bool,
}

impl VulkanSwapchain {
    /// Create a swapchain of `width` x `height` (clamped to the surface
    /// limits). `old` is handed to the driver for resource reuse; the caller
    /// destroys it afterwards.
    pub fn new(
        ctx: &SwapchainContext<'_>,
        width: u32,
        height: u32,
        old: vk::SwapchainKHR,
    ) -> BackendResult<Self> {
        let capabilities = unsafe {
            ctx.surface_fn
                .get_physical_device_surface_capabilities(ctx.physical_device, ctx.surface)
        }
        .map_err(|e| creation_failed("query surface capabilities", e))?;

        let formats = unsafe {
            ctx.surface_fn
                .get_physical_device_surface_formats(ctx.physical_device, ctx.surface)
        }
        .map_err(|e| creation_failed("query surface formats", e))?;

        let present_modes = unsafe {
            ctx.surface_fn
                .get_physical_device_surface_present_modes(ctx.physical_device, ctx.surface)
        }
        .map_err(|e| creation_failed("query present modes", e))?;

        // Prefer sRGB
        let surface_format = formats
            .iter()
            .find(|f| {
                f.format == vk::Format::B8G8R8A8_SRGB
                    && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
            })
            .or_else(|| formats.first())
            .copied()
            .ok_or_else(|| {
                BackendError::SwapchainCreationFailed("Surface reports no formats".to_string())
            })?;

        let present_mode = if ctx.vsync {
            vk::PresentModeKHR::FIFO
        } else {
            present_modes
                .iter()
                .copied()
                .find(|&m| m == vk::PresentModeKHR::MAILBOX)
                .unwrap_or(vk::PresentModeKHR::FIFO)
        };

        let extent = if capabilities.current_extent.width != u32::MAX {
            capabilities.current_extent
        } else {
            vk::Extent2D {
                width: width.clamp(
                    capabilities.min_image_extent.width,
                    capabilities.max_image_extent.width,
                ),
                height: height.clamp(
                    capabilities.min_image_extent.height,
                    capabilities.max_image_extent.height,
                ),
            }
        };
        if extent.width == 0 || extent.height == 0 {
            return Err(BackendError::SwapchainCreationFailed(
                "Surface has zero extent".to_string(),
            ));
        }

        // Prefer triple buffering
        let image_count = (capabilities.min_image_count + 1).min(
            if capabilities.max_image_count > 0 {
                capabilities.max_image_count
            } else {
                u32::MAX
            },
        );

        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(ctx.surface)
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(old);

        let swapchain = unsafe { ctx.swapchain_fn.create_swapchain(&create_info, None) }
            .map_err(|e| creation_failed("create swapchain", e))?;

        let images = match unsafe { ctx.swapchain_fn.get_swapchain_images(swapchain) } {
            Ok(images) => images,
            Err(e) => {
                unsafe { ctx.swapchain_fn.destroy_swapchain(swapchain, None) };
                return Err(creation_failed("get swapchain images", e));
            }
        };

        let mut image_views = Vec::with_capacity(images.len());
        for &image in &images {
            let view_info = vk::ImageViewCreateInfo::default()
                .image(image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(surface_format.format)
                .subresource_range(color_subresource_range());
            match unsafe { ctx.device.create_image_view(&view_info, None) } {
                Ok(view) => image_views.push(view),
                Err(e) => {
                    unsafe {
                        for view in image_views {
                            ctx.device.destroy_image_view(view, None);
                        }
                        ctx.swapchain_fn.destroy_swapchain(swapchain, None);
                    }
                    return Err(creation_failed("create swapchain image view", e));
                }
            }
        }

        log::info!(
            "Created swapchain {}x{} ({:?}, {:?}, {} images)",
            extent.width,
            extent.height,
            surface_format.format,
            present_mode,
            images.len()
        );

        Ok(Self {
            swapchain,
            images,
            image_views,
            format: surface_format.format,
            extent,
        })
    }

    /// Destroy the views and the swapchain. The device must be idle.
    pub fn destroy(&mut self, device: &ash::Device, swapchain_fn: &ash::khr::swapchain::Device) {
        unsafe {
            for view in self.image_views.drain(..) {
                device.destroy_image_view(view, None);
            }
            if self.swapchain != vk::SwapchainKHR::null() {
                swapchain_fn.destroy_swapchain(self.swapchain, None);
                self.swapchain = vk::SwapchainKHR::null();
            }
        }
        self.images.clear();
    }
}

pub fn color_subresource_range() -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask: vk::ImageAspectFlags::COLOR,
        base_mip_level: 0,
        level_count: 1,
        base_array_layer: 0,
        layer_count: 1,
    }
}

fn creation_failed(what: &str, result: vk::Result) -> BackendError {
    BackendError::SwapchainCreationFailed(format!("Failed to {}: {:?}", what, result))
}
