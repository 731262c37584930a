//! Vulkan physical and logical device management.

use std::ffi::CStr;

use ash::vk;

use super::instance::REQUIRED_API_VERSION;
use crate::error::{BackendError, BackendResult};

/// Select the best physical device that can render to `surface`.
///
/// Prefers discrete GPUs over integrated GPUs. Returns the device and a
/// queue family supporting both graphics and presentation.
pub fn select_physical_device(
    instance: &ash::Instance,
    surface_fn: &ash::khr::surface::Instance,
    surface: vk::SurfaceKHR,
) -> BackendResult<(vk::PhysicalDevice, u32)> {
    let devices = unsafe { instance.enumerate_physical_devices() }.map_err(|e| {
        BackendError::InitializationFailed(format!(
            "Failed to enumerate physical devices: {:?}",
            e
        ))
    })?;

    if devices.is_empty() {
        return Err(BackendError::InitializationFailed(
            "No Vulkan-capable GPU found".to_string(),
        ));
    }

    let mut best = None;
    let mut best_score = 0;

    for device in devices {
        let properties = unsafe { instance.get_physical_device_properties(device) };
        let device_name = unsafe { CStr::from_ptr(properties.device_name.as_ptr()) };

        if properties.api_version < REQUIRED_API_VERSION {
            log::info!("Skipping GPU {:?}: Vulkan 1.3 not supported", device_name);
            continue;
        }
        let Some(queue_family) = find_queue_family(instance, device, surface_fn, surface) else {
            log::info!("Skipping GPU {:?}: cannot present to surface", device_name);
            continue;
        };

        let mut score = 1;
        if properties.device_type == vk::PhysicalDeviceType::DISCRETE_GPU {
            score += 1000;
        } else if properties.device_type == vk::PhysicalDeviceType::INTEGRATED_GPU {
            score += 100;
        }

        log::info!(
            "Found GPU: {:?} (type: {:?}, score: {})",
            device_name,
            properties.device_type,
            score
        );

        if score > best_score {
            best_score = score;
            best = Some((device, queue_family));
        }
    }

    best.ok_or_else(|| BackendError::InitializationFailed("No suitable GPU found".to_string()))
}

/// Find a queue family that supports graphics and can present to `surface`.
fn find_queue_family(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    surface_fn: &ash::khr::surface::Instance,
    surface: vk::SurfaceKHR,
) -> Option<u32> {
    let queue_families =
        unsafe { instance.get_physical_device_queue_family_properties(physical_device) };

    queue_families.iter().enumerate().find_map(|(index, family)| {
        let index = index as u32;
        let supports_graphics = family.queue_flags.contains(vk::QueueFlags::GRAPHICS);
        let supports_surface = unsafe {
            surface_fn
                .get_physical_device_surface_support(physical_device, index, surface)
                .unwrap_or(false)
        };
        (supports_graphics && supports_surface).then_some(index)
    })
}

/// Create a logical device with the swapchain extension and Vulkan 1.3
/// dynamic rendering enabled.
pub fn create_logical_device(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    queue_family: u32,
) -> BackendResult<ash::Device> {
    let queue_priorities = [1.0f32];
    let queue_create_infos = [vk::DeviceQueueCreateInfo::default()
        .queue_family_index(queue_family)
        .queue_priorities(&queue_priorities)];

    let device_extensions = [ash::khr::swapchain::NAME.as_ptr()];

    let mut vulkan_13_features =
        vk::PhysicalDeviceVulkan13Features::default().dynamic_rendering(true);

    let create_info = vk::DeviceCreateInfo::default()
        .queue_create_infos(&queue_create_infos)
        .enabled_extension_names(&device_extensions)
        .push_next(&mut vulkan_13_features);

    unsafe { instance.create_device(physical_device, &create_info, None) }.map_err(|e| {
        BackendError::DeviceCreationFailed(format!("Failed to create logical device: {:?}", e))
    })
}
