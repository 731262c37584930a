//! Vulkan instance creation.

use std::ffi::CStr;

use ash::vk;
use raw_window_handle::RawDisplayHandle;

use super::conversion::map_vk_error;
use super::debug;
use crate::error::{BackendError, BackendResult};

/// Dynamic rendering is core in Vulkan 1.3.
pub const REQUIRED_API_VERSION: u32 = vk::API_VERSION_1_3;

const VALIDATION_LAYER_NAME: &CStr = c"VK_LAYER_KHRONOS_validation";
const APPLICATION_NAME: &CStr = c"Geometry Engine";

/// Debug messenger and the extension loader that owns it.
pub struct DebugMessenger {
    pub utils: ash::ext::debug_utils::Instance,
    pub messenger: vk::DebugUtilsMessengerEXT,
}

/// Create an instance with the surface extensions `display` needs and, when
/// requested and installed, the Khronos validation layer.
pub fn create_instance(
    entry: &ash::Entry,
    display: RawDisplayHandle,
    validation_enabled: bool,
) -> BackendResult<(ash::Instance, Option<DebugMessenger>)> {
    let validation_available = validation_enabled && check_validation_layer_support(entry);
    if validation_enabled && !validation_available {
        log::warn!("Validation layers requested but not available");
    }

    let app_info = vk::ApplicationInfo::default()
        .application_name(APPLICATION_NAME)
        .application_version(vk::make_api_version(0, 0, 1, 0))
        .engine_name(APPLICATION_NAME)
        .engine_version(vk::make_api_version(0, 0, 1, 0))
        .api_version(REQUIRED_API_VERSION);

    let mut extensions = ash_window::enumerate_required_extensions(display)
        .map_err(|e| {
            BackendError::InitializationFailed(format!(
                "Failed to query surface extensions: {:?}",
                e
            ))
        })?
        .to_vec();
    if validation_available {
        extensions.push(ash::ext::debug_utils::NAME.as_ptr());
    }

    let layer_names = if validation_available {
        vec![VALIDATION_LAYER_NAME.as_ptr()]
    } else {
        vec![]
    };

    let create_info = vk::InstanceCreateInfo::default()
        .application_info(&app_info)
        .enabled_extension_names(&extensions)
        .enabled_layer_names(&layer_names);

    let instance = unsafe { entry.create_instance(&create_info, None) }.map_err(|e| {
        BackendError::InitializationFailed(format!("Failed to create Vulkan instance: {:?}", e))
    })?;

    let debug = if validation_available {
        let utils = ash::ext::debug_utils::Instance::new(entry, &instance);
        match debug::create_debug_messenger(&utils) {
            Ok(messenger) => Some(DebugMessenger { utils, messenger }),
            Err(e) => {
                log::warn!("Validation output unavailable: {}", e);
                None
            }
        }
    } else {
        None
    };

    Ok((instance, debug))
}

fn check_validation_layer_support(entry: &ash::Entry) -> bool {
    let available_layers = match unsafe { entry.enumerate_instance_layer_properties() } {
        Ok(layers) => layers,
        Err(e) => {
            log::debug!("{}", map_vk_error("Failed to enumerate layers", e));
            return false;
        }
    };

    available_layers.iter().any(|layer| {
        // SAFETY: layer_name is a null-terminated array filled by the loader
        let name = unsafe { CStr::from_ptr(layer.layer_name.as_ptr()) };
        name == VALIDATION_LAYER_NAME
    })
}
