//! Validation layer output routed into `log`.

use std::borrow::Cow;
use std::ffi::{c_void, CStr};

use ash::vk;

use super::conversion::map_vk_error;
use crate::error::BackendResult;

/// Create a messenger forwarding warnings and errors (and info at debug
/// level) from the validation layer.
pub fn create_debug_messenger(
    debug_utils: &ash::ext::debug_utils::Instance,
) -> BackendResult<vk::DebugUtilsMessengerEXT> {
    let create_info = vk::DebugUtilsMessengerCreateInfoEXT::default()
        .message_severity(
            vk::DebugUtilsMessageSeverityFlagsEXT::ERROR
                | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                | vk::DebugUtilsMessageSeverityFlagsEXT::INFO,
        )
        .message_type(
            vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        )
        .pfn_user_callback(Some(forward_to_log));

    unsafe { debug_utils.create_debug_utils_messenger(&create_info, None) }
        .map_err(|e| map_vk_error("Failed to create debug messenger", e))
}

fn log_level(severity: vk::DebugUtilsMessageSeverityFlagsEXT) -> log::Level {
    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        log::Level::Error
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        log::Level::Warn
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO) {
        log::Level::Debug
    } else {
        log::Level::Trace
    }
}

/// # Safety
/// Non-null string pointers must be null-terminated and outlive the call.
unsafe fn c_str<'a>(ptr: *const std::ffi::c_char, fallback: &'a str) -> Cow<'a, str> {
    if ptr.is_null() {
        Cow::Borrowed(fallback)
    } else {
        CStr::from_ptr(ptr).to_string_lossy()
    }
}

unsafe extern "system" fn forward_to_log(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    kind: vk::DebugUtilsMessageTypeFlagsEXT,
    callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _user_data: *mut c_void,
) -> vk::Bool32 {
    let level = log_level(severity);
    if !log::log_enabled!(target: "vulkan", level) || callback_data.is_null() {
        return vk::FALSE;
    }

    // SAFETY: the driver keeps callback data alive for the duration of the call
    let data = &*callback_data;
    let id = c_str(data.p_message_id_name, "-");
    let message = c_str(data.p_message, "(no message)");
    log::log!(target: "vulkan", level, "[{:?}] {}: {}", kind, id, message);

    vk::FALSE
}
