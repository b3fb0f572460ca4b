//! Vulkan validation-layer debug messenger
//!
//! Only compiled with the `vulkan-validation` feature. Validation messages
//! are routed through the engine logging system so they interleave with
//! normal engine output.

use std::ffi::CStr;

use ash::vk;

use nova_3d_engine::nova3d::{Error, Result};
use nova_3d_engine::{engine_debug, engine_error, engine_info, engine_warn};

/// Create the debug-utils messenger reporting warnings and errors.
pub(crate) fn create_messenger(
    entry: &ash::Entry,
    instance: &ash::Instance,
) -> Result<(ash::ext::debug_utils::Instance, vk::DebugUtilsMessengerEXT)> {
    let loader = ash::ext::debug_utils::Instance::new(entry, instance);

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
        .pfn_user_callback(Some(vulkan_debug_callback));

    let messenger = unsafe {
        loader
            .create_debug_utils_messenger(&create_info, None)
            .map_err(|e| {
                engine_error!(
                    "nova3d::vulkan",
                    "Failed to create debug messenger: {:?}",
                    e
                );
                Error::InitializationFailed(format!("Failed to create debug messenger: {:?}", e))
            })?
    };

    engine_info!("nova3d::vulkan", "Validation layer messenger installed");
    Ok((loader, messenger))
}

/// Callback invoked by the validation layers.
unsafe extern "system" fn vulkan_debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    if callback_data.is_null() {
        return vk::FALSE;
    }
    let data = unsafe { &*callback_data };
    let message = if data.p_message.is_null() {
        String::new()
    } else {
        unsafe { CStr::from_ptr(data.p_message) }
            .to_string_lossy()
            .into_owned()
    };

    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        engine_error!("nova3d::vulkan::validation", "[{:?}] {}", message_type, message);
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        engine_warn!("nova3d::vulkan::validation", "[{:?}] {}", message_type, message);
    } else {
        engine_debug!("nova3d::vulkan::validation", "[{:?}] {}", message_type, message);
    }

    vk::FALSE
}
