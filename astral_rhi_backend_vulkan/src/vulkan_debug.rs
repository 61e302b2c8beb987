//! Vulkan validation-layer message routing
//!
//! The debug-utils callback forwards validation messages into the RHI logging
//! system so hosts see one stream. Message severity maps onto the RHI
//! severities; errors carry the validation message id.

use std::ffi::CStr;

use ash::vk;

use astral_rhi::log::{log, LogSeverity};
use astral_rhi::ValidationMode;

/// Messenger create-info for a validation mode.
///
/// `Enabled` reports warnings and errors; `Verbose` adds info and verbose
/// messages. `GpuBased` uses the same messenger, GPU-assisted validation is
/// requested through the layer settings at instance creation.
pub fn messenger_create_info(mode: ValidationMode) -> vk::DebugUtilsMessengerCreateInfoEXT<'static> {
    let mut severity = vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
        | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR;
    if mode == ValidationMode::Verbose {
        severity |= vk::DebugUtilsMessageSeverityFlagsEXT::INFO
            | vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE;
    }
    vk::DebugUtilsMessengerCreateInfoEXT::default()
        .message_severity(severity)
        .message_type(
            vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        )
        .pfn_user_callback(Some(vulkan_debug_callback))
}

/// Debug-utils callback invoked by the validation layers
pub unsafe extern "system" fn vulkan_debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user_data: *mut std::os::raw::c_void,
) -> vk::Bool32 {
    let callback_data = *p_callback_data;
    let message_id = if callback_data.p_message_id_name.is_null() {
        "Unknown"
    } else {
        CStr::from_ptr(callback_data.p_message_id_name)
            .to_str()
            .unwrap_or("Invalid UTF-8")
    };
    let message = if callback_data.p_message.is_null() {
        "No message"
    } else {
        CStr::from_ptr(callback_data.p_message)
            .to_str()
            .unwrap_or("Invalid UTF-8")
    };

    let type_str = if message_type.contains(vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION) {
        "Validation"
    } else if message_type.contains(vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE) {
        "Performance"
    } else {
        "General"
    };

    let severity = if message_severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        LogSeverity::Error
    } else if message_severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        LogSeverity::Warn
    } else if message_severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO) {
        LogSeverity::Info
    } else {
        LogSeverity::Trace
    };

    log(
        severity,
        "rhi::vulkan::validation",
        format!("[{}] {}: {}", type_str, message_id, message),
    );

    // Never abort the Vulkan call
    vk::FALSE
}
