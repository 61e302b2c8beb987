//! D3D12 debug-layer message routing
//!
//! Validation messages from the info queue forward into the RHI logging
//! system so hosts see one stream. Message severity maps onto the RHI
//! severities; the category tags the message.

use std::ffi::c_void;

use windows::core::{Interface, PCSTR};
use windows::Win32::Graphics::Direct3D12::*;

use astral_rhi::log::{log, LogSeverity};
use astral_rhi::ValidationMode;

/// Enable the debug layer before device creation.
///
/// `Enabled` and `Verbose` turn on CPU validation; `GpuBased` adds
/// GPU-assisted validation through `ID3D12Debug1`. Silently does nothing
/// when the debug layer is not installed.
pub fn enable_debug_layer(mode: ValidationMode) {
    if mode == ValidationMode::Disabled {
        return;
    }
    let mut debug: Option<ID3D12Debug> = None;
    if unsafe { D3D12GetDebugInterface(&mut debug) }.is_err() {
        return;
    }
    let Some(debug) = debug else {
        return;
    };
    unsafe {
        debug.EnableDebugLayer();
    }
    if mode == ValidationMode::GpuBased {
        if let Ok(debug1) = debug.cast::<ID3D12Debug1>() {
            unsafe {
                debug1.SetEnableGPUBasedValidation(true);
            }
        }
    }
}

/// Register the info-queue callback on a freshly created device.
///
/// Returns the unregistration cookie, or `None` when the device exposes no
/// `ID3D12InfoQueue1` (debug layer disabled or too old).
pub fn register_info_queue(device: &ID3D12Device10, mode: ValidationMode) -> Option<u32> {
    if mode == ValidationMode::Disabled {
        return None;
    }
    let info_queue = device.cast::<ID3D12InfoQueue1>().ok()?;
    if mode != ValidationMode::Verbose {
        // Drop info and message chatter at the source
        let mut severities = [D3D12_MESSAGE_SEVERITY_INFO, D3D12_MESSAGE_SEVERITY_MESSAGE];
        let filter = D3D12_INFO_QUEUE_FILTER {
            DenyList: D3D12_INFO_QUEUE_FILTER_DESC {
                NumSeverities: severities.len() as u32,
                pSeverityList: severities.as_mut_ptr(),
                ..Default::default()
            },
            ..Default::default()
        };
        unsafe {
            info_queue.PushStorageFilter(&filter).ok();
        }
    }
    let mut cookie = 0u32;
    unsafe {
        info_queue
            .RegisterMessageCallback(
                Some(message_callback),
                D3D12_MESSAGE_CALLBACK_FLAG_NONE,
                std::ptr::null_mut(),
                &mut cookie,
            )
            .ok()?;
    }
    Some(cookie)
}

/// Unregister the callback before the device is released
pub fn unregister_info_queue(device: &ID3D12Device10, cookie: u32) {
    if let Ok(info_queue) = device.cast::<ID3D12InfoQueue1>() {
        unsafe {
            info_queue.UnregisterMessageCallback(cookie).ok();
        }
    }
}

/// Info-queue callback invoked by the debug layer
unsafe extern "system" fn message_callback(
    category: D3D12_MESSAGE_CATEGORY,
    severity: D3D12_MESSAGE_SEVERITY,
    _id: D3D12_MESSAGE_ID,
    description: PCSTR,
    _context: *mut c_void,
) {
    let message = if description.is_null() {
        "No message".to_string()
    } else {
        description
            .to_string()
            .unwrap_or_else(|_| "Invalid UTF-8".to_string())
    };

    let category_str = if category == D3D12_MESSAGE_CATEGORY_RESOURCE_MANIPULATION {
        "Resource"
    } else if category == D3D12_MESSAGE_CATEGORY_EXECUTION {
        "Execution"
    } else if category == D3D12_MESSAGE_CATEGORY_SHADER {
        "Shader"
    } else if category == D3D12_MESSAGE_CATEGORY_STATE_SETTING
        || category == D3D12_MESSAGE_CATEGORY_STATE_CREATION
        || category == D3D12_MESSAGE_CATEGORY_STATE_GETTING
    {
        "State"
    } else {
        "General"
    };

    let severity = if severity == D3D12_MESSAGE_SEVERITY_CORRUPTION
        || severity == D3D12_MESSAGE_SEVERITY_ERROR
    {
        LogSeverity::Error
    } else if severity == D3D12_MESSAGE_SEVERITY_WARNING {
        LogSeverity::Warn
    } else if severity == D3D12_MESSAGE_SEVERITY_INFO {
        LogSeverity::Info
    } else {
        LogSeverity::Trace
    };

    log(
        severity,
        "rhi::d3d12::validation",
        format!("[{}] {}", category_str, message),
    );
}
