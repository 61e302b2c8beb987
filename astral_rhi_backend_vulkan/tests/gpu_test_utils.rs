#![allow(dead_code)]
//! Shared Vulkan device for integration tests
//!
//! One device is created for the whole test process and shared across all
//! GPU tests; initializing one Vulkan instance per test is slow and some
//! drivers refuse multiple concurrent instances.

use std::sync::OnceLock;

use astral_rhi::{BackendKind, DeviceConfig, DeviceHandle, ValidationMode};
use astral_rhi_backend_vulkan::VulkanDevice;

static GPU_DEVICE: OnceLock<DeviceHandle> = OnceLock::new();

/// Get the shared Vulkan device, created on first use
pub fn get_test_device() -> DeviceHandle {
    GPU_DEVICE
        .get_or_init(|| {
            VulkanDevice::new_handle(DeviceConfig {
                validation: ValidationMode::Disabled,
                backend: BackendKind::Vulkan,
                app_name: "astral-rhi-tests".to_string(),
                app_version: (0, 1, 0),
                command_buffers_per_frame: 32,
            })
            .expect("Failed to create Vulkan device for tests")
        })
        .clone()
}
