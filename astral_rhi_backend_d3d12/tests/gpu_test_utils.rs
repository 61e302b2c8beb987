#![cfg(windows)]
#![allow(dead_code)]
//! Shared D3D12 device for integration tests
//!
//! One device is created for the whole test process and shared across all
//! GPU tests; standing up a DXGI factory and debug layer per test is slow
//! and floods the info queue.

use std::sync::OnceLock;

use astral_rhi::{BackendKind, DeviceConfig, DeviceHandle, ValidationMode};
use astral_rhi_backend_d3d12::D3d12Device;

static GPU_DEVICE: OnceLock<DeviceHandle> = OnceLock::new();

/// Get the shared D3D12 device, created on first use
pub fn get_test_device() -> DeviceHandle {
    GPU_DEVICE
        .get_or_init(|| {
            D3d12Device::new_handle(DeviceConfig {
                validation: ValidationMode::Disabled,
                backend: BackendKind::D3d12,
                app_name: "astral-rhi-tests".to_string(),
                app_version: (0, 1, 0),
                command_buffers_per_frame: 32,
            })
            .expect("Failed to create D3D12 device for tests")
        })
        .clone()
}
