#![cfg(windows)]
//! Integration tests for command recording and submission on a real D3D12 device
//!
//! All tests require a D3D12-capable GPU with enhanced barriers and are
//! marked with #[ignore].
//!
//! Run with: cargo test --test command_list_integration_tests -- --ignored

mod gpu_test_utils;

use astral_rhi::{
    Barrier, Buffer, BufferDesc, BufferResidency, BufferUsage, CommandRecorder, PixelFormat,
    QueueKind, ResourceLayout, RhiError, TextureDesc, TextureUsage,
};
use gpu_test_utils::get_test_device;
use serial_test::serial;

// ============================================================================
// FRAME LOOP
// ============================================================================

#[test]
#[ignore] // Requires GPU
#[serial]
fn test_integration_empty_frame_loop() {
    let device = get_test_device();
    let mut device = device.lock().unwrap();

    for _ in 0..5 {
        device.begin_frame().unwrap();
        device.end_frame().unwrap();
    }
    device.wait_for_gpu().unwrap();
}

#[test]
#[ignore] // Requires GPU
#[serial]
fn test_integration_submit_empty_command_list_each_frame() {
    let device = get_test_device();
    let mut device = device.lock().unwrap();

    for _ in 0..4 {
        device.begin_frame().unwrap();
        let cmd = device.begin_command_buffer(QueueKind::Graphics).unwrap();
        device.submit_command_lists(vec![cmd]).unwrap();
        device.end_frame().unwrap();
    }
    device.wait_for_gpu().unwrap();
}

#[test]
#[ignore] // Requires GPU
#[serial]
fn test_integration_command_buffer_budget_exhausted() {
    let device = get_test_device();
    let mut device = device.lock().unwrap();

    device.begin_frame().unwrap();
    let mut lists = Vec::new();
    for _ in 0..32 {
        lists.push(device.begin_command_buffer(QueueKind::Graphics).unwrap());
    }
    let result = device.begin_command_buffer(QueueKind::Graphics);
    assert!(matches!(result, Err(RhiError::ValidationError(_))));

    device.submit_command_lists(lists).unwrap();
    device.end_frame().unwrap();
    device.wait_for_gpu().unwrap();
}

// ============================================================================
// TRANSFER AND SYNCHRONIZATION
// ============================================================================

#[test]
#[ignore] // Requires GPU
#[serial]
fn test_integration_update_buffer_and_read_back() {
    let device = get_test_device();
    let mut device = device.lock().unwrap();

    let staging = device
        .create_buffer(
            BufferDesc {
                size: 256,
                usage: BufferUsage::SHADER_READ,
                residency: BufferResidency::DeviceLocal,
                ..Default::default()
            },
            None,
        )
        .unwrap();
    let readback = device
        .create_buffer(
            BufferDesc {
                size: 256,
                usage: BufferUsage::empty(),
                residency: BufferResidency::Readback,
                ..Default::default()
            },
            None,
        )
        .unwrap();

    let pattern = vec![0x5Au8; 256];

    device.begin_frame().unwrap();
    let mut cmd = device.begin_command_buffer(QueueKind::Graphics).unwrap();
    cmd.update_buffer(&staging, 0, &pattern).unwrap();
    cmd.barrier(Barrier::Buffer {
        buffer: staging.clone(),
        src: ResourceLayout::CopyDst,
        dst: ResourceLayout::CopySrc,
    })
    .unwrap();
    cmd.copy_buffer(&staging, 0, &readback, 0, 256).unwrap();
    device.submit_command_lists(vec![cmd]).unwrap();
    device.end_frame().unwrap();
    device.wait_for_gpu().unwrap();

    let mut out = [0u8; 256];
    readback.read(0, &mut out).unwrap();
    assert_eq!(&out[..], &pattern[..]);
}

#[test]
#[ignore] // Requires GPU
#[serial]
fn test_integration_cross_queue_wait() {
    let device = get_test_device();
    let mut device = device.lock().unwrap();

    let data: Vec<u8> = (0..128).map(|i| i as u8).collect();
    let src = device
        .create_buffer(
            BufferDesc {
                size: 128,
                usage: BufferUsage::SHADER_READ,
                residency: BufferResidency::DeviceLocal,
                ..Default::default()
            },
            Some(&data),
        )
        .unwrap();
    let mid = device
        .create_buffer(
            BufferDesc {
                size: 128,
                usage: BufferUsage::SHADER_READ,
                residency: BufferResidency::DeviceLocal,
                ..Default::default()
            },
            None,
        )
        .unwrap();
    let readback = device
        .create_buffer(
            BufferDesc {
                size: 128,
                usage: BufferUsage::empty(),
                residency: BufferResidency::Readback,
                ..Default::default()
            },
            None,
        )
        .unwrap();

    device.begin_frame().unwrap();

    let mut copy = device.begin_command_buffer(QueueKind::Copy).unwrap();
    copy.copy_buffer(&src, 0, &mid, 0, 128).unwrap();
    let copy_id = copy.id();

    let mut gfx = device.begin_command_buffer(QueueKind::Graphics).unwrap();
    gfx.wait_for(copy_id).unwrap();
    gfx.barrier(Barrier::Buffer {
        buffer: mid.clone(),
        src: ResourceLayout::CopyDst,
        dst: ResourceLayout::CopySrc,
    })
    .unwrap();
    gfx.copy_buffer(&mid, 0, &readback, 0, 128).unwrap();

    device.submit_command_lists(vec![copy, gfx]).unwrap();
    device.end_frame().unwrap();
    device.wait_for_gpu().unwrap();

    let mut out = [0u8; 128];
    readback.read(0, &mut out).unwrap();
    assert_eq!(&out[..], &data[..]);
}

#[test]
#[ignore] // Requires GPU
#[serial]
fn test_integration_wait_for_rejects_later_list() {
    let device = get_test_device();
    let mut device = device.lock().unwrap();

    device.begin_frame().unwrap();
    let mut first = device.begin_command_buffer(QueueKind::Graphics).unwrap();
    let second = device.begin_command_buffer(QueueKind::Compute).unwrap();

    // A list can only wait on lists recorded before it
    let result = first.wait_for(second.id());
    assert!(matches!(result, Err(RhiError::ValidationError(_))));

    device.submit_command_lists(vec![first, second]).unwrap();
    device.end_frame().unwrap();
    device.wait_for_gpu().unwrap();
}

// ============================================================================
// TEXTURE TRANSFER
// ============================================================================

#[test]
#[ignore] // Requires GPU
#[serial]
fn test_integration_buffer_texture_roundtrip() {
    let device = get_test_device();
    let mut device = device.lock().unwrap();

    // 64 texels per row keeps the packed pitch equal to the 256-byte pitch
    // the copy engine requires, so the buffer layout matches on both sides
    let texels: Vec<u8> = (0..64 * 64 * 4).map(|i| (i % 251) as u8).collect();
    let upload = device
        .create_buffer(
            BufferDesc {
                size: texels.len() as u64,
                usage: BufferUsage::empty(),
                residency: BufferResidency::Upload,
                ..Default::default()
            },
            Some(&texels),
        )
        .unwrap();
    let texture = device
        .create_texture(
            TextureDesc {
                format: PixelFormat::Rgba8Unorm,
                usage: TextureUsage::SAMPLED,
                width: 64,
                height: 64,
                ..Default::default()
            },
            None,
        )
        .unwrap();
    let readback = device
        .create_buffer(
            BufferDesc {
                size: texels.len() as u64,
                usage: BufferUsage::empty(),
                residency: BufferResidency::Readback,
                ..Default::default()
            },
            None,
        )
        .unwrap();

    device.begin_frame().unwrap();
    let mut cmd = device.begin_command_buffer(QueueKind::Graphics).unwrap();
    cmd.barrier(Barrier::Texture {
        texture: texture.clone(),
        subresource: None,
        src: ResourceLayout::Undefined,
        dst: ResourceLayout::CopyDst,
    })
    .unwrap();
    cmd.copy_buffer_to_texture(&upload, 0, &texture, 0).unwrap();
    cmd.barrier(Barrier::Texture {
        texture: texture.clone(),
        subresource: None,
        src: ResourceLayout::CopyDst,
        dst: ResourceLayout::CopySrc,
    })
    .unwrap();
    cmd.copy_texture_to_buffer(&texture, 0, &readback, 0).unwrap();
    device.submit_command_lists(vec![cmd]).unwrap();
    device.end_frame().unwrap();
    device.wait_for_gpu().unwrap();

    let mut out = vec![0u8; texels.len()];
    readback.read(0, &mut out).unwrap();
    assert_eq!(out, texels);
}

#[test]
#[ignore] // Requires GPU
#[serial]
fn test_integration_unaligned_texture_copy_offset_rejected() {
    let device = get_test_device();
    let mut device = device.lock().unwrap();

    let upload = device
        .create_buffer(
            BufferDesc {
                size: 4096,
                usage: BufferUsage::empty(),
                residency: BufferResidency::Upload,
                ..Default::default()
            },
            None,
        )
        .unwrap();
    let texture = device
        .create_texture(
            TextureDesc {
                format: PixelFormat::Rgba8Unorm,
                usage: TextureUsage::SAMPLED,
                width: 16,
                height: 16,
                ..Default::default()
            },
            None,
        )
        .unwrap();

    device.begin_frame().unwrap();
    let mut cmd = device.begin_command_buffer(QueueKind::Graphics).unwrap();
    // Placed footprints must start on the 512-byte placement granularity
    let result = cmd.copy_buffer_to_texture(&upload, 100, &texture, 0);
    assert!(matches!(result, Err(RhiError::ValidationError(_))));
    device.submit_command_lists(vec![cmd]).unwrap();
    device.end_frame().unwrap();
    device.wait_for_gpu().unwrap();
}

// ============================================================================
// DEBUG EVENTS
// ============================================================================

#[test]
#[ignore] // Requires GPU
#[serial]
fn test_integration_debug_events_record() {
    let device = get_test_device();
    let mut device = device.lock().unwrap();

    device.begin_frame().unwrap();
    let mut cmd = device.begin_command_buffer(QueueKind::Graphics).unwrap();
    cmd.begin_event("test scope");
    cmd.marker("inside");
    cmd.end_event();
    device.submit_command_lists(vec![cmd]).unwrap();
    device.end_frame().unwrap();
    device.wait_for_gpu().unwrap();
}
