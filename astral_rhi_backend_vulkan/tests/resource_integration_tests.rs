//! Integration tests for resource creation with a real Vulkan device
//!
//! All tests require a Vulkan-capable GPU and are marked with #[ignore].
//!
//! Run with: cargo test --test resource_integration_tests -- --ignored

mod gpu_test_utils;

use astral_rhi::{
    BackendKind, Buffer, BufferDesc, BufferResidency, BufferUsage, CommandRecorder, PixelFormat,
    QueryHeap, QueryHeapDesc, QueryKind, RhiError, ShaderDesc, ShaderStage, Texture, TextureData,
    TextureDesc, TextureUsage,
};
use gpu_test_utils::get_test_device;
use serial_test::serial;

// ============================================================================
// DEVICE
// ============================================================================

#[test]
#[ignore] // Requires GPU
#[serial]
fn test_integration_device_capabilities() {
    let device = get_test_device();
    let device = device.lock().unwrap();

    let caps = device.capabilities();
    assert_eq!(caps.backend, BackendKind::Vulkan);
    assert!(!caps.adapter_name.is_empty());
}

// ============================================================================
// BUFFERS
// ============================================================================

#[test]
#[ignore] // Requires GPU
#[serial]
fn test_integration_create_device_local_buffer() {
    let device = get_test_device();
    let mut device = device.lock().unwrap();

    let buffer = device
        .create_buffer(
            BufferDesc {
                size: 4096,
                usage: BufferUsage::VERTEX,
                residency: BufferResidency::DeviceLocal,
                debug_name: Some("test vertices".to_string()),
                ..Default::default()
            },
            None,
        )
        .unwrap();
    assert_eq!(buffer.desc().size, 4096);
}

#[test]
#[ignore] // Requires GPU
#[serial]
fn test_integration_upload_buffer_update_and_read() {
    let device = get_test_device();
    let mut device = device.lock().unwrap();

    let buffer = device
        .create_buffer(
            BufferDesc {
                size: 16,
                usage: BufferUsage::empty(),
                residency: BufferResidency::Upload,
                ..Default::default()
            },
            None,
        )
        .unwrap();

    let data: Vec<u8> = (0u8..16).collect();
    buffer.update(0, &data).unwrap();

    let mut out = [0u8; 16];
    buffer.read(0, &mut out).unwrap();
    assert_eq!(&out[..], &data[..]);
}

#[test]
#[ignore] // Requires GPU
#[serial]
fn test_integration_buffer_initial_data_roundtrip() {
    let device = get_test_device();
    let mut device = device.lock().unwrap();

    let data: Vec<u8> = (0..64u8).collect();
    let src = device
        .create_buffer(
            BufferDesc {
                size: 64,
                usage: BufferUsage::SHADER_READ,
                residency: BufferResidency::DeviceLocal,
                ..Default::default()
            },
            Some(&data),
        )
        .unwrap();
    let readback = device
        .create_buffer(
            BufferDesc {
                size: 64,
                usage: BufferUsage::empty(),
                residency: BufferResidency::Readback,
                ..Default::default()
            },
            None,
        )
        .unwrap();

    device.begin_frame().unwrap();
    let mut cmd = device
        .begin_command_buffer(astral_rhi::QueueKind::Graphics)
        .unwrap();
    cmd.copy_buffer(&src, 0, &readback, 0, 64).unwrap();
    device.submit_command_lists(vec![cmd]).unwrap();
    device.end_frame().unwrap();
    device.wait_for_gpu().unwrap();

    let mut out = [0u8; 64];
    readback.read(0, &mut out).unwrap();
    assert_eq!(&out[..], &data[..]);
}

#[test]
#[ignore] // Requires GPU
#[serial]
fn test_integration_zero_size_buffer_rejected() {
    let device = get_test_device();
    let mut device = device.lock().unwrap();

    let result = device.create_buffer(
        BufferDesc {
            size: 0,
            ..Default::default()
        },
        None,
    );
    assert!(matches!(result, Err(RhiError::InvalidDescriptor(_))));
}

// ============================================================================
// TEXTURES
// ============================================================================

#[test]
#[ignore] // Requires GPU
#[serial]
fn test_integration_create_sampled_texture_with_data() {
    let device = get_test_device();
    let mut device = device.lock().unwrap();

    let texels = vec![0xAB; 16 * 16 * 4];
    let texture = device
        .create_texture(
            TextureDesc {
                format: PixelFormat::Rgba8Unorm,
                usage: TextureUsage::SAMPLED,
                width: 16,
                height: 16,
                debug_name: Some("test texture".to_string()),
                ..Default::default()
            },
            Some(TextureData::Single(texels)),
        )
        .unwrap();
    assert_eq!(texture.desc().width, 16);
    assert!(texture.bindless_srv().is_valid());
}

#[test]
#[ignore] // Requires GPU
#[serial]
fn test_integration_texture_wrong_data_size_rejected() {
    let device = get_test_device();
    let mut device = device.lock().unwrap();

    let result = device.create_texture(
        TextureDesc {
            format: PixelFormat::Rgba8Unorm,
            usage: TextureUsage::SAMPLED,
            width: 16,
            height: 16,
            ..Default::default()
        },
        Some(TextureData::Single(vec![0; 7])),
    );
    assert!(matches!(result, Err(RhiError::InvalidDescriptor(_))));
}

// ============================================================================
// SHADERS AND QUERY HEAPS
// ============================================================================

#[test]
#[ignore] // Requires GPU
#[serial]
fn test_integration_empty_shader_rejected() {
    let device = get_test_device();
    let mut device = device.lock().unwrap();

    let result = device.create_shader(ShaderDesc {
        stage: ShaderStage::Vertex,
        bytecode: Vec::new(),
        debug_name: None,
    });
    assert!(matches!(result, Err(RhiError::InvalidDescriptor(_))));
}

#[test]
#[ignore] // Requires GPU
#[serial]
fn test_integration_create_timestamp_query_heap() {
    let device = get_test_device();
    let mut device = device.lock().unwrap();

    let heap = device
        .create_query_heap(QueryHeapDesc {
            kind: QueryKind::Timestamp,
            count: 64,
            debug_name: None,
        })
        .unwrap();
    assert_eq!(heap.desc().count, 64);
}
