//! Resource lifetime and caching behavior on the software device

use std::sync::Arc;

use astral_rhi::mock::{MockDevice, MockTexture};
use astral_rhi::{
    BindlessIndex, BufferDesc, BufferRange, BufferUsage, Device, DeviceConfig, PixelFormat,
    SamplerDesc, ShaderDesc, ShaderStage, TextureData, TextureDesc, TextureDimension,
    TextureLayerData, TextureUsage, TextureViewDesc,
};

fn device() -> MockDevice {
    MockDevice::new(DeviceConfig::default())
}

#[test]
fn bindless_slot_is_reused_after_two_frames() {
    let mut device = device();
    let buffer = device
        .create_buffer(
            BufferDesc {
                size: 64,
                usage: BufferUsage::SHADER_READ,
                ..Default::default()
            },
            None,
        )
        .unwrap();
    let slot = buffer.bindless_srv();
    assert!(slot.is_valid());
    drop(buffer);

    // One frame later the slot is still in flight
    device.end_frame().unwrap();
    let second = device
        .create_buffer(
            BufferDesc {
                size: 64,
                usage: BufferUsage::SHADER_READ,
                ..Default::default()
            },
            None,
        )
        .unwrap();
    assert_ne!(second.bindless_srv(), slot);

    // Two frames later it is recycled
    device.end_frame().unwrap();
    let third = device
        .create_buffer(
            BufferDesc {
                size: 64,
                usage: BufferUsage::SHADER_READ,
                ..Default::default()
            },
            None,
        )
        .unwrap();
    assert_eq!(third.bindless_srv(), slot);
}

#[test]
fn native_release_is_deferred_two_frames() {
    let mut device = device();
    let buffer = device
        .create_buffer(
            BufferDesc {
                size: 64,
                usage: BufferUsage::VERTEX,
                debug_name: Some("temp".into()),
                ..Default::default()
            },
            None,
        )
        .unwrap();
    drop(buffer);

    device.end_frame().unwrap();
    assert!(device.shared().released().is_empty());

    device.end_frame().unwrap();
    assert_eq!(device.shared().released(), vec!["buffer:temp".to_string()]);
}

#[test]
fn shutdown_drains_unconditionally() {
    let mut device = device();
    let buffer = device
        .create_buffer(
            BufferDesc {
                size: 64,
                usage: BufferUsage::VERTEX,
                debug_name: Some("held".into()),
                ..Default::default()
            },
            None,
        )
        .unwrap();
    drop(buffer);
    device.shutdown();
    assert_eq!(device.shared().released(), vec!["buffer:held".to_string()]);
}

#[test]
fn equal_view_descs_return_the_same_view() {
    let mut device = device();
    let texture = device
        .create_texture(
            TextureDesc {
                width: 128,
                height: 128,
                mip_levels: 8,
                ..Default::default()
            },
            None,
        )
        .unwrap();

    let implicit = texture.get_view(TextureViewDesc::all()).unwrap();
    let explicit = texture
        .get_view(TextureViewDesc {
            base_mip: 0,
            mip_count: 8,
            base_layer: 0,
            layer_count: 1,
            format: Some(PixelFormat::Rgba8Unorm),
        })
        .unwrap();
    assert!(Arc::ptr_eq(&implicit, &explicit));

    let partial = texture
        .get_view(TextureViewDesc {
            base_mip: 2,
            ..Default::default()
        })
        .unwrap();
    assert!(!Arc::ptr_eq(&implicit, &partial));
    assert_ne!(implicit.bindless_srv(), partial.bindless_srv());
}

#[test]
fn storage_texture_views_expose_both_slots() {
    let mut device = device();
    let texture = device
        .create_texture(
            TextureDesc {
                usage: TextureUsage::SAMPLED | TextureUsage::STORAGE,
                width: 64,
                height: 64,
                ..Default::default()
            },
            None,
        )
        .unwrap();
    assert!(texture.bindless_srv().is_valid());
    assert!(texture.bindless_uav().is_valid());

    let depth_only = device
        .create_texture(
            TextureDesc {
                usage: TextureUsage::DEPTH_STENCIL,
                format: PixelFormat::Depth32Float,
                width: 64,
                height: 64,
                ..Default::default()
            },
            None,
        )
        .unwrap();
    assert_eq!(depth_only.bindless_srv(), BindlessIndex::UNBOUND);
}

#[test]
fn cube_array_reports_cube_count() {
    let mut device = device();
    let cubes = device
        .create_texture(
            TextureDesc {
                dimension: TextureDimension::Cube,
                depth_or_array_size: 2,
                width: 64,
                height: 64,
                ..Default::default()
            },
            None,
        )
        .unwrap();
    assert_eq!(cubes.get_array_size(), 2);
    assert_eq!(cubes.desc().native_array_size(), 12);

    // Views address native layers, so the second cube starts at layer 6
    let second_cube = cubes
        .get_view(TextureViewDesc {
            base_layer: 6,
            layer_count: 6,
            ..Default::default()
        })
        .unwrap();
    assert!(second_cube.bindless_srv().is_valid());
}

#[test]
fn buffer_range_views_are_cached_per_resolved_range() {
    let mut device = device();
    let buffer = device
        .create_buffer(
            BufferDesc {
                size: 1024,
                usage: BufferUsage::SHADER_READ,
                ..Default::default()
            },
            None,
        )
        .unwrap();

    let implicit = buffer
        .bindless_srv_range(BufferRange { offset: 0, size: 0 })
        .unwrap();
    let explicit = buffer
        .bindless_srv_range(BufferRange { offset: 0, size: 1024 })
        .unwrap();
    assert_eq!(implicit, explicit);

    let tail = buffer
        .bindless_srv_range(BufferRange { offset: 512, size: 0 })
        .unwrap();
    assert_ne!(tail, implicit);

    let out_of_bounds = buffer.bindless_srv_range(BufferRange { offset: 512, size: 1024 });
    assert!(out_of_bounds.is_err());

    // An offset past the end must error even with the to-the-end shorthand
    let past_end = buffer.bindless_srv_range(BufferRange { offset: 2048, size: 0 });
    assert!(past_end.is_err());
}

#[test]
fn sampler_gets_a_sampler_heap_slot() {
    let mut device = device();
    let a = device.create_sampler(SamplerDesc::default()).unwrap();
    let b = device.create_sampler(SamplerDesc::default()).unwrap();
    assert!(a.bindless().is_valid());
    assert_ne!(a.bindless(), b.bindless());
}

#[test]
fn pipeline_cache_returns_the_same_state_for_equal_descs() {
    let mut device = device();
    let shader = device
        .create_shader(ShaderDesc {
            stage: ShaderStage::Compute,
            bytecode: vec![1, 2, 3, 4],
            debug_name: None,
        })
        .unwrap();

    let desc = astral_rhi::ComputePipelineDesc {
        compute_shader: shader.clone(),
        debug_name: None,
    };
    let first = device.create_compute_pipeline(desc.clone()).unwrap();
    let second = device.create_compute_pipeline(desc.clone()).unwrap();
    assert!(Arc::ptr_eq(&first, &second));

    device.clear_pipeline_cache();
    let third = device.create_compute_pipeline(desc).unwrap();
    assert!(!Arc::ptr_eq(&first, &third));
}

#[test]
fn shader_rejects_empty_bytecode() {
    let mut device = device();
    let result = device.create_shader(ShaderDesc {
        stage: ShaderStage::Vertex,
        bytecode: Vec::new(),
        debug_name: None,
    });
    assert!(result.is_err());
}

#[test]
fn upload_buffers_support_cpu_access() {
    let mut device = device();
    let buffer = device
        .create_buffer(
            BufferDesc {
                size: 16,
                usage: BufferUsage::UNIFORM,
                residency: astral_rhi::BufferResidency::Upload,
                ..Default::default()
            },
            None,
        )
        .unwrap();
    buffer.update(4, &[9, 8, 7, 6]).unwrap();
    let mut out = [0u8; 4];
    buffer.read(4, &mut out).unwrap();
    assert_eq!(out, [9, 8, 7, 6]);

    // Device-local memory has no persistent mapping
    let local = device
        .create_buffer(
            BufferDesc {
                size: 16,
                usage: BufferUsage::VERTEX,
                ..Default::default()
            },
            None,
        )
        .unwrap();
    assert!(local.update(0, &[1]).is_err());
    assert!(local.read(0, &mut out).is_err());
}

#[test]
fn cube_view_is_cached_and_its_slot_recycles() {
    let mut device = device();
    let cube = device
        .create_texture(
            TextureDesc {
                dimension: TextureDimension::Cube,
                width: 256,
                height: 256,
                depth_or_array_size: 1,
                usage: TextureUsage::SAMPLED | TextureUsage::STORAGE | TextureUsage::RENDER_TARGET,
                ..Default::default()
            },
            None,
        )
        .unwrap();

    let desc = TextureViewDesc {
        base_mip: 0,
        mip_count: 1,
        base_layer: 0,
        layer_count: 6,
        format: None,
    };
    let first = cube.get_view(desc).unwrap();
    let again = cube.get_view(desc).unwrap();
    assert!(Arc::ptr_eq(&first, &again));
    let slot = first.bindless_srv();
    assert!(slot.is_valid());
    assert_eq!(again.bindless_srv(), slot);

    drop(first);
    drop(again);
    drop(cube);
    device.end_frame().unwrap();
    device.end_frame().unwrap();

    // The retired sampled-image slot is handed to the next view
    let next = device
        .create_texture(
            TextureDesc {
                width: 4,
                height: 4,
                ..Default::default()
            },
            None,
        )
        .unwrap();
    assert_eq!(next.bindless_srv(), slot);
}

#[test]
fn texture_initial_data_is_stored_per_layer() {
    let mut device = device();
    let pixels = vec![0x5au8; 4 * 4 * 4];
    let texture = device
        .create_texture(
            TextureDesc {
                width: 4,
                height: 4,
                ..Default::default()
            },
            Some(TextureData::Single(pixels.clone())),
        )
        .unwrap();
    let mock = texture
        .as_any()
        .downcast_ref::<MockTexture>()
        .unwrap();
    assert_eq!(mock.layer_data(0), Some(pixels));
    assert_eq!(mock.layer_data(1), None);

    let layered = device
        .create_texture(
            TextureDesc {
                width: 4,
                height: 4,
                dimension: TextureDimension::D2,
                depth_or_array_size: 3,
                ..Default::default()
            },
            Some(TextureData::Layers(vec![TextureLayerData {
                layer: 2,
                data: vec![7u8; 4 * 4 * 4],
            }])),
        )
        .unwrap();
    let mock = layered
        .as_any()
        .downcast_ref::<MockTexture>()
        .unwrap();
    assert_eq!(mock.layer_data(2), Some(vec![7u8; 4 * 4 * 4]));
    assert_eq!(mock.layer_data(0), None);
}

#[test]
fn texture_initial_data_is_validated() {
    let mut device = device();
    // Wrong byte count for a 4x4 RGBA8 layer
    assert!(device
        .create_texture(
            TextureDesc {
                width: 4,
                height: 4,
                ..Default::default()
            },
            Some(TextureData::Single(vec![0u8; 17])),
        )
        .is_err());

    // Layer index past the array size
    assert!(device
        .create_texture(
            TextureDesc {
                width: 4,
                height: 4,
                depth_or_array_size: 2,
                ..Default::default()
            },
            Some(TextureData::Layers(vec![TextureLayerData {
                layer: 2,
                data: vec![0u8; 4 * 4 * 4],
            }])),
        )
        .is_err());
}
