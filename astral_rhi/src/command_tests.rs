use super::*;

use crate::buffer::{BufferDesc, BufferUsage};
use crate::device::Device;
use crate::mock::MockDevice;
use crate::texture::TextureDesc;
use crate::types::DeviceConfig;

fn test_texture(device: &mut MockDevice) -> TextureHandle {
    device
        .create_texture(TextureDesc::default(), None)
        .unwrap()
}

fn test_buffer(device: &mut MockDevice) -> BufferHandle {
    device
        .create_buffer(
            BufferDesc {
                size: 256,
                usage: BufferUsage::SHADER_READ,
                ..Default::default()
            },
            None,
        )
        .unwrap()
}

#[test]
fn duplicate_texture_transitions_collapse() {
    let mut device = MockDevice::new(DeviceConfig::default());
    let texture = test_texture(&mut device);

    let mut batch = BarrierBatch::new();
    batch.push(Barrier::Texture {
        texture: texture.clone(),
        subresource: None,
        src: ResourceLayout::Undefined,
        dst: ResourceLayout::CopyDst,
    });
    batch.push(Barrier::Texture {
        texture: texture.clone(),
        subresource: None,
        src: ResourceLayout::CopyDst,
        dst: ResourceLayout::ShaderRead,
    });

    let (textures, buffers, memory) = batch.take();
    assert_eq!(textures.len(), 1);
    assert!(buffers.is_empty());
    assert!(!memory);
    // Original src survives, the later dst wins
    assert_eq!(textures[0].src, ResourceLayout::Undefined);
    assert_eq!(textures[0].dst, ResourceLayout::ShaderRead);
}

#[test]
fn round_trip_collapses_to_nothing() {
    let mut device = MockDevice::new(DeviceConfig::default());
    let texture = test_texture(&mut device);

    let mut batch = BarrierBatch::new();
    batch.push(Barrier::Texture {
        texture: texture.clone(),
        subresource: None,
        src: ResourceLayout::ShaderRead,
        dst: ResourceLayout::CopyDst,
    });
    batch.push(Barrier::Texture {
        texture,
        subresource: None,
        src: ResourceLayout::CopyDst,
        dst: ResourceLayout::ShaderRead,
    });

    let (textures, buffers, memory) = batch.take();
    assert!(textures.is_empty());
    assert!(buffers.is_empty());
    assert!(!memory);
}

#[test]
fn distinct_subresources_stay_separate() {
    let mut device = MockDevice::new(DeviceConfig::default());
    let texture = test_texture(&mut device);

    let mut batch = BarrierBatch::new();
    for subresource in [Some(0), Some(1), None] {
        batch.push(Barrier::Texture {
            texture: texture.clone(),
            subresource,
            src: ResourceLayout::Undefined,
            dst: ResourceLayout::ShaderRead,
        });
    }

    let (textures, _, _) = batch.take();
    assert_eq!(textures.len(), 3);
}

#[test]
fn distinct_textures_stay_separate() {
    let mut device = MockDevice::new(DeviceConfig::default());
    let a = test_texture(&mut device);
    let b = test_texture(&mut device);

    let mut batch = BarrierBatch::new();
    for texture in [a, b] {
        batch.push(Barrier::Texture {
            texture,
            subresource: None,
            src: ResourceLayout::Undefined,
            dst: ResourceLayout::RenderTarget,
        });
    }

    let (textures, _, _) = batch.take();
    assert_eq!(textures.len(), 2);
}

#[test]
fn buffer_transitions_coalesce_by_identity() {
    let mut device = MockDevice::new(DeviceConfig::default());
    let buffer = test_buffer(&mut device);

    let mut batch = BarrierBatch::new();
    batch.push(Barrier::Buffer {
        buffer: buffer.clone(),
        src: ResourceLayout::Undefined,
        dst: ResourceLayout::CopyDst,
    });
    batch.push(Barrier::Buffer {
        buffer,
        src: ResourceLayout::CopyDst,
        dst: ResourceLayout::General,
    });

    let (_, buffers, _) = batch.take();
    assert_eq!(buffers.len(), 1);
    assert_eq!(buffers[0].src, ResourceLayout::Undefined);
    assert_eq!(buffers[0].dst, ResourceLayout::General);
}

#[test]
fn memory_barrier_sets_the_flag_once() {
    let mut batch = BarrierBatch::new();
    assert!(batch.is_empty());

    batch.push(Barrier::Memory);
    batch.push(Barrier::Memory);
    assert!(!batch.is_empty());

    let (textures, buffers, memory) = batch.take();
    assert!(textures.is_empty());
    assert!(buffers.is_empty());
    assert!(memory);

    // Taking resets the batch
    assert!(batch.is_empty());
}

#[test]
fn command_list_ids_order() {
    assert!(CommandListId(0) < CommandListId(1));
    assert_eq!(CommandListId(3), CommandListId(3));
}
