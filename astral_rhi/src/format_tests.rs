use super::*;

#[test]
fn uncompressed_block_sizes() {
    assert_eq!(PixelFormat::R8Unorm.bytes_per_block(), 1);
    assert_eq!(PixelFormat::Rg16Float.bytes_per_block(), 4);
    assert_eq!(PixelFormat::Rgba8Unorm.bytes_per_block(), 4);
    assert_eq!(PixelFormat::Rgba32Float.bytes_per_block(), 16);
    assert_eq!(PixelFormat::B5g6r5Unorm.bytes_per_block(), 2);
    assert_eq!(PixelFormat::Undefined.bytes_per_block(), 0);
}

#[test]
fn compressed_formats_use_4x4_blocks() {
    let info = PixelFormat::Bc1RgbaUnorm.info();
    assert_eq!((info.block_width, info.block_height), (4, 4));
    assert_eq!(info.bytes_per_block, 8);
    assert!(PixelFormat::Bc7RgbaUnorm.is_compressed());
    assert!(!PixelFormat::Rgba8Unorm.is_compressed());
}

#[test]
fn row_pitch_rounds_to_blocks() {
    // 10 texels of BC1 span 3 blocks of 8 bytes
    assert_eq!(PixelFormat::Bc1RgbaUnorm.row_pitch(10), 24);
    assert_eq!(PixelFormat::Bc1RgbaUnorm.row_pitch(16), 32);
    assert_eq!(PixelFormat::Rgba8Unorm.row_pitch(10), 40);
}

#[test]
fn depth_and_stencil_aspects() {
    assert!(PixelFormat::Depth32Float.is_depth());
    assert!(!PixelFormat::Depth32Float.has_stencil());
    assert!(PixelFormat::Depth24UnormStencil8.has_stencil());
    assert!(PixelFormat::Depth32FloatStencil8.has_stencil());
    assert!(!PixelFormat::Rgba8Unorm.is_depth());
    let aspect = PixelFormat::Depth24UnormStencil8.info().aspect;
    assert!(aspect.contains(FormatAspect::DEPTH | FormatAspect::STENCIL));
    assert!(!aspect.contains(FormatAspect::COLOR));
}

#[test]
fn srgb_pairs_round_trip() {
    let linear = [
        PixelFormat::Rgba8Unorm,
        PixelFormat::Bgra8Unorm,
        PixelFormat::Bc1RgbaUnorm,
        PixelFormat::Bc3RgbaUnorm,
        PixelFormat::Bc7RgbaUnorm,
    ];
    for format in linear {
        let srgb = format.linear_to_srgb();
        assert_ne!(srgb, format);
        assert!(srgb.is_srgb());
        assert_eq!(srgb.srgb_to_linear(), format);
    }
    // No sRGB pair: identity
    assert_eq!(PixelFormat::R32Float.linear_to_srgb(), PixelFormat::R32Float);
}

#[test]
fn depth_read_aliases() {
    assert_eq!(
        PixelFormat::Depth16Unorm.depth_read_alias(),
        Some(PixelFormat::R16Unorm)
    );
    assert_eq!(
        PixelFormat::Depth32Float.depth_read_alias(),
        Some(PixelFormat::R32Float)
    );
    assert_eq!(
        PixelFormat::Depth32FloatStencil8.depth_read_alias(),
        Some(PixelFormat::R32Float)
    );
    assert_eq!(PixelFormat::Rgba8Unorm.depth_read_alias(), None);
}

#[test]
fn signedness() {
    assert!(PixelFormat::R8Snorm.info().signed);
    assert!(PixelFormat::Rgba32Sint.info().signed);
    assert!(!PixelFormat::Rgba8Unorm.info().signed);
}
