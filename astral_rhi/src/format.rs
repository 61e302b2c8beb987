//! Pixel format table
//!
//! Closed set of texture/vertex formats with per-format block size, block
//! extent, sampling kind, aspect flags, signedness and sRGB-ness. Pure data,
//! no state. Backends translate these into their native format enums.

use bitflags::bitflags;

/// Texture and typed-buffer pixel formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PixelFormat {
    /// No format; resolved to a backend default where documented
    /// (swap chains default to `Bgra8Unorm`)
    #[default]
    Undefined,

    // 8-bit single channel
    R8Unorm,
    R8Snorm,
    R8Uint,
    R8Sint,

    // 16-bit single channel
    R16Unorm,
    R16Snorm,
    R16Uint,
    R16Sint,
    R16Float,

    // 32-bit single channel
    R32Uint,
    R32Sint,
    R32Float,

    // 8-bit two channel
    Rg8Unorm,
    Rg8Snorm,
    Rg8Uint,
    Rg8Sint,

    // 16-bit two channel
    Rg16Unorm,
    Rg16Snorm,
    Rg16Uint,
    Rg16Sint,
    Rg16Float,

    // 32-bit two channel
    Rg32Uint,
    Rg32Sint,
    Rg32Float,

    // 8-bit four channel
    Rgba8Unorm,
    Rgba8UnormSrgb,
    Rgba8Snorm,
    Rgba8Uint,
    Rgba8Sint,
    Bgra8Unorm,
    Bgra8UnormSrgb,

    // 16-bit four channel
    Rgba16Unorm,
    Rgba16Snorm,
    Rgba16Uint,
    Rgba16Sint,
    Rgba16Float,

    // 32-bit four channel
    Rgba32Uint,
    Rgba32Sint,
    Rgba32Float,

    // Packed
    Rgb10a2Unorm,
    Rg11b10Float,
    Rgb9e5Float,
    Bgra4Unorm,
    B5g6r5Unorm,
    B5g5r5a1Unorm,

    // Depth / stencil
    Depth16Unorm,
    Depth32Float,
    Depth24UnormStencil8,
    Depth32FloatStencil8,

    // Block compressed
    Bc1RgbaUnorm,
    Bc1RgbaUnormSrgb,
    Bc2RgbaUnorm,
    Bc2RgbaUnormSrgb,
    Bc3RgbaUnorm,
    Bc3RgbaUnormSrgb,
    Bc4RUnorm,
    Bc4RSnorm,
    Bc5RgUnorm,
    Bc5RgSnorm,
    Bc6hRgbUfloat,
    Bc6hRgbSfloat,
    Bc7RgbaUnorm,
    Bc7RgbaUnormSrgb,
}

/// How a format is interpreted when sampled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatKind {
    Float,
    Unorm,
    Snorm,
    Uint,
    Sint,
}

bitflags! {
    /// Which image aspects a format carries
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FormatAspect: u32 {
        const COLOR   = 1 << 0;
        const DEPTH   = 1 << 1;
        const STENCIL = 1 << 2;
    }
}

/// Static properties of a pixel format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatInfo {
    /// Bytes per block (per texel for uncompressed formats)
    pub bytes_per_block: u32,
    /// Block width in texels (1 for uncompressed, 4 for BC)
    pub block_width: u32,
    /// Block height in texels
    pub block_height: u32,
    /// Sampling kind
    pub kind: FormatKind,
    /// Aspect flags
    pub aspect: FormatAspect,
    /// True for snorm/sint/signed-float channel layouts
    pub signed: bool,
    /// True for sRGB-encoded formats
    pub srgb: bool,
}

impl PixelFormat {
    /// Static properties of this format
    ///
    /// `Undefined` reports a zero-sized color block.
    pub const fn info(self) -> FormatInfo {
        use FormatKind::*;
        use PixelFormat::*;

        const fn color(bytes: u32, kind: FormatKind, signed: bool, srgb: bool) -> FormatInfo {
            FormatInfo {
                bytes_per_block: bytes,
                block_width: 1,
                block_height: 1,
                kind,
                aspect: FormatAspect::COLOR,
                signed,
                srgb,
            }
        }
        const fn depth(bytes: u32, kind: FormatKind, stencil: bool) -> FormatInfo {
            FormatInfo {
                bytes_per_block: bytes,
                block_width: 1,
                block_height: 1,
                kind,
                aspect: if stencil {
                    FormatAspect::DEPTH.union(FormatAspect::STENCIL)
                } else {
                    FormatAspect::DEPTH
                },
                signed: false,
                srgb: false,
            }
        }
        const fn bc(bytes: u32, kind: FormatKind, signed: bool, srgb: bool) -> FormatInfo {
            FormatInfo {
                bytes_per_block: bytes,
                block_width: 4,
                block_height: 4,
                kind,
                aspect: FormatAspect::COLOR,
                signed,
                srgb,
            }
        }

        match self {
            Undefined => color(0, Unorm, false, false),

            R8Unorm => color(1, Unorm, false, false),
            R8Snorm => color(1, Snorm, true, false),
            R8Uint => color(1, Uint, false, false),
            R8Sint => color(1, Sint, true, false),

            R16Unorm => color(2, Unorm, false, false),
            R16Snorm => color(2, Snorm, true, false),
            R16Uint => color(2, Uint, false, false),
            R16Sint => color(2, Sint, true, false),
            R16Float => color(2, Float, true, false),

            R32Uint => color(4, Uint, false, false),
            R32Sint => color(4, Sint, true, false),
            R32Float => color(4, Float, true, false),

            Rg8Unorm => color(2, Unorm, false, false),
            Rg8Snorm => color(2, Snorm, true, false),
            Rg8Uint => color(2, Uint, false, false),
            Rg8Sint => color(2, Sint, true, false),

            Rg16Unorm => color(4, Unorm, false, false),
            Rg16Snorm => color(4, Snorm, true, false),
            Rg16Uint => color(4, Uint, false, false),
            Rg16Sint => color(4, Sint, true, false),
            Rg16Float => color(4, Float, true, false),

            Rg32Uint => color(8, Uint, false, false),
            Rg32Sint => color(8, Sint, true, false),
            Rg32Float => color(8, Float, true, false),

            Rgba8Unorm => color(4, Unorm, false, false),
            Rgba8UnormSrgb => color(4, Unorm, false, true),
            Rgba8Snorm => color(4, Snorm, true, false),
            Rgba8Uint => color(4, Uint, false, false),
            Rgba8Sint => color(4, Sint, true, false),
            Bgra8Unorm => color(4, Unorm, false, false),
            Bgra8UnormSrgb => color(4, Unorm, false, true),

            Rgba16Unorm => color(8, Unorm, false, false),
            Rgba16Snorm => color(8, Snorm, true, false),
            Rgba16Uint => color(8, Uint, false, false),
            Rgba16Sint => color(8, Sint, true, false),
            Rgba16Float => color(8, Float, true, false),

            Rgba32Uint => color(16, Uint, false, false),
            Rgba32Sint => color(16, Sint, true, false),
            Rgba32Float => color(16, Float, true, false),

            Rgb10a2Unorm => color(4, Unorm, false, false),
            Rg11b10Float => color(4, Float, false, false),
            Rgb9e5Float => color(4, Float, false, false),
            Bgra4Unorm => color(2, Unorm, false, false),
            B5g6r5Unorm => color(2, Unorm, false, false),
            B5g5r5a1Unorm => color(2, Unorm, false, false),

            Depth16Unorm => depth(2, Unorm, false),
            Depth32Float => depth(4, Float, false),
            Depth24UnormStencil8 => depth(4, Unorm, true),
            Depth32FloatStencil8 => depth(8, Float, true),

            Bc1RgbaUnorm => bc(8, Unorm, false, false),
            Bc1RgbaUnormSrgb => bc(8, Unorm, false, true),
            Bc2RgbaUnorm => bc(16, Unorm, false, false),
            Bc2RgbaUnormSrgb => bc(16, Unorm, false, true),
            Bc3RgbaUnorm => bc(16, Unorm, false, false),
            Bc3RgbaUnormSrgb => bc(16, Unorm, false, true),
            Bc4RUnorm => bc(8, Unorm, false, false),
            Bc4RSnorm => bc(8, Snorm, true, false),
            Bc5RgUnorm => bc(16, Unorm, false, false),
            Bc5RgSnorm => bc(16, Snorm, true, false),
            Bc6hRgbUfloat => bc(16, Float, false, false),
            Bc6hRgbSfloat => bc(16, Float, true, false),
            Bc7RgbaUnorm => bc(16, Unorm, false, false),
            Bc7RgbaUnormSrgb => bc(16, Unorm, false, true),
        }
    }

    /// Bytes per block (per texel for uncompressed formats)
    pub const fn bytes_per_block(self) -> u32 {
        self.info().bytes_per_block
    }

    /// Whether the format has a depth aspect
    pub const fn is_depth(self) -> bool {
        self.info().aspect.contains(FormatAspect::DEPTH)
    }

    /// Whether the format has a stencil aspect
    pub const fn has_stencil(self) -> bool {
        self.info().aspect.contains(FormatAspect::STENCIL)
    }

    /// Whether the format is block compressed
    pub const fn is_compressed(self) -> bool {
        self.info().block_width > 1
    }

    /// Whether the format is sRGB encoded
    pub const fn is_srgb(self) -> bool {
        self.info().srgb
    }

    /// The sRGB pair of a linear format; identity when no pair exists
    pub const fn linear_to_srgb(self) -> PixelFormat {
        use PixelFormat::*;
        match self {
            Rgba8Unorm => Rgba8UnormSrgb,
            Bgra8Unorm => Bgra8UnormSrgb,
            Bc1RgbaUnorm => Bc1RgbaUnormSrgb,
            Bc2RgbaUnorm => Bc2RgbaUnormSrgb,
            Bc3RgbaUnorm => Bc3RgbaUnormSrgb,
            Bc7RgbaUnorm => Bc7RgbaUnormSrgb,
            other => other,
        }
    }

    /// The linear pair of an sRGB format; identity on non-sRGB formats
    pub const fn srgb_to_linear(self) -> PixelFormat {
        use PixelFormat::*;
        match self {
            Rgba8UnormSrgb => Rgba8Unorm,
            Bgra8UnormSrgb => Bgra8Unorm,
            Bc1RgbaUnormSrgb => Bc1RgbaUnorm,
            Bc2RgbaUnormSrgb => Bc2RgbaUnorm,
            Bc3RgbaUnormSrgb => Bc3RgbaUnorm,
            Bc7RgbaUnormSrgb => Bc7RgbaUnorm,
            other => other,
        }
    }

    /// The format a typeless depth texture is viewed as for shader reads
    ///
    /// Returns `None` for formats without a plain-color alias.
    pub const fn depth_read_alias(self) -> Option<PixelFormat> {
        use PixelFormat::*;
        match self {
            Depth16Unorm => Some(R16Unorm),
            Depth32Float | Depth32FloatStencil8 => Some(R32Float),
            Depth24UnormStencil8 => Some(R32Uint),
            _ => None,
        }
    }

    /// Bytes per row of texels at the given width, honoring block compression
    pub const fn row_pitch(self, width: u32) -> u32 {
        let info = self.info();
        let blocks = width.div_ceil(info.block_width);
        blocks * info.bytes_per_block
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
#[path = "format_tests.rs"]
mod tests;
