//! Texture descriptor, view descriptor, and traits

use std::sync::Arc;

use bitflags::bitflags;

use crate::bindless::BindlessIndex;
use crate::error::{RhiError, RhiResult};
use crate::format::PixelFormat;

/// Texture dimensionality
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TextureDimension {
    D1,
    #[default]
    D2,
    D3,
    /// `depth_or_array_size` counts whole cubes; the native image carries
    /// 6 layers per cube
    Cube,
}

bitflags! {
    /// How a texture may be used
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TextureUsage: u32 {
        const SAMPLED = 1 << 0;
        const STORAGE = 1 << 1;
        const RENDER_TARGET = 1 << 2;
        const DEPTH_STENCIL = 1 << 3;
    }
}

/// Data for a single layer uploaded at creation time
#[derive(Debug, Clone)]
pub struct TextureLayerData {
    /// Target layer index
    pub layer: u32,
    /// Raw texel bytes, tightly packed mip 0
    pub data: Vec<u8>,
}

/// Initial data for a texture
#[derive(Debug, Clone)]
pub enum TextureData {
    /// Data for layer 0
    Single(Vec<u8>),
    /// Per-layer data; unlisted layers stay uninitialized
    Layers(Vec<TextureLayerData>),
}

/// Descriptor for creating a texture
#[derive(Debug, Clone)]
pub struct TextureDesc {
    pub dimension: TextureDimension,
    pub format: PixelFormat,
    pub usage: TextureUsage,
    pub width: u32,
    pub height: u32,
    /// Depth for 3D textures, layer count otherwise.
    /// For cube textures this counts whole cubes, not layers.
    pub depth_or_array_size: u32,
    pub mip_levels: u32,
    pub sample_count: u32,
    pub debug_name: Option<String>,
}

impl Default for TextureDesc {
    fn default() -> Self {
        Self {
            dimension: TextureDimension::D2,
            format: PixelFormat::Rgba8Unorm,
            usage: TextureUsage::SAMPLED,
            width: 1,
            height: 1,
            depth_or_array_size: 1,
            mip_levels: 1,
            sample_count: 1,
            debug_name: None,
        }
    }
}

impl TextureDesc {
    /// Full mip chain length for the given extent
    pub fn max_mip_levels(width: u32, height: u32, depth: u32) -> u32 {
        let largest = width.max(height).max(depth).max(1);
        32 - largest.leading_zeros()
    }

    /// Layer count as the native image sees it: 6 layers per cube
    pub fn native_array_size(&self) -> u32 {
        match self.dimension {
            TextureDimension::Cube => self.depth_or_array_size.saturating_mul(6),
            TextureDimension::D3 => 1,
            _ => self.depth_or_array_size,
        }
    }

    /// Layer count as the caller sees it: cube textures report cube count
    pub fn array_size(&self) -> u32 {
        match self.dimension {
            TextureDimension::D3 => 1,
            _ => self.depth_or_array_size,
        }
    }

    /// Check descriptor invariants; backends call this before creation
    pub fn validate(&self) -> RhiResult<()> {
        if self.width == 0 || self.height == 0 || self.depth_or_array_size == 0 {
            return Err(RhiError::InvalidDescriptor("texture extent must be non-zero".into()));
        }
        if self.usage.contains(TextureUsage::DEPTH_STENCIL)
            && self.usage.contains(TextureUsage::RENDER_TARGET)
        {
            return Err(RhiError::InvalidDescriptor(
                "depth/stencil usage excludes render-target usage".into(),
            ));
        }
        if self.usage.contains(TextureUsage::DEPTH_STENCIL) != self.format.is_depth()
            && self.usage.contains(TextureUsage::DEPTH_STENCIL)
        {
            return Err(RhiError::InvalidDescriptor(
                "depth/stencil usage requires a depth format".into(),
            ));
        }
        if self.usage.contains(TextureUsage::STORAGE)
            && (self.format.is_depth() || self.format.is_srgb())
        {
            return Err(RhiError::InvalidDescriptor(
                "storage usage forbids depth and sRGB formats".into(),
            ));
        }
        let depth = if self.dimension == TextureDimension::D3 {
            self.depth_or_array_size
        } else {
            1
        };
        let max_mips = Self::max_mip_levels(self.width, self.height, depth);
        if self.mip_levels == 0 || self.mip_levels > max_mips {
            return Err(RhiError::InvalidDescriptor(format!(
                "mip_levels must be in 1..={} for this extent, got {}",
                max_mips, self.mip_levels
            )));
        }
        Ok(())
    }
}

/// Identifies a sub-range of a texture for view creation.
///
/// Zero `mip_count` or `layer_count` means "all remaining". `format: None`
/// defaults to the texture format (or its color alias for typeless depth
/// shader reads). The normalized form is the view-cache key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TextureViewDesc {
    pub base_mip: u32,
    pub mip_count: u32,
    pub base_layer: u32,
    pub layer_count: u32,
    pub format: Option<PixelFormat>,
}

impl TextureViewDesc {
    /// View of everything, with the texture's own format
    pub fn all() -> Self {
        Self::default()
    }

    /// Resolve "all remaining" counts and the default format against the
    /// parent texture. The result is the cache key: equal normalized descs
    /// yield the same view handle.
    pub fn normalized(self, texture: &TextureDesc) -> RhiResult<TextureViewDesc> {
        let native_layers = texture.native_array_size();
        if self.base_mip >= texture.mip_levels {
            return Err(RhiError::InvalidDescriptor(format!(
                "view base mip {} out of range ({} mips)",
                self.base_mip, texture.mip_levels
            )));
        }
        if self.base_layer >= native_layers {
            return Err(RhiError::InvalidDescriptor(format!(
                "view base layer {} out of range ({} layers)",
                self.base_layer, native_layers
            )));
        }
        let mip_count = if self.mip_count == 0 {
            texture.mip_levels - self.base_mip
        } else {
            self.mip_count
        };
        let layer_count = if self.layer_count == 0 {
            native_layers - self.base_layer
        } else {
            self.layer_count
        };
        if self.base_mip + mip_count > texture.mip_levels
            || self.base_layer + layer_count > native_layers
        {
            return Err(RhiError::InvalidDescriptor("view sub-range out of bounds".into()));
        }
        Ok(TextureViewDesc {
            base_mip: self.base_mip,
            mip_count,
            base_layer: self.base_layer,
            layer_count,
            format: Some(self.format.unwrap_or(texture.format)),
        })
    }
}

/// Texture view trait. Views are owned by their parent texture and released
/// with it.
pub trait TextureView: Send + Sync {
    /// The normalized descriptor this view was created from
    fn desc(&self) -> &TextureViewDesc;

    /// Bindless sampled-image slot
    fn bindless_srv(&self) -> BindlessIndex;

    /// Bindless storage-image slot, `UNBOUND` when the texture lacks STORAGE
    fn bindless_uav(&self) -> BindlessIndex;

    /// Downcast support for backends
    fn as_any(&self) -> &dyn std::any::Any;
}

/// Texture resource trait
pub trait Texture: Send + Sync {
    /// The descriptor this texture was created from
    fn desc(&self) -> &TextureDesc;

    /// Get (or create) the view for a sub-range. Repeated requests with an
    /// equal normalized descriptor return the same handle.
    fn get_view(&self, desc: TextureViewDesc) -> RhiResult<Arc<dyn TextureView>>;

    /// Bindless sampled-image slot of the full-texture default view
    fn bindless_srv(&self) -> BindlessIndex;

    /// Bindless storage-image slot of the full-texture default view
    fn bindless_uav(&self) -> BindlessIndex;

    /// Caller-facing layer count; a 2-cube array reports 2, not 12
    fn get_array_size(&self) -> u32 {
        self.desc().array_size()
    }

    /// Downcast support for backends
    fn as_any(&self) -> &dyn std::any::Any;
}

/// Shared texture handle
pub type TextureHandle = Arc<dyn Texture>;

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
#[path = "texture_tests.rs"]
mod tests;
