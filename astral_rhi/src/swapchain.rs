//! Swap chain descriptor and trait

use std::sync::Arc;

use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

use crate::error::RhiResult;
use crate::format::PixelFormat;
use crate::texture::TextureViewDesc;

/// Anything that can produce native window/display handles.
///
/// Blanket-implemented for winit windows and any other
/// `raw-window-handle` 0.6 provider.
pub trait WindowSource: HasWindowHandle + HasDisplayHandle {}

impl<T: HasWindowHandle + HasDisplayHandle> WindowSource for T {}

/// Descriptor for creating a swap chain
#[derive(Debug, Clone)]
pub struct SwapChainDesc {
    pub width: u32,
    pub height: u32,
    /// `Undefined` defaults to `Bgra8Unorm`
    pub format: PixelFormat,
    pub vsync: bool,
    pub fullscreen: bool,
}

impl Default for SwapChainDesc {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            format: PixelFormat::Undefined,
            vsync: true,
            fullscreen: false,
        }
    }
}

impl SwapChainDesc {
    /// The back-buffer format after defaulting
    pub fn resolved_format(&self) -> PixelFormat {
        match self.format {
            PixelFormat::Undefined => PixelFormat::Bgra8Unorm,
            other => other,
        }
    }
}

/// Swap chain trait
///
/// Owns the native surface, per-image back-buffer textures with their default
/// views, and the acquire/release synchronization objects. Views are torn
/// down and recreated on resize.
pub trait SwapChain: Send + Sync {
    /// Current descriptor; width/height track resizes
    fn desc(&self) -> SwapChainDesc;

    /// Back-buffer format after defaulting
    fn format(&self) -> PixelFormat {
        self.desc().resolved_format()
    }

    /// Fixed back-buffer count
    fn back_buffer_count(&self) -> u32 {
        crate::types::BACK_BUFFER_COUNT
    }

    /// Tear down per-image views and recreate the native chain at the new
    /// size, preserving the buffer count
    fn resize(&self, width: u32, height: u32) -> RhiResult<()>;

    /// Current surface extent
    fn extent(&self) -> (u32, u32);

    /// The view descriptor back buffers are created with
    fn default_view_desc(&self) -> TextureViewDesc {
        TextureViewDesc::all()
    }

    /// Downcast support for backends
    fn as_any(&self) -> &dyn std::any::Any;
}

/// Shared swap-chain handle
pub type SwapChainHandle = Arc<dyn SwapChain>;
