//! Buffer descriptor and trait

use std::sync::Arc;

use bitflags::bitflags;

use crate::bindless::BindlessIndex;
use crate::error::{RhiError, RhiResult};
use crate::format::PixelFormat;

bitflags! {
    /// How a buffer may be bound
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct BufferUsage: u32 {
        const VERTEX = 1 << 0;
        const INDEX = 1 << 1;
        const UNIFORM = 1 << 2;
        const SHADER_READ = 1 << 3;
        const SHADER_WRITE = 1 << 4;
        const INDIRECT = 1 << 5;
        const ACCELERATION_STRUCTURE_STORAGE = 1 << 6;
    }
}

impl Default for BufferUsage {
    fn default() -> Self {
        Self::empty()
    }
}

/// Where a buffer's memory lives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BufferResidency {
    /// GPU-only memory; initial data goes through the copy allocator
    #[default]
    DeviceLocal,
    /// Host-visible, written by the CPU, read by the GPU
    Upload,
    /// Host-visible, written by the GPU, read back by the CPU.
    /// Never bound as a shader resource.
    Readback,
    /// Uniform data sub-allocated per frame from a ring buffer
    Dynamic,
}

/// Descriptor for creating a buffer. Size never changes after creation.
#[derive(Debug, Clone, Default)]
pub struct BufferDesc {
    /// Size in bytes
    pub size: u64,
    /// Usage mask
    pub usage: BufferUsage,
    /// Residency class
    pub residency: BufferResidency,
    /// Element format for typed texel-buffer views
    pub format: Option<PixelFormat>,
    /// Structure stride for structured views, 0 for raw
    pub stride: u32,
    /// Optional debug name attached to the native object
    pub debug_name: Option<String>,
}

impl BufferDesc {
    /// Check descriptor invariants; backends call this before creation
    pub fn validate(&self) -> RhiResult<()> {
        if self.size == 0 {
            return Err(RhiError::InvalidDescriptor("buffer size must be non-zero".into()));
        }
        if self.residency == BufferResidency::Readback
            && self
                .usage
                .intersects(BufferUsage::SHADER_READ | BufferUsage::SHADER_WRITE | BufferUsage::UNIFORM)
        {
            return Err(RhiError::InvalidDescriptor(
                "readback buffers are never bound as shader resources".into(),
            ));
        }
        if self.residency == BufferResidency::Dynamic && !self.usage.contains(BufferUsage::UNIFORM) {
            return Err(RhiError::InvalidDescriptor(
                "dynamic residency is only valid for uniform buffers".into(),
            ));
        }
        Ok(())
    }
}

/// A sub-range of a buffer, used to key sub-range view caches.
/// `size == 0` means "to the end of the buffer".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct BufferRange {
    pub offset: u64,
    pub size: u64,
}

impl BufferRange {
    /// Resolve a zero size against the parent buffer size and bounds-check
    /// the result
    pub fn resolve(self, buffer_size: u64) -> RhiResult<BufferRange> {
        if self.offset > buffer_size {
            return Err(RhiError::InvalidDescriptor(format!(
                "range offset {} exceeds buffer size {}",
                self.offset, buffer_size
            )));
        }
        let size = if self.size == 0 { buffer_size - self.offset } else { self.size };
        if self.offset.checked_add(size).map_or(true, |end| end > buffer_size) {
            return Err(RhiError::InvalidDescriptor(format!(
                "range {}+{} exceeds buffer size {}",
                self.offset, size, buffer_size
            )));
        }
        Ok(BufferRange { offset: self.offset, size })
    }
}

/// Buffer resource trait
///
/// Implemented by backend buffer types. Dropping the last handle enqueues the
/// native object into the device destroy queue; it is released once the frame
/// that last referenced it retires.
pub trait Buffer: Send + Sync {
    /// The descriptor this buffer was created from
    fn desc(&self) -> &BufferDesc;

    /// Bindless uniform-buffer slot, `UNBOUND` when usage lacks UNIFORM
    fn bindless_cbv(&self) -> BindlessIndex;

    /// Bindless shader-read slot, `UNBOUND` when usage lacks SHADER_READ
    fn bindless_srv(&self) -> BindlessIndex;

    /// Bindless shader-write slot, `UNBOUND` when usage lacks SHADER_WRITE
    fn bindless_uav(&self) -> BindlessIndex;

    /// Bindless shader-read slot for a sub-range; views are cached per range.
    /// Typed when the buffer carries a format, raw otherwise.
    fn bindless_srv_range(&self, range: BufferRange) -> RhiResult<BindlessIndex>;

    /// Bindless shader-write slot for a sub-range; views are cached per range
    fn bindless_uav_range(&self, range: BufferRange) -> RhiResult<BindlessIndex>;

    /// Write bytes through the persistent mapping.
    /// Only valid on Upload and Dynamic residency.
    fn update(&self, offset: u64, data: &[u8]) -> RhiResult<()>;

    /// Read bytes through the persistent mapping.
    /// Only valid on Readback and Upload residency.
    fn read(&self, offset: u64, out: &mut [u8]) -> RhiResult<()>;

    /// Downcast support for backends
    fn as_any(&self) -> &dyn std::any::Any;
}

/// Shared buffer handle
pub type BufferHandle = Arc<dyn Buffer>;

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
#[path = "buffer_tests.rs"]
mod tests;
