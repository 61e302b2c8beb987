//! Command recorder trait and barrier tracking
//!
//! A recorder acquired from the device is valid only until the next
//! `submit_command_lists`. Recording is single-threaded per recorder;
//! different recorders may record in parallel on different threads.

use std::any::Any;
use std::sync::Arc;

use crate::buffer::BufferHandle;
use crate::error::RhiResult;
use crate::pipeline::PipelineStateHandle;
use crate::query::QueryHeapHandle;
use crate::raytracing::{AccelerationStructureHandle, RaytracingPipelineDesc};
use crate::render_pass::{RenderPassHandle, ResourceLayout};
use crate::swapchain::SwapChainHandle;
use crate::texture::TextureHandle;
use crate::types::{ClearValue, IndexFormat, QueueKind, Rect2D, ShadingRate, Viewport};

/// Identifies a command list within the current frame.
///
/// Assigned in acquisition order by `begin_command_buffer`; a recorder may
/// declare a wait only on a list with a smaller id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CommandListId(pub u32);

/// Command recorder trait
pub trait CommandRecorder: Send {
    /// This recorder's id within the current frame
    fn id(&self) -> CommandListId;

    /// The queue the list will be submitted to
    fn queue(&self) -> QueueKind;

    /// Declare that this list must not start before `earlier` completes.
    /// `earlier` must have a smaller id. The submit pass breaks the batch
    /// here and inserts a timeline-semaphore wait.
    fn wait_for(&mut self, earlier: CommandListId) -> RhiResult<()>;

    // ===== RENDER PASSES =====

    /// Begin rendering into a swap chain's current back buffer.
    /// Inserts the implicit PRESENT -> RENDER_TARGET transition.
    fn begin_render_pass_swap_chain(
        &mut self,
        swap_chain: &SwapChainHandle,
        clear: ClearValue,
    ) -> RhiResult<()>;

    /// Begin a render pass object
    fn begin_render_pass(&mut self, render_pass: &RenderPassHandle) -> RhiResult<()>;

    /// End the current render pass. For a swap-chain pass this records the
    /// RENDER_TARGET -> PRESENT transition and marks the chain for
    /// presentation at submit.
    fn end_render_pass(&mut self) -> RhiResult<()>;

    // ===== FIXED FUNCTION STATE =====

    fn set_viewports(&mut self, viewports: &[Viewport]) -> RhiResult<()>;
    fn set_scissors(&mut self, scissors: &[Rect2D]) -> RhiResult<()>;
    fn set_stencil_reference(&mut self, reference: u32) -> RhiResult<()>;
    fn set_blend_factor(&mut self, factor: [f32; 4]) -> RhiResult<()>;
    fn set_shading_rate(&mut self, rate: ShadingRate) -> RhiResult<()>;

    // ===== BINDING =====

    fn bind_pipeline(&mut self, pipeline: &PipelineStateHandle) -> RhiResult<()>;
    fn bind_raytracing_pipeline(&mut self, desc: &RaytracingPipelineDesc) -> RhiResult<()>;

    /// Bind a vertex buffer. The stride feeds the per-recorder vertex-stride
    /// digest; on the Vulkan backend the digest selects the concrete pipeline.
    fn bind_vertex_buffer(
        &mut self,
        slot: u32,
        buffer: &BufferHandle,
        offset: u64,
        stride: u32,
    ) -> RhiResult<()>;

    fn bind_index_buffer(
        &mut self,
        buffer: &BufferHandle,
        offset: u64,
        format: IndexFormat,
    ) -> RhiResult<()>;

    /// Legacy single-slot constant-buffer bind (set 0 / root descriptor)
    fn bind_constant_buffer(&mut self, slot: u32, buffer: &BufferHandle) -> RhiResult<()>;

    /// Legacy single-slot shader-resource bind
    fn bind_shader_resource(&mut self, slot: u32, texture: &TextureHandle) -> RhiResult<()>;

    /// Legacy single-slot unordered-access bind
    fn bind_unordered_access(&mut self, slot: u32, texture: &TextureHandle) -> RhiResult<()>;

    /// Stage push constants (<= 128 bytes), flushed at the next draw/dispatch
    fn push_constants(&mut self, offset: u32, data: &[u8]) -> RhiResult<()>;

    // ===== DRAW / DISPATCH =====

    fn draw(&mut self, vertex_count: u32, first_vertex: u32) -> RhiResult<()>;
    fn draw_instanced(
        &mut self,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    ) -> RhiResult<()>;
    fn draw_indexed(
        &mut self,
        index_count: u32,
        first_index: u32,
        vertex_offset: i32,
    ) -> RhiResult<()>;
    fn draw_indexed_instanced(
        &mut self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    ) -> RhiResult<()>;
    fn draw_indirect(&mut self, args: &BufferHandle, offset: u64, draw_count: u32) -> RhiResult<()>;

    fn dispatch(&mut self, x: u32, y: u32, z: u32) -> RhiResult<()>;
    fn dispatch_indirect(&mut self, args: &BufferHandle, offset: u64) -> RhiResult<()>;
    fn dispatch_mesh(&mut self, x: u32, y: u32, z: u32) -> RhiResult<()>;
    fn dispatch_rays(&mut self, width: u32, height: u32, depth: u32) -> RhiResult<()>;

    // ===== TRANSFER =====

    fn copy_buffer(
        &mut self,
        src: &BufferHandle,
        src_offset: u64,
        dst: &BufferHandle,
        dst_offset: u64,
        size: u64,
    ) -> RhiResult<()>;

    fn copy_texture(&mut self, src: &TextureHandle, dst: &TextureHandle) -> RhiResult<()>;

    fn copy_buffer_to_texture(
        &mut self,
        src: &BufferHandle,
        src_offset: u64,
        dst: &TextureHandle,
        subresource: u32,
    ) -> RhiResult<()>;

    fn copy_texture_to_buffer(
        &mut self,
        src: &TextureHandle,
        subresource: u32,
        dst: &BufferHandle,
        dst_offset: u64,
    ) -> RhiResult<()>;

    /// Inline buffer update for small uploads
    fn update_buffer(&mut self, buffer: &BufferHandle, offset: u64, data: &[u8]) -> RhiResult<()>;

    // ===== BARRIERS =====

    /// Queue a barrier; queued barriers are coalesced and flushed in a single
    /// native call before the next draw/dispatch/copy
    fn barrier(&mut self, barrier: Barrier) -> RhiResult<()>;

    // ===== QUERIES =====

    fn begin_query(&mut self, heap: &QueryHeapHandle, index: u32) -> RhiResult<()>;
    fn end_query(&mut self, heap: &QueryHeapHandle, index: u32) -> RhiResult<()>;
    fn resolve_query(
        &mut self,
        heap: &QueryHeapHandle,
        first: u32,
        count: u32,
        dst: &BufferHandle,
        dst_offset: u64,
    ) -> RhiResult<()>;

    // ===== RAYTRACING =====

    fn build_acceleration_structure(
        &mut self,
        acceleration_structure: &AccelerationStructureHandle,
    ) -> RhiResult<()>;

    // ===== DEBUG =====

    fn begin_event(&mut self, name: &str);
    fn end_event(&mut self);
    fn marker(&mut self, name: &str);

    // ===== DOWNCASTING =====

    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;

    /// Owned downcast used by the submit pass
    fn into_any(self: Box<Self>) -> Box<dyn Any>;
}

/// A queued barrier
#[derive(Clone)]
pub enum Barrier {
    /// Image layout transition for a texture sub-range
    Texture {
        texture: TextureHandle,
        /// `None` transitions every subresource
        subresource: Option<u32>,
        src: ResourceLayout,
        dst: ResourceLayout,
    },
    /// Buffer access transition
    Buffer {
        buffer: BufferHandle,
        src: ResourceLayout,
        dst: ResourceLayout,
    },
    /// Global memory barrier
    Memory,
}

// ============================================================================
// Barrier batch: shared coalescing logic
// ============================================================================

/// Resource identity used to coalesce duplicate transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct BarrierKey {
    resource: usize,
    subresource: Option<u32>,
}

/// Pending texture transition after coalescing
#[derive(Clone)]
pub struct PendingTextureBarrier {
    pub texture: TextureHandle,
    pub subresource: Option<u32>,
    pub src: ResourceLayout,
    pub dst: ResourceLayout,
}

/// Pending buffer transition after coalescing
#[derive(Clone)]
pub struct PendingBufferBarrier {
    pub buffer: BufferHandle,
    pub src: ResourceLayout,
    pub dst: ResourceLayout,
}

/// Accumulates barriers between draws and coalesces them.
///
/// Rules: duplicate transitions of the same (resource, sub-range) collapse
/// into one keeping the earliest `src` and the later `dst`; transitions with
/// `src == dst` are dropped. Backends flush the batch in one native
/// pipeline-barrier call before any draw/dispatch/present.
#[derive(Default)]
pub struct BarrierBatch {
    textures: Vec<PendingTextureBarrier>,
    buffers: Vec<PendingBufferBarrier>,
    memory: bool,
}

impl BarrierBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue one barrier
    pub fn push(&mut self, barrier: Barrier) {
        match barrier {
            Barrier::Texture {
                texture,
                subresource,
                src,
                dst,
            } => {
                let key = BarrierKey {
                    resource: Arc::as_ptr(&texture) as *const () as usize,
                    subresource,
                };
                if let Some(existing) = self.textures.iter_mut().find(|b| {
                    BarrierKey {
                        resource: Arc::as_ptr(&b.texture) as *const () as usize,
                        subresource: b.subresource,
                    } == key
                }) {
                    // Collapse: keep original src, take the later dst
                    existing.dst = dst;
                } else {
                    self.textures.push(PendingTextureBarrier {
                        texture,
                        subresource,
                        src,
                        dst,
                    });
                }
            }
            Barrier::Buffer { buffer, src, dst } => {
                let resource = Arc::as_ptr(&buffer) as *const () as usize;
                if let Some(existing) = self
                    .buffers
                    .iter_mut()
                    .find(|b| Arc::as_ptr(&b.buffer) as *const () as usize == resource)
                {
                    existing.dst = dst;
                } else {
                    self.buffers.push(PendingBufferBarrier { buffer, src, dst });
                }
            }
            Barrier::Memory => self.memory = true,
        }
    }

    /// Whether a flush would emit anything
    pub fn is_empty(&self) -> bool {
        self.textures.is_empty() && self.buffers.is_empty() && !self.memory
    }

    /// Drain the coalesced batch, dropping no-op transitions.
    /// Returns `(texture_barriers, buffer_barriers, memory_barrier)`.
    pub fn take(&mut self) -> (Vec<PendingTextureBarrier>, Vec<PendingBufferBarrier>, bool) {
        let textures = std::mem::take(&mut self.textures)
            .into_iter()
            .filter(|b| b.src != b.dst)
            .collect();
        let buffers = std::mem::take(&mut self.buffers)
            .into_iter()
            .filter(|b| b.src != b.dst)
            .collect();
        let memory = std::mem::replace(&mut self.memory, false);
        (textures, buffers, memory)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
#[path = "command_tests.rs"]
mod tests;
