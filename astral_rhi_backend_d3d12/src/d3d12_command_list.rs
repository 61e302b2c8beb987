//! D3D12 command recorder
//!
//! Wraps one native graphics command list for the frame. Barriers queue into
//! a `BarrierBatch` and flush as a single enhanced-barrier call before the
//! next render pass, dispatch or copy. Unlike the Vulkan backend there are no
//! stride-keyed pipeline variants; vertex strides travel in the buffer views
//! bound at `IASetVertexBuffers` time.

use std::any::Any;
use std::sync::Arc;

use windows::Win32::Foundation::RECT;
use windows::Win32::Graphics::Direct3D12::*;

use astral_rhi::{
    AccelerationStructureHandle, Barrier, BarrierBatch, Buffer, BufferHandle, BufferUsage,
    ClearValue, CommandListId, CommandRecorder, IndexFormat, PipelineBindPoint, PipelineState,
    PipelineStateHandle, QueryHeap, QueryHeapHandle, QueryKind, QueueKind, RaytracingPipelineDesc,
    RenderPassHandle, ResourceLayout, RhiError, RhiResult, ShadingRate, SwapChain,
    SwapChainHandle, Texture, TextureHandle, TextureUsage, Viewport, Rect2D,
    PUSH_CONSTANT_CAPACITY,
};

use crate::d3d12_buffer::D3d12Buffer;
use crate::d3d12_context::GpuContext;
use crate::d3d12_convert::{
    aligned_row_pitch, format_to_dxgi, index_format_to_dxgi, layout_access_to_d3d12,
    layout_sync_to_d3d12, layout_to_d3d12, query_type_to_d3d12, shading_rate_to_d3d12,
};
use crate::d3d12_descriptors::{ROOT_PARAM_CONSTANTS, ROOT_PARAM_RESOURCES, ROOT_PARAM_SAMPLERS};
use crate::d3d12_pipeline::D3d12Pipeline;
use crate::d3d12_query::D3d12QueryHeap;
use crate::d3d12_raytracing::{D3d12AccelerationStructure, D3d12RaytracingPipeline};
use crate::d3d12_render_pass::D3d12RenderPass;
use crate::d3d12_swapchain::D3d12SwapChain;
use crate::d3d12_texture::D3d12Texture;

/// Handles a recorded list keeps alive until its frame retires
pub(crate) enum Retained {
    Buffer(BufferHandle),
    Texture(TextureHandle),
    Pipeline(PipelineStateHandle),
    RenderPass(RenderPassHandle),
    QueryHeap(QueryHeapHandle),
    SwapChain(SwapChainHandle),
    AccelerationStructure(AccelerationStructureHandle),
    /// Transient upload buffer backing an inline `update_buffer`
    Staging(D3d12Buffer),
}

/// Root bind points sharing the bindless root signature
const BIND_GRAPHICS: usize = 0;
/// Compute also covers raytracing; DispatchRays reads compute root bindings
const BIND_COMPUTE: usize = 1;

/// D3D12 implementation of [`CommandRecorder`]
pub struct D3d12CommandRecorder {
    id: CommandListId,
    queue_kind: QueueKind,
    pub(crate) waits: Vec<CommandListId>,
    pub(crate) list: ID3D12GraphicsCommandList7,

    barriers: BarrierBatch,
    in_render_pass: bool,
    active_swap_chain: Option<SwapChainHandle>,
    active_render_pass: Option<RenderPassHandle>,
    pub(crate) swap_chains_used: Vec<SwapChainHandle>,

    bound_pipeline: Option<PipelineStateHandle>,
    /// Pipeline created on the fly by `bind_raytracing_pipeline`
    transient_raytracing: Option<Arc<D3d12RaytracingPipeline>>,

    push_data: [u8; PUSH_CONSTANT_CAPACITY],
    push_len: usize,
    push_dirty: [bool; 2],
    heaps_set: bool,
    /// Root signature + descriptor tables bound per root bind point
    descriptors_bound: [bool; 2],

    pub(crate) retained: Vec<Retained>,
    ctx: Arc<GpuContext>,
}

fn downcast_buffer(handle: &BufferHandle) -> RhiResult<&D3d12Buffer> {
    handle
        .as_any()
        .downcast_ref::<D3d12Buffer>()
        .ok_or_else(|| RhiError::ValidationError("foreign buffer handle".into()))
}

fn downcast_texture(handle: &TextureHandle) -> RhiResult<&D3d12Texture> {
    handle
        .as_any()
        .downcast_ref::<D3d12Texture>()
        .ok_or_else(|| RhiError::ValidationError("foreign texture handle".into()))
}

/// Extent of `mip` given the base dimension
fn mip_extent(base: u32, mip: u32) -> u32 {
    (base >> mip).max(1)
}

impl D3d12CommandRecorder {
    /// Wraps a list already reset against its frame allocator
    pub(crate) fn new(
        ctx: Arc<GpuContext>,
        id: CommandListId,
        queue: QueueKind,
        list: ID3D12GraphicsCommandList7,
    ) -> Self {
        Self {
            id,
            queue_kind: queue,
            waits: Vec::new(),
            list,
            barriers: BarrierBatch::new(),
            in_render_pass: false,
            active_swap_chain: None,
            active_render_pass: None,
            swap_chains_used: Vec::new(),
            bound_pipeline: None,
            transient_raytracing: None,
            push_data: [0; PUSH_CONSTANT_CAPACITY],
            push_len: 0,
            push_dirty: [false; 2],
            heaps_set: false,
            descriptors_bound: [false; 2],
            retained: Vec::new(),
            ctx,
        }
    }

    /// End recording; the device submits the returned list
    pub(crate) fn finish(&mut self) -> RhiResult<ID3D12GraphicsCommandList7> {
        if self.in_render_pass {
            return Err(RhiError::ValidationError(
                "submitted list has an open render pass".into(),
            ));
        }
        self.flush_barriers()?;
        unsafe {
            self.list
                .Close()
                .map_err(|e| astral_rhi::rhi_err!("Failed to close command list: {:?}", e))?;
        }
        Ok(self.list.clone())
    }

    // ===== VALIDATION HELPERS =====

    fn require_render_pass(&self) -> RhiResult<()> {
        if !self.in_render_pass {
            return Err(RhiError::ValidationError(
                "draw recorded outside a render pass".into(),
            ));
        }
        Ok(())
    }

    fn require_bind_point(&self, bind_point: PipelineBindPoint) -> RhiResult<()> {
        match &self.bound_pipeline {
            Some(pipeline) if pipeline.bind_point() == bind_point => Ok(()),
            _ => Err(RhiError::ValidationError(format!(
                "no {:?} pipeline bound",
                bind_point
            ))),
        }
    }

    fn require_queue(&self, allowed: &[QueueKind], what: &str) -> RhiResult<()> {
        if allowed.contains(&self.queue_kind) {
            Ok(())
        } else {
            Err(RhiError::ValidationError(format!(
                "{} is not valid on the {:?} queue",
                what, self.queue_kind
            )))
        }
    }

    fn buffer_range(buffer: &BufferHandle, offset: u64, len: u64) -> RhiResult<()> {
        if offset.checked_add(len).map_or(true, |end| end > buffer.desc().size) {
            return Err(RhiError::ValidationError(format!(
                "range {}..{} out of bounds for buffer of size {}",
                offset,
                offset.saturating_add(len),
                buffer.desc().size
            )));
        }
        Ok(())
    }

    // ===== BARRIER FLUSH =====

    fn flush_barriers(&mut self) -> RhiResult<()> {
        if self.barriers.is_empty() {
            return Ok(());
        }
        let (textures, buffers, memory) = self.barriers.take();
        if textures.is_empty() && buffers.is_empty() && !memory {
            return Ok(());
        }

        let mut texture_barriers = Vec::with_capacity(textures.len());
        for barrier in &textures {
            let Some(texture) = barrier.texture.as_any().downcast_ref::<D3d12Texture>() else {
                continue;
            };
            let subresources = match barrier.subresource {
                // NumMipLevels == 0 marks the index as a flat subresource id
                Some(index) => D3D12_BARRIER_SUBRESOURCE_RANGE {
                    IndexOrFirstMipLevel: index,
                    ..Default::default()
                },
                None => D3D12_BARRIER_SUBRESOURCE_RANGE {
                    IndexOrFirstMipLevel: u32::MAX,
                    ..Default::default()
                },
            };
            texture_barriers.push(D3D12_TEXTURE_BARRIER {
                SyncBefore: layout_sync_to_d3d12(barrier.src),
                SyncAfter: layout_sync_to_d3d12(barrier.dst),
                AccessBefore: layout_access_to_d3d12(barrier.src),
                AccessAfter: layout_access_to_d3d12(barrier.dst),
                LayoutBefore: layout_to_d3d12(barrier.src),
                LayoutAfter: layout_to_d3d12(barrier.dst),
                pResource: unsafe { std::mem::transmute_copy(&texture.resource) },
                Subresources: subresources,
                Flags: D3D12_TEXTURE_BARRIER_FLAG_NONE,
            });
        }

        let mut buffer_barriers = Vec::with_capacity(buffers.len());
        for barrier in &buffers {
            let Some(buffer) = barrier.buffer.as_any().downcast_ref::<D3d12Buffer>() else {
                continue;
            };
            buffer_barriers.push(D3D12_BUFFER_BARRIER {
                SyncBefore: layout_sync_to_d3d12(barrier.src),
                SyncAfter: layout_sync_to_d3d12(barrier.dst),
                AccessBefore: layout_access_to_d3d12(barrier.src),
                AccessAfter: layout_access_to_d3d12(barrier.dst),
                pResource: unsafe { std::mem::transmute_copy(&buffer.resource) },
                Offset: 0,
                Size: u64::MAX,
            });
        }

        let global_barriers = if memory {
            vec![D3D12_GLOBAL_BARRIER {
                SyncBefore: D3D12_BARRIER_SYNC_ALL,
                SyncAfter: D3D12_BARRIER_SYNC_ALL,
                AccessBefore: D3D12_BARRIER_ACCESS_COMMON,
                AccessAfter: D3D12_BARRIER_ACCESS_COMMON,
            }]
        } else {
            Vec::new()
        };

        let mut groups: Vec<D3D12_BARRIER_GROUP> = Vec::with_capacity(3);
        if !texture_barriers.is_empty() {
            groups.push(D3D12_BARRIER_GROUP {
                Type: D3D12_BARRIER_TYPE_TEXTURE,
                NumBarriers: texture_barriers.len() as u32,
                Anonymous: D3D12_BARRIER_GROUP_0 {
                    pTextureBarriers: texture_barriers.as_ptr(),
                },
            });
        }
        if !buffer_barriers.is_empty() {
            groups.push(D3D12_BARRIER_GROUP {
                Type: D3D12_BARRIER_TYPE_BUFFER,
                NumBarriers: buffer_barriers.len() as u32,
                Anonymous: D3D12_BARRIER_GROUP_0 {
                    pBufferBarriers: buffer_barriers.as_ptr(),
                },
            });
        }
        if !global_barriers.is_empty() {
            groups.push(D3D12_BARRIER_GROUP {
                Type: D3D12_BARRIER_TYPE_GLOBAL,
                NumBarriers: global_barriers.len() as u32,
                Anonymous: D3D12_BARRIER_GROUP_0 {
                    pGlobalBarriers: global_barriers.as_ptr(),
                },
            });
        }
        unsafe { self.list.Barrier(&groups) };

        for barrier in textures {
            self.retained.push(Retained::Texture(barrier.texture));
        }
        for barrier in buffers {
            self.retained.push(Retained::Buffer(barrier.buffer));
        }
        Ok(())
    }

    /// Immediate whole-resource layout transition, bypassing the batch
    fn layout_transition(
        &self,
        resource: &ID3D12Resource,
        subresource: Option<u32>,
        src: ResourceLayout,
        dst: ResourceLayout,
    ) {
        let subresources = match subresource {
            Some(index) => D3D12_BARRIER_SUBRESOURCE_RANGE {
                IndexOrFirstMipLevel: index,
                ..Default::default()
            },
            None => D3D12_BARRIER_SUBRESOURCE_RANGE {
                IndexOrFirstMipLevel: u32::MAX,
                ..Default::default()
            },
        };
        let barrier = D3D12_TEXTURE_BARRIER {
            SyncBefore: layout_sync_to_d3d12(src),
            SyncAfter: layout_sync_to_d3d12(dst),
            AccessBefore: layout_access_to_d3d12(src),
            AccessAfter: layout_access_to_d3d12(dst),
            LayoutBefore: layout_to_d3d12(src),
            LayoutAfter: layout_to_d3d12(dst),
            pResource: unsafe { std::mem::transmute_copy(resource) },
            Subresources: subresources,
            Flags: D3D12_TEXTURE_BARRIER_FLAG_NONE,
        };
        let group = D3D12_BARRIER_GROUP {
            Type: D3D12_BARRIER_TYPE_TEXTURE,
            NumBarriers: 1,
            Anonymous: D3D12_BARRIER_GROUP_0 {
                pTextureBarriers: &barrier,
            },
        };
        unsafe { self.list.Barrier(&[group]) };
    }

    // ===== BIND STATE =====

    fn bind_descriptors(&mut self, slot: usize) {
        if !self.heaps_set {
            let heaps = [
                Some(self.ctx.bindless.resources.heap.clone()),
                Some(self.ctx.bindless.samplers.heap.clone()),
            ];
            unsafe { self.list.SetDescriptorHeaps(&heaps) };
            self.heaps_set = true;
        }
        if self.descriptors_bound[slot] {
            return;
        }
        let root_signature = self.ctx.bindless.root_signature();
        unsafe {
            if slot == BIND_GRAPHICS {
                self.list.SetGraphicsRootSignature(root_signature);
                self.list.SetGraphicsRootDescriptorTable(
                    ROOT_PARAM_RESOURCES,
                    self.ctx.bindless.resources.gpu_base(),
                );
                self.list.SetGraphicsRootDescriptorTable(
                    ROOT_PARAM_SAMPLERS,
                    self.ctx.bindless.samplers.gpu_base(),
                );
            } else {
                self.list.SetComputeRootSignature(root_signature);
                self.list.SetComputeRootDescriptorTable(
                    ROOT_PARAM_RESOURCES,
                    self.ctx.bindless.resources.gpu_base(),
                );
                self.list.SetComputeRootDescriptorTable(
                    ROOT_PARAM_SAMPLERS,
                    self.ctx.bindless.samplers.gpu_base(),
                );
            }
        }
        self.descriptors_bound[slot] = true;
    }

    fn flush_push_constants(&mut self, slot: usize) {
        if !self.push_dirty[slot] || self.push_len == 0 {
            return;
        }
        let count = (self.push_len as u32).div_ceil(4);
        unsafe {
            if slot == BIND_GRAPHICS {
                self.list.SetGraphicsRoot32BitConstants(
                    ROOT_PARAM_CONSTANTS,
                    count,
                    self.push_data.as_ptr() as *const std::ffi::c_void,
                    0,
                );
            } else {
                self.list.SetComputeRoot32BitConstants(
                    ROOT_PARAM_CONSTANTS,
                    count,
                    self.push_data.as_ptr() as *const std::ffi::c_void,
                    0,
                );
            }
        }
        self.push_dirty[slot] = false;
    }

    fn prepare_draw(&mut self) -> RhiResult<()> {
        self.require_queue(&[QueueKind::Graphics], "draw")?;
        self.require_render_pass()?;
        self.require_bind_point(PipelineBindPoint::Graphics)?;
        self.bind_descriptors(BIND_GRAPHICS);
        self.flush_push_constants(BIND_GRAPHICS);
        Ok(())
    }

    fn prepare_dispatch(&mut self) -> RhiResult<()> {
        self.require_queue(&[QueueKind::Graphics, QueueKind::Compute], "dispatch")?;
        self.require_bind_point(PipelineBindPoint::Compute)?;
        self.flush_barriers()?;
        self.bind_descriptors(BIND_COMPUTE);
        self.flush_push_constants(BIND_COMPUTE);
        Ok(())
    }

    fn raytracing_tables(
        &self,
    ) -> RhiResult<(
        D3D12_GPU_VIRTUAL_ADDRESS_RANGE,
        D3D12_GPU_VIRTUAL_ADDRESS_RANGE_AND_STRIDE,
        D3D12_GPU_VIRTUAL_ADDRESS_RANGE_AND_STRIDE,
    )> {
        if let Some(pipeline) = &self.transient_raytracing {
            return Ok((pipeline.raygen_record, pipeline.miss_table, pipeline.hit_table));
        }
        let pipeline = self
            .bound_pipeline
            .as_ref()
            .and_then(|p| p.as_any().downcast_ref::<D3d12RaytracingPipeline>())
            .ok_or_else(|| RhiError::ValidationError("no raytracing pipeline bound".into()))?;
        Ok((pipeline.raygen_record, pipeline.miss_table, pipeline.hit_table))
    }
}

impl CommandRecorder for D3d12CommandRecorder {
    fn id(&self) -> CommandListId {
        self.id
    }

    fn queue(&self) -> QueueKind {
        self.queue_kind
    }

    fn wait_for(&mut self, earlier: CommandListId) -> RhiResult<()> {
        if earlier >= self.id {
            return Err(RhiError::ValidationError(format!(
                "list {} cannot wait for {}; waits only reference earlier lists",
                self.id.0, earlier.0
            )));
        }
        if !self.waits.contains(&earlier) {
            self.waits.push(earlier);
        }
        Ok(())
    }

    fn begin_render_pass_swap_chain(
        &mut self,
        swap_chain: &SwapChainHandle,
        clear: ClearValue,
    ) -> RhiResult<()> {
        self.require_queue(&[QueueKind::Graphics], "render pass")?;
        if self.in_render_pass {
            return Err(RhiError::ValidationError("render pass already open".into()));
        }
        let d3d12 = swap_chain
            .as_any()
            .downcast_ref::<D3d12SwapChain>()
            .ok_or_else(|| RhiError::ValidationError("foreign swap chain".into()))?;

        self.flush_barriers()?;

        let back_buffer = d3d12.current_back_buffer()?;
        // Contents are cleared, so the source layout can be UNDEFINED
        self.layout_transition(
            &back_buffer.resource,
            None,
            ResourceLayout::Undefined,
            ResourceLayout::RenderTarget,
        );

        let rtv = back_buffer.rtv_handle(0)?;
        let color = match clear {
            ClearValue::Color(color) => color,
            ClearValue::DepthStencil { .. } => [0.0; 4],
        };
        unsafe {
            self.list
                .OMSetRenderTargets(1, Some(&rtv as *const _), false, None);
            self.list.ClearRenderTargetView(rtv, &color, None);
        }

        let (width, height) = d3d12.extent();
        self.set_viewports(&[Viewport::from_extent(width, height)])?;
        self.set_scissors(&[Rect2D {
            x: 0,
            y: 0,
            width,
            height,
        }])?;

        self.active_swap_chain = Some(swap_chain.clone());
        self.retained.push(Retained::SwapChain(swap_chain.clone()));
        self.retained.push(Retained::Texture(back_buffer));
        self.in_render_pass = true;
        Ok(())
    }

    fn begin_render_pass(&mut self, render_pass: &RenderPassHandle) -> RhiResult<()> {
        self.require_queue(&[QueueKind::Graphics], "render pass")?;
        if self.in_render_pass {
            return Err(RhiError::ValidationError("render pass already open".into()));
        }
        let d3d12 = render_pass
            .as_any()
            .downcast_ref::<D3d12RenderPass>()
            .ok_or_else(|| RhiError::ValidationError("foreign render pass".into()))?;

        self.flush_barriers()?;

        // Initial -> subpass layout per attachment
        for attachment in &d3d12.attachments {
            if attachment.initial_layout != attachment.subpass_layout {
                if let Some(texture) =
                    attachment.texture.as_any().downcast_ref::<D3d12Texture>()
                {
                    self.layout_transition(
                        &texture.resource,
                        Some(attachment.subresource),
                        attachment.initial_layout,
                        attachment.subpass_layout,
                    );
                }
            }
        }

        let mut rtvs: Vec<D3D12_CPU_DESCRIPTOR_HANDLE> = Vec::new();
        let mut dsv: Option<D3D12_CPU_DESCRIPTOR_HANDLE> = None;
        for attachment in &d3d12.attachments {
            match attachment.kind {
                astral_rhi::AttachmentKind::RenderTarget => rtvs.push(attachment.view),
                astral_rhi::AttachmentKind::DepthStencil => dsv = Some(attachment.view),
                // Resolves happen through ResolveSubresource at pass end on
                // this backend; shading-rate images are not wired up
                astral_rhi::AttachmentKind::Resolve
                | astral_rhi::AttachmentKind::ShadingRate => {}
            }
        }
        unsafe {
            self.list.OMSetRenderTargets(
                rtvs.len() as u32,
                if rtvs.is_empty() {
                    None
                } else {
                    Some(rtvs.as_ptr())
                },
                false,
                dsv.as_ref().map(|handle| handle as *const _),
            );
        }

        // Clears per load op
        for attachment in &d3d12.attachments {
            if attachment.load_op != astral_rhi::LoadOp::Clear {
                continue;
            }
            match attachment.kind {
                astral_rhi::AttachmentKind::RenderTarget => {
                    let color = match attachment.clear {
                        ClearValue::Color(color) => color,
                        ClearValue::DepthStencil { .. } => [0.0; 4],
                    };
                    unsafe { self.list.ClearRenderTargetView(attachment.view, &color, None) };
                }
                astral_rhi::AttachmentKind::DepthStencil => {
                    let (depth, stencil) = match attachment.clear {
                        ClearValue::DepthStencil { depth, stencil } => (depth, stencil),
                        ClearValue::Color(_) => (1.0, 0),
                    };
                    let flags = if attachment.has_stencil {
                        D3D12_CLEAR_FLAG_DEPTH | D3D12_CLEAR_FLAG_STENCIL
                    } else {
                        D3D12_CLEAR_FLAG_DEPTH
                    };
                    unsafe {
                        self.list.ClearDepthStencilView(
                            attachment.view,
                            flags,
                            depth,
                            stencil as u8,
                            None,
                        );
                    }
                }
                _ => {}
            }
        }

        let desc = d3d12.desc();
        self.set_viewports(&[Viewport::from_extent(desc.width, desc.height)])?;
        self.set_scissors(&[Rect2D {
            x: 0,
            y: 0,
            width: desc.width,
            height: desc.height,
        }])?;

        self.active_render_pass = Some(render_pass.clone());
        self.retained.push(Retained::RenderPass(render_pass.clone()));
        self.in_render_pass = true;
        Ok(())
    }

    fn end_render_pass(&mut self) -> RhiResult<()> {
        if !self.in_render_pass {
            return Err(RhiError::ValidationError("no render pass open".into()));
        }
        self.in_render_pass = false;

        if let Some(swap_chain) = self.active_swap_chain.take() {
            // RENDER_TARGET -> PRESENT before the submit-time Present
            if let Some(d3d12) = swap_chain.as_any().downcast_ref::<D3d12SwapChain>() {
                if let Ok(back_buffer) = d3d12.current_back_buffer() {
                    self.layout_transition(
                        &back_buffer.resource,
                        None,
                        ResourceLayout::RenderTarget,
                        ResourceLayout::Present,
                    );
                }
            }
            self.swap_chains_used.push(swap_chain);
        }

        if let Some(render_pass) = self.active_render_pass.take() {
            if let Some(d3d12) = render_pass.as_any().downcast_ref::<D3d12RenderPass>() {
                // Subpass -> final layout per attachment
                for attachment in &d3d12.attachments {
                    if attachment.subpass_layout != attachment.final_layout {
                        if let Some(texture) =
                            attachment.texture.as_any().downcast_ref::<D3d12Texture>()
                        {
                            self.layout_transition(
                                &texture.resource,
                                Some(attachment.subresource),
                                attachment.subpass_layout,
                                attachment.final_layout,
                            );
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn set_viewports(&mut self, viewports: &[Viewport]) -> RhiResult<()> {
        if viewports.is_empty() {
            return Err(RhiError::ValidationError("empty viewport list".into()));
        }
        let native: Vec<D3D12_VIEWPORT> = viewports
            .iter()
            .map(|vp| D3D12_VIEWPORT {
                TopLeftX: vp.x,
                TopLeftY: vp.y,
                Width: vp.width,
                Height: vp.height,
                MinDepth: vp.min_depth,
                MaxDepth: vp.max_depth,
            })
            .collect();
        unsafe { self.list.RSSetViewports(&native) };
        Ok(())
    }

    fn set_scissors(&mut self, scissors: &[Rect2D]) -> RhiResult<()> {
        if scissors.is_empty() {
            return Err(RhiError::ValidationError("empty scissor list".into()));
        }
        let native: Vec<RECT> = scissors
            .iter()
            .map(|rect| RECT {
                left: rect.x,
                top: rect.y,
                right: rect.x + rect.width as i32,
                bottom: rect.y + rect.height as i32,
            })
            .collect();
        unsafe { self.list.RSSetScissorRects(&native) };
        Ok(())
    }

    fn set_stencil_reference(&mut self, reference: u32) -> RhiResult<()> {
        unsafe { self.list.OMSetStencilRef(reference) };
        Ok(())
    }

    fn set_blend_factor(&mut self, factor: [f32; 4]) -> RhiResult<()> {
        unsafe { self.list.OMSetBlendFactor(Some(&factor)) };
        Ok(())
    }

    fn set_shading_rate(&mut self, rate: ShadingRate) -> RhiResult<()> {
        if !self.ctx.shading_rate {
            // Unsupported rates degrade to the pipeline default
            return Ok(());
        }
        unsafe { self.list.RSSetShadingRate(shading_rate_to_d3d12(rate), None) };
        Ok(())
    }

    fn bind_pipeline(&mut self, pipeline: &PipelineStateHandle) -> RhiResult<()> {
        match pipeline.bind_point() {
            PipelineBindPoint::Graphics | PipelineBindPoint::Compute => {
                let d3d12 = pipeline
                    .as_any()
                    .downcast_ref::<D3d12Pipeline>()
                    .ok_or_else(|| RhiError::ValidationError("foreign pipeline handle".into()))?;
                unsafe {
                    self.list.SetPipelineState(&d3d12.pso);
                    if pipeline.bind_point() == PipelineBindPoint::Graphics {
                        self.list.IASetPrimitiveTopology(d3d12.topology);
                    }
                }
            }
            PipelineBindPoint::Raytracing => {
                let d3d12 = pipeline
                    .as_any()
                    .downcast_ref::<D3d12RaytracingPipeline>()
                    .ok_or_else(|| RhiError::ValidationError("foreign pipeline handle".into()))?;
                unsafe { self.list.SetPipelineState1(&d3d12.state_object) };
                self.bind_descriptors(BIND_COMPUTE);
                self.transient_raytracing = None;
            }
        }
        self.bound_pipeline = Some(pipeline.clone());
        self.retained.push(Retained::Pipeline(pipeline.clone()));
        Ok(())
    }

    fn bind_raytracing_pipeline(&mut self, desc: &RaytracingPipelineDesc) -> RhiResult<()> {
        let pipeline = Arc::new(D3d12RaytracingPipeline::new(self.ctx.clone(), desc)?);
        unsafe { self.list.SetPipelineState1(&pipeline.state_object) };
        self.bind_descriptors(BIND_COMPUTE);
        let handle: PipelineStateHandle = pipeline.clone();
        self.retained.push(Retained::Pipeline(handle.clone()));
        self.bound_pipeline = Some(handle);
        self.transient_raytracing = Some(pipeline);
        Ok(())
    }

    fn bind_vertex_buffer(
        &mut self,
        slot: u32,
        buffer: &BufferHandle,
        offset: u64,
        stride: u32,
    ) -> RhiResult<()> {
        if !buffer.desc().usage.contains(BufferUsage::VERTEX) {
            return Err(RhiError::ValidationError("buffer lacks vertex usage".into()));
        }
        Self::buffer_range(buffer, offset, 0)?;
        let d3d12 = downcast_buffer(buffer)?;
        let view = D3D12_VERTEX_BUFFER_VIEW {
            BufferLocation: d3d12.gpu_address() + offset,
            SizeInBytes: (buffer.desc().size - offset) as u32,
            StrideInBytes: stride,
        };
        unsafe { self.list.IASetVertexBuffers(slot, Some(&[view])) };
        self.retained.push(Retained::Buffer(buffer.clone()));
        Ok(())
    }

    fn bind_index_buffer(
        &mut self,
        buffer: &BufferHandle,
        offset: u64,
        format: IndexFormat,
    ) -> RhiResult<()> {
        if !buffer.desc().usage.contains(BufferUsage::INDEX) {
            return Err(RhiError::ValidationError("buffer lacks index usage".into()));
        }
        Self::buffer_range(buffer, offset, 0)?;
        let d3d12 = downcast_buffer(buffer)?;
        let view = D3D12_INDEX_BUFFER_VIEW {
            BufferLocation: d3d12.gpu_address() + offset,
            SizeInBytes: (buffer.desc().size - offset) as u32,
            Format: index_format_to_dxgi(format),
        };
        unsafe { self.list.IASetIndexBuffer(Some(&view)) };
        self.retained.push(Retained::Buffer(buffer.clone()));
        Ok(())
    }

    fn bind_constant_buffer(&mut self, _slot: u32, buffer: &BufferHandle) -> RhiResult<()> {
        if !buffer.desc().usage.contains(BufferUsage::UNIFORM) {
            return Err(RhiError::ValidationError("buffer lacks uniform usage".into()));
        }
        // Legacy slots resolve through the bindless arrays; shaders read the
        // buffer's bindless index from push constants
        self.retained.push(Retained::Buffer(buffer.clone()));
        Ok(())
    }

    fn bind_shader_resource(&mut self, _slot: u32, texture: &TextureHandle) -> RhiResult<()> {
        self.retained.push(Retained::Texture(texture.clone()));
        Ok(())
    }

    fn bind_unordered_access(&mut self, _slot: u32, texture: &TextureHandle) -> RhiResult<()> {
        if !texture.desc().usage.contains(TextureUsage::STORAGE) {
            return Err(RhiError::ValidationError("texture lacks storage usage".into()));
        }
        self.retained.push(Retained::Texture(texture.clone()));
        Ok(())
    }

    fn push_constants(&mut self, offset: u32, data: &[u8]) -> RhiResult<()> {
        let end = offset as usize + data.len();
        if end > PUSH_CONSTANT_CAPACITY {
            return Err(RhiError::ValidationError(format!(
                "push constants exceed the {}-byte capacity",
                PUSH_CONSTANT_CAPACITY
            )));
        }
        self.push_data[offset as usize..end].copy_from_slice(data);
        self.push_len = self.push_len.max(end);
        self.push_dirty = [true; 2];
        Ok(())
    }

    fn draw(&mut self, vertex_count: u32, first_vertex: u32) -> RhiResult<()> {
        self.prepare_draw()?;
        unsafe { self.list.DrawInstanced(vertex_count, 1, first_vertex, 0) };
        Ok(())
    }

    fn draw_instanced(
        &mut self,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    ) -> RhiResult<()> {
        self.prepare_draw()?;
        unsafe {
            self.list
                .DrawInstanced(vertex_count, instance_count, first_vertex, first_instance);
        }
        Ok(())
    }

    fn draw_indexed(
        &mut self,
        index_count: u32,
        first_index: u32,
        vertex_offset: i32,
    ) -> RhiResult<()> {
        self.prepare_draw()?;
        unsafe {
            self.list
                .DrawIndexedInstanced(index_count, 1, first_index, vertex_offset, 0);
        }
        Ok(())
    }

    fn draw_indexed_instanced(
        &mut self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    ) -> RhiResult<()> {
        self.prepare_draw()?;
        unsafe {
            self.list.DrawIndexedInstanced(
                index_count,
                instance_count,
                first_index,
                vertex_offset,
                first_instance,
            );
        }
        Ok(())
    }

    fn draw_indirect(&mut self, args: &BufferHandle, offset: u64, draw_count: u32) -> RhiResult<()> {
        if !args.desc().usage.contains(BufferUsage::INDIRECT) {
            return Err(RhiError::ValidationError("buffer lacks indirect usage".into()));
        }
        Self::buffer_range(args, offset, draw_count as u64 * 16)?;
        self.prepare_draw()?;
        let d3d12 = downcast_buffer(args)?;
        unsafe {
            self.list.ExecuteIndirect(
                &self.ctx.draw_signature,
                draw_count,
                &d3d12.resource,
                offset,
                None,
                0,
            );
        }
        self.retained.push(Retained::Buffer(args.clone()));
        Ok(())
    }

    fn dispatch(&mut self, x: u32, y: u32, z: u32) -> RhiResult<()> {
        self.prepare_dispatch()?;
        unsafe { self.list.Dispatch(x, y, z) };
        Ok(())
    }

    fn dispatch_indirect(&mut self, args: &BufferHandle, offset: u64) -> RhiResult<()> {
        if !args.desc().usage.contains(BufferUsage::INDIRECT) {
            return Err(RhiError::ValidationError("buffer lacks indirect usage".into()));
        }
        Self::buffer_range(args, offset, 12)?;
        self.prepare_dispatch()?;
        let d3d12 = downcast_buffer(args)?;
        unsafe {
            self.list.ExecuteIndirect(
                &self.ctx.dispatch_signature,
                1,
                &d3d12.resource,
                offset,
                None,
                0,
            );
        }
        self.retained.push(Retained::Buffer(args.clone()));
        Ok(())
    }

    fn dispatch_mesh(&mut self, x: u32, y: u32, z: u32) -> RhiResult<()> {
        if !self.ctx.mesh_shading {
            return Err(RhiError::ValidationError(
                "device does not support mesh shaders".into(),
            ));
        }
        self.prepare_draw()?;
        unsafe { self.list.DispatchMesh(x, y, z) };
        Ok(())
    }

    fn dispatch_rays(&mut self, width: u32, height: u32, depth: u32) -> RhiResult<()> {
        self.require_queue(&[QueueKind::Graphics, QueueKind::Compute], "ray dispatch")?;
        if !self.ctx.raytracing {
            return Err(RhiError::ValidationError(
                "device does not support raytracing".into(),
            ));
        }
        let (raygen, miss, hit) = self.raytracing_tables()?;
        self.flush_barriers()?;
        self.bind_descriptors(BIND_COMPUTE);
        self.flush_push_constants(BIND_COMPUTE);
        let desc = D3D12_DISPATCH_RAYS_DESC {
            RayGenerationShaderRecord: raygen,
            MissShaderTable: miss,
            HitGroupTable: hit,
            CallableShaderTable: D3D12_GPU_VIRTUAL_ADDRESS_RANGE_AND_STRIDE::default(),
            Width: width,
            Height: height,
            Depth: depth,
        };
        unsafe { self.list.DispatchRays(&desc) };
        Ok(())
    }

    fn copy_buffer(
        &mut self,
        src: &BufferHandle,
        src_offset: u64,
        dst: &BufferHandle,
        dst_offset: u64,
        size: u64,
    ) -> RhiResult<()> {
        if self.in_render_pass {
            return Err(RhiError::ValidationError(
                "copy recorded inside a render pass".into(),
            ));
        }
        Self::buffer_range(src, src_offset, size)?;
        Self::buffer_range(dst, dst_offset, size)?;
        self.flush_barriers()?;
        let src_d3d12 = downcast_buffer(src)?;
        let dst_d3d12 = downcast_buffer(dst)?;
        unsafe {
            self.list.CopyBufferRegion(
                &dst_d3d12.resource,
                dst_offset,
                &src_d3d12.resource,
                src_offset,
                size,
            );
        }
        self.retained.push(Retained::Buffer(src.clone()));
        self.retained.push(Retained::Buffer(dst.clone()));
        Ok(())
    }

    fn copy_texture(&mut self, src: &TextureHandle, dst: &TextureHandle) -> RhiResult<()> {
        if src.desc().format != dst.desc().format {
            return Err(RhiError::ValidationError(
                "texture copy requires matching formats".into(),
            ));
        }
        self.flush_barriers()?;
        let src_d3d12 = downcast_texture(src)?;
        let dst_d3d12 = downcast_texture(dst)?;
        unsafe {
            self.list
                .CopyResource(&dst_d3d12.resource, &src_d3d12.resource);
        }
        self.retained.push(Retained::Texture(src.clone()));
        self.retained.push(Retained::Texture(dst.clone()));
        Ok(())
    }

    fn copy_buffer_to_texture(
        &mut self,
        src: &BufferHandle,
        src_offset: u64,
        dst: &TextureHandle,
        subresource: u32,
    ) -> RhiResult<()> {
        Self::buffer_range(src, src_offset, 0)?;
        if src_offset % D3D12_TEXTURE_DATA_PLACEMENT_ALIGNMENT as u64 != 0 {
            return Err(RhiError::ValidationError(format!(
                "texture copy source offset must align to {} bytes",
                D3D12_TEXTURE_DATA_PLACEMENT_ALIGNMENT
            )));
        }
        let desc = dst.desc().clone();
        if subresource >= desc.mip_levels * desc.native_array_size() {
            return Err(RhiError::ValidationError("subresource out of range".into()));
        }
        self.flush_barriers()?;
        let src_d3d12 = downcast_buffer(src)?;
        let dst_d3d12 = downcast_texture(dst)?;
        let mip = subresource % desc.mip_levels;
        let width = mip_extent(desc.width, mip);
        let height = mip_extent(desc.height, mip);
        let depth = if desc.dimension == astral_rhi::TextureDimension::D3 {
            mip_extent(desc.depth_or_array_size, mip)
        } else {
            1
        };
        // Rows in the buffer must already be laid out at the aligned pitch
        let src_location = D3D12_TEXTURE_COPY_LOCATION {
            pResource: unsafe { std::mem::transmute_copy(&src_d3d12.resource) },
            Type: D3D12_TEXTURE_COPY_TYPE_PLACED_FOOTPRINT,
            Anonymous: D3D12_TEXTURE_COPY_LOCATION_0 {
                PlacedFootprint: D3D12_PLACED_SUBRESOURCE_FOOTPRINT {
                    Offset: src_offset,
                    Footprint: D3D12_SUBRESOURCE_FOOTPRINT {
                        Format: format_to_dxgi(desc.format),
                        Width: width,
                        Height: height,
                        Depth: depth,
                        RowPitch: aligned_row_pitch(desc.format, width),
                    },
                },
            },
        };
        let dst_location = D3D12_TEXTURE_COPY_LOCATION {
            pResource: unsafe { std::mem::transmute_copy(&dst_d3d12.resource) },
            Type: D3D12_TEXTURE_COPY_TYPE_SUBRESOURCE_INDEX,
            Anonymous: D3D12_TEXTURE_COPY_LOCATION_0 {
                SubresourceIndex: subresource,
            },
        };
        unsafe {
            self.list
                .CopyTextureRegion(&dst_location, 0, 0, 0, &src_location, None);
        }
        self.retained.push(Retained::Buffer(src.clone()));
        self.retained.push(Retained::Texture(dst.clone()));
        Ok(())
    }

    fn copy_texture_to_buffer(
        &mut self,
        src: &TextureHandle,
        subresource: u32,
        dst: &BufferHandle,
        dst_offset: u64,
    ) -> RhiResult<()> {
        let desc = src.desc().clone();
        if subresource >= desc.mip_levels * desc.native_array_size() {
            return Err(RhiError::ValidationError("subresource out of range".into()));
        }
        Self::buffer_range(dst, dst_offset, 0)?;
        if dst_offset % D3D12_TEXTURE_DATA_PLACEMENT_ALIGNMENT as u64 != 0 {
            return Err(RhiError::ValidationError(format!(
                "texture copy destination offset must align to {} bytes",
                D3D12_TEXTURE_DATA_PLACEMENT_ALIGNMENT
            )));
        }
        self.flush_barriers()?;
        let src_d3d12 = downcast_texture(src)?;
        let dst_d3d12 = downcast_buffer(dst)?;
        let mip = subresource % desc.mip_levels;
        let width = mip_extent(desc.width, mip);
        let height = mip_extent(desc.height, mip);
        let depth = if desc.dimension == astral_rhi::TextureDimension::D3 {
            mip_extent(desc.depth_or_array_size, mip)
        } else {
            1
        };
        let src_location = D3D12_TEXTURE_COPY_LOCATION {
            pResource: unsafe { std::mem::transmute_copy(&src_d3d12.resource) },
            Type: D3D12_TEXTURE_COPY_TYPE_SUBRESOURCE_INDEX,
            Anonymous: D3D12_TEXTURE_COPY_LOCATION_0 {
                SubresourceIndex: subresource,
            },
        };
        let dst_location = D3D12_TEXTURE_COPY_LOCATION {
            pResource: unsafe { std::mem::transmute_copy(&dst_d3d12.resource) },
            Type: D3D12_TEXTURE_COPY_TYPE_PLACED_FOOTPRINT,
            Anonymous: D3D12_TEXTURE_COPY_LOCATION_0 {
                PlacedFootprint: D3D12_PLACED_SUBRESOURCE_FOOTPRINT {
                    Offset: dst_offset,
                    Footprint: D3D12_SUBRESOURCE_FOOTPRINT {
                        Format: format_to_dxgi(desc.format),
                        Width: width,
                        Height: height,
                        Depth: depth,
                        RowPitch: aligned_row_pitch(desc.format, width),
                    },
                },
            },
        };
        unsafe {
            self.list
                .CopyTextureRegion(&dst_location, 0, 0, 0, &src_location, None);
        }
        self.retained.push(Retained::Texture(src.clone()));
        self.retained.push(Retained::Buffer(dst.clone()));
        Ok(())
    }

    fn update_buffer(&mut self, buffer: &BufferHandle, offset: u64, data: &[u8]) -> RhiResult<()> {
        Self::buffer_range(buffer, offset, data.len() as u64)?;
        // Matches the inline-update limits of the other backends
        if data.len() > 65536 || data.len() % 4 != 0 || offset % 4 != 0 {
            return Err(RhiError::ValidationError(
                "inline updates are limited to 64 KiB with 4-byte alignment".into(),
            ));
        }
        self.flush_barriers()?;
        let d3d12 = downcast_buffer(buffer)?;

        // No native inline update; bounce through a transient upload buffer
        // retained until the frame retires
        let staging = D3d12Buffer::new(
            self.ctx.clone(),
            astral_rhi::BufferDesc {
                size: data.len() as u64,
                usage: BufferUsage::empty(),
                residency: astral_rhi::BufferResidency::Upload,
                debug_name: Some("inline update".into()),
                ..Default::default()
            },
        )?;
        staging.update(0, data)?;
        unsafe {
            self.list.CopyBufferRegion(
                &d3d12.resource,
                offset,
                &staging.resource,
                0,
                data.len() as u64,
            );
        }
        self.retained.push(Retained::Staging(staging));
        self.retained.push(Retained::Buffer(buffer.clone()));
        Ok(())
    }

    fn barrier(&mut self, barrier: Barrier) -> RhiResult<()> {
        self.barriers.push(barrier);
        Ok(())
    }

    fn begin_query(&mut self, heap: &QueryHeapHandle, index: u32) -> RhiResult<()> {
        if index >= heap.desc().count {
            return Err(RhiError::ValidationError("query index out of range".into()));
        }
        let d3d12 = heap
            .as_any()
            .downcast_ref::<D3d12QueryHeap>()
            .ok_or_else(|| RhiError::ValidationError("foreign query heap".into()))?;
        // Timestamps are written at end_query only
        if heap.desc().kind != QueryKind::Timestamp {
            unsafe { self.list.BeginQuery(&d3d12.heap, d3d12.query_type(), index) };
        }
        self.retained.push(Retained::QueryHeap(heap.clone()));
        Ok(())
    }

    fn end_query(&mut self, heap: &QueryHeapHandle, index: u32) -> RhiResult<()> {
        if index >= heap.desc().count {
            return Err(RhiError::ValidationError("query index out of range".into()));
        }
        let d3d12 = heap
            .as_any()
            .downcast_ref::<D3d12QueryHeap>()
            .ok_or_else(|| RhiError::ValidationError("foreign query heap".into()))?;
        unsafe { self.list.EndQuery(&d3d12.heap, d3d12.query_type(), index) };
        Ok(())
    }

    fn resolve_query(
        &mut self,
        heap: &QueryHeapHandle,
        first: u32,
        count: u32,
        dst: &BufferHandle,
        dst_offset: u64,
    ) -> RhiResult<()> {
        if first.checked_add(count).map_or(true, |end| end > heap.desc().count) {
            return Err(RhiError::ValidationError("query range out of bounds".into()));
        }
        Self::buffer_range(dst, dst_offset, count as u64 * 8)?;
        let d3d12 = heap
            .as_any()
            .downcast_ref::<D3d12QueryHeap>()
            .ok_or_else(|| RhiError::ValidationError("foreign query heap".into()))?;
        self.flush_barriers()?;
        let dst_d3d12 = downcast_buffer(dst)?;
        unsafe {
            self.list.ResolveQueryData(
                &d3d12.heap,
                d3d12.query_type(),
                first,
                count,
                &dst_d3d12.resource,
                dst_offset,
            );
        }
        self.retained.push(Retained::QueryHeap(heap.clone()));
        self.retained.push(Retained::Buffer(dst.clone()));
        Ok(())
    }

    fn build_acceleration_structure(
        &mut self,
        acceleration_structure: &AccelerationStructureHandle,
    ) -> RhiResult<()> {
        let d3d12 = acceleration_structure
            .as_any()
            .downcast_ref::<D3d12AccelerationStructure>()
            .ok_or_else(|| RhiError::ValidationError("foreign acceleration structure".into()))?;
        self.flush_barriers()?;
        d3d12.record_build(&self.list)?;

        // Build writes must land before any trace or dependent build reads
        let barrier = D3D12_GLOBAL_BARRIER {
            SyncBefore: D3D12_BARRIER_SYNC_BUILD_RAYTRACING_ACCELERATION_STRUCTURE,
            SyncAfter: D3D12_BARRIER_SYNC_BUILD_RAYTRACING_ACCELERATION_STRUCTURE
                | D3D12_BARRIER_SYNC_RAYTRACING,
            AccessBefore: D3D12_BARRIER_ACCESS_RAYTRACING_ACCELERATION_STRUCTURE_WRITE,
            AccessAfter: D3D12_BARRIER_ACCESS_RAYTRACING_ACCELERATION_STRUCTURE_READ,
        };
        let group = D3D12_BARRIER_GROUP {
            Type: D3D12_BARRIER_TYPE_GLOBAL,
            NumBarriers: 1,
            Anonymous: D3D12_BARRIER_GROUP_0 {
                pGlobalBarriers: &barrier,
            },
        };
        unsafe { self.list.Barrier(&[group]) };

        self.retained
            .push(Retained::AccelerationStructure(acceleration_structure.clone()));
        Ok(())
    }

    fn begin_event(&mut self, name: &str) {
        // PIX ANSI event, metadata 1
        let bytes: Vec<u8> = name.bytes().chain(Some(0)).collect();
        unsafe {
            self.list.BeginEvent(
                1,
                Some(bytes.as_ptr() as *const std::ffi::c_void),
                bytes.len() as u32,
            );
        }
    }

    fn end_event(&mut self) {
        unsafe { self.list.EndEvent() };
    }

    fn marker(&mut self, name: &str) {
        let bytes: Vec<u8> = name.bytes().chain(Some(0)).collect();
        unsafe {
            self.list.SetMarker(
                1,
                Some(bytes.as_ptr() as *const std::ffi::c_void),
                bytes.len() as u32,
            );
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any> {
        self
    }
}
