//! Vulkan command recorder
//!
//! Wraps one native command buffer for the frame. Barriers queue into a
//! `BarrierBatch` and flush as a single `vkCmdPipelineBarrier2` before the
//! next render pass, dispatch or copy. Graphics pipelines bind lazily at
//! draw time: the recorder combines the pipeline cache key with its
//! vertex-stride digest and asks the pipeline for the matching variant.

use std::any::Any;
use std::ffi::CString;
use std::sync::Arc;

use ash::vk;
use rustc_hash::FxHashMap;

use astral_rhi::pipeline::combine_stride_digest;
use astral_rhi::{
    rhi_err, AccelerationStructureHandle, Barrier, BarrierBatch, Buffer, BufferHandle,
    BufferUsage, ClearValue, CommandListId, CommandRecorder, IndexFormat, PipelineBindPoint,
    PipelineState, PipelineStateHandle, QueryHeap, QueryHeapHandle, QueryKind,
    RaytracingPipelineDesc, RenderPass, RenderPassHandle, RhiError, RhiResult, ShadingRate,
    SwapChain, SwapChainHandle, Texture, TextureHandle, TextureUsage, TextureViewDesc,
    VertexStrideDigest, Viewport, QueueKind, Rect2D, MAX_FRAMES_IN_FLIGHT,
    PER_DRAW_SLOT_CAPACITY, PUSH_CONSTANT_CAPACITY,
};

use crate::vulkan_buffer::VulkanBuffer;
use crate::vulkan_context::GpuContext;
use crate::vulkan_descriptors::{draw_binding, DrawWrite, RegisterClass};
use crate::vulkan_convert::{
    index_format_to_vk, layout_access_to_vk, layout_stage_to_vk, layout_to_vk,
    shading_rate_to_vk,
};
use crate::vulkan_pipeline::VulkanPipeline;
use crate::vulkan_query::VulkanQueryHeap;
use crate::vulkan_raytracing::{VulkanAccelerationStructure, VulkanRaytracingPipeline};
use crate::vulkan_render_pass::{clear_value_to_vk, VulkanRenderPass};
use crate::vulkan_swapchain::VulkanSwapChain;
use crate::vulkan_texture::{VulkanTexture, VulkanTextureView};

/// Handles a recorded list keeps alive until its frame retires
pub(crate) enum Retained {
    Buffer(BufferHandle),
    Texture(TextureHandle),
    Pipeline(PipelineStateHandle),
    RenderPass(RenderPassHandle),
    QueryHeap(QueryHeapHandle),
    SwapChain(SwapChainHandle),
    AccelerationStructure(AccelerationStructureHandle),
}

/// Vulkan implementation of [`CommandRecorder`]
pub struct VulkanCommandRecorder {
    id: CommandListId,
    queue_kind: QueueKind,
    pub(crate) waits: Vec<CommandListId>,
    pub(crate) cmd: vk::CommandBuffer,

    barriers: BarrierBatch,
    in_render_pass: bool,
    active_swap_chain: Option<SwapChainHandle>,
    active_render_pass: Option<RenderPassHandle>,
    pub(crate) swap_chains_used: Vec<SwapChainHandle>,

    bound_pipeline: Option<PipelineStateHandle>,
    /// Pipeline created on the fly by `bind_raytracing_pipeline`
    transient_raytracing: Option<Arc<VulkanRaytracingPipeline>>,
    /// Combined key of the graphics variant currently bound, if any
    bound_variant: Option<u64>,
    stride_digest: VertexStrideDigest,
    strides: FxHashMap<u32, u32>,

    push_data: [u8; PUSH_CONSTANT_CAPACITY],
    push_len: usize,
    push_dirty: bool,
    /// Bindless arrays bound per native bind point (graphics/compute/raytracing)
    descriptors_bound: [bool; 3],

    /// Pending legacy binds, keyed by their shifted binding number
    draw_writes: FxHashMap<u32, DrawWrite>,
    draw_dirty: bool,
    /// Per-draw set the latest flush wrote, if any
    draw_set: Option<vk::DescriptorSet>,
    /// Per-draw set bound per native bind point
    draw_set_bound: [bool; 3],

    pub(crate) retained: Vec<Retained>,
    ctx: Arc<GpuContext>,
}

fn downcast_buffer(handle: &BufferHandle) -> RhiResult<&VulkanBuffer> {
    handle
        .as_any()
        .downcast_ref::<VulkanBuffer>()
        .ok_or_else(|| RhiError::ValidationError("foreign buffer handle".into()))
}

fn downcast_texture(handle: &TextureHandle) -> RhiResult<&VulkanTexture> {
    handle
        .as_any()
        .downcast_ref::<VulkanTexture>()
        .ok_or_else(|| RhiError::ValidationError("foreign texture handle".into()))
}

/// Extent of `mip` given the base dimension
fn mip_extent(base: u32, mip: u32) -> u32 {
    (base >> mip).max(1)
}

impl VulkanCommandRecorder {
    pub(crate) fn new(
        ctx: Arc<GpuContext>,
        id: CommandListId,
        queue: QueueKind,
        cmd: vk::CommandBuffer,
    ) -> RhiResult<Self> {
        let begin_info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe {
            ctx.device
                .begin_command_buffer(cmd, &begin_info)
                .map_err(|e| rhi_err!("Failed to begin command buffer: {:?}", e))?;
        }
        Ok(Self {
            id,
            queue_kind: queue,
            waits: Vec::new(),
            cmd,
            barriers: BarrierBatch::new(),
            in_render_pass: false,
            active_swap_chain: None,
            active_render_pass: None,
            swap_chains_used: Vec::new(),
            bound_pipeline: None,
            transient_raytracing: None,
            bound_variant: None,
            stride_digest: VertexStrideDigest::default(),
            strides: FxHashMap::default(),
            push_data: [0; PUSH_CONSTANT_CAPACITY],
            push_len: 0,
            push_dirty: false,
            descriptors_bound: [false; 3],
            draw_writes: FxHashMap::default(),
            draw_dirty: false,
            draw_set: None,
            draw_set_bound: [false; 3],
            retained: Vec::new(),
            ctx,
        })
    }

    /// End recording; the device submits the returned buffer
    pub(crate) fn finish(&mut self) -> RhiResult<vk::CommandBuffer> {
        if self.in_render_pass {
            return Err(RhiError::ValidationError(
                "submitted list has an open render pass".into(),
            ));
        }
        self.flush_barriers();
        unsafe {
            self.ctx
                .device
                .end_command_buffer(self.cmd)
                .map_err(|e| rhi_err!("Failed to end command buffer: {:?}", e))?;
        }
        Ok(self.cmd)
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

    fn draw_slot(slot: u32) -> RhiResult<()> {
        if slot >= PER_DRAW_SLOT_CAPACITY {
            return Err(RhiError::ValidationError(format!(
                "binding slot {} exceeds the {}-slot capacity",
                slot, PER_DRAW_SLOT_CAPACITY
            )));
        }
        Ok(())
    }

    /// Full-resource view the legacy texture binds write into the per-draw set
    fn default_view(texture: &TextureHandle) -> RhiResult<vk::ImageView> {
        let view = texture.get_view(TextureViewDesc::all())?;
        view.as_any()
            .downcast_ref::<VulkanTextureView>()
            .map(|v| v.view)
            .ok_or_else(|| RhiError::ValidationError("foreign texture handle".into()))
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

    fn flush_barriers(&mut self) {
        if self.barriers.is_empty() {
            return;
        }
        let (textures, buffers, memory) = self.barriers.take();
        if textures.is_empty() && buffers.is_empty() && !memory {
            return;
        }

        let mut image_barriers = Vec::with_capacity(textures.len());
        for barrier in &textures {
            let Some(texture) = barrier.texture.as_any().downcast_ref::<VulkanTexture>() else {
                continue;
            };
            let desc = texture.desc();
            let aspect = crate::vulkan_convert::aspect_to_vk(desc.format);
            let range = match barrier.subresource {
                Some(index) => vk::ImageSubresourceRange::default()
                    .aspect_mask(aspect)
                    .base_mip_level(index % desc.mip_levels)
                    .level_count(1)
                    .base_array_layer(index / desc.mip_levels)
                    .layer_count(1),
                None => vk::ImageSubresourceRange::default()
                    .aspect_mask(aspect)
                    .level_count(vk::REMAINING_MIP_LEVELS)
                    .layer_count(vk::REMAINING_ARRAY_LAYERS),
            };
            image_barriers.push(
                vk::ImageMemoryBarrier2::default()
                    .src_stage_mask(layout_stage_to_vk(barrier.src))
                    .src_access_mask(layout_access_to_vk(barrier.src))
                    .dst_stage_mask(layout_stage_to_vk(barrier.dst))
                    .dst_access_mask(layout_access_to_vk(barrier.dst))
                    .old_layout(layout_to_vk(barrier.src))
                    .new_layout(layout_to_vk(barrier.dst))
                    .image(texture.image)
                    .subresource_range(range),
            );
        }

        let mut buffer_barriers = Vec::with_capacity(buffers.len());
        for barrier in &buffers {
            let Some(buffer) = barrier.buffer.as_any().downcast_ref::<VulkanBuffer>() else {
                continue;
            };
            buffer_barriers.push(
                vk::BufferMemoryBarrier2::default()
                    .src_stage_mask(layout_stage_to_vk(barrier.src))
                    .src_access_mask(layout_access_to_vk(barrier.src))
                    .dst_stage_mask(layout_stage_to_vk(barrier.dst))
                    .dst_access_mask(layout_access_to_vk(barrier.dst))
                    .buffer(buffer.buffer)
                    .size(vk::WHOLE_SIZE),
            );
        }

        let memory_barriers = if memory {
            vec![vk::MemoryBarrier2::default()
                .src_stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS)
                .src_access_mask(vk::AccessFlags2::MEMORY_WRITE)
                .dst_stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS)
                .dst_access_mask(vk::AccessFlags2::MEMORY_READ | vk::AccessFlags2::MEMORY_WRITE)]
        } else {
            Vec::new()
        };

        let dependency = vk::DependencyInfo::default()
            .memory_barriers(&memory_barriers)
            .buffer_memory_barriers(&buffer_barriers)
            .image_memory_barriers(&image_barriers);
        unsafe { self.ctx.device.cmd_pipeline_barrier2(self.cmd, &dependency) };

        for barrier in textures {
            self.retained.push(Retained::Texture(barrier.texture));
        }
        for barrier in buffers {
            self.retained.push(Retained::Buffer(barrier.buffer));
        }
    }

    fn image_barrier(
        &self,
        image: vk::Image,
        aspect: vk::ImageAspectFlags,
        src_stage: vk::PipelineStageFlags2,
        src_access: vk::AccessFlags2,
        dst_stage: vk::PipelineStageFlags2,
        dst_access: vk::AccessFlags2,
        old_layout: vk::ImageLayout,
        new_layout: vk::ImageLayout,
    ) {
        let barriers = [vk::ImageMemoryBarrier2::default()
            .src_stage_mask(src_stage)
            .src_access_mask(src_access)
            .dst_stage_mask(dst_stage)
            .dst_access_mask(dst_access)
            .old_layout(old_layout)
            .new_layout(new_layout)
            .image(image)
            .subresource_range(
                vk::ImageSubresourceRange::default()
                    .aspect_mask(aspect)
                    .level_count(vk::REMAINING_MIP_LEVELS)
                    .layer_count(vk::REMAINING_ARRAY_LAYERS),
            )];
        let dependency = vk::DependencyInfo::default().image_memory_barriers(&barriers);
        unsafe { self.ctx.device.cmd_pipeline_barrier2(self.cmd, &dependency) };
    }

    // ===== BIND STATE =====

    fn bind_point_index(bind_point: vk::PipelineBindPoint) -> usize {
        match bind_point {
            vk::PipelineBindPoint::COMPUTE => 1,
            vk::PipelineBindPoint::RAY_TRACING_KHR => 2,
            _ => 0,
        }
    }

    /// Bind the bindless arrays at sets 1..N; set 0 stays free for the
    /// per-draw set
    fn bind_descriptors(&mut self, bind_point: vk::PipelineBindPoint) {
        let slot = Self::bind_point_index(bind_point);
        if self.descriptors_bound[slot] {
            return;
        }
        unsafe {
            self.ctx.device.cmd_bind_descriptor_sets(
                self.cmd,
                bind_point,
                self.ctx.bindless.pipeline_layout(),
                1,
                self.ctx.bindless.array_sets(),
                &[],
            );
        }
        self.descriptors_bound[slot] = true;
    }

    /// Materialize the pending legacy binds into a per-draw set and bind it
    /// at set 0
    fn flush_draw_set(&mut self, bind_point: vk::PipelineBindPoint) -> RhiResult<()> {
        if self.draw_writes.is_empty() {
            return Ok(());
        }
        if self.draw_dirty {
            let frame_slot = (self.ctx.current_frame() % MAX_FRAMES_IN_FLIGHT) as usize;
            let set = self
                .ctx
                .bindless
                .allocate_draw_set(&self.ctx.device, frame_slot)?;
            self.ctx
                .bindless
                .write_draw_set(&self.ctx.device, set, self.draw_writes.values());
            self.draw_set = Some(set);
            self.draw_dirty = false;
            self.draw_set_bound = [false; 3];
        }
        let slot = Self::bind_point_index(bind_point);
        if let Some(set) = self.draw_set {
            if !self.draw_set_bound[slot] {
                unsafe {
                    self.ctx.device.cmd_bind_descriptor_sets(
                        self.cmd,
                        bind_point,
                        self.ctx.bindless.pipeline_layout(),
                        0,
                        &[set],
                        &[],
                    );
                }
                self.draw_set_bound[slot] = true;
            }
        }
        Ok(())
    }

    fn flush_push_constants(&mut self) {
        if !self.push_dirty || self.push_len == 0 {
            return;
        }
        unsafe {
            self.ctx.device.cmd_push_constants(
                self.cmd,
                self.ctx.bindless.pipeline_layout(),
                vk::ShaderStageFlags::ALL,
                0,
                &self.push_data[..self.push_len],
            );
        }
        self.push_dirty = false;
    }

    /// Bind the concrete graphics variant for the current stride digest
    fn prepare_draw(&mut self) -> RhiResult<()> {
        self.require_queue(&[QueueKind::Graphics], "draw")?;
        self.require_render_pass()?;
        self.require_bind_point(PipelineBindPoint::Graphics)?;

        let pipeline = self
            .bound_pipeline
            .clone()
            .ok_or_else(|| RhiError::ValidationError("no Graphics pipeline bound".into()))?;
        let vulkan = pipeline
            .as_any()
            .downcast_ref::<VulkanPipeline>()
            .ok_or_else(|| RhiError::ValidationError("foreign pipeline handle".into()))?;

        let combined = combine_stride_digest(pipeline.cache_key(), self.stride_digest.value());
        if self.bound_variant != Some(combined) {
            let native = vulkan.variant(combined, &self.strides)?;
            unsafe {
                self.ctx
                    .device
                    .cmd_bind_pipeline(self.cmd, vk::PipelineBindPoint::GRAPHICS, native);
            }
            self.bound_variant = Some(combined);
        }
        self.bind_descriptors(vk::PipelineBindPoint::GRAPHICS);
        self.flush_draw_set(vk::PipelineBindPoint::GRAPHICS)?;
        self.flush_push_constants();
        Ok(())
    }

    fn prepare_dispatch(&mut self) -> RhiResult<()> {
        self.require_queue(&[QueueKind::Graphics, QueueKind::Compute], "dispatch")?;
        self.require_bind_point(PipelineBindPoint::Compute)?;
        self.flush_barriers();
        self.bind_descriptors(vk::PipelineBindPoint::COMPUTE);
        self.flush_draw_set(vk::PipelineBindPoint::COMPUTE)?;
        self.flush_push_constants();
        Ok(())
    }

    fn raytracing_regions(
        &self,
    ) -> RhiResult<[vk::StridedDeviceAddressRegionKHR; 4]> {
        if let Some(pipeline) = &self.transient_raytracing {
            return Ok([
                pipeline.raygen_region,
                pipeline.miss_region,
                pipeline.hit_region,
                pipeline.callable_region,
            ]);
        }
        let pipeline = self
            .bound_pipeline
            .as_ref()
            .and_then(|p| p.as_any().downcast_ref::<VulkanRaytracingPipeline>())
            .ok_or_else(|| RhiError::ValidationError("no raytracing pipeline bound".into()))?;
        Ok([
            pipeline.raygen_region,
            pipeline.miss_region,
            pipeline.hit_region,
            pipeline.callable_region,
        ])
    }
}

impl CommandRecorder for VulkanCommandRecorder {
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
        let vulkan = swap_chain
            .as_any()
            .downcast_ref::<VulkanSwapChain>()
            .ok_or_else(|| RhiError::ValidationError("foreign swap chain".into()))?;

        self.flush_barriers();

        let back_buffer = vulkan.current_back_buffer()?;
        let view_handle = back_buffer.get_view(TextureViewDesc::all())?;
        let view = view_handle
            .as_any()
            .downcast_ref::<VulkanTextureView>()
            .map(|v| v.view)
            .unwrap_or(vk::ImageView::null());

        // PRESENT -> RENDER_TARGET; contents are cleared, so the source
        // layout can be UNDEFINED
        self.image_barrier(
            back_buffer.image,
            vk::ImageAspectFlags::COLOR,
            vk::PipelineStageFlags2::TOP_OF_PIPE,
            vk::AccessFlags2::empty(),
            vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
            vk::AccessFlags2::COLOR_ATTACHMENT_WRITE,
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        );

        let (width, height) = vulkan.extent();
        let color_attachments = [vk::RenderingAttachmentInfo::default()
            .image_view(view)
            .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::STORE)
            .clear_value(clear_value_to_vk(clear))];
        let rendering_info = vk::RenderingInfo::default()
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: vk::Extent2D { width, height },
            })
            .layer_count(1)
            .color_attachments(&color_attachments);
        unsafe { self.ctx.device.cmd_begin_rendering(self.cmd, &rendering_info) };

        // Full-extent defaults; callers may override before drawing
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
        let vulkan = render_pass
            .as_any()
            .downcast_ref::<VulkanRenderPass>()
            .ok_or_else(|| RhiError::ValidationError("foreign render pass".into()))?;

        self.flush_barriers();

        // Initial -> subpass layout per attachment
        for attachment in &vulkan.attachments {
            if attachment.initial_layout != attachment.subpass_layout {
                self.image_barrier(
                    attachment.image,
                    attachment.aspect,
                    layout_stage_to_vk(attachment.src_layout),
                    layout_access_to_vk(attachment.src_layout),
                    layout_stage_to_vk(attachment.subpass_resource_layout),
                    layout_access_to_vk(attachment.subpass_resource_layout),
                    attachment.initial_layout,
                    attachment.subpass_layout,
                );
            }
        }

        let desc = vulkan.desc();
        let mut color_attachments: Vec<vk::RenderingAttachmentInfo> = Vec::new();
        let mut depth_attachment = None;
        let mut stencil_attachment = None;
        for attachment in &vulkan.attachments {
            match attachment.kind {
                astral_rhi::AttachmentKind::RenderTarget => {
                    color_attachments.push(
                        vk::RenderingAttachmentInfo::default()
                            .image_view(attachment.view)
                            .image_layout(attachment.subpass_layout)
                            .load_op(attachment.load_op)
                            .store_op(attachment.store_op)
                            .clear_value(attachment.clear),
                    );
                }
                astral_rhi::AttachmentKind::Resolve => {
                    // Resolves into the preceding color attachment
                    if let Some(last) = color_attachments.last_mut() {
                        *last = last
                            .resolve_mode(vk::ResolveModeFlags::AVERAGE)
                            .resolve_image_view(attachment.view)
                            .resolve_image_layout(attachment.subpass_layout);
                    }
                }
                astral_rhi::AttachmentKind::DepthStencil => {
                    let info = vk::RenderingAttachmentInfo::default()
                        .image_view(attachment.view)
                        .image_layout(attachment.subpass_layout)
                        .load_op(attachment.load_op)
                        .store_op(attachment.store_op)
                        .clear_value(attachment.clear);
                    depth_attachment = Some(info);
                    if attachment.aspect.contains(vk::ImageAspectFlags::STENCIL) {
                        stencil_attachment = Some(info);
                    }
                }
                // Attachment-based shading rate is not wired up; per-draw
                // rates go through set_shading_rate
                astral_rhi::AttachmentKind::ShadingRate => {}
            }
        }

        let mut rendering_info = vk::RenderingInfo::default()
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: vk::Extent2D {
                    width: desc.width,
                    height: desc.height,
                },
            })
            .layer_count(1)
            .color_attachments(&color_attachments);
        if let Some(depth) = &depth_attachment {
            rendering_info = rendering_info.depth_attachment(depth);
        }
        if let Some(stencil) = &stencil_attachment {
            rendering_info = rendering_info.stencil_attachment(stencil);
        }
        unsafe { self.ctx.device.cmd_begin_rendering(self.cmd, &rendering_info) };

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
        unsafe { self.ctx.device.cmd_end_rendering(self.cmd) };
        self.in_render_pass = false;

        if let Some(swap_chain) = self.active_swap_chain.take() {
            // RENDER_TARGET -> PRESENT before the submit-time Present
            if let Some(vulkan) = swap_chain.as_any().downcast_ref::<VulkanSwapChain>() {
                if let Ok(back_buffer) = vulkan.current_back_buffer() {
                    self.image_barrier(
                        back_buffer.image,
                        vk::ImageAspectFlags::COLOR,
                        vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
                        vk::AccessFlags2::COLOR_ATTACHMENT_WRITE,
                        vk::PipelineStageFlags2::BOTTOM_OF_PIPE,
                        vk::AccessFlags2::empty(),
                        vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
                        vk::ImageLayout::PRESENT_SRC_KHR,
                    );
                }
            }
            self.swap_chains_used.push(swap_chain);
        }

        if let Some(render_pass) = self.active_render_pass.take() {
            if let Some(vulkan) = render_pass.as_any().downcast_ref::<VulkanRenderPass>() {
                // Subpass -> final layout per attachment
                for attachment in &vulkan.attachments {
                    if attachment.subpass_layout != attachment.final_layout {
                        self.image_barrier(
                            attachment.image,
                            attachment.aspect,
                            layout_stage_to_vk(attachment.subpass_resource_layout),
                            layout_access_to_vk(attachment.subpass_resource_layout),
                            layout_stage_to_vk(attachment.final_resource_layout),
                            layout_access_to_vk(attachment.final_resource_layout),
                            attachment.subpass_layout,
                            attachment.final_layout,
                        );
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
        // Flipped so clip space matches the D3D12 convention
        let native: Vec<vk::Viewport> = viewports
            .iter()
            .map(|vp| vk::Viewport {
                x: vp.x,
                y: vp.y + vp.height,
                width: vp.width,
                height: -vp.height,
                min_depth: vp.min_depth,
                max_depth: vp.max_depth,
            })
            .collect();
        unsafe { self.ctx.device.cmd_set_viewport(self.cmd, 0, &native) };
        Ok(())
    }

    fn set_scissors(&mut self, scissors: &[Rect2D]) -> RhiResult<()> {
        if scissors.is_empty() {
            return Err(RhiError::ValidationError("empty scissor list".into()));
        }
        let native: Vec<vk::Rect2D> = scissors
            .iter()
            .map(|rect| vk::Rect2D {
                offset: vk::Offset2D {
                    x: rect.x,
                    y: rect.y,
                },
                extent: vk::Extent2D {
                    width: rect.width,
                    height: rect.height,
                },
            })
            .collect();
        unsafe { self.ctx.device.cmd_set_scissor(self.cmd, 0, &native) };
        Ok(())
    }

    fn set_stencil_reference(&mut self, reference: u32) -> RhiResult<()> {
        unsafe {
            self.ctx.device.cmd_set_stencil_reference(
                self.cmd,
                vk::StencilFaceFlags::FRONT_AND_BACK,
                reference,
            );
        }
        Ok(())
    }

    fn set_blend_factor(&mut self, factor: [f32; 4]) -> RhiResult<()> {
        unsafe { self.ctx.device.cmd_set_blend_constants(self.cmd, &factor) };
        Ok(())
    }

    fn set_shading_rate(&mut self, rate: ShadingRate) -> RhiResult<()> {
        let Some(loader) = &self.ctx.shading_rate_loader else {
            // Unsupported rates degrade to the pipeline default
            return Ok(());
        };
        let combiners = [
            vk::FragmentShadingRateCombinerOpKHR::KEEP,
            vk::FragmentShadingRateCombinerOpKHR::KEEP,
        ];
        unsafe {
            (loader.fp().cmd_set_fragment_shading_rate_khr)(
                self.cmd,
                &shading_rate_to_vk(rate),
                &combiners,
            );
        }
        Ok(())
    }

    fn bind_pipeline(&mut self, pipeline: &PipelineStateHandle) -> RhiResult<()> {
        match pipeline.bind_point() {
            PipelineBindPoint::Graphics => {
                // Deferred: the concrete variant binds at draw time.
                // Vertex-buffer bindings stay live across pipeline binds, so
                // the stride state survives and only the variant is invalid.
                self.bound_variant = None;
            }
            PipelineBindPoint::Compute => {
                let vulkan = pipeline
                    .as_any()
                    .downcast_ref::<VulkanPipeline>()
                    .ok_or_else(|| RhiError::ValidationError("foreign pipeline handle".into()))?;
                unsafe {
                    self.ctx.device.cmd_bind_pipeline(
                        self.cmd,
                        vk::PipelineBindPoint::COMPUTE,
                        vulkan.compute_pipeline(),
                    );
                }
            }
            PipelineBindPoint::Raytracing => {
                let vulkan = pipeline
                    .as_any()
                    .downcast_ref::<VulkanRaytracingPipeline>()
                    .ok_or_else(|| RhiError::ValidationError("foreign pipeline handle".into()))?;
                unsafe {
                    self.ctx.device.cmd_bind_pipeline(
                        self.cmd,
                        vk::PipelineBindPoint::RAY_TRACING_KHR,
                        vulkan.pipeline,
                    );
                }
                self.bind_descriptors(vk::PipelineBindPoint::RAY_TRACING_KHR);
                self.transient_raytracing = None;
            }
        }
        self.bound_pipeline = Some(pipeline.clone());
        self.retained.push(Retained::Pipeline(pipeline.clone()));
        Ok(())
    }

    fn bind_raytracing_pipeline(&mut self, desc: &RaytracingPipelineDesc) -> RhiResult<()> {
        let pipeline = Arc::new(VulkanRaytracingPipeline::new(self.ctx.clone(), desc)?);
        unsafe {
            self.ctx.device.cmd_bind_pipeline(
                self.cmd,
                vk::PipelineBindPoint::RAY_TRACING_KHR,
                pipeline.pipeline,
            );
        }
        self.bind_descriptors(vk::PipelineBindPoint::RAY_TRACING_KHR);
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
        let vulkan = downcast_buffer(buffer)?;
        unsafe {
            self.ctx
                .device
                .cmd_bind_vertex_buffers(self.cmd, slot, &[vulkan.buffer], &[offset]);
        }
        self.stride_digest.bind(slot, stride);
        self.strides.insert(slot, stride);
        self.bound_variant = None;
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
        let vulkan = downcast_buffer(buffer)?;
        unsafe {
            self.ctx.device.cmd_bind_index_buffer(
                self.cmd,
                vulkan.buffer,
                offset,
                index_format_to_vk(format),
            );
        }
        self.retained.push(Retained::Buffer(buffer.clone()));
        Ok(())
    }

    fn bind_constant_buffer(&mut self, slot: u32, buffer: &BufferHandle) -> RhiResult<()> {
        Self::draw_slot(slot)?;
        if !buffer.desc().usage.contains(BufferUsage::UNIFORM) {
            return Err(RhiError::ValidationError("buffer lacks uniform usage".into()));
        }
        let vulkan = downcast_buffer(buffer)?;
        let binding = draw_binding(RegisterClass::ConstantBuffer, slot);
        // Dynamic buffers expose the ring slice the current frame owns
        self.draw_writes.insert(
            binding,
            DrawWrite::UniformBuffer {
                binding,
                buffer: vulkan.buffer,
                offset: vulkan.active_offset(),
                range: buffer.desc().size,
            },
        );
        self.draw_dirty = true;
        self.retained.push(Retained::Buffer(buffer.clone()));
        Ok(())
    }

    fn bind_shader_resource(&mut self, slot: u32, texture: &TextureHandle) -> RhiResult<()> {
        Self::draw_slot(slot)?;
        if !texture.desc().usage.contains(TextureUsage::SAMPLED) {
            return Err(RhiError::ValidationError("texture lacks sampled usage".into()));
        }
        let binding = draw_binding(RegisterClass::ShaderResource, slot);
        let view = Self::default_view(texture)?;
        self.draw_writes
            .insert(binding, DrawWrite::SampledImage { binding, view });
        self.draw_dirty = true;
        self.retained.push(Retained::Texture(texture.clone()));
        Ok(())
    }

    fn bind_unordered_access(&mut self, slot: u32, texture: &TextureHandle) -> RhiResult<()> {
        Self::draw_slot(slot)?;
        if !texture.desc().usage.contains(TextureUsage::STORAGE) {
            return Err(RhiError::ValidationError("texture lacks storage usage".into()));
        }
        let binding = draw_binding(RegisterClass::UnorderedAccess, slot);
        let view = Self::default_view(texture)?;
        self.draw_writes
            .insert(binding, DrawWrite::StorageImage { binding, view });
        self.draw_dirty = true;
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
        self.push_dirty = true;
        Ok(())
    }

    fn draw(&mut self, vertex_count: u32, first_vertex: u32) -> RhiResult<()> {
        self.prepare_draw()?;
        unsafe {
            self.ctx
                .device
                .cmd_draw(self.cmd, vertex_count, 1, first_vertex, 0);
        }
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
            self.ctx.device.cmd_draw(
                self.cmd,
                vertex_count,
                instance_count,
                first_vertex,
                first_instance,
            );
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
            self.ctx
                .device
                .cmd_draw_indexed(self.cmd, index_count, 1, first_index, vertex_offset, 0);
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
            self.ctx.device.cmd_draw_indexed(
                self.cmd,
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
        let vulkan = downcast_buffer(args)?;
        unsafe {
            self.ctx
                .device
                .cmd_draw_indirect(self.cmd, vulkan.buffer, offset, draw_count, 16);
        }
        self.retained.push(Retained::Buffer(args.clone()));
        Ok(())
    }

    fn dispatch(&mut self, x: u32, y: u32, z: u32) -> RhiResult<()> {
        self.prepare_dispatch()?;
        unsafe { self.ctx.device.cmd_dispatch(self.cmd, x, y, z) };
        Ok(())
    }

    fn dispatch_indirect(&mut self, args: &BufferHandle, offset: u64) -> RhiResult<()> {
        if !args.desc().usage.contains(BufferUsage::INDIRECT) {
            return Err(RhiError::ValidationError("buffer lacks indirect usage".into()));
        }
        Self::buffer_range(args, offset, 12)?;
        self.prepare_dispatch()?;
        let vulkan = downcast_buffer(args)?;
        unsafe {
            self.ctx
                .device
                .cmd_dispatch_indirect(self.cmd, vulkan.buffer, offset);
        }
        self.retained.push(Retained::Buffer(args.clone()));
        Ok(())
    }

    fn dispatch_mesh(&mut self, x: u32, y: u32, z: u32) -> RhiResult<()> {
        let loader = self
            .ctx
            .mesh_loader
            .clone()
            .ok_or_else(|| RhiError::ValidationError("device does not support mesh shaders".into()))?;
        self.prepare_draw()?;
        unsafe { loader.cmd_draw_mesh_tasks(self.cmd, x, y, z) };
        Ok(())
    }

    fn dispatch_rays(&mut self, width: u32, height: u32, depth: u32) -> RhiResult<()> {
        self.require_queue(&[QueueKind::Graphics, QueueKind::Compute], "ray dispatch")?;
        let loader = self
            .ctx
            .raytracing_loader
            .clone()
            .ok_or_else(|| RhiError::ValidationError("device does not support raytracing".into()))?;
        let [raygen, miss, hit, callable] = self.raytracing_regions()?;
        self.flush_barriers();
        self.bind_descriptors(vk::PipelineBindPoint::RAY_TRACING_KHR);
        self.flush_draw_set(vk::PipelineBindPoint::RAY_TRACING_KHR)?;
        self.flush_push_constants();
        unsafe {
            loader.cmd_trace_rays(self.cmd, &raygen, &miss, &hit, &callable, width, height, depth);
        }
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
        self.flush_barriers();
        let src_vk = downcast_buffer(src)?;
        let dst_vk = downcast_buffer(dst)?;
        let region = vk::BufferCopy {
            src_offset,
            dst_offset,
            size,
        };
        unsafe {
            self.ctx
                .device
                .cmd_copy_buffer(self.cmd, src_vk.buffer, dst_vk.buffer, &[region]);
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
        self.flush_barriers();
        let src_vk = downcast_texture(src)?;
        let dst_vk = downcast_texture(dst)?;
        let desc = src.desc();
        let aspect = crate::vulkan_convert::aspect_to_vk(desc.format);

        // Whole-resource copy, mip by mip
        let mut regions = Vec::with_capacity(desc.mip_levels as usize);
        for mip in 0..desc.mip_levels {
            regions.push(vk::ImageCopy {
                src_subresource: vk::ImageSubresourceLayers {
                    aspect_mask: aspect,
                    mip_level: mip,
                    base_array_layer: 0,
                    layer_count: desc.native_array_size(),
                },
                src_offset: vk::Offset3D::default(),
                dst_subresource: vk::ImageSubresourceLayers {
                    aspect_mask: aspect,
                    mip_level: mip,
                    base_array_layer: 0,
                    layer_count: desc.native_array_size(),
                },
                dst_offset: vk::Offset3D::default(),
                extent: vk::Extent3D {
                    width: mip_extent(desc.width, mip),
                    height: mip_extent(desc.height, mip),
                    depth: if desc.dimension == astral_rhi::TextureDimension::D3 {
                        mip_extent(desc.depth_or_array_size, mip)
                    } else {
                        1
                    },
                },
            });
        }
        unsafe {
            self.ctx.device.cmd_copy_image(
                self.cmd,
                src_vk.image,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                dst_vk.image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &regions,
            );
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
        let desc = dst.desc().clone();
        if subresource >= desc.mip_levels * desc.native_array_size() {
            return Err(RhiError::ValidationError("subresource out of range".into()));
        }
        self.flush_barriers();
        let src_vk = downcast_buffer(src)?;
        let dst_vk = downcast_texture(dst)?;
        let mip = subresource % desc.mip_levels;
        let layer = subresource / desc.mip_levels;
        let aspect = crate::vulkan_convert::aspect_to_vk(desc.format);
        let region = vk::BufferImageCopy::default()
            .buffer_offset(src_offset)
            .image_subresource(vk::ImageSubresourceLayers {
                aspect_mask: aspect,
                mip_level: mip,
                base_array_layer: layer,
                layer_count: 1,
            })
            .image_extent(vk::Extent3D {
                width: mip_extent(desc.width, mip),
                height: mip_extent(desc.height, mip),
                depth: if desc.dimension == astral_rhi::TextureDimension::D3 {
                    mip_extent(desc.depth_or_array_size, mip)
                } else {
                    1
                },
            });
        unsafe {
            self.ctx.device.cmd_copy_buffer_to_image(
                self.cmd,
                src_vk.buffer,
                dst_vk.image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
            );
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
        self.flush_barriers();
        let src_vk = downcast_texture(src)?;
        let dst_vk = downcast_buffer(dst)?;
        let mip = subresource % desc.mip_levels;
        let layer = subresource / desc.mip_levels;
        let aspect = crate::vulkan_convert::aspect_to_vk(desc.format);
        let region = vk::BufferImageCopy::default()
            .buffer_offset(dst_offset)
            .image_subresource(vk::ImageSubresourceLayers {
                aspect_mask: aspect,
                mip_level: mip,
                base_array_layer: layer,
                layer_count: 1,
            })
            .image_extent(vk::Extent3D {
                width: mip_extent(desc.width, mip),
                height: mip_extent(desc.height, mip),
                depth: if desc.dimension == astral_rhi::TextureDimension::D3 {
                    mip_extent(desc.depth_or_array_size, mip)
                } else {
                    1
                },
            });
        unsafe {
            self.ctx.device.cmd_copy_image_to_buffer(
                self.cmd,
                src_vk.image,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                dst_vk.buffer,
                &[region],
            );
        }
        self.retained.push(Retained::Texture(src.clone()));
        self.retained.push(Retained::Buffer(dst.clone()));
        Ok(())
    }

    fn update_buffer(&mut self, buffer: &BufferHandle, offset: u64, data: &[u8]) -> RhiResult<()> {
        Self::buffer_range(buffer, offset, data.len() as u64)?;
        // vkCmdUpdateBuffer limits
        if data.len() > 65536 || data.len() % 4 != 0 || offset % 4 != 0 {
            return Err(RhiError::ValidationError(
                "inline updates are limited to 64 KiB with 4-byte alignment".into(),
            ));
        }
        self.flush_barriers();
        let vulkan = downcast_buffer(buffer)?;
        unsafe {
            self.ctx
                .device
                .cmd_update_buffer(self.cmd, vulkan.buffer, offset, data);
        }
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
        let vulkan = heap
            .as_any()
            .downcast_ref::<VulkanQueryHeap>()
            .ok_or_else(|| RhiError::ValidationError("foreign query heap".into()))?;
        // Timestamps are written at end_query only
        if heap.desc().kind != QueryKind::Timestamp {
            let flags = if vulkan.is_binary() {
                vk::QueryControlFlags::empty()
            } else {
                vk::QueryControlFlags::PRECISE
            };
            unsafe {
                self.ctx
                    .device
                    .cmd_begin_query(self.cmd, vulkan.pool, index, flags);
            }
        }
        self.retained.push(Retained::QueryHeap(heap.clone()));
        Ok(())
    }

    fn end_query(&mut self, heap: &QueryHeapHandle, index: u32) -> RhiResult<()> {
        if index >= heap.desc().count {
            return Err(RhiError::ValidationError("query index out of range".into()));
        }
        let vulkan = heap
            .as_any()
            .downcast_ref::<VulkanQueryHeap>()
            .ok_or_else(|| RhiError::ValidationError("foreign query heap".into()))?;
        unsafe {
            if heap.desc().kind == QueryKind::Timestamp {
                self.ctx.device.cmd_write_timestamp2(
                    self.cmd,
                    vk::PipelineStageFlags2::ALL_COMMANDS,
                    vulkan.pool,
                    index,
                );
            } else {
                self.ctx.device.cmd_end_query(self.cmd, vulkan.pool, index);
            }
        }
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
        let vulkan = heap
            .as_any()
            .downcast_ref::<VulkanQueryHeap>()
            .ok_or_else(|| RhiError::ValidationError("foreign query heap".into()))?;
        self.flush_barriers();
        let dst_vk = downcast_buffer(dst)?;
        unsafe {
            self.ctx.device.cmd_copy_query_pool_results(
                self.cmd,
                vulkan.pool,
                first,
                count,
                dst_vk.buffer,
                dst_offset,
                8,
                vk::QueryResultFlags::TYPE_64 | vk::QueryResultFlags::WAIT,
            );
            // Pools need a reset before the queries can be reused
            self.ctx
                .device
                .cmd_reset_query_pool(self.cmd, vulkan.pool, first, count);
        }
        self.retained.push(Retained::QueryHeap(heap.clone()));
        self.retained.push(Retained::Buffer(dst.clone()));
        Ok(())
    }

    fn build_acceleration_structure(
        &mut self,
        acceleration_structure: &AccelerationStructureHandle,
    ) -> RhiResult<()> {
        let vulkan = acceleration_structure
            .as_any()
            .downcast_ref::<VulkanAccelerationStructure>()
            .ok_or_else(|| RhiError::ValidationError("foreign acceleration structure".into()))?;
        self.flush_barriers();
        vulkan.record_build(self.cmd)?;

        // Build writes must land before any trace or dependent build reads
        let barriers = [vk::MemoryBarrier2::default()
            .src_stage_mask(vk::PipelineStageFlags2::ACCELERATION_STRUCTURE_BUILD_KHR)
            .src_access_mask(vk::AccessFlags2::ACCELERATION_STRUCTURE_WRITE_KHR)
            .dst_stage_mask(
                vk::PipelineStageFlags2::ACCELERATION_STRUCTURE_BUILD_KHR
                    | vk::PipelineStageFlags2::RAY_TRACING_SHADER_KHR,
            )
            .dst_access_mask(vk::AccessFlags2::ACCELERATION_STRUCTURE_READ_KHR)];
        let dependency = vk::DependencyInfo::default().memory_barriers(&barriers);
        unsafe { self.ctx.device.cmd_pipeline_barrier2(self.cmd, &dependency) };

        self.retained
            .push(Retained::AccelerationStructure(acceleration_structure.clone()));
        Ok(())
    }

    fn begin_event(&mut self, name: &str) {
        if let (Some(loader), Ok(name)) = (&self.ctx.debug_utils_device, CString::new(name)) {
            let label = vk::DebugUtilsLabelEXT::default().label_name(&name);
            unsafe { loader.cmd_begin_debug_utils_label(self.cmd, &label) };
        }
    }

    fn end_event(&mut self) {
        if let Some(loader) = &self.ctx.debug_utils_device {
            unsafe { loader.cmd_end_debug_utils_label(self.cmd) };
        }
    }

    fn marker(&mut self, name: &str) {
        if let (Some(loader), Ok(name)) = (&self.ctx.debug_utils_device, CString::new(name)) {
            let label = vk::DebugUtilsLabelEXT::default().label_name(&name);
            unsafe { loader.cmd_insert_debug_utils_label(self.cmd, &label) };
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
