//! Staging uploads for buffer and texture initial data
//!
//! Uploads run on the dedicated transfer queue and signal a shared timeline
//! semaphore. Each upload borrows a pooled pair of command buffer and
//! persistent staging buffer; retired pairs return to the free list once the
//! timeline passes their signal value, and a staging buffer grows to the next
//! power of two when an upload outsizes it. The device makes the first
//! non-copy submission of the frame wait on the latest staging value, so
//! resources are filled before any shader reads them.
//!
//! Resources are created with CONCURRENT sharing when the transfer family is
//! distinct, so no queue-family ownership transfer follows an upload.

use std::sync::Arc;

use ash::vk;

use astral_rhi::{
    rhi_err, Buffer, BufferDesc, BufferResidency, BufferUsage, FormatAspect, RhiError, RhiResult,
    Texture, TextureData, TextureDimension, TextureUsage,
};

use crate::vulkan_buffer::VulkanBuffer;
use crate::vulkan_context::{GpuContext, QueueInfo};
use crate::vulkan_texture::VulkanTexture;

/// Smallest staging buffer the pool hands out
const MIN_STAGING_CAPACITY: u64 = 64 * 1024;

/// One pooled upload: a command buffer and its persistent staging buffer
struct UploadSlot {
    cmd: vk::CommandBuffer,
    staging: VulkanBuffer,
}

/// Pooled command buffers, staging memory and the staging timeline for
/// resource uploads
pub struct CopyAllocator {
    pool: vk::CommandPool,
    /// Timeline signaled once per staging submission
    timeline: vk::Semaphore,
    next_value: u64,
    /// Retired pairs ready for reuse
    free: Vec<UploadSlot>,
    /// Pairs still executing, with their signal values
    in_flight: Vec<(UploadSlot, u64)>,
    /// Latest value a non-copy submit must wait for, cleared when consumed
    pending_wait: Option<u64>,
    queue: QueueInfo,
}

impl CopyAllocator {
    pub fn new(ctx: &GpuContext) -> RhiResult<Self> {
        let queue = ctx.copy;

        let pool_info = vk::CommandPoolCreateInfo::default()
            .flags(
                vk::CommandPoolCreateFlags::TRANSIENT
                    | vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
            )
            .queue_family_index(queue.family);
        let pool = unsafe {
            ctx.device
                .create_command_pool(&pool_info, None)
                .map_err(|e| rhi_err!("Failed to create staging command pool: {:?}", e))?
        };

        let mut timeline_info =
            vk::SemaphoreTypeCreateInfo::default().semaphore_type(vk::SemaphoreType::TIMELINE);
        let semaphore_info = vk::SemaphoreCreateInfo::default().push_next(&mut timeline_info);
        let timeline = unsafe {
            ctx.device
                .create_semaphore(&semaphore_info, None)
                .map_err(|e| {
                    unsafe { ctx.device.destroy_command_pool(pool, None) };
                    rhi_err!("Failed to create staging timeline: {:?}", e)
                })?
        };

        Ok(Self {
            pool,
            timeline,
            next_value: 1,
            free: Vec::new(),
            in_flight: Vec::new(),
            pending_wait: None,
            queue,
        })
    }

    /// The staging semaphore and the value the next non-copy submission must
    /// wait for; consuming clears the pending wait
    pub fn take_pending_wait(&mut self) -> Option<(vk::Semaphore, u64)> {
        self.pending_wait.take().map(|value| (self.timeline, value))
    }

    /// Upload `data` into a device-local buffer through a staging buffer
    pub fn stage_buffer(
        &mut self,
        ctx: &Arc<GpuContext>,
        dst: &VulkanBuffer,
        data: &[u8],
    ) -> RhiResult<()> {
        if data.len() as u64 > dst.desc().size {
            return Err(RhiError::InvalidDescriptor(format!(
                "initial data ({} bytes) exceeds buffer size ({} bytes)",
                data.len(),
                dst.desc().size
            )));
        }

        let slot = self.acquire(ctx, data.len() as u64)?;
        slot.staging.update(0, data)?;

        let region = vk::BufferCopy::default().size(data.len() as u64);
        unsafe {
            ctx.device
                .cmd_copy_buffer(slot.cmd, slot.staging.buffer, dst.buffer, &[region]);
        }
        self.submit(ctx, slot)
    }

    /// Upload tightly packed mip-0 layer data into a texture.
    /// Leaves the whole image in its steady-state layout.
    pub fn stage_texture(
        &mut self,
        ctx: &Arc<GpuContext>,
        dst: &VulkanTexture,
        data: &TextureData,
    ) -> RhiResult<()> {
        let desc = dst.desc().clone();
        let info = desc.format.info();

        let blocks_x = desc.width.div_ceil(info.block_width);
        let blocks_y = desc.height.div_ceil(info.block_height);
        let depth = if desc.dimension == TextureDimension::D3 {
            desc.depth_or_array_size
        } else {
            1
        };
        let layer_size = blocks_x as u64 * blocks_y as u64 * depth as u64 * info.bytes_per_block as u64;

        let layers: Vec<(u32, &[u8])> = match data {
            TextureData::Single(bytes) => vec![(0, bytes.as_slice())],
            TextureData::Layers(entries) => entries
                .iter()
                .map(|entry| (entry.layer, entry.data.as_slice()))
                .collect(),
        };
        for (layer, bytes) in &layers {
            if *layer >= desc.native_array_size() {
                return Err(RhiError::InvalidDescriptor(format!(
                    "initial data targets layer {} of a {}-layer texture",
                    layer,
                    desc.native_array_size()
                )));
            }
            if bytes.len() as u64 != layer_size {
                return Err(RhiError::InvalidDescriptor(format!(
                    "initial data for layer {} is {} bytes, expected {}",
                    layer,
                    bytes.len(),
                    layer_size
                )));
            }
        }

        let mut staged = Vec::with_capacity(layer_size as usize * layers.len());
        for (_, bytes) in &layers {
            staged.extend_from_slice(bytes);
        }

        let slot = self.acquire(ctx, staged.len() as u64)?;
        slot.staging.update(0, &staged)?;

        let aspect = if info.aspect.contains(FormatAspect::DEPTH) {
            vk::ImageAspectFlags::DEPTH
        } else {
            vk::ImageAspectFlags::COLOR
        };
        let full_range = vk::ImageSubresourceRange::default()
            .aspect_mask(aspect)
            .level_count(vk::REMAINING_MIP_LEVELS)
            .layer_count(vk::REMAINING_ARRAY_LAYERS);

        unsafe {
            let to_transfer = vk::ImageMemoryBarrier2::default()
                .src_stage_mask(vk::PipelineStageFlags2::NONE)
                .src_access_mask(vk::AccessFlags2::empty())
                .dst_stage_mask(vk::PipelineStageFlags2::COPY)
                .dst_access_mask(vk::AccessFlags2::TRANSFER_WRITE)
                .old_layout(vk::ImageLayout::UNDEFINED)
                .new_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
                .image(dst.image)
                .subresource_range(full_range);
            let barriers = [to_transfer];
            let dependency = vk::DependencyInfo::default().image_memory_barriers(&barriers);
            ctx.device.cmd_pipeline_barrier2(slot.cmd, &dependency);

            for (index, (layer, _)) in layers.iter().enumerate() {
                let region = vk::BufferImageCopy::default()
                    .buffer_offset(index as u64 * layer_size)
                    .image_subresource(
                        vk::ImageSubresourceLayers::default()
                            .aspect_mask(aspect)
                            .mip_level(0)
                            .base_array_layer(*layer)
                            .layer_count(1),
                    )
                    .image_extent(vk::Extent3D {
                        width: desc.width,
                        height: desc.height,
                        depth,
                    });
                ctx.device.cmd_copy_buffer_to_image(
                    slot.cmd,
                    slot.staging.buffer,
                    dst.image,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    &[region],
                );
            }

            let final_layout = if desc.usage.contains(TextureUsage::SAMPLED) {
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL
            } else {
                vk::ImageLayout::GENERAL
            };
            let to_steady = vk::ImageMemoryBarrier2::default()
                .src_stage_mask(vk::PipelineStageFlags2::COPY)
                .src_access_mask(vk::AccessFlags2::TRANSFER_WRITE)
                .dst_stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS)
                .dst_access_mask(vk::AccessFlags2::MEMORY_READ)
                .old_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
                .new_layout(final_layout)
                .image(dst.image)
                .subresource_range(full_range);
            let barriers = [to_steady];
            let dependency = vk::DependencyInfo::default().image_memory_barriers(&barriers);
            ctx.device.cmd_pipeline_barrier2(slot.cmd, &dependency);
        }
        self.submit(ctx, slot)
    }

    fn create_staging(ctx: &Arc<GpuContext>, bytes: u64) -> RhiResult<VulkanBuffer> {
        let capacity = bytes.next_power_of_two().max(MIN_STAGING_CAPACITY);
        VulkanBuffer::new(
            ctx.clone(),
            BufferDesc {
                size: capacity,
                usage: BufferUsage::empty(),
                residency: BufferResidency::Upload,
                format: None,
                stride: 0,
                debug_name: Some("staging".into()),
            },
        )
    }

    /// Recycle retired pairs, then take one whose staging buffer fits
    /// `bytes`; its command buffer begins recording
    fn acquire(&mut self, ctx: &Arc<GpuContext>, bytes: u64) -> RhiResult<UploadSlot> {
        let completed = unsafe {
            ctx.device
                .get_semaphore_counter_value(self.timeline)
                .unwrap_or(0)
        };
        let mut index = 0;
        while index < self.in_flight.len() {
            if self.in_flight[index].1 <= completed {
                let (slot, _) = self.in_flight.swap_remove(index);
                self.free.push(slot);
            } else {
                index += 1;
            }
        }

        // Prefer a pair that already fits; otherwise grow the first retired
        // pair's staging buffer. The replaced buffer drops into the
        // deferred-destroy queue.
        let found = self
            .free
            .iter()
            .position(|slot| slot.staging.desc().size >= bytes)
            .or_else(|| (!self.free.is_empty()).then_some(0));
        let mut slot = match found {
            Some(index) => self.free.swap_remove(index),
            None => UploadSlot {
                cmd: self.allocate_cmd(ctx)?,
                staging: Self::create_staging(ctx, bytes)?,
            },
        };
        if slot.staging.desc().size < bytes {
            slot.staging = Self::create_staging(ctx, bytes)?;
        }

        let begin_info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe {
            ctx.device
                .begin_command_buffer(slot.cmd, &begin_info)
                .map_err(|e| rhi_err!("Failed to begin staging command buffer: {:?}", e))?;
        }
        Ok(slot)
    }

    fn allocate_cmd(&self, ctx: &GpuContext) -> RhiResult<vk::CommandBuffer> {
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        Ok(unsafe {
            ctx.device
                .allocate_command_buffers(&alloc_info)
                .map_err(|e| rhi_err!("Failed to allocate staging command buffer: {:?}", e))?[0]
        })
    }

    /// End and submit on the transfer queue, signaling the staging timeline
    fn submit(&mut self, ctx: &GpuContext, slot: UploadSlot) -> RhiResult<()> {
        unsafe {
            ctx.device
                .end_command_buffer(slot.cmd)
                .map_err(|e| rhi_err!("Failed to end staging command buffer: {:?}", e))?;
        }

        let value = self.next_value;
        let cmd_infos = [vk::CommandBufferSubmitInfo::default().command_buffer(slot.cmd)];
        let signal_infos = [vk::SemaphoreSubmitInfo::default()
            .semaphore(self.timeline)
            .value(value)
            .stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS)];
        let submit = vk::SubmitInfo2::default()
            .command_buffer_infos(&cmd_infos)
            .signal_semaphore_infos(&signal_infos);

        unsafe {
            ctx.device
                .queue_submit2(self.queue.queue, &[submit], vk::Fence::null())
                .map_err(|e| rhi_err!("Failed to submit staging copy: {:?}", e))?;
        }

        self.in_flight.push((slot, value));
        self.pending_wait = Some(value);
        self.next_value += 1;
        Ok(())
    }

    /// Destroy the pool and timeline. The caller waits for the GPU first;
    /// pooled staging buffers drop into the deferred-destroy queue.
    pub fn destroy(&mut self, ctx: &GpuContext) {
        self.free.clear();
        self.in_flight.clear();
        unsafe {
            ctx.device.destroy_command_pool(self.pool, None);
            ctx.device.destroy_semaphore(self.timeline, None);
        }
    }
}
