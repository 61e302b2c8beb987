//! Staging uploads for buffer and texture initial data
//!
//! Uploads run on the copy queue and signal a dedicated fence. Each upload
//! borrows a pooled triple of command allocator, command list and persistent
//! staging buffer; retired triples return to the free list once the fence
//! passes their signal value, and a staging buffer grows to the next power
//! of two when an upload outsizes it. The device makes the first non-copy
//! submission of the frame wait on the latest staging value, so resources
//! are filled before any shader reads them. Texture data arrives tightly
//! packed and is repacked into 256-byte-aligned rows for the placed
//! footprints the copy engine expects.

use std::sync::Arc;

use windows::core::Interface;
use windows::Win32::Graphics::Direct3D12::*;

use astral_rhi::{
    rhi_err, Buffer, BufferDesc, BufferResidency, BufferUsage, RhiError, RhiResult, TextureData,
    TextureDimension,
};

use crate::d3d12_buffer::D3d12Buffer;
use crate::d3d12_context::GpuContext;
use crate::d3d12_convert::{aligned_row_pitch, align_up, format_to_dxgi};
use crate::d3d12_texture::D3d12Texture;

/// Smallest staging buffer the pool hands out
const MIN_STAGING_CAPACITY: u64 = 64 * 1024;

/// One pooled upload: an allocator, its command list and a persistent
/// staging buffer
struct UploadSlot {
    allocator: ID3D12CommandAllocator,
    list: ID3D12GraphicsCommandList7,
    staging: D3d12Buffer,
}

/// Pooled command lists, staging memory and the staging fence for resource
/// uploads
pub struct CopyAllocator {
    /// Fence signaled once per staging submission
    fence: ID3D12Fence,
    next_value: u64,
    /// Retired triples ready for reuse
    free: Vec<UploadSlot>,
    /// Triples still executing, with their signal values
    in_flight: Vec<(UploadSlot, u64)>,
    /// Latest value a non-copy submit must wait for, cleared when consumed
    pending_wait: Option<u64>,
}

impl CopyAllocator {
    pub fn new(ctx: &GpuContext) -> RhiResult<Self> {
        let fence: ID3D12Fence = unsafe {
            ctx.device
                .CreateFence(0, D3D12_FENCE_FLAG_NONE)
                .map_err(|e| rhi_err!("Failed to create staging fence: {:?}", e))?
        };
        Ok(Self {
            fence,
            next_value: 1,
            free: Vec::new(),
            in_flight: Vec::new(),
            pending_wait: None,
        })
    }

    /// The staging fence and the value the next non-copy submission must
    /// wait for; consuming clears the pending wait
    pub fn take_pending_wait(&mut self) -> Option<(ID3D12Fence, u64)> {
        self.pending_wait
            .take()
            .map(|value| (self.fence.clone(), value))
    }

    /// Upload `data` into a device-local buffer through a staging buffer
    pub fn stage_buffer(
        &mut self,
        ctx: &Arc<GpuContext>,
        dst: &D3d12Buffer,
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
        unsafe {
            slot.list
                .CopyBufferRegion(&dst.resource, 0, &slot.staging.resource, 0, data.len() as u64);
        }
        self.submit(ctx, slot)
    }

    /// Upload tightly packed mip-0 layer data into a texture.
    /// Leaves the whole resource in the common layout.
    pub fn stage_texture(
        &mut self,
        ctx: &Arc<GpuContext>,
        dst: &D3d12Texture,
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
        let packed_pitch = blocks_x as u64 * info.bytes_per_block as u64;
        let layer_size = packed_pitch * blocks_y as u64 * depth as u64;

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

        // Repack rows to the copy-engine pitch; each subresource start aligns
        // to the placement granularity
        let row_pitch = aligned_row_pitch(desc.format, desc.width) as u64;
        let rows = blocks_y as u64 * depth as u64;
        let aligned_layer_size = align_up(
            row_pitch * rows,
            D3D12_TEXTURE_DATA_PLACEMENT_ALIGNMENT as u64,
        );
        let mut staged = vec![0u8; aligned_layer_size as usize * layers.len()];
        for (index, (_, bytes)) in layers.iter().enumerate() {
            let base = index as u64 * aligned_layer_size;
            for row in 0..rows {
                let src = (row * packed_pitch) as usize;
                let dst_offset = (base + row * row_pitch) as usize;
                staged[dst_offset..dst_offset + packed_pitch as usize]
                    .copy_from_slice(&bytes[src..src + packed_pitch as usize]);
            }
        }

        let slot = self.acquire(ctx, staged.len() as u64)?;
        slot.staging.update(0, &staged)?;
        unsafe {
            Self::texture_barrier(
                &slot.list,
                &dst.resource,
                D3D12_BARRIER_SYNC_NONE,
                D3D12_BARRIER_SYNC_COPY,
                D3D12_BARRIER_ACCESS_NO_ACCESS,
                D3D12_BARRIER_ACCESS_COPY_DEST,
                D3D12_BARRIER_LAYOUT_UNDEFINED,
                D3D12_BARRIER_LAYOUT_COPY_DEST,
            );

            for (index, (layer, _)) in layers.iter().enumerate() {
                let src = D3D12_TEXTURE_COPY_LOCATION {
                    pResource: std::mem::transmute_copy(&slot.staging.resource),
                    Type: D3D12_TEXTURE_COPY_TYPE_PLACED_FOOTPRINT,
                    Anonymous: D3D12_TEXTURE_COPY_LOCATION_0 {
                        PlacedFootprint: D3D12_PLACED_SUBRESOURCE_FOOTPRINT {
                            Offset: index as u64 * aligned_layer_size,
                            Footprint: D3D12_SUBRESOURCE_FOOTPRINT {
                                Format: format_to_dxgi(desc.format),
                                Width: desc.width,
                                Height: desc.height,
                                Depth: depth,
                                RowPitch: row_pitch as u32,
                            },
                        },
                    },
                };
                let dst_location = D3D12_TEXTURE_COPY_LOCATION {
                    pResource: std::mem::transmute_copy(&dst.resource),
                    Type: D3D12_TEXTURE_COPY_TYPE_SUBRESOURCE_INDEX,
                    Anonymous: D3D12_TEXTURE_COPY_LOCATION_0 {
                        SubresourceIndex: layer * desc.mip_levels,
                    },
                };
                slot.list.CopyTextureRegion(&dst_location, 0, 0, 0, &src, None);
            }

            Self::texture_barrier(
                &slot.list,
                &dst.resource,
                D3D12_BARRIER_SYNC_COPY,
                D3D12_BARRIER_SYNC_NONE,
                D3D12_BARRIER_ACCESS_COPY_DEST,
                D3D12_BARRIER_ACCESS_NO_ACCESS,
                D3D12_BARRIER_LAYOUT_COPY_DEST,
                D3D12_BARRIER_LAYOUT_COMMON,
            );
        }
        self.submit(ctx, slot)
    }

    fn create_staging(ctx: &Arc<GpuContext>, bytes: u64) -> RhiResult<D3d12Buffer> {
        let capacity = bytes.next_power_of_two().max(MIN_STAGING_CAPACITY);
        D3d12Buffer::new(
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

    #[allow(clippy::too_many_arguments)]
    unsafe fn texture_barrier(
        list: &ID3D12GraphicsCommandList7,
        resource: &ID3D12Resource,
        sync_before: D3D12_BARRIER_SYNC,
        sync_after: D3D12_BARRIER_SYNC,
        access_before: D3D12_BARRIER_ACCESS,
        access_after: D3D12_BARRIER_ACCESS,
        layout_before: D3D12_BARRIER_LAYOUT,
        layout_after: D3D12_BARRIER_LAYOUT,
    ) {
        let barrier = D3D12_TEXTURE_BARRIER {
            SyncBefore: sync_before,
            SyncAfter: sync_after,
            AccessBefore: access_before,
            AccessAfter: access_after,
            LayoutBefore: layout_before,
            LayoutAfter: layout_after,
            pResource: std::mem::transmute_copy(resource),
            Subresources: D3D12_BARRIER_SUBRESOURCE_RANGE {
                // All subresources
                IndexOrFirstMipLevel: u32::MAX,
                ..Default::default()
            },
            Flags: D3D12_TEXTURE_BARRIER_FLAG_NONE,
        };
        let group = D3D12_BARRIER_GROUP {
            Type: D3D12_BARRIER_TYPE_TEXTURE,
            NumBarriers: 1,
            Anonymous: D3D12_BARRIER_GROUP_0 {
                pTextureBarriers: &barrier,
            },
        };
        list.Barrier(&[group]);
    }

    /// Recycle retired triples, then take one whose staging buffer fits
    /// `bytes`; its command list opens for recording
    fn acquire(&mut self, ctx: &Arc<GpuContext>, bytes: u64) -> RhiResult<UploadSlot> {
        let completed = unsafe { self.fence.GetCompletedValue() };
        let mut index = 0;
        while index < self.in_flight.len() {
            if self.in_flight[index].1 <= completed {
                let (slot, _) = self.in_flight.swap_remove(index);
                self.free.push(slot);
            } else {
                index += 1;
            }
        }

        // Prefer a triple that already fits; otherwise grow the first retired
        // triple's staging buffer
        let found = self
            .free
            .iter()
            .position(|slot| slot.staging.desc().size >= bytes)
            .or_else(|| (!self.free.is_empty()).then_some(0));
        let mut slot = match found {
            Some(index) => self.free.swap_remove(index),
            None => {
                let allocator: ID3D12CommandAllocator = unsafe {
                    ctx.device
                        .CreateCommandAllocator(D3D12_COMMAND_LIST_TYPE_COPY)
                        .map_err(|e| rhi_err!("Failed to create staging allocator: {:?}", e))?
                };
                let list: ID3D12GraphicsCommandList7 = unsafe {
                    ctx.device
                        .CreateCommandList(0, D3D12_COMMAND_LIST_TYPE_COPY, &allocator, None)
                        .map_err(|e| rhi_err!("Failed to create staging command list: {:?}", e))?
                };
                // Lists are born open; close so the reopen path below is
                // uniform
                unsafe {
                    list.Close()
                        .map_err(|e| rhi_err!("Failed to close staging command list: {:?}", e))?;
                }
                UploadSlot {
                    allocator,
                    list,
                    staging: Self::create_staging(ctx, bytes)?,
                }
            }
        };
        if slot.staging.desc().size < bytes {
            slot.staging = Self::create_staging(ctx, bytes)?;
        }

        unsafe {
            slot.allocator
                .Reset()
                .map_err(|e| rhi_err!("Failed to reset staging allocator: {:?}", e))?;
            slot.list
                .Reset(&slot.allocator, None)
                .map_err(|e| rhi_err!("Failed to reset staging command list: {:?}", e))?;
        }
        Ok(slot)
    }

    /// Close and submit on the copy queue, signaling the staging fence
    fn submit(&mut self, ctx: &GpuContext, slot: UploadSlot) -> RhiResult<()> {
        unsafe {
            slot.list
                .Close()
                .map_err(|e| rhi_err!("Failed to close staging command list: {:?}", e))?;
        }

        let value = self.next_value;
        let lists = [Some(
            slot.list
                .cast::<ID3D12CommandList>()
                .map_err(|e| rhi_err!("Command list cast failed: {:?}", e))?,
        )];
        unsafe {
            ctx.copy.queue.ExecuteCommandLists(&lists);
            ctx.copy
                .queue
                .Signal(&self.fence, value)
                .map_err(|e| rhi_err!("Failed to signal staging fence: {:?}", e))?;
        }

        self.in_flight.push((slot, value));
        self.pending_wait = Some(value);
        self.next_value += 1;
        Ok(())
    }

    /// Drop everything still tracked. The caller waits for the GPU first.
    pub fn destroy(&mut self) {
        self.free.clear();
        self.in_flight.clear();
        self.pending_wait = None;
    }
}
