//! Vulkan buffer resource
//!
//! Buffers allocate their bindless slots at creation based on the usage mask:
//! a uniform-buffer slot for UNIFORM, shader-read/write slots for
//! SHADER_READ/SHADER_WRITE. Buffers with a pixel format get typed
//! texel-buffer views; untyped buffers get storage-buffer descriptors.
//! Sub-range views are created lazily and cached per resolved range.

use std::sync::{Arc, Mutex};

use ash::vk;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use gpu_allocator::MemoryLocation;
use rustc_hash::FxHashMap;

use astral_rhi::{
    rhi_err, BindlessIndex, Buffer, BufferDesc, BufferRange, BufferResidency, BufferUsage,
    DescriptorKind, RhiError, RhiResult, MAX_FRAMES_IN_FLIGHT,
};

use crate::vulkan_context::GpuContext;
use crate::vulkan_convert::format_to_vk;
use crate::vulkan_destroy::Zombie;

/// A cached sub-range view: the bindless slot plus the typed buffer view
/// backing it, if the buffer carries a format
struct RangeView {
    index: BindlessIndex,
    kind: DescriptorKind,
    buffer_view: Option<vk::BufferView>,
}

/// Uniform-buffer offset alignment every implementation satisfies; dynamic
/// ring slices start on this boundary
const DYNAMIC_SLICE_ALIGNMENT: u64 = 256;

/// Vulkan buffer with its bindless slots and cached sub-range views
///
/// Dynamic residency backs the logical size with one slice per frame in
/// flight: writes and binds resolve against the current frame's slice, so a
/// CPU update never touches data a still-executing frame reads.
pub struct VulkanBuffer {
    pub(crate) buffer: vk::Buffer,
    allocation: Option<Allocation>,
    desc: BufferDesc,
    /// Byte distance between ring slices; 0 for non-dynamic residency
    ring_stride: u64,
    /// One uniform-buffer slot per ring slice (a single slot otherwise)
    cbv_slots: Vec<BindlessIndex>,
    srv: BindlessIndex,
    uav: BindlessIndex,
    srv_view: Option<vk::BufferView>,
    uav_view: Option<vk::BufferView>,
    range_views: Mutex<FxHashMap<(BufferRange, bool), RangeView>>,
    ctx: Arc<GpuContext>,
}

fn usage_to_vk(desc: &BufferDesc, raytracing: bool) -> vk::BufferUsageFlags {
    let mut flags = vk::BufferUsageFlags::TRANSFER_SRC | vk::BufferUsageFlags::TRANSFER_DST;
    let usage = desc.usage;
    if usage.contains(BufferUsage::VERTEX) {
        flags |= vk::BufferUsageFlags::VERTEX_BUFFER;
        if raytracing {
            // Vertex data may feed acceleration-structure builds
            flags |= vk::BufferUsageFlags::ACCELERATION_STRUCTURE_BUILD_INPUT_READ_ONLY_KHR
                | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS;
        }
    }
    if usage.contains(BufferUsage::INDEX) {
        flags |= vk::BufferUsageFlags::INDEX_BUFFER;
        if raytracing {
            flags |= vk::BufferUsageFlags::ACCELERATION_STRUCTURE_BUILD_INPUT_READ_ONLY_KHR
                | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS;
        }
    }
    if usage.contains(BufferUsage::UNIFORM) {
        flags |= vk::BufferUsageFlags::UNIFORM_BUFFER;
    }
    if usage.intersects(BufferUsage::SHADER_READ | BufferUsage::SHADER_WRITE) {
        if desc.format.is_some() {
            flags |= vk::BufferUsageFlags::UNIFORM_TEXEL_BUFFER;
            if usage.contains(BufferUsage::SHADER_WRITE) {
                flags |= vk::BufferUsageFlags::STORAGE_TEXEL_BUFFER;
            }
        } else {
            flags |= vk::BufferUsageFlags::STORAGE_BUFFER;
        }
    }
    if usage.contains(BufferUsage::INDIRECT) {
        flags |= vk::BufferUsageFlags::INDIRECT_BUFFER;
    }
    if usage.contains(BufferUsage::ACCELERATION_STRUCTURE_STORAGE) {
        // Also covers the backend-internal buffers: scratch, TLAS instance
        // arrays and shader binding tables
        flags |= vk::BufferUsageFlags::ACCELERATION_STRUCTURE_STORAGE_KHR
            | vk::BufferUsageFlags::ACCELERATION_STRUCTURE_BUILD_INPUT_READ_ONLY_KHR
            | vk::BufferUsageFlags::SHADER_BINDING_TABLE_KHR
            | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS;
    }
    flags
}

fn residency_to_location(residency: BufferResidency) -> MemoryLocation {
    match residency {
        BufferResidency::DeviceLocal => MemoryLocation::GpuOnly,
        BufferResidency::Upload | BufferResidency::Dynamic => MemoryLocation::CpuToGpu,
        BufferResidency::Readback => MemoryLocation::GpuToCpu,
    }
}

impl VulkanBuffer {
    pub fn new(ctx: Arc<GpuContext>, desc: BufferDesc) -> RhiResult<Self> {
        desc.validate()?;

        let ring_stride = if desc.residency == BufferResidency::Dynamic {
            desc.size.next_multiple_of(DYNAMIC_SLICE_ALIGNMENT)
        } else {
            0
        };
        let native_size = if ring_stride != 0 {
            ring_stride * MAX_FRAMES_IN_FLIGHT
        } else {
            desc.size
        };

        let (sharing_mode, families) = ctx.sharing();
        let buffer_create_info = vk::BufferCreateInfo::default()
            .size(native_size)
            .usage(usage_to_vk(&desc, ctx.acceleration_loader.is_some()))
            .sharing_mode(sharing_mode)
            .queue_family_indices(families);

        let buffer = unsafe {
            ctx.device
                .create_buffer(&buffer_create_info, None)
                .map_err(|e| rhi_err!("Failed to create buffer of {} bytes: {:?}", desc.size, e))?
        };

        let requirements = unsafe { ctx.device.get_buffer_memory_requirements(buffer) };

        let allocation = ctx
            .allocator
            .lock()
            .unwrap()
            .allocate(&AllocationCreateDesc {
                name: desc.debug_name.as_deref().unwrap_or("buffer"),
                requirements,
                location: residency_to_location(desc.residency),
                linear: true,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })
            .map_err(|_| {
                unsafe { ctx.device.destroy_buffer(buffer, None) };
                RhiError::OutOfMemory
            })?;

        unsafe {
            ctx.device
                .bind_buffer_memory(buffer, allocation.memory(), allocation.offset())
                .map_err(|e| rhi_err!("Failed to bind buffer memory: {:?}", e))?;
        }

        ctx.set_object_name(buffer, desc.debug_name.as_deref());

        let mut this = Self {
            buffer,
            allocation: Some(allocation),
            desc,
            ring_stride,
            cbv_slots: Vec::new(),
            srv: BindlessIndex::UNBOUND,
            uav: BindlessIndex::UNBOUND,
            srv_view: None,
            uav_view: None,
            range_views: Mutex::new(FxHashMap::default()),
            ctx,
        };
        this.create_default_views()?;
        Ok(this)
    }

    /// Descriptor kind a shader-visible view of this buffer uses
    fn view_kind(&self, writable: bool) -> DescriptorKind {
        match (self.desc.format.is_some(), writable) {
            (true, false) => DescriptorKind::UniformTexelBuffer,
            (true, true) => DescriptorKind::StorageTexelBuffer,
            (false, _) => DescriptorKind::StorageBuffer,
        }
    }

    fn create_buffer_view(&self, range: BufferRange) -> RhiResult<vk::BufferView> {
        let format = self
            .desc
            .format
            .ok_or_else(|| rhi_err!("Typed buffer view requires a format"))?;
        let create_info = vk::BufferViewCreateInfo::default()
            .buffer(self.buffer)
            .format(format_to_vk(format))
            .offset(range.offset)
            .range(range.size);
        unsafe {
            self.ctx
                .device
                .create_buffer_view(&create_info, None)
                .map_err(|e| rhi_err!("Failed to create buffer view: {:?}", e))
        }
    }

    /// Allocate and write the bindless slot for one view of `range`
    fn create_view(&self, range: BufferRange, writable: bool) -> RhiResult<RangeView> {
        let kind = self.view_kind(writable);
        let index = self.ctx.bindless.allocate(kind)?;
        let buffer_view = if self.desc.format.is_some() {
            let view = self.create_buffer_view(range)?;
            self.ctx
                .bindless
                .write_texel_buffer(&self.ctx.device, kind, index, &view);
            Some(view)
        } else {
            self.ctx.bindless.write_buffer(
                &self.ctx.device,
                kind,
                index,
                self.buffer,
                range.offset,
                range.size,
            );
            None
        };
        Ok(RangeView {
            index,
            kind,
            buffer_view,
        })
    }

    fn create_default_views(&mut self) -> RhiResult<()> {
        let full = BufferRange::default().resolve(self.desc.size)?;

        if self.desc.usage.contains(BufferUsage::UNIFORM) {
            // One slot per ring slice; the active slot rotates with the frame
            let slices = if self.ring_stride != 0 {
                MAX_FRAMES_IN_FLIGHT
            } else {
                1
            };
            for slice in 0..slices {
                let slot = self.ctx.bindless.allocate(DescriptorKind::UniformBuffer)?;
                self.ctx.bindless.write_buffer(
                    &self.ctx.device,
                    DescriptorKind::UniformBuffer,
                    slot,
                    self.buffer,
                    slice * self.ring_stride,
                    self.desc.size,
                );
                self.cbv_slots.push(slot);
            }
        }
        if self.desc.usage.contains(BufferUsage::SHADER_READ) {
            let view = self.create_view(full, false)?;
            self.srv = view.index;
            self.srv_view = view.buffer_view;
        }
        if self.desc.usage.contains(BufferUsage::SHADER_WRITE) {
            let view = self.create_view(full, true)?;
            self.uav = view.index;
            self.uav_view = view.buffer_view;
        }
        Ok(())
    }

    fn range_view(&self, range: BufferRange, writable: bool) -> RhiResult<BindlessIndex> {
        let required = if writable {
            BufferUsage::SHADER_WRITE
        } else {
            BufferUsage::SHADER_READ
        };
        if !self.desc.usage.contains(required) {
            return Err(RhiError::InvalidDescriptor(format!(
                "buffer usage lacks {:?}",
                required
            )));
        }
        let range = range.resolve(self.desc.size)?;

        let mut views = self.range_views.lock().unwrap();
        if let Some(view) = views.get(&(range, writable)) {
            return Ok(view.index);
        }
        let view = self.create_view(range, writable)?;
        let index = view.index;
        views.insert((range, writable), view);
        Ok(index)
    }

    /// Byte offset of the ring slice the current frame owns; 0 for
    /// non-dynamic residency
    pub(crate) fn active_offset(&self) -> u64 {
        if self.ring_stride == 0 {
            return 0;
        }
        (self.ctx.current_frame() % MAX_FRAMES_IN_FLIGHT) * self.ring_stride
    }

    /// Device address for acceleration-structure build inputs
    pub(crate) fn device_address(&self) -> vk::DeviceAddress {
        let info = vk::BufferDeviceAddressInfo::default().buffer(self.buffer);
        unsafe { self.ctx.device.get_buffer_device_address(&info) }
    }

    fn mapped_ptr(&self) -> RhiResult<*mut u8> {
        let allocation = self
            .allocation
            .as_ref()
            .ok_or_else(|| rhi_err!("Buffer has no allocation"))?;
        allocation
            .mapped_ptr()
            .map(|ptr| ptr.as_ptr() as *mut u8)
            .ok_or_else(|| rhi_err!("Buffer is not CPU-accessible"))
    }
}

impl Buffer for VulkanBuffer {
    fn desc(&self) -> &BufferDesc {
        &self.desc
    }

    fn bindless_cbv(&self) -> BindlessIndex {
        match self.cbv_slots.len() {
            0 => BindlessIndex::UNBOUND,
            1 => self.cbv_slots[0],
            _ => self.cbv_slots[(self.ctx.current_frame() % MAX_FRAMES_IN_FLIGHT) as usize],
        }
    }

    fn bindless_srv(&self) -> BindlessIndex {
        self.srv
    }

    fn bindless_uav(&self) -> BindlessIndex {
        self.uav
    }

    fn bindless_srv_range(&self, range: BufferRange) -> RhiResult<BindlessIndex> {
        self.range_view(range, false)
    }

    fn bindless_uav_range(&self, range: BufferRange) -> RhiResult<BindlessIndex> {
        self.range_view(range, true)
    }

    fn update(&self, offset: u64, data: &[u8]) -> RhiResult<()> {
        if !matches!(
            self.desc.residency,
            BufferResidency::Upload | BufferResidency::Dynamic
        ) {
            return Err(RhiError::InvalidDescriptor(
                "update requires Upload or Dynamic residency".into(),
            ));
        }
        if offset + data.len() as u64 > self.desc.size {
            return Err(RhiError::InvalidDescriptor("update exceeds buffer size".into()));
        }
        let ptr = self.mapped_ptr()?;
        let slice_offset = self.active_offset() + offset;
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), ptr.add(slice_offset as usize), data.len());
        }
        Ok(())
    }

    fn read(&self, offset: u64, out: &mut [u8]) -> RhiResult<()> {
        if !matches!(
            self.desc.residency,
            BufferResidency::Readback | BufferResidency::Upload
        ) {
            return Err(RhiError::InvalidDescriptor(
                "read requires Readback or Upload residency".into(),
            ));
        }
        if offset + out.len() as u64 > self.desc.size {
            return Err(RhiError::InvalidDescriptor("read exceeds buffer size".into()));
        }
        let ptr = self.mapped_ptr()?;
        unsafe {
            std::ptr::copy_nonoverlapping(ptr.add(offset as usize), out.as_mut_ptr(), out.len());
        }
        Ok(())
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

impl Drop for VulkanBuffer {
    fn drop(&mut self) {
        let frame = self.ctx.current_frame();
        let bindless = &self.ctx.bindless;

        for slot in self.cbv_slots.drain(..) {
            bindless.free(DescriptorKind::UniformBuffer, slot, frame);
        }
        bindless.free(self.view_kind(false), self.srv, frame);
        bindless.free(self.view_kind(true), self.uav, frame);
        for view in [self.srv_view.take(), self.uav_view.take()].into_iter().flatten() {
            self.ctx.destroy.push(Zombie::BufferView(view));
        }
        for ((_, writable), view) in self.range_views.lock().unwrap().drain() {
            let _ = writable;
            bindless.free(view.kind, view.index, frame);
            if let Some(buffer_view) = view.buffer_view {
                self.ctx.destroy.push(Zombie::BufferView(buffer_view));
            }
        }

        self.ctx.destroy.push(Zombie::Buffer {
            buffer: self.buffer,
            allocation: self.allocation.take(),
        });
    }
}
