//! D3D12 buffer resource
//!
//! Buffers are committed resources; the heap type follows the residency.
//! Bindless slots allocate at creation based on the usage mask: a
//! constant-buffer slot for UNIFORM, shader-read/write slots for
//! SHADER_READ/SHADER_WRITE. Buffers with a pixel format get typed views,
//! buffers with a stride get structured views, the rest get raw views.
//! Sub-range views are created lazily and cached per resolved range.
//! CPU-accessible buffers stay persistently mapped.

use std::ffi::c_void;
use std::sync::{Arc, Mutex};

use rustc_hash::FxHashMap;
use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::Graphics::Dxgi::Common::{DXGI_FORMAT_R32_TYPELESS, DXGI_SAMPLE_DESC};

use astral_rhi::{
    rhi_err, BindlessIndex, Buffer, BufferDesc, BufferRange, BufferResidency, BufferUsage,
    DescriptorKind, RhiError, RhiResult, MAX_FRAMES_IN_FLIGHT,
};

use crate::d3d12_context::GpuContext;
use crate::d3d12_convert::{align_up, format_to_dxgi};
use crate::d3d12_destroy::Zombie;

/// A cached sub-range view slot
struct RangeView {
    index: BindlessIndex,
    kind: DescriptorKind,
}

/// D3D12 buffer with its bindless slots and cached sub-range views
///
/// Dynamic residency backs the logical size with one
/// constant-buffer-aligned slice per frame in flight; writes and binds
/// resolve against the current frame's slice, so a CPU update never touches
/// data a still-executing frame reads.
pub struct D3d12Buffer {
    pub(crate) resource: ID3D12Resource,
    desc: BufferDesc,
    /// Byte distance between ring slices; 0 for non-dynamic residency
    ring_stride: u64,
    /// One constant-buffer slot per ring slice (a single slot otherwise)
    cbv_slots: Vec<BindlessIndex>,
    srv: BindlessIndex,
    uav: BindlessIndex,
    range_views: Mutex<FxHashMap<(BufferRange, bool), RangeView>>,
    /// Persistent mapping for Upload, Dynamic and Readback residency
    mapped: Option<*mut u8>,
    ctx: Arc<GpuContext>,
}

// The mapped pointer targets the resource's own memory
unsafe impl Send for D3d12Buffer {}
unsafe impl Sync for D3d12Buffer {}

fn heap_type(residency: BufferResidency) -> D3D12_HEAP_TYPE {
    match residency {
        BufferResidency::DeviceLocal => D3D12_HEAP_TYPE_DEFAULT,
        BufferResidency::Upload | BufferResidency::Dynamic => D3D12_HEAP_TYPE_UPLOAD,
        BufferResidency::Readback => D3D12_HEAP_TYPE_READBACK,
    }
}

fn resource_flags(desc: &BufferDesc) -> D3D12_RESOURCE_FLAGS {
    let mut flags = D3D12_RESOURCE_FLAG_NONE;
    if desc
        .usage
        .intersects(BufferUsage::SHADER_WRITE | BufferUsage::ACCELERATION_STRUCTURE_STORAGE)
    {
        flags |= D3D12_RESOURCE_FLAG_ALLOW_UNORDERED_ACCESS;
    }
    flags
}

impl D3d12Buffer {
    pub fn new(ctx: Arc<GpuContext>, desc: BufferDesc) -> RhiResult<Self> {
        desc.validate()?;

        let ring_stride = if desc.residency == BufferResidency::Dynamic {
            align_up(desc.size, D3D12_CONSTANT_BUFFER_DATA_PLACEMENT_ALIGNMENT as u64)
        } else {
            0
        };
        let native_size = if ring_stride != 0 {
            ring_stride * MAX_FRAMES_IN_FLIGHT
        } else {
            desc.size
        };

        let heap_properties = D3D12_HEAP_PROPERTIES {
            Type: heap_type(desc.residency),
            ..Default::default()
        };
        let resource_desc = D3D12_RESOURCE_DESC1 {
            Dimension: D3D12_RESOURCE_DIMENSION_BUFFER,
            Width: native_size,
            Height: 1,
            DepthOrArraySize: 1,
            MipLevels: 1,
            SampleDesc: DXGI_SAMPLE_DESC {
                Count: 1,
                Quality: 0,
            },
            Layout: D3D12_TEXTURE_LAYOUT_ROW_MAJOR,
            Flags: resource_flags(&desc),
            ..Default::default()
        };

        let mut resource: Option<ID3D12Resource> = None;
        unsafe {
            ctx.device
                .CreateCommittedResource3(
                    &heap_properties,
                    D3D12_HEAP_FLAG_NONE,
                    &resource_desc,
                    // Buffers have no layout
                    D3D12_BARRIER_LAYOUT_UNDEFINED,
                    None,
                    None,
                    None,
                    &mut resource,
                )
                .map_err(|e| {
                    if e.code() == windows::Win32::Foundation::E_OUTOFMEMORY {
                        RhiError::OutOfMemory
                    } else {
                        rhi_err!("Failed to create buffer of {} bytes: {:?}", desc.size, e)
                    }
                })?;
        }
        let resource = resource.ok_or_else(|| rhi_err!("Buffer creation returned no resource"))?;
        ctx.set_object_name(&resource, desc.debug_name.as_deref());

        let mapped = if desc.residency != BufferResidency::DeviceLocal {
            let mut ptr: *mut c_void = std::ptr::null_mut();
            unsafe {
                resource
                    .Map(0, None, Some(&mut ptr))
                    .map_err(|e| rhi_err!("Failed to map buffer: {:?}", e))?;
            }
            Some(ptr as *mut u8)
        } else {
            None
        };

        let mut this = Self {
            resource,
            desc,
            ring_stride,
            cbv_slots: Vec::new(),
            srv: BindlessIndex::UNBOUND,
            uav: BindlessIndex::UNBOUND,
            range_views: Mutex::new(FxHashMap::default()),
            mapped,
            ctx,
        };
        this.create_default_views()?;
        Ok(this)
    }

    /// GPU virtual address for vertex/index binding and AS build inputs
    pub(crate) fn gpu_address(&self) -> u64 {
        unsafe { self.resource.GetGPUVirtualAddress() }
    }

    /// Descriptor kind a shader-visible view of this buffer uses; matters
    /// only for slot accounting since all non-sampler kinds share one heap
    fn view_kind(&self, writable: bool) -> DescriptorKind {
        match (self.desc.format.is_some(), writable) {
            (true, false) => DescriptorKind::UniformTexelBuffer,
            (true, true) => DescriptorKind::StorageTexelBuffer,
            (false, _) => DescriptorKind::StorageBuffer,
        }
    }

    fn write_srv(&self, index: BindlessIndex, range: BufferRange) {
        let mut view_desc = D3D12_SHADER_RESOURCE_VIEW_DESC {
            ViewDimension: D3D12_SRV_DIMENSION_BUFFER,
            Shader4ComponentMapping: D3D12_DEFAULT_SHADER_4_COMPONENT_MAPPING,
            ..Default::default()
        };
        view_desc.Anonymous.Buffer = if let Some(format) = self.desc.format {
            let texel = format.info().bytes_per_block as u64;
            view_desc.Format = format_to_dxgi(format);
            D3D12_BUFFER_SRV {
                FirstElement: range.offset / texel,
                NumElements: (range.size / texel) as u32,
                StructureByteStride: 0,
                Flags: D3D12_BUFFER_SRV_FLAG_NONE,
            }
        } else if self.desc.stride > 0 {
            let stride = self.desc.stride as u64;
            D3D12_BUFFER_SRV {
                FirstElement: range.offset / stride,
                NumElements: (range.size / stride) as u32,
                StructureByteStride: self.desc.stride,
                Flags: D3D12_BUFFER_SRV_FLAG_NONE,
            }
        } else {
            view_desc.Format = DXGI_FORMAT_R32_TYPELESS;
            D3D12_BUFFER_SRV {
                FirstElement: range.offset / 4,
                NumElements: (range.size / 4) as u32,
                StructureByteStride: 0,
                Flags: D3D12_BUFFER_SRV_FLAG_RAW,
            }
        };
        unsafe {
            self.ctx.device.CreateShaderResourceView(
                &self.resource,
                Some(&view_desc),
                self.ctx.bindless.resource_cpu(index),
            );
        }
    }

    fn write_uav(&self, index: BindlessIndex, range: BufferRange) {
        let mut view_desc = D3D12_UNORDERED_ACCESS_VIEW_DESC {
            ViewDimension: D3D12_UAV_DIMENSION_BUFFER,
            ..Default::default()
        };
        view_desc.Anonymous.Buffer = if let Some(format) = self.desc.format {
            let texel = format.info().bytes_per_block as u64;
            view_desc.Format = format_to_dxgi(format);
            D3D12_BUFFER_UAV {
                FirstElement: range.offset / texel,
                NumElements: (range.size / texel) as u32,
                StructureByteStride: 0,
                CounterOffsetInBytes: 0,
                Flags: D3D12_BUFFER_UAV_FLAG_NONE,
            }
        } else if self.desc.stride > 0 {
            let stride = self.desc.stride as u64;
            D3D12_BUFFER_UAV {
                FirstElement: range.offset / stride,
                NumElements: (range.size / stride) as u32,
                StructureByteStride: self.desc.stride,
                CounterOffsetInBytes: 0,
                Flags: D3D12_BUFFER_UAV_FLAG_NONE,
            }
        } else {
            view_desc.Format = DXGI_FORMAT_R32_TYPELESS;
            D3D12_BUFFER_UAV {
                FirstElement: range.offset / 4,
                NumElements: (range.size / 4) as u32,
                StructureByteStride: 0,
                CounterOffsetInBytes: 0,
                Flags: D3D12_BUFFER_UAV_FLAG_RAW,
            }
        };
        unsafe {
            self.ctx.device.CreateUnorderedAccessView(
                &self.resource,
                None,
                Some(&view_desc),
                self.ctx.bindless.resource_cpu(index),
            );
        }
    }

    /// Allocate and write the bindless slot for one view of `range`
    fn create_view(&self, range: BufferRange, writable: bool) -> RhiResult<RangeView> {
        let kind = self.view_kind(writable);
        let index = self.ctx.bindless.allocate(kind)?;
        if writable {
            self.write_uav(index, range);
        } else {
            self.write_srv(index, range);
        }
        Ok(RangeView { index, kind })
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
                let view_desc = D3D12_CONSTANT_BUFFER_VIEW_DESC {
                    BufferLocation: self.gpu_address() + slice * self.ring_stride,
                    // Constant-buffer views are sized in 256-byte multiples
                    SizeInBytes: align_up(self.desc.size, 256) as u32,
                };
                unsafe {
                    self.ctx
                        .device
                        .CreateConstantBufferView(Some(&view_desc), self.ctx.bindless.resource_cpu(slot));
                }
                self.cbv_slots.push(slot);
            }
        }
        if self.desc.usage.contains(BufferUsage::SHADER_READ) {
            self.srv = self.create_view(full, false)?.index;
        }
        if self.desc.usage.contains(BufferUsage::SHADER_WRITE) {
            self.uav = self.create_view(full, true)?.index;
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

    fn mapped_ptr(&self) -> RhiResult<*mut u8> {
        self.mapped
            .ok_or_else(|| rhi_err!("Buffer is not CPU-accessible"))
    }

    /// Byte offset of the ring slice the current frame owns; 0 for
    /// non-dynamic residency
    pub(crate) fn active_offset(&self) -> u64 {
        if self.ring_stride == 0 {
            return 0;
        }
        (self.ctx.current_frame() % MAX_FRAMES_IN_FLIGHT) * self.ring_stride
    }
}

impl Buffer for D3d12Buffer {
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

impl Drop for D3d12Buffer {
    fn drop(&mut self) {
        let frame = self.ctx.current_frame();
        let bindless = &self.ctx.bindless;

        for slot in self.cbv_slots.drain(..) {
            bindless.free(DescriptorKind::UniformBuffer, slot, frame);
        }
        bindless.free(self.view_kind(false), self.srv, frame);
        bindless.free(self.view_kind(true), self.uav, frame);
        for (_, view) in self.range_views.lock().unwrap().drain() {
            bindless.free(view.kind, view.index, frame);
        }

        self.ctx.destroy.push(Zombie::Resource(self.resource.clone()));
    }
}
