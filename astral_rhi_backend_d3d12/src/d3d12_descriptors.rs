//! Bindless descriptor heaps and the shared root signature
//!
//! One shader-visible CBV/SRV/UAV heap holds every non-sampler descriptor;
//! a second shader-visible heap holds samplers. The bindless index IS the
//! heap offset, so every non-sampler [`DescriptorKind`] shares one slot
//! allocator. Two small CPU-only heaps carry render-target and depth-stencil
//! views. The root signature every pipeline shares is 128 bytes of root
//! constants plus unbounded descriptor tables over both heaps.

use std::sync::Mutex;

use windows::Win32::Graphics::Direct3D::D3D_ROOT_SIGNATURE_VERSION_1_1;
use windows::Win32::Graphics::Direct3D12::*;

use astral_rhi::{
    rhi_err, BindlessAllocator, BindlessIndex, DescriptorKind, RhiError, RhiResult,
    MAX_FRAMES_IN_FLIGHT, PUSH_CONSTANT_CAPACITY,
};

/// Capacity of the CPU render-target and depth-stencil view heaps
const CPU_VIEW_CAPACITY: u32 = 1024;

/// One descriptor heap with handle arithmetic
pub struct DescriptorHeap {
    pub heap: ID3D12DescriptorHeap,
    cpu_base: D3D12_CPU_DESCRIPTOR_HANDLE,
    gpu_base: D3D12_GPU_DESCRIPTOR_HANDLE,
    increment: u32,
    pub capacity: u32,
}

impl DescriptorHeap {
    fn new(
        device: &ID3D12Device10,
        kind: D3D12_DESCRIPTOR_HEAP_TYPE,
        capacity: u32,
        shader_visible: bool,
    ) -> RhiResult<Self> {
        let desc = D3D12_DESCRIPTOR_HEAP_DESC {
            Type: kind,
            NumDescriptors: capacity,
            Flags: if shader_visible {
                D3D12_DESCRIPTOR_HEAP_FLAG_SHADER_VISIBLE
            } else {
                D3D12_DESCRIPTOR_HEAP_FLAG_NONE
            },
            NodeMask: 0,
        };
        let heap: ID3D12DescriptorHeap = unsafe {
            device
                .CreateDescriptorHeap(&desc)
                .map_err(|e| rhi_err!("Failed to create descriptor heap: {:?}", e))?
        };
        let cpu_base = unsafe { heap.GetCPUDescriptorHandleForHeapStart() };
        let gpu_base = if shader_visible {
            unsafe { heap.GetGPUDescriptorHandleForHeapStart() }
        } else {
            D3D12_GPU_DESCRIPTOR_HANDLE::default()
        };
        let increment = unsafe { device.GetDescriptorHandleIncrementSize(kind) };
        Ok(Self {
            heap,
            cpu_base,
            gpu_base,
            increment,
            capacity,
        })
    }

    pub fn cpu_handle(&self, slot: u32) -> D3D12_CPU_DESCRIPTOR_HANDLE {
        D3D12_CPU_DESCRIPTOR_HANDLE {
            ptr: self.cpu_base.ptr + slot as usize * self.increment as usize,
        }
    }

    pub fn gpu_handle(&self, slot: u32) -> D3D12_GPU_DESCRIPTOR_HANDLE {
        D3D12_GPU_DESCRIPTOR_HANDLE {
            ptr: self.gpu_base.ptr + slot as u64 * self.increment as u64,
        }
    }

    pub fn gpu_base(&self) -> D3D12_GPU_DESCRIPTOR_HANDLE {
        self.gpu_base
    }
}

/// Simple slot allocator for the CPU view heaps; freed slots recycle through
/// the deferred-destroy queue, not here
struct CpuViewAllocator {
    next: u32,
    free_list: Vec<u32>,
    capacity: u32,
}

impl CpuViewAllocator {
    fn new(capacity: u32) -> Self {
        Self {
            next: 0,
            free_list: Vec::new(),
            capacity,
        }
    }

    fn allocate(&mut self) -> Option<u32> {
        if let Some(slot) = self.free_list.pop() {
            return Some(slot);
        }
        if self.next < self.capacity {
            let slot = self.next;
            self.next += 1;
            return Some(slot);
        }
        None
    }

    fn recycle(&mut self, slot: u32) {
        self.free_list.push(slot);
    }
}

/// Shader-visible descriptor heaps plus the root signature every pipeline
/// in the backend shares
pub struct BindlessHeaps {
    /// CBV/SRV/UAV heap; all non-sampler kinds share it
    pub resources: DescriptorHeap,
    pub samplers: DescriptorHeap,
    /// CPU-only render-target views
    pub rtvs: DescriptorHeap,
    /// CPU-only depth-stencil views
    pub dsvs: DescriptorHeap,
    root_signature: ID3D12RootSignature,

    /// Slot allocators: `[resource, sampler]`
    allocators: Mutex<[BindlessAllocator; 2]>,
    rtv_slots: Mutex<CpuViewAllocator>,
    dsv_slots: Mutex<CpuViewAllocator>,
    raytracing: bool,
}

/// Root parameter index of the 32-bit constants
pub const ROOT_PARAM_CONSTANTS: u32 = 0;
/// Root parameter index of the resource descriptor table
pub const ROOT_PARAM_RESOURCES: u32 = 1;
/// Root parameter index of the sampler descriptor table
pub const ROOT_PARAM_SAMPLERS: u32 = 2;

fn build_root_signature(device: &ID3D12Device10) -> RhiResult<ID3D12RootSignature> {
    let volatile_range = |range_type: D3D12_DESCRIPTOR_RANGE_TYPE| D3D12_DESCRIPTOR_RANGE1 {
        RangeType: range_type,
        NumDescriptors: u32::MAX,
        BaseShaderRegister: 0,
        RegisterSpace: 0,
        Flags: D3D12_DESCRIPTOR_RANGE_FLAG_DESCRIPTORS_VOLATILE,
        OffsetInDescriptorsFromTableStart: 0,
    };

    // CBV, SRV and UAV ranges all start at offset 0 of the same heap: the
    // bindless index addresses the heap directly regardless of view type
    let resource_ranges = [
        volatile_range(D3D12_DESCRIPTOR_RANGE_TYPE_CBV),
        volatile_range(D3D12_DESCRIPTOR_RANGE_TYPE_SRV),
        volatile_range(D3D12_DESCRIPTOR_RANGE_TYPE_UAV),
    ];
    let sampler_ranges = [volatile_range(D3D12_DESCRIPTOR_RANGE_TYPE_SAMPLER)];

    let parameters = [
        D3D12_ROOT_PARAMETER1 {
            ParameterType: D3D12_ROOT_PARAMETER_TYPE_32BIT_CONSTANTS,
            Anonymous: D3D12_ROOT_PARAMETER1_0 {
                Constants: D3D12_ROOT_CONSTANTS {
                    ShaderRegister: 0,
                    RegisterSpace: 0,
                    Num32BitValues: (PUSH_CONSTANT_CAPACITY / 4) as u32,
                },
            },
            ShaderVisibility: D3D12_SHADER_VISIBILITY_ALL,
        },
        D3D12_ROOT_PARAMETER1 {
            ParameterType: D3D12_ROOT_PARAMETER_TYPE_DESCRIPTOR_TABLE,
            Anonymous: D3D12_ROOT_PARAMETER1_0 {
                DescriptorTable: D3D12_ROOT_DESCRIPTOR_TABLE1 {
                    NumDescriptorRanges: resource_ranges.len() as u32,
                    pDescriptorRanges: resource_ranges.as_ptr(),
                },
            },
            ShaderVisibility: D3D12_SHADER_VISIBILITY_ALL,
        },
        D3D12_ROOT_PARAMETER1 {
            ParameterType: D3D12_ROOT_PARAMETER_TYPE_DESCRIPTOR_TABLE,
            Anonymous: D3D12_ROOT_PARAMETER1_0 {
                DescriptorTable: D3D12_ROOT_DESCRIPTOR_TABLE1 {
                    NumDescriptorRanges: sampler_ranges.len() as u32,
                    pDescriptorRanges: sampler_ranges.as_ptr(),
                },
            },
            ShaderVisibility: D3D12_SHADER_VISIBILITY_ALL,
        },
    ];

    let desc = D3D12_VERSIONED_ROOT_SIGNATURE_DESC {
        Version: D3D_ROOT_SIGNATURE_VERSION_1_1,
        Anonymous: D3D12_VERSIONED_ROOT_SIGNATURE_DESC_0 {
            Desc_1_1: D3D12_ROOT_SIGNATURE_DESC1 {
                NumParameters: parameters.len() as u32,
                pParameters: parameters.as_ptr(),
                NumStaticSamplers: 0,
                pStaticSamplers: std::ptr::null(),
                Flags: D3D12_ROOT_SIGNATURE_FLAG_ALLOW_INPUT_ASSEMBLER_INPUT_LAYOUT
                    | D3D12_ROOT_SIGNATURE_FLAG_CBV_SRV_UAV_HEAP_DIRECTLY_INDEXED
                    | D3D12_ROOT_SIGNATURE_FLAG_SAMPLER_HEAP_DIRECTLY_INDEXED,
            },
        },
    };

    let mut blob = None;
    unsafe {
        D3D12SerializeVersionedRootSignature(&desc, &mut blob, None)
            .map_err(|e| rhi_err!("Failed to serialize root signature: {:?}", e))?;
    }
    let blob = blob.ok_or_else(|| rhi_err!("Root signature serialization returned no blob"))?;
    let bytes = unsafe {
        std::slice::from_raw_parts(blob.GetBufferPointer() as *const u8, blob.GetBufferSize())
    };
    unsafe {
        device
            .CreateRootSignature(0, bytes)
            .map_err(|e| rhi_err!("Failed to create root signature: {:?}", e))
    }
}

impl BindlessHeaps {
    pub fn new(device: &ID3D12Device10, raytracing: bool) -> RhiResult<Self> {
        let resources = DescriptorHeap::new(
            device,
            D3D12_DESCRIPTOR_HEAP_TYPE_CBV_SRV_UAV,
            astral_rhi::BINDLESS_RESOURCE_CAPACITY,
            true,
        )?;
        let samplers = DescriptorHeap::new(
            device,
            D3D12_DESCRIPTOR_HEAP_TYPE_SAMPLER,
            astral_rhi::BINDLESS_SAMPLER_CAPACITY,
            true,
        )?;
        let rtvs = DescriptorHeap::new(
            device,
            D3D12_DESCRIPTOR_HEAP_TYPE_RTV,
            CPU_VIEW_CAPACITY,
            false,
        )?;
        let dsvs = DescriptorHeap::new(
            device,
            D3D12_DESCRIPTOR_HEAP_TYPE_DSV,
            CPU_VIEW_CAPACITY,
            false,
        )?;

        let root_signature = build_root_signature(device)?;

        Ok(Self {
            resources,
            samplers,
            rtvs,
            dsvs,
            root_signature,
            // SampledImage stands in for every kind sharing the resource heap
            allocators: Mutex::new([
                BindlessAllocator::new(DescriptorKind::SampledImage),
                BindlessAllocator::new(DescriptorKind::Sampler),
            ]),
            rtv_slots: Mutex::new(CpuViewAllocator::new(CPU_VIEW_CAPACITY)),
            dsv_slots: Mutex::new(CpuViewAllocator::new(CPU_VIEW_CAPACITY)),
            raytracing,
        })
    }

    pub fn root_signature(&self) -> &ID3D12RootSignature {
        &self.root_signature
    }

    fn allocator_index(kind: DescriptorKind) -> usize {
        match kind {
            DescriptorKind::Sampler => 1,
            _ => 0,
        }
    }

    /// Allocate a slot in the heap backing `kind`
    pub fn allocate(&self, kind: DescriptorKind) -> RhiResult<BindlessIndex> {
        if kind == DescriptorKind::AccelerationStructure && !self.raytracing {
            return Err(RhiError::InvalidDescriptor(
                "acceleration structure descriptors require raytracing support".to_string(),
            ));
        }
        self.allocators.lock().unwrap()[Self::allocator_index(kind)]
            .allocate()
            .ok_or(RhiError::OutOfMemory)
    }

    /// Queue a slot for recycling once the frames that could reference it retire
    pub fn free(&self, kind: DescriptorKind, index: BindlessIndex, frame: u64) {
        self.allocators.lock().unwrap()[Self::allocator_index(kind)].free(index, frame);
    }

    /// Recycle retired slots; called once per frame
    pub fn update(&self, current_frame: u64) {
        for allocator in self.allocators.lock().unwrap().iter_mut() {
            allocator.update(current_frame, MAX_FRAMES_IN_FLIGHT);
        }
    }

    /// Recycle every pending slot regardless of frame (shutdown)
    pub fn drain(&self) {
        for allocator in self.allocators.lock().unwrap().iter_mut() {
            allocator.drain();
        }
    }

    /// CPU handle of a resource-heap slot, for descriptor writes
    pub fn resource_cpu(&self, index: BindlessIndex) -> D3D12_CPU_DESCRIPTOR_HANDLE {
        self.resources.cpu_handle(index.slot())
    }

    /// CPU handle of a sampler-heap slot
    pub fn sampler_cpu(&self, index: BindlessIndex) -> D3D12_CPU_DESCRIPTOR_HANDLE {
        self.samplers.cpu_handle(index.slot())
    }

    /// Allocate a CPU render-target view slot
    pub fn allocate_rtv(&self) -> RhiResult<u32> {
        self.rtv_slots
            .lock()
            .unwrap()
            .allocate()
            .ok_or(RhiError::OutOfMemory)
    }

    /// Allocate a CPU depth-stencil view slot
    pub fn allocate_dsv(&self) -> RhiResult<u32> {
        self.dsv_slots
            .lock()
            .unwrap()
            .allocate()
            .ok_or(RhiError::OutOfMemory)
    }

    pub(crate) fn recycle_rtv(&self, slot: u32) {
        self.rtv_slots.lock().unwrap().recycle(slot);
    }

    pub(crate) fn recycle_dsv(&self, slot: u32) {
        self.dsv_slots.lock().unwrap().recycle(slot);
    }
}