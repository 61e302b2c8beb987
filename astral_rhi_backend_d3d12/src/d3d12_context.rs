//! Shared GPU context for all D3D12 objects
//!
//! Every resource holds an `Arc<GpuContext>` so the device, descriptor heaps
//! and destroy service stay alive as long as any resource does. The COM
//! references release on drop; `D3d12Device::shutdown` drains the destroy
//! queues and unregisters the info-queue callback first so nothing outlives
//! the device in the wrong order.

use windows::core::HSTRING;
use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::Graphics::Dxgi::IDXGIFactory6;

use crate::d3d12_descriptors::BindlessHeaps;
use crate::d3d12_destroy::DestroyService;

/// One hardware queue with its per-submission fence
///
/// The fence is a timeline: every submitted command list signals it with
/// `astral_rhi::timeline_value`, so cross-queue waits are a `Wait` on the
/// producing queue's fence.
#[derive(Clone)]
pub struct QueueInfo {
    pub queue: ID3D12CommandQueue,
    pub fence: ID3D12Fence,
}

/// Shared GPU context for all D3D12 resources
pub struct GpuContext {
    pub device: ID3D12Device10,

    /// DXGI factory, used for swap-chain creation
    pub factory: IDXGIFactory6,

    /// Direct queue; also the present queue
    pub graphics: QueueInfo,
    /// Async compute queue
    pub compute: QueueInfo,
    /// Copy queue
    pub copy: QueueInfo,

    /// Shader-visible descriptor heaps and the shared root signature
    pub bindless: BindlessHeaps,

    /// Deferred-destroy queues, drained at `end_frame`
    pub destroy: DestroyService,

    /// DXR tier 1.1 reported
    pub raytracing: bool,
    /// Mesh shader tier 1 reported
    pub mesh_shading: bool,
    /// Variable-rate shading tier 1 reported
    pub shading_rate: bool,
    /// DXGI tearing support; gates uncapped presentation
    pub allow_tearing: bool,

    /// Command signatures for `ExecuteIndirect` draws and dispatches
    pub(crate) draw_signature: ID3D12CommandSignature,
    pub(crate) dispatch_signature: ID3D12CommandSignature,

    /// Cookie from `ID3D12InfoQueue1::RegisterMessageCallback`
    pub(crate) info_queue_cookie: Option<u32>,
}

/// Single-argument command signature used by the indirect draw/dispatch paths
pub(crate) fn build_command_signature(
    device: &ID3D12Device10,
    argument: D3D12_INDIRECT_ARGUMENT_TYPE,
    stride: u32,
) -> windows::core::Result<ID3D12CommandSignature> {
    let arguments = [D3D12_INDIRECT_ARGUMENT_DESC {
        Type: argument,
        ..Default::default()
    }];
    let desc = D3D12_COMMAND_SIGNATURE_DESC {
        ByteStride: stride,
        NumArgumentDescs: arguments.len() as u32,
        pArgumentDescs: arguments.as_ptr(),
        NodeMask: 0,
    };
    let mut signature: Option<ID3D12CommandSignature> = None;
    unsafe { device.CreateCommandSignature(&desc, None, &mut signature)? };
    signature.ok_or_else(|| windows::core::Error::from(windows::Win32::Foundation::E_FAIL))
}

impl GpuContext {
    /// The queue info for an RHI queue kind
    pub fn queue(&self, kind: astral_rhi::QueueKind) -> &QueueInfo {
        match kind {
            astral_rhi::QueueKind::Graphics => &self.graphics,
            astral_rhi::QueueKind::Compute => &self.compute,
            astral_rhi::QueueKind::Copy => &self.copy,
        }
    }

    /// Frame clock mirror maintained by the device for resource destructors
    pub fn current_frame(&self) -> u64 {
        self.destroy.current_frame()
    }

    /// Attach a debug name to a native object
    pub fn set_object_name(&self, object: &ID3D12Object, name: Option<&str>) {
        let Some(name) = name else {
            return;
        };
        unsafe {
            object.SetName(&HSTRING::from(name)).ok();
        }
    }
}
