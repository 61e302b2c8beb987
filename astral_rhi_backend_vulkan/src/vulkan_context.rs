//! Shared GPU context for all Vulkan objects
//!
//! Every resource holds an `Arc<GpuContext>` so the device, allocator and
//! destroy service stay alive as long as any resource does. Device and
//! instance destruction happens in `VulkanDevice::shutdown` to control drop
//! ordering; the context `Drop` intentionally does nothing.

use std::mem::ManuallyDrop;
use std::sync::{Arc, Mutex};

use ash::vk;
use gpu_allocator::vulkan::Allocator;

use crate::vulkan_descriptors::BindlessTable;
use crate::vulkan_destroy::DestroyService;

/// Shader-binding-table alignment limits read from the raytracing-pipeline
/// properties at device creation
#[derive(Clone, Copy)]
pub struct RtLimits {
    pub handle_size: u32,
    pub handle_alignment: u32,
    pub base_alignment: u32,
}

/// One hardware queue with its family index and timeline semaphore
#[derive(Clone, Copy)]
pub struct QueueInfo {
    pub queue: vk::Queue,
    pub family: u32,
    /// Timeline semaphore signaled per submitted command list
    pub timeline: vk::Semaphore,
}

/// Shared GPU context for all Vulkan resources
pub struct GpuContext {
    /// Vulkan logical device
    pub device: ash::Device,

    /// Vulkan instance (destroyed by `VulkanDevice::shutdown`)
    pub instance: ash::Instance,

    pub physical_device: vk::PhysicalDevice,

    /// GPU memory allocator, shared behind a mutex.
    /// `ManuallyDrop` so it can be torn down before the device.
    pub allocator: ManuallyDrop<Arc<Mutex<Allocator>>>,

    /// Graphics queue; also the present queue
    pub graphics: QueueInfo,
    /// Async compute queue; aliases graphics when no dedicated family exists
    pub compute: QueueInfo,
    /// Transfer queue; aliases graphics when no dedicated family exists
    pub copy: QueueInfo,

    /// Unique queue family indices; more than one entry means resources are
    /// created with CONCURRENT sharing so staging copies skip queue-family
    /// ownership transfers
    pub queue_families: Vec<u32>,

    /// Shader-visible descriptor arrays and the shared pipeline layout
    pub bindless: BindlessTable,

    /// Deferred-destroy queues, drained at `end_frame`
    pub destroy: DestroyService,

    /// Dynamic-rendering commands (Vulkan 1.3 core, loaded through the device)
    pub swapchain_loader: ash::khr::swapchain::Device,

    /// Acceleration-structure loader, present when raytracing is supported
    pub acceleration_loader: Option<ash::khr::acceleration_structure::Device>,
    /// Raytracing-pipeline loader, present when raytracing is supported
    pub raytracing_loader: Option<ash::khr::ray_tracing_pipeline::Device>,
    /// Mesh-shader loader, present when mesh shading is supported
    pub mesh_loader: Option<ash::ext::mesh_shader::Device>,
    /// Fragment-shading-rate loader, present when per-draw VRS is supported
    pub shading_rate_loader: Option<ash::khr::fragment_shading_rate::Device>,

    /// Raytracing-pipeline limits, present when raytracing is supported
    pub rt_limits: Option<RtLimits>,

    pub(crate) debug_utils_loader: Option<ash::ext::debug_utils::Instance>,
    pub(crate) debug_utils_device: Option<ash::ext::debug_utils::Device>,
    pub(crate) debug_messenger: Option<vk::DebugUtilsMessengerEXT>,
}

impl GpuContext {
    /// The queue info for an RHI queue kind
    pub fn queue(&self, kind: astral_rhi::QueueKind) -> QueueInfo {
        match kind {
            astral_rhi::QueueKind::Graphics => self.graphics,
            astral_rhi::QueueKind::Compute => self.compute,
            astral_rhi::QueueKind::Copy => self.copy,
        }
    }

    /// Frame clock mirror maintained by the device for resource destructors
    pub fn current_frame(&self) -> u64 {
        self.destroy.current_frame()
    }

    /// Sharing mode and family list for resource creation
    pub fn sharing(&self) -> (vk::SharingMode, &[u32]) {
        if self.queue_families.len() > 1 {
            (vk::SharingMode::CONCURRENT, &self.queue_families)
        } else {
            (vk::SharingMode::EXCLUSIVE, &[])
        }
    }

    /// Attach a debug name to a native object when the debug-utils extension
    /// is loaded; no-op otherwise
    pub fn set_object_name<H: vk::Handle>(&self, handle: H, name: Option<&str>) {
        let (Some(loader), Some(name)) = (&self.debug_utils_device, name) else {
            return;
        };
        let Ok(name) = std::ffi::CString::new(name) else {
            return;
        };
        let info = vk::DebugUtilsObjectNameInfoEXT::default()
            .object_handle(handle)
            .object_name(&name);
        unsafe {
            loader.set_debug_utils_object_name(&info).ok();
        }
    }
}

impl Drop for GpuContext {
    fn drop(&mut self) {
        // Device and instance destruction is handled by VulkanDevice::shutdown
        // to control drop ordering.
    }
}
