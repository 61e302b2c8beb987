//! Vulkan device
//!
//! Owns instance, logical device, queues and the frame clock. Submission
//! partitions the recorded lists into native `vkQueueSubmit2` batches,
//! signals the per-queue timeline semaphores so declared waits hold across
//! queues, and presents every swap chain the frame rendered into. Frame
//! retirement goes through one fence per frame in flight; the retired frame
//! drains the deferred-destroy queues.

use std::ffi::CStr;
use std::mem::ManuallyDrop;
use std::sync::{Arc, Mutex};

use ash::vk;
use gpu_allocator::vulkan::{Allocator, AllocatorCreateDesc};
use rustc_hash::FxHashMap;

use astral_rhi::{
    partition_submissions, rhi_debug, rhi_err, rhi_info, rhi_warn, timeline_value,
    AccelerationStructureDesc, AccelerationStructureHandle, BackendKind, BufferDesc, BufferHandle,
    BufferResidency, CommandListId, CommandRecorder, ComputePipelineDesc, DestroyQueue, Device,
    DeviceCapabilities, DeviceConfig, DeviceHandle, DeviceLostCallback, GraphicsPipelineDesc,
    PipelineStateHandle, QueryHeapDesc, QueryHeapHandle, QueueKind, RaytracingPipelineDesc,
    RenderPassDesc, RenderPassHandle, RhiError, RhiResult, SamplerDesc, SamplerHandle, ShaderDesc,
    ShaderHandle, SubmitInfo, SwapChainDesc, SwapChainHandle, TextureData, TextureDesc,
    TextureHandle, ValidationMode, WindowSource, MAX_FRAMES_IN_FLIGHT,
};

use crate::vulkan_buffer::VulkanBuffer;
use crate::vulkan_command_list::{Retained, VulkanCommandRecorder};
use crate::vulkan_context::{GpuContext, QueueInfo, RtLimits};
use crate::vulkan_copy::CopyAllocator;
use crate::vulkan_debug::messenger_create_info;
use crate::vulkan_descriptors::BindlessTable;
use crate::vulkan_destroy::DestroyService;
use crate::vulkan_pipeline::VulkanPipeline;
use crate::vulkan_query::VulkanQueryHeap;
use crate::vulkan_raytracing::{VulkanAccelerationStructure, VulkanRaytracingPipeline};
use crate::vulkan_render_pass::VulkanRenderPass;
use crate::vulkan_sampler::VulkanSampler;
use crate::vulkan_shader::VulkanShader;
use crate::vulkan_swapchain::VulkanSwapChain;
use crate::vulkan_texture::VulkanTexture;

const LOG_SOURCE: &str = "rhi::vulkan";

/// One command pool with the buffers allocated from it this frame
struct QueuePool {
    pool: vk::CommandPool,
    buffers: Vec<vk::CommandBuffer>,
}

/// Per-frame-in-flight command pools, one per queue kind
struct FramePools {
    graphics: QueuePool,
    compute: QueuePool,
    copy: QueuePool,
}

impl FramePools {
    fn for_queue(&mut self, queue: QueueKind) -> &mut QueuePool {
        match queue {
            QueueKind::Graphics => &mut self.graphics,
            QueueKind::Compute => &mut self.compute,
            QueueKind::Copy => &mut self.copy,
        }
    }
}

/// Vulkan implementation of [`Device`]
pub struct VulkanDevice {
    /// Kept loaded for surface creation
    entry: ash::Entry,
    ctx: Arc<GpuContext>,
    caps: DeviceCapabilities,
    config: DeviceConfig,
    copy: CopyAllocator,

    frame: u64,
    next_command_list: u32,
    frame_pools: Vec<FramePools>,
    /// Signaled by an empty graphics submit at `end_frame`; waited
    /// `MAX_FRAMES_IN_FLIGHT` frames later
    frame_fences: Vec<vk::Fence>,
    /// Highest timeline value submitted this frame per queue timeline
    frame_signals: Vec<(vk::Semaphore, u64)>,

    pipelines: FxHashMap<u64, PipelineStateHandle>,
    /// Resource handles referenced by in-flight command lists
    in_flight: DestroyQueue<Vec<Retained>>,
    device_lost: Option<DeviceLostCallback>,
}

fn has_extension(available: &[vk::ExtensionProperties], name: &CStr) -> bool {
    available.iter().any(|ext| {
        ext.extension_name_as_c_str()
            .map_or(false, |ext_name| ext_name == name)
    })
}

/// Select queue families: graphics, a dedicated compute family when one
/// exists, and a transfer-only family when one exists. Missing dedicated
/// families alias graphics.
fn select_queue_families(
    families: &[vk::QueueFamilyProperties],
) -> RhiResult<(u32, u32, u32)> {
    let graphics = families
        .iter()
        .position(|f| f.queue_flags.contains(vk::QueueFlags::GRAPHICS))
        .ok_or(RhiError::AdapterNotFound)? as u32;

    let compute = families
        .iter()
        .enumerate()
        .position(|(index, f)| {
            index as u32 != graphics && f.queue_flags.contains(vk::QueueFlags::COMPUTE)
        })
        .map(|index| index as u32)
        .unwrap_or(graphics);

    let copy = families
        .iter()
        .position(|f| {
            f.queue_flags.contains(vk::QueueFlags::TRANSFER)
                && !f
                    .queue_flags
                    .intersects(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE)
        })
        .map(|index| index as u32)
        .unwrap_or(graphics);

    Ok((graphics, compute, copy))
}

impl VulkanDevice {
    pub fn new_handle(config: DeviceConfig) -> RhiResult<DeviceHandle> {
        Ok(Arc::new(Mutex::new(Self::new(config)?)))
    }

    pub fn new(config: DeviceConfig) -> RhiResult<Self> {
        unsafe { Self::create(config) }
    }

    unsafe fn create(config: DeviceConfig) -> RhiResult<Self> {
        let entry = ash::Entry::load()
            .map_err(|e| rhi_err!("Failed to load the Vulkan library: {:?}", e))?;

        // ===== INSTANCE =====

        let app_name = std::ffi::CString::new(config.app_name.as_str())
            .map_err(|_| RhiError::InvalidDescriptor("app name contains a NUL byte".into()))?;
        let (major, minor, patch) = config.app_version;
        let app_info = vk::ApplicationInfo::default()
            .application_name(&app_name)
            .application_version(vk::make_api_version(0, major, minor, patch))
            .engine_name(c"Astral")
            .engine_version(vk::make_api_version(0, 0, 1, 0))
            .api_version(vk::API_VERSION_1_3);

        let available = entry
            .enumerate_instance_extension_properties(None)
            .map_err(|e| rhi_err!("Failed to enumerate instance extensions: {:?}", e))?;

        let mut extension_names = vec![ash::khr::surface::NAME.as_ptr()];
        let platform_surfaces: &[&CStr] = &[
            ash::khr::win32_surface::NAME,
            ash::khr::xlib_surface::NAME,
            ash::khr::xcb_surface::NAME,
            ash::khr::wayland_surface::NAME,
            ash::ext::metal_surface::NAME,
        ];
        for name in platform_surfaces {
            if has_extension(&available, name) {
                extension_names.push(name.as_ptr());
            }
        }
        let debug_utils_available = has_extension(&available, ash::ext::debug_utils::NAME);
        let validation = config.validation.is_enabled() && debug_utils_available;
        if validation {
            extension_names.push(ash::ext::debug_utils::NAME.as_ptr());
        }

        let layer_names = if validation {
            vec![c"VK_LAYER_KHRONOS_validation".as_ptr()]
        } else {
            vec![]
        };

        let mut messenger_info = messenger_create_info(config.validation);
        let gpu_assisted = [
            vk::ValidationFeatureEnableEXT::GPU_ASSISTED,
            vk::ValidationFeatureEnableEXT::GPU_ASSISTED_RESERVE_BINDING_SLOT,
        ];
        let mut validation_features =
            vk::ValidationFeaturesEXT::default().enabled_validation_features(&gpu_assisted);

        let mut create_info = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_layer_names(&layer_names)
            .enabled_extension_names(&extension_names);
        if validation {
            // Chained so the layers also report instance create/destroy issues
            create_info = create_info.push_next(&mut messenger_info);
            if config.validation == ValidationMode::GpuBased {
                create_info = create_info.push_next(&mut validation_features);
            }
        }

        let instance = entry
            .create_instance(&create_info, None)
            .map_err(|e| rhi_err!("Failed to create Vulkan instance: {:?}", e))?;

        let (debug_utils_loader, debug_messenger) = if validation {
            let loader = ash::ext::debug_utils::Instance::new(&entry, &instance);
            let messenger = loader
                .create_debug_utils_messenger(&messenger_create_info(config.validation), None)
                .map_err(|e| rhi_err!("Failed to create debug messenger: {:?}", e))?;
            (Some(loader), Some(messenger))
        } else {
            (None, None)
        };

        // ===== PHYSICAL DEVICE =====

        let physical_devices = instance
            .enumerate_physical_devices()
            .map_err(|e| rhi_err!("Failed to enumerate physical devices: {:?}", e))?;

        let mut candidates: Vec<(vk::PhysicalDevice, vk::PhysicalDeviceProperties)> =
            physical_devices
                .into_iter()
                .map(|pd| (pd, instance.get_physical_device_properties(pd)))
                .filter(|(_, props)| props.api_version >= vk::API_VERSION_1_3)
                .collect();
        // Discrete GPUs first
        candidates.sort_by_key(|(_, props)| {
            if props.device_type == vk::PhysicalDeviceType::DISCRETE_GPU {
                0
            } else {
                1
            }
        });
        let (physical_device, properties) =
            candidates.into_iter().next().ok_or(RhiError::AdapterNotFound)?;

        let adapter_name = properties
            .device_name_as_c_str()
            .ok()
            .and_then(|name| name.to_str().ok())
            .unwrap_or("Unknown adapter")
            .to_string();
        rhi_info!(LOG_SOURCE, "Selected adapter \"{}\"", adapter_name);

        let families = instance.get_physical_device_queue_family_properties(physical_device);
        let (graphics_family, compute_family, copy_family) = select_queue_families(&families)?;

        // ===== LOGICAL DEVICE =====

        let device_extensions = instance
            .enumerate_device_extension_properties(physical_device)
            .map_err(|e| rhi_err!("Failed to enumerate device extensions: {:?}", e))?;

        let raytracing = has_extension(&device_extensions, ash::khr::acceleration_structure::NAME)
            && has_extension(&device_extensions, ash::khr::ray_tracing_pipeline::NAME)
            && has_extension(&device_extensions, ash::khr::deferred_host_operations::NAME);
        let mesh_shaders = has_extension(&device_extensions, ash::ext::mesh_shader::NAME);
        let shading_rate = has_extension(&device_extensions, ash::khr::fragment_shading_rate::NAME);

        let mut extension_names = vec![ash::khr::swapchain::NAME.as_ptr()];
        if raytracing {
            extension_names.push(ash::khr::acceleration_structure::NAME.as_ptr());
            extension_names.push(ash::khr::ray_tracing_pipeline::NAME.as_ptr());
            extension_names.push(ash::khr::deferred_host_operations::NAME.as_ptr());
        }
        if mesh_shaders {
            extension_names.push(ash::ext::mesh_shader::NAME.as_ptr());
        }
        if shading_rate {
            extension_names.push(ash::khr::fragment_shading_rate::NAME.as_ptr());
        }

        let queue_priorities = [1.0];
        let mut queue_families = vec![graphics_family];
        for family in [compute_family, copy_family] {
            if !queue_families.contains(&family) {
                queue_families.push(family);
            }
        }
        let queue_create_infos: Vec<vk::DeviceQueueCreateInfo> = queue_families
            .iter()
            .map(|&family| {
                vk::DeviceQueueCreateInfo::default()
                    .queue_family_index(family)
                    .queue_priorities(&queue_priorities)
            })
            .collect();

        let features = vk::PhysicalDeviceFeatures::default()
            .sampler_anisotropy(true)
            .multi_draw_indirect(true);
        let mut features_12 = vk::PhysicalDeviceVulkan12Features::default()
            .timeline_semaphore(true)
            .buffer_device_address(true)
            .runtime_descriptor_array(true)
            .descriptor_binding_partially_bound(true)
            .descriptor_binding_update_unused_while_pending(true)
            .descriptor_binding_sampled_image_update_after_bind(true)
            .descriptor_binding_storage_image_update_after_bind(true)
            .descriptor_binding_storage_buffer_update_after_bind(true)
            .descriptor_binding_uniform_buffer_update_after_bind(true)
            .shader_sampled_image_array_non_uniform_indexing(true)
            .shader_storage_buffer_array_non_uniform_indexing(true)
            .host_query_reset(true);
        let mut features_13 = vk::PhysicalDeviceVulkan13Features::default()
            .dynamic_rendering(true)
            .synchronization2(true);
        let mut accel_features =
            vk::PhysicalDeviceAccelerationStructureFeaturesKHR::default()
                .acceleration_structure(true);
        let mut raytracing_features =
            vk::PhysicalDeviceRayTracingPipelineFeaturesKHR::default().ray_tracing_pipeline(true);
        let mut mesh_features = vk::PhysicalDeviceMeshShaderFeaturesEXT::default()
            .mesh_shader(true)
            .task_shader(true);
        let mut shading_rate_features =
            vk::PhysicalDeviceFragmentShadingRateFeaturesKHR::default().pipeline_fragment_shading_rate(true);

        let mut device_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&extension_names)
            .enabled_features(&features)
            .push_next(&mut features_12)
            .push_next(&mut features_13);
        if raytracing {
            device_info = device_info
                .push_next(&mut accel_features)
                .push_next(&mut raytracing_features);
        }
        if mesh_shaders {
            device_info = device_info.push_next(&mut mesh_features);
        }
        if shading_rate {
            device_info = device_info.push_next(&mut shading_rate_features);
        }

        let device = instance
            .create_device(physical_device, &device_info, None)
            .map_err(|e| rhi_err!("Failed to create logical device: {:?}", e))?;

        // ===== QUEUES AND TIMELINES =====

        let make_queue = |family: u32| -> RhiResult<QueueInfo> {
            let mut timeline_info = vk::SemaphoreTypeCreateInfo::default()
                .semaphore_type(vk::SemaphoreType::TIMELINE);
            let semaphore_info = vk::SemaphoreCreateInfo::default().push_next(&mut timeline_info);
            let timeline = device
                .create_semaphore(&semaphore_info, None)
                .map_err(|e| rhi_err!("Failed to create queue timeline: {:?}", e))?;
            Ok(QueueInfo {
                queue: device.get_device_queue(family, 0),
                family,
                timeline,
            })
        };
        let graphics = make_queue(graphics_family)?;
        let compute = make_queue(compute_family)?;
        let copy = make_queue(copy_family)?;

        // ===== SHARED CONTEXT =====

        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.clone(),
            device: device.clone(),
            physical_device,
            debug_settings: Default::default(),
            buffer_device_address: true,
            allocation_sizes: Default::default(),
        })
        .map_err(|e| rhi_err!("Failed to create GPU allocator: {:?}", e))?;

        let rt_limits = if raytracing {
            let mut rt_properties =
                vk::PhysicalDeviceRayTracingPipelinePropertiesKHR::default();
            let mut properties2 =
                vk::PhysicalDeviceProperties2::default().push_next(&mut rt_properties);
            instance.get_physical_device_properties2(physical_device, &mut properties2);
            Some(RtLimits {
                handle_size: rt_properties.shader_group_handle_size,
                handle_alignment: rt_properties.shader_group_handle_alignment,
                base_alignment: rt_properties.shader_group_base_alignment,
            })
        } else {
            None
        };

        let bindless = BindlessTable::new(&device, raytracing)?;
        let surface_loader = ash::khr::surface::Instance::new(&entry, &instance);

        let ctx = Arc::new(GpuContext {
            swapchain_loader: ash::khr::swapchain::Device::new(&instance, &device),
            acceleration_loader: raytracing
                .then(|| ash::khr::acceleration_structure::Device::new(&instance, &device)),
            raytracing_loader: raytracing
                .then(|| ash::khr::ray_tracing_pipeline::Device::new(&instance, &device)),
            mesh_loader: mesh_shaders.then(|| ash::ext::mesh_shader::Device::new(&instance, &device)),
            shading_rate_loader: shading_rate
                .then(|| ash::khr::fragment_shading_rate::Device::new(&instance, &device)),
            debug_utils_device: debug_utils_loader
                .is_some()
                .then(|| ash::ext::debug_utils::Device::new(&instance, &device)),
            device,
            instance,
            physical_device,
            allocator: ManuallyDrop::new(Arc::new(Mutex::new(allocator))),
            graphics,
            compute,
            copy,
            queue_families,
            bindless,
            destroy: DestroyService::new(surface_loader),
            rt_limits,
            debug_utils_loader,
            debug_messenger,
        });

        // ===== FRAME STATE =====

        let make_pool = |family: u32| -> RhiResult<QueuePool> {
            let info = vk::CommandPoolCreateInfo::default().queue_family_index(family);
            let pool = ctx
                .device
                .create_command_pool(&info, None)
                .map_err(|e| rhi_err!("Failed to create command pool: {:?}", e))?;
            Ok(QueuePool {
                pool,
                buffers: Vec::new(),
            })
        };
        let mut frame_pools = Vec::with_capacity(MAX_FRAMES_IN_FLIGHT as usize);
        for _ in 0..MAX_FRAMES_IN_FLIGHT {
            frame_pools.push(FramePools {
                graphics: make_pool(graphics_family)?,
                compute: make_pool(compute_family)?,
                copy: make_pool(copy_family)?,
            });
        }

        let mut frame_fences = Vec::with_capacity(MAX_FRAMES_IN_FLIGHT as usize);
        for _ in 0..MAX_FRAMES_IN_FLIGHT {
            frame_fences.push(
                ctx.device
                    .create_fence(&vk::FenceCreateInfo::default(), None)
                    .map_err(|e| rhi_err!("Failed to create frame fence: {:?}", e))?,
            );
        }

        let copy_allocator = CopyAllocator::new(&ctx)?;

        rhi_info!(
            LOG_SOURCE,
            "Device ready (raytracing: {}, mesh shaders: {}, shading rate: {})",
            raytracing,
            mesh_shaders,
            shading_rate
        );

        Ok(Self {
            entry,
            caps: DeviceCapabilities {
                adapter_name,
                backend: BackendKind::Vulkan,
                raytracing,
                mesh_shaders,
                variable_rate_shading: shading_rate,
                tearing: true,
            },
            config,
            copy: copy_allocator,
            frame: 0,
            next_command_list: 0,
            frame_pools,
            frame_fences,
            frame_signals: Vec::new(),
            pipelines: FxHashMap::default(),
            in_flight: DestroyQueue::new(),
            device_lost: None,
            ctx,
        })
    }

    fn cached_pipeline<F>(&mut self, key: u64, build: F) -> RhiResult<PipelineStateHandle>
    where
        F: FnOnce(&mut Self) -> RhiResult<PipelineStateHandle>,
    {
        if let Some(pipeline) = self.pipelines.get(&key) {
            return Ok(pipeline.clone());
        }
        let pipeline = build(self)?;
        self.pipelines.insert(key, pipeline.clone());
        Ok(pipeline)
    }

    fn submit_error(&self, error: vk::Result) -> RhiError {
        if error == vk::Result::ERROR_DEVICE_LOST {
            if let Some(callback) = &self.device_lost {
                callback();
            }
            RhiError::DeviceLost
        } else {
            rhi_err!("Queue submission failed: {:?}", error)
        }
    }
}

impl Device for VulkanDevice {
    fn capabilities(&self) -> &DeviceCapabilities {
        &self.caps
    }

    fn create_buffer(
        &mut self,
        desc: BufferDesc,
        initial_data: Option<&[u8]>,
    ) -> RhiResult<BufferHandle> {
        rhi_debug!(
            LOG_SOURCE,
            "create_buffer {} bytes ({:?})",
            desc.size,
            desc.residency
        );
        let host_visible = desc.residency != BufferResidency::DeviceLocal;
        let buffer = VulkanBuffer::new(self.ctx.clone(), desc)?;
        if let Some(data) = initial_data {
            if host_visible {
                astral_rhi::Buffer::update(&buffer, 0, data)?;
            } else {
                self.copy.stage_buffer(&self.ctx, &buffer, data)?;
            }
        }
        Ok(Arc::new(buffer))
    }

    fn create_texture(
        &mut self,
        desc: TextureDesc,
        initial_data: Option<TextureData>,
    ) -> RhiResult<TextureHandle> {
        rhi_debug!(
            LOG_SOURCE,
            "create_texture {}x{} {:?}",
            desc.width,
            desc.height,
            desc.format
        );
        let texture = VulkanTexture::new(self.ctx.clone(), desc)?;
        if let Some(data) = initial_data {
            self.copy.stage_texture(&self.ctx, &texture, &data)?;
        }
        Ok(texture)
    }

    fn create_sampler(&mut self, desc: SamplerDesc) -> RhiResult<SamplerHandle> {
        Ok(Arc::new(VulkanSampler::new(self.ctx.clone(), desc)?))
    }

    fn create_shader(&mut self, desc: ShaderDesc) -> RhiResult<ShaderHandle> {
        Ok(Arc::new(VulkanShader::new(self.ctx.clone(), desc)?))
    }

    fn create_graphics_pipeline(
        &mut self,
        desc: GraphicsPipelineDesc,
    ) -> RhiResult<PipelineStateHandle> {
        self.cached_pipeline(desc.cache_key(), move |device| {
            Ok(Arc::new(VulkanPipeline::graphics(device.ctx.clone(), desc)?))
        })
    }

    fn create_compute_pipeline(
        &mut self,
        desc: ComputePipelineDesc,
    ) -> RhiResult<PipelineStateHandle> {
        self.cached_pipeline(desc.cache_key(), move |device| {
            Ok(Arc::new(VulkanPipeline::compute(device.ctx.clone(), desc)?))
        })
    }

    fn create_raytracing_pipeline(
        &mut self,
        desc: RaytracingPipelineDesc,
    ) -> RhiResult<PipelineStateHandle> {
        self.cached_pipeline(desc.cache_key(), move |device| {
            Ok(Arc::new(VulkanRaytracingPipeline::new(
                device.ctx.clone(),
                &desc,
            )?))
        })
    }

    fn create_render_pass(&mut self, desc: RenderPassDesc) -> RhiResult<RenderPassHandle> {
        Ok(Arc::new(VulkanRenderPass::new(self.ctx.clone(), desc)?))
    }

    fn create_query_heap(&mut self, desc: QueryHeapDesc) -> RhiResult<QueryHeapHandle> {
        Ok(Arc::new(VulkanQueryHeap::new(self.ctx.clone(), desc)?))
    }

    fn create_swap_chain(
        &mut self,
        window: &dyn WindowSource,
        desc: SwapChainDesc,
    ) -> RhiResult<SwapChainHandle> {
        Ok(VulkanSwapChain::new(self.ctx.clone(), &self.entry, window, desc)?)
    }

    fn create_acceleration_structure(
        &mut self,
        desc: AccelerationStructureDesc,
    ) -> RhiResult<AccelerationStructureHandle> {
        Ok(VulkanAccelerationStructure::new(self.ctx.clone(), desc)?)
    }

    fn begin_frame(&mut self) -> RhiResult<()> {
        self.next_command_list = 0;

        // The retiring frame that used this slot was waited for in end_frame,
        // so its pools can be recycled
        let slot = (self.frame % MAX_FRAMES_IN_FLIGHT) as usize;
        let pools = &mut self.frame_pools[slot];
        for queue_pool in [&mut pools.graphics, &mut pools.compute, &mut pools.copy] {
            unsafe {
                if !queue_pool.buffers.is_empty() {
                    self.ctx
                        .device
                        .free_command_buffers(queue_pool.pool, &queue_pool.buffers);
                    queue_pool.buffers.clear();
                }
                self.ctx
                    .device
                    .reset_command_pool(queue_pool.pool, vk::CommandPoolResetFlags::empty())
                    .map_err(|e| rhi_err!("Failed to reset command pool: {:?}", e))?;
            }
        }
        self.ctx.bindless.reset_draw_sets(&self.ctx.device, slot)?;
        Ok(())
    }

    fn begin_command_buffer(&mut self, queue: QueueKind) -> RhiResult<Box<dyn CommandRecorder>> {
        if self.next_command_list >= self.config.command_buffers_per_frame {
            return Err(RhiError::ValidationError(format!(
                "per-frame command buffer budget of {} exhausted",
                self.config.command_buffers_per_frame
            )));
        }
        let id = CommandListId(self.next_command_list);
        self.next_command_list += 1;

        let slot = (self.frame % MAX_FRAMES_IN_FLIGHT) as usize;
        let queue_pool = self.frame_pools[slot].for_queue(queue);
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(queue_pool.pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let cmd = unsafe {
            self.ctx
                .device
                .allocate_command_buffers(&alloc_info)
                .map_err(|e| rhi_err!("Failed to allocate command buffer: {:?}", e))?[0]
        };
        queue_pool.buffers.push(cmd);

        Ok(Box::new(VulkanCommandRecorder::new(
            self.ctx.clone(),
            id,
            queue,
            cmd,
        )?))
    }

    fn submit_command_lists(&mut self, lists: Vec<Box<dyn CommandRecorder>>) -> RhiResult<()> {
        let mut recorders: Vec<VulkanCommandRecorder> = Vec::with_capacity(lists.len());
        for list in lists {
            let recorder = list
                .into_any()
                .downcast::<VulkanCommandRecorder>()
                .map_err(|_| RhiError::ValidationError("foreign command recorder".into()))?;
            recorders.push(*recorder);
        }

        // Waits must reference a list submitted earlier in the same call
        for (position, recorder) in recorders.iter().enumerate() {
            for wait in &recorder.waits {
                let earlier = recorders[..position].iter().any(|r| r.id() == *wait);
                if !earlier {
                    return Err(RhiError::ValidationError(format!(
                        "list {} waits for {}, which is not submitted before it",
                        recorder.id().0,
                        wait.0
                    )));
                }
            }
        }

        let mut command_buffers = Vec::with_capacity(recorders.len());
        for recorder in &mut recorders {
            command_buffers.push(recorder.finish()?);
        }

        let infos: Vec<SubmitInfo> = recorders
            .iter()
            .map(|r| SubmitInfo {
                id: r.id(),
                queue: r.queue(),
                waits: r.waits.clone(),
            })
            .collect();
        let batches = partition_submissions(&infos);

        // Queue timeline for each list id, for resolving declared waits
        let mut id_timelines: FxHashMap<u32, vk::Semaphore> = FxHashMap::default();
        for info in &infos {
            id_timelines.insert(info.id.0, self.ctx.queue(info.queue).timeline);
        }

        // The last batch using each swap chain signals its present semaphore
        let mut last_present: FxHashMap<u64, usize> = FxHashMap::default();
        for (batch_index, batch) in batches.iter().enumerate() {
            for recorder in &recorders[batch.range.clone()] {
                for chain in &recorder.swap_chains_used {
                    if let Some(vulkan) = chain.as_any().downcast_ref::<VulkanSwapChain>() {
                        if let Some((_, present)) = vulkan.sync_semaphores() {
                            last_present.insert(vk::Handle::as_raw(present), batch_index);
                        }
                    }
                }
            }
        }

        let cbpf = self.config.command_buffers_per_frame;
        let mut staging_wait = None;
        let mut acquires_waited: Vec<u64> = Vec::new();

        for (batch_index, batch) in batches.iter().enumerate() {
            let queue = self.ctx.queue(batch.queue);
            let mut waits: Vec<vk::SemaphoreSubmitInfo> = Vec::new();
            let mut signals: Vec<vk::SemaphoreSubmitInfo> = Vec::new();

            // Declared cross-list waits against the earlier list's queue timeline
            for wait in &batch.waits {
                let timeline = id_timelines.get(&wait.0).copied().ok_or_else(|| {
                    RhiError::ValidationError(format!("wait references unknown list {}", wait.0))
                })?;
                waits.push(
                    vk::SemaphoreSubmitInfo::default()
                        .semaphore(timeline)
                        // Values start at 1; 0 is the semaphore's initial state
                        .value(timeline_value(self.frame, cbpf, wait.0 + 1))
                        .stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS),
                );
            }

            // The first non-copy batch waits for any pending staging uploads
            if batch.queue != QueueKind::Copy && staging_wait.is_none() {
                staging_wait = self.copy.take_pending_wait();
                if let Some((semaphore, value)) = staging_wait {
                    waits.push(
                        vk::SemaphoreSubmitInfo::default()
                            .semaphore(semaphore)
                            .value(value)
                            .stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS),
                    );
                }
            }

            for recorder in &recorders[batch.range.clone()] {
                for chain in &recorder.swap_chains_used {
                    let Some(vulkan) = chain.as_any().downcast_ref::<VulkanSwapChain>() else {
                        continue;
                    };
                    let Some((acquire, present)) = vulkan.sync_semaphores() else {
                        continue;
                    };
                    let acquire_raw = vk::Handle::as_raw(acquire);
                    if !acquires_waited.contains(&acquire_raw) {
                        acquires_waited.push(acquire_raw);
                        waits.push(
                            vk::SemaphoreSubmitInfo::default()
                                .semaphore(acquire)
                                .stage_mask(vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT),
                        );
                    }
                    if last_present.get(&vk::Handle::as_raw(present)) == Some(&batch_index) {
                        last_present.remove(&vk::Handle::as_raw(present));
                        signals.push(
                            vk::SemaphoreSubmitInfo::default()
                                .semaphore(present)
                                .stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS),
                        );
                    }
                }
            }

            // Signal the queue timeline up to the last list in the batch
            let last_id = infos[batch.range.end - 1].id.0;
            let signal_value = timeline_value(self.frame, cbpf, last_id + 1);
            signals.push(
                vk::SemaphoreSubmitInfo::default()
                    .semaphore(queue.timeline)
                    .value(signal_value)
                    .stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS),
            );

            let cmd_infos: Vec<vk::CommandBufferSubmitInfo> = command_buffers[batch.range.clone()]
                .iter()
                .map(|&cmd| vk::CommandBufferSubmitInfo::default().command_buffer(cmd))
                .collect();
            let submit = vk::SubmitInfo2::default()
                .wait_semaphore_infos(&waits)
                .command_buffer_infos(&cmd_infos)
                .signal_semaphore_infos(&signals);

            unsafe {
                self.ctx
                    .device
                    .queue_submit2(queue.queue, &[submit], vk::Fence::null())
                    .map_err(|e| self.submit_error(e))?;
            }

            match self
                .frame_signals
                .iter_mut()
                .find(|(semaphore, _)| *semaphore == queue.timeline)
            {
                Some(entry) => entry.1 = entry.1.max(signal_value),
                None => self.frame_signals.push((queue.timeline, signal_value)),
            }
        }

        // Retain resource handles until the frame retires, then present
        let mut retained = Vec::new();
        let mut presents: Vec<SwapChainHandle> = Vec::new();
        for mut recorder in recorders {
            retained.append(&mut recorder.retained);
            for chain in recorder.swap_chains_used.drain(..) {
                let duplicate = presents.iter().any(|p| Arc::ptr_eq(p, &chain));
                if !duplicate {
                    presents.push(chain);
                }
            }
        }
        if !retained.is_empty() {
            self.in_flight.push(retained, self.frame);
        }

        for chain in presents {
            if let Some(vulkan) = chain.as_any().downcast_ref::<VulkanSwapChain>() {
                match vulkan.present(self.ctx.graphics.queue) {
                    Ok(()) => {}
                    Err(RhiError::DeviceLost) => {
                        if let Some(callback) = &self.device_lost {
                            callback();
                        }
                        return Err(RhiError::DeviceLost);
                    }
                    Err(err) => return Err(err),
                }
            }
        }
        Ok(())
    }

    fn end_frame(&mut self) -> RhiResult<()> {
        // Empty submit that waits for every queue's work this frame, so the
        // fence signal means the whole frame is done
        let slot = (self.frame % MAX_FRAMES_IN_FLIGHT) as usize;
        let waits: Vec<vk::SemaphoreSubmitInfo> = self
            .frame_signals
            .drain(..)
            .map(|(semaphore, value)| {
                vk::SemaphoreSubmitInfo::default()
                    .semaphore(semaphore)
                    .value(value)
                    .stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS)
            })
            .collect();
        let submit = vk::SubmitInfo2::default().wait_semaphore_infos(&waits);
        unsafe {
            self.ctx
                .device
                .queue_submit2(
                    self.ctx.graphics.queue,
                    &[submit],
                    self.frame_fences[slot],
                )
                .map_err(|e| self.submit_error(e))?;
        }

        self.frame += 1;
        self.ctx.destroy.set_frame(self.frame);

        if self.frame >= MAX_FRAMES_IN_FLIGHT {
            let retire_slot = (self.frame % MAX_FRAMES_IN_FLIGHT) as usize;
            let fences = [self.frame_fences[retire_slot]];
            unsafe {
                self.ctx
                    .device
                    .wait_for_fences(&fences, true, u64::MAX)
                    .map_err(|e| rhi_err!("Failed to wait for frame fence: {:?}", e))?;
                self.ctx
                    .device
                    .reset_fences(&fences)
                    .map_err(|e| rhi_err!("Failed to reset frame fence: {:?}", e))?;
            }
        }

        self.in_flight.update(self.frame, MAX_FRAMES_IN_FLIGHT, drop);
        self.ctx.destroy.update(&self.ctx, self.frame);
        self.ctx.bindless.update(self.frame);
        Ok(())
    }

    fn wait_for_gpu(&mut self) -> RhiResult<()> {
        unsafe {
            self.ctx
                .device
                .device_wait_idle()
                .map_err(|e| rhi_err!("Failed to wait for device idle: {:?}", e))
        }
    }

    fn clear_pipeline_cache(&mut self) {
        // Drops go through the deferred-destroy queue
        self.pipelines.clear();
    }

    fn current_frame(&self) -> u64 {
        self.frame
    }

    fn frame_index(&self) -> u64 {
        self.frame % MAX_FRAMES_IN_FLIGHT
    }

    fn set_device_lost_callback(&mut self, callback: DeviceLostCallback) {
        self.device_lost = Some(callback);
    }

    fn shutdown(&mut self) {
        rhi_info!(LOG_SOURCE, "Shutting down Vulkan device");
        if self.wait_for_gpu().is_err() {
            rhi_warn!(LOG_SOURCE, "Device idle wait failed during shutdown");
        }

        self.pipelines.clear();
        self.in_flight.drain(drop);
        // Pooled staging buffers drop into the destroy queue, so the copy
        // allocator goes first
        self.copy.destroy(&self.ctx);
        self.ctx.bindless.drain();
        self.ctx.destroy.drain(&self.ctx);

        unsafe {
            for pools in &mut self.frame_pools {
                for queue_pool in [&pools.graphics, &pools.compute, &pools.copy] {
                    self.ctx.device.destroy_command_pool(queue_pool.pool, None);
                }
            }
            self.frame_pools.clear();
            for fence in self.frame_fences.drain(..) {
                self.ctx.device.destroy_fence(fence, None);
            }
        }

        self.ctx.bindless.destroy(&self.ctx.device);

        match Arc::get_mut(&mut self.ctx) {
            Some(ctx) => unsafe {
                for queue in [&ctx.graphics, &ctx.compute, &ctx.copy] {
                    ctx.device.destroy_semaphore(queue.timeline, None);
                }
                ManuallyDrop::drop(&mut ctx.allocator);
                ctx.device.destroy_device(None);
                if let (Some(loader), Some(messenger)) =
                    (&ctx.debug_utils_loader, ctx.debug_messenger)
                {
                    loader.destroy_debug_utils_messenger(messenger, None);
                }
                ctx.instance.destroy_instance(None);
            },
            None => {
                rhi_warn!(
                    LOG_SOURCE,
                    "Resources still alive at shutdown; leaking device and instance"
                );
            }
        }
    }
}
