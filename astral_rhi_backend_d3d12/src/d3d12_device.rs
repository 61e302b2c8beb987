//! D3D12 device
//!
//! Owns the DXGI factory, the D3D12 device, the three hardware queues and
//! the frame clock. Submission partitions the recorded lists into native
//! `ExecuteCommandLists` calls; each queue's fence is used as a timeline, so
//! declared cross-list waits become `Wait` calls on the producing queue's
//! fence. Frame retirement goes through a dedicated frame fence signaled by
//! the graphics queue after it has waited for every other queue's work.

use std::sync::{Arc, Mutex};

use windows::core::Interface;
use windows::Win32::Foundation::BOOL;
use windows::Win32::Graphics::Direct3D::{
    D3D_FEATURE_LEVEL, D3D_FEATURE_LEVEL_12_0, D3D_FEATURE_LEVEL_12_1, D3D_FEATURE_LEVEL_12_2,
};
use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::Graphics::Dxgi::*;

use rustc_hash::FxHashMap;

use astral_rhi::{
    partition_submissions, rhi_debug, rhi_err, rhi_info, rhi_warn, timeline_value,
    AccelerationStructureDesc, AccelerationStructureHandle, BackendKind, BufferDesc, BufferHandle,
    BufferResidency, CommandListId, CommandRecorder, ComputePipelineDesc, DestroyQueue, Device,
    DeviceCapabilities, DeviceConfig, DeviceHandle, DeviceLostCallback, GraphicsPipelineDesc,
    PipelineStateHandle, QueryHeapDesc, QueryHeapHandle, QueueKind, RaytracingPipelineDesc,
    RenderPassDesc, RenderPassHandle, RhiError, RhiResult, SamplerDesc, SamplerHandle, ShaderDesc,
    ShaderHandle, SubmitInfo, SwapChainDesc, SwapChainHandle, TextureData, TextureDesc,
    TextureHandle, WindowSource, MAX_FRAMES_IN_FLIGHT,
};

use crate::d3d12_buffer::D3d12Buffer;
use crate::d3d12_command_list::{D3d12CommandRecorder, Retained};
use crate::d3d12_context::{build_command_signature, GpuContext, QueueInfo};
use crate::d3d12_copy::CopyAllocator;
use crate::d3d12_debug::{enable_debug_layer, register_info_queue, unregister_info_queue};
use crate::d3d12_descriptors::BindlessHeaps;
use crate::d3d12_destroy::DestroyService;
use crate::d3d12_pipeline::D3d12Pipeline;
use crate::d3d12_query::D3d12QueryHeap;
use crate::d3d12_raytracing::{D3d12AccelerationStructure, D3d12RaytracingPipeline};
use crate::d3d12_render_pass::D3d12RenderPass;
use crate::d3d12_sampler::D3d12Sampler;
use crate::d3d12_shader::D3d12Shader;
use crate::d3d12_swapchain::D3d12SwapChain;
use crate::d3d12_texture::D3d12Texture;

const LOG_SOURCE: &str = "rhi::d3d12";

/// Allocator/list pairs recycled per frame slot.
///
/// A pair reused at index `used` was last submitted two frames ago; the
/// frame fence wait in `end_frame` guarantees that work has completed, so
/// the allocator can be reset at acquisition.
struct QueuePool {
    kind: D3D12_COMMAND_LIST_TYPE,
    allocators: Vec<ID3D12CommandAllocator>,
    lists: Vec<ID3D12GraphicsCommandList7>,
    used: usize,
}

impl QueuePool {
    fn new(kind: D3D12_COMMAND_LIST_TYPE) -> Self {
        Self {
            kind,
            allocators: Vec::new(),
            lists: Vec::new(),
            used: 0,
        }
    }

    /// An open command list ready for recording
    fn acquire(&mut self, device: &ID3D12Device10) -> RhiResult<ID3D12GraphicsCommandList7> {
        let list = if self.used < self.lists.len() {
            let allocator = &self.allocators[self.used];
            let list = self.lists[self.used].clone();
            unsafe {
                allocator
                    .Reset()
                    .map_err(|e| rhi_err!("Failed to reset command allocator: {:?}", e))?;
                list.Reset(allocator, None)
                    .map_err(|e| rhi_err!("Failed to reset command list: {:?}", e))?;
            }
            list
        } else {
            let allocator: ID3D12CommandAllocator = unsafe {
                device
                    .CreateCommandAllocator(self.kind)
                    .map_err(|e| rhi_err!("Failed to create command allocator: {:?}", e))?
            };
            // Lists come out of CreateCommandList open for recording
            let list: ID3D12GraphicsCommandList7 = unsafe {
                device
                    .CreateCommandList(0, self.kind, &allocator, None)
                    .map_err(|e| rhi_err!("Failed to create command list: {:?}", e))?
            };
            self.allocators.push(allocator);
            self.lists.push(list.clone());
            list
        };
        self.used += 1;
        Ok(list)
    }
}

/// Per-frame-in-flight pools, one per queue kind
struct FramePools {
    graphics: QueuePool,
    compute: QueuePool,
    copy: QueuePool,
}

impl FramePools {
    fn new() -> Self {
        Self {
            graphics: QueuePool::new(D3D12_COMMAND_LIST_TYPE_DIRECT),
            compute: QueuePool::new(D3D12_COMMAND_LIST_TYPE_COMPUTE),
            copy: QueuePool::new(D3D12_COMMAND_LIST_TYPE_COPY),
        }
    }

    fn for_queue(&mut self, queue: QueueKind) -> &mut QueuePool {
        match queue {
            QueueKind::Graphics => &mut self.graphics,
            QueueKind::Compute => &mut self.compute,
            QueueKind::Copy => &mut self.copy,
        }
    }
}

/// D3D12 implementation of [`Device`]
pub struct D3d12Device {
    ctx: Arc<GpuContext>,
    caps: DeviceCapabilities,
    config: DeviceConfig,
    copy: CopyAllocator,

    frame: u64,
    next_command_list: u32,
    frame_pools: Vec<FramePools>,
    /// Timeline signaled by the graphics queue at `end_frame`; value is
    /// `frame + 1`, waited `MAX_FRAMES_IN_FLIGHT` frames later on the CPU
    frame_fence: ID3D12Fence,
    /// Highest timeline value submitted this frame per queue fence
    frame_signals: Vec<(ID3D12Fence, u64)>,
    /// Fence bumped by `wait_for_gpu` to drain all three queues
    idle_fence: ID3D12Fence,
    idle_value: u64,

    pipelines: FxHashMap<u64, PipelineStateHandle>,
    /// Resource handles referenced by in-flight command lists
    in_flight: DestroyQueue<Vec<Retained>>,
    device_lost: Option<DeviceLostCallback>,
}

fn adapter_name(desc: &DXGI_ADAPTER_DESC3) -> String {
    let len = desc
        .Description
        .iter()
        .position(|&c| c == 0)
        .unwrap_or(desc.Description.len());
    String::from_utf16_lossy(&desc.Description[..len])
}

/// First hardware adapter in high-performance order that creates a device
unsafe fn select_adapter(
    factory: &IDXGIFactory6,
) -> RhiResult<(IDXGIAdapter4, ID3D12Device10, String)> {
    const FEATURE_LEVELS: [D3D_FEATURE_LEVEL; 3] = [
        D3D_FEATURE_LEVEL_12_2,
        D3D_FEATURE_LEVEL_12_1,
        D3D_FEATURE_LEVEL_12_0,
    ];

    let mut index = 0;
    loop {
        let adapter: IDXGIAdapter4 = match factory
            .EnumAdapterByGpuPreference(index, DXGI_GPU_PREFERENCE_HIGH_PERFORMANCE)
        {
            Ok(adapter) => adapter,
            Err(_) => break,
        };
        index += 1;

        let desc = adapter
            .GetDesc3()
            .map_err(|e| rhi_err!("Failed to query adapter description: {:?}", e))?;
        if (desc.Flags.0 & DXGI_ADAPTER_FLAG3_SOFTWARE.0) != 0 {
            continue;
        }

        for level in FEATURE_LEVELS {
            let mut device: Option<ID3D12Device10> = None;
            if D3D12CreateDevice(&adapter, level, &mut device).is_ok() {
                if let Some(device) = device {
                    return Ok((adapter, device, adapter_name(&desc)));
                }
            }
        }
    }
    Err(RhiError::AdapterNotFound)
}

impl D3d12Device {
    pub fn new_handle(config: DeviceConfig) -> RhiResult<DeviceHandle> {
        Ok(Arc::new(Mutex::new(Self::new(config)?)))
    }

    pub fn new(config: DeviceConfig) -> RhiResult<Self> {
        unsafe { Self::create(config) }
    }

    unsafe fn create(config: DeviceConfig) -> RhiResult<Self> {
        enable_debug_layer(config.validation);

        let factory_flags = if config.validation.is_enabled() {
            DXGI_CREATE_FACTORY_DEBUG
        } else {
            DXGI_CREATE_FACTORY_FLAGS(0)
        };
        let factory: IDXGIFactory6 = CreateDXGIFactory2(factory_flags)
            .map_err(|e| rhi_err!("Failed to create DXGI factory: {:?}", e))?;

        let (_adapter, device, adapter_name) = select_adapter(&factory)?;
        rhi_info!(LOG_SOURCE, "Selected adapter \"{}\"", adapter_name);

        let info_queue_cookie = register_info_queue(&device, config.validation);

        // ===== FEATURES =====

        let mut options12 = D3D12_FEATURE_DATA_D3D12_OPTIONS12::default();
        device
            .CheckFeatureSupport(
                D3D12_FEATURE_D3D12_OPTIONS12,
                &mut options12 as *mut _ as *mut std::ffi::c_void,
                std::mem::size_of::<D3D12_FEATURE_DATA_D3D12_OPTIONS12>() as u32,
            )
            .ok();
        if !options12.EnhancedBarriersSupported.as_bool() {
            // Every resource and transition in this backend uses enhanced
            // barriers; older drivers fall back to the Vulkan backend
            return Err(rhi_err!("Adapter does not support enhanced barriers"));
        }

        let mut options5 = D3D12_FEATURE_DATA_D3D12_OPTIONS5::default();
        device
            .CheckFeatureSupport(
                D3D12_FEATURE_D3D12_OPTIONS5,
                &mut options5 as *mut _ as *mut std::ffi::c_void,
                std::mem::size_of::<D3D12_FEATURE_DATA_D3D12_OPTIONS5>() as u32,
            )
            .ok();
        let raytracing = options5.RaytracingTier.0 >= D3D12_RAYTRACING_TIER_1_1.0;

        let mut options7 = D3D12_FEATURE_DATA_D3D12_OPTIONS7::default();
        device
            .CheckFeatureSupport(
                D3D12_FEATURE_D3D12_OPTIONS7,
                &mut options7 as *mut _ as *mut std::ffi::c_void,
                std::mem::size_of::<D3D12_FEATURE_DATA_D3D12_OPTIONS7>() as u32,
            )
            .ok();
        let mesh_shading = options7.MeshShaderTier.0 >= D3D12_MESH_SHADER_TIER_1.0;

        let mut options6 = D3D12_FEATURE_DATA_D3D12_OPTIONS6::default();
        device
            .CheckFeatureSupport(
                D3D12_FEATURE_D3D12_OPTIONS6,
                &mut options6 as *mut _ as *mut std::ffi::c_void,
                std::mem::size_of::<D3D12_FEATURE_DATA_D3D12_OPTIONS6>() as u32,
            )
            .ok();
        let shading_rate =
            options6.VariableShadingRateTier.0 >= D3D12_VARIABLE_SHADING_RATE_TIER_1.0;

        let mut allow_tearing = BOOL::default();
        let allow_tearing = factory
            .CheckFeatureSupport(
                DXGI_FEATURE_PRESENT_ALLOW_TEARING,
                &mut allow_tearing as *mut _ as *mut std::ffi::c_void,
                std::mem::size_of::<BOOL>() as u32,
            )
            .is_ok()
            && allow_tearing.as_bool();

        // ===== QUEUES AND TIMELINES =====

        let make_queue = |kind: D3D12_COMMAND_LIST_TYPE| -> RhiResult<QueueInfo> {
            let desc = D3D12_COMMAND_QUEUE_DESC {
                Type: kind,
                Priority: D3D12_COMMAND_QUEUE_PRIORITY_NORMAL.0,
                Flags: D3D12_COMMAND_QUEUE_FLAG_NONE,
                NodeMask: 0,
            };
            let queue: ID3D12CommandQueue = device
                .CreateCommandQueue(&desc)
                .map_err(|e| rhi_err!("Failed to create command queue: {:?}", e))?;
            let fence: ID3D12Fence = device
                .CreateFence(0, D3D12_FENCE_FLAG_NONE)
                .map_err(|e| rhi_err!("Failed to create queue fence: {:?}", e))?;
            Ok(QueueInfo { queue, fence })
        };
        let graphics = make_queue(D3D12_COMMAND_LIST_TYPE_DIRECT)?;
        let compute = make_queue(D3D12_COMMAND_LIST_TYPE_COMPUTE)?;
        let copy = make_queue(D3D12_COMMAND_LIST_TYPE_COPY)?;

        // ===== SHARED CONTEXT =====

        let bindless = BindlessHeaps::new(&device, raytracing)?;
        let draw_signature =
            build_command_signature(&device, D3D12_INDIRECT_ARGUMENT_TYPE_DRAW, 16)
                .map_err(|e| rhi_err!("Failed to create draw command signature: {:?}", e))?;
        let dispatch_signature =
            build_command_signature(&device, D3D12_INDIRECT_ARGUMENT_TYPE_DISPATCH, 12)
                .map_err(|e| rhi_err!("Failed to create dispatch command signature: {:?}", e))?;

        let frame_fence: ID3D12Fence = device
            .CreateFence(0, D3D12_FENCE_FLAG_NONE)
            .map_err(|e| rhi_err!("Failed to create frame fence: {:?}", e))?;
        let idle_fence: ID3D12Fence = device
            .CreateFence(0, D3D12_FENCE_FLAG_NONE)
            .map_err(|e| rhi_err!("Failed to create idle fence: {:?}", e))?;

        let ctx = Arc::new(GpuContext {
            device,
            factory,
            graphics,
            compute,
            copy,
            bindless,
            destroy: DestroyService::new(),
            raytracing,
            mesh_shading,
            shading_rate,
            allow_tearing,
            draw_signature,
            dispatch_signature,
            info_queue_cookie,
        });

        let mut frame_pools = Vec::with_capacity(MAX_FRAMES_IN_FLIGHT as usize);
        for _ in 0..MAX_FRAMES_IN_FLIGHT {
            frame_pools.push(FramePools::new());
        }

        let copy_allocator = CopyAllocator::new(&ctx)?;

        rhi_info!(
            LOG_SOURCE,
            "Device ready (raytracing: {}, mesh shaders: {}, shading rate: {})",
            raytracing,
            mesh_shading,
            shading_rate
        );

        Ok(Self {
            caps: DeviceCapabilities {
                adapter_name,
                backend: BackendKind::D3d12,
                raytracing,
                mesh_shaders: mesh_shading,
                variable_rate_shading: shading_rate,
                tearing: allow_tearing,
            },
            config,
            copy: copy_allocator,
            frame: 0,
            next_command_list: 0,
            frame_pools,
            frame_fence,
            frame_signals: Vec::new(),
            idle_fence,
            idle_value: 0,
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

    /// Map a queue error, promoting it to `DeviceLost` when the native
    /// device reports removal
    fn submit_error(&self, error: windows::core::Error) -> RhiError {
        if unsafe { self.ctx.device.GetDeviceRemovedReason() }.is_err() {
            if let Some(callback) = &self.device_lost {
                callback();
            }
            RhiError::DeviceLost
        } else {
            rhi_err!("Queue submission failed: {:?}", error)
        }
    }
}

impl Device for D3d12Device {
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
        let buffer = D3d12Buffer::new(self.ctx.clone(), desc)?;
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
        let texture = D3d12Texture::new(self.ctx.clone(), desc)?;
        if let Some(data) = initial_data {
            self.copy.stage_texture(&self.ctx, &texture, &data)?;
        }
        Ok(texture)
    }

    fn create_sampler(&mut self, desc: SamplerDesc) -> RhiResult<SamplerHandle> {
        Ok(Arc::new(D3d12Sampler::new(self.ctx.clone(), desc)?))
    }

    fn create_shader(&mut self, desc: ShaderDesc) -> RhiResult<ShaderHandle> {
        Ok(Arc::new(D3d12Shader::new(desc)?))
    }

    fn create_graphics_pipeline(
        &mut self,
        desc: GraphicsPipelineDesc,
    ) -> RhiResult<PipelineStateHandle> {
        self.cached_pipeline(desc.cache_key(), move |device| {
            Ok(Arc::new(D3d12Pipeline::graphics(device.ctx.clone(), desc)?))
        })
    }

    fn create_compute_pipeline(
        &mut self,
        desc: ComputePipelineDesc,
    ) -> RhiResult<PipelineStateHandle> {
        self.cached_pipeline(desc.cache_key(), move |device| {
            Ok(Arc::new(D3d12Pipeline::compute(device.ctx.clone(), desc)?))
        })
    }

    fn create_raytracing_pipeline(
        &mut self,
        desc: RaytracingPipelineDesc,
    ) -> RhiResult<PipelineStateHandle> {
        self.cached_pipeline(desc.cache_key(), move |device| {
            Ok(Arc::new(D3d12RaytracingPipeline::new(
                device.ctx.clone(),
                &desc,
            )?))
        })
    }

    fn create_render_pass(&mut self, desc: RenderPassDesc) -> RhiResult<RenderPassHandle> {
        Ok(Arc::new(D3d12RenderPass::new(self.ctx.clone(), desc)?))
    }

    fn create_query_heap(&mut self, desc: QueryHeapDesc) -> RhiResult<QueryHeapHandle> {
        Ok(Arc::new(D3d12QueryHeap::new(self.ctx.clone(), desc)?))
    }

    fn create_swap_chain(
        &mut self,
        window: &dyn WindowSource,
        desc: SwapChainDesc,
    ) -> RhiResult<SwapChainHandle> {
        Ok(D3d12SwapChain::new(self.ctx.clone(), window, desc)?)
    }

    fn create_acceleration_structure(
        &mut self,
        desc: AccelerationStructureDesc,
    ) -> RhiResult<AccelerationStructureHandle> {
        Ok(D3d12AccelerationStructure::new(self.ctx.clone(), desc)?)
    }

    fn begin_frame(&mut self) -> RhiResult<()> {
        self.next_command_list = 0;

        // The retiring frame that used this slot was waited for in end_frame,
        // so its allocator/list pairs can be recycled
        let slot = (self.frame % MAX_FRAMES_IN_FLIGHT) as usize;
        let pools = &mut self.frame_pools[slot];
        for queue_pool in [&mut pools.graphics, &mut pools.compute, &mut pools.copy] {
            queue_pool.used = 0;
        }
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
        let list = self.frame_pools[slot]
            .for_queue(queue)
            .acquire(&self.ctx.device)?;

        Ok(Box::new(D3d12CommandRecorder::new(
            self.ctx.clone(),
            id,
            queue,
            list,
        )))
    }

    fn submit_command_lists(&mut self, lists: Vec<Box<dyn CommandRecorder>>) -> RhiResult<()> {
        let mut recorders: Vec<D3d12CommandRecorder> = Vec::with_capacity(lists.len());
        for list in lists {
            let recorder = list
                .into_any()
                .downcast::<D3d12CommandRecorder>()
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

        let mut command_lists = Vec::with_capacity(recorders.len());
        for recorder in &mut recorders {
            command_lists.push(recorder.finish()?);
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

        // Producing queue's fence for each list id, for resolving waits
        let mut id_fences: FxHashMap<u32, ID3D12Fence> = FxHashMap::default();
        for info in &infos {
            id_fences.insert(info.id.0, self.ctx.queue(info.queue).fence.clone());
        }

        let cbpf = self.config.command_buffers_per_frame;
        let mut staging_wait = None;

        for batch in &batches {
            let queue = self.ctx.queue(batch.queue).clone();

            // Declared cross-list waits against the earlier list's queue fence
            for wait in &batch.waits {
                let fence = id_fences.get(&wait.0).cloned().ok_or_else(|| {
                    RhiError::ValidationError(format!("wait references unknown list {}", wait.0))
                })?;
                unsafe {
                    queue
                        .queue
                        // Values start at 1; 0 is the fence's initial state
                        .Wait(&fence, timeline_value(self.frame, cbpf, wait.0 + 1))
                        .map_err(|e| self.submit_error(e))?;
                }
            }

            // The first non-copy batch waits for any pending staging uploads
            if batch.queue != QueueKind::Copy && staging_wait.is_none() {
                staging_wait = self.copy.take_pending_wait();
                if let Some((fence, value)) = &staging_wait {
                    unsafe {
                        queue
                            .queue
                            .Wait(fence, *value)
                            .map_err(|e| self.submit_error(e))?;
                    }
                }
            }

            let native: Vec<Option<ID3D12CommandList>> = command_lists[batch.range.clone()]
                .iter()
                .map(|list| list.cast::<ID3D12CommandList>().ok())
                .collect();
            unsafe { queue.queue.ExecuteCommandLists(&native) };

            // Signal the queue timeline up to the last list in the batch
            let last_id = infos[batch.range.end - 1].id.0;
            let signal_value = timeline_value(self.frame, cbpf, last_id + 1);
            unsafe {
                queue
                    .queue
                    .Signal(&queue.fence, signal_value)
                    .map_err(|e| self.submit_error(e))?;
            }

            match self
                .frame_signals
                .iter_mut()
                .find(|(fence, _)| *fence == queue.fence)
            {
                Some(entry) => entry.1 = entry.1.max(signal_value),
                None => self.frame_signals.push((queue.fence.clone(), signal_value)),
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
            if let Some(d3d12) = chain.as_any().downcast_ref::<D3d12SwapChain>() {
                match d3d12.present() {
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
        // The graphics queue waits for every queue's work this frame, so its
        // frame-fence signal means the whole frame is done
        for (fence, value) in self.frame_signals.drain(..) {
            unsafe {
                self.ctx
                    .graphics
                    .queue
                    .Wait(&fence, value)
                    .map_err(|e| rhi_err!("Failed to order frame fence: {:?}", e))?;
            }
        }
        unsafe {
            self.ctx
                .graphics
                .queue
                .Signal(&self.frame_fence, self.frame + 1)
                .map_err(|e| rhi_err!("Failed to signal frame fence: {:?}", e))?;
        }

        self.frame += 1;
        self.ctx.destroy.set_frame(self.frame);

        if self.frame >= MAX_FRAMES_IN_FLIGHT {
            let retired = self.frame - MAX_FRAMES_IN_FLIGHT + 1;
            unsafe {
                // Blocks when no event is supplied
                self.frame_fence
                    .SetEventOnCompletion(retired, None)
                    .map_err(|e| rhi_err!("Failed to wait for frame fence: {:?}", e))?;
            }
        }

        self.in_flight.update(self.frame, MAX_FRAMES_IN_FLIGHT, drop);
        self.ctx.destroy.update(&self.ctx.bindless, self.frame);
        self.ctx.bindless.update(self.frame);
        Ok(())
    }

    fn wait_for_gpu(&mut self) -> RhiResult<()> {
        for queue in [&self.ctx.graphics, &self.ctx.compute, &self.ctx.copy] {
            self.idle_value += 1;
            unsafe {
                queue
                    .queue
                    .Signal(&self.idle_fence, self.idle_value)
                    .map_err(|e| rhi_err!("Failed to signal idle fence: {:?}", e))?;
                self.idle_fence
                    .SetEventOnCompletion(self.idle_value, None)
                    .map_err(|e| rhi_err!("Failed to wait for idle fence: {:?}", e))?;
            }
        }
        Ok(())
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
        rhi_info!(LOG_SOURCE, "Shutting down D3D12 device");
        if self.wait_for_gpu().is_err() {
            rhi_warn!(LOG_SOURCE, "Device idle wait failed during shutdown");
        }

        self.pipelines.clear();
        self.in_flight.drain(drop);
        // Pooled staging buffers drop into the destroy queue, so the copy
        // allocator goes first
        self.copy.destroy();
        self.ctx.bindless.drain();
        self.ctx.destroy.drain(&self.ctx.bindless);
        self.frame_pools.clear();

        if let Some(cookie) = self.ctx.info_queue_cookie {
            unregister_info_queue(&self.ctx.device, cookie);
        }
        // COM references release as the context and resources drop
    }
}
