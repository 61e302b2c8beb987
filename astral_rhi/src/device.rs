//! Device trait, backend registry and initialization
//!
//! `Device` is the capability interface every backend implements (the trait
//! replaces backend inheritance). Backends register a factory under their
//! `BackendKind`; `initialize` probes them in preference order and returns
//! the first one that reports availability.

use std::collections::HashMap;
use std::ops::Range;
use std::sync::{Arc, Mutex};

use crate::buffer::{BufferDesc, BufferHandle};
use crate::command::{CommandListId, CommandRecorder};
use crate::error::{RhiError, RhiResult};
use crate::pipeline::{ComputePipelineDesc, GraphicsPipelineDesc, PipelineStateHandle};
use crate::query::{QueryHeapDesc, QueryHeapHandle};
use crate::raytracing::{
    AccelerationStructureDesc, AccelerationStructureHandle, RaytracingPipelineDesc,
};
use crate::render_pass::{RenderPassDesc, RenderPassHandle};
use crate::sampler::{SamplerDesc, SamplerHandle};
use crate::shader::{ShaderDesc, ShaderHandle};
use crate::swapchain::{SwapChainDesc, SwapChainHandle, WindowSource};
use crate::texture::{TextureData, TextureDesc, TextureHandle};
use crate::types::{BackendKind, DeviceCapabilities, DeviceConfig, QueueKind};
use crate::{rhi_error, rhi_info, rhi_warn};

/// Callback invoked when a device reset is detected on Present or Submit
pub type DeviceLostCallback = Box<dyn Fn() + Send + Sync>;

/// Main device trait
///
/// Top-level facade over one native GPU device: adapter enumeration,
/// capability query, resource creation, the frame clock, command-list
/// acquisition, submission with cross-queue wait ordering, and the pipeline
/// cache all live behind this interface.
pub trait Device: Send {
    /// Adapter and feature information
    fn capabilities(&self) -> &DeviceCapabilities;

    // ===== RESOURCE CREATION =====

    /// Create a buffer. Initial data is staged through the copy allocator;
    /// the first subsequent non-copy submit waits on the staging semaphore.
    fn create_buffer(&mut self, desc: BufferDesc, initial_data: Option<&[u8]>)
        -> RhiResult<BufferHandle>;

    /// Create a texture, optionally staging initial data
    fn create_texture(
        &mut self,
        desc: TextureDesc,
        initial_data: Option<TextureData>,
    ) -> RhiResult<TextureHandle>;

    fn create_sampler(&mut self, desc: SamplerDesc) -> RhiResult<SamplerHandle>;

    /// Wrap pre-compiled native bytecode. The RHI never parses source.
    fn create_shader(&mut self, desc: ShaderDesc) -> RhiResult<ShaderHandle>;

    fn create_graphics_pipeline(
        &mut self,
        desc: GraphicsPipelineDesc,
    ) -> RhiResult<PipelineStateHandle>;

    fn create_compute_pipeline(
        &mut self,
        desc: ComputePipelineDesc,
    ) -> RhiResult<PipelineStateHandle>;

    fn create_raytracing_pipeline(
        &mut self,
        desc: RaytracingPipelineDesc,
    ) -> RhiResult<PipelineStateHandle>;

    fn create_render_pass(&mut self, desc: RenderPassDesc) -> RhiResult<RenderPassHandle>;

    fn create_query_heap(&mut self, desc: QueryHeapDesc) -> RhiResult<QueryHeapHandle>;

    fn create_swap_chain(
        &mut self,
        window: &dyn WindowSource,
        desc: SwapChainDesc,
    ) -> RhiResult<SwapChainHandle>;

    fn create_acceleration_structure(
        &mut self,
        desc: AccelerationStructureDesc,
    ) -> RhiResult<AccelerationStructureHandle>;

    // ===== FRAME LIFECYCLE =====

    /// Reset the per-frame command-list counter. Must be called on the same
    /// thread as `end_frame`.
    fn begin_frame(&mut self) -> RhiResult<()>;

    /// Acquire a command recorder for `queue`, valid until the next
    /// `submit_command_lists`
    fn begin_command_buffer(&mut self, queue: QueueKind) -> RhiResult<Box<dyn CommandRecorder>>;

    /// Partition the lists into batches (breaking on queue change or a
    /// declared wait), submit each batch natively, signal the per-queue
    /// timeline semaphores and the per-frame fence, then Present each swap
    /// chain used this frame.
    fn submit_command_lists(&mut self, lists: Vec<Box<dyn CommandRecorder>>) -> RhiResult<()>;

    /// Advance the frame clock; blocks on the fence of frame
    /// `current_frame - MAX_FRAMES_IN_FLIGHT`, then drains the
    /// deferred-destroy queues up to the retired frame
    fn end_frame(&mut self) -> RhiResult<()>;

    /// Flush every queue through a transient fence
    fn wait_for_gpu(&mut self) -> RhiResult<()>;

    /// Enqueue every cached pipeline into the deferred-destroy queue
    fn clear_pipeline_cache(&mut self);

    /// Monotonic frame counter
    fn current_frame(&self) -> u64;

    /// `current_frame % MAX_FRAMES_IN_FLIGHT`
    fn frame_index(&self) -> u64;

    /// Install the device-lost callback; no auto-recovery is attempted
    fn set_device_lost_callback(&mut self, callback: DeviceLostCallback);

    /// Wait for the GPU, drain every destroy queue unconditionally, then tear
    /// down heaps, allocator, device and instance in that order
    fn shutdown(&mut self);
}

/// Shared device handle
pub type DeviceHandle = Arc<Mutex<dyn Device>>;

// ============================================================================
// Submission batching
// ============================================================================

/// What the submit pass needs to know about one recorded list
#[derive(Debug, Clone)]
pub struct SubmitInfo {
    pub id: CommandListId,
    pub queue: QueueKind,
    /// Earlier lists this one must wait for
    pub waits: Vec<CommandListId>,
}

/// One native submit call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitBatch {
    pub queue: QueueKind,
    /// Index range into the submitted list order
    pub range: Range<usize>,
    /// Timeline waits the batch begins with
    pub waits: Vec<CommandListId>,
}

/// Partition command lists into submission batches.
///
/// A batch breaks whenever the queue changes or a list carries an explicit
/// wait; the wait becomes the new batch's timeline wait. Earlier batches are
/// submitted (and their queue's timeline signaled) before a waiting batch
/// starts, which is what makes the declared ordering hold across queues.
pub fn partition_submissions(lists: &[SubmitInfo]) -> Vec<SubmitBatch> {
    let mut batches: Vec<SubmitBatch> = Vec::new();
    for (index, info) in lists.iter().enumerate() {
        let break_batch = match batches.last() {
            None => true,
            Some(batch) => batch.queue != info.queue || !info.waits.is_empty(),
        };
        if break_batch {
            batches.push(SubmitBatch {
                queue: info.queue,
                range: index..index + 1,
                waits: info.waits.clone(),
            });
        } else {
            batches.last_mut().unwrap().range.end = index + 1;
        }
    }
    batches
}

/// Timeline-semaphore value signaled for command list `cmd_index` of `frame`
pub fn timeline_value(frame: u64, command_buffers_per_frame: u32, cmd_index: u32) -> u64 {
    frame * command_buffers_per_frame as u64 + cmd_index as u64
}

// ============================================================================
// Backend registry
// ============================================================================

/// Lifecycle events fired by the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceEvent {
    /// Initialization completed and the device is usable
    Ready,
    /// The device is shutting down
    Exiting(i32),
}

type BackendFactory = Box<dyn Fn(&DeviceConfig) -> RhiResult<DeviceHandle> + Send + Sync>;
type EventCallback = Box<dyn Fn(DeviceEvent) + Send + Sync>;

/// Registry of backend factories and event subscribers
pub struct BackendRegistry {
    backends: HashMap<BackendKind, BackendFactory>,
    subscribers: Vec<EventCallback>,
}

impl BackendRegistry {
    fn new() -> Self {
        Self {
            backends: HashMap::new(),
            subscribers: Vec::new(),
        }
    }

    /// Register a backend factory
    pub fn register<F>(&mut self, kind: BackendKind, factory: F)
    where
        F: Fn(&DeviceConfig) -> RhiResult<DeviceHandle> + Send + Sync + 'static,
    {
        self.backends.insert(kind, Box::new(factory));
    }

    /// Whether a backend has been registered
    pub fn is_registered(&self, kind: BackendKind) -> bool {
        self.backends.contains_key(&kind)
    }

    fn probe(&self, kind: BackendKind, config: &DeviceConfig) -> Option<RhiResult<DeviceHandle>> {
        self.backends.get(&kind).map(|factory| factory(config))
    }

    fn notify(&self, event: DeviceEvent) {
        for subscriber in &self.subscribers {
            subscriber(event);
        }
    }
}

static REGISTRY: Mutex<Option<BackendRegistry>> = Mutex::new(None);

fn with_registry<R>(f: impl FnOnce(&mut BackendRegistry) -> R) -> R {
    let mut guard = REGISTRY.lock().unwrap();
    let registry = guard.get_or_insert_with(BackendRegistry::new);
    f(registry)
}

/// Register a backend factory in the global registry.
///
/// Backend crates expose a `register_backend()` that calls this.
pub fn register_backend<F>(kind: BackendKind, factory: F)
where
    F: Fn(&DeviceConfig) -> RhiResult<DeviceHandle> + Send + Sync + 'static,
{
    with_registry(|registry| registry.register(kind, factory));
}

/// Subscribe to device lifecycle events
pub fn subscribe_device_events<F>(callback: F)
where
    F: Fn(DeviceEvent) + Send + Sync + 'static,
{
    with_registry(|registry| registry.subscribers.push(Box::new(callback)));
}

/// Resolve the probe order for a backend preference.
///
/// `Auto` prefers D3D12 and falls back to Vulkan; the environment variable
/// `ASTRAL_RHI_BACKEND` (`d3d12` | `vulkan`) overrides the preference.
pub fn probe_order(preference: BackendKind) -> Vec<BackendKind> {
    let preference = match std::env::var("ASTRAL_RHI_BACKEND").as_deref() {
        Ok("d3d12") => BackendKind::D3d12,
        Ok("vulkan") => BackendKind::Vulkan,
        Ok("mock") => BackendKind::Mock,
        _ => preference,
    };
    match preference {
        BackendKind::Auto => vec![BackendKind::D3d12, BackendKind::Vulkan],
        kind => vec![kind],
    }
}

/// Create a device: probe registered backends in preference order and return
/// the first that initializes. Fires `DeviceEvent::Ready` on success.
///
/// # Errors
///
/// `NoBackend` when no probed backend is registered and available.
pub fn initialize(config: DeviceConfig) -> RhiResult<DeviceHandle> {
    let order = probe_order(config.backend);

    let result = with_registry(|registry| {
        for kind in &order {
            match registry.probe(*kind, &config) {
                Some(Ok(device)) => {
                    rhi_info!("rhi::device", "Initialized {:?} backend", kind);
                    registry.notify(DeviceEvent::Ready);
                    return Ok(device);
                }
                Some(Err(err)) => {
                    rhi_warn!("rhi::device", "Backend {:?} unavailable: {}", kind, err);
                }
                None => {}
            }
        }
        Err(RhiError::NoBackend)
    });

    if result.is_err() {
        rhi_error!("rhi::device", "No supported GPU backend available (probed {:?})", order);
    }
    result
}

/// Shut the device down and fire `DeviceEvent::Exiting(exit_code)`
pub fn shutdown(device: &DeviceHandle, exit_code: i32) {
    device.lock().unwrap().shutdown();
    with_registry(|registry| registry.notify(DeviceEvent::Exiting(exit_code)));
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
#[path = "device_tests.rs"]
mod tests;
