//! Software device for tests
//!
//! Implements the full device contract without touching a GPU: bindless
//! allocation, the deferred-destroy queues, submission batching, the
//! pipeline cache and the view caches all run for real, and buffer copies
//! execute as memcpy at submit so transfer round trips are observable.
//! Texel storage is not modeled; texture copies validate and retain only.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use rustc_hash::FxHashMap;

use crate::bindless::{BindlessAllocator, BindlessIndex, DescriptorKind};
use crate::buffer::{Buffer, BufferDesc, BufferHandle, BufferRange, BufferResidency, BufferUsage};
use crate::command::{Barrier, BarrierBatch, CommandListId, CommandRecorder};
use crate::destroy_queue::DestroyQueue;
use crate::device::{
    partition_submissions, Device, DeviceHandle, DeviceLostCallback, SubmitBatch, SubmitInfo,
};
use crate::error::{RhiError, RhiResult};
use crate::pipeline::{
    ComputePipelineDesc, GraphicsPipelineDesc, PipelineBindPoint, PipelineState,
    PipelineStateHandle, VertexStrideDigest,
};
use crate::query::{QueryHeap, QueryHeapDesc, QueryHeapHandle};
use crate::raytracing::{
    AccelerationStructure, AccelerationStructureDesc, AccelerationStructureHandle,
    RaytracingPipelineDesc,
};
use crate::render_pass::{RenderPass, RenderPassDesc, RenderPassHandle, ResourceLayout};
use crate::sampler::{Sampler, SamplerDesc, SamplerHandle};
use crate::shader::{Shader, ShaderDesc, ShaderHandle, ShaderStage};
use crate::swapchain::{SwapChain, SwapChainDesc, SwapChainHandle, WindowSource};
use crate::texture::{
    Texture, TextureData, TextureDesc, TextureDimension, TextureHandle, TextureUsage, TextureView,
    TextureViewDesc,
};
use crate::types::{
    BackendKind, ClearValue, DeviceCapabilities, DeviceConfig, IndexFormat, QueueKind, Rect2D,
    ShadingRate, Viewport, MAX_FRAMES_IN_FLIGHT, PER_DRAW_SLOT_CAPACITY, PUSH_CONSTANT_CAPACITY,
};
use crate::{rhi_debug, rhi_info};

// ============================================================================
// Headless window
// ============================================================================

/// Window stand-in for swap-chain creation without a display server.
/// The mock never dereferences the handles.
pub struct NullWindow;

impl raw_window_handle::HasWindowHandle for NullWindow {
    fn window_handle(
        &self,
    ) -> Result<raw_window_handle::WindowHandle<'_>, raw_window_handle::HandleError> {
        let raw = raw_window_handle::RawWindowHandle::Web(raw_window_handle::WebWindowHandle::new(0));
        // SAFETY: the handle is never passed to a native API
        Ok(unsafe { raw_window_handle::WindowHandle::borrow_raw(raw) })
    }
}

impl raw_window_handle::HasDisplayHandle for NullWindow {
    fn display_handle(
        &self,
    ) -> Result<raw_window_handle::DisplayHandle<'_>, raw_window_handle::HandleError> {
        let raw = raw_window_handle::RawDisplayHandle::Web(raw_window_handle::WebDisplayHandle::new());
        // SAFETY: the handle is never passed to a native API
        Ok(unsafe { raw_window_handle::DisplayHandle::borrow_raw(raw) })
    }
}

// ============================================================================
// Shared device state
// ============================================================================

/// State shared between the device and its resources: the frame clock, the
/// bindless allocators and the deferred release log.
pub struct MockShared {
    frame: AtomicU64,
    bindless: Mutex<Vec<BindlessAllocator>>,
    zombies: Mutex<DestroyQueue<String>>,
    released: Mutex<Vec<String>>,
}

impl MockShared {
    fn new() -> Self {
        Self {
            frame: AtomicU64::new(0),
            bindless: Mutex::new(
                DescriptorKind::ALL
                    .iter()
                    .map(|kind| BindlessAllocator::new(*kind))
                    .collect(),
            ),
            zombies: Mutex::new(DestroyQueue::new()),
            released: Mutex::new(Vec::new()),
        }
    }

    /// Frame clock as resource destructors see it
    pub fn current_frame(&self) -> u64 {
        self.frame.load(Ordering::Acquire)
    }

    fn set_frame(&self, frame: u64) {
        self.frame.store(frame, Ordering::Release);
    }

    fn allocate(&self, kind: DescriptorKind) -> RhiResult<BindlessIndex> {
        self.bindless.lock().unwrap()[kind.heap_index()]
            .allocate()
            .ok_or(RhiError::OutOfMemory)
    }

    fn free(&self, kind: DescriptorKind, index: BindlessIndex) {
        if index.is_valid() {
            let frame = self.current_frame();
            self.bindless.lock().unwrap()[kind.heap_index()].free(index, frame);
        }
    }

    fn defer_release(&self, name: String) {
        let frame = self.current_frame();
        self.zombies.lock().unwrap().push(name, frame);
    }

    fn retire(&self, current_frame: u64) {
        for allocator in self.bindless.lock().unwrap().iter_mut() {
            allocator.update(current_frame, MAX_FRAMES_IN_FLIGHT);
        }
        let mut released = self.released.lock().unwrap();
        self.zombies
            .lock()
            .unwrap()
            .update(current_frame, MAX_FRAMES_IN_FLIGHT, |name| released.push(name));
    }

    fn drain_all(&self) {
        for allocator in self.bindless.lock().unwrap().iter_mut() {
            allocator.drain();
        }
        let mut released = self.released.lock().unwrap();
        self.zombies.lock().unwrap().drain(|name| released.push(name));
    }

    /// Names of natively released objects, in release order
    pub fn released(&self) -> Vec<String> {
        self.released.lock().unwrap().clone()
    }

    /// Live slot count of one bindless heap
    pub fn live_bindless(&self, kind: DescriptorKind) -> u32 {
        self.bindless.lock().unwrap()[kind.heap_index()].live()
    }

    /// High-water mark of one bindless heap
    pub fn bindless_high_water(&self, kind: DescriptorKind) -> u32 {
        self.bindless.lock().unwrap()[kind.heap_index()].high_water_mark()
    }
}

fn release_name(kind: &str, debug_name: &Option<String>) -> String {
    match debug_name {
        Some(name) => format!("{}:{}", kind, name),
        None => kind.to_string(),
    }
}

// ============================================================================
// Buffer
// ============================================================================

/// Software buffer backed by a byte vector
pub struct MockBuffer {
    desc: BufferDesc,
    data: Mutex<Vec<u8>>,
    cbv: BindlessIndex,
    srv: BindlessIndex,
    uav: BindlessIndex,
    range_views: Mutex<FxHashMap<(BufferRange, bool), BindlessIndex>>,
    shared: Arc<MockShared>,
}

impl MockBuffer {
    fn create(
        shared: Arc<MockShared>,
        desc: BufferDesc,
        initial_data: Option<&[u8]>,
    ) -> RhiResult<Arc<Self>> {
        desc.validate()?;
        let mut data = vec![0u8; desc.size as usize];
        if let Some(bytes) = initial_data {
            if bytes.len() as u64 > desc.size {
                return Err(RhiError::InvalidDescriptor(
                    "initial data exceeds buffer size".into(),
                ));
            }
            data[..bytes.len()].copy_from_slice(bytes);
        }
        let cbv = if desc.usage.contains(BufferUsage::UNIFORM) {
            shared.allocate(DescriptorKind::UniformBuffer)?
        } else {
            BindlessIndex::UNBOUND
        };
        let srv = if desc.usage.contains(BufferUsage::SHADER_READ) {
            shared.allocate(Self::view_kind(&desc))?
        } else {
            BindlessIndex::UNBOUND
        };
        let uav = if desc.usage.contains(BufferUsage::SHADER_WRITE) {
            shared.allocate(Self::view_kind(&desc))?
        } else {
            BindlessIndex::UNBOUND
        };
        Ok(Arc::new(Self {
            desc,
            data: Mutex::new(data),
            cbv,
            srv,
            uav,
            range_views: Mutex::new(FxHashMap::default()),
            shared,
        }))
    }

    /// Typed views for formatted buffers, structured/raw otherwise
    fn view_kind(desc: &BufferDesc) -> DescriptorKind {
        if desc.format.is_some() {
            DescriptorKind::UniformTexelBuffer
        } else {
            DescriptorKind::StorageBuffer
        }
    }

    fn bytes(&self) -> MutexGuard<'_, Vec<u8>> {
        self.data.lock().unwrap()
    }

    fn check_range(&self, offset: u64, len: u64) -> RhiResult<()> {
        if offset.checked_add(len).map_or(true, |end| end > self.desc.size) {
            return Err(RhiError::ValidationError(format!(
                "range {}..{} out of bounds for buffer of size {}",
                offset,
                offset.saturating_add(len),
                self.desc.size
            )));
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
            return Err(RhiError::InvalidDescriptor(
                "buffer usage does not permit the requested view".into(),
            ));
        }
        let resolved = range.resolve(self.desc.size)?;
        let mut cache = self.range_views.lock().unwrap();
        if let Some(index) = cache.get(&(resolved, writable)) {
            return Ok(*index);
        }
        let index = self.shared.allocate(Self::view_kind(&self.desc))?;
        cache.insert((resolved, writable), index);
        Ok(index)
    }
}

impl Buffer for MockBuffer {
    fn desc(&self) -> &BufferDesc {
        &self.desc
    }

    fn bindless_cbv(&self) -> BindlessIndex {
        self.cbv
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
        match self.desc.residency {
            BufferResidency::Upload | BufferResidency::Dynamic => {}
            _ => {
                return Err(RhiError::ValidationError(
                    "update requires upload or dynamic residency".into(),
                ))
            }
        }
        self.check_range(offset, data.len() as u64)?;
        let offset = offset as usize;
        self.bytes()[offset..offset + data.len()].copy_from_slice(data);
        Ok(())
    }

    fn read(&self, offset: u64, out: &mut [u8]) -> RhiResult<()> {
        match self.desc.residency {
            BufferResidency::Readback | BufferResidency::Upload => {}
            _ => {
                return Err(RhiError::ValidationError(
                    "read requires readback or upload residency".into(),
                ))
            }
        }
        self.check_range(offset, out.len() as u64)?;
        let offset = offset as usize;
        out.copy_from_slice(&self.bytes()[offset..offset + out.len()]);
        Ok(())
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

impl Drop for MockBuffer {
    fn drop(&mut self) {
        let kind = Self::view_kind(&self.desc);
        self.shared.free(DescriptorKind::UniformBuffer, self.cbv);
        self.shared.free(kind, self.srv);
        self.shared.free(kind, self.uav);
        for index in self.range_views.lock().unwrap().values() {
            self.shared.free(kind, *index);
        }
        self.shared
            .defer_release(release_name("buffer", &self.desc.debug_name));
    }
}

// ============================================================================
// Texture and views
// ============================================================================

/// Software texture view
pub struct MockTextureView {
    desc: TextureViewDesc,
    srv: BindlessIndex,
    uav: BindlessIndex,
    shared: Arc<MockShared>,
}

impl TextureView for MockTextureView {
    fn desc(&self) -> &TextureViewDesc {
        &self.desc
    }

    fn bindless_srv(&self) -> BindlessIndex {
        self.srv
    }

    fn bindless_uav(&self) -> BindlessIndex {
        self.uav
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

impl Drop for MockTextureView {
    fn drop(&mut self) {
        self.shared.free(DescriptorKind::SampledImage, self.srv);
        self.shared.free(DescriptorKind::StorageImage, self.uav);
    }
}

/// Software texture; texel storage is not modeled
pub struct MockTexture {
    desc: TextureDesc,
    views: Mutex<FxHashMap<TextureViewDesc, Arc<MockTextureView>>>,
    /// Mip-0 texel bytes per initialized layer
    layers: Mutex<FxHashMap<u32, Vec<u8>>>,
    shared: Arc<MockShared>,
}

impl MockTexture {
    fn create(
        shared: Arc<MockShared>,
        desc: TextureDesc,
        initial_data: Option<TextureData>,
    ) -> RhiResult<Arc<Self>> {
        desc.validate()?;

        let mut layers = FxHashMap::default();
        if let Some(data) = initial_data {
            let layer_size = Self::layer_size(&desc);
            let entries = match data {
                TextureData::Single(bytes) => vec![(0, bytes)],
                TextureData::Layers(list) => list
                    .into_iter()
                    .map(|entry| (entry.layer, entry.data))
                    .collect(),
            };
            for (layer, bytes) in entries {
                if layer >= desc.native_array_size() {
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
                layers.insert(layer, bytes);
            }
        }

        Ok(Arc::new(Self {
            desc,
            views: Mutex::new(FxHashMap::default()),
            layers: Mutex::new(layers),
            shared,
        }))
    }

    /// Tightly packed mip-0 byte size of one layer
    fn layer_size(desc: &TextureDesc) -> u64 {
        let info = desc.format.info();
        let blocks_x = desc.width.div_ceil(info.block_width);
        let blocks_y = desc.height.div_ceil(info.block_height);
        let depth = if desc.dimension == TextureDimension::D3 {
            desc.depth_or_array_size
        } else {
            1
        };
        blocks_x as u64 * blocks_y as u64 * depth as u64 * info.bytes_per_block as u64
    }

    /// Stored mip-0 bytes for `layer`, if it was initialized
    pub fn layer_data(&self, layer: u32) -> Option<Vec<u8>> {
        self.layers.lock().unwrap().get(&layer).cloned()
    }
}

impl Texture for MockTexture {
    fn desc(&self) -> &TextureDesc {
        &self.desc
    }

    fn get_view(&self, desc: TextureViewDesc) -> RhiResult<Arc<dyn TextureView>> {
        let normalized = desc.normalized(&self.desc)?;
        let mut views = self.views.lock().unwrap();
        if let Some(view) = views.get(&normalized) {
            return Ok(view.clone());
        }
        let srv = if self.desc.usage.contains(TextureUsage::SAMPLED) {
            self.shared.allocate(DescriptorKind::SampledImage)?
        } else {
            BindlessIndex::UNBOUND
        };
        let uav = if self.desc.usage.contains(TextureUsage::STORAGE) {
            self.shared.allocate(DescriptorKind::StorageImage)?
        } else {
            BindlessIndex::UNBOUND
        };
        let view = Arc::new(MockTextureView {
            desc: normalized,
            srv,
            uav,
            shared: self.shared.clone(),
        });
        views.insert(normalized, view.clone());
        Ok(view)
    }

    fn bindless_srv(&self) -> BindlessIndex {
        self.get_view(TextureViewDesc::all())
            .map(|view| view.bindless_srv())
            .unwrap_or(BindlessIndex::UNBOUND)
    }

    fn bindless_uav(&self) -> BindlessIndex {
        self.get_view(TextureViewDesc::all())
            .map(|view| view.bindless_uav())
            .unwrap_or(BindlessIndex::UNBOUND)
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

impl Drop for MockTexture {
    fn drop(&mut self) {
        self.shared
            .defer_release(release_name("texture", &self.desc.debug_name));
    }
}

// ============================================================================
// Sampler, shader, pipeline, render pass, query heap, acceleration structure
// ============================================================================

pub struct MockSampler {
    desc: SamplerDesc,
    index: BindlessIndex,
    shared: Arc<MockShared>,
}

impl Sampler for MockSampler {
    fn desc(&self) -> &SamplerDesc {
        &self.desc
    }

    fn bindless(&self) -> BindlessIndex {
        self.index
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

impl Drop for MockSampler {
    fn drop(&mut self) {
        self.shared.free(DescriptorKind::Sampler, self.index);
        self.shared
            .defer_release(release_name("sampler", &self.desc.debug_name));
    }
}

pub struct MockShader {
    stage: ShaderStage,
    hash: u64,
}

impl Shader for MockShader {
    fn stage(&self) -> ShaderStage {
        self.stage
    }

    fn bytecode_hash(&self) -> u64 {
        self.hash
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

pub struct MockPipeline {
    key: u64,
    bind_point: PipelineBindPoint,
    debug_name: Option<String>,
    shared: Arc<MockShared>,
}

impl PipelineState for MockPipeline {
    fn cache_key(&self) -> u64 {
        self.key
    }

    fn bind_point(&self) -> PipelineBindPoint {
        self.bind_point
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

impl Drop for MockPipeline {
    fn drop(&mut self) {
        self.shared
            .defer_release(release_name("pipeline", &self.debug_name));
    }
}

pub struct MockRenderPass {
    desc: RenderPassDesc,
    signature: u64,
}

impl RenderPass for MockRenderPass {
    fn desc(&self) -> &RenderPassDesc {
        &self.desc
    }

    fn format_signature(&self) -> u64 {
        self.signature
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

pub struct MockQueryHeap {
    desc: QueryHeapDesc,
}

impl QueryHeap for MockQueryHeap {
    fn desc(&self) -> &QueryHeapDesc {
        &self.desc
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

pub struct MockAccelerationStructure {
    index: BindlessIndex,
    top_level: bool,
    debug_name: Option<String>,
    shared: Arc<MockShared>,
}

impl AccelerationStructure for MockAccelerationStructure {
    fn bindless(&self) -> BindlessIndex {
        self.index
    }

    fn is_top_level(&self) -> bool {
        self.top_level
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

impl Drop for MockAccelerationStructure {
    fn drop(&mut self) {
        self.shared
            .free(DescriptorKind::AccelerationStructure, self.index);
        self.shared
            .defer_release(release_name("acceleration_structure", &self.debug_name));
    }
}

// ============================================================================
// Swap chain
// ============================================================================

/// Software swap chain; records the layout transitions recorders apply to it
pub struct MockSwapChain {
    desc: Mutex<SwapChainDesc>,
    back_buffers: Mutex<Vec<TextureHandle>>,
    transitions: Mutex<Vec<ResourceLayout>>,
    presented: AtomicU64,
    shared: Arc<MockShared>,
}

impl MockSwapChain {
    fn create(shared: Arc<MockShared>, desc: SwapChainDesc) -> RhiResult<Arc<Self>> {
        if desc.width == 0 || desc.height == 0 {
            return Err(RhiError::InvalidDescriptor(
                "swap chain extent must be non-zero".into(),
            ));
        }
        let back_buffers = Self::make_back_buffers(&shared, &desc)?;
        Ok(Arc::new(Self {
            desc: Mutex::new(desc),
            back_buffers: Mutex::new(back_buffers),
            transitions: Mutex::new(Vec::new()),
            presented: AtomicU64::new(0),
            shared,
        }))
    }

    fn make_back_buffers(
        shared: &Arc<MockShared>,
        desc: &SwapChainDesc,
    ) -> RhiResult<Vec<TextureHandle>> {
        (0..crate::types::BACK_BUFFER_COUNT)
            .map(|index| {
                let texture = MockTexture::create(
                    shared.clone(),
                    TextureDesc {
                        format: desc.resolved_format(),
                        usage: TextureUsage::RENDER_TARGET,
                        width: desc.width,
                        height: desc.height,
                        debug_name: Some(format!("back_buffer_{}", index)),
                        ..Default::default()
                    },
                    None,
                )?;
                Ok(texture as TextureHandle)
            })
            .collect()
    }

    fn transition(&self, layout: ResourceLayout) {
        self.transitions.lock().unwrap().push(layout);
    }

    fn present(&self) {
        self.presented.fetch_add(1, Ordering::Relaxed);
    }

    /// Layout transitions applied so far, in record order
    pub fn transitions(&self) -> Vec<ResourceLayout> {
        self.transitions.lock().unwrap().clone()
    }

    /// Number of completed presents
    pub fn present_count(&self) -> u64 {
        self.presented.load(Ordering::Relaxed)
    }

    /// Current back-buffer textures
    pub fn back_buffers(&self) -> Vec<TextureHandle> {
        self.back_buffers.lock().unwrap().clone()
    }
}

impl SwapChain for MockSwapChain {
    fn desc(&self) -> SwapChainDesc {
        self.desc.lock().unwrap().clone()
    }

    fn resize(&self, width: u32, height: u32) -> RhiResult<()> {
        if width == 0 || height == 0 {
            return Err(RhiError::InvalidDescriptor(
                "swap chain extent must be non-zero".into(),
            ));
        }
        let mut desc = self.desc.lock().unwrap();
        desc.width = width;
        desc.height = height;
        *self.back_buffers.lock().unwrap() = Self::make_back_buffers(&self.shared, &desc)?;
        Ok(())
    }

    fn extent(&self) -> (u32, u32) {
        let desc = self.desc.lock().unwrap();
        (desc.width, desc.height)
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

// ============================================================================
// Command recorder
// ============================================================================

/// Resources a recorded list keeps alive until its frame retires
enum Retained {
    Buffer(BufferHandle),
    Texture(TextureHandle),
    Pipeline(PipelineStateHandle),
    RenderPass(RenderPassHandle),
    QueryHeap(QueryHeapHandle),
    SwapChain(SwapChainHandle),
    AccelerationStructure(AccelerationStructureHandle),
}

/// Transfer commands the device executes at submit
enum MockCommand {
    CopyBuffer {
        src: BufferHandle,
        src_offset: u64,
        dst: BufferHandle,
        dst_offset: u64,
        size: u64,
    },
    UpdateBuffer {
        dst: BufferHandle,
        offset: u64,
        data: Vec<u8>,
    },
}

/// Software command recorder; validates the recording state machine and
/// coalesces barriers exactly like the native backends.
pub struct MockCommandRecorder {
    id: CommandListId,
    queue: QueueKind,
    waits: Vec<CommandListId>,
    barriers: BarrierBatch,
    /// `(texture_count, buffer_count, memory)` per flush that emitted work
    flush_log: Vec<(usize, usize, bool)>,
    commands: Vec<MockCommand>,
    retained: Vec<Retained>,
    in_render_pass: bool,
    active_swap_chain: Option<SwapChainHandle>,
    swap_chains_used: Vec<SwapChainHandle>,
    bound_pipeline: Option<PipelineStateHandle>,
    raytracing_bound: bool,
    stride_digest: VertexStrideDigest,
    push_data: [u8; PUSH_CONSTANT_CAPACITY],
    push_len: usize,
    events: Vec<String>,
    draws: u32,
    dispatches: u32,
    shared: Arc<MockShared>,
}

impl MockCommandRecorder {
    fn new(id: CommandListId, queue: QueueKind, shared: Arc<MockShared>) -> Self {
        Self {
            id,
            queue,
            waits: Vec::new(),
            barriers: BarrierBatch::new(),
            flush_log: Vec::new(),
            commands: Vec::new(),
            retained: Vec::new(),
            in_render_pass: false,
            active_swap_chain: None,
            swap_chains_used: Vec::new(),
            bound_pipeline: None,
            raytracing_bound: false,
            stride_digest: VertexStrideDigest::default(),
            push_data: [0; PUSH_CONSTANT_CAPACITY],
            push_len: 0,
            events: Vec::new(),
            draws: 0,
            dispatches: 0,
            shared,
        }
    }

    fn flush_barriers(&mut self) {
        if self.barriers.is_empty() {
            return;
        }
        let (textures, buffers, memory) = self.barriers.take();
        if textures.is_empty() && buffers.is_empty() && !memory {
            return;
        }
        self.flush_log.push((textures.len(), buffers.len(), memory));
        for barrier in textures {
            self.retained.push(Retained::Texture(barrier.texture));
        }
        for barrier in buffers {
            self.retained.push(Retained::Buffer(barrier.buffer));
        }
    }

    fn require_render_pass(&self) -> RhiResult<()> {
        if !self.in_render_pass {
            return Err(RhiError::ValidationError(
                "draw recorded outside a render pass".into(),
            ));
        }
        Ok(())
    }

    fn require_bind_point(&self, bind_point: PipelineBindPoint) -> RhiResult<()> {
        match &self.bound_pipeline {
            Some(pipeline) if pipeline.bind_point() == bind_point => Ok(()),
            _ => Err(RhiError::ValidationError(format!(
                "no {:?} pipeline bound",
                bind_point
            ))),
        }
    }

    fn require_queue(&self, allowed: &[QueueKind], what: &str) -> RhiResult<()> {
        if allowed.contains(&self.queue) {
            Ok(())
        } else {
            Err(RhiError::ValidationError(format!(
                "{} is not valid on the {:?} queue",
                what, self.queue
            )))
        }
    }

    fn binding_slot(slot: u32) -> RhiResult<()> {
        if slot >= PER_DRAW_SLOT_CAPACITY {
            return Err(RhiError::ValidationError(format!(
                "binding slot {} exceeds the {}-slot capacity",
                slot, PER_DRAW_SLOT_CAPACITY
            )));
        }
        Ok(())
    }

    fn buffer_range(buffer: &BufferHandle, offset: u64, len: u64) -> RhiResult<()> {
        if offset.checked_add(len).map_or(true, |end| end > buffer.desc().size) {
            return Err(RhiError::ValidationError(format!(
                "range {}..{} out of bounds for buffer of size {}",
                offset,
                offset.saturating_add(len),
                buffer.desc().size
            )));
        }
        Ok(())
    }

    fn draw_common(&mut self) -> RhiResult<()> {
        self.require_queue(&[QueueKind::Graphics], "draw")?;
        self.require_render_pass()?;
        self.require_bind_point(PipelineBindPoint::Graphics)?;
        self.flush_barriers();
        self.draws += 1;
        Ok(())
    }

    fn dispatch_common(&mut self) -> RhiResult<()> {
        self.require_queue(&[QueueKind::Graphics, QueueKind::Compute], "dispatch")?;
        self.require_bind_point(PipelineBindPoint::Compute)?;
        self.flush_barriers();
        self.dispatches += 1;
        Ok(())
    }

    /// Combined pipeline key the next draw would use, cache key mixed with
    /// the vertex-stride digest
    pub fn effective_pipeline_key(&self) -> Option<u64> {
        self.bound_pipeline.as_ref().map(|pipeline| {
            crate::pipeline::combine_stride_digest(pipeline.cache_key(), self.stride_digest.value())
        })
    }

    /// Barrier flushes that emitted native work, as
    /// `(texture_count, buffer_count, memory)` triples
    pub fn barrier_flush_log(&self) -> &[(usize, usize, bool)] {
        &self.flush_log
    }

    /// Draw calls recorded so far
    pub fn draw_count(&self) -> u32 {
        self.draws
    }

    /// Dispatches recorded so far
    pub fn dispatch_count(&self) -> u32 {
        self.dispatches
    }

    /// Debug events and markers in record order
    pub fn event_log(&self) -> &[String] {
        &self.events
    }
}

impl CommandRecorder for MockCommandRecorder {
    fn id(&self) -> CommandListId {
        self.id
    }

    fn queue(&self) -> QueueKind {
        self.queue
    }

    fn wait_for(&mut self, earlier: CommandListId) -> RhiResult<()> {
        if earlier >= self.id {
            return Err(RhiError::ValidationError(format!(
                "list {} cannot wait for {}; waits only reference earlier lists",
                self.id.0, earlier.0
            )));
        }
        if !self.waits.contains(&earlier) {
            self.waits.push(earlier);
        }
        Ok(())
    }

    fn begin_render_pass_swap_chain(
        &mut self,
        swap_chain: &SwapChainHandle,
        _clear: ClearValue,
    ) -> RhiResult<()> {
        self.require_queue(&[QueueKind::Graphics], "render pass")?;
        if self.in_render_pass {
            return Err(RhiError::ValidationError("render pass already open".into()));
        }
        let mock = swap_chain
            .as_any()
            .downcast_ref::<MockSwapChain>()
            .ok_or_else(|| RhiError::ValidationError("foreign swap chain".into()))?;
        self.flush_barriers();
        // PRESENT -> RENDER_TARGET on the acquired back buffer
        mock.transition(ResourceLayout::RenderTarget);
        self.active_swap_chain = Some(swap_chain.clone());
        self.retained.push(Retained::SwapChain(swap_chain.clone()));
        self.in_render_pass = true;
        Ok(())
    }

    fn begin_render_pass(&mut self, render_pass: &RenderPassHandle) -> RhiResult<()> {
        self.require_queue(&[QueueKind::Graphics], "render pass")?;
        if self.in_render_pass {
            return Err(RhiError::ValidationError("render pass already open".into()));
        }
        self.flush_barriers();
        self.retained.push(Retained::RenderPass(render_pass.clone()));
        self.in_render_pass = true;
        Ok(())
    }

    fn end_render_pass(&mut self) -> RhiResult<()> {
        if !self.in_render_pass {
            return Err(RhiError::ValidationError("no render pass open".into()));
        }
        if let Some(swap_chain) = self.active_swap_chain.take() {
            // RENDER_TARGET -> PRESENT before the submit-time Present
            if let Some(mock) = swap_chain.as_any().downcast_ref::<MockSwapChain>() {
                mock.transition(ResourceLayout::Present);
            }
            self.swap_chains_used.push(swap_chain);
        }
        self.in_render_pass = false;
        Ok(())
    }

    fn set_viewports(&mut self, viewports: &[Viewport]) -> RhiResult<()> {
        if viewports.is_empty() {
            return Err(RhiError::ValidationError("empty viewport list".into()));
        }
        Ok(())
    }

    fn set_scissors(&mut self, scissors: &[Rect2D]) -> RhiResult<()> {
        if scissors.is_empty() {
            return Err(RhiError::ValidationError("empty scissor list".into()));
        }
        Ok(())
    }

    fn set_stencil_reference(&mut self, _reference: u32) -> RhiResult<()> {
        Ok(())
    }

    fn set_blend_factor(&mut self, _factor: [f32; 4]) -> RhiResult<()> {
        Ok(())
    }

    fn set_shading_rate(&mut self, _rate: ShadingRate) -> RhiResult<()> {
        Ok(())
    }

    fn bind_pipeline(&mut self, pipeline: &PipelineStateHandle) -> RhiResult<()> {
        self.bound_pipeline = Some(pipeline.clone());
        self.raytracing_bound = pipeline.bind_point() == PipelineBindPoint::Raytracing;
        // Vertex-buffer bindings stay live across pipeline binds, so the
        // stride digest carries over
        self.retained.push(Retained::Pipeline(pipeline.clone()));
        Ok(())
    }

    fn bind_raytracing_pipeline(&mut self, _desc: &RaytracingPipelineDesc) -> RhiResult<()> {
        self.raytracing_bound = true;
        Ok(())
    }

    fn bind_vertex_buffer(
        &mut self,
        slot: u32,
        buffer: &BufferHandle,
        offset: u64,
        stride: u32,
    ) -> RhiResult<()> {
        if !buffer.desc().usage.contains(BufferUsage::VERTEX) {
            return Err(RhiError::ValidationError(
                "buffer lacks vertex usage".into(),
            ));
        }
        Self::buffer_range(buffer, offset, 0)?;
        self.stride_digest.bind(slot, stride);
        self.retained.push(Retained::Buffer(buffer.clone()));
        Ok(())
    }

    fn bind_index_buffer(
        &mut self,
        buffer: &BufferHandle,
        offset: u64,
        _format: IndexFormat,
    ) -> RhiResult<()> {
        if !buffer.desc().usage.contains(BufferUsage::INDEX) {
            return Err(RhiError::ValidationError("buffer lacks index usage".into()));
        }
        Self::buffer_range(buffer, offset, 0)?;
        self.retained.push(Retained::Buffer(buffer.clone()));
        Ok(())
    }

    fn bind_constant_buffer(&mut self, slot: u32, buffer: &BufferHandle) -> RhiResult<()> {
        Self::binding_slot(slot)?;
        if !buffer.desc().usage.contains(BufferUsage::UNIFORM) {
            return Err(RhiError::ValidationError(
                "buffer lacks uniform usage".into(),
            ));
        }
        self.retained.push(Retained::Buffer(buffer.clone()));
        Ok(())
    }

    fn bind_shader_resource(&mut self, slot: u32, texture: &TextureHandle) -> RhiResult<()> {
        Self::binding_slot(slot)?;
        if !texture.desc().usage.contains(TextureUsage::SAMPLED) {
            return Err(RhiError::ValidationError(
                "texture lacks sampled usage".into(),
            ));
        }
        self.retained.push(Retained::Texture(texture.clone()));
        Ok(())
    }

    fn bind_unordered_access(&mut self, slot: u32, texture: &TextureHandle) -> RhiResult<()> {
        Self::binding_slot(slot)?;
        if !texture.desc().usage.contains(TextureUsage::STORAGE) {
            return Err(RhiError::ValidationError(
                "texture lacks storage usage".into(),
            ));
        }
        self.retained.push(Retained::Texture(texture.clone()));
        Ok(())
    }

    fn push_constants(&mut self, offset: u32, data: &[u8]) -> RhiResult<()> {
        let end = offset as usize + data.len();
        if end > PUSH_CONSTANT_CAPACITY {
            return Err(RhiError::ValidationError(format!(
                "push constants exceed the {}-byte capacity",
                PUSH_CONSTANT_CAPACITY
            )));
        }
        self.push_data[offset as usize..end].copy_from_slice(data);
        self.push_len = self.push_len.max(end);
        Ok(())
    }

    fn draw(&mut self, _vertex_count: u32, _first_vertex: u32) -> RhiResult<()> {
        self.draw_common()
    }

    fn draw_instanced(
        &mut self,
        _vertex_count: u32,
        _instance_count: u32,
        _first_vertex: u32,
        _first_instance: u32,
    ) -> RhiResult<()> {
        self.draw_common()
    }

    fn draw_indexed(
        &mut self,
        _index_count: u32,
        _first_index: u32,
        _vertex_offset: i32,
    ) -> RhiResult<()> {
        self.draw_common()
    }

    fn draw_indexed_instanced(
        &mut self,
        _index_count: u32,
        _instance_count: u32,
        _first_index: u32,
        _vertex_offset: i32,
        _first_instance: u32,
    ) -> RhiResult<()> {
        self.draw_common()
    }

    fn draw_indirect(&mut self, args: &BufferHandle, offset: u64, draw_count: u32) -> RhiResult<()> {
        if !args.desc().usage.contains(BufferUsage::INDIRECT) {
            return Err(RhiError::ValidationError(
                "buffer lacks indirect usage".into(),
            ));
        }
        Self::buffer_range(args, offset, draw_count as u64 * 16)?;
        self.retained.push(Retained::Buffer(args.clone()));
        self.draw_common()
    }

    fn dispatch(&mut self, _x: u32, _y: u32, _z: u32) -> RhiResult<()> {
        self.dispatch_common()
    }

    fn dispatch_indirect(&mut self, args: &BufferHandle, offset: u64) -> RhiResult<()> {
        if !args.desc().usage.contains(BufferUsage::INDIRECT) {
            return Err(RhiError::ValidationError(
                "buffer lacks indirect usage".into(),
            ));
        }
        Self::buffer_range(args, offset, 12)?;
        self.retained.push(Retained::Buffer(args.clone()));
        self.dispatch_common()
    }

    fn dispatch_mesh(&mut self, _x: u32, _y: u32, _z: u32) -> RhiResult<()> {
        self.require_queue(&[QueueKind::Graphics], "mesh dispatch")?;
        self.require_render_pass()?;
        self.require_bind_point(PipelineBindPoint::Graphics)?;
        self.flush_barriers();
        self.draws += 1;
        Ok(())
    }

    fn dispatch_rays(&mut self, _width: u32, _height: u32, _depth: u32) -> RhiResult<()> {
        self.require_queue(&[QueueKind::Graphics, QueueKind::Compute], "ray dispatch")?;
        if !self.raytracing_bound {
            return Err(RhiError::ValidationError(
                "no raytracing pipeline bound".into(),
            ));
        }
        self.flush_barriers();
        self.dispatches += 1;
        Ok(())
    }

    fn copy_buffer(
        &mut self,
        src: &BufferHandle,
        src_offset: u64,
        dst: &BufferHandle,
        dst_offset: u64,
        size: u64,
    ) -> RhiResult<()> {
        if self.in_render_pass {
            return Err(RhiError::ValidationError(
                "copy recorded inside a render pass".into(),
            ));
        }
        Self::buffer_range(src, src_offset, size)?;
        Self::buffer_range(dst, dst_offset, size)?;
        self.flush_barriers();
        self.commands.push(MockCommand::CopyBuffer {
            src: src.clone(),
            src_offset,
            dst: dst.clone(),
            dst_offset,
            size,
        });
        self.retained.push(Retained::Buffer(src.clone()));
        self.retained.push(Retained::Buffer(dst.clone()));
        Ok(())
    }

    fn copy_texture(&mut self, src: &TextureHandle, dst: &TextureHandle) -> RhiResult<()> {
        if src.desc().format != dst.desc().format {
            return Err(RhiError::ValidationError(
                "texture copy requires matching formats".into(),
            ));
        }
        self.flush_barriers();
        self.retained.push(Retained::Texture(src.clone()));
        self.retained.push(Retained::Texture(dst.clone()));
        Ok(())
    }

    fn copy_buffer_to_texture(
        &mut self,
        src: &BufferHandle,
        src_offset: u64,
        dst: &TextureHandle,
        subresource: u32,
    ) -> RhiResult<()> {
        Self::buffer_range(src, src_offset, 0)?;
        let desc = dst.desc();
        if subresource >= desc.mip_levels * desc.native_array_size() {
            return Err(RhiError::ValidationError("subresource out of range".into()));
        }
        self.flush_barriers();
        self.retained.push(Retained::Buffer(src.clone()));
        self.retained.push(Retained::Texture(dst.clone()));
        Ok(())
    }

    fn copy_texture_to_buffer(
        &mut self,
        src: &TextureHandle,
        subresource: u32,
        dst: &BufferHandle,
        dst_offset: u64,
    ) -> RhiResult<()> {
        let desc = src.desc();
        if subresource >= desc.mip_levels * desc.native_array_size() {
            return Err(RhiError::ValidationError("subresource out of range".into()));
        }
        Self::buffer_range(dst, dst_offset, 0)?;
        self.flush_barriers();
        self.retained.push(Retained::Texture(src.clone()));
        self.retained.push(Retained::Buffer(dst.clone()));
        Ok(())
    }

    fn update_buffer(&mut self, buffer: &BufferHandle, offset: u64, data: &[u8]) -> RhiResult<()> {
        Self::buffer_range(buffer, offset, data.len() as u64)?;
        self.commands.push(MockCommand::UpdateBuffer {
            dst: buffer.clone(),
            offset,
            data: data.to_vec(),
        });
        self.retained.push(Retained::Buffer(buffer.clone()));
        Ok(())
    }

    fn barrier(&mut self, barrier: Barrier) -> RhiResult<()> {
        self.barriers.push(barrier);
        Ok(())
    }

    fn begin_query(&mut self, heap: &QueryHeapHandle, index: u32) -> RhiResult<()> {
        if index >= heap.desc().count {
            return Err(RhiError::ValidationError("query index out of range".into()));
        }
        self.retained.push(Retained::QueryHeap(heap.clone()));
        Ok(())
    }

    fn end_query(&mut self, heap: &QueryHeapHandle, index: u32) -> RhiResult<()> {
        if index >= heap.desc().count {
            return Err(RhiError::ValidationError("query index out of range".into()));
        }
        Ok(())
    }

    fn resolve_query(
        &mut self,
        heap: &QueryHeapHandle,
        first: u32,
        count: u32,
        dst: &BufferHandle,
        dst_offset: u64,
    ) -> RhiResult<()> {
        if first.checked_add(count).map_or(true, |end| end > heap.desc().count) {
            return Err(RhiError::ValidationError("query range out of bounds".into()));
        }
        Self::buffer_range(dst, dst_offset, count as u64 * 8)?;
        self.retained.push(Retained::QueryHeap(heap.clone()));
        self.retained.push(Retained::Buffer(dst.clone()));
        Ok(())
    }

    fn build_acceleration_structure(
        &mut self,
        acceleration_structure: &AccelerationStructureHandle,
    ) -> RhiResult<()> {
        self.flush_barriers();
        self.retained
            .push(Retained::AccelerationStructure(acceleration_structure.clone()));
        Ok(())
    }

    fn begin_event(&mut self, name: &str) {
        self.events.push(format!("begin:{}", name));
    }

    fn end_event(&mut self) {
        self.events.push("end".to_string());
    }

    fn marker(&mut self, name: &str) {
        self.events.push(format!("marker:{}", name));
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn std::any::Any> {
        self
    }
}

// ============================================================================
// Device
// ============================================================================

/// Software implementation of [`Device`]
pub struct MockDevice {
    caps: DeviceCapabilities,
    config: DeviceConfig,
    shared: Arc<MockShared>,
    current_frame: u64,
    next_command_list: u32,
    pipelines: FxHashMap<u64, PipelineStateHandle>,
    in_flight: DestroyQueue<Vec<Retained>>,
    last_batches: Vec<SubmitBatch>,
    device_lost: Option<DeviceLostCallback>,
    lost: bool,
}

impl MockDevice {
    pub fn new(config: DeviceConfig) -> Self {
        rhi_info!("rhi::mock", "Created mock device \"{}\"", config.app_name);
        Self {
            caps: DeviceCapabilities {
                adapter_name: "Astral Mock Adapter".to_string(),
                backend: BackendKind::Mock,
                raytracing: true,
                mesh_shaders: true,
                variable_rate_shading: true,
                tearing: true,
            },
            config,
            shared: Arc::new(MockShared::new()),
            current_frame: 0,
            next_command_list: 0,
            pipelines: FxHashMap::default(),
            in_flight: DestroyQueue::new(),
            last_batches: Vec::new(),
            device_lost: None,
            lost: false,
        }
    }

    pub fn new_handle(config: DeviceConfig) -> DeviceHandle {
        Arc::new(Mutex::new(Self::new(config)))
    }

    /// Register the mock backend in the global registry
    pub fn register() {
        crate::device::register_backend(BackendKind::Mock, |config| {
            Ok(MockDevice::new_handle(config.clone()))
        });
    }

    /// Shared state, for test inspection
    pub fn shared(&self) -> &Arc<MockShared> {
        &self.shared
    }

    /// Batches produced by the most recent submit
    pub fn last_batches(&self) -> &[SubmitBatch] {
        &self.last_batches
    }

    /// Mark the device lost and fire the installed callback
    pub fn simulate_device_lost(&mut self) {
        self.lost = true;
        if let Some(callback) = &self.device_lost {
            callback();
        }
    }

    fn check_lost(&self) -> RhiResult<()> {
        if self.lost {
            Err(RhiError::DeviceLost)
        } else {
            Ok(())
        }
    }

    fn cached_pipeline(
        &mut self,
        key: u64,
        bind_point: PipelineBindPoint,
        debug_name: Option<String>,
    ) -> PipelineStateHandle {
        if let Some(pipeline) = self.pipelines.get(&key) {
            return pipeline.clone();
        }
        let pipeline: PipelineStateHandle = Arc::new(MockPipeline {
            key,
            bind_point,
            debug_name,
            shared: self.shared.clone(),
        });
        self.pipelines.insert(key, pipeline.clone());
        pipeline
    }

    fn execute(&self, commands: Vec<MockCommand>) -> RhiResult<()> {
        for command in commands {
            match command {
                MockCommand::CopyBuffer {
                    src,
                    src_offset,
                    dst,
                    dst_offset,
                    size,
                } => {
                    let src = downcast_buffer(&src)?;
                    let dst = downcast_buffer(&dst)?;
                    let bytes = {
                        let guard = src.bytes();
                        guard[src_offset as usize..(src_offset + size) as usize].to_vec()
                    };
                    dst.bytes()[dst_offset as usize..(dst_offset + size) as usize]
                        .copy_from_slice(&bytes);
                }
                MockCommand::UpdateBuffer { dst, offset, data } => {
                    let dst = downcast_buffer(&dst)?;
                    let offset = offset as usize;
                    dst.bytes()[offset..offset + data.len()].copy_from_slice(&data);
                }
            }
        }
        Ok(())
    }
}

fn downcast_buffer(handle: &BufferHandle) -> RhiResult<&MockBuffer> {
    handle
        .as_any()
        .downcast_ref::<MockBuffer>()
        .ok_or_else(|| RhiError::ValidationError("foreign buffer handle".into()))
}

impl Device for MockDevice {
    fn capabilities(&self) -> &DeviceCapabilities {
        &self.caps
    }

    fn create_buffer(
        &mut self,
        desc: BufferDesc,
        initial_data: Option<&[u8]>,
    ) -> RhiResult<BufferHandle> {
        rhi_debug!(
            "rhi::mock",
            "create_buffer {} bytes ({:?})",
            desc.size,
            desc.residency
        );
        Ok(MockBuffer::create(self.shared.clone(), desc, initial_data)?)
    }

    fn create_texture(
        &mut self,
        desc: TextureDesc,
        initial_data: Option<TextureData>,
    ) -> RhiResult<TextureHandle> {
        rhi_debug!(
            "rhi::mock",
            "create_texture {}x{} {:?}",
            desc.width,
            desc.height,
            desc.format
        );
        Ok(MockTexture::create(self.shared.clone(), desc, initial_data)?)
    }

    fn create_sampler(&mut self, desc: SamplerDesc) -> RhiResult<SamplerHandle> {
        let index = self.shared.allocate(DescriptorKind::Sampler)?;
        Ok(Arc::new(MockSampler {
            desc,
            index,
            shared: self.shared.clone(),
        }))
    }

    fn create_shader(&mut self, desc: ShaderDesc) -> RhiResult<ShaderHandle> {
        if desc.bytecode.is_empty() {
            return Err(RhiError::InvalidDescriptor(
                "shader bytecode must be non-empty".into(),
            ));
        }
        Ok(Arc::new(MockShader {
            stage: desc.stage,
            hash: desc.bytecode_hash(),
        }))
    }

    fn create_graphics_pipeline(
        &mut self,
        desc: GraphicsPipelineDesc,
    ) -> RhiResult<PipelineStateHandle> {
        Ok(self.cached_pipeline(desc.cache_key(), PipelineBindPoint::Graphics, desc.debug_name))
    }

    fn create_compute_pipeline(
        &mut self,
        desc: ComputePipelineDesc,
    ) -> RhiResult<PipelineStateHandle> {
        Ok(self.cached_pipeline(desc.cache_key(), PipelineBindPoint::Compute, desc.debug_name))
    }

    fn create_raytracing_pipeline(
        &mut self,
        desc: RaytracingPipelineDesc,
    ) -> RhiResult<PipelineStateHandle> {
        Ok(self.cached_pipeline(desc.cache_key(), PipelineBindPoint::Raytracing, desc.debug_name))
    }

    fn create_render_pass(&mut self, desc: RenderPassDesc) -> RhiResult<RenderPassHandle> {
        let signature = desc.format_signature();
        Ok(Arc::new(MockRenderPass { desc, signature }))
    }

    fn create_query_heap(&mut self, desc: QueryHeapDesc) -> RhiResult<QueryHeapHandle> {
        if desc.count == 0 {
            return Err(RhiError::InvalidDescriptor(
                "query heap count must be non-zero".into(),
            ));
        }
        Ok(Arc::new(MockQueryHeap { desc }))
    }

    fn create_swap_chain(
        &mut self,
        _window: &dyn WindowSource,
        desc: SwapChainDesc,
    ) -> RhiResult<SwapChainHandle> {
        Ok(MockSwapChain::create(self.shared.clone(), desc)?)
    }

    fn create_acceleration_structure(
        &mut self,
        desc: AccelerationStructureDesc,
    ) -> RhiResult<AccelerationStructureHandle> {
        let (top_level, debug_name) = match &desc {
            AccelerationStructureDesc::Bottom { debug_name, .. } => (false, debug_name.clone()),
            AccelerationStructureDesc::Top { debug_name, .. } => (true, debug_name.clone()),
        };
        let index = self.shared.allocate(DescriptorKind::AccelerationStructure)?;
        Ok(Arc::new(MockAccelerationStructure {
            index,
            top_level,
            debug_name,
            shared: self.shared.clone(),
        }))
    }

    fn begin_frame(&mut self) -> RhiResult<()> {
        self.check_lost()?;
        self.next_command_list = 0;
        Ok(())
    }

    fn begin_command_buffer(&mut self, queue: QueueKind) -> RhiResult<Box<dyn CommandRecorder>> {
        self.check_lost()?;
        if self.next_command_list >= self.config.command_buffers_per_frame {
            return Err(RhiError::ValidationError(format!(
                "per-frame command buffer budget of {} exhausted",
                self.config.command_buffers_per_frame
            )));
        }
        let id = CommandListId(self.next_command_list);
        self.next_command_list += 1;
        Ok(Box::new(MockCommandRecorder::new(id, queue, self.shared.clone())))
    }

    fn submit_command_lists(&mut self, lists: Vec<Box<dyn CommandRecorder>>) -> RhiResult<()> {
        self.check_lost()?;
        let mut recorders = Vec::with_capacity(lists.len());
        for list in lists {
            let recorder = list
                .into_any()
                .downcast::<MockCommandRecorder>()
                .map_err(|_| RhiError::ValidationError("foreign command recorder".into()))?;
            if recorder.in_render_pass {
                return Err(RhiError::ValidationError(
                    "submitted list has an open render pass".into(),
                ));
            }
            recorders.push(*recorder);
        }

        // Waits must reference a list submitted earlier in the same call
        for (position, recorder) in recorders.iter().enumerate() {
            for wait in &recorder.waits {
                let earlier = recorders[..position].iter().any(|r| r.id == *wait);
                if !earlier {
                    return Err(RhiError::ValidationError(format!(
                        "list {} waits for {}, which is not submitted before it",
                        recorder.id.0, wait.0
                    )));
                }
            }
        }

        let infos: Vec<SubmitInfo> = recorders
            .iter()
            .map(|r| SubmitInfo {
                id: r.id,
                queue: r.queue,
                waits: r.waits.clone(),
            })
            .collect();
        self.last_batches = partition_submissions(&infos);

        let mut retained = Vec::new();
        let mut presents: Vec<SwapChainHandle> = Vec::new();
        for mut recorder in recorders {
            self.execute(std::mem::take(&mut recorder.commands))?;
            retained.append(&mut recorder.retained);
            presents.append(&mut recorder.swap_chains_used);
        }
        if !retained.is_empty() {
            self.in_flight.push(retained, self.current_frame);
        }
        for swap_chain in presents {
            if let Some(mock) = swap_chain.as_any().downcast_ref::<MockSwapChain>() {
                mock.present();
            }
        }
        Ok(())
    }

    fn end_frame(&mut self) -> RhiResult<()> {
        self.check_lost()?;
        self.current_frame += 1;
        self.shared.set_frame(self.current_frame);
        self.in_flight
            .update(self.current_frame, MAX_FRAMES_IN_FLIGHT, drop);
        self.shared.retire(self.current_frame);
        Ok(())
    }

    fn wait_for_gpu(&mut self) -> RhiResult<()> {
        Ok(())
    }

    fn clear_pipeline_cache(&mut self) {
        self.pipelines.clear();
    }

    fn current_frame(&self) -> u64 {
        self.current_frame
    }

    fn frame_index(&self) -> u64 {
        self.current_frame % MAX_FRAMES_IN_FLIGHT
    }

    fn set_device_lost_callback(&mut self, callback: DeviceLostCallback) {
        self.device_lost = Some(callback);
    }

    fn shutdown(&mut self) {
        rhi_info!("rhi::mock", "Shutting down mock device");
        self.in_flight.drain(drop);
        self.pipelines.clear();
        self.shared.drain_all();
    }
}
