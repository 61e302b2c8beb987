/*!
# Astral RHI

Backend-agnostic render hardware interface over modern explicit GPU APIs.

This crate provides the platform-agnostic surface using trait-based dynamic
polymorphism: descriptors, resource traits, the command recorder contract,
the pixel-format table, the deferred-destroy queue, the bindless index
service, pipeline cache keys, and the backend registry. Backend crates
(`astral_rhi_backend_vulkan`, `astral_rhi_backend_d3d12`) provide concrete
types implementing these traits and register themselves as factories.

## Architecture

- **Device**: factory + frame-lifecycle trait implemented per backend
- **CommandRecorder**: per-worker command list with barrier tracking
- **Buffer / Texture / TextureView / Sampler / Shader / PipelineState /
  RenderPass / QueryHeap / SwapChain / AccelerationStructure**: shared
  (`Arc`) resource handles whose destructors defer native release by
  `MAX_FRAMES_IN_FLIGHT` frames
- **MockDevice**: complete software implementation used by the test suite

## Frame loop

```no_run
use astral_rhi::{initialize, DeviceConfig, QueueKind};

let device = initialize(DeviceConfig::default())?;
let mut dev = device.lock().unwrap();
dev.begin_frame()?;
let cmd = dev.begin_command_buffer(QueueKind::Graphics)?;
// ... record ...
dev.submit_command_lists(vec![cmd])?;
dev.end_frame()?;
# Ok::<(), astral_rhi::RhiError>(())
```
*/

// Internal modules
mod error;
pub mod log;

pub mod bindless;
pub mod buffer;
pub mod command;
pub mod destroy_queue;
pub mod device;
pub mod format;
pub mod mock;
pub mod pipeline;
pub mod query;
pub mod raytracing;
pub mod render_pass;
pub mod sampler;
pub mod shader;
pub mod swapchain;
pub mod texture;
pub mod types;

// Flat re-exports of the public surface
pub use bindless::{BindlessAllocator, BindlessIndex, DescriptorKind};
pub use buffer::{Buffer, BufferDesc, BufferHandle, BufferRange, BufferResidency, BufferUsage};
pub use command::{Barrier, BarrierBatch, CommandListId, CommandRecorder};
pub use destroy_queue::DestroyQueue;
pub use device::{
    initialize, partition_submissions, probe_order, register_backend, shutdown,
    subscribe_device_events, timeline_value, Device, DeviceEvent, DeviceHandle,
    DeviceLostCallback, SubmitBatch, SubmitInfo,
};
pub use error::{RhiError, RhiResult};
pub use format::{FormatAspect, FormatInfo, FormatKind, PixelFormat};
pub use pipeline::{
    BlendFactor, BlendOp, BlendState, BlendTargetState, ComputePipelineDesc, CullMode,
    DepthStencilState, FillMode, GraphicsPipelineDesc, InputLayout, PipelineBindPoint,
    PipelineState, PipelineStateHandle, PrimitiveTopology, RasterizerState, RenderTargetFormats,
    StencilOp, VertexAttribute, VertexInputRate, VertexStrideDigest,
};
pub use query::{QueryHeap, QueryHeapDesc, QueryHeapHandle, QueryKind};
pub use raytracing::{
    AccelerationStructure, AccelerationStructureDesc, AccelerationStructureGeometry,
    AccelerationStructureHandle, AccelerationStructureInstance, HitGroup, RaytracingPipelineDesc,
};
pub use render_pass::{
    AttachmentKind, LoadOp, RenderPass, RenderPassAttachment, RenderPassDesc, RenderPassHandle,
    ResourceLayout, StoreOp,
};
pub use sampler::{
    AddressMode, BorderColor, CompareOp, FilterMode, Sampler, SamplerDesc, SamplerHandle,
};
pub use shader::{Shader, ShaderDesc, ShaderHandle, ShaderStage};
pub use swapchain::{SwapChain, SwapChainDesc, SwapChainHandle, WindowSource};
pub use texture::{
    Texture, TextureData, TextureDesc, TextureDimension, TextureHandle, TextureLayerData,
    TextureUsage, TextureView, TextureViewDesc,
};
pub use types::{
    BackendKind, ClearValue, DeviceCapabilities, DeviceConfig, IndexFormat, QueueKind, Rect2D,
    ShadingRate, ValidationMode, Viewport, BACK_BUFFER_COUNT, BINDING_SHIFT_B, BINDING_SHIFT_S,
    BINDING_SHIFT_T, BINDING_SHIFT_U, BINDLESS_RESOURCE_CAPACITY, BINDLESS_SAMPLER_CAPACITY,
    DEFAULT_COMMAND_BUFFERS_PER_FRAME, MAX_FRAMES_IN_FLIGHT, PER_DRAW_SLOT_CAPACITY,
    PUSH_CONSTANT_CAPACITY,
};
