//! Pipeline state descriptors and cache keys
//!
//! A pipeline state is an immutable combination of shader stages, input
//! layout, rasterizer, blend, depth-stencil, topology and sample mask. It is
//! hashed on creation; the vertex-stride digest is combined at bind time
//! because strides come from the vertex-buffer binding call, not the PSO.

use std::hash::{Hash, Hasher};
use std::sync::Arc;

use rustc_hash::FxHasher;

use crate::format::PixelFormat;
use crate::shader::ShaderHandle;

/// Primitive assembly topology
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PrimitiveTopology {
    PointList,
    LineList,
    LineStrip,
    #[default]
    TriangleList,
    TriangleStrip,
}

/// Polygon fill mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FillMode {
    #[default]
    Solid,
    Wireframe,
}

/// Face culling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CullMode {
    None,
    Front,
    #[default]
    Back,
}

/// Rasterizer state
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RasterizerState {
    pub fill_mode: FillMode,
    pub cull_mode: CullMode,
    pub front_counter_clockwise: bool,
    pub depth_bias: f32,
    pub depth_bias_slope: f32,
    pub depth_clip: bool,
}

impl Default for RasterizerState {
    fn default() -> Self {
        Self {
            fill_mode: FillMode::Solid,
            cull_mode: CullMode::Back,
            front_counter_clockwise: true,
            depth_bias: 0.0,
            depth_bias_slope: 0.0,
            depth_clip: true,
        }
    }
}

impl RasterizerState {
    fn hash_into(&self, hasher: &mut impl Hasher) {
        self.fill_mode.hash(hasher);
        self.cull_mode.hash(hasher);
        self.front_counter_clockwise.hash(hasher);
        self.depth_bias.to_bits().hash(hasher);
        self.depth_bias_slope.to_bits().hash(hasher);
        self.depth_clip.hash(hasher);
    }
}

/// Blend factor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlendFactor {
    Zero,
    One,
    SrcColor,
    InvSrcColor,
    SrcAlpha,
    InvSrcAlpha,
    DstColor,
    InvDstColor,
    DstAlpha,
    InvDstAlpha,
    BlendConstant,
    InvBlendConstant,
}

/// Blend operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BlendOp {
    #[default]
    Add,
    Subtract,
    ReverseSubtract,
    Min,
    Max,
}

/// Per-render-target blend state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlendTargetState {
    pub blend_enable: bool,
    pub src_color: BlendFactor,
    pub dst_color: BlendFactor,
    pub color_op: BlendOp,
    pub src_alpha: BlendFactor,
    pub dst_alpha: BlendFactor,
    pub alpha_op: BlendOp,
    /// RGBA write mask bits
    pub write_mask: u8,
}

impl Default for BlendTargetState {
    fn default() -> Self {
        Self {
            blend_enable: false,
            src_color: BlendFactor::One,
            dst_color: BlendFactor::Zero,
            color_op: BlendOp::Add,
            src_alpha: BlendFactor::One,
            dst_alpha: BlendFactor::Zero,
            alpha_op: BlendOp::Add,
            write_mask: 0b1111,
        }
    }
}

/// Blend state across all render targets
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct BlendState {
    pub targets: Vec<BlendTargetState>,
    pub alpha_to_coverage: bool,
}

/// Stencil face operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StencilOp {
    Keep,
    Zero,
    Replace,
    IncrementClamp,
    DecrementClamp,
    Invert,
    IncrementWrap,
    DecrementWrap,
}

/// Depth-stencil state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DepthStencilState {
    pub depth_test: bool,
    pub depth_write: bool,
    pub depth_compare: crate::sampler::CompareOp,
    pub stencil_test: bool,
    pub stencil_read_mask: u8,
    pub stencil_write_mask: u8,
    pub front_fail: StencilOp,
    pub front_depth_fail: StencilOp,
    pub front_pass: StencilOp,
    pub front_compare: crate::sampler::CompareOp,
    pub back_fail: StencilOp,
    pub back_depth_fail: StencilOp,
    pub back_pass: StencilOp,
    pub back_compare: crate::sampler::CompareOp,
}

impl Default for DepthStencilState {
    fn default() -> Self {
        use crate::sampler::CompareOp;
        Self {
            depth_test: false,
            depth_write: false,
            depth_compare: CompareOp::LessOrEqual,
            stencil_test: false,
            stencil_read_mask: 0xff,
            stencil_write_mask: 0xff,
            front_fail: StencilOp::Keep,
            front_depth_fail: StencilOp::Keep,
            front_pass: StencilOp::Keep,
            front_compare: CompareOp::Always,
            back_fail: StencilOp::Keep,
            back_depth_fail: StencilOp::Keep,
            back_pass: StencilOp::Keep,
            back_compare: CompareOp::Always,
        }
    }
}

/// Whether a vertex buffer advances per vertex or per instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum VertexInputRate {
    #[default]
    Vertex,
    Instance,
}

/// One vertex attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VertexAttribute {
    pub location: u32,
    /// Vertex buffer slot the attribute reads from
    pub binding: u32,
    pub format: PixelFormat,
    pub offset: u32,
    pub input_rate: VertexInputRate,
}

/// Vertex input layout.
///
/// Strides are intentionally absent: they are supplied by the vertex-buffer
/// binding call and combined into the pipeline key at bind time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct InputLayout {
    pub attributes: Vec<VertexAttribute>,
}

/// Render-target format signature a graphics pipeline is compiled against
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct RenderTargetFormats {
    pub color: Vec<PixelFormat>,
    pub depth_stencil: Option<PixelFormat>,
    pub sample_count: u32,
}

/// Descriptor for a graphics pipeline state
#[derive(Clone)]
pub struct GraphicsPipelineDesc {
    pub vertex_shader: ShaderHandle,
    pub pixel_shader: Option<ShaderHandle>,
    pub input_layout: InputLayout,
    pub rasterizer: RasterizerState,
    pub blend: BlendState,
    pub depth_stencil: DepthStencilState,
    pub topology: PrimitiveTopology,
    pub sample_mask: u32,
    pub render_target_formats: RenderTargetFormats,
    pub debug_name: Option<String>,
}

impl GraphicsPipelineDesc {
    /// Cache key: every field that affects the compiled pipeline except the
    /// vertex strides, which the recorder mixes in at bind time.
    pub fn cache_key(&self) -> u64 {
        let mut hasher = FxHasher::default();
        self.vertex_shader.bytecode_hash().hash(&mut hasher);
        if let Some(ps) = &self.pixel_shader {
            ps.bytecode_hash().hash(&mut hasher);
        }
        self.input_layout.hash(&mut hasher);
        self.rasterizer.hash_into(&mut hasher);
        self.blend.hash(&mut hasher);
        self.depth_stencil.hash(&mut hasher);
        self.topology.hash(&mut hasher);
        self.sample_mask.hash(&mut hasher);
        self.render_target_formats.hash(&mut hasher);
        hasher.finish()
    }
}

/// Descriptor for a compute pipeline state
#[derive(Clone)]
pub struct ComputePipelineDesc {
    pub compute_shader: ShaderHandle,
    pub debug_name: Option<String>,
}

impl ComputePipelineDesc {
    /// Cache key: compute shader identity (the pipeline-layout digest is a
    /// backend constant with bindless layouts)
    pub fn cache_key(&self) -> u64 {
        let mut hasher = FxHasher::default();
        self.compute_shader.bytecode_hash().hash(&mut hasher);
        hasher.finish()
    }
}

/// Combine a pipeline cache key with the vertex-stride digest recorded at
/// bind time. Backends where stride is a pipeline property (Vulkan) use the
/// combined value to select the concrete pipeline.
pub fn combine_stride_digest(cache_key: u64, stride_digest: u64) -> u64 {
    let mut hasher = FxHasher::default();
    cache_key.hash(&mut hasher);
    stride_digest.hash(&mut hasher);
    hasher.finish()
}

/// Running digest of vertex strides and offsets supplied at bind time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VertexStrideDigest(u64);

impl VertexStrideDigest {
    /// Fold one vertex-buffer binding into the digest
    pub fn bind(&mut self, slot: u32, stride: u32) {
        let mut hasher = FxHasher::default();
        self.0.hash(&mut hasher);
        slot.hash(&mut hasher);
        stride.hash(&mut hasher);
        self.0 = hasher.finish();
    }

    pub fn value(self) -> u64 {
        self.0
    }

    pub fn reset(&mut self) {
        self.0 = 0;
    }
}

/// Pipeline state trait, shared by graphics, compute and raytracing states
pub trait PipelineState: Send + Sync {
    /// Cache key the state was created under
    fn cache_key(&self) -> u64;

    /// Which bind point the state targets
    fn bind_point(&self) -> PipelineBindPoint;

    /// Downcast support for backends
    fn as_any(&self) -> &dyn std::any::Any;
}

/// Pipeline bind point
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineBindPoint {
    Graphics,
    Compute,
    Raytracing,
}

/// Shared pipeline handle
pub type PipelineStateHandle = Arc<dyn PipelineState>;

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
#[path = "pipeline_tests.rs"]
mod tests;
