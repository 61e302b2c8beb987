//! D3D12 pipeline states
//!
//! Vertex strides live in the vertex-buffer view at bind time, so graphics
//! pipelines compile eagerly; there are no stride variants. Mesh pipelines
//! go through the pipeline-state-stream path since the classic graphics desc
//! cannot carry a mesh shader. The draw topology is kept beside the state
//! object because D3D12 splits it from the pipeline.

use std::sync::Arc;

use windows::core::s;
use windows::Win32::Foundation::BOOL;
use windows::Win32::Graphics::Direct3D::D3D_PRIMITIVE_TOPOLOGY;
use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::Graphics::Dxgi::Common::{DXGI_FORMAT, DXGI_SAMPLE_DESC};

use astral_rhi::{
    rhi_err, ComputePipelineDesc, DepthStencilState, GraphicsPipelineDesc, PipelineBindPoint,
    PipelineState, RhiResult, Shader, ShaderStage,
};

use crate::d3d12_context::GpuContext;
use crate::d3d12_convert::{
    blend_factor_to_d3d12, blend_op_to_d3d12, compare_op_to_d3d12, cull_mode_to_d3d12,
    fill_mode_to_d3d12, format_to_dxgi, stencil_op_to_d3d12, topology_to_d3d12,
    topology_type_to_d3d12, vertex_input_rate_to_d3d12,
};
use crate::d3d12_destroy::Zombie;
use crate::d3d12_shader::D3d12Shader;

/// D3D12 pipeline state
pub struct D3d12Pipeline {
    pub(crate) pso: ID3D12PipelineState,
    /// Topology applied at bind time; undefined for compute
    pub(crate) topology: D3D_PRIMITIVE_TOPOLOGY,
    key: u64,
    bind_point: PipelineBindPoint,
    ctx: Arc<GpuContext>,
}

fn dxil(shader: &astral_rhi::ShaderHandle) -> D3D12_SHADER_BYTECODE {
    shader
        .as_any()
        .downcast_ref::<D3d12Shader>()
        .map(|s| s.dxil())
        .unwrap_or_default()
}

fn blend_desc(desc: &GraphicsPipelineDesc) -> D3D12_BLEND_DESC {
    let mut blend = D3D12_BLEND_DESC {
        AlphaToCoverageEnable: BOOL::from(desc.blend.alpha_to_coverage),
        IndependentBlendEnable: BOOL::from(true),
        ..Default::default()
    };
    for (i, slot) in blend.RenderTarget.iter_mut().enumerate() {
        let target = desc.blend.targets.get(i).copied().unwrap_or_default();
        *slot = D3D12_RENDER_TARGET_BLEND_DESC {
            BlendEnable: BOOL::from(target.blend_enable),
            LogicOpEnable: BOOL::from(false),
            SrcBlend: blend_factor_to_d3d12(target.src_color),
            DestBlend: blend_factor_to_d3d12(target.dst_color),
            BlendOp: blend_op_to_d3d12(target.color_op),
            SrcBlendAlpha: blend_factor_to_d3d12(target.src_alpha),
            DestBlendAlpha: blend_factor_to_d3d12(target.dst_alpha),
            BlendOpAlpha: blend_op_to_d3d12(target.alpha_op),
            LogicOp: D3D12_LOGIC_OP_NOOP,
            RenderTargetWriteMask: target.write_mask,
        };
    }
    blend
}

fn rasterizer_desc(desc: &GraphicsPipelineDesc) -> D3D12_RASTERIZER_DESC {
    let raster = &desc.rasterizer;
    D3D12_RASTERIZER_DESC {
        FillMode: fill_mode_to_d3d12(raster.fill_mode),
        CullMode: cull_mode_to_d3d12(raster.cull_mode),
        FrontCounterClockwise: BOOL::from(raster.front_counter_clockwise),
        DepthBias: raster.depth_bias as i32,
        DepthBiasClamp: 0.0,
        SlopeScaledDepthBias: raster.depth_bias_slope,
        DepthClipEnable: BOOL::from(raster.depth_clip),
        MultisampleEnable: BOOL::from(desc.render_target_formats.sample_count > 1),
        AntialiasedLineEnable: BOOL::from(false),
        ForcedSampleCount: 0,
        ConservativeRaster: D3D12_CONSERVATIVE_RASTERIZATION_MODE_OFF,
    }
}

fn depth_stencil_desc(ds: &DepthStencilState) -> D3D12_DEPTH_STENCIL_DESC {
    let stencil_face = |fail, depth_fail, pass, compare| D3D12_DEPTH_STENCILOP_DESC {
        StencilFailOp: stencil_op_to_d3d12(fail),
        StencilDepthFailOp: stencil_op_to_d3d12(depth_fail),
        StencilPassOp: stencil_op_to_d3d12(pass),
        StencilFunc: compare_op_to_d3d12(compare),
    };
    D3D12_DEPTH_STENCIL_DESC {
        DepthEnable: BOOL::from(ds.depth_test),
        DepthWriteMask: if ds.depth_write {
            D3D12_DEPTH_WRITE_MASK_ALL
        } else {
            D3D12_DEPTH_WRITE_MASK_ZERO
        },
        DepthFunc: compare_op_to_d3d12(ds.depth_compare),
        StencilEnable: BOOL::from(ds.stencil_test),
        StencilReadMask: ds.stencil_read_mask,
        StencilWriteMask: ds.stencil_write_mask,
        FrontFace: stencil_face(
            ds.front_fail,
            ds.front_depth_fail,
            ds.front_pass,
            ds.front_compare,
        ),
        BackFace: stencil_face(
            ds.back_fail,
            ds.back_depth_fail,
            ds.back_pass,
            ds.back_compare,
        ),
    }
}

fn render_target_formats(desc: &GraphicsPipelineDesc) -> ([DXGI_FORMAT; 8], u32, DXGI_FORMAT) {
    let mut rtv_formats = [DXGI_FORMAT::default(); 8];
    let count = desc.render_target_formats.color.len().min(8);
    for (slot, format) in rtv_formats.iter_mut().zip(&desc.render_target_formats.color) {
        *slot = format_to_dxgi(*format);
    }
    let dsv_format = desc
        .render_target_formats
        .depth_stencil
        .map(format_to_dxgi)
        .unwrap_or_default();
    (rtv_formats, count as u32, dsv_format)
}

/// One pipeline-state-stream subobject; each entry aligns to pointer size
#[repr(C, align(8))]
struct StreamSubobject<T> {
    ty: D3D12_PIPELINE_STATE_SUBOBJECT_TYPE,
    value: T,
}

/// Stream layout for mesh pipelines
#[repr(C)]
struct MeshPipelineStream {
    root_signature: StreamSubobject<*const std::ffi::c_void>,
    mesh_shader: StreamSubobject<D3D12_SHADER_BYTECODE>,
    pixel_shader: StreamSubobject<D3D12_SHADER_BYTECODE>,
    blend: StreamSubobject<D3D12_BLEND_DESC>,
    sample_mask: StreamSubobject<u32>,
    rasterizer: StreamSubobject<D3D12_RASTERIZER_DESC>,
    depth_stencil: StreamSubobject<D3D12_DEPTH_STENCIL_DESC>,
    topology_type: StreamSubobject<D3D12_PRIMITIVE_TOPOLOGY_TYPE>,
    rtv_formats: StreamSubobject<D3D12_RT_FORMAT_ARRAY>,
    dsv_format: StreamSubobject<DXGI_FORMAT>,
    sample_desc: StreamSubobject<DXGI_SAMPLE_DESC>,
}

impl D3d12Pipeline {
    pub fn graphics(ctx: Arc<GpuContext>, desc: GraphicsPipelineDesc) -> RhiResult<Self> {
        let pso = if desc.vertex_shader.stage() == ShaderStage::Mesh {
            Self::create_mesh_pso(&ctx, &desc)?
        } else {
            Self::create_vertex_pso(&ctx, &desc)?
        };
        ctx.set_object_name(&pso, desc.debug_name.as_deref());

        Ok(Self {
            pso,
            topology: topology_to_d3d12(desc.topology),
            key: desc.cache_key(),
            bind_point: PipelineBindPoint::Graphics,
            ctx,
        })
    }

    fn create_vertex_pso(
        ctx: &GpuContext,
        desc: &GraphicsPipelineDesc,
    ) -> RhiResult<ID3D12PipelineState> {
        // HLSL vertex inputs use ATTRIBUTEn semantics, n being the location
        let input_elements: Vec<D3D12_INPUT_ELEMENT_DESC> = desc
            .input_layout
            .attributes
            .iter()
            .map(|attr| {
                let per_instance = vertex_input_rate_to_d3d12(attr.input_rate)
                    == D3D12_INPUT_CLASSIFICATION_PER_INSTANCE_DATA;
                D3D12_INPUT_ELEMENT_DESC {
                    SemanticName: s!("ATTRIBUTE"),
                    SemanticIndex: attr.location,
                    Format: format_to_dxgi(attr.format),
                    InputSlot: attr.binding,
                    AlignedByteOffset: attr.offset,
                    InputSlotClass: vertex_input_rate_to_d3d12(attr.input_rate),
                    InstanceDataStepRate: u32::from(per_instance),
                }
            })
            .collect();

        let (rtv_formats, num_render_targets, dsv_format) = render_target_formats(desc);
        let sample_count = desc.render_target_formats.sample_count.max(1);

        let pso_desc = D3D12_GRAPHICS_PIPELINE_STATE_DESC {
            // Borrowed reference; the field does not own it
            pRootSignature: unsafe { std::mem::transmute_copy(ctx.bindless.root_signature()) },
            VS: dxil(&desc.vertex_shader),
            PS: desc.pixel_shader.as_ref().map(dxil).unwrap_or_default(),
            BlendState: blend_desc(desc),
            SampleMask: desc.sample_mask,
            RasterizerState: rasterizer_desc(desc),
            DepthStencilState: depth_stencil_desc(&desc.depth_stencil),
            InputLayout: D3D12_INPUT_LAYOUT_DESC {
                pInputElementDescs: input_elements.as_ptr(),
                NumElements: input_elements.len() as u32,
            },
            PrimitiveTopologyType: topology_type_to_d3d12(desc.topology),
            NumRenderTargets: num_render_targets,
            RTVFormats: rtv_formats,
            DSVFormat: dsv_format,
            SampleDesc: DXGI_SAMPLE_DESC {
                Count: sample_count,
                Quality: 0,
            },
            ..Default::default()
        };

        unsafe {
            ctx.device
                .CreateGraphicsPipelineState(&pso_desc)
                .map_err(|e| rhi_err!("Failed to create graphics pipeline: {:?}", e))
        }
    }

    fn create_mesh_pso(
        ctx: &GpuContext,
        desc: &GraphicsPipelineDesc,
    ) -> RhiResult<ID3D12PipelineState> {
        if !ctx.mesh_shading {
            return Err(rhi_err!("Mesh shaders are not supported by this adapter"));
        }
        let (rtv_formats, num_render_targets, dsv_format) = render_target_formats(desc);
        let sample_count = desc.render_target_formats.sample_count.max(1);

        let sub = |ty, value| StreamSubobject { ty, value };
        let mut stream = MeshPipelineStream {
            root_signature: sub(
                D3D12_PIPELINE_STATE_SUBOBJECT_TYPE_ROOT_SIGNATURE,
                unsafe { std::mem::transmute_copy(ctx.bindless.root_signature()) },
            ),
            mesh_shader: sub(D3D12_PIPELINE_STATE_SUBOBJECT_TYPE_MS, dxil(&desc.vertex_shader)),
            pixel_shader: sub(
                D3D12_PIPELINE_STATE_SUBOBJECT_TYPE_PS,
                desc.pixel_shader.as_ref().map(dxil).unwrap_or_default(),
            ),
            blend: sub(D3D12_PIPELINE_STATE_SUBOBJECT_TYPE_BLEND, blend_desc(desc)),
            sample_mask: sub(D3D12_PIPELINE_STATE_SUBOBJECT_TYPE_SAMPLE_MASK, desc.sample_mask),
            rasterizer: sub(
                D3D12_PIPELINE_STATE_SUBOBJECT_TYPE_RASTERIZER,
                rasterizer_desc(desc),
            ),
            depth_stencil: sub(
                D3D12_PIPELINE_STATE_SUBOBJECT_TYPE_DEPTH_STENCIL,
                depth_stencil_desc(&desc.depth_stencil),
            ),
            topology_type: sub(
                D3D12_PIPELINE_STATE_SUBOBJECT_TYPE_PRIMITIVE_TOPOLOGY,
                topology_type_to_d3d12(desc.topology),
            ),
            rtv_formats: sub(
                D3D12_PIPELINE_STATE_SUBOBJECT_TYPE_RENDER_TARGET_FORMATS,
                D3D12_RT_FORMAT_ARRAY {
                    RTFormats: rtv_formats,
                    NumRenderTargets: num_render_targets,
                },
            ),
            dsv_format: sub(
                D3D12_PIPELINE_STATE_SUBOBJECT_TYPE_DEPTH_STENCIL_FORMAT,
                dsv_format,
            ),
            sample_desc: sub(
                D3D12_PIPELINE_STATE_SUBOBJECT_TYPE_SAMPLE_DESC,
                DXGI_SAMPLE_DESC {
                    Count: sample_count,
                    Quality: 0,
                },
            ),
        };

        let stream_desc = D3D12_PIPELINE_STATE_STREAM_DESC {
            SizeInBytes: std::mem::size_of::<MeshPipelineStream>(),
            pPipelineStateSubobjectStream: &mut stream as *mut _ as *mut std::ffi::c_void,
        };

        unsafe {
            ctx.device
                .CreatePipelineState(&stream_desc)
                .map_err(|e| rhi_err!("Failed to create mesh pipeline: {:?}", e))
        }
    }

    pub fn compute(ctx: Arc<GpuContext>, desc: ComputePipelineDesc) -> RhiResult<Self> {
        let pso_desc = D3D12_COMPUTE_PIPELINE_STATE_DESC {
            pRootSignature: unsafe { std::mem::transmute_copy(ctx.bindless.root_signature()) },
            CS: dxil(&desc.compute_shader),
            ..Default::default()
        };

        let pso: ID3D12PipelineState = unsafe {
            ctx.device
                .CreateComputePipelineState(&pso_desc)
                .map_err(|e| rhi_err!("Failed to create compute pipeline: {:?}", e))?
        };
        ctx.set_object_name(&pso, desc.debug_name.as_deref());

        Ok(Self {
            pso,
            topology: D3D_PRIMITIVE_TOPOLOGY::default(),
            key: desc.cache_key(),
            bind_point: PipelineBindPoint::Compute,
            ctx,
        })
    }
}

impl PipelineState for D3d12Pipeline {
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

impl Drop for D3d12Pipeline {
    fn drop(&mut self) {
        self.ctx.destroy.push(Zombie::Pipeline(self.pso.clone()));
    }
}
