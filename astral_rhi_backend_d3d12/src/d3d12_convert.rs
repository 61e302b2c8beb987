//! RHI-to-D3D12 enum and state conversions
//!
//! Pure mapping functions, no device access. Barrier conversions target the
//! enhanced-barriers API (layout/sync/access triples).

use windows::Win32::Graphics::Direct3D::*;
use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::Graphics::Dxgi::Common::*;

use astral_rhi::{
    AddressMode, BlendFactor, BlendOp, BorderColor, CompareOp, CullMode, FillMode, FilterMode,
    IndexFormat, PixelFormat, PrimitiveTopology, QueryKind, ResourceLayout, SamplerDesc,
    ShadingRate, StencilOp, TextureDimension, VertexInputRate,
};

/// Map an RHI pixel format to the DXGI format with the same bit layout
pub fn format_to_dxgi(format: PixelFormat) -> DXGI_FORMAT {
    use PixelFormat::*;
    match format {
        Undefined => DXGI_FORMAT_UNKNOWN,

        R8Unorm => DXGI_FORMAT_R8_UNORM,
        R8Snorm => DXGI_FORMAT_R8_SNORM,
        R8Uint => DXGI_FORMAT_R8_UINT,
        R8Sint => DXGI_FORMAT_R8_SINT,

        R16Unorm => DXGI_FORMAT_R16_UNORM,
        R16Snorm => DXGI_FORMAT_R16_SNORM,
        R16Uint => DXGI_FORMAT_R16_UINT,
        R16Sint => DXGI_FORMAT_R16_SINT,
        R16Float => DXGI_FORMAT_R16_FLOAT,

        R32Uint => DXGI_FORMAT_R32_UINT,
        R32Sint => DXGI_FORMAT_R32_SINT,
        R32Float => DXGI_FORMAT_R32_FLOAT,

        Rg8Unorm => DXGI_FORMAT_R8G8_UNORM,
        Rg8Snorm => DXGI_FORMAT_R8G8_SNORM,
        Rg8Uint => DXGI_FORMAT_R8G8_UINT,
        Rg8Sint => DXGI_FORMAT_R8G8_SINT,

        Rg16Unorm => DXGI_FORMAT_R16G16_UNORM,
        Rg16Snorm => DXGI_FORMAT_R16G16_SNORM,
        Rg16Uint => DXGI_FORMAT_R16G16_UINT,
        Rg16Sint => DXGI_FORMAT_R16G16_SINT,
        Rg16Float => DXGI_FORMAT_R16G16_FLOAT,

        Rg32Uint => DXGI_FORMAT_R32G32_UINT,
        Rg32Sint => DXGI_FORMAT_R32G32_SINT,
        Rg32Float => DXGI_FORMAT_R32G32_FLOAT,

        Rgba8Unorm => DXGI_FORMAT_R8G8B8A8_UNORM,
        Rgba8UnormSrgb => DXGI_FORMAT_R8G8B8A8_UNORM_SRGB,
        Rgba8Snorm => DXGI_FORMAT_R8G8B8A8_SNORM,
        Rgba8Uint => DXGI_FORMAT_R8G8B8A8_UINT,
        Rgba8Sint => DXGI_FORMAT_R8G8B8A8_SINT,
        Bgra8Unorm => DXGI_FORMAT_B8G8R8A8_UNORM,
        Bgra8UnormSrgb => DXGI_FORMAT_B8G8R8A8_UNORM_SRGB,

        Rgba16Unorm => DXGI_FORMAT_R16G16B16A16_UNORM,
        Rgba16Snorm => DXGI_FORMAT_R16G16B16A16_SNORM,
        Rgba16Uint => DXGI_FORMAT_R16G16B16A16_UINT,
        Rgba16Sint => DXGI_FORMAT_R16G16B16A16_SINT,
        Rgba16Float => DXGI_FORMAT_R16G16B16A16_FLOAT,

        Rgba32Uint => DXGI_FORMAT_R32G32B32A32_UINT,
        Rgba32Sint => DXGI_FORMAT_R32G32B32A32_SINT,
        Rgba32Float => DXGI_FORMAT_R32G32B32A32_FLOAT,

        Rgb10a2Unorm => DXGI_FORMAT_R10G10B10A2_UNORM,
        Rg11b10Float => DXGI_FORMAT_R11G11B10_FLOAT,
        Rgb9e5Float => DXGI_FORMAT_R9G9B9E5_SHAREDEXP,
        Bgra4Unorm => DXGI_FORMAT_B4G4R4A4_UNORM,
        B5g6r5Unorm => DXGI_FORMAT_B5G6R5_UNORM,
        B5g5r5a1Unorm => DXGI_FORMAT_B5G5R5A1_UNORM,

        Depth16Unorm => DXGI_FORMAT_D16_UNORM,
        Depth32Float => DXGI_FORMAT_D32_FLOAT,
        Depth24UnormStencil8 => DXGI_FORMAT_D24_UNORM_S8_UINT,
        Depth32FloatStencil8 => DXGI_FORMAT_D32_FLOAT_S8X24_UINT,

        Bc1RgbaUnorm => DXGI_FORMAT_BC1_UNORM,
        Bc1RgbaUnormSrgb => DXGI_FORMAT_BC1_UNORM_SRGB,
        Bc2RgbaUnorm => DXGI_FORMAT_BC2_UNORM,
        Bc2RgbaUnormSrgb => DXGI_FORMAT_BC2_UNORM_SRGB,
        Bc3RgbaUnorm => DXGI_FORMAT_BC3_UNORM,
        Bc3RgbaUnormSrgb => DXGI_FORMAT_BC3_UNORM_SRGB,
        Bc4RUnorm => DXGI_FORMAT_BC4_UNORM,
        Bc4RSnorm => DXGI_FORMAT_BC4_SNORM,
        Bc5RgUnorm => DXGI_FORMAT_BC5_UNORM,
        Bc5RgSnorm => DXGI_FORMAT_BC5_SNORM,
        Bc6hRgbUfloat => DXGI_FORMAT_BC6H_UF16,
        Bc6hRgbSfloat => DXGI_FORMAT_BC6H_SF16,
        Bc7RgbaUnorm => DXGI_FORMAT_BC7_UNORM,
        Bc7RgbaUnormSrgb => DXGI_FORMAT_BC7_UNORM_SRGB,
    }
}

/// Typeless resource format for a depth format, required so the same
/// resource can carry both a DSV and a shader-read SRV
pub fn depth_typeless_dxgi(format: PixelFormat) -> DXGI_FORMAT {
    use PixelFormat::*;
    match format {
        Depth16Unorm => DXGI_FORMAT_R16_TYPELESS,
        Depth32Float => DXGI_FORMAT_R32_TYPELESS,
        Depth24UnormStencil8 => DXGI_FORMAT_R24G8_TYPELESS,
        Depth32FloatStencil8 => DXGI_FORMAT_R32G8X24_TYPELESS,
        other => format_to_dxgi(other),
    }
}

/// SRV format a typeless depth resource is read as
pub fn depth_srv_dxgi(format: PixelFormat) -> DXGI_FORMAT {
    use PixelFormat::*;
    match format {
        Depth16Unorm => DXGI_FORMAT_R16_UNORM,
        Depth32Float => DXGI_FORMAT_R32_FLOAT,
        Depth24UnormStencil8 => DXGI_FORMAT_R24_UNORM_X8_TYPELESS,
        Depth32FloatStencil8 => DXGI_FORMAT_R32_FLOAT_X8X24_TYPELESS,
        other => format_to_dxgi(other),
    }
}

/// Enhanced-barrier layout for a resource layout
pub fn layout_to_d3d12(layout: ResourceLayout) -> D3D12_BARRIER_LAYOUT {
    match layout {
        ResourceLayout::Undefined => D3D12_BARRIER_LAYOUT_UNDEFINED,
        ResourceLayout::RenderTarget => D3D12_BARRIER_LAYOUT_RENDER_TARGET,
        ResourceLayout::DepthWrite => D3D12_BARRIER_LAYOUT_DEPTH_STENCIL_WRITE,
        ResourceLayout::DepthRead => D3D12_BARRIER_LAYOUT_DEPTH_STENCIL_READ,
        ResourceLayout::ShaderRead => D3D12_BARRIER_LAYOUT_SHADER_RESOURCE,
        ResourceLayout::Present => D3D12_BARRIER_LAYOUT_PRESENT,
        ResourceLayout::CopySrc => D3D12_BARRIER_LAYOUT_COPY_SOURCE,
        ResourceLayout::CopyDst => D3D12_BARRIER_LAYOUT_COPY_DEST,
        ResourceLayout::General => D3D12_BARRIER_LAYOUT_UNORDERED_ACCESS,
    }
}

/// Sync scope a layout is used in
pub fn layout_sync_to_d3d12(layout: ResourceLayout) -> D3D12_BARRIER_SYNC {
    match layout {
        ResourceLayout::Undefined => D3D12_BARRIER_SYNC_NONE,
        ResourceLayout::RenderTarget => D3D12_BARRIER_SYNC_RENDER_TARGET,
        ResourceLayout::DepthWrite | ResourceLayout::DepthRead => D3D12_BARRIER_SYNC_DEPTH_STENCIL,
        ResourceLayout::ShaderRead => D3D12_BARRIER_SYNC_ALL_SHADING,
        ResourceLayout::Present => D3D12_BARRIER_SYNC_ALL,
        ResourceLayout::CopySrc | ResourceLayout::CopyDst => D3D12_BARRIER_SYNC_COPY,
        ResourceLayout::General => D3D12_BARRIER_SYNC_ALL_SHADING,
    }
}

/// Access mask for a layout
pub fn layout_access_to_d3d12(layout: ResourceLayout) -> D3D12_BARRIER_ACCESS {
    match layout {
        ResourceLayout::Undefined => D3D12_BARRIER_ACCESS_NO_ACCESS,
        ResourceLayout::RenderTarget => D3D12_BARRIER_ACCESS_RENDER_TARGET,
        ResourceLayout::DepthWrite => {
            D3D12_BARRIER_ACCESS_DEPTH_STENCIL_READ | D3D12_BARRIER_ACCESS_DEPTH_STENCIL_WRITE
        }
        ResourceLayout::DepthRead => D3D12_BARRIER_ACCESS_DEPTH_STENCIL_READ,
        ResourceLayout::ShaderRead => D3D12_BARRIER_ACCESS_SHADER_RESOURCE,
        ResourceLayout::Present => D3D12_BARRIER_ACCESS_COMMON,
        ResourceLayout::CopySrc => D3D12_BARRIER_ACCESS_COPY_SOURCE,
        ResourceLayout::CopyDst => D3D12_BARRIER_ACCESS_COPY_DEST,
        ResourceLayout::General => D3D12_BARRIER_ACCESS_UNORDERED_ACCESS,
    }
}

/// Combined D3D12 filter from the sampler's min/mag/mip filters.
///
/// Anisotropy overrides the per-axis filters; a compare op selects the
/// comparison filter family.
pub fn filter_to_d3d12(desc: &SamplerDesc) -> D3D12_FILTER {
    if desc.max_anisotropy > 1.0 {
        return if desc.compare.is_some() {
            D3D12_FILTER_COMPARISON_ANISOTROPIC
        } else {
            D3D12_FILTER_ANISOTROPIC
        };
    }
    let bit = |filter: FilterMode| matches!(filter, FilterMode::Linear) as i32;
    // D3D12_FILTER bit layout: mip at bit 0, mag at bit 2, min at bit 4,
    // comparison at bit 7
    let mut filter = (bit(desc.min_filter) << 4) | (bit(desc.mag_filter) << 2) | bit(desc.mip_filter);
    if desc.compare.is_some() {
        filter |= 0x80;
    }
    D3D12_FILTER(filter)
}

pub fn address_mode_to_d3d12(mode: AddressMode) -> D3D12_TEXTURE_ADDRESS_MODE {
    match mode {
        AddressMode::Repeat => D3D12_TEXTURE_ADDRESS_MODE_WRAP,
        AddressMode::MirroredRepeat => D3D12_TEXTURE_ADDRESS_MODE_MIRROR,
        AddressMode::ClampToEdge => D3D12_TEXTURE_ADDRESS_MODE_CLAMP,
        AddressMode::ClampToBorder => D3D12_TEXTURE_ADDRESS_MODE_BORDER,
    }
}

pub fn compare_op_to_d3d12(op: CompareOp) -> D3D12_COMPARISON_FUNC {
    match op {
        CompareOp::Never => D3D12_COMPARISON_FUNC_NEVER,
        CompareOp::Less => D3D12_COMPARISON_FUNC_LESS,
        CompareOp::Equal => D3D12_COMPARISON_FUNC_EQUAL,
        CompareOp::LessOrEqual => D3D12_COMPARISON_FUNC_LESS_EQUAL,
        CompareOp::Greater => D3D12_COMPARISON_FUNC_GREATER,
        CompareOp::NotEqual => D3D12_COMPARISON_FUNC_NOT_EQUAL,
        CompareOp::GreaterOrEqual => D3D12_COMPARISON_FUNC_GREATER_EQUAL,
        CompareOp::Always => D3D12_COMPARISON_FUNC_ALWAYS,
    }
}

pub fn border_color_to_d3d12(color: BorderColor) -> [f32; 4] {
    match color {
        BorderColor::TransparentBlack => [0.0, 0.0, 0.0, 0.0],
        BorderColor::OpaqueBlack => [0.0, 0.0, 0.0, 1.0],
        BorderColor::OpaqueWhite => [1.0, 1.0, 1.0, 1.0],
    }
}

/// Topology used at draw time
pub fn topology_to_d3d12(topology: PrimitiveTopology) -> D3D_PRIMITIVE_TOPOLOGY {
    match topology {
        PrimitiveTopology::PointList => D3D_PRIMITIVE_TOPOLOGY_POINTLIST,
        PrimitiveTopology::LineList => D3D_PRIMITIVE_TOPOLOGY_LINELIST,
        PrimitiveTopology::LineStrip => D3D_PRIMITIVE_TOPOLOGY_LINESTRIP,
        PrimitiveTopology::TriangleList => D3D_PRIMITIVE_TOPOLOGY_TRIANGLELIST,
        PrimitiveTopology::TriangleStrip => D3D_PRIMITIVE_TOPOLOGY_TRIANGLESTRIP,
    }
}

/// Topology class baked into the pipeline state
pub fn topology_type_to_d3d12(topology: PrimitiveTopology) -> D3D12_PRIMITIVE_TOPOLOGY_TYPE {
    match topology {
        PrimitiveTopology::PointList => D3D12_PRIMITIVE_TOPOLOGY_TYPE_POINT,
        PrimitiveTopology::LineList | PrimitiveTopology::LineStrip => {
            D3D12_PRIMITIVE_TOPOLOGY_TYPE_LINE
        }
        PrimitiveTopology::TriangleList | PrimitiveTopology::TriangleStrip => {
            D3D12_PRIMITIVE_TOPOLOGY_TYPE_TRIANGLE
        }
    }
}

pub fn fill_mode_to_d3d12(mode: FillMode) -> D3D12_FILL_MODE {
    match mode {
        FillMode::Solid => D3D12_FILL_MODE_SOLID,
        FillMode::Wireframe => D3D12_FILL_MODE_WIREFRAME,
    }
}

pub fn cull_mode_to_d3d12(mode: CullMode) -> D3D12_CULL_MODE {
    match mode {
        CullMode::None => D3D12_CULL_MODE_NONE,
        CullMode::Front => D3D12_CULL_MODE_FRONT,
        CullMode::Back => D3D12_CULL_MODE_BACK,
    }
}

pub fn blend_factor_to_d3d12(factor: BlendFactor) -> D3D12_BLEND {
    match factor {
        BlendFactor::Zero => D3D12_BLEND_ZERO,
        BlendFactor::One => D3D12_BLEND_ONE,
        BlendFactor::SrcColor => D3D12_BLEND_SRC_COLOR,
        BlendFactor::InvSrcColor => D3D12_BLEND_INV_SRC_COLOR,
        BlendFactor::SrcAlpha => D3D12_BLEND_SRC_ALPHA,
        BlendFactor::InvSrcAlpha => D3D12_BLEND_INV_SRC_ALPHA,
        BlendFactor::DstColor => D3D12_BLEND_DEST_COLOR,
        BlendFactor::InvDstColor => D3D12_BLEND_INV_DEST_COLOR,
        BlendFactor::DstAlpha => D3D12_BLEND_DEST_ALPHA,
        BlendFactor::InvDstAlpha => D3D12_BLEND_INV_DEST_ALPHA,
        BlendFactor::BlendConstant => D3D12_BLEND_BLEND_FACTOR,
        BlendFactor::InvBlendConstant => D3D12_BLEND_INV_BLEND_FACTOR,
    }
}

pub fn blend_op_to_d3d12(op: BlendOp) -> D3D12_BLEND_OP {
    match op {
        BlendOp::Add => D3D12_BLEND_OP_ADD,
        BlendOp::Subtract => D3D12_BLEND_OP_SUBTRACT,
        BlendOp::ReverseSubtract => D3D12_BLEND_OP_REV_SUBTRACT,
        BlendOp::Min => D3D12_BLEND_OP_MIN,
        BlendOp::Max => D3D12_BLEND_OP_MAX,
    }
}

pub fn stencil_op_to_d3d12(op: StencilOp) -> D3D12_STENCIL_OP {
    match op {
        StencilOp::Keep => D3D12_STENCIL_OP_KEEP,
        StencilOp::Zero => D3D12_STENCIL_OP_ZERO,
        StencilOp::Replace => D3D12_STENCIL_OP_REPLACE,
        StencilOp::IncrementClamp => D3D12_STENCIL_OP_INCR_SAT,
        StencilOp::DecrementClamp => D3D12_STENCIL_OP_DECR_SAT,
        StencilOp::Invert => D3D12_STENCIL_OP_INVERT,
        StencilOp::IncrementWrap => D3D12_STENCIL_OP_INCR,
        StencilOp::DecrementWrap => D3D12_STENCIL_OP_DECR,
    }
}

pub fn vertex_input_rate_to_d3d12(rate: VertexInputRate) -> D3D12_INPUT_CLASSIFICATION {
    match rate {
        VertexInputRate::Vertex => D3D12_INPUT_CLASSIFICATION_PER_VERTEX_DATA,
        VertexInputRate::Instance => D3D12_INPUT_CLASSIFICATION_PER_INSTANCE_DATA,
    }
}

pub fn index_format_to_dxgi(format: IndexFormat) -> DXGI_FORMAT {
    match format {
        IndexFormat::Uint16 => DXGI_FORMAT_R16_UINT,
        IndexFormat::Uint32 => DXGI_FORMAT_R32_UINT,
    }
}

pub fn query_heap_type_to_d3d12(kind: QueryKind) -> D3D12_QUERY_HEAP_TYPE {
    match kind {
        QueryKind::Timestamp => D3D12_QUERY_HEAP_TYPE_TIMESTAMP,
        QueryKind::Occlusion | QueryKind::BinaryOcclusion => D3D12_QUERY_HEAP_TYPE_OCCLUSION,
        QueryKind::PipelineStatistics => D3D12_QUERY_HEAP_TYPE_PIPELINE_STATISTICS,
    }
}

pub fn query_type_to_d3d12(kind: QueryKind) -> D3D12_QUERY_TYPE {
    match kind {
        QueryKind::Timestamp => D3D12_QUERY_TYPE_TIMESTAMP,
        QueryKind::Occlusion => D3D12_QUERY_TYPE_OCCLUSION,
        QueryKind::BinaryOcclusion => D3D12_QUERY_TYPE_BINARY_OCCLUSION,
        QueryKind::PipelineStatistics => D3D12_QUERY_TYPE_PIPELINE_STATISTICS,
    }
}

pub fn shading_rate_to_d3d12(rate: ShadingRate) -> D3D12_SHADING_RATE {
    match rate {
        ShadingRate::Rate1x1 => D3D12_SHADING_RATE_1X1,
        ShadingRate::Rate1x2 => D3D12_SHADING_RATE_1X2,
        ShadingRate::Rate2x1 => D3D12_SHADING_RATE_2X1,
        ShadingRate::Rate2x2 => D3D12_SHADING_RATE_2X2,
        ShadingRate::Rate2x4 => D3D12_SHADING_RATE_2X4,
        ShadingRate::Rate4x2 => D3D12_SHADING_RATE_4X2,
        ShadingRate::Rate4x4 => D3D12_SHADING_RATE_4X4,
    }
}

/// Resource dimension for a texture dimension
pub fn resource_dimension_to_d3d12(dimension: TextureDimension) -> D3D12_RESOURCE_DIMENSION {
    match dimension {
        TextureDimension::D1 => D3D12_RESOURCE_DIMENSION_TEXTURE1D,
        TextureDimension::D2 | TextureDimension::Cube => D3D12_RESOURCE_DIMENSION_TEXTURE2D,
        TextureDimension::D3 => D3D12_RESOURCE_DIMENSION_TEXTURE3D,
    }
}

/// Row pitch aligned to the texture-data placement requirement
pub fn aligned_row_pitch(format: PixelFormat, width: u32) -> u32 {
    let tight = format.row_pitch(width);
    let alignment = D3D12_TEXTURE_DATA_PITCH_ALIGNMENT;
    (tight + alignment - 1) & !(alignment - 1)
}

/// Align a value up to a power-of-two alignment
pub fn align_up(value: u64, alignment: u64) -> u64 {
    (value + alignment - 1) & !(alignment - 1)
}
