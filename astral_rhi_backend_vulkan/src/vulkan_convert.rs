//! RHI-to-Vulkan enum and state conversions
//!
//! Pure mapping functions, no device access. Barrier conversions target the
//! synchronization2 API (core in Vulkan 1.3).

use ash::vk;

use astral_rhi::{
    AddressMode, BlendFactor, BlendOp, BorderColor, CompareOp, CullMode, FillMode, FilterMode,
    FormatAspect, IndexFormat, LoadOp, PixelFormat, PrimitiveTopology, QueryKind, ResourceLayout,
    ShaderStage, ShadingRate, StencilOp, StoreOp, TextureDimension, VertexInputRate,
};

/// Map an RHI pixel format to the Vulkan format with the same bit layout
pub fn format_to_vk(format: PixelFormat) -> vk::Format {
    use PixelFormat::*;
    match format {
        Undefined => vk::Format::UNDEFINED,

        R8Unorm => vk::Format::R8_UNORM,
        R8Snorm => vk::Format::R8_SNORM,
        R8Uint => vk::Format::R8_UINT,
        R8Sint => vk::Format::R8_SINT,

        R16Unorm => vk::Format::R16_UNORM,
        R16Snorm => vk::Format::R16_SNORM,
        R16Uint => vk::Format::R16_UINT,
        R16Sint => vk::Format::R16_SINT,
        R16Float => vk::Format::R16_SFLOAT,

        R32Uint => vk::Format::R32_UINT,
        R32Sint => vk::Format::R32_SINT,
        R32Float => vk::Format::R32_SFLOAT,

        Rg8Unorm => vk::Format::R8G8_UNORM,
        Rg8Snorm => vk::Format::R8G8_SNORM,
        Rg8Uint => vk::Format::R8G8_UINT,
        Rg8Sint => vk::Format::R8G8_SINT,

        Rg16Unorm => vk::Format::R16G16_UNORM,
        Rg16Snorm => vk::Format::R16G16_SNORM,
        Rg16Uint => vk::Format::R16G16_UINT,
        Rg16Sint => vk::Format::R16G16_SINT,
        Rg16Float => vk::Format::R16G16_SFLOAT,

        Rg32Uint => vk::Format::R32G32_UINT,
        Rg32Sint => vk::Format::R32G32_SINT,
        Rg32Float => vk::Format::R32G32_SFLOAT,

        Rgba8Unorm => vk::Format::R8G8B8A8_UNORM,
        Rgba8UnormSrgb => vk::Format::R8G8B8A8_SRGB,
        Rgba8Snorm => vk::Format::R8G8B8A8_SNORM,
        Rgba8Uint => vk::Format::R8G8B8A8_UINT,
        Rgba8Sint => vk::Format::R8G8B8A8_SINT,
        Bgra8Unorm => vk::Format::B8G8R8A8_UNORM,
        Bgra8UnormSrgb => vk::Format::B8G8R8A8_SRGB,

        Rgba16Unorm => vk::Format::R16G16B16A16_UNORM,
        Rgba16Snorm => vk::Format::R16G16B16A16_SNORM,
        Rgba16Uint => vk::Format::R16G16B16A16_UINT,
        Rgba16Sint => vk::Format::R16G16B16A16_SINT,
        Rgba16Float => vk::Format::R16G16B16A16_SFLOAT,

        Rgba32Uint => vk::Format::R32G32B32A32_UINT,
        Rgba32Sint => vk::Format::R32G32B32A32_SINT,
        Rgba32Float => vk::Format::R32G32B32A32_SFLOAT,

        Rgb10a2Unorm => vk::Format::A2B10G10R10_UNORM_PACK32,
        Rg11b10Float => vk::Format::B10G11R11_UFLOAT_PACK32,
        Rgb9e5Float => vk::Format::E5B9G9R9_UFLOAT_PACK32,
        Bgra4Unorm => vk::Format::B4G4R4A4_UNORM_PACK16,
        B5g6r5Unorm => vk::Format::B5G6R5_UNORM_PACK16,
        B5g5r5a1Unorm => vk::Format::B5G5R5A1_UNORM_PACK16,

        Depth16Unorm => vk::Format::D16_UNORM,
        Depth32Float => vk::Format::D32_SFLOAT,
        Depth24UnormStencil8 => vk::Format::D24_UNORM_S8_UINT,
        Depth32FloatStencil8 => vk::Format::D32_SFLOAT_S8_UINT,

        Bc1RgbaUnorm => vk::Format::BC1_RGBA_UNORM_BLOCK,
        Bc1RgbaUnormSrgb => vk::Format::BC1_RGBA_SRGB_BLOCK,
        Bc2RgbaUnorm => vk::Format::BC2_UNORM_BLOCK,
        Bc2RgbaUnormSrgb => vk::Format::BC2_SRGB_BLOCK,
        Bc3RgbaUnorm => vk::Format::BC3_UNORM_BLOCK,
        Bc3RgbaUnormSrgb => vk::Format::BC3_SRGB_BLOCK,
        Bc4RUnorm => vk::Format::BC4_UNORM_BLOCK,
        Bc4RSnorm => vk::Format::BC4_SNORM_BLOCK,
        Bc5RgUnorm => vk::Format::BC5_UNORM_BLOCK,
        Bc5RgSnorm => vk::Format::BC5_SNORM_BLOCK,
        Bc6hRgbUfloat => vk::Format::BC6H_UFLOAT_BLOCK,
        Bc6hRgbSfloat => vk::Format::BC6H_SFLOAT_BLOCK,
        Bc7RgbaUnorm => vk::Format::BC7_UNORM_BLOCK,
        Bc7RgbaUnormSrgb => vk::Format::BC7_SRGB_BLOCK,
    }
}

/// Aspect mask for a format
pub fn aspect_to_vk(format: PixelFormat) -> vk::ImageAspectFlags {
    let aspect = format.info().aspect;
    let mut flags = vk::ImageAspectFlags::empty();
    if aspect.contains(FormatAspect::COLOR) {
        flags |= vk::ImageAspectFlags::COLOR;
    }
    if aspect.contains(FormatAspect::DEPTH) {
        flags |= vk::ImageAspectFlags::DEPTH;
    }
    if aspect.contains(FormatAspect::STENCIL) {
        flags |= vk::ImageAspectFlags::STENCIL;
    }
    flags
}

/// Image layout for a resource layout
pub fn layout_to_vk(layout: ResourceLayout) -> vk::ImageLayout {
    match layout {
        ResourceLayout::Undefined => vk::ImageLayout::UNDEFINED,
        ResourceLayout::RenderTarget => vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        ResourceLayout::DepthWrite => vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        ResourceLayout::DepthRead => vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL,
        ResourceLayout::ShaderRead => vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        ResourceLayout::Present => vk::ImageLayout::PRESENT_SRC_KHR,
        ResourceLayout::CopySrc => vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
        ResourceLayout::CopyDst => vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        ResourceLayout::General => vk::ImageLayout::GENERAL,
    }
}

/// Synchronization2 stage mask a layout is used in
pub fn layout_stage_to_vk(layout: ResourceLayout) -> vk::PipelineStageFlags2 {
    match layout {
        ResourceLayout::Undefined => vk::PipelineStageFlags2::TOP_OF_PIPE,
        ResourceLayout::RenderTarget => vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
        ResourceLayout::DepthWrite | ResourceLayout::DepthRead => {
            vk::PipelineStageFlags2::EARLY_FRAGMENT_TESTS
                | vk::PipelineStageFlags2::LATE_FRAGMENT_TESTS
        }
        ResourceLayout::ShaderRead => vk::PipelineStageFlags2::ALL_GRAPHICS
            | vk::PipelineStageFlags2::COMPUTE_SHADER,
        ResourceLayout::Present => vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
        ResourceLayout::CopySrc | ResourceLayout::CopyDst => vk::PipelineStageFlags2::TRANSFER,
        ResourceLayout::General => vk::PipelineStageFlags2::ALL_COMMANDS,
    }
}

/// Synchronization2 access mask for a layout
pub fn layout_access_to_vk(layout: ResourceLayout) -> vk::AccessFlags2 {
    match layout {
        ResourceLayout::Undefined => vk::AccessFlags2::empty(),
        ResourceLayout::RenderTarget => {
            vk::AccessFlags2::COLOR_ATTACHMENT_READ | vk::AccessFlags2::COLOR_ATTACHMENT_WRITE
        }
        ResourceLayout::DepthWrite => {
            vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_READ
                | vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_WRITE
        }
        ResourceLayout::DepthRead => vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_READ,
        ResourceLayout::ShaderRead => vk::AccessFlags2::SHADER_READ,
        ResourceLayout::Present => vk::AccessFlags2::empty(),
        ResourceLayout::CopySrc => vk::AccessFlags2::TRANSFER_READ,
        ResourceLayout::CopyDst => vk::AccessFlags2::TRANSFER_WRITE,
        ResourceLayout::General => vk::AccessFlags2::MEMORY_READ | vk::AccessFlags2::MEMORY_WRITE,
    }
}

pub fn filter_to_vk(filter: FilterMode) -> vk::Filter {
    match filter {
        FilterMode::Nearest => vk::Filter::NEAREST,
        FilterMode::Linear => vk::Filter::LINEAR,
    }
}

pub fn mipmap_mode_to_vk(filter: FilterMode) -> vk::SamplerMipmapMode {
    match filter {
        FilterMode::Nearest => vk::SamplerMipmapMode::NEAREST,
        FilterMode::Linear => vk::SamplerMipmapMode::LINEAR,
    }
}

pub fn address_mode_to_vk(mode: AddressMode) -> vk::SamplerAddressMode {
    match mode {
        AddressMode::Repeat => vk::SamplerAddressMode::REPEAT,
        AddressMode::MirroredRepeat => vk::SamplerAddressMode::MIRRORED_REPEAT,
        AddressMode::ClampToEdge => vk::SamplerAddressMode::CLAMP_TO_EDGE,
        AddressMode::ClampToBorder => vk::SamplerAddressMode::CLAMP_TO_BORDER,
    }
}

pub fn compare_op_to_vk(op: CompareOp) -> vk::CompareOp {
    match op {
        CompareOp::Never => vk::CompareOp::NEVER,
        CompareOp::Less => vk::CompareOp::LESS,
        CompareOp::Equal => vk::CompareOp::EQUAL,
        CompareOp::LessOrEqual => vk::CompareOp::LESS_OR_EQUAL,
        CompareOp::Greater => vk::CompareOp::GREATER,
        CompareOp::NotEqual => vk::CompareOp::NOT_EQUAL,
        CompareOp::GreaterOrEqual => vk::CompareOp::GREATER_OR_EQUAL,
        CompareOp::Always => vk::CompareOp::ALWAYS,
    }
}

pub fn border_color_to_vk(color: BorderColor) -> vk::BorderColor {
    match color {
        BorderColor::TransparentBlack => vk::BorderColor::FLOAT_TRANSPARENT_BLACK,
        BorderColor::OpaqueBlack => vk::BorderColor::FLOAT_OPAQUE_BLACK,
        BorderColor::OpaqueWhite => vk::BorderColor::FLOAT_OPAQUE_WHITE,
    }
}

pub fn topology_to_vk(topology: PrimitiveTopology) -> vk::PrimitiveTopology {
    match topology {
        PrimitiveTopology::PointList => vk::PrimitiveTopology::POINT_LIST,
        PrimitiveTopology::LineList => vk::PrimitiveTopology::LINE_LIST,
        PrimitiveTopology::LineStrip => vk::PrimitiveTopology::LINE_STRIP,
        PrimitiveTopology::TriangleList => vk::PrimitiveTopology::TRIANGLE_LIST,
        PrimitiveTopology::TriangleStrip => vk::PrimitiveTopology::TRIANGLE_STRIP,
    }
}

pub fn fill_mode_to_vk(mode: FillMode) -> vk::PolygonMode {
    match mode {
        FillMode::Solid => vk::PolygonMode::FILL,
        FillMode::Wireframe => vk::PolygonMode::LINE,
    }
}

pub fn cull_mode_to_vk(mode: CullMode) -> vk::CullModeFlags {
    match mode {
        CullMode::None => vk::CullModeFlags::NONE,
        CullMode::Front => vk::CullModeFlags::FRONT,
        CullMode::Back => vk::CullModeFlags::BACK,
    }
}

pub fn blend_factor_to_vk(factor: BlendFactor) -> vk::BlendFactor {
    match factor {
        BlendFactor::Zero => vk::BlendFactor::ZERO,
        BlendFactor::One => vk::BlendFactor::ONE,
        BlendFactor::SrcColor => vk::BlendFactor::SRC_COLOR,
        BlendFactor::InvSrcColor => vk::BlendFactor::ONE_MINUS_SRC_COLOR,
        BlendFactor::SrcAlpha => vk::BlendFactor::SRC_ALPHA,
        BlendFactor::InvSrcAlpha => vk::BlendFactor::ONE_MINUS_SRC_ALPHA,
        BlendFactor::DstColor => vk::BlendFactor::DST_COLOR,
        BlendFactor::InvDstColor => vk::BlendFactor::ONE_MINUS_DST_COLOR,
        BlendFactor::DstAlpha => vk::BlendFactor::DST_ALPHA,
        BlendFactor::InvDstAlpha => vk::BlendFactor::ONE_MINUS_DST_ALPHA,
        BlendFactor::BlendConstant => vk::BlendFactor::CONSTANT_COLOR,
        BlendFactor::InvBlendConstant => vk::BlendFactor::ONE_MINUS_CONSTANT_COLOR,
    }
}

pub fn blend_op_to_vk(op: BlendOp) -> vk::BlendOp {
    match op {
        BlendOp::Add => vk::BlendOp::ADD,
        BlendOp::Subtract => vk::BlendOp::SUBTRACT,
        BlendOp::ReverseSubtract => vk::BlendOp::REVERSE_SUBTRACT,
        BlendOp::Min => vk::BlendOp::MIN,
        BlendOp::Max => vk::BlendOp::MAX,
    }
}

pub fn stencil_op_to_vk(op: StencilOp) -> vk::StencilOp {
    match op {
        StencilOp::Keep => vk::StencilOp::KEEP,
        StencilOp::Zero => vk::StencilOp::ZERO,
        StencilOp::Replace => vk::StencilOp::REPLACE,
        StencilOp::IncrementClamp => vk::StencilOp::INCREMENT_AND_CLAMP,
        StencilOp::DecrementClamp => vk::StencilOp::DECREMENT_AND_CLAMP,
        StencilOp::Invert => vk::StencilOp::INVERT,
        StencilOp::IncrementWrap => vk::StencilOp::INCREMENT_AND_WRAP,
        StencilOp::DecrementWrap => vk::StencilOp::DECREMENT_AND_WRAP,
    }
}

pub fn vertex_input_rate_to_vk(rate: VertexInputRate) -> vk::VertexInputRate {
    match rate {
        VertexInputRate::Vertex => vk::VertexInputRate::VERTEX,
        VertexInputRate::Instance => vk::VertexInputRate::INSTANCE,
    }
}

pub fn index_format_to_vk(format: IndexFormat) -> vk::IndexType {
    match format {
        IndexFormat::Uint16 => vk::IndexType::UINT16,
        IndexFormat::Uint32 => vk::IndexType::UINT32,
    }
}

pub fn shader_stage_to_vk(stage: ShaderStage) -> vk::ShaderStageFlags {
    match stage {
        ShaderStage::Vertex => vk::ShaderStageFlags::VERTEX,
        ShaderStage::Pixel => vk::ShaderStageFlags::FRAGMENT,
        ShaderStage::Compute => vk::ShaderStageFlags::COMPUTE,
        ShaderStage::Mesh => vk::ShaderStageFlags::MESH_EXT,
        ShaderStage::Amplification => vk::ShaderStageFlags::TASK_EXT,
        ShaderStage::RayGeneration => vk::ShaderStageFlags::RAYGEN_KHR,
        ShaderStage::Miss => vk::ShaderStageFlags::MISS_KHR,
        ShaderStage::ClosestHit => vk::ShaderStageFlags::CLOSEST_HIT_KHR,
        ShaderStage::AnyHit => vk::ShaderStageFlags::ANY_HIT_KHR,
        ShaderStage::Intersection => vk::ShaderStageFlags::INTERSECTION_KHR,
    }
}

pub fn load_op_to_vk(op: LoadOp) -> vk::AttachmentLoadOp {
    match op {
        LoadOp::Load => vk::AttachmentLoadOp::LOAD,
        LoadOp::Clear => vk::AttachmentLoadOp::CLEAR,
        LoadOp::DontCare => vk::AttachmentLoadOp::DONT_CARE,
    }
}

pub fn store_op_to_vk(op: StoreOp) -> vk::AttachmentStoreOp {
    match op {
        StoreOp::Store => vk::AttachmentStoreOp::STORE,
        StoreOp::DontCare => vk::AttachmentStoreOp::DONT_CARE,
    }
}

pub fn query_kind_to_vk(kind: QueryKind) -> vk::QueryType {
    match kind {
        QueryKind::Timestamp => vk::QueryType::TIMESTAMP,
        QueryKind::Occlusion | QueryKind::BinaryOcclusion => vk::QueryType::OCCLUSION,
        QueryKind::PipelineStatistics => vk::QueryType::PIPELINE_STATISTICS,
    }
}

/// Fragment size for a per-draw shading rate
pub fn shading_rate_to_vk(rate: ShadingRate) -> vk::Extent2D {
    let (width, height) = match rate {
        ShadingRate::Rate1x1 => (1, 1),
        ShadingRate::Rate1x2 => (1, 2),
        ShadingRate::Rate2x1 => (2, 1),
        ShadingRate::Rate2x2 => (2, 2),
        ShadingRate::Rate2x4 => (2, 4),
        ShadingRate::Rate4x2 => (4, 2),
        ShadingRate::Rate4x4 => (4, 4),
    };
    vk::Extent2D { width, height }
}

/// Image type and view type for a texture dimension
pub fn image_type_to_vk(dimension: TextureDimension) -> vk::ImageType {
    match dimension {
        TextureDimension::D1 => vk::ImageType::TYPE_1D,
        TextureDimension::D2 | TextureDimension::Cube => vk::ImageType::TYPE_2D,
        TextureDimension::D3 => vk::ImageType::TYPE_3D,
    }
}

/// Default view type for a texture dimension and layer count
pub fn view_type_to_vk(dimension: TextureDimension, layers: u32) -> vk::ImageViewType {
    match dimension {
        TextureDimension::D1 => {
            if layers > 1 {
                vk::ImageViewType::TYPE_1D_ARRAY
            } else {
                vk::ImageViewType::TYPE_1D
            }
        }
        TextureDimension::D2 => {
            if layers > 1 {
                vk::ImageViewType::TYPE_2D_ARRAY
            } else {
                vk::ImageViewType::TYPE_2D
            }
        }
        TextureDimension::D3 => vk::ImageViewType::TYPE_3D,
        TextureDimension::Cube => {
            if layers > 6 {
                vk::ImageViewType::CUBE_ARRAY
            } else {
                vk::ImageViewType::CUBE
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
#[path = "vulkan_convert_tests.rs"]
mod tests;
