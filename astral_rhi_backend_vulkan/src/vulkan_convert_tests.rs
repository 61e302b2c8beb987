//! Unit tests for RHI-to-Vulkan conversion functions
//!
//! Pure mapping functions, no GPU required.

use super::*;

// ============================================================================
// FORMAT CONVERSION TESTS
// ============================================================================

#[test]
fn test_color_formats_map_to_same_bit_layout() {
    assert_eq!(format_to_vk(PixelFormat::Rgba8Unorm), vk::Format::R8G8B8A8_UNORM);
    assert_eq!(format_to_vk(PixelFormat::Bgra8Unorm), vk::Format::B8G8R8A8_UNORM);
    assert_eq!(format_to_vk(PixelFormat::Rgba16Float), vk::Format::R16G16B16A16_SFLOAT);
    assert_eq!(format_to_vk(PixelFormat::Rg32Float), vk::Format::R32G32_SFLOAT);
    assert_eq!(format_to_vk(PixelFormat::R32Uint), vk::Format::R32_UINT);
}

#[test]
fn test_srgb_formats() {
    assert_eq!(format_to_vk(PixelFormat::Rgba8UnormSrgb), vk::Format::R8G8B8A8_SRGB);
    assert_eq!(format_to_vk(PixelFormat::Bgra8UnormSrgb), vk::Format::B8G8R8A8_SRGB);
    assert_eq!(format_to_vk(PixelFormat::Bc7RgbaUnormSrgb), vk::Format::BC7_SRGB_BLOCK);
}

#[test]
fn test_packed_formats_use_reversed_component_order() {
    // D3D names these by memory order; Vulkan packs from the MSB
    assert_eq!(
        format_to_vk(PixelFormat::Rgb10a2Unorm),
        vk::Format::A2B10G10R10_UNORM_PACK32
    );
    assert_eq!(
        format_to_vk(PixelFormat::Rg11b10Float),
        vk::Format::B10G11R11_UFLOAT_PACK32
    );
    assert_eq!(
        format_to_vk(PixelFormat::Rgb9e5Float),
        vk::Format::E5B9G9R9_UFLOAT_PACK32
    );
}

#[test]
fn test_depth_formats() {
    assert_eq!(format_to_vk(PixelFormat::Depth16Unorm), vk::Format::D16_UNORM);
    assert_eq!(format_to_vk(PixelFormat::Depth32Float), vk::Format::D32_SFLOAT);
    assert_eq!(
        format_to_vk(PixelFormat::Depth24UnormStencil8),
        vk::Format::D24_UNORM_S8_UINT
    );
    assert_eq!(
        format_to_vk(PixelFormat::Depth32FloatStencil8),
        vk::Format::D32_SFLOAT_S8_UINT
    );
}

#[test]
fn test_block_compressed_formats() {
    assert_eq!(format_to_vk(PixelFormat::Bc1RgbaUnorm), vk::Format::BC1_RGBA_UNORM_BLOCK);
    assert_eq!(format_to_vk(PixelFormat::Bc5RgSnorm), vk::Format::BC5_SNORM_BLOCK);
    assert_eq!(format_to_vk(PixelFormat::Bc6hRgbUfloat), vk::Format::BC6H_UFLOAT_BLOCK);
}

#[test]
fn test_undefined_format() {
    assert_eq!(format_to_vk(PixelFormat::Undefined), vk::Format::UNDEFINED);
}

#[test]
fn test_aspect_masks() {
    assert_eq!(aspect_to_vk(PixelFormat::Rgba8Unorm), vk::ImageAspectFlags::COLOR);
    assert_eq!(aspect_to_vk(PixelFormat::Depth32Float), vk::ImageAspectFlags::DEPTH);
    assert_eq!(
        aspect_to_vk(PixelFormat::Depth24UnormStencil8),
        vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
    );
}

// ============================================================================
// LAYOUT / BARRIER CONVERSION TESTS
// ============================================================================

#[test]
fn test_resource_layouts() {
    assert_eq!(layout_to_vk(ResourceLayout::Undefined), vk::ImageLayout::UNDEFINED);
    assert_eq!(
        layout_to_vk(ResourceLayout::RenderTarget),
        vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL
    );
    assert_eq!(layout_to_vk(ResourceLayout::Present), vk::ImageLayout::PRESENT_SRC_KHR);
    assert_eq!(layout_to_vk(ResourceLayout::CopySrc), vk::ImageLayout::TRANSFER_SRC_OPTIMAL);
    assert_eq!(layout_to_vk(ResourceLayout::CopyDst), vk::ImageLayout::TRANSFER_DST_OPTIMAL);
    assert_eq!(layout_to_vk(ResourceLayout::General), vk::ImageLayout::GENERAL);
}

#[test]
fn test_present_layout_has_no_access() {
    // Present waits are expressed through semaphores, not memory accesses
    assert_eq!(layout_access_to_vk(ResourceLayout::Present), vk::AccessFlags2::empty());
    assert_eq!(layout_access_to_vk(ResourceLayout::Undefined), vk::AccessFlags2::empty());
}

#[test]
fn test_depth_layouts_cover_both_fragment_test_stages() {
    let stages = layout_stage_to_vk(ResourceLayout::DepthWrite);
    assert!(stages.contains(vk::PipelineStageFlags2::EARLY_FRAGMENT_TESTS));
    assert!(stages.contains(vk::PipelineStageFlags2::LATE_FRAGMENT_TESTS));
}

// ============================================================================
// STATE CONVERSION TESTS
// ============================================================================

#[test]
fn test_sampler_conversions() {
    assert_eq!(filter_to_vk(FilterMode::Nearest), vk::Filter::NEAREST);
    assert_eq!(mipmap_mode_to_vk(FilterMode::Linear), vk::SamplerMipmapMode::LINEAR);
    assert_eq!(
        address_mode_to_vk(AddressMode::ClampToBorder),
        vk::SamplerAddressMode::CLAMP_TO_BORDER
    );
    assert_eq!(compare_op_to_vk(CompareOp::LessOrEqual), vk::CompareOp::LESS_OR_EQUAL);
    assert_eq!(
        border_color_to_vk(BorderColor::OpaqueWhite),
        vk::BorderColor::FLOAT_OPAQUE_WHITE
    );
}

#[test]
fn test_pipeline_state_conversions() {
    assert_eq!(
        topology_to_vk(PrimitiveTopology::TriangleStrip),
        vk::PrimitiveTopology::TRIANGLE_STRIP
    );
    assert_eq!(fill_mode_to_vk(FillMode::Wireframe), vk::PolygonMode::LINE);
    assert_eq!(cull_mode_to_vk(CullMode::None), vk::CullModeFlags::NONE);
    assert_eq!(
        blend_factor_to_vk(BlendFactor::InvSrcAlpha),
        vk::BlendFactor::ONE_MINUS_SRC_ALPHA
    );
    assert_eq!(blend_op_to_vk(BlendOp::ReverseSubtract), vk::BlendOp::REVERSE_SUBTRACT);
    assert_eq!(stencil_op_to_vk(StencilOp::IncrementWrap), vk::StencilOp::INCREMENT_AND_WRAP);
}

#[test]
fn test_shader_stage_conversions() {
    assert_eq!(shader_stage_to_vk(ShaderStage::Pixel), vk::ShaderStageFlags::FRAGMENT);
    assert_eq!(shader_stage_to_vk(ShaderStage::Mesh), vk::ShaderStageFlags::MESH_EXT);
    assert_eq!(
        shader_stage_to_vk(ShaderStage::RayGeneration),
        vk::ShaderStageFlags::RAYGEN_KHR
    );
}

#[test]
fn test_index_and_input_rate() {
    assert_eq!(index_format_to_vk(IndexFormat::Uint16), vk::IndexType::UINT16);
    assert_eq!(index_format_to_vk(IndexFormat::Uint32), vk::IndexType::UINT32);
    assert_eq!(
        vertex_input_rate_to_vk(VertexInputRate::Instance),
        vk::VertexInputRate::INSTANCE
    );
}

#[test]
fn test_shading_rate_fragment_sizes() {
    assert_eq!(shading_rate_to_vk(ShadingRate::Rate1x1), vk::Extent2D { width: 1, height: 1 });
    assert_eq!(shading_rate_to_vk(ShadingRate::Rate2x4), vk::Extent2D { width: 2, height: 4 });
    assert_eq!(shading_rate_to_vk(ShadingRate::Rate4x4), vk::Extent2D { width: 4, height: 4 });
}

#[test]
fn test_view_types() {
    assert_eq!(view_type_to_vk(TextureDimension::D2, 1), vk::ImageViewType::TYPE_2D);
    assert_eq!(view_type_to_vk(TextureDimension::D2, 4), vk::ImageViewType::TYPE_2D_ARRAY);
    assert_eq!(view_type_to_vk(TextureDimension::Cube, 6), vk::ImageViewType::CUBE);
    assert_eq!(view_type_to_vk(TextureDimension::Cube, 12), vk::ImageViewType::CUBE_ARRAY);
    assert_eq!(view_type_to_vk(TextureDimension::D3, 1), vk::ImageViewType::TYPE_3D);
}

#[test]
fn test_query_kinds() {
    assert_eq!(query_kind_to_vk(QueryKind::Timestamp), vk::QueryType::TIMESTAMP);
    assert_eq!(query_kind_to_vk(QueryKind::Occlusion), vk::QueryType::OCCLUSION);
    assert_eq!(query_kind_to_vk(QueryKind::BinaryOcclusion), vk::QueryType::OCCLUSION);
}
