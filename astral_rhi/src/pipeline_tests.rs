use super::*;

use crate::shader::{Shader, ShaderStage};

struct TestShader {
    stage: ShaderStage,
    hash: u64,
}

impl Shader for TestShader {
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

fn shader(stage: ShaderStage, hash: u64) -> ShaderHandle {
    Arc::new(TestShader { stage, hash })
}

fn graphics_desc() -> GraphicsPipelineDesc {
    GraphicsPipelineDesc {
        vertex_shader: shader(ShaderStage::Vertex, 1),
        pixel_shader: Some(shader(ShaderStage::Pixel, 2)),
        input_layout: InputLayout::default(),
        rasterizer: RasterizerState::default(),
        blend: BlendState::default(),
        depth_stencil: DepthStencilState::default(),
        topology: PrimitiveTopology::TriangleList,
        sample_mask: !0,
        render_target_formats: RenderTargetFormats {
            color: vec![PixelFormat::Bgra8Unorm],
            depth_stencil: None,
            sample_count: 1,
        },
        debug_name: None,
    }
}

#[test]
fn cache_key_is_stable() {
    assert_eq!(graphics_desc().cache_key(), graphics_desc().cache_key());
}

#[test]
fn cache_key_reflects_state_changes() {
    let base = graphics_desc().cache_key();

    let mut wireframe = graphics_desc();
    wireframe.rasterizer.fill_mode = FillMode::Wireframe;
    assert_ne!(wireframe.cache_key(), base);

    let mut other_shader = graphics_desc();
    other_shader.vertex_shader = shader(ShaderStage::Vertex, 99);
    assert_ne!(other_shader.cache_key(), base);

    let mut other_formats = graphics_desc();
    other_formats.render_target_formats.color = vec![PixelFormat::Rgba16Float];
    assert_ne!(other_formats.cache_key(), base);
}

#[test]
fn cache_key_ignores_debug_name() {
    let mut named = graphics_desc();
    named.debug_name = Some("gbuffer".into());
    assert_eq!(named.cache_key(), graphics_desc().cache_key());
}

#[test]
fn depth_bias_participates_in_the_key() {
    let mut biased = graphics_desc();
    biased.rasterizer.depth_bias = 1.25;
    assert_ne!(biased.cache_key(), graphics_desc().cache_key());
}

#[test]
fn compute_key_follows_shader_identity() {
    let a = ComputePipelineDesc {
        compute_shader: shader(ShaderStage::Compute, 7),
        debug_name: None,
    };
    let b = ComputePipelineDesc {
        compute_shader: shader(ShaderStage::Compute, 7),
        debug_name: Some("culling".into()),
    };
    let c = ComputePipelineDesc {
        compute_shader: shader(ShaderStage::Compute, 8),
        debug_name: None,
    };
    assert_eq!(a.cache_key(), b.cache_key());
    assert_ne!(a.cache_key(), c.cache_key());
}

#[test]
fn stride_digest_tracks_bindings() {
    let mut a = VertexStrideDigest::default();
    let mut b = VertexStrideDigest::default();
    assert_eq!(a.value(), b.value());

    a.bind(0, 12);
    b.bind(0, 12);
    assert_eq!(a.value(), b.value());

    b.bind(1, 16);
    assert_ne!(a.value(), b.value());

    b.reset();
    assert_eq!(b.value(), VertexStrideDigest::default().value());
}

#[test]
fn stride_digest_is_order_sensitive() {
    let mut ab = VertexStrideDigest::default();
    ab.bind(0, 12);
    ab.bind(1, 16);

    let mut ba = VertexStrideDigest::default();
    ba.bind(1, 16);
    ba.bind(0, 12);

    assert_ne!(ab.value(), ba.value());
}

#[test]
fn combined_key_separates_stride_variants() {
    let key = graphics_desc().cache_key();

    let mut digest = VertexStrideDigest::default();
    digest.bind(0, 12);
    let narrow = combine_stride_digest(key, digest.value());

    let mut digest = VertexStrideDigest::default();
    digest.bind(0, 16);
    let wide = combine_stride_digest(key, digest.value());

    assert_ne!(narrow, wide);
    assert_ne!(narrow, key);
}
