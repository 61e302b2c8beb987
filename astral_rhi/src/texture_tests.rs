use super::*;

fn base_desc() -> TextureDesc {
    TextureDesc {
        width: 256,
        height: 256,
        ..Default::default()
    }
}

#[test]
fn full_mip_chain_length() {
    assert_eq!(TextureDesc::max_mip_levels(256, 256, 1), 9);
    assert_eq!(TextureDesc::max_mip_levels(1, 1, 1), 1);
    assert_eq!(TextureDesc::max_mip_levels(1024, 1, 1), 11);
    assert_eq!(TextureDesc::max_mip_levels(5, 9, 1), 4);
}

#[test]
fn cube_count_expands_to_six_native_layers_each() {
    let cube_array = TextureDesc {
        dimension: TextureDimension::Cube,
        depth_or_array_size: 2,
        ..base_desc()
    };
    assert!(cube_array.validate().is_ok());
    assert_eq!(cube_array.array_size(), 2);
    assert_eq!(cube_array.native_array_size(), 12);

    let volume = TextureDesc {
        dimension: TextureDimension::D3,
        depth_or_array_size: 64,
        ..base_desc()
    };
    assert_eq!(volume.array_size(), 1);
    assert_eq!(volume.native_array_size(), 1);
}

#[test]
fn cube_views_address_native_layers() {
    let cube_array = TextureDesc {
        dimension: TextureDimension::Cube,
        depth_or_array_size: 2,
        ..base_desc()
    };

    // The second cube occupies native layers 6..12
    let second_cube = TextureViewDesc {
        base_layer: 6,
        layer_count: 6,
        ..Default::default()
    }
    .normalized(&cube_array)
    .unwrap();
    assert_eq!(second_cube.base_layer, 6);
    assert_eq!(second_cube.layer_count, 6);

    let past_end = TextureViewDesc {
        base_layer: 12,
        ..Default::default()
    };
    assert!(past_end.normalized(&cube_array).is_err());
}

#[test]
fn depth_usage_requires_depth_format() {
    let bad = TextureDesc {
        usage: TextureUsage::DEPTH_STENCIL,
        format: PixelFormat::Rgba8Unorm,
        ..base_desc()
    };
    assert!(bad.validate().is_err());

    let good = TextureDesc {
        usage: TextureUsage::DEPTH_STENCIL,
        format: PixelFormat::Depth32Float,
        ..base_desc()
    };
    assert!(good.validate().is_ok());
}

#[test]
fn depth_and_render_target_are_exclusive() {
    let desc = TextureDesc {
        usage: TextureUsage::DEPTH_STENCIL | TextureUsage::RENDER_TARGET,
        format: PixelFormat::Depth32Float,
        ..base_desc()
    };
    assert!(desc.validate().is_err());
}

#[test]
fn storage_forbids_depth_and_srgb() {
    let srgb = TextureDesc {
        usage: TextureUsage::STORAGE,
        format: PixelFormat::Rgba8UnormSrgb,
        ..base_desc()
    };
    assert!(srgb.validate().is_err());

    let depth = TextureDesc {
        usage: TextureUsage::STORAGE,
        format: PixelFormat::Depth16Unorm,
        ..base_desc()
    };
    assert!(depth.validate().is_err());
}

#[test]
fn mip_count_must_fit_extent() {
    let too_many = TextureDesc {
        mip_levels: 10,
        ..base_desc()
    };
    assert!(too_many.validate().is_err());

    let max = TextureDesc {
        mip_levels: 9,
        ..base_desc()
    };
    assert!(max.validate().is_ok());
}

#[test]
fn view_desc_normalization_resolves_counts_and_format() {
    let texture = TextureDesc {
        mip_levels: 4,
        depth_or_array_size: 8,
        ..base_desc()
    };

    let normalized = TextureViewDesc::all().normalized(&texture).unwrap();
    assert_eq!(normalized.mip_count, 4);
    assert_eq!(normalized.layer_count, 8);
    assert_eq!(normalized.format, Some(PixelFormat::Rgba8Unorm));

    let partial = TextureViewDesc {
        base_mip: 2,
        base_layer: 4,
        ..Default::default()
    }
    .normalized(&texture)
    .unwrap();
    assert_eq!(partial.mip_count, 2);
    assert_eq!(partial.layer_count, 4);
}

#[test]
fn equivalent_view_descs_normalize_to_the_same_key() {
    let texture = TextureDesc {
        mip_levels: 4,
        ..base_desc()
    };

    let implicit = TextureViewDesc::all().normalized(&texture).unwrap();
    let explicit = TextureViewDesc {
        base_mip: 0,
        mip_count: 4,
        base_layer: 0,
        layer_count: 1,
        format: Some(PixelFormat::Rgba8Unorm),
    }
    .normalized(&texture)
    .unwrap();
    assert_eq!(implicit, explicit);
}

#[test]
fn view_sub_range_must_stay_in_bounds() {
    let texture = TextureDesc {
        mip_levels: 4,
        ..base_desc()
    };

    let base_out = TextureViewDesc {
        base_mip: 4,
        ..Default::default()
    };
    assert!(base_out.normalized(&texture).is_err());

    let count_out = TextureViewDesc {
        base_mip: 2,
        mip_count: 3,
        ..Default::default()
    };
    assert!(count_out.normalized(&texture).is_err());

    let layer_out = TextureViewDesc {
        base_layer: 1,
        ..Default::default()
    };
    assert!(layer_out.normalized(&texture).is_err());
}
